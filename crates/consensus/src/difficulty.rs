use alloy_primitives::U256;
use chain::types::BlockHeader;

use crate::schedule::{ForkSchedule, BOMB_PERIOD, DIFFICULTY_BOUND_DIVISOR, MIN_DIFFICULTY};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DifficultyError {
    #[error("difficulty mismatch at block {block_number}: expected {expected}, got {actual}")]
    Mismatch {
        expected: U256,
        actual: U256,
        block_number: u64,
    },
}

/// Difficulty a child of `parent` mined at `timestamp` must declare.
///
/// The base moves by `parent / 2048 * sigma`, where sigma depends on the
/// active fork:
///
/// - Frontier: `+1` if the block came within 13s, `-1` otherwise
/// - Homestead: `max(1 - dt / 10, -99)`
/// - Atlantis (EIP-100): `max(y - dt / 9, -99)`, `y = 2` when the parent has uncles
///
/// While the bomb is live, `2^(periods - 2)` is added on top.
pub fn expected_difficulty(schedule: &ForkSchedule, parent: &BlockHeader, timestamp: u64) -> U256 {
    let floor = U256::from(MIN_DIFFICULTY);
    if parent.number == 0 && parent.difficulty.is_zero() {
        return floor;
    }

    let number = parent.number + 1;
    let step = parent.difficulty / U256::from(DIFFICULTY_BOUND_DIVISOR);
    let sigma = sigma(schedule, parent, number, timestamp.saturating_sub(parent.timestamp));

    let magnitude = step * U256::from(sigma.unsigned_abs());
    let base = if sigma >= 0 {
        parent.difficulty + magnitude
    } else {
        parent.difficulty.saturating_sub(magnitude)
    };

    base.max(floor) + bomb(schedule, number)
}

pub fn validate_difficulty(
    schedule: &ForkSchedule,
    header: &BlockHeader,
    parent: &BlockHeader,
) -> Result<(), DifficultyError> {
    let expected = expected_difficulty(schedule, parent, header.timestamp);
    if header.difficulty != expected {
        return Err(DifficultyError::Mismatch {
            expected,
            actual: header.difficulty,
            block_number: header.number,
        });
    }
    Ok(())
}

fn sigma(schedule: &ForkSchedule, parent: &BlockHeader, number: u64, elapsed: u64) -> i64 {
    let elapsed = i64::try_from(elapsed).unwrap_or(i64::MAX);
    if schedule.is_atlantis(number) {
        let target = if parent.has_uncles() { 2 } else { 1 };
        (target - elapsed / 9).max(-99)
    } else if schedule.is_homestead(number) {
        (1 - elapsed / 10).max(-99)
    } else if elapsed < 13 {
        1
    } else {
        -1
    }
}

fn bomb(schedule: &ForkSchedule, number: u64) -> U256 {
    match schedule.bomb_reference(number).map(|r| r / BOMB_PERIOD) {
        Some(periods) if periods > 1 => U256::from(1u64) << (periods as usize - 2),
        _ => U256::ZERO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::B256;

    fn parent(number: u64, timestamp: u64, difficulty: u64) -> BlockHeader {
        BlockHeader {
            uncle_hash: chain::empty_uncle_hash(),
            difficulty: U256::from(difficulty),
            number,
            gas_limit: 8_000_000,
            timestamp,
            ..Default::default()
        }
    }

    fn expect(p: &BlockHeader, timestamp: u64) -> U256 {
        expected_difficulty(&ForkSchedule::default(), p, timestamp)
    }

    #[test]
    fn frontier_moves_one_step_either_way() {
        let p = parent(100, 1000, 1_000_000);
        assert_eq!(expect(&p, 1012), U256::from(1_000_488u64));
        assert_eq!(expect(&p, 1013), U256::from(999_512u64));
    }

    #[test]
    fn homestead_with_bomb() {
        // dt = 5 -> sigma 1, periods 12 -> bomb 2^10
        let p = parent(1_200_000, 1000, 1_000_000);
        assert_eq!(expect(&p, 1005), U256::from(1_000_488u64 + 1024));
        // dt = 30 -> sigma -2
        assert_eq!(expect(&p, 1030), U256::from(999_024u64 + 1024));
    }

    #[test]
    fn slow_blocks_cap_at_ninety_nine_steps() {
        let p = parent(8_772_000, 1000, 10_000_000);
        let step = U256::from(10_000_000u64 / 2048);
        assert_eq!(
            expect(&p, 2000),
            U256::from(10_000_000u64) - step * U256::from(99u64)
        );
    }

    #[test]
    fn never_below_minimum() {
        let p = parent(6_000_000, 1000, MIN_DIFFICULTY);
        assert_eq!(expect(&p, 5000), U256::from(MIN_DIFFICULTY));
    }

    #[test]
    fn paused_bomb_uses_pause_block() {
        let p = parent(3_500_000, 1000, 10_000_000_000);
        let bomb = U256::from(1u64) << 28;
        assert_eq!(expect(&p, 1015), U256::from(10_000_000_000u64) + bomb);
    }

    #[test]
    fn atlantis_rewards_uncles() {
        let mut p = parent(8_772_000, 1000, 10_000_000);
        assert_eq!(expect(&p, 1005), U256::from(10_004_882u64));
        p.uncle_hash = B256::repeat_byte(0xaa);
        assert_eq!(expect(&p, 1005), U256::from(10_009_764u64));
        assert_eq!(expect(&p, 1030), U256::from(9_995_118u64));
    }

    #[test]
    fn validate_reports_mismatch() {
        let p = parent(6_000_000, 1000, 1_000_000);
        let mut child = parent(6_000_001, 1014, 0);
        child.difficulty = expect(&p, 1014);
        assert!(validate_difficulty(&ForkSchedule::default(), &child, &p).is_ok());

        child.difficulty += U256::from(1u64);
        assert!(matches!(
            validate_difficulty(&ForkSchedule::default(), &child, &p),
            Err(DifficultyError::Mismatch { block_number: 6_000_001, .. })
        ));
    }
}
