use serde::Deserialize;

/// Minimum difficulty for ETC.
pub const MIN_DIFFICULTY: u64 = 131_072;
/// Difficulty bound divisor.
pub const DIFFICULTY_BOUND_DIVISOR: u64 = 2048;
/// Gas limit may move by less than parent / 1024 per block.
pub const GAS_LIMIT_BOUND_DIVISOR: u64 = 1024;
pub const MIN_GAS_LIMIT: u64 = 5000;
pub const MAX_EXTRA_DATA: usize = 32;
/// Blocks per difficulty bomb period.
pub const BOMB_PERIOD: u64 = 100_000;

/// Fork activation heights that change header rules.
///
/// Defaults are ETC mainnet. Test networks override them from config.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ForkSchedule {
    pub homestead_block: u64,
    /// EIP-100 difficulty adjustment (uncle aware).
    pub atlantis_block: u64,
    /// ECIP-1010: bomb frozen from here ...
    pub bomb_pause_block: u64,
    /// ... for this many blocks, then resumes delayed by the same amount.
    pub bomb_pause_length: u64,
    /// ECIP-1041: bomb removed.
    pub bomb_removal_block: u64,
}

impl Default for ForkSchedule {
    fn default() -> Self {
        Self {
            homestead_block: 1_150_000,
            atlantis_block: 8_772_000,
            bomb_pause_block: 3_000_000,
            bomb_pause_length: 2_000_000,
            bomb_removal_block: 5_900_000,
        }
    }
}

impl ForkSchedule {
    pub fn is_homestead(&self, number: u64) -> bool {
        number >= self.homestead_block
    }

    pub fn is_atlantis(&self, number: u64) -> bool {
        number >= self.atlantis_block
    }

    /// Block number the difficulty bomb is computed from, or `None` once the
    /// bomb is gone.
    pub fn bomb_reference(&self, number: u64) -> Option<u64> {
        if number >= self.bomb_removal_block {
            return None;
        }
        if number < self.bomb_pause_block {
            return Some(number);
        }
        if number < self.bomb_pause_block + self.bomb_pause_length {
            Some(self.bomb_pause_block)
        } else {
            Some(number - self.bomb_pause_length)
        }
    }
}
