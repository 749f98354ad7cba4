use chain::{BlockHeader, HeaderReader, HeaderRef, SealedHeader};
use tracing::trace;

use crate::difficulty::validate_difficulty;
use crate::engine::{Engine, RuleError};
use crate::schedule::{ForkSchedule, GAS_LIMIT_BOUND_DIVISOR, MAX_EXTRA_DATA, MIN_GAS_LIMIT};

/// Header-against-ancestors rules for ETC proof-of-work headers.
///
/// Every header must link to its `depth` nearest ancestors by hash and number,
/// and satisfy the family rules against its direct parent: strictly
/// increasing timestamp, bounded gas-limit drift, gas used within the limit,
/// at most 32 bytes of extra data and the difficulty the fork schedule
/// prescribes.
///
/// PoW seals are not checked here: that needs an ethash cache per epoch, which
/// belongs to an engine wrapping this one.
#[derive(Debug, Clone)]
pub struct FamilyRules {
    schedule: ForkSchedule,
    depth: u64,
}

impl Default for FamilyRules {
    fn default() -> Self {
        Self::new(ForkSchedule::default(), 1)
    }
}

impl FamilyRules {
    pub fn new(schedule: ForkSchedule, depth: u64) -> Self {
        Self { schedule, depth }
    }
}

impl Engine for FamilyRules {
    fn ancestors_needed(&self, header: &SealedHeader) -> u64 {
        // genesis has nothing to check against
        self.depth.min(header.number())
    }

    fn verify(
        &self,
        _chain: &dyn HeaderReader,
        header: &SealedHeader,
        parents: &[HeaderRef],
        _uncle: bool,
        _seal: bool,
    ) -> Result<(), RuleError> {
        let expected = self.ancestors_needed(header) as usize;
        if parents.len() != expected {
            return Err(RuleError::AncestorCount {
                expected,
                got: parents.len(),
            });
        }

        let mut child: &SealedHeader = header;
        for parent in parents {
            if child.parent_hash() != parent.hash() {
                return Err(RuleError::BrokenLink {
                    number: parent.number(),
                    expected: child.parent_hash(),
                });
            }
            if child.number() != parent.number() + 1 {
                return Err(RuleError::NonSequential {
                    number: child.number(),
                    parent: parent.number(),
                });
            }
            child = &**parent;
        }

        if let Some(parent) = parents.first() {
            self.check_family(header, parent)?;
        }
        trace!(number = header.number(), hash = %header.hash(), "family rules passed");
        Ok(())
    }
}

impl FamilyRules {
    fn check_family(&self, header: &BlockHeader, parent: &BlockHeader) -> Result<(), RuleError> {
        if header.timestamp <= parent.timestamp {
            return Err(RuleError::Timestamp {
                timestamp: header.timestamp,
                parent: parent.timestamp,
            });
        }

        let drift = header.gas_limit.abs_diff(parent.gas_limit);
        if drift >= parent.gas_limit / GAS_LIMIT_BOUND_DIVISOR || header.gas_limit < MIN_GAS_LIMIT {
            return Err(RuleError::GasLimit {
                gas_limit: header.gas_limit,
                parent: parent.gas_limit,
            });
        }

        if header.gas_used > header.gas_limit {
            return Err(RuleError::GasUsed {
                used: header.gas_used,
                limit: header.gas_limit,
            });
        }

        if header.extra_data.len() > MAX_EXTRA_DATA {
            return Err(RuleError::ExtraData {
                len: header.extra_data.len(),
                max: MAX_EXTRA_DATA,
            });
        }

        validate_difficulty(&self.schedule, header, parent)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::difficulty::expected_difficulty;
    use alloy_primitives::U256;
    use chain::MemoryCache;

    const START: u64 = 6_000_000;

    fn chain_of(len: usize) -> Vec<HeaderRef> {
        let schedule = ForkSchedule::default();
        let mut out: Vec<HeaderRef> = Vec::with_capacity(len);
        let mut parent = BlockHeader {
            uncle_hash: chain::empty_uncle_hash(),
            difficulty: U256::from(1_000_000u64),
            number: START,
            gas_limit: 5_000_000,
            timestamp: 1_600_000_000,
            ..Default::default()
        };
        out.push(SealedHeader::shared(parent.clone()));
        for _ in 1..len {
            let timestamp = parent.timestamp + 14;
            let child = BlockHeader {
                parent_hash: parent.hash(),
                difficulty: expected_difficulty(&schedule, &parent, timestamp),
                number: parent.number + 1,
                timestamp,
                ..parent.clone()
            };
            out.push(SealedHeader::shared(child.clone()));
            parent = child;
        }
        out
    }

    fn nearest_first(headers: &[HeaderRef]) -> Vec<HeaderRef> {
        headers.iter().rev().cloned().collect()
    }

    #[test]
    fn accepts_well_formed_child() {
        let headers = chain_of(2);
        let rules = FamilyRules::default();
        let cache = MemoryCache::new();
        assert_eq!(rules.ancestors_needed(&headers[1]), 1);
        assert!(rules
            .verify(&cache, &headers[1], &headers[..1], false, true)
            .is_ok());
    }

    #[test]
    fn deeper_rules_check_every_link() {
        let headers = chain_of(4);
        let rules = FamilyRules::new(ForkSchedule::default(), 3);
        let cache = MemoryCache::new();
        let parents = nearest_first(&headers[..3]);
        assert!(rules.verify(&cache, &headers[3], &parents, false, false).is_ok());

        let mut shuffled = parents.clone();
        shuffled.swap(1, 2);
        assert!(matches!(
            rules.verify(&cache, &headers[3], &shuffled, false, false),
            Err(RuleError::BrokenLink { .. })
        ));
    }

    #[test]
    fn wrong_ancestor_count() {
        let headers = chain_of(2);
        let rules = FamilyRules::default();
        let cache = MemoryCache::new();
        assert_eq!(
            rules.verify(&cache, &headers[1], &[], false, false),
            Err(RuleError::AncestorCount {
                expected: 1,
                got: 0
            })
        );
    }

    #[test]
    fn genesis_needs_nothing() {
        let genesis = SealedHeader::seal(BlockHeader::default());
        let rules = FamilyRules::new(ForkSchedule::default(), 4);
        assert_eq!(rules.ancestors_needed(&genesis), 0);
        assert!(rules
            .verify(&MemoryCache::new(), &genesis, &[], false, false)
            .is_ok());
    }

    #[test]
    fn family_violations() {
        let headers = chain_of(1);
        let parent = headers[0].header().clone();
        let rules = FamilyRules::default();
        let schedule = ForkSchedule::default();

        let good = BlockHeader {
            parent_hash: parent.hash(),
            number: parent.number + 1,
            timestamp: parent.timestamp + 14,
            difficulty: expected_difficulty(&schedule, &parent, parent.timestamp + 14),
            ..parent.clone()
        };
        assert!(rules.check_family(&good, &parent).is_ok());

        let stale = BlockHeader {
            timestamp: parent.timestamp,
            ..good.clone()
        };
        assert!(matches!(
            rules.check_family(&stale, &parent),
            Err(RuleError::Timestamp { .. })
        ));

        let greedy = BlockHeader {
            gas_limit: parent.gas_limit * 2,
            ..good.clone()
        };
        assert!(matches!(
            rules.check_family(&greedy, &parent),
            Err(RuleError::GasLimit { .. })
        ));

        let overfull = BlockHeader {
            gas_used: good.gas_limit + 1,
            ..good.clone()
        };
        assert!(matches!(
            rules.check_family(&overfull, &parent),
            Err(RuleError::GasUsed { .. })
        ));

        let chatty = BlockHeader {
            extra_data: vec![0u8; 33].into(),
            ..good.clone()
        };
        assert!(matches!(
            rules.check_family(&chatty, &parent),
            Err(RuleError::ExtraData { len: 33, .. })
        ));

        let easy = BlockHeader {
            difficulty: good.difficulty - U256::from(1u64),
            ..good
        };
        assert!(matches!(
            rules.check_family(&easy, &parent),
            Err(RuleError::Difficulty(_))
        ));
    }
}
