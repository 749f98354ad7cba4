pub mod difficulty;
pub mod engine;
pub mod rules;
pub mod schedule;

pub use engine::{Engine, RuleError};
pub use rules::FamilyRules;
pub use schedule::ForkSchedule;
