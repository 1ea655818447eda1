pub mod aop;
pub mod components;
pub mod config;
pub mod engine;
pub mod metrics;
pub mod store;
pub mod types;

pub use config::EngineConfig;
pub use engine::rule::{DynRuleEngine, RuleEngineTrait};
pub use engine::{
    BalanceReport, GraphValidator, NodeCatalog, NodeHandler, RuleEngine, Scenario,
    SimulationSettings, ValidationResult,
};
pub use store::{MemoryRepository, RuleRepository};
pub use types::*;
