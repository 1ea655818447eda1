mod executor;
mod instance;
mod modifier;
mod node;
pub mod rule;
mod simulator;
mod validator;
mod version;

pub use executor::*;
pub use instance::*;
pub use modifier::*;
pub use node::*;
pub use rule::RuleEngine;
pub use simulator::*;
pub use validator::*;
pub use version::*;
