pub mod config;
pub mod quantity;
pub mod types;

pub use config::{AgentConfig, ConfigError, ConfigResult};
pub use quantity::{Quantity, QuantityError};
pub use types::*;
