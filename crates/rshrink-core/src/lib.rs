pub mod config;
pub mod duration;
pub mod types;

pub use config::BridgeConfig;
pub use duration::parse_duration;
pub use types::*;
