pub mod schema;

pub use schema::{AgentConfig, Config, GatewayConfig, LogConfig};
