pub mod schema;

pub use schema::{Config, GatewayConfig, ProtocolConfig, SessionsConfig, StoreConfig};
