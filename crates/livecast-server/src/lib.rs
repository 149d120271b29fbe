pub mod client;
pub mod config;
pub mod handler;
pub mod server;

pub use config::{load_config, ConfigError, ServerConfig};
pub use handler::ConnectionHandler;
pub use server::{build_router, start, AppState, ServerHandle};
