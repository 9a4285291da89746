pub mod configs;
pub mod connection;
pub mod error;
pub mod history;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod server;

#[cfg(test)]
mod testing;

pub use registry::{ConnectionRegistry, Outbound, SendOutcome};
pub use relay::{spawn_relay, RelayConfig, RelayExit};
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
