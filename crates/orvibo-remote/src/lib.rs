//! orvibo-remote library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.

pub mod application;
pub mod infrastructure;

pub use application::allone::{AllOne, LearnState};
pub use application::session::DeviceSession;
pub use infrastructure::network::connection_manager::{ConnectionManager, TransportConfig};
pub use infrastructure::network::discovery::DiscoveryOptions;
