//! Application layer: device sessions and the operations users run on them.
//!
//! - **`session`** – per-device state shared by every command (address,
//!   hardware id, subscription freshness, learning window start).
//! - **`allone`** – emit and learn operations of the AllOne IR blaster.
//! - **`command`** – text encodings of IR codes used on the command line
//!   and in configuration.

pub mod allone;
pub mod command;
pub mod session;
