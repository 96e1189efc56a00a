//! # orvibo-core
//!
//! Wire format and identity types for the Orvibo AllOne UDP control protocol.
//!
//! This crate has no sockets and no async runtime.  It defines:
//!
//! - **`protocol`** – the 6-byte common header, the packet builders for
//!   discovery, subscribe, emit and learn, and the reply predicates used by
//!   the exchange classifiers in `orvibo-remote`.
//! - **`domain`** – [`HardwareId`], [`DeviceKind`], [`DeviceTime`] and the
//!   [`DeviceDescriptor`] produced by discovery.

pub mod domain;
pub mod protocol;

pub use domain::device::{DeviceDescriptor, DeviceKind, DeviceTime};
pub use domain::hardware_id::HardwareId;
pub use protocol::codec::ProtocolError;
pub use protocol::messages::CommandId;
