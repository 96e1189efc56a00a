//! Network infrastructure for the remote client.
//!
//! # Sub-modules
//!
//! - **`endpoint`** – One shared UDP socket with a background reader that
//!   demultiplexes inbound datagrams into bounded per-peer queues.
//!
//! - **`exchange`** – The send/classify/retry engine.  Every device operation
//!   is an exchange: send a packet (or not), then feed each inbound datagram
//!   to a classifier until it accepts one or the attempt budget runs out.
//!
//! - **`connection_manager`** – Owns the endpoint lifecycle: opens it on first
//!   use, tears it down after an unrecoverable socket error and reopens it on
//!   the next exchange.
//!
//! - **`discovery`** – Broadcasts the probe and collects one descriptor per
//!   replying device.

pub mod connection_manager;
pub mod discovery;
pub mod endpoint;
pub mod exchange;
