//! Infrastructure layer for the remote client.
//!
//! Contains OS-facing adapters: the UDP endpoint with its per-peer queues,
//! the retrying request/response engine, and file-system configuration.
//!
//! **Dependency rule**: this layer depends only on `orvibo_core`.  The
//! `application` layer builds device operations on top of it.

pub mod network;
pub mod storage;
