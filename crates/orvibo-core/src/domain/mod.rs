//! Device identity and classification.

pub mod device;
pub mod hardware_id;
