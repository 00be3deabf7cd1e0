//! Inter-rank communication

pub mod communication;

pub use communication::{InProcessTransport, TransferMessage, Transport};
