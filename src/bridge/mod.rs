//! JSON-lines bridge between a host process and the match core

pub mod handler;
pub mod protocol;

pub use handler::{run_bridge, BridgeContext, BridgeError};
