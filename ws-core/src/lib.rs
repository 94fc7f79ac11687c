//! Core building blocks shared by the workspace lifecycle crates.

pub mod command_stream;
pub mod error;

pub use error::{Result, WsError};
