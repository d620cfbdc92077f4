//! Control surface
//!
//! This module provides the inbound command surface:
//! - JSON command parsing and dispatch to the module manager
//! - A stdio server that streams notifications as JSON lines

pub mod commands;
pub mod server;

pub use commands::{Command, CommandDispatcher};
pub use server::ControlServer;
