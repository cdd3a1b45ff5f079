#![doc = include_str!("../README.md")]

#[cfg(not(target_os = "linux"))]
compile_error!("this registry only supports Linux");

pub mod block;
pub mod cleanup;
pub mod config;
pub mod config_monitor;
pub mod device;
pub mod drive;
pub mod error;
pub mod housekeeping;
pub(crate) mod interface;
pub mod logging;
pub mod manager;
pub mod mdraid;
pub mod registry;

pub use error::{Error, Result};
pub use registry::Registry;
