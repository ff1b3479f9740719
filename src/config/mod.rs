//! Configuration module
//!
//! Handles loading the relay configuration file.

mod relay;

pub use relay::*;
