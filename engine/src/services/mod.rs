//! Infrastructure Services
//!
//! - **client**: XRPC transport trait and its reqwest implementation
//! - **plc**: local construction and signing of PLC operations
//! - **config**: configuration and global settings
//! - **errors**: error types shared by the engine

pub mod client;
pub mod config;
pub mod errors;
pub mod plc;
