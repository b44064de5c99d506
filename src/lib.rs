//! STRIKE: edge-driven trading engine for hourly binary settlement contracts
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod platforms;
pub mod data;
pub mod strategy;
pub mod engine;
pub mod storage;
