//! services/api/src/lib.rs
//!
//! The lesson hub service: adapters for the core ports, configuration and the
//! web layer. The binaries in `src/bin` wire these together.

pub mod adapters;
pub mod config;
pub mod error;
pub mod web;
