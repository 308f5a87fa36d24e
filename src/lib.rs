//! Supervised, rate-limited scraper for the NIST Chemistry WebBook.
//!
//! `process` works through the species manifest one item at a time, fetching MOL
//! structures and JCAMP-DX spectra under a strict request quota and checkpointing
//! every finished item. `supervisor` runs that as a child process and restarts it
//! on failure.

pub mod checkpoint;
pub mod cli;
pub mod config;
mod error;
pub mod limiter;
mod macros;
pub mod manifest;
mod parse;
pub mod process;
pub mod request;
pub mod supervisor;

pub use error::{Error, Result};
