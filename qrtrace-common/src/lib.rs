//! # QRTrace Common Library
//!
//! Shared code for the QRTrace services including:
//! - Error type and Result alias
//! - Configuration loading and root folder resolution
//! - Database initialization, schema, and shared record models
//! - Payload fingerprinting

pub mod config;
pub mod db;
pub mod error;
pub mod fingerprint;

pub use error::{Error, Result};
