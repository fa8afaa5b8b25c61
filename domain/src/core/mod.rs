//! Core domain concepts shared across all subdomains.
//!
//! - [`error::ErrorKind`]: the failure taxonomy surfaced to clients
//! - [`error::DomainError`]: domain-level errors

pub mod error;
