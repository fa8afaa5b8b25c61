//! Adaptive routing policy: request characterization, strategy scoring and
//! the resulting decision. Selection state (metrics, locks) lives in the
//! application layer's router service.

pub mod characteristics;
pub mod decision;
pub mod strategy;

pub use characteristics::{Level, RequestCharacteristics, RequestType, characterize, estimate_tokens};
pub use decision::RoutingDecision;
pub use strategy::{Candidate, RoutingStrategy, adaptive_weights, rank, score};
