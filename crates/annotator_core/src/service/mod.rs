//! Annotation run services.
//!
//! # Responsibility
//! - Orchestrate candidate loading, the extraction worker pool and the
//!   single-writer persistence loop into one `apply` use case.
//! - Keep callers decoupled from repository and threading details.

pub mod annotator;
pub mod cancel;
pub mod config;
