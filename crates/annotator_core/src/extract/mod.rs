//! Extraction functions and the workers that run them.
//!
//! # Responsibility
//! - Define the caller-supplied extraction function contract.
//! - Turn one candidate into key-creation requests plus one sparse row.
//!
//! # Invariants
//! - Workers never touch the store; everything they produce goes through the
//!   runner's output channel.
//! - A failed candidate yields exactly one failure acknowledgement and no
//!   other message.

pub mod function;
pub(crate) mod worker;
