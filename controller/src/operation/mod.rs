//! # Operation Plumbing
//!
//! The pieces every controller operation is built from.
//!
//! ```text
//! guard.rs    — per-class single-flight gate with RAII tickets
//! context.rs  — immutable operation snapshots + staleness detector
//! outcome.rs  — settled outcomes and validation errors
//! ```

pub mod context;
pub mod guard;
pub mod outcome;

pub use context::{OperationContext, StalenessDetector};
pub use guard::{ConcurrencyGuard, GuardTicket, OperationClass};
pub use outcome::{OperationOutcome, ValidationError};
