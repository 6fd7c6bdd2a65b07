//! # Error Types
//!
//! Domain-specific error types for ampere-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  ampere-core errors (this file)                                        │
//! │  ├── CoreError        - Domain rule violations                         │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  ampere-db errors (separate crate)                                     │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  ampere-sync errors (separate crate)                                   │
//! │  └── SyncError        - Handshake / push / pull / command failures     │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → SyncError → HTTP status envelope   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::command::CommandStatus;

// =============================================================================
// Core Error
// =============================================================================

/// Core domain errors.
///
/// These are raised by pure state transitions (command results) and by
/// ownership rules. The sync engine lifts them into its own taxonomy.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A write addressed an entity owned by a different platform.
    ///
    /// ## When This Occurs
    /// - A remote platform pushes an object the local platform owns
    /// - A command targets a location that the addressed platform does not own
    #[error("{entity} {id} is owned by platform {owner}, not {caller}")]
    OwnershipViolation {
        entity: String,
        id: String,
        owner: String,
        caller: String,
    },

    /// Command is not in a state that allows the requested transition.
    ///
    /// ## When This Occurs
    /// - Setting a result on a command that already reached a terminal status
    /// - Cancelling a reservation twice
    #[error("Command {command_id} is {status}, cannot apply result")]
    InvalidCommandStatus {
        command_id: String,
        status: CommandStatus,
    },

    /// The platform that issued a command tried to answer it.
    #[error("Command {command_id} cannot be answered by its issuing platform {platform_id}")]
    SelfResponse {
        command_id: String,
        platform_id: String,
    },

    /// A version string could not be normalized.
    #[error("Unparseable protocol version: {0}")]
    InvalidVersion(String),

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before any persistence or network step runs.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value has the wrong length.
    #[error("{field} must be exactly {len} characters")]
    WrongLength { field: String, len: usize },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Invalid format (e.g., invalid URL, invalid token).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;
