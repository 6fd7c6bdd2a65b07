//! # Sync Error Types
//!
//! Error types for handshake, push, pull and command operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Client         │  │  Negotiation    │  │  Platform               │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  Ownership      │  │  NoCompatible   │  │  PlatformUnknown        │ │
//! │  │  NotFound       │  │    Version      │  │  PlatformNotConnected   │ │
//! │  │  StateViolation │  │  EndpointNot    │  │                         │ │
//! │  │  InvalidToken   │  │    Supported    │  │                         │ │
//! │  │  Validation     │  │                 │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Transport      │  │  Configuration  │  │  Internal               │ │
//! │  │  (transient)    │  │                 │  │                         │ │
//! │  │  Remote         │  │  InvalidConfig  │  │  Database               │ │
//! │  │  Http           │  │  ConfigLoad     │  │  Serialization          │ │
//! │  │  Timeout        │  │  ConfigSave     │  │  ShuttingDown           │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use ampere_core::{CoreError, ModuleId, ValidationError};

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all handshake, push, pull and command failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Client Errors (rejected, never auto-corrected)
    // =========================================================================
    /// A platform addressed an entity or command it does not own.
    #[error("{entity} {id} is owned by platform {owner}, not {caller}")]
    OwnershipViolation {
        entity: String,
        id: String,
        owner: String,
        caller: String,
    },

    /// A referenced object is absent.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// The object is not in the state the operation requires.
    #[error("Invalid state: {0}")]
    StateViolation(String),

    /// The presented token does not belong to any usable platform.
    #[error("Invalid or unknown token")]
    InvalidToken,

    /// Input failed validation.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    // =========================================================================
    // Negotiation Errors
    // =========================================================================
    /// No protocol version is supported by both sides.
    #[error("No compatible version with platform {platform_id} (offered: {offered:?})")]
    NoCompatibleVersion {
        platform_id: String,
        offered: Vec<String>,
    },

    /// The remote does not advertise the endpoint an operation needs.
    #[error("Platform {platform_id} does not support {module}")]
    EndpointNotSupported { platform_id: String, module: ModuleId },

    // =========================================================================
    // Platform Errors
    // =========================================================================
    /// Platform is not in the directory.
    #[error("Platform unknown: {0}")]
    PlatformUnknown(String),

    /// Platform exists but is not `CONNECTED`.
    #[error("Platform not connected: {0}")]
    PlatformNotConnected(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// The remote answered with a non-success envelope.
    #[error("Remote error {status_code}: {message}")]
    Remote { status_code: u32, message: String },

    /// HTTP request failed or returned a non-2xx status.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Request timed out.
    #[error("Request timed out")]
    Timeout,

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid hub configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// Encoding or decoding a body failed.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// The hub is shutting down.
    #[error("Hub is shutting down")]
    ShuttingDown,
}

impl SyncError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        SyncError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn ownership(
        entity: impl Into<String>,
        id: impl Into<String>,
        owner: impl Into<String>,
        caller: impl Into<String>,
    ) -> Self {
        SyncError::OwnershipViolation {
            entity: entity.into(),
            id: id.into(),
            owner: owner.into(),
            caller: caller.into(),
        }
    }
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<CoreError> for SyncError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::OwnershipViolation {
                entity,
                id,
                owner,
                caller,
            } => SyncError::OwnershipViolation {
                entity,
                id,
                owner,
                caller,
            },
            CoreError::SelfResponse {
                command_id,
                platform_id,
            } => SyncError::OwnershipViolation {
                entity: "Command".into(),
                id: command_id,
                owner: platform_id.clone(),
                caller: platform_id,
            },
            err @ CoreError::InvalidCommandStatus { .. } => SyncError::StateViolation(err.to_string()),
            CoreError::InvalidVersion(v) => SyncError::StateViolation(format!("invalid version {}", v)),
            CoreError::Validation(v) => SyncError::Validation(v),
        }
    }
}

impl From<ampere_db::DbError> for SyncError {
    fn from(err: ampere_db::DbError) -> Self {
        match err {
            ampere_db::DbError::NotFound { entity, id } => SyncError::NotFound { entity, id },
            other => SyncError::Database(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SyncError::Timeout
        } else if err.is_decode() {
            SyncError::Serialization(err.to_string())
        } else {
            SyncError::Http(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidConfig(format!("invalid URL: {}", err))
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// Returns true if the operation may succeed when retried.
    ///
    /// ## Retryable Errors
    /// - HTTP failures and timeouts
    /// - Remote server errors (3xxx status codes)
    ///
    /// ## Non-Retryable Errors
    /// - Ownership, state and validation errors
    /// - Version negotiation failures
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Http(_) | SyncError::Timeout => true,
            SyncError::Remote { status_code, .. } => *status_code >= 3000,
            _ => false,
        }
    }

    /// Returns true if the error means no connection can be established.
    pub fn is_negotiation_error(&self) -> bool {
        matches!(
            self,
            SyncError::NoCompatibleVersion { .. } | SyncError::EndpointNotSupported { .. }
        )
    }

    /// Returns true if the caller sent something the hub rejects.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            SyncError::OwnershipViolation { .. }
                | SyncError::NotFound { .. }
                | SyncError::StateViolation(_)
                | SyncError::InvalidToken
                | SyncError::Validation(_)
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_) | SyncError::ConfigLoadFailed(_) | SyncError::ConfigSaveFailed(_)
        )
    }
}
