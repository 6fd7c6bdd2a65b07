//! # Response Envelope
//!
//! Every protocol response body is wrapped in the same envelope, whether it
//! carries data or an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Protocol-level status codes carried in the envelope.
pub mod status {
    pub const SUCCESS: u32 = 1000;
    pub const CLIENT_ERROR: u32 = 2000;
    pub const INVALID_PARAMETERS: u32 = 2001;
    pub const NOT_ENOUGH_INFORMATION: u32 = 2002;
    pub const UNKNOWN_LOCATION: u32 = 2003;
    pub const UNKNOWN_TOKEN: u32 = 2004;
    pub const SERVER_ERROR: u32 = 3000;
    pub const UNABLE_TO_USE_CLIENT_API: u32 = 3001;
    pub const UNSUPPORTED_VERSION: u32 = 3002;
    pub const NO_MATCHING_ENDPOINTS: u32 = 3003;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    pub status_code: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl<T> Envelope<T> {
    pub fn success(data: T) -> Self {
        Envelope {
            data: Some(data),
            status_code: status::SUCCESS,
            status_message: Some("Success".to_string()),
            timestamp: Utc::now(),
        }
    }

    pub fn error(status_code: u32, message: impl Into<String>) -> Self {
        Envelope {
            data: None,
            status_code,
            status_message: Some(message.into()),
            timestamp: Utc::now(),
        }
    }

    /// 1xxx codes mean the request was handled.
    pub fn is_success(&self) -> bool {
        (1000..2000).contains(&self.status_code)
    }

    pub fn into_data(self) -> Option<T> {
        self.data
    }
}
