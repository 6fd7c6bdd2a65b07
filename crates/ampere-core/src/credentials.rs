//! # Credentials Payloads
//!
//! The payload exchanged in both directions of the credentials handshake.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::platform::Role;

/// Business details attached to a party.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessDetails {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,

    /// Logo and any other fields, carried through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One role a party plays, as sent in a credentials payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialsRole {
    pub role: Role,
    pub business_details: BusinessDetails,
    pub party_id: String,
    pub country_code: String,
}

/// Credentials handshake payload.
///
/// `token` is the token the *receiver* of this payload must use when calling
/// back, `url` is the sender's version-list endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    pub token: String,
    pub url: String,
    #[serde(default)]
    pub roles: Vec<CredentialsRole>,
}
