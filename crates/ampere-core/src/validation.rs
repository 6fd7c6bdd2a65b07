//! # Validation Module
//!
//! Input validation for identities, URLs and handshake payloads.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: HTTP extractors (axum)                                       │
//! │  ├── JSON shape (deserialization)                                      │
//! │  └── Authorization header present                                      │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE                                                  │
//! │  ├── country code / party id / object id format                        │
//! │  └── routing headers, credentials payload                              │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Sync engine                                                  │
//! │  └── ownership and state rules                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::credentials::Credentials;
use crate::error::ValidationError;
use crate::routing::RoutingContext;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Maximum length of an object id.
pub const MAX_OBJECT_ID_LEN: usize = 36;

// =============================================================================
// Identity Validators
// =============================================================================

/// Validates an ISO 3166 alpha-2 country code.
///
/// ## Example
/// ```rust
/// use ampere_core::validation::validate_country_code;
///
/// assert!(validate_country_code("NL").is_ok());
/// assert!(validate_country_code("NLD").is_err());
/// assert!(validate_country_code("nl").is_err());
/// ```
pub fn validate_country_code(code: &str) -> ValidationResult<()> {
    if code.is_empty() {
        return Err(ValidationError::Required {
            field: "country_code".to_string(),
        });
    }
    if code.len() != 2 {
        return Err(ValidationError::WrongLength {
            field: "country_code".to_string(),
            len: 2,
        });
    }
    if !code.chars().all(|c| c.is_ascii_uppercase()) {
        return Err(ValidationError::InvalidFormat {
            field: "country_code".to_string(),
            reason: "must be two uppercase letters".to_string(),
        });
    }
    Ok(())
}

/// Validates a three character party id.
pub fn validate_party_id(party_id: &str) -> ValidationResult<()> {
    if party_id.is_empty() {
        return Err(ValidationError::Required {
            field: "party_id".to_string(),
        });
    }
    if party_id.len() != 3 {
        return Err(ValidationError::WrongLength {
            field: "party_id".to_string(),
            len: 3,
        });
    }
    if !party_id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ValidationError::InvalidFormat {
            field: "party_id".to_string(),
            reason: "must be alphanumeric".to_string(),
        });
    }
    Ok(())
}

pub fn validate_object_id(id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "id".to_string(),
        });
    }
    if id.len() > MAX_OBJECT_ID_LEN {
        return Err(ValidationError::TooLong {
            field: "id".to_string(),
            max: MAX_OBJECT_ID_LEN,
        });
    }
    Ok(())
}

/// Validates an absolute http(s) URL.
pub fn validate_url(field: &str, url: &str) -> ValidationResult<()> {
    if url.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: "must start with http:// or https://".to_string(),
        });
    }
    Ok(())
}

// =============================================================================
// Message Validators
// =============================================================================

/// Requires both party headers on a routed message.
pub fn validate_routing(routing: &RoutingContext) -> ValidationResult<()> {
    let from = routing.from_party.as_ref().ok_or_else(|| ValidationError::Required {
        field: "OCPI-from-party-id".to_string(),
    })?;
    let to = routing.to_party.as_ref().ok_or_else(|| ValidationError::Required {
        field: "OCPI-to-party-id".to_string(),
    })?;

    for party in [from, to] {
        validate_country_code(&party.country_code)?;
        validate_party_id(&party.party_id)?;
    }
    Ok(())
}

/// Validates an incoming credentials payload.
pub fn validate_credentials(credentials: &Credentials) -> ValidationResult<()> {
    if credentials.token.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "token".to_string(),
        });
    }
    validate_url("url", &credentials.url)?;
    if credentials.roles.is_empty() {
        return Err(ValidationError::Required {
            field: "roles".to_string(),
        });
    }
    for role in &credentials.roles {
        validate_country_code(&role.country_code)?;
        validate_party_id(&role.party_id)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{BusinessDetails, CredentialsRole};
    use crate::party::PartyKey;
    use crate::platform::Role;

    fn credentials() -> Credentials {
        Credentials {
            token: "tok".to_string(),
            url: "https://remote.example/versions".to_string(),
            roles: vec![CredentialsRole {
                role: Role::Cpo,
                business_details: BusinessDetails {
                    name: "Remote".to_string(),
                    website: None,
                    extra: Default::default(),
                },
                party_id: "REM".to_string(),
                country_code: "DE".to_string(),
            }],
        }
    }

    #[test]
    fn test_party_id_rules() {
        assert!(validate_party_id("ABC").is_ok());
        assert!(validate_party_id("").is_err());
        assert!(validate_party_id("AB").is_err());
        assert!(validate_party_id("A-C").is_err());
    }

    #[test]
    fn test_object_id_length() {
        assert!(validate_object_id("LOC-1").is_ok());
        assert!(validate_object_id(&"X".repeat(37)).is_err());
    }

    #[test]
    fn test_routing_requires_both_parties() {
        let mut ctx = RoutingContext::between(Some(PartyKey::new("NL", "AAA")), None);
        assert!(validate_routing(&ctx).is_err());
        ctx.to_party = Some(PartyKey::new("DE", "BBB"));
        assert!(validate_routing(&ctx).is_ok());
        ctx.to_party = Some(PartyKey::new("de", "BBB"));
        assert!(validate_routing(&ctx).is_err());
    }

    #[test]
    fn test_credentials_validation() {
        assert!(validate_credentials(&credentials()).is_ok());

        let mut creds = credentials();
        creds.url = "ftp://remote".to_string();
        assert!(validate_credentials(&creds).is_err());

        let mut creds = credentials();
        creds.roles.clear();
        assert!(validate_credentials(&creds).is_err());
    }
}
