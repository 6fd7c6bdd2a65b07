//! # Parties
//!
//! A party is a counterparty identity (country code + party id) hosted by some
//! platform. Parties are exchanged during the credentials handshake and kept up
//! to date through client-info propagation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::credentials::{BusinessDetails, CredentialsRole};
use crate::platform::{ConnectionStatus, Role};

/// Platform-independent identity of a party.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartyKey {
    pub country_code: String,
    pub party_id: String,
}

impl PartyKey {
    pub fn new(country_code: impl Into<String>, party_id: impl Into<String>) -> Self {
        PartyKey {
            country_code: country_code.into(),
            party_id: party_id.into(),
        }
    }
}

impl fmt::Display for PartyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}*{}", self.country_code, self.party_id)
    }
}

/// A party hosted by a platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Party {
    pub country_code: String,
    pub party_id: String,

    /// Platform that hosts this party.
    pub platform_id: String,

    #[serde(default)]
    pub roles: Vec<Role>,

    #[serde(default)]
    pub business_details: Option<BusinessDetails>,

    /// Last status reported through client info, if any.
    #[serde(default)]
    pub status: Option<ConnectionStatus>,

    pub last_updated: DateTime<Utc>,
}

impl Party {
    /// Minimal party created when an entity references an unknown identity.
    pub fn provisioned(key: &PartyKey, platform_id: &str, now: DateTime<Utc>) -> Self {
        Party {
            country_code: key.country_code.clone(),
            party_id: key.party_id.clone(),
            platform_id: platform_id.to_string(),
            roles: Vec::new(),
            business_details: None,
            status: None,
            last_updated: now,
        }
    }

    /// Builds a party from one role entry of a credentials payload.
    pub fn from_credentials_role(role: &CredentialsRole, platform_id: &str, now: DateTime<Utc>) -> Self {
        Party {
            country_code: role.country_code.clone(),
            party_id: role.party_id.clone(),
            platform_id: platform_id.to_string(),
            roles: vec![role.role],
            business_details: Some(role.business_details.clone()),
            status: Some(ConnectionStatus::Connected),
            last_updated: now,
        }
    }

    pub fn key(&self) -> PartyKey {
        PartyKey::new(&self.country_code, &self.party_id)
    }

    /// Folds another description of the same party into this one.
    ///
    /// Roles are unioned; business details and status are replaced when the
    /// incoming copy carries them.
    pub fn absorb(&mut self, other: &Party) {
        for role in &other.roles {
            if !self.roles.contains(role) {
                self.roles.push(*role);
            }
        }
        self.roles.sort();
        if other.business_details.is_some() {
            self.business_details = other.business_details.clone();
        }
        if other.status.is_some() {
            self.status = other.status;
        }
        self.platform_id = other.platform_id.clone();
        if other.last_updated > self.last_updated {
            self.last_updated = other.last_updated;
        }
    }

    /// Expands this party into one credentials role entry per role.
    pub fn credentials_roles(&self) -> Vec<CredentialsRole> {
        let details = self.business_details.clone().unwrap_or_else(|| BusinessDetails {
            name: self.party_id.clone(),
            website: None,
            extra: Default::default(),
        });
        self.roles
            .iter()
            .map(|role| CredentialsRole {
                role: *role,
                business_details: details.clone(),
                party_id: self.party_id.clone(),
                country_code: self.country_code.clone(),
            })
            .collect()
    }
}

/// Groups credentials roles by party, merging roles of the same identity.
pub fn parties_from_roles(roles: &[CredentialsRole], platform_id: &str, now: DateTime<Utc>) -> Vec<Party> {
    let mut parties: Vec<Party> = Vec::new();
    for role in roles {
        let incoming = Party::from_credentials_role(role, platform_id, now);
        match parties.iter_mut().find(|p| p.key() == incoming.key()) {
            Some(existing) => existing.absorb(&incoming),
            None => parties.push(incoming),
        }
    }
    parties
}
