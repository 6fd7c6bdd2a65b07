//! # Routing Context
//!
//! Sender and recipient identity of a protocol message, threaded explicitly
//! through every push, pull and command call instead of living in ambient
//! request state.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::party::PartyKey;

/// Header names carrying the routing context.
pub mod headers {
    pub const FROM_COUNTRY_CODE: &str = "OCPI-from-country-code";
    pub const FROM_PARTY_ID: &str = "OCPI-from-party-id";
    pub const TO_COUNTRY_CODE: &str = "OCPI-to-country-code";
    pub const TO_PARTY_ID: &str = "OCPI-to-party-id";
    pub const REQUEST_ID: &str = "X-Request-ID";
    pub const CORRELATION_ID: &str = "X-Correlation-ID";
    pub const TOTAL_COUNT: &str = "X-Total-Count";
    pub const LIMIT: &str = "X-Limit";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingContext {
    pub from_party: Option<PartyKey>,
    pub to_party: Option<PartyKey>,
    pub correlation_id: String,
}

impl RoutingContext {
    /// Starts a new conversation between two parties.
    pub fn between(from_party: Option<PartyKey>, to_party: Option<PartyKey>) -> Self {
        RoutingContext {
            from_party,
            to_party,
            correlation_id: Uuid::new_v4().to_string(),
        }
    }

    /// Context without party headers, e.g. for handshake calls.
    pub fn anonymous() -> Self {
        Self::between(None, None)
    }

    /// Keeps the correlation id and swaps the direction, for answering a message.
    pub fn reply(&self) -> Self {
        RoutingContext {
            from_party: self.to_party.clone(),
            to_party: self.from_party.clone(),
            correlation_id: self.correlation_id.clone(),
        }
    }

    /// Both party headers are present.
    pub fn is_complete(&self) -> bool {
        self.from_party.is_some() && self.to_party.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_swaps_parties() {
        let ctx = RoutingContext::between(Some(PartyKey::new("NL", "AAA")), Some(PartyKey::new("DE", "BBB")));
        let reply = ctx.reply();
        assert_eq!(reply.from_party, Some(PartyKey::new("DE", "BBB")));
        assert_eq!(reply.to_party, Some(PartyKey::new("NL", "AAA")));
        assert_eq!(reply.correlation_id, ctx.correlation_id);
        assert!(reply.is_complete());
        assert!(!RoutingContext::anonymous().is_complete());
    }
}
