//! Verified provider identities.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::provider::{ClaimMapping, Provider};

/// Identity attributes asserted by a provider after verification.
///
/// Ephemeral: produced by the verifier or the userinfo round trip,
/// consumed by the user upsert, never persisted here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifiedIdentity {
    /// Provider-stable user id.
    pub subject: String,
    pub provider: Provider,
    pub email: Option<String>,
    pub email_verified: bool,
    pub name: Option<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub picture: Option<String>,
    /// Apple-only: the address is a private relay alias rather than
    /// the user's real mailbox.
    pub is_private_email: bool,
    /// Raw userinfo/claims payload, kept for diagnostics.
    pub raw_attributes: Value,
}

impl VerifiedIdentity {
    /// Extract an identity from a provider's userinfo payload using the
    /// provider's claim-mapping table.
    pub fn from_attributes(provider: Provider, attributes: Value) -> Self {
        let mapping = ClaimMapping::for_provider(provider);

        Self {
            subject: first_field(&attributes, mapping.subject_fields).unwrap_or_default(),
            provider,
            email: first_field(&attributes, mapping.email_fields),
            email_verified: attributes
                .get("email_verified")
                .map(flexible_bool)
                .unwrap_or(false),
            name: first_field(&attributes, mapping.name_fields),
            given_name: first_field(&attributes, mapping.given_name_fields),
            family_name: first_field(&attributes, mapping.family_name_fields),
            picture: first_field(&attributes, mapping.picture_fields),
            is_private_email: attributes
                .get("is_private_email")
                .map(flexible_bool)
                .unwrap_or(false),
            raw_attributes: attributes,
        }
    }

    /// Display name, falling back to joining the name parts.
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        let joined = format!(
            "{} {}",
            self.given_name.as_deref().unwrap_or(""),
            self.family_name.as_deref().unwrap_or("")
        );
        joined.trim().to_string()
    }
}

/// First matching field in the fallback chain, stringified.
fn first_field(attributes: &Value, fields: &[&str]) -> Option<String> {
    for field in fields {
        match attributes.get(*field) {
            Some(Value::String(s)) if !s.is_empty() => return Some(s.clone()),
            // GitHub returns numeric ids.
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

/// Providers encode booleans inconsistently: Apple sends the strings
/// "true"/"false", others send real booleans.
pub fn flexible_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s == "true",
        _ => false,
    }
}
