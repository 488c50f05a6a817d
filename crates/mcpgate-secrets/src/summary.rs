//! Secret metadata exposed to operators.
//!
//! Summaries are derived from key names alone; plaintext values never leave
//! the store.

use serde::{Deserialize, Serialize};

/// Placeholder shown in place of every value.
const MASK: &str = "********";

/// Inferred kind of a secret, from its variable name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretValueType {
    ApiKey,
    Token,
    Password,
    Secret,
    Url,
    String,
}

/// Operator-facing description of one stored variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretSummary {
    pub name: String,
    pub masked: String,
    pub value_type: SecretValueType,
    /// Credentials are flagged required; informational values optional.
    pub required: bool,
}

impl SecretSummary {
    /// Build a summary from a variable name.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        let value_type = infer_type(name);
        Self {
            name: name.to_string(),
            masked: MASK.to_string(),
            value_type,
            required: matches!(
                value_type,
                SecretValueType::ApiKey
                    | SecretValueType::Token
                    | SecretValueType::Password
                    | SecretValueType::Secret
            ),
        }
    }
}

fn infer_type(name: &str) -> SecretValueType {
    let lower = name.to_ascii_lowercase();
    if lower.contains("api_key") || lower.contains("apikey") || lower.ends_with("_key") {
        SecretValueType::ApiKey
    } else if lower.contains("token") {
        SecretValueType::Token
    } else if lower.contains("password") || lower.contains("passwd") {
        SecretValueType::Password
    } else if lower.contains("secret") {
        SecretValueType::Secret
    } else if lower.contains("url") || lower.contains("uri") || lower.contains("endpoint") {
        SecretValueType::Url
    } else {
        SecretValueType::String
    }
}
