//! Exchange credential material.
//!
//! A user's credential blob comes in two shapes:
//! - Per exchange: `{"binance": {"api_key": "..", "api_secret": ".."}, ...}`
//! - Legacy single pair: `{"api_key": "..", "api_secret": ".."}`, used for
//!   every exchange
//!
//! The blob may also arrive as a JSON string holding either shape.
//! A malformed per-exchange entry only disables that exchange.
//! Secrets are wiped from memory on drop.

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use zeroize::Zeroizing;

use crate::error::{OffsetError, OffsetResult};

/// API credentials for one exchange.
#[derive(Clone)]
pub struct ExchangeCredentials {
    pub api_key: String,
    api_secret: Zeroizing<String>,
    passphrase: Option<Zeroizing<String>>,
    pub testnet: bool,
}

impl ExchangeCredentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: Zeroizing::new(api_secret.into()),
            passphrase: None,
            testnet: false,
        }
    }

    #[must_use]
    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(Zeroizing::new(passphrase.into()));
        self
    }

    pub fn api_secret(&self) -> &str {
        &self.api_secret
    }

    pub fn passphrase(&self) -> Option<&str> {
        self.passphrase.as_ref().map(|p| p.as_str())
    }
}

impl fmt::Debug for ExchangeCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeCredentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .field("testnet", &self.testnet)
            .finish()
    }
}

#[derive(Deserialize)]
struct RawCredentials {
    api_key: String,
    api_secret: String,
    #[serde(default)]
    passphrase: Option<String>,
    #[serde(default)]
    testnet: bool,
}

impl From<RawCredentials> for ExchangeCredentials {
    fn from(raw: RawCredentials) -> Self {
        Self {
            api_key: raw.api_key,
            api_secret: Zeroizing::new(raw.api_secret),
            passphrase: raw.passphrase.map(Zeroizing::new),
            testnet: raw.testnet,
        }
    }
}

/// Parsed credential material of one user.
#[derive(Debug, Clone)]
pub enum CredentialMaterial {
    /// Credentials keyed by lowercase exchange name.
    PerExchange {
        credentials: HashMap<String, ExchangeCredentials>,
        /// Entries that failed to parse, with the parse error.
        malformed: HashMap<String, String>,
    },
    /// One credential pair for every exchange.
    Legacy(ExchangeCredentials),
}

impl CredentialMaterial {
    /// Parse a user's credential blob.
    pub fn parse(value: &Value) -> OffsetResult<Self> {
        match value {
            Value::String(inner) => {
                let nested: Value = serde_json::from_str(inner)?;
                if nested.is_string() {
                    return Err(OffsetError::MalformedCredentials(
                        "doubly encoded credential string".to_string(),
                    ));
                }
                Self::parse(&nested)
            }
            Value::Object(map) if map.contains_key("api_key") => {
                let raw: RawCredentials = serde_json::from_value(value.clone())?;
                Ok(Self::Legacy(raw.into()))
            }
            Value::Object(map) => {
                let mut credentials = HashMap::with_capacity(map.len());
                let mut malformed = HashMap::new();
                for (exchange, entry) in map {
                    let exchange = exchange.to_ascii_lowercase();
                    match serde_json::from_value::<RawCredentials>(entry.clone()) {
                        Ok(raw) => {
                            credentials.insert(exchange, raw.into());
                        }
                        Err(e) => {
                            malformed.insert(exchange, e.to_string());
                        }
                    }
                }
                if credentials.is_empty() {
                    return Err(OffsetError::MalformedCredentials(
                        "no usable exchange credentials".to_string(),
                    ));
                }
                Ok(Self::PerExchange {
                    credentials,
                    malformed,
                })
            }
            Value::Null => Err(OffsetError::MalformedCredentials(
                "no credential material".to_string(),
            )),
            other => Err(OffsetError::MalformedCredentials(format!(
                "unexpected credential type: {}",
                value_kind(other)
            ))),
        }
    }

    /// Credentials to use for `exchange`.
    pub fn for_exchange(&self, exchange: &str) -> OffsetResult<&ExchangeCredentials> {
        match self {
            Self::Legacy(creds) => Ok(creds),
            Self::PerExchange {
                credentials,
                malformed,
            } => {
                let key = exchange.to_ascii_lowercase();
                if let Some(creds) = credentials.get(&key) {
                    return Ok(creds);
                }
                match malformed.get(&key) {
                    Some(reason) => Err(OffsetError::MalformedCredentials(format!(
                        "{exchange}: {reason}"
                    ))),
                    None => Err(OffsetError::MissingCredentials(exchange.to_string())),
                }
            }
        }
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
