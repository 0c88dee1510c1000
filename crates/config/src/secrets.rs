// CRM token lookup
//
// The token is looked up in:
// 1. System keychain (preferred)
// 2. Environment variable BITRIX_TOKEN (fallback for CI/headless)
//
// It is NEVER stored in settings.json and never shipped as a built-in default.

use std::env;

/// Service name for keychain storage
const KEYCHAIN_SERVICE: &str = "dealboard";

/// Keychain account holding the CRM token
const KEYCHAIN_ACCOUNT: &str = "crm/token";

pub const TOKEN_ENV: &str = "BITRIX_TOKEN";

/// Source of the CRM token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    /// Token retrieved from system keychain
    Keychain,
    /// Token retrieved from environment variable
    Environment,
    /// No token found
    None,
}

impl TokenSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenSource::Keychain => "keychain",
            TokenSource::Environment => "environment",
            TokenSource::None => "none",
        }
    }
}

/// Result of token lookup
#[derive(Clone)]
pub struct TokenLookup {
    pub token: Option<String>,
    pub source: TokenSource,
}

impl std::fmt::Debug for TokenLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenLookup")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("source", &self.source)
            .finish()
    }
}

/// The keychain token, if keychain support is built in and one is stored.
pub fn keychain_token() -> Option<String> {
    #[cfg(feature = "keychain")]
    {
        if let Ok(entry) = keyring::Entry::new(KEYCHAIN_SERVICE, KEYCHAIN_ACCOUNT) {
            if let Ok(token) = entry.get_password() {
                if !token.is_empty() {
                    return Some(token);
                }
            }
        }
    }
    None
}

/// Pick the token from an already-read keychain value and an env lookup.
pub fn resolve_token(
    keychain: Option<String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> TokenLookup {
    if let Some(token) = keychain {
        return TokenLookup {
            token: Some(token),
            source: TokenSource::Keychain,
        };
    }

    if let Some(token) = env_lookup(TOKEN_ENV).filter(|t| !t.trim().is_empty()) {
        return TokenLookup {
            token: Some(token.trim().to_string()),
            source: TokenSource::Environment,
        };
    }

    TokenLookup {
        token: None,
        source: TokenSource::None,
    }
}

/// Get the CRM token
///
/// Checks in order:
/// 1. System keychain
/// 2. Environment variable (BITRIX_TOKEN)
pub fn get_token() -> TokenLookup {
    resolve_token(keychain_token(), |name| env::var(name).ok())
}

/// Store the CRM token in the system keychain
#[cfg(feature = "keychain")]
pub fn set_token(token: &str) -> Result<(), String> {
    let entry = keyring::Entry::new(KEYCHAIN_SERVICE, KEYCHAIN_ACCOUNT)
        .map_err(|e| format!("Failed to create keychain entry: {}", e))?;

    entry
        .set_password(token)
        .map_err(|e| format!("Failed to store token in keychain: {}", e))
}

#[cfg(not(feature = "keychain"))]
pub fn set_token(_token: &str) -> Result<(), String> {
    Err("Keychain support not enabled. Set the BITRIX_TOKEN environment variable instead.".to_string())
}

/// Delete the CRM token from the system keychain
#[cfg(feature = "keychain")]
pub fn delete_token() -> Result<(), String> {
    let entry = keyring::Entry::new(KEYCHAIN_SERVICE, KEYCHAIN_ACCOUNT)
        .map_err(|e| format!("Failed to access keychain entry: {}", e))?;

    entry
        .delete_credential()
        .map_err(|e| format!("Failed to delete token from keychain: {}", e))
}

#[cfg(not(feature = "keychain"))]
pub fn delete_token() -> Result<(), String> {
    Err("Keychain support not enabled.".to_string())
}
