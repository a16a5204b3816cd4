//! Shared-secret header authorization.
//!
//! The decision is a pure function of the presented headers and the
//! configured [`Credential`]: header names compare case-insensitively,
//! values compare byte-for-byte.

use serde::Serialize;
use std::fmt;

/// The header name/value pair every request must present.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    header: String,
    value: String,
}

impl Credential {
    /// The header name is stored lowercased.
    pub fn new(header: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            header: header.into().to_ascii_lowercase(),
            value: value.into(),
        }
    }

    pub fn header(&self) -> &str {
        &self.header
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("header", &self.header)
            .field("value", &"<redacted>")
            .finish()
    }
}

/// Simple-authorizer response body: `{"isAuthorized": bool}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AuthDecision {
    #[serde(rename = "isAuthorized")]
    pub is_authorized: bool,
}

#[derive(Debug, Clone)]
pub struct Authorizer {
    credential: Credential,
}

impl Authorizer {
    pub fn new(credential: Credential) -> Self {
        Self { credential }
    }

    pub fn credential_header(&self) -> &str {
        self.credential.header()
    }

    /// True iff the configured header is present with exactly the expected value.
    ///
    /// A missing header is treated as an empty value. When the same header
    /// appears more than once (after lowercasing) the last occurrence wins.
    pub fn authorize<I, K, V>(&self, headers: I) -> bool
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut presented: Option<String> = None;
        for (name, value) in headers {
            if name.as_ref().to_ascii_lowercase() == self.credential.header {
                presented = Some(value.as_ref().to_string());
            }
        }
        presented.as_deref().unwrap_or("") == self.credential.value
    }

    pub fn decision<I, K, V>(&self, headers: I) -> AuthDecision
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        AuthDecision {
            is_authorized: self.authorize(headers),
        }
    }
}
