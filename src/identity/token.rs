//! Token codec: mint opaque credentials and derive their stored digest.
//!
//! The plaintext is handed to the client exactly once. Storage and lookups only
//! ever see `SHA-256(plaintext)`, so a leaked table cannot be replayed.

use anyhow::{Context, Result, anyhow, bail};
use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, TimeDelta, Utc};
use rand::{RngCore, rngs::OsRng};
use secrecy::SecretString;
use sha2::{Digest, Sha256};
use std::{fmt, str::FromStr, time::Duration};

/// Random bytes behind every plaintext credential.
const TOKEN_BYTES: usize = 32;

/// Length of the URL-safe, unpadded base64 rendering of `TOKEN_BYTES`.
pub const PLAINTEXT_LEN: usize = 43;

/// What a token is allowed to authorize.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scope {
    Authentication,
    Activation,
    PasswordReset,
}

impl Scope {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Authentication => "authentication",
            Self::Activation => "activation",
            Self::PasswordReset => "password-reset",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "authentication" => Ok(Self::Authentication),
            "activation" => Ok(Self::Activation),
            "password-reset" => Ok(Self::PasswordReset),
            _ => Err(anyhow!("unknown token scope: {value}")),
        }
    }
}

/// Persisted token record. Never carries the plaintext.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub hash: Vec<u8>,
    pub user_id: i64,
    pub expiry: DateTime<Utc>,
    pub scope: Scope,
}

impl Token {
    /// Mint a new token for `user_id`, valid for `ttl` from now.
    ///
    /// Returns the plaintext for the client and the record to persist.
    ///
    /// # Errors
    /// Returns an error if the OS entropy source fails or `ttl` is out of range.
    pub fn generate(user_id: i64, ttl: Duration, scope: Scope) -> Result<(SecretString, Self)> {
        Self::generate_at(user_id, ttl, scope, Utc::now())
    }

    /// Same as [`Token::generate`] with an explicit issue instant.
    ///
    /// # Errors
    /// Returns an error if the OS entropy source fails or `ttl` is out of range.
    pub fn generate_at(
        user_id: i64,
        ttl: Duration,
        scope: Scope,
        now: DateTime<Utc>,
    ) -> Result<(SecretString, Self)> {
        let ttl = TimeDelta::from_std(ttl).context("token ttl out of range")?;
        let Some(expiry) = now.checked_add_signed(ttl) else {
            bail!("token expiry out of range");
        };

        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng
            .try_fill_bytes(&mut bytes)
            .context("failed to generate token")?;
        let plaintext = Base64UrlUnpadded::encode_string(&bytes);

        let token = Self {
            hash: hash(&plaintext),
            user_id,
            expiry,
            scope,
        };

        Ok((SecretString::from(plaintext), token))
    }

    /// A token is usable strictly before its expiry.
    #[must_use]
    pub fn is_valid_at(&self, scope: Scope, now: DateTime<Utc>) -> bool {
        self.scope == scope && now < self.expiry
    }

    /// Cheap shape check run before any store round-trip.
    #[must_use]
    pub fn validate_plaintext(plaintext: &str) -> bool {
        plaintext.len() == PLAINTEXT_LEN
            && Base64UrlUnpadded::decode_vec(plaintext).is_ok_and(|bytes| bytes.len() == TOKEN_BYTES)
    }
}

/// Digest stored for, and looked up by, a plaintext credential.
#[must_use]
pub fn hash(plaintext: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(plaintext.as_bytes());
    hasher.finalize().to_vec()
}
