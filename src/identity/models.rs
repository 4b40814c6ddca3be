use anyhow::{Context, Result, anyhow};
use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{self, SaltString},
};
use chrono::{DateTime, NaiveDate, Utc};
use rand::{RngCore, rngs::OsRng};
use serde::Serialize;
use sqlx::{FromRow, Row, postgres::PgRow};
use std::collections::HashSet;
use std::fmt;
use utoipa::ToSchema;

const PASSWORD_MIN_BYTES: usize = 8;
const PASSWORD_MAX_BYTES: usize = 20;
const SALT_BYTES: usize = 16;

/// One-way password hash in `PHC` string form (argon2id).
///
/// The plaintext only exists while hashing or verifying; it is never kept.
#[derive(Clone, PartialEq, Eq)]
pub struct Password {
    hash: String,
}

impl Password {
    /// Hash a plaintext password after checking its length bounds.
    ///
    /// # Errors
    /// Returns an error if the plaintext is out of bounds, the salt cannot be
    /// drawn from the OS entropy source, or hashing fails.
    pub fn new(plaintext: &str) -> Result<Self> {
        validate_password_plaintext(plaintext).map_err(|message| anyhow!("password {message}"))?;

        let mut salt = [0u8; SALT_BYTES];
        OsRng
            .try_fill_bytes(&mut salt)
            .context("failed to generate password salt")?;
        let salt = SaltString::encode_b64(&salt)
            .map_err(|err| anyhow!("failed to encode password salt: {err}"))?;

        let hash = Argon2::default()
            .hash_password(plaintext.as_bytes(), &salt)
            .map_err(|err| anyhow!("failed to hash password: {err}"))?
            .to_string();

        Ok(Self { hash })
    }

    /// Wrap a hash loaded from storage.
    #[must_use]
    pub fn from_hash(hash: String) -> Self {
        Self { hash }
    }

    #[must_use]
    pub fn as_hash(&self) -> &str {
        &self.hash
    }

    /// Check a plaintext against the stored hash.
    ///
    /// A mismatch is `Ok(false)`; only a malformed stored hash is an error.
    ///
    /// # Errors
    /// Returns an error if the stored hash cannot be parsed or verification fails
    /// for a reason other than a mismatch.
    pub fn matches(&self, plaintext: &str) -> Result<bool> {
        let parsed =
            PasswordHash::new(&self.hash).map_err(|err| anyhow!("invalid password hash: {err}"))?;
        match Argon2::default().verify_password(plaintext.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(password_hash::Error::Password) => Ok(false),
            Err(err) => Err(anyhow!("failed to verify password: {err}")),
        }
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(***)")
    }
}

/// Length bounds for a plaintext password, in bytes.
///
/// # Errors
/// Returns the validation message for the `password` field.
pub fn validate_password_plaintext(plaintext: &str) -> Result<(), &'static str> {
    if plaintext.is_empty() {
        return Err("must be provided");
    }
    if plaintext.len() < PASSWORD_MIN_BYTES {
        return Err("must be at least 8 bytes long");
    }
    if plaintext.len() > PASSWORD_MAX_BYTES {
        return Err("must not be more than 20 bytes long");
    }
    Ok(())
}

/// A registered user as stored in `users`.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct User {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub name: String,
    pub description: String,
    pub nationality: String,
    pub birthday: NaiveDate,
    pub email: String,
    #[serde(skip)]
    pub password: Password,
    pub activated: bool,
    pub verified_pro: bool,
    /// Optimistic concurrency counter; every update must present the value it read.
    #[serde(skip)]
    pub version: i32,
}

impl<'r> FromRow<'r, PgRow> for User {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let password_hash: String = row.try_get("password_hash")?;
        Ok(Self {
            id: row.try_get("id")?,
            created_at: row.try_get("created_at")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            nationality: row.try_get("nationality")?,
            birthday: row.try_get("birthday")?,
            email: row.try_get("email")?,
            password: Password::from_hash(password_hash),
            activated: row.try_get("activated")?,
            verified_pro: row.try_get("verified_pro")?,
            version: row.try_get("version")?,
        })
    }
}

/// Fields supplied when creating a user; id, timestamps and version come from the store.
#[derive(Clone, Debug)]
pub struct NewUser {
    pub name: String,
    pub description: String,
    pub nationality: String,
    pub birthday: NaiveDate,
    pub email: String,
    pub password: Password,
    pub activated: bool,
    pub verified_pro: bool,
}

/// The caller a request is processed on behalf of.
///
/// `Anonymous` is a value in its own right: it is never persisted, never matched
/// against stored users, and lacks every permission.
#[derive(Clone, Debug)]
pub enum Identity {
    Anonymous,
    User(User),
}

impl Identity {
    #[must_use]
    pub const fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous)
    }

    #[must_use]
    pub const fn user(&self) -> Option<&User> {
        match self {
            Self::Anonymous => None,
            Self::User(user) => Some(user),
        }
    }
}

/// Flat set of permission codes granted to a user.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Permissions(HashSet<String>);

impl Permissions {
    #[must_use]
    pub fn includes(&self, code: &str) -> bool {
        self.0.contains(code)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for Permissions {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}
