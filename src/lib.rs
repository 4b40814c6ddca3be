//! # Maestro (Esports Management API)
//!
//! `maestro` serves games, teams, tournaments, matches and their results over a
//! JSON REST API backed by `PostgreSQL`. This crate carries the part every
//! resource handler shares: request admission and caller identity.
//!
//! ## Admission Chain
//!
//! Every request runs through the same ordered chain before it reaches a handler:
//!
//! 1. **Panic recovery**: a fault anywhere below becomes an opaque `500`.
//! 2. **Rate limiting**: a token bucket per client address, independent of identity.
//! 3. **Authentication**: an optional `Authorization: Bearer <token>` header is
//!    resolved to a user, or to the anonymous identity when absent.
//! 4. **Authorization**: per-route guards (authenticated, activated, permission).
//!
//! Each stage short-circuits, so a rejected request never pays for the next one.
//!
//! ## Tokens
//!
//! Tokens are random 256-bit values handed to the client exactly once. Only their
//! `SHA-256` digest is stored, together with a scope (`authentication`,
//! `activation`, `password-reset`) and an absolute expiry. Expired or wrong-scope
//! tokens are indistinguishable from unknown ones.
//!
//! ## Permissions
//!
//! Permissions are flat string codes (`admin`, `user`, ...) attached to users.
//! There is no hierarchy; a check is plain set membership.

pub mod api;
pub mod cli;
pub mod identity;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }
}
