//! Ed25519 verification of a structured query payload.
//!
//! Newer Mini App endpoints ship the launch parameters as an already-parsed
//! mapping plus a detached signature made by Telegram. Verification needs
//! only Telegram's published public key; the data-check string is prefixed
//! with `<bot_id>:WebAppData`, and both `hash` and `signature` are excluded
//! from the signed message.

use std::collections::BTreeMap;

use anyhow::Context;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};

use super::{check_auth_date, data_check_string, unix_now, VerifyError};

/// Verifies signed query payloads against Telegram's Ed25519 public key.
pub struct SignedQueryVerifier {
    prefix: String,
    key: VerifyingKey,
}

impl SignedQueryVerifier {
    /// Builds a verifier from the bot's numeric id and a 64-hex-char
    /// Ed25519 public key.
    pub fn new(bot_id: &str, public_key_hex: &str) -> anyhow::Result<Self> {
        let bytes = hex::decode(public_key_hex).context("Telegram public key is not valid hex")?;
        let bytes: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| anyhow::anyhow!("Telegram public key must be 32 bytes"))?;
        let key = VerifyingKey::from_bytes(&bytes).context("invalid Ed25519 public key")?;

        Ok(Self {
            prefix: format!("{bot_id}:WebAppData"),
            key,
        })
    }

    /// Verifies a payload against the current wall clock.
    pub fn verify(
        &self,
        query: &BTreeMap<String, String>,
        signature: &str,
    ) -> Result<(), VerifyError> {
        self.verify_at(query, signature, unix_now())
    }

    /// Verifies a payload against an explicit `now` (Unix seconds).
    pub fn verify_at(
        &self,
        query: &BTreeMap<String, String>,
        signature: &str,
        now: i64,
    ) -> Result<(), VerifyError> {
        let dcs = data_check_string(query, &["hash", "signature"], Some(&self.prefix));

        // base64url without padding; stray padding from sloppy clients is
        // tolerated. Anything undecodable is treated the same as a bad
        // signature, matching the observable behavior of the endpoints.
        let sig_bytes = URL_SAFE_NO_PAD
            .decode(signature.trim_end_matches('='))
            .map_err(|_| VerifyError::SignatureMismatch)?;
        let sig =
            Signature::from_slice(&sig_bytes).map_err(|_| VerifyError::SignatureMismatch)?;

        self.key
            .verify(dcs.as_bytes(), &sig)
            .map_err(|_| VerifyError::SignatureMismatch)?;

        check_auth_date(query, now)?;
        Ok(())
    }
}
