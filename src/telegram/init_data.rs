//! HMAC-SHA256 verification of the `initData` launch payload.
//!
//! The hash travels inside the payload itself. The secret key is derived
//! from the bot token with the fixed `"WebAppData"` HMAC key, per the
//! Telegram Web App validation algorithm.

use std::collections::BTreeMap;

use hmac::{Hmac, Mac};
use serde::{Deserialize, Deserializer};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::{check_auth_date, data_check_string, unix_now, VerifyError};

type HmacSha256 = Hmac<Sha256>;

/// The `user` object embedded in `initData`.
#[derive(Debug, Clone, Deserialize)]
pub struct WebAppUser {
    /// Telegram user id. The client serializes it as a number, but string
    /// ids are accepted as well.
    #[serde(deserialize_with = "de_user_id")]
    pub id: i64,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub language_code: Option<String>,
}

/// A fully verified `initData` payload.
#[derive(Debug, Clone)]
pub struct InitData {
    /// All fields except `hash`, percent-decoded.
    pub fields: BTreeMap<String, String>,
    /// The parsed `user` field.
    pub user: WebAppUser,
    /// Verified `auth_date`, Unix seconds.
    pub auth_date: i64,
}

/// Verifies `initData` payloads against a bot token (shared secret).
pub struct InitDataVerifier {
    bot_token: String,
}

impl InitDataVerifier {
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
        }
    }

    /// Verifies a payload against the current wall clock.
    pub fn verify(&self, init_data: &str) -> Result<InitData, VerifyError> {
        self.verify_at(init_data, unix_now())
    }

    /// Verifies a payload against an explicit `now` (Unix seconds).
    pub fn verify_at(&self, init_data: &str, now: i64) -> Result<InitData, VerifyError> {
        let mut fields = parse_query_pairs(init_data)?;

        let received = fields.remove("hash").ok_or(VerifyError::MalformedInput(
            "Invalid initData format or hash missing",
        ))?;

        // `hash` is already removed; every other field, `signature`
        // included, is part of the signed message in this scheme.
        let dcs = data_check_string(&fields, &[], None);
        let computed = hex::encode(self.hmac_hash(&dcs));

        // Exact length match first, then a full-width constant-time
        // comparison. A short or overlong hash must fail, never panic.
        if computed.len() != received.len()
            || !bool::from(computed.as_bytes().ct_eq(received.as_bytes()))
        {
            return Err(VerifyError::HashMismatch);
        }

        let auth_date = check_auth_date(&fields, now)?;

        let user: WebAppUser = fields
            .get("user")
            .ok_or(VerifyError::MalformedInput("User data or user ID missing"))
            .and_then(|raw| {
                serde_json::from_str(raw)
                    .map_err(|_| VerifyError::MalformedInput("User data or user ID missing"))
            })?;

        Ok(InitData {
            fields,
            user,
            auth_date,
        })
    }

    fn hmac_hash(&self, data_check_string: &str) -> [u8; 32] {
        let mut secret = HmacSha256::new_from_slice(b"WebAppData")
            .expect("HMAC can take key of any size");
        secret.update(self.bot_token.as_bytes());
        let secret = secret.finalize().into_bytes();

        let mut mac =
            HmacSha256::new_from_slice(&secret).expect("HMAC can take key of any size");
        mac.update(data_check_string.as_bytes());
        mac.finalize().into_bytes().into()
    }
}

/// Parses a percent-encoded query string into a sorted mapping, decoding
/// each component exactly once. Repeated keys keep the last value.
fn parse_query_pairs(raw: &str) -> Result<BTreeMap<String, String>, VerifyError> {
    let mut fields = BTreeMap::new();
    for pair in raw.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        fields.insert(decode_component(key)?, decode_component(value)?);
    }
    Ok(fields)
}

fn decode_component(component: &str) -> Result<String, VerifyError> {
    urlencoding::decode(component)
        .map(|c| c.into_owned())
        .map_err(|_| VerifyError::MalformedInput("Invalid initData format or hash missing"))
}

fn de_user_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    use serde::de::Error as _;

    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Number(n) => {
            n.as_i64().ok_or_else(|| D::Error::custom("user id out of range"))
        }
        serde_json::Value::String(s) => {
            s.parse().map_err(|_| D::Error::custom("user id is not numeric"))
        }
        _ => Err(D::Error::custom("user id must be a number or a string")),
    }
}
