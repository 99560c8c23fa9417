//! Telegram Mini App request authentication.
//!
//! Two generations of the Mini App sign their launch payloads differently:
//! an HMAC-SHA256 hash over the percent-encoded `initData` blob
//! ([`InitDataVerifier`]) and a detached Ed25519 signature over a structured
//! query mapping ([`SignedQueryVerifier`]). The signed byte layout differs
//! between the two (field exclusion set, bot-id prefix), so they are
//! independent strategies behind [`AuthScheme`] rather than one code path.
//!
//! Verification failures are terminal for a request. Secrets go into the
//! verifiers at construction time and are never logged or echoed back.

mod init_data;
mod signed_query;

pub use init_data::{InitData, InitDataVerifier, WebAppUser};
pub use signed_query::SignedQueryVerifier;

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

/// Maximum accepted age of `auth_date`, in seconds.
pub const AUTH_TTL_SECS: i64 = 3600;

/// Clock-skew tolerance applied on top of [`AUTH_TTL_SECS`], in seconds.
pub const CLOCK_SKEW_SECS: i64 = 300;

/// Why a payload was rejected.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// A required field is missing or unparseable.
    #[error("{0}")]
    MalformedInput(&'static str),

    /// The HMAC hash did not match the data-check string.
    #[error("data verification failed")]
    HashMismatch,

    /// The Ed25519 signature did not verify.
    #[error("signature verification failed")]
    SignatureMismatch,

    /// `auth_date` is outside the freshness window.
    #[error("auth date outside allowed window")]
    StaleAuth,
}

/// A claimed payload, tagged by the endpoint family that received it.
pub enum AuthPayload<'a> {
    /// Percent-encoded `initData` query string.
    InitData(&'a str),
    /// Structured key/value mapping plus detached base64url signature.
    SignedQuery {
        query: &'a BTreeMap<String, String>,
        signature: &'a str,
    },
}

/// Successful verification outcome, mirroring the scheme that produced it.
pub enum Verified {
    /// The parsed `initData` payload and its embedded user.
    WebAppData(InitData),
    /// Authenticity only; caller-supplied identity fields are trusted
    /// from here on.
    SignedQuery,
}

/// One of the two verification strategies, selected by endpoint
/// configuration rather than by sniffing the payload at runtime.
pub enum AuthScheme {
    Hmac(InitDataVerifier),
    Ed25519(SignedQueryVerifier),
}

impl AuthScheme {
    /// Verifies a payload against this scheme.
    ///
    /// A payload shape that does not belong to the scheme is a caller bug
    /// and is rejected as malformed rather than silently re-routed.
    pub fn verify(&self, payload: &AuthPayload<'_>) -> Result<Verified, VerifyError> {
        match (self, payload) {
            (Self::Hmac(v), AuthPayload::InitData(raw)) => {
                v.verify(raw).map(Verified::WebAppData)
            }
            (Self::Ed25519(v), AuthPayload::SignedQuery { query, signature }) => {
                v.verify(query, signature).map(|()| Verified::SignedQuery)
            }
            _ => Err(VerifyError::MalformedInput(
                "payload does not match the configured auth scheme",
            )),
        }
    }
}

/// Both verifiers the gateway serves, one per endpoint generation.
pub struct TelegramAuth {
    /// HMAC verification, used by the `/api/valid*` endpoints.
    pub init_data: AuthScheme,
    /// Ed25519 verification, used by the `/api/lastfm` and `/api/spotify`
    /// endpoints.
    pub signed_query: AuthScheme,
}

impl TelegramAuth {
    pub fn new(bot_token: &str, bot_id: &str, public_key_hex: &str) -> anyhow::Result<Self> {
        Ok(Self {
            init_data: AuthScheme::Hmac(InitDataVerifier::new(bot_token)),
            signed_query: AuthScheme::Ed25519(SignedQueryVerifier::new(bot_id, public_key_hex)?),
        })
    }

    /// Verifies an `initData` blob and returns the parsed payload.
    pub fn verify_init_data(&self, raw: &str) -> Result<InitData, VerifyError> {
        match self.init_data.verify(&AuthPayload::InitData(raw))? {
            Verified::WebAppData(data) => Ok(data),
            Verified::SignedQuery => Err(VerifyError::MalformedInput(
                "payload does not match the configured auth scheme",
            )),
        }
    }

    /// Verifies a signed query mapping.
    pub fn verify_signed_query(
        &self,
        query: &BTreeMap<String, String>,
        signature: &str,
    ) -> Result<(), VerifyError> {
        self.signed_query
            .verify(&AuthPayload::SignedQuery { query, signature })
            .map(|_| ())
    }
}

/// Canonical serialization of auth fields: pairs sorted lexicographically by
/// key, joined as `key=value` with newline separators, optionally prefixed.
/// Any byte mismatch downstream fails verification, so this must be a
/// deterministic function of its input.
pub(crate) fn data_check_string(
    fields: &BTreeMap<String, String>,
    exclude: &[&str],
    prefix: Option<&str>,
) -> String {
    let joined = fields
        .iter()
        .filter(|(key, _)| !exclude.contains(&key.as_str()))
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("\n");

    match prefix {
        Some(prefix) => format!("{prefix}\n{joined}"),
        None => joined,
    }
}

/// Extracts `auth_date` and enforces the freshness window.
///
/// Timestamps more than [`CLOCK_SKEW_SECS`] in the future are rejected as
/// stale too; the Telegram client only ever produces past timestamps.
pub(crate) fn check_auth_date(
    fields: &BTreeMap<String, String>,
    now: i64,
) -> Result<i64, VerifyError> {
    let auth_date: i64 = fields
        .get("auth_date")
        .ok_or(VerifyError::MalformedInput("Invalid auth_date"))?
        .parse()
        .map_err(|_| VerifyError::MalformedInput("Invalid auth_date"))?;

    if auth_date <= 0 {
        return Err(VerifyError::MalformedInput("Invalid auth_date"));
    }

    let age = now - auth_date;
    if age > AUTH_TTL_SECS + CLOCK_SKEW_SECS || age < -CLOCK_SKEW_SECS {
        return Err(VerifyError::StaleAuth);
    }

    Ok(auth_date)
}

pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn data_check_string_is_sorted_and_newline_joined() {
        let a = fields(&[("b", "2"), ("a", "1")]);
        let b = fields(&[("a", "1"), ("b", "2")]);
        assert_eq!(data_check_string(&a, &[], None), "a=1\nb=2");
        assert_eq!(
            data_check_string(&a, &[], None),
            data_check_string(&b, &[], None),
        );
    }

    #[test]
    fn data_check_string_excludes_and_prefixes() {
        let f = fields(&[("auth_date", "1"), ("hash", "x"), ("signature", "y")]);
        assert_eq!(
            data_check_string(&f, &["hash", "signature"], Some("42:WebAppData")),
            "42:WebAppData\nauth_date=1",
        );
    }

    #[test]
    fn auth_date_exactly_at_ttl_passes() {
        let now = 1_700_000_000;
        let f = fields(&[("auth_date", &(now - AUTH_TTL_SECS).to_string())]);
        assert_eq!(check_auth_date(&f, now).unwrap(), now - AUTH_TTL_SECS);
    }

    #[test]
    fn auth_date_just_past_tolerance_is_stale() {
        let now = 1_700_000_000;
        let f = fields(&[(
            "auth_date",
            &(now - AUTH_TTL_SECS - CLOCK_SKEW_SECS - 1).to_string(),
        )]);
        assert!(matches!(check_auth_date(&f, now), Err(VerifyError::StaleAuth)));
    }

    #[test]
    fn auth_date_at_tolerance_boundary_passes() {
        let now = 1_700_000_000;
        let f = fields(&[(
            "auth_date",
            &(now - AUTH_TTL_SECS - CLOCK_SKEW_SECS).to_string(),
        )]);
        assert!(check_auth_date(&f, now).is_ok());
    }

    #[test]
    fn auth_date_from_the_future_is_stale() {
        let now = 1_700_000_000;
        let f = fields(&[("auth_date", &(now + CLOCK_SKEW_SECS + 1).to_string())]);
        assert!(matches!(check_auth_date(&f, now), Err(VerifyError::StaleAuth)));

        // Small forward skew is tolerated.
        let f = fields(&[("auth_date", &(now + CLOCK_SKEW_SECS).to_string())]);
        assert!(check_auth_date(&f, now).is_ok());
    }

    #[test]
    fn auth_date_missing_or_invalid_is_malformed() {
        for f in [
            fields(&[]),
            fields(&[("auth_date", "abc")]),
            fields(&[("auth_date", "0")]),
            fields(&[("auth_date", "-5")]),
        ] {
            assert!(matches!(
                check_auth_date(&f, 1_700_000_000),
                Err(VerifyError::MalformedInput(_)),
            ));
        }
    }

    #[test]
    fn both_schemes_work_through_the_combined_entry_point() {
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;
        use base64::Engine;
        use ed25519_dalek::{Signer, SigningKey};
        use hmac::{Hmac, Mac};
        use sha2::Sha256;

        let signing_key = SigningKey::from_bytes(&[9u8; 32]);
        let public_hex = hex::encode(signing_key.verifying_key().to_bytes());
        let auth = TelegramAuth::new("12345:test-token", "12345", &public_hex).unwrap();

        // HMAC path, with the hash derived independently of the verifier.
        let now = unix_now();
        let user = r#"{"id":42,"first_name":"Ada"}"#;
        let dcs = format!("auth_date={now}\nuser={user}");
        let mut secret = Hmac::<Sha256>::new_from_slice(b"WebAppData").unwrap();
        secret.update(b"12345:test-token");
        let secret = secret.finalize().into_bytes();
        let mut mac = Hmac::<Sha256>::new_from_slice(&secret).unwrap();
        mac.update(dcs.as_bytes());
        let hash = hex::encode(mac.finalize().into_bytes());

        let init_data = format!(
            "auth_date={now}&user={}&hash={hash}",
            urlencoding::encode(user),
        );
        let verified = auth.verify_init_data(&init_data).unwrap();
        assert_eq!(verified.user.id, 42);

        // Ed25519 path over the same logical fields.
        let now_str = now.to_string();
        let query = fields(&[("auth_date", now_str.as_str()), ("user", user)]);
        let message = format!("12345:WebAppData\nauth_date={now}\nuser={user}");
        let signature = URL_SAFE_NO_PAD.encode(signing_key.sign(message.as_bytes()).to_bytes());
        assert!(auth.verify_signed_query(&query, &signature).is_ok());
    }

    #[test]
    fn scheme_rejects_mismatched_payload_shape() {
        let scheme = AuthScheme::Hmac(InitDataVerifier::new("bot-token"));
        let query = fields(&[("auth_date", "1700000000")]);
        let payload = AuthPayload::SignedQuery {
            query: &query,
            signature: "sig",
        };
        assert!(matches!(
            scheme.verify(&payload),
            Err(VerifyError::MalformedInput(_)),
        ));
    }
}
