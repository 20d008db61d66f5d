//! Bearer token handling: payload decoding and claim resolution.
//!
//! The token is a dot-separated three-part value whose middle segment is a
//! base64url JSON object, the claims. The token is decoded exactly once
//! per invocation; the parsed [`Claims`] object is handed to the resolver
//! helpers explicitly.

use std::fs;
use std::path::Path;

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use serde_json::Value;

use crate::constants::{CLAIM_CHALLENGE, CLAIM_EXP, CLAIM_PUBLIC_KEY, CLAIM_SERVER, CLAIM_UUID};
use crate::errors::{Error, Result};

/// base64url decoder that accepts both padded and unpadded segments.
const URL_SAFE_FORGIVING: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// The decoded claims object. Immutable after parse.
#[derive(Debug, Clone)]
pub struct Claims(Value);

impl Claims {
    /// The claim value iff present and textual.
    pub fn string_claim(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    /// The claim value iff present and an integer; `-1` otherwise.
    pub fn long_claim(&self, name: &str) -> i64 {
        self.0.get(name).and_then(Value::as_i64).unwrap_or(-1)
    }
}

/// A validated bearer token: the raw string sent on the wire plus its
/// decoded claims.
#[derive(Debug)]
pub struct BearerToken {
    raw: String,
    claims: Claims,
}

impl BearerToken {
    /// Resolve a token argument that is either the token itself or a path
    /// to a file holding it (surrounding whitespace trimmed).
    pub fn resolve(arg: &str) -> Result<Self> {
        let path = Path::new(arg);
        let raw = if path.is_file() {
            fs::read_to_string(path)
                .map_err(|e| {
                    Error::InvalidToken(format!("cannot read token file {}: {e}", path.display()))
                })?
                .trim()
                .to_string()
        } else {
            arg.to_string()
        };
        let claims = decode_payload(&raw)
            .map_err(|_| Error::InvalidToken(format!("invalid token or file path: {arg}")))?;
        Ok(Self { raw, claims })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn claims(&self) -> &Claims {
        &self.claims
    }
}

/// Decode the claims object out of a token's middle segment.
pub fn decode_payload(token: &str) -> Result<Claims> {
    let mut segments = token.split('.');
    let payload = match (segments.next(), segments.next()) {
        (Some(_), Some(payload)) => payload,
        _ => {
            return Err(Error::InvalidToken(
                "token must have at least two dot-separated segments".to_string(),
            ))
        }
    };
    let decoded = URL_SAFE_FORGIVING
        .decode(payload)
        .map_err(|e| Error::InvalidToken(format!("payload segment is not valid base64url: {e}")))?;
    let value: Value = serde_json::from_slice(&decoded)
        .map_err(|e| Error::InvalidToken(format!("payload is not valid JSON: {e}")))?;
    if !value.is_object() {
        return Err(Error::InvalidToken(
            "payload is not a JSON object".to_string(),
        ));
    }
    Ok(Claims(value))
}

/// The PEM to wrap the bundle key with; absent under `--skip-key`.
pub fn resolve_public_key(claims: &Claims, skip_key: bool) -> Result<Option<&str>> {
    if skip_key {
        return Ok(None);
    }
    claims
        .string_claim(CLAIM_PUBLIC_KEY)
        .map(Some)
        .ok_or(Error::MissingClaim(CLAIM_PUBLIC_KEY))
}

/// The ingestion base URL. Only consulted when an upload will occur.
pub fn resolve_server(claims: &Claims) -> Result<&str> {
    claims
        .string_claim(CLAIM_SERVER)
        .ok_or(Error::MissingClaim(CLAIM_SERVER))
}

/// The project identity: claim first, operator override second; absent
/// under `--skip-key`.
pub fn resolve_uuid(
    claims: &Claims,
    skip_key: bool,
    override_uuid: Option<&str>,
) -> Result<Option<String>> {
    if skip_key {
        return Ok(None);
    }
    if let Some(claim) = claims.string_claim(CLAIM_UUID) {
        return Ok(Some(claim.to_string()));
    }
    if let Some(uuid) = override_uuid {
        return Ok(Some(uuid.to_string()));
    }
    Err(Error::MissingClaim(CLAIM_UUID))
}

/// The liveness nonce, if the server embedded one.
pub fn resolve_challenge(claims: &Claims) -> Option<&str> {
    claims.string_claim(CLAIM_CHALLENGE)
}

/// Require a positive `exp` strictly in the future. Only enforced when an
/// upload will occur.
pub fn ensure_not_expired(claims: &Claims) -> Result<()> {
    let exp = claims.long_claim(CLAIM_EXP);
    if exp <= 0 {
        return Err(Error::ExpInvalid);
    }
    if chrono::Utc::now().timestamp() < exp {
        Ok(())
    } else {
        Err(Error::ExpInvalid)
    }
}
