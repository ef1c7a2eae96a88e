//! JWT-style bearer tokens (spec §4.3): compact, signed, three-segment
//! strings carrying a capability's operation/resource grant for transport
//! across process and network boundaries.

pub mod issuer;
pub mod keys;
pub mod revocation;
pub mod validator;

pub use issuer::TokenIssuer;
pub use keys::KeyManager;
pub use revocation::RevocationCache;
pub use validator::TokenValidator;

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::capability::Constraints;
use crate::error::TokenError;

const HEADER_ALG: &str = "RS256";
const HEADER_TYP: &str = "JWT";

/// Fixed issuer claim for every token this process mints (spec §4.3 `iss`).
pub const ISSUER: &str = "meshguard-security";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
    kid: String,
}

/// Delegation lineage carried by a token minted via
/// [`TokenIssuer::issue_delegated`] (spec §3: `delegation {parent_id,
/// depth, max_depth}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delegation {
    /// `jti` of the parent token this one was delegated from.
    pub parent_id: String,
    /// How many delegation hops separate this token from its root.
    pub depth: u32,
    /// The ceiling `depth` must stay under (spec §4.3: "enforces
    /// `delegation_depth < max_depth`").
    pub max_depth: u32,
}

/// The claim set carried by a meshguard security token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// `jti`: unique token identifier, used for revocation lookups.
    pub jti: String,
    /// `sub`: the principal the token was issued to.
    pub sub: String,
    /// `iss`: always [`ISSUER`] for tokens minted by this process.
    pub iss: String,
    /// `aud`: the resource-type subsystem this token is scoped to.
    pub aud: String,
    pub capability_id: String,
    pub operations: Vec<String>,
    pub resource: String,
    /// The full constraint set the underlying capability carried at issue
    /// time (`allowed_extensions`, `time_window`, etc. — spec §4.3 step 6).
    #[serde(default)]
    pub constraints: Constraints,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub iat: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub exp: DateTime<Utc>,
    /// Present only on tokens minted via [`TokenIssuer::issue_delegated`].
    pub delegation: Option<Delegation>,
}

fn b64url_encode(bytes: &[u8]) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

fn b64url_decode(s: &str) -> Result<Vec<u8>, TokenError> {
    base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(s)
        .map_err(|_| TokenError::InvalidTokenFormat)
}

fn encode_segment<T: Serialize>(value: &T) -> Result<String, TokenError> {
    let json = serde_json::to_vec(value).map_err(|_| TokenError::InvalidTokenFormat)?;
    Ok(b64url_encode(&json))
}

fn decode_segment<T: for<'de> Deserialize<'de>>(segment: &str) -> Result<T, TokenError> {
    let bytes = b64url_decode(segment)?;
    serde_json::from_slice(&bytes).map_err(|_| TokenError::InvalidTokenFormat)
}

/// Serialize `claims` into a signed compact token string.
fn encode(claims: &Claims, key_manager: &KeyManager) -> Result<String, TokenError> {
    let header_segment = encode_segment(&Header {
        alg: HEADER_ALG.to_string(),
        typ: HEADER_TYP.to_string(),
        kid: key_manager.current_kid(),
    })?;
    let payload_segment = encode_segment(claims)?;
    let signing_input = format!("{header_segment}.{payload_segment}");
    let (_kid, signature) = key_manager.sign(signing_input.as_bytes());
    let signature_segment = b64url_encode(&signature);
    Ok(format!("{header_segment}.{payload_segment}.{signature_segment}"))
}

struct DecodedToken {
    header: Header,
    claims: Claims,
    signing_input: String,
    signature: Vec<u8>,
}

fn decode(token: &str) -> Result<DecodedToken, TokenError> {
    let mut parts = token.split('.');
    let (Some(header_segment), Some(payload_segment), Some(signature_segment), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(TokenError::InvalidTokenFormat);
    };

    let header: Header = decode_segment(header_segment)?;
    let claims: Claims = decode_segment(payload_segment)?;
    let signature = b64url_decode(signature_segment)?;
    let signing_input = format!("{header_segment}.{payload_segment}");

    Ok(DecodedToken {
        header,
        claims,
        signing_input,
        signature,
    })
}
