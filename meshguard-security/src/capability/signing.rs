//! Deterministic capability serialization and HMAC-SHA256 signing.
//!
//! Signature verification must re-verify bit-identically (spec §8,
//! property 1), which means the serialization this module produces has to
//! be stable regardless of map iteration order. We build the signing
//! payload as an explicit, field-ordered string rather than leaning on
//! `serde_json`'s (unordered-by-default) map serialization.

use ring::hmac;
use subtle::ConstantTimeEq;

use super::model::Capability;

/// Sign the deterministic byte form of `capability` with `secret`,
/// returning the raw HMAC-SHA256 tag as lowercase hex.
#[must_use]
pub fn sign(capability: &Capability, secret: &str) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes());
    let tag = hmac::sign(&key, canonical_bytes(capability).as_bytes());
    hex::encode(tag.as_ref())
}

/// Verify `capability.signature` against a freshly computed signature,
/// using a constant-time comparison to avoid timing side channels.
#[must_use]
pub fn verify(capability: &Capability, secret: &str) -> bool {
    let expected = sign(capability, secret);
    let expected = expected.as_bytes();
    let actual = capability.signature.as_bytes();
    // Constant-time compare requires equal lengths; an attacker learning
    // "lengths differ" leaks nothing more than what hex-encoded SHA256
    // output length already guarantees.
    expected.len() == actual.len() && expected.ct_eq(actual).into()
}

/// Render the deterministic, stably-ordered byte form of a capability
/// with its `signature` field excluded — this is what gets signed and
/// re-verified.
fn canonical_bytes(c: &Capability) -> String {
    let mut out = String::new();
    out.push_str("id=");
    out.push_str(&c.id);
    out.push('|');
    out.push_str("resource_type=");
    out.push_str(&c.resource_type.as_str());
    out.push('|');
    out.push_str("principal_id=");
    out.push_str(&c.principal_id);
    out.push('|');
    out.push_str("parent_id=");
    out.push_str(c.parent_id.as_deref().unwrap_or(""));
    out.push('|');
    out.push_str("issued_at=");
    out.push_str(&c.issued_at.to_rfc3339());
    out.push('|');
    out.push_str("expires_at=");
    out.push_str(
        &c.expires_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_default(),
    );
    out.push('|');
    out.push_str("delegation_depth=");
    out.push_str(&c.delegation_depth.to_string());
    out.push('|');
    out.push_str("revoked=");
    out.push_str(&c.revoked.to_string());
    out.push('|');
    out.push_str("constraints=");
    out.push_str(&canonical_constraints(c));
    out
}

fn canonical_constraints(c: &Capability) -> String {
    // Re-serialize through serde_json::to_value then walk it with sorted
    // keys, so we get a stable rendering without hand-writing every
    // constraint field twice.
    let value = serde_json::to_value(&c.constraints).unwrap_or(serde_json::Value::Null);
    canonical_json(&value)
}

fn canonical_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut parts = Vec::with_capacity(keys.len());
            for k in keys {
                parts.push(format!("{k}:{}", canonical_json(&map[k])));
            }
            format!("{{{}}}", parts.join(","))
        }
        serde_json::Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", parts.join(","))
        }
        other => other.to_string(),
    }
}

mod hex {
    pub fn encode(bytes: &[u8]) -> String {
        use std::fmt::Write;
        let mut s = String::with_capacity(bytes.len() * 2);
        for b in bytes {
            let _ = write!(s, "{b:02x}");
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::model::{Capability, ResourceType};
    use chrono::Utc;

    fn sample() -> Capability {
        Capability {
            id: "cap-1".to_string(),
            resource_type: ResourceType::Filesystem,
            constraints: Default::default(),
            principal_id: "A".to_string(),
            parent_id: None,
            issued_at: Utc::now(),
            expires_at: None,
            delegation_depth: 0,
            revoked: false,
            signature: String::new(),
        }
    }

    #[test]
    fn sign_then_verify_round_trips() {
        let mut cap = sample();
        cap.signature = sign(&cap, "secret");
        assert!(verify(&cap, "secret"));
    }

    #[test]
    fn tampering_breaks_verification() {
        let mut cap = sample();
        cap.signature = sign(&cap, "secret");
        cap.principal_id = "B".to_string();
        assert!(!verify(&cap, "secret"));
    }

    #[test]
    fn signature_is_order_independent_across_equal_capabilities() {
        let cap_a = sample();
        let mut cap_b = sample();
        cap_b.constraints.extra.insert("z".into(), serde_json::json!(1));
        cap_b.constraints.extra.insert("a".into(), serde_json::json!(2));
        let mut cap_a2 = cap_a.clone();
        cap_a2.constraints.extra.insert("a".into(), serde_json::json!(2));
        cap_a2.constraints.extra.insert("z".into(), serde_json::json!(1));
        assert_eq!(canonical_bytes(&cap_b), canonical_bytes(&cap_a2));
    }
}
