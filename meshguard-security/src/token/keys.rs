//! The key manager (spec §4.4): generates the RSA-2048 signing keypair
//! used for tokens, rotates it on a schedule, and publishes a JWKS
//! document (`RFC 7517`) of every still-valid public key.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use tracing::{info, instrument};

use crate::error::TokenError;

/// RSA-2048 per spec §3/§4.4/§6.
const RSA_KEY_BITS: usize = 2048;

struct StoredKey {
    kid: String,
    private_key: RsaPrivateKey,
    public_key: RsaPublicKey,
    created_at: DateTime<Utc>,
    retired_at: Option<DateTime<Utc>>,
}

impl StoredKey {
    fn generate(now: DateTime<Utc>) -> Result<Self, TokenError> {
        let mut rng = rand::rngs::OsRng;
        let private_key =
            RsaPrivateKey::new(&mut rng, RSA_KEY_BITS).map_err(|_| TokenError::InvalidSignature)?;
        let public_key = RsaPublicKey::from(&private_key);
        Ok(Self {
            kid: uuid::Uuid::new_v4().simple().to_string(),
            private_key,
            public_key,
            created_at: now,
            retired_at: None,
        })
    }

    fn signing_key(&self) -> SigningKey<Sha256> {
        SigningKey::<Sha256>::new(self.private_key.clone())
    }

    fn verifying_key(&self) -> VerifyingKey<Sha256> {
        VerifyingKey::<Sha256>::new(self.public_key.clone())
    }
}

struct KeyManagerState {
    keys: Vec<StoredKey>,
}

/// Generates, rotates, and publishes the RSA-2048 keypairs tokens are
/// signed with (`RS256`, PKCS#1 v1.5 over SHA-256).
pub struct KeyManager {
    rotation_interval: Duration,
    overlap_period: Duration,
    state: RwLock<KeyManagerState>,
}

impl KeyManager {
    /// Construct a key manager with one freshly generated signing key.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::InvalidSignature`] if key generation fails
    /// (only possible on RNG exhaustion).
    pub fn new(rotation_interval: Duration, overlap_period: Duration) -> Result<Self, TokenError> {
        let key = StoredKey::generate(Utc::now())?;
        Ok(Self {
            rotation_interval,
            overlap_period,
            state: RwLock::new(KeyManagerState { keys: vec![key] }),
        })
    }

    /// The `kid` currently used to sign new tokens (the most recently
    /// generated, non-retired key).
    #[must_use]
    pub fn current_kid(&self) -> String {
        self.state
            .read()
            .keys
            .iter()
            .rev()
            .find(|k| k.retired_at.is_none())
            .map(|k| k.kid.clone())
            .expect("a key manager always retains at least one active key")
    }

    /// Sign `data` with the current key, returning `(kid, signature)`.
    #[must_use]
    pub fn sign(&self, data: &[u8]) -> (String, Vec<u8>) {
        let kid = self.current_kid();
        let state = self.state.read();
        let key = state.keys.iter().find(|k| k.kid == kid).expect("current kid exists");
        let signature: Signature = key.signing_key().sign(data);
        (kid, signature.to_vec())
    }

    /// Verify `signature` over `data` was produced by the key identified by
    /// `kid`, provided that key is not yet evicted (past its overlap
    /// window).
    #[must_use]
    pub fn verify(&self, kid: &str, data: &[u8], signature: &[u8]) -> bool {
        let state = self.state.read();
        let Some(key) = state.keys.iter().find(|k| k.kid == kid) else {
            return false;
        };
        let Ok(sig) = Signature::try_from(signature) else {
            return false;
        };
        key.verifying_key().verify(data, &sig).is_ok()
    }

    /// Generate a new signing key, retire the previous one (it stays valid
    /// for verification through `overlap_period`), and evict any key whose
    /// overlap window has elapsed.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::InvalidSignature`] if key generation fails.
    #[instrument(skip(self))]
    pub fn rotate(&self) -> Result<String, TokenError> {
        let now = Utc::now();
        let new_key = StoredKey::generate(now)?;
        let new_kid = new_key.kid.clone();

        let mut state = self.state.write();
        for key in &mut state.keys {
            if key.retired_at.is_none() {
                key.retired_at = Some(now);
            }
        }
        state.keys.push(new_key);

        let overlap = chrono::Duration::from_std(self.overlap_period).unwrap_or_default();
        state
            .keys
            .retain(|k| k.retired_at.is_none_or(|retired| now - retired < overlap));

        info!(kid = %new_kid, remaining_keys = state.keys.len(), "rotated signing key");
        Ok(new_kid)
    }

    #[must_use]
    pub fn rotation_interval(&self) -> Duration {
        self.rotation_interval
    }

    /// Export every currently verifiable public key as a JWKS document
    /// (`RFC 7517`), `kty: "RSA"`, `alg: "RS256"`.
    #[must_use]
    pub fn jwks(&self) -> serde_json::Value {
        let state = self.state.read();
        let keys: Vec<serde_json::Value> = state
            .keys
            .iter()
            .map(|k| {
                let n = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(k.public_key.n().to_bytes_be());
                let e = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(k.public_key.e().to_bytes_be());
                serde_json::json!({
                    "kty": "RSA",
                    "kid": k.kid,
                    "use": "sig",
                    "alg": "RS256",
                    "n": n,
                    "e": e,
                })
            })
            .collect();
        serde_json::json!({ "keys": keys })
    }
}

/// Spawn the periodic key-rotation task.
pub fn spawn_rotation(manager: Arc<KeyManager>) -> tokio::task::JoinHandle<()> {
    let interval = manager.rotation_interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // the initial key from `new` already covers time zero
        loop {
            ticker.tick().await;
            if let Err(err) = manager.rotate() {
                tracing::error!(error = %err, "key rotation failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> KeyManager {
        KeyManager::new(Duration::from_secs(30 * 24 * 60 * 60), Duration::from_secs(24 * 60 * 60)).unwrap()
    }

    #[test]
    fn sign_and_verify_round_trip() {
        let km = manager();
        let (kid, sig) = km.sign(b"hello");
        assert!(km.verify(&kid, b"hello", &sig));
        assert!(!km.verify(&kid, b"tampered", &sig));
    }

    #[test]
    fn jwks_reports_rsa_key_material() {
        let km = manager();
        let jwks = km.jwks();
        let key = &jwks["keys"][0];
        assert_eq!(key["kty"], "RSA");
        assert_eq!(key["alg"], "RS256");
        assert_eq!(key["use"], "sig");
        assert!(key["n"].as_str().is_some());
        assert!(key["e"].as_str().is_some());
    }

    #[test]
    fn scenario_s5_rotation_keeps_old_key_valid_during_overlap() {
        let km = manager();
        let (old_kid, old_sig) = km.sign(b"payload");

        let new_kid = km.rotate().unwrap();
        assert_ne!(old_kid, new_kid);

        // Old key is retired but still inside its overlap window.
        assert!(km.verify(&old_kid, b"payload", &old_sig));

        let jwks = km.jwks();
        let kids: Vec<String> = jwks["keys"]
            .as_array()
            .unwrap()
            .iter()
            .map(|k| k["kid"].as_str().unwrap().to_string())
            .collect();
        assert!(kids.contains(&old_kid));
        assert!(kids.contains(&new_kid));
    }

    #[test]
    fn new_signatures_use_the_rotated_key() {
        let km = manager();
        let first_kid = km.current_kid();
        km.rotate().unwrap();
        let (signing_kid, _) = km.sign(b"x");
        assert_ne!(signing_kid, first_kid);
    }

    #[test]
    fn scenario_s5_old_key_evicted_once_past_overlap_window() {
        let km = manager();
        let (old_kid, old_sig) = km.sign(b"payload");
        km.rotate().unwrap();
        assert!(km.verify(&old_kid, b"payload", &old_sig));

        // Simulate the 24h overlap window having fully elapsed by
        // backdating the retired key's timestamp directly, since there is
        // no fake clock to advance real time by 25h in a unit test.
        {
            let mut state = km.state.write();
            for key in &mut state.keys {
                if key.kid == old_kid {
                    key.retired_at = Some(Utc::now() - chrono::Duration::hours(25));
                }
            }
        }

        // The next rotation's eviction pass drops any key past its overlap.
        km.rotate().unwrap();
        assert!(!km.verify(&old_kid, b"payload", &old_sig));
    }
}
