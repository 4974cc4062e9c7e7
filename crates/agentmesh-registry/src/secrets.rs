//! Environment secret vault
//!
//! Values are sealed with AES-256-GCM under a key derived from the
//! configured master secret (PBKDF2-HMAC-SHA256, 100k iterations, the
//! salt taken from the master's first 16 bytes). Only ciphertext
//! envelopes are stored; the API surface never returns plaintext.
//! `reveal` exists for the orchestrator's environment injection.

use crate::model::EnvironmentSecret;
use agentmesh_core::{Caller, Error, Result};
use base64::Engine;
use chrono::Utc;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use std::num::NonZeroU32;
use uuid::Uuid;

const KDF_ITERATIONS: u32 = 100_000;
const SALT_LEN: usize = 16;

pub struct SecretVault {
    key: LessSafeKey,
    rng: SystemRandom,
    secrets: dashmap::DashMap<Uuid, EnvironmentSecret>,
}

impl SecretVault {
    pub fn new(master_secret: &str) -> Result<Self> {
        if master_secret.is_empty() {
            return Err(Error::bad_input("master secret must not be empty"));
        }

        // Salt: first 16 bytes of the master, padded with '0'.
        let mut salt = [b'0'; SALT_LEN];
        for (slot, byte) in salt.iter_mut().zip(master_secret.as_bytes()) {
            *slot = *byte;
        }

        let mut key_bytes = [0u8; 32];
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            NonZeroU32::new(KDF_ITERATIONS).expect("nonzero iterations"),
            &salt,
            master_secret.as_bytes(),
            &mut key_bytes,
        );

        let unbound = UnboundKey::new(&AES_256_GCM, &key_bytes)
            .map_err(|_| Error::internal("failed to build sealing key"))?;
        Ok(Self {
            key: LessSafeKey::new(unbound),
            rng: SystemRandom::new(),
            secrets: dashmap::DashMap::new(),
        })
    }

    /// Seal a plaintext into a base64(nonce || ciphertext) envelope.
    pub fn seal(&self, plaintext: &str) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| Error::internal("rng failure"))?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut buffer = plaintext.as_bytes().to_vec();
        self.key
            .seal_in_place_append_tag(nonce, Aad::empty(), &mut buffer)
            .map_err(|_| Error::internal("seal failure"))?;

        let mut envelope = nonce_bytes.to_vec();
        envelope.extend_from_slice(&buffer);
        Ok(base64::engine::general_purpose::STANDARD.encode(envelope))
    }

    /// Open an envelope produced by [`seal`].
    pub fn open(&self, envelope: &str) -> Result<String> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(envelope)
            .map_err(|_| Error::bad_input("malformed secret envelope"))?;
        if bytes.len() < NONCE_LEN {
            return Err(Error::bad_input("malformed secret envelope"));
        }
        let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| Error::bad_input("malformed secret envelope"))?;

        let mut buffer = ciphertext.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut buffer)
            .map_err(|_| Error::bad_input("secret envelope failed authentication"))?;
        String::from_utf8(plaintext.to_vec())
            .map_err(|_| Error::internal("sealed value was not utf-8"))
    }

    /// Store a secret. The plaintext is sealed immediately and dropped.
    pub fn put(&self, owner: Uuid, name: impl Into<String>, plaintext: &str) -> Result<Uuid> {
        let sealed_value = self.seal(plaintext)?;
        let secret = EnvironmentSecret {
            id: Uuid::new_v4(),
            owner,
            name: name.into(),
            sealed_value,
            created_at: Utc::now(),
        };
        let id = secret.id;
        self.secrets.insert(id, secret);
        Ok(id)
    }

    /// Metadata only; the sealed value stays inside the vault.
    pub fn list(&self, owner: Uuid) -> Vec<(Uuid, String)> {
        self.secrets
            .iter()
            .filter(|entry| entry.owner == owner)
            .map(|entry| (entry.id, entry.name.clone()))
            .collect()
    }

    /// Decrypt for in-process use (worker environment injection).
    pub fn reveal(&self, id: Uuid, caller: &Caller) -> Result<String> {
        let secret = self
            .secrets
            .get(&id)
            .ok_or_else(|| Error::not_found(format!("secret {id}")))?;
        if !caller.may_act_on(secret.owner) {
            return Err(Error::forbidden("only the owner may read a secret"));
        }
        self.open(&secret.sealed_value)
    }

    pub fn delete(&self, id: Uuid, caller: &Caller) -> Result<()> {
        let owner = self
            .secrets
            .get(&id)
            .map(|entry| entry.owner)
            .ok_or_else(|| Error::not_found(format!("secret {id}")))?;
        if !caller.may_act_on(owner) {
            return Err(Error::forbidden("only the owner may delete a secret"));
        }
        self.secrets.remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_roundtrip() {
        let vault = SecretVault::new("correct horse battery staple").unwrap();
        let envelope = vault.seal("s3cret-value").unwrap();
        assert_ne!(envelope, "s3cret-value");
        assert_eq!(vault.open(&envelope).unwrap(), "s3cret-value");
    }

    #[test]
    fn envelopes_differ_per_seal() {
        let vault = SecretVault::new("master").unwrap();
        assert_ne!(vault.seal("x").unwrap(), vault.seal("x").unwrap());
    }

    #[test]
    fn wrong_master_fails_authentication() {
        let vault = SecretVault::new("master-one").unwrap();
        let other = SecretVault::new("master-two").unwrap();
        let envelope = vault.seal("value").unwrap();
        assert!(other.open(&envelope).is_err());
    }

    #[test]
    fn put_never_stores_plaintext() {
        let vault = SecretVault::new("master").unwrap();
        let owner = Uuid::new_v4();
        let id = vault.put(owner, "API_KEY", "plaintext-key").unwrap();
        let stored = vault.secrets.get(&id).unwrap().sealed_value.clone();
        assert!(!stored.contains("plaintext-key"));
        assert_eq!(
            vault.reveal(id, &Caller::user(owner)).unwrap(),
            "plaintext-key"
        );
    }

    #[test]
    fn reveal_checks_ownership() {
        let vault = SecretVault::new("master").unwrap();
        let id = vault.put(Uuid::new_v4(), "K", "v").unwrap();
        assert!(vault.reveal(id, &Caller::user(Uuid::new_v4())).is_err());
        assert!(vault.reveal(id, &Caller::admin(Uuid::new_v4())).is_ok());
    }
}
