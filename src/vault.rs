//! Encrypted credential vault.
//!
//! Credentials live in a [`Storage`] backend under `vault/{NAME}.json`,
//! encrypted with AES-256-GCM. The cipher key is derived from a source
//! secret with PBKDF2-HMAC-SHA256 (100 000 iterations) and a salt that
//! includes the agent id, so a blob written for one agent cannot be opened
//! by another even when both share the source secret.
//!
//! Plaintext retrieval through [`Vault::get`] is a library-internal path for
//! tools that consume the credential (secure-shell execution, deploy keys).
//! Anything shown back to the model goes through [`mask`].

use crate::audit::{AuditDecision, AuditLog};
use crate::storage::Storage;
use crate::{Error, Result};
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng as AeadOsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use ed25519_dalek::SigningKey;
use ed25519_dalek::pkcs8::EncodePrivateKey;
use pkcs8::LineEnding;
use pbkdf2::pbkdf2_hmac;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use tracing::{debug, warn};

/// Key prefix shared by every vault entry.
const VAULT_PREFIX: &str = "vault/";
/// PBKDF2 iteration count for key derivation.
const PBKDF2_ROUNDS: u32 = 100_000;
/// Longest credential value accepted by [`Vault::set`].
const MAX_VALUE_LEN: usize = 16_384;
/// AES-GCM auth tag length in bytes.
const TAG_LEN: usize = 16;

/// What a stored credential is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    /// Provider or service API key.
    ApiKey,
    /// Secure-shell private key.
    SshKey,
    /// Secure-shell public key.
    SshPublicKey,
    /// Opaque bearer token.
    Token,
    /// Database connection URL.
    DatabaseUrl,
    /// Anything else.
    Generic,
}

/// Metadata stored alongside the ciphertext; never encrypted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialMeta {
    /// Credential kind.
    #[serde(rename = "type")]
    pub kind: CredentialKind,
    /// Optional human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// ISO-8601 creation timestamp.
    #[serde(rename = "createdAt")]
    pub created_at: String,
}

/// On-disk blob at `vault/{NAME}.json`.
#[derive(Debug, Serialize, Deserialize)]
struct CredentialBlob {
    /// Base64 ciphertext (tag split off).
    encrypted: String,
    /// Base64 12-byte IV.
    iv: String,
    /// Base64 16-byte auth tag.
    tag: String,
    meta: CredentialMeta,
}

/// A decrypted credential.
#[derive(Debug, Clone)]
pub struct VaultSecret {
    /// The plaintext value.
    pub value: String,
    /// Metadata as stored.
    pub meta: CredentialMeta,
}

/// Encrypted key/value store bound to one agent identity.
pub struct Vault {
    storage: Arc<dyn Storage>,
    audit: Arc<AuditLog>,
    agent_id: String,
    key: [u8; 32],
}

impl Vault {
    /// Derives the cipher key and binds the vault to `agent_id`.
    pub fn new(
        storage: Arc<dyn Storage>,
        audit: Arc<AuditLog>,
        agent_id: impl Into<String>,
        source_key: &str,
    ) -> Self {
        let agent_id = agent_id.into();
        let salt = format!("tamalebot-vault-{}", agent_id);
        let mut key = [0u8; 32];
        pbkdf2_hmac::<Sha256>(
            source_key.as_bytes(),
            salt.as_bytes(),
            PBKDF2_ROUNDS,
            &mut key,
        );
        Self {
            storage,
            audit,
            agent_id,
            key,
        }
    }

    fn entry_key(name: &str) -> String {
        format!("{}{}.json", VAULT_PREFIX, name)
    }

    /// Validates, encrypts and stores a credential.
    pub async fn set(
        &self,
        name: &str,
        value: &str,
        kind: CredentialKind,
        description: Option<String>,
    ) -> Result<()> {
        if !valid_name(name) {
            return Err(Error::invalid_input(format!(
                "credential name must match [A-Z][A-Z0-9_]{{1,63}}: {}",
                name
            )));
        }
        if value.is_empty() || value.len() > MAX_VALUE_LEN {
            return Err(Error::invalid_input(format!(
                "credential value must be 1..={} bytes",
                MAX_VALUE_LEN
            )));
        }

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let nonce = Aes256Gcm::generate_nonce(&mut AeadOsRng);
        let mut sealed = cipher
            .encrypt(&nonce, value.as_bytes())
            .map_err(|_| Error::vault("encryption failed"))?;
        // aes-gcm appends the tag; the stored format keeps it separate.
        let tag = sealed.split_off(sealed.len() - TAG_LEN);

        let blob = CredentialBlob {
            encrypted: BASE64.encode(&sealed),
            iv: BASE64.encode(nonce),
            tag: BASE64.encode(&tag),
            meta: CredentialMeta {
                kind,
                description,
                created_at: Utc::now().to_rfc3339(),
            },
        };
        let bytes = serde_json::to_vec(&blob)?;
        self.storage.put(&Self::entry_key(name), &bytes).await?;
        self.audit.log(
            &self.agent_id,
            "vault_set",
            name,
            AuditDecision::Allowed,
            None,
            None,
        )?;
        debug!(name, "credential stored");
        Ok(())
    }

    /// Decrypts and returns a credential, or `None` when absent, malformed
    /// or unverifiable. Invalid names return `None` silently.
    pub async fn get(&self, name: &str) -> Result<Option<VaultSecret>> {
        if !valid_name(name) {
            return Ok(None);
        }
        let bytes = match self.storage.get(&Self::entry_key(name)).await? {
            Some(bytes) => bytes,
            None => {
                self.audit.log(
                    &self.agent_id,
                    "vault_get",
                    name,
                    AuditDecision::Blocked,
                    Some("not found".to_string()),
                    None,
                )?;
                return Ok(None);
            }
        };

        let decrypted = serde_json::from_slice::<CredentialBlob>(&bytes)
            .ok()
            .and_then(|blob| self.open(&blob).map(|value| (value, blob.meta)));

        match decrypted {
            Some((value, meta)) => {
                self.audit.log(
                    &self.agent_id,
                    "vault_get",
                    name,
                    AuditDecision::Allowed,
                    None,
                    None,
                )?;
                Ok(Some(VaultSecret { value, meta }))
            }
            None => {
                self.audit.log(
                    &self.agent_id,
                    "vault_get",
                    name,
                    AuditDecision::Blocked,
                    Some("decryption failed".to_string()),
                    None,
                )?;
                Ok(None)
            }
        }
    }

    fn open(&self, blob: &CredentialBlob) -> Option<String> {
        let mut sealed = BASE64.decode(&blob.encrypted).ok()?;
        let iv = BASE64.decode(&blob.iv).ok()?;
        let tag = BASE64.decode(&blob.tag).ok()?;
        if iv.len() != 12 || tag.len() != TAG_LEN {
            return None;
        }
        sealed.extend_from_slice(&tag);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&iv), sealed.as_slice())
            .ok()?;
        String::from_utf8(plaintext).ok()
    }

    /// Removes a credential. Invalid names are a silent no-op.
    pub async fn delete(&self, name: &str) -> Result<()> {
        if !valid_name(name) {
            return Ok(());
        }
        self.storage.delete(&Self::entry_key(name)).await?;
        self.audit.log(
            &self.agent_id,
            "vault_delete",
            name,
            AuditDecision::Allowed,
            None,
            None,
        )?;
        Ok(())
    }

    /// Lists stored credential names with their metadata. Corrupt entries
    /// are skipped; nothing is decrypted.
    pub async fn list(&self) -> Result<Vec<(String, CredentialMeta)>> {
        let keys = self.storage.list(Some(VAULT_PREFIX)).await?;
        let mut out = Vec::new();
        for key in keys {
            let name = key
                .trim_start_matches(VAULT_PREFIX)
                .trim_end_matches(".json")
                .to_string();
            let Some(bytes) = self.storage.get(&key).await? else {
                continue;
            };
            match serde_json::from_slice::<CredentialBlob>(&bytes) {
                Ok(blob) => out.push((name, blob.meta)),
                Err(_) => {
                    warn!(key, "skipping corrupt vault entry");
                    continue;
                }
            }
        }
        Ok(out)
    }

    /// Generates an Ed25519 keypair, stores the private key under `name` and
    /// the public key under `{name}_PUB`, and returns the public key in
    /// single-line authorized-keys format.
    pub async fn generate_ssh_key(&self, name: &str) -> Result<String> {
        if !valid_name(name) {
            return Err(Error::invalid_input(format!(
                "credential name must match [A-Z][A-Z0-9_]{{1,63}}: {}",
                name
            )));
        }
        let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
        let private_pem = signing_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|err| Error::vault(format!("private key encoding failed: {}", err)))?
            .to_string();

        let comment = format!("tamalebot-{}", name.to_lowercase());
        let public_line = openssh_public_key(&signing_key, &comment);

        self.set(name, &private_pem, CredentialKind::SshKey, None)
            .await?;
        self.set(
            &format!("{}_PUB", name),
            &public_line,
            CredentialKind::SshPublicKey,
            None,
        )
        .await?;
        Ok(public_line)
    }
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("agent_id", &self.agent_id)
            // Key material never appears in debug output.
            .field("key", &"***")
            .finish()
    }
}

/// `[A-Z][A-Z0-9_]{1,63}`
pub fn valid_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    if bytes.len() < 2 || bytes.len() > 64 {
        return false;
    }
    if !bytes[0].is_ascii_uppercase() {
        return false;
    }
    bytes[1..]
        .iter()
        .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || *b == b'_')
}

/// First four characters of the value, then 4–20 mask characters. The full
/// plaintext never leaves through this path.
pub fn mask(value: &str) -> String {
    let prefix: String = value.chars().take(4).collect();
    let hidden = value.chars().count().saturating_sub(prefix.chars().count());
    let mask_len = hidden.clamp(4, 20);
    format!("{}{}", prefix, "*".repeat(mask_len))
}

/// `ssh-ed25519 <base64 blob> <comment>` where the blob is the SSH wire
/// encoding: length-prefixed algorithm name, then the 32-byte public key.
fn openssh_public_key(signing_key: &SigningKey, comment: &str) -> String {
    let public = signing_key.verifying_key();
    let mut blob = Vec::with_capacity(51);
    let alg = b"ssh-ed25519";
    blob.extend_from_slice(&(alg.len() as u32).to_be_bytes());
    blob.extend_from_slice(alg);
    let key_bytes = public.to_bytes();
    blob.extend_from_slice(&(key_bytes.len() as u32).to_be_bytes());
    blob.extend_from_slice(&key_bytes);
    format!("ssh-ed25519 {} {}", BASE64.encode(&blob), comment)
}
