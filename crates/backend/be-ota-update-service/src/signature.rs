//! Code signing of manifest and directive payloads.
//!
//! Payloads are signed with RSA-SHA256 (PKCS#1 v1.5) over the exact bytes
//! sent to the client. The signature travels in the `expo-signature` header
//! as a structured field dictionary (RFC 8941):
//!
//! ```text
//! expo-signature: sig="<base64>", keyid="main"
//! ```

use std::path::Path;

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use rsa::{
    RsaPrivateKey,
    pkcs1::DecodeRsaPrivateKey,
    pkcs1v15::SigningKey,
    pkcs8::DecodePrivateKey,
    signature::{SignatureEncoding, Signer},
};
use sha2::Sha256;
use tracing::debug;

use crate::error::{UpdateResult, UpdateServiceError};

/// Key id advertised alongside every signature.
pub const KEY_ID: &str = "main";

/// Private key used to sign payloads, loaded once at startup.
#[derive(Clone)]
pub struct ManifestSigner {
    signing_key: SigningKey<Sha256>,
}

impl std::fmt::Debug for ManifestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ManifestSigner([REDACTED])")
    }
}

impl ManifestSigner {
    /// Parse a PEM private key, PKCS#8 or PKCS#1.
    pub fn from_pem(pem: &str) -> UpdateResult<Self> {
        let key = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| UpdateServiceError::config(format!("Invalid RSA private key: {}", e)))?;
        Ok(Self {
            signing_key: SigningKey::<Sha256>::new(key),
        })
    }

    pub async fn from_file(path: &Path) -> UpdateResult<Self> {
        debug!("Loading code signing key from {}", path.display());
        let pem = tokio::fs::read_to_string(path).await.map_err(|e| {
            UpdateServiceError::config(format!(
                "Failed to read private key {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_pem(&pem)
    }

    pub fn sign(&self, payload: &[u8]) -> UpdateResult<SignatureEnvelope> {
        let signature = self
            .signing_key
            .try_sign(payload)
            .map_err(|e| UpdateServiceError::Signing(e.to_string()))?;
        Ok(SignatureEnvelope {
            signature: BASE64.encode(signature.to_bytes()),
            key_id: KEY_ID,
        })
    }
}

/// A signature ready for header transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureEnvelope {
    /// Base64 of the raw signature
    pub signature: String,
    pub key_id: &'static str,
}

impl SignatureEnvelope {
    /// Serialize as `sig="...", keyid="..."`.
    pub fn to_header_value(&self) -> UpdateResult<String> {
        serialize_dictionary(&[("sig", &self.signature), ("keyid", self.key_id)])
    }
}

/// Sign `payload` if the client asked for it.
///
/// A requested signature without a configured key is an error; the client
/// must never silently receive an unsigned payload.
pub fn sign_if_requested(
    payload: &[u8],
    requested: bool,
    signer: Option<&ManifestSigner>,
) -> UpdateResult<Option<SignatureEnvelope>> {
    if !requested {
        return Ok(None);
    }
    let signer = signer.ok_or(UpdateServiceError::SigningKeyMissing)?;
    signer.sign(payload).map(Some)
}

/// Structured field dictionary whose members are all sf-strings.
fn serialize_dictionary(members: &[(&str, &str)]) -> UpdateResult<String> {
    let mut out = String::new();
    for (index, (key, value)) in members.iter().enumerate() {
        if index > 0 {
            out.push_str(", ");
        }
        out.push_str(key);
        out.push('=');
        push_sf_string(&mut out, value)?;
    }
    Ok(out)
}

fn push_sf_string(out: &mut String, value: &str) -> UpdateResult<()> {
    out.push('"');
    for c in value.chars() {
        match c {
            '"' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            ' '..='~' => out.push(c),
            _ => {
                return Err(UpdateServiceError::Signing(format!(
                    "Cannot encode {:?} in a structured field string",
                    c
                )));
            }
        }
    }
    out.push('"');
    Ok(())
}
