//! # Document Signer
//!
//! Turns canonical DTE XML into signed XML.
//!
//! ## Signed Layout
//! ```text
//! <?xml version="1.0" encoding="UTF-8"?>
//! <DTE version="1.0">
//!   <Documento ID="F120T39">            ┐
//!     ...                               │ unsigned bytes, untouched
//!   </Documento>                        ┘
//!   <Signature xmlns="...xmldsig#">     ┐
//!     <SignedInfo>...</SignedInfo>      │ inserted before </DTE>
//!     <SignatureValue>...</...>         │
//!     <KeyInfo>...</KeyInfo>            │
//!   </Signature>                        ┘
//! </DTE>
//! ```
//!
//! The digest is SHA-256 over the unsigned bytes; the signature is Ed25519
//! over the digest. Both are base64. Ed25519 is deterministic, so the same
//! document and key always give the same output.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, SigningKey, VerifyingKey};
use ed25519_dalek::{Signer as _, Verifier as _};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{debug, info};

use caja_core::Rut;

use crate::config::CertificateConfig;
use crate::error::{DteError, DteResult};

const SIGNATURE_OPEN: &str = "  <Signature xmlns=\"http://www.w3.org/2000/09/xmldsig#\">\n";
const SIGNATURE_CLOSE: &str = "  </Signature>\n";
const DTE_CLOSE: &str = "</DTE>";

/// Signing capability. Anything that can produce a signed DTE (file key,
/// HSM, PKCS#12 bridge) implements this.
pub trait Signer: Send + Sync {
    /// Signs canonical XML. Deterministic per (document, key).
    fn sign(&self, unsigned: &str) -> DteResult<SignedDocument>;
}

/// Output of a signer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedDocument {
    /// XML with the signature block, exactly as it will be submitted.
    pub xml: String,
    /// base64 SHA-256 of the unsigned bytes.
    pub digest: String,
    /// base64 Ed25519 signature over the digest.
    pub signature: String,
}

// =============================================================================
// Certificate
// =============================================================================

/// A signing key with its holder and validity window.
pub struct Certificate {
    subject_rut: Rut,
    not_before: Option<DateTime<Utc>>,
    not_after: Option<DateTime<Utc>>,
    key: SigningKey,
}

impl std::fmt::Debug for Certificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Certificate")
            .field("subject_rut", &self.subject_rut)
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .finish_non_exhaustive()
    }
}

impl Certificate {
    pub fn from_seed(
        seed: [u8; 32],
        subject_rut: Rut,
        not_before: Option<DateTime<Utc>>,
        not_after: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            subject_rut,
            not_before,
            not_after,
            key: SigningKey::from_bytes(&seed),
        }
    }

    /// Loads the key file named in the config.
    ///
    /// The file holds the 32-byte seed, raw or base64 encoded.
    pub fn load(config: &CertificateConfig) -> DteResult<Self> {
        let path = config.path.as_deref().ok_or(DteError::NoActiveCertificate)?;
        let subject_rut = Rut::parse(&config.subject_rut)
            .map_err(|e| DteError::Signing(format!("certificate subject: {}", e)))?;

        let seed = read_seed(path)?;
        info!(path = %path.display(), subject = %subject_rut, "Signing certificate loaded");

        Ok(Self::from_seed(seed, subject_rut, config.not_before, config.not_after))
    }

    pub fn subject_rut(&self) -> &Rut {
        &self.subject_rut
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }

    /// Fails unless `now` is inside the validity window.
    pub fn check_validity(&self, now: DateTime<Utc>) -> DteResult<()> {
        if let Some(not_before) = self.not_before {
            if now < not_before {
                return Err(DteError::Signing(format!(
                    "certificate not valid before {}",
                    not_before
                )));
            }
        }
        if let Some(not_after) = self.not_after {
            if now > not_after {
                return Err(DteError::CertificateExpired { not_after });
            }
        }
        Ok(())
    }
}

fn read_seed(path: &Path) -> DteResult<[u8; 32]> {
    let bytes = std::fs::read(path)
        .map_err(|e| DteError::Signing(format!("cannot read {}: {}", path.display(), e)))?;

    if let Ok(seed) = <[u8; 32]>::try_from(bytes.as_slice()) {
        return Ok(seed);
    }

    let text = String::from_utf8_lossy(&bytes);
    let decoded = BASE64
        .decode(text.trim())
        .map_err(|_| DteError::Signing("key file is neither a raw nor a base64 seed".into()))?;

    <[u8; 32]>::try_from(decoded.as_slice()).map_err(|_| {
        DteError::Signing(format!("expected a 32-byte seed, got {} bytes", decoded.len()))
    })
}

// =============================================================================
// Certificate Signer
// =============================================================================

/// File-key signer.
#[derive(Debug, Default)]
pub struct CertificateSigner {
    certificate: Option<Certificate>,
}

impl CertificateSigner {
    pub fn new(certificate: Certificate) -> Self {
        Self {
            certificate: Some(certificate),
        }
    }

    /// A signer with no certificate: every `sign` fails.
    pub fn inactive() -> Self {
        Self::default()
    }

    /// Loads the configured certificate, or an inactive signer when none is
    /// configured.
    pub fn from_config(config: &CertificateConfig) -> DteResult<Self> {
        if config.path.is_none() {
            return Ok(Self::inactive());
        }
        Ok(Self::new(Certificate::load(config)?))
    }

    pub fn certificate(&self) -> Option<&Certificate> {
        self.certificate.as_ref()
    }

    /// Signs as of `now`.
    pub fn sign_at(&self, unsigned: &str, now: DateTime<Utc>) -> DteResult<SignedDocument> {
        let certificate = self.certificate.as_ref().ok_or(DteError::NoActiveCertificate)?;
        certificate.check_validity(now)?;

        let insert_at = unsigned
            .rfind(DTE_CLOSE)
            .ok_or_else(|| DteError::Signing("document has no closing </DTE>".into()))?;

        let digest = Sha256::digest(unsigned.as_bytes());
        let signature = certificate.key.sign(&digest);

        let digest = BASE64.encode(digest);
        let signature = BASE64.encode(signature.to_bytes());
        let public_key = BASE64.encode(certificate.verifying_key().as_bytes());

        let block = signature_block(&digest, &signature, &public_key, &certificate.subject_rut);

        let mut xml = String::with_capacity(unsigned.len() + block.len());
        xml.push_str(&unsigned[..insert_at]);
        xml.push_str(&block);
        xml.push_str(&unsigned[insert_at..]);

        debug!(subject = %certificate.subject_rut, digest = %digest, "Document signed");

        Ok(SignedDocument {
            xml,
            digest,
            signature,
        })
    }

    /// Checks a signed document against this signer's key.
    pub fn verify(&self, signed: &SignedDocument) -> DteResult<()> {
        let certificate = self.certificate.as_ref().ok_or(DteError::NoActiveCertificate)?;
        verify_with(&certificate.verifying_key(), signed)
    }
}

impl Signer for CertificateSigner {
    fn sign(&self, unsigned: &str) -> DteResult<SignedDocument> {
        self.sign_at(unsigned, Utc::now())
    }
}

fn signature_block(digest: &str, signature: &str, public_key: &str, subject: &Rut) -> String {
    let mut block = String::from(SIGNATURE_OPEN);
    block.push_str("    <SignedInfo>\n");
    block.push_str("      <SignatureMethod Algorithm=\"urn:ietf:rfc:8032#ed25519\"></SignatureMethod>\n");
    block.push_str("      <DigestMethod Algorithm=\"http://www.w3.org/2001/04/xmlenc#sha256\"></DigestMethod>\n");
    block.push_str(&format!("      <DigestValue>{}</DigestValue>\n", digest));
    block.push_str("    </SignedInfo>\n");
    block.push_str(&format!("    <SignatureValue>{}</SignatureValue>\n", signature));
    block.push_str("    <KeyInfo>\n");
    block.push_str(&format!("      <KeyValue>{}</KeyValue>\n", public_key));
    block.push_str(&format!("      <KeyName>{}</KeyName>\n", subject));
    block.push_str("    </KeyInfo>\n");
    block.push_str(SIGNATURE_CLOSE);
    block
}

/// Recovers the exact unsigned bytes from signed XML.
pub fn unsigned_xml(signed: &str) -> Option<String> {
    let start = signed.rfind(SIGNATURE_OPEN)?;
    let end = start + signed[start..].find(SIGNATURE_CLOSE)? + SIGNATURE_CLOSE.len();

    let mut xml = String::with_capacity(signed.len() - (end - start));
    xml.push_str(&signed[..start]);
    xml.push_str(&signed[end..]);
    Some(xml)
}

/// Verifies the digest and signature of a signed document.
pub fn verify_with(key: &VerifyingKey, signed: &SignedDocument) -> DteResult<()> {
    let unsigned = unsigned_xml(&signed.xml)
        .ok_or_else(|| DteError::Signing("no signature block".into()))?;

    let digest = Sha256::digest(unsigned.as_bytes());
    if BASE64.encode(digest) != signed.digest {
        return Err(DteError::Signing("digest does not match document".into()));
    }

    let bytes = BASE64
        .decode(&signed.signature)
        .map_err(|e| DteError::Signing(format!("signature is not base64: {}", e)))?;
    let signature = Signature::from_slice(&bytes)
        .map_err(|e| DteError::Signing(format!("malformed signature: {}", e)))?;

    key.verify(&digest, &signature)
        .map_err(|_| DteError::Signing("signature verification failed".into()))
}
