//! Enrollment certificate retrieval and validation
//!
//! The certificate is stored as two secrets: a base64 encoded key bundle and
//! the bundle password. Both are fetched on every run, decoded into a
//! [`Credential`] and validated against the current time. Nothing is
//! persisted; intermediate buffers are zeroized before `retrieve` returns.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use secrecy::zeroize::Zeroizing;
use secrecy::{ExposeSecret, SecretSlice, SecretString};
use serde_json::json;
use tracing::{info, warn};

use crate::app::clock::Clock;
use crate::authn::secrets::SecretStore;
use crate::errors::{CertificateError, EnrollError};
use crate::retry::RetryExecutor;
use crate::utils::sha256_hash;

/// Default expiry warning window
pub const DEFAULT_EXPIRY_WARNING_DAYS: i64 = 30;

/// Contents of a decoded key bundle
pub struct DecodedCertificate {
    pub subject: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    /// DER encoding of the certificate
    pub der: Vec<u8>,
    pub private_key: Option<SecretSlice<u8>>,
}

/// Decodes a password-protected key bundle
pub trait BundleDecoder: Send + Sync {
    /// Fails with `DecodeError` on a wrong password or corrupt bundle
    fn decode(
        &self,
        bundle: &[u8],
        password: &SecretString,
    ) -> Result<DecodedCertificate, CertificateError>;
}

/// A validated, time-bounded certificate credential
pub struct Credential {
    pub subject: String,
    /// Uppercase SHA-256 of the DER encoding
    pub thumbprint: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    private_key: Option<SecretSlice<u8>>,
    expiry_warning: Option<i64>,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("subject", &self.subject)
            .field("thumbprint", &self.thumbprint)
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .field("has_private_key", &self.has_private_key())
            .finish()
    }
}

impl Credential {
    pub fn has_private_key(&self) -> bool {
        self.private_key.is_some()
    }

    /// Key material, until `clear` is called
    pub fn private_key(&self) -> Option<&[u8]> {
        self.private_key.as_ref().map(|k| k.expose_secret())
    }

    /// Whole days left at `now`
    pub fn days_until_expiry(&self, now: DateTime<Utc>) -> i64 {
        (self.not_after - now).num_days()
    }

    /// Days left when validation raised an expiry warning
    pub fn expiry_warning(&self) -> Option<i64> {
        self.expiry_warning
    }

    /// Zeroize and drop the key material
    pub fn clear(&mut self) {
        self.private_key = None;
    }

    /// Non-secret summary for phase outcomes
    pub fn describe(&self, now: DateTime<Utc>) -> serde_json::Value {
        json!({
            "subject": self.subject,
            "thumbprint": self.thumbprint,
            "notAfter": self.not_after,
            "daysUntilExpiry": self.days_until_expiry(now),
        })
    }
}

/// Turns the two certificate secrets into a validated credential
pub struct CertificateValidator {
    secrets: Arc<dyn SecretStore>,
    decoder: Arc<dyn BundleDecoder>,
    retry: RetryExecutor,
    clock: Arc<dyn Clock>,
    expiry_warning_days: i64,
}

impl CertificateValidator {
    pub fn new(
        secrets: Arc<dyn SecretStore>,
        decoder: Arc<dyn BundleDecoder>,
        retry: RetryExecutor,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            secrets,
            decoder,
            retry,
            clock,
            expiry_warning_days: DEFAULT_EXPIRY_WARNING_DAYS,
        }
    }

    pub fn with_expiry_warning_days(mut self, days: i64) -> Self {
        self.expiry_warning_days = days;
        self
    }

    /// Fetch, decode and validate the certificate
    pub async fn retrieve(
        &self,
        vault: &str,
        cert_secret: &str,
        password_secret: &str,
    ) -> Result<Credential, EnrollError> {
        let encoded = self.fetch(vault, cert_secret).await?;
        let password = self.fetch(vault, password_secret).await?;

        let bundle = Zeroizing::new(
            BASE64
                .decode(encoded.expose_secret().trim())
                .map_err(|_| {
                    CertificateError::DecodeError("certificate bundle is not valid base64".into())
                })?,
        );
        drop(encoded);

        let decoded = self.decoder.decode(&bundle, &password)?;
        drop(password);
        drop(bundle);

        let credential = self.validate(decoded)?;
        info!(
            subject = %credential.subject,
            thumbprint = %credential.thumbprint,
            not_after = %credential.not_after,
            "Certificate validated"
        );
        Ok(credential)
    }

    async fn fetch(&self, vault: &str, name: &str) -> Result<SecretString, EnrollError> {
        let operation = format!("get secret '{}'", name);
        let secret = self
            .retry
            .execute(&operation, || self.secrets.get_secret(vault, name))
            .await?;
        secret.ok_or_else(|| CertificateError::SecretNotFound(name.to_string()).into())
    }

    /// Check key presence and the validity window at the current time
    pub fn validate(&self, decoded: DecodedCertificate) -> Result<Credential, EnrollError> {
        let now = self.clock.now();

        if decoded.private_key.is_none() {
            return Err(CertificateError::NoPrivateKey.into());
        }
        if now < decoded.not_before {
            return Err(CertificateError::NotYetValid {
                not_before: decoded.not_before,
            }
            .into());
        }
        if now > decoded.not_after {
            return Err(CertificateError::Expired {
                not_after: decoded.not_after,
            }
            .into());
        }

        let remaining = decoded.not_after - now;
        let expiry_warning = if remaining <= chrono::Duration::days(self.expiry_warning_days) {
            let days = remaining.num_days();
            warn!(
                subject = %decoded.subject,
                days,
                "Certificate expires in {} day(s)",
                days
            );
            Some(days)
        } else {
            None
        };

        Ok(Credential {
            subject: decoded.subject,
            thumbprint: sha256_hash(&decoded.der).to_uppercase(),
            not_before: decoded.not_before,
            not_after: decoded.not_after,
            private_key: decoded.private_key,
            expiry_warning,
        })
    }
}
