//! PKCS#12 key bundle decoding

use chrono::{DateTime, Utc};
use p12_keystore::KeyStore;
use secrecy::{ExposeSecret, SecretSlice, SecretString};

use crate::authn::certificate::{BundleDecoder, DecodedCertificate};
use crate::errors::CertificateError;

/// Decodes password-protected PKCS#12 bundles.
///
/// The leaf certificate of the first private key chain is used; a bundle
/// holding only certificates is rejected with `NoPrivateKey`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Pkcs12Decoder;

impl Pkcs12Decoder {
    pub fn new() -> Self {
        Self
    }
}

fn timestamp(seconds: i64) -> Result<DateTime<Utc>, CertificateError> {
    DateTime::<Utc>::from_timestamp(seconds, 0)
        .ok_or_else(|| CertificateError::DecodeError("certificate validity out of range".into()))
}

impl BundleDecoder for Pkcs12Decoder {
    fn decode(
        &self,
        bundle: &[u8],
        password: &SecretString,
    ) -> Result<DecodedCertificate, CertificateError> {
        // Parser errors may quote bundle bytes, keep them out of the message
        let keystore = KeyStore::from_pkcs12(bundle, password.expose_secret()).map_err(|_| {
            CertificateError::DecodeError(
                "unable to open certificate bundle (wrong password or corrupt data)".into(),
            )
        })?;

        let (_, chain) = keystore
            .private_key_chain()
            .ok_or(CertificateError::NoPrivateKey)?;
        let leaf = chain.chain().first().ok_or_else(|| {
            CertificateError::DecodeError("certificate bundle has no certificate".into())
        })?;

        let (_, cert) = x509_parser::parse_x509_certificate(leaf.as_der()).map_err(|_| {
            CertificateError::DecodeError("certificate is not valid X.509".into())
        })?;
        let validity = cert.validity();

        Ok(DecodedCertificate {
            subject: cert.subject().to_string(),
            not_before: timestamp(validity.not_before.timestamp())?,
            not_after: timestamp(validity.not_after.timestamp())?,
            private_key: Some(SecretSlice::from(chain.key().to_vec())),
            der: leaf.as_der().to_vec(),
        })
    }
}
