//! Certificate-based authentication

pub mod certificate;
pub mod pkcs12;
pub mod secrets;

pub use certificate::{BundleDecoder, CertificateValidator, Credential, DecodedCertificate};
pub use pkcs12::Pkcs12Decoder;
pub use secrets::SecretStore;
