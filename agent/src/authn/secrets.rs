//! Secret store access

use async_trait::async_trait;
use secrecy::SecretString;

use crate::errors::EnrollError;

/// Read access to a secret store holding the enrollment certificate
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Plaintext of secret `name` in `vault`, `None` if it does not exist
    async fn get_secret(&self, vault: &str, name: &str)
        -> Result<Option<SecretString>, EnrollError>;
}
