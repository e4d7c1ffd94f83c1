//! Error types for the Fundguard facade.

use fundguard_compliance::{AuditError, BreachError};
use fundguard_config::ConfigError;
use fundguard_crypto::{CryptoError, StoreError};
use thiserror::Error;

use crate::documents::DocumentError;

#[derive(Debug, Error)]
pub enum FundguardError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Vault error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Metadata store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error("Audit error: {0}")]
    Audit(#[from] AuditError),

    #[error("Incident error: {0}")]
    Breach(#[from] BreachError),

    #[error("KYC submission not found: {0}")]
    KycNotFound(u64),
}

impl FundguardError {
    /// HTTP-style status for callers that surface errors over a CRUD API.
    pub fn status_code(&self) -> u16 {
        match self {
            FundguardError::Document(e) => e.status_code(),
            FundguardError::KycNotFound(_) | FundguardError::Breach(BreachError::NotFound(_)) => 404,
            FundguardError::Breach(BreachError::InvalidTransition(_)) => 409,
            _ => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, FundguardError>;
