//! # Fundguard
//!
//! Compliance core for a startup-funding platform.
//!
//! Identity documents uploaded with KYC submissions are sealed with
//! AES-256-GCM after the submission commits, every access to personal data
//! lands in an append-only audit trail, and a set of detection rules raises
//! typed incidents that are mailed to administrators.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           Fundguard                           │
//! │  ┌───────────┐   ┌──────────────┐   ┌────────────────────┐   │
//! │  │ KYC write │ → │ after_commit │ → │ CryptoVault + meta │   │
//! │  └───────────┘   └──────────────┘   └────────────────────┘   │
//! │  ┌───────────┐   ┌──────────────┐   ┌────────────────────┐   │
//! │  │   read    │ → │ authorize    │ → │ decrypt → audit    │   │
//! │  └───────────┘   └──────────────┘   └────────────────────┘   │
//! │                 BreachDetector → IncidentStore → notifier     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use fundguard::{Fundguard, FundguardConfig, NewDocument};
//!
//! let fundguard = Fundguard::open(FundguardConfig::load()?)?;
//!
//! let submission = fundguard.submit_kyc(
//!     &actor,
//!     &ctx,
//!     vec![NewDocument::new("passport.pdf", "application/pdf", bytes)],
//! )?;
//!
//! let blob_id = &submission.record.document_ids[0];
//! let doc = fundguard.read_document(Some(&actor), &ctx, submission.record.id, blob_id)?;
//! ```
//!
//! # Modules
//!
//! - **Facade**: [`Fundguard`], [`FundguardBuilder`]
//! - **Documents**: [`documents`], [`kyc`], [`access`]
//! - **Monitoring**: re-exported from `fundguard-compliance`

pub mod access;
pub mod documents;
mod error;
mod fundguard;
pub mod kyc;

pub use error::{FundguardError, Result};
pub use fundguard::{
    Fundguard, FundguardBuilder, KycSubmission, detection_rules, metadata_store,
    pattern_thresholds,
};

pub use documents::{
    DecryptedDocument, Document, DocumentEncryptionService, DocumentError, DocumentRepository,
    DocumentSummary, EncryptionPass, InMemoryDocumentRepository, OwningRecord,
};
pub use kyc::{KycRecord, KycRepository, KycStatus, NewDocument};

// Re-export foundation types
pub use fundguard_types::{
    Actor, Clock, IpRange, ManualClock, RecordRef, RequestContext, Role, SystemClock, UserId,
};

// Re-export configuration
pub use fundguard_config::{ConfigError, FundguardConfig};

// Re-export vault primitives
pub use fundguard_crypto::{
    CryptoVault, EncryptedPayload, EncryptionKey, KeyProvider, MetadataStore, StaticKeyProvider,
};

// Re-export monitoring
pub use fundguard_compliance::{
    AuditLogger, AuditReport, Background, Breach, BreachNotifier, BreachStatus, BreachSummary,
    BreachType, Executor, IncidentStore, MemoryNotifier, PatternTag, RiskLevel, Severity,
    TransactionLog, TransactionLogEntry,
};
