//! Transparent encryption of documents attached to owning records.
//!
//! Owning-record write paths commit first and then call
//! [`DocumentEncryptionService::after_commit`], which runs the encryption
//! pass on a blocking worker or a detached thread. A failed pass is logged and reported as an
//! `encryption_failure` incident. It never reaches the write that scheduled
//! it.
//!
//! Sealing a document moves its bytes into the metadata store as an
//! [`EncryptedPayload`] and clears the stored plaintext. Reads go through
//! [`DocumentEncryptionService::decrypt`], which returns a transient view and
//! never writes plaintext back.

use std::fmt::{Debug, Display};
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use fundguard_compliance::{AuditError, Background, BreachDetector, Executor};
use fundguard_crypto::{
    CryptoError, CryptoVault, DecryptionFailure, EncryptedPayload, MetadataStore, StoreError,
};
use fundguard_types::{RecordRef, UserId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

pub const DEFAULT_MAX_DOCUMENT_BYTES: u64 = 25 * 1024 * 1024;

/// Incident component for failures while sealing.
pub const ENCRYPTION_COMPONENT: &str = "document_encryption";

/// Incident component for failures while opening.
pub const DECRYPTION_COMPONENT: &str = "document_decryption";

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Authentication required")]
    Unauthenticated,

    #[error("Access denied to document {blob_id}")]
    AccessDenied { blob_id: String },

    /// Sealed metadata is missing (expired, evicted or never written).
    /// Distinct from [`DocumentError::NotFound`].
    #[error("Ciphertext unavailable for document {0}")]
    CiphertextUnavailable(String),

    #[error("Failed to decrypt document {blob_id}: {source}")]
    Decryption {
        blob_id: String,
        #[source]
        source: DecryptionFailure,
    },

    #[error("Document {blob_id} is {size} bytes, limit is {limit}")]
    TooLarge { blob_id: String, size: u64, limit: u64 },

    #[error("Encryption failed: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Metadata store error: {0}")]
    Store(#[from] StoreError),

    #[error("Document repository error: {0}")]
    Repository(String),

    #[error("Audit error: {0}")]
    Audit(#[from] AuditError),
}

impl DocumentError {
    /// HTTP-style status for the CRUD layer. Anything that exists but cannot
    /// be opened is a server error, never a 404.
    pub fn status_code(&self) -> u16 {
        match self {
            DocumentError::NotFound(_) => 404,
            DocumentError::Unauthenticated => 401,
            DocumentError::AccessDenied { .. } => 403,
            DocumentError::TooLarge { .. } => 413,
            DocumentError::CiphertextUnavailable(_)
            | DocumentError::Decryption { .. }
            | DocumentError::Crypto(_)
            | DocumentError::Store(_)
            | DocumentError::Repository(_)
            | DocumentError::Audit(_) => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, DocumentError>;

// ============================================================================
// Documents
// ============================================================================

/// A record that owns attached documents.
pub trait OwningRecord {
    fn record_ref(&self) -> RecordRef;

    /// User whose documents these are.
    fn owner(&self) -> UserId;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub encrypted: bool,
}

/// A file attached to an owning record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    blob_id: String,
    attached_to: RecordRef,
    filename: String,
    content_type: String,
    byte_size: u64,
    checksum: String,
    created_at: DateTime<Utc>,
    metadata: DocumentMetadata,
    /// Plaintext until sealed, then empty.
    content: Vec<u8>,
}

impl Document {
    pub fn new(
        attached_to: RecordRef,
        filename: impl Into<String>,
        content_type: impl Into<String>,
        content: Vec<u8>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            blob_id: Uuid::new_v4().to_string(),
            attached_to,
            filename: filename.into(),
            content_type: content_type.into(),
            byte_size: content.len() as u64,
            checksum: sha256_hex(&content),
            created_at,
            metadata: DocumentMetadata::default(),
            content,
        }
    }

    pub fn blob_id(&self) -> &str {
        &self.blob_id
    }

    pub fn attached_to(&self) -> &RecordRef {
        &self.attached_to
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Extension of the uploaded file name, without the dot. `None` for
    /// names like `sh` or `.profile`.
    pub fn extension(&self) -> Option<&str> {
        Path::new(&self.filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .filter(|ext| !ext.is_empty())
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn byte_size(&self) -> u64 {
        self.byte_size
    }

    /// SHA-256 of the original content, hex encoded.
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn metadata(&self) -> &DocumentMetadata {
        &self.metadata
    }

    pub fn is_encrypted(&self) -> bool {
        self.metadata.encrypted
    }

    /// Bytes held in document storage. Empty once the document is sealed.
    pub fn stored_content(&self) -> &[u8] {
        &self.content
    }

    pub fn summary(&self) -> DocumentSummary {
        DocumentSummary {
            filename: self.filename.clone(),
            content_type: self.content_type.clone(),
            byte_size: self.byte_size,
            checksum: self.checksum.clone(),
            created_at: self.created_at,
            encrypted_blob_id: self.blob_id.clone(),
        }
    }

    fn seal(&mut self) {
        self.content = Vec::new();
        self.metadata.encrypted = true;
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Listing entry kept on the owning record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub filename: String,
    pub content_type: String,
    pub byte_size: u64,
    pub checksum: String,
    pub created_at: DateTime<Utc>,
    pub encrypted_blob_id: String,
}

/// Transient plaintext view returned by an authorized read.
#[derive(Clone, PartialEq, Eq)]
pub struct DecryptedDocument {
    pub filename: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

impl Debug for DecryptedDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecryptedDocument")
            .field("filename", &self.filename)
            .field("content_type", &self.content_type)
            .field("content", &format_args!("[{} bytes]", self.content.len()))
            .finish()
    }
}

// ============================================================================
// Repository
// ============================================================================

/// Storage for documents, keyed by blob id.
pub trait DocumentRepository: Send + Sync + Debug {
    fn find(&self, blob_id: &str) -> Result<Option<Document>>;

    fn save(&self, document: Document) -> Result<()>;

    /// Documents attached to `owner`, oldest first.
    fn attached_to(&self, owner: &RecordRef) -> Result<Vec<Document>>;
}

#[derive(Debug, Default)]
pub struct InMemoryDocumentRepository {
    documents: DashMap<String, Document>,
}

impl InMemoryDocumentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

impl DocumentRepository for InMemoryDocumentRepository {
    fn find(&self, blob_id: &str) -> Result<Option<Document>> {
        Ok(self.documents.get(blob_id).map(|d| d.value().clone()))
    }

    fn save(&self, document: Document) -> Result<()> {
        self.documents.insert(document.blob_id.clone(), document);
        Ok(())
    }

    fn attached_to(&self, owner: &RecordRef) -> Result<Vec<Document>> {
        let mut attached: Vec<Document> = self
            .documents
            .iter()
            .filter(|d| &d.attached_to == owner)
            .map(|d| d.value().clone())
            .collect();
        attached.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.blob_id.cmp(&b.blob_id))
        });
        Ok(attached)
    }
}

// ============================================================================
// Encryption service
// ============================================================================

/// Outcome of one encryption pass over an owning record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncryptionPass {
    pub encrypted: Vec<String>,
    /// Already sealed before the pass reached them.
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
    /// Fresh listing for every attached document.
    pub summaries: Vec<DocumentSummary>,
}

/// Seals documents after their owning record commits and opens them for
/// authorized readers.
#[derive(Debug)]
pub struct DocumentEncryptionService {
    vault: CryptoVault,
    metadata: Arc<dyn MetadataStore>,
    documents: Arc<dyn DocumentRepository>,
    detector: Option<Arc<BreachDetector>>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    executor: Option<Executor>,
    max_document_bytes: u64,
}

impl DocumentEncryptionService {
    pub fn new(
        vault: CryptoVault,
        metadata: Arc<dyn MetadataStore>,
        documents: Arc<dyn DocumentRepository>,
    ) -> Self {
        Self {
            vault,
            metadata,
            documents,
            detector: None,
            locks: DashMap::new(),
            executor: None,
            max_document_bytes: DEFAULT_MAX_DOCUMENT_BYTES,
        }
    }

    /// Report failures as `encryption_failure` incidents.
    pub fn with_detector(mut self, detector: Arc<BreachDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    /// Run post-commit passes here instead of on the executor current at
    /// scheduling time.
    pub fn with_executor(mut self, executor: Executor) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_max_document_bytes(mut self, limit: u64) -> Self {
        self.max_document_bytes = limit;
        self
    }

    pub fn documents(&self) -> &Arc<dyn DocumentRepository> {
        &self.documents
    }

    /// Schedule a pass over `owner` without blocking the caller.
    ///
    /// Inside a tokio runtime the pass runs on a blocking worker, outside one
    /// on a detached thread. `on_complete` receives the pass result so the
    /// owner can store the refreshed listing.
    pub fn after_commit(
        self: &Arc<Self>,
        owner: RecordRef,
        on_complete: impl FnOnce(EncryptionPass) + Send + 'static,
    ) -> Background {
        let service = Arc::clone(self);
        let job = move || match service.encrypt_pending(&owner) {
            Ok(pass) => on_complete(pass),
            Err(e) => tracing::error!(owner = %owner, error = %e, "encryption pass aborted"),
        };

        self.executor
            .clone()
            .unwrap_or_else(Executor::current)
            .spawn("document-encryption", job)
    }

    /// Seal every attached document that is not sealed yet.
    ///
    /// Per-document failures are logged, reported and listed in the result.
    /// Only a failure to enumerate the documents is returned as an error.
    pub fn encrypt_pending(&self, owner: &RecordRef) -> Result<EncryptionPass> {
        let mut pass = EncryptionPass::default();

        for document in self.documents.attached_to(owner)? {
            let blob_id = document.blob_id.clone();
            if document.is_encrypted() {
                pass.skipped.push(blob_id);
                continue;
            }

            match self.encrypt_document(&blob_id) {
                Ok(true) => pass.encrypted.push(blob_id),
                Ok(false) => pass.skipped.push(blob_id),
                Err(e) => {
                    tracing::error!(blob_id = %blob_id, error = %e, "failed to encrypt document");
                    self.report_failure(ENCRYPTION_COMPONENT, &e);
                    pass.failed.push(blob_id);
                }
            }
        }

        pass.summaries = self
            .documents
            .attached_to(owner)?
            .iter()
            .map(Document::summary)
            .collect();

        tracing::info!(
            owner = %owner,
            encrypted = pass.encrypted.len(),
            skipped = pass.skipped.len(),
            failed = pass.failed.len(),
            "encryption pass finished"
        );
        Ok(pass)
    }

    /// Seal one document. Returns `false` if it was already sealed.
    ///
    /// Passes over the same document are serialized, and the flag is checked
    /// again under the lock, so concurrent triggers seal it exactly once.
    pub fn encrypt_document(&self, blob_id: &str) -> Result<bool> {
        let lock = self.locks.entry(blob_id.to_string()).or_default().value().clone();
        let sealed = {
            let _guard = lock.lock();
            self.encrypt_locked(blob_id)
        };
        drop(lock);
        // Only the map holds it now: nobody is waiting on this document.
        self.locks
            .remove_if(blob_id, |_, lock| Arc::strong_count(lock) == 1);
        sealed
    }

    fn encrypt_locked(&self, blob_id: &str) -> Result<bool> {
        let mut document = self
            .documents
            .find(blob_id)?
            .ok_or_else(|| DocumentError::NotFound(format!("Document#{blob_id}")))?;
        if document.is_encrypted() {
            return Ok(false);
        }
        if document.byte_size > self.max_document_bytes {
            return Err(DocumentError::TooLarge {
                blob_id: blob_id.to_string(),
                size: document.byte_size,
                limit: self.max_document_bytes,
            });
        }

        let payload = self.vault.encrypt(&document.content)?;
        // Metadata first: a crash before the flag flips leaves a readable
        // plaintext document and a harmless orphan payload.
        self.metadata.store_metadata(blob_id, &payload)?;
        document.seal();
        self.documents.save(document)?;

        tracing::debug!(blob_id = %blob_id, "document sealed");
        Ok(true)
    }

    /// Open a document for a caller that has already been authorized.
    pub fn decrypt(&self, document: &Document) -> Result<DecryptedDocument> {
        if !document.is_encrypted() {
            return Ok(DecryptedDocument {
                filename: document.filename.clone(),
                content_type: document.content_type.clone(),
                content: document.content.clone(),
            });
        }

        let payload: EncryptedPayload = self
            .metadata
            .retrieve_metadata(&document.blob_id)?
            .ok_or_else(|| {
                tracing::error!(blob_id = %document.blob_id, "sealed metadata missing");
                DocumentError::CiphertextUnavailable(document.blob_id.clone())
            })?;

        let content = self.vault.decrypt(&payload).map_err(|source| {
            tracing::error!(blob_id = %document.blob_id, error = %source, "failed to decrypt document");
            self.report_failure(DECRYPTION_COMPONENT, &source);
            DocumentError::Decryption {
                blob_id: document.blob_id.clone(),
                source,
            }
        })?;

        Ok(DecryptedDocument {
            filename: document.filename.clone(),
            content_type: document.content_type.clone(),
            content,
        })
    }

    fn report_failure(&self, component: &str, error: &dyn Display) {
        if let Some(detector) = &self.detector {
            if let Err(e) = detector.detect_encryption_failure(component, &error.to_string()) {
                tracing::error!(component, error = %e, "failed to record encryption incident");
            }
        }
    }
}
