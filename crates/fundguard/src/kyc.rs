//! KYC submissions: the records that own identity documents.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use fundguard_types::{RecordRef, UserId};
use serde::{Deserialize, Serialize};

use crate::documents::{DocumentSummary, OwningRecord};

pub const RECORD_TYPE: &str = "Kyc";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KycStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
    UnderReview,
}

impl KycStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            KycStatus::Pending => "pending",
            KycStatus::Approved => "approved",
            KycStatus::Rejected => "rejected",
            KycStatus::UnderReview => "under_review",
        }
    }
}

impl std::fmt::Display for KycStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user's identity verification submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KycRecord {
    pub id: u64,
    pub user_id: UserId,
    pub status: KycStatus,
    /// Blob ids of attached documents, in attachment order.
    pub document_ids: Vec<String>,
    /// Listing refreshed after each encryption pass.
    pub docs_metadata: Vec<DocumentSummary>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OwningRecord for KycRecord {
    fn record_ref(&self) -> RecordRef {
        RecordRef::new(RECORD_TYPE, self.id)
    }

    fn owner(&self) -> UserId {
        self.user_id
    }
}

impl KycRecord {
    pub fn has_document(&self, blob_id: &str) -> bool {
        self.document_ids.iter().any(|id| id == blob_id)
    }
}

/// Upload attached to a new or updated submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDocument {
    pub filename: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

impl NewDocument {
    pub fn new(
        filename: impl Into<String>,
        content_type: impl Into<String>,
        content: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Default)]
pub struct KycRepository {
    records: DashMap<u64, KycRecord>,
    next_id: AtomicU64,
}

impl KycRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, user_id: UserId, at: DateTime<Utc>) -> KycRecord {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let record = KycRecord {
            id,
            user_id,
            status: KycStatus::default(),
            document_ids: Vec::new(),
            docs_metadata: Vec::new(),
            created_at: at,
            updated_at: at,
        };
        self.records.insert(id, record.clone());
        record
    }

    pub fn get(&self, id: u64) -> Option<KycRecord> {
        self.records.get(&id).map(|r| r.value().clone())
    }

    pub fn for_user(&self, user_id: UserId) -> Vec<KycRecord> {
        let mut records: Vec<KycRecord> = self
            .records
            .iter()
            .filter(|r| r.user_id == user_id)
            .map(|r| r.value().clone())
            .collect();
        records.sort_by_key(|r| r.id);
        records
    }

    pub fn attach_documents(
        &self,
        id: u64,
        blob_ids: impl IntoIterator<Item = String>,
        at: DateTime<Utc>,
    ) -> Option<KycRecord> {
        self.update(id, at, |record| record.document_ids.extend(blob_ids))
    }

    pub fn set_status(&self, id: u64, status: KycStatus, at: DateTime<Utc>) -> Option<KycRecord> {
        self.update(id, at, |record| record.status = status)
    }

    pub fn set_docs_metadata(
        &self,
        id: u64,
        summaries: Vec<DocumentSummary>,
        at: DateTime<Utc>,
    ) -> Option<KycRecord> {
        self.update(id, at, |record| record.docs_metadata = summaries)
    }

    fn update(
        &self,
        id: u64,
        at: DateTime<Utc>,
        change: impl FnOnce(&mut KycRecord),
    ) -> Option<KycRecord> {
        let mut record = self.records.get_mut(&id)?;
        change(&mut record);
        record.updated_at = at;
        Some(record.clone())
    }
}
