//! Main entry point for the Fundguard compliance core.
//!
//! The `Fundguard` struct wires the document vault, the audit trail and the
//! breach detector together from a [`FundguardConfig`] and exposes the
//! operations the platform's write and read paths call.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, Utc};
use fundguard_compliance::detection::KYC_DOCUMENTS;
use fundguard_compliance::{
    AdminDirectory, AuditLogger, AuditReport, Background, Breach, BreachDetector, BreachNotifier,
    BreachSummary, DetectionRules, IncidentStore, LogNotifier, NotificationDispatcher, PatternTag,
    PatternThresholds, TransactionLog,
};
use fundguard_config::{AuditConfig, ConfigError, DetectionConfig, FundguardConfig, VaultConfig};
use fundguard_crypto::{
    CryptoVault, EnvKeyProvider, ExpiringMetadataStore, FileMetadataStore, InMemoryMetadataStore,
    KeyProvider, MetadataStore,
};
use fundguard_types::{Actor, Clock, RequestContext, SystemClock, UserId};

use crate::access::{authorize_document_read, can_read_documents};
use crate::documents::{
    DecryptedDocument, Document, DocumentEncryptionService, DocumentError, DocumentRepository,
    DocumentSummary, InMemoryDocumentRepository, OwningRecord,
};
use crate::error::{FundguardError, Result};
use crate::kyc::{KycRecord, KycRepository, NewDocument};

/// Builder for [`Fundguard`]. Every override is optional; anything not
/// supplied is derived from the configuration.
#[derive(Debug)]
pub struct FundguardBuilder {
    config: FundguardConfig,
    clock: Option<Arc<dyn Clock>>,
    keys: Option<Arc<dyn KeyProvider>>,
    metadata: Option<Arc<dyn MetadataStore>>,
    notifier: Option<Arc<dyn BreachNotifier>>,
}

impl FundguardBuilder {
    pub fn new(config: FundguardConfig) -> Self {
        Self {
            config,
            clock: None,
            keys: None,
            metadata: None,
            notifier: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Use this key source instead of reading `vault.key_env_var`.
    pub fn with_key_provider(mut self, keys: Arc<dyn KeyProvider>) -> Self {
        self.keys = Some(keys);
        self
    }

    pub fn with_metadata_store(mut self, store: Arc<dyn MetadataStore>) -> Self {
        self.metadata = Some(store);
        self
    }

    /// Deliver alerts through `notifier`. Ignored when notifications are
    /// disabled in the configuration.
    pub fn with_notifier(mut self, notifier: Arc<dyn BreachNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn build(self) -> Result<Fundguard> {
        let config = self.config;
        config.validate()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let keys = match self.keys {
            Some(keys) => keys,
            None => Arc::new(EnvKeyProvider::from_env(
                &config.vault.key_env_var,
                config.vault.allow_ephemeral_key,
            )?),
        };
        let metadata = match self.metadata {
            Some(store) => store,
            None => metadata_store(&config.vault, Arc::clone(&clock))?,
        };

        let audit = Arc::new(TransactionLog::with_clock(Arc::clone(&clock)));
        let incidents = Arc::new(IncidentStore::with_clock(Arc::clone(&clock)));

        let mut detector = BreachDetector::new(detection_rules(&config.detection)?, incidents)
            .with_clock(Arc::clone(&clock))
            .with_audit_log(Arc::clone(&audit));
        if config.notifications.enabled {
            let notifier = self.notifier.unwrap_or_else(|| {
                Arc::new(LogNotifier::new(AdminDirectory::from_emails(
                    config.notifications.admin_emails.iter().cloned(),
                )))
            });
            detector = detector.with_notifier(NotificationDispatcher::new(notifier));
        }
        let detector = Arc::new(detector);

        let documents = Arc::new(InMemoryDocumentRepository::new());
        let vault = Arc::new(
            DocumentEncryptionService::new(
                CryptoVault::new(keys),
                metadata,
                Arc::clone(&documents) as Arc<dyn DocumentRepository>,
            )
            .with_detector(Arc::clone(&detector))
            .with_max_document_bytes(config.vault.max_document_bytes),
        );

        let thresholds = pattern_thresholds(&config.audit, &config.detection)?;

        tracing::info!(
            notifications = config.notifications.enabled,
            metadata_dir = ?config.vault.metadata_dir,
            metadata_ttl_secs = ?config.vault.metadata_ttl_secs,
            "fundguard initialized"
        );

        Ok(Fundguard {
            config,
            clock,
            audit,
            detector,
            documents,
            kycs: Arc::new(KycRepository::new()),
            vault,
            thresholds,
        })
    }
}

/// Pick the metadata store the vault section asks for.
///
/// A TTL always means an expiring store; a directory without a TTL means a
/// file store; otherwise entries live in memory for the process lifetime.
pub fn metadata_store(
    config: &VaultConfig,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn MetadataStore>> {
    match (config.metadata_ttl_secs, &config.metadata_dir) {
        (Some(ttl), dir) => {
            if dir.is_some() {
                tracing::warn!(
                    ?dir,
                    ttl_secs = ttl,
                    "metadata_ttl_secs overrides metadata_dir; metadata will not be persisted"
                );
            }
            let ttl = seconds("vault.metadata_ttl_secs", ttl)?;
            Ok(Arc::new(ExpiringMetadataStore::with_clock(ttl, clock)))
        }
        (None, Some(dir)) => Ok(Arc::new(FileMetadataStore::open(dir)?)),
        (None, None) => Ok(Arc::new(InMemoryMetadataStore::new())),
    }
}

pub fn detection_rules(config: &DetectionConfig) -> Result<DetectionRules> {
    Ok(DetectionRules::builder()
        .suspicious_ranges(config.ip_ranges()?)
        .suspicious_agents(&config.suspicious_user_agents)
        .request_rate_limit(config.request_rate_limit)
        .rate_window(seconds("detection.rate_window_secs", config.rate_window_secs)?)
        .bulk_record_threshold(config.bulk_record_threshold)
        .bulk_download_threshold(config.bulk_download_threshold)
        .disallowed_extensions(&config.disallowed_extensions)
        .working_hours(config.quiet_hours_start, config.quiet_hours_end)
        .local_offset(utc_offset(config.utc_offset_minutes)?)
        .build())
}

/// Audit thresholds share working hours and offset with detection.
pub fn pattern_thresholds(
    audit: &AuditConfig,
    detection: &DetectionConfig,
) -> Result<PatternThresholds> {
    Ok(PatternThresholds {
        window: seconds("audit.suspicious_window_secs", audit.suspicious_window_secs)?,
        download_threshold: audit.download_threshold,
        off_hours_threshold: audit.off_hours_threshold,
        rapid_window: seconds("audit.rapid_window_secs", audit.rapid_window_secs)?,
        rapid_action_threshold: audit.rapid_action_threshold,
        day_start_hour: detection.quiet_hours_start,
        day_end_hour: detection.quiet_hours_end,
        local_offset: utc_offset(detection.utc_offset_minutes)?,
    })
}

fn seconds(field: &str, secs: u64) -> Result<Duration> {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .ok_or_else(|| {
            ConfigError::ValidationError(format!("{field} out of range: {secs}")).into()
        })
}

fn utc_offset(minutes: i32) -> Result<FixedOffset> {
    FixedOffset::east_opt(minutes * 60).ok_or_else(|| {
        ConfigError::ValidationError(format!("utc_offset_minutes out of range: {minutes}")).into()
    })
}

/// A committed KYC write and its pending encryption pass.
#[derive(Debug)]
pub struct KycSubmission {
    pub record: KycRecord,
    /// The scheduled pass. `record` is the state at commit time; once the
    /// pass finishes, [`Fundguard::kyc`] returns the refreshed listing.
    pub encryption: Background,
}

/// The compliance core: document vault, audit trail and breach detection.
#[derive(Debug)]
pub struct Fundguard {
    config: FundguardConfig,
    clock: Arc<dyn Clock>,
    audit: Arc<TransactionLog>,
    detector: Arc<BreachDetector>,
    documents: Arc<InMemoryDocumentRepository>,
    kycs: Arc<KycRepository>,
    vault: Arc<DocumentEncryptionService>,
    thresholds: PatternThresholds,
}

impl Fundguard {
    pub fn builder(config: FundguardConfig) -> FundguardBuilder {
        FundguardBuilder::new(config)
    }

    /// Build with everything derived from `config`.
    pub fn open(config: FundguardConfig) -> Result<Self> {
        FundguardBuilder::new(config).build()
    }

    pub fn config(&self) -> &FundguardConfig {
        &self.config
    }

    pub fn audit_log(&self) -> &Arc<TransactionLog> {
        &self.audit
    }

    pub fn detector(&self) -> &Arc<BreachDetector> {
        &self.detector
    }

    pub fn incidents(&self) -> &Arc<IncidentStore> {
        self.detector.incidents()
    }

    pub fn documents(&self) -> &Arc<InMemoryDocumentRepository> {
        &self.documents
    }

    pub fn encryption(&self) -> &Arc<DocumentEncryptionService> {
        &self.vault
    }

    pub fn kycs(&self) -> &Arc<KycRepository> {
        &self.kycs
    }

    pub fn thresholds(&self) -> &PatternThresholds {
        &self.thresholds
    }

    /// Request-scoped audit logger.
    pub fn audit_logger(&self, actor: Option<&Actor>, ctx: &RequestContext) -> AuditLogger {
        AuditLogger::new(Arc::clone(&self.audit), actor.cloned(), ctx.clone())
    }

    /// Count the request against its address and evaluate the
    /// unauthorized-access rules.
    pub fn screen_request(
        &self,
        ctx: &RequestContext,
        actor: Option<&Actor>,
    ) -> Result<Option<Breach>> {
        self.detector.record_request(ctx);
        Ok(self.detector.detect_unauthorized_access(ctx, actor)?)
    }

    /// Audit a login attempt. A failure also raises an incident.
    pub fn record_login_attempt(
        &self,
        ctx: &RequestContext,
        email: &str,
        success: bool,
        reason: Option<&str>,
    ) -> Result<Option<Breach>> {
        self.audit_logger(None, ctx)
            .log_login_attempt(email, success, reason)?;
        if success {
            return Ok(None);
        }
        Ok(Some(
            self.detector.detect_failed_authentication(ctx, email, reason)?,
        ))
    }

    /// Create a KYC submission for `actor` and schedule encryption of its
    /// documents once the record is committed.
    pub fn submit_kyc(
        &self,
        actor: &Actor,
        ctx: &RequestContext,
        uploads: Vec<NewDocument>,
    ) -> Result<KycSubmission> {
        let record = self.kycs.create(actor.id, self.clock.now());
        tracing::info!(kyc_id = record.id, user = %actor.id, "kyc submitted");
        self.attach(record, actor, ctx, uploads, "submitted")
    }

    /// Attach more documents to an existing submission. Documents sealed by
    /// an earlier pass are left untouched.
    pub fn add_kyc_documents(
        &self,
        actor: &Actor,
        ctx: &RequestContext,
        kyc_id: u64,
        uploads: Vec<NewDocument>,
    ) -> Result<KycSubmission> {
        let record = self.kyc(kyc_id)?;
        if !can_read_documents(actor, record.owner()) {
            return Err(DocumentError::AccessDenied {
                blob_id: record.record_ref().to_string(),
            }
            .into());
        }
        self.attach(record, actor, ctx, uploads, "updated")
    }

    pub fn kyc(&self, kyc_id: u64) -> Result<KycRecord> {
        self.kycs.get(kyc_id).ok_or(FundguardError::KycNotFound(kyc_id))
    }

    /// Listing of a submission's documents for an authorized viewer.
    pub fn list_documents(
        &self,
        actor: Option<&Actor>,
        ctx: &RequestContext,
        kyc_id: u64,
    ) -> Result<Vec<DocumentSummary>> {
        let record = self.kyc(kyc_id)?;
        authorize_document_read(actor, record.owner(), &record.record_ref().to_string())?;
        self.audit_logger(actor, ctx)
            .log_kyc_view(&record.record_ref())?;
        Ok(record.docs_metadata)
    }

    /// Authorized read of one attached document.
    ///
    /// Authorization runs before the vault is touched. A successful read is
    /// audited as `kyc_download` and checked against the download rules.
    pub fn read_document(
        &self,
        actor: Option<&Actor>,
        ctx: &RequestContext,
        kyc_id: u64,
        blob_id: &str,
    ) -> Result<DecryptedDocument> {
        let record = self
            .kycs
            .get(kyc_id)
            .ok_or_else(|| DocumentError::NotFound(format!("Kyc#{kyc_id}")))?;
        authorize_document_read(actor, record.owner(), blob_id)?;

        let document = self
            .documents
            .find(blob_id)?
            .filter(|_| record.has_document(blob_id))
            .ok_or_else(|| DocumentError::NotFound(format!("Document#{blob_id}")))?;

        let decrypted = self.vault.decrypt(&document)?;

        self.audit_logger(actor, ctx).log_kyc_download(
            &record.record_ref(),
            document.content_type(),
            decrypted.content.len() as u64,
        )?;
        self.check_download(ctx, actor, &document);

        Ok(decrypted)
    }

    /// Pattern tags for `user` over the configured window ending now.
    pub fn suspicious_activity(&self, user: UserId) -> BTreeSet<PatternTag> {
        self.audit.detect_suspicious_activity(user, &self.thresholds)
    }

    pub fn audit_report(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        actor: Option<UserId>,
    ) -> AuditReport {
        self.audit.generate_report(start, end, actor)
    }

    /// Report over the configured default number of trailing days.
    pub fn recent_audit_report(&self, actor: Option<UserId>) -> AuditReport {
        self.audit
            .generate_recent_report(self.config.audit.report_default_days, actor)
    }

    pub fn incident_summary(&self) -> BreachSummary {
        self.incidents().summary(self.clock.now())
    }

    /// Mail the last 24 hours of incidents to administrators, if any.
    pub fn dispatch_incident_summary(&self) -> Option<Background> {
        self.detector.dispatch_recent_summary()
    }

    fn attach(
        &self,
        record: KycRecord,
        actor: &Actor,
        ctx: &RequestContext,
        uploads: Vec<NewDocument>,
        access_type: &str,
    ) -> Result<KycSubmission> {
        let now = self.clock.now();
        let owner = record.record_ref();

        let mut blob_ids = Vec::with_capacity(uploads.len());
        for upload in uploads {
            let document = Document::new(
                owner.clone(),
                upload.filename,
                upload.content_type,
                upload.content,
                now,
            );
            blob_ids.push(document.blob_id().to_string());
            self.documents.save(document)?;
        }
        let record = self
            .kycs
            .attach_documents(record.id, blob_ids, now)
            .ok_or(FundguardError::KycNotFound(record.id))?;

        self.audit_logger(Some(actor), ctx)
            .log_kyc_access(&owner, access_type)?;

        let kycs = Arc::clone(&self.kycs);
        let clock = Arc::clone(&self.clock);
        let kyc_id = record.id;
        let encryption = self.vault.after_commit(owner, move |pass| {
            if kycs
                .set_docs_metadata(kyc_id, pass.summaries, clock.now())
                .is_none()
            {
                tracing::warn!(kyc_id, "kyc removed before its encryption pass finished");
            }
        });

        let record = self.kycs.get(kyc_id).unwrap_or(record);
        Ok(KycSubmission { record, encryption })
    }

    fn check_download(&self, ctx: &RequestContext, actor: Option<&Actor>, document: &Document) {
        if let Err(e) = self
            .detector
            .detect_suspicious_data_access(ctx, actor, KYC_DOCUMENTS, None)
        {
            tracing::error!(error = %e, "failed to evaluate data access rules");
        }
        let Some(extension) = document.extension() else {
            return;
        };
        if let Err(e) = self
            .detector
            .detect_unusual_download(ctx, actor, extension, 1)
        {
            tracing::error!(error = %e, "failed to evaluate download rules");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fundguard_crypto::{EncryptionKey, StaticKeyProvider};
    use fundguard_types::Role;

    fn static_keys() -> Arc<dyn KeyProvider> {
        Arc::new(StaticKeyProvider::new(EncryptionKey::from_bytes([5u8; 32])))
    }

    #[test]
    fn test_open_development_config() {
        let fundguard = Fundguard::builder(FundguardConfig::development())
            .with_key_provider(static_keys())
            .build()
            .expect("development config builds");
        assert!(fundguard.incidents().is_empty());
        assert_eq!(fundguard.thresholds().download_threshold, 10);
    }

    #[test]
    fn test_production_requires_configured_key() {
        let mut config = FundguardConfig::production();
        config.vault.key_env_var = "FUNDGUARD_TEST_KEY_THAT_IS_NEVER_SET".to_string();
        let err = Fundguard::open(config).expect_err("no key");
        assert!(matches!(err, FundguardError::Crypto(_)));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = FundguardConfig::development();
        config.detection.suspicious_ip_ranges = vec!["not-a-range".to_string()];
        let err = Fundguard::builder(config)
            .with_key_provider(static_keys())
            .build()
            .expect_err("bad range");
        assert!(matches!(err, FundguardError::Config(_)));
    }

    #[test]
    fn test_metadata_store_selection() {
        let dir = tempfile::tempdir().expect("tempdir");
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let mut vault = VaultConfig::default();
        let store = metadata_store(&vault, Arc::clone(&clock)).expect("memory");
        assert!(format!("{store:?}").starts_with("InMemoryMetadataStore"));

        vault.metadata_dir = Some(dir.path().join("metadata"));
        let store = metadata_store(&vault, Arc::clone(&clock)).expect("file");
        assert!(format!("{store:?}").starts_with("FileMetadataStore"));

        vault.metadata_ttl_secs = Some(60);
        let store = metadata_store(&vault, clock).expect("expiring");
        assert!(format!("{store:?}").starts_with("ExpiringMetadataStore"));
    }

    #[test]
    fn test_detection_rules_follow_config() {
        let mut config = DetectionConfig::default();
        config.suspicious_user_agents = vec!["Headless".to_string()];
        config.bulk_download_threshold = 3;
        config.utc_offset_minutes = 120;
        let rules = detection_rules(&config).expect("valid");

        assert!(rules.is_suspicious_agent("Mozilla HeadlessChrome"));
        assert!(!rules.is_suspicious_agent("curl/8.0"));
        assert_eq!(rules.bulk_download_threshold(), 3);

        let thresholds = pattern_thresholds(&AuditConfig::default(), &config).expect("valid");
        assert_eq!(thresholds.local_offset.local_minus_utc(), 7200);
    }

    #[test]
    fn test_failed_login_raises_incident() {
        let fundguard = Fundguard::builder(FundguardConfig::development())
            .with_key_provider(static_keys())
            .build()
            .expect("builds");
        let ctx = RequestContext::system().with_user_agent("Mozilla/5.0");

        let ok = fundguard
            .record_login_attempt(&ctx, "a@example.com", true, None)
            .expect("audit");
        assert!(ok.is_none());
        let breach = fundguard
            .record_login_attempt(&ctx, "a@example.com", false, Some("bad password"))
            .expect("audit")
            .expect("incident");
        assert_eq!(breach.metadata["activity"], "failed_authentication");

        let actions: Vec<String> = fundguard
            .audit_log()
            .entries()
            .into_iter()
            .map(|e| e.action)
            .collect();
        assert!(actions.contains(&"login_success".to_string()));
        assert!(actions.contains(&"login_failed".to_string()));
        assert!(actions.contains(&"breach_detected".to_string()));
    }

    #[test]
    fn test_screen_request_ignores_signed_in_actor() {
        let fundguard = Fundguard::builder(FundguardConfig::development())
            .with_key_provider(static_keys())
            .build()
            .expect("builds");
        let ctx = RequestContext::system().with_user_agent("python-requests scraper");
        let actor = Actor::new(1u64, "a@example.com", Role::Investor);

        assert!(fundguard.screen_request(&ctx, Some(&actor)).expect("screen").is_none());
        assert!(fundguard.screen_request(&ctx, None).expect("screen").is_some());
    }

    #[test]
    fn test_missing_kyc_is_not_found() {
        let fundguard = Fundguard::builder(FundguardConfig::development())
            .with_key_provider(static_keys())
            .build()
            .expect("builds");
        let actor = Actor::new(1u64, "a@example.com", Role::Admin);
        let err = fundguard
            .read_document(Some(&actor), &RequestContext::system(), 42, "blob")
            .expect_err("missing");
        assert_eq!(err.status_code(), 404);
    }
}
