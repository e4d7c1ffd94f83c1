//! Append-only audit trail for data-protection relevant actions.
//!
//! # Architecture
//!
//! ```text
//! TransactionLog = {
//!     entries: RwLock<Vec<TransactionLogEntry>>,  // append-only
//!     record(actor, action, subject, details, ctx) -> Entry,
//!     query(filter) -> Vec<Entry>,
//!     detect_suspicious_activity(actor) -> {PatternTag},
//!     generate_report(start, end, actor?) -> AuditReport,
//! }
//! ```
//!
//! [`TransactionLog::record`] is the single write primitive. Everything else
//! goes through [`AuditLogger`], whose named wrappers map an [`AuditAction`]
//! onto a conventional action string and details shape.
//!
//! The log exposes no update or delete operation. Entries are timestamped
//! under the write lock and never move backwards in time, so the entries of a
//! single actor are always ordered by `created_at`.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use fundguard_compliance::audit::{AuditLogger, RiskLevel, TransactionLog};
//! use fundguard_types::{Actor, RecordRef, RequestContext, Role};
//!
//! let log = Arc::new(TransactionLog::new());
//! let alice = Actor::new(7, "alice@example.com", Role::Investor);
//! let logger = AuditLogger::new(log.clone(), Some(alice), RequestContext::system());
//!
//! let entry = logger
//!     .log_data_download(&RecordRef::new("Kyc", 3), "pdf", 52_000)
//!     .expect("valid entry")
//!     .expect("actor present");
//!
//! assert_eq!(entry.action, "data_download");
//! assert_eq!(entry.risk_level(), RiskLevel::High);
//! assert_eq!(log.len(), 1);
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Offset, Timelike, Utc};
use fundguard_types::{Actor, Clock, RecordRef, RequestContext, SystemClock, UserId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;
use uuid::Uuid;

use crate::breach::Breach;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Invalid audit entry: {0}")]
    Validation(String),

    #[error("Audit entry not found: {0}")]
    EntryNotFound(Uuid),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AuditError>;

// ============================================================================
// Risk classification
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of a stored action string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    DataAccess,
    DataDownload,
    DataExport,
    KycAccess,
    KycView,
    KycDownload,
    /// `consent_<decision>`
    Consent,
    /// `admin_<name>`
    Admin,
    LoginSuccess,
    LoginFailed,
    BreachDetected,
    ProfileUpdated,
    PasswordChanged,
    DeletionRequested,
    /// Any action string written through the raw primitive.
    Other,
}

impl ActionKind {
    pub fn classify(action: &str) -> Self {
        match action {
            "data_access" => ActionKind::DataAccess,
            "data_download" => ActionKind::DataDownload,
            "data_export" => ActionKind::DataExport,
            "kyc_access" => ActionKind::KycAccess,
            "kyc_view" => ActionKind::KycView,
            "kyc_download" => ActionKind::KycDownload,
            "login_success" => ActionKind::LoginSuccess,
            "login_failed" => ActionKind::LoginFailed,
            "breach_detected" => ActionKind::BreachDetected,
            "profile_updated" => ActionKind::ProfileUpdated,
            "password_changed" => ActionKind::PasswordChanged,
            "deletion_requested" => ActionKind::DeletionRequested,
            a if a.starts_with("consent_") => ActionKind::Consent,
            a if a.starts_with("admin_") => ActionKind::Admin,
            _ => ActionKind::Other,
        }
    }

    pub fn risk_level(self) -> RiskLevel {
        match self {
            ActionKind::DataDownload | ActionKind::DataExport | ActionKind::KycDownload => {
                RiskLevel::High
            }
            ActionKind::DataAccess | ActionKind::KycAccess => RiskLevel::Medium,
            ActionKind::KycView
            | ActionKind::Consent
            | ActionKind::Admin
            | ActionKind::LoginSuccess
            | ActionKind::LoginFailed
            | ActionKind::BreachDetected
            | ActionKind::ProfileUpdated
            | ActionKind::PasswordChanged
            | ActionKind::DeletionRequested
            | ActionKind::Other => RiskLevel::Low,
        }
    }

    /// Actions that touch personal data directly.
    pub fn is_sensitive(self) -> bool {
        matches!(
            self,
            ActionKind::DataAccess
                | ActionKind::DataDownload
                | ActionKind::DataExport
                | ActionKind::KycView
                | ActionKind::KycDownload
        )
    }

    /// Actions counted as administrative in reports.
    pub fn is_administrative(self) -> bool {
        matches!(self, ActionKind::Admin | ActionKind::BreachDetected)
    }
}

/// Risk of a raw action string.
pub fn risk_level(action: &str) -> RiskLevel {
    ActionKind::classify(action).risk_level()
}

// ============================================================================
// Actions
// ============================================================================

/// A loggable action together with the context its details are built from.
#[derive(Debug, Clone, PartialEq)]
pub enum AuditAction {
    DataAccess {
        record: RecordRef,
        data_type: String,
    },
    DataDownload {
        record: RecordRef,
        file_type: String,
        file_size: u64,
    },
    DataExport {
        export_type: String,
        record_count: u64,
    },
    KycAccess {
        kyc: RecordRef,
        access_type: String,
    },
    KycView {
        kyc: RecordRef,
    },
    KycDownload {
        kyc: RecordRef,
        file_type: String,
        file_size: u64,
    },
    Consent {
        decision: String,
        consent_version: Option<String>,
    },
    Admin {
        name: String,
        target: RecordRef,
        details: Map<String, Value>,
    },
    LoginAttempt {
        email: String,
        success: bool,
        reason: Option<String>,
    },
    BreachDetected {
        breach: RecordRef,
        actor: Option<Actor>,
        breach_type: String,
        severity: String,
        description: String,
    },
    ProfileUpdated {
        fields: Vec<String>,
    },
    PasswordChanged,
    DeletionRequested {
        request: RecordRef,
        reason: String,
    },
}

impl AuditAction {
    /// The stored action string.
    pub fn verb(&self) -> String {
        match self {
            AuditAction::DataAccess { .. } => "data_access".to_string(),
            AuditAction::DataDownload { .. } => "data_download".to_string(),
            AuditAction::DataExport { .. } => "data_export".to_string(),
            AuditAction::KycAccess { .. } => "kyc_access".to_string(),
            AuditAction::KycView { .. } => "kyc_view".to_string(),
            AuditAction::KycDownload { .. } => "kyc_download".to_string(),
            AuditAction::Consent { decision, .. } => format!("consent_{decision}"),
            AuditAction::Admin { name, .. } => format!("admin_{name}"),
            AuditAction::LoginAttempt { success: true, .. } => "login_success".to_string(),
            AuditAction::LoginAttempt { success: false, .. } => "login_failed".to_string(),
            AuditAction::BreachDetected { .. } => "breach_detected".to_string(),
            AuditAction::ProfileUpdated { .. } => "profile_updated".to_string(),
            AuditAction::PasswordChanged => "password_changed".to_string(),
            AuditAction::DeletionRequested { .. } => "deletion_requested".to_string(),
        }
    }

    pub fn kind(&self) -> ActionKind {
        ActionKind::classify(&self.verb())
    }

    /// Wrappers that only make sense for a signed-in user.
    fn requires_actor(&self) -> bool {
        !matches!(
            self,
            AuditAction::LoginAttempt { .. }
                | AuditAction::BreachDetected { .. }
                | AuditAction::DeletionRequested { .. }
        )
    }

    fn requires_admin(&self) -> bool {
        matches!(self, AuditAction::Admin { .. })
    }

    fn entry_actor<'a>(&'a self, current: Option<&'a Actor>) -> Option<&'a Actor> {
        match self {
            AuditAction::LoginAttempt { .. } => None,
            AuditAction::BreachDetected { actor, .. } => actor.as_ref(),
            _ => current,
        }
    }

    fn subject(&self, current: Option<&Actor>) -> Option<RecordRef> {
        match self {
            AuditAction::DataAccess { record, .. } | AuditAction::DataDownload { record, .. } => {
                Some(record.clone())
            }
            AuditAction::KycAccess { kyc, .. }
            | AuditAction::KycView { kyc }
            | AuditAction::KycDownload { kyc, .. } => Some(kyc.clone()),
            AuditAction::Admin { target, .. } => Some(target.clone()),
            AuditAction::BreachDetected { breach, .. } => Some(breach.clone()),
            AuditAction::DeletionRequested { request, .. } => Some(request.clone()),
            AuditAction::LoginAttempt { email, .. } => Some(RecordRef::new("User", email)),
            AuditAction::DataExport { .. }
            | AuditAction::Consent { .. }
            | AuditAction::ProfileUpdated { .. }
            | AuditAction::PasswordChanged => current.map(Actor::as_record),
        }
    }

    /// Details map. Every shape carries a timestamp so it is never empty.
    fn details(&self, at: DateTime<Utc>) -> Map<String, Value> {
        let at = at.to_rfc3339();
        let value = match self {
            AuditAction::DataAccess { data_type, .. } => {
                json!({ "data_type": data_type, "access_time": at })
            }
            AuditAction::DataDownload {
                file_type,
                file_size,
                ..
            }
            | AuditAction::KycDownload {
                file_type,
                file_size,
                ..
            } => json!({ "file_type": file_type, "file_size": file_size, "download_time": at }),
            AuditAction::DataExport {
                export_type,
                record_count,
            } => json!({
                "export_type": export_type,
                "record_count": record_count,
                "export_time": at,
            }),
            AuditAction::KycAccess { access_type, .. } => {
                json!({ "access_type": access_type, "access_time": at })
            }
            AuditAction::KycView { .. } => json!({ "view_time": at }),
            AuditAction::Consent {
                consent_version, ..
            } => json!({ "consent_version": consent_version, "action_time": at }),
            AuditAction::Admin { details, .. } => {
                let mut merged = details.clone();
                merged.insert("admin_action_time".to_string(), Value::String(at));
                Value::Object(merged)
            }
            AuditAction::LoginAttempt {
                email,
                success,
                reason,
            } => json!({
                "email": email,
                "success": success,
                "reason": reason,
                "attempt_time": at,
            }),
            AuditAction::BreachDetected {
                breach_type,
                severity,
                description,
                ..
            } => json!({
                "breach_type": breach_type,
                "severity": severity,
                "description": description,
                "logged_at": at,
            }),
            AuditAction::ProfileUpdated { fields } => {
                json!({ "updated_fields": fields, "update_time": at })
            }
            AuditAction::PasswordChanged => json!({ "change_time": at }),
            AuditAction::DeletionRequested { reason, .. } => {
                json!({ "reason": reason, "request_time": at })
            }
        };

        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }
}

// ============================================================================
// Entries
// ============================================================================

/// One immutable audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionLogEntry {
    pub id: Uuid,
    pub actor: Option<Actor>,
    pub action: String,
    pub subject_type: String,
    pub subject_id: String,
    pub details: Map<String, Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TransactionLogEntry {
    pub fn kind(&self) -> ActionKind {
        ActionKind::classify(&self.action)
    }

    /// Derived from `action`, never stored.
    pub fn risk_level(&self) -> RiskLevel {
        self.kind().risk_level()
    }

    pub fn is_sensitive(&self) -> bool {
        self.kind().is_sensitive()
    }

    pub fn is_admin_action(&self) -> bool {
        self.action.starts_with("admin_")
    }

    pub fn subject(&self) -> RecordRef {
        RecordRef::new(self.subject_type.clone(), &self.subject_id)
    }

    pub fn actor_id(&self) -> Option<UserId> {
        self.actor.as_ref().map(|a| a.id)
    }

    /// Details with the entry timestamp and actor identity folded in, for
    /// display in admin tooling.
    pub fn formatted_details(&self) -> Map<String, Value> {
        let mut out = self.details.clone();
        out.insert(
            "timestamp".to_string(),
            Value::String(self.created_at.to_rfc3339()),
        );
        out.insert(
            "user_email".to_string(),
            self.actor
                .as_ref()
                .map_or(Value::Null, |a| Value::String(a.email.clone())),
        );
        out.insert(
            "user_role".to_string(),
            self.actor
                .as_ref()
                .map_or(Value::Null, |a| Value::String(a.role.as_str().to_string())),
        );
        out
    }
}

fn validate(action: &str, subject: &RecordRef, details: &Map<String, Value>) -> Result<()> {
    if action.trim().is_empty() {
        return Err(AuditError::Validation("action must not be empty".to_string()));
    }
    if subject.record_type.trim().is_empty() {
        return Err(AuditError::Validation("subject type must not be empty".to_string()));
    }
    if subject.record_id.trim().is_empty() {
        return Err(AuditError::Validation("subject id must not be empty".to_string()));
    }
    if details.is_empty() {
        return Err(AuditError::Validation("details must not be empty".to_string()));
    }
    Ok(())
}

// ============================================================================
// Queries
// ============================================================================

/// Query filter for the transaction log.
///
/// All fields are optional and combined with AND.
#[derive(Debug, Default, Clone)]
pub struct AuditQuery {
    pub actor: Option<UserId>,
    pub action: Option<String>,
    pub subject_type: Option<String>,
    pub time_from: Option<DateTime<Utc>>,
    pub time_to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl AuditQuery {
    pub fn with_actor(mut self, actor: UserId) -> Self {
        self.actor = Some(actor);
        self
    }

    /// Exact action string match.
    pub fn with_action(mut self, action: &str) -> Self {
        self.action = Some(action.to_string());
        self
    }

    pub fn with_subject_type(mut self, subject_type: &str) -> Self {
        self.subject_type = Some(subject_type.to_string());
        self
    }

    /// Filter to entries within a time range (inclusive).
    pub fn with_time_range(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.time_from = Some(from);
        self.time_to = Some(to);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, entry: &TransactionLogEntry) -> bool {
        if let Some(actor) = self.actor {
            if entry.actor_id() != Some(actor) {
                return false;
            }
        }
        if let Some(ref action) = self.action {
            if &entry.action != action {
                return false;
            }
        }
        if let Some(ref subject_type) = self.subject_type {
            if &entry.subject_type != subject_type {
                return false;
            }
        }
        if let Some(from) = self.time_from {
            if entry.created_at < from {
                return false;
            }
        }
        if let Some(to) = self.time_to {
            if entry.created_at > to {
                return false;
            }
        }
        true
    }
}

// ============================================================================
// Suspicious-activity patterns
// ============================================================================

/// Advisory signal derived from an actor's recent entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternTag {
    ExcessiveDataDownloads,
    UnusualAccessTimes,
    RapidSuccessiveActions,
}

impl PatternTag {
    pub fn as_str(self) -> &'static str {
        match self {
            PatternTag::ExcessiveDataDownloads => "excessive_data_downloads",
            PatternTag::UnusualAccessTimes => "unusual_access_times",
            PatternTag::RapidSuccessiveActions => "rapid_successive_actions",
        }
    }
}

impl std::fmt::Display for PatternTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thresholds for [`detect_patterns`]. Each tag fires when its count is
/// strictly greater than the threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternThresholds {
    pub window: Duration,
    pub download_threshold: usize,
    pub off_hours_threshold: usize,
    pub rapid_window: Duration,
    pub rapid_action_threshold: usize,
    /// Hours before this are out of hours.
    pub day_start_hour: u32,
    /// Hours after this are out of hours.
    pub day_end_hour: u32,
    pub local_offset: FixedOffset,
}

impl Default for PatternThresholds {
    fn default() -> Self {
        Self {
            window: Duration::hours(1),
            download_threshold: 10,
            off_hours_threshold: 5,
            rapid_window: Duration::minutes(5),
            rapid_action_threshold: 20,
            day_start_hour: 6,
            day_end_hour: 22,
            local_offset: Utc.fix(),
        }
    }
}

impl PatternThresholds {
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    fn is_off_hours(&self, at: DateTime<Utc>) -> bool {
        let hour = at.with_timezone(&self.local_offset).hour();
        hour < self.day_start_hour || hour > self.day_end_hour
    }
}

/// Scan `actor`'s entries in the window ending at `now`.
pub fn detect_patterns<'a>(
    entries: impl IntoIterator<Item = &'a TransactionLogEntry>,
    actor: UserId,
    now: DateTime<Utc>,
    thresholds: &PatternThresholds,
) -> BTreeSet<PatternTag> {
    let window_start = now - thresholds.window;
    let rapid_start = now - thresholds.rapid_window;

    let mut downloads = 0usize;
    let mut off_hours = 0usize;
    let mut rapid = 0usize;

    for entry in entries {
        if entry.actor_id() != Some(actor) {
            continue;
        }
        if entry.created_at < window_start || entry.created_at > now {
            continue;
        }

        if entry.kind() == ActionKind::DataDownload {
            downloads += 1;
        }
        if thresholds.is_off_hours(entry.created_at) {
            off_hours += 1;
        }
        if entry.created_at >= rapid_start {
            rapid += 1;
        }
    }

    let mut tags = BTreeSet::new();
    if downloads > thresholds.download_threshold {
        tags.insert(PatternTag::ExcessiveDataDownloads);
    }
    if off_hours > thresholds.off_hours_threshold {
        tags.insert(PatternTag::UnusualAccessTimes);
    }
    if rapid > thresholds.rapid_action_threshold {
        tags.insert(PatternTag::RapidSuccessiveActions);
    }
    tags
}

// ============================================================================
// Reports
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskBreakdown {
    pub high_risk: usize,
    pub medium_risk: usize,
    pub low_risk: usize,
}

/// Aggregated view of the log over a time range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub actor: Option<UserId>,
    pub total_logs: usize,
    pub sensitive_actions: usize,
    pub admin_actions: usize,
    pub by_action: BTreeMap<String, usize>,
    /// Keyed by actor email; entries without an actor are not listed.
    pub by_actor: BTreeMap<String, usize>,
    pub by_date: BTreeMap<NaiveDate, usize>,
    pub risk_analysis: RiskBreakdown,
}

impl AuditReport {
    /// Aggregate the entries in `[start, end]`, optionally for one actor.
    pub fn build<'a>(
        entries: impl IntoIterator<Item = &'a TransactionLogEntry>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        actor: Option<UserId>,
    ) -> Self {
        let mut report = Self {
            start,
            end,
            actor,
            total_logs: 0,
            sensitive_actions: 0,
            admin_actions: 0,
            by_action: BTreeMap::new(),
            by_actor: BTreeMap::new(),
            by_date: BTreeMap::new(),
            risk_analysis: RiskBreakdown::default(),
        };

        for entry in entries {
            if entry.created_at < start || entry.created_at > end {
                continue;
            }
            if actor.is_some() && entry.actor_id() != actor {
                continue;
            }

            let kind = entry.kind();
            report.total_logs += 1;
            if kind.is_sensitive() {
                report.sensitive_actions += 1;
            }
            if kind.is_administrative() {
                report.admin_actions += 1;
            }
            *report.by_action.entry(entry.action.clone()).or_default() += 1;
            if let Some(a) = &entry.actor {
                *report.by_actor.entry(a.email.clone()).or_default() += 1;
            }
            *report
                .by_date
                .entry(entry.created_at.date_naive())
                .or_default() += 1;

            match kind.risk_level() {
                RiskLevel::High => report.risk_analysis.high_risk += 1,
                RiskLevel::Medium => report.risk_analysis.medium_risk += 1,
                RiskLevel::Low => report.risk_analysis.low_risk += 1,
            }
        }

        report
    }
}

// ============================================================================
// Transaction log
// ============================================================================

/// Shared append-only log. Safe for concurrent writers.
#[derive(Debug)]
pub struct TransactionLog {
    entries: RwLock<Vec<TransactionLogEntry>>,
    clock: Arc<dyn Clock>,
}

impl Default for TransactionLog {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionLog {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            clock,
        }
    }

    /// Rebuild a log from a JSON export. Every entry is validated.
    pub fn from_json(json: &str, clock: Arc<dyn Clock>) -> Result<Self> {
        let mut entries: Vec<TransactionLogEntry> = serde_json::from_str(json)?;
        for entry in &entries {
            validate(&entry.action, &entry.subject(), &entry.details)?;
        }
        entries.sort_by_key(|e| e.created_at);

        Ok(Self {
            entries: RwLock::new(entries),
            clock,
        })
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Append one entry.
    ///
    /// Fails with [`AuditError::Validation`] when the action, either half of
    /// the subject, or the details are missing. Nothing is defaulted.
    pub fn record(
        &self,
        actor: Option<&Actor>,
        action: &str,
        subject: &RecordRef,
        details: Map<String, Value>,
        ctx: &RequestContext,
    ) -> Result<TransactionLogEntry> {
        validate(action, subject, &details)?;

        let mut entries = self.entries.write();
        let count_before = entries.len();

        // Clamp so the log never runs backwards if the clock does
        let now = self.clock.now();
        let created_at = entries.last().map_or(now, |last| now.max(last.created_at));

        let entry = TransactionLogEntry {
            id: Uuid::new_v4(),
            actor: actor.cloned(),
            action: action.to_string(),
            subject_type: subject.record_type.clone(),
            subject_id: subject.record_id.clone(),
            details,
            ip_address: ctx.ip_string(),
            user_agent: ctx.user_agent.clone(),
            created_at,
        };
        entries.push(entry.clone());

        debug_assert_eq!(entries.len(), count_before + 1);
        drop(entries);

        tracing::debug!(
            entry_id = %entry.id,
            action = %entry.action,
            subject = %subject,
            risk = %entry.risk_level(),
            "audit entry recorded"
        );
        Ok(entry)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Snapshot of every entry in append order.
    pub fn entries(&self) -> Vec<TransactionLogEntry> {
        self.entries.read().clone()
    }

    pub fn get(&self, id: Uuid) -> Result<TransactionLogEntry> {
        self.entries
            .read()
            .iter()
            .find(|e| e.id == id)
            .cloned()
            .ok_or(AuditError::EntryNotFound(id))
    }

    /// Entries matching `filter`, in chronological order.
    pub fn query(&self, filter: &AuditQuery) -> Vec<TransactionLogEntry> {
        let entries = self.entries.read();
        let matching = entries.iter().filter(|e| filter.matches(e)).cloned();
        match filter.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        }
    }

    /// Export filtered entries as a JSON array string.
    pub fn export_json(&self, filter: &AuditQuery) -> Result<String> {
        let entries = self.query(filter);
        serde_json::to_string_pretty(&entries).map_err(AuditError::from)
    }

    /// Pattern tags for `actor` over the window ending now.
    pub fn detect_suspicious_activity(
        &self,
        actor: UserId,
        thresholds: &PatternThresholds,
    ) -> BTreeSet<PatternTag> {
        let now = self.clock.now();
        let tags = detect_patterns(self.entries.read().iter(), actor, now, thresholds);
        if !tags.is_empty() {
            tracing::info!(actor = %actor, ?tags, "suspicious activity patterns detected");
        }
        tags
    }

    pub fn generate_report(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        actor: Option<UserId>,
    ) -> AuditReport {
        AuditReport::build(self.entries.read().iter(), start, end, actor)
    }

    /// Report covering the trailing `days` days.
    pub fn generate_recent_report(&self, days: u32, actor: Option<UserId>) -> AuditReport {
        let end = self.clock.now();
        self.generate_report(end - Duration::days(i64::from(days)), end, actor)
    }
}

// ============================================================================
// Request-scoped logger
// ============================================================================

/// Named logging operations for one request.
///
/// Actor-scoped wrappers write nothing and return `Ok(None)` when nobody is
/// signed in. `log_admin_action` also writes nothing unless the actor is an
/// administrator.
#[derive(Debug, Clone)]
pub struct AuditLogger {
    log: Arc<TransactionLog>,
    actor: Option<Actor>,
    ctx: RequestContext,
}

impl AuditLogger {
    pub fn new(log: Arc<TransactionLog>, actor: Option<Actor>, ctx: RequestContext) -> Self {
        Self { log, actor, ctx }
    }

    pub fn actor(&self) -> Option<&Actor> {
        self.actor.as_ref()
    }

    /// Write `action` through [`TransactionLog::record`].
    pub fn log(&self, action: AuditAction) -> Result<Option<TransactionLogEntry>> {
        let verb = action.verb();

        if action.requires_actor() && self.actor.is_none() {
            tracing::trace!(action = %verb, "no signed-in actor, audit entry skipped");
            return Ok(None);
        }
        if action.requires_admin() && !self.actor.as_ref().is_some_and(Actor::is_admin) {
            tracing::debug!(
                action = %verb,
                actor = ?self.actor.as_ref().map(|a| a.id),
                "admin action attempted by non-admin, not recorded"
            );
            return Ok(None);
        }

        let subject = action
            .subject(self.actor.as_ref())
            .ok_or_else(|| AuditError::Validation(format!("{verb} has no subject")))?;
        let details = action.details(self.log.now());
        let actor = action.entry_actor(self.actor.as_ref());

        self.log
            .record(actor, &verb, &subject, details, &self.ctx)
            .map(Some)
    }

    pub fn log_data_access(
        &self,
        record: &RecordRef,
        data_type: &str,
    ) -> Result<Option<TransactionLogEntry>> {
        self.log(AuditAction::DataAccess {
            record: record.clone(),
            data_type: data_type.to_string(),
        })
    }

    pub fn log_data_download(
        &self,
        record: &RecordRef,
        file_type: &str,
        file_size: u64,
    ) -> Result<Option<TransactionLogEntry>> {
        self.log(AuditAction::DataDownload {
            record: record.clone(),
            file_type: file_type.to_string(),
            file_size,
        })
    }

    pub fn log_data_export(
        &self,
        export_type: &str,
        record_count: u64,
    ) -> Result<Option<TransactionLogEntry>> {
        self.log(AuditAction::DataExport {
            export_type: export_type.to_string(),
            record_count,
        })
    }

    pub fn log_kyc_access(
        &self,
        kyc: &RecordRef,
        access_type: &str,
    ) -> Result<Option<TransactionLogEntry>> {
        self.log(AuditAction::KycAccess {
            kyc: kyc.clone(),
            access_type: access_type.to_string(),
        })
    }

    pub fn log_kyc_view(&self, kyc: &RecordRef) -> Result<Option<TransactionLogEntry>> {
        self.log(AuditAction::KycView { kyc: kyc.clone() })
    }

    pub fn log_kyc_download(
        &self,
        kyc: &RecordRef,
        file_type: &str,
        file_size: u64,
    ) -> Result<Option<TransactionLogEntry>> {
        self.log(AuditAction::KycDownload {
            kyc: kyc.clone(),
            file_type: file_type.to_string(),
            file_size,
        })
    }

    /// Writes `consent_<decision>`, e.g. `consent_granted`.
    pub fn log_consent_action(
        &self,
        decision: &str,
        consent_version: Option<&str>,
    ) -> Result<Option<TransactionLogEntry>> {
        self.log(AuditAction::Consent {
            decision: decision.to_string(),
            consent_version: consent_version.map(str::to_string),
        })
    }

    /// Writes `admin_<name>`. No-op for non-admins.
    pub fn log_admin_action(
        &self,
        name: &str,
        target: &RecordRef,
        details: Map<String, Value>,
    ) -> Result<Option<TransactionLogEntry>> {
        self.log(AuditAction::Admin {
            name: name.to_string(),
            target: target.clone(),
            details,
        })
    }

    /// Writes `login_success` or `login_failed` with no actor.
    pub fn log_login_attempt(
        &self,
        email: &str,
        success: bool,
        reason: Option<&str>,
    ) -> Result<Option<TransactionLogEntry>> {
        self.log(AuditAction::LoginAttempt {
            email: email.to_string(),
            success,
            reason: reason.map(str::to_string),
        })
    }

    pub fn log_breach_detected(&self, breach: &Breach) -> Result<Option<TransactionLogEntry>> {
        self.log(AuditAction::BreachDetected {
            breach: RecordRef::new("Breach", breach.id),
            actor: breach.actor.clone(),
            breach_type: breach.breach_type.as_str().to_string(),
            severity: breach.severity.as_str().to_string(),
            description: breach.description.clone(),
        })
    }

    pub fn log_profile_update(&self, fields: &[&str]) -> Result<Option<TransactionLogEntry>> {
        self.log(AuditAction::ProfileUpdated {
            fields: fields.iter().map(|f| (*f).to_string()).collect(),
        })
    }

    pub fn log_password_change(&self) -> Result<Option<TransactionLogEntry>> {
        self.log(AuditAction::PasswordChanged)
    }

    pub fn log_deletion_request(
        &self,
        request: &RecordRef,
        reason: &str,
    ) -> Result<Option<TransactionLogEntry>> {
        self.log(AuditAction::DeletionRequested {
            request: request.clone(),
            reason: reason.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use fundguard_types::{ManualClock, Role};
    use proptest::prelude::*;
    use test_case::test_case;

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap()
    }

    fn investor() -> Actor {
        Actor::new(7, "alice@example.com", Role::Investor)
    }

    fn admin() -> Actor {
        Actor::new(1, "root@example.com", Role::Admin)
    }

    fn setup(at: DateTime<Utc>) -> (Arc<TransactionLog>, ManualClock) {
        let clock = ManualClock::new(at);
        let log = Arc::new(TransactionLog::with_clock(Arc::new(clock.clone())));
        (log, clock)
    }

    fn details() -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("k".to_string(), Value::from(1));
        map
    }

    #[test_case("data_download", RiskLevel::High; "data_download")]
    #[test_case("data_export", RiskLevel::High; "data_export")]
    #[test_case("kyc_download", RiskLevel::High; "kyc_download")]
    #[test_case("data_access", RiskLevel::Medium; "data_access")]
    #[test_case("kyc_access", RiskLevel::Medium; "kyc_access")]
    #[test_case("kyc_view", RiskLevel::Low; "kyc_view")]
    #[test_case("admin_data_download", RiskLevel::Low; "admin_data_download")]
    #[test_case("consent_granted", RiskLevel::Low; "consent_granted")]
    #[test_case("login_failed", RiskLevel::Low; "login_failed")]
    #[test_case("", RiskLevel::Low; "empty action")]
    fn test_risk_level(action: &str, expected: RiskLevel) {
        assert_eq!(risk_level(action), expected);
    }

    proptest! {
        #[test]
        fn prop_unknown_actions_are_low_risk(action in "[a-z_]{0,24}") {
            let expected = match action.as_str() {
                "data_download" | "data_export" | "kyc_download" => RiskLevel::High,
                "data_access" | "kyc_access" => RiskLevel::Medium,
                _ => RiskLevel::Low,
            };
            prop_assert_eq!(risk_level(&action), expected);
        }
    }

    #[test]
    fn test_record_validation() {
        let (log, _) = setup(noon());
        let ctx = RequestContext::system();
        let subject = RecordRef::new("Kyc", 3);

        assert!(matches!(
            log.record(None, " ", &subject, details(), &ctx),
            Err(AuditError::Validation(_))
        ));
        assert!(matches!(
            log.record(None, "data_access", &RecordRef::new("", 3), details(), &ctx),
            Err(AuditError::Validation(_))
        ));
        assert!(matches!(
            log.record(None, "data_access", &RecordRef::new("Kyc", ""), details(), &ctx),
            Err(AuditError::Validation(_))
        ));
        assert!(matches!(
            log.record(None, "data_access", &subject, Map::new(), &ctx),
            Err(AuditError::Validation(_))
        ));
        assert!(log.is_empty());
    }

    #[test]
    fn test_record_captures_request_context() {
        let (log, _) = setup(noon());
        let ctx = RequestContext::system()
            .with_ip("203.0.113.5".parse().expect("ip"))
            .with_user_agent("Mozilla/5.0");

        let entry = log
            .record(Some(&investor()), "custom_action", &RecordRef::new("Campaign", 9), details(), &ctx)
            .expect("valid entry");

        assert_eq!(entry.ip_address.as_deref(), Some("203.0.113.5"));
        assert_eq!(entry.user_agent.as_deref(), Some("Mozilla/5.0"));
        assert_eq!(entry.created_at, noon());
        assert_eq!(log.get(entry.id).expect("stored"), entry);
    }

    #[test]
    fn test_created_at_never_goes_backwards() {
        let (log, clock) = setup(noon());
        let ctx = RequestContext::system();
        let subject = RecordRef::new("Kyc", 1);

        let first = log
            .record(None, "a", &subject, details(), &ctx)
            .expect("first");
        clock.set(noon() - Duration::minutes(10));
        let second = log
            .record(None, "b", &subject, details(), &ctx)
            .expect("second");

        assert!(second.created_at >= first.created_at);
    }

    #[test]
    fn test_every_wrapper_appends_one_entry() {
        let (log, _) = setup(noon());
        let logger = AuditLogger::new(log.clone(), Some(admin()), RequestContext::system());
        let kyc = RecordRef::new("Kyc", 3);

        let breach = crate::breach::Breach::open(
            crate::breach::NewBreach::new(
                crate::breach::BreachType::DataExposure,
                crate::breach::Severity::Critical,
                "Potential data exposure detected: kyc_documents",
            ),
            noon(),
        )
        .expect("breach");

        let cases: Vec<(Result<Option<TransactionLogEntry>>, &str)> = vec![
            (logger.log_data_access(&kyc, "kyc_documents"), "data_access"),
            (logger.log_data_download(&kyc, "pdf", 10), "data_download"),
            (logger.log_data_export("csv", 40), "data_export"),
            (logger.log_kyc_access(&kyc, "review"), "kyc_access"),
            (logger.log_kyc_view(&kyc), "kyc_view"),
            (logger.log_kyc_download(&kyc, "pdf", 10), "kyc_download"),
            (logger.log_consent_action("granted", Some("v2")), "consent_granted"),
            (logger.log_admin_action("data_access", &kyc, Map::new()), "admin_data_access"),
            (logger.log_login_attempt("bob@example.com", false, Some("bad password")), "login_failed"),
            (logger.log_breach_detected(&breach), "breach_detected"),
            (logger.log_profile_update(&["phone"]), "profile_updated"),
            (logger.log_password_change(), "password_changed"),
            (logger.log_deletion_request(&RecordRef::new("DeletionRequest", 5), "closing account"), "deletion_requested"),
        ];

        let count = cases.len();
        for (result, action) in cases {
            let entry = result.expect("valid").expect("entry written");
            assert_eq!(entry.action, action);
            assert!(!entry.details.is_empty());
        }
        assert_eq!(log.len(), count);
    }

    #[test]
    fn test_actor_scoped_wrappers_skip_without_actor() {
        let (log, _) = setup(noon());
        let logger = AuditLogger::new(log.clone(), None, RequestContext::system());

        assert!(logger.log_data_access(&RecordRef::new("Kyc", 1), "x").expect("ok").is_none());
        assert!(logger.log_consent_action("granted", None).expect("ok").is_none());
        assert!(logger.log_password_change().expect("ok").is_none());
        assert!(log.is_empty());

        // Login attempts are recorded for anonymous callers
        let entry = logger
            .log_login_attempt("eve@example.com", true, None)
            .expect("ok")
            .expect("written");
        assert!(entry.actor.is_none());
        assert_eq!(entry.subject(), RecordRef::new("User", "eve@example.com"));
    }

    #[test]
    fn test_admin_action_guard() {
        let (log, _) = setup(noon());
        let target = RecordRef::new("User", 9);

        let as_investor = AuditLogger::new(log.clone(), Some(investor()), RequestContext::system());
        assert!(as_investor
            .log_admin_action("suspend_user", &target, Map::new())
            .expect("guard is not an error")
            .is_none());

        let backadmin = Actor::new(2, "ops@example.com", Role::Backadmin);
        let as_backadmin = AuditLogger::new(log.clone(), Some(backadmin), RequestContext::system());
        assert!(as_backadmin
            .log_admin_action("suspend_user", &target, Map::new())
            .expect("ok")
            .is_none());
        assert!(log.is_empty());

        let as_admin = AuditLogger::new(log.clone(), Some(admin()), RequestContext::system());
        let mut extra = Map::new();
        extra.insert("reason".to_string(), Value::from("fraud"));
        let entry = as_admin
            .log_admin_action("suspend_user", &target, extra)
            .expect("ok")
            .expect("written");
        assert_eq!(entry.action, "admin_suspend_user");
        assert!(entry.is_admin_action());
        assert_eq!(entry.details["reason"], "fraud");
        assert!(entry.details.contains_key("admin_action_time"));
    }

    #[test]
    fn test_subject_of_actor_scoped_entries() {
        let (log, _) = setup(noon());
        let logger = AuditLogger::new(log, Some(investor()), RequestContext::system());
        let entry = logger
            .log_data_export("csv", 12)
            .expect("ok")
            .expect("written");
        assert_eq!(entry.subject(), RecordRef::new("User", 7));
        assert_eq!(entry.details["record_count"], 12);
    }

    #[test]
    fn test_breach_entry_uses_breach_actor() {
        let (log, _) = setup(noon());
        let logger = AuditLogger::new(log, Some(admin()), RequestContext::system());
        let mut new = crate::breach::NewBreach::new(
            crate::breach::BreachType::ConsentViolation,
            crate::breach::Severity::High,
            "Consent violation detected: marketing",
        );
        new.actor = Some(investor());
        let breach = crate::breach::Breach::open(new, noon()).expect("breach");

        let entry = logger
            .log_breach_detected(&breach)
            .expect("ok")
            .expect("written");
        assert_eq!(entry.actor, Some(investor()));
        assert_eq!(entry.subject_type, "Breach");
        assert_eq!(entry.details["severity"], "high");
    }

    #[test]
    fn test_entry_helpers() {
        let (log, _) = setup(noon());
        let logger = AuditLogger::new(log, Some(investor()), RequestContext::system());
        let entry = logger
            .log_kyc_view(&RecordRef::new("Kyc", 3))
            .expect("ok")
            .expect("written");

        assert!(entry.is_sensitive());
        assert!(!entry.is_admin_action());
        assert_eq!(entry.risk_level(), RiskLevel::Low);

        let formatted = entry.formatted_details();
        assert_eq!(formatted["user_email"], "alice@example.com");
        assert_eq!(formatted["user_role"], "investor");
        assert!(formatted.contains_key("timestamp"));
        assert!(formatted.contains_key("view_time"));
    }

    #[test]
    fn test_excessive_downloads_threshold() {
        let (log, clock) = setup(noon());
        let logger = AuditLogger::new(log.clone(), Some(investor()), RequestContext::system());
        let thresholds = PatternThresholds::default();
        let kyc = RecordRef::new("Kyc", 3);

        for _ in 0..10 {
            logger.log_data_download(&kyc, "pdf", 1).expect("ok");
            clock.advance(Duration::minutes(5));
        }
        assert!(!log
            .detect_suspicious_activity(investor().id, &thresholds)
            .contains(&PatternTag::ExcessiveDataDownloads));

        logger.log_data_download(&kyc, "pdf", 1).expect("ok");
        assert!(log
            .detect_suspicious_activity(investor().id, &thresholds)
            .contains(&PatternTag::ExcessiveDataDownloads));
    }

    #[test]
    fn test_downloads_outside_window_ignored() {
        let (log, clock) = setup(noon());
        let logger = AuditLogger::new(log.clone(), Some(investor()), RequestContext::system());
        for _ in 0..11 {
            logger.log_data_download(&RecordRef::new("Kyc", 3), "pdf", 1).expect("ok");
        }
        clock.advance(Duration::minutes(61));
        assert!(log
            .detect_suspicious_activity(investor().id, &PatternThresholds::default())
            .is_empty());
    }

    #[test]
    fn test_unusual_access_times() {
        let late = Utc.with_ymd_and_hms(2025, 6, 2, 23, 10, 0).unwrap();
        let (log, clock) = setup(late);
        let logger = AuditLogger::new(log.clone(), Some(investor()), RequestContext::system());

        for _ in 0..6 {
            logger.log_kyc_view(&RecordRef::new("Kyc", 3)).expect("ok");
            clock.advance(Duration::minutes(6));
        }
        let tags = log.detect_suspicious_activity(investor().id, &PatternThresholds::default());
        assert!(tags.contains(&PatternTag::UnusualAccessTimes));
        assert!(!tags.contains(&PatternTag::RapidSuccessiveActions));
    }

    #[test]
    fn test_local_offset_shifts_hours() {
        // 21:00 UTC is 23:00 at +02:00
        let at = Utc.with_ymd_and_hms(2025, 6, 2, 21, 0, 0).unwrap();
        let (log, _) = setup(at);
        let logger = AuditLogger::new(log.clone(), Some(investor()), RequestContext::system());
        for _ in 0..6 {
            logger.log_kyc_view(&RecordRef::new("Kyc", 3)).expect("ok");
        }

        let utc = PatternThresholds::default();
        assert!(!log
            .detect_suspicious_activity(investor().id, &utc)
            .contains(&PatternTag::UnusualAccessTimes));

        let shifted = PatternThresholds {
            local_offset: FixedOffset::east_opt(2 * 3600).expect("offset"),
            ..PatternThresholds::default()
        };
        assert!(log
            .detect_suspicious_activity(investor().id, &shifted)
            .contains(&PatternTag::UnusualAccessTimes));
    }

    #[test]
    fn test_rapid_successive_actions() {
        let (log, clock) = setup(noon());
        let logger = AuditLogger::new(log.clone(), Some(investor()), RequestContext::system());
        for _ in 0..21 {
            logger.log_kyc_view(&RecordRef::new("Kyc", 3)).expect("ok");
            clock.advance(Duration::seconds(5));
        }
        let tags = log.detect_suspicious_activity(investor().id, &PatternThresholds::default());
        assert_eq!(tags, BTreeSet::from([PatternTag::RapidSuccessiveActions]));

        // Other actors are unaffected
        assert!(log
            .detect_suspicious_activity(UserId::new(99), &PatternThresholds::default())
            .is_empty());
    }

    #[test]
    fn test_generate_report() {
        let (log, clock) = setup(noon());
        let alice = AuditLogger::new(log.clone(), Some(investor()), RequestContext::system());
        let root = AuditLogger::new(log.clone(), Some(admin()), RequestContext::system());
        let kyc = RecordRef::new("Kyc", 3);

        alice.log_data_access(&kyc, "kyc_documents").expect("ok");
        alice.log_data_download(&kyc, "pdf", 100).expect("ok");
        alice.log_consent_action("granted", None).expect("ok");
        clock.advance(Duration::days(1));
        root.log_admin_action("data_access", &kyc, Map::new()).expect("ok");
        root.log_kyc_view(&kyc).expect("ok");

        let report = log.generate_report(noon() - Duration::hours(1), clock.now(), None);
        assert_eq!(report.total_logs, 5);
        assert_eq!(report.sensitive_actions, 3);
        assert_eq!(report.admin_actions, 1);
        assert_eq!(report.by_action.get("data_download"), Some(&1));
        assert_eq!(report.by_actor.get("alice@example.com"), Some(&3));
        assert_eq!(report.by_date.len(), 2);
        assert_eq!(
            report.risk_analysis,
            RiskBreakdown {
                high_risk: 1,
                medium_risk: 1,
                low_risk: 3,
            }
        );

        let only_alice = log.generate_report(noon(), clock.now(), Some(investor().id));
        assert_eq!(only_alice.total_logs, 3);

        let first_day = log.generate_report(noon(), noon() + Duration::hours(1), None);
        assert_eq!(first_day.total_logs, 3);
    }

    #[test]
    fn test_query_and_export_roundtrip() {
        let (log, clock) = setup(noon());
        let logger = AuditLogger::new(log.clone(), Some(investor()), RequestContext::system());
        for i in 0..4 {
            logger
                .log_data_access(&RecordRef::new("Kyc", i), "kyc_documents")
                .expect("ok");
            clock.advance(Duration::minutes(1));
        }
        logger.log_password_change().expect("ok");

        let accesses = log.query(&AuditQuery::default().with_action("data_access"));
        assert_eq!(accesses.len(), 4);
        let limited = log.query(&AuditQuery::default().with_subject_type("Kyc").with_limit(2));
        assert_eq!(limited.len(), 2);
        let by_actor = log.query(&AuditQuery::default().with_actor(UserId::new(7)));
        assert_eq!(by_actor.len(), 5);
        let windowed = log.query(
            &AuditQuery::default().with_time_range(noon() + Duration::minutes(1), noon() + Duration::minutes(2)),
        );
        assert_eq!(windowed.len(), 2);

        let json = log.export_json(&AuditQuery::default()).expect("export");
        let restored =
            TransactionLog::from_json(&json, Arc::new(clock.clone())).expect("import");
        assert_eq!(restored.entries(), log.entries());
    }

    #[test]
    fn test_import_rejects_invalid_entries() {
        let json = r#"[{
            "id": "67e55044-10b1-426f-9247-bb680e5fe0c8",
            "actor": null,
            "action": "data_access",
            "subject_type": "Kyc",
            "subject_id": "1",
            "details": {},
            "ip_address": null,
            "user_agent": null,
            "created_at": "2025-06-02T12:00:00Z"
        }]"#;
        assert!(matches!(
            TransactionLog::from_json(json, Arc::new(SystemClock)),
            Err(AuditError::Validation(_))
        ));
        assert!(matches!(
            TransactionLog::from_json("not json", Arc::new(SystemClock)),
            Err(AuditError::Serialization(_))
        ));
    }

    #[test]
    fn test_concurrent_writers() {
        let log = Arc::new(TransactionLog::new());
        let handles: Vec<_> = (0..8u64)
            .map(|i| {
                let log = log.clone();
                std::thread::spawn(move || {
                    let logger = AuditLogger::new(
                        log,
                        Some(Actor::new(i, format!("user{i}@example.com"), Role::Investor)),
                        RequestContext::system(),
                    );
                    for _ in 0..50 {
                        logger
                            .log_kyc_view(&RecordRef::new("Kyc", i))
                            .expect("ok");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("writer thread");
        }

        assert_eq!(log.len(), 400);
        let entries = log.entries();
        assert!(entries.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    }
}
