//! Security incidents and their lifecycle.
//!
//! A [`Breach`] is a typed, severity-ranked record of a detected security or
//! privacy event. Breaches are only ever created by the
//! [`BreachDetector`](crate::detection::BreachDetector); end users never
//! construct them directly.
//!
//! # Lifecycle
//!
//! ```text
//! Open -> Investigating -> Resolved
//!      \               \-> FalsePositive
//!       \-> Resolved | FalsePositive
//! ```
//!
//! Transitions only move forward. `resolved_at` is set exactly when the
//! status is terminal, and a terminal breach never changes status again.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use fundguard_types::{Actor, Clock, SystemClock};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Incidents detected within this window count as recent.
const RECENT_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Error)]
pub enum BreachError {
    #[error("Breach not found: {0}")]
    NotFound(Uuid),
    #[error("Invalid breach: {0}")]
    Validation(String),
    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),
}

pub type Result<T> = std::result::Result<T, BreachError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreachType {
    UnauthorizedAccess,
    DataExposure,
    SuspiciousActivity,
    FailedAuthentication,
    UnusualDownload,
    ConsentViolation,
    EncryptionFailure,
}

impl BreachType {
    pub const ALL: [BreachType; 7] = [
        BreachType::UnauthorizedAccess,
        BreachType::DataExposure,
        BreachType::SuspiciousActivity,
        BreachType::FailedAuthentication,
        BreachType::UnusualDownload,
        BreachType::ConsentViolation,
        BreachType::EncryptionFailure,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BreachType::UnauthorizedAccess => "unauthorized_access",
            BreachType::DataExposure => "data_exposure",
            BreachType::SuspiciousActivity => "suspicious_activity",
            BreachType::FailedAuthentication => "failed_authentication",
            BreachType::UnusualDownload => "unusual_download",
            BreachType::ConsentViolation => "consent_violation",
            BreachType::EncryptionFailure => "encryption_failure",
        }
    }

    /// Sentence-case label for mail subjects ("Unauthorized access").
    pub fn humanize(self) -> String {
        let spaced = self.as_str().replace('_', " ");
        let mut chars = spaced.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }
}

impl std::fmt::Display for BreachType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of an incident, ordered from lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// High and critical incidents page the administrators.
    pub fn requires_alert(self) -> bool {
        self >= Severity::High
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreachStatus {
    Open,
    Investigating,
    Resolved,
    FalsePositive,
}

impl BreachStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BreachStatus::Open => "open",
            BreachStatus::Investigating => "investigating",
            BreachStatus::Resolved => "resolved",
            BreachStatus::FalsePositive => "false_positive",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BreachStatus::Resolved | BreachStatus::FalsePositive)
    }
}

impl std::fmt::Display for BreachStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields supplied by a detection rule when it fires.
#[derive(Debug, Clone)]
pub struct NewBreach {
    pub actor: Option<Actor>,
    pub breach_type: BreachType,
    pub severity: Severity,
    pub description: String,
    pub metadata: Map<String, Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub affected_data: Option<String>,
    pub affected_records_count: Option<u64>,
}

impl NewBreach {
    pub fn new(breach_type: BreachType, severity: Severity, description: impl Into<String>) -> Self {
        Self {
            actor: None,
            breach_type,
            severity,
            description: description.into(),
            metadata: Map::new(),
            ip_address: None,
            user_agent: None,
            affected_data: None,
            affected_records_count: None,
        }
    }
}

/// A detected incident.
///
/// Deserialization checks the lifecycle invariants, so a stored incident
/// cannot come back in a state the transitions would never produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StoredBreach")]
pub struct Breach {
    pub id: Uuid,
    pub actor: Option<Actor>,
    pub breach_type: BreachType,
    pub severity: Severity,
    pub description: String,
    pub detected_at: DateTime<Utc>,
    resolved_at: Option<DateTime<Utc>>,
    status: BreachStatus,
    pub metadata: Map<String, Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub affected_data: Option<String>,
    pub affected_records_count: Option<u64>,
}

impl Breach {
    /// Open a new incident. Only detection rules call this.
    pub(crate) fn open(new: NewBreach, detected_at: DateTime<Utc>) -> Result<Self> {
        if new.description.trim().is_empty() {
            return Err(BreachError::Validation(
                "description must not be empty".to_string(),
            ));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            actor: new.actor,
            breach_type: new.breach_type,
            severity: new.severity,
            description: new.description,
            detected_at,
            resolved_at: None,
            status: BreachStatus::Open,
            metadata: new.metadata,
            ip_address: new.ip_address,
            user_agent: new.user_agent,
            affected_data: new.affected_data,
            affected_records_count: new.affected_records_count,
        })
    }

    pub fn status(&self) -> BreachStatus {
        self.status
    }

    pub fn resolved_at(&self) -> Option<DateTime<Utc>> {
        self.resolved_at
    }

    pub fn is_open(&self) -> bool {
        self.status == BreachStatus::Open
    }

    pub fn is_critical(&self) -> bool {
        self.severity == Severity::Critical
    }

    /// Time from detection to resolution. `None` while unresolved.
    pub fn duration(&self) -> Option<Duration> {
        self.resolved_at.map(|at| at - self.detected_at)
    }

    /// Move an open incident under investigation.
    pub fn start_investigation(&mut self) -> Result<()> {
        if self.status != BreachStatus::Open {
            let status = self.status;
            return Err(BreachError::InvalidTransition(format!(
                "cannot investigate from {status}, expected open"
            )));
        }
        self.status = BreachStatus::Investigating;
        Ok(())
    }

    pub fn resolve(&mut self, at: DateTime<Utc>) -> Result<()> {
        self.close(BreachStatus::Resolved, at)
    }

    pub fn mark_false_positive(&mut self, at: DateTime<Utc>) -> Result<()> {
        self.close(BreachStatus::FalsePositive, at)
    }

    fn close(&mut self, terminal: BreachStatus, at: DateTime<Utc>) -> Result<()> {
        debug_assert!(terminal.is_terminal());

        if self.status.is_terminal() {
            let status = self.status;
            return Err(BreachError::InvalidTransition(format!(
                "cannot move to {terminal} from {status}, incident is already closed"
            )));
        }

        // A clock skewed behind detection would produce a negative duration
        let at = at.max(self.detected_at);
        self.status = terminal;
        self.resolved_at = Some(at);
        Ok(())
    }
}

/// Wire form of [`Breach`], validated on the way in.
#[derive(Deserialize)]
struct StoredBreach {
    id: Uuid,
    actor: Option<Actor>,
    breach_type: BreachType,
    severity: Severity,
    description: String,
    detected_at: DateTime<Utc>,
    resolved_at: Option<DateTime<Utc>>,
    status: BreachStatus,
    #[serde(default)]
    metadata: Map<String, Value>,
    ip_address: Option<String>,
    user_agent: Option<String>,
    affected_data: Option<String>,
    affected_records_count: Option<u64>,
}

impl TryFrom<StoredBreach> for Breach {
    type Error = BreachError;

    fn try_from(stored: StoredBreach) -> Result<Self> {
        if stored.description.trim().is_empty() {
            return Err(BreachError::Validation(
                "description must not be empty".to_string(),
            ));
        }
        match (stored.status.is_terminal(), stored.resolved_at) {
            (true, None) => {
                return Err(BreachError::Validation(format!(
                    "{} incident has no resolved_at",
                    stored.status
                )));
            }
            (false, Some(_)) => {
                return Err(BreachError::Validation(format!(
                    "{} incident carries resolved_at",
                    stored.status
                )));
            }
            (true, Some(at)) if at < stored.detected_at => {
                return Err(BreachError::Validation(
                    "resolved_at precedes detected_at".to_string(),
                ));
            }
            _ => {}
        }

        Ok(Self {
            id: stored.id,
            actor: stored.actor,
            breach_type: stored.breach_type,
            severity: stored.severity,
            description: stored.description,
            detected_at: stored.detected_at,
            resolved_at: stored.resolved_at,
            status: stored.status,
            metadata: stored.metadata,
            ip_address: stored.ip_address,
            user_agent: stored.user_agent,
            affected_data: stored.affected_data,
            affected_records_count: stored.affected_records_count,
        })
    }
}

/// Counts for the administrative incident overview.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreachSummary {
    pub total: usize,
    pub open: usize,
    pub critical: usize,
    pub recent: usize,
    pub by_type: BTreeMap<String, usize>,
    pub by_severity: BTreeMap<String, usize>,
    pub by_status: BTreeMap<String, usize>,
}

/// Shared store of every incident raised in this process.
///
/// Incidents are never deleted. Only status transitions mutate them.
#[derive(Debug)]
pub struct IncidentStore {
    incidents: RwLock<Vec<Breach>>,
    clock: Arc<dyn Clock>,
}

impl Default for IncidentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl IncidentStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            incidents: RwLock::new(Vec::new()),
            clock,
        }
    }

    pub(crate) fn insert(&self, breach: Breach) {
        self.incidents.write().push(breach);
    }

    pub fn len(&self) -> usize {
        self.incidents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.incidents.read().is_empty()
    }

    pub fn get(&self, id: Uuid) -> Option<Breach> {
        self.incidents.read().iter().find(|b| b.id == id).cloned()
    }

    /// Snapshot of every incident in detection order.
    pub fn all(&self) -> Vec<Breach> {
        self.incidents.read().clone()
    }

    pub fn open(&self) -> Vec<Breach> {
        self.filter(Breach::is_open)
    }

    pub fn critical(&self) -> Vec<Breach> {
        self.filter(Breach::is_critical)
    }

    /// Incidents detected in the last 24 hours before `now`.
    pub fn recent(&self, now: DateTime<Utc>) -> Vec<Breach> {
        let since = now - Duration::hours(RECENT_WINDOW_HOURS);
        self.filter(|b| b.detected_at >= since)
    }

    pub fn by_type(&self, breach_type: BreachType) -> Vec<Breach> {
        self.filter(|b| b.breach_type == breach_type)
    }

    pub fn by_severity(&self, severity: Severity) -> Vec<Breach> {
        self.filter(|b| b.severity == severity)
    }

    pub fn summary(&self, now: DateTime<Utc>) -> BreachSummary {
        let since = now - Duration::hours(RECENT_WINDOW_HOURS);
        let incidents = self.incidents.read();

        let mut summary = BreachSummary {
            total: incidents.len(),
            ..BreachSummary::default()
        };

        for breach in incidents.iter() {
            if breach.is_open() {
                summary.open += 1;
            }
            if breach.is_critical() {
                summary.critical += 1;
            }
            if breach.detected_at >= since {
                summary.recent += 1;
            }
            *summary
                .by_type
                .entry(breach.breach_type.as_str().to_string())
                .or_default() += 1;
            *summary
                .by_severity
                .entry(breach.severity.as_str().to_string())
                .or_default() += 1;
            *summary
                .by_status
                .entry(breach.status.as_str().to_string())
                .or_default() += 1;
        }

        summary
    }

    pub fn start_investigation(&self, id: Uuid) -> Result<Breach> {
        self.transition(id, Breach::start_investigation)
    }

    pub fn resolve(&self, id: Uuid) -> Result<Breach> {
        let now = self.clock.now();
        self.transition(id, |b| b.resolve(now))
    }

    pub fn mark_false_positive(&self, id: Uuid) -> Result<Breach> {
        let now = self.clock.now();
        self.transition(id, |b| b.mark_false_positive(now))
    }

    fn transition(&self, id: Uuid, apply: impl FnOnce(&mut Breach) -> Result<()>) -> Result<Breach> {
        let mut incidents = self.incidents.write();
        let breach = incidents
            .iter_mut()
            .find(|b| b.id == id)
            .ok_or(BreachError::NotFound(id))?;

        apply(breach)?;
        tracing::info!(breach_id = %id, status = %breach.status, "incident status changed");
        Ok(breach.clone())
    }

    fn filter(&self, pred: impl Fn(&Breach) -> bool) -> Vec<Breach> {
        self.incidents
            .read()
            .iter()
            .filter(|&b| pred(b))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use fundguard_types::ManualClock;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 20, 14, 0, 0).unwrap()
    }

    fn open(breach_type: BreachType, severity: Severity) -> Breach {
        Breach::open(NewBreach::new(breach_type, severity, "test incident"), t0())
            .expect("valid breach")
    }

    #[test]
    fn test_new_breach_is_open() {
        let breach = open(BreachType::DataExposure, Severity::Critical);
        assert_eq!(breach.status(), BreachStatus::Open);
        assert!(breach.resolved_at().is_none());
        assert!(breach.duration().is_none());
        assert!(breach.is_open());
        assert!(breach.is_critical());
    }

    #[test]
    fn test_blank_description_rejected() {
        let result = Breach::open(
            NewBreach::new(BreachType::SuspiciousActivity, Severity::Medium, "   "),
            t0(),
        );
        assert!(matches!(result, Err(BreachError::Validation(_))));
    }

    #[test]
    fn test_full_lifecycle() {
        let mut breach = open(BreachType::UnauthorizedAccess, Severity::High);
        breach.start_investigation().expect("open -> investigating");
        assert_eq!(breach.status(), BreachStatus::Investigating);
        assert!(breach.resolved_at().is_none());

        breach
            .resolve(t0() + Duration::hours(3))
            .expect("investigating -> resolved");
        assert_eq!(breach.status(), BreachStatus::Resolved);
        assert_eq!(breach.duration(), Some(Duration::hours(3)));
    }

    #[test]
    fn test_false_positive_from_open() {
        let mut breach = open(BreachType::SuspiciousActivity, Severity::Medium);
        breach
            .mark_false_positive(t0() + Duration::minutes(10))
            .expect("open -> false_positive");
        assert_eq!(breach.status(), BreachStatus::FalsePositive);
        assert!(breach.resolved_at().is_some());
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut breach = open(BreachType::ConsentViolation, Severity::High);
        breach.resolve(t0() + Duration::hours(1)).expect("resolve");
        let resolved_at = breach.resolved_at();

        assert!(matches!(
            breach.resolve(t0() + Duration::hours(2)),
            Err(BreachError::InvalidTransition(_))
        ));
        assert!(matches!(
            breach.mark_false_positive(t0() + Duration::hours(2)),
            Err(BreachError::InvalidTransition(_))
        ));
        assert!(matches!(
            breach.start_investigation(),
            Err(BreachError::InvalidTransition(_))
        ));

        assert_eq!(breach.status(), BreachStatus::Resolved);
        assert_eq!(breach.resolved_at(), resolved_at);
    }

    #[test]
    fn test_investigation_only_from_open() {
        let mut breach = open(BreachType::EncryptionFailure, Severity::Critical);
        breach.start_investigation().expect("first investigation");
        assert!(matches!(
            breach.start_investigation(),
            Err(BreachError::InvalidTransition(_))
        ));
    }

    #[test]
    fn test_resolved_at_never_precedes_detection() {
        let mut breach = open(BreachType::DataExposure, Severity::Critical);
        breach.resolve(t0() - Duration::minutes(5)).expect("resolve");
        assert_eq!(breach.resolved_at(), Some(t0()));
        assert_eq!(breach.duration(), Some(Duration::zero()));
    }

    #[test]
    fn test_stored_breach_keeps_lifecycle() {
        let mut breach = open(BreachType::DataExposure, Severity::Critical);
        breach.resolve(t0() + Duration::hours(2)).expect("resolve");

        let json = serde_json::to_value(&breach).expect("serialize");
        let back: Breach = serde_json::from_value(json.clone()).expect("valid incident");
        assert_eq!(back, breach);

        let mut missing = json.clone();
        missing["resolved_at"] = Value::Null;
        let err = serde_json::from_value::<Breach>(missing).expect_err("resolved without a time");
        assert!(err.to_string().contains("no resolved_at"));

        let mut reopened = json.clone();
        reopened["status"] = Value::from("open");
        assert!(serde_json::from_value::<Breach>(reopened).is_err());

        let mut early = json;
        early["resolved_at"] = Value::from("2025-05-20T13:00:00Z");
        assert!(serde_json::from_value::<Breach>(early).is_err());
    }

    #[test]
    fn test_humanize_and_alert_threshold() {
        assert_eq!(BreachType::UnauthorizedAccess.humanize(), "Unauthorized access");
        assert_eq!(BreachType::EncryptionFailure.humanize(), "Encryption failure");
        assert!(Severity::Critical.requires_alert());
        assert!(Severity::High.requires_alert());
        assert!(!Severity::Medium.requires_alert());
        assert!(!Severity::Low.requires_alert());
    }

    #[test]
    fn test_serde_snake_case() {
        let breach = open(BreachType::FailedAuthentication, Severity::Low);
        let json = serde_json::to_value(&breach).expect("serialize");
        assert_eq!(json["breach_type"], "failed_authentication");
        assert_eq!(json["status"], "open");
        assert_eq!(json["severity"], "low");
    }

    #[test]
    fn test_store_queries_and_summary() {
        let clock = ManualClock::new(t0());
        let store = IncidentStore::with_clock(Arc::new(clock.clone()));

        let mut old = open(BreachType::SuspiciousActivity, Severity::Medium);
        old.detected_at = t0() - Duration::hours(30);
        store.insert(old);
        store.insert(open(BreachType::DataExposure, Severity::Critical));
        store.insert(open(BreachType::UnauthorizedAccess, Severity::High));

        assert_eq!(store.len(), 3);
        assert_eq!(store.open().len(), 3);
        assert_eq!(store.critical().len(), 1);
        assert_eq!(store.recent(t0()).len(), 2);
        assert_eq!(store.by_type(BreachType::UnauthorizedAccess).len(), 1);
        assert_eq!(store.by_severity(Severity::Medium).len(), 1);

        let target = store.by_type(BreachType::UnauthorizedAccess)[0].id;
        clock.advance(Duration::minutes(45));
        let resolved = store.resolve(target).expect("resolve by id");
        assert_eq!(resolved.duration(), Some(Duration::minutes(45)));

        let summary = store.summary(clock.now());
        assert_eq!(summary.total, 3);
        assert_eq!(summary.open, 2);
        assert_eq!(summary.critical, 1);
        assert_eq!(summary.recent, 2);
        assert_eq!(summary.by_status.get("resolved"), Some(&1));
        assert_eq!(summary.by_type.get("data_exposure"), Some(&1));
        assert_eq!(summary.by_severity.get("medium"), Some(&1));
    }

    #[test]
    fn test_store_unknown_id() {
        let store = IncidentStore::new();
        let id = Uuid::new_v4();
        assert!(matches!(store.resolve(id), Err(BreachError::NotFound(found)) if found == id));
        assert!(matches!(
            store.start_investigation(id),
            Err(BreachError::NotFound(_))
        ));
    }

    #[test]
    fn test_store_rejects_double_resolution() {
        let store = IncidentStore::new();
        let breach = open(BreachType::ConsentViolation, Severity::High);
        let id = breach.id;
        store.insert(breach);

        store.mark_false_positive(id).expect("first close");
        assert!(matches!(
            store.resolve(id),
            Err(BreachError::InvalidTransition(_))
        ));
        assert_eq!(
            store.get(id).expect("still stored").status(),
            BreachStatus::FalsePositive
        );
    }
}
