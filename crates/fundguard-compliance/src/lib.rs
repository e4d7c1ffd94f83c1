//! Security monitoring for the Fundguard platform.
//!
//! This crate owns the two halves of the compliance core that never touch
//! key material:
//!
//! - **Audit trail** ([`audit`]): append-only record of every action that
//!   touches personal data, risk classification, suspicious-pattern scans
//!   and aggregate reports.
//! - **Incidents** ([`breach`], [`detection`], [`notify`]): heuristic
//!   detection rules that raise typed, severity-ranked incidents, their
//!   lifecycle, and administrator notification.
//!
//! # Architecture
//!
//! ```text
//! request ──► BreachDetector ──► IncidentStore
//!                  │                  ▲
//!                  ├──► TransactionLog (breach_detected)
//!                  └──► NotificationDispatcher ──► BreachNotifier
//! ```
//!
//! Detection never depends on delivery: an incident is stored before any
//! audit or notification side effect runs, and delivery happens on a
//! [`background::Executor`].

pub mod audit;
pub mod background;
pub mod breach;
pub mod detection;
pub mod notify;

pub use audit::{
    ActionKind, AuditAction, AuditError, AuditLogger, AuditQuery, AuditReport, PatternTag,
    PatternThresholds, RiskBreakdown, RiskLevel, TransactionLog, TransactionLogEntry, risk_level,
};
pub use background::{Background, Executor};
pub use breach::{
    Breach, BreachError, BreachStatus, BreachSummary, BreachType, IncidentStore, NewBreach,
    Severity,
};
pub use detection::{BreachDetector, DetectionRules, DetectionRulesBuilder, RateCounter};
pub use notify::{
    AdminDirectory, BreachNotifier, LogNotifier, MemoryNotifier, NotificationDispatcher,
    NotifyError, OutgoingMessage,
};
