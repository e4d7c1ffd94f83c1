//! Administrator notification for security incidents.
//!
//! Delivery is fire-and-forget relative to incident creation. The
//! [`NotificationDispatcher`] hands each alert to a [`BreachNotifier`] through
//! an [`Executor`]: a blocking worker when a tokio runtime is available, a
//! detached thread otherwise. A delivery failure or a panicking notifier is
//! logged and dropped.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};

use fundguard_types::Actor;
use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tokio::runtime::Handle;

use crate::background::{Background, Executor};
use crate::breach::{Breach, Severity};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Notification channel closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, NotifyError>;

// ============================================================================
// Recipients
// ============================================================================

/// Addresses of everyone who receives security mail.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdminDirectory {
    emails: Vec<String>,
}

impl AdminDirectory {
    /// Admins and back-office admins from `actors`. Everyone else is ignored.
    pub fn from_actors<'a>(actors: impl IntoIterator<Item = &'a Actor>) -> Self {
        Self::from_emails(
            actors
                .into_iter()
                .filter(|a| a.role.is_security_reviewer())
                .map(|a| a.email.clone()),
        )
    }

    pub fn from_emails<S: Into<String>>(emails: impl IntoIterator<Item = S>) -> Self {
        let mut emails: Vec<String> = emails
            .into_iter()
            .map(Into::into)
            .map(|e: String| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .collect();
        emails.sort();
        emails.dedup();
        Self { emails }
    }

    pub fn emails(&self) -> &[String] {
        &self.emails
    }

    pub fn is_empty(&self) -> bool {
        self.emails.is_empty()
    }
}

// ============================================================================
// Messages
// ============================================================================

pub fn alert_subject(breach: &Breach) -> String {
    format!(
        "SECURITY BREACH ALERT: {} - {}",
        breach.severity.as_str().to_uppercase(),
        breach.breach_type.humanize()
    )
}

pub fn summary_subject(breaches: &[Breach]) -> String {
    let critical = breaches
        .iter()
        .filter(|b| b.severity == Severity::Critical)
        .count();
    format!(
        "Security Breach Summary: {} incidents ({} critical)",
        breaches.len(),
        critical
    )
}

/// A composed message ready for a mail transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

impl OutgoingMessage {
    /// `None` when nobody would receive it.
    pub fn alert(breach: &Breach, directory: &AdminDirectory) -> Option<Self> {
        if directory.is_empty() {
            return None;
        }

        let mut body = format!(
            "{}\n\nIncident: {}\nType: {}\nSeverity: {}\nStatus: {}\nDetected at: {}\n",
            breach.description,
            breach.id,
            breach.breach_type,
            breach.severity,
            breach.status(),
            breach.detected_at.to_rfc3339(),
        );
        if let Some(actor) = &breach.actor {
            body.push_str(&format!("User: {} ({})\n", actor.email, actor.role));
        }
        if let Some(ip) = &breach.ip_address {
            body.push_str(&format!("IP address: {ip}\n"));
        }
        if let Some(data) = &breach.affected_data {
            body.push_str(&format!("Affected data: {data}\n"));
        }
        if let Some(count) = breach.affected_records_count {
            body.push_str(&format!("Affected records: {count}\n"));
        }

        Some(Self {
            to: directory.emails().to_vec(),
            subject: alert_subject(breach),
            body,
        })
    }

    pub fn summary(breaches: &[Breach], directory: &AdminDirectory) -> Option<Self> {
        if directory.is_empty() {
            return None;
        }

        let body = breaches
            .iter()
            .map(|b| {
                format!(
                    "[{}] {} {} ({})",
                    b.severity.as_str().to_uppercase(),
                    b.detected_at.to_rfc3339(),
                    b.description,
                    b.status()
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        Some(Self {
            to: directory.emails().to_vec(),
            subject: summary_subject(breaches),
            body,
        })
    }
}

// ============================================================================
// Notifiers
// ============================================================================

/// Outbound notification collaborator.
pub trait BreachNotifier: Send + Sync + Debug {
    fn send_breach_alert(&self, breach: &Breach) -> Result<()>;

    fn send_breach_summary(&self, breaches: &[Breach]) -> Result<()>;
}

/// Writes composed messages to the tracing log instead of a mail server.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier {
    directory: AdminDirectory,
}

impl LogNotifier {
    pub fn new(directory: AdminDirectory) -> Self {
        Self { directory }
    }
}

impl BreachNotifier for LogNotifier {
    fn send_breach_alert(&self, breach: &Breach) -> Result<()> {
        match OutgoingMessage::alert(breach, &self.directory) {
            Some(message) => tracing::info!(
                to = ?message.to,
                subject = %message.subject,
                "breach alert"
            ),
            None => tracing::debug!(breach_id = %breach.id, "no administrators to alert"),
        }
        Ok(())
    }

    fn send_breach_summary(&self, breaches: &[Breach]) -> Result<()> {
        if let Some(message) = OutgoingMessage::summary(breaches, &self.directory) {
            tracing::info!(to = ?message.to, subject = %message.subject, "breach summary");
        }
        Ok(())
    }
}

/// Keeps every composed message in memory. Used by tests and by tooling
/// that renders an outbox.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    directory: AdminDirectory,
    outbox: Mutex<Vec<OutgoingMessage>>,
    delivered: Condvar,
}

impl MemoryNotifier {
    pub fn new(directory: AdminDirectory) -> Self {
        Self {
            directory,
            outbox: Mutex::new(Vec::new()),
            delivered: Condvar::new(),
        }
    }

    pub fn sent(&self) -> Vec<OutgoingMessage> {
        self.outbox.lock().clone()
    }

    /// Wait until at least `count` messages arrived or `timeout` passed,
    /// then return the outbox.
    pub fn wait_for(&self, count: usize, timeout: Duration) -> Vec<OutgoingMessage> {
        let deadline = Instant::now() + timeout;
        let mut outbox = self.outbox.lock();
        while outbox.len() < count {
            if self.delivered.wait_until(&mut outbox, deadline).timed_out() {
                break;
            }
        }
        outbox.clone()
    }

    fn push(&self, message: OutgoingMessage) {
        self.outbox.lock().push(message);
        self.delivered.notify_all();
    }
}

impl BreachNotifier for MemoryNotifier {
    fn send_breach_alert(&self, breach: &Breach) -> Result<()> {
        if let Some(message) = OutgoingMessage::alert(breach, &self.directory) {
            self.push(message);
        }
        Ok(())
    }

    fn send_breach_summary(&self, breaches: &[Breach]) -> Result<()> {
        if let Some(message) = OutgoingMessage::summary(breaches, &self.directory) {
            self.push(message);
        }
        Ok(())
    }
}

// ============================================================================
// Dispatch
// ============================================================================

/// Runs notifier calls off the caller's path and swallows their failures.
#[derive(Debug, Clone)]
pub struct NotificationDispatcher {
    notifier: Arc<dyn BreachNotifier>,
    executor: Executor,
}

impl NotificationDispatcher {
    /// Captures the current tokio runtime, falling back to worker threads.
    pub fn new(notifier: Arc<dyn BreachNotifier>) -> Self {
        Self::with_executor(notifier, Executor::current())
    }

    /// Always delivers on the calling thread.
    pub fn inline(notifier: Arc<dyn BreachNotifier>) -> Self {
        Self::with_executor(notifier, Executor::Inline)
    }

    pub fn with_runtime(notifier: Arc<dyn BreachNotifier>, runtime: Handle) -> Self {
        Self::with_executor(notifier, Executor::Runtime(runtime))
    }

    pub fn with_executor(notifier: Arc<dyn BreachNotifier>, executor: Executor) -> Self {
        Self { notifier, executor }
    }

    pub fn dispatch_alert(&self, breach: Breach) -> Background {
        let notifier = Arc::clone(&self.notifier);
        self.executor.spawn("breach-alert", move || {
            if let Err(e) = notifier.send_breach_alert(&breach) {
                tracing::error!(
                    breach_id = %breach.id,
                    error = %e,
                    "breach alert delivery failed"
                );
            }
        })
    }

    pub fn dispatch_summary(&self, breaches: Vec<Breach>) -> Background {
        let notifier = Arc::clone(&self.notifier);
        self.executor.spawn("breach-summary", move || {
            if let Err(e) = notifier.send_breach_summary(&breaches) {
                tracing::error!(
                    incidents = breaches.len(),
                    error = %e,
                    "breach summary delivery failed"
                );
            }
        })
    }
}
