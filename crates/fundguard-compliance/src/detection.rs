//! Heuristic breach detection.
//!
//! Each `detect_*` operation is a predicate over request context followed by
//! incident creation. The rules are deliberately simple (address ranges,
//! user-agent substrings, fixed thresholds) and live in [`DetectionRules`].
//!
//! On creation an incident is stored, optionally mirrored into the audit
//! trail as `breach_detected`, and for high or critical severity handed to
//! the [`NotificationDispatcher`]. Neither side effect can fail the
//! incident write.

use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Duration, FixedOffset, Offset, Timelike, Utc};
use dashmap::DashMap;
use fundguard_types::{Actor, Clock, IpRange, RequestContext, SystemClock};
use serde_json::{Map, Value, json};

use crate::audit::{AuditLogger, TransactionLog};
use crate::background::Background;
use crate::breach::{Breach, BreachType, IncidentStore, NewBreach, Result, Severity};
use crate::notify::NotificationDispatcher;

/// Data type whose out-of-hours access is flagged.
pub const KYC_DOCUMENTS: &str = "kyc_documents";

/// Data type that always counts as bulk personal-data access.
pub const PERSONAL_DATA: &str = "personal_data";

// ============================================================================
// Rules
// ============================================================================

/// Detection heuristics.
///
/// Fields are private and immutable after construction. Use
/// [`DetectionRulesBuilder`] for anything other than the defaults.
#[derive(Debug, Clone)]
pub struct DetectionRules {
    suspicious_ranges: Vec<IpRange>,
    /// Lowercased.
    suspicious_agents: Vec<String>,
    request_rate_limit: u64,
    rate_window: Duration,
    bulk_record_threshold: u64,
    bulk_download_threshold: u64,
    /// Lowercased, without a leading dot.
    disallowed_extensions: Vec<String>,
    day_start_hour: u32,
    day_end_hour: u32,
    local_offset: FixedOffset,
}

impl Default for DetectionRules {
    fn default() -> Self {
        let ranges = ["192.168.1.0/24", "10.0.0.0/8"]
            .iter()
            .filter_map(|r| r.parse().ok())
            .collect();

        Self {
            suspicious_ranges: ranges,
            suspicious_agents: ["bot", "crawler", "scraper", "curl", "wget"]
                .into_iter()
                .map(String::from)
                .collect(),
            request_rate_limit: 100,
            rate_window: Duration::seconds(60),
            bulk_record_threshold: 100,
            bulk_download_threshold: 10,
            disallowed_extensions: ["exe", "bat", "sh", "ps1"]
                .into_iter()
                .map(String::from)
                .collect(),
            day_start_hour: 6,
            day_end_hour: 22,
            local_offset: Utc.fix(),
        }
    }
}

impl DetectionRules {
    pub fn builder() -> DetectionRulesBuilder {
        DetectionRulesBuilder::new()
    }

    pub fn request_rate_limit(&self) -> u64 {
        self.request_rate_limit
    }

    pub fn rate_window(&self) -> Duration {
        self.rate_window
    }

    pub fn bulk_record_threshold(&self) -> u64 {
        self.bulk_record_threshold
    }

    pub fn bulk_download_threshold(&self) -> u64 {
        self.bulk_download_threshold
    }

    pub fn is_suspicious_ip(&self, ip: IpAddr) -> bool {
        self.suspicious_ranges.iter().any(|r| r.contains(ip))
    }

    /// Case-insensitive substring match.
    pub fn is_suspicious_agent(&self, user_agent: &str) -> bool {
        let ua = user_agent.to_lowercase();
        self.suspicious_agents.iter().any(|p| ua.contains(p.as_str()))
    }

    /// Accepts a bare extension (`exe`, `.EXE`) or a file name.
    pub fn is_disallowed_extension(&self, file_type: &str) -> bool {
        let ext = file_type
            .trim()
            .rsplit('.')
            .next()
            .unwrap_or_default()
            .to_lowercase();
        !ext.is_empty() && self.disallowed_extensions.contains(&ext)
    }

    /// Hour before the start or after the end of the working day, in local time.
    pub fn is_out_of_hours(&self, at: DateTime<Utc>) -> bool {
        let hour = at.with_timezone(&self.local_offset).hour();
        hour < self.day_start_hour || hour > self.day_end_hour
    }
}

/// Builder for [`DetectionRules`], starting from the defaults.
#[derive(Debug, Clone, Default)]
pub struct DetectionRulesBuilder {
    rules: DetectionRules,
}

impl DetectionRulesBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the default ranges.
    pub fn suspicious_ranges(mut self, ranges: impl IntoIterator<Item = IpRange>) -> Self {
        self.rules.suspicious_ranges = ranges.into_iter().collect();
        self
    }

    /// Replaces the default user-agent patterns.
    pub fn suspicious_agents<S: AsRef<str>>(mut self, patterns: impl IntoIterator<Item = S>) -> Self {
        self.rules.suspicious_agents = patterns
            .into_iter()
            .map(|p| p.as_ref().trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        self
    }

    pub fn request_rate_limit(mut self, limit: u64) -> Self {
        self.rules.request_rate_limit = limit;
        self
    }

    /// # Panics
    /// Panics if `window` is not positive. Configuration is validated before
    /// it reaches the builder.
    pub fn rate_window(mut self, window: Duration) -> Self {
        assert!(window > Duration::zero(), "rate window must be positive");
        self.rules.rate_window = window;
        self
    }

    pub fn bulk_record_threshold(mut self, threshold: u64) -> Self {
        self.rules.bulk_record_threshold = threshold;
        self
    }

    pub fn bulk_download_threshold(mut self, threshold: u64) -> Self {
        self.rules.bulk_download_threshold = threshold;
        self
    }

    pub fn disallowed_extensions<S: AsRef<str>>(
        mut self,
        extensions: impl IntoIterator<Item = S>,
    ) -> Self {
        self.rules.disallowed_extensions = extensions
            .into_iter()
            .map(|e| e.as_ref().trim().trim_start_matches('.').to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        self
    }

    /// Local hours `start..=end` count as the working day.
    ///
    /// # Panics
    /// Panics if either hour is outside 0-23 or `start > end`.
    pub fn working_hours(mut self, start: u32, end: u32) -> Self {
        assert!(start < 24 && end < 24, "working hours must be 0-23, got {start}-{end}");
        assert!(start <= end, "working day starts after it ends: {start}-{end}");
        self.rules.day_start_hour = start;
        self.rules.day_end_hour = end;
        self
    }

    pub fn local_offset(mut self, offset: FixedOffset) -> Self {
        self.rules.local_offset = offset;
        self
    }

    pub fn build(self) -> DetectionRules {
        self.rules
    }
}

// ============================================================================
// Rate counting
// ============================================================================

/// Fixed-window request counter per client address.
///
/// Closed windows are swept by `hit` at most once per window length.
#[derive(Debug, Default)]
pub struct RateCounter {
    windows: DashMap<IpAddr, (DateTime<Utc>, u64)>,
    /// Unix millis of the next sweep.
    next_sweep: AtomicI64,
}

impl RateCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one request and return the total in the current window.
    pub fn hit(&self, ip: IpAddr, now: DateTime<Utc>, window: Duration) -> u64 {
        self.sweep_if_due(now, window);
        let mut slot = self.windows.entry(ip).or_insert((now, 0));
        if now - slot.0 >= window {
            *slot = (now, 0);
        }
        slot.1 += 1;
        slot.1
    }

    pub fn count(&self, ip: IpAddr, now: DateTime<Utc>, window: Duration) -> u64 {
        self.windows
            .get(&ip)
            .map_or(0, |slot| if now - slot.0 >= window { 0 } else { slot.1 })
    }

    /// Drop windows that closed before `now`.
    pub fn purge_expired(&self, now: DateTime<Utc>, window: Duration) {
        self.windows.retain(|_, slot| now - slot.0 < window);
    }

    pub fn tracked(&self) -> usize {
        self.windows.len()
    }

    fn sweep_if_due(&self, now: DateTime<Utc>, window: Duration) {
        let due = self.next_sweep.load(Ordering::Relaxed);
        if now.timestamp_millis() < due {
            return;
        }
        let next = (now + window).timestamp_millis();
        if self
            .next_sweep
            .compare_exchange(due, next, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            self.purge_expired(now, window);
        }
    }
}

// ============================================================================
// Detector
// ============================================================================

/// Turns request and access signals into incidents.
#[derive(Debug)]
pub struct BreachDetector {
    rules: DetectionRules,
    incidents: Arc<IncidentStore>,
    rate: RateCounter,
    notifier: Option<NotificationDispatcher>,
    audit: Option<Arc<TransactionLog>>,
    clock: Arc<dyn Clock>,
}

impl BreachDetector {
    pub fn new(rules: DetectionRules, incidents: Arc<IncidentStore>) -> Self {
        Self {
            rules,
            incidents,
            rate: RateCounter::new(),
            notifier: None,
            audit: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_notifier(mut self, notifier: NotificationDispatcher) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Mirror every incident into `log` as a `breach_detected` entry.
    pub fn with_audit_log(mut self, log: Arc<TransactionLog>) -> Self {
        self.audit = Some(log);
        self
    }

    pub fn rules(&self) -> &DetectionRules {
        &self.rules
    }

    pub fn incidents(&self) -> &Arc<IncidentStore> {
        &self.incidents
    }

    /// Feed the per-address rate counter. Returns the count in the current
    /// window, or zero when the request carries no address.
    pub fn record_request(&self, ctx: &RequestContext) -> u64 {
        match ctx.ip_address {
            Some(ip) => self.rate.hit(ip, self.clock.now(), self.rules.rate_window),
            None => 0,
        }
    }

    /// Flags anonymous requests from a suspicious range, from a scripted
    /// client, or from an address over the rate limit.
    ///
    /// Requests made by a signed-in actor are not evaluated.
    pub fn detect_unauthorized_access(
        &self,
        ctx: &RequestContext,
        actor: Option<&Actor>,
    ) -> Result<Option<Breach>> {
        if actor.is_some() {
            return Ok(None);
        }

        let now = self.clock.now();
        let mut reasons = Vec::new();
        let mut request_count = 0;

        if let Some(ip) = ctx.ip_address {
            if self.rules.is_suspicious_ip(ip) {
                reasons.push("suspicious_ip_range");
            }
            request_count = self.rate.count(ip, now, self.rules.rate_window);
            if request_count > self.rules.request_rate_limit {
                reasons.push("rate_limit_exceeded");
            }
        }
        if ctx
            .user_agent
            .as_deref()
            .is_some_and(|ua| self.rules.is_suspicious_agent(ua))
        {
            reasons.push("suspicious_user_agent");
        }

        if reasons.is_empty() {
            return Ok(None);
        }

        let mut new = NewBreach::new(
            BreachType::UnauthorizedAccess,
            Severity::High,
            "Unauthorized access attempt detected",
        );
        new.metadata = object(json!({
            "reasons": reasons,
            "request_count": request_count,
            "path": ctx.path,
            "method": ctx.method,
            "referer": ctx.referer,
        }));
        self.raise(new, None, ctx).map(Some)
    }

    /// Flags out-of-hours KYC document access, any bulk personal-data
    /// access, and access to more records than the bulk threshold.
    pub fn detect_suspicious_data_access(
        &self,
        ctx: &RequestContext,
        actor: Option<&Actor>,
        data_type: &str,
        record_count: Option<u64>,
    ) -> Result<Option<Breach>> {
        let now = self.clock.now();
        let mut reasons = Vec::new();

        if data_type == KYC_DOCUMENTS && self.rules.is_out_of_hours(now) {
            reasons.push("out_of_hours_kyc_access");
        }
        if data_type == PERSONAL_DATA {
            reasons.push("bulk_personal_data_access");
        }
        if record_count.is_some_and(|n| n > self.rules.bulk_record_threshold) {
            reasons.push("bulk_record_access");
        }

        if reasons.is_empty() {
            return Ok(None);
        }

        let mut new = NewBreach::new(
            BreachType::DataExposure,
            Severity::Critical,
            format!("Potential data exposure detected: {data_type}"),
        );
        new.affected_data = Some(data_type.to_string());
        new.affected_records_count = record_count;
        new.metadata = object(json!({
            "reasons": reasons,
            "data_type": data_type,
            "record_count": record_count,
            "access_time": now.to_rfc3339(),
            "path": ctx.path,
        }));
        self.raise(new, actor, ctx).map(Some)
    }

    /// Record a violation the caller has already established.
    pub fn detect_consent_violation(
        &self,
        ctx: &RequestContext,
        actor: Option<&Actor>,
        violation_type: &str,
    ) -> Result<Breach> {
        let mut new = NewBreach::new(
            BreachType::ConsentViolation,
            Severity::High,
            format!("Consent violation detected: {violation_type}"),
        );
        new.metadata = object(json!({ "violation_type": violation_type }));
        self.raise(new, actor, ctx)
    }

    /// System-level incident with no actor and no request.
    pub fn detect_encryption_failure(&self, component: &str, error: &str) -> Result<Breach> {
        let mut new = NewBreach::new(
            BreachType::EncryptionFailure,
            Severity::Critical,
            format!("Encryption failure detected in {component}"),
        );
        new.metadata = object(json!({
            "component": component,
            "error": error,
        }));
        self.raise(new, None, &RequestContext::system())
    }

    pub fn detect_unusual_download(
        &self,
        ctx: &RequestContext,
        actor: Option<&Actor>,
        file_type: &str,
        file_count: u64,
    ) -> Result<Option<Breach>> {
        let mut reasons = Vec::new();
        if file_count > self.rules.bulk_download_threshold {
            reasons.push("bulk_download");
        }
        if self.rules.is_disallowed_extension(file_type) {
            reasons.push("disallowed_file_type");
        }

        if reasons.is_empty() {
            return Ok(None);
        }

        let mut new = NewBreach::new(
            BreachType::SuspiciousActivity,
            Severity::Medium,
            "Suspicious activity detected: unusual_download",
        );
        new.metadata = object(json!({
            "activity": "unusual_download",
            "reasons": reasons,
            "file_type": file_type,
            "file_count": file_count,
        }));
        self.raise(new, actor, ctx).map(Some)
    }

    pub fn detect_failed_authentication(
        &self,
        ctx: &RequestContext,
        email: &str,
        reason: Option<&str>,
    ) -> Result<Breach> {
        let mut new = NewBreach::new(
            BreachType::SuspiciousActivity,
            Severity::Medium,
            "Suspicious activity detected: failed_authentication",
        );
        new.metadata = object(json!({
            "activity": "failed_authentication",
            "email": email,
            "reason": reason,
        }));
        self.raise(new, None, ctx)
    }

    /// Send a summary of the last 24 hours of incidents, if there were any.
    pub fn dispatch_recent_summary(&self) -> Option<Background> {
        let notifier = self.notifier.as_ref()?;
        let recent = self.incidents.recent(self.clock.now());
        if recent.is_empty() {
            return None;
        }
        Some(notifier.dispatch_summary(recent))
    }

    fn raise(&self, mut new: NewBreach, actor: Option<&Actor>, ctx: &RequestContext) -> Result<Breach> {
        new.actor = actor.cloned();
        new.ip_address = ctx.ip_string();
        new.user_agent.clone_from(&ctx.user_agent);

        let breach = Breach::open(new, self.clock.now())?;
        self.incidents.insert(breach.clone());

        tracing::warn!(
            breach_id = %breach.id,
            breach_type = %breach.breach_type,
            severity = %breach.severity,
            actor = ?breach.actor.as_ref().map(|a| a.id),
            ip = ?breach.ip_address,
            "security incident detected"
        );

        if let Some(log) = &self.audit {
            let logger = AuditLogger::new(Arc::clone(log), None, ctx.clone());
            if let Err(e) = logger.log_breach_detected(&breach) {
                tracing::error!(breach_id = %breach.id, error = %e, "failed to audit incident");
            }
        }

        if breach.severity.requires_alert() {
            if let Some(notifier) = &self.notifier {
                // Detached: delivery never blocks or fails the incident
                drop(notifier.dispatch_alert(breach.clone()));
            }
        }

        Ok(breach)
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
