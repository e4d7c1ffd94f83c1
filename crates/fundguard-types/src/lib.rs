//! # fundguard-types: Core types for `Fundguard`
//!
//! This crate contains shared types used across the `Fundguard` system:
//! - Entity IDs ([`UserId`])
//! - Actors and roles ([`Actor`], [`Role`])
//! - Subject references ([`RecordRef`])
//! - Request metadata ([`RequestContext`], [`IpRange`])
//! - Time sources ([`Clock`], [`SystemClock`], [`ManualClock`])

use std::{
    fmt::{Debug, Display},
    net::IpAddr,
    sync::Arc,
};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

// ============================================================================
// Entity IDs - Copy (cheap 8-byte values)
// ============================================================================

/// Unique identifier for a platform user (investor, entrepreneur, admin).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(u64);

impl UserId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for UserId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<UserId> for u64 {
    fn from(id: UserId) -> Self {
        id.0
    }
}

// ============================================================================
// Roles and actors
// ============================================================================

/// Platform role of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Entrepreneur,
    Investor,
    Admin,
    Visitor,
    /// Back-office administrator: reviews incidents but is not a full admin.
    Backadmin,
}

impl Role {
    /// Full administrator. Only admins may write admin-action audit entries
    /// or read other users' identity documents.
    pub fn is_admin(self) -> bool {
        matches!(self, Role::Admin)
    }

    /// Roles that receive security alerts and review incidents.
    pub fn is_security_reviewer(self) -> bool {
        matches!(self, Role::Admin | Role::Backadmin)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Entrepreneur => "entrepreneur",
            Role::Investor => "investor",
            Role::Admin => "admin",
            Role::Visitor => "visitor",
            Role::Backadmin => "backadmin",
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An authenticated user acting on the platform.
///
/// Audit entries and incidents keep a snapshot of the actor rather than a
/// live reference so reports stay stable if the account changes later.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub id: UserId,
    pub email: String,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<UserId>, email: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }

    /// Reference to this actor's own user record, for entries whose subject
    /// is the actor (exports, consent, profile changes).
    pub fn as_record(&self) -> RecordRef {
        RecordRef::new("User", self.id)
    }
}

// ============================================================================
// Subject references
// ============================================================================

/// Polymorphic reference to the record an action touched
/// (`subjectType` / `subjectId`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordRef {
    pub record_type: String,
    pub record_id: String,
}

impl RecordRef {
    pub fn new(record_type: impl Into<String>, record_id: impl Display) -> Self {
        Self {
            record_type: record_type.into(),
            record_id: record_id.to_string(),
        }
    }

    /// Returns true when both halves of the reference are present.
    pub fn is_complete(&self) -> bool {
        !self.record_type.trim().is_empty() && !self.record_id.trim().is_empty()
    }
}

impl Display for RecordRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.record_type, self.record_id)
    }
}

// ============================================================================
// Request metadata
// ============================================================================

/// HTTP-level metadata drawn from the inbound request.
///
/// Every field is optional: background jobs and system-level callers have
/// no request at all.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub ip_address: Option<IpAddr>,
    pub user_agent: Option<String>,
    pub path: Option<String>,
    pub method: Option<String>,
    pub referer: Option<String>,
}

impl RequestContext {
    /// Context for work with no originating request.
    pub fn system() -> Self {
        Self::default()
    }

    pub fn with_ip(mut self, ip: IpAddr) -> Self {
        self.ip_address = Some(ip);
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_path(mut self, method: impl Into<String>, path: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self.path = Some(path.into());
        self
    }

    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }

    /// IP address rendered for storage, if known.
    pub fn ip_string(&self) -> Option<String> {
        self.ip_address.map(|ip| ip.to_string())
    }
}

// ============================================================================
// Address ranges
// ============================================================================

/// Error parsing an [`IpRange`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpRangeParseError(String);

impl Display for IpRangeParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid address range: {}", self.0)
    }
}

impl std::error::Error for IpRangeParseError {}

/// CIDR address block such as `10.0.0.0/8`. A bare address is a /32 (or /128).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IpRange {
    network: IpAddr,
    prefix: u8,
}

impl IpRange {
    pub fn new(network: IpAddr, prefix: u8) -> Result<Self, IpRangeParseError> {
        let max = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if prefix > max {
            return Err(IpRangeParseError(format!("{network}/{prefix}")));
        }
        Ok(Self { network, prefix })
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// Returns true if `ip` falls inside this block. Families never match
    /// each other.
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = u32::MAX.checked_shl(32 - u32::from(self.prefix)).unwrap_or(0);
                u32::from(net) & mask == u32::from(addr) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = u128::MAX.checked_shl(128 - u32::from(self.prefix)).unwrap_or(0);
                u128::from(net) & mask == u128::from(addr) & mask
            }
            _ => false,
        }
    }
}

impl std::str::FromStr for IpRange {
    type Err = IpRangeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => (
                addr,
                Some(
                    prefix
                        .parse::<u8>()
                        .map_err(|_| IpRangeParseError(s.to_string()))?,
                ),
            ),
            None => (s, None),
        };

        let network: IpAddr = addr.parse().map_err(|_| IpRangeParseError(s.to_string()))?;
        let prefix = prefix.unwrap_or(match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        });
        Self::new(network, prefix)
    }
}

impl Display for IpRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

// ============================================================================
// Clocks
// ============================================================================

/// Source of wall-clock time for timestamps and detection windows.
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for deterministic tests and replays.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock() = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use test_case::test_case;

    #[test_case(Role::Admin, true, true; "admin")]
    #[test_case(Role::Backadmin, false, true; "backadmin")]
    #[test_case(Role::Investor, false, false; "investor")]
    #[test_case(Role::Entrepreneur, false, false; "entrepreneur")]
    #[test_case(Role::Visitor, false, false; "visitor")]
    fn test_role_privileges(role: Role, admin: bool, reviewer: bool) {
        assert_eq!(role.is_admin(), admin);
        assert_eq!(role.is_security_reviewer(), reviewer);
    }

    #[test]
    fn test_record_ref_completeness() {
        assert!(RecordRef::new("Kyc", 7).is_complete());
        assert!(!RecordRef::new("", 7).is_complete());
        assert!(!RecordRef::new("Kyc", "  ").is_complete());
        assert_eq!(RecordRef::new("Kyc", 7).to_string(), "Kyc#7");
    }

    #[test]
    fn test_actor_record() {
        let actor = Actor::new(42, "alice@example.com", Role::Investor);
        assert_eq!(actor.as_record(), RecordRef::new("User", 42));
        assert!(!actor.is_admin());
    }

    #[test]
    fn test_role_serializes_snake_case() {
        let json = serde_json::to_string(&Role::Backadmin).expect("serialize role");
        assert_eq!(json, "\"backadmin\"");
    }

    #[test]
    fn test_manual_clock_advances() {
        let start = Utc.with_ymd_and_hms(2025, 7, 14, 12, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        clock.advance(Duration::minutes(5));
        assert_eq!(clock.now(), start + Duration::minutes(5));

        let shared = clock.clone();
        shared.set(start);
        assert_eq!(clock.now(), start);
    }

    #[test_case("192.168.1.0/24", "192.168.1.77", true; "inside /24")]
    #[test_case("192.168.1.0/24", "192.168.2.1", false; "outside /24")]
    #[test_case("10.0.0.0/8", "10.250.3.4", true; "inside /8")]
    #[test_case("10.0.0.0/8", "11.0.0.1", false; "outside /8")]
    #[test_case("0.0.0.0/0", "8.8.8.8", true; "everything")]
    #[test_case("203.0.113.9", "203.0.113.9", true; "bare address")]
    #[test_case("10.0.0.0/8", "::1", false; "family mismatch")]
    #[test_case("fd00::/8", "fd12::1", true; "v6 block")]
    fn test_ip_range_contains(range: &str, ip: &str, expected: bool) {
        let range: IpRange = range.parse().expect("valid range");
        let ip: IpAddr = ip.parse().expect("valid ip");
        assert_eq!(range.contains(ip), expected);
    }

    #[test]
    fn test_ip_range_rejects_garbage() {
        assert!("10.0.0.0/33".parse::<IpRange>().is_err());
        assert!("not-an-ip/8".parse::<IpRange>().is_err());
        assert!("10.0.0.0/x".parse::<IpRange>().is_err());
        assert_eq!(
            "10.0.0.0/8".parse::<IpRange>().expect("valid").to_string(),
            "10.0.0.0/8"
        );
    }

    #[test]
    fn test_request_context_builder() {
        let ctx = RequestContext::system()
            .with_ip("10.1.2.3".parse().expect("valid ip"))
            .with_user_agent("Mozilla/5.0")
            .with_path("GET", "/api/v1/kycs/1");

        assert_eq!(ctx.ip_string().as_deref(), Some("10.1.2.3"));
        assert_eq!(ctx.method.as_deref(), Some("GET"));
        assert!(ctx.referer.is_none());
    }
}
