//! Aggregated views over audit records.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tlsguard_core::SecurityRiskLevel;

use crate::event::{AuditRecord, SecurityEventType};

/// Counts over a trailing time window, for operator visibility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecuritySummary {
    /// Start of the window (exclusive).
    pub window_start: DateTime<Utc>,

    /// End of the window (inclusive).
    pub window_end: DateTime<Utc>,

    /// Records in the window.
    pub total: usize,

    /// Count per event type.
    pub by_event_type: BTreeMap<SecurityEventType, usize>,

    /// Count per risk level.
    pub by_risk: BTreeMap<SecurityRiskLevel, usize>,

    /// Count per hostname. Records without a host are not counted here.
    pub by_host: BTreeMap<String, usize>,

    /// Records at `High` risk or above.
    pub high_risk_events: usize,

    /// Confirmed insecure-mode activations.
    pub insecure_mode_usages: usize,
}

impl SecuritySummary {
    /// Aggregates the records with a timestamp in `(start, end]`.
    pub fn from_records<'a, I>(records: I, start: DateTime<Utc>, end: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = &'a AuditRecord>,
    {
        let mut summary = Self {
            window_start: start,
            window_end: end,
            total: 0,
            by_event_type: BTreeMap::new(),
            by_risk: BTreeMap::new(),
            by_host: BTreeMap::new(),
            high_risk_events: 0,
            insecure_mode_usages: 0,
        };

        for record in records {
            if record.timestamp <= start || record.timestamp > end {
                continue;
            }
            summary.total += 1;
            *summary.by_event_type.entry(record.event_type).or_default() += 1;
            *summary.by_risk.entry(record.risk).or_default() += 1;
            if !record.hostname.is_empty() {
                *summary.by_host.entry(record.hostname.clone()).or_default() += 1;
            }
            if record.risk.is_high() {
                summary.high_risk_events += 1;
            }
            if record.event_type == SecurityEventType::InsecureModeUsed && record.allowed {
                summary.insecure_mode_usages += 1;
            }
        }
        summary
    }

    /// Count for one event type.
    #[must_use]
    pub fn count(&self, event_type: SecurityEventType) -> usize {
        self.by_event_type.get(&event_type).copied().unwrap_or(0)
    }
}

impl fmt::Display for SecuritySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Security events {} .. {}",
            self.window_start.format("%Y-%m-%d %H:%M:%S"),
            self.window_end.format("%Y-%m-%d %H:%M:%S")
        )?;
        writeln!(f, "  total: {}", self.total)?;
        writeln!(f, "  high risk: {}", self.high_risk_events)?;
        writeln!(f, "  insecure mode: {}", self.insecure_mode_usages)?;
        if !self.by_event_type.is_empty() {
            writeln!(f, "  by event type:")?;
            for (event_type, count) in &self.by_event_type {
                writeln!(f, "    {event_type}: {count}")?;
            }
        }
        if !self.by_risk.is_empty() {
            writeln!(f, "  by risk:")?;
            for (risk, count) in &self.by_risk {
                writeln!(f, "    {risk}: {count}")?;
            }
        }
        if !self.by_host.is_empty() {
            writeln!(f, "  by host:")?;
            for (host, count) in &self.by_host {
                writeln!(f, "    {host}: {count}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_summary_window_and_groupings() {
        let now = Utc::now();
        let records = vec![
            AuditRecord::insecure_mode_used("a.io", "interactive", true, "dev")
                .with_timestamp(now - Duration::minutes(5)),
            AuditRecord::insecure_mode_used("a.io", "interactive", false, "timeout")
                .with_timestamp(now - Duration::minutes(4)),
            AuditRecord::risk_accepted("b.io", SecurityRiskLevel::Medium, "ok")
                .with_timestamp(now - Duration::minutes(3)),
            AuditRecord::risk_accepted("b.io", SecurityRiskLevel::High, "old")
                .with_timestamp(now - Duration::hours(2)),
        ];

        let summary = SecuritySummary::from_records(&records, now - Duration::hours(1), now);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.count(SecurityEventType::InsecureModeUsed), 2);
        assert_eq!(summary.count(SecurityEventType::RiskAccepted), 1);
        assert_eq!(summary.by_host.get("a.io"), Some(&2));
        assert_eq!(summary.by_risk.get(&SecurityRiskLevel::Critical), Some(&1));
        assert_eq!(summary.high_risk_events, 1);
        assert_eq!(summary.insecure_mode_usages, 1);

        let text = summary.to_string();
        assert!(text.contains("insecure_mode_used: 2"));
        assert!(text.contains("b.io: 1"));
    }

    #[test]
    fn test_empty_summary() {
        let now = Utc::now();
        let summary = SecuritySummary::from_records(&Vec::<AuditRecord>::new(), now - Duration::hours(1), now);
        assert_eq!(summary.total, 0);
        assert_eq!(summary.count(SecurityEventType::FallbackAttempt), 0);
    }
}
