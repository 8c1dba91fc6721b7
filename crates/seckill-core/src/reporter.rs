// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Attempt history.
//!
//! The reporter keeps an append-only list of [`AttemptRecord`]s and mirrors
//! each one to the `seckill::history` tracing target, keyed by date and
//! architecture, so a log sink can file them per day and machine type.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::classify::ErrorKind;
use crate::outcome::{AttemptOutcome, OutcomeClass};
use crate::target::Architecture;

/// Tracing target for attempt history lines.
pub const HISTORY_TARGET: &str = "seckill::history";

/// One launch attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based attempt number.
    pub sequence: u32,
    pub timestamp: DateTime<Utc>,
    pub architecture: Architecture,
    pub class: OutcomeClass,
    pub kind: Option<ErrorKind>,
    pub status: Option<u16>,
    pub code: Option<String>,
    pub message: Option<String>,
    /// Wait before the next attempt; `None` for the last one.
    pub wait_ms: Option<u64>,
}

impl AttemptRecord {
    /// Build a record from an attempt outcome.
    pub fn from_outcome(
        sequence: u32,
        architecture: Architecture,
        outcome: &AttemptOutcome,
        wait: Option<Duration>,
    ) -> Self {
        let error = outcome.error();
        Self {
            sequence,
            timestamp: Utc::now(),
            architecture,
            class: outcome.class(),
            kind: outcome.kind(),
            status: error.and_then(|e| e.status()),
            code: error.map(|e| e.code().to_string()),
            message: match outcome {
                AttemptOutcome::Succeeded(instance) => {
                    Some(format!("instance {} accepted", instance.id))
                }
                _ => error.map(|e| e.message().to_string()),
            },
            wait_ms: wait.map(|w| w.as_millis() as u64),
        }
    }

    /// Plain-text line in the history log format.
    pub fn log_line(&self) -> String {
        let mut line = format!(
            "[{}] {} #{} {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.architecture.label(),
            self.sequence,
            self.class.as_str(),
        );
        if let Some(kind) = self.kind {
            line.push_str(&format!(" ({})", kind));
        }
        if let (Some(status), Some(code)) = (self.status, self.code.as_deref()) {
            line.push_str(&format!(" {} {}", status, code));
        }
        if let Some(message) = &self.message {
            line.push_str(&format!(": {}", message));
        }
        if let Some(wait) = self.wait_ms {
            line.push_str(&format!(" (next in {}s)", wait / 1000));
        }
        line
    }
}

/// Aggregate view of a run's attempts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptSummary {
    pub total: u32,
    pub successes: u32,
    pub by_kind: BTreeMap<ErrorKind, u32>,
    pub first_attempt_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_class: Option<OutcomeClass>,
}

impl AttemptSummary {
    /// Count for one error kind.
    pub fn count(&self, kind: ErrorKind) -> u32 {
        self.by_kind.get(&kind).copied().unwrap_or(0)
    }
}

impl fmt::Display for AttemptSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} attempts", self.total)?;
        if self.by_kind.is_empty() {
            return Ok(());
        }
        let parts: Vec<String> = self
            .by_kind
            .iter()
            .map(|(kind, count)| format!("{}={}", kind, count))
            .collect();
        write!(f, " ({})", parts.join(", "))
    }
}

/// Append-only attempt history.
#[derive(Debug, Clone)]
pub struct OutcomeReporter {
    architecture: Architecture,
    records: Vec<AttemptRecord>,
}

impl OutcomeReporter {
    pub fn new(architecture: Architecture) -> Self {
        Self {
            architecture,
            records: Vec::new(),
        }
    }

    /// Sequence number the next record will get.
    pub fn next_sequence(&self) -> u32 {
        self.records.len() as u32 + 1
    }

    /// Append a record and emit it as a history line.
    pub fn record(&mut self, record: AttemptRecord) -> &AttemptRecord {
        let date = record.timestamp.format("%Y-%m-%d").to_string();
        let line = record.log_line();
        match record.class {
            OutcomeClass::FatalError => warn!(
                target: HISTORY_TARGET,
                date = %date,
                arch = %record.architecture,
                sequence = record.sequence,
                kind = record.kind.map(|k| k.as_str()),
                "{}", line
            ),
            _ => info!(
                target: HISTORY_TARGET,
                date = %date,
                arch = %record.architecture,
                sequence = record.sequence,
                kind = record.kind.map(|k| k.as_str()),
                "{}", line
            ),
        }
        self.records.push(record);
        &self.records[self.records.len() - 1]
    }

    /// Build and append a record for `outcome`.
    pub fn record_outcome(
        &mut self,
        outcome: &AttemptOutcome,
        wait: Option<Duration>,
    ) -> &AttemptRecord {
        let record =
            AttemptRecord::from_outcome(self.next_sequence(), self.architecture, outcome, wait);
        self.record(record)
    }

    pub fn records(&self) -> &[AttemptRecord] {
        &self.records
    }

    pub fn last(&self) -> Option<&AttemptRecord> {
        self.records.last()
    }

    /// Attempt counts by error kind.
    pub fn summary(&self) -> AttemptSummary {
        let mut summary = AttemptSummary {
            total: self.records.len() as u32,
            first_attempt_at: self.records.first().map(|r| r.timestamp),
            last_attempt_at: self.records.last().map(|r| r.timestamp),
            last_class: self.records.last().map(|r| r.class),
            ..Default::default()
        };
        for record in &self.records {
            match record.kind {
                Some(kind) => *summary.by_kind.entry(kind).or_insert(0) += 1,
                None => summary.successes += 1,
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Instance;
    use crate::provider::mock::{auth_error, capacity_error};

    fn success() -> AttemptOutcome {
        AttemptOutcome::Succeeded(Instance {
            id: "ocid1.instance.1".to_string(),
            display_name: "x".to_string(),
            availability_domain: "AD-1".to_string(),
            shape: "VM.Standard.A1.Flex".to_string(),
            lifecycle_state: "PROVISIONING".to_string(),
            time_created: None,
        })
    }

    #[test]
    fn test_records_are_sequenced() {
        let mut reporter = OutcomeReporter::new(Architecture::Arm);
        reporter.record_outcome(
            &AttemptOutcome::Retryable {
                kind: ErrorKind::Capacity,
                error: capacity_error(),
            },
            Some(Duration::from_secs(60)),
        );
        reporter.record_outcome(&success(), None);

        let records = reporter.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].sequence, 1);
        assert_eq!(records[0].status, Some(500));
        assert_eq!(records[0].wait_ms, Some(60_000));
        assert_eq!(records[1].sequence, 2);
        assert_eq!(records[1].class, OutcomeClass::Success);
        assert_eq!(records[1].wait_ms, None);
    }

    #[test]
    fn test_summary_counts_by_kind() {
        let mut reporter = OutcomeReporter::new(Architecture::Amd);
        for _ in 0..3 {
            reporter.record_outcome(
                &AttemptOutcome::Retryable {
                    kind: ErrorKind::Capacity,
                    error: capacity_error(),
                },
                Some(Duration::from_secs(10)),
            );
        }
        reporter.record_outcome(
            &AttemptOutcome::Fatal {
                kind: ErrorKind::Auth,
                error: auth_error(),
                escalated: false,
            },
            None,
        );

        let summary = reporter.summary();
        assert_eq!(summary.total, 4);
        assert_eq!(summary.count(ErrorKind::Capacity), 3);
        assert_eq!(summary.count(ErrorKind::Auth), 1);
        assert_eq!(summary.count(ErrorKind::Quota), 0);
        assert_eq!(summary.successes, 0);
        assert_eq!(summary.last_class, Some(OutcomeClass::FatalError));
        assert_eq!(summary.to_string(), "4 attempts (capacity=3, auth=1)");
    }

    #[test]
    fn test_log_line_format() {
        let record = AttemptRecord::from_outcome(
            7,
            Architecture::Arm,
            &AttemptOutcome::Retryable {
                kind: ErrorKind::Capacity,
                error: capacity_error(),
            },
            Some(Duration::from_secs(60)),
        );
        let line = record.log_line();
        assert!(line.contains("ARM #7 retryable_error (capacity) 500 InternalError"));
        assert!(line.ends_with("Out of host capacity. (next in 60s)"));
    }
}
