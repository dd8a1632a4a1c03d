//! Demo run report (text and JSON)

use anyhow::Result;
use callback_bridge::Outcome;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write;

use crate::config::Scenario;

/// Per-outcome counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub success: usize,
    pub error: usize,
    pub teardown: usize,
}

impl OutcomeCounts {
    pub fn add(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Success => self.success += 1,
            Outcome::Error => self.error += 1,
            Outcome::Teardown => self.teardown += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.success + self.error + self.teardown
    }
}

/// Summary of one demo run
#[derive(Debug, Clone, Serialize)]
pub struct DemoReport {
    pub scenario: Scenario,
    pub handlers: String,
    pub iterations: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Invocations that reached an entry point
    pub delivered: OutcomeCounts,
    /// Invocations refused by a guarded descriptor
    pub rejected: OutcomeCounts,
    /// Only known when the built-in entry points are used
    pub contexts_released: Option<usize>,
    pub violations: Vec<String>,
}

impl DemoReport {
    pub fn new(scenario: Scenario, handlers: impl Into<String>, iterations: usize) -> Self {
        Self {
            scenario,
            handlers: handlers.into(),
            iterations,
            started_at: Utc::now(),
            finished_at: None,
            delivered: OutcomeCounts::default(),
            rejected: OutcomeCounts::default(),
            contexts_released: None,
            violations: Vec::new(),
        }
    }

    pub fn violation(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::warn!("violation: {}", message);
        self.violations.push(message);
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn elapsed_ms(&self) -> Option<i64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "═══════════════════════════════════════════════");
        let _ = writeln!(out, "  Callback Bridge - {} scenario", self.scenario);
        let _ = writeln!(out, "═══════════════════════════════════════════════");
        let _ = writeln!(out, "Handlers:    {}", self.handlers);
        let _ = writeln!(out, "Iterations:  {}", self.iterations);
        let _ = writeln!(out, "Started:     {}", self.started_at.to_rfc3339());
        if let Some(ms) = self.elapsed_ms() {
            let _ = writeln!(out, "Elapsed:     {} ms", ms);
        }
        let _ = writeln!(
            out,
            "Delivered:   success={} error={} teardown={}",
            self.delivered.success, self.delivered.error, self.delivered.teardown
        );
        if self.rejected.total() > 0 {
            let _ = writeln!(
                out,
                "Rejected:    success={} error={} teardown={}",
                self.rejected.success, self.rejected.error, self.rejected.teardown
            );
        }
        if let Some(released) = self.contexts_released {
            let _ = writeln!(out, "Released:    {} context(s)", released);
        }

        if self.violations.is_empty() {
            let _ = writeln!(out, "\n✓ Every descriptor completed and was torn down exactly once");
        } else {
            let _ = writeln!(out, "\n✗ {} violation(s):", self.violations.len());
            for v in &self.violations {
                let _ = writeln!(out, "  • {}", v);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_counts() {
        let mut counts = OutcomeCounts::default();
        counts.add(Outcome::Success);
        counts.add(Outcome::Teardown);
        counts.add(Outcome::Teardown);
        assert_eq!(
            counts,
            OutcomeCounts {
                success: 1,
                error: 0,
                teardown: 2
            }
        );
        assert_eq!(counts.total(), 3);
    }

    #[test]
    fn test_clean_report_text() {
        let mut report = DemoReport::new(Scenario::Success, "builtin", 2);
        report.delivered.success = 2;
        report.delivered.teardown = 2;
        report.contexts_released = Some(2);
        report.finish();

        assert!(report.is_clean());
        assert!(report.elapsed_ms().is_some());
        let text = report.render_text();
        assert!(text.contains("success scenario"));
        assert!(text.contains("success=2 error=0 teardown=2"));
        assert!(text.contains("Released:    2 context(s)"));
        assert!(!text.contains("Rejected"));
    }

    #[test]
    fn test_violations_are_listed() {
        let mut report = DemoReport::new(Scenario::Stress, "builtin", 1);
        report.violation("descriptor 0 torn down 2 times");
        assert!(!report.is_clean());
        assert!(report.render_text().contains("descriptor 0 torn down 2 times"));
    }

    #[test]
    fn test_json_report() {
        let mut report = DemoReport::new(Scenario::Abandon, "libhandlers.so", 1);
        report.delivered.add(Outcome::Teardown);
        report.finish();

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["scenario"], "abandon");
        assert_eq!(json["handlers"], "libhandlers.so");
        assert_eq!(json["delivered"]["teardown"], 1);
        assert!(json["contexts_released"].is_null());
        assert!(json["finished_at"].is_string());
    }
}
