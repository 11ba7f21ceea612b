//! Scenario reports in text and JSON form

use std::fmt;

use memocache::{Args, CacheStats, Memo};
use serde::Serialize;

/// Snapshot of a memo's counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsReport {
    pub hits: u64,
    pub misses: u64,
    pub failures: u64,
    pub inserts: u64,
    pub waits: u64,
    pub hit_ratio: f64,
}

impl From<&CacheStats> for StatsReport {
    fn from(stats: &CacheStats) -> Self {
        Self {
            hits: stats.hits(),
            misses: stats.misses(),
            failures: stats.failures(),
            inserts: stats.inserts(),
            waits: stats.waits(),
            hit_ratio: stats.hit_ratio(),
        }
    }
}

/// Outcome of one scenario run
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub scenario: String,
    pub call: String,
    /// Kept as a string so u128 results survive JSON
    pub result: String,
    pub entries: usize,
    pub stats: StatsReport,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<String>,
}

impl Report {
    /// Capture the state of `memo` after a run
    pub fn capture<A, R, E>(
        scenario: &str,
        call: String,
        result: String,
        memo: &Memo<A, R, E>,
    ) -> Self
    where
        A: Args,
        R: Clone,
    {
        Self {
            scenario: scenario.to_string(),
            call,
            result,
            entries: memo.len(),
            stats: StatsReport::from(memo.stats()),
            keys: memo.keys().iter().map(|k| k.to_string()).collect(),
        }
    }

    /// Pretty-printed JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} = {}", self.call, self.result)?;
        writeln!(f, "  entries:   {}", self.entries)?;
        writeln!(
            f,
            "  hits:      {} (ratio {:.2})",
            self.stats.hits, self.stats.hit_ratio
        )?;
        writeln!(f, "  misses:    {}", self.stats.misses)?;
        writeln!(f, "  failures:  {}", self.stats.failures)?;
        if !self.keys.is_empty() {
            writeln!(f, "  keys:")?;
            for key in &self.keys {
                writeln!(f, "    {}", key)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memocache::memoize;

    #[test]
    fn test_report_capture() {
        let memo = memoize(|(x,): (u32,)| x + 1);
        memo.call((1,));
        memo.call((1,));

        let report = Report::capture("inc", "inc(1)".to_string(), "2".to_string(), &memo);

        assert_eq!(report.entries, 1);
        assert_eq!(report.stats.hits, 1);
        assert_eq!(report.stats.misses, 1);
        assert_eq!(report.keys, vec!["(1)".to_string()]);
    }

    #[test]
    fn test_report_json() {
        let memo = memoize(|(x,): (u32,)| x);
        memo.call((9,));

        let mut report = Report::capture("id", "id(9)".to_string(), "9".to_string(), &memo);
        report.keys.clear();

        let json = report.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["result"], "9");
        assert_eq!(value["entries"], 1);
        assert_eq!(value["stats"]["misses"], 1);
        assert!(value.get("keys").is_none());
    }

    #[test]
    fn test_report_text() {
        let memo = memoize(|(x,): (u32,)| x);
        memo.call((3,));

        let report = Report::capture("id", "id(3)".to_string(), "3".to_string(), &memo);
        let text = report.to_string();

        assert!(text.starts_with("id(3) = 3\n"));
        assert!(text.contains("entries:   1"));
        assert!(text.contains("    (3)"));
    }
}
