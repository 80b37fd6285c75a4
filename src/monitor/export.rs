//! Plain-text metrics exposition.
//!
//! One block per metric, blank-line separated:
//!
//! ```text
//! # HELP db_pool_size Nominal pool size
//! # TYPE db_pool_size gauge
//! db_pool_size 5
//! ```

use std::fmt::Write;

use super::PoolSnapshot;

/// Metric type as written on the `# TYPE` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Value that can go up and down.
    Gauge,
    /// Monotonic total.
    Counter,
}

impl MetricKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Gauge => "gauge",
            Self::Counter => "counter",
        }
    }
}

/// Render a snapshot in the text exposition format.
#[must_use]
pub fn render_snapshot(snapshot: &PoolSnapshot) -> String {
    let metrics: [(&str, &str, MetricKind, String); 10] = [
        ("db_pool_size", "Nominal pool size", MetricKind::Gauge, snapshot.pool_size.to_string()),
        (
            "db_pool_checked_out",
            "Resources currently checked out",
            MetricKind::Gauge,
            snapshot.checked_out.to_string(),
        ),
        (
            "db_pool_overflow",
            "Resources open beyond the pool size",
            MetricKind::Gauge,
            snapshot.overflow.to_string(),
        ),
        (
            "db_pool_checked_in",
            "Idle resources in the pool",
            MetricKind::Gauge,
            snapshot.checked_in.to_string(),
        ),
        (
            "db_pool_usage_percent",
            "Checked out resources as a percentage of total capacity",
            MetricKind::Gauge,
            format!("{:.2}", snapshot.usage_percent),
        ),
        (
            "db_pool_checkouts_total",
            "Total resource checkouts",
            MetricKind::Counter,
            snapshot.total_checkouts.to_string(),
        ),
        (
            "db_pool_checkins_total",
            "Total resource checkins",
            MetricKind::Counter,
            snapshot.total_checkins.to_string(),
        ),
        (
            "db_pool_overflows_total",
            "Total checkouts served from overflow",
            MetricKind::Counter,
            snapshot.total_overflows.to_string(),
        ),
        (
            "db_pool_invalidations_total",
            "Total invalidated resources",
            MetricKind::Counter,
            snapshot.total_invalidations.to_string(),
        ),
        (
            "db_pool_timeouts_total",
            "Total checkout timeouts",
            MetricKind::Counter,
            snapshot.total_timeouts.to_string(),
        ),
    ];

    let mut out = String::new();
    for (i, (name, help, kind, value)) in metrics.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let _ = writeln!(out, "# HELP {name} {help}");
        let _ = writeln!(out, "# TYPE {name} {}", kind.as_str());
        let _ = writeln!(out, "{name} {value}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> PoolSnapshot {
        PoolSnapshot {
            timestamp_ms: 1,
            pool_size: 5,
            checked_out: 3,
            overflow: 0,
            checked_in: 2,
            max_overflow: 5,
            total_checkouts: 42,
            total_checkins: 39,
            total_overflows: 1,
            total_invalidations: 2,
            total_timeouts: 0,
            usage_percent: 30.0,
        }
    }

    #[test]
    fn test_render_contains_help_type_value() {
        let out = render_snapshot(&snapshot());
        assert!(out.contains(
            "# HELP db_pool_size Nominal pool size\n# TYPE db_pool_size gauge\ndb_pool_size 5\n"
        ));
        assert!(out.contains(
            "# TYPE db_pool_checkouts_total counter\ndb_pool_checkouts_total 42\n"
        ));
        assert!(out.contains("db_pool_usage_percent 30.00\n"));
    }

    #[test]
    fn test_blocks_are_blank_line_separated() {
        let out = render_snapshot(&snapshot());
        let blocks: Vec<&str> = out.trim_end().split("\n\n").collect();
        assert_eq!(blocks.len(), 10);
        for block in blocks {
            let lines: Vec<&str> = block.lines().collect();
            assert_eq!(lines.len(), 3);
            assert!(lines[0].starts_with("# HELP "));
            assert!(lines[1].starts_with("# TYPE "));
        }
    }
}
