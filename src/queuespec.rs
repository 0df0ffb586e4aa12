//! Monitor-queues configuration string parsing.
//!
//! The exporter is told what to watch through a compact string of the form
//! `"0:celery;1:task,cache"`: a database index, a colon, a comma-separated
//! list of queue names, with entries joined by semicolons. Malformed entries
//! are dropped, never fatal, so a partially broken configuration still
//! monitors everything it can express.

use std::collections::BTreeMap;

/// Mapping from database index to the sorted, deduplicated queue names
/// monitored in that database. Built once at startup, immutable thereafter.
pub type MonitorSpec = BTreeMap<u32, Vec<String>>;

/// Parse a monitor-queues configuration string into a [`MonitorSpec`].
///
/// Entries with a missing or non-numeric database index and entries with an
/// empty queue list are dropped. Whitespace around any token is trimmed.
/// Queue names for the same database index accumulate across entries; the
/// result is deduplicated and sorted per index so downstream iteration is
/// deterministic.
pub fn parse_monitor_queues(raw: &str) -> MonitorSpec {
    let mut spec = MonitorSpec::new();

    for entry in raw.split(';') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }

        let Some((db_part, queue_part)) = entry.split_once(':') else {
            continue;
        };

        let Ok(db) = db_part.trim().parse::<u32>() else {
            continue;
        };

        let queues: Vec<&str> = queue_part
            .split(',')
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .collect();
        if queues.is_empty() {
            continue;
        }

        spec.entry(db)
            .or_default()
            .extend(queues.into_iter().map(String::from));
    }

    for queues in spec.values_mut() {
        queues.sort();
        queues.dedup();
    }

    spec
}

/// Render a spec back to its canonical string form. Parsing the output
/// yields the same spec.
pub fn format_monitor_queues(spec: &MonitorSpec) -> String {
    spec.iter()
        .map(|(db, queues)| format!("{}:{}", db, queues.join(",")))
        .collect::<Vec<_>>()
        .join(";")
}
