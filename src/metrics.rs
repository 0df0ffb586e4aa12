//! Gauge metric records, the collection registry, and Prometheus text
//! exposition encoding.

use std::io::Write;

use async_trait::async_trait;

/// One observed value with its identifying labels.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Label key-value pairs, in emission order.
    pub labels: Vec<(String, String)>,
    /// The observed value.
    pub value: f64,
}

/// A named group of samples sharing one help text. Everything this exporter
/// emits is a gauge: values are re-observed from scratch every cycle.
#[derive(Debug, Clone)]
pub struct MetricFamily {
    /// The full Prometheus metric name.
    pub name: String,
    /// Help text for the `# HELP` comment.
    pub help: String,
    /// Samples collected this cycle.
    pub samples: Vec<Sample>,
}

impl MetricFamily {
    /// Create an empty gauge family.
    pub fn gauge(name: impl Into<String>, help: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            samples: Vec::new(),
        }
    }

    /// Append one sample.
    pub fn push(&mut self, labels: Vec<(String, String)>, value: f64) {
        self.samples.push(Sample { labels, value });
    }
}

/// A source of metric families, invoked once per collection cycle.
#[async_trait]
pub trait Collect: Send {
    async fn collect(&mut self) -> anyhow::Result<Vec<MetricFamily>>;
}

/// Explicitly constructed registry of collectors. The polling loop owns the
/// registry and is its only caller, so no interior locking is needed here.
#[derive(Default)]
pub struct Registry {
    collectors: Vec<Box<dyn Collect>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a collector to the registry.
    pub fn register(&mut self, collector: Box<dyn Collect>) {
        self.collectors.push(collector);
    }

    /// Run every collector and concatenate their families. An error from any
    /// collector aborts the cycle so the caller can keep its previous
    /// snapshot.
    pub async fn gather(&mut self) -> anyhow::Result<Vec<MetricFamily>> {
        let mut families = Vec::new();
        for collector in &mut self.collectors {
            families.extend(collector.collect().await?);
        }
        Ok(families)
    }
}

/// Render metric families in Prometheus text exposition format. Families
/// with no samples this cycle are omitted entirely.
pub fn encode(families: &[MetricFamily]) -> String {
    let mut output = Vec::with_capacity(families.len() * 128);

    for family in families {
        if family.samples.is_empty() {
            continue;
        }

        writeln!(output, "# HELP {} {}", family.name, family.help).ok();
        writeln!(output, "# TYPE {} gauge", family.name).ok();

        for sample in &family.samples {
            writeln!(
                output,
                "{}{} {}",
                family.name,
                format_labels(&sample.labels),
                format_value(sample.value)
            )
            .ok();
        }
    }

    String::from_utf8(output).unwrap_or_default()
}

/// Escape special characters in label values.
fn escape_label_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

/// Format a floating point value for Prometheus.
fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}

/// Format labels for Prometheus exposition format.
fn format_labels(labels: &[(String, String)]) -> String {
    if labels.is_empty() {
        return String::new();
    }

    let parts: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect();

    format!("{{{}}}", parts.join(","))
}
