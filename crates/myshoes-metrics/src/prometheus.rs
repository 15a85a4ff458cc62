//! Prometheus text exposition format.
//!
//! Renders the registry into the Prometheus text exposition format for
//! scraping by a Prometheus server or compatible agent.

use std::fmt::Write;

use crate::registry::Metrics;

/// Render every registered family into Prometheus text format.
pub fn render_prometheus(metrics: &Metrics) -> String {
    let mut out = String::new();
    metrics.with_families(|families| {
        for family in families.values() {
            let d = &family.descriptor;
            let _ = writeln!(out, "# HELP {} {}", d.name, d.help);
            let _ = writeln!(out, "# TYPE {} {}", d.name, d.kind.as_str());
            for (labels, value) in &family.series {
                let _ = writeln!(out, "{}{} {}", d.name, render_labels(labels), value);
            }
        }
    });
    out
}

fn render_labels(labels: &[(String, String)]) -> String {
    if labels.is_empty() {
        return String::new();
    }
    let pairs: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{k}=\"{}\"", escape(v)))
        .collect();
    format!("{{{}}}", pairs.join(","))
}

fn escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
