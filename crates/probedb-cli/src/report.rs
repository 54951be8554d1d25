//! Metrics export for finished workloads.

use std::collections::BTreeMap;

use probedb_core::{prometheus_text, RegistrySnapshot};

use crate::config::ExportFormat;
use crate::error::Result;
use crate::workload::BackendReport;

/// Render every backend's registry in `format`.
///
/// Prometheus output labels each sample with its backend; JSON output is
/// an object keyed by backend.
pub fn render(reports: &[BackendReport], format: ExportFormat) -> Result<String> {
    match format {
        ExportFormat::Prometheus => Ok(render_prometheus(reports)),
        ExportFormat::Json => {
            let snapshots: BTreeMap<&str, RegistrySnapshot> = reports
                .iter()
                .map(|report| (report.backend, report.registry.snapshot()))
                .collect();
            Ok(serde_json::to_string_pretty(&snapshots)?)
        }
    }
}

fn render_prometheus(reports: &[BackendReport]) -> String {
    let labels: Vec<[(&str, &str); 1]> = reports
        .iter()
        .map(|report| [("backend", report.backend)])
        .collect();
    let registries: Vec<_> = labels
        .iter()
        .zip(reports)
        .map(|(labels, report)| (&labels[..], &*report.registry))
        .collect();
    prometheus_text(&registries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use probedb_core::{new_shared_registry, Category, CommandRecord};

    fn report(backend: &'static str, calls: usize) -> BackendReport {
        let registry = new_shared_registry();
        for _ in 0..calls {
            let mut record = CommandRecord::begin("GET");
            record.end_ok().unwrap();
            registry.record(&[Category::ALL, Category::DQL], &record).unwrap();
        }
        BackendReport { backend, registry }
    }

    #[test]
    fn test_prometheus_labels_backend() {
        let text = render(&[report("redis", 2), report("sql", 1)], ExportFormat::Prometheus).unwrap();
        assert!(text.contains("probedb_commands_total{category=\"DQL\",backend=\"redis\"} 2"));
        assert!(text.contains("probedb_commands_total{category=\"ALL\",backend=\"sql\"} 1"));
    }

    #[test]
    fn test_prometheus_declares_each_family_once() {
        let text = render(
            &[report("redis", 2), report("mongodb", 1), report("sql", 1)],
            ExportFormat::Prometheus,
        )
        .unwrap();

        let type_lines: Vec<_> = text.lines().filter(|line| line.starts_with("# TYPE")).collect();
        let unique: std::collections::BTreeSet<_> = type_lines.iter().collect();
        assert_eq!(type_lines.len(), unique.len());
        assert_eq!(type_lines.len(), 7);
        assert_eq!(text.matches("# TYPE probedb_commands_total counter").count(), 1);
        assert_eq!(text.matches("probedb_uptime_seconds{backend=").count(), 3);
    }

    #[test]
    fn test_json_keyed_by_backend() {
        let text = render(&[report("mongodb", 3)], ExportFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["mongodb"]["categories"]["ALL"]["call_count"], 3);
        assert_eq!(value["mongodb"]["categories"]["DQL"]["error_count"], 0);
    }
}
