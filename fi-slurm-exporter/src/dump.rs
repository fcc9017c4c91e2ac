//! One-shot modes: a single poll printed to stdout instead of a long-running server.

use chrono::{DateTime, Utc};
use fi_prometheus::{build_registry, encode_text};
use fi_slurm::Domain;
use fi_slurm::fairshare::{FairShareSnapshot, parse_fairshare_metrics};
use fi_slurm::nodes::{NodeSnapshot, parse_node_metrics};
use fi_slurm::queue::{QueueSnapshot, parse_queue_metrics};
use serde::Serialize;

use crate::config::ExporterConfig;
use crate::error::ExporterError;

/// Polls every enabled collector once and renders the text exposition format
///
/// Unlike a scrape, a collector that fails to poll fails the whole run.
pub fn render_once(config: &ExporterConfig) -> Result<String, ExporterError> {
    let (registry, self_metrics) = build_registry(config.collectors())?;
    let text = encode_text(&registry)?;

    let failed: Vec<&str> = config
        .domains
        .iter()
        .filter(|domain| self_metrics.poll_errors(**domain) > 0)
        .map(|domain| domain.as_str())
        .collect();
    if !failed.is_empty() {
        return Err(ExporterError::PollFailed {
            collectors: failed.join(", "),
        });
    }

    Ok(text)
}

/// The parsed trees of one poll, before they are flattened into metrics
#[derive(Debug, Serialize)]
pub struct SnapshotDump {
    pub collected_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nodes: Option<NodeSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<QueueSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fairshare: Option<FairShareSnapshot>,
}

pub fn snapshot_dump(config: &ExporterConfig) -> Result<SnapshotDump, ExporterError> {
    let mut dump = SnapshotDump {
        collected_at: Utc::now(),
        nodes: None,
        queue: None,
        fairshare: None,
    };

    for &domain in &config.domains {
        let text = config.source(domain).fetch()?;
        match domain {
            Domain::Node => dump.nodes = Some(parse_node_metrics(&text)),
            Domain::Queue => dump.queue = Some(parse_queue_metrics(&text)),
            Domain::FairShare => dump.fairshare = Some(parse_fairshare_metrics(&text)),
        }
    }

    Ok(dump)
}

pub fn render_json(config: &ExporterConfig) -> Result<String, ExporterError> {
    Ok(serde_json::to_string_pretty(&snapshot_dump(config)?)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Args, ExporterConfig};
    use clap::Parser;
    use std::fs;
    use std::path::Path;

    fn replay_config(dir: &Path, extra: &[&str]) -> ExporterConfig {
        let dir = dir.to_str().unwrap();
        let argv = ["fi-slurm-exporter", "--replay", dir]
            .into_iter()
            .chain(extra.iter().copied());
        ExporterConfig::from(Args::try_parse_from(argv).unwrap())
    }

    fn capture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("sinfo.txt"),
            "node01|idle|4/60/0/64|120|1024|7168|8192|batch\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("squeue.txt"),
            "batch|cpu=4,mem=8G|PENDING|alice|teamA|Dependency\n\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("sshare.txt"),
            "teamA|0.42|cpu=100,mem=2048\n  teamA|alice|0.3|cpu=1,mem=1\n",
        )
        .unwrap();
        dir
    }

    #[test]
    fn test_once_renders_every_domain() {
        let dir = capture();
        let text = render_once(&replay_config(dir.path(), &["--once"])).unwrap();

        assert!(text.contains("slurm_node_load{"));
        assert!(text.contains("slurm_queue_mem{"));
        assert!(text.contains("slurm_account_cpu_minutes{account=\"teamA\"} 100"));
    }

    #[test]
    fn test_once_fails_on_missing_capture() {
        let dir = capture();
        fs::remove_file(dir.path().join("squeue.txt")).unwrap();

        match render_once(&replay_config(dir.path(), &["--once"])) {
            Err(ExporterError::PollFailed { collectors }) => assert_eq!(collectors, "queue"),
            other => panic!("expected poll failure, got {:?}", other),
        }
    }

    #[test]
    fn test_json_dump() {
        let dir = capture();
        let config = replay_config(dir.path(), &["--json", "--disable", "node"]);
        let json: serde_json::Value = serde_json::from_str(&render_json(&config).unwrap()).unwrap();

        assert!(json.get("nodes").is_none());
        assert!(json["collected_at"].is_string());
        assert_eq!(json["fairshare"]["accounts"]["teamA"]["cpu_minutes"], 100.0);
        assert_eq!(json["queue"]["entries"][0]["memory"]["pending"], 8192.0);
    }

    #[test]
    fn test_json_dump_propagates_source_errors() {
        let dir = tempfile::tempdir().unwrap();
        let config = replay_config(dir.path(), &["--json"]);

        assert!(matches!(snapshot_dump(&config), Err(ExporterError::Source(_))));
    }
}
