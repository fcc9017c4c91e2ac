use std::collections::BTreeMap;

use serde::Serialize;

use crate::metrics::{Emitter, MetricDesc, Sample};
use crate::parser::{FIELD_SEPARATOR, FieldDecoder};

const ACCOUNT_LABELS: &[&str] = &["account"];

pub const ACCOUNT_EFFECTV_USAGE: MetricDesc = MetricDesc {
    name: "slurm_account_effectv_usage",
    help: "EffectiveUsage for Account",
    labels: ACCOUNT_LABELS,
};

pub const ACCOUNT_CPU_MINUTES: MetricDesc = MetricDesc {
    name: "slurm_account_cpu_minutes",
    help: "Allocated CPU-Minutes for Account",
    labels: ACCOUNT_LABELS,
};

pub const ACCOUNT_MEM_MINUTES: MetricDesc = MetricDesc {
    name: "slurm_account_mem_minutes",
    help: "Allocated MEM-Minutes for Account",
    labels: ACCOUNT_LABELS,
};

pub const FAIRSHARE_METRICS: &[MetricDesc] =
    &[ACCOUNT_EFFECTV_USAGE, ACCOUNT_CPU_MINUTES, ACCOUNT_MEM_MINUTES];

/// sshare indents the accounts and users below the top level by this much
const SUB_ACCOUNT_INDENT: &str = "  ";

#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize)]
pub struct FairShareRecord {
    /// Share of the cluster's decayed usage attributed to the account
    pub effectv_usage: f64,
    pub cpu_minutes: f64,
    pub mem_minutes: f64,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct FairShareSnapshot {
    pub accounts: BTreeMap<String, FairShareRecord>,
    pub decode_failures: u64,
}

impl FairShareSnapshot {
    pub fn account(&self, name: &str) -> Option<&FairShareRecord> {
        self.accounts.get(name)
    }
}

/// Parses the output of `sshare -n -P -o Account,EffectvUsage,TRESRunMins`
///
/// Only the top level of the account tree is kept: indented sub-account lines are
/// skipped. When an account shows up more than once, the last line wins.
pub fn parse_fairshare_metrics(input: &str) -> FairShareSnapshot {
    let mut snapshot = FairShareSnapshot::default();
    let mut decoder = FieldDecoder::new();

    for line in input
        .lines()
        .filter(|line| !line.starts_with(SUB_ACCOUNT_INDENT) && line.contains(FIELD_SEPARATOR))
    {
        let [account, effectv_usage, tres_run_mins] = decoder.fields::<3>(line);

        let tres = decoder.tres(tres_run_mins);
        let record = FairShareRecord {
            effectv_usage: decoder.float(effectv_usage),
            cpu_minutes: decoder.tres_count(&tres, "cpu"),
            mem_minutes: decoder.tres_count(&tres, "mem"),
        };

        snapshot.accounts.insert(account.to_string(), record);
    }

    snapshot.decode_failures = decoder.failures();
    tracing::debug!(
        accounts = snapshot.accounts.len(),
        decode_failures = snapshot.decode_failures,
        "parsed fair-share"
    );
    snapshot
}

pub fn emit_fairshare_metrics(snapshot: &FairShareSnapshot) -> Vec<Sample> {
    let mut emitter = Emitter::new();

    for (account, record) in &snapshot.accounts {
        let labels = [account.as_str()];
        emitter.gauge(&ACCOUNT_EFFECTV_USAGE, record.effectv_usage, &labels);
        emitter.gauge(&ACCOUNT_CPU_MINUTES, record.cpu_minutes, &labels);
        emitter.gauge(&ACCOUNT_MEM_MINUTES, record.mem_minutes, &labels);
    }

    emitter.into_samples()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SSHARE: &str = "\
root|0.000000|cpu=0,mem=0,energy=0,node=0,billing=0
 teamA|0.420000|cpu=100,mem=2048,energy=0,node=2,billing=100
  teamA|alice|0.310000|cpu=60,mem=1024
 teamB|0.000000|cpu=0,mem=0,energy=0,node=0,billing=0
";

    #[test]
    fn test_single_account() {
        let snapshot = parse_fairshare_metrics("teamA|0.42|cpu=100,mem=2048\n");
        let record = snapshot.account("teamA").unwrap();

        assert_eq!(record.effectv_usage, 0.42);
        assert_eq!(record.cpu_minutes, 100.0);
        assert_eq!(record.mem_minutes, 2048.0);
        assert_eq!(snapshot.decode_failures, 0);
    }

    #[test]
    fn test_sub_accounts_are_skipped() {
        let snapshot = parse_fairshare_metrics(SSHARE);

        assert_eq!(snapshot.accounts.len(), 3);
        assert!(snapshot.account("root").is_some());
        assert!(snapshot.account("teamB").is_some());
        // the single-space indented line is a top-level account, trimmed
        assert_eq!(snapshot.account("teamA").unwrap().cpu_minutes, 100.0);
        assert!(snapshot.account("alice").is_none());
    }

    #[test]
    fn test_last_value_wins() {
        let input = "\
teamA|0.10|cpu=1,mem=1
teamA|0.20|cpu=2,mem=2
";
        let snapshot = parse_fairshare_metrics(input);
        let record = snapshot.account("teamA").unwrap();

        assert_eq!(snapshot.accounts.len(), 1);
        assert_eq!(record.effectv_usage, 0.20);
        assert_eq!(record.cpu_minutes, 2.0);
    }

    #[test]
    fn test_reordered_tres_run_mins() {
        let snapshot = parse_fairshare_metrics("teamC|0.5|mem=300,billing=7,cpu=12\n");
        let record = snapshot.account("teamC").unwrap();

        assert_eq!(record.cpu_minutes, 12.0);
        assert_eq!(record.mem_minutes, 300.0);
    }

    #[test]
    fn test_garbage_becomes_zero() {
        let snapshot = parse_fairshare_metrics("teamD|N/A|cpu=lots\n");
        let record = snapshot.account("teamD").unwrap();

        assert_eq!(*record, FairShareRecord::default());
        assert_eq!(snapshot.decode_failures, 2);
    }

    #[test]
    fn test_zero_values_are_not_emitted() {
        let samples = emit_fairshare_metrics(&parse_fairshare_metrics(SSHARE));

        assert_eq!(samples.len(), 3);
        assert!(samples.iter().all(|s| s.labels == ["teamA"]));

        let usage = samples
            .iter()
            .find(|s| s.name == "slurm_account_effectv_usage")
            .unwrap();
        assert_eq!(usage.value, 0.42);
    }

    #[test]
    fn test_empty_input() {
        let snapshot = parse_fairshare_metrics("");
        assert!(snapshot.accounts.is_empty());
        assert!(emit_fairshare_metrics(&snapshot).is_empty());
    }
}
