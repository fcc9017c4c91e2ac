use std::collections::BTreeMap;

use serde::{Serialize, Serializer};

use crate::metrics::{Emitter, MetricDesc, Sample};
use crate::parser::{FIELD_SEPARATOR, FieldDecoder};
use crate::states::JobState;

const QUEUE_LABELS: &[&str] = &["partition", "account", "state", "user"];

pub const QUEUE_JOBS: MetricDesc = MetricDesc {
    name: "slurm_queue_jobs",
    help: "Amount of Jobs in the Queue",
    labels: QUEUE_LABELS,
};

pub const QUEUE_CPUS: MetricDesc = MetricDesc {
    name: "slurm_queue_cpus",
    help: "Amount of CPUs in the Queue",
    labels: QUEUE_LABELS,
};

pub const QUEUE_MEM: MetricDesc = MetricDesc {
    name: "slurm_queue_mem",
    help: "Amount of Memory in the Queue in megabytes",
    labels: QUEUE_LABELS,
};

pub const QUEUE_GPUS: MetricDesc = MetricDesc {
    name: "slurm_queue_gpus",
    help: "Amount of GPUs in the Queue",
    labels: QUEUE_LABELS,
};

pub const QUEUE_METRICS: &[MetricDesc] = &[QUEUE_JOBS, QUEUE_CPUS, QUEUE_MEM, QUEUE_GPUS];

/// Pending reason marking a job that waits on another job
const DEPENDENCY_REASON: &str = "Dependency";

/// A resource held by running jobs or requested by pending ones
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize)]
pub struct QueueResource {
    pub allocated: f64,
    pub pending: f64,
}

/// Number of jobs in each state
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    pub running: u64,
    pub pending: u64,
    /// Pending jobs whose reason is a dependency; these are also counted in `pending`
    pub pending_dep: u64,
    pub suspended: u64,
    pub cancelled: u64,
    pub completing: u64,
    pub completed: u64,
    pub configuring: u64,
    pub failed: u64,
    pub timeout: u64,
    pub preempted: u64,
    pub node_fail: u64,
}

impl JobCounts {
    /// Every counter paired with the label value it is exported under
    pub fn by_state(&self) -> [(&'static str, u64); 12] {
        [
            ("pending", self.pending),
            ("pending_dep", self.pending_dep),
            ("running", self.running),
            ("suspended", self.suspended),
            ("cancelled", self.cancelled),
            ("completing", self.completing),
            ("completed", self.completed),
            ("configuring", self.configuring),
            ("failed", self.failed),
            ("timeout", self.timeout),
            ("preempted", self.preempted),
            ("node_fail", self.node_fail),
        ]
    }
}

/// The TRES of a single job, memory in megabytes
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct JobResources {
    pub cpus: f64,
    pub memory: f64,
    pub gpus: f64,
}

/// Everything one user has in the queue of one partition under one account
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize)]
pub struct UserMetrics {
    pub cpus: QueueResource,
    pub memory: QueueResource,
    pub gpus: QueueResource,
    pub jobs: JobCounts,
}

impl UserMetrics {
    /// Accounts for one job
    ///
    /// Exactly one state counter is incremented. Running and pending jobs also add
    /// their resources to the allocated or pending totals. Returns `false` for a state
    /// that is not tracked, in which case nothing changes.
    pub fn apply(&mut self, state: &JobState, reason: &str, resources: &JobResources) -> bool {
        let jobs = &mut self.jobs;
        match state {
            JobState::Running => {
                jobs.running += 1;
                self.cpus.allocated += resources.cpus;
                self.memory.allocated += resources.memory;
                self.gpus.allocated += resources.gpus;
            }
            JobState::Pending => {
                jobs.pending += 1;
                self.cpus.pending += resources.cpus;
                self.memory.pending += resources.memory;
                self.gpus.pending += resources.gpus;

                if reason == DEPENDENCY_REASON {
                    jobs.pending_dep += 1;
                }
            }
            JobState::Suspended => jobs.suspended += 1,
            JobState::Cancelled => jobs.cancelled += 1,
            JobState::Completing => jobs.completing += 1,
            JobState::Completed => jobs.completed += 1,
            JobState::Configuring => jobs.configuring += 1,
            JobState::Failed => jobs.failed += 1,
            JobState::Timeout => jobs.timeout += 1,
            JobState::Preempted => jobs.preempted += 1,
            JobState::NodeFail => jobs.node_fail += 1,
            JobState::Unknown(_) => return false,
        }
        true
    }
}

/// Position of a user in the queue hierarchy: partition, then account, then user
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct QueueKey {
    pub partition: String,
    pub account: String,
    pub user: String,
}

impl QueueKey {
    pub fn new(partition: &str, account: &str, user: &str) -> Self {
        Self {
            partition: partition.to_string(),
            account: account.to_string(),
            user: user.to_string(),
        }
    }
}

/// The Partition -> Account -> User tree of the job queue, for a single poll
///
/// Stored flat under the composite key; ordering of the map follows the hierarchy.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct QueueSnapshot {
    #[serde(serialize_with = "serialize_entries")]
    entries: BTreeMap<QueueKey, UserMetrics>,
    pub decode_failures: u64,
    /// Jobs whose state is not one of the tracked states
    pub unknown_states: u64,
}

impl QueueSnapshot {
    pub fn get(&self, partition: &str, account: &str, user: &str) -> Option<&UserMetrics> {
        self.entries.get(&QueueKey::new(partition, account, user))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&QueueKey, &UserMetrics)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Distinct partitions with at least one job, in order
    pub fn partitions(&self) -> Vec<&str> {
        let mut partitions: Vec<&str> = self.entries.keys().map(|k| k.partition.as_str()).collect();
        partitions.dedup();
        partitions
    }

    fn entry(&mut self, partition: &str, account: &str, user: &str) -> &mut UserMetrics {
        self.entries
            .entry(QueueKey::new(partition, account, user))
            .or_default()
    }
}

fn serialize_entries<S: Serializer>(
    entries: &BTreeMap<QueueKey, UserMetrics>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    #[derive(Serialize)]
    struct Entry<'a> {
        #[serde(flatten)]
        key: &'a QueueKey,
        #[serde(flatten)]
        metrics: &'a UserMetrics,
    }

    serializer.collect_seq(entries.iter().map(|(key, metrics)| Entry { key, metrics }))
}

/// Parses the output of
/// `squeue -a -r -h --states=all -O Partition,tres-alloc,State,UserName,Account,Reason`
///
/// Each line has the shape `partition|cpu=4,mem=8G,...|STATE|user|account|reason`. The
/// command terminates its output with an empty line; that and any other line without a
/// field separator is skipped.
pub fn parse_queue_metrics(input: &str) -> QueueSnapshot {
    let mut snapshot = QueueSnapshot::default();
    let mut decoder = FieldDecoder::new();

    for line in input.lines().filter(|line| line.contains(FIELD_SEPARATOR)) {
        let [partition, tres_alloc, job_state, user, account, reason] = decoder.fields::<6>(line);

        let tres = decoder.tres(tres_alloc);
        let resources = JobResources {
            cpus: decoder.tres_count(&tres, "cpu"),
            memory: decoder.tres_mem_mb(&tres, "mem"),
            gpus: decoder.tres_count(&tres, "gres/gpu"),
        };

        let state = JobState::from(job_state);
        if !snapshot.entry(partition, account, user).apply(&state, reason, &resources) {
            tracing::debug!(%state, partition, account, user, "ignoring job in untracked state");
            snapshot.unknown_states += 1;
        }
    }

    snapshot.decode_failures = decoder.failures();
    tracing::debug!(
        users = snapshot.len(),
        unknown_states = snapshot.unknown_states,
        decode_failures = snapshot.decode_failures,
        "parsed job queue"
    );
    snapshot
}

fn queue_labels<'a>(key: &'a QueueKey, state: &'a str) -> [&'a str; 4] {
    [&key.partition, &key.account, state, &key.user]
}

/// Flattens a queue snapshot into samples for the job, CPU, memory and GPU gauges
pub fn emit_queue_metrics(snapshot: &QueueSnapshot) -> Vec<Sample> {
    let mut emitter = Emitter::new();

    for (key, user) in snapshot.iter() {
        for (state, count) in user.jobs.by_state() {
            emitter.gauge(&QUEUE_JOBS, count as f64, &queue_labels(key, state));
        }

        for (desc, resource) in [
            (&QUEUE_CPUS, &user.cpus),
            (&QUEUE_MEM, &user.memory),
            (&QUEUE_GPUS, &user.gpus),
        ] {
            emitter.gauge(desc, resource.pending, &queue_labels(key, "pending"));
            emitter.gauge(desc, resource.allocated, &queue_labels(key, "allocated"));
        }
    }

    emitter.into_samples()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_positive(user: &UserMetrics) -> usize {
        let jobs = user.jobs.by_state().iter().filter(|(_, n)| *n > 0).count();
        let resources = [user.cpus, user.memory, user.gpus]
            .iter()
            .map(|r| usize::from(r.allocated > 0.0) + usize::from(r.pending > 0.0))
            .sum::<usize>();
        jobs + resources
    }

    #[test]
    fn test_pending_dependency_job() {
        let snapshot = parse_queue_metrics("batch|cpu=4,mem=8G|PENDING|alice|teamA|Dependency\n\n");
        let user = snapshot.get("batch", "teamA", "alice").unwrap();

        assert_eq!(user.jobs.pending, 1);
        assert_eq!(user.jobs.pending_dep, 1);
        assert_eq!(user.cpus.pending, 4.0);
        assert_eq!(user.memory.pending, 8192.0);
        assert_eq!(user.cpus.allocated, 0.0);
        assert_eq!(user.jobs.running, 0);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.decode_failures, 0);
    }

    #[test]
    fn test_running_job_allocates() {
        let snapshot = parse_queue_metrics("gpu|cpu=16,mem=64000M,node=1,billing=16,gres/gpu=2|RUNNING|bob|teamB|None\n");
        let user = snapshot.get("gpu", "teamB", "bob").unwrap();

        assert_eq!(user.jobs.running, 1);
        assert_eq!(user.cpus.allocated, 16.0);
        assert_eq!(user.memory.allocated, 64000.0);
        assert_eq!(user.gpus.allocated, 2.0);
        assert_eq!(user.gpus.pending, 0.0);
    }

    #[test]
    fn test_terminal_states_do_not_touch_resources() {
        let input = "\
batch|cpu=2,mem=1G|COMPLETED|carol|teamC|None
batch|cpu=2,mem=1G|FAILED|carol|teamC|NonZeroExitCode
batch|cpu=2,mem=1G|NODE_FAIL|carol|teamC|None
batch|cpu=2,mem=1G|COMPLETING|carol|teamC|None
";
        let user = *parse_queue_metrics(input).get("batch", "teamC", "carol").unwrap();

        assert_eq!(user.jobs.completed, 1);
        assert_eq!(user.jobs.failed, 1);
        assert_eq!(user.jobs.node_fail, 1);
        assert_eq!(user.jobs.completing, 1);
        assert_eq!(user.cpus, QueueResource::default());
        assert_eq!(user.memory, QueueResource::default());
    }

    #[test]
    fn test_each_state_bumps_its_own_counter() {
        let zero = JobCounts::default();
        let cases = [
            ("RUNNING", JobCounts { running: 1, ..zero }),
            ("PENDING", JobCounts { pending: 1, ..zero }),
            ("SUSPENDED", JobCounts { suspended: 1, ..zero }),
            ("CANCELLED", JobCounts { cancelled: 1, ..zero }),
            ("COMPLETING", JobCounts { completing: 1, ..zero }),
            ("COMPLETED", JobCounts { completed: 1, ..zero }),
            ("CONFIGURING", JobCounts { configuring: 1, ..zero }),
            ("FAILED", JobCounts { failed: 1, ..zero }),
            ("TIMEOUT", JobCounts { timeout: 1, ..zero }),
            ("PREEMPTED", JobCounts { preempted: 1, ..zero }),
            ("NODE_FAIL", JobCounts { node_fail: 1, ..zero }),
        ];

        for (state, expected) in cases {
            let line = format!("batch|cpu=2,mem=1G|{state}|gina|teamG|None\n");
            let snapshot = parse_queue_metrics(&line);
            let user = snapshot.get("batch", "teamG", "gina").unwrap();

            assert_eq!(user.jobs, expected, "state {state}");
            assert_eq!(snapshot.unknown_states, 0, "state {state}");
        }
    }

    #[test]
    fn test_same_line_twice_doubles_one_counter() {
        let line = "batch|cpu=1,mem=512M|SUSPENDED|dave|teamD|None\n";
        let once = *parse_queue_metrics(line).get("batch", "teamD", "dave").unwrap();
        let twice = *parse_queue_metrics(&line.repeat(2)).get("batch", "teamD", "dave").unwrap();

        assert_eq!(once.jobs.suspended, 1);
        assert_eq!(twice.jobs.suspended, 2);

        let expected = JobCounts {
            suspended: 2,
            ..JobCounts::default()
        };
        assert_eq!(twice.jobs, expected);
        assert_eq!(twice.cpus, once.cpus);
        assert_eq!(twice.memory, once.memory);
    }

    #[test]
    fn test_unknown_state_is_ignored() {
        let snapshot = parse_queue_metrics("batch|cpu=1,mem=1G|running|erin|teamE|None\n");
        let user = snapshot.get("batch", "teamE", "erin").unwrap();

        assert_eq!(snapshot.unknown_states, 1);
        assert_eq!(*user, UserMetrics::default());
        assert!(emit_queue_metrics(&snapshot).is_empty());
    }

    #[test]
    fn test_reordered_and_partial_tres() {
        let input = "\
batch|mem=2G,cpu=8|RUNNING|frank|teamF|None
batch||PENDING|frank|teamF|Priority
";
        let snapshot = parse_queue_metrics(input);
        let user = snapshot.get("batch", "teamF", "frank").unwrap();

        assert_eq!(user.cpus.allocated, 8.0);
        assert_eq!(user.memory.allocated, 2048.0);
        assert_eq!(user.jobs.pending, 1);
        assert_eq!(user.jobs.pending_dep, 0);
        assert_eq!(user.cpus.pending, 0.0);
        assert_eq!(snapshot.decode_failures, 0);
    }

    #[test]
    fn test_hierarchy_keys() {
        let input = "\
batch|cpu=1,mem=1G|RUNNING|alice|teamA|None
batch|cpu=1,mem=1G|RUNNING|bob|teamA|None
batch|cpu=1,mem=1G|RUNNING|alice|teamB|None
gpu|cpu=1,mem=1G|RUNNING|alice|teamA|None
";
        let snapshot = parse_queue_metrics(input);

        assert_eq!(snapshot.len(), 4);
        assert_eq!(snapshot.partitions(), vec!["batch", "gpu"]);
        assert!(snapshot.get("gpu", "teamB", "alice").is_none());
    }

    #[test]
    fn test_blank_and_garbage_lines() {
        let snapshot = parse_queue_metrics("\n   \nnot a job line\n");
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.decode_failures, 0);

        let short = parse_queue_metrics("batch|cpu=1|RUNNING\n");
        assert_eq!(short.decode_failures, 3);
        assert_eq!(short.get("batch", "", "").unwrap().jobs.running, 1);

        assert!(parse_queue_metrics("").is_empty());
    }

    #[test]
    fn test_emission_matches_positive_leaves() {
        let input = "\
batch|cpu=4,mem=8G|PENDING|alice|teamA|Dependency
batch|cpu=2,mem=1G|RUNNING|alice|teamA|None
batch|cpu=2,mem=1G|CANCELLED|bob|teamA|None
gpu|cpu=8,mem=16G,gres/gpu=4|RUNNING|bob|teamB|None
";
        let snapshot = parse_queue_metrics(input);
        let samples = emit_queue_metrics(&snapshot);

        let expected: usize = snapshot.iter().map(|(_, user)| count_positive(user)).sum();
        assert_eq!(samples.len(), expected);
        assert!(samples.iter().all(|s| s.value > 0.0));

        let dep = samples
            .iter()
            .find(|s| s.name == "slurm_queue_jobs" && s.labels == ["batch", "teamA", "pending_dep", "alice"])
            .unwrap();
        assert_eq!(dep.value, 1.0);

        let gpus = samples
            .iter()
            .find(|s| s.name == "slurm_queue_gpus" && s.labels == ["gpu", "teamB", "allocated", "bob"])
            .unwrap();
        assert_eq!(gpus.value, 4.0);
    }

    #[test]
    fn test_snapshot_serializes_as_entries() {
        let snapshot = parse_queue_metrics("batch|cpu=4,mem=8G|PENDING|alice|teamA|Dependency\n");
        let json = serde_json::to_value(&snapshot).unwrap();

        let entry = &json["entries"][0];
        assert_eq!(entry["partition"], "batch");
        assert_eq!(entry["account"], "teamA");
        assert_eq!(entry["user"], "alice");
        assert_eq!(entry["jobs"]["pending_dep"], 1);
    }
}
