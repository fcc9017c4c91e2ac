use std::collections::HashMap;
use std::ops::AddAssign;

use serde::Serialize;

use crate::metrics::{Emitter, MetricDesc, Sample};
use crate::parser::{FIELD_SEPARATOR, FieldDecoder};

pub const NODE_CPUS: MetricDesc = MetricDesc {
    name: "slurm_node_cpus",
    help: "CPUs on a Node",
    labels: &["host", "state", "partition", "occurrence"],
};

pub const NODE_MEM: MetricDesc = MetricDesc {
    name: "slurm_node_mem",
    help: "Memory on a Node in megabytes",
    labels: &["host", "state", "partition", "occurrence"],
};

pub const NODE_LOAD: MetricDesc = MetricDesc {
    name: "slurm_node_load",
    help: "CPU load of a Node in percent of its CPUs",
    labels: &["host", "partition", "occurrence"],
};

pub const NODE_STATE: MetricDesc = MetricDesc {
    name: "slurm_node_state",
    help: "State of a Node as reported by sinfo",
    labels: &["host", "state", "partition", "occurrence"],
};

pub const NODE_STATES: MetricDesc = MetricDesc {
    name: "slurm_node_states",
    help: "Number of Nodes in each State",
    labels: &["state"],
};

pub const PARTITION_CPUS: MetricDesc = MetricDesc {
    name: "slurm_partition_cpus",
    help: "CPUs in a Partition",
    labels: &["partition", "state"],
};

pub const PARTITION_MEM: MetricDesc = MetricDesc {
    name: "slurm_partition_mem",
    help: "Memory in a Partition in megabytes",
    labels: &["partition", "state"],
};

pub const PARTITION_LOAD: MetricDesc = MetricDesc {
    name: "slurm_partition_load",
    help: "Total CPU-Load in a Partition",
    labels: &["partition"],
};

pub const CLUSTER_CPUS: MetricDesc = MetricDesc {
    name: "slurm_cluster_cpus",
    help: "CPUs in the cluster, each Node counted once",
    labels: &["state"],
};

pub const CLUSTER_MEM: MetricDesc = MetricDesc {
    name: "slurm_cluster_mem",
    help: "Memory in the cluster in megabytes, each Node counted once",
    labels: &["state"],
};

pub const NODE_METRICS: &[MetricDesc] = &[
    NODE_CPUS,
    NODE_MEM,
    NODE_LOAD,
    NODE_STATE,
    NODE_STATES,
    PARTITION_CPUS,
    PARTITION_MEM,
    PARTITION_LOAD,
    CLUSTER_CPUS,
    CLUSTER_MEM,
];

#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize)]
pub struct CpuMetrics {
    pub alloc: f64,
    pub idle: f64,
    pub other: f64,
    pub total: f64,
    /// Reported load as a percentage of `total`
    pub load: f64,
}

impl AddAssign for CpuMetrics {
    fn add_assign(&mut self, rhs: Self) {
        self.alloc += rhs.alloc;
        self.idle += rhs.idle;
        self.other += rhs.other;
        self.total += rhs.total;
        self.load += rhs.load;
    }
}

/// Memory of a node in megabytes
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize)]
pub struct MemoryMetrics {
    pub alloc: f64,
    pub free: f64,
    pub total: f64,
}

impl AddAssign for MemoryMetrics {
    fn add_assign(&mut self, rhs: Self) {
        self.alloc += rhs.alloc;
        self.free += rhs.free;
        self.total += rhs.total;
    }
}

/// One line of the node listing: a node as seen from one of its partitions
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct NodeRecord {
    /// Compact state string from sinfo, e.g. "idle", "mix", "down*"; not validated
    pub state: String,
    pub cpus: CpuMetrics,
    pub memory: MemoryMetrics,
}

/// The nodes belonging to one partition
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct PartitionMetrics {
    pub nodes: HashMap<String, NodeRecord>,
}

impl PartitionMetrics {
    /// Sums CPU, load and memory over the nodes of the partition
    pub fn totals(&self) -> (CpuMetrics, MemoryMetrics) {
        sum_records(self.nodes.values())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct Occurrence {
    count: u32,
    first_partition: String,
}

/// Every node of the cluster grouped by partition, for a single poll
///
/// sinfo lists a node once per partition it belongs to, so the same physical node can
/// sit in several partition maps. The occurrence count tells those copies apart from
/// distinct nodes when computing cluster-wide numbers.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct NodeSnapshot {
    pub partitions: HashMap<String, PartitionMetrics>,
    occurrences: HashMap<String, Occurrence>,
    pub decode_failures: u64,
}

impl NodeSnapshot {
    pub fn partition(&self, name: &str) -> Option<&PartitionMetrics> {
        self.partitions.get(name)
    }

    pub fn record(&self, partition: &str, node: &str) -> Option<&NodeRecord> {
        self.partitions.get(partition)?.nodes.get(node)
    }

    /// Number of distinct partitions the node was listed under, zero for unknown nodes
    pub fn occurrence(&self, node: &str) -> u32 {
        self.occurrences.get(node).map_or(0, |o| o.count)
    }

    /// Number of physical nodes, regardless of partition membership
    pub fn node_count(&self) -> usize {
        self.occurrences.len()
    }

    /// Each physical node once, as recorded under the first partition it appeared in
    pub fn unique_nodes(&self) -> impl Iterator<Item = (&str, &NodeRecord)> + '_ {
        self.occurrences.iter().filter_map(|(node, occurrence)| {
            self.record(&occurrence.first_partition, node)
                .map(|record| (node.as_str(), record))
        })
    }

    /// Cluster-wide sums with every physical node counted once
    pub fn cluster_totals(&self) -> (CpuMetrics, MemoryMetrics) {
        sum_records(self.unique_nodes().map(|(_, record)| record))
    }

    /// Number of physical nodes in each reported state
    pub fn state_counts(&self) -> HashMap<&str, u32> {
        let mut counts = HashMap::new();
        for (_, record) in self.unique_nodes() {
            *counts.entry(record.state.as_str()).or_insert(0) += 1;
        }
        counts
    }

    fn insert(&mut self, partition: &str, node: &str, record: NodeRecord) {
        let nodes = &mut self.partitions.entry(partition.to_string()).or_default().nodes;

        // a repeated line for the same partition replaces the record, it is not a new membership
        if nodes.insert(node.to_string(), record).is_none() {
            self.occurrences
                .entry(node.to_string())
                .and_modify(|occurrence| occurrence.count += 1)
                .or_insert_with(|| Occurrence {
                    count: 1,
                    first_partition: partition.to_string(),
                });
        }
    }
}

fn sum_records<'a>(records: impl Iterator<Item = &'a NodeRecord>) -> (CpuMetrics, MemoryMetrics) {
    records.fold(
        (CpuMetrics::default(), MemoryMetrics::default()),
        |(mut cpus, mut memory), record| {
            cpus += record.cpus;
            memory += record.memory;
            (cpus, memory)
        },
    )
}

/// Load as a percentage of the node's CPUs; a node without CPUs has no load
pub fn load_percent(load: f64, total_cpus: f64) -> f64 {
    if total_cpus <= 0.0 {
        return 0.0;
    }
    let percent = load / total_cpus * 100.0;
    if percent.is_finite() { percent } else { 0.0 }
}

/// Parses the output of
/// `sinfo -h -N -O NodeList,StateCompact,CPUsState,CPUsLoad,AllocMem,FreeMem,Memory,PartitionName`
///
/// Each qualifying line has the shape `node|state|alloc/idle/other/total|load|alloc_mem|free_mem|total_mem|partition`.
/// Lines without a separator are skipped, and malformed numbers become zero.
pub fn parse_node_metrics(input: &str) -> NodeSnapshot {
    let mut snapshot = NodeSnapshot::default();
    let mut decoder = FieldDecoder::new();

    for line in input.lines().filter(|line| line.contains(FIELD_SEPARATOR)) {
        let [node, state, cpu_states, cpu_load, mem_alloc, mem_free, mem_total, partition] =
            decoder.fields::<8>(line);

        let [alloc, idle, other, total] = decode_cpu_states(cpu_states, &mut decoder);
        let load = load_percent(decoder.float(cpu_load), total);

        let record = NodeRecord {
            state: state.to_string(),
            cpus: CpuMetrics {
                alloc,
                idle,
                other,
                total,
                load,
            },
            memory: MemoryMetrics {
                alloc: decoder.float(mem_alloc),
                free: decoder.float(mem_free),
                total: decoder.float(mem_total),
            },
        };

        snapshot.insert(partition, node, record);
    }

    snapshot.decode_failures = decoder.failures();
    tracing::debug!(
        nodes = snapshot.node_count(),
        partitions = snapshot.partitions.len(),
        decode_failures = snapshot.decode_failures,
        "parsed node listing"
    );
    snapshot
}

/// Splits the CPUsState column, "allocated/idle/other/total"
fn decode_cpu_states(field: &str, decoder: &mut FieldDecoder) -> [f64; 4] {
    let mut parts = field.split('/');
    std::array::from_fn(|_| decoder.float(parts.next().unwrap_or("")))
}

fn node_labels<'a>(host: &'a str, kind: &'a str, partition: &'a str, occurrence: &'a str) -> [&'a str; 4] {
    [host, kind, partition, occurrence]
}

/// Flattens a node snapshot into samples for the node, partition and cluster gauges
pub fn emit_node_metrics(snapshot: &NodeSnapshot) -> Vec<Sample> {
    let mut emitter = Emitter::new();

    for (partition_name, partition) in &snapshot.partitions {
        let p = partition_name.as_str();

        for (host, node) in &partition.nodes {
            let occurrence = snapshot.occurrence(host).to_string();
            let (h, o) = (host.as_str(), occurrence.as_str());

            emitter.gauge(&NODE_CPUS, node.cpus.alloc, &node_labels(h, "allocated", p, o));
            emitter.gauge(&NODE_CPUS, node.cpus.idle, &node_labels(h, "idle", p, o));
            emitter.gauge(&NODE_CPUS, node.cpus.other, &node_labels(h, "other", p, o));
            emitter.gauge(&NODE_CPUS, node.cpus.total, &node_labels(h, "total", p, o));

            emitter.gauge(&NODE_MEM, node.memory.alloc, &node_labels(h, "allocated", p, o));
            emitter.gauge(&NODE_MEM, node.memory.free, &node_labels(h, "free", p, o));
            emitter.gauge(&NODE_MEM, node.memory.total, &node_labels(h, "total", p, o));

            emitter.gauge(&NODE_LOAD, node.cpus.load, &[h, p, o]);
            emitter.gauge(&NODE_STATE, 1.0, &node_labels(h, &node.state, p, o));
        }

        let (cpus, memory) = partition.totals();
        emitter.gauge(&PARTITION_CPUS, cpus.alloc, &[p, "allocated"]);
        emitter.gauge(&PARTITION_CPUS, cpus.idle, &[p, "idle"]);
        emitter.gauge(&PARTITION_CPUS, cpus.other, &[p, "other"]);
        emitter.gauge(&PARTITION_CPUS, cpus.total, &[p, "total"]);
        emitter.gauge(&PARTITION_MEM, memory.alloc, &[p, "allocated"]);
        emitter.gauge(&PARTITION_MEM, memory.free, &[p, "free"]);
        emitter.gauge(&PARTITION_MEM, memory.total, &[p, "total"]);
        emitter.gauge(&PARTITION_LOAD, cpus.load, &[p]);
    }

    for (state, count) in snapshot.state_counts() {
        emitter.gauge(&NODE_STATES, f64::from(count), &[state]);
    }

    let (cpus, memory) = snapshot.cluster_totals();
    emitter.gauge(&CLUSTER_CPUS, cpus.alloc, &["allocated"]);
    emitter.gauge(&CLUSTER_CPUS, cpus.idle, &["idle"]);
    emitter.gauge(&CLUSTER_CPUS, cpus.other, &["other"]);
    emitter.gauge(&CLUSTER_CPUS, cpus.total, &["total"]);
    emitter.gauge(&CLUSTER_MEM, memory.alloc, &["allocated"]);
    emitter.gauge(&CLUSTER_MEM, memory.free, &["free"]);
    emitter.gauge(&CLUSTER_MEM, memory.total, &["total"]);

    emitter.into_samples()
}
