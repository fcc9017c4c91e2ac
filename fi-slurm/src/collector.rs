use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::SourceError;
use crate::fairshare::{FAIRSHARE_METRICS, emit_fairshare_metrics, parse_fairshare_metrics};
use crate::metrics::{MetricDesc, Sample};
use crate::nodes::{NODE_METRICS, emit_node_metrics, parse_node_metrics};
use crate::queue::{QUEUE_METRICS, emit_queue_metrics, parse_queue_metrics};
use crate::source::{CommandSource, Source};

/// The three independent views of the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Node,
    Queue,
    FairShare,
}

impl Domain {
    pub const ALL: [Domain; 3] = [Domain::Node, Domain::Queue, Domain::FairShare];

    /// Value of the `collector` label on self-metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Node => "node",
            Domain::Queue => "queue",
            Domain::FairShare => "fairshare",
        }
    }

    pub fn metrics(&self) -> &'static [MetricDesc] {
        match self {
            Domain::Node => NODE_METRICS,
            Domain::Queue => QUEUE_METRICS,
            Domain::FairShare => FAIRSHARE_METRICS,
        }
    }

    /// The scheduler command this domain is read from
    pub fn command(&self) -> CommandSource {
        match self {
            Domain::Node => CommandSource::sinfo(),
            Domain::Queue => CommandSource::squeue(),
            Domain::FairShare => CommandSource::sshare(),
        }
    }

    /// File name of captured output inside a replay directory
    pub fn replay_file(&self) -> &'static str {
        match self {
            Domain::Node => "sinfo.txt",
            Domain::Queue => "squeue.txt",
            Domain::FairShare => "sshare.txt",
        }
    }

    /// Parses one text blob and flattens it into samples
    pub fn poll(&self, text: &str) -> Poll {
        match self {
            Domain::Node => {
                let snapshot = parse_node_metrics(text);
                Poll {
                    samples: emit_node_metrics(&snapshot),
                    decode_failures: snapshot.decode_failures,
                }
            }
            Domain::Queue => {
                let snapshot = parse_queue_metrics(text);
                Poll {
                    samples: emit_queue_metrics(&snapshot),
                    decode_failures: snapshot.decode_failures,
                }
            }
            Domain::FairShare => {
                let snapshot = parse_fairshare_metrics(text);
                Poll {
                    samples: emit_fairshare_metrics(&snapshot),
                    decode_failures: snapshot.decode_failures,
                }
            }
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one successful fetch-parse-emit cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Poll {
    pub samples: Vec<Sample>,
    pub decode_failures: u64,
}

pub trait SlurmCollector: Send + Sync {
    fn domain(&self) -> Domain;

    /// Every metric this collector may emit
    fn describe(&self) -> &'static [MetricDesc];

    /// Runs one poll; a source failure yields no samples at all
    fn collect(&self) -> Result<Poll, SourceError>;

    /// Like [`collect`](Self::collect), also reporting how long the poll itself took
    fn timed_collect(&self) -> (Duration, Result<Poll, SourceError>) {
        let started = Instant::now();
        let result = self.collect();
        (started.elapsed(), result)
    }
}

/// Binds a domain to the source its text is fetched from
///
/// At most one fetch per collector runs at a time; concurrent polls queue up behind
/// the one in flight.
#[derive(Debug)]
pub struct DomainCollector<S> {
    domain: Domain,
    source: S,
    in_flight: Mutex<()>,
}

impl<S: Source> DomainCollector<S> {
    pub fn new(domain: Domain, source: S) -> Self {
        Self {
            domain,
            source,
            in_flight: Mutex::new(()),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}

impl DomainCollector<CommandSource> {
    /// A collector reading from the domain's default scheduler command
    pub fn command(domain: Domain) -> Self {
        Self::new(domain, domain.command())
    }
}

impl<S: Source> SlurmCollector for DomainCollector<S> {
    fn domain(&self) -> Domain {
        self.domain
    }

    fn describe(&self) -> &'static [MetricDesc] {
        self.domain.metrics()
    }

    fn collect(&self) -> Result<Poll, SourceError> {
        self.timed_collect().1
    }

    /// Time spent waiting behind a poll in flight is not counted
    fn timed_collect(&self) -> (Duration, Result<Poll, SourceError>) {
        // guards no data, a poisoned lock is still usable
        let _guard = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        let started = Instant::now();

        let result = self.source.fetch().map(|text| {
            let poll = self.domain.poll(&text);
            tracing::debug!(
                collector = %self.domain,
                source = %self.source.describe(),
                samples = poll.samples.len(),
                decode_failures = poll.decode_failures,
                "collected"
            );
            poll
        });

        (started.elapsed(), result)
    }
}
