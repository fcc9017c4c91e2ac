//! Parsing and aggregation of Slurm's tabular command output into metric trees.
//!
//! Each of the three domains (nodes, queue, fair-share) follows the same pipeline:
//! a [`source::Source`] yields the raw text of one command, a parser turns it into a
//! snapshot, and an emitter flattens the snapshot into labeled [`metrics::Sample`]s.

pub mod collector;
pub mod error;
pub mod fairshare;
pub mod metrics;
pub mod nodes;
pub mod parser;
pub mod queue;
pub mod source;
pub mod states;

pub use collector::{Domain, DomainCollector, Poll, SlurmCollector};
pub use error::SourceError;
pub use metrics::{MetricDesc, Sample};

pub const AUTHOR_HELP: &str = "Report bugs and feature requests to the Scientific Computing Core.";
