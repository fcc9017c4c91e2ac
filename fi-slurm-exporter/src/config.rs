use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use fi_slurm::source::{FileSource, Source};
use fi_slurm::{Domain, DomainCollector, SlurmCollector};

const HELP: &str = "Serves node, partition, job queue and fair-share metrics of a Slurm cluster on /metrics, gathered from sinfo, squeue and sshare on every scrape. Use --once or --json to poll a single time and print the result instead. With --replay, output previously captured into sinfo.txt, squeue.txt and sshare.txt is read in place of running the commands.";

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Prometheus exporter for Slurm",
    after_help = HELP,
    after_long_help = format!("{}\n\n{}", HELP, fi_slurm::AUTHOR_HELP),
)]
pub struct Args {
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    #[arg(help = "Address to serve metrics on")]
    pub listen: SocketAddr,

    #[arg(long, default_value_t = 30, value_name = "SECONDS")]
    #[arg(help = "Time a Slurm command may run before it is killed")]
    pub timeout: u64,

    #[arg(long, value_enum, value_name = "COLLECTOR")]
    #[arg(help = "Collectors to turn off. Accepts multiple values.")]
    pub disable: Vec<CollectorArg>,

    #[arg(long, value_name = "PATH")]
    #[arg(help = "Path of the sinfo command")]
    pub sinfo: Option<String>,

    #[arg(long, value_name = "PATH")]
    #[arg(help = "Path of the squeue command")]
    pub squeue: Option<String>,

    #[arg(long, value_name = "PATH")]
    #[arg(help = "Path of the sshare command")]
    pub sshare: Option<String>,

    #[arg(long, value_name = "DIR")]
    #[arg(help = "Read captured command output from sinfo.txt, squeue.txt and sshare.txt in DIR")]
    pub replay: Option<PathBuf>,

    #[arg(long, conflicts_with = "json")]
    #[arg(help = "Poll once, print the metrics in text exposition format and exit")]
    pub once: bool,

    #[arg(long)]
    #[arg(help = "Poll once, print the parsed snapshots as JSON and exit")]
    pub json: bool,

    #[arg(long, hide = true)]
    #[arg(help = "Log at debug level unless RUST_LOG says otherwise")]
    pub debug: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CollectorArg {
    Node,
    Queue,
    #[value(name = "fairshare")]
    FairShare,
}

impl From<CollectorArg> for Domain {
    fn from(arg: CollectorArg) -> Self {
        match arg {
            CollectorArg::Node => Domain::Node,
            CollectorArg::Queue => Domain::Queue,
            CollectorArg::FairShare => Domain::FairShare,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Serve,
    Once,
    Json,
}

/// Everything the exporter needs to run, fixed at startup
#[derive(Debug, Clone, PartialEq)]
pub struct ExporterConfig {
    pub listen: SocketAddr,
    pub timeout: Duration,
    /// Enabled domains, in polling order
    pub domains: Vec<Domain>,
    pub programs: HashMap<Domain, String>,
    pub replay: Option<PathBuf>,
    pub mode: Mode,
}

impl From<Args> for ExporterConfig {
    fn from(args: Args) -> Self {
        let disabled: Vec<Domain> = args.disable.into_iter().map(Domain::from).collect();
        let domains = Domain::ALL
            .into_iter()
            .filter(|domain| !disabled.contains(domain))
            .collect();

        let programs = [
            (Domain::Node, args.sinfo),
            (Domain::Queue, args.squeue),
            (Domain::FairShare, args.sshare),
        ]
        .into_iter()
        .filter_map(|(domain, program)| program.map(|program| (domain, program)))
        .collect();

        let mode = if args.once {
            Mode::Once
        } else if args.json {
            Mode::Json
        } else {
            Mode::Serve
        };

        Self {
            listen: args.listen,
            timeout: Duration::from_secs(args.timeout),
            domains,
            programs,
            replay: args.replay,
            mode,
        }
    }
}

impl ExporterConfig {
    /// Where the text of a domain is read from: the replay directory, or the command
    pub fn source(&self, domain: Domain) -> Box<dyn Source> {
        if let Some(dir) = &self.replay {
            return Box::new(FileSource::new(dir.join(domain.replay_file())));
        }

        let mut command = domain.command().with_timeout(self.timeout);
        if let Some(program) = self.programs.get(&domain) {
            command = command.with_program(program.as_str());
        }
        Box::new(command)
    }

    pub fn collectors(&self) -> Vec<Box<dyn SlurmCollector>> {
        self.domains
            .iter()
            .map(|&domain| {
                let collector = DomainCollector::new(domain, self.source(domain));
                Box::new(collector) as Box<dyn SlurmCollector>
            })
            .collect()
    }
}
