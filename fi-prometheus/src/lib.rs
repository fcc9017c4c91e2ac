//! Exposes Slurm collectors through a prometheus [`Registry`].
//!
//! Every scrape of the registry triggers one poll per registered domain. The samples of
//! a poll are turned into fresh gauge families, so series that disappear from the
//! scheduler output disappear from the scrape too.

use fi_slurm::{Domain, MetricDesc, Sample, SlurmCollector};
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{
    GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

const COLLECTOR_LABEL: &[&str] = &["collector"];

/// Health of the exporter itself, labeled by domain
#[derive(Debug, Clone)]
pub struct ExporterMetrics {
    poll_errors: IntCounterVec,
    decode_failures: IntCounterVec,
    poll_duration: HistogramVec,
}

impl ExporterMetrics {
    pub fn new() -> Result<Self, AdapterError> {
        let poll_errors = IntCounterVec::new(
            Opts::new(
                "slurm_exporter_poll_errors_total",
                "Number of polls that failed to obtain scheduler output",
            ),
            COLLECTOR_LABEL,
        )?;
        let decode_failures = IntCounterVec::new(
            Opts::new(
                "slurm_exporter_decode_failures_total",
                "Number of fields that could not be decoded and were taken as zero",
            ),
            COLLECTOR_LABEL,
        )?;
        let poll_duration = HistogramVec::new(
            HistogramOpts::new(
                "slurm_exporter_poll_duration_seconds",
                "Time spent fetching and parsing scheduler output in seconds",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
            COLLECTOR_LABEL,
        )?;

        let metrics = Self {
            poll_errors,
            decode_failures,
            poll_duration,
        };

        // present from the first scrape, before anything went wrong
        for domain in Domain::ALL {
            metrics.poll_errors.with_label_values(&[domain.as_str()]);
            metrics.decode_failures.with_label_values(&[domain.as_str()]);
        }

        Ok(metrics)
    }

    pub fn register(&self, registry: &Registry) -> Result<(), AdapterError> {
        registry.register(Box::new(self.poll_errors.clone()))?;
        registry.register(Box::new(self.decode_failures.clone()))?;
        registry.register(Box::new(self.poll_duration.clone()))?;
        Ok(())
    }

    pub fn poll_errors(&self, domain: Domain) -> u64 {
        self.poll_errors.with_label_values(&[domain.as_str()]).get()
    }

    pub fn decode_failures(&self, domain: Domain) -> u64 {
        self.decode_failures.with_label_values(&[domain.as_str()]).get()
    }

    /// Number of polls timed so far, failed ones included
    pub fn polls(&self, domain: Domain) -> u64 {
        self.poll_duration
            .with_label_values(&[domain.as_str()])
            .get_sample_count()
    }
}

fn gauge_vec(desc: &MetricDesc) -> prometheus::Result<GaugeVec> {
    GaugeVec::new(Opts::new(desc.name, desc.help), desc.labels)
}

/// Adapts one [`SlurmCollector`] to the prometheus collector interface
pub struct SlurmRegistryCollector {
    collector: Box<dyn SlurmCollector>,
    // only used for their descriptors
    templates: Vec<GaugeVec>,
    self_metrics: ExporterMetrics,
}

impl SlurmRegistryCollector {
    pub fn new(
        collector: Box<dyn SlurmCollector>,
        self_metrics: ExporterMetrics,
    ) -> Result<Self, AdapterError> {
        let templates = collector
            .describe()
            .iter()
            .map(gauge_vec)
            .collect::<prometheus::Result<Vec<_>>>()?;

        Ok(Self {
            collector,
            templates,
            self_metrics,
        })
    }

    pub fn domain(&self) -> Domain {
        self.collector.domain()
    }

    fn families(&self, samples: &[Sample]) -> prometheus::Result<Vec<MetricFamily>> {
        let descs = self.collector.describe();
        let gauges = descs
            .iter()
            .map(gauge_vec)
            .collect::<prometheus::Result<Vec<_>>>()?;

        for sample in samples {
            let Some(index) = descs.iter().position(|desc| desc.name == sample.name) else {
                tracing::warn!(metric = sample.name, "sample for undescribed metric");
                continue;
            };

            let labels: Vec<&str> = sample.labels.iter().map(String::as_str).collect();
            match gauges[index].get_metric_with_label_values(&labels) {
                Ok(gauge) => gauge.set(sample.value),
                Err(error) => {
                    tracing::warn!(metric = sample.name, %error, "dropping sample");
                }
            }
        }

        Ok(gauges
            .iter()
            .flat_map(|gauge| gauge.collect())
            .filter(|family| !family.get_metric().is_empty())
            .collect())
    }
}

impl Collector for SlurmRegistryCollector {
    fn desc(&self) -> Vec<&Desc> {
        self.templates.iter().flat_map(|gauge| gauge.desc()).collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let domain = self.collector.domain();
        let label = [domain.as_str()];

        let (elapsed, result) = self.collector.timed_collect();
        self.self_metrics
            .poll_duration
            .with_label_values(&label)
            .observe(elapsed.as_secs_f64());

        let poll = match result {
            Ok(poll) => poll,
            Err(error) => {
                tracing::error!(collector = %domain, %error, "poll failed");
                self.self_metrics.poll_errors.with_label_values(&label).inc();
                return Vec::new();
            }
        };

        self.self_metrics
            .decode_failures
            .with_label_values(&label)
            .inc_by(poll.decode_failures);

        match self.families(&poll.samples) {
            Ok(families) => families,
            Err(error) => {
                tracing::error!(collector = %domain, %error, "failed to build metric families");
                Vec::new()
            }
        }
    }
}

/// Builds a registry holding the given collectors and the exporter's own metrics
pub fn build_registry(
    collectors: Vec<Box<dyn SlurmCollector>>,
) -> Result<(Registry, ExporterMetrics), AdapterError> {
    let registry = Registry::new();
    let self_metrics = ExporterMetrics::new()?;
    self_metrics.register(&registry)?;

    for collector in collectors {
        let adapter = SlurmRegistryCollector::new(collector, self_metrics.clone())?;
        tracing::info!(collector = %adapter.domain(), "registered collector");
        registry.register(Box::new(adapter))?;
    }

    #[cfg(target_os = "linux")]
    registry.register(Box::new(
        prometheus::process_collector::ProcessCollector::for_self(),
    ))?;

    Ok((registry, self_metrics))
}

/// Polls every collector of the registry and renders the text exposition format
pub fn encode_text(registry: &Registry) -> Result<String, AdapterError> {
    let families = registry.gather();
    Ok(TextEncoder::new().encode_to_string(&families)?)
}
