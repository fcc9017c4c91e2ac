use serde::Serialize;

/// Static description of one exported gauge: its name, help text and label schema
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricDesc {
    pub name: &'static str,
    pub help: &'static str,
    pub labels: &'static [&'static str],
}

/// One labeled observation, label values ordered as in the metric's [`MetricDesc`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    pub name: &'static str,
    pub value: f64,
    pub labels: Vec<String>,
}

/// Collects the samples of one poll, dropping every quantity that is not strictly positive
///
/// Zero series are never exported; this keeps the cardinality of a scrape down to
/// what is actually in use on the cluster.
#[derive(Debug, Default)]
pub struct Emitter {
    samples: Vec<Sample>,
}

impl Emitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gauge(&mut self, desc: &MetricDesc, value: f64, labels: &[&str]) {
        debug_assert_eq!(desc.labels.len(), labels.len(), "label schema of {}", desc.name);

        if !value.is_finite() || value <= 0.0 {
            return;
        }

        self.samples.push(Sample {
            name: desc.name,
            value,
            labels: labels.iter().map(|label| label.to_string()).collect(),
        });
    }

    pub fn into_samples(self) -> Vec<Sample> {
        self.samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_GAUGE: MetricDesc = MetricDesc {
        name: "test_gauge",
        help: "A gauge for tests",
        labels: &["kind"],
    };

    #[test]
    fn test_only_positive_values_are_emitted() {
        let mut emitter = Emitter::new();
        emitter.gauge(&TEST_GAUGE, 1.5, &["a"]);
        emitter.gauge(&TEST_GAUGE, 0.0, &["b"]);
        emitter.gauge(&TEST_GAUGE, -3.0, &["c"]);
        emitter.gauge(&TEST_GAUGE, f64::NAN, &["d"]);
        emitter.gauge(&TEST_GAUGE, f64::INFINITY, &["e"]);

        let samples = emitter.into_samples();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].name, "test_gauge");
        assert_eq!(samples[0].value, 1.5);
        assert_eq!(samples[0].labels, vec!["a".to_string()]);
    }
}
