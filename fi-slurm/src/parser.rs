use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

/// Separator between the columns of every Slurm listing we consume
pub const FIELD_SEPARATOR: char = '|';

/// Decodes the textual fields of a listing with a parse-or-default policy
///
/// Numeric fields that fail to decode are replaced with zero so a single garbled row
/// never aborts a poll. Every substitution is tallied, and the tally ends up in the
/// snapshot so it can be exported alongside the data.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FieldDecoder {
    failures: u64,
}

impl FieldDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of fields substituted with a default so far
    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Splits a line into exactly `N` trimmed fields, counting missing ones as failures
    pub fn fields<'a, const N: usize>(&mut self, line: &'a str) -> [&'a str; N] {
        let (fields, found) = split_fields::<N>(line);
        self.failures += (N - found) as u64;
        fields
    }

    /// Decodes a plain number, or zero
    pub fn float(&mut self, field: &str) -> f64 {
        self.or_zero(parse_float(field))
    }

    /// Decodes a unit-suffixed memory quantity into megabytes, or zero
    pub fn mem_mb(&mut self, field: &str) -> f64 {
        self.or_zero(parse_mem_mb(field))
    }

    /// Decodes a TRES list, counting malformed pairs as failures
    pub fn tres<'a>(&mut self, field: &'a str) -> Tres<'a> {
        let (tres, malformed) = parse_tres(field);
        self.failures += malformed as u64;
        tres
    }

    /// Looks up a TRES count by name; an absent key is zero without being a failure
    pub fn tres_count(&mut self, tres: &Tres<'_>, key: &str) -> f64 {
        match tres.get(key) {
            Some(value) => self.float(value),
            None => 0.0,
        }
    }

    /// Looks up a TRES memory quantity by name and converts it to megabytes
    pub fn tres_mem_mb(&mut self, tres: &Tres<'_>, key: &str) -> f64 {
        match tres.get(key) {
            Some(value) => self.mem_mb(value),
            None => 0.0,
        }
    }

    fn or_zero(&mut self, value: Option<f64>) -> f64 {
        value.unwrap_or_else(|| {
            self.failures += 1;
            0.0
        })
    }
}

/// Splits a line on [`FIELD_SEPARATOR`] into exactly `N` trimmed fields
///
/// Missing trailing fields are left empty and extra fields are ignored. The second
/// value is the number of fields actually present (capped at `N`).
pub fn split_fields<const N: usize>(line: &str) -> ([&str; N], usize) {
    let mut fields = [""; N];
    let mut found = 0;
    for (slot, field) in fields.iter_mut().zip(line.split(FIELD_SEPARATOR)) {
        *slot = field.trim();
        found += 1;
    }
    (fields, found)
}

/// Parses a finite floating point number, tolerating surrounding whitespace
pub fn parse_float(field: &str) -> Option<f64> {
    field
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}

/// Converts a memory quantity such as `"8G"` or `"512M"` into megabytes
///
/// Suffixes are powers of 1024: `K` divides, `M` is unchanged, `G` and `T` multiply.
/// A bare number is taken to already be in megabytes, which is how Slurm reports
/// node memory.
///
/// # Examples
///
/// * `"2G"` -> `2048.0`
/// * `"1024K"` -> `1.0`
/// * `"1T"` -> `1048576.0`
pub fn parse_mem_mb(field: &str) -> Option<f64> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"^(\d+(?:\.\d+)?|\.\d+)\s*([KkMmGgTt])?$")
            .expect("Failed to compile memory quantity regex")
    });

    let captures = re.captures(field.trim())?;
    let value = captures.get(1)?.as_str().parse::<f64>().ok()?;

    let megabytes = match captures.get(2).map(|unit| unit.as_str()) {
        Some("K") | Some("k") => value / 1024.0,
        Some("G") | Some("g") => value * 1024.0,
        Some("T") | Some("t") => value * 1024.0 * 1024.0,
        // "M", or no unit at all
        _ => value,
    };
    Some(megabytes)
}

/// A decoded TRES string, mapping resource names (`cpu`, `mem`, `gres/gpu`) to raw values
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Tres<'a> {
    entries: HashMap<&'a str, &'a str>,
}

impl<'a> Tres<'a> {
    pub fn get(&self, key: &str) -> Option<&'a str> {
        self.entries.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parses a comma-separated TRES string (e.g., "cpu=4,mem=8G,gres/gpu=1")
///
/// Values are kept as text so each consumer decides how to interpret them (counts,
/// memory quantities, minutes). Lookups go by name, so reordered or omitted resources
/// are handled.
///
/// # Returns
///
/// The decoded pairs and the number of non-empty entries that were not `key=value`
pub fn parse_tres(tres_str: &str) -> (Tres<'_>, usize) {
    let mut entries = HashMap::new();
    let mut malformed = 0;

    for pair in tres_str.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                entries.insert(key.trim(), value.trim());
            }
            _ => malformed += 1,
        }
    }

    (Tres { entries }, malformed)
}
