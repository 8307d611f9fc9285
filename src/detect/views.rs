//! Species and health projections of a detection batch.
//!
//! The plant model emits one combined label per instance, `<health>_<species>`.
//! Splitting happens on the first `_`, so multi-word species keep their
//! underscores (`healthy_sweet_basil` -> `sweet_basil`).

use std::collections::BTreeSet;
use std::fmt;

const LABEL_DELIMITER: char = '_';

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Unknown,
    Other(String),
}

impl HealthStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "" | "unknown" => HealthStatus::Unknown,
            "healthy" => HealthStatus::Healthy,
            "unhealthy" => HealthStatus::Unhealthy,
            other => HealthStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Unknown => "unknown",
            HealthStatus::Other(other) => other,
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One detected instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HealthEntry {
    pub species: String,
    pub health: HealthStatus,
}

impl HealthEntry {
    /// Combined `<health>_<species>` form used in uploads.
    pub fn label(&self) -> String {
        format!("{}{}{}", self.health, LABEL_DELIMITER, self.species)
    }
}

/// Unique species seen in a batch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SpeciesView {
    species: BTreeSet<String>,
}

impl SpeciesView {
    pub fn contains(&self, species: &str) -> bool {
        self.species.contains(species)
    }

    pub fn len(&self) -> usize {
        self.species.len()
    }

    pub fn is_empty(&self) -> bool {
        self.species.is_empty()
    }

    /// Species names in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.species.iter().map(String::as_str)
    }
}

/// One entry per detected instance, in detection order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HealthView {
    entries: Vec<HealthEntry>,
}

impl HealthView {
    pub fn entries(&self) -> &[HealthEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Substring corrections applied to raw labels before splitting.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelRules {
    corrections: Vec<(String, String)>,
}

impl LabelRules {
    pub fn new(corrections: Vec<(String, String)>) -> Self {
        let corrections = corrections
            .into_iter()
            .filter(|(from, _)| !from.is_empty())
            .map(|(from, to)| (from.to_lowercase(), to.to_lowercase()))
            .collect();
        Self { corrections }
    }

    pub fn none() -> Self {
        Self {
            corrections: Vec::new(),
        }
    }

    /// Lowercase, trim, then apply each correction in order.
    pub fn normalize(&self, label: &str) -> String {
        let mut label = label.trim().to_lowercase();
        for (from, to) in &self.corrections {
            if label.contains(from.as_str()) {
                label = label.replace(from.as_str(), to);
            }
        }
        label
    }
}

impl Default for LabelRules {
    /// The shipped plant model misspells poinsettia.
    fn default() -> Self {
        Self::new(vec![("poinsenttia".to_string(), "poinsettia".to_string())])
    }
}

/// Split one normalized label into species and health.
///
/// No delimiter, or an empty health side, means species-only with unknown
/// health. An empty species side leaves the species empty so the entry is
/// dropped by `partition`.
pub fn split_label(label: &str) -> HealthEntry {
    let (health, species) = match label.split_once(LABEL_DELIMITER) {
        Some((health, species)) => (health.trim(), species.trim()),
        None => ("", label.trim()),
    };
    let health = if health.is_empty() || species.is_empty() {
        HealthStatus::Unknown
    } else {
        HealthStatus::parse(health)
    };
    HealthEntry {
        species: species.to_string(),
        health,
    }
}

/// Build both views from a batch of raw labels.
pub fn partition<'a, I>(labels: I, rules: &LabelRules) -> (SpeciesView, HealthView)
where
    I: IntoIterator<Item = &'a str>,
{
    let mut species = SpeciesView::default();
    let mut health = HealthView::default();
    for raw in labels {
        let entry = split_label(&rules.normalize(raw));
        if entry.species.is_empty() {
            continue;
        }
        species.species.insert(entry.species.clone());
        health.entries.push(entry);
    }
    (species, health)
}
