//! Upload of species and health views to their output containers.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::detect::{HealthView, SpeciesView};
use crate::error::AgentError;
use crate::store::RemoteStore;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Output containers for the two views.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReportPaths {
    pub species: String,
    pub health: String,
}

/// Which views were written. A view with no entries is skipped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReportSummary {
    pub species_written: bool,
    pub health_written: bool,
}

pub struct Reporter {
    store: Arc<dyn RemoteStore>,
    paths: ReportPaths,
}

impl Reporter {
    pub fn new(store: Arc<dyn RemoteStore>, paths: ReportPaths) -> Self {
        Self { store, paths }
    }

    /// Write both views stamped with the local wall-clock time.
    pub fn report(&self, species: &SpeciesView, health: &HealthView) -> Result<ReportSummary, AgentError> {
        let timestamp = chrono::Local::now().format(TIMESTAMP_FORMAT).to_string();
        self.report_at(species, health, &timestamp)
    }

    /// Write species first, then health. A failed write stops the report; the
    /// species record is not withdrawn if the health write fails.
    pub fn report_at(
        &self,
        species: &SpeciesView,
        health: &HealthView,
        timestamp: &str,
    ) -> Result<ReportSummary, AgentError> {
        let mut summary = ReportSummary::default();

        if species.is_empty() {
            log::warn!("no species detected; skipping upload to {}", self.paths.species);
        } else {
            self.write(&self.paths.species, &species_record(species, timestamp))?;
            log::info!("species uploaded ({} unique)", species.len());
            summary.species_written = true;
        }

        if health.is_empty() {
            log::warn!("no health entries; skipping upload to {}", self.paths.health);
        } else {
            self.write(&self.paths.health, &health_record(health, timestamp))?;
            log::info!("health uploaded ({} entries)", health.len());
            summary.health_written = true;
        }

        Ok(summary)
    }

    fn write(&self, path: &str, record: &Value) -> Result<(), AgentError> {
        self.store
            .write_record(path, record)
            .map_err(AgentError::Network)
    }
}

/// `{"timestamp": ..., "data": {"0": "basil", ...}}`, species sorted.
pub fn species_record(species: &SpeciesView, timestamp: &str) -> Value {
    indexed_record(species.iter().map(str::to_string), timestamp)
}

/// `{"timestamp": ..., "data": {"0": "healthy_basil", ...}}` in detection order.
pub fn health_record(health: &HealthView, timestamp: &str) -> Value {
    indexed_record(health.entries().iter().map(|e| e.label()), timestamp)
}

fn indexed_record(items: impl Iterator<Item = String>, timestamp: &str) -> Value {
    let data: Map<String, Value> = items
        .enumerate()
        .map(|(i, item)| (i.to_string(), Value::String(item)))
        .collect();
    serde_json::json!({
        "timestamp": timestamp,
        "data": data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{partition, LabelRules};
    use crate::store::InMemoryRemoteStore;

    const TS: &str = "2026-05-01 13:00:00";

    fn paths() -> ReportPaths {
        ReportPaths {
            species: "/TinyIoT/TinyFarm/inference/species".to_string(),
            health: "/TinyIoT/TinyFarm/inference/health".to_string(),
        }
    }

    fn views() -> (SpeciesView, HealthView) {
        partition(
            ["unhealthy_poinsettia", "healthy_basil", "healthy_basil"],
            &LabelRules::default(),
        )
    }

    #[test]
    fn records_are_indexed_maps() {
        let (species, health) = views();
        let s = species_record(&species, TS);
        assert_eq!(s["timestamp"], TS);
        assert_eq!(s["data"]["0"], "basil");
        assert_eq!(s["data"]["1"], "poinsettia");

        let h = health_record(&health, TS);
        assert_eq!(h["data"]["0"], "unhealthy_poinsettia");
        assert_eq!(h["data"]["2"], "healthy_basil");
        assert_eq!(h["data"].as_object().unwrap().len(), 3);
    }

    #[test]
    fn writes_both_views() {
        let store = Arc::new(InMemoryRemoteStore::new());
        let reporter = Reporter::new(store.clone(), paths());
        let (species, health) = views();
        let summary = reporter.report_at(&species, &health, TS).unwrap();
        assert!(summary.species_written && summary.health_written);
        assert_eq!(store.records(&paths().species).len(), 1);
        assert_eq!(store.records(&paths().health)[0]["data"]["1"], "healthy_basil");
    }

    #[test]
    fn empty_views_are_skipped() {
        let store = Arc::new(InMemoryRemoteStore::new());
        let reporter = Reporter::new(store.clone(), paths());
        let summary = reporter
            .report_at(&SpeciesView::default(), &HealthView::default(), TS)
            .unwrap();
        assert_eq!(summary, ReportSummary::default());
        assert!(store.records(&paths().species).is_empty());
    }

    #[test]
    fn health_failure_propagates_without_rollback() {
        let store = Arc::new(InMemoryRemoteStore::new());
        store.fail_writes_to(&paths().health);
        let reporter = Reporter::new(store.clone(), paths());
        let (species, health) = views();
        let err = reporter.report_at(&species, &health, TS).unwrap_err();
        assert!(matches!(err, AgentError::Network(_)));
        assert_eq!(store.records(&paths().species).len(), 1);
    }
}
