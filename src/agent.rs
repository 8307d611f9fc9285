//! One detection run and the scheduled loop around it.

use std::sync::Arc;

use crate::archive::{ArchivedCapture, CaptureArchive};
use crate::camera::Camera;
use crate::config::AgentConfig;
use crate::detect::Detector;
use crate::error::AgentError;
use crate::report::{ReportSummary, Reporter};
use crate::resolver::ConfigResolver;
use crate::schedule::{Clock, Interval, Scheduler, Shutdown, Trigger};
use crate::store::RemoteStore;

/// What a successful run did.
#[derive(Clone, Debug)]
pub struct RunSummary {
    pub deployment_name: String,
    pub model_artifact_path: String,
    pub frame_sequence: u64,
    pub detections: usize,
    pub species: Vec<String>,
    pub health_entries: usize,
    pub report: ReportSummary,
    pub capture: Option<ArchivedCapture>,
}

/// Totals for the scheduled loop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub checks: u64,
    pub runs: u64,
    pub failures: u64,
}

pub struct Agent {
    camera: Camera,
    resolver: ConfigResolver,
    detector: Detector,
    reporter: Reporter,
    archive: Option<CaptureArchive>,
    deployment_path: String,
}

impl Agent {
    pub fn new(camera: Camera, store: Arc<dyn RemoteStore>, config: &AgentConfig) -> Self {
        Self {
            camera,
            resolver: ConfigResolver::new(store.clone()),
            detector: Detector::new(config.detector.clone()),
            reporter: Reporter::new(store, config.report.clone()),
            archive: config.capture_dir.clone().map(CaptureArchive::new),
            deployment_path: config.deployment_path.clone(),
        }
    }

    /// Resolve the model, capture, detect, and upload both views.
    pub fn run_once(&self) -> Result<RunSummary, AgentError> {
        let resolved = self.resolver.resolve(&self.deployment_path)?;
        let frame = self.camera.capture().map_err(AgentError::Camera)?;
        log::info!(
            "captured frame #{} ({}x{})",
            frame.sequence(),
            frame.width(),
            frame.height()
        );

        let outcome = self.detector.run(&frame, resolved.model_artifact_path())?;

        let capture = match &self.archive {
            Some(archive) => match archive.save(&frame, &outcome.detections) {
                Ok(saved) => Some(saved),
                Err(err) => {
                    log::warn!("capture archive failed: {:#}", err);
                    None
                }
            },
            None => None,
        };

        let report = self.reporter.report(&outcome.species, &outcome.health)?;

        let summary = RunSummary {
            deployment_name: resolved.deployment.deployment_name,
            model_artifact_path: resolved.model.model_artifact_path,
            frame_sequence: frame.sequence(),
            detections: outcome.detections.len(),
            species: outcome.species.iter().map(str::to_string).collect(),
            health_entries: outcome.health.len(),
            report,
            capture,
        };
        log::info!(
            "run complete: {} detections, species [{}], {} health entries",
            summary.detections,
            summary.species.join(", "),
            summary.health_entries
        );
        Ok(summary)
    }

    /// Run whenever `scheduler` fires until it is done or `shutdown` triggers.
    /// A failed run is logged and the loop waits for the next trigger.
    pub fn run_scheduled(
        &self,
        scheduler: &mut Scheduler,
        interval: &mut Interval,
        clock: &dyn Clock,
        shutdown: &Shutdown,
    ) -> LoopStats {
        let mut stats = LoopStats::default();
        while interval.tick(shutdown) {
            stats.checks += 1;
            let hour = clock.hour();
            match scheduler.poll(hour) {
                Trigger::Fire => {
                    log::info!("trigger at hour {:02}", hour);
                    stats.runs += 1;
                    if let Err(err) = self.run_once() {
                        stats.failures += 1;
                        log::error!("run failed: {}", err);
                    }
                }
                Trigger::Wait => {
                    log::debug!(
                        "hour {:02}: no trigger, next check in {}s",
                        hour,
                        interval.period().as_secs()
                    );
                }
                Trigger::Done => break,
            }
            if scheduler.is_done() {
                break;
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraConfig;
    use crate::store::InMemoryRemoteStore;
    use serde_json::json;
    use std::time::Duration;

    const DEPLOYMENT: &str = "/TinyIoT/TinyFarm/modelDeploymentList/modelDeploy_healthy";

    struct FixedClock(u32);

    impl Clock for FixedClock {
        fn hour(&self) -> u32 {
            self.0
        }
    }

    fn seeded_store(model_path: &str) -> Arc<InMemoryRemoteStore> {
        let store = Arc::new(InMemoryRemoteStore::new());
        store.insert(DEPLOYMENT, json!({"modelID": "/TinyIoT/TinyFarm/modelRepo/mlModel-healthy"}));
        store.insert(
            "/TinyIoT/TinyFarm/modelRepo/mlModel-healthy",
            json!({"mlModelPath": model_path}),
        );
        store
    }

    fn agent(store: Arc<InMemoryRemoteStore>, config: &AgentConfig) -> Agent {
        let camera = Camera::open(&CameraConfig {
            device: "stub://test".to_string(),
            width: 64,
            height: 48,
        })
        .unwrap();
        Agent::new(camera, store, config)
    }

    #[test]
    fn run_once_reports_both_views() {
        let store = seeded_store("stub://healthy_basil,unhealthy_poinsenttia");
        let config = AgentConfig::default();
        let summary = agent(store.clone(), &config).run_once().unwrap();
        assert_eq!(summary.deployment_name, "modelDeploy_healthy");
        assert_eq!(summary.species, vec!["basil", "poinsettia"]);
        assert!(summary.report.species_written && summary.report.health_written);
        let health = store.records(&config.report.health);
        assert_eq!(health[0]["data"]["1"], "unhealthy_poinsettia");
    }

    #[test]
    fn unresolved_deployment_uploads_nothing() {
        let store = Arc::new(InMemoryRemoteStore::new());
        let config = AgentConfig::default();
        let err = agent(store.clone(), &config).run_once().unwrap_err();
        assert!(err.is_config_unresolved());
        assert!(store.records(&config.report.species).is_empty());
    }

    #[test]
    fn immediate_mode_runs_once_and_returns() {
        let store = seeded_store("stub://healthy_basil");
        let config = AgentConfig::default();
        let agent = agent(store.clone(), &config);
        let mut scheduler = Scheduler::immediate();
        let mut interval = Interval::new(Duration::from_secs(3600));
        let stats = agent.run_scheduled(&mut scheduler, &mut interval, &FixedClock(3), &Shutdown::new());
        assert_eq!(stats.runs, 1);
        assert_eq!(stats.failures, 0);
        assert_eq!(store.records(&config.report.species).len(), 1);
    }

    #[test]
    fn failed_run_is_counted_not_fatal() {
        let store = Arc::new(InMemoryRemoteStore::new());
        let config = AgentConfig::default();
        let agent = agent(store, &config);
        let mut scheduler = Scheduler::immediate();
        let mut interval = Interval::new(Duration::from_secs(3600));
        let stats = agent.run_scheduled(&mut scheduler, &mut interval, &FixedClock(3), &Shutdown::new());
        assert_eq!(stats, LoopStats { checks: 1, runs: 1, failures: 1 });
    }

    #[test]
    fn shutdown_stops_scheduled_loop() {
        let store = seeded_store("stub://healthy_basil");
        let config = AgentConfig::default();
        let agent = agent(store, &config);
        let shutdown = Shutdown::new();
        shutdown.trigger();
        let mut scheduler = Scheduler::scheduled([8]);
        let mut interval = Interval::new(Duration::from_millis(10));
        let stats = agent.run_scheduled(&mut scheduler, &mut interval, &FixedClock(8), &shutdown);
        assert_eq!(stats.runs, 0);
    }
}
