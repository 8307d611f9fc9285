//! MiniFarm edge agent
//!
//! Watches plants with a camera, runs detection with whichever model the
//! operator has deployed through the oneM2M resource tree, and uploads species
//! and health results back to the tree.
//!
//! # Module Structure
//!
//! - `store`: oneM2M CSE client (`RemoteStore`) and an in-memory double
//! - `resolver`: deployment record -> model metadata -> artifact path
//! - `camera`: shared camera and frame sources
//! - `detect`: model backends and the species/health projection
//! - `report`: result upload
//! - `schedule`: hour-of-day trigger, interval timer, shutdown signal
//! - `stream`: MJPEG preview server
//! - `agent`: one run, and the scheduled loop
//! - `provision`: first-time resource tree setup

pub mod agent;
pub mod archive;
pub mod camera;
pub mod config;
pub mod detect;
pub mod error;
pub mod provision;
pub mod report;
pub mod resolver;
pub mod schedule;
pub mod store;
pub mod stream;

pub use agent::{Agent, LoopStats, RunSummary};
pub use camera::{Camera, CameraConfig, Frame};
pub use config::AgentConfig;
pub use detect::{Detector, DetectorSettings, HealthView, SpeciesView};
pub use error::{AgentError, ResolveStage, StoreError};
pub use report::{ReportPaths, Reporter};
pub use resolver::{ConfigResolver, ResolvedDeployment};
pub use schedule::{Clock, Interval, LocalClock, Scheduler, Shutdown, Trigger};
pub use store::{HttpRemoteStore, InMemoryRemoteStore, RemoteStore, StoreConfig};
pub use stream::{StreamConfig, StreamHandle, StreamServer};
