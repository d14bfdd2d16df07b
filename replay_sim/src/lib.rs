//! Replay Deterministic Simulation Harness
//!
//! Generates synthetic recording sessions with a known ground truth and runs
//! the full likelihood pipeline on them.
//!
//! # Core Principle
//!
//! Every random draw comes from ChaCha streams derived from a single 64-bit
//! seed:
//! - **Population**: place-field centers and mark amplitudes of each unit
//! - **Behaviour**: running speed noise, spike times and mark noise
//!
//! # Pipeline
//!
//! ```text
//!  Oracle ──► training session ──► MultiunitLikelihood::fit
//!    │                              LaggedSpeedModel::fit
//!    └──────► test session ───────► likelihood / speed ratio ──► decode ──► metrics
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use replay_sim::{ScenarioRunner, ScenarioId};
//!
//! let result = ScenarioRunner::new(42)
//!     .with_duration(20.0)
//!     .run(ScenarioId::WTrack);
//! assert!(result.passed);
//! ```

pub mod error;
pub mod exporter;
pub mod oracle;
pub mod runner;
pub mod scenarios;
pub mod world;

pub use error::SimError;
pub use exporter::{SimExport, SimFrame};
pub use oracle::{Electrode, Oracle, Route, Unit};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use scenarios::ScenarioId;
pub use world::{SimConfig, SimSession};
