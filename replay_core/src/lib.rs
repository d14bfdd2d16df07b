//! Replay Core - Track-graph multiunit likelihood for replay decoding
//!
//! This library produces the likelihood surfaces used to decode an animal's
//! position on a track from unsorted multiunit spike features:
//! 1. **Distance Solver**: linear positions → shortest-path distances to
//!    every bin center along a branching track graph (batched, parallel)
//! 2. **Spatial Mixing Kernel**: distances → Gaussian mixing weights
//! 3. **Multiunit KDE**: product-kernel feature density projected onto bins
//! 4. **Numerical Stabilizers**: scaled and combined log-likelihoods

pub mod config;
pub mod error;
pub mod likelihood;
pub mod multiunit_kde;
pub mod multiunit_likelihood;
pub mod spatial_kernel;
pub mod speed_likelihood;
pub mod track_distance;
pub mod track_graph;
pub mod track_layout;

// Re-export key types for convenience
pub use config::LikelihoodConfig;
pub use error::{LikelihoodError, Result};
pub use likelihood::{
    combine_log_likelihoods, combined_likelihood, scale_log_likelihood, scaled_likelihood,
    SourceStack,
};
pub use multiunit_kde::{evaluate_kde, product_kernel};
pub use multiunit_likelihood::{ElectrodeModel, MultiunitLikelihood};
pub use spatial_kernel::gaussian_track_distances;
pub use speed_likelihood::{LaggedSpeedModel, SpeedGlm, SpeedLikelihood};
pub use track_distance::{find_brackets, solve_distances, Bracket, DistanceSolver};
pub use track_graph::{NodeId, NodeIndexTable, TrackGraph, TrackNode, WorkingGraph};
pub use track_layout::{BuiltTrack, SegmentEnd, TrackLayout};
