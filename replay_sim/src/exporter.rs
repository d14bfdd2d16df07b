//! JSON exporter for decoded sessions.
//!
//! Exports per-sample decoding frames for offline plotting.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::SimError;

/// A single decoded sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimFrame {
    /// Sample time in seconds
    pub time_sec: f64,

    /// Tracked position of the animal
    pub position: f64,

    /// Position represented by the spiking
    pub represented_position: f64,

    /// Bin center with the highest likelihood, if any electrode spiked
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decoded_position: Option<f64>,

    /// Track distance from the represented position to the decoded bin
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decoding_error: Option<f64>,

    /// Speed evidence for replay
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_ratio: Option<f64>,

    pub speed: f64,
    pub is_replay: bool,
    pub num_spikes: usize,
}

/// Complete decoding export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Duration of the decoded session in seconds
    pub duration_sec: f64,

    /// Linear positions of the interior bin centers
    pub bin_centers: Vec<f64>,

    /// All frames
    pub frames: Vec<SimFrame>,

    /// Final results
    pub passed: bool,

    /// Median decoding error outside replay
    #[serde(skip_serializing_if = "Option::is_none")]
    pub median_error: Option<f64>,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            duration_sec: 0.0,
            bin_centers: Vec::new(),
            frames: Vec::new(),
            passed: false,
            median_error: None,
        }
    }

    /// Adds a frame.
    pub fn add_frame(&mut self, frame: SimFrame) {
        self.duration_sec = frame.time_sec;
        self.frames.push(frame);
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, median_error: Option<f64>) {
        self.passed = passed;
        self.median_error = median_error;
    }

    /// Writes the export as pretty JSON.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<(), SimError> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }
}
