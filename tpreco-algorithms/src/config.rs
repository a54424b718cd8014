//! Pipeline configuration.

use crate::matching::MatchingConfig;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tpreco_core::clustering::ClusteringConfig;
use tpreco_core::error::{Error, Result};
use tpreco_core::geometry::DetectorGeometry;
use tpreco_core::tp::View;

/// Per-plane charge thresholds applied before main selection.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CutConfig {
    /// Minimum `total_charge` on U and V (ADC).
    pub adc_integral_cut_induction: u64,
    /// Minimum `total_charge` on X (ADC).
    pub adc_integral_cut_collection: u64,
    /// Energy threshold (MeV); replaces both ADC cuts when set.
    pub energy_cut: Option<f64>,
}

impl CutConfig {
    /// ADC threshold for a view.
    #[must_use]
    pub fn adc_cut(&self, view: View, geometry: &DetectorGeometry) -> u64 {
        match self.energy_cut {
            Some(mev) => geometry.energy_to_adc(view, mev),
            None if view.is_induction() => self.adc_integral_cut_induction,
            None => self.adc_integral_cut_collection,
        }
    }

    /// Returns true when a cluster with `total_charge` survives the cut.
    #[inline]
    #[must_use]
    pub fn passes(&self, view: View, total_charge: u64, geometry: &DetectorGeometry) -> bool {
        total_charge >= self.adc_cut(view, geometry)
    }
}

/// Complete configuration of a per-file reconstruction.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Clustering engine parameters.
    pub clustering: ClusteringConfig,
    /// Charge thresholds.
    pub cuts: CutConfig,
    /// Matcher parameters.
    pub matching: MatchingConfig,
    /// Detector layout and unit conversions.
    pub geometry: DetectorGeometry,
    /// Cluster the three planes of an event on the rayon pool.
    pub parallel_planes: bool,
}

impl PipelineConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the clustering parameters.
    #[must_use]
    pub fn with_clustering(mut self, clustering: ClusteringConfig) -> Self {
        self.clustering = clustering;
        self
    }

    /// Replaces the charge thresholds.
    #[must_use]
    pub fn with_cuts(mut self, cuts: CutConfig) -> Self {
        self.cuts = cuts;
        self
    }

    /// Replaces the matcher parameters.
    #[must_use]
    pub fn with_matching(mut self, matching: MatchingConfig) -> Self {
        self.matching = matching;
        self
    }

    /// Replaces the geometry.
    #[must_use]
    pub fn with_geometry(mut self, geometry: DetectorGeometry) -> Self {
        self.geometry = geometry;
        self
    }

    /// Enables plane-level parallel clustering.
    #[must_use]
    pub fn with_parallel_planes(mut self, parallel: bool) -> Self {
        self.parallel_planes = parallel;
        self
    }

    /// Loads a configuration from a JSON file. Missing fields take defaults.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref()).map_err(|e| {
            Error::ConfigError(format!("cannot open {}: {e}", path.as_ref().display()))
        })?;
        let config: Self = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| Error::ConfigError(format!("invalid pipeline config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration from a JSON string. Missing fields take defaults.
    ///
    /// # Errors
    /// Returns an error if the string cannot be parsed or fails validation.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::ConfigError(format!("invalid pipeline config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Pretty-printed JSON.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::ConfigError(format!("cannot serialize config: {e}")))
    }

    /// Checks every section.
    ///
    /// # Errors
    /// Returns the first invalid parameter found.
    pub fn validate(&self) -> Result<()> {
        self.clustering.validate()?;
        self.matching.validate()?;
        self.geometry.validate()?;
        if let Some(mev) = self.cuts.energy_cut {
            if !mev.is_finite() || mev < 0.0 {
                return Err(Error::ConfigError(format!(
                    "energy_cut must be a non-negative number, got {mev}"
                )));
            }
        }
        Ok(())
    }
}
