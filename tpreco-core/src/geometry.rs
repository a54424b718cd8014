//! Detector geometry: plane layout, time units and charge calibration.
//!
//! Channel layout inside one APA (defaults, horizontal-drift module):
//!
//! | plane | local channels  | wires |
//! |-------|-----------------|-------|
//! | U     | `[0, 800)`      | 800   |
//! | V     | `[800, 1600)`   | 800   |
//! | X     | `[1600, 2560)`  | 960   |
//!
//! The X range is split into two drift volumes (one per anode face) at
//! its midpoint.
#![allow(clippy::cast_precision_loss)]

use crate::error::{Error, Result};
use crate::tp::View;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Detector geometry and unit conversions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorGeometry {
    /// Channels per APA (all planes).
    pub channels_per_apa: u32,
    /// U wires per APA.
    pub channels_u: u32,
    /// V wires per APA.
    pub channels_v: u32,
    /// X wires per APA (both faces).
    pub channels_x: u32,
    /// TDC ticks in one TPC tick.
    pub tdc_ticks_per_tpc_tick: u32,
    /// ADC integral per MeV on the induction planes.
    pub adc_per_mev_induction: f64,
    /// ADC integral per MeV on the collection plane.
    pub adc_per_mev_collection: f64,
}

impl Default for DetectorGeometry {
    fn default() -> Self {
        Self::horizontal_drift()
    }
}

impl DetectorGeometry {
    /// Horizontal-drift far detector module defaults.
    ///
    /// 16 ns TDC clock against a 512 ns TPC sample gives 32 TDC ticks per
    /// TPC tick.
    #[must_use]
    pub fn horizontal_drift() -> Self {
        Self {
            channels_per_apa: 2560,
            channels_u: 800,
            channels_v: 800,
            channels_x: 960,
            tdc_ticks_per_tpc_tick: 32,
            adc_per_mev_induction: 1_500.0,
            adc_per_mev_collection: 3_600.0,
        }
    }

    /// Sets the TDC/TPC tick ratio.
    #[must_use]
    pub fn with_tdc_ticks_per_tpc_tick(mut self, ratio: u32) -> Self {
        self.tdc_ticks_per_tpc_tick = ratio;
        self
    }

    /// Sets the ADC-per-MeV calibration for both plane kinds.
    #[must_use]
    pub fn with_adc_per_mev(mut self, induction: f64, collection: f64) -> Self {
        self.adc_per_mev_induction = induction;
        self.adc_per_mev_collection = collection;
        self
    }

    /// Load geometry from a JSON file. Missing fields take default values.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref()).map_err(|e| {
            Error::ConfigError(format!("cannot open {}: {e}", path.as_ref().display()))
        })?;
        let geometry: Self = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| Error::ConfigError(format!("invalid geometry json: {e}")))?;
        geometry.validate()?;
        Ok(geometry)
    }

    /// Load geometry from a JSON string. Missing fields take default values.
    ///
    /// # Errors
    /// Returns an error if the string cannot be parsed or fails validation.
    pub fn from_json(json: &str) -> Result<Self> {
        let geometry: Self = serde_json::from_str(json)
            .map_err(|e| Error::ConfigError(format!("invalid geometry json: {e}")))?;
        geometry.validate()?;
        Ok(geometry)
    }

    /// Checks the layout is self-consistent.
    ///
    /// # Errors
    /// Returns [`Error::ConfigError`] describing the first inconsistency.
    pub fn validate(&self) -> Result<()> {
        let planes = u64::from(self.channels_u)
            + u64::from(self.channels_v)
            + u64::from(self.channels_x);
        if planes != u64::from(self.channels_per_apa) {
            return Err(Error::ConfigError(format!(
                "plane channel counts {}+{}+{} do not sum to channels_per_apa {}",
                self.channels_u, self.channels_v, self.channels_x, self.channels_per_apa
            )));
        }
        if self.channels_u == 0 || self.channels_v == 0 || self.channels_x < 2 {
            return Err(Error::ConfigError(
                "every plane needs wires (and X needs two faces)".to_string(),
            ));
        }
        if self.tdc_ticks_per_tpc_tick == 0 {
            return Err(Error::ConfigError(
                "tdc_ticks_per_tpc_tick must be at least 1".to_string(),
            ));
        }
        if !(self.adc_per_mev_induction > 0.0 && self.adc_per_mev_collection > 0.0) {
            return Err(Error::ConfigError(
                "ADC-per-MeV factors must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Converts a TPC-tick duration into TDC ticks.
    ///
    /// All TPC→TDC conversions go through here.
    #[inline]
    #[must_use]
    pub fn tpc_to_tdc(&self, tpc_ticks: u64) -> u64 {
        tpc_ticks * u64::from(self.tdc_ticks_per_tpc_tick)
    }

    /// APA index of a detector channel.
    #[inline]
    #[must_use]
    pub fn apa_of(&self, detector_channel: u32) -> u32 {
        detector_channel / self.channels_per_apa
    }

    /// Channel position inside its APA.
    #[inline]
    #[must_use]
    pub fn local_channel(&self, detector_channel: u32) -> u32 {
        detector_channel % self.channels_per_apa
    }

    /// View implied by the channel layout.
    #[must_use]
    pub fn view_of(&self, detector_channel: u32) -> Option<View> {
        let local = self.local_channel(detector_channel);
        if local < self.channels_u {
            Some(View::U)
        } else if local < self.channels_u + self.channels_v {
            Some(View::V)
        } else if local < self.channels_u + self.channels_v + self.channels_x {
            Some(View::X)
        } else {
            None
        }
    }

    /// Wires per APA in a view.
    #[inline]
    #[must_use]
    pub fn plane_width(&self, view: View) -> u32 {
        match view {
            View::U => self.channels_u,
            View::V => self.channels_v,
            View::X => self.channels_x,
        }
    }

    /// Drift volume (anode face) of an X channel: 0 or 1. `None` off the X plane.
    #[must_use]
    pub fn x_drift_volume(&self, detector_channel: u32) -> Option<u32> {
        let local = self.local_channel(detector_channel);
        let x_start = self.channels_u + self.channels_v;
        if local < x_start || local >= x_start + self.channels_x {
            return None;
        }
        Some(u32::from(local - x_start >= self.channels_x / 2))
    }

    /// ADC integral per MeV for a view.
    #[inline]
    #[must_use]
    pub fn adc_per_mev(&self, view: View) -> f64 {
        if view.is_induction() {
            self.adc_per_mev_induction
        } else {
            self.adc_per_mev_collection
        }
    }

    /// Reconstructed energy (MeV) of a summed ADC integral.
    #[inline]
    #[must_use]
    pub fn charge_to_energy(&self, view: View, charge: u64) -> f64 {
        charge as f64 / self.adc_per_mev(view)
    }

    /// ADC threshold equivalent to an energy threshold.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn energy_to_adc(&self, view: View, energy_mev: f64) -> u64 {
        (energy_mev.max(0.0) * self.adc_per_mev(view)).round() as u64
    }
}
