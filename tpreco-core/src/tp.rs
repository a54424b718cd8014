//! Trigger primitive and embedded truth types.

use crate::error::{Error, Result};
use crate::geometry::DetectorGeometry;
use crate::range::TimeRange;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Generator name marking a TP without truth information.
pub const UNKNOWN_GENERATOR: &str = "UNKNOWN";

/// Generator name of the signal (supernova neutrino) events.
pub const SIGNAL_GENERATOR: &str = "marley";

/// Wire plane a TP was recorded on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum View {
    /// First induction plane.
    #[serde(alias = "u")]
    U,
    /// Second induction plane.
    #[serde(alias = "v")]
    V,
    /// Collection plane. Some productions label it Z.
    #[serde(alias = "x", alias = "Z", alias = "z")]
    X,
}

impl View {
    /// All views in processing order.
    pub const ALL: [View; 3] = [View::U, View::V, View::X];

    /// Returns true for the induction planes (U, V).
    #[inline]
    #[must_use]
    pub fn is_induction(self) -> bool {
        matches!(self, View::U | View::V)
    }

    /// Position of the view in [`View::ALL`].
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            View::U => 0,
            View::V => 1,
            View::X => 2,
        }
    }

    /// Single-letter plane name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            View::U => "U",
            View::V => "V",
            View::X => "X",
        }
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for View {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "U" | "u" => Ok(View::U),
            "V" | "v" => Ok(View::V),
            "X" | "x" | "Z" | "z" => Ok(View::X),
            other => Err(Error::ConfigError(format!("unknown view '{other}'"))),
        }
    }
}

/// Monte-Carlo truth attached to a single TP.
///
/// Every field is optional on input; a TP without truth carries the
/// [`UNKNOWN_GENERATOR`] sentinel and zeroed kinematics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TruthInfo {
    /// Generator that produced the particle ("marley", background names, ...).
    pub generator_name: String,
    /// PDG code of the depositing particle.
    pub pdg: i32,
    /// Interaction process of the parent neutrino ("ES", "CC", ...).
    pub process: String,
    /// True vertex position (cm).
    pub position: [f64; 3],
    /// Particle momentum (GeV/c).
    pub particle_momentum: [f64; 3],
    /// Particle energy (MeV).
    pub particle_energy: f64,
    /// Parent neutrino momentum (GeV/c).
    pub neutrino_momentum: [f64; 3],
    /// Parent neutrino energy (MeV).
    pub neutrino_energy: f64,
}

impl Default for TruthInfo {
    fn default() -> Self {
        Self {
            generator_name: UNKNOWN_GENERATOR.to_string(),
            pdg: 0,
            process: String::new(),
            position: [0.0; 3],
            particle_momentum: [0.0; 3],
            particle_energy: 0.0,
            neutrino_momentum: [0.0; 3],
            neutrino_energy: 0.0,
        }
    }
}

impl TruthInfo {
    /// Returns true when the TP is linked to any generator.
    #[inline]
    #[must_use]
    pub fn is_known(&self) -> bool {
        self.generator_name != UNKNOWN_GENERATOR
    }

    /// Returns true when the TP comes from the signal generator.
    #[inline]
    #[must_use]
    pub fn is_signal(&self) -> bool {
        self.generator_name.eq_ignore_ascii_case(SIGNAL_GENERATOR)
    }

    /// Returns true when the truth record carries a parent neutrino.
    #[inline]
    #[must_use]
    pub fn has_neutrino(&self) -> bool {
        self.neutrino_energy > 0.0
    }
}

/// A single-wire waveform summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerPrimitive {
    /// Event identifier.
    pub event: u32,
    /// Global channel, unique across all APAs.
    pub channel: u32,
    /// Channel number resolving the APA and its local wire.
    pub detector_channel: u32,
    /// Detector (APA) index as recorded upstream.
    pub detector: u32,
    /// Wire plane.
    pub view: View,
    /// Pulse start (TDC ticks).
    pub time_start: u64,
    /// Pulse duration (TPC ticks).
    pub samples_over_threshold: u32,
    /// Ticks from start to peak (TPC ticks).
    pub samples_to_peak: u32,
    /// Peak amplitude (ADC).
    pub adc_peak: u32,
    /// Integrated charge (ADC).
    pub adc_integral: u32,
    /// Truth energy deposition linked to the TP (MeV).
    #[serde(default)]
    pub simide_energy: f64,
    /// Embedded truth.
    #[serde(default)]
    pub truth: TruthInfo,
}

impl TriggerPrimitive {
    /// Creates a TP without truth information.
    #[must_use]
    pub fn new(
        event: u32,
        channel: u32,
        view: View,
        time_start: u64,
        samples_over_threshold: u32,
        adc_integral: u32,
    ) -> Self {
        Self {
            event,
            channel,
            detector_channel: channel,
            detector: 0,
            view,
            time_start,
            samples_over_threshold,
            samples_to_peak: samples_over_threshold / 2,
            adc_peak: 0,
            adc_integral,
            simide_energy: 0.0,
            truth: TruthInfo::default(),
        }
    }

    /// Sets the detector channel and the recorded detector index.
    #[must_use]
    pub fn with_detector_channel(mut self, detector_channel: u32, detector: u32) -> Self {
        self.detector_channel = detector_channel;
        self.detector = detector;
        self
    }

    /// Attaches truth information.
    #[must_use]
    pub fn with_truth(mut self, truth: TruthInfo) -> Self {
        self.truth = truth;
        self
    }

    /// Sets the generator name, keeping the rest of the truth record.
    #[must_use]
    pub fn with_generator(mut self, generator: &str) -> Self {
        generator.clone_into(&mut self.truth.generator_name);
        self
    }

    /// Pulse interval `[time_start, time_start + sot]` in TDC ticks.
    #[inline]
    #[must_use]
    pub fn time_range(&self, geometry: &DetectorGeometry) -> TimeRange {
        TimeRange::new(
            self.time_start,
            self.time_start + geometry.tpc_to_tdc(u64::from(self.samples_over_threshold)),
        )
    }

    /// APA this TP belongs to.
    #[inline]
    #[must_use]
    pub fn apa(&self, geometry: &DetectorGeometry) -> u32 {
        geometry.apa_of(self.detector_channel)
    }

    /// Checks the stored view against the channel layout.
    ///
    /// # Errors
    /// Returns [`Error::InvalidView`] if the two disagree.
    pub fn validate(&self, geometry: &DetectorGeometry) -> Result<()> {
        let derived = geometry.view_of(self.detector_channel);
        if derived == Some(self.view) {
            Ok(())
        } else {
            Err(Error::InvalidView {
                detector_channel: self.detector_channel,
                stored: self.view,
                derived,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_parsing() {
        assert_eq!("U".parse::<View>().unwrap(), View::U);
        assert_eq!("v".parse::<View>().unwrap(), View::V);
        assert_eq!("Z".parse::<View>().unwrap(), View::X);
        assert!("W".parse::<View>().is_err());
    }

    #[test]
    fn test_view_deserialize_accepts_same_names_as_parse() {
        for name in ["U", "u", "V", "v", "X", "x", "Z", "z"] {
            let json = format!("\"{name}\"");
            let from_serde: View = serde_json::from_str(&json).unwrap();
            assert_eq!(from_serde, name.parse::<View>().unwrap(), "view {name}");
        }
        assert!(serde_json::from_str::<View>("\"W\"").is_err());
        assert_eq!(serde_json::to_string(&View::X).unwrap(), "\"X\"");
    }

    #[test]
    fn test_truth_defaults_to_unknown() {
        let truth = TruthInfo::default();
        assert!(!truth.is_known());
        assert!(!truth.is_signal());
        assert!(!truth.has_neutrino());
    }

    #[test]
    fn test_signal_is_case_insensitive() {
        let tp = TriggerPrimitive::new(1, 1800, View::X, 0, 4, 100).with_generator("MARLEY");
        assert!(tp.truth.is_signal());
        assert!(tp.truth.is_known());
    }

    #[test]
    fn test_time_range_converts_duration_once() {
        let geometry = DetectorGeometry::default();
        let tp = TriggerPrimitive::new(1, 1800, View::X, 1000, 5, 100);
        let range = tp.time_range(&geometry);
        assert_eq!(range.start, 1000);
        assert_eq!(range.end, 1000 + 5 * 32);
    }

    #[test]
    fn test_validate_view() {
        let geometry = DetectorGeometry::default();
        assert!(TriggerPrimitive::new(0, 10, View::U, 0, 1, 1)
            .validate(&geometry)
            .is_ok());
        assert!(TriggerPrimitive::new(0, 900, View::V, 0, 1, 1)
            .validate(&geometry)
            .is_ok());
        let wrong = TriggerPrimitive::new(0, 1800, View::U, 0, 1, 1);
        assert!(matches!(
            wrong.validate(&geometry),
            Err(Error::InvalidView {
                derived: Some(View::X),
                ..
            })
        ));
    }

    #[test]
    fn test_deserialize_without_truth() {
        let json = r#"{"event":3,"channel":1801,"detector_channel":1801,"detector":0,
            "view":"X","time_start":500,"samples_over_threshold":4,"samples_to_peak":2,
            "adc_peak":20,"adc_integral":80}"#;
        let tp: TriggerPrimitive = serde_json::from_str(json).unwrap();
        assert_eq!(tp.truth.generator_name, UNKNOWN_GENERATOR);
        assert!(tp.simide_energy.abs() < f64::EPSILON);
    }
}
