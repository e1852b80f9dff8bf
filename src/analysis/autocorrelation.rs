// AutocorrelationAlgorithm - periodicity of the onset-strength envelope
//
// Correlates the onset-strength function with itself over the lag range
// implied by the BPM bounds and reports the strongest periodic lag.

use super::dsp;
use super::{AlgorithmKind, AudioWindow, BpmReading, CancelFlag, DetectionContext, TempoAlgorithm};
use crate::config::AutocorrelationConfig;

pub struct AutocorrelationAlgorithm {
    config: AutocorrelationConfig,
}

impl AutocorrelationAlgorithm {
    pub fn new(config: AutocorrelationConfig) -> Self {
        Self { config }
    }

    fn envelope_rate(&self, sample_rate: u32) -> f32 {
        sample_rate as f32 / self.config.hop_size as f32
    }

    /// Estimate tempo from the autocorrelation of the onset envelope
    ///
    /// Confidence is the prominence of the winning lag over the strongest
    /// non-harmonic competitor, so a single clean periodicity scores high
    /// while competing periodicities pull it down.
    fn estimate(
        &self,
        window: &AudioWindow,
        context: &DetectionContext,
        cancel: Option<&CancelFlag>,
    ) -> Option<BpmReading> {
        if window.rms() < self.config.silence_rms {
            return None;
        }

        let energy = dsp::frame_energy(
            window.samples(),
            self.config.frame_size,
            self.config.hop_size,
        );
        let odf = dsp::half_wave_diff(&energy);
        if cancel.map_or(false, CancelFlag::is_cancelled) {
            return None;
        }

        let peak = dsp::find_periodicity(&odf, self.envelope_rate(window.sample_rate()), context)?;
        if peak.strength < self.config.min_peak_strength {
            tracing::trace!(
                "[Autocorrelation] Peak strength {:.3} below {:.3}, abstaining",
                peak.strength,
                self.config.min_peak_strength
            );
            return None;
        }

        Some(BpmReading::new(
            AlgorithmKind::Autocorrelation,
            peak.bpm,
            peak.prominence,
            window.start_time_secs(),
        ))
    }
}

impl TempoAlgorithm for AutocorrelationAlgorithm {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::Autocorrelation
    }

    fn evaluate(&self, window: &AudioWindow, context: &DetectionContext) -> Option<BpmReading> {
        self.estimate(window, context, None)
    }

    fn evaluate_with_cancel(
        &self,
        window: &AudioWindow,
        context: &DetectionContext,
        cancel: &CancelFlag,
    ) -> Option<BpmReading> {
        if cancel.is_cancelled() {
            return None;
        }
        self.estimate(window, context, Some(cancel))
    }
}
