//! Energy-ratio voice activity detection.
//!
//! Voice is reported when the RMS energy of the most recent analysis
//! segment exceeds a configured fraction of the whole window's energy,
//! after a first-order high-pass filter removes DC and rumble. The ratio
//! form self-normalizes to the current microphone gain, so no absolute
//! amplitude threshold needs tuning.

use crate::defaults;

/// Configuration for voice activity detection.
#[derive(Debug, Clone, Copy)]
pub struct VadConfig {
    /// Energy ratio above which the recent segment counts as speech.
    pub threshold: f32,
    /// Length of the most recent segment compared against the whole window (ms).
    pub analysis_ms: u32,
    /// High-pass cutoff frequency applied before analysis (Hz). Zero disables.
    pub freq_cutoff: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: defaults::VAD_THRESHOLD,
            analysis_ms: defaults::VAD_ANALYSIS_MS,
            freq_cutoff: defaults::VAD_FREQ_CUTOFF,
        }
    }
}

/// First-order high-pass filter, in place.
///
/// A no-op when `cutoff_hz` is zero or negative.
pub fn high_pass_filter(samples: &mut [f32], cutoff_hz: f32, sample_rate: u32) {
    if cutoff_hz <= 0.0 || samples.len() < 2 {
        return;
    }

    let rc = 1.0 / (2.0 * std::f32::consts::PI * cutoff_hz);
    let dt = 1.0 / sample_rate as f32;
    let alpha = rc / (rc + dt);

    let mut prev_input = samples[0];
    let mut prev_output = samples[0];
    for sample in samples.iter_mut().skip(1) {
        let input = *sample;
        let output = alpha * (prev_output + input - prev_input);
        prev_input = input;
        prev_output = output;
        *sample = output;
    }
}

/// Reports whether the tail of `pcm` looks like the onset of speech.
///
/// Returns false when the window holds no more than one analysis segment
/// of audio, so detection only starts once enough history has accumulated.
pub fn detect_voice(pcm: &[f32], sample_rate: u32, config: &VadConfig) -> bool {
    let n_tail = (sample_rate as usize * config.analysis_ms as usize) / 1000;
    if pcm.is_empty() || pcm.len() <= n_tail {
        return false;
    }

    let mut filtered = pcm.to_vec();
    high_pass_filter(&mut filtered, config.freq_cutoff, sample_rate);

    let energy_all = rms(&filtered);
    let energy_tail = rms(&filtered[filtered.len() - n_tail..]);

    if energy_all == 0.0 {
        return false;
    }

    energy_tail > config.threshold * energy_all
}

fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}
