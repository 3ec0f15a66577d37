//! Synth configuration: envelope timing, pool sizing, unison, modulation and
//! effect parameters. Loadable from JSON; every field has a default.

use serde::{Deserialize, Serialize};

use crate::dsp::waveform::WaveformKind;
use crate::error::SynthError;

pub const MAX_POOL_SIZE: usize = 16;
pub const MAX_OCTAVE_SHIFT: i32 = 3;

/// Top-level synth configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SynthConfig {
    /// Voices preallocated per key.
    pub pool_size: usize,
    /// Attack ramp length in seconds.
    pub attack_time: f64,
    /// Release ramp length in seconds.
    pub release_time: f64,
    /// Extra wait after a release ramp before the voice is freed.
    pub cleanup_margin: f64,
    /// Release ramps end here instead of at zero.
    pub release_floor: f64,
    /// Recorded notes shorter than this are discarded.
    pub min_note_duration: f64,
    /// Silence appended after the release tail before the loop restarts.
    pub loop_guard: f64,
    /// Voices stacked per note.
    pub unison_voices: usize,
    /// Total detune spread in cents.
    pub detune_cents: f64,
    /// Note volume [0, 1].
    pub volume: f64,
    pub octave_shift: i32,
    pub waveform: WaveformKind,
    pub modulation: ModulationConfig,
    pub effects: EffectsConfig,
}

impl Default for SynthConfig {
    fn default() -> Self {
        SynthConfig {
            pool_size: 6,
            attack_time: 0.01,
            release_time: 0.2,
            cleanup_margin: 0.075,
            release_floor: 0.0001,
            min_note_duration: 0.02,
            loop_guard: 0.1,
            unison_voices: 1,
            detune_cents: 0.0,
            volume: 0.8,
            octave_shift: 0,
            waveform: WaveformKind::Sine,
            modulation: ModulationConfig::default(),
            effects: EffectsConfig::default(),
        }
    }
}

impl SynthConfig {
    /// Parse a JSON config. Missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self, SynthError> {
        let config: SynthConfig =
            serde_json::from_str(text).map_err(|e| SynthError::Config(e.to_string()))?;
        Ok(config.validated())
    }

    /// Clamp every field into its usable range.
    pub fn validated(mut self) -> Self {
        self.pool_size = self.pool_size.clamp(1, MAX_POOL_SIZE);
        self.unison_voices = self.unison_voices.clamp(1, self.pool_size);
        self.volume = clamp_unit(self.volume);
        self.octave_shift = self.octave_shift.clamp(-MAX_OCTAVE_SHIFT, MAX_OCTAVE_SHIFT);
        self.attack_time = non_negative(self.attack_time);
        self.release_time = non_negative(self.release_time);
        self.cleanup_margin = non_negative(self.cleanup_margin);
        self.min_note_duration = non_negative(self.min_note_duration);
        self.loop_guard = non_negative(self.loop_guard);
        if !(self.release_floor > 0.0 && self.release_floor < 0.01) {
            self.release_floor = 0.0001;
        }
        if !self.detune_cents.is_finite() {
            self.detune_cents = 0.0;
        }
        self.effects = self.effects.validated();
        self
    }
}

/// Modulator settings for the FM, AM, ring and PWM algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ModulationConfig {
    /// Modulator frequency as a multiple of the carrier (FM).
    pub fm_ratio: f64,
    /// Peak frequency deviation as a multiple of the carrier (FM).
    pub fm_index: f64,
    pub am_ratio: f64,
    /// Share of the carrier amplitude swept by the modulator [0, 1] (AM).
    pub am_depth: f64,
    pub ring_ratio: f64,
    /// Pulse width of the PWM table (0, 1).
    pub pulse_duty: f64,
}

impl Default for ModulationConfig {
    fn default() -> Self {
        ModulationConfig {
            fm_ratio: 2.0,
            fm_index: 1.5,
            am_ratio: 0.5,
            am_depth: 0.5,
            ring_ratio: 1.5,
            pulse_duty: 0.25,
        }
    }
}

/// Effect chain settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EffectsConfig {
    /// Route the voice mix straight to the output, skipping the chain.
    pub bypass: bool,
    pub master_gain: f64,
    pub distortion: DistortionConfig,
    pub chorus: ChorusConfig,
    pub delay: DelayConfig,
    pub reverb: ReverbConfig,
}

impl Default for EffectsConfig {
    fn default() -> Self {
        EffectsConfig {
            bypass: true,
            master_gain: 0.8,
            distortion: DistortionConfig::default(),
            chorus: ChorusConfig::default(),
            delay: DelayConfig::default(),
            reverb: ReverbConfig::default(),
        }
    }
}

impl EffectsConfig {
    /// Clamp every effect parameter into its usable range.
    pub(crate) fn validated(mut self) -> Self {
        self.master_gain = clamp_unit(self.master_gain);
        self.distortion.drive = non_negative(self.distortion.drive);
        self.distortion.mix = clamp_unit(self.distortion.mix);
        self.chorus.rate = non_negative(self.chorus.rate);
        self.chorus.depth = non_negative(self.chorus.depth);
        self.chorus.mix = clamp_unit(self.chorus.mix);
        self.delay.time = clamp_range(self.delay.time, 0.0, 2.0);
        self.delay.feedback = clamp_range(self.delay.feedback, 0.0, 0.95);
        self.delay.mix = clamp_unit(self.delay.mix);
        self.reverb.duration = clamp_range(self.reverb.duration, 0.1, 10.0);
        self.reverb.decay = non_negative(self.reverb.decay);
        self.reverb.mix = clamp_unit(self.reverb.mix);
        self
    }
}

/// Waveshaper distortion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DistortionConfig {
    /// Curve steepness; 0 is a straight line.
    pub drive: f64,
    pub mix: f64,
}

impl Default for DistortionConfig {
    fn default() -> Self {
        DistortionConfig { drive: 0.0, mix: 0.0 }
    }
}

/// Chorus / flanger modulation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChorusConfig {
    /// LFO rate in Hz.
    pub rate: f64,
    /// Modulation depth in seconds.
    pub depth: f64,
    pub mix: f64,
}

impl Default for ChorusConfig {
    fn default() -> Self {
        ChorusConfig {
            rate: 1.5,
            depth: 0.002,
            mix: 0.0,
        }
    }
}

/// Feedback delay.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DelayConfig {
    /// Delay time in seconds.
    pub time: f64,
    pub feedback: f64,
    pub mix: f64,
}

impl Default for DelayConfig {
    fn default() -> Self {
        DelayConfig {
            time: 0.25,
            feedback: 0.3,
            mix: 0.0,
        }
    }
}

/// Convolution reverb. The host builds the impulse response.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReverbConfig {
    /// Impulse response length in seconds.
    pub duration: f64,
    /// Exponential decay of the impulse response.
    pub decay: f64,
    pub mix: f64,
}

impl Default for ReverbConfig {
    fn default() -> Self {
        ReverbConfig {
            duration: 2.0,
            decay: 2.0,
            mix: 0.0,
        }
    }
}

fn clamp_unit(v: f64) -> f64 {
    if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 }
}

fn clamp_range(v: f64, lo: f64, hi: f64) -> f64 {
    if v.is_finite() { v.clamp(lo, hi) } else { lo }
}

fn non_negative(v: f64) -> f64 {
    if v.is_finite() { v.max(0.0) } else { 0.0 }
}
