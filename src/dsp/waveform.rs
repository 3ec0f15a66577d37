//! Waveform algorithms and the node wiring each one needs.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::config::ModulationConfig;
use crate::host::{AudioHost, Connection, GeneratorShape, NodeId, ParamRef, TableId};

/// Harmonics in the precomputed pulse table.
pub const PULSE_HARMONICS: usize = 64;

/// The waveform a note is played with, as chosen by the user and stored in
/// sequence files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaveformKind {
    #[default]
    Sine,
    Square,
    #[serde(alias = "saw")]
    Sawtooth,
    Triangle,
    Pwm,
    Fm,
    Am,
    Ring,
}

impl WaveformKind {
    pub const ALL: [WaveformKind; 8] = [
        WaveformKind::Sine,
        WaveformKind::Square,
        WaveformKind::Sawtooth,
        WaveformKind::Triangle,
        WaveformKind::Pwm,
        WaveformKind::Fm,
        WaveformKind::Am,
        WaveformKind::Ring,
    ];

    pub fn name(self) -> &'static str {
        match self {
            WaveformKind::Sine => "sine",
            WaveformKind::Square => "square",
            WaveformKind::Sawtooth => "sawtooth",
            WaveformKind::Triangle => "triangle",
            WaveformKind::Pwm => "pwm",
            WaveformKind::Fm => "fm",
            WaveformKind::Am => "am",
            WaveformKind::Ring => "ring",
        }
    }

    /// Parse a waveform name; "saw" is accepted for sawtooth.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sine" => Some(WaveformKind::Sine),
            "square" => Some(WaveformKind::Square),
            "sawtooth" | "saw" => Some(WaveformKind::Sawtooth),
            "triangle" => Some(WaveformKind::Triangle),
            "pwm" => Some(WaveformKind::Pwm),
            "fm" => Some(WaveformKind::Fm),
            "am" => Some(WaveformKind::Am),
            "ring" => Some(WaveformKind::Ring),
            _ => None,
        }
    }

    pub fn algorithm(self) -> WaveformAlgorithm {
        match self {
            WaveformKind::Sine => WaveformAlgorithm::Simple(BasicShape::Sine),
            WaveformKind::Square => WaveformAlgorithm::Simple(BasicShape::Square),
            WaveformKind::Sawtooth => WaveformAlgorithm::Simple(BasicShape::Sawtooth),
            WaveformKind::Triangle => WaveformAlgorithm::Simple(BasicShape::Triangle),
            WaveformKind::Pwm => WaveformAlgorithm::Pwm,
            WaveformKind::Fm => WaveformAlgorithm::Fm,
            WaveformKind::Am => WaveformAlgorithm::Am,
            WaveformKind::Ring => WaveformAlgorithm::Ring,
        }
    }
}

/// Host-native oscillator shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BasicShape {
    Sine,
    Square,
    Sawtooth,
    Triangle,
}

impl From<BasicShape> for GeneratorShape {
    fn from(s: BasicShape) -> Self {
        match s {
            BasicShape::Sine => GeneratorShape::Sine,
            BasicShape::Square => GeneratorShape::Square,
            BasicShape::Sawtooth => GeneratorShape::Sawtooth,
            BasicShape::Triangle => GeneratorShape::Triangle,
        }
    }
}

/// How a voice's nodes are wired for one waveform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveformAlgorithm {
    /// carrier → amp
    Simple(BasicShape),
    /// pulse-table carrier → amp
    Pwm,
    /// modulator → depth → carrier.frequency; carrier → amp
    Fm,
    /// modulator → depth → shaper.gain (offset 1 - depth/2); carrier → shaper → amp
    Am,
    /// modulator → shaper.gain (offset 0); carrier → shaper → amp
    Ring,
}

/// The fixed set of host nodes owned by one voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceNodes {
    pub carrier: NodeId,
    pub modulator: NodeId,
    /// Scales the modulator before it reaches its target.
    pub depth: NodeId,
    /// Multiplier in the carrier path (AM / ring).
    pub shaper: NodeId,
    /// Envelope gain; permanently connected to the voice mix.
    pub amp: NodeId,
}

/// Periodic tables computed once when the pool is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaveTables {
    pub pulse: TableId,
}

impl WaveTables {
    pub fn build<H: AudioHost>(host: &mut H, duty: f64) -> Self {
        let (real, imag) = pulse_coefficients(duty, PULSE_HARMONICS);
        WaveTables {
            pulse: host.create_periodic_table(&real, &imag),
        }
    }
}

/// Fourier coefficients of a pulse wave with the given duty cycle.
/// Index 0 (DC) is left at zero.
pub fn pulse_coefficients(duty: f64, harmonics: usize) -> (Vec<f32>, Vec<f32>) {
    let duty = duty.clamp(0.01, 0.99);
    let mut real = vec![0.0_f32; harmonics + 1];
    let imag = vec![0.0_f32; harmonics + 1];
    for (n, r) in real.iter_mut().enumerate().skip(1) {
        let n = n as f64;
        *r = (2.0 / (n * PI) * (n * PI * duty).sin()) as f32;
    }
    (real, imag)
}

impl WaveformAlgorithm {
    /// Wire `nodes` for this algorithm at `frequency` and return the
    /// connections made. The amp → mix edge is not included; it never
    /// changes.
    pub fn wire<H: AudioHost>(
        &self,
        host: &mut H,
        nodes: &VoiceNodes,
        frequency: f64,
        tables: &WaveTables,
        modulation: &ModulationConfig,
        now: f64,
    ) -> Vec<Connection> {
        let carrier_freq = ParamRef::frequency(nodes.carrier);
        host.cancel_scheduled(carrier_freq, now);
        host.set_value_at(carrier_freq, frequency, now);

        let connections = match *self {
            WaveformAlgorithm::Simple(shape) => {
                host.set_generator_shape(nodes.carrier, shape.into());
                vec![Connection::to_node(nodes.carrier, nodes.amp)]
            }
            WaveformAlgorithm::Pwm => {
                host.set_generator_shape(nodes.carrier, GeneratorShape::Table(tables.pulse));
                vec![Connection::to_node(nodes.carrier, nodes.amp)]
            }
            WaveformAlgorithm::Fm => {
                host.set_generator_shape(nodes.carrier, GeneratorShape::Sine);
                set_modulator(host, nodes, frequency * modulation.fm_ratio, now);
                set_gain(host, nodes.depth, frequency * modulation.fm_index, now);
                vec![
                    Connection::to_node(nodes.modulator, nodes.depth),
                    Connection::to_param(nodes.depth, carrier_freq),
                    Connection::to_node(nodes.carrier, nodes.amp),
                ]
            }
            WaveformAlgorithm::Am => {
                let depth = modulation.am_depth.clamp(0.0, 1.0);
                host.set_generator_shape(nodes.carrier, GeneratorShape::Sine);
                set_modulator(host, nodes, frequency * modulation.am_ratio, now);
                set_gain(host, nodes.depth, depth / 2.0, now);
                set_gain(host, nodes.shaper, 1.0 - depth / 2.0, now);
                vec![
                    Connection::to_node(nodes.modulator, nodes.depth),
                    Connection::to_param(nodes.depth, ParamRef::gain(nodes.shaper)),
                    Connection::to_node(nodes.carrier, nodes.shaper),
                    Connection::to_node(nodes.shaper, nodes.amp),
                ]
            }
            WaveformAlgorithm::Ring => {
                host.set_generator_shape(nodes.carrier, GeneratorShape::Sine);
                set_modulator(host, nodes, frequency * modulation.ring_ratio, now);
                set_gain(host, nodes.shaper, 0.0, now);
                vec![
                    Connection::to_param(nodes.modulator, ParamRef::gain(nodes.shaper)),
                    Connection::to_node(nodes.carrier, nodes.shaper),
                    Connection::to_node(nodes.shaper, nodes.amp),
                ]
            }
        };

        for c in &connections {
            c.apply(host);
        }
        connections
    }
}

fn set_modulator<H: AudioHost>(host: &mut H, nodes: &VoiceNodes, frequency: f64, now: f64) {
    let p = ParamRef::frequency(nodes.modulator);
    host.cancel_scheduled(p, now);
    host.set_value_at(p, frequency, now);
}

fn set_gain<H: AudioHost>(host: &mut H, node: NodeId, value: f64, now: f64) {
    let p = ParamRef::gain(node);
    host.cancel_scheduled(p, now);
    host.set_value_at(p, value, now);
}
