//! Effects router: fixed master chain after the voice mix.
//!
//! ```text
//! mix ─┬─ distortion ─ chorus ─ delay(+feedback) ─ reverb ─ wet ─┬─ master ─ out
//!      └──────────────────────── bypass ─────────────────────────┘
//! ```
//!
//! Each stage blends its effect with a dry copy of its input by `mix`.
//! Bypass switches between the wet chain and the dry passthrough.

use crate::config::{ChorusConfig, DelayConfig, DistortionConfig, EffectsConfig, ReverbConfig};
use crate::host::{AudioHost, Connection, EffectKind, Endpoint, NodeId, ParamKind, ParamRef};

/// Resolution of the distortion transfer curve.
pub const CURVE_SAMPLES: usize = 1024;
/// Longest delay the delay line is built for, in seconds.
pub const MAX_DELAY_TIME: f64 = 2.0;

/// Soft-clip transfer curve over `[-1, 1]`. `drive` 0 is nearly linear;
/// larger values saturate harder. Output is normalized to `[-1, 1]`.
pub fn distortion_curve(drive: f64, samples: usize) -> Vec<f32> {
    let k = 1.0 + drive.max(0.0) * 50.0;
    let norm = k.tanh();
    let last = samples.saturating_sub(1).max(1) as f64;
    (0..samples)
        .map(|i| {
            let x = i as f64 * 2.0 / last - 1.0;
            ((k * x).tanh() / norm) as f32
        })
        .collect()
}

/// One effect with its dry/wet blend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Stage {
    input: NodeId,
    effect: NodeId,
    wet: NodeId,
    dry: NodeId,
    output: NodeId,
}

/// Connect `from` to `to` and remember the edge.
fn link<H: AudioHost>(host: &mut H, wiring: &mut Vec<Connection>, from: NodeId, to: NodeId) {
    let edge = Connection::to_node(from, to);
    edge.apply(host);
    wiring.push(edge);
}

impl Stage {
    fn build<H: AudioHost>(host: &mut H, kind: EffectKind, wiring: &mut Vec<Connection>) -> Self {
        let stage = Stage {
            input: host.create_gain(),
            effect: host.create_effect(kind),
            wet: host.create_gain(),
            dry: host.create_gain(),
            output: host.create_gain(),
        };
        link(host, wiring, stage.input, stage.effect);
        link(host, wiring, stage.effect, stage.wet);
        link(host, wiring, stage.wet, stage.output);
        link(host, wiring, stage.input, stage.dry);
        link(host, wiring, stage.dry, stage.output);
        stage
    }

    fn set_mix<H: AudioHost>(&self, host: &mut H, mix: f64) {
        let now = host.current_time();
        let mix = mix.clamp(0.0, 1.0);
        host.set_value_at(ParamRef::gain(self.wet), mix, now);
        host.set_value_at(ParamRef::gain(self.dry), 1.0 - mix, now);
    }
}

#[derive(Debug)]
pub struct EffectsRouter {
    input: NodeId,
    distortion: Stage,
    chorus: Stage,
    delay: Stage,
    feedback: NodeId,
    reverb: Stage,
    wet_bus: NodeId,
    bypass: NodeId,
    master: NodeId,
    /// Every edge the router made, undone on teardown.
    wiring: Vec<Connection>,
    config: EffectsConfig,
}

impl EffectsRouter {
    /// Build the chain and apply `config`. Voices connect to `input()`.
    pub fn build<H: AudioHost>(host: &mut H, config: &EffectsConfig) -> Self {
        let mut wiring = Vec::new();
        let input = host.create_gain();
        let distortion = Stage::build(host, EffectKind::WaveShaper, &mut wiring);
        let chorus = Stage::build(host, EffectKind::Chorus, &mut wiring);
        let delay = Stage::build(
            host,
            EffectKind::Delay {
                max_time: MAX_DELAY_TIME,
            },
            &mut wiring,
        );
        let feedback = host.create_gain();
        let reverb = Stage::build(
            host,
            EffectKind::Convolver {
                duration: config.reverb.duration,
                decay: config.reverb.decay,
            },
            &mut wiring,
        );
        let wet_bus = host.create_gain();
        let bypass = host.create_gain();
        let master = host.create_gain();
        let destination = host.destination();

        let w = &mut wiring;
        link(host, w, input, distortion.input);
        link(host, w, distortion.output, chorus.input);
        link(host, w, chorus.output, delay.input);
        link(host, w, delay.effect, feedback);
        link(host, w, feedback, delay.effect);
        link(host, w, delay.output, reverb.input);
        link(host, w, reverb.output, wet_bus);
        link(host, w, wet_bus, master);
        link(host, w, input, bypass);
        link(host, w, bypass, master);
        link(host, w, master, destination);

        let mut router = EffectsRouter {
            input,
            distortion,
            chorus,
            delay,
            feedback,
            reverb,
            wet_bus,
            bypass,
            master,
            wiring,
            config: *config,
        };
        router.apply(host, config);
        log::debug!("effects chain built (bypass: {})", config.bypass);
        router
    }

    /// The single injection point for the voice mix.
    pub fn input(&self) -> NodeId {
        self.input
    }

    pub fn config(&self) -> &EffectsConfig {
        &self.config
    }

    pub fn is_bypassed(&self) -> bool {
        self.config.bypass
    }

    /// Apply every parameter in `config`.
    pub fn apply<H: AudioHost>(&mut self, host: &mut H, config: &EffectsConfig) {
        self.set_distortion(host, config.distortion);
        self.set_chorus(host, config.chorus);
        self.set_delay(host, config.delay);
        self.set_reverb(host, config.reverb);
        self.set_master_gain(host, config.master_gain);
        self.set_bypass(host, config.bypass);
    }

    /// Route through the dry passthrough (`true`) or the wet chain.
    pub fn set_bypass<H: AudioHost>(&mut self, host: &mut H, bypass: bool) {
        let now = host.current_time();
        let (wet, dry) = if bypass { (0.0, 1.0) } else { (1.0, 0.0) };
        host.set_value_at(ParamRef::gain(self.wet_bus), wet, now);
        host.set_value_at(ParamRef::gain(self.bypass), dry, now);
        self.config.bypass = bypass;
    }

    pub fn set_master_gain<H: AudioHost>(&mut self, host: &mut H, gain: f64) {
        let gain = gain.max(0.0);
        let now = host.current_time();
        host.set_value_at(ParamRef::gain(self.master), gain, now);
        self.config.master_gain = gain;
    }

    pub fn set_distortion<H: AudioHost>(&mut self, host: &mut H, config: DistortionConfig) {
        host.set_shaper_curve(
            self.distortion.effect,
            &distortion_curve(config.drive, CURVE_SAMPLES),
        );
        self.distortion.set_mix(host, config.mix);
        self.config.distortion = config;
    }

    pub fn set_chorus<H: AudioHost>(&mut self, host: &mut H, config: ChorusConfig) {
        let now = host.current_time();
        let node = self.chorus.effect;
        host.set_value_at(ParamRef::new(node, ParamKind::Rate), config.rate, now);
        host.set_value_at(ParamRef::new(node, ParamKind::Depth), config.depth, now);
        self.chorus.set_mix(host, config.mix);
        self.config.chorus = config;
    }

    pub fn set_delay<H: AudioHost>(&mut self, host: &mut H, config: DelayConfig) {
        let now = host.current_time();
        let time = config.time.clamp(0.0, MAX_DELAY_TIME);
        // Feedback at or above unity never decays.
        let feedback = config.feedback.clamp(0.0, 0.95);
        host.set_value_at(
            ParamRef::new(self.delay.effect, ParamKind::DelayTime),
            time,
            now,
        );
        host.set_value_at(ParamRef::gain(self.feedback), feedback, now);
        self.delay.set_mix(host, config.mix);
        self.config.delay = DelayConfig {
            time,
            feedback,
            mix: config.mix,
        };
    }

    /// Reverb impulse shape is fixed per convolver, so a new duration or decay
    /// swaps in a fresh convolver node.
    pub fn set_reverb<H: AudioHost>(&mut self, host: &mut H, config: ReverbConfig) {
        let current = self.config.reverb;
        if config.duration != current.duration || config.decay != current.decay {
            let old = self.reverb.effect;
            self.wiring.retain(|edge| {
                let touches = edge.from == old || edge.to == Endpoint::Node(old);
                if touches {
                    edge.undo(host);
                }
                !touches
            });
            let fresh = host.create_effect(EffectKind::Convolver {
                duration: config.duration,
                decay: config.decay,
            });
            link(host, &mut self.wiring, self.reverb.input, fresh);
            link(host, &mut self.wiring, fresh, self.reverb.wet);
            self.reverb.effect = fresh;
        }
        self.reverb.set_mix(host, config.mix);
        self.config.reverb = config;
    }

    /// Undo every connection the router made, including the link to the
    /// destination.
    pub fn teardown<H: AudioHost>(&mut self, host: &mut H) {
        for edge in self.wiring.drain(..) {
            edge.undo(host);
        }
        log::debug!("effects chain torn down");
    }
}
