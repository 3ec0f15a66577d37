//! Browser bindings: a JavaScript-implemented `AudioHost` and the exported
//! `WebSynth` class.
//!
//! The JS side wraps an `AudioContext` and hands out numeric node ids.
//! Deferred work runs on the context's clock: the page calls `WebSynth.tick()`
//! once `currentTime` reaches `nextDue()`, re-arming its timer after every
//! call into the synth.

use std::fmt::Display;

use wasm_bindgen::prelude::*;

use crate::config::{EffectsConfig, SynthConfig};
use crate::dsp::waveform::WaveformKind;
use crate::error::SynthError;
use crate::host::{
    AudioHost, EffectKind, Endpoint, GeneratorShape, HostState, NodeId, ParamRef, ResumeRequest,
    TableId,
};
use crate::input::{KeyInput, PointerInput, PointerPhase, TouchPhase, TouchPoint};
use crate::lifecycle::{EngineStatus, Readiness};
use crate::sequence::NoteEvent;
use crate::synth::Synth;

#[wasm_bindgen]
extern "C" {
    /// Host object implemented in JavaScript on top of an `AudioContext`.
    pub type JsAudioHost;

    #[wasm_bindgen(method, js_name = isSupported)]
    fn is_supported(this: &JsAudioHost) -> bool;
    /// `"running"`, `"suspended"` or `"closed"`.
    #[wasm_bindgen(method)]
    fn state(this: &JsAudioHost) -> String;
    /// `"pending"`, `"ok"`, or an error message.
    #[wasm_bindgen(method, js_name = requestResume)]
    fn request_resume(this: &JsAudioHost) -> String;
    #[wasm_bindgen(method, js_name = currentTime)]
    fn current_time(this: &JsAudioHost) -> f64;
    #[wasm_bindgen(method)]
    fn destination(this: &JsAudioHost) -> u32;

    #[wasm_bindgen(method, js_name = createGenerator)]
    fn create_generator(this: &JsAudioHost, shape: &str, table: Option<u32>) -> u32;
    #[wasm_bindgen(method, js_name = createPeriodicTable)]
    fn create_periodic_table(this: &JsAudioHost, real: &[f32], imag: &[f32]) -> u32;
    #[wasm_bindgen(method, js_name = setGeneratorShape)]
    fn set_generator_shape(this: &JsAudioHost, node: u32, shape: &str, table: Option<u32>);
    #[wasm_bindgen(method, js_name = createGain)]
    fn create_gain(this: &JsAudioHost) -> u32;
    /// `kind` is `"waveshaper"`, `"chorus"`, `"delay"` or `"convolver"`; the
    /// two numbers are the delay's max time or the reverb duration and decay.
    #[wasm_bindgen(method, js_name = createEffect)]
    fn create_effect(this: &JsAudioHost, kind: &str, a: f64, b: f64) -> u32;
    #[wasm_bindgen(method, js_name = setShaperCurve)]
    fn set_shaper_curve(this: &JsAudioHost, node: u32, curve: &[f32]);

    #[wasm_bindgen(method)]
    fn connect(this: &JsAudioHost, from: u32, to: u32, param: Option<String>);
    #[wasm_bindgen(method)]
    fn disconnect(this: &JsAudioHost, from: u32, to: u32, param: Option<String>);
    #[wasm_bindgen(method)]
    fn start(this: &JsAudioHost, node: u32, at: f64);
    #[wasm_bindgen(method)]
    fn stop(this: &JsAudioHost, node: u32, at: f64);

    #[wasm_bindgen(method, js_name = paramValue)]
    fn param_value(this: &JsAudioHost, node: u32, param: &str) -> f64;
    #[wasm_bindgen(method, js_name = setValueAt)]
    fn set_value_at(this: &JsAudioHost, node: u32, param: &str, value: f64, at: f64);
    #[wasm_bindgen(method, js_name = rampLinear)]
    fn ramp_linear(this: &JsAudioHost, node: u32, param: &str, value: f64, end: f64);
    #[wasm_bindgen(method, js_name = cancelScheduled)]
    fn cancel_scheduled(this: &JsAudioHost, node: u32, param: &str, from: f64);
}

fn shape_parts(shape: GeneratorShape) -> (&'static str, Option<u32>) {
    match shape {
        GeneratorShape::Sine => ("sine", None),
        GeneratorShape::Square => ("square", None),
        GeneratorShape::Sawtooth => ("sawtooth", None),
        GeneratorShape::Triangle => ("triangle", None),
        GeneratorShape::Table(TableId(id)) => ("custom", Some(id)),
    }
}

fn endpoint_parts(to: Endpoint) -> (u32, Option<String>) {
    match to {
        Endpoint::Node(NodeId(id)) => (id, None),
        Endpoint::Param(p) => (p.node.0, Some(p.kind.name().to_string())),
    }
}

fn host_state(state: &str) -> HostState {
    match state {
        "running" => HostState::Running,
        "closed" => HostState::Closed,
        _ => HostState::Suspended,
    }
}

fn resume_outcome(answer: &str) -> ResumeRequest {
    match answer {
        "pending" => ResumeRequest::Pending,
        "ok" => ResumeRequest::Completed(Ok(())),
        message => ResumeRequest::Completed(Err(message.to_string())),
    }
}

impl AudioHost for JsAudioHost {
    fn is_supported(&self) -> bool {
        JsAudioHost::is_supported(self)
    }

    fn state(&self) -> HostState {
        host_state(&JsAudioHost::state(self))
    }

    fn request_resume(&mut self) -> ResumeRequest {
        resume_outcome(&JsAudioHost::request_resume(self))
    }

    fn current_time(&self) -> f64 {
        JsAudioHost::current_time(self)
    }

    fn destination(&self) -> NodeId {
        NodeId(JsAudioHost::destination(self))
    }

    fn create_generator(&mut self, shape: GeneratorShape) -> NodeId {
        let (name, table) = shape_parts(shape);
        NodeId(JsAudioHost::create_generator(self, name, table))
    }

    fn create_periodic_table(&mut self, real: &[f32], imag: &[f32]) -> TableId {
        TableId(JsAudioHost::create_periodic_table(self, real, imag))
    }

    fn set_generator_shape(&mut self, node: NodeId, shape: GeneratorShape) {
        let (name, table) = shape_parts(shape);
        JsAudioHost::set_generator_shape(self, node.0, name, table);
    }

    fn create_gain(&mut self) -> NodeId {
        NodeId(JsAudioHost::create_gain(self))
    }

    fn create_effect(&mut self, kind: EffectKind) -> NodeId {
        let id = match kind {
            EffectKind::WaveShaper => JsAudioHost::create_effect(self, "waveshaper", 0.0, 0.0),
            EffectKind::Chorus => JsAudioHost::create_effect(self, "chorus", 0.0, 0.0),
            EffectKind::Delay { max_time } => {
                JsAudioHost::create_effect(self, "delay", max_time, 0.0)
            }
            EffectKind::Convolver { duration, decay } => {
                JsAudioHost::create_effect(self, "convolver", duration, decay)
            }
        };
        NodeId(id)
    }

    fn set_shaper_curve(&mut self, node: NodeId, curve: &[f32]) {
        JsAudioHost::set_shaper_curve(self, node.0, curve);
    }

    fn connect(&mut self, from: NodeId, to: Endpoint) {
        let (to, param) = endpoint_parts(to);
        JsAudioHost::connect(self, from.0, to, param);
    }

    fn disconnect(&mut self, from: NodeId, to: Endpoint) {
        let (to, param) = endpoint_parts(to);
        JsAudioHost::disconnect(self, from.0, to, param);
    }

    fn start(&mut self, node: NodeId, at: f64) {
        JsAudioHost::start(self, node.0, at);
    }

    fn stop(&mut self, node: NodeId, at: f64) {
        JsAudioHost::stop(self, node.0, at);
    }

    fn param_value(&self, param: ParamRef) -> f64 {
        JsAudioHost::param_value(self, param.node.0, param.kind.name())
    }

    fn set_value_at(&mut self, param: ParamRef, value: f64, at: f64) {
        JsAudioHost::set_value_at(self, param.node.0, param.kind.name(), value, at);
    }

    fn ramp_linear(&mut self, param: ParamRef, value: f64, end: f64) {
        JsAudioHost::ramp_linear(self, param.node.0, param.kind.name(), value, end);
    }

    fn cancel_scheduled(&mut self, param: ParamRef, from: f64) {
        JsAudioHost::cancel_scheduled(self, param.node.0, param.kind.name(), from);
    }
}

fn js_error(e: impl Display) -> JsValue {
    JsValue::from_str(&e.to_string())
}

fn pointer_phase(phase: &str) -> Option<PointerPhase> {
    match phase {
        "down" => Some(PointerPhase::Down),
        "move" => Some(PointerPhase::Move),
        "up" => Some(PointerPhase::Up),
        "cancel" => Some(PointerPhase::Cancel),
        _ => None,
    }
}

fn touch_phase(phase: &str) -> Option<TouchPhase> {
    match phase {
        "start" => Some(TouchPhase::Start),
        "move" => Some(TouchPhase::Move),
        "end" => Some(TouchPhase::End),
        "cancel" => Some(TouchPhase::Cancel),
        _ => None,
    }
}

fn status_kind(status: &EngineStatus) -> &'static str {
    match status {
        EngineStatus::Ready => "ready",
        EngineStatus::Suspended => "suspended",
        EngineStatus::NotInitialized => "not-initialized",
        EngineStatus::Error(_) => "error",
    }
}

/// The synth, as seen from JavaScript.
#[wasm_bindgen]
pub struct WebSynth {
    inner: Synth<JsAudioHost>,
}

#[wasm_bindgen]
impl WebSynth {
    /// `config` may be `undefined` for the defaults.
    #[wasm_bindgen(constructor)]
    pub fn new(host: JsAudioHost, config: JsValue) -> Result<WebSynth, JsValue> {
        let config = if config.is_undefined() || config.is_null() {
            SynthConfig::default()
        } else {
            serde_wasm_bindgen::from_value(config).map_err(js_error)?
        };
        Ok(WebSynth {
            inner: Synth::new(host, config),
        })
    }

    /// True when ready now, false when a resume is pending.
    #[wasm_bindgen(js_name = ensureReady)]
    pub fn ensure_ready(&mut self) -> Result<bool, JsValue> {
        self.inner
            .ensure_ready()
            .map(|r| r == Readiness::Ready)
            .map_err(js_error)
    }

    /// Report the outcome of a pending resume; `error` is `undefined` on
    /// success.
    #[wasm_bindgen(js_name = resumeCompleted)]
    pub fn resume_completed(&mut self, error: Option<String>) -> Result<(), JsValue> {
        let result = match error {
            None => Ok(()),
            Some(message) => Err(message),
        };
        self.inner.resume_completed(result).map_err(js_error)
    }

    #[wasm_bindgen(js_name = hostSuspended)]
    pub fn host_suspended(&mut self) {
        self.inner.host_suspended();
    }

    /// Status banner text.
    pub fn status(&self) -> String {
        self.inner.status().message().to_string()
    }

    /// `"ready"`, `"suspended"`, `"not-initialized"` or `"error"`.
    #[wasm_bindgen(js_name = statusKind)]
    pub fn status_kind(&self) -> String {
        status_kind(&self.inner.status()).to_string()
    }

    /// Run every task due at the host's current time.
    pub fn tick(&mut self) {
        self.inner.tick();
    }

    /// Audio time the next task is due, or `undefined` when none is pending.
    #[wasm_bindgen(js_name = nextDue)]
    pub fn next_due(&self) -> Option<f64> {
        self.inner.next_due()
    }

    #[wasm_bindgen(js_name = keyDown)]
    pub fn key_down(&mut self, event: JsValue) -> Result<(), JsValue> {
        let input: KeyInput = serde_wasm_bindgen::from_value(event).map_err(js_error)?;
        self.inner.key_down(&input);
        Ok(())
    }

    #[wasm_bindgen(js_name = keyUp)]
    pub fn key_up(&mut self, event: JsValue) -> Result<(), JsValue> {
        let input: KeyInput = serde_wasm_bindgen::from_value(event).map_err(js_error)?;
        self.inner.key_up(&input);
        Ok(())
    }

    /// `phase` is `"down"`, `"move"`, `"up"` or `"cancel"`.
    pub fn pointer(&mut self, phase: &str, event: JsValue) -> Result<(), JsValue> {
        let phase = pointer_phase(phase)
            .ok_or_else(|| js_error(format!("unknown pointer phase {phase:?}")))?;
        let input: PointerInput = serde_wasm_bindgen::from_value(event).map_err(js_error)?;
        self.inner.pointer(phase, &input);
        Ok(())
    }

    /// `phase` is `"start"`, `"move"`, `"end"` or `"cancel"`; `points` the
    /// changed touches.
    pub fn touch(&mut self, phase: &str, points: JsValue) -> Result<(), JsValue> {
        let phase = touch_phase(phase)
            .ok_or_else(|| js_error(format!("unknown touch phase {phase:?}")))?;
        let points: Vec<TouchPoint> = serde_wasm_bindgen::from_value(points).map_err(js_error)?;
        self.inner.touch(phase, &points);
        Ok(())
    }

    #[wasm_bindgen(js_name = sustainDown)]
    pub fn sustain_down(&mut self) {
        self.inner.sustain_down();
    }

    #[wasm_bindgen(js_name = sustainUp)]
    pub fn sustain_up(&mut self) {
        self.inner.sustain_up();
    }

    pub fn panic(&mut self) {
        self.inner.panic();
    }

    pub fn teardown(&mut self) {
        self.inner.teardown();
    }

    #[wasm_bindgen(js_name = setWaveform)]
    pub fn set_waveform(&mut self, name: &str) -> Result<(), JsValue> {
        let waveform = WaveformKind::parse(name)
            .ok_or_else(|| js_error(format!("unknown waveform {name:?}")))?;
        self.inner.set_waveform(waveform);
        Ok(())
    }

    #[wasm_bindgen(js_name = setVolume)]
    pub fn set_volume(&mut self, volume: f64) {
        self.inner.set_volume(volume);
    }

    #[wasm_bindgen(js_name = setUnisonVoices)]
    pub fn set_unison_voices(&mut self, count: usize) {
        self.inner.set_unison_voices(count);
    }

    #[wasm_bindgen(js_name = setDetuneCents)]
    pub fn set_detune_cents(&mut self, cents: f64) {
        self.inner.set_detune_cents(cents);
    }

    #[wasm_bindgen(js_name = setOctaveShift)]
    pub fn set_octave_shift(&mut self, shift: i32) {
        self.inner.set_octave_shift(shift);
    }

    #[wasm_bindgen(js_name = setAttackTime)]
    pub fn set_attack_time(&mut self, seconds: f64) {
        self.inner.set_attack_time(seconds);
    }

    #[wasm_bindgen(js_name = setReleaseTime)]
    pub fn set_release_time(&mut self, seconds: f64) {
        self.inner.set_release_time(seconds);
    }

    #[wasm_bindgen(js_name = setEffects)]
    pub fn set_effects(&mut self, config: JsValue) -> Result<(), JsValue> {
        let config: EffectsConfig = serde_wasm_bindgen::from_value(config).map_err(js_error)?;
        self.inner.set_effects(config);
        Ok(())
    }

    #[wasm_bindgen(js_name = setEffectsBypass)]
    pub fn set_effects_bypass(&mut self, bypass: bool) {
        self.inner.set_effects_bypass(bypass);
    }

    #[wasm_bindgen(js_name = startRecording)]
    pub fn start_recording(&mut self) {
        self.inner.start_recording();
    }

    /// Number of events captured.
    #[wasm_bindgen(js_name = stopRecording)]
    pub fn stop_recording(&mut self) -> usize {
        self.inner.stop_recording()
    }

    #[wasm_bindgen(js_name = isRecording)]
    pub fn is_recording(&self) -> bool {
        self.inner.is_recording()
    }

    #[wasm_bindgen(js_name = startPlayback)]
    pub fn start_playback(&mut self) -> bool {
        self.inner.start_playback()
    }

    #[wasm_bindgen(js_name = stopPlayback)]
    pub fn stop_playback(&mut self) -> bool {
        self.inner.stop_playback()
    }

    #[wasm_bindgen(js_name = isPlaying)]
    pub fn is_playing(&self) -> bool {
        self.inner.is_playing()
    }

    /// Rejected text throws a diagnostic pointing at the problem.
    #[wasm_bindgen(js_name = importSequence)]
    pub fn import_sequence(&mut self, text: &str) -> Result<usize, JsValue> {
        self.inner.import_sequence(text).map_err(|e| match e {
            SynthError::InvalidSequenceData(err) => JsValue::from_str(&err.report(text)),
            other => js_error(other),
        })
    }

    #[wasm_bindgen(js_name = exportSequence)]
    pub fn export_sequence(&self) -> String {
        self.inner.export_sequence()
    }

    /// Current events as plain objects.
    pub fn events(&self) -> Result<JsValue, JsValue> {
        serde_wasm_bindgen::to_value(self.inner.sequence()).map_err(js_error)
    }

    #[wasm_bindgen(js_name = insertEvent)]
    pub fn insert_event(&mut self, event: JsValue) -> Result<usize, JsValue> {
        let event: NoteEvent = serde_wasm_bindgen::from_value(event).map_err(js_error)?;
        self.inner.insert_event(event).map_err(js_error)
    }

    #[wasm_bindgen(js_name = replaceEvent)]
    pub fn replace_event(&mut self, index: usize, event: JsValue) -> Result<usize, JsValue> {
        let event: NoteEvent = serde_wasm_bindgen::from_value(event).map_err(js_error)?;
        self.inner.replace_event(index, event).map_err(js_error)
    }

    #[wasm_bindgen(js_name = deleteEvent)]
    pub fn delete_event(&mut self, index: usize) -> bool {
        self.inner.delete_event(index).is_some()
    }

    #[wasm_bindgen(js_name = clearSequence)]
    pub fn clear_sequence(&mut self) {
        self.inner.clear_sequence();
    }
}
