//! The engine context: every component of the synth, owned in one place and
//! driven by input events and `advance`.
//!
//! ```text
//! KeyInput / PointerInput ─▶ KeyboardState ─▶ NoteCommand ─▶ VoicePool ─▶ EffectsRouter ─▶ host
//!                                   │                            ▲
//!                                   ▼                            │
//!                               Recorder      Player ─▶ TimerQueue (advance)
//! ```

use crate::config::{EffectsConfig, MAX_OCTAVE_SHIFT, ModulationConfig, SynthConfig};
use crate::dsp::effects::EffectsRouter;
use crate::dsp::pool::{NoteSpec, VoicePool};
use crate::dsp::voice::{VoiceId, VoiceOwner};
use crate::dsp::waveform::WaveformKind;
use crate::error::{SequenceError, SynthError};
use crate::host::AudioHost;
use crate::input::{
    DragAction, KeyAction, KeyInput, PointerInput, PointerPhase, TouchPhase, TouchPoint,
    touch_actions,
};
use crate::keymap::KeyFrequencyMap;
use crate::lifecycle::{EngineState, EngineStatus, Lifecycle, Readiness};
use crate::notes::{ActiveNotes, KeyboardState, NoteCommand};
use crate::sequence::{NoteEvent, Sequence};
use crate::sequencer::{PlaybackNoteId, PlaybackTask, Player, Recorder};
use crate::timer::TimerQueue;

/// Deferred work on the synth's timer queue.
#[derive(Debug, Clone, PartialEq)]
pub enum Task {
    /// Free a voice once its release ramp has finished.
    Cleanup(VoiceId),
    Playback(PlaybackTask),
}

impl From<VoiceId> for Task {
    fn from(id: VoiceId) -> Self {
        Task::Cleanup(id)
    }
}

impl From<PlaybackTask> for Task {
    fn from(task: PlaybackTask) -> Self {
        Task::Playback(task)
    }
}

pub struct Synth<H: AudioHost> {
    host: H,
    config: SynthConfig,
    keymap: KeyFrequencyMap,
    lifecycle: Lifecycle,
    timers: TimerQueue<Task>,
    pool: Option<VoicePool>,
    effects: Option<EffectsRouter>,
    keyboard: KeyboardState,
    active: ActiveNotes,
    recorder: Recorder,
    player: Player,
    sequence: Sequence,
}

impl<H: AudioHost> Synth<H> {
    pub fn new(host: H, config: SynthConfig) -> Self {
        let config = config.validated();
        Synth {
            host,
            keymap: KeyFrequencyMap::qwerty(),
            lifecycle: Lifecycle::new(),
            timers: TimerQueue::new(),
            pool: None,
            effects: None,
            keyboard: KeyboardState::new(),
            active: ActiveNotes::new(),
            recorder: Recorder::new(config.min_note_duration),
            player: Player::new(config.release_time, config.loop_guard),
            sequence: Sequence::new(),
            config,
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn config(&self) -> &SynthConfig {
        &self.config
    }

    pub fn keymap(&self) -> &KeyFrequencyMap {
        &self.keymap
    }

    pub fn keyboard(&self) -> &KeyboardState {
        &self.keyboard
    }

    pub fn active(&self) -> &ActiveNotes {
        &self.active
    }

    pub fn pool(&self) -> Option<&VoicePool> {
        self.pool.as_ref()
    }

    pub fn effects(&self) -> Option<&EffectsRouter> {
        self.effects.as_ref()
    }

    pub fn sequence(&self) -> &Sequence {
        &self.sequence
    }

    pub fn engine_state(&self) -> EngineState {
        self.lifecycle.state()
    }

    pub fn status(&self) -> EngineStatus {
        self.lifecycle.status(&self.host)
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    pub fn is_playing(&self) -> bool {
        self.player.is_playing()
    }

    /// Tasks waiting on the timer queue.
    pub fn pending_tasks(&self) -> usize {
        self.timers.pending()
    }

    /// Audio time the earliest pending task is due.
    pub fn next_due(&self) -> Option<f64> {
        self.timers.next_due()
    }

    // ---- lifecycle ---------------------------------------------------------

    /// Get the engine running and the voice pool built. Safe to call from
    /// every user gesture.
    pub fn ensure_ready(&mut self) -> Result<Readiness, SynthError> {
        self.sync_clock();
        let readiness = self.lifecycle.ensure_ready(&mut self.host)?;
        if readiness == Readiness::Ready {
            self.on_ready();
        }
        Ok(readiness)
    }

    /// Completion of a resume the host reported as pending.
    pub fn resume_completed(&mut self, result: Result<(), String>) -> Result<(), SynthError> {
        self.sync_clock();
        self.lifecycle.resume_completed(result)?;
        if self.lifecycle.is_ready() {
            self.on_ready();
        }
        Ok(())
    }

    pub fn host_suspended(&mut self) {
        self.lifecycle.host_suspended();
    }

    fn on_ready(&mut self) {
        if self.pool.is_none() {
            let effects = EffectsRouter::build(&mut self.host, &self.config.effects);
            let pool = VoicePool::build(
                &mut self.host,
                self.keymap.keys(),
                effects.input(),
                &self.config,
            );
            self.effects = Some(effects);
            self.pool = Some(pool);
        }
        for key in self.lifecycle.take_deferred() {
            if self.keyboard.is_sounding(&key) && self.active.live(&key).is_empty() {
                log::debug!("replaying deferred note {key:?}");
                self.start_live(&key);
            }
        }
    }

    fn gesture(&mut self) {
        if let Err(e) = self.ensure_ready() {
            log::debug!("audio not available: {e}");
        }
    }

    /// Stop everything and release every host node. The next gesture builds
    /// a fresh pool.
    pub fn teardown(&mut self) {
        self.panic();
        if let Some(mut pool) = self.pool.take() {
            pool.teardown(&mut self.host, &mut self.timers);
        }
        if let Some(mut effects) = self.effects.take() {
            effects.teardown(&mut self.host);
        }
        self.timers.clear();
    }

    // ---- time --------------------------------------------------------------

    /// Bring the timer clock up to the host's audio time. Every command
    /// calls this before it schedules anything.
    fn sync_clock(&mut self) {
        let now = self.host.current_time();
        self.timers.sync(now);
    }

    /// Run every task due by the host's current audio time.
    pub fn tick(&mut self) {
        let now = self.host.current_time();
        self.advance(now);
    }

    /// Run every task due at or before audio time `now`.
    pub fn advance(&mut self, now: f64) {
        while let Some((timer, task)) = self.timers.pop_due(now) {
            match task {
                Task::Cleanup(id) => {
                    if let Some(pool) = self.pool.as_mut() {
                        pool.cleanup(&mut self.host, &id, timer);
                    }
                }
                Task::Playback(PlaybackTask::Play(id)) => self.play_scheduled(id, now),
                Task::Playback(PlaybackTask::Release(id)) => self.release_scheduled(id),
                Task::Playback(PlaybackTask::Loop { pass }) => {
                    self.player.on_loop(pass, now, &mut self.timers);
                }
            }
        }
    }

    // ---- input -------------------------------------------------------------

    pub fn key_down(&mut self, input: &KeyInput) {
        self.sync_clock();
        match input.action(&self.keymap) {
            KeyAction::Ignore => {}
            KeyAction::Sustain => {
                self.gesture();
                self.sustain_down();
            }
            KeyAction::Note(key) => {
                self.gesture();
                let command = self.keyboard.key_down(&key);
                self.apply(command);
            }
        }
    }

    pub fn key_up(&mut self, input: &KeyInput) {
        self.sync_clock();
        match input.action(&self.keymap) {
            KeyAction::Ignore => {}
            KeyAction::Sustain => self.sustain_up(),
            KeyAction::Note(key) => {
                if let Some(command) = self.keyboard.key_up(&key) {
                    self.apply(command);
                }
            }
        }
    }

    pub fn sustain_down(&mut self) {
        self.keyboard.sustain_down();
    }

    pub fn sustain_up(&mut self) {
        self.sync_clock();
        for command in self.keyboard.sustain_up() {
            self.apply(command);
        }
    }

    pub fn pointer(&mut self, phase: PointerPhase, input: &PointerInput) {
        self.sync_clock();
        let action = input.action(phase, &self.keymap);
        self.drag(action);
    }

    pub fn touch(&mut self, phase: TouchPhase, points: &[TouchPoint]) {
        self.sync_clock();
        for action in touch_actions(phase, points, &self.keymap) {
            self.drag(action);
        }
    }

    fn drag(&mut self, action: DragAction) {
        let commands = match action {
            DragAction::Down(pointer, key) => {
                self.gesture();
                self.keyboard.pointer_down(pointer, key.as_deref())
            }
            DragAction::Move(pointer, key) => self.keyboard.pointer_move(pointer, key.as_deref()),
            DragAction::Up(pointer) => self.keyboard.pointer_up(pointer),
        };
        for command in commands {
            self.apply(command);
        }
    }

    /// Silence every voice and forget all key, pedal, drag and playback
    /// state.
    pub fn panic(&mut self) {
        let now = self.host.current_time();
        for key in self.keyboard.panic() {
            self.recorder.note_ended(&key, now);
        }
        self.active.drain_live();
        self.stop_playback();
        if let Some(pool) = self.pool.as_mut() {
            let stopped = pool.hard_stop_where(&mut self.host, &mut self.timers, |_| true);
            log::info!("panic: {stopped} voices stopped");
        }
    }

    // ---- live notes --------------------------------------------------------

    fn apply(&mut self, command: NoteCommand) {
        match command {
            NoteCommand::Start(key) => self.start_live(&key),
            NoteCommand::Retrigger(key) => {
                self.cut_live(&key);
                self.start_live(&key);
            }
            NoteCommand::Release(key) => self.release_live(&key),
        }
    }

    fn note_spec(&self, frequency: f64, waveform: WaveformKind, volume: f64) -> NoteSpec {
        NoteSpec {
            frequency,
            waveform,
            volume,
            unison: self.config.unison_voices,
            detune_cents: self.config.detune_cents,
            attack: self.config.attack_time,
        }
    }

    fn start_live(&mut self, key: &str) {
        if self.pool.is_none() {
            self.lifecycle.defer(key);
            return;
        }
        let Some(frequency) = self.keymap.shifted(key, self.config.octave_shift) else {
            return;
        };
        let spec = self.note_spec(frequency, self.config.waveform, self.config.volume);
        let Some(pool) = self.pool.as_mut() else {
            return;
        };
        let voices = pool.start_note(&mut self.host, &mut self.timers, key, VoiceOwner::Live, &spec);
        if voices.is_empty() {
            return;
        }
        self.active.set_live(key, voices);
        let now = self.host.current_time();
        self.recorder.note_started(
            key,
            self.config.waveform,
            self.config.volume,
            self.config.octave_shift,
            now,
        );
    }

    fn cut_live(&mut self, key: &str) {
        let voices = self.active.take_live(key);
        if let Some(pool) = self.pool.as_mut() {
            for id in &voices {
                pool.hard_stop(&mut self.host, &mut self.timers, id, VoiceOwner::Live);
            }
        }
    }

    fn release_live(&mut self, key: &str) {
        let voices = self.active.take_live(key);
        let release = self.config.release_time;
        if let Some(pool) = self.pool.as_mut() {
            for id in &voices {
                pool.release(&mut self.host, &mut self.timers, id, VoiceOwner::Live, release);
            }
        }
        let now = self.host.current_time();
        self.recorder.note_ended(key, now);
    }

    // ---- settings ----------------------------------------------------------

    /// Applies to notes started from now on.
    pub fn set_waveform(&mut self, waveform: WaveformKind) {
        self.config.waveform = waveform;
    }

    pub fn set_volume(&mut self, volume: f64) {
        self.config.volume = volume.clamp(0.0, 1.0);
    }

    pub fn set_unison_voices(&mut self, count: usize) {
        self.config.unison_voices = count.clamp(1, self.config.pool_size);
    }

    pub fn set_detune_cents(&mut self, cents: f64) {
        if cents.is_finite() {
            self.config.detune_cents = cents;
        }
    }

    pub fn set_octave_shift(&mut self, shift: i32) {
        self.config.octave_shift = shift.clamp(-MAX_OCTAVE_SHIFT, MAX_OCTAVE_SHIFT);
    }

    pub fn set_attack_time(&mut self, seconds: f64) {
        self.config.attack_time = seconds.max(0.0);
    }

    pub fn set_release_time(&mut self, seconds: f64) {
        self.config.release_time = seconds.max(0.0);
        self.player.set_release(self.config.release_time);
    }

    pub fn set_modulation(&mut self, modulation: ModulationConfig) {
        self.config.modulation = modulation;
        if let Some(pool) = self.pool.as_mut() {
            pool.set_modulation(modulation);
        }
    }

    /// Out-of-range parameters are clamped before they reach the host.
    pub fn set_effects(&mut self, effects: EffectsConfig) {
        let effects = effects.validated();
        self.config.effects = effects;
        if let Some(router) = self.effects.as_mut() {
            router.apply(&mut self.host, &effects);
        }
    }

    pub fn set_effects_bypass(&mut self, bypass: bool) {
        self.config.effects.bypass = bypass;
        if let Some(router) = self.effects.as_mut() {
            router.set_bypass(&mut self.host, bypass);
        }
    }

    // ---- recording ---------------------------------------------------------

    /// Start a take. Keys already sounding are captured from now.
    pub fn start_recording(&mut self) {
        let now = self.host.current_time();
        self.recorder.start(now);
        for key in self.keyboard.sounding() {
            if !self.active.live(key).is_empty() {
                self.recorder.note_started(
                    key,
                    self.config.waveform,
                    self.config.volume,
                    self.config.octave_shift,
                    now,
                );
            }
        }
    }

    /// End the take. A take with notes replaces the current sequence; an
    /// empty one leaves it alone. Returns the number of recorded events.
    pub fn stop_recording(&mut self) -> usize {
        if !self.recorder.is_recording() {
            return 0;
        }
        let now = self.host.current_time();
        let take = self.recorder.stop(now);
        let count = take.len();
        if count > 0 {
            self.set_sequence(take);
        }
        count
    }

    // ---- playback ----------------------------------------------------------

    /// Loop the current sequence. Returns false if it is empty.
    pub fn start_playback(&mut self) -> bool {
        self.gesture();
        self.stop_playback();
        self.sync_clock();
        let now = self.host.current_time();
        self.player.start(&self.sequence, now, &mut self.timers)
    }

    /// Cancel all playback tasks and cut playback voices to silence.
    pub fn stop_playback(&mut self) -> bool {
        let was_playing = self.player.stop(&mut self.timers);
        self.active.drain_playback();
        if let Some(pool) = self.pool.as_mut() {
            pool.hard_stop_where(&mut self.host, &mut self.timers, |v| v.is_playback_owned());
        }
        was_playing
    }

    fn play_scheduled(&mut self, id: PlaybackNoteId, now: f64) {
        if self.player.is_over(id, now) {
            log::debug!("playback note {id:?} skipped: already over at {now:.3}");
            return;
        }
        let Some(event) = self.player.event(id).cloned() else {
            return;
        };
        let Some(frequency) = self.keymap.shifted(&event.key, event.octave_shift) else {
            return;
        };
        let spec = self.note_spec(frequency, event.waveform, event.volume);
        let Some(pool) = self.pool.as_mut() else {
            log::debug!("playback note {id:?} skipped: pool not built");
            return;
        };
        let voices = pool.start_note(
            &mut self.host,
            &mut self.timers,
            &event.key,
            VoiceOwner::Playback(id),
            &spec,
        );
        self.active.set_playback(id, voices);
    }

    fn release_scheduled(&mut self, id: PlaybackNoteId) {
        let voices = self.active.take_playback(id);
        let release = self.config.release_time;
        if let Some(pool) = self.pool.as_mut() {
            for voice in &voices {
                pool.release(
                    &mut self.host,
                    &mut self.timers,
                    voice,
                    VoiceOwner::Playback(id),
                    release,
                );
            }
        }
    }

    // ---- sequence editing --------------------------------------------------
    //
    // Every edit stops playback first; a running schedule is never mutated.

    pub fn set_sequence(&mut self, sequence: Sequence) {
        self.stop_playback();
        self.sequence = sequence;
    }

    /// Replace the sequence with parsed file text. On error the current
    /// sequence is kept.
    pub fn import_sequence(&mut self, text: &str) -> Result<usize, SynthError> {
        match Sequence::parse_text(text, &self.keymap) {
            Ok(sequence) => {
                let count = sequence.len();
                self.set_sequence(sequence);
                log::info!("imported {count} events");
                Ok(count)
            }
            Err(e) => {
                log::warn!("sequence import rejected:\n{}", e.report(text));
                Err(e.into())
            }
        }
    }

    pub fn export_sequence(&self) -> String {
        self.sequence.to_text()
    }

    pub fn insert_event(&mut self, event: NoteEvent) -> Result<usize, SynthError> {
        event
            .validate(&self.keymap)
            .map_err(|message| SequenceError::new(message, 0..0))?;
        self.stop_playback();
        Ok(self.sequence.insert(event))
    }

    pub fn replace_event(&mut self, index: usize, event: NoteEvent) -> Result<usize, SynthError> {
        event
            .validate(&self.keymap)
            .map_err(|message| SequenceError::new(message, 0..0))?;
        if index >= self.sequence.len() {
            return Err(SequenceError::new(format!("no event at index {index}"), 0..0).into());
        }
        self.stop_playback();
        self.sequence.remove(index);
        Ok(self.sequence.insert(event))
    }

    pub fn delete_event(&mut self, index: usize) -> Option<NoteEvent> {
        if index >= self.sequence.len() {
            return None;
        }
        self.stop_playback();
        self.sequence.remove(index)
    }

    pub fn clear_sequence(&mut self) {
        self.stop_playback();
        self.sequence.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::voice::VoiceState;
    use crate::host::fake::{FakeHost, NodeKind, ResumeMode};
    use crate::host::{Endpoint, HostState, ParamRef};
    use float_cmp::approx_eq;

    fn ready(config: SynthConfig) -> Synth<FakeHost> {
        let mut synth = Synth::new(FakeHost::new(), config);
        synth.ensure_ready().unwrap();
        synth
    }

    fn at(synth: &mut Synth<FakeHost>, t: f64) {
        synth.host_mut().set_time(t);
        synth.advance(t);
    }

    fn down(synth: &mut Synth<FakeHost>, key: &str) {
        synth.key_down(&KeyInput::new(key));
    }

    fn up(synth: &mut Synth<FakeHost>, key: &str) {
        synth.key_up(&KeyInput::new(key));
    }

    fn state(synth: &Synth<FakeHost>, id: &VoiceId) -> VoiceState {
        synth.pool().unwrap().voice(id).unwrap().state()
    }

    fn note(key: &str, start: f64, duration: f64) -> NoteEvent {
        NoteEvent {
            key: key.to_string(),
            start_time: start,
            duration,
            waveform: WaveformKind::Sine,
            volume: 0.8,
            octave_shift: 0,
        }
    }

    #[test]
    fn gestures_before_ready_share_one_resume() {
        let mut host = FakeHost::new();
        host.resume_mode = ResumeMode::Deferred;
        let mut synth = Synth::new(host, SynthConfig::default());

        down(&mut synth, "q");
        down(&mut synth, "w");
        synth.pointer(
            PointerPhase::Down,
            &PointerInput {
                pointer_id: 1,
                buttons: 1,
                key: Some("e".into()),
            },
        );
        up(&mut synth, "w");
        assert_eq!(synth.host().resume_calls, 1);
        assert!(synth.pool().is_none());

        synth.host_mut().state = HostState::Running;
        synth.resume_completed(Ok(())).unwrap();
        let generators = synth.host().count(NodeKind::Generator);
        assert_eq!(generators, 29 * 6 * 2, "pool built exactly once");
        assert_eq!(synth.active().live("q").len(), 1, "held key replayed");
        assert_eq!(synth.active().live("e").len(), 1, "dragged key replayed");
        assert!(synth.active().live("w").is_empty(), "released key dropped");

        down(&mut synth, "r");
        assert_eq!(synth.host().count(NodeKind::Generator), generators);
        assert_eq!(synth.host().resume_calls, 1);
    }

    #[test]
    fn resume_failure_retries_on_next_gesture() {
        let mut host = FakeHost::new();
        host.resume_mode = ResumeMode::Fail("not allowed".into());
        let mut synth = Synth::new(host, SynthConfig::default());
        down(&mut synth, "q");
        assert!(synth.status().is_error());
        assert!(synth.pool().is_none());
        up(&mut synth, "q");

        synth.host_mut().resume_mode = ResumeMode::Succeed;
        down(&mut synth, "q");
        assert_eq!(synth.status(), EngineStatus::Ready);
        assert_eq!(synth.active().live("q").len(), 1);
    }

    #[test]
    fn unsupported_host_never_builds() {
        let mut host = FakeHost::new();
        host.supported = false;
        let mut synth = Synth::new(host, SynthConfig::default());
        down(&mut synth, "q");
        up(&mut synth, "q");
        assert!(synth.pool().is_none());
        assert_eq!(synth.status().message(), "Web Audio API not supported.");
        assert_eq!(synth.ensure_ready(), Err(SynthError::EngineUnsupported));
    }

    #[test]
    fn suspension_keeps_pool() {
        let mut synth = ready(SynthConfig::default());
        let generators = synth.host().count(NodeKind::Generator);
        synth.host_mut().state = HostState::Suspended;
        synth.host_suspended();
        assert_eq!(synth.status(), EngineStatus::Suspended);
        down(&mut synth, "q");
        assert_eq!(synth.status(), EngineStatus::Ready);
        assert_eq!(synth.host().count(NodeKind::Generator), generators);
        assert_eq!(synth.host().resume_calls, 2);
    }

    #[test]
    fn voices_feed_effects_input() {
        let synth = ready(SynthConfig::default());
        let input = synth.effects().unwrap().input();
        let voice = &synth.pool().unwrap().voices("q")[0];
        assert!(synth.host().is_connected(voice.nodes.amp, Endpoint::Node(input)));
    }

    #[test]
    fn press_release_cleanup() {
        let mut synth = ready(SynthConfig::default());
        down(&mut synth, "q");
        let id = synth.active().live("q")[0].clone();
        assert_eq!(state(&synth, &id), VoiceState::Sounding);
        at(&mut synth, 0.5);
        up(&mut synth, "q");
        assert_eq!(state(&synth, &id), VoiceState::Releasing);
        at(&mut synth, 0.77);
        assert_eq!(state(&synth, &id), VoiceState::Releasing);
        at(&mut synth, 0.8);
        assert_eq!(state(&synth, &id), VoiceState::Free);
    }

    #[test]
    fn sustain_scenario() {
        let mut synth = ready(SynthConfig::default());
        down(&mut synth, "q");
        let id = synth.active().live("q")[0].clone();
        synth.key_down(&KeyInput::sustain());
        up(&mut synth, "q");
        at(&mut synth, 2.0);
        assert_eq!(state(&synth, &id), VoiceState::Sounding, "held by the pedal");

        synth.key_up(&KeyInput::sustain());
        assert_eq!(state(&synth, &id), VoiceState::Releasing);
        at(&mut synth, 2.3);
        assert_eq!(state(&synth, &id), VoiceState::Free);
    }

    #[test]
    fn unison_scenario() {
        let mut synth = ready(SynthConfig::default());
        synth.set_unison_voices(3);
        synth.set_detune_cents(20.0);
        synth.set_volume(0.9);
        down(&mut synth, "q");
        at(&mut synth, 0.05);

        let ids = synth.active().live("q").to_vec();
        assert_eq!(ids.len(), 3);
        let pool = synth.pool().unwrap();
        let mut cents: Vec<f64> = ids
            .iter()
            .map(|id| {
                let carrier = pool.voice(id).unwrap().nodes.carrier;
                let f = synth.host().param_value(ParamRef::frequency(carrier));
                1200.0 * (f / 261.63).log2()
            })
            .collect();
        cents.sort_by(|a, b| a.total_cmp(b));
        assert!(approx_eq!(f64, cents[0], -20.0, epsilon = 1e-6));
        assert!(approx_eq!(f64, cents[1], 0.0, epsilon = 1e-6));
        assert!(approx_eq!(f64, cents[2], 20.0, epsilon = 1e-6));
        for id in &ids {
            let gain = synth.host().param_value(pool.voice(id).unwrap().amp());
            assert!(approx_eq!(f64, gain, 0.9 / 3.0_f64.sqrt(), epsilon = 1e-9));
        }
    }

    #[test]
    fn octave_shift_doubles_frequency() {
        let mut synth = ready(SynthConfig::default());
        synth.set_octave_shift(9);
        assert_eq!(synth.config().octave_shift, 3);
        synth.set_octave_shift(1);
        down(&mut synth, "y");
        let id = synth.active().live("y")[0].clone();
        let carrier = synth.pool().unwrap().voice(&id).unwrap().nodes.carrier;
        let f = synth.host().param_value(ParamRef::frequency(carrier));
        assert!(approx_eq!(f64, f, 880.0, epsilon = 1e-9));
    }

    #[test]
    fn retrigger_hard_cuts() {
        let mut synth = ready(SynthConfig::default());
        synth.sustain_down();
        down(&mut synth, "q");
        up(&mut synth, "q");
        down(&mut synth, "q");
        assert_eq!(synth.pool().unwrap().busy_count("q"), 1);
        assert_eq!(synth.active().live("q").len(), 1);
    }

    #[test]
    fn waveform_applies_to_new_notes() {
        let mut synth = ready(SynthConfig::default());
        synth.set_waveform(WaveformKind::Fm);
        down(&mut synth, "q");
        let id = synth.active().live("q")[0].clone();
        let voice = synth.pool().unwrap().voice(&id).unwrap();
        assert_eq!(voice.waveform(), WaveformKind::Fm);
        assert!(synth.host().is_connected(voice.nodes.modulator, Endpoint::Node(voice.nodes.depth)));
    }

    #[test]
    fn drag_across_keys() {
        let mut synth = ready(SynthConfig::default());
        let pointer = |key: &str| PointerInput {
            pointer_id: 1,
            buttons: 1,
            key: Some(key.into()),
        };
        synth.pointer(PointerPhase::Down, &pointer("q"));
        let q = synth.active().live("q")[0].clone();
        synth.pointer(PointerPhase::Move, &pointer("w"));
        assert_eq!(state(&synth, &q), VoiceState::Releasing);
        assert_eq!(synth.active().live("w").len(), 1);
        synth.pointer(PointerPhase::Up, &pointer("w"));
        assert!(synth.active().live("w").is_empty());
    }

    #[test]
    fn touches_are_independent() {
        let mut synth = ready(SynthConfig::default());
        let points = [
            TouchPoint {
                identifier: 1,
                key: Some("q".into()),
            },
            TouchPoint {
                identifier: 2,
                key: Some("w".into()),
            },
        ];
        synth.touch(TouchPhase::Start, &points);
        assert_eq!(synth.keyboard().sounding().count(), 2);
        synth.touch(TouchPhase::End, &points[..1]);
        assert!(!synth.keyboard().is_sounding("q"));
        assert!(synth.keyboard().is_sounding("w"));
    }

    #[test]
    fn record_scenario() {
        let mut synth = ready(SynthConfig::default());
        at(&mut synth, 1.0);
        synth.start_recording();
        down(&mut synth, "q");
        at(&mut synth, 1.5);
        up(&mut synth, "q");
        assert_eq!(synth.stop_recording(), 1);

        let event = &synth.sequence().events()[0];
        assert_eq!(event.key, "q");
        assert_eq!(event.waveform, WaveformKind::Sine);
        assert_eq!(event.octave_shift, 0);
        assert!(approx_eq!(f64, event.start_time, 0.0, epsilon = 0.01));
        assert!(approx_eq!(f64, event.duration, 0.5, epsilon = 0.02));
    }

    #[test]
    fn empty_take_keeps_sequence() {
        let mut synth = ready(SynthConfig::default());
        synth.set_sequence(Sequence::from_events(vec![note("q", 0.0, 1.0)]));
        synth.start_recording();
        assert_eq!(synth.stop_recording(), 0);
        assert_eq!(synth.sequence().len(), 1);
    }

    #[test]
    fn playback_loops_after_release_tail() {
        let mut synth = ready(SynthConfig::default());
        synth.set_sequence(Sequence::from_events(vec![
            note("q", 0.0, 0.5),
            note("w", 0.5, 0.5),
        ]));
        assert!(synth.start_playback());

        at(&mut synth, 0.0);
        let q1 = synth.pool().unwrap().ids_where(|v| v.is_playback_owned());
        assert_eq!(q1.len(), 1);
        assert_eq!(q1[0].key, "q");

        at(&mut synth, 0.6);
        assert_eq!(state(&synth, &q1[0]), VoiceState::Releasing);

        at(&mut synth, 1.29);
        assert!(
            synth.pool().unwrap().ids_where(|v| v.is_busy()).len() <= 1,
            "only w's tail may remain"
        );
        let busy_q = synth.pool().unwrap().busy_count("q");
        assert_eq!(busy_q, 0, "first pass finished before the loop");

        at(&mut synth, 1.31);
        let again = synth.pool().unwrap().ids_where(|v| {
            v.owner() == Some(VoiceOwner::Playback(PlaybackNoteId { pass: 2, index: 0 }))
        });
        assert_eq!(again.len(), 1, "second pass started at 1.3");
    }

    #[test]
    fn late_tick_runs_one_catch_up_pass() {
        let mut synth = ready(SynthConfig::default());
        synth.set_sequence(Sequence::from_events(vec![
            note("q", 0.0, 0.5),
            note("w", 0.5, 0.5),
        ]));
        at(&mut synth, 0.0);
        assert!(synth.start_playback());

        at(&mut synth, 13.0);
        let pool = synth.pool().unwrap();
        let playing = pool.ids_where(|v| v.is_playback_owned());
        assert_eq!(playing.len(), 1, "missed notes are not replayed");
        assert_eq!(
            pool.voice(&playing[0]).unwrap().owner(),
            Some(VoiceOwner::Playback(PlaybackNoteId { pass: 2, index: 0 }))
        );
        let next = synth.next_due().unwrap();
        assert!(approx_eq!(f64, next, 13.5, epsilon = 1e-9), "next due {next}");
    }

    #[test]
    fn playback_starts_at_audio_time() {
        let mut synth = ready(SynthConfig::default());
        synth.set_sequence(Sequence::from_events(vec![
            note("q", 0.0, 0.5),
            note("w", 0.5, 0.5),
        ]));
        synth.host_mut().set_time(50.0);
        synth.start_playback();
        assert_eq!(synth.next_due(), Some(50.0));

        synth.advance(50.0);
        let ids = synth.pool().unwrap().ids_where(|v| {
            v.owner() == Some(VoiceOwner::Playback(PlaybackNoteId { pass: 1, index: 0 }))
        });
        assert_eq!(ids.len(), 1, "first pass plays from the current audio time");
        assert!(synth.active().live("w").is_empty());
        assert_eq!(synth.pool().unwrap().busy_count("w"), 0, "w waits until 50.5");
    }

    #[test]
    fn release_outlives_stale_timer_clock() {
        let mut synth = ready(SynthConfig::default());
        synth.host_mut().set_time(10.0);
        down(&mut synth, "q");
        let id = synth.active().live("q")[0].clone();
        synth.host_mut().set_time(10.5);
        up(&mut synth, "q");

        at(&mut synth, 10.51);
        assert_eq!(state(&synth, &id), VoiceState::Releasing);
        let amp = synth.pool().unwrap().voice(&id).unwrap().amp();
        assert!(synth.host().value_at(amp, 10.51) > 0.0, "ramp still audible");

        at(&mut synth, 10.8);
        assert_eq!(state(&synth, &id), VoiceState::Free);
    }

    #[test]
    fn tick_uses_host_clock() {
        let mut synth = ready(SynthConfig::default());
        down(&mut synth, "q");
        let id = synth.active().live("q")[0].clone();
        up(&mut synth, "q");
        let due = synth.next_due().unwrap();
        synth.host_mut().set_time(due);
        synth.tick();
        assert_eq!(state(&synth, &id), VoiceState::Free);
        assert_eq!(synth.next_due(), None);
    }

    #[test]
    fn empty_playback_is_noop() {
        let mut synth = ready(SynthConfig::default());
        assert!(!synth.start_playback());
        assert_eq!(synth.pending_tasks(), 0);
    }

    #[test]
    fn stop_playback_hard_zeroes_voices() {
        let mut synth = ready(SynthConfig::default());
        synth.set_sequence(Sequence::from_events(vec![note("q", 0.0, 1.0)]));
        synth.start_playback();
        at(&mut synth, 0.1);
        let ids = synth.pool().unwrap().ids_where(|v| v.is_playback_owned());
        assert_eq!(ids.len(), 1);

        assert!(synth.stop_playback());
        assert_eq!(state(&synth, &ids[0]), VoiceState::Free);
        let amp = synth.pool().unwrap().voice(&ids[0]).unwrap().amp();
        assert_eq!(synth.host().param_value(amp), 0.0);
        assert_eq!(synth.pending_tasks(), 0);
    }

    #[test]
    fn live_and_playback_never_steal_from_each_other() {
        let config = SynthConfig {
            pool_size: 1,
            ..SynthConfig::default()
        };
        let mut synth = ready(config);
        synth.set_sequence(Sequence::from_events(vec![note("q", 0.0, 2.0)]));
        synth.start_playback();
        at(&mut synth, 0.0);

        down(&mut synth, "q");
        assert!(synth.active().live("q").is_empty(), "live note dropped");
        let voice = &synth.pool().unwrap().voices("q")[0];
        assert!(voice.is_playback_owned());

        synth.stop_playback();
        down(&mut synth, "w");
        synth.set_sequence(Sequence::from_events(vec![note("w", 0.0, 1.0)]));
        synth.start_playback();
        at(&mut synth, 0.5);
        let voice = &synth.pool().unwrap().voices("w")[0];
        assert_eq!(voice.owner(), Some(VoiceOwner::Live), "playback did not steal");
    }

    #[test]
    fn playback_notes_not_recorded() {
        let mut synth = ready(SynthConfig::default());
        synth.set_sequence(Sequence::from_events(vec![note("q", 0.0, 0.5)]));
        synth.start_playback();
        synth.start_recording();
        at(&mut synth, 0.0);
        at(&mut synth, 0.6);
        assert_eq!(synth.stop_recording(), 0);
    }

    #[test]
    fn edits_stop_playback() {
        let mut synth = ready(SynthConfig::default());
        synth.set_sequence(Sequence::from_events(vec![
            note("q", 0.0, 0.5),
            note("w", 0.5, 0.5),
        ]));
        synth.start_playback();
        assert_eq!(synth.delete_event(0).unwrap().key, "q");
        assert!(!synth.is_playing());
        assert_eq!(synth.pending_tasks(), 0);

        synth.start_playback();
        let index = synth.replace_event(0, note("e", 0.25, 0.5)).unwrap();
        assert_eq!(index, 0);
        assert!(!synth.is_playing());

        synth.start_playback();
        assert!(synth.insert_event(note("#", 0.0, 1.0)).is_err());
        assert!(synth.is_playing(), "rejected edit changes nothing");
        synth.clear_sequence();
        assert!(!synth.is_playing());
        assert!(synth.sequence().is_empty());
    }

    #[test]
    fn import_export_round_trip() {
        let mut synth = ready(SynthConfig::default());
        synth.set_sequence(Sequence::from_events(vec![
            note("q", 0.0, 0.5),
            note("l", 0.75, 0.125),
        ]));
        let text = synth.export_sequence();
        synth.clear_sequence();
        assert_eq!(synth.import_sequence(&text), Ok(2));
        assert_eq!(synth.sequence().events()[1].key, "l");
    }

    #[test]
    fn rejected_import_keeps_previous() {
        let mut synth = ready(SynthConfig::default());
        synth.set_sequence(Sequence::from_events(vec![note("q", 0.0, 0.5)]));
        synth.start_playback();
        let err = synth.import_sequence("[{\"key\": \"q\"").unwrap_err();
        assert!(matches!(err, SynthError::InvalidSequenceData(_)));
        assert_eq!(synth.sequence().len(), 1);
        assert!(synth.is_playing(), "nothing applied");
    }

    #[test]
    fn panic_resets_everything() {
        let mut synth = ready(SynthConfig::default());
        synth.set_sequence(Sequence::from_events(vec![note("e", 0.0, 1.0)]));
        synth.start_playback();
        at(&mut synth, 0.0);
        down(&mut synth, "q");
        synth.sustain_down();
        up(&mut synth, "q");
        down(&mut synth, "w");
        up(&mut synth, "w");

        synth.panic();
        let pool = synth.pool().unwrap();
        assert!(pool.ids_where(|v| v.is_busy()).is_empty());
        assert_eq!(synth.keyboard().sounding().count(), 0);
        assert!(!synth.keyboard().sustain_engaged());
        assert!(!synth.is_playing());
        assert_eq!(synth.pending_tasks(), 0);
    }

    #[test]
    fn effects_settings_reach_router() {
        let mut synth = ready(SynthConfig::default());
        synth.set_effects_bypass(false);
        assert!(!synth.effects().unwrap().is_bypassed());
        let mut effects = synth.config().effects;
        effects.delay.mix = 0.5;
        synth.set_effects(effects);
        assert_eq!(synth.effects().unwrap().config().delay.mix, 0.5);
    }

    #[test]
    fn effects_settings_are_clamped() {
        let mut synth = ready(SynthConfig::default());
        let mut effects = synth.config().effects;
        effects.reverb.duration = -5.0;
        effects.master_gain = 40.0;
        effects.chorus.depth = -1.0;
        synth.set_effects(effects);

        let applied = synth.effects().unwrap().config();
        assert_eq!(applied.reverb.duration, 0.1);
        assert_eq!(applied.master_gain, 1.0);
        assert_eq!(applied.chorus.depth, 0.0);
        assert_eq!(synth.config().effects.reverb.duration, 0.1);
    }

    #[test]
    fn teardown_releases_nodes() {
        let mut synth = ready(SynthConfig::default());
        down(&mut synth, "q");
        synth.teardown();
        assert!(synth.pool().is_none());
        assert_eq!(synth.host().stopped.len(), 29 * 6 * 2);
        down(&mut synth, "q");
        assert!(synth.pool().is_some(), "next gesture rebuilds");
    }
}
