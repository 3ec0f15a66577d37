//! Voice pool: fixed per-key voice slots with stealing and unison math.
//!
//! Every mapped key owns `capacity` voices built once when the engine becomes
//! ready. Voices are never created or destroyed afterwards; acquiring a
//! voice for a key whose slots are all busy reclaims one of them.

use std::collections::HashMap;

use crate::config::{ModulationConfig, SynthConfig};
use crate::error::SynthError;
use crate::host::{AudioHost, NodeId};
use crate::timer::{TimerId, TimerQueue};

use super::envelope;
use super::voice::{Voice, VoiceId, VoiceOwner, VoiceState};
use super::waveform::{WaveTables, WaveformKind};

/// Detune of unison voice `index` out of `count`, in cents. Voices spread
/// symmetrically over `[-detune, +detune]`; a single voice is not detuned.
pub fn detune_offset(index: usize, count: usize, detune_cents: f64) -> f64 {
    if count <= 1 {
        return 0.0;
    }
    let half = (count as f64 - 1.0) / 2.0;
    (index as f64 - half) / half * detune_cents
}

/// Per-voice gain keeping a unison stack at roughly constant loudness.
pub fn unison_gain(volume: f64, count: usize) -> f64 {
    volume / (count.max(1) as f64).sqrt()
}

/// `frequency` shifted by `cents`.
pub fn detuned(frequency: f64, cents: f64) -> f64 {
    frequency * 2.0_f64.powf(cents / 1200.0)
}

/// Result of `acquire`.
#[derive(Debug, Clone, PartialEq)]
pub struct Acquired {
    pub id: VoiceId,
    /// Owner of the voice before it was reclaimed.
    pub stolen_from: Option<VoiceOwner>,
}

/// What a started note needs from the pool.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteSpec {
    pub frequency: f64,
    pub waveform: WaveformKind,
    pub volume: f64,
    pub unison: usize,
    pub detune_cents: f64,
    pub attack: f64,
}

pub struct VoicePool {
    slots: HashMap<String, Vec<Voice>>,
    capacity: usize,
    tables: WaveTables,
    mix_input: NodeId,
    modulation: ModulationConfig,
    release_floor: f64,
    cleanup_margin: f64,
    clock: u64,
}

impl VoicePool {
    /// Build `capacity` voices for every key, plus the shared wave tables.
    pub fn build<'a, H: AudioHost>(
        host: &mut H,
        keys: impl IntoIterator<Item = &'a str>,
        mix_input: NodeId,
        config: &SynthConfig,
    ) -> Self {
        let capacity = config.pool_size.max(1);
        let tables = WaveTables::build(host, config.modulation.pulse_duty);
        let mut slots = HashMap::new();
        for key in keys {
            let voices = (0..capacity).map(|_| Voice::build(host, mix_input)).collect();
            slots.insert(key.to_string(), voices);
        }
        log::debug!("voice pool built: {} keys x {capacity} voices", slots.len());
        VoicePool {
            slots,
            capacity,
            tables,
            mix_input,
            modulation: config.modulation,
            release_floor: config.release_floor,
            cleanup_margin: config.cleanup_margin,
            clock: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn tables(&self) -> &WaveTables {
        &self.tables
    }

    pub fn set_modulation(&mut self, modulation: ModulationConfig) {
        self.modulation = modulation;
    }

    pub fn voice(&self, id: &VoiceId) -> Option<&Voice> {
        self.slots.get(&id.key).and_then(|v| v.get(id.slot))
    }

    fn voice_mut(&mut self, id: &VoiceId) -> Option<&mut Voice> {
        self.slots.get_mut(&id.key).and_then(|v| v.get_mut(id.slot))
    }

    pub fn voices(&self, key: &str) -> &[Voice] {
        self.slots.get(key).map_or(&[], |v| v.as_slice())
    }

    pub fn busy_count(&self, key: &str) -> usize {
        self.voices(key).iter().filter(|v| v.is_busy()).count()
    }

    /// Ids of every voice matching `pred`.
    pub fn ids_where(&self, pred: impl Fn(&Voice) -> bool) -> Vec<VoiceId> {
        let mut ids = Vec::new();
        for (key, voices) in &self.slots {
            for (slot, v) in voices.iter().enumerate() {
                if pred(v) {
                    ids.push(VoiceId::new(key.clone(), slot));
                }
            }
        }
        ids
    }

    /// Claim a voice for `key`. Order of preference: a free voice, the oldest
    /// releasing voice of the same owner domain, the oldest sounding voice of
    /// the same owner domain. A reclaimed voice is silenced and unwired first.
    pub fn acquire<H: AudioHost, T>(
        &mut self,
        host: &mut H,
        timers: &mut TimerQueue<T>,
        key: &str,
        owner: VoiceOwner,
    ) -> Result<Acquired, SynthError> {
        self.acquire_excluding(host, timers, key, owner, &[])
    }

    /// `acquire`, never reclaiming one of the `taken` slots.
    fn acquire_excluding<H: AudioHost, T>(
        &mut self,
        host: &mut H,
        timers: &mut TimerQueue<T>,
        key: &str,
        owner: VoiceOwner,
        taken: &[usize],
    ) -> Result<Acquired, SynthError> {
        let Some(voices) = self.slots.get_mut(key) else {
            return Err(SynthError::NoFreeVoice {
                key: key.to_string(),
            });
        };

        let oldest_in = |state: VoiceState| {
            voices
                .iter()
                .enumerate()
                .filter(|(i, _)| !taken.contains(i))
                .filter(|(_, v)| v.state() == state)
                .filter(|(_, v)| v.owner().is_some_and(|o| o.same_domain(&owner)))
                .min_by_key(|(_, v)| v.age())
                .map(|(i, _)| i)
        };

        let slot = voices
            .iter()
            .position(|v| !v.is_busy())
            .or_else(|| oldest_in(VoiceState::Releasing))
            .or_else(|| oldest_in(VoiceState::Sounding));

        let Some(slot) = slot else {
            log::warn!("no stealable voice for key {key:?}; note dropped");
            return Err(SynthError::NoFreeVoice {
                key: key.to_string(),
            });
        };

        self.clock += 1;
        let voice = &mut voices[slot];
        let stolen_from = if voice.is_busy() { voice.owner() } else { None };
        if let Some(timer) = voice.take_cleanup() {
            timers.cancel(timer);
        }
        if stolen_from.is_some() {
            log::debug!("stealing voice {key}:{slot} from {stolen_from:?}");
            voice.reset(host);
        }
        voice.claim(key, owner, self.clock);

        Ok(Acquired {
            id: VoiceId::new(key, slot),
            stolen_from,
        })
    }

    /// Wire the voice for `waveform` at `frequency`, detuned for its place in
    /// a unison stack.
    #[allow(clippy::too_many_arguments)]
    pub fn configure<H: AudioHost>(
        &mut self,
        host: &mut H,
        id: &VoiceId,
        waveform: WaveformKind,
        frequency: f64,
        unison_index: usize,
        unison_count: usize,
        detune_cents: f64,
    ) {
        let tables = self.tables;
        let modulation = self.modulation;
        let Some(voice) = self.voice_mut(id) else {
            return;
        };
        let cents = detune_offset(unison_index, unison_count, detune_cents);
        voice.rewire(host, waveform, detuned(frequency, cents), &tables, &modulation);
    }

    /// Ramp the voice up to `target_gain`. A pending cleanup is cancelled and
    /// the voice keeps sounding without a gap.
    pub fn trigger<H: AudioHost, T>(
        &mut self,
        host: &mut H,
        timers: &mut TimerQueue<T>,
        id: &VoiceId,
        target_gain: f64,
        attack: f64,
    ) {
        let Some(voice) = self.voice_mut(id) else {
            return;
        };
        if let Some(timer) = voice.take_cleanup() {
            timers.cancel(timer);
        }
        voice.mark_sounding();
        envelope::trigger(host, voice.amp(), target_gain, attack);
    }

    /// Start the release ramp for a voice still owned by `owner` and schedule
    /// its cleanup. Returns the cleanup handle, or `None` when the voice has
    /// since been claimed by someone else.
    pub fn release<H: AudioHost, T: From<VoiceId>>(
        &mut self,
        host: &mut H,
        timers: &mut TimerQueue<T>,
        id: &VoiceId,
        owner: VoiceOwner,
        release: f64,
    ) -> Option<TimerId> {
        let floor = self.release_floor;
        let margin = self.cleanup_margin;
        let voice = self.voice_mut(id)?;
        if voice.owner() != Some(owner) || voice.state() != VoiceState::Sounding {
            return None;
        }
        // Cleanup is due on the audio clock, after the ramp has ended.
        let ends = envelope::release(host, voice.amp(), release, floor);
        let timer = timers.schedule_at(ends + margin, T::from(id.clone()));
        voice.begin_release(timer);
        Some(timer)
    }

    /// Deferred cleanup after a release ramp. Ignored if the voice was
    /// retriggered or reclaimed since.
    pub fn cleanup<H: AudioHost>(&mut self, host: &mut H, id: &VoiceId, timer: TimerId) -> bool {
        let Some(voice) = self.voice_mut(id) else {
            return false;
        };
        if voice.pending_cleanup() != Some(timer) {
            return false;
        }
        voice.reset(host);
        true
    }

    /// Cut a voice owned by `owner` to silence immediately and free it.
    pub fn hard_stop<H: AudioHost, T>(
        &mut self,
        host: &mut H,
        timers: &mut TimerQueue<T>,
        id: &VoiceId,
        owner: VoiceOwner,
    ) -> bool {
        let Some(voice) = self.voice_mut(id) else {
            return false;
        };
        if voice.owner() != Some(owner) {
            return false;
        }
        if let Some(timer) = voice.take_cleanup() {
            timers.cancel(timer);
        }
        voice.reset(host);
        true
    }

    /// Hard-stop every busy voice matching `pred`. Returns how many stopped.
    pub fn hard_stop_where<H: AudioHost, T>(
        &mut self,
        host: &mut H,
        timers: &mut TimerQueue<T>,
        pred: impl Fn(&Voice) -> bool,
    ) -> usize {
        let mut stopped = 0;
        for voices in self.slots.values_mut() {
            for voice in voices.iter_mut().filter(|v| v.is_busy() && pred(v)) {
                if let Some(timer) = voice.take_cleanup() {
                    timers.cancel(timer);
                }
                voice.reset(host);
                stopped += 1;
            }
        }
        stopped
    }

    /// Acquire, configure and trigger one unison stack for `key`. When the
    /// key cannot supply every voice the stack is spread and balanced over
    /// the voices it did get.
    pub fn start_note<H: AudioHost, T>(
        &mut self,
        host: &mut H,
        timers: &mut TimerQueue<T>,
        key: &str,
        owner: VoiceOwner,
        spec: &NoteSpec,
    ) -> Vec<VoiceId> {
        let wanted = spec.unison.clamp(1, self.capacity);
        let mut ids: Vec<VoiceId> = Vec::with_capacity(wanted);
        let mut taken = Vec::with_capacity(wanted);
        while ids.len() < wanted {
            match self.acquire_excluding(host, timers, key, owner, &taken) {
                Ok(acquired) => {
                    taken.push(acquired.id.slot);
                    ids.push(acquired.id);
                }
                Err(e) => {
                    log::warn!("{e}");
                    break;
                }
            }
        }

        let count = ids.len();
        if count > 0 && count < wanted {
            log::debug!("unison on {key:?} reduced to {count} of {wanted} voices");
        }
        let gain = unison_gain(spec.volume, count);
        for (i, id) in ids.iter().enumerate() {
            self.configure(
                host,
                id,
                spec.waveform,
                spec.frequency,
                i,
                count,
                spec.detune_cents,
            );
            self.trigger(host, timers, id, gain, spec.attack);
        }
        ids
    }

    /// Stop every generator and detach every node.
    pub fn teardown<H: AudioHost, T>(&mut self, host: &mut H, timers: &mut TimerQueue<T>) {
        let mix_input = self.mix_input;
        for voices in self.slots.values_mut() {
            for voice in voices.iter_mut() {
                if let Some(timer) = voice.take_cleanup() {
                    timers.cancel(timer);
                }
                voice.destroy(host, mix_input);
            }
        }
        log::debug!("voice pool torn down");
    }
}
