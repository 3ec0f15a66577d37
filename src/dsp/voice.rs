//! Voice: one reusable signal chain (carrier, modulator, envelope gain).

use crate::config::ModulationConfig;
use crate::host::{AudioHost, Connection, Endpoint, GeneratorShape, NodeId, ParamRef};
use crate::sequencer::PlaybackNoteId;
use crate::timer::TimerId;

use super::envelope;
use super::waveform::{VoiceNodes, WaveTables, WaveformKind};

/// Where a voice is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    /// Silent and available.
    Free,
    /// Triggered and held.
    Sounding,
    /// Release ramp running; freed when the cleanup task fires.
    Releasing,
}

/// Which input domain a busy voice belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoiceOwner {
    Live,
    Playback(PlaybackNoteId),
}

impl VoiceOwner {
    /// Live and playback voices never steal from each other.
    pub fn same_domain(&self, other: &VoiceOwner) -> bool {
        matches!(
            (self, other),
            (VoiceOwner::Live, VoiceOwner::Live) | (VoiceOwner::Playback(_), VoiceOwner::Playback(_))
        )
    }
}

/// Slot address of a voice: the key's slot list and the index in it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VoiceId {
    pub key: String,
    pub slot: usize,
}

impl VoiceId {
    pub fn new(key: impl Into<String>, slot: usize) -> Self {
        VoiceId {
            key: key.into(),
            slot,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Voice {
    pub(crate) nodes: VoiceNodes,
    state: VoiceState,
    owner: Option<VoiceOwner>,
    owner_key: Option<String>,
    pending_cleanup: Option<TimerId>,
    waveform: WaveformKind,
    /// Edges made by the current waveform wiring.
    wiring: Vec<Connection>,
    /// Acquisition stamp; lower is older.
    age: u64,
}

impl Voice {
    /// Create the voice's nodes, start its generators silent, and connect the
    /// envelope gain to `mix_input`.
    pub fn build<H: AudioHost>(host: &mut H, mix_input: NodeId) -> Self {
        let now = host.current_time();
        let nodes = VoiceNodes {
            carrier: host.create_generator(GeneratorShape::Sine),
            modulator: host.create_generator(GeneratorShape::Sine),
            depth: host.create_gain(),
            shaper: host.create_gain(),
            amp: host.create_gain(),
        };
        host.set_value_at(ParamRef::gain(nodes.amp), 0.0, now);
        host.connect(nodes.amp, Endpoint::Node(mix_input));
        host.start(nodes.carrier, now);
        host.start(nodes.modulator, now);
        Voice {
            nodes,
            state: VoiceState::Free,
            owner: None,
            owner_key: None,
            pending_cleanup: None,
            waveform: WaveformKind::Sine,
            wiring: Vec::new(),
            age: 0,
        }
    }

    pub fn state(&self) -> VoiceState {
        self.state
    }

    pub fn is_busy(&self) -> bool {
        self.state != VoiceState::Free
    }

    pub fn owner(&self) -> Option<VoiceOwner> {
        self.owner
    }

    pub fn owner_key(&self) -> Option<&str> {
        self.owner_key.as_deref()
    }

    pub fn is_playback_owned(&self) -> bool {
        matches!(self.owner, Some(VoiceOwner::Playback(_)))
    }

    pub fn pending_cleanup(&self) -> Option<TimerId> {
        self.pending_cleanup
    }

    pub fn waveform(&self) -> WaveformKind {
        self.waveform
    }

    pub fn wiring(&self) -> &[Connection] {
        &self.wiring
    }

    pub fn age(&self) -> u64 {
        self.age
    }

    pub fn amp(&self) -> ParamRef {
        ParamRef::gain(self.nodes.amp)
    }

    /// Mark busy for `owner`. Caller has already cancelled any cleanup.
    pub(crate) fn claim(&mut self, key: &str, owner: VoiceOwner, age: u64) {
        self.state = VoiceState::Sounding;
        self.owner = Some(owner);
        self.owner_key = Some(key.to_string());
        self.pending_cleanup = None;
        self.age = age;
    }

    pub(crate) fn take_cleanup(&mut self) -> Option<TimerId> {
        self.pending_cleanup.take()
    }

    pub(crate) fn begin_release(&mut self, cleanup: TimerId) {
        self.state = VoiceState::Releasing;
        self.pending_cleanup = Some(cleanup);
    }

    pub(crate) fn mark_sounding(&mut self) {
        self.state = VoiceState::Sounding;
    }

    /// Replace the waveform wiring.
    pub(crate) fn rewire<H: AudioHost>(
        &mut self,
        host: &mut H,
        waveform: WaveformKind,
        frequency: f64,
        tables: &WaveTables,
        modulation: &ModulationConfig,
    ) {
        self.unwire(host);
        let now = host.current_time();
        self.wiring = waveform
            .algorithm()
            .wire(host, &self.nodes, frequency, tables, modulation, now);
        self.waveform = waveform;
    }

    pub(crate) fn unwire<H: AudioHost>(&mut self, host: &mut H) {
        for c in self.wiring.drain(..) {
            c.undo(host);
        }
    }

    /// Silence now, drop auxiliary wiring and return to the free list.
    pub(crate) fn reset<H: AudioHost>(&mut self, host: &mut H) {
        envelope::silence(host, self.amp());
        self.unwire(host);
        self.state = VoiceState::Free;
        self.owner = None;
        self.owner_key = None;
        self.pending_cleanup = None;
    }

    /// Stop generators and detach every node.
    pub(crate) fn destroy<H: AudioHost>(&mut self, host: &mut H, mix_input: NodeId) {
        let now = host.current_time();
        self.reset(host);
        host.stop(self.nodes.carrier, now);
        host.stop(self.nodes.modulator, now);
        host.disconnect(self.nodes.amp, Endpoint::Node(mix_input));
    }
}
