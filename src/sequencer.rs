//! Recording live notes into a `Sequence` and replaying it on a loop.
//!
//! Recording timestamps come from the audio clock. Playback is driven by the
//! timer queue: each pass schedules a play and a release task per event and
//! one loop task after the last release tail has died away. Every task is
//! due at an absolute audio time measured from the start of its pass.

use std::collections::BTreeMap;

use crate::dsp::waveform::WaveformKind;
use crate::sequence::{NoteEvent, Sequence};
use crate::timer::{TimerId, TimerQueue};

/// Identity of one scheduled note: the loop pass and the event's index in
/// that pass's snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlaybackNoteId {
    pub pass: u64,
    pub index: usize,
}

/// Deferred work the player puts on the timer queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackTask {
    Play(PlaybackNoteId),
    Release(PlaybackNoteId),
    Loop { pass: u64 },
}

#[derive(Debug, Clone, Copy)]
struct Capture {
    waveform: WaveformKind,
    volume: f64,
    octave_shift: i32,
    started: f64,
}

/// Captures sounding live keys as note events.
#[derive(Debug, Clone)]
pub struct Recorder {
    recording: bool,
    origin: f64,
    min_duration: f64,
    open: BTreeMap<String, Capture>,
    captured: Sequence,
}

impl Recorder {
    pub fn new(min_duration: f64) -> Self {
        Recorder {
            recording: false,
            origin: 0.0,
            min_duration,
            open: BTreeMap::new(),
            captured: Sequence::new(),
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Begin a take at audio time `now`. Anything captured before is dropped.
    pub fn start(&mut self, now: f64) {
        self.recording = true;
        self.origin = now;
        self.open.clear();
        self.captured.clear();
        log::info!("recording started at {now:.3}");
    }

    /// A key started sounding. Restarting an open key closes its previous
    /// capture first.
    pub fn note_started(
        &mut self,
        key: &str,
        waveform: WaveformKind,
        volume: f64,
        octave_shift: i32,
        now: f64,
    ) {
        if !self.recording {
            return;
        }
        self.note_ended(key, now);
        self.open.insert(
            key.to_string(),
            Capture {
                waveform,
                volume,
                octave_shift,
                started: now,
            },
        );
    }

    /// A key was released. Returns the event if the note was long enough to
    /// keep.
    pub fn note_ended(&mut self, key: &str, now: f64) -> Option<NoteEvent> {
        let capture = self.open.remove(key)?;
        self.close(key, capture, now)
    }

    fn close(&mut self, key: &str, capture: Capture, now: f64) -> Option<NoteEvent> {
        let duration = now - capture.started;
        if duration <= self.min_duration {
            log::debug!("ignoring {duration:.3}s tap on {key:?}");
            return None;
        }
        let event = NoteEvent {
            key: key.to_string(),
            start_time: (capture.started - self.origin).max(0.0),
            duration,
            waveform: capture.waveform,
            volume: capture.volume,
            octave_shift: capture.octave_shift,
        };
        self.captured.insert(event.clone());
        Some(event)
    }

    /// End the take. Keys still down are captured up to `now`.
    pub fn stop(&mut self, now: f64) -> Sequence {
        let open = std::mem::take(&mut self.open);
        for (key, capture) in open {
            self.close(&key, capture, now);
        }
        self.recording = false;
        log::info!("recording stopped: {} events", self.captured.len());
        std::mem::take(&mut self.captured)
    }
}

/// Replays a snapshot of a sequence until stopped.
#[derive(Debug, Clone)]
pub struct Player {
    playing: bool,
    pass: u64,
    snapshot: Sequence,
    timers: Vec<TimerId>,
    /// Audio time the current pass started at.
    origin: f64,
    /// Audio time the current pass's loop task is due.
    next_pass: f64,
    release: f64,
    guard: f64,
}

impl Player {
    /// `release` is the tail after each note; `guard` the silence added
    /// before the next pass.
    pub fn new(release: f64, guard: f64) -> Self {
        Player {
            playing: false,
            pass: 0,
            snapshot: Sequence::new(),
            timers: Vec::new(),
            origin: 0.0,
            next_pass: 0.0,
            release,
            guard,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn pass(&self) -> u64 {
        self.pass
    }

    pub fn set_release(&mut self, release: f64) {
        self.release = release;
    }

    /// Time from the start of a pass to the start of the next.
    pub fn loop_period(&self) -> f64 {
        self.snapshot.end_time() + self.release + self.guard
    }

    /// Event behind a scheduled note, if it belongs to the current pass.
    pub fn event(&self, id: PlaybackNoteId) -> Option<&NoteEvent> {
        if !self.playing || id.pass != self.pass {
            return None;
        }
        self.snapshot.events().get(id.index)
    }

    /// True when the scheduled note would already have ended by `now`, so
    /// starting it would only click.
    pub fn is_over(&self, id: PlaybackNoteId, now: f64) -> bool {
        self.event(id)
            .is_none_or(|event| self.origin + event.end_time() <= now)
    }

    /// Start looping `sequence` with the first pass at audio time `now`.
    /// Does nothing and returns false when it is empty.
    pub fn start<T: From<PlaybackTask>>(
        &mut self,
        sequence: &Sequence,
        now: f64,
        timers: &mut TimerQueue<T>,
    ) -> bool {
        if sequence.is_empty() {
            log::debug!("playback requested for an empty sequence");
            return false;
        }
        self.cancel_pending(timers);
        self.snapshot = sequence.clone();
        self.playing = true;
        self.schedule_pass(now, timers);
        log::info!(
            "playback started: {} events, loop every {:.3}s",
            self.snapshot.len(),
            self.loop_period()
        );
        true
    }

    fn schedule_pass<T: From<PlaybackTask>>(&mut self, origin: f64, timers: &mut TimerQueue<T>) {
        self.pass += 1;
        self.timers.clear();
        self.origin = origin;
        let pass = self.pass;
        for (index, event) in self.snapshot.events().iter().enumerate() {
            let id = PlaybackNoteId { pass, index };
            let play = timers.schedule_at(origin + event.start_time, PlaybackTask::Play(id).into());
            let release =
                timers.schedule_at(origin + event.end_time(), PlaybackTask::Release(id).into());
            self.timers.extend([play, release]);
        }
        self.next_pass = origin + self.loop_period();
        self.timers
            .push(timers.schedule_at(self.next_pass, PlaybackTask::Loop { pass }.into()));
    }

    /// Loop task fired at audio time `now`. Reschedules and returns true if
    /// playback is still on and the task is from the current pass.
    ///
    /// The next pass starts where the last one ended. If `now` is a whole
    /// period or more past that point the missed passes are dropped and the
    /// next pass starts at `now`.
    pub fn on_loop<T: From<PlaybackTask>>(
        &mut self,
        pass: u64,
        now: f64,
        timers: &mut TimerQueue<T>,
    ) -> bool {
        if !self.playing || pass != self.pass {
            return false;
        }
        let due = self.next_pass;
        let period = self.loop_period();
        let origin = if now - due >= period {
            log::debug!(
                "playback {:.3}s behind; skipping {} passes",
                now - due,
                ((now - due) / period).floor()
            );
            now
        } else {
            due
        };
        self.schedule_pass(origin, timers);
        log::debug!("playback loop, pass {}", self.pass);
        true
    }

    /// Cancel every outstanding task. Returns whether playback was on.
    pub fn stop<T>(&mut self, timers: &mut TimerQueue<T>) -> bool {
        let was_playing = self.playing;
        self.cancel_pending(timers);
        self.playing = false;
        if was_playing {
            log::info!("playback stopped");
        }
        was_playing
    }

    fn cancel_pending<T>(&mut self, timers: &mut TimerQueue<T>) {
        for id in self.timers.drain(..) {
            timers.cancel(id);
        }
    }
}
