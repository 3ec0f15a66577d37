//! Recorded note events and the sequence file format.
//!
//! A sequence file is a JSON array of note events wrapped in `//` comment
//! lines:
//!
//! ```text
//! // keysynth sequence v1
//! // startTime and duration are in seconds; volume is 0-1.
//! [
//!   { "key": "q", "startTime": 0.0, "duration": 0.5, "waveform": "sine",
//!     "volume": 0.8, "octaveShift": 0 }
//! ]
//! // end of sequence
//! ```
//!
//! Line comments are stripped before the body is parsed, so hand-edited
//! files may carry their own notes.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::config::MAX_OCTAVE_SHIFT;
use crate::dsp::waveform::WaveformKind;
use crate::error::{SequenceError, offset_of};
use crate::keymap::KeyFrequencyMap;

pub const HEADER: &str =
    "// keysynth sequence v1\n// startTime and duration are in seconds; volume is 0-1.\n";
pub const FOOTER: &str = "// end of sequence\n";

fn default_volume() -> f64 {
    0.8
}

/// One captured note. Times are seconds from the start of the sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteEvent {
    pub key: String,
    pub start_time: f64,
    pub duration: f64,
    #[serde(default)]
    pub waveform: WaveformKind,
    #[serde(default = "default_volume")]
    pub volume: f64,
    #[serde(default)]
    pub octave_shift: i32,
}

impl NoteEvent {
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }

    /// Check every field. Returns a user-facing message on failure.
    pub fn validate(&self, keymap: &KeyFrequencyMap) -> Result<(), String> {
        if !keymap.contains(&self.key) {
            return Err(format!("unknown key {:?}", self.key));
        }
        if !self.start_time.is_finite() || self.start_time < 0.0 {
            return Err(format!(
                "startTime must be a non-negative number, got {}",
                self.start_time
            ));
        }
        if !self.duration.is_finite() || self.duration <= 0.0 {
            return Err(format!(
                "duration must be a positive number, got {}",
                self.duration
            ));
        }
        if !self.volume.is_finite() || !(0.0..=1.0).contains(&self.volume) {
            return Err(format!("volume must be between 0 and 1, got {}", self.volume));
        }
        if self.octave_shift.abs() > MAX_OCTAVE_SHIFT {
            return Err(format!(
                "octaveShift must be within -{MAX_OCTAVE_SHIFT}..={MAX_OCTAVE_SHIFT}, got {}",
                self.octave_shift
            ));
        }
        Ok(())
    }
}

/// Note events ordered by start time. Events starting together keep their
/// insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sequence {
    events: Vec<NoteEvent>,
}

impl Sequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_events(mut events: Vec<NoteEvent>) -> Self {
        events.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
        Sequence { events }
    }

    pub fn events(&self) -> &[NoteEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Insert keeping start-time order. Returns the index it landed at.
    pub fn insert(&mut self, event: NoteEvent) -> usize {
        let at = self
            .events
            .partition_point(|e| e.start_time <= event.start_time);
        self.events.insert(at, event);
        at
    }

    pub fn remove(&mut self, index: usize) -> Option<NoteEvent> {
        (index < self.events.len()).then(|| self.events.remove(index))
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Latest end time over every event; 0 for an empty sequence.
    pub fn end_time(&self) -> f64 {
        self.events
            .iter()
            .map(NoteEvent::end_time)
            .fold(0.0, f64::max)
    }

    /// Bare JSON array of the events.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(&self.events).unwrap_or_else(|_| "[]".to_string())
    }

    /// File text: header, JSON body, footer.
    pub fn to_text(&self) -> String {
        format!("{HEADER}{}\n{FOOTER}", self.to_json())
    }

    /// Parse file text (or a bare JSON array). Every event is validated
    /// against `keymap`; nothing is returned unless all of them pass.
    pub fn parse_text(text: &str, keymap: &KeyFrequencyMap) -> Result<Self, SequenceError> {
        let body = strip_line_comments(text);
        if body.trim().is_empty() {
            return Err(SequenceError::new("no sequence data found", 0..text.len()));
        }

        let events: Vec<NoteEvent> = serde_json::from_str(&body).map_err(|e| {
            let at = offset_of(text, e.line(), e.column());
            SequenceError::new(e.to_string(), at..at + 1)
        })?;

        let spans = element_spans(&body);
        for (i, event) in events.iter().enumerate() {
            if let Err(message) = event.validate(keymap) {
                let span = spans.get(i).cloned().unwrap_or(0..text.len());
                return Err(SequenceError::new(
                    format!("event {}: {message}", i + 1),
                    span,
                ));
            }
        }
        Ok(Sequence::from_events(events))
    }
}

/// Blank out `//` line comments, leaving string contents alone. Byte offsets
/// are preserved so parse errors still point into the original text.
pub fn strip_line_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;
    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '/' if chars.peek() == Some(&'/') => {
                out.push(' ');
                while let Some(&next) = chars.peek() {
                    if next == '\n' {
                        break;
                    }
                    out.extend(std::iter::repeat_n(' ', next.len_utf8()));
                    chars.next();
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// Byte ranges of the top-level array's elements.
fn element_spans(body: &str) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in body.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '[' | '{' => {
                if depth == 1 {
                    start = Some(i);
                }
                depth += 1;
            }
            ']' | '}' => {
                depth = depth.saturating_sub(1);
                if depth == 1 {
                    if let Some(s) = start.take() {
                        spans.push(s..i + 1);
                    }
                }
            }
            _ => {}
        }
    }
    spans
}
