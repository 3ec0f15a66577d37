//! Raw keyboard, pointer and touch events, and what they mean to the synth.
//!
//! The embedding UI resolves which on-screen key sits under a pointer or touch
//! point; this module only decides what the event does.

use serde::{Deserialize, Serialize};

use crate::keymap::KeyFrequencyMap;
use crate::notes::PointerId;

/// The physical key code that works the sustain pedal.
pub const SUSTAIN_CODE: &str = "Space";

/// A key-down or key-up event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KeyInput {
    /// Produced character, e.g. `"q"`.
    pub key: String,
    /// Physical key code, e.g. `"KeyQ"` or `"Space"`.
    pub code: String,
    pub repeat: bool,
    pub meta: bool,
    pub ctrl: bool,
    pub alt: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyAction {
    Note(String),
    Sustain,
    Ignore,
}

impl KeyInput {
    pub fn new(key: &str) -> Self {
        KeyInput {
            key: key.to_string(),
            ..Self::default()
        }
    }

    pub fn sustain() -> Self {
        KeyInput {
            key: " ".to_string(),
            code: SUSTAIN_CODE.to_string(),
            ..Self::default()
        }
    }

    /// Auto-repeats and modifier chords are ignored. Note keys are matched
    /// case-insensitively.
    pub fn action(&self, keymap: &KeyFrequencyMap) -> KeyAction {
        if self.repeat {
            return KeyAction::Ignore;
        }
        if self.code == SUSTAIN_CODE {
            return KeyAction::Sustain;
        }
        if self.meta || self.ctrl || self.alt {
            return KeyAction::Ignore;
        }
        match normalize_key(&self.key, keymap) {
            Some(key) => KeyAction::Note(key),
            None => KeyAction::Ignore,
        }
    }
}

/// Lowercased key if it is mapped.
pub fn normalize_key(key: &str, keymap: &KeyFrequencyMap) -> Option<String> {
    let key = key.to_lowercase();
    keymap.contains(&key).then_some(key)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointerPhase {
    Down,
    Move,
    Up,
    Cancel,
}

/// A mouse or pen event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PointerInput {
    pub pointer_id: PointerId,
    /// Pressed-button bitmask; 0 when nothing is pressed.
    pub buttons: u16,
    /// On-screen key under the pointer.
    pub key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TouchPhase {
    Start,
    Move,
    End,
    Cancel,
}

/// One changed touch point.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TouchPoint {
    pub identifier: PointerId,
    pub key: Option<String>,
}

/// A drag step for `KeyboardState`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DragAction {
    Down(PointerId, Option<String>),
    Move(PointerId, Option<String>),
    Up(PointerId),
}

impl PointerInput {
    /// A move with no buttons pressed ends the drag; the button was let go
    /// somewhere the up event could not be seen.
    pub fn action(&self, phase: PointerPhase, keymap: &KeyFrequencyMap) -> DragAction {
        let key = self.key.as_deref().and_then(|k| normalize_key(k, keymap));
        match phase {
            PointerPhase::Down => DragAction::Down(self.pointer_id, key),
            PointerPhase::Move if self.buttons == 0 => DragAction::Up(self.pointer_id),
            PointerPhase::Move => DragAction::Move(self.pointer_id, key),
            PointerPhase::Up | PointerPhase::Cancel => DragAction::Up(self.pointer_id),
        }
    }
}

/// Each changed touch point acts as its own pointer.
pub fn touch_actions(
    phase: TouchPhase,
    points: &[TouchPoint],
    keymap: &KeyFrequencyMap,
) -> Vec<DragAction> {
    points
        .iter()
        .map(|p| {
            let key = p.key.as_deref().and_then(|k| normalize_key(k, keymap));
            match phase {
                TouchPhase::Start => DragAction::Down(p.identifier, key),
                TouchPhase::Move => DragAction::Move(p.identifier, key),
                TouchPhase::End | TouchPhase::Cancel => DragAction::Up(p.identifier),
            }
        })
        .collect()
}
