//! Per-key note state: held keys, the sustain pedal and pointer drags.
//!
//! `KeyboardState` is a pure state machine. It answers each input with the
//! `NoteCommand`s the engine should carry out and never touches audio itself.
//! `ActiveNotes` remembers which voices each sounding note was given.

use std::collections::{BTreeSet, HashMap};

use crate::dsp::voice::VoiceId;
use crate::sequencer::PlaybackNoteId;

/// Pointer or touch identifier, as reported by the input source.
pub type PointerId = i32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoteCommand {
    /// Start voices for a key that is not sounding.
    Start(String),
    /// Hard-cut the key's voices, then start it again.
    Retrigger(String),
    /// Release the key's voices with the normal fade.
    Release(String),
}

/// Keys sounding from live input and why they are still sounding.
#[derive(Debug, Clone, Default)]
pub struct KeyboardState {
    held: BTreeSet<String>,
    sustained: BTreeSet<String>,
    /// Key under each pressed pointer; `None` while off the keyboard.
    dragged: HashMap<PointerId, Option<String>>,
    sustain: bool,
    sounding: BTreeSet<String>,
}

impl KeyboardState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_sounding(&self, key: &str) -> bool {
        self.sounding.contains(key)
    }

    pub fn is_held(&self, key: &str) -> bool {
        self.held.contains(key)
    }

    pub fn is_sustained(&self, key: &str) -> bool {
        self.sustained.contains(key)
    }

    pub fn sustain_engaged(&self) -> bool {
        self.sustain
    }

    pub fn sounding(&self) -> impl Iterator<Item = &str> {
        self.sounding.iter().map(String::as_str)
    }

    /// Key currently under `pointer`, if it is pressed over one.
    pub fn dragged_key(&self, pointer: PointerId) -> Option<&str> {
        self.dragged.get(&pointer).and_then(|k| k.as_deref())
    }

    fn is_dragged(&self, key: &str) -> bool {
        self.dragged.values().any(|k| k.as_deref() == Some(key))
    }

    /// Whether a key is still wanted by a physical key, a pointer or the
    /// sustain pedal.
    pub fn is_wanted(&self, key: &str) -> bool {
        self.held.contains(key) || self.is_dragged(key) || self.sustained.contains(key)
    }

    fn start(&mut self, key: &str) -> NoteCommand {
        if self.sustain {
            self.sustained.insert(key.to_string());
        }
        if self.sounding.insert(key.to_string()) {
            NoteCommand::Start(key.to_string())
        } else {
            NoteCommand::Retrigger(key.to_string())
        }
    }

    /// A source let go of `key`. Releases it unless another source or the
    /// pedal still holds it.
    fn let_go(&mut self, key: &str) -> Option<NoteCommand> {
        if self.held.contains(key) || self.is_dragged(key) {
            return None;
        }
        if self.sustain {
            if self.sounding.contains(key) {
                self.sustained.insert(key.to_string());
            }
            return None;
        }
        self.sustained.remove(key);
        self.sounding
            .remove(key)
            .then(|| NoteCommand::Release(key.to_string()))
    }

    pub fn key_down(&mut self, key: &str) -> NoteCommand {
        self.held.insert(key.to_string());
        self.start(key)
    }

    pub fn key_up(&mut self, key: &str) -> Option<NoteCommand> {
        if !self.held.remove(key) {
            return None;
        }
        self.let_go(key)
    }

    /// Pedal down: every sounding key becomes sustained.
    pub fn sustain_down(&mut self) {
        self.sustain = true;
        self.sustained.extend(self.sounding.iter().cloned());
    }

    /// Pedal up: sustained keys nobody holds are released.
    pub fn sustain_up(&mut self) -> Vec<NoteCommand> {
        self.sustain = false;
        let sustained = std::mem::take(&mut self.sustained);
        sustained
            .iter()
            .filter_map(|key| self.let_go(key))
            .collect()
    }

    /// Pointer pressed, over `key` or off the keyboard.
    pub fn pointer_down(&mut self, pointer: PointerId, key: Option<&str>) -> Vec<NoteCommand> {
        let mut commands = self.pointer_up(pointer);
        self.dragged.insert(pointer, key.map(str::to_string));
        if let Some(key) = key {
            commands.push(self.start(key));
        }
        commands
    }

    /// Pointer moved while pressed. Entering a new key releases the previous
    /// one and starts the new one. Moves of unpressed pointers are ignored.
    pub fn pointer_move(&mut self, pointer: PointerId, key: Option<&str>) -> Vec<NoteCommand> {
        let Some(current) = self.dragged.get(&pointer) else {
            return Vec::new();
        };
        if current.as_deref() == key {
            return Vec::new();
        }
        let previous = self.dragged.insert(pointer, key.map(str::to_string)).flatten();
        let mut commands = Vec::new();
        if let Some(previous) = previous {
            commands.extend(self.let_go(&previous));
        }
        if let Some(key) = key {
            commands.push(self.start(key));
        }
        commands
    }

    /// Pointer released or touch ended/cancelled.
    pub fn pointer_up(&mut self, pointer: PointerId) -> Vec<NoteCommand> {
        match self.dragged.remove(&pointer).flatten() {
            Some(key) => self.let_go(&key).into_iter().collect(),
            None => Vec::new(),
        }
    }

    /// Forget everything. Returns the keys that were sounding.
    pub fn panic(&mut self) -> Vec<String> {
        self.held.clear();
        self.sustained.clear();
        self.dragged.clear();
        self.sustain = false;
        std::mem::take(&mut self.sounding).into_iter().collect()
    }
}

/// Voices handed out to each sounding note.
#[derive(Debug, Clone, Default)]
pub struct ActiveNotes {
    live: HashMap<String, Vec<VoiceId>>,
    playback: HashMap<PlaybackNoteId, Vec<VoiceId>>,
}

impl ActiveNotes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live(&self, key: &str) -> &[VoiceId] {
        self.live.get(key).map_or(&[], Vec::as_slice)
    }

    pub fn set_live(&mut self, key: &str, voices: Vec<VoiceId>) {
        if voices.is_empty() {
            self.live.remove(key);
        } else {
            self.live.insert(key.to_string(), voices);
        }
    }

    pub fn take_live(&mut self, key: &str) -> Vec<VoiceId> {
        self.live.remove(key).unwrap_or_default()
    }

    pub fn drain_live(&mut self) -> Vec<(String, Vec<VoiceId>)> {
        self.live.drain().collect()
    }

    pub fn set_playback(&mut self, id: PlaybackNoteId, voices: Vec<VoiceId>) {
        if !voices.is_empty() {
            self.playback.insert(id, voices);
        }
    }

    pub fn take_playback(&mut self, id: PlaybackNoteId) -> Vec<VoiceId> {
        self.playback.remove(&id).unwrap_or_default()
    }

    pub fn drain_playback(&mut self) -> Vec<(PlaybackNoteId, Vec<VoiceId>)> {
        self.playback.drain().collect()
    }

    pub fn playback_len(&self) -> usize {
        self.playback.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start(k: &str) -> NoteCommand {
        NoteCommand::Start(k.to_string())
    }

    fn release(k: &str) -> NoteCommand {
        NoteCommand::Release(k.to_string())
    }

    #[test]
    fn press_and_release() {
        let mut kb = KeyboardState::new();
        assert_eq!(kb.key_down("q"), start("q"));
        assert!(kb.is_sounding("q") && kb.is_held("q"));
        assert_eq!(kb.key_up("q"), Some(release("q")));
        assert!(!kb.is_sounding("q"));
        assert_eq!(kb.key_up("q"), None, "second key-up is ignored");
    }

    #[test]
    fn sustain_holds_until_pedal_up() {
        let mut kb = KeyboardState::new();
        kb.key_down("q");
        kb.sustain_down();
        assert!(kb.is_sustained("q"));
        assert_eq!(kb.key_up("q"), None);
        assert!(kb.is_sounding("q"));
        assert_eq!(kb.sustain_up(), vec![release("q")]);
        assert!(!kb.is_sounding("q"));
        assert!(!kb.is_sustained("q"));
    }

    #[test]
    fn sustain_keeps_held_keys_sounding() {
        let mut kb = KeyboardState::new();
        kb.key_down("q");
        kb.key_down("w");
        kb.sustain_down();
        kb.key_up("w");
        assert_eq!(kb.sustain_up(), vec![release("w")]);
        assert!(kb.is_sounding("q"), "still physically held");
        assert_eq!(kb.key_up("q"), Some(release("q")));
    }

    #[test]
    fn key_pressed_under_sustain_is_sustained() {
        let mut kb = KeyboardState::new();
        kb.sustain_down();
        kb.key_down("e");
        assert!(kb.is_sustained("e"));
        kb.key_up("e");
        assert!(kb.is_sounding("e"));
        assert_eq!(kb.sustain_up(), vec![release("e")]);
    }

    #[test]
    fn sustain_only_covers_sounding_keys() {
        let mut kb = KeyboardState::new();
        kb.key_down("q");
        kb.key_up("q");
        kb.sustain_down();
        assert!(!kb.is_sustained("q"));
        assert!(kb.sustain_up().is_empty());
    }

    #[test]
    fn repress_while_sounding_retriggers() {
        let mut kb = KeyboardState::new();
        kb.sustain_down();
        kb.key_down("q");
        kb.key_up("q");
        assert_eq!(kb.key_down("q"), NoteCommand::Retrigger("q".into()));
    }

    #[test]
    fn drag_legato() {
        let mut kb = KeyboardState::new();
        assert_eq!(kb.pointer_down(1, Some("q")), vec![start("q")]);
        assert!(kb.pointer_move(1, Some("q")).is_empty());
        assert_eq!(
            kb.pointer_move(1, Some("w")),
            vec![release("q"), start("w")]
        );
        assert_eq!(kb.dragged_key(1), Some("w"));
        assert_eq!(kb.pointer_move(1, None), vec![release("w")]);
        assert_eq!(kb.pointer_move(1, Some("e")), vec![start("e")]);
        assert_eq!(kb.pointer_up(1), vec![release("e")]);
        assert!(kb.pointer_move(1, Some("r")).is_empty(), "hover is ignored");
    }

    #[test]
    fn drag_under_sustain_keeps_previous() {
        let mut kb = KeyboardState::new();
        kb.sustain_down();
        kb.pointer_down(1, Some("q"));
        assert_eq!(kb.pointer_move(1, Some("w")), vec![start("w")]);
        assert!(kb.is_sounding("q"));
        let mut released = kb.sustain_up();
        released.sort_by(|a, b| format!("{a:?}").cmp(&format!("{b:?}")));
        assert_eq!(released, vec![release("q")], "w is still dragged");
    }

    #[test]
    fn one_dragged_key_per_pointer() {
        let mut kb = KeyboardState::new();
        kb.pointer_down(1, Some("q"));
        kb.pointer_down(2, Some("w"));
        assert_eq!(kb.pointer_move(2, Some("q")), vec![release("w"), NoteCommand::Retrigger("q".into())]);
        assert_eq!(kb.pointer_up(1), Vec::new(), "pointer 2 still on q");
        assert_eq!(kb.pointer_up(2), vec![release("q")]);
    }

    #[test]
    fn key_and_pointer_share_a_note() {
        let mut kb = KeyboardState::new();
        kb.key_down("q");
        kb.pointer_down(7, Some("q"));
        assert_eq!(kb.key_up("q"), None);
        assert_eq!(kb.pointer_up(7), vec![release("q")]);
    }

    #[test]
    fn panic_clears_everything() {
        let mut kb = KeyboardState::new();
        kb.key_down("q");
        kb.sustain_down();
        kb.pointer_down(1, Some("w"));
        let mut stopped = kb.panic();
        stopped.sort();
        assert_eq!(stopped, vec!["q".to_string(), "w".to_string()]);
        assert!(!kb.sustain_engaged());
        assert_eq!(kb.sounding().count(), 0);
        assert_eq!(kb.key_up("q"), None);
        assert!(kb.pointer_up(1).is_empty());
    }

    #[test]
    fn active_notes_track_domains_separately() {
        let mut notes = ActiveNotes::new();
        notes.set_live("q", vec![VoiceId::new("q", 0)]);
        let id = PlaybackNoteId { pass: 1, index: 0 };
        notes.set_playback(id, vec![VoiceId::new("q", 1)]);
        assert_eq!(notes.live("q"), &[VoiceId::new("q", 0)]);
        assert_eq!(notes.take_playback(id), vec![VoiceId::new("q", 1)]);
        assert!(notes.take_playback(id).is_empty());
        assert_eq!(notes.take_live("q").len(), 1);
        assert!(notes.live("q").is_empty());
    }
}
