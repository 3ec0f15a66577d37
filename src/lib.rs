pub mod config;
pub mod dsp;
pub mod error;
pub mod host;
pub mod input;
pub mod keymap;
pub mod lifecycle;
pub mod notes;
pub mod sequence;
pub mod sequencer;
pub mod synth;
pub mod timer;
pub mod web;

pub use crate::config::SynthConfig;
pub use crate::error::{SequenceError, SynthError};
pub use crate::host::AudioHost;
pub use crate::sequence::{NoteEvent, Sequence};
pub use crate::synth::Synth;

use crate::keymap::KeyFrequencyMap;
use wasm_bindgen::prelude::*;

/// The crate version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// WASM-exposed: return the keysynth-core version string.
#[wasm_bindgen]
pub fn core_version() -> String {
    VERSION.to_string()
}

/// Parse sequence file text against the built-in key layout.
pub fn parse_sequence_text(text: &str) -> Result<Sequence, SequenceError> {
    Sequence::parse_text(text, &KeyFrequencyMap::qwerty())
}

/// WASM-exposed: parse sequence file text into an array of note events.
/// Errors carry a rendered diagnostic.
#[wasm_bindgen(js_name = parseSequence)]
pub fn parse_sequence(text: &str) -> Result<JsValue, JsValue> {
    let sequence = parse_sequence_text(text).map_err(|e| JsValue::from_str(&e.report(text)))?;
    serde_wasm_bindgen::to_value(&sequence).map_err(|e| JsValue::from_str(&format!("{e}")))
}

/// WASM-exposed: format an array of note events as sequence file text.
#[wasm_bindgen(js_name = exportSequence)]
pub fn export_sequence(events: JsValue) -> Result<String, JsValue> {
    let events: Vec<NoteEvent> =
        serde_wasm_bindgen::from_value(events).map_err(|e| JsValue::from_str(&format!("{e}")))?;
    Ok(Sequence::from_events(events).to_text())
}
