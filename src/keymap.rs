//! Static QWERTY key layout → note frequencies.
//!
//! Two chromatic octaves from C4: the letter rows carry the naturals, the
//! number row and the lower letters fill in the sharps.

use std::collections::HashMap;

/// (key, frequency in Hz), lowest note first.
const LAYOUT: [(&str, f64); 29] = [
    ("q", 261.63),
    ("2", 277.18),
    ("w", 293.66),
    ("3", 311.13),
    ("e", 329.63),
    ("r", 349.23),
    ("5", 369.99),
    ("t", 392.00),
    ("6", 415.30),
    ("y", 440.00),
    ("7", 466.16),
    ("u", 493.88),
    ("i", 523.25),
    ("9", 554.37),
    ("o", 587.33),
    ("0", 622.25),
    ("p", 659.26),
    ("a", 698.46),
    ("z", 739.99),
    ("s", 783.99),
    ("x", 830.61),
    ("d", 880.00),
    ("c", 932.33),
    ("f", 987.77),
    ("g", 1046.50),
    ("h", 1108.73),
    ("j", 1174.66),
    ("k", 1244.51),
    ("l", 1318.51),
];

/// Immutable key → base frequency table.
#[derive(Debug, Clone)]
pub struct KeyFrequencyMap {
    table: HashMap<String, f64>,
}

impl KeyFrequencyMap {
    /// The built-in two-octave layout.
    pub fn qwerty() -> Self {
        KeyFrequencyMap {
            table: LAYOUT.iter().map(|&(k, f)| (k.to_string(), f)).collect(),
        }
    }

    /// Base frequency for `key`, if it is mapped.
    pub fn frequency(&self, key: &str) -> Option<f64> {
        self.table.get(key).copied()
    }

    /// Frequency shifted by whole octaves.
    pub fn shifted(&self, key: &str, octave_shift: i32) -> Option<f64> {
        self.frequency(key).map(|f| f * 2.0_f64.powi(octave_shift))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.table.contains_key(key)
    }

    /// Mapped keys in pitch order.
    pub fn keys(&self) -> impl Iterator<Item = &'static str> {
        LAYOUT.iter().map(|&(k, _)| k)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl Default for KeyFrequencyMap {
    fn default() -> Self {
        Self::qwerty()
    }
}
