//! Voice engine: the per-note signal chains and the master effects chain,
//! built out of host audio nodes.

pub mod effects;
pub mod envelope;
pub mod pool;
pub mod voice;
pub mod waveform;
