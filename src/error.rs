use std::ops::Range;

use ariadne::{Config, Label, Report, ReportKind, Source};
use thiserror::Error;

/// Every failure the synth core can surface.
///
/// Engine failures feed the status banner; pool and sequencer failures are
/// absorbed locally (dropped note) and only logged.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SynthError {
    /// The host exposes no audio capability. Fatal for the session.
    #[error("audio engine unsupported by host")]
    EngineUnsupported,
    /// The host refused or failed to resume. Retry on the next user gesture.
    #[error("audio engine failed to resume: {0}")]
    EngineResumeFailed(String),
    /// Every slot for the key belongs to the other owner domain.
    #[error("no free voice for key {key:?}")]
    NoFreeVoice { key: String },
    /// Malformed import or paste. The previous sequence is kept.
    #[error("invalid sequence data: {0}")]
    InvalidSequenceData(#[from] SequenceError),
    #[error("invalid synth config: {0}")]
    Config(String),
}

/// A rejected sequence import, with the byte range it points at.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct SequenceError {
    pub message: String,
    pub span: Range<usize>,
}

impl SequenceError {
    pub fn new(message: impl Into<String>, span: Range<usize>) -> Self {
        SequenceError {
            message: message.into(),
            span,
        }
    }

    /// Render a plain-text diagnostic pointing into `source`.
    pub fn report(&self, source: &str) -> String {
        let end = self.span.end.min(source.len());
        let start = self.span.start.min(end);
        let span = start..end.max(start);

        let mut out = Vec::new();
        let written = Report::build(ReportKind::Error, span.clone())
            .with_config(Config::default().with_color(false))
            .with_message("invalid sequence data")
            .with_label(Label::new(span).with_message(&self.message))
            .finish()
            .write(Source::from(source.to_string()), &mut out);

        match written {
            Ok(()) => String::from_utf8_lossy(&out).into_owned(),
            Err(_) => self.message.clone(),
        }
    }
}

/// Byte offset of a 1-based (line, column) pair, as reported by serde_json.
pub(crate) fn offset_of(source: &str, line: usize, column: usize) -> usize {
    let mut offset = 0;
    for (i, l) in source.split_inclusive('\n').enumerate() {
        if i + 1 == line {
            return (offset + column.saturating_sub(1)).min(source.len());
        }
        offset += l.len();
    }
    source.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_of_second_line() {
        let src = "[\n  {\"key\": 1}\n]";
        assert_eq!(offset_of(src, 1, 1), 0);
        assert_eq!(offset_of(src, 2, 3), 4);
        assert_eq!(offset_of(src, 9, 1), src.len());
    }

    #[test]
    fn report_mentions_message() {
        let src = "[{\"key\": \"#\"}]";
        let err = SequenceError::new("unknown key \"#\"", 9..12);
        let text = err.report(src);
        assert!(
            text.contains("unknown key"),
            "Report should carry the message, got {text}"
        );
    }

    #[test]
    fn report_clamps_span_past_end() {
        let err = SequenceError::new("unexpected end of input", 40..80);
        let text = err.report("[");
        assert!(!text.is_empty());
    }

    #[test]
    fn sequence_error_converts() {
        let err: SynthError = SequenceError::new("bad", 0..1).into();
        assert!(matches!(err, SynthError::InvalidSequenceData(_)));
        assert_eq!(err.to_string(), "invalid sequence data: bad");
    }
}
