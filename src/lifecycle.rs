//! Audio engine lifecycle: one resume attempt in flight at a time, the
//! session-wide unsupported latch, and the status shown to the user.

use crate::error::SynthError;
use crate::host::{AudioHost, HostState, ResumeRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    /// A resume request is in flight.
    Initializing,
    Ready,
    /// The host suspended after being ready. The voice pool survives.
    Suspended,
    /// The last resume failed; the next user gesture retries.
    Failed,
}

/// Outcome of `ensure_ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    /// Completion arrives through `Lifecycle::resume_completed`.
    Pending,
}

/// User-facing engine status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineStatus {
    Ready,
    Suspended,
    NotInitialized,
    Error(String),
}

impl EngineStatus {
    pub fn message(&self) -> &str {
        match self {
            EngineStatus::Ready => "Audio Ready",
            EngineStatus::Suspended => "Click or press a key to enable audio",
            EngineStatus::NotInitialized => "Audio not initialized.",
            EngineStatus::Error(message) => message,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, EngineStatus::Error(_))
    }
}

#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: EngineState,
    unsupported: bool,
    /// Keys pressed while a resume was in flight.
    deferred: Vec<String>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Lifecycle {
            state: EngineState::Uninitialized,
            unsupported: false,
            deferred: Vec::new(),
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == EngineState::Ready
    }

    /// Get the host running. Only one resume request is ever outstanding;
    /// callers arriving while it is in flight get `Pending` and no new
    /// request is made.
    pub fn ensure_ready<H: AudioHost>(&mut self, host: &mut H) -> Result<Readiness, SynthError> {
        if self.unsupported {
            return Err(SynthError::EngineUnsupported);
        }
        if !host.is_supported() {
            self.unsupported = true;
            self.state = EngineState::Failed;
            self.deferred.clear();
            log::warn!("host has no audio support; audio disabled for this session");
            return Err(SynthError::EngineUnsupported);
        }

        match self.state {
            EngineState::Initializing => return Ok(Readiness::Pending),
            EngineState::Ready if host.state() == HostState::Running => {
                return Ok(Readiness::Ready);
            }
            EngineState::Ready => self.host_suspended(),
            _ => {}
        }

        log::debug!("requesting audio resume from {:?}", self.state);
        self.state = EngineState::Initializing;
        match host.request_resume() {
            ResumeRequest::Pending => Ok(Readiness::Pending),
            ResumeRequest::Completed(result) => {
                self.resume_completed(result).map(|()| Readiness::Ready)
            }
        }
    }

    /// The in-flight resume finished. Ignored unless one is in flight.
    pub fn resume_completed(&mut self, result: Result<(), String>) -> Result<(), SynthError> {
        if self.state != EngineState::Initializing {
            log::debug!("stray resume completion in {:?}", self.state);
            return match result {
                Ok(()) => Ok(()),
                Err(message) => Err(SynthError::EngineResumeFailed(message)),
            };
        }
        match result {
            Ok(()) => {
                self.state = EngineState::Ready;
                log::info!("audio engine ready");
                Ok(())
            }
            Err(message) => {
                self.state = EngineState::Failed;
                self.deferred.clear();
                log::warn!("audio resume failed: {message}");
                Err(SynthError::EngineResumeFailed(message))
            }
        }
    }

    /// The host stopped producing audio on its own.
    pub fn host_suspended(&mut self) {
        if self.state == EngineState::Ready {
            self.state = EngineState::Suspended;
            log::info!("audio engine suspended");
        }
    }

    /// Remember a key pressed before the engine was ready.
    pub fn defer(&mut self, key: &str) {
        if self.state == EngineState::Initializing && !self.deferred.iter().any(|k| k == key) {
            self.deferred.push(key.to_string());
        }
    }

    pub fn take_deferred(&mut self) -> Vec<String> {
        std::mem::take(&mut self.deferred)
    }

    pub fn status<H: AudioHost>(&self, host: &H) -> EngineStatus {
        if self.unsupported {
            return EngineStatus::Error("Web Audio API not supported.".to_string());
        }
        match self.state {
            EngineState::Failed => EngineStatus::Error("Error resuming audio.".to_string()),
            EngineState::Uninitialized | EngineState::Initializing => EngineStatus::NotInitialized,
            EngineState::Suspended => EngineStatus::Suspended,
            EngineState::Ready => match host.state() {
                HostState::Running => EngineStatus::Ready,
                HostState::Suspended => EngineStatus::Suspended,
                HostState::Closed => EngineStatus::Error("Audio context closed.".to_string()),
            },
        }
    }
}
