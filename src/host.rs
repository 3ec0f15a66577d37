//! Host audio engine interface.
//!
//! Sample generation, filtering and convolution happen on the host (a
//! WebAudio context in the browser build). The synth core only creates
//! nodes, wires them, and schedules parameter automation against the host's
//! audio clock.

#[cfg(test)]
pub(crate) mod fake;

/// Opaque handle to a host audio node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// Opaque handle to a host periodic wave table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableId(pub u32);

/// Automatable parameters a node may expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    Frequency,
    Gain,
    DelayTime,
    Rate,
    Depth,
}

impl ParamKind {
    /// WebAudio-style attribute name.
    pub fn name(self) -> &'static str {
        match self {
            ParamKind::Frequency => "frequency",
            ParamKind::Gain => "gain",
            ParamKind::DelayTime => "delayTime",
            ParamKind::Rate => "rate",
            ParamKind::Depth => "depth",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamRef {
    pub node: NodeId,
    pub kind: ParamKind,
}

impl ParamRef {
    pub fn new(node: NodeId, kind: ParamKind) -> Self {
        ParamRef { node, kind }
    }

    pub fn gain(node: NodeId) -> Self {
        ParamRef::new(node, ParamKind::Gain)
    }

    pub fn frequency(node: NodeId) -> Self {
        ParamRef::new(node, ParamKind::Frequency)
    }
}

/// Where a connection lands: a node input or one of its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Node(NodeId),
    Param(ParamRef),
}

/// One edge of the host audio graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Connection {
    pub from: NodeId,
    pub to: Endpoint,
}

impl Connection {
    pub fn to_node(from: NodeId, to: NodeId) -> Self {
        Connection {
            from,
            to: Endpoint::Node(to),
        }
    }

    pub fn to_param(from: NodeId, param: ParamRef) -> Self {
        Connection {
            from,
            to: Endpoint::Param(param),
        }
    }

    pub fn apply<H: AudioHost + ?Sized>(&self, host: &mut H) {
        host.connect(self.from, self.to);
    }

    pub fn undo<H: AudioHost + ?Sized>(&self, host: &mut H) {
        host.disconnect(self.from, self.to);
    }
}

/// Signal generator shapes the host can produce natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeneratorShape {
    Sine,
    Square,
    Sawtooth,
    Triangle,
    /// A custom periodic wave built with `create_periodic_table`.
    Table(TableId),
}

/// Effect nodes for the master chain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EffectKind {
    WaveShaper,
    Chorus,
    Delay { max_time: f64 },
    /// Convolution reverb; the host synthesizes the impulse response.
    Convolver { duration: f64, decay: f64 },
}

/// Host engine lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    Suspended,
    Running,
    Closed,
}

/// Outcome of asking the host to resume.
#[derive(Debug, Clone, PartialEq)]
pub enum ResumeRequest {
    /// Completion arrives later through `Synth::resume_completed`.
    Pending,
    /// The host resumed (or failed) synchronously.
    Completed(Result<(), String>),
}

/// The operations the synth consumes from the host audio engine.
///
/// Time arguments are on the host's audio clock (`current_time`).
pub trait AudioHost {
    /// Whether the host can produce audio at all.
    fn is_supported(&self) -> bool;
    fn state(&self) -> HostState;
    /// Ask the engine to start or resume. Requires a prior user gesture.
    fn request_resume(&mut self) -> ResumeRequest;
    /// Monotonic audio clock in seconds.
    fn current_time(&self) -> f64;
    /// Final output node.
    fn destination(&self) -> NodeId;

    fn create_generator(&mut self, shape: GeneratorShape) -> NodeId;
    fn create_periodic_table(&mut self, real: &[f32], imag: &[f32]) -> TableId;
    fn set_generator_shape(&mut self, node: NodeId, shape: GeneratorShape);
    fn create_gain(&mut self) -> NodeId;
    fn create_effect(&mut self, kind: EffectKind) -> NodeId;
    fn set_shaper_curve(&mut self, node: NodeId, curve: &[f32]);

    fn connect(&mut self, from: NodeId, to: Endpoint);
    fn disconnect(&mut self, from: NodeId, to: Endpoint);
    fn start(&mut self, node: NodeId, at: f64);
    fn stop(&mut self, node: NodeId, at: f64);

    /// Value the parameter has right now.
    fn param_value(&self, param: ParamRef) -> f64;
    fn set_value_at(&mut self, param: ParamRef, value: f64, at: f64);
    /// Linear ramp from the previous event's value, reaching `value` at `end`.
    fn ramp_linear(&mut self, param: ParamRef, value: f64, end: f64);
    /// Drop every automation event at or after `from`.
    fn cancel_scheduled(&mut self, param: ParamRef, from: f64);
}
