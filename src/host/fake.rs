//! In-memory host used by the unit tests. Records the graph and evaluates
//! parameter automation against a settable clock.

use std::collections::{HashMap, HashSet};

use super::{
    AudioHost, Connection, EffectKind, Endpoint, GeneratorShape, HostState, NodeId, ParamRef,
    ResumeRequest, TableId,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NodeKind {
    Destination,
    Generator,
    Gain,
    Effect(EffectKind),
}

/// How the fake answers `request_resume`.
#[derive(Debug, Clone, PartialEq)]
pub enum ResumeMode {
    Deferred,
    Succeed,
    Fail(String),
}

#[derive(Debug, Clone, Copy)]
enum Automation {
    Set { value: f64, time: f64 },
    Ramp { value: f64, end: f64 },
}

impl Automation {
    fn time(&self) -> f64 {
        match *self {
            Automation::Set { time, .. } => time,
            Automation::Ramp { end, .. } => end,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Track {
    base: f64,
    events: Vec<Automation>,
}

impl Track {
    fn value_at(&self, t: f64) -> f64 {
        let mut value = self.base;
        let mut prev_time = f64::NEG_INFINITY;
        for ev in &self.events {
            match *ev {
                Automation::Set { value: v, time } => {
                    if time > t {
                        break;
                    }
                    value = v;
                    prev_time = time;
                }
                Automation::Ramp { value: v, end } => {
                    if end <= t {
                        value = v;
                        prev_time = end;
                    } else {
                        if prev_time.is_finite() && t > prev_time {
                            let frac = (t - prev_time) / (end - prev_time);
                            value += (v - value) * frac;
                        }
                        break;
                    }
                }
            }
        }
        value
    }
}

pub struct FakeHost {
    pub supported: bool,
    pub state: HostState,
    pub resume_mode: ResumeMode,
    pub resume_calls: usize,
    pub now: f64,
    next_id: u32,
    kinds: HashMap<NodeId, NodeKind>,
    shapes: HashMap<NodeId, GeneratorShape>,
    pub tables: Vec<(Vec<f32>, Vec<f32>)>,
    pub curves: HashMap<NodeId, Vec<f32>>,
    pub connections: HashSet<Connection>,
    pub started: HashSet<NodeId>,
    pub stopped: HashSet<NodeId>,
    params: HashMap<ParamRef, Track>,
}

impl FakeHost {
    pub fn new() -> Self {
        let mut kinds = HashMap::new();
        kinds.insert(NodeId(0), NodeKind::Destination);
        FakeHost {
            supported: true,
            state: HostState::Suspended,
            resume_mode: ResumeMode::Succeed,
            resume_calls: 0,
            now: 0.0,
            next_id: 1,
            kinds,
            shapes: HashMap::new(),
            tables: Vec::new(),
            curves: HashMap::new(),
            connections: HashSet::new(),
            started: HashSet::new(),
            stopped: HashSet::new(),
            params: HashMap::new(),
        }
    }

    /// A host that is already running.
    pub fn running() -> Self {
        let mut host = Self::new();
        host.state = HostState::Running;
        host
    }

    pub fn set_time(&mut self, t: f64) {
        self.now = t;
    }

    pub fn kind(&self, node: NodeId) -> Option<NodeKind> {
        self.kinds.get(&node).copied()
    }

    pub fn shape(&self, node: NodeId) -> Option<GeneratorShape> {
        self.shapes.get(&node).copied()
    }

    pub fn count(&self, kind: NodeKind) -> usize {
        self.kinds.values().filter(|k| **k == kind).count()
    }

    pub fn is_connected(&self, from: NodeId, to: Endpoint) -> bool {
        self.connections.contains(&Connection { from, to })
    }

    /// Parameter value at an arbitrary clock time.
    pub fn value_at(&self, param: ParamRef, t: f64) -> f64 {
        self.params.get(&param).map_or(0.0, |tr| tr.value_at(t))
    }

    fn alloc(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.kinds.insert(id, kind);
        id
    }

    fn track(&mut self, param: ParamRef) -> &mut Track {
        self.params.entry(param).or_default()
    }
}

impl AudioHost for FakeHost {
    fn is_supported(&self) -> bool {
        self.supported
    }

    fn state(&self) -> HostState {
        self.state
    }

    fn request_resume(&mut self) -> ResumeRequest {
        self.resume_calls += 1;
        match &self.resume_mode {
            ResumeMode::Deferred => ResumeRequest::Pending,
            ResumeMode::Succeed => {
                self.state = HostState::Running;
                ResumeRequest::Completed(Ok(()))
            }
            ResumeMode::Fail(msg) => ResumeRequest::Completed(Err(msg.clone())),
        }
    }

    fn current_time(&self) -> f64 {
        self.now
    }

    fn destination(&self) -> NodeId {
        NodeId(0)
    }

    fn create_generator(&mut self, shape: GeneratorShape) -> NodeId {
        let id = self.alloc(NodeKind::Generator);
        self.shapes.insert(id, shape);
        id
    }

    fn create_periodic_table(&mut self, real: &[f32], imag: &[f32]) -> TableId {
        self.tables.push((real.to_vec(), imag.to_vec()));
        TableId(self.tables.len() as u32 - 1)
    }

    fn set_generator_shape(&mut self, node: NodeId, shape: GeneratorShape) {
        self.shapes.insert(node, shape);
    }

    fn create_gain(&mut self) -> NodeId {
        let id = self.alloc(NodeKind::Gain);
        // WebAudio gain nodes default to unity.
        self.track(ParamRef::gain(id)).base = 1.0;
        id
    }

    fn create_effect(&mut self, kind: EffectKind) -> NodeId {
        self.alloc(NodeKind::Effect(kind))
    }

    fn set_shaper_curve(&mut self, node: NodeId, curve: &[f32]) {
        self.curves.insert(node, curve.to_vec());
    }

    fn connect(&mut self, from: NodeId, to: Endpoint) {
        self.connections.insert(Connection { from, to });
    }

    fn disconnect(&mut self, from: NodeId, to: Endpoint) {
        self.connections.remove(&Connection { from, to });
    }

    fn start(&mut self, node: NodeId, _at: f64) {
        self.started.insert(node);
    }

    fn stop(&mut self, node: NodeId, _at: f64) {
        self.stopped.insert(node);
    }

    fn param_value(&self, param: ParamRef) -> f64 {
        self.value_at(param, self.now)
    }

    fn set_value_at(&mut self, param: ParamRef, value: f64, at: f64) {
        self.track(param).events.push(Automation::Set { value, time: at });
    }

    fn ramp_linear(&mut self, param: ParamRef, value: f64, end: f64) {
        self.track(param).events.push(Automation::Ramp { value, end });
    }

    fn cancel_scheduled(&mut self, param: ParamRef, from: f64) {
        self.track(param).events.retain(|ev| ev.time() < from);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ramp_interpolates() {
        let mut host = FakeHost::running();
        let g = host.create_gain();
        let p = ParamRef::gain(g);
        host.set_value_at(p, 0.0, 1.0);
        host.ramp_linear(p, 1.0, 2.0);
        assert_eq!(host.value_at(p, 0.5), 1.0, "unity before first event");
        assert!((host.value_at(p, 1.5) - 0.5).abs() < 1e-9);
        assert_eq!(host.value_at(p, 3.0), 1.0);
    }

    #[test]
    fn cancel_drops_future_events() {
        let mut host = FakeHost::running();
        let g = host.create_gain();
        let p = ParamRef::gain(g);
        host.set_value_at(p, 0.0, 0.0);
        host.ramp_linear(p, 1.0, 1.0);
        host.cancel_scheduled(p, 0.5);
        assert_eq!(host.value_at(p, 2.0), 0.0);
    }
}
