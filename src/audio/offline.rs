//! Offline audio context.
//!
//! A context whose clock only moves when [`OfflineContext::advance`] is
//! called. It keeps a record of every node it was asked to play, so
//! callers can check exactly what would have been audible, and it can
//! mix those nodes down to samples for file export.

use crate::audio::context::{AudioContext, AudioSource, ContextState, NodeId};
use crate::audio::synth::render_tone;
use crate::error::SightSingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Waiting for its start time.
    Scheduled,
    Playing,
    /// Ran to its natural end.
    Finished,
    /// Stopped before it ever sounded.
    Cancelled,
    /// Cut off while sounding.
    Stopped,
}

#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub id: NodeId,
    pub source: AudioSource,
    pub start: f64,
    pub end: f64,
    pub stopped_at: Option<f64>,
}

impl NodeRecord {
    pub fn state_at(&self, time: f64) -> NodeState {
        match self.stopped_at {
            Some(stop) if stop <= self.start => NodeState::Cancelled,
            Some(stop) if time >= stop => NodeState::Stopped,
            _ if time < self.start => NodeState::Scheduled,
            _ if time < self.end => NodeState::Playing,
            _ => NodeState::Finished,
        }
    }

    /// End of audible output, accounting for an early stop.
    pub fn audible_end(&self) -> f64 {
        self.stopped_at.map_or(self.end, |stop| stop.min(self.end))
    }

    /// True while the node may still produce sound at or after `time`.
    pub fn is_live_at(&self, time: f64) -> bool {
        matches!(
            self.state_at(time),
            NodeState::Scheduled | NodeState::Playing
        )
    }
}

#[derive(Debug)]
pub struct OfflineContext {
    sample_rate: u32,
    time: f64,
    state: ContextState,
    locked: bool,
    nodes: Vec<NodeRecord>,
    next_id: u64,
}

impl OfflineContext {
    /// A suspended context that resumes on request.
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            time: 0.0,
            state: ContextState::Suspended,
            locked: false,
            nodes: Vec::new(),
            next_id: 0,
        }
    }

    /// A context that refuses to resume, like output that was never
    /// unlocked by a user gesture.
    pub fn locked(sample_rate: u32) -> Self {
        Self {
            locked: true,
            ..Self::new(sample_rate)
        }
    }

    /// Move the clock forward.
    pub fn advance(&mut self, seconds: f64) {
        if seconds > 0.0 {
            self.time += seconds;
        }
    }

    pub fn advance_to(&mut self, time: f64) {
        if time > self.time {
            self.time = time;
        }
    }

    pub fn nodes(&self) -> &[NodeRecord] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&NodeRecord> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_state(&self, id: NodeId) -> Option<NodeState> {
        self.node(id).map(|n| n.state_at(self.time))
    }

    /// Nodes that are playing now or still waiting to play.
    pub fn live_nodes(&self) -> impl Iterator<Item = &NodeRecord> {
        let now = self.time;
        self.nodes.iter().filter(move |n| n.is_live_at(now))
    }

    /// Mix every node into a mono buffer covering `[0, duration)`.
    pub fn render(&self, duration: f64) -> Vec<f32> {
        let rate = self.sample_rate as f64;
        let len = (duration.max(0.0) * rate).round() as usize;
        let mut mix = vec![0.0f32; len];

        for node in &self.nodes {
            if node.state_at(self.time) == NodeState::Cancelled {
                continue;
            }
            let samples = match &node.source {
                AudioSource::Tone(spec) => render_tone(spec, self.sample_rate),
                AudioSource::Buffer { samples, gain } => {
                    samples.iter().map(|s| s * gain).collect()
                }
            };
            let offset = (node.start * rate).round() as usize;
            let audible = ((node.audible_end() - node.start) * rate).round() as usize;
            for (i, sample) in samples.iter().take(audible).enumerate() {
                match mix.get_mut(offset + i) {
                    Some(slot) => *slot += sample,
                    None => break,
                }
            }
        }

        mix
    }
}

impl AudioContext for OfflineContext {
    fn state(&self) -> ContextState {
        self.state
    }

    fn current_time(&self) -> f64 {
        self.time
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn resume(&mut self) -> Result<(), SightSingError> {
        match self.state {
            ContextState::Running => Ok(()),
            ContextState::Closed => Err(SightSingError::AudioContext(
                "context is closed".to_string(),
            )),
            ContextState::Suspended if self.locked => Err(SightSingError::AudioContext(
                "audio output requires a user gesture".to_string(),
            )),
            ContextState::Suspended => {
                self.state = ContextState::Running;
                Ok(())
            }
        }
    }

    fn start_source(&mut self, source: AudioSource, when: f64) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        let start = when.max(self.time);
        let end = start + source.duration(self.sample_rate);
        self.nodes.push(NodeRecord {
            id,
            source,
            start,
            end,
            stopped_at: None,
        });
        id
    }

    fn stop_source(&mut self, node: NodeId) {
        let now = self.time;
        if let Some(record) = self.nodes.iter_mut().find(|n| n.id == node) {
            if record.stopped_at.is_none() && now < record.end {
                record.stopped_at = Some(now);
            }
        }
    }

    fn close(&mut self) {
        let ids: Vec<NodeId> = self.nodes.iter().map(|n| n.id).collect();
        for id in ids {
            self.stop_source(id);
        }
        self.state = ContextState::Closed;
    }
}
