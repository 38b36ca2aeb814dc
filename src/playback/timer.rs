//! Timers against the audio clock.
//!
//! Nothing here sleeps: the owner polls with the current audio time and
//! receives every action that has come due.

use crate::audio::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    /// The node has ended naturally and no longer needs a stop.
    ReleaseNode(NodeId),
    /// End the session.
    AutoStop,
}

#[derive(Debug, Clone, Copy)]
struct Timer {
    due: f64,
    action: TimerAction,
}

#[derive(Debug, Default)]
pub struct TimerQueue {
    timers: Vec<Timer>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, due: f64, action: TimerAction) {
        self.timers.push(Timer { due, action });
    }

    /// Remove and return every action due at or before `now`, earliest first.
    pub fn take_due(&mut self, now: f64) -> Vec<TimerAction> {
        let (mut due, pending): (Vec<Timer>, Vec<Timer>) =
            self.timers.drain(..).partition(|t| t.due <= now);
        self.timers = pending;
        due.sort_by(|a, b| a.due.total_cmp(&b.due));
        due.into_iter().map(|t| t.action).collect()
    }

    pub fn next_due(&self) -> Option<f64> {
        self.timers.iter().map(|t| t.due).min_by(f64::total_cmp)
    }

    pub fn clear(&mut self) {
        self.timers.clear();
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_due_in_time_order() {
        let mut queue = TimerQueue::new();
        queue.schedule(3.0, TimerAction::AutoStop);
        queue.schedule(1.0, TimerAction::ReleaseNode(NodeId(7)));
        queue.schedule(5.0, TimerAction::ReleaseNode(NodeId(8)));

        assert_eq!(queue.next_due(), Some(1.0));
        assert!(queue.take_due(0.5).is_empty());
        assert_eq!(
            queue.take_due(3.0),
            vec![TimerAction::ReleaseNode(NodeId(7)), TimerAction::AutoStop]
        );
        assert_eq!(queue.len(), 1);

        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.next_due(), None);
    }
}
