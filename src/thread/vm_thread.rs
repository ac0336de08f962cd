use super::{ThreadInterface, ThreadState};
use crate::errors::SignalError;
use crate::values::Val;
use std::collections::VecDeque;

pub const DEFAULT_EVENT_QUEUE_SIZE: usize = 20;

/// Thread interface for bytecode executors
#[derive(Debug)]
pub struct VmThread {
    state: ThreadState,
    max_eventqueue_size: usize,
    events: VecDeque<Val>,
}

impl VmThread {
    pub fn new(priority: u8, max_eventqueue_size: usize) -> Self {
        Self {
            state: ThreadState::new(priority),
            max_eventqueue_size,
            events: VecDeque::new(),
        }
    }

    pub fn queued(&self) -> impl Iterator<Item = &Val> {
        self.events.iter()
    }
}

impl Default for VmThread {
    fn default() -> Self {
        Self::new(super::DEFAULT_PRIORITY, DEFAULT_EVENT_QUEUE_SIZE)
    }
}

impl ThreadInterface for VmThread {
    fn state(&self) -> &ThreadState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ThreadState {
        &mut self.state
    }

    fn signal_event(&mut self, event: Val) -> Result<(), SignalError> {
        if self.events.len() >= self.max_eventqueue_size {
            return Err(SignalError::QueueFull {
                event,
                capacity: self.max_eventqueue_size,
            });
        }
        self.events.push_back(event);
        Ok(())
    }

    fn next_event(&mut self) -> Option<Val> {
        self.events.pop_front()
    }

    fn events_waiting(&self) -> usize {
        self.events.len()
    }

    fn clear_event_queue(&mut self) -> usize {
        let dropped = self.events.len();
        self.events.clear();
        dropped
    }

    fn set_event_queue_size(&mut self, size: usize) -> usize {
        std::mem::replace(&mut self.max_eventqueue_size, size)
    }
}
