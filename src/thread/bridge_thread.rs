use super::{ThreadInterface, ThreadState};
use crate::errors::SignalError;
use crate::types::RequestId;
use crate::values::Val;

/// Thread interface for alternate-engine executors.
///
/// Events are delivered by settling the outstanding bridge call, so there is
/// no queue; the executor counts as blocked for as long as a call is in flight.
#[derive(Debug, Default)]
pub struct BridgeThread {
    state: ThreadState,
    outstanding: Option<RequestId>,
}

impl BridgeThread {
    pub fn new(priority: u8) -> Self {
        Self {
            state: ThreadState::new(priority),
            outstanding: None,
        }
    }
}

impl ThreadInterface for BridgeThread {
    fn state(&self) -> &ThreadState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ThreadState {
        &mut self.state
    }

    fn signal_event(&mut self, event: Val) -> Result<(), SignalError> {
        Err(SignalError::NoEventQueue { event })
    }

    fn next_event(&mut self) -> Option<Val> {
        None
    }

    fn events_waiting(&self) -> usize {
        0
    }

    fn clear_event_queue(&mut self) -> usize {
        0
    }

    fn set_event_queue_size(&mut self, _size: usize) -> usize {
        0
    }

    fn blocked(&self) -> bool {
        self.state.blocked || self.outstanding.is_some()
    }

    fn outstanding_call(&self) -> Option<RequestId> {
        self.outstanding
    }

    fn set_outstanding_call(&mut self, call: Option<RequestId>) {
        self.outstanding = call;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocked_while_call_outstanding() {
        let mut thread = BridgeThread::default();
        assert!(!thread.blocked());

        thread.set_outstanding_call(Some(RequestId(3)));
        assert!(thread.blocked());

        // Reviving does not end the call
        thread.revive();
        assert!(thread.blocked());

        thread.set_outstanding_call(None);
        assert!(!thread.blocked());
    }

    #[test]
    fn test_events_are_refused() {
        let mut thread = BridgeThread::default();
        let err = thread.signal_event(Val::Long(1)).unwrap_err();
        assert_eq!(err.into_event(), Val::Long(1));
    }
}
