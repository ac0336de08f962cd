//! Async request creation, resolution and abort
//!
//! A request is registered in both holders or in neither. Resolution and
//! abort take it out of the table, which clears the entity index, and out of
//! the executor's holder before the executor sees the value, so a second
//! resolution of the same id finds nothing and is a no-op.

use super::Scheduler;
use crate::requests::{AsyncRequest, AsyncRequestHolder, ResponseCallback};
use crate::types::{Clock, EntityId, Pid, RequestId, RequestKind, WAIT_FOREVER};
use crate::values::Val;
use tracing::{debug, warn};

impl Scheduler {
    /// Suspend `pid` until `entity` answers. Returns `None`, dropping the
    /// callback, when the script cannot suspend; the script keeps running.
    ///
    /// A bytecode script gets a result slot pushed for the answer and may
    /// wait on one request at a time. Engine scripts may hold several.
    pub fn make_request(
        &mut self,
        pid: Pid,
        entity: EntityId,
        kind: RequestKind,
        callback: ResponseCallback,
    ) -> Option<RequestId> {
        self.register_request(pid, entity, kind, WAIT_FOREVER, callback)
    }

    /// Like [`make_request`](Self::make_request), but the request is aborted
    /// if no answer arrives within `timeout` clocks
    pub fn make_request_with_timeout(
        &mut self,
        now: Clock,
        pid: Pid,
        entity: EntityId,
        kind: RequestKind,
        timeout: Clock,
        callback: ResponseCallback,
    ) -> Option<RequestId> {
        let wake = now.saturating_add(timeout).max(1);
        self.register_request(pid, entity, kind, wake, callback)
    }

    fn register_request(
        &mut self,
        pid: Pid,
        entity: EntityId,
        kind: RequestKind,
        sleep_until: Clock,
        callback: ResponseCallback,
    ) -> Option<RequestId> {
        let Some(ex) = self.executors.get(&pid) else {
            warn!(%pid, "request for unknown executor");
            return None;
        };
        if ex.running_to_completion() {
            debug!(%pid, %kind, "request refused, script cannot suspend");
            return None;
        }
        // A bytecode script has one result slot to wait on
        if !ex.is_engine() && ex.blocked() {
            warn!(%pid, %kind, "request refused, script is already blocked");
            return None;
        }

        let request_id = self.next_request_id();
        let ex = self.executors.get_mut(&pid)?;
        if !ex.suspend(sleep_until) {
            return None;
        }
        ex.open_result_slot();
        if !ex.requests_mut().add_request(kind, request_id) {
            ex.close_result_slot();
            ex.revive();
            return None;
        }
        let request = AsyncRequest::new(request_id, pid, entity, kind, callback);
        if !self.requests.insert(request) {
            ex.requests_mut().remove_request(kind, request_id);
            ex.close_result_slot();
            ex.revive();
            return None;
        }
        self.hold(pid);

        debug!(%pid, %request_id, entity = entity.0, %kind, "request registered");
        Some(request_id)
    }

    /// Answer a request. The callback shapes the value the script sees.
    /// Returns false for unknown or already-handled requests.
    pub fn respond(&mut self, request_id: RequestId, response: Val) -> bool {
        let Some(mut request) = self.take_request(request_id) else {
            return false;
        };
        let value = match request.take_callback() {
            Some(callback) => callback(request.entity(), response),
            None => Some(response),
        };
        self.deliver(&request, value);
        true
    }

    /// Route a world event to the script waiting on `entity`. Without a hint
    /// the first-registered request of `kind` is answered.
    pub fn respond_to_entity(
        &mut self,
        entity: EntityId,
        kind: RequestKind,
        hint: Option<RequestId>,
        response: Val,
    ) -> Option<RequestId> {
        let request_id = self.find_request(entity, kind, hint)?;
        self.respond(request_id, response).then_some(request_id)
    }

    /// Resolve a request with no answer. The script observes the sentinel.
    pub fn abort_request(&mut self, request_id: RequestId) -> bool {
        let Some(request) = self.take_request(request_id) else {
            return false;
        };
        debug!(pid = %request.pid(), %request_id, "request aborted");
        self.deliver(&request, None);
        true
    }

    /// Abort everything `pid` waits on. Returns the number aborted.
    pub fn abort_all(&mut self, pid: Pid) -> usize {
        let ids = match self.executors.get(&pid) {
            Some(ex) => ex.requests().ids(),
            None => return 0,
        };
        ids.into_iter()
            .filter(|id| self.abort_request(*id))
            .count()
    }

    /// Abort every request addressed to a departing entity
    pub fn entity_disconnected(&mut self, entity: EntityId) -> usize {
        let ids = match self.requests.entity_holder(entity) {
            Some(holder) => holder.ids(),
            None => return 0,
        };
        let aborted = ids
            .into_iter()
            .filter(|id| self.abort_request(*id))
            .count();
        if aborted > 0 {
            debug!(entity = entity.0, aborted, "entity disconnected");
        }
        aborted
    }

    pub fn find_request(
        &self,
        entity: EntityId,
        kind: RequestKind,
        hint: Option<RequestId>,
    ) -> Option<RequestId> {
        self.requests.entity_holder(entity)?.find_request(kind, hint)
    }

    pub fn request(&self, request_id: RequestId) -> Option<&AsyncRequest> {
        self.requests.get(request_id)
    }

    pub fn entity_requests(&self, entity: EntityId) -> Option<&AsyncRequestHolder> {
        self.requests.entity_holder(entity)
    }

    fn take_request(&mut self, request_id: RequestId) -> Option<AsyncRequest> {
        if self.requests.get(request_id)?.handled() {
            return None;
        }
        let mut request = self.requests.take(request_id)?;
        request.mark_handled();
        Some(request)
    }

    fn deliver(&mut self, request: &AsyncRequest, value: Option<Val>) {
        let pid = request.pid();
        let Some(ex) = self.executors.get_mut(&pid) else {
            warn!(%pid, request_id = %request.id(), "request owner is gone");
            return;
        };
        ex.requests_mut().remove_request(request.kind(), request.id());
        ex.handle_request(request.id(), value, self.bridge.engine());
        self.schedule(pid);
    }
}
