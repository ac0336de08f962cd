//! # Async requests
//!
//! An [`AsyncRequest`] correlates a suspended executor with a game entity
//! that will eventually answer it (pick a target, type some text). Each
//! request is owned by exactly one [`RequestTable`] entry and indexed twice:
//! once in the executor's [`AsyncRequestHolder`] and once in the entity's.
//! Resolution or abort removes both index entries in the same call, so
//! neither side can resolve a request the other has already dropped.

pub mod holder;

pub use holder::AsyncRequestHolder;

use crate::types::{EntityId, Pid, RequestId, RequestKind};
use crate::values::Val;
use std::collections::HashMap;
use std::fmt;

/// Converts the raw world response into the value the script observes.
/// Returning `None` resolves the request as aborted.
pub type ResponseCallback = Box<dyn FnOnce(EntityId, Val) -> Option<Val> + Send>;

pub struct AsyncRequest {
    id: RequestId,
    pid: Pid,
    entity: EntityId,
    kind: RequestKind,
    handled: bool,
    callback: Option<ResponseCallback>,
}

impl AsyncRequest {
    pub fn new(
        id: RequestId,
        pid: Pid,
        entity: EntityId,
        kind: RequestKind,
        callback: ResponseCallback,
    ) -> Self {
        Self {
            id,
            pid,
            entity,
            kind,
            handled: false,
            callback: Some(callback),
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn entity(&self) -> EntityId {
        self.entity
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn handled(&self) -> bool {
        self.handled
    }

    pub(crate) fn mark_handled(&mut self) {
        self.handled = true;
    }

    pub(crate) fn take_callback(&mut self) -> Option<ResponseCallback> {
        self.callback.take()
    }
}

impl fmt::Debug for AsyncRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncRequest")
            .field("id", &self.id)
            .field("pid", &self.pid)
            .field("entity", &self.entity)
            .field("kind", &self.kind)
            .field("handled", &self.handled)
            .finish()
    }
}

/* ===================== Request table ===================== */

/// Owner of every outstanding request, plus the entity-side indices
#[derive(Debug, Default)]
pub struct RequestTable {
    requests: HashMap<RequestId, AsyncRequest>,
    entities: HashMap<EntityId, AsyncRequestHolder>,
}

impl RequestTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a request and index it under its entity
    pub(crate) fn insert(&mut self, request: AsyncRequest) -> bool {
        if self.requests.contains_key(&request.id) {
            return false;
        }
        let holder = self.entities.entry(request.entity).or_default();
        if !holder.add_request(request.kind, request.id) {
            return false;
        }
        self.requests.insert(request.id, request);
        true
    }

    /// Remove a request and its entity-side index entry
    pub(crate) fn take(&mut self, id: RequestId) -> Option<AsyncRequest> {
        let request = self.requests.remove(&id)?;
        if let Some(holder) = self.entities.get_mut(&request.entity) {
            holder.remove_request(request.kind, id);
            if holder.is_empty() {
                self.entities.remove(&request.entity);
            }
        }
        Some(request)
    }

    pub fn get(&self, id: RequestId) -> Option<&AsyncRequest> {
        self.requests.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: RequestId) -> Option<&mut AsyncRequest> {
        self.requests.get_mut(&id)
    }

    pub fn entity_holder(&self, entity: EntityId) -> Option<&AsyncRequestHolder> {
        self.entities.get(&entity)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Whether any request still references `pid`
    pub fn references(&self, pid: Pid) -> bool {
        self.requests.values().any(|req| req.pid == pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(id: u32, entity: u32) -> AsyncRequest {
        AsyncRequest::new(
            RequestId(id),
            Pid(1),
            EntityId(entity),
            RequestKind::TargetObject,
            Box::new(|_, v| Some(v)),
        )
    }

    #[test]
    fn test_take_removes_entity_index() {
        let mut table = RequestTable::new();
        assert!(table.insert(request(1, 100)));
        assert!(table.insert(request(2, 100)));
        assert_eq!(table.entity_holder(EntityId(100)).unwrap().len(), 2);

        let taken = table.take(RequestId(1)).unwrap();
        assert_eq!(taken.id(), RequestId(1));
        assert_eq!(table.entity_holder(EntityId(100)).unwrap().len(), 1);

        table.take(RequestId(2)).unwrap();
        assert!(table.entity_holder(EntityId(100)).is_none());
        assert!(table.take(RequestId(2)).is_none());
    }

    #[test]
    fn test_duplicate_insert_is_rejected() {
        let mut table = RequestTable::new();
        assert!(table.insert(request(1, 100)));
        assert!(!table.insert(request(1, 200)));
        assert_eq!(table.len(), 1);
        assert!(table.entity_holder(EntityId(200)).is_none());
    }
}
