use crate::types::{RequestId, RequestKind};
use std::collections::BTreeMap;

/// Per-owner index of pending requests, keyed by request kind.
///
/// Holds ids only; the requests themselves live in the scheduler's
/// [`RequestTable`](super::RequestTable). Within one kind, ids keep
/// registration order.
#[derive(Debug, Default, Clone)]
pub struct AsyncRequestHolder {
    requests: BTreeMap<RequestKind, Vec<RequestId>>,
}

impl AsyncRequestHolder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an id. Returns false if the id is already held.
    pub fn add_request(&mut self, kind: RequestKind, id: RequestId) -> bool {
        if self.contains(id) {
            return false;
        }
        self.requests.entry(kind).or_default().push(id);
        true
    }

    pub fn remove_request(&mut self, kind: RequestKind, id: RequestId) -> bool {
        let Some(ids) = self.requests.get_mut(&kind) else {
            return false;
        };
        let Some(pos) = ids.iter().position(|held| *held == id) else {
            return false;
        };
        ids.remove(pos);
        if ids.is_empty() {
            self.requests.remove(&kind);
        }
        true
    }

    /// Without a hint, the first-registered request of `kind`. With a hint,
    /// the request of `kind` whose id matches.
    pub fn find_request(&self, kind: RequestKind, hint: Option<RequestId>) -> Option<RequestId> {
        let ids = self.requests.get(&kind)?;
        match hint {
            None => ids.first().copied(),
            Some(hint) => ids.iter().copied().find(|id| *id == hint),
        }
    }

    pub fn has_request(&self, kind: RequestKind, hint: Option<RequestId>) -> bool {
        self.find_request(kind, hint).is_some()
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.requests.values().any(|ids| ids.contains(&id))
    }

    pub fn len(&self) -> usize {
        self.requests.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// All held ids, kinds in order, registration order within a kind
    pub fn ids(&self) -> Vec<RequestId> {
        self.requests.values().flatten().copied().collect()
    }

    /// Remove and return every held id
    pub fn drain(&mut self) -> Vec<RequestId> {
        let ids = self.ids();
        self.requests.clear();
        ids
    }
}
