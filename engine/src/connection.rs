//! Multiplexing sync over one message channel across many documents (§4.4). Neither piece has
//! a direct counterpart upstream (automerge-rs's `Backend` is single-document and its sync half
//! is driven by a caller per-document); both are authored fresh, grounded in the shape
//! `sync.rs`'s own per-peer `SyncState` already establishes, generalized to "one per (peer,
//! docId)".

use std::collections::HashMap;

use tracing::instrument;
use weft_protocol::Patch;

use crate::{
    backend::Backend,
    error::EngineError,
    sync::{SyncMessage, SyncState},
};

/// A mapping from document id to the latest local document, the only state a [`Connection`]
/// shares with other connections on the same host.
#[derive(Default)]
pub struct DocSet<Id: Eq + std::hash::Hash + Clone> {
    docs: HashMap<Id, Backend>,
}

impl<Id: Eq + std::hash::Hash + Clone> DocSet<Id> {
    pub fn new() -> Self {
        DocSet { docs: HashMap::new() }
    }

    pub fn get(&self, id: &Id) -> Option<&Backend> {
        self.docs.get(id)
    }

    pub fn get_mut(&mut self, id: &Id) -> Option<&mut Backend> {
        self.docs.get_mut(id)
    }

    /// The only mutation point for the shared doc table, per §5.
    pub fn set_doc(&mut self, id: Id, doc: Backend) {
        self.docs.insert(id, doc);
    }

    pub fn ids(&self) -> impl Iterator<Item = &Id> {
        self.docs.keys()
    }
}

/// A message on the wire, tagged with which document it's about.
pub struct DocMessage<Id> {
    pub doc_id: Id,
    pub sync_message: SyncMessage,
}

/// Wraps one [`DocSet`] and a send-callback, driving one [`SyncState`] per (peer, docId). The
/// callback is invoked synchronously (§5: the engine never blocks on I/O); a transport that
/// needs to buffer is the caller's concern.
pub struct Connection<Id: Eq + std::hash::Hash + Clone, F: FnMut(DocMessage<Id>)> {
    states: HashMap<Id, SyncState>,
    send: F,
}

impl<Id: Eq + std::hash::Hash + Clone, F: FnMut(DocMessage<Id>)> Connection<Id, F> {
    pub fn new(send: F) -> Self {
        Connection {
            states: HashMap::new(),
            send,
        }
    }

    fn state_for(&mut self, doc_id: &Id) -> &mut SyncState {
        self.states.entry(doc_id.clone()).or_default()
    }

    /// Called after a local change to `doc_id`: generate and send the next sync message for
    /// that document, if there's anything new to say.
    #[instrument(skip(self, docs))]
    pub fn notify_change(&mut self, docs: &DocSet<Id>, doc_id: &Id)
    where
        Id: std::fmt::Debug,
    {
        let Some(doc) = docs.get(doc_id) else { return };
        let state = self.state_for(doc_id);
        if let Some(msg) = doc.generate_sync_message(state) {
            (self.send)(DocMessage {
                doc_id: doc_id.clone(),
                sync_message: msg,
            });
        }
    }

    /// Routes an inbound message by `doc_id`, applies it, and replies if the document changed
    /// state or still has something outstanding to say. A message for a `doc_id` the receiver
    /// doesn't hold is treated as an advertisement/request: ignored unless the receiver is
    /// later given that document.
    #[instrument(skip(self, docs, message))]
    pub fn receive(
        &mut self,
        docs: &mut DocSet<Id>,
        message: DocMessage<Id>,
    ) -> Result<Option<Patch>, EngineError>
    where
        Id: std::fmt::Debug,
    {
        let DocMessage { doc_id, sync_message } = message;
        let Some(doc) = docs.get_mut(&doc_id) else {
            return Ok(None);
        };
        let state = self.states.entry(doc_id.clone()).or_default();
        let patch = doc.receive_sync_message(sync_message, state)?;
        if let Some(reply) = doc.generate_sync_message(state) {
            (self.send)(DocMessage {
                doc_id,
                sync_message: reply,
            });
        }
        Ok(Some(patch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_protocol::{ActorId, Key, ObjId, OpType, ScalarValue};

    fn local_set(backend: &mut Backend, actor: &ActorId, key: &str, value: ScalarValue) {
        backend
            .apply_local_change(
                actor.clone(),
                None,
                vec![weft_protocol::Op {
                    action: OpType::Set(value),
                    obj: ObjId::Root,
                    key: Key::from(key),
                    insert: false,
                    pred: vec![],
                }],
            )
            .unwrap();
    }

    #[test]
    fn connection_syncs_two_docsets_to_convergence() {
        let mut a_docs: DocSet<&str> = DocSet::new();
        let mut b_docs: DocSet<&str> = DocSet::new();
        let mut backend_a = Backend::new();
        local_set(&mut backend_a, &ActorId::random(), "bird", "magpie".into());
        a_docs.set_doc("doc1", backend_a);
        b_docs.set_doc("doc1", Backend::new());

        let mut to_b: Vec<DocMessage<&str>> = Vec::new();
        {
            let mut conn_a = Connection::new(|m| to_b.push(m));
            conn_a.notify_change(&a_docs, &"doc1");
        }

        let mut to_a: Vec<DocMessage<&str>> = Vec::new();
        {
            let mut conn_b = Connection::new(|m| to_a.push(m));
            for msg in to_b.drain(..) {
                conn_b.receive(&mut b_docs, msg).unwrap();
            }
        }
        let _ = to_a;

        assert_eq!(
            b_docs.get(&"doc1").unwrap().heads(),
            a_docs.get(&"doc1").unwrap().heads()
        );
    }
}
