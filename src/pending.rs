use std::{
    collections::{HashMap, HashSet, VecDeque},
    fmt,
    sync::{Mutex, MutexGuard, PoisonError},
};

use tokio::sync::oneshot;

use crate::{DriverError, Result, RpcId, RpcResponse};

type DecodeFn = Box<dyn FnOnce(Result<RpcResponse>) + Send>;

/// How a pending operation's reply is delivered to its caller.
pub(crate) enum Completion {
    /// Hand back the generic envelope.
    Envelope(oneshot::Sender<Result<RpcResponse>>),
    /// Run a caller-supplied typed decode, which owns its own reply channel.
    Decode(DecodeFn),
}

impl Completion {
    /// Typed completion: `decode` runs on the receive loop and its outcome is
    /// delivered on the returned receiver.
    pub(crate) fn decode<T, F>(decode: F) -> (Self, oneshot::Receiver<Result<T>>)
    where
        T: Send + 'static,
        F: FnOnce(RpcResponse) -> Result<T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let completion = Self::Decode(Box::new(move |outcome: Result<RpcResponse>| {
            let _ = tx.send(outcome.and_then(decode));
        }));
        (completion, rx)
    }

    /// Consumes the slot, so it can be fulfilled at most once. A caller that
    /// stopped waiting is not an error.
    fn fulfil(self, outcome: Result<RpcResponse>) {
        match self {
            Self::Envelope(tx) => {
                let _ = tx.send(outcome);
            }
            Self::Decode(decode) => decode(outcome),
        }
    }
}

/// One in-flight request awaiting its correlated reply.
pub(crate) struct PendingOperation {
    pub(crate) method: String,
    completion: Completion,
}

impl fmt::Debug for PendingOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let completion = match self.completion {
            Completion::Envelope(_) => "envelope",
            Completion::Decode(_) => "decode",
        };
        f.debug_struct("PendingOperation")
            .field("method", &self.method)
            .field("completion", &completion)
            .finish()
    }
}

impl PendingOperation {
    pub(crate) fn new(method: impl Into<String>, completion: Completion) -> Self {
        Self {
            method: method.into(),
            completion,
        }
    }

    pub(crate) fn complete(self, outcome: Result<RpcResponse>) {
        self.completion.fulfil(outcome);
    }
}

/// Most ids remembered after their caller gave up.
const ABANDONED_CAPACITY: usize = 1024;

#[derive(Default)]
struct Slots {
    entries: HashMap<RpcId, PendingOperation>,
    // Ids whose caller timed out or cancelled; their late reply may still arrive.
    abandoned: HashSet<RpcId>,
    abandoned_order: VecDeque<RpcId>,
}

/// Pending operations keyed by correlation id.
///
/// Every access goes through one mutex. No iteration is exposed; the only
/// bulk operation is [`PendingTable::drain`], which empties the table under
/// the lock and completes the entries after releasing it.
#[derive(Default)]
pub(crate) struct PendingTable {
    slots: Mutex<Slots>,
}

impl PendingTable {
    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers an operation. An id that is already pending, or whose
    /// abandoned request may still be answered, is rejected and the table is
    /// left untouched.
    pub(crate) fn insert(&self, id: RpcId, operation: PendingOperation) -> Result<()> {
        let mut slots = self.lock();
        if slots.entries.contains_key(&id) || slots.abandoned.contains(&id) {
            return Err(DriverError::DuplicateCorrelationId(id.to_string()));
        }
        slots.entries.insert(id, operation);
        Ok(())
    }

    /// Takes the entry for `id`. A reply to an abandoned id consumes its
    /// tombstone and yields nothing.
    pub(crate) fn remove(&self, id: &RpcId) -> Option<PendingOperation> {
        let mut slots = self.lock();
        if let Some(operation) = slots.entries.remove(id) {
            return Some(operation);
        }
        if slots.abandoned.remove(id) {
            slots.abandoned_order.retain(|abandoned| abandoned != id);
        }
        None
    }

    /// Drops the entry for `id` and keeps the id reserved until its reply
    /// arrives, so a new request cannot receive the old answer.
    pub(crate) fn abandon(&self, id: &RpcId) {
        let mut slots = self.lock();
        slots.entries.remove(id);
        if !slots.abandoned.insert(id.clone()) {
            return;
        }
        slots.abandoned_order.push_back(id.clone());
        if slots.abandoned_order.len() > ABANDONED_CAPACITY {
            if let Some(oldest) = slots.abandoned_order.pop_front() {
                slots.abandoned.remove(&oldest);
            }
        }
    }

    /// Removes every entry and completes each with an error built by `error`.
    pub(crate) fn drain(&self, error: impl Fn() -> DriverError) -> usize {
        let drained: Vec<PendingOperation> = {
            let mut slots = self.lock();
            slots.abandoned.clear();
            slots.abandoned_order.clear();
            slots.entries.drain().map(|(_, op)| op).collect()
        };
        let count = drained.len();
        for operation in drained {
            operation.complete(Err(error()));
        }
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().entries.len()
    }
}
