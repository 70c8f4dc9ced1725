//! Pre-write notifiers: observers a node runs before every write-like
//! request is handed to its driver.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::Result;
use crate::node::BlockNode;
use crate::request::RequestKind;

/// A write-like request about to reach a node's driver.
#[derive(Debug, Clone, Copy)]
pub struct TrackedRequest<'a> {
    node: &'a BlockNode,
    kind: RequestKind,
    offset: u64,
    bytes: u64,
}

impl<'a> TrackedRequest<'a> {
    pub(crate) fn new(node: &'a BlockNode, kind: RequestKind, offset: u64, bytes: u64) -> Self {
        Self {
            node,
            kind,
            offset,
            bytes,
        }
    }

    /// Node the request is addressed to.
    #[must_use]
    pub fn node(&self) -> &'a BlockNode {
        self.node
    }

    /// Request kind. Always write-like.
    #[must_use]
    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    /// Start offset in bytes.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Length in bytes.
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

/// Observer invoked synchronously before each write-like request.
///
/// Notifiers observe; they do not gate. Return `Ok(())` for every request,
/// whether or not it crossed anything, so the remaining notifiers and the
/// request proceed. `Err` is reserved for a fatal failure to deliver an
/// event the notifier has already committed to, such as a crossing whose
/// threshold was just disarmed, and fails the request. A notifier must never
/// return `Err` to reject or throttle a write.
pub trait BeforeWriteNotifier: Send + Sync {
    /// Called before `req` reaches the driver.
    fn notify(&self, req: &TrackedRequest<'_>) -> Result<()>;
}

/// Identifies one registration in a node's notifier list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NotifierHandle(u64);

type Entry = (NotifierHandle, Arc<dyn BeforeWriteNotifier>);

/// Registration-ordered notifier list.
///
/// Dispatch works on a snapshot, so a notifier may remove itself (or
/// anything else) from inside [`BeforeWriteNotifier::notify`].
#[derive(Default)]
pub(crate) struct NotifierList {
    next_id: AtomicU64,
    entries: Mutex<Vec<Entry>>,
}

impl NotifierList {
    pub(crate) fn add(&self, notifier: Arc<dyn BeforeWriteNotifier>) -> NotifierHandle {
        let handle = NotifierHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((handle, notifier));
        handle
    }

    pub(crate) fn remove(&self, handle: NotifierHandle) -> bool {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|(h, _)| *h != handle);
        entries.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<dyn BeforeWriteNotifier>> {
        self.lock().iter().map(|(_, n)| Arc::clone(n)).collect()
    }

    // Every critical section is a single Vec operation; a poisoned list is
    // still a well-formed list.
    fn lock(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
