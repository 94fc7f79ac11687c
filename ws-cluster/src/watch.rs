//! Watch handles.
//!
//! A [`Watch`] pairs an event receiver with a [`WatchHandle`]. The handle's
//! teardown runs exactly once no matter how many clones call `close()`; once
//! closed, [`Watch::next`] yields `None` even if the transport still has
//! buffered events.

use crate::object::ClusterObject;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Notify};

#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    Added(ClusterObject),
    Modified(ClusterObject),
    Deleted(ClusterObject),
    /// The server reported an error on the stream.
    Error(String),
}

impl WatchEvent {
    pub fn object(&self) -> Option<&ClusterObject> {
        match self {
            WatchEvent::Added(o) | WatchEvent::Modified(o) | WatchEvent::Deleted(o) => Some(o),
            WatchEvent::Error(_) => None,
        }
    }
}

type Teardown = Box<dyn FnOnce() + Send>;

struct HandleInner {
    closed: AtomicBool,
    notify: Notify,
    teardown: Mutex<Option<Teardown>>,
}

/// Cloneable close handle for a watch.
#[derive(Clone)]
pub struct WatchHandle {
    inner: Arc<HandleInner>,
}

impl WatchHandle {
    pub fn new(teardown: impl FnOnce() + Send + 'static) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                closed: AtomicBool::new(false),
                notify: Notify::new(),
                teardown: Mutex::new(Some(Box::new(teardown))),
            }),
        }
    }

    /// Close the watch. Returns `true` only for the call that performed the teardown.
    pub fn close(&self) -> bool {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        let teardown = self
            .inner
            .teardown
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(teardown) = teardown {
            teardown();
        }
        self.inner.notify.notify_waiters();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Resolves once the handle has been closed.
    pub async fn closed(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_closed() {
                return;
            }
            notified.await;
        }
    }
}

impl fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchHandle")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// An attached watch: a stream of events plus its close handle.
pub struct Watch {
    handle: WatchHandle,
    events: mpsc::UnboundedReceiver<WatchEvent>,
}

impl Watch {
    pub fn new(handle: WatchHandle, events: mpsc::UnboundedReceiver<WatchEvent>) -> Self {
        Self { handle, events }
    }

    pub fn handle(&self) -> WatchHandle {
        self.handle.clone()
    }

    /// Next event, or `None` once the watch is closed or the transport ended.
    pub async fn next(&mut self) -> Option<WatchEvent> {
        if self.handle.is_closed() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.handle.closed() => None,
            event = self.events.recv() => event,
        }
    }

    pub fn close(&self) -> bool {
        self.handle.close()
    }
}

impl Drop for Watch {
    fn drop(&mut self) {
        self.handle.close();
    }
}

#[derive(Default)]
enum SlotState {
    #[default]
    Empty,
    Attached(WatchHandle),
    Released,
}

/// Shared place where an in-flight wait parks its watch so that another
/// party (a delete of the same object) can tear it down.
///
/// Releasing before the watch is attached makes the later attach close the
/// watch immediately.
#[derive(Clone, Default)]
pub struct WatchSlot {
    state: Arc<Mutex<SlotState>>,
}

impl WatchSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park `handle` in the slot. Returns `false` (and closes the handle) if
    /// the slot was already released.
    pub fn attach(&self, handle: WatchHandle) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if matches!(*state, SlotState::Released) {
            drop(state);
            handle.close();
            return false;
        }
        *state = SlotState::Attached(handle);
        true
    }

    /// Close whatever watch is parked here and mark the slot released.
    pub fn release(&self) {
        let previous = {
            let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
            std::mem::replace(&mut *state, SlotState::Released)
        };
        if let SlotState::Attached(handle) = previous {
            handle.close();
        }
    }

    pub fn is_released(&self) -> bool {
        matches!(
            *self.state.lock().unwrap_or_else(|p| p.into_inner()),
            SlotState::Released
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_handle() -> (WatchHandle, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let handle = WatchHandle::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (handle, count)
    }

    #[test]
    fn test_close_runs_teardown_once() {
        let (handle, count) = counting_handle();
        let clone = handle.clone();

        assert!(handle.close());
        assert!(!clone.close());
        assert!(!handle.close());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_next_returns_none_after_close() {
        let (handle, _count) = counting_handle();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut watch = Watch::new(handle.clone(), rx);

        tx.send(WatchEvent::Error("first".into())).unwrap();
        assert_eq!(watch.next().await, Some(WatchEvent::Error("first".into())));

        handle.close();
        tx.send(WatchEvent::Error("late".into())).unwrap();
        assert_eq!(watch.next().await, None);
    }

    #[tokio::test]
    async fn test_closed_wakes_pending_next() {
        let (handle, _count) = counting_handle();
        let (_tx, rx) = mpsc::unbounded_channel();
        let mut watch = Watch::new(handle.clone(), rx);

        let waiter = tokio::spawn(async move { watch.next().await });
        tokio::task::yield_now().await;
        handle.close();

        assert_eq!(waiter.await.unwrap(), None);
    }

    #[test]
    fn test_drop_closes_watch() {
        let (handle, count) = counting_handle();
        let (_tx, rx) = mpsc::unbounded_channel();
        drop(Watch::new(handle.clone(), rx));

        assert!(handle.is_closed());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_slot_release_before_attach_closes_late_watch() {
        let slot = WatchSlot::new();
        slot.release();

        let (handle, count) = counting_handle();
        assert!(!slot.attach(handle.clone()));
        assert!(handle.is_closed());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_slot_release_closes_attached_watch() {
        let slot = WatchSlot::new();
        let (handle, count) = counting_handle();
        assert!(slot.attach(handle.clone()));

        slot.release();
        slot.release();
        assert!(slot.is_released());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
