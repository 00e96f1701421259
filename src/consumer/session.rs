//! Consumer sessions: eras of fetching bounded by assignment reshapes
//!
//! A session owns a cancellation scope, a count of the workers running under
//! it, and the pending offset loads of its single in-flight resolution
//! cycle. Stopping a session cancels the scope, waits for the worker count
//! to reach zero, and hands the pending loads to the next era; that handoff
//! is how in-flight offset resolution survives an assignment change.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

use super::loads::LoadSet;

/// The load state of a session's resolution cycle, all behind one lock.
///
/// `wakeup` is present exactly while a resolution worker has installed
/// `waiting` and is parked until the next metadata update; the channel has
/// capacity one so repeated updates coalesce into a single signal.
#[derive(Default)]
pub(crate) struct SessionLoads {
    pub(crate) waiting: LoadSet,
    pub(crate) loading: LoadSet,
    pub(crate) wakeup: Option<mpsc::Sender<()>>,
}

/// An era of fetching for a set of cursors.
///
/// The set can grow without ending the era; removing anything from it stops
/// the session and starts a new one. The worker count lives on the session,
/// not the consumer, so a new session's count can never be inflated by
/// stragglers of the old one.
pub(crate) struct ConsumerSession {
    cancel: CancellationToken,
    workers: AtomicUsize,
    workers_drained: Notify,
    pub(crate) loads: Mutex<SessionLoads>,
}

impl ConsumerSession {
    /// A live session whose scope is a child of `parent`
    pub(crate) fn new(parent: &CancellationToken) -> Arc<ConsumerSession> {
        Arc::new(ConsumerSession {
            cancel: parent.child_token(),
            workers: AtomicUsize::new(0),
            workers_drained: Notify::new(),
            loads: Mutex::new(SessionLoads::default()),
        })
    }

    /// The process-wide "no session" sentinel.
    ///
    /// The session cell cannot hold "absent", so this value stands in for
    /// it; sources use a single identity check against it to decide whether
    /// to enter the fetch loop. Its scope is born cancelled.
    pub(crate) fn no_session() -> Arc<ConsumerSession> {
        static NO_SESSION: OnceLock<Arc<ConsumerSession>> = OnceLock::new();
        NO_SESSION
            .get_or_init(|| {
                let cancel = CancellationToken::new();
                cancel.cancel();
                Arc::new(ConsumerSession {
                    cancel,
                    workers: AtomicUsize::new(0),
                    workers_drained: Notify::new(),
                    loads: Mutex::new(SessionLoads::default()),
                })
            })
            .clone()
    }

    /// Identity comparison against the sentinel; never structural.
    pub(crate) fn is_no_session(session: &Arc<ConsumerSession>) -> bool {
        Arc::ptr_eq(session, &ConsumerSession::no_session())
    }

    /// The session's cancellation scope
    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cancel the session's scope: in-flight RPCs abort, resolution workers
    /// return early, fetch loops stop buffering.
    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Count a new worker under this session. The returned guard must live
    /// for the whole of the worker's task.
    pub(crate) fn begin_work(self: &Arc<Self>) -> WorkerGuard {
        self.workers.fetch_add(1, Ordering::SeqCst);
        WorkerGuard {
            session: Arc::clone(self),
        }
    }

    fn end_work(&self) {
        if self.workers.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.workers_drained.notify_waiters();
        }
    }

    pub(crate) fn worker_count(&self) -> usize {
        self.workers.load(Ordering::SeqCst)
    }

    /// Park until every worker counted under this session has finished
    pub(crate) async fn wait_workers_drained(&self) {
        loop {
            let drained = self.workers_drained.notified();
            tokio::pin!(drained);
            drained.as_mut().enable();
            if self.worker_count() == 0 {
                return;
            }
            drained.await;
        }
    }

    /// Called after the client's metadata refreshes. A no-op unless a
    /// resolution cycle is parked waiting; repeated calls coalesce into one
    /// wakeup.
    pub(crate) fn on_metadata_update(&self) {
        let loads = self.loads.lock();
        if loads.waiting.is_empty() {
            return;
        }
        if let Some(wakeup) = &loads.wakeup {
            let _ = wakeup.try_send(());
        }
    }
}

/// RAII guard for the session worker count
pub(crate) struct WorkerGuard {
    session: Arc<ConsumerSession>,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.session.end_work();
    }
}
