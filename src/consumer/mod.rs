//! The consumer core
//!
//! This module turns user-level partition assignments into a live set of
//! per-partition cursors, keeps that set correct as assignments, broker
//! leadership, or group membership change, and drains buffered fetches into
//! the user's poll call.
//!
//! Everything revolves around the *consumer session*, an era of fetching:
//! additive assignment changes extend the current era, while anything that
//! removes or rewinds a partition stops the era (cancelling its scope,
//! waiting out its workers, and discarding its buffered data) before a new
//! one begins. Offset resolution that was in flight when an era ended is
//! re-offered to the next era rather than lost.

mod direct;
mod group;
mod loads;
mod offset;
mod resolve;
mod session;

pub use group::GroupHandler;
pub use offset::Offset;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::broker::BrokerMap;
use crate::config::ConsumerConfig;
use crate::error::{Result, WindlassError};
use crate::fetch::{Fetch, Fetches, Source};
use crate::metadata::{Cursor, CursorOffset, MetadataView};

use direct::DirectConsumer;
use loads::{LoadKind, LoadSet, OffsetLoad};
use session::ConsumerSession;

/// A full assignment: which partitions to consume and from where
pub type Assignments = HashMap<String, HashMap<i32, Offset>>;

/// How [`Consumer::assign_partitions`] treats existing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignMode {
    /// Assign new offsets without disturbing existing cursors, active
    /// fetches, or buffered data.
    Additive,
    /// Unset every cursor, drop all buffered fetches and pending loads,
    /// then assign anew.
    InvalidateAll,
    /// Invalidate exactly the partitions named in the assignment (they were
    /// lost); the offsets in the map are ignored. No new offsets are
    /// assigned.
    InvalidateMatching,
    /// Rewind exactly the partitions named in the assignment to the given
    /// offset and epoch. No new offsets are assigned.
    SetMatching,
}

impl std::fmt::Display for AssignMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssignMode::Additive => write!(f, "additive"),
            AssignMode::InvalidateAll => write!(f, "invalidate all"),
            AssignMode::InvalidateMatching => write!(f, "invalidate matching"),
            AssignMode::SetMatching => write!(f, "set matching"),
        }
    }
}

/// What drives this consumer's assignments
enum ConsumerKind {
    Unset,
    Direct(DirectConsumer),
    Group(Arc<dyn GroupHandler>),
}

struct ConsumerState {
    kind: ConsumerKind,
    // Set when the client closes; assignments become no-ops.
    dead: bool,
}

#[derive(Default)]
struct DrainState {
    ready: Vec<Arc<Source>>,
    fakes: Vec<Fetch>,
}

/// The consumer core.
///
/// Constructed once per client and shared behind an [`Arc`]; the assignment
/// engine, resolution workers, fetch loops and the user's poll all operate
/// on the same instance.
pub struct Consumer {
    pub(crate) cfg: ConsumerConfig,
    pub(crate) metadata: Arc<dyn MetadataView>,
    pub(crate) brokers: Arc<BrokerMap>,

    // Root scope; sessions are children, so closing the client cancels
    // every era at once.
    shutdown: CancellationToken,

    state: tokio::sync::Mutex<ConsumerState>,

    // Held from the start of a session stop through the start of the next
    // session, so no assignment can interleave with the swap. Additive
    // changes hold it briefly via guard_session_change.
    session_change: tokio::sync::Mutex<()>,

    // The current session or the no-session sentinel; identity-compared.
    session: Mutex<Arc<ConsumerSession>>,

    // Cursors made usable in the current assignment epoch.
    using_cursors: Mutex<HashMap<(String, i32), Arc<Cursor>>>,

    sources: Mutex<Vec<Arc<Source>>>,

    drain: Mutex<DrainState>,
    drain_ready: Notify,
}

impl Consumer {
    /// A consumer reading metadata through `metadata` and issuing RPCs
    /// through the brokers in `brokers`.
    pub fn new(
        cfg: ConsumerConfig,
        metadata: Arc<dyn MetadataView>,
        brokers: Arc<BrokerMap>,
    ) -> Arc<Consumer> {
        Arc::new(Consumer {
            cfg,
            metadata,
            brokers,
            shutdown: CancellationToken::new(),
            state: tokio::sync::Mutex::new(ConsumerState {
                kind: ConsumerKind::Unset,
                dead: false,
            }),
            session_change: tokio::sync::Mutex::new(()),
            session: Mutex::new(ConsumerSession::no_session()),
            using_cursors: Mutex::new(HashMap::new()),
            sources: Mutex::new(Vec::new()),
            drain: Mutex::new(DrainState::default()),
            drain_ready: Notify::new(),
        })
    }

    /// Consume the topics named by the configuration directly, without a
    /// group. Assignments grow as matching topics appear in metadata.
    pub async fn init_direct(self: &Arc<Self>) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.dead {
            return Err(WindlassError::ClientClosed);
        }
        state.kind = ConsumerKind::Direct(DirectConsumer::new(&self.cfg)?);
        drop(state);
        self.metadata.trigger_update_now();
        Ok(())
    }

    /// Consume as part of a group; `handler` owns membership and receives
    /// uncommitted-offset updates.
    pub async fn init_group(self: &Arc<Self>, handler: Arc<dyn GroupHandler>) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.dead {
            return Err(WindlassError::ClientClosed);
        }
        state.kind = ConsumerKind::Group(handler);
        Ok(())
    }

    /// Invalidate all assignments and leave any group, returning the
    /// consumer to its unset state.
    pub async fn unset(self: &Arc<Self>) {
        let mut state = self.state.lock().await;
        self.apply_assignments(&Assignments::new(), AssignMode::InvalidateAll)
            .await;
        if let ConsumerKind::Group(group) = &state.kind {
            group.leave();
        }
        state.kind = ConsumerKind::Unset;
    }

    /// Permanently shut the consumer down. Further assignment calls are
    /// no-ops.
    pub async fn shutdown(self: &Arc<Self>) {
        let mut state = self.state.lock().await;
        if state.dead {
            return;
        }
        state.dead = true;
        self.apply_assignments(&Assignments::new(), AssignMode::InvalidateAll)
            .await;
        if let ConsumerKind::Group(group) = &state.kind {
            group.leave();
        }
        state.kind = ConsumerKind::Unset;
        drop(state);
        // Retire the empty session the invalidation started; the sentinel
        // tells sources the client is done for good.
        let (guard, _) = self.stop_session().await;
        drop(guard);
        self.shutdown.cancel();
        // Wake a parked poll so it can observe the closed client.
        self.drain_ready.notify_waiters();
    }

    /// Apply an assignment under the given mode. Invoked by the direct and
    /// group layers; dead consumers ignore the call.
    pub async fn assign_partitions(
        self: &Arc<Self>,
        assignments: &Assignments,
        how: AssignMode,
    ) {
        let state = self.state.lock().await;
        if state.dead {
            return;
        }
        self.apply_assignments(assignments, how).await;
        drop(state);
    }

    /// Called by the metadata subsystem after every refresh.
    pub async fn on_metadata_update(self: &Arc<Self>) {
        {
            let mut state = self.state.lock().await;
            match &mut state.kind {
                ConsumerKind::Unset => return,
                ConsumerKind::Direct(direct) => {
                    let new = direct.find_new_assignments(&self.metadata.load_topics());
                    if !new.is_empty() {
                        self.apply_assignments(&new, AssignMode::Additive).await;
                    }
                }
                ConsumerKind::Group(group) => {
                    group.find_new_assignments(&self.metadata.load_topics());
                }
            }
        }
        self.load_session().on_metadata_update();
    }

    /// Whether an era of fetching is currently live
    pub fn session_active(&self) -> bool {
        !ConsumerSession::is_no_session(&self.load_session())
    }

    /// Register a fetch source so session transitions can reset and poke it
    pub fn register_source(&self, source: Arc<Source>) {
        self.sources.lock().push(source);
    }

    /// Called by a fetch loop when `source` has a buffered fetch ready for
    /// draining.
    pub fn source_ready(&self, source: &Arc<Source>) {
        self.drain.lock().ready.push(Arc::clone(source));
        self.drain_ready.notify_waiters();
    }

    // ==== assignment engine ====

    pub(crate) async fn apply_assignments(
        self: &Arc<Self>,
        assignments: &Assignments,
        how: AssignMode,
    ) {
        debug!(mode = %how, topics = assignments.len(), "applying assignment");

        let mut load_offsets = LoadSet::default();
        let (guard, existing_session) = match how {
            AssignMode::Additive => {
                let (guard, session) = self.guard_session_change().await;
                (guard, Some(session))
            }
            _ => {
                let (guard, pending) = self.stop_session().await;
                load_offsets = pending;
                self.reshape_cursors(assignments, how);
                match how {
                    AssignMode::InvalidateAll => load_offsets = LoadSet::default(),
                    AssignMode::InvalidateMatching => {
                        load_offsets.filter(|t, p| assignments_contain(assignments, t, p));
                    }
                    AssignMode::SetMatching => {
                        load_offsets.filter(|t, p| !assignments_contain(assignments, t, p));
                    }
                    AssignMode::Additive => unreachable!(),
                }
                (guard, None)
            }
        };

        // Matching modes exist to mutate existing state; they and empty
        // assignments add no new offsets.
        let place = !assignments.is_empty()
            && !matches!(
                how,
                AssignMode::InvalidateMatching | AssignMode::SetMatching
            );
        if place {
            debug!("assignment requires loading offsets");
            self.place_offsets(assignments, &mut load_offsets);
        }

        let session = match existing_session {
            Some(session) => {
                drop(guard);
                session
            }
            None => self.start_new_session(guard),
        };
        self.load_with_session(&session, load_offsets, true);
    }

    /// Unset or rewind every in-use cursor as the mode dictates, keeping
    /// the rest.
    fn reshape_cursors(&self, assignments: &Assignments, how: AssignMode) {
        let mut registry = self.using_cursors.lock();
        let prior = std::mem::take(&mut *registry);
        for ((topic, partition), cursor) in prior {
            let mut keep = true;
            match how {
                AssignMode::InvalidateAll => {
                    cursor.unset();
                    keep = false;
                }
                AssignMode::InvalidateMatching | AssignMode::SetMatching => {
                    if let Some(offset) =
                        assignments.get(&topic).and_then(|t| t.get(&partition))
                    {
                        if how == AssignMode::InvalidateMatching {
                            cursor.unset();
                            keep = false;
                        } else {
                            debug!(
                                topic = %topic,
                                partition,
                                offset = offset.at,
                                epoch = offset.epoch,
                                "rewinding cursor"
                            );
                            cursor.set_offset(CursorOffset {
                                offset: offset.at,
                                last_consumed_epoch: offset.epoch,
                            });
                        }
                    }
                }
                AssignMode::Additive => unreachable!(),
            }
            if keep {
                registry.insert((topic, partition), cursor);
            }
        }
    }

    /// Route each assigned offset: straight to a cursor when the position is
    /// exact and the partition is known, otherwise into the load set for
    /// resolution.
    fn place_offsets(&self, assignments: &Assignments, load_offsets: &mut LoadSet) {
        let topics = self.metadata.load_topics();
        for (topic, partitions) in assignments {
            let topic_meta = topics.get(topic);
            for (&partition, offset) in partitions {
                let mut offset = *offset;
                // Exact requests collapse the relative portion immediately.
                if offset.at >= 0 {
                    offset.at = (offset.at + offset.relative).max(0);
                    offset.relative = 0;
                }

                // An exact offset with an epoch asks for truncation
                // detection before use.
                if offset.at >= 0 && offset.epoch >= 0 {
                    load_offsets.add_load(
                        topic,
                        partition,
                        LoadKind::Epoch,
                        OffsetLoad {
                            replica: -1,
                            offset,
                        },
                    );
                    continue;
                }

                // An exact offset on a partition we have metadata for needs
                // no RPC at all.
                if offset.at >= 0 {
                    if let Some(partition_meta) =
                        topic_meta.and_then(|t| t.partition(partition))
                    {
                        debug!(
                            topic = %topic,
                            partition,
                            offset = offset.at,
                            leader_epoch = partition_meta.leader_epoch,
                            "assigning exact offset"
                        );
                        partition_meta.cursor.set_offset(CursorOffset {
                            offset: offset.at,
                            last_consumed_epoch: partition_meta.leader_epoch,
                        });
                        partition_meta.cursor.allow_usable();
                        self.use_cursor(Arc::clone(&partition_meta.cursor));
                        continue;
                    }
                }

                // Sentinel start/end, or exact on a partition not loaded
                // yet: list offsets to find out what to use.
                load_offsets.add_load(
                    topic,
                    partition,
                    LoadKind::List,
                    OffsetLoad {
                        replica: -1,
                        offset,
                    },
                );
            }
        }
    }

    pub(crate) fn use_cursor(&self, cursor: Arc<Cursor>) {
        self.using_cursors
            .lock()
            .insert((cursor.topic().to_string(), cursor.partition()), cursor);
    }

    // ==== session lifecycle ====

    pub(crate) fn load_session(&self) -> Arc<ConsumerSession> {
        self.session.lock().clone()
    }

    /// Hold the session-change mutex for an additive-only change, creating
    /// a session on demand. The guard must be dropped when the change is
    /// done.
    async fn guard_session_change(
        &self,
    ) -> (tokio::sync::MutexGuard<'_, ()>, Arc<ConsumerSession>) {
        let guard = self.session_change.lock().await;
        let mut cell = self.session.lock();
        let session = if ConsumerSession::is_no_session(&cell) {
            // Sources can begin their fetch loops against the fresh
            // session; they just have no usable cursors yet.
            let session = ConsumerSession::new(&self.shutdown);
            *cell = Arc::clone(&session);
            session
        } else {
            Arc::clone(&cell)
        };
        drop(cell);
        (guard, session)
    }

    /// Stop the active session, if any: cancel its scope, wait until every
    /// worker has finished, reset per-session source state, and discard
    /// buffered fetches (fake error fetches are deliberately retained so
    /// fatal errors survive the stop).
    ///
    /// Returns the session-change guard, still held and to be consumed by
    /// [`Consumer::start_new_session`], together with every offset load
    /// that was waiting or in flight.
    pub(crate) async fn stop_session(
        &self,
    ) -> (tokio::sync::MutexGuard<'_, ()>, LoadSet) {
        let guard = self.session_change.lock().await;

        let session = self.load_session();
        if ConsumerSession::is_no_session(&session) {
            return (guard, LoadSet::default());
        }

        debug!("stopping consumer session");

        // Cancel before publishing the sentinel; sources check the sentinel
        // first and the scope second, so either check stops them.
        session.cancel();
        *self.session.lock() = ConsumerSession::no_session();

        // No new work can start against the old session; wait out what is
        // already running.
        session.wait_workers_drained().await;

        for source in self.sources.lock().iter() {
            source.reset_session();
        }

        {
            let mut drain = self.drain.lock();
            for ready in drain.ready.drain(..) {
                ready.discard_buffered();
            }
        }

        let pending = {
            let mut loads = session.loads.lock();
            let loading = std::mem::take(&mut loads.loading);
            loads.waiting.merge_from(loading);
            std::mem::take(&mut loads.waiting)
        };
        debug!(
            pending = pending.partition_count(),
            "consumer session stopped"
        );
        pending.each(|topic, partition, _, _| {
            trace!(topic = %topic, partition, "pending offset load re-homed");
        });
        (guard, pending)
    }

    /// Publish a fresh session, release the session-change mutex, and poke
    /// every source back into its fetch loop.
    pub(crate) fn start_new_session(
        &self,
        guard: tokio::sync::MutexGuard<'_, ()>,
    ) -> Arc<ConsumerSession> {
        let session = ConsumerSession::new(&self.shutdown);
        *self.session.lock() = Arc::clone(&session);
        drop(guard);

        for source in self.sources.lock().iter() {
            source.maybe_consume();
        }
        session
    }

    /// Spawn a resolution worker for `loads` under `session`, counting it
    /// so a session stop waits for it.
    pub(crate) fn load_with_session(
        self: &Arc<Self>,
        session: &Arc<ConsumerSession>,
        loads: LoadSet,
        immediate: bool,
    ) {
        if loads.is_empty() {
            return;
        }
        let worker = session.begin_work();
        let consumer = Arc::clone(self);
        let session = Arc::clone(session);
        tokio::spawn(async move {
            let _worker = worker;
            consumer.list_or_epoch(&session, loads, immediate).await;
        });
    }

    // ==== fetch drain ====

    /// Wait for fetches to be available, returning as soon as any source
    /// has buffered one or a fatal partition error is queued. Cancelling
    /// `ctx` returns whatever is available, possibly nothing.
    ///
    /// Always check the returned [`Fetches::errors`]: fatal per-partition
    /// conditions with no records attached are surfaced here through
    /// injected error fetches, exactly once.
    ///
    /// Calling this concurrently from multiple tasks is a contract
    /// violation.
    pub async fn poll_fetches(&self, ctx: &CancellationToken) -> Fetches {
        let fetches = self.fill_fetches().await;
        if !fetches.is_empty() {
            return fetches;
        }

        loop {
            let ready = self.drain_ready.notified();
            tokio::pin!(ready);
            ready.as_mut().enable();

            if !self.has_draining() {
                tokio::select! {
                    _ = ctx.cancelled() => return self.fill_fetches().await,
                    _ = &mut ready => {}
                }
            }

            let fetches = self.fill_fetches().await;
            if !fetches.is_empty() || ctx.is_cancelled() || self.shutdown.is_cancelled() {
                return fetches;
            }
        }
    }

    fn has_draining(&self) -> bool {
        let drain = self.drain.lock();
        !drain.ready.is_empty() || !drain.fakes.is_empty()
    }

    /// One drain pass. Buffered fetches are taken first and uncommitted
    /// progress is recorded under the consumer lock *before* anything is
    /// returned; a revoke-then-commit racing this would otherwise commit
    /// behind records the user is about to process, and a later rebalance
    /// would redeliver them. Fake error fetches are appended last.
    async fn fill_fetches(&self) -> Fetches {
        let mut fetches = Fetches::default();

        let ready = {
            let mut drain = self.drain.lock();
            std::mem::take(&mut drain.ready)
        };
        for source in &ready {
            fetches.push(source.take_buffered());
        }

        if !fetches.is_empty() {
            let state = self.state.lock().await;
            if let ConsumerKind::Group(group) = &state.kind {
                group.update_uncommitted(&fetches);
            }
        }

        {
            let mut drain = self.drain.lock();
            for fake in drain.fakes.drain(..) {
                fetches.push(fake);
            }
        }
        fetches
    }

    /// Queue a synthetic fetch carrying a fatal partition error so the user
    /// observes it on the next poll.
    pub(crate) fn add_fake_fetch(&self, topic: &str, partition: i32, error: WindlassError) {
        debug!(topic = %topic, partition, error = %error, "queueing error fetch");
        self.drain
            .lock()
            .fakes
            .push(Fetch::error_fetch(topic, partition, error));
        self.drain_ready.notify_waiters();
    }
}

fn assignments_contain(assignments: &Assignments, topic: &str, partition: i32) -> bool {
    assignments
        .get(topic)
        .is_some_and(|t| t.contains_key(&partition))
}
