//! Memoized off-thread resources.
//!
//! Each root owns one [`ResourceCache`]. Loads run on a small worker pool
//! shared by every root; their results come back as settlements that are applied on the root's thread
//! when the root polls, so the cache is only ever written from one place.
//!
//! Entries are keyed by loader type plus a structurally compared key:
//! - resolved hits return the shared value
//! - pending hits join the load already in flight
//! - rejected entries return their error until retried
//!
//! Components hold a reference on the entry they committed with. When the
//! last reference goes away (key change or unmount) the entry is dropped.
//! Entries a component asked for but never committed with are swept after
//! the first commit that no longer asks for them; a load still in flight then
//! has its settlement discarded. Entries started through [`ResourceCache::preload`]
//! and never asked for by a component stay until [`ResourceCache::clear`].

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::OnceLock;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use crate::error::PrismError;

/// Produces a value for a key. Runs on a loader pool thread.
pub trait Loader: Clone + Send + 'static {
    type Key: Clone + Eq + Hash + Debug + Send + 'static;
    type Output: Send + 'static;

    fn load(&self, key: &Self::Key) -> anyhow::Result<Self::Output>;
}

/// Answer of [`ResourceCache::resolve`].
#[derive(Debug)]
pub enum Resolution<V> {
    Ready(Rc<V>),
    Pending,
    Failed(PrismError),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum EntryState {
    Pending,
    Resolved,
    Rejected,
}

enum Slot<V> {
    Pending,
    Resolved(Rc<V>),
    Rejected(String),
}

struct Entry<V> {
    slot: Slot<V>,
    refs: usize,
    /// Asked for by a component; such entries are swept once unused.
    claimed: bool,
    /// Render pass that last asked for the entry.
    seen: u64,
}

impl<V> Entry<V> {
    fn new() -> Self {
        Self { slot: Slot::Pending, refs: 0, claimed: false, seen: 0 }
    }
}

struct Store<L: Loader> {
    entries: HashMap<L::Key, Entry<L::Output>>,
}

impl<L: Loader> Store<L> {
    fn settle(&mut self, key: L::Key, result: Result<L::Output, String>) -> bool {
        match self.entries.get_mut(&key) {
            Some(entry) if matches!(entry.slot, Slot::Pending) => {
                entry.slot = match result {
                    Ok(value) => Slot::Resolved(Rc::new(value)),
                    Err(message) => {
                        log::warn!("loading {key:?} failed: {message}");
                        Slot::Rejected(message)
                    }
                };
                true
            }
            _ => {
                log::debug!("discarding settlement for {key:?}: entry is gone");
                false
            }
        }
    }
}

/// Type-erased view of a `Store<L>`.
trait AnyStore {
    fn pending(&self) -> usize;
    fn len(&self) -> usize;
    fn sweep(&mut self, pass: u64) -> usize;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<L: Loader> AnyStore for Store<L> {
    fn pending(&self) -> usize {
        self.entries.values().filter(|e| matches!(e.slot, Slot::Pending)).count()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn sweep(&mut self, pass: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, entry| {
            let keep = !entry.claimed || entry.refs > 0 || entry.seen == pass;
            if !keep {
                log::debug!("sweeping unused {key:?}");
            }
            keep
        });
        before - self.entries.len()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[derive(Default)]
struct Stores(HashMap<TypeId, Box<dyn AnyStore>>);

impl Stores {
    fn get<L: Loader>(&self) -> Option<&Store<L>> {
        self.0.get(&TypeId::of::<L>())?.as_any().downcast_ref()
    }

    fn get_mut<L: Loader>(&mut self) -> &mut Store<L> {
        self.0
            .entry(TypeId::of::<L>())
            .or_insert_with(|| Box::new(Store::<L> { entries: HashMap::new() }))
            .as_any_mut()
            .downcast_mut()
            .expect("stores are keyed by their loader type")
    }
}

type Settlement = Box<dyn FnOnce(&mut Stores) -> bool + Send>;

/// Worker pool every cache hands its loads to. `None` when the pool could
/// not be built; loads then go to rayon's global pool.
fn loader_pool() -> Option<&'static rayon::ThreadPool> {
    static POOL: OnceLock<Option<rayon::ThreadPool>> = OnceLock::new();
    POOL.get_or_init(|| {
        let threads = std::thread::available_parallelism().map_or(2, usize::from).clamp(2, 8);
        rayon::ThreadPoolBuilder::new()
            .thread_name(|i| format!("prism-loader-{i}"))
            .num_threads(threads)
            .build()
            .inspect_err(|err| log::warn!("loader pool unavailable, using the global pool: {err}"))
            .ok()
    })
    .as_ref()
}

/// Per-root resource cache.
///
/// Loads never get a thread of their own: they queue on a pool of at most
/// eight threads shared by all roots, so a scene asking for hundreds of
/// textures at once loads them a few at a time.
pub struct ResourceCache {
    stores: Stores,
    tx: Sender<Settlement>,
    rx: Receiver<Settlement>,
    loads_started: u64,
    pass: u64,
}

impl ResourceCache {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self { stores: Stores::default(), tx, rx, loads_started: 0, pass: 0 }
    }

    /// Looks `key` up, starting a load on a miss.
    pub fn resolve<L: Loader>(&mut self, loader: &L, key: &L::Key) -> Resolution<L::Output> {
        self.lookup(loader, key, false)
    }

    /// [`resolve`](Self::resolve) on behalf of a component in the current
    /// render pass. The entry becomes subject to [`sweep`](Self::sweep).
    pub(crate) fn claim<L: Loader>(&mut self, loader: &L, key: &L::Key) -> Resolution<L::Output> {
        self.lookup(loader, key, true)
    }

    fn lookup<L: Loader>(&mut self, loader: &L, key: &L::Key, claim: bool) -> Resolution<L::Output> {
        let pass = self.pass;
        let store = self.stores.get_mut::<L>();
        if let Some(entry) = store.entries.get_mut(key) {
            if claim {
                entry.claimed = true;
                entry.seen = pass;
            }
            return match &entry.slot {
                Slot::Resolved(value) => Resolution::Ready(value.clone()),
                Slot::Pending => Resolution::Pending,
                Slot::Rejected(message) => Resolution::Failed(PrismError::ResourceLoad {
                    key: format!("{key:?}"),
                    message: message.clone(),
                }),
            };
        }
        let mut entry = Entry::new();
        entry.claimed = claim;
        entry.seen = pass;
        store.entries.insert(key.clone(), entry);
        self.spawn(loader.clone(), key.clone());
        Resolution::Pending
    }

    fn spawn<L: Loader>(&mut self, loader: L, key: L::Key) {
        self.loads_started += 1;
        log::debug!("loading {key:?}");
        let tx = self.tx.clone();
        let job = move || {
            let result = match panic::catch_unwind(AssertUnwindSafe(|| loader.load(&key))) {
                Ok(loaded) => loaded.map_err(|e| format!("{e:#}")),
                Err(_) => Err("loader panicked".to_string()),
            };
            let settlement: Settlement = Box::new(move |stores| stores.get_mut::<L>().settle(key, result));
            // the root may be gone; its results are not wanted then
            let _ = tx.send(settlement);
        };
        match loader_pool() {
            Some(pool) => pool.spawn(job),
            None => rayon::spawn(job),
        }
    }

    /// Starts a render pass. Claims made from here on count as current for
    /// the next [`sweep`](Self::sweep).
    pub(crate) fn begin_pass(&mut self) {
        self.pass += 1;
    }

    /// Drops claimed entries that no component holds and the current pass
    /// did not ask for. Returns how many went.
    pub(crate) fn sweep(&mut self) -> usize {
        let pass = self.pass;
        self.stores.0.values_mut().map(|store| store.sweep(pass)).sum()
    }

    /// State of an entry without starting a load.
    pub fn peek<L: Loader>(&self, key: &L::Key) -> Option<EntryState> {
        let entry = self.stores.get::<L>()?.entries.get(key)?;
        Some(match entry.slot {
            Slot::Pending => EntryState::Pending,
            Slot::Resolved(_) => EntryState::Resolved,
            Slot::Rejected(_) => EntryState::Rejected,
        })
    }

    /// Resolved value, if any, without starting a load.
    pub fn get<L: Loader>(&self, key: &L::Key) -> Option<Rc<L::Output>> {
        match &self.stores.get::<L>()?.entries.get(key)?.slot {
            Slot::Resolved(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// Starts loading `key` ahead of any component asking for it.
    pub fn preload<L: Loader>(&mut self, loader: &L, key: &L::Key) {
        let _ = self.resolve(loader, key);
    }

    /// Forgets a rejected entry and loads it again. Returns `false` when the
    /// entry was not rejected.
    pub fn retry<L: Loader>(&mut self, loader: &L, key: &L::Key) -> bool {
        let store = self.stores.get_mut::<L>();
        if !matches!(store.entries.get(key), Some(Entry { slot: Slot::Rejected(_), .. })) {
            return false;
        }
        store.entries.remove(key);
        let _ = self.resolve(loader, key);
        true
    }

    /// Drops every entry. Loads in flight are not cancelled; their results
    /// are discarded when they arrive.
    pub fn clear(&mut self) {
        self.stores.0.clear();
    }

    pub(crate) fn retain<L: Loader>(&mut self, key: &L::Key) {
        if let Some(entry) = self.stores.get_mut::<L>().entries.get_mut(key) {
            entry.refs += 1;
        }
    }

    /// Drops one reference; the entry goes with its last one, and a load
    /// still in flight for it is discarded when it settles.
    pub(crate) fn release<L: Loader>(&mut self, key: &L::Key) {
        let store = self.stores.get_mut::<L>();
        let Some(entry) = store.entries.get_mut(key) else { return };
        entry.refs = entry.refs.saturating_sub(1);
        if entry.refs == 0 {
            log::debug!("disposing {key:?}");
            store.entries.remove(key);
        }
    }

    pub fn refcount<L: Loader>(&self, key: &L::Key) -> usize {
        self.stores.get::<L>().and_then(|s| s.entries.get(key)).map_or(0, |e| e.refs)
    }

    /// Applies every settlement that has arrived. Returns how many changed an entry.
    pub fn poll_settled(&mut self) -> usize {
        let mut changed = 0;
        while let Ok(settle) = self.rx.try_recv() {
            changed += usize::from(settle(&mut self.stores));
        }
        changed
    }

    /// Blocks until a settlement changes an entry or `timeout` passes, then
    /// applies everything available. Settlements of swept or cleared entries
    /// do not count. Returns `false` on timeout or when nothing is pending.
    pub fn wait_settled(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.poll_settled() > 0 {
                return true;
            }
            if self.pending() == 0 {
                return false;
            }
            match self.rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
                Ok(settle) => {
                    if settle(&mut self.stores) {
                        self.poll_settled();
                        return true;
                    }
                }
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => return false,
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.stores.0.values().map(|s| s.pending()).sum()
    }

    pub fn len(&self) -> usize {
        self.stores.0.values().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of loads started since creation.
    pub fn loads_started(&self) -> u64 {
        self.loads_started
    }
}

impl Default for ResourceCache {
    fn default() -> Self {
        Self::new()
    }
}
