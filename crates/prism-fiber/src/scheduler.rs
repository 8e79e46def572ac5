//! Per-root frame callbacks.
//!
//! Subscriptions run once per tick in ascending priority; equal priorities
//! keep subscription order. Each tick works on a snapshot taken when it
//! starts, so subscribing or unsubscribing from inside a callback takes
//! effect on the next tick.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Instant;

use prism_engine::graph::SceneGraph;
use prism_engine::time::{FrameClock, FrameTime};

use crate::context::Environment;
use crate::error::PrismError;

/// What a frame callback gets to work with.
pub struct FrameCtx<'a> {
    pub time: FrameTime,
    /// The root's native graph, mutably borrowed for the whole tick.
    pub graph: &'a mut SceneGraph,
    pub env: &'a Environment,
}

pub type FrameCallback = Box<dyn FnMut(&mut FrameCtx<'_>) -> anyhow::Result<()>>;

struct Entry {
    id: u64,
    priority: i32,
    callback: Rc<RefCell<FrameCallback>>,
}

struct Inner {
    entries: Vec<Entry>,
    next_id: u64,
    clock: FrameClock,
    running: bool,
}

/// Handle returned by [`FrameScheduler::subscribe`].
#[derive(Clone)]
pub struct Subscription {
    id: u64,
    priority: i32,
    inner: Weak<RefCell<Inner>>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Removes the callback. Safe to call from inside a tick and more than once.
    pub fn unsubscribe(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.borrow_mut().entries.retain(|e| e.id != self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).field("priority", &self.priority).finish()
    }
}

/// Result of running one tick's subscribers.
#[derive(Debug, Default)]
pub struct TickOutcome {
    pub ran: usize,
    pub errors: Vec<PrismError>,
}

/// Cloneable handle to a root's frame loop.
#[derive(Clone)]
pub struct FrameScheduler {
    inner: Rc<RefCell<Inner>>,
}

impl FrameScheduler {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(start: Instant) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                entries: Vec::new(),
                next_id: 0,
                clock: FrameClock::starting_at(start),
                running: true,
            })),
        }
    }

    pub fn subscribe(
        &self,
        priority: i32,
        callback: impl FnMut(&mut FrameCtx<'_>) -> anyhow::Result<()> + 'static,
    ) -> Subscription {
        self.subscribe_shared(priority, Rc::new(RefCell::new(Box::new(callback))))
    }

    /// Subscribes a callback cell the caller can swap the contents of.
    pub(crate) fn subscribe_shared(&self, priority: i32, callback: Rc<RefCell<FrameCallback>>) -> Subscription {
        let mut inner = self.inner.borrow_mut();
        inner.next_id += 1;
        let id = inner.next_id;
        // after every entry with priority <= ours keeps ties in insertion order
        let at = inner.entries.partition_point(|e| e.priority <= priority);
        inner.entries.insert(at, Entry { id, priority, callback });
        Subscription { id, priority, inner: Rc::downgrade(&self.inner) }
    }

    pub fn unsubscribe(&self, subscription: &Subscription) {
        subscription.unsubscribe();
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_running(&self) -> bool {
        self.inner.borrow().running
    }

    /// Halts future ticks. A tick already running completes.
    pub fn stop(&self) {
        self.inner.borrow_mut().running = false;
    }

    /// Resumes ticking; the first delta after a pause is zero.
    pub fn start(&self) {
        let mut inner = self.inner.borrow_mut();
        if !inner.running {
            inner.clock.reset();
            inner.running = true;
        }
    }

    /// Advances the clock. `None` once stopped.
    pub fn advance(&self, now: Instant) -> Option<FrameTime> {
        let mut inner = self.inner.borrow_mut();
        if !inner.running {
            return None;
        }
        Some(inner.clock.tick_at(now))
    }

    /// Runs the current subscribers against `graph`.
    ///
    /// A failing callback is reported in the outcome and the remaining
    /// callbacks still run.
    pub fn run(&self, time: FrameTime, graph: &mut SceneGraph, env: &Environment) -> TickOutcome {
        let snapshot: Vec<_> = self.inner.borrow().entries.iter().map(|e| (e.id, e.callback.clone())).collect();

        let mut outcome = TickOutcome::default();
        let mut ctx = FrameCtx { time, graph, env };
        for (id, callback) in snapshot {
            let Ok(mut callback) = callback.try_borrow_mut() else {
                log::warn!("frame callback {id} is already running; skipped");
                continue;
            };
            outcome.ran += 1;
            if let Err(err) = callback(&mut ctx) {
                outcome.errors.push(PrismError::SchedulerCallback(format!("{err:#}")));
            }
        }
        outcome
    }
}

impl Default for FrameScheduler {
    fn default() -> Self {
        Self::new()
    }
}
