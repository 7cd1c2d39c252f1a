//! Interval-driven re-evaluation of derivations.

use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use tabula_common::ElementRef;

/// Something that can re-run a derivation when its interval elapses.
pub(crate) trait PeriodicTarget: Send + Sync {
    fn tick(self: Arc<Self>, target: ElementRef, generation: u64);
}

struct Entry {
    due: Instant,
    interval: Duration,
    generation: u64,
}

#[derive(Default)]
struct State {
    entries: FxHashMap<ElementRef, Entry>,
    stopped: bool,
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    wake: Condvar,
}

impl Shared {
    /// Targets due at `now`, rescheduled for their next tick.
    fn take_due(state: &mut State, now: Instant) -> Vec<(ElementRef, u64)> {
        let mut due = Vec::new();
        for (target, entry) in state.entries.iter_mut() {
            if entry.due <= now {
                due.push((*target, entry.generation));
                entry.due = now + entry.interval;
            }
        }
        due.sort();
        due
    }
}

#[derive(Default)]
pub(crate) struct PeriodicScheduler {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicScheduler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn start(&self, target: Weak<dyn PeriodicTarget>) -> std::io::Result<()> {
        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("tabula-periodic".into())
            .spawn(move || run(shared, target))?;
        *self.thread.lock() = Some(handle);
        Ok(())
    }

    pub(crate) fn schedule(&self, target: ElementRef, interval: Duration, generation: u64) {
        let interval = interval.max(Duration::from_millis(1));
        let mut state = self.shared.state.lock();
        state.entries.insert(
            target,
            Entry {
                due: Instant::now() + interval,
                interval,
                generation,
            },
        );
        self.shared.wake.notify_one();
    }

    pub(crate) fn cancel(&self, target: &ElementRef) -> bool {
        self.shared.state.lock().entries.remove(target).is_some()
    }

    pub(crate) fn cancel_where(&self, doomed: impl Fn(&ElementRef) -> bool) {
        self.shared.state.lock().entries.retain(|t, _| !doomed(t));
    }

    pub(crate) fn scheduled(&self) -> usize {
        self.shared.state.lock().entries.len()
    }

    pub(crate) fn stop(&self) {
        {
            let mut state = self.shared.state.lock();
            state.stopped = true;
            state.entries.clear();
            self.shared.wake.notify_all();
        }
        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for PeriodicScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(shared: Arc<Shared>, target: Weak<dyn PeriodicTarget>) {
    let mut state = shared.state.lock();
    loop {
        if state.stopped {
            return;
        }
        let now = Instant::now();
        let due = Shared::take_due(&mut state, now);
        if !due.is_empty() {
            drop(state);
            let Some(engine) = target.upgrade() else {
                return;
            };
            for (element, generation) in due {
                Arc::clone(&engine).tick(element, generation);
            }
            drop(engine);
            state = shared.state.lock();
            continue;
        }
        match state.entries.values().map(|e| e.due).min() {
            Some(next) => {
                shared.wake.wait_until(&mut state, next);
            }
            None => shared.wake.wait(&mut state),
        }
    }
}
