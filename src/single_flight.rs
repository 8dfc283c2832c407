//! Per-key coalescing of concurrent computations.
//!
//! The first caller for a key runs the computation; callers arriving while it
//! is in flight block until it finishes and receive a clone of its result.
//! Different keys never wait on each other. If the leading computation panics,
//! waiters run the computation themselves.
//!
//! A caller on the leader's own thread never waits: it computes directly.
//! That happens when the leader blocks inside a rayon join and the worker
//! steals a job asking for the same key.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use rustc_hash::FxHashMap;

enum State<V> {
    Pending,
    Done(V),
    Abandoned,
}

struct Flight<V> {
    state: Mutex<State<V>>,
    done: Condvar,
    leader: ThreadId,
}

impl<V> Flight<V> {
    fn new() -> Self {
        Self {
            state: Mutex::new(State::Pending),
            done: Condvar::new(),
            leader: thread::current().id(),
        }
    }

    fn state(&self) -> MutexGuard<'_, State<V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct SingleFlight<V> {
    inflight: Mutex<FxHashMap<String, Arc<Flight<V>>>>,
}

impl<V> Default for SingleFlight<V> {
    fn default() -> Self {
        Self {
            inflight: Mutex::new(FxHashMap::default()),
        }
    }
}

/// Finishes the flight on drop: removes it from the map and wakes waiters,
/// marking it abandoned if no result was published.
struct Leader<'a, V> {
    group: &'a SingleFlight<V>,
    key: &'a str,
    flight: Arc<Flight<V>>,
}

impl<V> Drop for Leader<'_, V> {
    fn drop(&mut self) {
        {
            let mut state = self.flight.state();
            if matches!(*state, State::Pending) {
                *state = State::Abandoned;
            }
        }
        self.flight.done.notify_all();
        self.group.map().remove(self.key);
    }
}

impl<V> SingleFlight<V> {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> MutexGuard<'_, FxHashMap<String, Arc<Flight<V>>>> {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of keys currently in flight.
    pub fn in_flight(&self) -> usize {
        self.map().len()
    }
}

impl<V: Clone> SingleFlight<V> {
    /// Run `f` for `key` unless a run for the same key is already in flight,
    /// in which case wait for and return its result.
    pub fn work<F: FnOnce() -> V>(&self, key: &str, f: F) -> V {
        let (flight, leading) = {
            let mut map = self.map();
            match map.get(key) {
                Some(flight) => (Arc::clone(flight), false),
                None => {
                    let flight = Arc::new(Flight::new());
                    map.insert(key.to_string(), Arc::clone(&flight));
                    (flight, true)
                }
            }
        };

        if leading {
            let leader = Leader {
                group: self,
                key,
                flight,
            };
            let value = f();
            *leader.flight.state() = State::Done(value.clone());
            drop(leader);
            return value;
        }

        if flight.leader == thread::current().id() {
            return f();
        }

        let mut state = flight.state();
        loop {
            if let State::Done(value) = &*state {
                return value.clone();
            }
            if matches!(*state, State::Abandoned) {
                drop(state);
                return f();
            }
            state = flight.done.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
    }
}
