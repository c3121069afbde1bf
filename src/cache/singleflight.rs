//! At most one concurrent computation per key
//!
//! The first caller for a key becomes the leader and computes; callers that
//! arrive while it runs wait on the flight and receive a clone of the
//! leader's value. A leader that panics abandons its flight, which releases
//! the waiters to retry (one of them becomes the next leader).

use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;

/// Whether the caller computed the value or received another caller's
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Leader,
    Follower,
}

enum Outcome<T> {
    Finished(T),
    Abandoned,
}

struct Flight<T> {
    outcome: Mutex<Option<Outcome<T>>>,
    done: Condvar,
}

impl<T: Clone> Flight<T> {
    fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    /// Block until the leader finishes; `None` when it abandoned the flight
    fn wait(&self) -> Option<T> {
        let mut outcome = self.outcome.lock();
        while outcome.is_none() {
            self.done.wait(&mut outcome);
        }
        match outcome.as_ref() {
            Some(Outcome::Finished(value)) => Some(value.clone()),
            _ => None,
        }
    }
}

/// Releases the flight however the leader exits
struct LeaderGuard<'a, T: Clone> {
    flights: &'a Mutex<HashMap<String, Arc<Flight<T>>>>,
    key: &'a str,
    flight: Arc<Flight<T>>,
    finished: bool,
}

impl<T: Clone> LeaderGuard<'_, T> {
    fn finish(mut self, value: T) {
        self.publish(Outcome::Finished(value));
        self.finished = true;
    }

    fn publish(&self, outcome: Outcome<T>) {
        // unregister first so late arrivals start a fresh flight
        self.flights.lock().remove(self.key);
        *self.flight.outcome.lock() = Some(outcome);
        self.flight.done.notify_all();
    }
}

impl<T: Clone> Drop for LeaderGuard<'_, T> {
    fn drop(&mut self) {
        if !self.finished {
            self.publish(Outcome::Abandoned);
        }
    }
}

pub struct Singleflight<T> {
    flights: Mutex<HashMap<String, Arc<Flight<T>>>>,
}

impl<T: Clone> Default for Singleflight<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Singleflight<T> {
    pub fn new() -> Self {
        Self {
            flights: Mutex::new(HashMap::new()),
        }
    }

    /// Keys with a computation currently running
    pub fn in_flight(&self) -> usize {
        self.flights.lock().len()
    }

    /// Run `compute` unless a flight for `key` is already running
    pub fn run<F>(&self, key: &str, compute: F) -> (T, Role)
    where
        F: FnOnce() -> T,
    {
        let flight = loop {
            let existing = {
                let mut flights = self.flights.lock();
                match flights.get(key) {
                    Some(flight) => Some(Arc::clone(flight)),
                    None => {
                        let flight = Arc::new(Flight::new());
                        flights.insert(key.to_string(), Arc::clone(&flight));
                        break flight;
                    }
                }
            };
            if let Some(flight) = existing {
                if let Some(value) = flight.wait() {
                    return (value, Role::Follower);
                }
            }
        };

        let guard = LeaderGuard {
            flights: &self.flights,
            key,
            flight,
            finished: false,
        };
        let value = compute();
        guard.finish(value.clone());
        (value, Role::Leader)
    }
}
