//! The two moving boundaries of an unbounded walk.
use std::net::IpAddr;

use parking_lot::Mutex;

use crate::address::{checked_step, Direction};

#[derive(Debug)]
struct Bounds {
    ascending: Edge,
    descending: Edge,
}

#[derive(Debug)]
struct Edge {
    at: IpAddr,
    steps: u64,
    exhausted: bool,
}

impl Edge {
    const fn new(seed: IpAddr) -> Self {
        Self {
            at: seed,
            steps: 0,
            exhausted: false,
        }
    }
}

/// Shared walk state, one per scan.
///
/// Both edges start at the seed on the first [`claim`](Self::claim) and then
/// only ever move away from it, so no address is handed out twice. `None`
/// inside the lock means nobody has claimed the frontier yet; the zero
/// address is a perfectly good seed and cannot double as that marker.
#[derive(Debug)]
pub struct Frontier {
    bounds: Mutex<Option<Bounds>>,
    limit: Option<u64>,
}

impl Frontier {
    /// `limit` caps the number of steps each direction may take.
    pub const fn new(limit: Option<u64>) -> Self {
        Self {
            bounds: Mutex::new(None),
            limit,
        }
    }

    /// Initialises both edges to `seed` if the frontier is still unset.
    /// Returns whether this call did the initialisation.
    pub fn claim(&self, seed: IpAddr) -> bool {
        let mut bounds = self.bounds.lock();
        if bounds.is_some() {
            return false;
        }
        *bounds = Some(Bounds {
            ascending: Edge::new(seed),
            descending: Edge::new(seed),
        });
        true
    }

    /// Moves the edge for `direction` one address further out and returns the
    /// new address. `None` once that edge has hit the end of the address
    /// space or the step limit, or if the frontier was never claimed.
    pub fn advance(&self, direction: Direction) -> Option<IpAddr> {
        let mut guard = self.bounds.lock();
        let bounds = guard.as_mut()?;
        let edge = match direction {
            Direction::Increment => &mut bounds.ascending,
            Direction::Decrement => &mut bounds.descending,
        };
        if edge.exhausted {
            return None;
        }
        if self.limit.is_some_and(|limit| edge.steps >= limit) {
            edge.exhausted = true;
            return None;
        }
        match checked_step(edge.at, direction) {
            Some(next) => {
                edge.at = next;
                edge.steps += 1;
                Some(next)
            }
            None => {
                edge.exhausted = true;
                None
            }
        }
    }

    /// Current `(ascending, descending)` edges, if claimed.
    pub fn edges(&self) -> Option<(IpAddr, IpAddr)> {
        self.bounds
            .lock()
            .as_ref()
            .map(|b| (b.ascending.at, b.descending.at))
    }
}
