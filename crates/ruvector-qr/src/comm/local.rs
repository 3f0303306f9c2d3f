//! In-process process group: one thread per rank.
//!
//! [`LocalGroup`] wires `size` [`LocalCommunicator`]s together with a shared
//! reduction buffer guarded by a barrier and one unbounded channel per
//! ordered pair of ranks. It behaves like a real coordinator/worker
//! deployment (blocking collectives, ordered point-to-point delivery) and is
//! what the distributed tests run on.
//!
//! A communicator that is dropped (its rank returned or panicked) leaves the
//! group: collectives still waiting on it fail with
//! [`CommError::PeerLeft`] and its channels disconnect, so a failing rank
//! surfaces as an error on the others instead of a hang.

use std::sync::Arc;

use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};

use super::Communicator;
use crate::error::CommError;

type Pair = (usize, f64);

struct Reduction {
    slots: Mutex<Vec<f64>>,
    rendezvous: Rendezvous,
}

/// Reusable barrier that fails once any member has left.
struct Rendezvous {
    size: usize,
    state: Mutex<RendezvousState>,
    released: Condvar,
}

struct RendezvousState {
    arrived: usize,
    generation: u64,
    departed: bool,
}

impl Rendezvous {
    fn new(size: usize) -> Self {
        Self {
            size,
            state: Mutex::new(RendezvousState {
                arrived: 0,
                generation: 0,
                departed: false,
            }),
            released: Condvar::new(),
        }
    }

    /// Block until every member arrives. Returns `false` if a member left
    /// before this round completed.
    fn wait(&self) -> bool {
        let mut state = self.state.lock();
        if state.departed {
            return false;
        }
        let generation = state.generation;
        state.arrived += 1;
        if state.arrived == self.size {
            state.arrived = 0;
            state.generation += 1;
            self.released.notify_all();
            return true;
        }
        while state.generation == generation && !state.departed {
            self.released.wait(&mut state);
        }
        state.generation != generation
    }

    fn depart(&self) {
        self.state.lock().departed = true;
        self.released.notify_all();
    }
}

/// Factory for a group of thread-local communicators.
pub struct LocalGroup;

impl LocalGroup {
    /// Create the communicators of a `size`-rank group, indexed by rank.
    ///
    /// # Panics
    ///
    /// Panics if `size == 0`.
    pub fn new(size: usize) -> Vec<LocalCommunicator> {
        assert!(size > 0, "LocalGroup::new: a group needs at least one rank");

        let shared = Arc::new(Reduction {
            slots: Mutex::new(vec![0.0; size]),
            rendezvous: Rendezvous::new(size),
        });

        // outboxes[src][dst], inboxes[dst][src]
        let mut outboxes: Vec<Vec<Sender<Pair>>> = (0..size).map(|_| Vec::new()).collect();
        let mut inboxes: Vec<Vec<Receiver<Pair>>> = (0..size).map(|_| Vec::new()).collect();
        for outbox in outboxes.iter_mut() {
            for inbox in inboxes.iter_mut() {
                let (tx, rx) = unbounded();
                outbox.push(tx);
                inbox.push(rx);
            }
        }

        outboxes
            .into_iter()
            .zip(inboxes)
            .enumerate()
            .map(|(rank, (outbox, inbox))| LocalCommunicator {
                rank,
                size,
                shared: Arc::clone(&shared),
                outbox,
                inbox,
            })
            .collect()
    }

    /// Run `body` once per rank on its own scoped thread and collect the
    /// results in rank order. A panic on any rank is propagated; the other
    /// ranks see their pending collectives fail.
    pub fn run<T, F>(size: usize, body: F) -> Vec<T>
    where
        T: Send,
        F: Fn(LocalCommunicator) -> T + Sync,
    {
        let comms = Self::new(size);
        let body = &body;
        std::thread::scope(|scope| {
            let handles: Vec<_> = comms
                .into_iter()
                .map(|comm| scope.spawn(move || body(comm)))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
                .collect()
        })
    }
}

/// One rank of a [`LocalGroup`]. Always reports distributed mode.
pub struct LocalCommunicator {
    rank: usize,
    size: usize,
    shared: Arc<Reduction>,
    outbox: Vec<Sender<Pair>>,
    inbox: Vec<Receiver<Pair>>,
}

impl LocalCommunicator {
    fn check_peer(&self, peer: usize) -> Result<(), CommError> {
        if peer >= self.size || peer == self.rank {
            return Err(CommError::NoSuchPeer {
                rank: self.rank,
                peer,
                size: self.size,
            });
        }
        Ok(())
    }

    fn rendezvous(&self) -> Result<(), CommError> {
        if self.shared.rendezvous.wait() {
            Ok(())
        } else {
            Err(CommError::PeerLeft { rank: self.rank })
        }
    }
}

impl Drop for LocalCommunicator {
    fn drop(&mut self) {
        self.shared.rendezvous.depart();
    }
}

impl Communicator for LocalCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn is_distributed(&self) -> bool {
        true
    }

    fn all_reduce_sum(&self, local: f64) -> Result<f64, CommError> {
        self.shared.slots.lock()[self.rank] = local;
        self.rendezvous()?;
        // Rank-order summation: every rank gets the bitwise same value.
        let sum = self.shared.slots.lock().iter().sum();
        self.rendezvous()?;
        Ok(sum)
    }

    fn send_pair(&self, to: usize, index: usize, value: f64) -> Result<(), CommError> {
        self.check_peer(to)?;
        self.outbox[to]
            .send((index, value))
            .map_err(|_| CommError::Disconnected {
                rank: self.rank,
                peer: to,
            })
    }

    fn receive_pair(&self, from: usize) -> Result<(usize, f64), CommError> {
        self.check_peer(from)?;
        self.inbox[from].recv().map_err(|_| CommError::Disconnected {
            rank: self.rank,
            peer: from,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::GlobalArgMin;

    #[test]
    fn all_reduce_sums_over_ranks() {
        let sums = LocalGroup::run(4, |comm| comm.all_reduce_sum(comm.rank() as f64 + 1.0).unwrap());
        assert_eq!(sums, vec![10.0; 4]);
    }

    #[test]
    fn global_dot_spans_partition() {
        let a = [1.0, 2.0, 3.0, 4.0, 5.0];
        let b = [2.0, 0.0, 1.0, -1.0, 1.0];
        let blocks = crate::comm::block_partition(a.len(), 3);
        let dots = LocalGroup::run(3, |comm| {
            let r = blocks[comm.rank()].clone();
            comm.dot(&a[r.clone()], &b[r]).unwrap()
        });
        assert_eq!(dots, vec![6.0; 3]);
    }

    #[test]
    fn argmin_reaches_every_rank() {
        let candidates = [Some((0, 0.5)), None, Some((2, 0.125)), Some((1, 0.125))];
        let results = LocalGroup::run(4, |comm| comm.global_argmin(candidates[comm.rank()]).unwrap());
        let expected = Some(GlobalArgMin {
            rank: 2,
            index: 2,
            value: 0.125,
        });
        assert!(results.iter().all(|r| *r == expected), "{results:?}");
    }

    #[test]
    fn argmin_without_candidates_is_none() {
        let results = LocalGroup::run(2, |comm| comm.global_argmin(None).unwrap());
        assert_eq!(results, vec![None, None]);
    }

    #[test]
    fn departed_rank_fails_pending_collective() {
        let results = LocalGroup::run(2, |comm| {
            if comm.rank() == 1 {
                drop(comm);
                return None;
            }
            Some(comm.all_reduce_sum(1.0))
        });
        assert!(matches!(results[0], Some(Err(CommError::PeerLeft { rank: 0 }))));
        assert!(results[1].is_none());
    }

    #[test]
    #[should_panic(expected = "rank 1 failed")]
    fn panicking_rank_does_not_hang_the_group() {
        LocalGroup::run(3, |comm| {
            if comm.rank() == 1 {
                panic!("rank 1 failed");
            }
            comm.all_reduce_sum(1.0).and_then(|_| comm.all_reduce_sum(2.0))
        });
    }

    #[test]
    fn self_send_is_rejected() {
        let comms = LocalGroup::new(2);
        assert!(comms[0].send_pair(0, 1, 1.0).is_err());
        assert!(comms[1].send_pair(5, 1, 1.0).is_err());
    }
}
