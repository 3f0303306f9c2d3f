//! Distributed context consumed by the orthogonalization.
//!
//! Rows of `Q` and of every history vector are partitioned across a group of
//! processes: one coordinator (rank 0) and zero or more workers. The engine
//! never looks at another process's rows; everything global goes through a
//! [`Communicator`]:
//!
//! | Capability | Method |
//! |------------|--------|
//! | topology | [`rank`](Communicator::rank), [`size`](Communicator::size), [`is_distributed`](Communicator::is_distributed) |
//! | collective sum | [`all_reduce_sum`](Communicator::all_reduce_sum), [`dot`](Communicator::dot), [`norm`](Communicator::norm) |
//! | point-to-point | [`send_pair`](Communicator::send_pair), [`receive_pair`](Communicator::receive_pair) |
//! | collective argmin | [`global_argmin`](Communicator::global_argmin) |
//!
//! Every process must issue the same collectives in the same order. The
//! engine guarantees this by running identical control flow on every rank:
//! all branch decisions depend only on reduced (hence replicated) values.

use std::ops::Range;

use crate::error::CommError;
use crate::kernels;

#[cfg(feature = "local-group")]
mod local;

#[cfg(feature = "local-group")]
pub use local::{LocalCommunicator, LocalGroup};

/// Rank of the coordinating process.
pub const COORDINATOR: usize = 0;

/// Wire marker for "this process holds no rows".
const NO_ROW: usize = usize::MAX;

/// Result of [`Communicator::global_argmin`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlobalArgMin {
    /// Rank that owns the minimal entry.
    pub rank: usize,
    /// Local row index on the owning rank.
    pub index: usize,
    /// The minimal value.
    pub value: f64,
}

/// Collective operations over a group of cooperating processes.
pub trait Communicator {
    /// Rank of this process within the group.
    fn rank(&self) -> usize;

    /// Number of processes in the group.
    fn size(&self) -> usize;

    /// Whether rows are partitioned across processes.
    ///
    /// This is a mode flag, not `size() > 1`: a distributed run may place
    /// every row on one process.
    fn is_distributed(&self) -> bool;

    /// Sum `local` over every process; all processes receive the same value.
    fn all_reduce_sum(&self, local: f64) -> Result<f64, CommError>;

    /// Send one index and one scalar to `to`.
    fn send_pair(&self, to: usize, index: usize, value: f64) -> Result<(), CommError>;

    /// Receive one index and one scalar from `from`, blocking until it
    /// arrives.
    fn receive_pair(&self, from: usize) -> Result<(usize, f64), CommError>;

    /// Global dot product of two row slices.
    fn dot(&self, a: &[f64], b: &[f64]) -> Result<f64, CommError> {
        self.all_reduce_sum(kernels::dot(a, b))
    }

    /// Global L2 norm of a row slice.
    fn norm(&self, a: &[f64]) -> Result<f64, CommError> {
        Ok(self.dot(a, a)?.sqrt())
    }

    /// Global argmin of `(local index, value)` pairs.
    ///
    /// Each worker sends its local candidate to the coordinator, which keeps
    /// the strictly smallest value (ties go to the lower rank) and sends the
    /// winner back to every worker, so all processes agree on the owner.
    /// Processes without rows pass `None`; the result is `None` only if no
    /// process had a candidate.
    fn global_argmin(
        &self,
        local: Option<(usize, f64)>,
    ) -> Result<Option<GlobalArgMin>, CommError> {
        let rank = self.rank();
        let size = self.size();
        let mine = local.map(|(index, value)| GlobalArgMin { rank, index, value });

        if size == 1 {
            return Ok(mine);
        }

        if rank == COORDINATOR {
            let mut best = mine;
            for worker in 1..size {
                let (index, value) = self.receive_pair(worker)?;
                if index == NO_ROW {
                    continue;
                }
                if best.map_or(true, |b| value < b.value) {
                    best = Some(GlobalArgMin {
                        rank: worker,
                        index,
                        value,
                    });
                }
            }

            let (owner, index, value) = match best {
                Some(b) => (b.rank, b.index, b.value),
                None => (NO_ROW, NO_ROW, f64::INFINITY),
            };
            for worker in 1..size {
                self.send_pair(worker, owner, value)?;
                self.send_pair(worker, index, value)?;
            }
            Ok(best)
        } else {
            let (index, value) = local.unwrap_or((NO_ROW, f64::INFINITY));
            self.send_pair(COORDINATOR, index, value)?;
            let (owner, value) = self.receive_pair(COORDINATOR)?;
            let (index, _) = self.receive_pair(COORDINATOR)?;
            Ok((owner != NO_ROW).then_some(GlobalArgMin {
                rank: owner,
                index,
                value,
            }))
        }
    }
}

impl<C: Communicator + ?Sized> Communicator for &C {
    fn rank(&self) -> usize {
        (**self).rank()
    }

    fn size(&self) -> usize {
        (**self).size()
    }

    fn is_distributed(&self) -> bool {
        (**self).is_distributed()
    }

    fn all_reduce_sum(&self, local: f64) -> Result<f64, CommError> {
        (**self).all_reduce_sum(local)
    }

    fn send_pair(&self, to: usize, index: usize, value: f64) -> Result<(), CommError> {
        (**self).send_pair(to, index, value)
    }

    fn receive_pair(&self, from: usize) -> Result<(usize, f64), CommError> {
        (**self).receive_pair(from)
    }

    fn global_argmin(
        &self,
        local: Option<(usize, f64)>,
    ) -> Result<Option<GlobalArgMin>, CommError> {
        (**self).global_argmin(local)
    }
}

// ---------------------------------------------------------------------------
// SingleProcess
// ---------------------------------------------------------------------------

/// The degenerate one-participant group: every reduction is the identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SingleProcess;

impl Communicator for SingleProcess {
    fn rank(&self) -> usize {
        COORDINATOR
    }

    fn size(&self) -> usize {
        1
    }

    fn is_distributed(&self) -> bool {
        false
    }

    fn all_reduce_sum(&self, local: f64) -> Result<f64, CommError> {
        Ok(local)
    }

    fn send_pair(&self, to: usize, _index: usize, _value: f64) -> Result<(), CommError> {
        Err(CommError::NoSuchPeer {
            rank: COORDINATOR,
            peer: to,
            size: 1,
        })
    }

    fn receive_pair(&self, from: usize) -> Result<(usize, f64), CommError> {
        Err(CommError::NoSuchPeer {
            rank: COORDINATOR,
            peer: from,
            size: 1,
        })
    }
}

/// Split `global_rows` into `size` contiguous blocks, the first
/// `global_rows % size` blocks one row longer.
pub fn block_partition(global_rows: usize, size: usize) -> Vec<Range<usize>> {
    assert!(size > 0, "block_partition: empty group");
    let base = global_rows / size;
    let extra = global_rows % size;
    let mut start = 0;
    (0..size)
        .map(|r| {
            let len = base + usize::from(r < extra);
            let block = start..start + len;
            start += len;
            block
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_process_reductions_are_local() {
        let comm = SingleProcess;
        assert_eq!(comm.dot(&[1.0, 2.0], &[3.0, 4.0]).unwrap(), 11.0);
        assert_eq!(comm.norm(&[3.0, 4.0]).unwrap(), 5.0);
        assert!(!comm.is_distributed());
    }

    #[test]
    fn single_process_argmin_is_local_candidate() {
        let hit = SingleProcess.global_argmin(Some((3, 0.25))).unwrap();
        assert_eq!(
            hit,
            Some(GlobalArgMin {
                rank: 0,
                index: 3,
                value: 0.25
            })
        );
        assert_eq!(SingleProcess.global_argmin(None).unwrap(), None);
    }

    #[test]
    fn single_process_has_no_peers() {
        let err = SingleProcess.send_pair(1, 0, 0.0).unwrap_err();
        assert!(matches!(err, CommError::NoSuchPeer { peer: 1, .. }));
    }

    #[test]
    fn partition_covers_all_rows() {
        let blocks = block_partition(10, 3);
        assert_eq!(blocks, vec![0..4, 4..7, 7..10]);
        assert_eq!(block_partition(2, 3), vec![0..1, 1..2, 2..2]);
    }
}
