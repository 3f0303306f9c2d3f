//! Integration tests for row-partitioned factorizations.
//!
//! Each rank of a [`LocalGroup`] runs on its own thread with a contiguous
//! block of rows. The distributed factors must agree with the single-process
//! factorization of the full matrix: `R` replicated on every rank, `Q`
//! stacked from the local slices.

#![cfg(feature = "local-group")]

mod helpers;

use ruvector_qr::audit::audit;
use ruvector_qr::comm::{block_partition, Communicator, LocalGroup};
use ruvector_qr::error::{QrError, ValidationError};
use ruvector_qr::factorization::{IncrementalQr, InsertReport};
use ruvector_qr::filter::{apply_filter, FilterConfig};
use ruvector_qr::types::{DenseMatrix, QrConfig};

use helpers::{random_columns, slice_columns};

/// Factor `columns` on `size` ranks and return each rank's `(Q, R)`.
fn factor_distributed(columns: &[Vec<f64>], size: usize) -> Vec<(DenseMatrix, DenseMatrix)> {
    let blocks = block_partition(columns[0].len(), size);
    LocalGroup::run(size, |comm| {
        let local = slice_columns(columns, blocks[comm.rank()].clone());
        let mut qr = IncrementalQr::with_communicator(QrConfig::default(), comm).unwrap();
        for c in &local {
            qr.push_back(c).unwrap();
        }
        (qr.q().to_dense(), qr.r().to_dense())
    })
}

fn factor_single(columns: &[Vec<f64>]) -> (DenseMatrix, DenseMatrix) {
    let a = DenseMatrix::from_columns(columns[0].len(), columns);
    let qr = IncrementalQr::from_matrix(&a, QrConfig::default()).unwrap();
    (qr.q().to_dense(), qr.r().to_dense())
}

/// Stack the local `Q` slices of every rank.
fn stack_rows(parts: &[(DenseMatrix, DenseMatrix)]) -> DenseMatrix {
    let cols = parts[0].0.cols;
    let rows: usize = parts.iter().map(|(q, _)| q.rows).sum();
    let mut out = DenseMatrix::zeros(rows, cols);
    let mut offset = 0;
    for (q, _) in parts {
        for j in 0..cols {
            for i in 0..q.rows {
                out.set(offset + i, j, q.get(i, j));
            }
        }
        offset += q.rows;
    }
    out
}

// ---------------------------------------------------------------------------
// Agreement with the single-process factorization
// ---------------------------------------------------------------------------

#[test]
fn test_two_and_three_ranks_agree_with_single_process() {
    let columns = random_columns(11, 5, 17);
    let (q_ref, r_ref) = factor_single(&columns);

    for size in [2, 3] {
        let parts = factor_distributed(&columns, size);
        for (rank, (_, r)) in parts.iter().enumerate() {
            assert!(
                r.max_abs_diff(&r_ref) < 1e-12,
                "R differs on rank {rank} of {size}"
            );
        }
        let q = stack_rows(&parts);
        assert!(q.max_abs_diff(&q_ref) < 1e-12, "stacked Q differs for {size} ranks");
    }
}

#[test]
fn test_replicated_r_is_bitwise_identical_across_ranks() {
    let columns = random_columns(9, 4, 23);
    let parts = factor_distributed(&columns, 3);
    for (_, r) in &parts[1..] {
        assert_eq!(r, &parts[0].1);
    }
}

#[test]
fn test_window_operations_stay_in_step() {
    let columns = random_columns(10, 6, 29);
    let blocks = block_partition(10, 2);
    let results = LocalGroup::run(2, |comm| {
        let local = slice_columns(&columns, blocks[comm.rank()].clone());
        let mut qr = IncrementalQr::with_communicator(QrConfig::default(), comm).unwrap();
        for c in &local {
            qr.push_front(c).unwrap();
            if qr.cols() > 3 {
                qr.pop_back();
            }
        }
        qr.delete_column(1);
        let history = DenseMatrix::from_columns(
            qr.rows(),
            &[local[5].clone(), local[3].clone()],
        );
        let report = audit(&qr, Some(&history)).unwrap();
        (qr.cols(), qr.global_rows(), report)
    });

    for (cols, global_rows, report) in results {
        assert_eq!(cols, 2);
        assert_eq!(global_rows, 10);
        assert!(report.is_consistent(1e-10), "{report:?}");
    }
}

// ---------------------------------------------------------------------------
// Rank-deficiency restart
// ---------------------------------------------------------------------------

#[test]
fn test_restart_impulse_lands_on_owning_rank() {
    // Global row 3 is the only row the first column misses; it lives on rank 1.
    let c = vec![1.0, 1.0, 1.0, 0.0, 1.0, 0.0];
    let blocks = block_partition(6, 2);
    let results = LocalGroup::run(2, |comm| {
        let local = c[blocks[comm.rank()].clone()].to_vec();
        let mut qr = IncrementalQr::with_communicator(QrConfig::default(), comm).unwrap();
        qr.push_back(&local).unwrap();
        let report: InsertReport = qr.push_back(&local).unwrap();
        (report, qr.q().col(1).to_vec())
    });

    for (report, _) in &results {
        let restart = report.restart.expect("duplicate restarts on every rank");
        assert_eq!((restart.rank, restart.row), (1, 0));
        assert!(restart.null);
        assert_eq!(report.rho, 0.0);
    }
    assert_eq!(results[0].1, vec![0.0, 0.0, 0.0]);
    assert_eq!(results[1].1, vec![1.0, 0.0, 0.0]);
}

// ---------------------------------------------------------------------------
// Topology
// ---------------------------------------------------------------------------

#[test]
fn test_one_rank_holding_every_row() {
    let columns = random_columns(5, 3, 37);
    let (_, r_ref) = factor_single(&columns);

    let results = LocalGroup::run(2, |comm| {
        let local = if comm.rank() == 0 {
            columns.clone()
        } else {
            vec![Vec::new(); columns.len()]
        };
        let mut qr = IncrementalQr::with_communicator(QrConfig::default(), comm).unwrap();
        for c in &local {
            qr.push_back(c).unwrap();
        }
        (qr.rows(), qr.global_rows(), qr.r().to_dense())
    });

    assert_eq!((results[0].0, results[0].1), (5, 5));
    assert_eq!((results[1].0, results[1].1), (0, 5));
    for (_, _, r) in &results {
        assert!(r.max_abs_diff(&r_ref) < 1e-12);
    }
}

#[test]
fn test_rebuild_with_a_rank_holding_no_rows() {
    let columns = random_columns(5, 4, 47);
    let (_, r_ref) = factor_single(&columns);

    let results = LocalGroup::run(2, |comm| {
        let rows = if comm.rank() == 0 { 5 } else { 0 };
        let local = slice_columns(&columns, 0..rows);
        let a = DenseMatrix::from_columns(rows, &local[..3]);
        let mut qr = IncrementalQr::with_communicator(QrConfig::default(), comm).unwrap();
        qr.reset_from_matrix(&a, QrConfig::default()).unwrap();
        let after_rebuild = qr.global_rows();
        // Later collectives must still pair up across ranks.
        qr.push_back(&local[3]).unwrap();
        (after_rebuild, qr.global_rows(), qr.r().to_dense())
    });

    for (after_rebuild, global_rows, r) in &results {
        assert_eq!((*after_rebuild, *global_rows), (5, 5));
        assert!(r.max_abs_diff(&r_ref) < 1e-12);
    }
    assert_eq!(results[0].2, results[1].2);
}

#[test]
fn test_rebuild_from_factors_sums_rows() {
    let results = LocalGroup::run(2, |comm| {
        let q = if comm.rank() == 0 {
            DenseMatrix::from_columns(2, &[vec![1.0, 0.0]])
        } else {
            DenseMatrix::zeros(3, 1)
        };
        let r = DenseMatrix::from_row_major(1, 1, &[2.0]);
        let mut qr = IncrementalQr::with_communicator(QrConfig::default(), comm).unwrap();
        qr.reset_from_factors(&q, &r, QrConfig::default()).unwrap();
        qr.global_rows()
    });
    assert_eq!(results, vec![5, 5]);
}

#[test]
fn test_rebuild_rejected_on_one_rank_fails_everywhere() {
    let columns = random_columns(6, 2, 53);
    let blocks = block_partition(6, 2);
    let results = LocalGroup::run(2, |comm| {
        let local = slice_columns(&columns, blocks[comm.rank()].clone());
        let mut a = DenseMatrix::from_columns(3, &local);
        if comm.rank() == 1 {
            a.set(0, 1, f64::INFINITY);
        }
        let mut qr = IncrementalQr::with_communicator(QrConfig::default(), comm).unwrap();
        let outcome = qr.reset_from_matrix(&a, QrConfig::default());
        (outcome, qr.cols())
    });

    assert!(matches!(
        results[0].0,
        Err(QrError::InvalidInput(ValidationError::RejectedByPeers { ranks: 1 }))
    ));
    assert!(matches!(
        results[1].0,
        Err(QrError::InvalidInput(ValidationError::NonFiniteValue(_)))
    ));
    assert!(results.iter().all(|(_, cols)| *cols == 0));
}

#[test]
fn test_group_of_one_is_distributed_but_complete() {
    let columns = random_columns(4, 2, 41);
    let parts = factor_distributed(&columns, 1);
    let (q_ref, r_ref) = factor_single(&columns);
    assert!(parts[0].0.max_abs_diff(&q_ref) < 1e-15);
    assert!(parts[0].1.max_abs_diff(&r_ref) < 1e-15);
}

#[test]
fn test_global_rows_below_local_rows_is_rejected() {
    let results = LocalGroup::run(2, |comm| {
        let mut qr = IncrementalQr::with_communicator(QrConfig::default(), comm).unwrap();
        qr.set_global_rows(1);
        qr.push_back(&[1.0, 0.0])
    });
    for result in results {
        assert!(matches!(
            result,
            Err(QrError::InvalidInput(ValidationError::TopologyMismatch {
                rows: 2,
                global_rows: 1,
                distributed: true,
            }))
        ));
    }
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

#[test]
fn test_qr2_filter_agrees_across_ranks() {
    let mut columns = random_columns(8, 3, 43);
    let mut dependent = columns[0].clone();
    dependent[6] += 1e-10;
    columns.insert(1, dependent);

    let blocks = block_partition(8, 2);
    let results = LocalGroup::run(2, |comm| {
        let local = slice_columns(&columns, blocks[comm.rank()].clone());
        let history = DenseMatrix::from_columns(local[0].len(), &local);
        let mut qr = IncrementalQr::with_communicator(QrConfig::default(), comm).unwrap();
        for c in &local {
            qr.push_back(c).unwrap();
        }
        let deleted = apply_filter(&mut qr, &FilterConfig::Qr2 { limit: 1e-6 }, Some(&history))
            .unwrap();
        (deleted, qr.cols(), qr.global_rows())
    });

    for (deleted, cols, global_rows) in results {
        assert_eq!(deleted, vec![1]);
        assert_eq!(cols, 3);
        assert_eq!(global_rows, 8);
    }
}

#[test]
fn test_qr2_history_rejected_on_one_rank_fails_everywhere() {
    let columns = random_columns(6, 3, 59);
    let blocks = block_partition(6, 2);
    let results = LocalGroup::run(2, |comm| {
        let local = slice_columns(&columns, blocks[comm.rank()].clone());
        let kept = if comm.rank() == 0 { 3 } else { 2 };
        let history = DenseMatrix::from_columns(3, &local[..kept]);
        let mut qr = IncrementalQr::with_communicator(QrConfig::default(), comm).unwrap();
        for c in &local {
            qr.push_back(c).unwrap();
        }
        let outcome = apply_filter(&mut qr, &FilterConfig::Qr2 { limit: 1e-6 }, Some(&history));
        (outcome.is_err(), qr.cols())
    });
    assert_eq!(results, vec![(true, 3), (true, 3)]);
}
