//! Incremental QR factorization with distributed reorthogonalization.
//!
//! This crate maintains `A = Q R` for a sliding window of history vectors, as
//! needed by quasi-Newton convergence accelerators (IQN-ILS, MVQN, Broyden)
//! in partitioned multi-physics coupling. Columns are inserted and deleted
//! one at a time with Givens-rotation updates; new columns are orthogonalized
//! by iterated Gram-Schmidt with a restart for rank-deficient input. Rows may
//! be partitioned across processes, with every reduction going through a
//! [`Communicator`](comm::Communicator).
//!
//! # Modules
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`factorization`] | [`IncrementalQr`](factorization::IncrementalQr): insert, delete, window, rebuild |
//! | [`orthogonalize`] | Distributed Gram-Schmidt with the stability test and restart |
//! | [`givens`] | Scaled Givens reflectors |
//! | [`comm`] | Distributed context, single-process and in-process group implementations |
//! | [`filter`] | QR1 / QR1-absolute / QR2 singularity filters |
//! | [`audit`] | Orthogonality, triangularity and reconstruction checks |
//! | [`events`] | Diagnostic events and sinks |
//!
//! # Example
//!
//! ```rust
//! use ruvector_qr::factorization::IncrementalQr;
//! use ruvector_qr::types::QrConfig;
//!
//! let mut qr = IncrementalQr::new(QrConfig::default()).unwrap();
//! qr.push_back(&[3.0, 0.0, 4.0]).unwrap();
//! qr.push_back(&[1.0, 1.0, 0.0]).unwrap();
//!
//! // Q has orthonormal columns and Q R reproduces the inserted columns.
//! let a = qr.q().matmul(qr.r());
//! assert!((a.get(1, 1) - 1.0).abs() < 1e-12);
//! assert!((qr.r().get(0, 0) - 5.0).abs() < 1e-12);
//!
//! // Slide the window.
//! qr.pop_front();
//! assert_eq!(qr.cols(), 1);
//! ```

pub mod arena;
pub mod audit;
pub mod comm;
pub mod error;
pub mod events;
pub mod factorization;
pub mod filter;
pub mod givens;
pub mod kernels;
pub mod orthogonalize;
pub mod types;
pub mod validation;

pub use error::{CommError, QrError, ValidationError};
pub use factorization::{IncrementalQr, InsertReport};
pub use types::{DenseMatrix, QrConfig};
