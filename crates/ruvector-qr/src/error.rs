//! Error types for the incremental QR engine.
//!
//! Provides structured error variants for orthogonalization breakdowns,
//! invalid inputs, and failures of the distributed collaborator. All errors
//! implement `std::error::Error` via `thiserror`.
//!
//! Caller misuse on the hot path (an out-of-range column index, a history
//! vector of the wrong length) is not represented here: those are fatal
//! assertions that panic with the offending values.

/// Primary error type for factorization operations.
#[derive(Debug, thiserror::Error)]
pub enum QrError {
    /// The caller supplied invalid input (dimensions, parameters, topology).
    #[error("invalid input: {0}")]
    InvalidInput(#[from] ValidationError),

    /// The bounded reorthogonalization loop could not make the new column
    /// orthogonal to the basis. The accelerator must fail the coupling step
    /// and rebuild its window.
    #[error(
        "basis not sufficiently orthogonal: the maximum number of re-orthogonalization passes ({passes}) has been exceeded (residual={residual:.2e}, coefficient norm={coefficient_norm:.2e})"
    )]
    OrthogonalizationBreakdown {
        /// Number of projection passes taken before giving up.
        passes: usize,
        /// Norm of the residual column after the last pass.
        residual: f64,
        /// Norm of the Fourier coefficients of the last pass.
        coefficient_norm: f64,
    },

    /// A collective reduction or point-to-point exchange failed.
    #[error("communication failure: {0}")]
    Communication(#[from] CommError),
}

/// Validation errors for engine inputs.
///
/// These are raised eagerly before any computation begins so that callers get
/// clear diagnostics rather than mysterious numerical failures.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// Matrix or vector dimensions are inconsistent.
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// A value is NaN or infinite where a finite number is required.
    #[error("non-finite value detected: {0}")]
    NonFiniteValue(String),

    /// A parameter is outside its valid range.
    #[error("parameter out of range: {name} = {value} (expected {expected})")]
    ParameterOutOfRange {
        /// Name of the parameter.
        name: String,
        /// The invalid value (as a string for flexibility).
        value: String,
        /// Human-readable description of the valid range.
        expected: String,
    },

    /// The local and global row counts contradict the execution mode.
    #[error(
        "row topology mismatch: local rows = {rows}, global rows = {global_rows} (distributed = {distributed})"
    )]
    TopologyMismatch {
        /// Rows held by this process.
        rows: usize,
        /// Rows summed over all processes.
        global_rows: usize,
        /// Whether the communicator runs in distributed mode.
        distributed: bool,
    },

    /// A configuration document could not be parsed.
    #[error("malformed configuration: {0}")]
    MalformedConfig(String),

    /// Input was valid here but rejected on other processes of the group.
    #[error("input rejected on {ranks} other process(es)")]
    RejectedByPeers {
        /// Number of processes whose local validation failed.
        ranks: usize,
    },
}

/// Errors raised by a [`Communicator`](crate::comm::Communicator).
#[derive(Debug, thiserror::Error)]
pub enum CommError {
    /// The requested peer does not exist in this topology.
    #[error("rank {rank} has no peer {peer} (group size {size})")]
    NoSuchPeer {
        /// Rank issuing the request.
        rank: usize,
        /// Requested peer rank.
        peer: usize,
        /// Number of processes in the group.
        size: usize,
    },

    /// A member of the group left while a collective was pending.
    #[error("rank {rank}: a peer left the group during a collective")]
    PeerLeft {
        /// Rank whose collective failed.
        rank: usize,
    },

    /// The channel to a peer was closed before the exchange completed.
    #[error("channel between rank {rank} and peer {peer} is disconnected")]
    Disconnected {
        /// Rank issuing the request.
        rank: usize,
        /// Peer whose channel is gone.
        peer: usize,
    },
}
