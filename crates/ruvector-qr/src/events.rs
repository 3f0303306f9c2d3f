//! Diagnostic events emitted by the factorization.
//!
//! Every structural change and every numerically interesting moment of the
//! reorthogonalization produces a [`QrEvent`]. Events are always mirrored to
//! `tracing`; an optional [`DiagnosticSink`] additionally receives them, for
//! example a [`JsonLinesSink`] appending one JSON document per line to a log
//! file. Running without a sink is the silent default.

use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

/// Events emitted by an [`IncrementalQr`](crate::factorization::IncrementalQr).
///
/// Events are tagged with `#[serde(tag = "type")]` so they serialise as
/// `{ "type": "ColumnInserted", ... }` for easy ingestion into event stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum QrEvent {
    /// A column was inserted and the factors updated.
    ColumnInserted {
        /// Position of the new column.
        index: usize,
        /// Column count after the insertion.
        cols: usize,
        /// Projection passes used by the orthogonalization.
        passes: usize,
        /// Distance of the new column to the previous span.
        rho: f64,
    },

    /// A column was deleted and the factors updated.
    ColumnDeleted {
        /// Position of the removed column.
        index: usize,
        /// Column count after the deletion.
        cols: usize,
    },

    /// A projection pass failed the stability test and another one follows.
    Reorthogonalization {
        /// Pass that was rejected (1-based, counted since the last restart).
        pass: usize,
        /// Norm before the pass.
        rho0: f64,
        /// Norm after the pass.
        rho1: f64,
        /// Norm of the pass's Fourier coefficients.
        coefficient_norm: f64,
    },

    /// The candidate was numerically inside the span and was replaced by a
    /// unit impulse at the row of smallest basis energy.
    RankDeficiencyRestart {
        /// Rank owning the impulse row.
        rank: usize,
        /// Local row index on that rank.
        row: usize,
        /// Row energy `sum_j Q[row, j]^2`.
        energy: f64,
        /// Whether the residual was exactly zero.
        null: bool,
    },

    /// The bounded reorthogonalization loop gave up.
    OrthogonalizationFailed {
        /// Passes taken.
        passes: usize,
        /// Residual norm after the last pass.
        residual: f64,
    },

    /// The factorization was cleared or rebuilt.
    Reset {
        /// Local rows after the reset.
        rows: usize,
        /// Columns after the reset.
        cols: usize,
    },

    /// A singularity filter removed a column.
    ColumnFiltered {
        /// Position of the removed column in the window at the time of removal.
        index: usize,
        /// The offending value (`|R[i,i]|` or the insertion distance).
        value: f64,
        /// The threshold it fell below.
        threshold: f64,
    },
}

impl QrEvent {
    /// Forward the event to `tracing` at a level matching its severity.
    pub fn trace(&self) {
        match self {
            QrEvent::OrthogonalizationFailed { passes, residual } => {
                warn!(
                    "QR: too many passes in orthogonalize ({passes}), residual = {residual:.6e}"
                );
            }
            QrEvent::RankDeficiencyRestart {
                rank,
                row,
                energy,
                null,
            } => {
                debug!(
                    "QR: rank-deficient column, restart at row {row} on rank {rank} \
                     (energy = {energy:.3e}, null = {null})"
                );
            }
            QrEvent::Reorthogonalization {
                pass, rho0, rho1, ..
            } => {
                trace!("QR: reorthogonalization after pass {pass}: rho0 = {rho0:.6e}, rho1 = {rho1:.6e}");
            }
            QrEvent::ColumnFiltered {
                index,
                value,
                threshold,
            } => {
                debug!("QR: filter removed column {index} ({value:.3e} < {threshold:.3e})");
            }
            QrEvent::Reset { rows, cols } => {
                debug!("QR: reset to {rows}x{cols}");
            }
            other => trace!("QR: {other:?}"),
        }
    }
}

/// Append-only consumer of [`QrEvent`]s.
pub trait DiagnosticSink: Send {
    /// Record one event. Sinks must not fail the factorization; I/O problems
    /// are theirs to handle.
    fn record(&mut self, event: &QrEvent);
}

/// Writes each event as one line of JSON.
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    /// Wrap a writer.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Recover the writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> DiagnosticSink for JsonLinesSink<W> {
    fn record(&mut self, event: &QrEvent) {
        let written = serde_json::to_writer(&mut self.writer, event)
            .map_err(std::io::Error::from)
            .and_then(|()| self.writer.write_all(b"\n"));
        if let Err(e) = written {
            warn!("QR: diagnostic sink write failed: {e}");
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    /// Recorded events in emission order.
    pub events: Vec<QrEvent>,
}

impl DiagnosticSink for MemorySink {
    fn record(&mut self, event: &QrEvent) {
        self.events.push(event.clone());
    }
}

/// A [`MemorySink`] that stays readable after being handed to a factorization.
#[derive(Debug, Default, Clone)]
pub struct SharedMemorySink {
    inner: Arc<Mutex<Vec<QrEvent>>>,
}

impl SharedMemorySink {
    /// Snapshot of the events recorded so far.
    pub fn events(&self) -> Vec<QrEvent> {
        self.inner.lock().clone()
    }
}

impl DiagnosticSink for SharedMemorySink {
    fn record(&mut self, event: &QrEvent) {
        self.inner.lock().push(event.clone());
    }
}

/// Optional sink plus the `tracing` mirror.
#[derive(Default)]
pub(crate) struct Diagnostics {
    sink: Option<Box<dyn DiagnosticSink>>,
}

impl Diagnostics {
    pub(crate) fn set_sink(&mut self, sink: Option<Box<dyn DiagnosticSink>>) {
        self.sink = sink;
    }

    pub(crate) fn take_sink(&mut self) -> Option<Box<dyn DiagnosticSink>> {
        self.sink.take()
    }

    pub(crate) fn emit(&mut self, event: QrEvent) {
        event.trace();
        if let Some(sink) = self.sink.as_mut() {
            sink.record(&event);
        }
    }
}

impl std::fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Diagnostics")
            .field("sink", &self.sink.is_some())
            .finish()
    }
}
