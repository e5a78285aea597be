//! Bounded-memory data transfer with a read-ahead/write-ahead pipeline.
//!
//! A reader task drains the source row stream into [`RowBatch`]es of at most
//! `chunk_size` rows and pushes them into a bounded channel (`read_ahead`
//! deep). A dispatcher forwards batches to a shared queue consumed by a fixed
//! pool of writer tasks, so memory stays bounded by roughly
//! `read_ahead + 3 * writers` batches whatever the table size.

pub mod encode;

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::{
    IdentifierCase, QualifiedName, RowBatch, RowStream, SourceReader, TableIdentifier,
    TargetWriter, WriteMethod,
};
use crate::error::{MigrateError, Result};

/// Transfer engine configuration.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Maximum rows per batch.
    pub chunk_size: usize,
    /// Number of read-ahead batches to buffer.
    pub read_ahead: usize,
    /// Number of parallel writers per table.
    pub writers: usize,
    /// Retries of the same batch before the transfer aborts.
    pub write_retries: u32,
    /// Base delay between retries (doubles each retry).
    pub retry_base_delay: Duration,
    /// Timeout for one batch write.
    pub write_timeout: Duration,
    /// Idle timeout while waiting for the next source row.
    pub read_timeout: Duration,
    /// How batches are submitted.
    pub write_method: WriteMethod,
    /// Case normalization for column names.
    pub identifier_case: IdentifierCase,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: 10_000,
            read_ahead: 4,
            writers: 4,
            write_retries: 3,
            retry_base_delay: Duration::from_millis(200),
            write_timeout: Duration::from_secs(300),
            read_timeout: Duration::from_secs(300),
            write_method: WriteMethod::Copy,
            identifier_case: IdentifierCase::Upper,
        }
    }
}

/// Statistics from one table transfer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferStats {
    /// Rows pulled from the source.
    pub rows_read: u64,
    /// Rows acknowledged by the target.
    pub rows_written: u64,
    /// Batches produced by the reader.
    pub batches: u64,
    /// Batch retries performed across all writers.
    pub retries: u64,
    /// Time spent waiting on the source.
    #[serde(with = "duration_ms")]
    pub read_time: Duration,
    /// Longest cumulative write time of any single writer.
    #[serde(with = "duration_ms")]
    pub write_time: Duration,
    /// Wall-clock duration of the transfer.
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// What the reader task reports back.
#[derive(Debug, Default)]
struct ReadSummary {
    rows: u64,
    batches: u64,
    read_time: Duration,
}

/// What each writer task reports back.
#[derive(Debug, Default)]
struct WriteSummary {
    rows: u64,
    batches: u64,
    retries: u64,
    write_time: Duration,
}

/// Moves every row of a source table into an existing target table.
pub struct BatchDataMover {
    source: Arc<dyn SourceReader>,
    target: Arc<dyn TargetWriter>,
    config: TransferConfig,
    /// Optional shared counter for real-time progress reporting.
    progress_counter: Option<Arc<AtomicU64>>,
}

impl BatchDataMover {
    /// Create a new mover.
    pub fn new(
        source: Arc<dyn SourceReader>,
        target: Arc<dyn TargetWriter>,
        config: TransferConfig,
    ) -> Self {
        Self {
            source,
            target,
            config,
            progress_counter: None,
        }
    }

    /// Set a shared progress counter incremented as batches are written.
    pub fn with_progress_counter(mut self, counter: Arc<AtomicU64>) -> Self {
        self.progress_counter = Some(counter);
        self
    }

    /// Transfer all rows of `table`.
    ///
    /// On a write failure that survives every retry, the transfer stops and
    /// returns [`MigrateError::DataWrite`] with the rows already written;
    /// nothing is rolled back.
    pub async fn migrate(
        &self,
        table: &TableIdentifier,
        cancel: &CancellationToken,
    ) -> Result<TransferStats> {
        let table_name = table.target.to_string();
        let chunk_size = self.config.chunk_size.max(1);
        let num_writers = self.config.writers.max(1);

        info!(
            "{}: starting transfer (chunk: {}, writers: {}, method: {:?})",
            table_name, chunk_size, num_writers, self.config.write_method
        );
        let start = Instant::now();

        let stream = tokio::time::timeout(
            self.config.read_timeout,
            self.source.read_rows(&table.source),
        )
        .await
        .map_err(|_| MigrateError::timeout("Opening source cursor", self.config.read_timeout))??;

        let columns = normalize_columns(&table_name, &stream.columns, self.config.identifier_case)?;

        // Cancelled by the caller, or by a writer that gave up.
        let abort = cancel.child_token();
        let rows_written = Arc::new(AtomicU64::new(0));

        let (read_tx, mut read_rx) = mpsc::channel::<RowBatch>(self.config.read_ahead.max(1));
        let (write_tx, write_rx) = async_channel::bounded::<RowBatch>(num_writers * 2);

        let reader_handle = tokio::spawn(read_batches(
            stream,
            columns,
            chunk_size,
            self.config.read_timeout,
            read_tx,
            abort.clone(),
        ));

        let mut writer_handles = Vec::with_capacity(num_writers);
        for writer_id in 0..num_writers {
            let writer = BatchWriter {
                writer_id,
                target: self.target.clone(),
                table: table.target.clone(),
                table_name: table_name.clone(),
                config: self.config.clone(),
                rows_written: rows_written.clone(),
                progress_counter: self.progress_counter.clone(),
                cancel: cancel.clone(),
                abort: abort.clone(),
            };
            let write_rx = write_rx.clone();
            writer_handles.push(tokio::spawn(async move { writer.run(write_rx).await }));
        }

        // Drop our copy so the queue closes when all writers are done.
        drop(write_rx);

        // Dispatcher: forward read-ahead batches to the writer queue.
        let mut dispatched = 0u64;
        loop {
            tokio::select! {
                biased;
                _ = abort.cancelled() => break,
                batch = read_rx.recv() => match batch {
                    Some(batch) => {
                        if write_tx.send(batch).await.is_err() {
                            break;
                        }
                        dispatched += 1;
                    }
                    None => break,
                },
            }
        }

        // Close write channel to signal writers to finish.
        drop(write_tx);
        drop(read_rx);

        let read_result = match reader_handle.await {
            Ok(result) => result,
            Err(e) => Err(MigrateError::DataWrite {
                table: table_name.clone(),
                rows_written: rows_written.load(Ordering::Relaxed),
                message: format!("Reader task failed: {}", e),
            }),
        };

        // Every writer has stopped once this returns, so the shared count is final.
        let mut write_results = Vec::with_capacity(num_writers);
        let mut write_error = None;
        for joined in join_all(writer_handles).await {
            match joined {
                Ok(Ok(summary)) => write_results.push(summary),
                Ok(Err(e)) => {
                    write_error.get_or_insert(e);
                }
                Err(e) => {
                    write_error.get_or_insert(MigrateError::DataWrite {
                        table: table_name.clone(),
                        rows_written: 0,
                        message: format!("Writer task panicked: {}", e),
                    });
                }
            }
        }
        if let Some(err) = write_error {
            return Err(match err {
                MigrateError::DataWrite { table, message, .. } => MigrateError::DataWrite {
                    table,
                    rows_written: rows_written.load(Ordering::Relaxed),
                    message,
                },
                other => other,
            });
        }

        if cancel.is_cancelled() {
            warn!("{}: transfer cancelled", table_name);
            return Err(MigrateError::Cancelled);
        }
        let read = read_result?;

        let mut stats = TransferStats {
            rows_read: read.rows,
            batches: read.batches,
            read_time: read.read_time,
            ..Default::default()
        };
        let mut batches_written = 0u64;
        for summary in write_results {
            stats.rows_written += summary.rows;
            stats.retries += summary.retries;
            batches_written += summary.batches;
            stats.write_time = stats.write_time.max(summary.write_time);
        }

        if batches_written != read.batches || dispatched != read.batches {
            error!(
                "{}: batch accounting mismatch (read {}, dispatched {}, written {})",
                table_name, read.batches, dispatched, batches_written
            );
            return Err(MigrateError::DataWrite {
                table: table_name,
                rows_written: stats.rows_written,
                message: format!(
                    "{} batches read but {} written",
                    read.batches, batches_written
                ),
            });
        }

        stats.elapsed = start.elapsed();
        let rows_per_sec = if stats.elapsed.as_secs_f64() > 0.0 {
            (stats.rows_written as f64 / stats.elapsed.as_secs_f64()) as u64
        } else {
            0
        };

        info!(
            "{}: transferred {} rows in {} batches in {:?} ({} rows/sec, read: {:?}, write: {:?})",
            table_name,
            stats.rows_written,
            stats.batches,
            stats.elapsed,
            rows_per_sec,
            stats.read_time,
            stats.write_time
        );

        Ok(stats)
    }
}

/// Apply identifier case to the source header, rejecting names that collide.
fn normalize_columns(
    table_name: &str,
    columns: &[String],
    case: IdentifierCase,
) -> Result<Arc<[String]>> {
    let normalized: Vec<String> = columns.iter().map(|c| case.apply(c)).collect();
    let mut seen = HashSet::with_capacity(normalized.len());
    for name in &normalized {
        if !seen.insert(name.as_str()) {
            return Err(MigrateError::schema(
                table_name,
                format!("column {:?} appears twice after case normalization", name),
            ));
        }
    }
    Ok(Arc::from(normalized))
}

/// Drain the row stream into batches of at most `chunk_size` rows.
async fn read_batches(
    mut stream: RowStream,
    columns: Arc<[String]>,
    chunk_size: usize,
    read_timeout: Duration,
    tx: mpsc::Sender<RowBatch>,
    abort: CancellationToken,
) -> Result<ReadSummary> {
    let mut summary = ReadSummary::default();
    let mut rows = Vec::with_capacity(chunk_size);

    loop {
        let wait = Instant::now();
        let next = tokio::select! {
            biased;
            _ = abort.cancelled() => return Ok(summary),
            next = tokio::time::timeout(read_timeout, stream.rows.next()) => next,
        };
        summary.read_time += wait.elapsed();

        match next {
            Err(_) => return Err(MigrateError::timeout("Reading source rows", read_timeout)),
            Ok(Some(row)) => {
                rows.push(row?);
                summary.rows += 1;
            }
            Ok(None) => break,
        }

        if rows.len() == chunk_size {
            let batch = RowBatch::new(
                columns.clone(),
                std::mem::replace(&mut rows, Vec::with_capacity(chunk_size)),
                summary.batches,
            );
            summary.batches += 1;
            if !send_batch(&tx, batch, &abort).await {
                return Ok(summary);
            }
        }
    }

    if !rows.is_empty() {
        let batch = RowBatch::new(columns, rows, summary.batches);
        summary.batches += 1;
        send_batch(&tx, batch, &abort).await;
    }

    debug!(
        "Reader finished: {} rows in {} batches",
        summary.rows, summary.batches
    );
    Ok(summary)
}

/// Returns false when the pipeline is shutting down.
async fn send_batch(
    tx: &mpsc::Sender<RowBatch>,
    batch: RowBatch,
    abort: &CancellationToken,
) -> bool {
    tokio::select! {
        biased;
        _ = abort.cancelled() => false,
        sent = tx.send(batch) => sent.is_ok(),
    }
}

/// One writer in the pool.
struct BatchWriter {
    writer_id: usize,
    target: Arc<dyn TargetWriter>,
    table: QualifiedName,
    table_name: String,
    config: TransferConfig,
    rows_written: Arc<AtomicU64>,
    progress_counter: Option<Arc<AtomicU64>>,
    /// Caller's token; interrupts a write in flight.
    cancel: CancellationToken,
    /// Pipeline token; stops the writer between batches.
    abort: CancellationToken,
}

impl BatchWriter {
    async fn run(self, rx: async_channel::Receiver<RowBatch>) -> Result<WriteSummary> {
        let mut summary = WriteSummary::default();

        loop {
            let batch = tokio::select! {
                biased;
                _ = self.abort.cancelled() => break,
                batch = rx.recv() => match batch {
                    Ok(batch) => batch,
                    Err(_) => break,
                },
            };

            let write_start = Instant::now();
            let written = match self.write_with_retry(&batch, &mut summary).await {
                Ok(Some(written)) => written,
                // Aborted while retrying.
                Ok(None) => break,
                Err(e) => {
                    self.abort.cancel();
                    return Err(e);
                }
            };
            summary.write_time += write_start.elapsed();
            summary.rows += written;
            summary.batches += 1;
            self.rows_written.fetch_add(written, Ordering::Relaxed);
            if let Some(ref counter) = self.progress_counter {
                counter.fetch_add(written, Ordering::Relaxed);
            }

            debug!(
                "Writer {}: wrote batch {} ({} rows, local total: {})",
                self.writer_id, batch.seq, written, summary.rows
            );
        }

        Ok(summary)
    }

    /// Write one batch, retrying the same batch with exponential backoff.
    ///
    /// A write already sent runs to completion when a sibling writer gives
    /// up, so every committed batch is counted.
    async fn write_with_retry(
        &self,
        batch: &RowBatch,
        summary: &mut WriteSummary,
    ) -> Result<Option<u64>> {
        let mut attempt = 0u32;
        loop {
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(None),
                result = tokio::time::timeout(
                    self.config.write_timeout,
                    self.target.write_batch(&self.table, batch, self.config.write_method),
                ) => result,
            };

            let message = match result {
                Ok(Ok(written)) => return Ok(Some(written)),
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!(
                    "batch write timed out after {}s",
                    self.config.write_timeout.as_secs()
                ),
            };

            if attempt >= self.config.write_retries {
                error!(
                    "{}: writer {} giving up on batch {} after {} retries: {}",
                    self.table_name, self.writer_id, batch.seq, attempt, message
                );
                // The final count is filled in once every writer has stopped.
                return Err(MigrateError::DataWrite {
                    table: self.table_name.clone(),
                    rows_written: 0,
                    message,
                });
            }

            attempt += 1;
            summary.retries += 1;
            let delay = self.config.retry_base_delay * 2u32.saturating_pow(attempt - 1);
            warn!(
                "{}: writer {} batch {} failed, retry {}/{} in {:?}: {}",
                self.table_name,
                self.writer_id,
                batch.seq,
                attempt,
                self.config.write_retries,
                delay,
                message
            );
            tokio::select! {
                biased;
                _ = self.abort.cancelled() => return Ok(None),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
