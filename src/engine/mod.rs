//! Batched flow log streaming.
//!
//! The reader pulls at most `batch_size` lines at a time and hands each batch
//! to a bounded pool of blocking workers. A batch is only read once a worker
//! permit is free, so no more than `workers + 1` batches are held in memory.
//! Lines longer than `max_line_bytes` are skipped without being buffered.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::aggregate::stats::StreamStats;
use crate::aggregate::{Aggregator, BatchTally};
use crate::config::EngineConfig;
use crate::flow::parse::RecordParser;
use crate::mapping::TagMapping;

/// Fatal errors while streaming. Per-line problems never surface here.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("opening flow log {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("reading flow log: {0}")]
    Read(#[source] std::io::Error),

    #[error("batch worker failed: {0}")]
    Worker(#[from] JoinError),
}

/// How a streaming run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Every line was read and every batch folded into the aggregate.
    Completed,
    /// Scheduling stopped early on cancellation; in-flight batches finished.
    Cancelled,
}

/// Reads a flow log in bounded batches and aggregates it on a worker pool.
pub struct StreamEngine {
    parser: Arc<RecordParser>,
    tags: Arc<TagMapping>,
    aggregator: Arc<Aggregator>,
    stats: Arc<StreamStats>,
    batch_size: usize,
    workers: usize,
    max_line_bytes: usize,
}

impl StreamEngine {
    pub fn new(
        cfg: &EngineConfig,
        parser: Arc<RecordParser>,
        tags: Arc<TagMapping>,
        aggregator: Arc<Aggregator>,
    ) -> Self {
        Self {
            parser,
            tags,
            aggregator,
            stats: Arc::new(StreamStats::new()),
            batch_size: cfg.batch_size.max(1),
            workers: cfg.workers.max(1),
            max_line_bytes: cfg.max_line_bytes.max(1),
        }
    }

    pub fn aggregator(&self) -> &Arc<Aggregator> {
        &self.aggregator
    }

    pub fn stats(&self) -> &Arc<StreamStats> {
        &self.stats
    }

    /// Stream a flow log file.
    pub async fn run(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<StreamOutcome, StreamError> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|source| StreamError::Open {
                path: path.to_path_buf(),
                source,
            })?;

        info!(
            path = %path.display(),
            batch_size = self.batch_size,
            workers = self.workers,
            "streaming flow log",
        );

        self.run_reader(BufReader::new(file), cancel).await
    }

    /// Stream flow log lines from any buffered reader.
    ///
    /// Waits for every scheduled batch before returning, including when
    /// reading fails or the run is cancelled.
    pub async fn run_reader<R>(
        &self,
        mut reader: R,
        cancel: &CancellationToken,
    ) -> Result<StreamOutcome, StreamError>
    where
        R: AsyncBufRead + Unpin,
    {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut in_flight = JoinSet::new();

        let scheduled = self
            .schedule_batches(&mut reader, &semaphore, &mut in_flight, cancel)
            .await;

        let mut worker_err = None;
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "batch worker failed");
                worker_err.get_or_insert(e);
            }
        }

        let outcome = scheduled?;
        if let Some(e) = worker_err {
            return Err(StreamError::Worker(e));
        }

        let stats = self.stats.snapshot();
        debug!(
            lines = stats.lines_read,
            batches = stats.batches_completed,
            errors = self.aggregator.errors(),
            ?outcome,
            "flow log streaming finished",
        );

        Ok(outcome)
    }

    async fn schedule_batches<R>(
        &self,
        reader: &mut R,
        semaphore: &Arc<Semaphore>,
        in_flight: &mut JoinSet<()>,
        cancel: &CancellationToken,
    ) -> Result<StreamOutcome, StreamError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut buf = Vec::new();

        loop {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(StreamOutcome::Cancelled),
                permit = Arc::clone(semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return Ok(StreamOutcome::Cancelled),
                },
            };

            let batch = read_batch(reader, self.batch_size, self.max_line_bytes, &mut buf)
                .await
                .map_err(StreamError::Read)?;
            if batch.is_empty() {
                return Ok(StreamOutcome::Completed);
            }

            // A batch read after cancellation is dropped, not scheduled.
            if cancel.is_cancelled() {
                return Ok(StreamOutcome::Cancelled);
            }

            self.stats.batch_scheduled(batch.len());
            let batch_no = self.stats.snapshot().batches_scheduled;
            debug!(
                batch = batch_no,
                lines = batch.len(),
                overlong = batch.overlong,
                "scheduling batch",
            );

            let parser = Arc::clone(&self.parser);
            let tags = Arc::clone(&self.tags);
            let aggregator = Arc::clone(&self.aggregator);
            let stats = Arc::clone(&self.stats);
            in_flight.spawn_blocking(move || {
                let _permit = permit;
                process_batch(&parser, &tags, &aggregator, &batch.lines);
                aggregator.record_errors(batch.overlong);
                stats.batch_completed();
            });
        }
    }
}

/// Lines read for one unit of work.
#[derive(Debug, Default)]
struct Batch {
    lines: Vec<String>,
    /// Lines dropped for exceeding the length cap.
    overlong: u64,
}

impl Batch {
    /// Every line read, including overlong ones.
    fn len(&self) -> usize {
        self.lines.len() + self.overlong as usize
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Result of reading a single line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineRead {
    Eof,
    Line,
    Overlong,
}

/// Read up to `batch_size` lines. Returns an empty batch at end of input.
///
/// Lines are decoded lossily so invalid UTF-8 is rejected by the record
/// parser instead of aborting the run.
async fn read_batch<R>(
    reader: &mut R,
    batch_size: usize,
    max_line_bytes: usize,
    buf: &mut Vec<u8>,
) -> std::io::Result<Batch>
where
    R: AsyncBufRead + Unpin,
{
    let mut batch = Batch {
        lines: Vec::with_capacity(batch_size),
        overlong: 0,
    };
    while batch.len() < batch_size {
        match read_line_capped(reader, max_line_bytes, buf).await? {
            LineRead::Eof => break,
            LineRead::Line => batch.lines.push(String::from_utf8_lossy(buf).into_owned()),
            LineRead::Overlong => {
                trace!(max_line_bytes, "skipping overlong flow record");
                batch.overlong += 1;
            }
        }
    }
    Ok(batch)
}

/// Read one line into `buf`, without its newline.
///
/// Once a line exceeds `max_line_bytes` the rest of it is consumed and
/// discarded, so `buf` never grows past the cap.
async fn read_line_capped<R>(
    reader: &mut R,
    max_line_bytes: usize,
    buf: &mut Vec<u8>,
) -> std::io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let mut read_any = false;
    let mut overlong = false;

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            break;
        }
        read_any = true;

        let (used, content, done) = match available.iter().position(|&b| b == b'\n') {
            Some(idx) => (idx + 1, &available[..idx], true),
            None => (available.len(), available, false),
        };
        if !overlong {
            if buf.len() + content.len() > max_line_bytes {
                overlong = true;
                buf.clear();
            } else {
                buf.extend_from_slice(content);
            }
        }
        reader.consume(used);

        if done {
            break;
        }
    }

    Ok(match (read_any, overlong) {
        (false, _) => LineRead::Eof,
        (true, true) => LineRead::Overlong,
        (true, false) => LineRead::Line,
    })
}

/// Parse, tag, and count one batch of lines.
///
/// Rejected lines only bump the error count.
pub fn process_batch<S: AsRef<str>>(
    parser: &RecordParser,
    tags: &TagMapping,
    aggregator: &Aggregator,
    lines: &[S],
) {
    let mut tally = BatchTally::new();
    for line in lines {
        match parser.parse(line.as_ref()) {
            Ok(record) => {
                let tag = tags.resolve(record.dst_port, record.protocol);
                tally.add(record.dst_port, record.protocol, tag);
            }
            Err(e) => {
                trace!(error = %e, "skipping flow record");
                tally.add_error();
            }
        }
    }
    aggregator.record_batch(&tally);
}
