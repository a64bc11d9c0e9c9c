//! Drives one run through its phases: load the lookup tables, stream the flow
//! log, then finalize the counts into a report.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::aggregate::stats::StreamStatsSnapshot;
use crate::aggregate::{AggregateSnapshot, Aggregator};
use crate::config::Config;
use crate::engine::{StreamEngine, StreamOutcome};
use crate::error::{Error, LoadError};
use crate::flow::parse::RecordParser;
use crate::flow::FlowLogSchema;
use crate::mapping::{ProtocolTable, TagMapping};
use crate::report;

/// Lifecycle phase of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Init,
    LoadMappings,
    Stream,
    Finalize,
    Done,
    Failed,
    Cancelled,
}

impl RunPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::LoadMappings => "load_mappings",
            Self::Stream => "stream",
            Self::Finalize => "finalize",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether the run has ended.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lookup tables shared read-only by every batch worker.
pub struct LoadedMappings {
    pub tags: TagMapping,
    pub parser: RecordParser,
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub snapshot: AggregateSnapshot,
    pub stats: StreamStatsSnapshot,
    /// Where the report was written, if an output path was configured.
    pub report_path: Option<PathBuf>,
}

/// How a run ended without a fatal error.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed(RunSummary),
    /// Stopped on request. No report was written.
    Cancelled(StreamStatsSnapshot),
}

/// Runs the tagger once for a given configuration.
pub struct Analyzer {
    cfg: Config,
    schema: FlowLogSchema,
    phase: RunPhase,
}

impl Analyzer {
    pub fn new(cfg: Config) -> Result<Self> {
        let schema = cfg.schema.resolve()?;
        Ok(Self {
            cfg,
            schema,
            phase: RunPhase::Init,
        })
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Load the tag mapping and protocol table.
    ///
    /// An absent tag mapping path yields an empty mapping. An absent protocol
    /// path falls back to the built-in table.
    pub fn load_mappings(&self) -> Result<LoadedMappings, LoadError> {
        let tags = match &self.cfg.input.tag_mappings {
            Some(path) => TagMapping::load(path)?,
            None => {
                debug!("no tag mapping file configured, every record is untagged");
                TagMapping::new()
            }
        };

        let protocols = ProtocolTable::resolve(self.cfg.input.protocol_numbers.as_deref())?;

        info!(
            tag_mappings = tags.len(),
            protocols = protocols.len(),
            "loaded lookup tables",
        );

        Ok(LoadedMappings {
            tags,
            parser: RecordParser::new(self.schema, protocols),
        })
    }

    /// Execute the run to a terminal phase.
    ///
    /// A load failure ends the run before any line is read. Cancellation while
    /// streaming returns [`RunOutcome::Cancelled`] and writes no report. Without
    /// a flow log there is nothing to stream and no report is written.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<RunOutcome, Error> {
        let result = self.run_phases(cancel).await;

        let terminal = match &result {
            Ok(RunOutcome::Completed(_)) => RunPhase::Done,
            Ok(RunOutcome::Cancelled(_)) => RunPhase::Cancelled,
            Err(e) => {
                warn!(error = %e, phase = %self.phase, "run failed");
                RunPhase::Failed
            }
        };
        self.enter(terminal);

        result
    }

    async fn run_phases(&mut self, cancel: &CancellationToken) -> Result<RunOutcome, Error> {
        self.enter(RunPhase::LoadMappings);
        let mappings = self.load_mappings()?;

        self.enter(RunPhase::Stream);
        let engine = StreamEngine::new(
            &self.cfg.engine,
            Arc::new(mappings.parser),
            Arc::new(mappings.tags),
            Arc::new(Aggregator::new()),
        );

        match &self.cfg.input.flow_logs {
            Some(path) => {
                if engine.run(path, cancel).await? == StreamOutcome::Cancelled {
                    let stats = engine.stats().snapshot();
                    info!(
                        lines = stats.lines_read,
                        batches = stats.batches_completed,
                        "run cancelled, discarding partial counts",
                    );
                    return Ok(RunOutcome::Cancelled(stats));
                }
            }
            None => {
                info!("no flow log configured, skipping streaming and report");
                return Ok(RunOutcome::Completed(RunSummary {
                    snapshot: engine.aggregator().snapshot(),
                    stats: engine.stats().snapshot(),
                    report_path: None,
                }));
            }
        }

        self.enter(RunPhase::Finalize);
        let snapshot = engine.aggregator().snapshot();
        let stats = engine.stats().snapshot();
        log_counts(&snapshot);

        let report_path = self.cfg.output.report.clone();
        match &report_path {
            Some(path) => report::write_report(&snapshot, path)?,
            None => info!("no report path configured, skipping report"),
        }

        Ok(RunOutcome::Completed(RunSummary {
            snapshot,
            stats,
            report_path,
        }))
    }

    fn enter(&mut self, phase: RunPhase) {
        info!(from = %self.phase, to = %phase, "run phase");
        self.phase = phase;
    }
}

fn log_counts(snapshot: &AggregateSnapshot) {
    info!(
        records = snapshot.records(),
        errors = snapshot.errors,
        tags = snapshot.tag_counts.len(),
        combinations = snapshot.combination_counts.len(),
        "aggregation finished",
    );
    for (tag, count) in &snapshot.tag_counts {
        debug!(tag = %tag, count, "tag count");
    }
    for (combination, count) in &snapshot.combination_counts {
        debug!(
            port = combination.port,
            protocol = %combination.protocol,
            count,
            "combination count",
        );
    }
}
