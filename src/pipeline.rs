//! Orchestration of the three pipeline stages as one logical background job.
//!
//! `start` validates the configuration synchronously, then queues analysis,
//! clustering and export as one task on the execution engine; once produced,
//! revision and changeset lists are treated as immutable. The run lock and
//! the run log are released by the engine's idle hook, which fires whether
//! the run completes, fails or is aborted.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;

use crate::analyzer::RevisionAnalyzer;
use crate::changeset::ChangesetBuilder;
use crate::config::MigrationConfig;
use crate::engine::{EngineProgress, ExecutionEngine};
use crate::error::Result;
use crate::export::CommitExporter;
use crate::git::GitWriter;
use crate::lock::RunLock;
use crate::source::SourceRepository;

/// Live counters shared by the stages and polled by the caller.
#[derive(Debug, Default)]
pub struct RunStats {
    pub files: AtomicU64,
    pub revisions: AtomicU64,
    pub changesets: AtomicU64,
    pub commits: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub files: u64,
    pub revisions: u64,
    pub changesets: u64,
    pub commits: u64,
}

impl RunStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            files: self.files.load(Ordering::Relaxed),
            revisions: self.revisions.load(Ordering::Relaxed),
            changesets: self.changesets.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
        }
    }
}

/// Everything the front-end polls while a run is active.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressReport {
    pub status: String,
    pub current: u64,
    pub maximum: u64,
    pub active_secs: f64,
    #[serde(flatten)]
    pub stats: StatsSnapshot,
}

/// Caller-side handle to a queued migration run.
#[derive(Debug)]
pub struct MigrationHandle {
    stats: Arc<RunStats>,
}

impl MigrationHandle {
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn report(&self, engine: &ExecutionEngine) -> ProgressReport {
        let EngineProgress {
            current,
            maximum,
            status,
            active,
        } = engine.progress();
        ProgressReport {
            status,
            current,
            maximum,
            active_secs: active.as_secs_f64(),
            stats: self.stats.snapshot(),
        }
    }
}

/// Per-run log file in the output directory, closed by the idle hook.
struct RunLog {
    writer: BufWriter<File>,
}

impl RunLog {
    fn open(output: &Path) -> Result<Self> {
        let file = File::create(output.join("relic.log"))?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    fn line(&mut self, message: &str) {
        let _ = writeln!(self.writer, "{} {message}", Utc::now().to_rfc3339());
    }
}

/// Validate the configuration, then queue the full three-stage run as one
/// engine task.
///
/// Configuration errors (unresolvable source path, path naming a file, bad
/// patterns, unknown encoding, locked output) surface here, synchronously;
/// everything after this point is delivered through the engine's
/// captured-error channel.
pub fn start(
    engine: &ExecutionEngine,
    config: MigrationConfig,
    source: Arc<dyn SourceRepository>,
) -> Result<MigrationHandle> {
    config.validate()?;
    source.resolve_project(&config.project)?;

    let stats = Arc::new(RunStats::default());
    let mut analyzer = RevisionAnalyzer::new(Arc::clone(&stats), config.fail_fast);
    analyzer.add_root(&config.project);
    for pattern in &config.exclude {
        analyzer.exclude(pattern)?;
    }

    let lock = RunLock::acquire(&config.output)?;
    let mut log = RunLog::open(&config.output)?;
    log.line(&format!("run started for {}", config.project));

    // Released (and flushed) on the worker thread when the set drains.
    let held: Arc<Mutex<Option<(RunLock, RunLog)>>> = Arc::new(Mutex::new(Some((lock, log))));
    let hook_held = Arc::clone(&held);
    engine.set_on_idle(move || {
        if let Some((_lock, mut log)) = hook_held.lock().unwrap().take() {
            log.line("run finished");
        }
    });

    let builder = ChangesetBuilder::new(
        config.any_comment_threshold(),
        config.same_comment_threshold(),
        Arc::clone(&stats),
    );
    let exporter = CommitExporter::new(&config, Arc::clone(&stats))?;
    let output = config.output.clone();

    // All three stages run as one queued task, so the engine never goes
    // idle (firing the hook and releasing the lock) between stages.
    engine.enqueue(move |ctx| {
        ctx.set_status("analyzing revisions");
        let revisions = analyzer.run(source.as_ref(), ctx)?;
        if let Some((_, log)) = held.lock().unwrap().as_mut() {
            log.line(&format!("analysis found {} revisions", revisions.len()));
        }
        if ctx.aborted() {
            return Ok(());
        }

        ctx.set_status("building changesets");
        let changesets = builder.build(revisions, ctx);
        if let Some((_, log)) = held.lock().unwrap().as_mut() {
            log.line(&format!("reconstructed {} changesets", changesets.len()));
        }
        if ctx.aborted() {
            return Ok(());
        }

        ctx.set_status("exporting commits");
        let mut writer = GitWriter::init(&output)?;
        let commits = exporter.export(&changesets, source.as_ref(), &mut writer, ctx)?;
        if let Some((_, log)) = held.lock().unwrap().as_mut() {
            log.line(&format!("exported {commits} commits"));
        }
        Ok(())
    });

    Ok(MigrationHandle { stats })
}
