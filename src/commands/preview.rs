use std::sync::{Arc, Mutex};

use crate::analyzer::RevisionAnalyzer;
use crate::changeset::ChangesetBuilder;
use crate::config::MigrationConfig;
use crate::engine::ExecutionEngine;
use crate::error::Result;
use crate::model::Changeset;
use crate::output::{self, Format};
use crate::pipeline::RunStats;
use crate::source::SourceRepository;
use crate::source::snapshot::SnapshotSource;

/// Dry run: analyze and cluster, print the changesets that a full run would
/// export, touch nothing.
pub fn run(config: MigrationConfig, format: Format) -> Result<()> {
    let source = Arc::new(SnapshotSource::load(&config.source)?);
    source.resolve_project(&config.project)?;

    let stats = Arc::new(RunStats::default());
    let mut analyzer = RevisionAnalyzer::new(Arc::clone(&stats), config.fail_fast);
    analyzer.add_root(&config.project);
    for pattern in &config.exclude {
        analyzer.exclude(pattern)?;
    }
    let builder = ChangesetBuilder::new(
        config.any_comment_threshold(),
        config.same_comment_threshold(),
        stats,
    );

    let engine = ExecutionEngine::new();
    let result: Arc<Mutex<Vec<Changeset>>> = Arc::new(Mutex::new(Vec::new()));
    let slot = Arc::clone(&result);
    engine.enqueue(move |ctx| {
        let revisions = analyzer.run(source.as_ref(), ctx)?;
        *slot.lock().unwrap() = builder.build(revisions, ctx);
        Ok(())
    });
    engine.wait_idle();

    if let Some(error) = engine.take_errors().into_iter().next() {
        return Err(error);
    }
    let changesets = std::mem::take(&mut *result.lock().unwrap());
    output::print_changesets(&changesets, format)
}
