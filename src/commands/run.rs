use std::io::Write;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::MigrationConfig;
use crate::engine::ExecutionEngine;
use crate::error::Result;
use crate::output::{self, Format};
use crate::pipeline;
use crate::source::snapshot::SnapshotSource;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Run the full migration, polling the engine for progress until idle.
pub fn run(config: MigrationConfig, format: Format) -> Result<()> {
    let source = Arc::new(SnapshotSource::load(&config.source)?);
    let engine = ExecutionEngine::new();
    let handle = pipeline::start(&engine, config, source)?;

    while !engine.is_idle() {
        if format == Format::Pretty {
            let report = handle.report(&engine);
            eprint!("\r{}", output::status_line(&report));
            let _ = std::io::stderr().flush();
        }
        thread::sleep(POLL_INTERVAL);
    }
    if format == Format::Pretty {
        eprintln!();
    }

    let mut errors = engine.take_errors().into_iter();
    if let Some(first) = errors.next() {
        for later in errors {
            tracing::error!(error = %later, "additional captured error");
        }
        return Err(first);
    }

    let mut report = handle.report(&engine);
    report.status = "done".into();
    output::print_report(&report, format)
}
