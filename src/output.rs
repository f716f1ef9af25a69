use clap::ValueEnum;
use colored::Colorize;

use crate::error::Result;
use crate::model::Changeset;
use crate::pipeline::ProgressReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Json,
    Pretty,
}

pub fn print_changesets(changesets: &[Changeset], format: Format) -> Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string(changesets)?),
        Format::Pretty => {
            for (index, changeset) in changesets.iter().enumerate() {
                let comment = if changeset.comment.is_empty() {
                    "(no comment)".dimmed().to_string()
                } else {
                    changeset.comment.clone()
                };
                println!(
                    "{} {} {} {}",
                    format!("[{}]", index + 1).bold(),
                    changeset.author.cyan(),
                    changeset.start.format("%Y-%m-%d %H:%M:%S"),
                    comment
                );
                for revision in &changeset.revisions {
                    println!("    {} {}", revision.action, revision.path);
                }
            }
        }
    }
    Ok(())
}

pub fn print_report(report: &ProgressReport, format: Format) -> Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string(report)?),
        Format::Pretty => {
            println!(
                "{} files={} revisions={} changesets={} commits={} ({:.1}s active)",
                report.status.bold(),
                report.stats.files,
                report.stats.revisions,
                report.stats.changesets,
                report.stats.commits,
                report.active_secs
            );
        }
    }
    Ok(())
}

/// One-line status for the polling loop, overwritten in place.
pub fn status_line(report: &ProgressReport) -> String {
    format!(
        "{} [{}/{}] files={} revisions={} changesets={} commits={}",
        report.status,
        report.current,
        report.maximum,
        report.stats.files,
        report.stats.revisions,
        report.stats.changesets,
        report.stats.commits
    )
}
