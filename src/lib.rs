//! relic migrates the full history of a legacy per-file-revision repository
//! into git: a recursive revision analysis, a temporal/comment changeset
//! reconstruction, and a commit export, driven as one cancellable job on a
//! single-worker background engine.

pub mod analyzer;
pub mod build_info;
pub mod changeset;
pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod export;
pub mod git;
pub mod lock;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod source;
