pub use anyhow::{anyhow, Result};

use thiserror::Error as TError;

/// Failure taxonomy for a single upgrade run. Every variant is fatal to the
/// remaining batch; eligibility skips are not errors and never appear here.
#[derive(Debug, TError)]
pub enum Error {
    #[error("ResolutionError: {0}")]
    Resolution(String),

    #[error("TemplateError: {0}")]
    Template(String),

    #[error("OverrideFetchError: {0}")]
    OverrideFetch(String),

    #[error("BackupError: {0}")]
    Backup(String),

    #[error("ApplyError: {0}")]
    Apply(String),

    #[error("AssociationError: {0}")]
    Association(String),

    #[error("gateway '{namespace}/{name}' is not ready, wait for release timeout")]
    ReadinessTimeout { namespace: String, name: String },

    #[error(transparent)]
    Kube(#[from] kube::Error),
}
