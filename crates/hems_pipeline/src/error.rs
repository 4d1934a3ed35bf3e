use thiserror::Error;

/// Stage-local failure taxonomy. Recoverability notes follow the batch
/// contract: none of these aborts sibling jobs.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed job file; fatal to that job, fixable by user edit.
    #[error("invalid job: {0}")]
    InvalidJob(String),

    /// Self-contradictory job content; fatal to that job.
    #[error("schema violation: {0}")]
    SchemaViolation(String),

    /// Zero footprints intersect the AOI; recoverable via manual footprint.
    #[error("no building footprint intersects the AOI")]
    NoFootprintFound,

    /// Auto placement found no clear cell; recoverable via manual helipad.
    #[error("no clear helipad site within the AOI")]
    NoHelipadSite,

    /// Self-intersecting or near-zero-area footprint; fatal to that job.
    #[error("degenerate footprint geometry: {0}")]
    DegenerateGeometry(String),

    /// A scene node with no serialization rule reached the exporter.
    /// Internal invariant violation; fatal to that job.
    #[error("unsupported scene primitive: {0}")]
    UnsupportedPrimitive(String),

    /// Destination not writable or archive write failed; fatal to that job.
    #[error("packaging I/O error: {0}")]
    PackagingIo(#[from] std::io::Error),

    #[error("geodata source error: {0}")]
    Geodata(String),

    /// Invariant violation inside the pipeline itself; fatal to that job.
    #[error("internal error: {0}")]
    Internal(String),

    #[error("job cancelled")]
    Cancelled,

    #[error("job deadline exceeded")]
    Timeout,
}

impl PipelineError {
    /// Errors the caller can recover from with a manual override, as opposed
    /// to ones that need a job edit or a different environment.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PipelineError::NoFootprintFound | PipelineError::NoHelipadSite
        )
    }
}

/// A pipeline error wrapped with the identity of the job it belongs to.
#[derive(Debug, Error)]
#[error("job {site_id}: {error}")]
pub struct JobFailure {
    pub site_id: String,
    #[source]
    pub error: PipelineError,
}

impl JobFailure {
    pub fn new(site_id: impl Into<String>, error: PipelineError) -> Self {
        Self {
            site_id: site_id.into(),
            error,
        }
    }
}
