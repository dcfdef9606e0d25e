//! Pipeline control errors

use crate::scanner::ScanError;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PipelineError {
    /// `cleanup` has run; a new pipeline is required
    #[error("location pipeline has been cleaned up")]
    Closed,

    #[error(transparent)]
    Scanner(#[from] ScanError),
}
