use crate::index::{ElementRef, EntityIndex};
use crate::solve_status::SolveStatus;

/// Errors raised by the sketch model and the layers built on it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SketchError {
    /// A reference or value does not fit the expected signature.
    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    #[error("no entity at index {index}")]
    MissingEntity { index: EntityIndex },

    /// Degenerate geometry (zero-length vector, coincident centres, zero radius).
    #[error("degenerate geometry: {reason}")]
    GeometricDegeneracy { reason: String },

    #[error("solve failed with status {status:?}")]
    SolveFailure { status: SolveStatus },

    #[error("{element:?} is still referenced by {dependents:?}")]
    ReferentialIntegrityViolation {
        element: ElementRef,
        dependents: Vec<ElementRef>,
    },

    #[error("failed to parse document: {0}")]
    Parse(String),
}

impl SketchError {
    pub fn configuration(reason: impl Into<String>) -> Self {
        SketchError::Configuration {
            reason: reason.into(),
        }
    }

    pub fn degenerate(reason: impl Into<String>) -> Self {
        SketchError::GeometricDegeneracy {
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for SketchError {
    fn from(err: serde_json::Error) -> Self {
        SketchError::Parse(err.to_string())
    }
}

pub type SketchResult<T> = Result<T, SketchError>;
