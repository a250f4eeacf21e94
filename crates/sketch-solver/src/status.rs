use sketch_model::SolveStatus;
use tracing::warn;

/// Classify a raw backend result code into our SolveStatus.
pub fn classify_status(code: i32) -> SolveStatus {
    let status = SolveStatus::from_code(code);
    if status == SolveStatus::UnknownFailure {
        warn!(code, "solver returned an unknown result code");
    }
    status
}
