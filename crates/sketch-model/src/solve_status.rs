use serde::{Deserialize, Serialize};

/// Closed set of solver outcomes. Raw backend codes outside `0..=3`
/// collapse into [`SolveStatus::UnknownFailure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i32)]
pub enum SolveStatus {
    #[default]
    Okay = 0,
    Inconsistent = 1,
    DidntConverge = 2,
    TooManyUnknowns = 3,
    UnknownFailure = 4,
}

impl SolveStatus {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => SolveStatus::Okay,
            1 => SolveStatus::Inconsistent,
            2 => SolveStatus::DidntConverge,
            3 => SolveStatus::TooManyUnknowns,
            _ => SolveStatus::UnknownFailure,
        }
    }

    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn is_okay(self) -> bool {
        self == SolveStatus::Okay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_map_one_to_one() {
        for code in 0..=3 {
            assert_eq!(SolveStatus::from_code(code).code(), code);
        }
    }

    #[test]
    fn out_of_range_codes_clamp() {
        assert_eq!(SolveStatus::from_code(99), SolveStatus::UnknownFailure);
        assert_eq!(SolveStatus::from_code(-3), SolveStatus::UnknownFailure);
        assert_eq!(SolveStatus::from_code(4), SolveStatus::UnknownFailure);
    }
}
