//! Bridge between the sketch document and a numeric constraint solver.

pub mod backend;
pub mod constraint_mapping;
pub mod entity_mapping;
pub mod native;
pub mod solver;
pub mod status;

pub use backend::*;
pub use entity_mapping::SolverMapping;
pub use native::{NativeSolver, SolverConfig};
pub use solver::{solve_sketch, SolveReport, SolverBridge, Tweak};
pub use status::classify_status;
