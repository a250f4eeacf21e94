pub mod constraint;
pub mod constraint_store;
pub mod dependency;
pub mod document;
pub mod entity;
pub mod error;
pub mod geometry;
pub mod index;
pub mod persist;
pub mod solve_status;
pub mod store;
pub mod tolerance;

pub use constraint::*;
pub use constraint_store::*;
pub use dependency::*;
pub use document::*;
pub use entity::*;
pub use error::*;
pub use geometry::*;
pub use index::{ConstraintIndex, ElementRef, EntityIndex};
pub use solve_status::*;
pub use store::*;
pub use tolerance::*;
