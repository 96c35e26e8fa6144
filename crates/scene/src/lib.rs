//! Scene hierarchy.
//!
//! - [`Transform`]: local position, rotation and scale
//! - [`SceneGraph`]: index-addressed node arena with world transform updates

pub mod graph;
pub mod transform;

pub use graph::{Node, NodeId, SceneError, SceneGraph};
pub use transform::Transform;
