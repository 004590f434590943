//! Tree traversal for the stevedore engine.

mod walker;

pub use walker::{TreeVisitor, WalkFlow, WalkOptions, walk};
