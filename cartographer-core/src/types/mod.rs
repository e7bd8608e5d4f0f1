//! Room, envelope, pass-result and project configuration types

mod operations;
mod project;
mod room;

pub use operations::*;
pub use project::*;
pub use room::*;
