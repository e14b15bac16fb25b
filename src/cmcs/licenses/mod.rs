pub mod error;
pub mod io;
pub mod model;
pub mod progress;
pub mod reconcile;
pub mod remote;
pub mod sync;

pub use error::{ErrorKind, Result, ToolError};
