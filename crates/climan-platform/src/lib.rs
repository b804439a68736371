//! Platform helpers shared by the climan crates: per-user directories and the
//! process environment given to commands run inside a managed runtime.

mod commands;
mod environment;
mod paths;

pub use commands::RuntimeCommandExt;
pub use environment::{prepend_search_path, search_path_var};
pub use paths::{AppPaths, AppPathsError};
