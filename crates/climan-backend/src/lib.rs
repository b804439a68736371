mod error;
mod traits;
mod types;

pub use error::{ClimanError, NetworkStage};
pub use traits::{Downloader, NodeRuntime, ReleaseSource, RuntimeProvider};
pub use types::{BinField, CliApp, LtsMarker, PackageMetadata, ReleaseEntry, parse_node_version};
