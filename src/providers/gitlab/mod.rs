mod client;
mod links;
mod repository;
mod types;

pub use repository::{GitLabRepository, SnapshotLimits};
