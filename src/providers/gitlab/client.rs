mod core;
mod files;
mod merge_requests;
mod pipelines;

pub use self::core::GitLabClient;
