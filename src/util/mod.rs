//! Utility modules

pub mod paths;
pub mod topic;

pub use paths::{config_dir, config_path, database_path};
pub use topic::{to_like_pattern, to_like_patterns};
