use std::path::PathBuf;

use thiserror::Error;

/// Harness-level failures. Any of these aborts the run before a fixture executes.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("image directory not found: {0}")]
    MissingImageDir(PathBuf),

    #[error("no image for fixture {id} in {dir} (tried .jpg, .jpeg, .png)")]
    MissingImage { id: String, dir: PathBuf },

    #[error("invalid fixture catalog: {0}")]
    Catalog(String),

    #[error("unknown fixture id: {0}")]
    UnknownFixture(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}
