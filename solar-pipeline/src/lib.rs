pub mod aggregate;
pub mod config;
pub mod metrics_server;
pub mod observability;
pub mod pipeline;
pub mod runner;
pub mod sinks;
pub mod sources;
pub mod spatial;
pub mod transform;

pub use pipeline::{Envelope, Pipeline};

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::PathBuf;

    /// Fresh directory under the system temp dir, unique per test tag and process.
    pub fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("solar-pipeline-{tag}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
