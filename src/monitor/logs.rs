//! Bounded reads of rotated auth logs

use std::path::PathBuf;

use crate::wg::command::Privileged;

/// Tails a set of rotated log files through `sudo tail`
#[derive(Debug, Clone)]
pub struct AuthLogs {
    /// Newest first, e.g. `auth.log`, `auth.log.1`
    paths: Vec<PathBuf>,
    privileged: Privileged,
}

impl AuthLogs {
    pub fn new(paths: Vec<PathBuf>, privileged: Privileged) -> Self {
        Self { paths, privileged }
    }

    /// Last `lines` lines of each file, oldest rotation first so the result
    /// reads chronologically. Missing or unreadable files are skipped.
    pub async fn tail(&self, lines: usize) -> Vec<String> {
        let count = lines.to_string();
        let mut out = Vec::new();

        for path in self.paths.iter().rev() {
            if !tokio::fs::try_exists(path).await.unwrap_or(false) {
                continue;
            }
            let Some(path_str) = path.to_str() else {
                continue;
            };
            match self.privileged.run("tail", &["-n", &count, path_str], None).await {
                Ok(text) => out.extend(text.lines().map(str::to_string)),
                Err(e) => tracing::warn!("Skipping {:?}: {}", path, e),
            }
        }
        out
    }
}
