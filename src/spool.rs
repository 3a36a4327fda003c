use log::{debug, warn};
use std::path::{Path, PathBuf};

/// File-name prefix marking the transformed copy of a captured body.
pub const TRANSFORMED_PREFIX: &str = "edited_";

const STORE_PREFIX: &str = "veil-";
const STORE_EXTENSION: &str = "jpeg";

/// Conventional location of the transform output for a captured image:
/// same directory, file name prefixed with `edited_`.
pub fn transformed_path_for(original: &Path) -> PathBuf {
    let name = original
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    original.with_file_name(format!("{}{}", TRANSFORMED_PREFIX, name))
}

/// Owns the temporary stores one session may create while intercepting a
/// response body, and removes them when the session ends.
///
/// Store names embed a per-session random token, so sessions active at
/// the same time never collide in a shared spool directory.
pub struct InterceptSpool {
    dir: PathBuf,
    token: String,
    registered: Vec<PathBuf>,
}

impl InterceptSpool {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            token: format!("{:032x}", rand::random::<u128>()),
            registered: Vec::new(),
        }
    }

    /// Path for the captured original body.
    pub fn original_path(&self) -> PathBuf {
        self.dir
            .join(format!("{}{}.{}", STORE_PREFIX, self.token, STORE_EXTENSION))
    }

    /// Record a path for deletion during cleanup. Registering the same
    /// path twice is harmless.
    pub fn register(&mut self, path: PathBuf) {
        if !self.registered.contains(&path) {
            self.registered.push(path);
        }
    }

    pub fn registered(&self) -> &[PathBuf] {
        &self.registered
    }

    /// Delete every registered store. A path that was never created is
    /// skipped; calling this again finds nothing left to do.
    pub async fn cleanup(&mut self) {
        for path in self.registered.drain(..) {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!("Removed temporary store {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!("Temporary store {} was never created", path.display())
                }
                Err(e) => warn!(
                    "Failed to remove temporary store {}: {}",
                    path.display(),
                    e
                ),
            }
        }
    }
}
