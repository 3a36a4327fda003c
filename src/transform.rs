use crate::config::TransformConfig;
use crate::error::ProxyError;
use crate::spool::transformed_path_for;
use async_trait::async_trait;
use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;

/// Placeholder replaced with the captured image path.
pub const INPUT_PLACEHOLDER: &str = "{input}";
/// Placeholder replaced with the expected output path.
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

/// The image-processing capability intercepted bodies are handed to.
///
/// `transform` takes the path of the captured original and returns the
/// path of the transformed result; the caller owns both files afterward.
/// The session awaits the call inline, so nothing is delivered to the
/// client until it finishes.
#[async_trait]
pub trait ImageTransformer: Send + Sync {
    async fn transform(&self, source: &Path) -> Result<PathBuf, ProxyError>;
}

/// Build the transformer the server will use, from configuration, at
/// startup. A broken command template is reported here rather than on
/// the first intercepted response.
pub fn build_transformer(config: &TransformConfig) -> Result<Arc<dyn ImageTransformer>, ProxyError> {
    if config.command.is_empty() {
        warn!("No transform command configured; image/jpeg responses will not be served");
        Ok(Arc::new(UnconfiguredTransformer))
    } else {
        Ok(Arc::new(CommandTransformer::new(config.command.clone())?))
    }
}

/// Runs a configured external command for each intercepted image.
///
/// The argv template is fixed at startup; `{input}` and `{output}` are
/// substituted per call. The command must exit zero and leave a file at
/// the output path, otherwise the transform counts as unavailable and
/// the session fails instead of delivering the original bytes.
#[derive(Debug)]
pub struct CommandTransformer {
    argv: Vec<String>,
}

impl CommandTransformer {
    pub fn new(argv: Vec<String>) -> Result<Self, ProxyError> {
        if argv.is_empty() {
            return Err(ProxyError::TransformUnavailable(
                "transform command is empty".to_string(),
            ));
        }
        let program = &argv[0];
        if program.contains('/') && !Path::new(program).exists() {
            return Err(ProxyError::TransformUnavailable(format!(
                "transform program not found: {}",
                program
            )));
        }
        if !argv.iter().any(|arg| arg.contains(INPUT_PLACEHOLDER)) {
            return Err(ProxyError::TransformUnavailable(format!(
                "transform command has no {} placeholder",
                INPUT_PLACEHOLDER
            )));
        }
        Ok(Self { argv })
    }

    fn render(&self, source: &Path, dest: &Path) -> Vec<String> {
        self.argv
            .iter()
            .map(|arg| {
                arg.replace(INPUT_PLACEHOLDER, &source.to_string_lossy())
                    .replace(OUTPUT_PLACEHOLDER, &dest.to_string_lossy())
            })
            .collect()
    }
}

#[async_trait]
impl ImageTransformer for CommandTransformer {
    async fn transform(&self, source: &Path) -> Result<PathBuf, ProxyError> {
        let dest = transformed_path_for(source);
        let argv = self.render(source, &dest);
        debug!("Running transform command: {:?}", argv);

        let status = Command::new(&argv[0])
            .args(&argv[1..])
            .status()
            .await
            .map_err(|e| {
                ProxyError::TransformUnavailable(format!("failed to run {}: {}", argv[0], e))
            })?;

        if !status.success() {
            return Err(ProxyError::TransformUnavailable(format!(
                "transform command exited with {}",
                status
            )));
        }
        if tokio::fs::metadata(&dest).await.is_err() {
            return Err(ProxyError::TransformUnavailable(format!(
                "transform command produced no output at {}",
                dest.display()
            )));
        }
        Ok(dest)
    }
}

/// Installed when no transform command is configured. Intercepted
/// sessions fail instead of silently passing the original image through.
pub struct UnconfiguredTransformer;

#[async_trait]
impl ImageTransformer for UnconfiguredTransformer {
    async fn transform(&self, _source: &Path) -> Result<PathBuf, ProxyError> {
        Err(ProxyError::TransformUnavailable(
            "no transform command configured".to_string(),
        ))
    }
}
