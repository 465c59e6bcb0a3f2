use async_trait::async_trait;
use log::debug;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::OracleError;

/// Turns a challenge image into a best-effort text guess.
///
/// Implementations do not retry and do not validate the shape of what they
/// return; the solver owns both concerns.
#[async_trait]
pub trait ChallengeOracle: Send + Sync {
    async fn classify(&self, image: &[u8]) -> Result<String, OracleError>;
}

/// Pipes the image through an external OCR program (tesseract-compatible CLI).
#[derive(Debug, Clone)]
pub struct CommandOracle {
    program: String,
    args: Vec<String>,
}

impl CommandOracle {
    /// Single-word page segmentation, optionally restricted to `charset`.
    pub fn new(program: impl Into<String>, charset: Option<&str>) -> Self {
        let mut args = vec![
            "stdin".to_string(),
            "stdout".to_string(),
            "--psm".to_string(),
            "8".to_string(),
        ];
        if let Some(charset) = charset {
            args.push("-c".to_string());
            args.push(format!("tessedit_char_whitelist={}", charset));
        }
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

#[async_trait]
impl ChallengeOracle for CommandOracle {
    async fn classify(&self, image: &[u8]) -> Result<String, OracleError> {
        let spawn_error = |source| OracleError::Spawn {
            program: self.program.clone(),
            source,
        };

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(image).await.map_err(spawn_error)?;
        }

        let output = child.wait_with_output().await.map_err(spawn_error)?;
        if !output.status.success() {
            return Err(OracleError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!("Classifier returned {:?}", text);
        if text.is_empty() {
            return Err(OracleError::Empty);
        }
        Ok(text)
    }
}
