//! CMS (PKCS#7) signing of ticket requests.
//!
//! WSAA accepts the `loginTicketRequest` XML as a base64-encoded, DER
//! SignedData structure with the content attached.

use async_trait::async_trait;
use base64::Engine;
use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Default bound on one signer run.
pub const DEFAULT_SIGN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("Failed to start signer '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Signer I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Signer exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("Signer did not finish within {0:?}")]
    TimedOut(Duration),
}

/// Produces the base64 CMS payload sent to `loginCms`.
#[async_trait]
pub trait CmsSigner: Send + Sync {
    async fn sign(&self, content: &[u8]) -> Result<String, SignerError>;
}

/// Signs with the `openssl cms` command.
///
/// Uses SHA-256, attached content and binary mode so the XML is signed
/// byte-for-byte.
#[derive(Debug, Clone)]
pub struct OpensslCmsSigner {
    program: PathBuf,
    cert_path: PathBuf,
    key_path: PathBuf,
    timeout: Duration,
}

impl OpensslCmsSigner {
    #[must_use]
    pub fn new(
        program: impl Into<PathBuf>,
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            program: program.into(),
            cert_path: cert_path.into(),
            key_path: key_path.into(),
            timeout: DEFAULT_SIGN_TIMEOUT,
        }
    }

    /// Bound each run; the process is killed when the bound is exceeded.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("cms")
            .arg("-sign")
            .arg("-signer")
            .arg(&self.cert_path)
            .arg("-inkey")
            .arg(&self.key_path)
            .args(["-outform", "DER", "-nodetach", "-binary", "-md", "sha256"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl CmsSigner for OpensslCmsSigner {
    async fn sign(&self, content: &[u8]) -> Result<String, SignerError> {
        let mut child = self.command().spawn().map_err(|source| SignerError::Spawn {
            program: self.program.display().to_string(),
            source,
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(content).await?;
            // Dropping stdin closes the pipe so openssl sees EOF.
        }

        let output = wait_bounded(child, self.timeout).await?;
        if !output.status.success() {
            return Err(SignerError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        debug!(
            target: "arca_bridge.signer",
            der_bytes = output.stdout.len(),
            "Ticket request signed"
        );

        Ok(base64::engine::general_purpose::STANDARD.encode(output.stdout))
    }
}

/// Collect the child's output, giving up after `timeout`.
///
/// Dropping the pending wait drops the child, and `kill_on_drop` reaps it.
async fn wait_bounded(child: Child, timeout: Duration) -> Result<Output, SignerError> {
    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(output) => Ok(output?),
        Err(_) => {
            warn!(target: "arca_bridge.signer", ?timeout, "Signer timed out, killing it");
            Err(SignerError::TimedOut(timeout))
        }
    }
}
