//! Subprocess Transport
//!
//! Owns the MCP server child process and the newline-delimited JSON framing
//! over its stdio. The session layers correlation on top; this module only
//! moves whole frames: one line in, one line out.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, Command};

use crate::error::{McpError, Result};

/// How to launch an MCP server process: executable, arguments, and
/// environment overrides. Matches the `mcpServers` entries of the client
/// configuration file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LaunchSpec {
    /// Executable to run
    pub command: String,

    /// Argument list
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment variable overrides
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl LaunchSpec {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

/// Write half of the transport: one frame per line, flushed per send.
///
/// The session serializes access so concurrent requests never interleave
/// partial frames.
pub struct FrameWriter {
    inner: Box<dyn AsyncWrite + Send + Unpin>,
}

impl FrameWriter {
    pub fn new(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            inner: Box::new(writer),
        }
    }

    /// Write one whole frame followed by the line delimiter
    pub async fn send(&mut self, frame: &str) -> Result<()> {
        self.inner
            .write_all(frame.as_bytes())
            .await
            .map_err(|e| McpError::Write(e.to_string()))?;
        self.inner
            .write_all(b"\n")
            .await
            .map_err(|e| McpError::Write(e.to_string()))?;
        self.inner
            .flush()
            .await
            .map_err(|e| McpError::Write(e.to_string()))?;
        Ok(())
    }
}

/// Read half of the transport: yields whole frames until end of stream.
pub struct FrameReader {
    lines: Lines<BufReader<Box<dyn AsyncRead + Send + Unpin>>>,
}

impl FrameReader {
    pub fn new(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        let boxed: Box<dyn AsyncRead + Send + Unpin> = Box::new(reader);
        Self {
            lines: BufReader::new(boxed).lines(),
        }
    }

    /// Next frame, or `None` once the peer closed its output
    pub async fn next_frame(&mut self) -> Result<Option<String>> {
        loop {
            match self.lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => return Ok(Some(line)),
                Ok(None) => return Ok(None),
                Err(e) => return Err(McpError::Read(e.to_string())),
            }
        }
    }
}

/// A child MCP server process with piped stdio.
///
/// `split` hands out the framed halves exactly once; `stop` requests
/// graceful termination by closing stdin and kills after a bounded grace
/// period. Teardown is idempotent and safe after the process has already
/// exited.
#[derive(Debug)]
pub struct StdioTransport {
    child: Child,
    stdin: Option<ChildStdin>,
    grace: Duration,
    exit_code: Option<i32>,
}

impl StdioTransport {
    /// Spawn the server process described by `spec`
    pub async fn start(spec: &LaunchSpec) -> Result<Self> {
        let mut command = Command::new(&spec.command);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| McpError::Launch(format!("{}: {e}", spec.command)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Launch("child stdin not captured".into()))?;

        // The server's stderr is diagnostics, not protocol; drain it into
        // the log so it can't fill the pipe and stall the child.
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(target: "mcp_server", "{line}");
                }
            });
        }

        tracing::debug!(pid = child.id(), command = %spec.command, "launched MCP server");

        Ok(Self {
            child,
            stdin: Some(stdin),
            grace: Duration::from_secs(5),
            exit_code: None,
        })
    }

    /// Override the grace period `stop` waits before killing
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Process id, if the process is still running
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Whether the child process is still running
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Take the framed read/write halves. Callable once.
    pub fn split(&mut self) -> Result<(FrameWriter, FrameReader)> {
        let stdin = self
            .stdin
            .take()
            .ok_or_else(|| McpError::Protocol("transport already split".into()))?;
        let stdout = self
            .child
            .stdout
            .take()
            .ok_or_else(|| McpError::Launch("child stdout not captured".into()))?;
        Ok((FrameWriter::new(stdin), FrameReader::new(stdout)))
    }

    /// Stop the server: close stdin so it can exit on its own, wait up to
    /// the grace period, then kill. Always waits for process exit. Safe to
    /// call repeatedly.
    pub async fn stop(&mut self) -> Option<i32> {
        if let Some(code) = self.exit_code {
            return Some(code);
        }

        // Closing stdin is the graceful shutdown signal for a stdio server.
        drop(self.stdin.take());

        let status = match tokio::time::timeout(self.grace, self.child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "failed waiting for MCP server exit");
                None
            }
            Err(_) => {
                tracing::warn!(
                    grace_secs = self.grace.as_secs(),
                    "MCP server did not exit within grace period; killing"
                );
                if let Err(e) = self.child.start_kill() {
                    tracing::warn!(error = %e, "failed to kill MCP server");
                }
                self.child.wait().await.ok()
            }
        };

        self.exit_code = status.and_then(|s| s.code());
        tracing::debug!(exit_code = ?self.exit_code, "MCP server stopped");
        self.exit_code
    }
}
