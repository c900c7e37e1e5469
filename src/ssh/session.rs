//! Interactive pty-backed shell session

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tracing::debug;

use super::{ExitInfo, SshError};

/// Duplex byte stream to a remote shell
///
/// Reads yield the remote terminal output, writes feed the remote terminal.
/// Dropping the session kills the local `ssh` process.
pub struct InteractiveSession {
    child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
}

impl InteractiveSession {
    pub(super) fn new(mut child: Child) -> Result<Self, SshError> {
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SshError::Transfer("session stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SshError::Transfer("session stdout unavailable".to_string()))?;
        Ok(Self {
            child,
            stdin,
            stdout,
        })
    }

    /// Close stdin and wait for the remote shell to exit
    pub async fn close(mut self) -> Result<ExitInfo, SshError> {
        self.stdin.shutdown().await?;
        drop(self.stdin);
        let status = self.child.wait().await?;
        let exit = ExitInfo::from_status(status);
        debug!(%exit, "Interactive session closed");
        Ok(exit)
    }
}

impl AsyncRead for InteractiveSession {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stdout).poll_read(cx, buf)
    }
}

impl AsyncWrite for InteractiveSession {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stdin).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stdin).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stdin).poll_shutdown(cx)
    }
}
