//! Child process plumbing: graceful shutdown and stream readers.

use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::mpsc;
use tracing::debug;

use crate::classifier::classify_line;
use crate::events::SupervisorMsg;

/// Grace period between SIGTERM and SIGKILL.
pub const STOP_GRACE: Duration = Duration::from_secs(3);

/// Gracefully shut down a child: SIGTERM, wait [`STOP_GRACE`], then SIGKILL.
///
/// Always reaps the child so no zombie is left behind. On non-Unix targets
/// there is no SIGTERM; the child is killed immediately.
pub async fn shutdown_child(child: &mut Child) -> io::Result<ExitStatus> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        let Some(pid) = child.id() else {
            // Already reaped.
            return child.wait().await;
        };

        if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            if e != nix::errno::Errno::ESRCH {
                return Err(io::Error::other(e));
            }
            return child.wait().await;
        }

        if let Ok(result) = tokio::time::timeout(STOP_GRACE, child.wait()).await {
            return result;
        }

        // Still alive after the grace period: SIGKILL and reap.
        child.kill().await?;
        child.wait().await
    }

    #[cfg(not(unix))]
    {
        child.kill().await?;
        child.wait().await
    }
}

/// Spawn a reader task over one child stream.
///
/// Reads byte-based lines (bridges can emit non-UTF8 output), logs each one,
/// runs the error classifier, and forwards classified errors to the
/// supervisor. The task exits on EOF or read error.
pub fn spawn_stream_reader(
    stream: impl AsyncRead + Unpin + Send + 'static,
    server_id: String,
    stream_type: &'static str,
    events: mpsc::Sender<SupervisorMsg>,
) {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf: Vec<u8> = Vec::with_capacity(1024);

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    if buf.last() == Some(&b'\n') {
                        buf.pop();
                        if buf.last() == Some(&b'\r') {
                            buf.pop();
                        }
                    }

                    let line = String::from_utf8_lossy(&buf);
                    debug!(server_id = %server_id, %stream_type, "{line}");

                    if let Some(classified) = classify_line(&line) {
                        let _ = events
                            .send(SupervisorMsg::StreamError {
                                server_id: server_id.clone(),
                                message: classified.message,
                                kind: classified.kind,
                            })
                            .await;
                    }
                }
                Err(e) => {
                    debug!(server_id = %server_id, %stream_type, error = %e, "stream reader exiting");
                    break;
                }
            }
        }

        debug!(server_id = %server_id, %stream_type, "stream reader task exiting");
    });
}
