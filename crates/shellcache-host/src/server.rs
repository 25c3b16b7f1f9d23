//! Origin server supervision.
//!
//! The desktop shell used to start its backend and then sleep for a fixed
//! grace period. Here the backend is spawned as a child process and the
//! origin is probed until it answers, with a bounded deadline.

use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};
use url::Url;

/// Delay between readiness probes
const PROBE_INTERVAL: Duration = Duration::from_millis(250);

/// Per-probe request timeout
const PROBE_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Time the child gets to exit after being killed
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// A running origin server child process. Killed when dropped.
pub struct OriginServer {
    child: Child,
    program: String,
}

impl OriginServer {
    /// Spawn `command[0]` with the remaining elements as arguments.
    ///
    /// The child's stdout and stderr are forwarded to the log.
    pub fn spawn(command: &[String]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| anyhow::anyhow!("Empty server command"))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start origin server '{}'", program))?;

        info!(program = %program, pid = ?child.id(), "Origin server started");

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(stdout, "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(stderr, "stderr"));
        }

        Ok(Self {
            child,
            program: program.clone(),
        })
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Fail if the child has already exited.
    fn check_running(&mut self) -> Result<()> {
        if let Some(status) = self
            .child
            .try_wait()
            .context("Failed to poll origin server")?
        {
            bail!("Origin server '{}' exited early: {}", self.program, status);
        }
        Ok(())
    }

    /// Kill the child and wait for it to exit.
    pub async fn shutdown(mut self) -> Result<()> {
        if self.child.try_wait()?.is_some() {
            debug!(program = %self.program, "Origin server already exited");
            return Ok(());
        }

        let pid = self.id();
        self.child
            .start_kill()
            .context("Failed to stop origin server")?;
        debug!(program = %self.program, ?pid, "Stopping origin server");
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.child.wait()).await {
            Ok(status) => {
                let status = status.context("Failed to reap origin server")?;
                info!(program = %self.program, ?pid, %status, "Origin server stopped");
                Ok(())
            }
            Err(_) => bail!("Origin server '{}' did not stop in time", self.program),
        }
    }
}

async fn forward_output<R: AsyncRead + Unpin>(stream: R, stream_name: &'static str) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => info!(target: "origin", stream = stream_name, "{}", line),
            Ok(None) => break,
            Err(e) => {
                warn!(stream = stream_name, error = %e, "Stopped reading origin server output");
                break;
            }
        }
    }
}

/// Probe `origin` until it answers or `timeout` elapses.
///
/// Any HTTP response counts as ready, error statuses included. When a
/// server child is given, its early exit fails the wait immediately.
/// Returns how long the origin took to come up.
pub async fn wait_ready(
    origin: &Url,
    timeout: Duration,
    mut server: Option<&mut OriginServer>,
) -> Result<Duration> {
    let client = reqwest::Client::builder()
        .timeout(PROBE_REQUEST_TIMEOUT)
        .build()
        .context("Failed to build probe client")?;

    let started = Instant::now();
    let deadline = started + timeout;
    let mut attempts = 0u32;

    loop {
        if let Some(server) = server.as_deref_mut() {
            server.check_running()?;
        }

        attempts += 1;
        match client.get(origin.clone()).send().await {
            Ok(response) => {
                let elapsed = started.elapsed();
                info!(
                    origin = %origin,
                    status = response.status().as_u16(),
                    attempts,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Origin ready"
                );
                return Ok(elapsed);
            }
            Err(e) => debug!(origin = %origin, attempts, error = %e, "Origin not ready"),
        }

        if Instant::now() + PROBE_INTERVAL > deadline {
            bail!(
                "Origin {} not ready after {}s ({} probes)",
                origin,
                timeout.as_secs_f32(),
                attempts
            );
        }
        tokio::time::sleep(PROBE_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answer every connection with a fixed 200.
    async fn serve_ok(listener: TcpListener) {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok")
                    .await;
                let _ = socket.shutdown().await;
            });
        }
    }

    fn unused_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("addr").port()
    }

    #[tokio::test]
    async fn test_wait_ready_returns_once_origin_answers() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        tokio::spawn(serve_ok(listener));

        let origin = Url::parse(&format!("http://127.0.0.1:{}/", port)).expect("origin");
        wait_ready(&origin, Duration::from_secs(5), None)
            .await
            .expect("origin is up");
    }

    #[tokio::test]
    async fn test_wait_ready_times_out() {
        let origin = Url::parse(&format!("http://127.0.0.1:{}/", unused_port())).expect("origin");
        let started = Instant::now();
        let err = wait_ready(&origin, Duration::from_millis(600), None)
            .await
            .expect_err("nothing listens");
        assert!(err.to_string().contains("not ready"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_early_exit_fails_fast() {
        let mut server = OriginServer::spawn(&["sh".to_string(), "-c".to_string(), "exit 3".to_string()])
            .expect("spawn");
        let origin = Url::parse(&format!("http://127.0.0.1:{}/", unused_port())).expect("origin");

        let started = Instant::now();
        let err = wait_ready(&origin, Duration::from_secs(30), Some(&mut server))
            .await
            .expect_err("child exited");
        assert!(err.to_string().contains("exited early"));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_shutdown_kills_child() {
        let server = OriginServer::spawn(&["sleep".to_string(), "30".to_string()]).expect("spawn");
        assert!(server.id().is_some());
        server.shutdown().await.expect("shutdown");
    }

    #[test]
    fn test_empty_command_is_rejected() {
        assert!(OriginServer::spawn(&[]).is_err());
    }
}
