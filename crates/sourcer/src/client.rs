//! Host side of the sourcer plugin boundary.
//!
//! [`SourcerClient::launch`] runs the configured command through the
//! user's shell, checks the handshake and keeps the child alive for the
//! lifetime of the client. Requests are serialized through one mutex:
//! the plugin represents a single device and its stdio carries one
//! request at a time.
//!
//! Each exchange runs in its own task that owns the lock. A caller that
//! stops waiting (a step timeout) abandons only the wait; the frame is
//! still read to the end and the next request starts on a clean stream.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use regscore_core::capability::{ImageSource, SourceError, SourcedImage};

use crate::protocol::{self, HandshakeConfig, HandshakeError, ReplyHeader, Request, MAX_IMAGE_BYTES};

/// How long a freshly spawned plugin has to print its handshake line.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Startup failures. All of them are fatal to the host.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("Failed to spawn sourcer: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Sourcer exited before completing the handshake")]
    ExitedEarly,

    #[error("Sourcer handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("Sourcer did not complete the handshake within {0:?}")]
    Timeout(Duration),

    #[error("Sourcer I/O failed during handshake: {0}")]
    Io(#[source] std::io::Error),
}

/// A dispensed sourcer capability backed by a child process.
pub struct SourcerClient {
    link: Arc<Mutex<Link>>,
    pid: Option<u32>,
}

impl std::fmt::Debug for SourcerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourcerClient").field("pid", &self.pid).finish_non_exhaustive()
    }
}

struct Link {
    /// Held so the plugin is killed when the client is dropped.
    _child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    /// Set while a request is on the wire. Still set at the start of the
    /// next call means the previous exchange failed mid-frame and the
    /// stream can no longer be trusted.
    in_flight: bool,
}

impl SourcerClient {
    /// Launch `command` via `$SHELL -c` (or `sh -c` when `SHELL` is unset).
    pub async fn launch(command: &str, handshake: &HandshakeConfig) -> Result<Self, LaunchError> {
        let shell = std::env::var("SHELL").unwrap_or_else(|_| "sh".to_string());
        let mut cmd = Command::new(shell);
        cmd.arg("-c").arg(command);
        Self::spawn(cmd, handshake).await
    }

    /// Spawn a prepared command and perform the handshake.
    pub async fn spawn(mut cmd: Command, handshake: &HandshakeConfig) -> Result<Self, LaunchError> {
        cmd.env(&handshake.cookie_key, &handshake.cookie_value)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(LaunchError::Spawn)?;
        let pid = child.id();

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(LaunchError::Spawn(std::io::Error::other("stdio was not captured")));
        };
        let mut stdout = BufReader::new(stdout);

        let mut line = String::new();
        let read = tokio::time::timeout(HANDSHAKE_TIMEOUT, stdout.read_line(&mut line))
            .await
            .map_err(|_| LaunchError::Timeout(HANDSHAKE_TIMEOUT))?
            .map_err(LaunchError::Io)?;
        if read == 0 {
            return Err(LaunchError::ExitedEarly);
        }
        protocol::check_handshake(&line, handshake.protocol_version)?;

        tracing::info!(pid, version = handshake.protocol_version, "Sourcer handshake complete");

        Ok(Self {
            link: Arc::new(Mutex::new(Link {
                _child: child,
                stdin,
                stdout,
                in_flight: false,
            })),
            pid,
        })
    }

    /// OS process id of the plugin, if it is still known.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    async fn request_image(link: &mut Link) -> Result<SourcedImage, SourceError> {
        if link.in_flight {
            return Err(SourceError::Protocol(
                "link desynchronised by an earlier interrupted request".to_string(),
            ));
        }
        link.in_flight = true;

        let mut request = serde_json::to_vec(&Request::GetImage)
            .map_err(|e| SourceError::Protocol(format!("encoding request: {e}")))?;
        request.push(b'\n');
        link.stdin.write_all(&request).await?;
        link.stdin.flush().await?;

        let mut header = String::new();
        if link.stdout.read_line(&mut header).await? == 0 {
            return Err(SourceError::Protocol("sourcer closed its output".to_string()));
        }

        let reply = match serde_json::from_str::<ReplyHeader>(header.trim_end()) {
            Ok(ReplyHeader::Ok { metadata, length }) => {
                if length > MAX_IMAGE_BYTES {
                    return Err(SourceError::Protocol(format!(
                        "image of {length} bytes exceeds the {MAX_IMAGE_BYTES} byte limit"
                    )));
                }
                let mut data = vec![0; length as usize];
                link.stdout.read_exact(&mut data).await?;
                Ok(SourcedImage { data, metadata })
            }
            Ok(ReplyHeader::Err(message)) => Err(SourceError::Remote(message)),
            Err(e) => return Err(SourceError::Protocol(format!("malformed reply header: {e}"))),
        };

        link.in_flight = false;
        reply
    }
}

#[async_trait]
impl ImageSource for SourcerClient {
    async fn get_image(&self) -> Result<SourcedImage, SourceError> {
        let link = Arc::clone(&self.link);
        tokio::spawn(async move {
            let mut link = link.lock_owned().await;
            Self::request_image(&mut link).await
        })
        .await
        .map_err(|e| SourceError::Protocol(format!("sourcer exchange aborted: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    /// A shell one-liner standing in for a plugin binary.
    fn fake_plugin(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[tokio::test]
    async fn ok_reply_is_decoded() {
        let cmd = fake_plugin(
            r#"echo 'regscore-sourcer|1'; read req; printf '{"ok":{"metadata":{"name":"a.txt","content-type":"text/plain"},"length":5}}\nhello'; sleep 5"#,
        );
        let client = SourcerClient::spawn(cmd, &HandshakeConfig::default())
            .await
            .expect("handshake");

        let image = client.get_image().await.expect("image");
        assert_eq!(image.data, b"hello");
        assert_eq!(image.name(), Some("a.txt"));
        assert_eq!(image.content_type(), Some("text/plain"));
    }

    #[tokio::test]
    async fn err_reply_surfaces_as_remote_error() {
        let cmd = fake_plugin(
            r#"echo 'regscore-sourcer|1'; read req; echo '{"err":"camera unplugged"}'; sleep 5"#,
        );
        let client = SourcerClient::spawn(cmd, &HandshakeConfig::default())
            .await
            .expect("handshake");

        assert_matches!(
            client.get_image().await,
            Err(SourceError::Remote(message)) if message == "camera unplugged"
        );
    }

    #[tokio::test]
    async fn plugin_sees_the_cookie() {
        let cmd = fake_plugin(
            r#"test "$REGSCORE_SOURCER_COOKIE" = "5e1d3c0a-regscore-sourcer" && echo 'regscore-sourcer|1'; sleep 5"#,
        );
        assert!(SourcerClient::spawn(cmd, &HandshakeConfig::default()).await.is_ok());
    }

    #[tokio::test]
    async fn version_mismatch_is_fatal() {
        let cmd = fake_plugin("echo 'regscore-sourcer|2'; sleep 5");
        let result = SourcerClient::spawn(cmd, &HandshakeConfig::default()).await;
        assert_matches!(
            result,
            Err(LaunchError::Handshake(HandshakeError::VersionMismatch { expected: 1, actual: 2 }))
        );
    }

    #[tokio::test]
    async fn silent_exit_is_fatal() {
        let cmd = fake_plugin("exit 1");
        let result = SourcerClient::spawn(cmd, &HandshakeConfig::default()).await;
        assert_matches!(result, Err(LaunchError::ExitedEarly));
    }

    #[tokio::test]
    async fn abandoned_call_does_not_poison_the_link() {
        let cmd = fake_plugin(
            r#"echo 'regscore-sourcer|1'; while read req; do sleep 0.3; printf '{"ok":{"metadata":{"name":"slow.png"},"length":4}}\nslow'; done"#,
        );
        let client = SourcerClient::spawn(cmd, &HandshakeConfig::default())
            .await
            .expect("handshake");

        let abandoned = tokio::time::timeout(Duration::from_millis(50), client.get_image()).await;
        assert!(abandoned.is_err(), "first call should outlive its timeout");

        for _ in 0..2 {
            let image = client.get_image().await.expect("image after abandoned call");
            assert_eq!(image.data, b"slow");
            assert_eq!(image.name(), Some("slow.png"));
        }
    }

    #[tokio::test]
    async fn concurrent_calls_are_serialized() {
        let cmd = fake_plugin(
            r#"echo 'regscore-sourcer|1'; n=0; while read req; do n=$((n+1)); sleep 0.05; printf '{"ok":{"metadata":{"name":"%s"},"length":3}}\n%03d' "$n" "$n"; done"#,
        );
        let client = SourcerClient::spawn(cmd, &HandshakeConfig::default())
            .await
            .expect("handshake");

        let (a, b, c) = tokio::join!(client.get_image(), client.get_image(), client.get_image());

        let mut frames: Vec<(String, Vec<u8>)> = [a, b, c]
            .into_iter()
            .map(|r| {
                let image = r.expect("image");
                (image.name().unwrap_or_default().to_string(), image.data)
            })
            .collect();
        frames.sort();
        assert_eq!(
            frames,
            [
                ("1".to_string(), b"001".to_vec()),
                ("2".to_string(), b"002".to_vec()),
                ("3".to_string(), b"003".to_vec()),
            ]
        );
    }

    #[tokio::test]
    async fn plugin_dying_mid_session_is_a_source_error() {
        let cmd = fake_plugin("echo 'regscore-sourcer|1'; read req; exit 0");
        let client = SourcerClient::spawn(cmd, &HandshakeConfig::default())
            .await
            .expect("handshake");

        assert_matches!(client.get_image().await, Err(SourceError::Protocol(_) | SourceError::Io(_)));
    }
}
