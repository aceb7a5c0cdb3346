//! Plugin side of the sourcer boundary.
//!
//! A plugin binary builds its [`Sourcer`] and hands it to
//! [`serve_stdio`], which refuses to run without the host's cookie,
//! prints the handshake line and then answers requests until the host
//! closes stdin.

use std::io::{self, BufRead, Write};

use regscore_core::capability::SourcedImage;

use crate::protocol::{self, HandshakeConfig, ReplyHeader, Request};

/// Failure reported back to the host for a single request.
pub type SourcerFailure = Box<dyn std::error::Error + Send + Sync>;

/// Something that can produce images one at a time.
///
/// Calls arrive strictly one after another, so implementations may keep
/// plain mutable state (a cursor, a device handle).
pub trait Sourcer {
    fn get_image(&mut self) -> Result<SourcedImage, SourcerFailure>;
}

#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error(
        "This binary is a regscore sourcer plugin and must be launched by the host \
         (missing or wrong {0} cookie)"
    )]
    CookieMismatch(String),

    #[error("Malformed request from host: {0}")]
    BadRequest(#[source] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Verify the host's magic cookie is present in the environment.
pub fn check_cookie(handshake: &HandshakeConfig) -> Result<(), ServeError> {
    match std::env::var(&handshake.cookie_key) {
        Ok(value) if value == handshake.cookie_value => Ok(()),
        _ => Err(ServeError::CookieMismatch(handshake.cookie_key.clone())),
    }
}

/// Serve `sourcer` over the process's stdin/stdout.
pub fn serve_stdio<S: Sourcer>(sourcer: &mut S, handshake: &HandshakeConfig) -> Result<(), ServeError> {
    check_cookie(handshake)?;
    let input = io::stdin().lock();
    let output = io::stdout().lock();
    serve(sourcer, handshake.protocol_version, input, output)
}

/// Handshake, then answer requests from `input` until it reaches EOF.
pub fn serve<S, R, W>(sourcer: &mut S, version: u32, mut input: R, mut output: W) -> Result<(), ServeError>
where
    S: Sourcer,
    R: BufRead,
    W: Write,
{
    writeln!(output, "{}", protocol::handshake_line(version))?;
    output.flush()?;

    let mut line = String::new();
    loop {
        line.clear();
        if input.read_line(&mut line)? == 0 {
            tracing::info!("Host closed the request stream");
            return Ok(());
        }
        if line.trim().is_empty() {
            continue;
        }

        let request: Request = serde_json::from_str(line.trim()).map_err(ServeError::BadRequest)?;
        match request {
            Request::GetImage => {
                let reply = sourcer.get_image();
                write_reply(&mut output, reply)?;
            }
        }
    }
}

fn write_reply<W: Write>(output: &mut W, reply: Result<SourcedImage, SourcerFailure>) -> io::Result<()> {
    match reply {
        Ok(image) => {
            tracing::debug!(bytes = image.data.len(), name = ?image.name(), "Sending image");
            let header = ReplyHeader::Ok {
                metadata: image.metadata,
                length: image.data.len() as u64,
            };
            serde_json::to_writer(&mut *output, &header)?;
            output.write_all(b"\n")?;
            output.write_all(&image.data)?;
        }
        Err(e) => {
            tracing::warn!(error = %e, "Sourcing failed");
            serde_json::to_writer(&mut *output, &ReplyHeader::Err(e.to_string()))?;
            output.write_all(b"\n")?;
        }
    }
    output.flush()
}
