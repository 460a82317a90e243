//! Native-messaging bridge
//!
//! Frames follow the browser native-messaging convention: a little-endian
//! u32 length, then that many bytes of JSON. Each frame decodes to a batch
//! of commands; the bridge forwards them to the HTTP endpoint one by one
//! and writes the aggregated replies back in the same framing. EOF on the
//! read side terminates the loop cleanly.

use super::Command;
use crate::{EridanusError, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Refuse frames beyond this size; a larger length prefix is garbage.
const MAX_FRAME_LEN: u32 = 8 * 1024 * 1024;

/// A framed batch of commands
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub commands: Vec<Command>,
}

/// Reads one length-prefixed frame. Returns `None` on clean EOF at a frame
/// boundary.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<Message>>
where
    R: AsyncRead + Unpin,
{
    let mut length_bytes = [0u8; 4];
    match reader.read_exact(&mut length_bytes).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    }
    let length = u32::from_le_bytes(length_bytes);
    if length > MAX_FRAME_LEN {
        return Err(EridanusError::InvalidArgument(format!(
            "frame length {} exceeds limit",
            length
        )));
    }

    let mut payload = vec![0u8; length as usize];
    reader.read_exact(&mut payload).await?;
    Ok(Some(serde_json::from_slice(&payload)?))
}

/// Writes one length-prefixed frame.
pub async fn write_message<W>(writer: &mut W, message: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let payload = serde_json::to_vec(message)?;
    writer
        .write_all(&(payload.len() as u32).to_le_bytes())
        .await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Bridges framed messages to the HTTP command endpoint until EOF.
pub async fn run<R, W>(
    reader: &mut R,
    writer: &mut W,
    endpoint: &str,
    client: &reqwest::Client,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    while let Some(message) = read_message(reader).await? {
        let mut replies = Vec::with_capacity(message.commands.len());
        for command in &message.commands {
            let reply: Command = client
                .post(endpoint)
                .json(command)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            replies.push(reply);
        }
        write_message(writer, &Message { commands: replies }).await?;
    }
    Ok(())
}
