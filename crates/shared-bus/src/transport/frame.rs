//! Length-prefixed `bincode` frames.

use crate::{BusError, MAX_FRAME_SIZE};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Frames a client sends to the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum ClientFrame {
    Hello {
        version: u16,
    },
    CreateQueue {
        request_id: u64,
        name: String,
        durable: bool,
    },
    Send {
        request_id: u64,
        queue: String,
        body: Vec<u8>,
    },
    Subscribe {
        request_id: u64,
        subscription_id: u64,
        queue: String,
    },
    Unsubscribe {
        subscription_id: u64,
    },
    ConsumerCount {
        request_id: u64,
        queue: String,
    },
}

/// Frames the broker sends to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum ServerFrame {
    Ack {
        request_id: u64,
        value: u64,
    },
    Error {
        request_id: u64,
        message: String,
    },
    Deliver {
        subscription_id: u64,
        queue: String,
        body: Vec<u8>,
    },
}

impl ServerFrame {
    pub(crate) fn reply(request_id: u64, result: Result<u64, BusError>) -> Self {
        match result {
            Ok(value) => Self::Ack { request_id, value },
            Err(e) => Self::Error {
                request_id,
                message: e.to_string(),
            },
        }
    }
}

pub(crate) async fn write_frame<W, T>(writer: &mut W, frame: &T) -> Result<(), BusError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let bytes = bincode::serialize(frame).map_err(|e| BusError::Frame(e.to_string()))?;
    if bytes.len() > MAX_FRAME_SIZE {
        return Err(BusError::FrameTooLarge {
            size: bytes.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    writer.write_all(&(bytes.len() as u32).to_be_bytes()).await?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. `Ok(None)` means the peer closed the connection cleanly.
pub(crate) async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>, BusError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let size = u32::from_be_bytes(len_buf) as usize;
    if size > MAX_FRAME_SIZE {
        return Err(BusError::FrameTooLarge {
            size,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut body = vec![0u8; size];
    reader.read_exact(&mut body).await?;
    bincode::deserialize(&body)
        .map(Some)
        .map_err(|e| BusError::Frame(e.to_string()))
}
