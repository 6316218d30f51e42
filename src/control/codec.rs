//! Control-channel framing
//!
//! Every message is a 16-byte big-endian header followed by a JSON body:
//!
//! ```text
//! +--------+--------+---------+--------+----------------+
//! | len    | magic  | version | status | body (len)     |
//! | u32    | u32    | u32     | u32    | JSON           |
//! +--------+--------+---------+--------+----------------+
//! ```
//!
//! Requests carry status 0; responses repeat the body's status code.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::StatusCode;
use crate::{Error, Result};

pub const MAGIC: u32 = 0x5652_5452;
pub const VERSION: u32 = 1;
pub const HEADER_LEN: usize = 16;
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub len: u32,
    pub status: u32,
}

impl FrameHeader {
    pub fn new(len: usize, status: StatusCode) -> Result<Self> {
        let len = u32::try_from(len)
            .map_err(|_| Error::OutOfRange(format!("message body of {} bytes", len)))?;
        Ok(Self {
            len,
            status: status as u32,
        })
    }

    /// Parse and check a header; bad magic, version or length is an error.
    pub fn parse(buf: &[u8; HEADER_LEN], max_len: usize) -> Result<Self> {
        let word = |i: usize| u32::from_be_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
        let (len, magic, version, status) = (word(0), word(4), word(8), word(12));
        if magic != MAGIC {
            return Err(Error::Parse(format!("bad magic {:#010x}", magic)));
        }
        if version != VERSION {
            return Err(Error::Parse(format!("unsupported version {}", version)));
        }
        if len as usize > max_len {
            return Err(Error::OutOfRange(format!(
                "message of {} bytes exceeds limit {}",
                len, max_len
            )));
        }
        Ok(Self { len, status })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&self.len.to_be_bytes());
        buf[4..8].copy_from_slice(&MAGIC.to_be_bytes());
        buf[8..12].copy_from_slice(&VERSION.to_be_bytes());
        buf[12..16].copy_from_slice(&self.status.to_be_bytes());
        buf
    }
}

/// Serialize `msg` into a complete frame.
pub fn encode<T: Serialize>(msg: &T, status: StatusCode) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(msg).map_err(|e| Error::Internal(e.to_string()))?;
    let header = FrameHeader::new(body.len(), status)?;

    let mut buf = Vec::with_capacity(HEADER_LEN + body.len());
    buf.extend_from_slice(&header.to_bytes());
    buf.extend_from_slice(&body);
    Ok(buf)
}

pub fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| Error::Parse(e.to_string()))
}

/// Read one frame. Returns `None` on a clean end of stream.
pub async fn read_frame<R>(reader: &mut R, max_len: usize) -> Result<Option<(FrameHeader, Vec<u8>)>>
where
    R: AsyncRead + Unpin,
{
    let mut header_buf = [0u8; HEADER_LEN];
    match reader.read_exact(&mut header_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let header = FrameHeader::parse(&header_buf, max_len)?;

    let mut body = vec![0u8; header.len as usize];
    reader.read_exact(&mut body).await?;
    Ok(Some((header, body)))
}

pub async fn write_frame<W, T>(writer: &mut W, msg: &T, status: StatusCode) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let frame = encode(msg, status)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}
