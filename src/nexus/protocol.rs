/*!
 * Nexus Wire Contract
 *
 * One request record in, one reply record out. Both are bincode-encoded
 * and framed as:
 *
 * ```text
 * [u32 little-endian payload length][bincode payload]
 * ```
 *
 * The operation travels as a raw `u32` so a broker can answer codes it
 * does not know with `NotSupported` instead of failing to decode.
 */

use crate::core::errors::{Status, B_OK};
use crate::core::limits::MAX_FRAME_SIZE;
use crate::core::types::{ObjectId, TeamId};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::io::{Read, Write};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Bumped on any incompatible change to the request or reply layout
pub const PROTOCOL_VERSION: u32 = 1;

/// Wire protocol errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("frame of {0} bytes exceeds the {MAX_FRAME_SIZE} byte limit")]
    FrameTooLarge(usize),
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Broker operations carried by the wire contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Operation {
    Ping = 0,

    CreateSem = 0x10,
    DeleteSem = 0x11,
    AcquireSem = 0x12,
    ReleaseSem = 0x13,
    GetSemCount = 0x14,
    SetSemOwner = 0x15,

    CreatePort = 0x20,
    ClosePort = 0x21,
    DeletePort = 0x22,
    FindPort = 0x23,
    WritePort = 0x24,
    ReadPort = 0x25,
    PortCount = 0x26,
    PortBufferSize = 0x27,
    SetPortOwner = 0x28,

    AttachTeam = 0x30,
    ExitTeam = 0x31,

    CreateArea = 0x40,
    DeleteArea = 0x41,
    FindArea = 0x42,
    ResizeArea = 0x43,
    SetAreaProtection = 0x44,
}

impl Operation {
    const ALL: [Operation; 23] = [
        Operation::Ping,
        Operation::CreateSem,
        Operation::DeleteSem,
        Operation::AcquireSem,
        Operation::ReleaseSem,
        Operation::GetSemCount,
        Operation::SetSemOwner,
        Operation::CreatePort,
        Operation::ClosePort,
        Operation::DeletePort,
        Operation::FindPort,
        Operation::WritePort,
        Operation::ReadPort,
        Operation::PortCount,
        Operation::PortBufferSize,
        Operation::SetPortOwner,
        Operation::AttachTeam,
        Operation::ExitTeam,
        Operation::CreateArea,
        Operation::DeleteArea,
        Operation::FindArea,
        Operation::ResizeArea,
        Operation::SetAreaProtection,
    ];

    #[inline]
    pub const fn raw(self) -> u32 {
        self as u32
    }

    pub fn from_raw(raw: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.raw() == raw)
    }

    /// Operations that may park the serving thread
    pub const fn may_block(self) -> bool {
        matches!(
            self,
            Operation::AcquireSem
                | Operation::WritePort
                | Operation::ReadPort
                | Operation::PortBufferSize
        )
    }
}

/// Request record
///
/// Field use per operation:
/// - `target_id`: the object operated on
/// - `buffer`: names for create/find, payloads for `WritePort`
/// - `buffer_size`: read limit for `ReadPort`, byte size for areas
/// - `flags`/`timeout`: legacy wait flags and microsecond timeout
/// - `arg`: counts, message codes, new owners, protection bits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub version: u32,
    pub cookie: u64,
    pub team: TeamId,
    pub operation: u32,
    pub target_id: ObjectId,
    pub buffer: Vec<u8>,
    pub buffer_size: u64,
    pub flags: u32,
    pub timeout: i64,
    pub arg: i64,
}

impl Request {
    pub fn new(team: TeamId, operation: Operation) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            cookie: 0,
            team,
            operation: operation.raw(),
            target_id: -1,
            buffer: Vec::new(),
            buffer_size: 0,
            flags: 0,
            timeout: 0,
            arg: 0,
        }
    }

    pub fn with_cookie(mut self, cookie: u64) -> Self {
        self.cookie = cookie;
        self
    }

    pub fn with_target(mut self, target_id: ObjectId) -> Self {
        self.target_id = target_id;
        self
    }

    pub fn with_buffer(mut self, buffer: impl Into<Vec<u8>>) -> Self {
        self.buffer = buffer.into();
        self
    }

    pub fn with_buffer_size(mut self, size: u64) -> Self {
        self.buffer_size = size;
        self
    }

    pub fn with_wait(mut self, flags: u32, timeout: i64) -> Self {
        self.flags = flags;
        self.timeout = timeout;
        self
    }

    pub fn with_arg(mut self, arg: i64) -> Self {
        self.arg = arg;
        self
    }

    /// Name carried in `buffer`
    pub fn name(&self) -> Result<&str, Status> {
        std::str::from_utf8(&self.buffer).map_err(|_| Status::BadValue)
    }
}

/// Reply record; `return_code` is a legacy `status_t`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub cookie: u64,
    pub return_code: i32,
    pub out_id: ObjectId,
    pub value: i64,
    pub buffer: Vec<u8>,
}

impl Reply {
    pub fn ok(cookie: u64) -> Self {
        Self {
            cookie,
            return_code: B_OK,
            out_id: -1,
            value: 0,
            buffer: Vec::new(),
        }
    }

    pub fn error(cookie: u64, status: Status) -> Self {
        Self {
            return_code: status.code(),
            ..Self::ok(cookie)
        }
    }

    pub fn with_id(mut self, id: ObjectId) -> Self {
        self.out_id = id;
        self
    }

    pub fn with_value(mut self, value: i64) -> Self {
        self.value = value;
        self
    }

    pub fn with_buffer(mut self, buffer: Vec<u8>) -> Self {
        self.buffer = buffer;
        self
    }

    /// `Ok(self)` for `B_OK`, the decoded status otherwise
    ///
    /// Codes this build does not know are reported as `NotSupported`.
    pub fn into_result(self) -> Result<Self, Status> {
        if self.return_code == B_OK {
            Ok(self)
        } else {
            Err(Status::from_code(self.return_code).unwrap_or(Status::NotSupported))
        }
    }
}

// =============================================================================
// FRAMING
// =============================================================================

pub fn encode<T: Serialize>(value: &T) -> ProtocolResult<Vec<u8>> {
    let payload = bincode::serialize(value).map_err(|e| ProtocolError::Codec(e.to_string()))?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> ProtocolResult<T> {
    bincode::deserialize(payload).map_err(|e| ProtocolError::Codec(e.to_string()))
}

fn frame_len(header: [u8; 4]) -> ProtocolResult<usize> {
    let len = u32::from_le_bytes(header) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(len));
    }
    Ok(len)
}

/// Blocking frame write
pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, value: &T) -> ProtocolResult<()> {
    writer.write_all(&encode(value)?)?;
    writer.flush()?;
    Ok(())
}

/// Blocking frame read
pub fn read_frame<R: Read, T: DeserializeOwned>(reader: &mut R) -> ProtocolResult<T> {
    let mut header = [0u8; 4];
    reader.read_exact(&mut header)?;
    let mut payload = vec![0u8; frame_len(header)?];
    reader.read_exact(&mut payload)?;
    decode(&payload)
}

pub async fn write_frame_async<W, T>(writer: &mut W, value: &T) -> ProtocolResult<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    writer.write_all(&encode(value)?).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame; `Ok(None)` on a clean end of stream
pub async fn read_frame_async<R, T>(reader: &mut R) -> ProtocolResult<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let mut payload = vec![0u8; frame_len(header)?];
    reader.read_exact(&mut payload).await?;
    decode(&payload).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_operation_codes_resolve() {
        assert_eq!(Operation::from_raw(0x24), Some(Operation::WritePort));
        assert_eq!(Operation::from_raw(0xdead), None);
        for op in Operation::ALL {
            assert_eq!(Operation::from_raw(op.raw()), Some(op));
        }
    }

    #[test]
    fn test_frame_layout() {
        let request = Request::new(3, Operation::CreateSem)
            .with_buffer("lock")
            .with_arg(1);
        let frame = encode(&request).unwrap();
        let len = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(len, frame.len() - 4);

        let back: Request = read_frame(&mut &frame[..]).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let header = ((MAX_FRAME_SIZE + 1) as u32).to_le_bytes();
        let result: ProtocolResult<Reply> = read_frame(&mut &header[..]);
        assert!(matches!(result, Err(ProtocolError::FrameTooLarge(_))));
    }

    #[test]
    fn test_reply_status_decoding() {
        let reply = Reply::error(7, Status::TimedOut);
        assert_eq!(reply.clone().into_result(), Err(Status::TimedOut));

        let unknown = Reply {
            return_code: -42,
            ..Reply::ok(7)
        };
        assert_eq!(unknown.into_result(), Err(Status::NotSupported));
        assert!(Reply::ok(7).with_id(5).into_result().is_ok());
    }

    #[tokio::test]
    async fn test_async_read_reports_clean_eof() {
        let empty: &[u8] = &[];
        let mut reader = empty;
        let frame: Option<Request> = read_frame_async(&mut reader).await.unwrap();
        assert!(frame.is_none());
    }
}
