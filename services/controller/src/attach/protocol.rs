//! Attach agent wire format.
//!
//! ```text
//! controller -> agent   [u32 BE length][JSON AttachRequest]
//! agent -> controller   [status byte]
//!                       status 1 (waiting): later a second status byte
//!                       status 2 (error):   UTF-8 message until EOF
//!                       otherwise:          raw job output until EOF
//! ```

use serde::{Deserialize, Serialize};
use shoal_id::JobId;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest request frame accepted by [`read_frame`].
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Status byte values sent by the agent.
pub mod status {
    pub const ATTACHED: u8 = 0;
    pub const WAITING: u8 = 1;
    pub const ERROR: u8 = 2;
}

/// Which streams an attach request subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttachFlags(u8);

impl AttachFlags {
    pub const STDOUT: Self = Self(1);
    pub const STDERR: Self = Self(1 << 1);
    pub const STDIN: Self = Self(1 << 2);
    pub const LOGS: Self = Self(1 << 3);
    pub const STREAM: Self = Self(1 << 4);

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for AttachFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// The first status byte of a handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachStatus {
    Attached,
    Waiting,
    Error,
}

impl AttachStatus {
    /// Unknown values are treated as attached.
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            status::WAITING => Self::Waiting,
            status::ERROR => Self::Error,
            _ => Self::Attached,
        }
    }
}

/// Request sent to the agent after connecting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachRequest {
    pub job_id: JobId,
    pub flags: AttachFlags,
    /// Terminal rows; 0 leaves the terminal unsized.
    pub height: u16,
    /// Terminal columns; 0 leaves the terminal unsized.
    pub width: u16,
}

impl AttachRequest {
    pub fn new(job_id: JobId, flags: AttachFlags) -> Self {
        Self {
            job_id,
            flags,
            height: 0,
            width: 0,
        }
    }

    pub fn with_size(mut self, height: u16, width: u16) -> Self {
        self.height = height;
        self.width = width;
        self
    }
}

/// Write `payload` as one length-prefixed frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(stream: &mut W, payload: &[u8]) -> std::io::Result<()> {
    let len = u32::try_from(payload.len()).map_err(|_| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "frame too large")
    })?;
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(payload);
    stream.write_all(&frame).await?;
    stream.flush().await
}

/// Read one length-prefixed frame. Returns `None` on a clean EOF.
pub async fn read_frame<R: AsyncRead + Unpin>(stream: &mut R) -> std::io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds limit"),
        ));
    }

    let mut frame = vec![0u8; len];
    stream.read_exact(&mut frame).await?;
    Ok(Some(frame))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_bits() {
        let flags = AttachFlags::STDOUT | AttachFlags::STDERR | AttachFlags::STDIN | AttachFlags::STREAM;
        assert_eq!(flags.bits(), 1 | 2 | 4 | 16);
        assert!(flags.contains(AttachFlags::STDIN));
        assert!(!flags.contains(AttachFlags::LOGS));
        assert_eq!(AttachFlags::LOGS.bits(), 8);
    }

    #[test]
    fn test_status_from_byte() {
        assert_eq!(AttachStatus::from_byte(0), AttachStatus::Attached);
        assert_eq!(AttachStatus::from_byte(1), AttachStatus::Waiting);
        assert_eq!(AttachStatus::from_byte(2), AttachStatus::Error);
        assert_eq!(AttachStatus::from_byte(7), AttachStatus::Attached);
    }

    #[test]
    fn test_request_json_shape() {
        let request = AttachRequest::new(
            JobId::parse("blog-run.abc").unwrap(),
            AttachFlags::STDOUT | AttachFlags::STDIN,
        )
        .with_size(24, 80);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"job_id": "blog-run.abc", "flags": 5, "height": 24, "width": 80})
        );
    }

    #[tokio::test]
    async fn test_frame_layout() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"{}").await.unwrap();
        assert_eq!(buf, vec![0, 0, 0, 2, b'{', b'}']);

        let mut reader = buf.as_slice();
        assert_eq!(read_frame(&mut reader).await.unwrap().unwrap(), b"{}");
        assert!(read_frame(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_frame_rejects_oversized() {
        let len = (MAX_FRAME_LEN as u32 + 1).to_be_bytes();
        let mut reader = &len[..];
        let err = read_frame(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }
}
