//! RPC Module
//!
//! Handles TCP request/response traffic between nodes.

pub mod protocol;
mod server;
mod client;

pub use protocol::{ErrorCode, FrameHeader, Metadata, Reply, Request, Response};
pub use server::RpcServer;
pub use client::RpcClient;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// Read a framed value from a reader
pub async fn read_frame<R, T>(reader: &mut R) -> Result<T>
where
    R: tokio::io::AsyncRead + Unpin,
    T: DeserializeOwned,
{
    use tokio::io::AsyncReadExt;

    // Read header
    let mut header_bytes = [0u8; FrameHeader::SIZE];
    reader.read_exact(&mut header_bytes).await?;
    let header = FrameHeader::from_bytes(&header_bytes);

    if header.length > FrameHeader::MAX_BODY {
        return Err(Error::FrameTooLarge(header.length));
    }

    // Read body
    let mut body = vec![0u8; header.length as usize];
    reader.read_exact(&mut body).await?;

    // Verify checksum
    let computed_checksum = crc32fast::hash(&body);
    if computed_checksum != header.checksum {
        return Err(Error::Network("Frame checksum mismatch".into()));
    }

    Ok(bincode::deserialize(&body)?)
}

/// Write a framed value to a writer
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
    T: Serialize,
{
    use tokio::io::AsyncWriteExt;

    let body = bincode::serialize(value)?;
    if body.len() > FrameHeader::MAX_BODY as usize {
        return Err(Error::FrameTooLarge(body.len() as u32));
    }
    let header = FrameHeader::new(&body);

    writer.write_all(&header.to_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let request = Request::new("Storage.Read", vec![4, 2]);

        write_frame(&mut a, &request).await.unwrap();
        let received: Request = read_frame(&mut b).await.unwrap();

        assert_eq!(received, request);
    }

    #[tokio::test]
    async fn test_checksum_mismatch_rejected() {
        use tokio::io::AsyncWriteExt;

        let (mut a, mut b) = tokio::io::duplex(1024);
        let body = bincode::serialize(&Request::new("Storage.Read", vec![])).unwrap();
        let mut header = FrameHeader::new(&body);
        header.checksum ^= 0xdead_beef;

        a.write_all(&header.to_bytes()).await.unwrap();
        a.write_all(&body).await.unwrap();

        let result: Result<Request> = read_frame(&mut b).await;
        assert!(matches!(result, Err(Error::Network(_))));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        use tokio::io::AsyncWriteExt;

        let (mut a, mut b) = tokio::io::duplex(64);
        let header = FrameHeader {
            length: FrameHeader::MAX_BODY + 1,
            checksum: 0,
        };
        a.write_all(&header.to_bytes()).await.unwrap();

        let result: Result<Request> = read_frame(&mut b).await;
        assert!(matches!(result, Err(Error::FrameTooLarge(_))));
    }
}
