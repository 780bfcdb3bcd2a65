//! Token-based file transfer.
//!
//! The owner of a file registers it and hands the resulting [`UploadToken`]
//! to a peer. The peer pulls the content in chunks with `Download` requests
//! addressed to the owner. Tokens stay valid until revoked.

use std::path::{Path, PathBuf};

use dashmap::DashMap;
use tb_core::{EndpointId, UploadToken};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info};

use crate::error::{ChannelError, Result};
use crate::host::ChannelHost;
use crate::protocol::{Command, Reply};

pub const CHUNK_SIZE: u32 = 256 * 1024;

#[derive(Default)]
pub struct UploadBroker {
    uploads: DashMap<UploadToken, PathBuf>,
}

impl UploadBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer `path` for download under a fresh token.
    pub fn register(&self, path: impl Into<PathBuf>) -> UploadToken {
        let token = UploadToken::generate();
        let path = path.into();
        debug!(token = %token, path = %path.display(), "upload registered");
        self.uploads.insert(token, path);
        token
    }

    pub fn revoke(&self, token: &UploadToken) -> Option<PathBuf> {
        self.uploads.remove(token).map(|(_, path)| path)
    }

    pub fn path_of(&self, token: &UploadToken) -> Option<PathBuf> {
        self.uploads.get(token).map(|p| p.value().clone())
    }

    /// Read up to `length` bytes at `offset`. The flag is set once the chunk
    /// reaches the end of the file.
    pub async fn read_chunk(&self, token: UploadToken, offset: u64, length: u32) -> Result<(Vec<u8>, bool)> {
        let path = self
            .path_of(&token)
            .ok_or(ChannelError::UnknownToken(token))?;
        let mut file = tokio::fs::File::open(&path).await?;
        let size = file.metadata().await?.len();
        if offset >= size {
            return Ok((Vec::new(), true));
        }
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        let want = (size - offset).min(u64::from(length.min(CHUNK_SIZE))) as usize;
        let mut data = vec![0u8; want];
        file.read_exact(&mut data).await?;
        let eof = offset + want as u64 >= size;
        Ok((data, eof))
    }
}

/// Pull the upload `token` owned by `source` into `destination`.
/// Returns the number of bytes written.
pub async fn download(
    host: &ChannelHost,
    source: &EndpointId,
    token: UploadToken,
    destination: &Path,
) -> Result<u64> {
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::File::create(destination).await?;
    let mut offset = 0u64;
    loop {
        let reply = host
            .call(
                source,
                Command::Download {
                    token,
                    offset,
                    length: CHUNK_SIZE,
                },
            )
            .await?;
        let (data, eof) = match reply {
            Reply::Chunk { data, eof } => (data, eof),
            other => {
                return Err(ChannelError::UnexpectedReply {
                    command: "Download",
                    reply: other.name(),
                })
            }
        };
        file.write_all(&data).await?;
        offset += data.len() as u64;
        if eof {
            break;
        }
        if data.is_empty() {
            return Err(ChannelError::Remote(format!(
                "upload {token} stalled at offset {offset}"
            )));
        }
    }
    file.flush().await?;
    info!(token = %token, bytes = offset, destination = %destination.display(), "download complete");
    Ok(offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn chunks_cover_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        std::fs::write(&path, b"0123456789").unwrap();

        let broker = UploadBroker::new();
        let token = broker.register(&path);

        let (first, eof) = broker.read_chunk(token, 0, 4).await.unwrap();
        assert_eq!(first, b"0123");
        assert!(!eof);
        let (rest, eof) = broker.read_chunk(token, 4, 100).await.unwrap();
        assert_eq!(rest, b"456789");
        assert!(eof);
        let (past, eof) = broker.read_chunk(token, 10, 4).await.unwrap();
        assert!(past.is_empty());
        assert!(eof);
    }

    #[tokio::test]
    async fn revoked_token_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"a").unwrap();

        let broker = UploadBroker::new();
        let token = broker.register(&path);
        assert_eq!(broker.revoke(&token), Some(path));
        let err = broker.read_chunk(token, 0, 1).await.unwrap_err();
        assert!(matches!(err, ChannelError::UnknownToken(_)));
    }
}
