//! Payload encoding for the message bus: compression and checksums.

use flate2::Compression;
use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use thiserror::Error;
use toolbridge_domain::CompressionKind;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("codec task failed: {0}")]
    Task(String),
}

/// A payload ready to persist.
#[derive(Debug)]
pub struct Encoded {
    pub checksum: String,
    pub raw_len: usize,
    pub packed: Vec<u8>,
}

/// Checksum and compress `serialized` on the blocking pool.
pub async fn encode(kind: CompressionKind, serialized: Vec<u8>) -> Result<Encoded, CodecError> {
    tokio::task::spawn_blocking(move || {
        let checksum = checksum(&serialized);
        let packed = compress(kind, &serialized)?;
        Ok(Encoded {
            checksum,
            raw_len: serialized.len(),
            packed,
        })
    })
    .await
    .map_err(|e| CodecError::Task(e.to_string()))?
}

/// Decompress `packed` on the blocking pool, returning the bytes and their checksum.
pub async fn decode(kind: CompressionKind, packed: Vec<u8>) -> Result<(Vec<u8>, String), CodecError> {
    tokio::task::spawn_blocking(move || {
        let bytes = decompress(kind, &packed)?;
        let sum = checksum(&bytes);
        Ok((bytes, sum))
    })
    .await
    .map_err(|e| CodecError::Task(e.to_string()))?
}

/// Hex SHA-256 of `bytes`.
pub fn checksum(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

pub fn compress(kind: CompressionKind, bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    match kind {
        CompressionKind::None => Ok(bytes.to_vec()),
        CompressionKind::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(bytes)?;
            encoder.finish()
        }
        CompressionKind::Zlib => {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(bytes)?;
            encoder.finish()
        }
    }
}

pub fn decompress(kind: CompressionKind, bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    match kind {
        CompressionKind::None => out.extend_from_slice(bytes),
        CompressionKind::Gzip => {
            GzDecoder::new(bytes).read_to_end(&mut out)?;
        }
        CompressionKind::Zlib => {
            ZlibDecoder::new(bytes).read_to_end(&mut out)?;
        }
    }
    Ok(out)
}
