//! File-level compression of everything after the summary.
//!
//! The body is cut into fixed-size spans, each stored as an independent
//! zstd frame. The summary's chunk table maps every span back to its
//! uncompressed offset, so the loader can rebuild the image the tables and
//! payload offsets were written against.

use pkl_archive::{Archive, ArchiveReader};

use crate::error::{LinkError, LinkResult};
use crate::summary::CompressedChunk;

pub const COMPRESS_NONE: u32 = 0;
pub const COMPRESS_ZSTD: u32 = 1 << 0;

/// zstd level used for package bodies.
const ZSTD_LEVEL: i32 = 3;

/// Number of chunks `body_len` bytes split into.
pub fn chunk_count(body_len: usize, chunk_size: usize) -> usize {
    body_len.div_ceil(chunk_size.max(1))
}

/// Compress `body`, which starts at file offset `base_offset` and will be
/// stored from the same offset. Returns the compressed bytes and the chunk
/// table describing them.
pub fn compress_body(
    body: &[u8],
    base_offset: u64,
    chunk_size: usize,
) -> LinkResult<(Vec<u8>, Vec<CompressedChunk>)> {
    let mut out = Vec::new();
    let mut chunks = Vec::with_capacity(chunk_count(body.len(), chunk_size));
    let mut uncompressed_offset = base_offset;
    for span in body.chunks(chunk_size.max(1)) {
        let frame = zstd::encode_all(span, ZSTD_LEVEL)
            .map_err(|e| LinkError::Compression(e.to_string()))?;
        chunks.push(CompressedChunk {
            uncompressed_offset: to_i32(uncompressed_offset)?,
            uncompressed_size: to_i32(span.len() as u64)?,
            compressed_offset: to_i32(base_offset + out.len() as u64)?,
            compressed_size: to_i32(frame.len() as u64)?,
        });
        out.extend_from_slice(&frame);
        uncompressed_offset += span.len() as u64;
    }
    tracing::debug!(
        uncompressed = body.len(),
        compressed = out.len(),
        chunks = chunks.len(),
        "compressed package body"
    );
    Ok((out, chunks))
}

fn to_i32(value: u64) -> LinkResult<i32> {
    i32::try_from(value)
        .map_err(|_| LinkError::Compression(format!("offset {value} exceeds the format limit")))
}

/// Rebuild the uncompressed image of a compressed package: the raw summary
/// bytes `[0, summary_end)` followed by every chunk inflated in order.
pub fn inflate(
    ar: &mut dyn ArchiveReader,
    summary_end: u64,
    chunks: &[CompressedChunk],
) -> LinkResult<Vec<u8>> {
    let saved = ar.tell();
    ar.seek(0);
    let mut image = ar.read_vec(summary_end as usize);

    for (i, chunk) in chunks.iter().enumerate() {
        if chunk.uncompressed_offset as u64 != image.len() as u64
            || chunk.uncompressed_size < 0
            || chunk.compressed_size < 0
            || chunk.compressed_offset < 0
        {
            return Err(LinkError::Compression(format!(
                "chunk {i} does not continue the image at offset {}",
                image.len()
            )));
        }
        ar.seek(chunk.compressed_offset as u64);
        let frame = ar.read_vec(chunk.compressed_size as usize);
        if ar.is_error() {
            return Err(LinkError::Compression(format!("chunk {i} is truncated")));
        }
        let inflated = zstd::decode_all(frame.as_slice())
            .map_err(|e| LinkError::Compression(format!("chunk {i}: {e}")))?;
        if inflated.len() != chunk.uncompressed_size as usize {
            return Err(LinkError::Compression(format!(
                "chunk {i} inflated to {} bytes, expected {}",
                inflated.len(),
                chunk.uncompressed_size
            )));
        }
        image.extend_from_slice(&inflated);
    }

    ar.seek(saved);
    if ar.is_error() {
        return Err(LinkError::Compression("package prefix is truncated".into()));
    }
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkl_archive::MemoryReader;

    fn file_with(prefix: &[u8], body: &[u8], chunk_size: usize) -> (Vec<u8>, Vec<CompressedChunk>) {
        let (compressed, chunks) = compress_body(body, prefix.len() as u64, chunk_size).unwrap();
        let mut file = prefix.to_vec();
        file.extend_from_slice(&compressed);
        (file, chunks)
    }

    #[test]
    fn compress_then_inflate() {
        let prefix = b"SUMMARY!";
        let body: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let (file, chunks) = file_with(prefix, &body, 4096);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].uncompressed_offset, 8);
        assert_eq!(chunks[2].uncompressed_size, 10_000 - 8192);

        let mut r = MemoryReader::new(file);
        let image = inflate(&mut r, prefix.len() as u64, &chunks).unwrap();
        assert_eq!(&image[..8], prefix);
        assert_eq!(&image[8..], body.as_slice());
        assert_eq!(r.tell(), 0, "position restored");
    }

    #[test]
    fn empty_body_has_no_chunks() {
        let (_, chunks) = compress_body(&[], 16, 1024).unwrap();
        assert!(chunks.is_empty());
        assert_eq!(chunk_count(0, 1024), 0);
        assert_eq!(chunk_count(1025, 1024), 2);
    }

    #[test]
    fn gap_in_chunk_table_is_rejected() {
        let (file, mut chunks) = file_with(b"HDR", &[7u8; 300], 100);
        chunks[1].uncompressed_offset += 1;
        let err = inflate(&mut MemoryReader::new(file), 3, &chunks).unwrap_err();
        assert!(matches!(err, LinkError::Compression(_)));
    }

    #[test]
    fn corrupt_frame_is_rejected() {
        let (mut file, chunks) = file_with(b"HDR", &[1u8; 64], 64);
        let last = file.len() - 1;
        file[last] ^= 0xFF;
        file[5] ^= 0xFF;
        assert!(inflate(&mut MemoryReader::new(file), 3, &chunks).is_err());
    }

    #[test]
    fn truncated_file_is_rejected() {
        let (file, chunks) = file_with(b"HDR", &[2u8; 500], 128);
        let short = file[..file.len() - 4].to_vec();
        assert!(inflate(&mut MemoryReader::new(short), 3, &chunks).is_err());
    }
}
