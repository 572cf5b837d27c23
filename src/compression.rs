//! The raw-deflate codec behind `permessage-deflate`, restricted to
//! `server_no_context_takeover; client_no_context_takeover` mode: every message is
//! compressed and decompressed as an independent block, no sliding-window state
//! survives across messages.

use crate::error::Error;
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

/// The 4 bytes a Z_SYNC_FLUSH leaves at the end of a raw-deflate stream; stripped on
/// send, restored on receive.
const DEFLATE_TRAILER: [u8; 4] = [0, 0, 255, 255];
/// Appended after the restored trailer so the decompressor reaches a clean end of
/// stream without needing a final `Finish`-flushed block from the sender.
const BLOCK_TERMINATOR: [u8; 5] = [0x01, 0x00, 0x00, 0xff, 0xff];

fn calculate_buffer_size(payload_size: usize) -> usize {
    if payload_size <= 4096 {
        4096
    } else if payload_size <= 65536 {
        16384
    } else {
        65536
    }
}

pub(crate) struct Compressor {
    compressor: Compress,
}

impl Compressor {
    pub(crate) fn new(level: u32, window_bits: Option<u8>) -> Self {
        let level = Compression::new(level);
        let compressor = match window_bits {
            Some(bits) => Compress::new_with_window_bits(level, false, bits),
            None => Compress::new(level, false),
        };
        Self { compressor }
    }

    /// Compresses `payload` as an independent, no-context-takeover deflate block.
    pub(crate) fn compress(&mut self, payload: &[u8]) -> Result<Vec<u8>, Error> {
        self.compressor.reset();
        let buffer_size = calculate_buffer_size(payload.len());
        let mut output = Vec::with_capacity(buffer_size.min(payload.len() + 16));

        let before_in = self.compressor.total_in();
        while self.compressor.total_in() - before_in < payload.len() as u64 {
            let consumed = (self.compressor.total_in() - before_in) as usize;
            let input = &payload[consumed..];
            let status = self
                .compressor
                .compress_vec(input, &mut output, FlushCompress::Sync)
                .map_err(|e| Error::Compression(e.to_string()))?;
            if status == Status::StreamEnd {
                break;
            }
        }
        if output.ends_with(&DEFLATE_TRAILER) {
            output.truncate(output.len() - DEFLATE_TRAILER.len());
        }
        Ok(output)
    }
}

pub(crate) struct Decompressor {
    decompressor: Decompress,
}

impl Decompressor {
    pub(crate) fn new(window_bits: Option<u8>) -> Self {
        let decompressor = match window_bits {
            Some(bits) => Decompress::new_with_window_bits(false, bits),
            None => Decompress::new(false),
        };
        Self { decompressor }
    }

    /// Restores the stripped trailer, appends the block terminator, and inflates.
    pub(crate) fn decompress(&mut self, payload: &[u8]) -> Result<Vec<u8>, Error> {
        self.decompressor.reset(false);

        let mut input = Vec::with_capacity(payload.len() + DEFLATE_TRAILER.len() + BLOCK_TERMINATOR.len());
        input.extend_from_slice(payload);
        input.extend_from_slice(&DEFLATE_TRAILER);
        input.extend_from_slice(&BLOCK_TERMINATOR);

        let buffer_size = calculate_buffer_size(input.len());
        let mut output = Vec::with_capacity(buffer_size);
        let mut buffer = Vec::with_capacity(buffer_size);

        let before_in = self.decompressor.total_in();
        while self.decompressor.total_in() - before_in < input.len() as u64 {
            let consumed = (self.decompressor.total_in() - before_in) as usize;
            let chunk = &input[consumed..];
            match self
                .decompressor
                .decompress_vec(chunk, &mut buffer, FlushDecompress::Sync)
                .map_err(|e| Error::Compression(e.to_string()))?
            {
                Status::Ok => {
                    output.extend_from_slice(&buffer);
                    buffer.clear();
                }
                Status::StreamEnd => break,
                Status::BufError => break,
            }
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compress_decompress_round_trips_small_payload() {
        let mut compressor = Compressor::new(1, None);
        let mut decompressor = Decompressor::new(None);
        let original = b"hello world, hello world, hello world".to_vec();

        let compressed = compressor.compress(&original).unwrap();
        let restored = decompressor.decompress(&compressed).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn compress_decompress_round_trips_across_independent_messages() {
        // no-context-takeover: each message must round-trip independently, in any order.
        let mut compressor = Compressor::new(6, None);
        let mut decompressor = Decompressor::new(None);

        let a = vec![b'a'; 4096];
        let b = vec![b'b'; 8192];

        let compressed_a = compressor.compress(&a).unwrap();
        let compressed_b = compressor.compress(&b).unwrap();

        assert_eq!(decompressor.decompress(&compressed_a).unwrap(), a);
        assert_eq!(decompressor.decompress(&compressed_b).unwrap(), b);
    }

    #[test]
    fn compress_decompress_round_trips_empty_payload() {
        let mut compressor = Compressor::new(1, None);
        let mut decompressor = Decompressor::new(None);
        let compressed = compressor.compress(&[]).unwrap();
        assert_eq!(decompressor.decompress(&compressed).unwrap(), Vec::<u8>::new());
    }
}
