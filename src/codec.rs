//! Compression codec for archived metadata files
//!
//! Input is consumed in bounded blocks and fed through a stateful encoder,
//! so huge files never need a second full-size buffer for the raw bytes.
//! The stored compression flag selects the decoder on the way back out.

use anyhow::{anyhow, Context, Result};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tracing::debug;

/// Largest block read from the source in one go (1 GiB)
pub const BLOCK_SIZE: u64 = 1 << 30;

const ZSTD_LEVEL: i32 = 3;

/// Payload encoding, persisted as the `compression` column of `bpfile`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codec {
    /// Stored as-is
    None,
    /// zlib stream, understood by every campaign reader
    #[default]
    Zlib,
    /// zstd frame
    Zstd,
}

impl Codec {
    /// Value stored in the archive
    pub fn flag(self) -> i64 {
        match self {
            Self::None => 0,
            Self::Zlib => 1,
            Self::Zstd => 2,
        }
    }

    pub fn from_flag(flag: i64) -> Result<Self> {
        match flag {
            0 => Ok(Self::None),
            1 => Ok(Self::Zlib),
            2 => Ok(Self::Zstd),
            other => Err(anyhow!("Unknown compression flag {}", other)),
        }
    }

    /// Parse a codec name as used in the config file
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "zlib" => Ok(Self::Zlib),
            "zstd" => Ok(Self::Zstd),
            other => Err(anyhow!("Unknown compression '{}' (expected zlib, zstd or none)", other)),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Zlib => "zlib",
            Self::Zstd => "zstd",
        }
    }
}

/// Result of compressing one file
#[derive(Debug, Clone)]
pub struct Compressed {
    pub codec: Codec,
    pub data: Vec<u8>,
    pub len_orig: u64,
    pub len_compressed: u64,
}

enum Encoder {
    None(Vec<u8>),
    Zlib(ZlibEncoder<Vec<u8>>),
    Zstd(zstd::stream::write::Encoder<'static, Vec<u8>>),
}

impl Encoder {
    fn new(codec: Codec) -> Result<Self> {
        Ok(match codec {
            Codec::None => Self::None(Vec::new()),
            Codec::Zlib => Self::Zlib(ZlibEncoder::new(Vec::new(), Compression::default())),
            Codec::Zstd => Self::Zstd(zstd::stream::write::Encoder::new(Vec::new(), ZSTD_LEVEL)?),
        })
    }

    fn write_block(&mut self, block: &[u8]) -> Result<()> {
        match self {
            Self::None(buf) => buf.extend_from_slice(block),
            Self::Zlib(encoder) => encoder.write_all(block)?,
            Self::Zstd(encoder) => encoder.write_all(block)?,
        }
        Ok(())
    }

    fn finish(self) -> Result<Vec<u8>> {
        Ok(match self {
            Self::None(buf) => buf,
            Self::Zlib(encoder) => encoder.finish()?,
            Self::Zstd(encoder) => encoder.finish()?,
        })
    }
}

/// Compress everything readable from `reader`
pub fn compress<R: Read>(reader: R, codec: Codec) -> Result<Compressed> {
    compress_blocks(reader, codec, BLOCK_SIZE)
}

/// Compress with an explicit block size
pub fn compress_blocks<R: Read>(mut reader: R, codec: Codec, block_size: u64) -> Result<Compressed> {
    let block_size = block_size.max(1);
    let mut encoder = Encoder::new(codec)?;
    let mut len_orig: u64 = 0;
    let mut block = Vec::new();

    loop {
        block.clear();
        let n = reader.by_ref().take(block_size).read_to_end(&mut block)?;
        if n == 0 {
            break;
        }
        len_orig += n as u64;
        encoder.write_block(&block)?;
    }

    let data = encoder.finish()?;
    let len_compressed = data.len() as u64;

    debug!("Compressed {} bytes -> {} bytes ({})", len_orig, len_compressed, codec.name());

    Ok(Compressed {
        codec,
        data,
        len_orig,
        len_compressed,
    })
}

/// Open and compress a file on disk
pub fn compress_file(path: &Path, codec: Codec) -> Result<Compressed> {
    let file = File::open(path).with_context(|| format!("Cannot open {:?}", path))?;
    compress(file, codec).with_context(|| format!("Cannot read {:?}", path))
}

/// Exact inverse of [`compress`] for the given codec
pub fn decompress(codec: Codec, data: &[u8]) -> Result<Vec<u8>> {
    let out = match codec {
        Codec::None => data.to_vec(),
        Codec::Zlib => {
            let mut out = Vec::new();
            ZlibDecoder::new(data).read_to_end(&mut out)?;
            out
        }
        Codec::Zstd => zstd::decode_all(data)?,
    };
    Ok(out)
}
