//! Compression codecs backing the `compress`/`decompress` encoding rules.
//!
//! This module provides:
//! - [`CompressionEncoding`]: The algorithm named by an encoding rule
//! - [`Codec`]: Byte-level compression trait, with one implementation per
//!   enabled algorithm (`compression-gzip`, `compression-deflate`,
//!   `compression-br`, `compression-zstd` features)

use bytes::Bytes;
use std::fmt;
use std::io;
use std::sync::Arc;

#[cfg(any(
    feature = "compression-gzip",
    feature = "compression-deflate",
    feature = "compression-br",
    feature = "compression-zstd"
))]
use std::io::{Read, Write};

/// Byte-level compression codec.
///
/// Implementations are stateless and may be shared between threads.
pub trait Codec: Send + Sync + 'static {
    /// The algorithm name as it appears in encoding rules (e.g. "gzip").
    fn name(&self) -> &'static str;

    /// Compress data.
    fn compress(&self, data: &[u8]) -> io::Result<Bytes>;

    /// Decompress data.
    fn decompress(&self, data: &[u8]) -> io::Result<Bytes>;
}

/// A type-erased, cheaply clonable codec.
#[derive(Clone)]
pub struct BoxedCodec(Arc<dyn Codec>);

impl BoxedCodec {
    /// Wrap a codec.
    pub fn new<C: Codec>(codec: C) -> Self {
        BoxedCodec(Arc::new(codec))
    }

    pub fn name(&self) -> &'static str {
        self.0.name()
    }

    pub fn compress(&self, data: &[u8]) -> io::Result<Bytes> {
        self.0.compress(data)
    }

    pub fn decompress(&self, data: &[u8]) -> io::Result<Bytes> {
        self.0.decompress(data)
    }
}

impl fmt::Debug for BoxedCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BoxedCodec").field(&self.name()).finish()
    }
}

/// Compression algorithms an encoding rule can name.
///
/// Only `Identity` is always available; the others follow the crate features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(try_from = "String")]
pub enum CompressionEncoding {
    #[default]
    Identity,
    #[cfg(feature = "compression-gzip")]
    Gzip,
    #[cfg(feature = "compression-deflate")]
    Deflate,
    #[cfg(feature = "compression-br")]
    Brotli,
    #[cfg(feature = "compression-zstd")]
    Zstd,
}

impl CompressionEncoding {
    /// Look up an encoding by name. Returns `None` for unknown or disabled algorithms.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "" | "identity" => Some(Self::Identity),
            #[cfg(feature = "compression-gzip")]
            "gzip" => Some(Self::Gzip),
            #[cfg(feature = "compression-deflate")]
            "deflate" => Some(Self::Deflate),
            #[cfg(feature = "compression-br")]
            "br" => Some(Self::Brotli),
            #[cfg(feature = "compression-zstd")]
            "zstd" => Some(Self::Zstd),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            #[cfg(feature = "compression-gzip")]
            Self::Gzip => "gzip",
            #[cfg(feature = "compression-deflate")]
            Self::Deflate => "deflate",
            #[cfg(feature = "compression-br")]
            Self::Brotli => "br",
            #[cfg(feature = "compression-zstd")]
            Self::Zstd => "zstd",
        }
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, Self::Identity)
    }

    /// Get the codec for this encoding, `None` for identity.
    pub fn codec(&self) -> Option<BoxedCodec> {
        match self {
            Self::Identity => None,
            #[cfg(feature = "compression-gzip")]
            Self::Gzip => Some(BoxedCodec::new(GzipCodec)),
            #[cfg(feature = "compression-deflate")]
            Self::Deflate => Some(BoxedCodec::new(DeflateCodec)),
            #[cfg(feature = "compression-br")]
            Self::Brotli => Some(BoxedCodec::new(BrotliCodec)),
            #[cfg(feature = "compression-zstd")]
            Self::Zstd => Some(BoxedCodec::new(ZstdCodec)),
        }
    }

    /// Compress bytes with this encoding (identity copies the input).
    pub fn compress(&self, data: &[u8]) -> io::Result<Bytes> {
        match self.codec() {
            None => Ok(Bytes::copy_from_slice(data)),
            Some(codec) => codec.compress(data),
        }
    }

    /// Decompress bytes with this encoding (identity copies the input).
    pub fn decompress(&self, data: &[u8]) -> io::Result<Bytes> {
        match self.codec() {
            None => Ok(Bytes::copy_from_slice(data)),
            Some(codec) => codec.decompress(data),
        }
    }
}

impl TryFrom<String> for CompressionEncoding {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_name(&value).ok_or_else(|| format!("unsupported compression encoding `{value}`"))
    }
}

impl fmt::Display for CompressionEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Gzip (RFC 1952) at the default level.
#[cfg(feature = "compression-gzip")]
#[derive(Debug, Clone, Copy, Default)]
pub struct GzipCodec;

#[cfg(feature = "compression-gzip")]
impl Codec for GzipCodec {
    fn name(&self) -> &'static str {
        "gzip"
    }

    fn compress(&self, data: &[u8]) -> io::Result<Bytes> {
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data)?;
        Ok(Bytes::from(encoder.finish()?))
    }

    fn decompress(&self, data: &[u8]) -> io::Result<Bytes> {
        let mut out = Vec::new();
        flate2::read::GzDecoder::new(data).read_to_end(&mut out)?;
        Ok(Bytes::from(out))
    }
}

/// Deflate in zlib framing (RFC 1950), as HTTP uses the name.
#[cfg(feature = "compression-deflate")]
#[derive(Debug, Clone, Copy, Default)]
pub struct DeflateCodec;

#[cfg(feature = "compression-deflate")]
impl Codec for DeflateCodec {
    fn name(&self) -> &'static str {
        "deflate"
    }

    fn compress(&self, data: &[u8]) -> io::Result<Bytes> {
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data)?;
        Ok(Bytes::from(encoder.finish()?))
    }

    fn decompress(&self, data: &[u8]) -> io::Result<Bytes> {
        let mut out = Vec::new();
        flate2::read::ZlibDecoder::new(data).read_to_end(&mut out)?;
        Ok(Bytes::from(out))
    }
}

/// Brotli at quality 4.
#[cfg(feature = "compression-br")]
#[derive(Debug, Clone, Copy, Default)]
pub struct BrotliCodec;

#[cfg(feature = "compression-br")]
impl Codec for BrotliCodec {
    fn name(&self) -> &'static str {
        "br"
    }

    fn compress(&self, data: &[u8]) -> io::Result<Bytes> {
        let params = brotli::enc::BrotliEncoderParams {
            quality: 4,
            ..Default::default()
        };
        let mut out = Vec::new();
        brotli::enc::BrotliCompress(&mut io::Cursor::new(data), &mut out, &params)?;
        Ok(Bytes::from(out))
    }

    fn decompress(&self, data: &[u8]) -> io::Result<Bytes> {
        let mut out = Vec::new();
        brotli::BrotliDecompress(&mut io::Cursor::new(data), &mut out)?;
        Ok(Bytes::from(out))
    }
}

/// Zstd at level 3.
#[cfg(feature = "compression-zstd")]
#[derive(Debug, Clone, Copy, Default)]
pub struct ZstdCodec;

#[cfg(feature = "compression-zstd")]
impl Codec for ZstdCodec {
    fn name(&self) -> &'static str {
        "zstd"
    }

    fn compress(&self, data: &[u8]) -> io::Result<Bytes> {
        zstd::bulk::compress(data, 3).map(Bytes::from)
    }

    fn decompress(&self, data: &[u8]) -> io::Result<Bytes> {
        let mut out = Vec::new();
        zstd::Decoder::new(data)?.read_to_end(&mut out)?;
        Ok(Bytes::from(out))
    }
}
