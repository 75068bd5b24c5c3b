use crate::error::{self, Result};
use snafu::ResultExt;
use std::io::{self, BufReader, Read};

/// Compression applied to an inner tar (`header.tar*`, `data/NNNN.tar*`), detected from the
/// member's filename suffix rather than from content sniffing, per the artifact format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Plain,
    Gzip,
    Xz,
    Zstd,
}

impl Codec {
    /// Matches `name` against `stem`, `stem.gz`, `stem.xz`, `stem.zst` in that order, returning
    /// the codec for whichever suffix matched, or `None` if `name` doesn't match any of them.
    pub fn detect(name: &str, stem: &str) -> Option<Self> {
        if name == stem {
            Some(Codec::Plain)
        } else if name == format!("{stem}.gz") {
            Some(Codec::Gzip)
        } else if name == format!("{stem}.xz") {
            Some(Codec::Xz)
        } else if name == format!("{stem}.zst") {
            Some(Codec::Zstd)
        } else {
            None
        }
    }
}

pub enum Decoder<R: Read> {
    Plain(R),
    Gzip(flate2::read::GzDecoder<R>),
    Xz(xz2::read::XzDecoder<R>),
    Zstd(zstd::Decoder<'static, BufReader<R>>),
}

impl<R: Read> Decoder<R> {
    pub fn new(codec: Codec, inner: R, entry: &str) -> Result<Self> {
        Ok(match codec {
            Codec::Plain => Decoder::Plain(inner),
            Codec::Gzip => Decoder::Gzip(flate2::read::GzDecoder::new(inner)),
            Codec::Xz => Decoder::Xz(xz2::read::XzDecoder::new(inner)),
            Codec::Zstd => Decoder::Zstd(
                zstd::Decoder::new(inner).context(error::DecompressSnafu { entry })?,
            ),
        })
    }

    /// Reclaims the wrapped reader, draining any trailing bytes the decoder didn't need to
    /// reach its own end-of-stream, so a `ShaVerifyingReader` further down the chain observes
    /// every byte of the tar member before its digest is checked.
    pub fn into_inner_drained(self) -> Result<R> {
        let mut inner = match self {
            Decoder::Plain(r) => r,
            Decoder::Gzip(d) => d.into_inner(),
            Decoder::Xz(d) => d.into_inner(),
            Decoder::Zstd(d) => d.finish().into_inner(),
        };
        io::copy(&mut inner, &mut io::sink()).context(error::IoSnafu)?;
        Ok(inner)
    }
}

impl<R: Read> Read for Decoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Decoder::Plain(r) => r.read(buf),
            Decoder::Gzip(d) => d.read(buf),
            Decoder::Xz(d) => d.read(buf),
            Decoder::Zstd(d) => d.read(buf),
        }
    }
}
