//! Data-source plumbing for the decode engine.
//!
//! A [`MediaInput`] is what `setDataSource` accepts:
//! - a filesystem path (with an optional header map for network-capable
//!   engines; the bundled Symphonia engine ignores it)
//! - an already-open file plus a byte window (`offset`/`length`)
//! - an arbitrary seekable reader

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::PathBuf;

use symphonia::core::io::MediaSource;
use symphonia::core::probe::Hint;

use crate::error::{PlayerError, Result};

/// Source handed to the player before `prepare`.
pub enum MediaInput {
    /// Path on the local filesystem.
    Path {
        path: PathBuf,
        /// Request headers for engines that fetch over the network.
        headers: Vec<(String, String)>,
    },
    /// Byte window inside an already-open file.
    Region {
        file: File,
        offset: u64,
        length: u64,
    },
    /// Caller-provided seekable reader.
    Reader {
        source: Box<dyn MediaSource>,
        /// File-extension hint for the container probe.
        extension: Option<String>,
    },
}

impl MediaInput {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::Path {
            path: path.into(),
            headers: Vec::new(),
        }
    }

    pub fn path_with_headers(path: impl Into<PathBuf>, headers: Vec<(String, String)>) -> Self {
        Self::Path {
            path: path.into(),
            headers,
        }
    }

    pub fn region(file: File, offset: u64, length: u64) -> Self {
        Self::Region {
            file,
            offset,
            length,
        }
    }

    pub fn reader(source: Box<dyn MediaSource>, extension: Option<String>) -> Self {
        Self::Reader { source, extension }
    }

    /// Duplicate the input for a later re-`prepare`, when possible.
    ///
    /// Paths clone; file regions duplicate the handle; opaque readers cannot
    /// be replayed.
    pub(crate) fn try_reclone(&self) -> Option<Self> {
        match self {
            Self::Path { path, headers } => Some(Self::Path {
                path: path.clone(),
                headers: headers.clone(),
            }),
            Self::Region {
                file,
                offset,
                length,
            } => file.try_clone().ok().map(|file| Self::Region {
                file,
                offset: *offset,
                length: *length,
            }),
            Self::Reader { .. } => None,
        }
    }

    /// Open the input as a probe-ready source plus extension hint.
    pub(crate) fn into_parts(self) -> Result<(Box<dyn MediaSource>, Hint)> {
        match self {
            Self::Path { path, headers } => {
                if !headers.is_empty() {
                    tracing::debug!(
                        count = headers.len(),
                        "source headers ignored for local file input"
                    );
                }
                let file = File::open(&path)
                    .map_err(|e| PlayerError::OpenFailed(format!("{}: {e}", path.display())))?;
                let mut hint = Hint::new();
                if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
                    hint.with_extension(ext);
                }
                Ok((Box::new(file), hint))
            }
            Self::Region {
                file,
                offset,
                length,
            } => {
                let region = RegionReader::new(file, offset, length)
                    .map_err(|e| PlayerError::OpenFailed(format!("file region: {e}")))?;
                Ok((Box::new(region), Hint::new()))
            }
            Self::Reader { source, extension } => {
                let mut hint = Hint::new();
                if let Some(ext) = extension {
                    hint.with_extension(&ext);
                }
                Ok((source, hint))
            }
        }
    }
}

/// Seekable view over `[offset, offset + length)` of an underlying reader.
///
/// Positions reported to the container probe are window-relative, so the
/// demuxer sees a standalone resource of `length` bytes.
pub struct RegionReader<R> {
    inner: R,
    offset: u64,
    length: u64,
    pos: u64,
}

impl<R: Read + Seek> RegionReader<R> {
    pub fn new(mut inner: R, offset: u64, length: u64) -> io::Result<Self> {
        inner.seek(SeekFrom::Start(offset))?;
        Ok(Self {
            inner,
            offset,
            length,
            pos: 0,
        })
    }
}

impl<R: Read> Read for RegionReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.length.saturating_sub(self.pos);
        if remaining == 0 {
            return Ok(0);
        }
        let want = (buf.len() as u64).min(remaining) as usize;
        let n = self.inner.read(&mut buf[..want])?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl<R: Read + Seek> Seek for RegionReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::End(n) => self.length as i64 + n,
            SeekFrom::Current(n) => self.pos as i64 + n,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of region",
            ));
        }
        let target = target as u64;
        self.inner.seek(SeekFrom::Start(self.offset + target))?;
        self.pos = target;
        Ok(self.pos)
    }
}

impl<R: Read + Seek + Send + Sync> MediaSource for RegionReader<R> {
    fn is_seekable(&self) -> bool {
        true
    }

    fn byte_len(&self) -> Option<u64> {
        Some(self.length)
    }
}
