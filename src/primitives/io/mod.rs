#![forbid(unsafe_code)]
//! Offset-addressed access to the data file.

use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::Path;

use crate::types::Result;

#[cfg(unix)]
fn read_some(file: &File, dst: &mut [u8], off: u64) -> io::Result<usize> {
    std::os::unix::fs::FileExt::read_at(file, dst, off)
}

#[cfg(unix)]
fn write_some(file: &File, src: &[u8], off: u64) -> io::Result<usize> {
    std::os::unix::fs::FileExt::write_at(file, src, off)
}

#[cfg(windows)]
fn read_some(file: &File, dst: &mut [u8], off: u64) -> io::Result<usize> {
    std::os::windows::fs::FileExt::seek_read(file, dst, off)
}

#[cfg(windows)]
fn write_some(file: &File, src: &[u8], off: u64) -> io::Result<usize> {
    std::os::windows::fs::FileExt::seek_write(file, src, off)
}

/// A file read and written at explicit offsets, never through a shared cursor.
#[derive(Debug)]
pub struct PositionedFile {
    file: File,
}

impl PositionedFile {
    /// Opens `path` for reading and writing, creating it empty if missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self { file })
    }

    /// Fills `dst` from `off`; running out of file is `UnexpectedEof`.
    pub fn read_at(&self, mut off: u64, mut dst: &mut [u8]) -> Result<()> {
        while !dst.is_empty() {
            match read_some(&self.file, dst, off)? {
                0 => {
                    return Err(io::Error::new(
                        ErrorKind::UnexpectedEof,
                        format!("data file ends before offset {off}"),
                    )
                    .into())
                }
                n => {
                    dst = &mut std::mem::take(&mut dst)[n..];
                    off += n as u64;
                }
            }
        }
        Ok(())
    }

    /// Writes all of `src` at `off`.
    pub fn write_at(&self, mut off: u64, mut src: &[u8]) -> Result<()> {
        while !src.is_empty() {
            match write_some(&self.file, src, off)? {
                0 => return Err(io::Error::from(ErrorKind::WriteZero).into()),
                n => {
                    src = &src[n..];
                    off += n as u64;
                }
            }
        }
        Ok(())
    }

    /// Current file size in bytes.
    pub fn size(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Cuts the file to `len` bytes, or zero-extends it.
    pub fn truncate(&self, len: u64) -> Result<()> {
        Ok(self.file.set_len(len)?)
    }

    /// Flushes data and metadata to disk.
    pub fn sync(&self) -> Result<()> {
        Ok(self.file.sync_all()?)
    }
}
