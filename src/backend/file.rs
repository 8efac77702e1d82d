use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::primitives::io::PositionedFile;
use crate::types::{frame_crc32, Result, StorageKey, StratumError};

use super::BlobStore;

/// Name of the append-only data file inside the resource directory.
pub const DATA_FILE: &str = "pages.dat";

const FRAME_PAGE: u8 = 1;
const FRAME_ROOT: u8 = 2;
const ROOT_KEY: u64 = u64::MAX;
// tag u8, key u64, len u32, crc u32
const HEADER_LEN: u64 = 17;

#[derive(Clone, Copy, Debug)]
struct Extent {
    offset: u64,
    len: u32,
}

#[derive(Debug, Default)]
struct FileState {
    index: HashMap<StorageKey, Extent>,
    root: Option<Extent>,
    tail: u64,
}

/// Append-only single-file store.
///
/// Each blob is a frame `[tag][key][len][crc32][payload]`. The index is
/// rebuilt by scanning at open; a torn or corrupt tail left by a crash is
/// cut off. The newest root frame wins.
pub struct FileStore {
    path: PathBuf,
    io: PositionedFile,
    state: Mutex<FileState>,
    closed: AtomicBool,
}

impl FileStore {
    /// Opens or creates the store in directory `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(DATA_FILE);
        let io = PositionedFile::open(&path)?;
        let state = scan(&io)?;
        info!(
            path = %path.display(),
            pages = state.index.len(),
            has_root = state.root.is_some(),
            "file_store.open"
        );
        Ok(Self {
            path,
            io,
            state: Mutex::new(state),
            closed: AtomicBool::new(false),
        })
    }

    /// Path of the data file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StratumError::Closed);
        }
        Ok(())
    }

    fn append(&self, state: &mut FileState, tag: u8, key: u64, payload: &[u8]) -> Result<Extent> {
        let len = u32::try_from(payload.len())
            .map_err(|_| StratumError::Invalid("blob larger than 4 GiB"))?;
        let mut frame = Vec::with_capacity(HEADER_LEN as usize + payload.len());
        frame.push(tag);
        frame.extend_from_slice(&key.to_be_bytes());
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(&frame_crc32(key, payload).to_be_bytes());
        frame.extend_from_slice(payload);
        self.io.write_at(state.tail, &frame)?;
        let extent = Extent {
            offset: state.tail + HEADER_LEN,
            len,
        };
        state.tail += frame.len() as u64;
        Ok(extent)
    }

    fn read_extent(&self, extent: Extent) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; extent.len as usize];
        self.io.read_at(extent.offset, &mut buf)?;
        Ok(buf)
    }
}

fn scan(io: &PositionedFile) -> Result<FileState> {
    let file_len = io.size()?;
    let mut state = FileState::default();
    let mut off = 0u64;
    while off + HEADER_LEN <= file_len {
        let mut header = [0u8; HEADER_LEN as usize];
        io.read_at(off, &mut header)?;
        let tag = header[0];
        let key = u64::from_be_bytes(header[1..9].try_into().unwrap_or([0; 8]));
        let len = u32::from_be_bytes(header[9..13].try_into().unwrap_or([0; 4]));
        let crc = u32::from_be_bytes(header[13..17].try_into().unwrap_or([0; 4]));
        let end = off + HEADER_LEN + u64::from(len);
        if !matches!(tag, FRAME_PAGE | FRAME_ROOT) || end > file_len {
            break;
        }
        let mut payload = vec![0u8; len as usize];
        io.read_at(off + HEADER_LEN, &mut payload)?;
        if frame_crc32(key, &payload) != crc {
            break;
        }
        let extent = Extent {
            offset: off + HEADER_LEN,
            len,
        };
        if tag == FRAME_ROOT {
            state.root = Some(extent);
        } else {
            state.index.insert(StorageKey(key), extent);
        }
        off = end;
    }
    if off < file_len {
        warn!(
            valid = off,
            discarded = file_len - off,
            "file_store.torn_tail_truncated"
        );
        io.truncate(off)?;
        io.sync()?;
    }
    state.tail = off;
    Ok(state)
}

impl BlobStore for FileStore {
    fn name(&self) -> &'static str {
        "file"
    }

    fn get(&self, key: StorageKey) -> Result<Option<Vec<u8>>> {
        self.check_open()?;
        let extent = self.state.lock().index.get(&key).copied();
        extent.map(|extent| self.read_extent(extent)).transpose()
    }

    fn put(&self, key: StorageKey, bytes: &[u8]) -> Result<()> {
        self.check_open()?;
        if key.0 == ROOT_KEY {
            return Err(StratumError::Invalid("storage key reserved for the root"));
        }
        let mut state = self.state.lock();
        let extent = self.append(&mut state, FRAME_PAGE, key.0, bytes)?;
        state.index.insert(key, extent);
        Ok(())
    }

    fn get_root(&self) -> Result<Option<Vec<u8>>> {
        self.check_open()?;
        let extent = self.state.lock().root;
        extent.map(|extent| self.read_extent(extent)).transpose()
    }

    fn put_root(&self, bytes: &[u8]) -> Result<()> {
        self.check_open()?;
        let mut state = self.state.lock();
        self.io.sync()?;
        let extent = self.append(&mut state, FRAME_ROOT, ROOT_KEY, bytes)?;
        self.io.sync()?;
        state.root = Some(extent);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.check_open()?;
        self.io.sync()
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.io.sync()
    }
}
