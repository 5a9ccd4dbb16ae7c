#![forbid(unsafe_code)]

//! Append-only swap holding a session's complete ordered record sequence.
//!
//! Records are stored as frames: a 4-byte big-endian payload length, a
//! 4-byte CRC32 of the payload, then the UTF-8 payload. Frame start offsets
//! are kept in memory so any record range can be read without scanning.

use std::path::Path;
use std::sync::Arc;

use tempfile::TempPath;
use tracing::{debug, warn};

use crate::options::SwapPlacement;
use crate::primitives::io::{FileIo, MemFileIo, StdFileIo};
use crate::types::{CacheError, Result, SessionKey};

const FRAME_HEADER_LEN: usize = 8;

enum Backing {
    File(Option<TempPath>),
    Shared(Arc<dyn FileIo>),
}

/// Secondary store for one session.
pub struct SwapStore {
    key: SessionKey,
    backing: Backing,
    io: Option<Arc<dyn FileIo>>,
    offsets: Vec<u64>,
    append_offset: u64,
    max_records: usize,
    size: usize,
}

impl SwapStore {
    /// Allocates swap space for `key` according to `placement`.
    pub fn create(key: &SessionKey, placement: &SwapPlacement, max_records: usize) -> Result<Self> {
        let backing = match placement {
            SwapPlacement::Dir(dir) => {
                let file = tempfile::Builder::new()
                    .prefix(&format!("swap-{key}-"))
                    .suffix(".swap")
                    .tempfile_in(dir)
                    .map_err(CacheError::from)?;
                Backing::File(Some(file.into_temp_path()))
            }
            SwapPlacement::Memory => Backing::Shared(Arc::new(MemFileIo::new())),
        };
        Ok(Self::with_backing(key, backing, max_records))
    }

    /// Uses a caller-provided medium.
    pub fn with_io(key: &SessionKey, io: Arc<dyn FileIo>, max_records: usize) -> Self {
        Self::with_backing(key, Backing::Shared(io), max_records)
    }

    fn with_backing(key: &SessionKey, backing: Backing, max_records: usize) -> Self {
        Self {
            key: key.clone(),
            backing,
            io: None,
            offsets: Vec::new(),
            append_offset: 0,
            max_records,
            size: 0,
        }
    }

    /// Path of the swap file, if file-backed and not yet cleaned up.
    pub fn path(&self) -> Option<&Path> {
        match &self.backing {
            Backing::File(Some(path)) => Some(&**path),
            _ => None,
        }
    }

    /// Opens the underlying medium. Idempotent while open.
    pub fn open(&mut self) -> Result<()> {
        self.io().map(|_| ())
    }

    /// Returns true while a handle is held.
    pub fn is_open(&self) -> bool {
        self.io.is_some()
    }

    fn io(&mut self) -> Result<Arc<dyn FileIo>> {
        if let Some(io) = &self.io {
            return Ok(Arc::clone(io));
        }
        let io: Arc<dyn FileIo> = match &self.backing {
            Backing::File(Some(path)) => Arc::new(StdFileIo::open(path)?),
            Backing::File(None) => return Err(CacheError::Invalid("swap already cleaned up")),
            Backing::Shared(io) => Arc::clone(io),
        };
        self.io = Some(Arc::clone(&io));
        Ok(io)
    }

    /// Records appended so far.
    pub fn stored(&self) -> usize {
        self.offsets.len()
    }

    /// Final record count; 0 while the build is in progress or if it failed.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Appends one record. Returns `false` without writing once the cap is reached.
    pub fn append(&mut self, raw: &str) -> Result<bool> {
        if self.offsets.len() >= self.max_records {
            return Ok(false);
        }
        self.write_frame(raw)?;
        Ok(true)
    }

    fn write_frame(&mut self, raw: &str) -> Result<()> {
        let io = self.io()?;
        let payload = raw.as_bytes();
        let len = u32::try_from(payload.len()).map_err(|_| CacheError::Invalid("record too large"))?;
        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(&crc32fast::hash(payload).to_be_bytes());
        frame.extend_from_slice(payload);
        io.write_at(self.append_offset, &frame)?;
        self.offsets.push(self.append_offset);
        self.append_offset += frame.len() as u64;
        Ok(())
    }

    /// Appends records that were consumed before the build started.
    ///
    /// Seeded records are always stored, even past the cap; the cap only
    /// limits what [`build_swap`](Self::build_swap) pulls afterwards.
    pub fn seed(&mut self, records: &[String]) -> Result<()> {
        for record in records {
            self.write_frame(record)?;
        }
        Ok(())
    }

    /// Drains `next` into the store until it is exhausted, the cap is hit, or
    /// `cancelled` reports true. Publishes the final size on success.
    pub fn build_swap<F, C>(&mut self, mut next: F, cancelled: C) -> Result<usize>
    where
        F: FnMut() -> Result<Option<String>>,
        C: Fn() -> bool,
    {
        self.open()?;
        loop {
            if cancelled() {
                debug!(key = %self.key, stored = self.offsets.len(), "swap.build.cancelled");
                return Err(CacheError::Unavailable("swap build cancelled"));
            }
            if self.offsets.len() >= self.max_records {
                warn!(
                    key = %self.key,
                    max_records = self.max_records,
                    "swap.build.truncated"
                );
                break;
            }
            match next()? {
                Some(record) => {
                    self.append(&record)?;
                }
                None => break,
            }
        }
        if let Some(io) = &self.io {
            io.sync_all()?;
        }
        self.size = self.offsets.len();
        debug!(key = %self.key, records = self.size, "swap.build.complete");
        Ok(self.size)
    }

    /// Lazily reads up to `count` records starting at record `offset`.
    pub fn get_records(&mut self, offset: usize, count: usize) -> Result<SwapRecords<'_>> {
        let io = self.io()?;
        let start = offset.min(self.offsets.len());
        let end = offset.saturating_add(count).min(self.offsets.len());
        Ok(SwapRecords {
            io,
            offsets: &self.offsets[start..end],
        })
    }

    /// Drops the open handle; stored data is kept.
    pub fn close(&mut self) -> Result<()> {
        if let Some(io) = self.io.take() {
            if matches!(self.backing, Backing::File(_)) {
                io.sync_all()?;
            }
        }
        Ok(())
    }

    /// Releases the handle and deletes stored data. Safe to call repeatedly.
    pub fn cleanup(&mut self) -> Result<()> {
        self.io = None;
        self.offsets.clear();
        self.append_offset = 0;
        self.size = 0;
        match &mut self.backing {
            Backing::File(path) => {
                if let Some(path) = path.take() {
                    path.close().map_err(CacheError::from)?;
                }
            }
            Backing::Shared(io) => io.truncate(0)?,
        }
        Ok(())
    }
}

/// Finite, non-restartable iterator over a record range of a [`SwapStore`].
pub struct SwapRecords<'a> {
    io: Arc<dyn FileIo>,
    offsets: &'a [u64],
}

impl SwapRecords<'_> {
    fn read_frame(&self, off: u64) -> Result<String> {
        let mut header = [0u8; FRAME_HEADER_LEN];
        self.io.read_at(off, &mut header)?;
        let (len_bytes, crc_bytes) = header.split_at(4);
        let len = u32::from_be_bytes(
            len_bytes
                .try_into()
                .map_err(|_| CacheError::Corruption("swap frame header truncated"))?,
        );
        let stored_crc = u32::from_be_bytes(
            crc_bytes
                .try_into()
                .map_err(|_| CacheError::Corruption("swap frame header truncated"))?,
        );
        let mut payload = vec![0u8; len as usize];
        self.io.read_at(off + FRAME_HEADER_LEN as u64, &mut payload)?;
        if crc32fast::hash(&payload) != stored_crc {
            return Err(CacheError::Corruption("swap frame crc mismatch"));
        }
        String::from_utf8(payload).map_err(|_| CacheError::Corruption("swap frame not utf-8"))
    }
}

impl Iterator for SwapRecords<'_> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        let (&off, rest) = self.offsets.split_first()?;
        self.offsets = rest;
        Some(self.read_frame(off))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.offsets.len(), Some(self.offsets.len()))
    }
}
