//! Backing storage for decoded stream payloads.

use std::borrow::Cow;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

/// Where decoded stream bytes are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scratch {
    /// Everything stays in main memory.
    MainMemory,
    /// Buffers up to the cap stay in memory; larger ones spill to a
    /// temporary file.
    MemoryCapped(usize),
    /// Every decoded buffer goes to a temporary file.
    TempFile,
}

impl Default for Scratch {
    fn default() -> Self {
        Scratch::MainMemory
    }
}

/// A decoded payload, either resident or spilled.
#[derive(Debug)]
pub(crate) enum ScratchBuffer {
    Memory(Vec<u8>),
    File { file: File, len: u64 },
}

impl ScratchBuffer {
    pub fn store(policy: Scratch, bytes: Vec<u8>) -> io::Result<ScratchBuffer> {
        match policy {
            Scratch::MainMemory => Ok(ScratchBuffer::Memory(bytes)),
            Scratch::MemoryCapped(cap) if bytes.len() <= cap => Ok(ScratchBuffer::Memory(bytes)),
            _ => ScratchBuffer::spill(bytes),
        }
    }

    fn spill(bytes: Vec<u8>) -> io::Result<ScratchBuffer> {
        let mut file = tempfile::tempfile()?;
        file.write_all(&bytes)?;
        Ok(ScratchBuffer::File {
            file,
            len: bytes.len() as u64,
        })
    }

    pub fn len(&self) -> u64 {
        match self {
            ScratchBuffer::Memory(bytes) => bytes.len() as u64,
            ScratchBuffer::File { len, .. } => *len,
        }
    }

    /// The full decoded payload. Spilled buffers are read back on demand.
    pub fn bytes(&self) -> io::Result<Cow<'_, [u8]>> {
        match self {
            ScratchBuffer::Memory(bytes) => Ok(Cow::Borrowed(bytes)),
            ScratchBuffer::File { file, len } => {
                let mut file = file;
                file.seek(SeekFrom::Start(0))?;
                let mut out = Vec::with_capacity(*len as usize);
                file.read_to_end(&mut out)?;
                Ok(Cow::Owned(out))
            }
        }
    }
}
