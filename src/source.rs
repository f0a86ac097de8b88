use std::cell::Cell;
use std::sync::Arc;

/// Byte-addressable, seekable read surface over a loaded document.
///
/// A `Source` is a window into a shared byte buffer with its own cursor.
/// Sub-views created with [`Source::view`] share the buffer but carry an
/// independent position. The cursor lives in a [`Cell`] so read paths can
/// share one source without threading `&mut` everywhere; the type is
/// deliberately not `Sync` — one parse owns it.
pub struct Source {
    data: Arc<[u8]>,
    start: u64,
    end: u64,
    pos: Cell<u64>,
}

impl Source {
    pub fn from_bytes<B: Into<Vec<u8>>>(bytes: B) -> Source {
        let data: Arc<[u8]> = bytes.into().into();
        let end = data.len() as u64;
        Source {
            data,
            start: 0,
            end,
            pos: Cell::new(0),
        }
    }

    /// Total length of this view in bytes.
    pub fn length(&self) -> u64 {
        self.end - self.start
    }

    /// Current cursor position, relative to the start of this view.
    pub fn position(&self) -> u64 {
        self.pos.get()
    }

    /// Move the cursor. Positions beyond the end clamp to the end.
    pub fn seek(&self, pos: u64) {
        self.pos.set(pos.min(self.length()));
    }

    pub fn at_end(&self) -> bool {
        self.pos.get() >= self.length()
    }

    pub fn remaining(&self) -> u64 {
        self.length() - self.pos.get()
    }

    /// Read one byte and advance.
    pub fn read_byte(&self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos.set(self.pos.get() + 1);
        Some(byte)
    }

    /// Look at the next byte without advancing.
    pub fn peek(&self) -> Option<u8> {
        self.byte_at(self.pos.get())
    }

    /// Byte at an arbitrary position within this view.
    pub fn byte_at(&self, pos: u64) -> Option<u8> {
        if pos < self.length() {
            Some(self.data[(self.start + pos) as usize])
        } else {
            None
        }
    }

    /// Fill `buf` from the cursor, advancing past what was read.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        let available = self.bytes_from(self.pos.get());
        let count = buf.len().min(available.len());
        buf[..count].copy_from_slice(&available[..count]);
        self.pos.set(self.pos.get() + count as u64);
        count
    }

    /// A sub-view over `[offset, offset + length)`, clamped to this view.
    ///
    /// The sub-view starts with its cursor at zero; this view's cursor is
    /// unaffected.
    pub fn view(&self, offset: u64, length: u64) -> Source {
        let start = (self.start + offset).min(self.end);
        let end = start.saturating_add(length).min(self.end);
        Source {
            data: Arc::clone(&self.data),
            start,
            end,
            pos: Cell::new(0),
        }
    }

    /// All bytes of this view.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[self.start as usize..self.end as usize]
    }

    /// Bytes from `pos` to the end of the view.
    pub fn bytes_from(&self, pos: u64) -> &[u8] {
        let pos = pos.min(self.length());
        &self.as_bytes()[pos as usize..]
    }
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Source")
            .field("length", &self.length())
            .field("position", &self.position())
            .finish()
    }
}

/// Guard that restores a source's cursor when dropped.
///
/// Every public operation that moves the cursor wraps itself in one of
/// these, so the position invariant holds on error paths too.
pub struct ScopedSeek<'a> {
    source: &'a Source,
    saved: u64,
}

impl<'a> ScopedSeek<'a> {
    /// Capture the current position.
    pub fn new(source: &'a Source) -> ScopedSeek<'a> {
        ScopedSeek {
            source,
            saved: source.position(),
        }
    }

    /// Capture the current position, then jump to `pos`.
    pub fn jump(source: &'a Source, pos: u64) -> ScopedSeek<'a> {
        let guard = ScopedSeek::new(source);
        source.seek(pos);
        guard
    }
}

impl Drop for ScopedSeek<'_> {
    fn drop(&mut self) {
        self.source.seek(self.saved);
    }
}
