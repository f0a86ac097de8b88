use crate::source::Source;

/// PDF white-space characters: NUL, HT, LF, FF, CR, SP.
#[inline]
pub fn is_whitespace(c: u8) -> bool {
    matches!(c, b'\0' | b'\t' | b'\n' | b'\x0C' | b'\r' | b' ')
}

#[inline]
pub fn is_delimiter(c: u8) -> bool {
    b"()<>[]{}/%".contains(&c)
}

#[inline]
pub fn is_digit(c: u8) -> bool {
    c.is_ascii_digit()
}

/// Forward primitive scanning over a [`Source`].
///
/// The scanner owns no state of its own; it moves the source cursor. The
/// rule for every method: consume exactly what was recognized, nothing on
/// mismatch.
pub struct Scanner<'a> {
    source: &'a Source,
}

impl<'a> Scanner<'a> {
    pub fn new(source: &'a Source) -> Scanner<'a> {
        Scanner { source }
    }

    pub fn peek(&self) -> Option<u8> {
        self.source.peek()
    }

    pub fn skip_whitespace(&self) {
        while let Some(c) = self.source.peek() {
            if is_whitespace(c) {
                self.source.read_byte();
            } else {
                break;
            }
        }
    }

    /// Skip white space and `%`-to-end-of-line comments.
    pub fn skip_whitespace_and_comments(&self) {
        loop {
            self.skip_whitespace();
            if self.source.peek() == Some(b'%') {
                self.read_line();
            } else {
                break;
            }
        }
    }

    /// Consume `keyword` if the source starts with it here, without
    /// consuming anything on mismatch.
    pub fn matches_keyword(&self, keyword: &[u8]) -> bool {
        let pos = self.source.position();
        if self.source.bytes_from(pos).starts_with(keyword) {
            self.source.seek(pos + keyword.len() as u64);
            true
        } else {
            false
        }
    }

    /// Find the next occurrence of `keyword` from the current position.
    ///
    /// On a hit the cursor lands just past the match and the match start
    /// offset is returned; on a miss the cursor lands at end of input.
    /// The last byte of the keyword is used as a cheap pre-filter, so most
    /// positions are rejected on a single comparison.
    pub fn find_keyword(&self, keyword: &[u8]) -> Option<u64> {
        debug_assert!(!keyword.is_empty());
        let base = self.source.position();
        let haystack = self.source.bytes_from(base);
        let last = *keyword.last().unwrap();
        let len = keyword.len();

        let mut i = len.checked_sub(1).unwrap();
        while i < haystack.len() {
            if haystack[i] != last {
                i += 1;
                continue;
            }
            let start = i + 1 - len;
            if &haystack[start..=i] == keyword {
                self.source.seek(base + i as u64 + 1);
                return Some(base + start as u64);
            }
            i += 1;
        }

        self.source.seek(self.source.length());
        None
    }

    /// Find the last occurrence of `keyword` before the current position,
    /// without moving the cursor.
    pub fn rfind_keyword(&self, keyword: &[u8]) -> Option<u64> {
        let end = self.source.position() as usize;
        let haystack = &self.source.as_bytes()[..end];
        haystack
            .windows(keyword.len())
            .rposition(|window| window == keyword)
            .map(|position| position as u64)
    }

    /// Read an unsigned decimal integer. Consumes nothing unless at least
    /// one digit is present; overflow fails the read.
    pub fn read_unsigned(&self) -> Option<u64> {
        let start = self.source.position();
        let mut value: u64 = 0;
        let mut digits = 0usize;
        while let Some(c) = self.source.peek() {
            if !is_digit(c) {
                break;
            }
            self.source.read_byte();
            value = match value.checked_mul(10).and_then(|v| v.checked_add((c - b'0') as u64)) {
                Some(v) => v,
                None => {
                    self.source.seek(start);
                    return None;
                }
            };
            digits += 1;
        }
        if digits == 0 {
            self.source.seek(start);
            return None;
        }
        Some(value)
    }

    /// Read a generation number (unsigned, must fit a u32).
    pub fn read_generation(&self) -> Option<u32> {
        let start = self.source.position();
        match self.read_unsigned().and_then(|v| u32::try_from(v).ok()) {
            Some(generation) => Some(generation),
            None => {
                self.source.seek(start);
                None
            }
        }
    }

    /// Read up to the next CR, LF, or CRLF, consuming the terminator.
    pub fn read_line(&self) -> Vec<u8> {
        let mut line = Vec::new();
        while let Some(c) = self.source.read_byte() {
            match c {
                b'\n' => break,
                b'\r' => {
                    if self.source.peek() == Some(b'\n') {
                        self.source.read_byte();
                    }
                    break;
                }
                other => line.push(other),
            }
        }
        line
    }
}
