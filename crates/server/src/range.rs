//! `Range` header parsing with static-file semantics.

/// A single byte range as requested by a client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ByteRange {
    /// `bytes=a-b`
    Bounded { start: u64, end: u64 },
    /// `bytes=a-`
    From { start: u64 },
    /// `bytes=-n`, the last `n` bytes.
    Suffix { len: u64 },
}

impl ByteRange {
    /// Parse a `Range` header value.
    ///
    /// Returns `None` for anything other than a single well-formed byte
    /// range. Callers ignore such headers and serve the full body.
    pub fn parse(value: &str) -> Option<Self> {
        let ranges = value.trim().strip_prefix("bytes=")?.trim();
        if ranges.contains(',') {
            return None;
        }
        let (start, end) = ranges.split_once('-')?;
        let (start, end) = (start.trim(), end.trim());
        match (start.is_empty(), end.is_empty()) {
            (true, true) => None,
            (true, false) => Some(Self::Suffix {
                len: end.parse().ok()?,
            }),
            (false, true) => Some(Self::From {
                start: start.parse().ok()?,
            }),
            (false, false) => {
                let start = start.parse().ok()?;
                let end = end.parse().ok()?;
                (start <= end).then_some(Self::Bounded { start, end })
            }
        }
    }

    /// Resolve against an object size into an inclusive `(start, end)`.
    ///
    /// Returns `None` when the range is unsatisfiable. An end past the last
    /// byte is clamped.
    pub fn resolve(&self, size: u64) -> Option<(u64, u64)> {
        if size == 0 {
            return None;
        }
        let last = size - 1;
        match *self {
            Self::Bounded { start, end } if start <= last => Some((start, end.min(last))),
            Self::From { start } if start <= last => Some((start, last)),
            Self::Suffix { len } if len > 0 => Some((size.saturating_sub(len), last)),
            _ => None,
        }
    }
}
