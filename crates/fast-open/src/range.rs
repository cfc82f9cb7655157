//! Byte ranges: the request side (`Range: bytes=<start>-[<end>]`) and the
//! response side (`Content-Range: bytes <first>-<last>/<len>`).

use std::fmt;

/// A single byte range with an inclusive, optional upper bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    /// Inclusive end offset. `None` means "to the end of the resource".
    pub end: Option<u64>,
}

impl ByteRange {
    /// An open range starting at `start`.
    pub fn open(start: u64) -> Self {
        Self { start, end: None }
    }

    /// A closed range `[start, end]`.
    pub fn closed(start: u64, end: u64) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    /// Parses a `Range` header value. Only single `bytes=` ranges with an
    /// explicit start are accepted; suffix and multi-ranges return `None`.
    pub fn parse(value: &str) -> Option<Self> {
        let set = value.trim().strip_prefix("bytes=")?;
        if set.contains(',') {
            return None;
        }

        let (start, end) = set.split_once('-')?;
        let start: u64 = start.trim().parse().ok()?;
        let end = match end.trim() {
            "" => None,
            s => Some(s.parse::<u64>().ok()?),
        };

        if end.is_some_and(|e| e < start) {
            return None;
        }
        Some(Self { start, end })
    }

    /// Clamps the range to a resource of `len` bytes, returning the inclusive
    /// `(start, end)` pair, or `None` when the range is unsatisfiable.
    pub fn resolve(&self, len: u64) -> Option<(u64, u64)> {
        if self.start >= len {
            return None;
        }
        let last = len - 1;
        let end = self.end.map_or(last, |e| e.min(last));
        Some((self.start, end))
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            Some(end) => write!(f, "bytes={}-{end}", self.start),
            None => write!(f, "bytes={}-", self.start),
        }
    }
}

/// A `Content-Range` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    /// Inclusive bounds of the enclosed part. `None` for `bytes */<len>`.
    pub range: Option<(u64, u64)>,
    /// Length of the whole resource, `None` when the server sent `*`.
    pub complete_len: Option<u64>,
}

impl ContentRange {
    /// `bytes <first>-<last>/<len>`.
    pub fn partial(first: u64, last: u64, len: u64) -> Self {
        Self {
            range: Some((first, last)),
            complete_len: Some(len),
        }
    }

    /// `bytes */<len>`, sent with 416.
    pub fn unsatisfied(len: u64) -> Self {
        Self {
            range: None,
            complete_len: Some(len),
        }
    }

    /// First byte of the enclosed part.
    pub fn first(&self) -> Option<u64> {
        self.range.map(|(first, _)| first)
    }

    pub fn parse(value: &str) -> Option<Self> {
        let rest = value.trim().strip_prefix("bytes ")?;
        let (range, len) = rest.split_once('/')?;
        let complete_len = match len.trim() {
            "*" => None,
            n => Some(n.parse::<u64>().ok()?),
        };
        let range = match range.trim() {
            "*" => None,
            r => {
                let (first, last) = r.split_once('-')?;
                let first: u64 = first.parse().ok()?;
                let last: u64 = last.parse().ok()?;
                if last < first || complete_len.is_some_and(|len| last >= len) {
                    return None;
                }
                Some((first, last))
            }
        };
        if range.is_none() && complete_len.is_none() {
            return None;
        }
        Some(Self {
            range,
            complete_len,
        })
    }
}

impl fmt::Display for ContentRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.range {
            Some((first, last)) => write!(f, "bytes {first}-{last}/")?,
            None => write!(f, "bytes */")?,
        }
        match self.complete_len {
            Some(len) => write!(f, "{len}"),
            None => write!(f, "*"),
        }
    }
}
