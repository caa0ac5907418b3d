//! Little-endian binary primitives shared by the graph and results file
//! formats.
//!
//! Both formats are small enough to read into memory in one go, so the
//! reader works over a byte slice and tracks the offset itself; that
//! offset is what makes corruption errors pointable.

use std::fmt;

/// Failure to decode a stored file, with the byte offset decoding
/// stopped at.
#[derive(Debug)]
pub struct ParseError {
    msg: String,
    ofs: usize,
}

impl ParseError {
    pub fn offset(&self) -> usize {
        self.ofs
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at byte {}", self.msg, self.ofs)
    }
}

impl std::error::Error for ParseError {}

pub type ParseResult<T> = Result<T, ParseError>;

/// Decodes primitives off an in-memory buffer. Section counts are never
/// trusted for preallocation; a corrupt count fails when the bytes run
/// out instead.
pub struct Reader<'a> {
    buf: &'a [u8],
    ofs: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Reader { buf, ofs: 0 }
    }

    /// Build an error at the current offset.
    pub fn parse_error<T, S: Into<String>>(&self, msg: S) -> ParseResult<T> {
        Err(ParseError {
            msg: msg.into(),
            ofs: self.ofs,
        })
    }

    fn take(&mut self, n: usize) -> ParseResult<&'a [u8]> {
        if self.buf.len() - self.ofs < n {
            return self.parse_error("unexpected end of file");
        }
        let slice = &self.buf[self.ofs..self.ofs + n];
        self.ofs += n;
        Ok(slice)
    }

    pub fn read_u32(&mut self) -> ParseResult<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_i64(&mut self) -> ParseResult<i64> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(i64::from_le_bytes(raw))
    }

    /// A string is a u32 byte length followed by that many bytes of
    /// UTF-8.
    pub fn read_string(&mut self) -> ParseResult<String> {
        let len = self.read_u32()? as usize;
        let start = self.ofs;
        let bytes = self.take(len)?;
        match std::str::from_utf8(bytes) {
            Ok(s) => Ok(s.to_owned()),
            Err(_) => Err(ParseError {
                msg: "string is not valid utf-8".to_owned(),
                ofs: start,
            }),
        }
    }

    /// Expect a four-byte tag like b"FIS\0" next.
    pub fn expect_tag(&mut self, tag: &[u8; 4]) -> ParseResult<()> {
        let start = self.ofs;
        let bytes = self.take(4)?;
        if bytes != tag {
            return Err(ParseError {
                msg: format!("bad {} tag", String::from_utf8_lossy(&tag[..3])),
                ofs: start,
            });
        }
        Ok(())
    }

    /// Decoding must consume the buffer exactly; trailing bytes mean the
    /// file is corrupt.
    pub fn expect_eof(&self) -> ParseResult<()> {
        if self.ofs != self.buf.len() {
            return self.parse_error(format!(
                "{} trailing bytes",
                self.buf.len() - self.ofs
            ));
        }
        Ok(())
    }
}

/// Buffers a whole file image; the caller writes it out in one piece.
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn write_tag(&mut self, tag: &[u8; 4]) {
        self.buf.extend_from_slice(tag);
    }

    pub fn write_u32(&mut self, n: u32) {
        self.buf.extend_from_slice(&n.to_le_bytes());
    }

    pub fn write_i64(&mut self, n: i64) {
        self.buf.extend_from_slice(&n.to_le_bytes());
    }

    pub fn write_string(&mut self, s: &str) {
        self.write_u32(s.len() as u32);
        self.buf.extend_from_slice(s.as_bytes());
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}
