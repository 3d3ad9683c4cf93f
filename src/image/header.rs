/*
    winchfox
    https://github.com/dbalsom/winchfox

    Copyright 2025 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------
*/

//! The free-text header that opens every WDI stream: a fixed preamble line
//! followed by an optional user comment, terminated on the wire by ASCII EOF.
//!
//! The header is historically staged in the controller's 2K buffer SRAM
//! before a transfer begins, so the whole thing, terminator included, must
//! fit in [`BUFFER_SIZE`] bytes.

use crate::{image::ImageError, ASCII_EOF, BUFFER_SIZE};

/// First line of every image this library produces. Must begin with the
/// [`WDI_MAGIC`](crate::WDI_MAGIC) signature bytes.
pub const HEADER_PREAMBLE: &str = "WDI file created by winchfox\r\n";

/// Longest accepted comment line, matching the interactive prompt width of
/// the original imaging stations whose files we interoperate with.
pub const MAX_COMMENT_LINE: usize = 100;

/// A complete header ready to be streamed into an image.
#[derive(Clone, Debug)]
pub struct ImageHeader {
    text: Vec<u8>,
}

impl ImageHeader {
    /// A header carrying the preamble and no comment.
    pub fn new() -> ImageHeader {
        ImageHeader {
            text: HEADER_PREAMBLE.as_bytes().to_vec(),
        }
    }

    /// The header text, without the EOF terminator.
    pub fn as_bytes(&self) -> &[u8] {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// The on-wire form: header text followed by the EOF terminator.
    pub(crate) fn into_stream(mut self) -> Vec<u8> {
        self.text.push(ASCII_EOF);
        self.text
    }
}

impl Default for ImageHeader {
    fn default() -> ImageHeader {
        ImageHeader::new()
    }
}

/// Line-by-line builder for the comment portion of an [`ImageHeader`],
/// mirroring the terminal entry session of the original imaging stations:
/// lines are appended with CRLF endings and two consecutive empty lines end
/// the comment (the second one is not recorded).
#[derive(Debug)]
pub struct HeaderSession {
    header: ImageHeader,
    last_line_empty: bool,
    closed: bool,
}

impl HeaderSession {
    pub fn new() -> HeaderSession {
        HeaderSession {
            header: ImageHeader::new(),
            last_line_empty: false,
            closed: false,
        }
    }

    /// Whether another worst-case line still fits. The check reserves room
    /// for the line's CRLF and the stream terminator.
    pub fn can_accept_line(&self) -> bool {
        !self.closed && (self.header.len() + MAX_COMMENT_LINE + 2) < BUFFER_SIZE
    }

    /// Append one comment line. Returns `Ok(false)` once the session is
    /// finished (a second consecutive empty line, or no room left), after
    /// which further lines are ignored.
    pub fn push_line(&mut self, line: &str) -> Result<bool, ImageError> {
        if line.len() > MAX_COMMENT_LINE {
            return Err(ImageError::HeaderOverflow);
        }
        if !self.can_accept_line() {
            self.closed = true;
            return Ok(false);
        }

        if line.is_empty() && self.last_line_empty {
            self.closed = true;
            return Ok(false);
        }
        self.last_line_empty = line.is_empty();

        self.header.text.extend_from_slice(line.as_bytes());
        self.header.text.extend_from_slice(b"\r\n");
        Ok(true)
    }

    pub fn finish(self) -> ImageHeader {
        self.header
    }
}

impl Default for HeaderSession {
    fn default() -> HeaderSession {
        HeaderSession::new()
    }
}
