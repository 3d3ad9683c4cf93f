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

//! The `chs` module defines a simple structure for physical Cylinder-Head
//! addressing. Winchester disks are addressed one track at a time; sector IDs
//! carry their own (possibly diverging) logical CHS and live in
//! [`crate::sector_id`].

use std::fmt::Display;

/// A physical track address: cylinder (c) and head (h).
#[derive(Copy, Clone, Debug, Default, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct DiskCh {
    c: u16,
    h: u8,
}

impl Display for DiskCh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[c:{:4} h:{}]", self.c, self.h)
    }
}

impl From<(u16, u8)> for DiskCh {
    fn from((c, h): (u16, u8)) -> Self {
        Self { c, h }
    }
}

impl DiskCh {
    /// Create a new `DiskCh` from a cylinder and head.
    pub fn new(c: u16, h: u8) -> Self {
        Self { c, h }
    }

    /// Return the cylinder (c) field.
    pub fn c(&self) -> u16 {
        self.c
    }

    /// Return the head (h) field.
    pub fn h(&self) -> u8 {
        self.h
    }

    /// Return the next track in imaging order (head-major: heads advance
    /// first, then the cylinder). `heads` is the configured head count.
    /// The returned cylinder may equal the configured cylinder count; bounds
    /// are the caller's concern, since a partial image ends early anyway.
    pub fn next_track(&self, heads: u8) -> DiskCh {
        let mut c = self.c;
        let mut h = self.h + 1;
        if h >= heads {
            h = 0;
            c += 1;
        }
        DiskCh { c, h }
    }
}
