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

//! The `sector_id` module defines the SDH status byte, the [`SectorId`]
//! observation of one physical sector header, and the [`SectorsTable`] built
//! from repeated raw ID scans.
//!
//! A table slot holds `None` where a probe failed; there is no in-band
//! sentinel value that a real sector header could collide with.

use binrw::binrw;

/// The packed Size/Drive/Head status byte found in every sector ID field.
///
/// - bit 7: bad-block flag
/// - bits 6-5: sector size code
/// - low bits: logical head number (3 bits, or 4 when the controller is
///   configured for more than 8 heads)
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct Sdh(pub u8);

impl Sdh {
    pub const BAD_BLOCK: u8 = 0x80;
    pub const SIZE_MASK: u8 = 0x60;
    pub const HEAD_MASK_3BIT: u8 = 0x07;
    pub const HEAD_MASK_4BIT: u8 = 0x0F;

    /// Build an SDH byte from a sector size, head number and bad-block flag.
    pub fn new(sector_size: u16, head: u8, bad: bool) -> Sdh {
        let mut sdh = Sdh::size_code(sector_size) | (head & Sdh::HEAD_MASK_4BIT);
        if bad {
            sdh |= Sdh::BAD_BLOCK;
        }
        Sdh(sdh)
    }

    /// The WD42C22 size-code bits for a sector size in bytes. Sizes other
    /// than 128/512/1024 encode as 256, matching the hardware's default code.
    pub fn size_code(sector_size: u16) -> u8 {
        match sector_size {
            128 => 0x60,
            1024 => 0x40,
            512 => 0x20,
            _ => 0x00,
        }
    }

    /// Sector size in bytes encoded by this SDH.
    pub fn sector_size(&self) -> u16 {
        match self.0 & Sdh::SIZE_MASK {
            0x60 => 128,
            0x40 => 1024,
            0x20 => 512,
            _ => 256,
        }
    }

    /// Logical head number. `four_bit` selects the wider head-select field
    /// used when more than 8 heads are configured.
    pub fn head(&self, four_bit: bool) -> u8 {
        if four_bit {
            self.0 & Sdh::HEAD_MASK_4BIT
        } else {
            self.0 & Sdh::HEAD_MASK_3BIT
        }
    }

    pub fn is_bad(&self) -> bool {
        self.0 & Sdh::BAD_BLOCK != 0
    }

    pub fn with_bad(&self) -> Sdh {
        Sdh(self.0 | Sdh::BAD_BLOCK)
    }

    /// True when the two bytes carry the same size code.
    pub fn same_size(&self, other: Sdh) -> bool {
        (self.0 ^ other.0) & Sdh::SIZE_MASK == 0
    }
}

/// One observed physical sector header.
///
/// The logical cylinder, sector and head recorded in an ID field need not
/// match the physical position of the track it was read from; winchester
/// formats routinely diverge (spare tracks, deliberate obfuscation, or
/// leftover IDs from a previous format).
#[binrw]
#[brw(little)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct SectorId {
    /// Logical cylinder number from the ID field.
    pub cylinder: u16,
    /// Logical sector number.
    pub sector: u8,
    /// SDH status byte (bad flag, size code, head bits).
    #[br(map = Sdh)]
    #[bw(map = |sdh: &Sdh| sdh.0)]
    pub sdh: Sdh,
}

impl SectorId {
    /// Serialize in WDI sector-map order: cylinder LE16, sector, SDH.
    pub fn to_wire(&self) -> [u8; 4] {
        let [lo, hi] = self.cylinder.to_le_bytes();
        [lo, hi, self.sector, self.sdh.0]
    }

    pub fn from_wire(bytes: [u8; 4]) -> SectorId {
        SectorId {
            cylinder: u16::from_le_bytes([bytes[0], bytes[1]]),
            sector: bytes[2],
            sdh: Sdh(bytes[3]),
        }
    }

    pub fn sector_size(&self) -> u16 {
        self.sdh.sector_size()
    }
}

/// Ordered sequence of raw ID probes for one track. Slots the hardware could
/// not fill stay `None`.
pub type SectorsTable = Vec<Option<SectorId>>;
