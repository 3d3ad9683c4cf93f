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

//! The `image` module streams the WDI container format, converting between
//! physical disk I/O and fixed-size transport packets.
//!
//! A WDI stream is laid out as:
//!
//! ```text
//! "WDI " free-text header ... 0x1A
//! 32-byte drive parameter block
//! per track:
//!   cylinder (u16 LE), head (u8), sectors-per-track (u8)
//!   sector map: 4 bytes per sector in physical arrival order
//!               (cylinder LE, logical sector, SDH)
//!   per sector: status byte, then either the full payload, one fill byte
//!               (bit 7 of the status set), or nothing (unreadable)
//! 0x1A padding to the end of the final packet
//! ```
//!
//! Both directions are resumable at any byte: [`read::ReadTransfer`] fills
//! one outgoing packet per call and [`write::WriteTransfer`] consumes one
//! incoming packet per call, carrying explicit per-record cursors across the
//! boundary. The transport is expected to deliver packets of exactly 128 or
//! 1024 bytes, in order.

pub mod header;
pub mod read;
pub mod write;

use thiserror::Error;

use crate::controller::ControllerError;

/// Small transport packet size, in bytes.
pub const PACKET_SMALL: usize = 128;
/// Large transport packet size, in bytes.
pub const PACKET_LARGE: usize = 1024;

/// Errors raised while streaming a WDI image.
///
/// Any of these ends the transfer; there is no resynchronization once the
/// stream position is in doubt.
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("transport packets must be 128 or 1024 bytes")]
    BadPacketSize,
    #[error("stream does not carry a valid WDI header")]
    BadHeader,
    #[error("header text does not fit the staging buffer")]
    HeaderOverflow,
    #[error("invalid drive parameter block")]
    BadParameterBlock,
    #[error("image encoding does not match the drive configuration")]
    EncodingMismatch,
    #[error("partial image bounds are invalid or do not overlap")]
    PartialBounds,
    #[error("track cylinder number outside the drive geometry")]
    CylinderOutOfRange,
    #[error("track head number outside the drive geometry")]
    HeadOutOfRange,
    #[error("variable sector sizes within one track")]
    MixedSectorSizes,
    #[error("logical cylinder or head numbers vary within one track")]
    MixedSectorIds,
    #[error("invalid sector status byte")]
    BadSectorClass,
    #[error(transparent)]
    Controller(#[from] ControllerError),
}

/// Classification of one sector's data record in the stream.
///
/// On the wire this is the low 7 bits of the status byte; bit 7 flags a
/// compressed record (the payload collapsed to a single fill byte).
#[derive(Copy, Clone, Debug, Eq, PartialEq, strum::Display)]
pub enum SectorClass {
    /// No data could be recovered; no payload follows.
    Unreadable,
    /// Data read clean (or was ECC-corrected in flight).
    Good,
    /// Data is present but failed its CRC/ECC check.
    DataError,
}

/// Bit 7 of a sector status byte: the payload is one fill byte.
pub const SECTOR_COMPRESSED: u8 = 0x80;

impl SectorClass {
    /// Decode a wire status byte into a class and a compressed flag.
    pub fn from_wire(byte: u8) -> Result<(SectorClass, bool), ImageError> {
        let class = match byte & !SECTOR_COMPRESSED {
            0 => SectorClass::Unreadable,
            1 => SectorClass::Good,
            2 => SectorClass::DataError,
            _ => return Err(ImageError::BadSectorClass),
        };
        Ok((class, byte & SECTOR_COMPRESSED != 0))
    }

    pub fn to_wire(self, compressed: bool) -> u8 {
        let class = match self {
            SectorClass::Unreadable => 0,
            SectorClass::Good => 1,
            SectorClass::DataError => 2,
        };
        if compressed {
            class | SECTOR_COMPRESSED
        } else {
            class
        }
    }
}

/// Running error totals accumulated over a transfer, in either direction.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct TransferStats {
    /// Sectors whose data failed its CRC/ECC check but was still captured.
    pub data_errors: u32,
    /// Sectors recovered through hardware ECC correction.
    pub corrected: u32,
    /// Sectors with no recoverable data at all.
    pub bad_blocks: u32,
    /// Tracks on which not a single sector ID could be read.
    pub unreadable_tracks: u32,
}

pub(crate) fn check_packet_size(size: usize) -> Result<(), ImageError> {
    if size == PACKET_SMALL || size == PACKET_LARGE {
        Ok(())
    } else {
        Err(ImageError::BadPacketSize)
    }
}

/// Byte sink over an outgoing packet. The producing state machine checks
/// [`PacketWriter::is_full`] after every push and suspends with its cursors
/// intact when the packet runs out.
pub(crate) struct PacketWriter<'p> {
    buf: &'p mut [u8],
    pos: usize,
}

impl<'p> PacketWriter<'p> {
    pub(crate) fn new(buf: &'p mut [u8]) -> PacketWriter<'p> {
        PacketWriter { buf, pos: 0 }
    }

    pub(crate) fn push(&mut self, byte: u8) {
        self.buf[self.pos] = byte;
        self.pos += 1;
    }

    pub(crate) fn is_full(&self) -> bool {
        self.pos == self.buf.len()
    }
}

/// Byte source over an incoming packet. [`PacketReader::take`] returns `None`
/// once the packet is exhausted; the consuming state machine then suspends
/// until the next packet arrives.
pub(crate) struct PacketReader<'p> {
    buf: &'p [u8],
    pos: usize,
}

impl<'p> PacketReader<'p> {
    pub(crate) fn new(buf: &'p [u8]) -> PacketReader<'p> {
        PacketReader { buf, pos: 0 }
    }

    pub(crate) fn take(&mut self) -> Option<u8> {
        let byte = *self.buf.get(self.pos)?;
        self.pos += 1;
        Some(byte)
    }

    pub(crate) fn skip(&mut self, count: usize) {
        self.pos = (self.pos + count).min(self.buf.len());
    }

    pub(crate) fn remaining(&self) -> &[u8] {
        &self.buf[self.pos..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sector_class_wire_codec() {
        assert_eq!(
            SectorClass::from_wire(0x81).unwrap(),
            (SectorClass::Good, true)
        );
        assert_eq!(
            SectorClass::from_wire(2).unwrap(),
            (SectorClass::DataError, false)
        );
        assert_eq!(
            SectorClass::from_wire(0).unwrap(),
            (SectorClass::Unreadable, false)
        );
        assert!(SectorClass::from_wire(3).is_err());
        assert!(SectorClass::from_wire(0x83).is_err());
        assert_eq!(SectorClass::DataError.to_wire(true), 0x82);
    }

    #[test]
    fn packet_sizes() {
        assert!(check_packet_size(128).is_ok());
        assert!(check_packet_size(1024).is_ok());
        assert!(check_packet_size(0).is_err());
        assert!(check_packet_size(256).is_err());
        assert!(check_packet_size(1030).is_err());
    }
}
