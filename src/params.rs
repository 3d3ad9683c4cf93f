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

//! The `params` module defines [`DriveParameters`], the full description of
//! an attached drive, and its 32-byte raw representation embedded in every
//! WDI stream.
//!
//! The raw block is the packed little-endian layout of the original
//! controller firmware's parameter POD (20 bytes), zero-padded to 32 bytes
//! for future expansion.

use binrw::{binrw, BinRead, BinWrite};
use std::io::Cursor;

use crate::{image::ImageError, MAX_CYLINDERS, MAX_HEADS};

/// Size of the raw parameter block inside a WDI stream.
pub const PARAM_BLOCK_SIZE: usize = 32;

/// Recording method the data separator is strapped for. RLL media always
/// verify with 56-bit ECC; [`DriveParameters::normalized`] enforces this.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, strum::Display)]
pub enum EncodingMode {
    #[default]
    Mfm,
    Rll,
}

/// Data verification appended to each sector's data field.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, strum::Display)]
pub enum VerifyMode {
    #[default]
    Crc16,
    Ecc32,
    Ecc56,
}

impl VerifyMode {
    /// Number of check bytes following the data field on disk.
    pub fn check_bytes(&self) -> u16 {
        match self {
            VerifyMode::Crc16 => 2,
            VerifyMode::Ecc32 => 4,
            VerifyMode::Ecc56 => 7,
        }
    }

    /// Number of bytes the hardware correction pass operates on, or None for
    /// CRC which cannot be corrected.
    pub fn correction_span(&self) -> Option<usize> {
        match self {
            VerifyMode::Crc16 => None,
            VerifyMode::Ecc32 => Some(4),
            VerifyMode::Ecc56 => Some(7),
        }
    }

    fn from_raw(raw: u8) -> Option<VerifyMode> {
        match raw {
            0 => Some(VerifyMode::Crc16),
            1 => Some(VerifyMode::Ecc32),
            2 => Some(VerifyMode::Ecc56),
            _ => None,
        }
    }

    fn to_raw(self) -> u8 {
        match self {
            VerifyMode::Crc16 => 0,
            VerifyMode::Ecc32 => 1,
            VerifyMode::Ecc56 => 2,
        }
    }
}

/// Head stepping mode. `SlowSt506` issues one pulse per head-settle interval
/// for drives without a step buffer; `Buffered` streams pulses at the fast
/// rate and lets the drive's own logic perform the seek.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, strum::Display)]
pub enum SeekMode {
    SlowSt506,
    #[default]
    Buffered,
}

/// Full description of the attached drive and the active imaging window.
///
/// Enable flags and their start cylinders are kept as separate fields rather
/// than `Option`s so a parameter block survives a raw round trip bit for bit,
/// including values carried while the matching feature is switched off.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DriveParameters {
    pub encoding: EncodingMode,
    pub verify_mode: VerifyMode,
    /// 1..=2048
    pub cylinders: u16,
    /// 1..=16
    pub heads: u8,
    pub use_write_precomp: bool,
    pub write_precomp_start: u16,
    pub use_reduced_current: bool,
    pub reduced_current_start: u16,
    pub use_landing_zone: bool,
    pub landing_zone: u16,
    pub seek_mode: SeekMode,
    pub partial_image: bool,
    pub partial_start: u16,
    pub partial_end: u16,
}

/// The packed on-wire form of [`DriveParameters`]. Field order and widths
/// match the controller firmware POD; everything is little-endian.
#[binrw]
#[brw(little)]
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RawDriveParams {
    pub use_rll: u8,
    pub verify_mode: u8,
    pub cylinders: u16,
    pub heads: u8,
    pub use_write_precomp: u8,
    pub write_precomp_start: u16,
    pub use_reduced_current: u8,
    pub reduced_current_start: u16,
    pub use_landing_zone: u8,
    pub landing_zone: u16,
    pub slow_seek: u8,
    pub partial_image: u8,
    pub partial_start: u16,
    pub partial_end: u16,
    /// Pads the block to [`PARAM_BLOCK_SIZE`].
    pub reserved: [u8; 12],
}

impl DriveParameters {
    /// Validate the structural invariants of a locally constructed parameter
    /// set: geometry within controller limits, in-range start cylinders and
    /// an internally consistent partial window.
    pub fn validate(&self) -> Result<(), ImageError> {
        if self.cylinders == 0 || self.cylinders > MAX_CYLINDERS {
            return Err(ImageError::BadParameterBlock);
        }
        if self.heads == 0 || self.heads > MAX_HEADS {
            return Err(ImageError::BadParameterBlock);
        }
        if self.write_precomp_start > MAX_CYLINDERS
            || self.reduced_current_start > MAX_CYLINDERS
            || self.landing_zone > MAX_CYLINDERS
        {
            return Err(ImageError::BadParameterBlock);
        }
        if self.partial_image
            && (self.partial_start > self.partial_end || self.partial_end >= self.cylinders)
        {
            return Err(ImageError::PartialBounds);
        }
        Ok(())
    }

    /// Return a copy with the RLL/ECC invariant applied: RLL media always
    /// verify with 56-bit ECC.
    pub fn normalized(&self) -> DriveParameters {
        let mut p = self.clone();
        if p.encoding == EncodingMode::Rll {
            p.verify_mode = VerifyMode::Ecc56;
        }
        p
    }

    /// First cylinder imaged, honoring a partial window.
    pub fn first_cylinder(&self) -> u16 {
        if self.partial_image {
            self.partial_start
        } else {
            0
        }
    }

    /// True once `cylinder` has run past the end of the imaging range.
    /// `cylinder` is the next track to visit, so the check is inclusive of
    /// the configured end bound.
    pub fn past_end(&self, cylinder: u16) -> bool {
        cylinder == self.cylinders
            || (self.partial_image && cylinder.wrapping_sub(1) == self.partial_end)
    }

    pub fn to_raw(&self) -> RawDriveParams {
        RawDriveParams {
            use_rll: (self.encoding == EncodingMode::Rll) as u8,
            verify_mode: self.verify_mode.to_raw(),
            cylinders: self.cylinders,
            heads: self.heads,
            use_write_precomp: self.use_write_precomp as u8,
            write_precomp_start: self.write_precomp_start,
            use_reduced_current: self.use_reduced_current as u8,
            reduced_current_start: self.reduced_current_start,
            use_landing_zone: self.use_landing_zone as u8,
            landing_zone: self.landing_zone,
            slow_seek: (self.seek_mode == SeekMode::SlowSt506) as u8,
            partial_image: self.partial_image as u8,
            partial_start: self.partial_start,
            partial_end: self.partial_end,
            reserved: [0; 12],
        }
    }

    pub fn from_raw(raw: &RawDriveParams) -> Result<DriveParameters, ImageError> {
        Ok(DriveParameters {
            encoding: if raw.use_rll != 0 {
                EncodingMode::Rll
            } else {
                EncodingMode::Mfm
            },
            verify_mode: VerifyMode::from_raw(raw.verify_mode).ok_or(ImageError::BadParameterBlock)?,
            cylinders: raw.cylinders,
            heads: raw.heads,
            use_write_precomp: raw.use_write_precomp != 0,
            write_precomp_start: raw.write_precomp_start,
            use_reduced_current: raw.use_reduced_current != 0,
            reduced_current_start: raw.reduced_current_start,
            use_landing_zone: raw.use_landing_zone != 0,
            landing_zone: raw.landing_zone,
            seek_mode: if raw.slow_seek != 0 {
                SeekMode::SlowSt506
            } else {
                SeekMode::Buffered
            },
            partial_image: raw.partial_image != 0,
            partial_start: raw.partial_start,
            partial_end: raw.partial_end,
        })
    }

    /// Serialize to the 32-byte WDI parameter block.
    pub fn to_block(&self) -> [u8; PARAM_BLOCK_SIZE] {
        let mut block = [0u8; PARAM_BLOCK_SIZE];
        let mut cursor = Cursor::new(&mut block[..]);
        // A 32-byte in-memory target cannot fail to accept a 32-byte struct.
        self.to_raw()
            .write(&mut cursor)
            .unwrap_or_else(|e| unreachable!("param block serialization failed: {e}"));
        block
    }

    /// Deserialize from a 32-byte WDI parameter block without validation
    /// beyond the verify-mode range.
    pub fn from_block(block: &[u8; PARAM_BLOCK_SIZE]) -> Result<DriveParameters, ImageError> {
        let raw = RawDriveParams::read(&mut Cursor::new(&block[..]))
            .map_err(|_| ImageError::BadParameterBlock)?;
        DriveParameters::from_raw(&raw)
    }
}

/// Validate a parameter block arriving in a WDI stream against the live
/// configuration, per the write-path acceptance predicate:
///
/// - verify mode, cylinder and head counts within controller limits,
/// - start cylinders for precomp/RWC/landing zone no higher than 2048,
/// - partial bounds below the incoming cylinder count,
/// - encoding (MFM/RLL) matching the live configuration unless the caller
///   intends to override it — the hardware cannot reformat across encodings,
/// - when the live configuration restricts writing to a partial window, both
///   windows internally consistent and overlapping.
///
/// Returns the decoded parameters on success so an override can apply them.
pub fn validate_image_block(
    block: &[u8; PARAM_BLOCK_SIZE],
    current: &DriveParameters,
    override_params: bool,
) -> Result<DriveParameters, ImageError> {
    let raw = RawDriveParams::read(&mut Cursor::new(&block[..]))
        .map_err(|_| ImageError::BadParameterBlock)?;

    if VerifyMode::from_raw(raw.verify_mode).is_none() {
        return Err(ImageError::BadParameterBlock);
    }
    if raw.cylinders == 0 || raw.cylinders > MAX_CYLINDERS {
        return Err(ImageError::BadParameterBlock);
    }
    if raw.heads == 0 || raw.heads > MAX_HEADS {
        return Err(ImageError::BadParameterBlock);
    }
    // 0xFFFF "disabled" markers are not valid here; features are switched by
    // their flags instead.
    if raw.write_precomp_start > MAX_CYLINDERS
        || raw.reduced_current_start > MAX_CYLINDERS
        || raw.landing_zone > MAX_CYLINDERS
        || raw.partial_start >= raw.cylinders
        || raw.partial_end >= raw.cylinders
    {
        return Err(ImageError::BadParameterBlock);
    }

    let incoming_rll = raw.use_rll != 0;
    if !override_params && incoming_rll != (current.encoding == EncodingMode::Rll) {
        return Err(ImageError::EncodingMismatch);
    }

    if current.partial_image {
        if current.partial_start > current.partial_end || raw.partial_start > raw.partial_end {
            return Err(ImageError::PartialBounds);
        }
        // Nothing to do: the image itself is partial and the two windows do
        // not overlap.
        if raw.partial_start > current.partial_end
            || (raw.partial_image != 0 && current.partial_start > raw.partial_end)
        {
            return Err(ImageError::PartialBounds);
        }
    }

    DriveParameters::from_raw(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> DriveParameters {
        DriveParameters {
            encoding: EncodingMode::Mfm,
            verify_mode: VerifyMode::Ecc32,
            cylinders: 615,
            heads: 4,
            use_write_precomp: true,
            write_precomp_start: 300,
            use_reduced_current: false,
            reduced_current_start: 616,
            use_landing_zone: true,
            landing_zone: 615,
            seek_mode: SeekMode::Buffered,
            partial_image: false,
            partial_start: 0,
            partial_end: 0,
        }
    }

    #[test]
    fn block_layout_is_packed_little_endian() {
        let block = params().to_block();
        #[rustfmt::skip]
        let expected: [u8; 20] = [
            0,          // MFM
            1,          // ECC-32
            0x67, 0x02, // 615 cylinders
            4,          // heads
            1, 0x2C, 0x01, // precomp from 300
            0, 0x68, 0x02, // RWC off (value 616 carried)
            1, 0x67, 0x02, // landing zone 615
            0,          // buffered seek
            0, 0, 0, 0, 0, // no partial window
        ];
        assert_eq!(&block[..20], &expected);
        assert_eq!(&block[20..], &[0u8; 12]);
    }

    #[test]
    fn block_round_trips() {
        let p = params();
        let decoded = DriveParameters::from_block(&p.to_block()).unwrap();
        assert_eq!(p, decoded);
        assert_eq!(decoded.to_block(), p.to_block());
    }

    #[test]
    fn zero_cylinders_rejected() {
        let mut p = params();
        p.cylinders = 0;
        let block = p.to_block();
        assert!(matches!(
            validate_image_block(&block, &params(), true),
            Err(ImageError::BadParameterBlock)
        ));
    }

    #[test]
    fn encoding_mismatch_requires_override() {
        let mut p = params();
        p.encoding = EncodingMode::Rll;
        p.verify_mode = VerifyMode::Ecc56;
        let block = p.to_block();
        assert!(matches!(
            validate_image_block(&block, &params(), false),
            Err(ImageError::EncodingMismatch)
        ));
        assert!(validate_image_block(&block, &params(), true).is_ok());
    }

    #[test]
    fn disjoint_partial_windows_rejected() {
        let mut current = params();
        current.partial_image = true;
        current.partial_start = 100;
        current.partial_end = 199;

        let mut incoming = params();
        incoming.partial_image = true;
        incoming.partial_start = 300;
        incoming.partial_end = 400;
        assert!(matches!(
            validate_image_block(&incoming.to_block(), &current, false),
            Err(ImageError::PartialBounds)
        ));
    }

    #[test]
    fn rll_normalizes_to_ecc56() {
        let mut p = params();
        p.encoding = EncodingMode::Rll;
        p.verify_mode = VerifyMode::Crc16;
        assert_eq!(p.normalized().verify_mode, VerifyMode::Ecc56);
    }
}
