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

//! WD42C22 register indices, command opcodes and status/error bit
//! definitions.
//!
//! The chip decodes a 6-bit register index; the task-file registers sit at
//! 0x21..=0x27 and mirror the WD1010 layout, while the buffer-manager and
//! interface-control registers occupy the 0x30 block. Several indices decode
//! differently on read and write (0x21 is the error register on read and the
//! PLO control on write; 0x27 is status on read and command on write).

use bitflags::bitflags;

/// Error register (read) / PLO control (write).
pub const REG_ERROR: u8 = 0x21;
pub const REG_PLO: u8 = 0x21;
/// Sector count (task file) / gap fill byte (format).
pub const REG_SECTOR_COUNT: u8 = 0x22;
/// Sector number (task file) / pad fill byte (format).
pub const REG_SECTOR_NUMBER: u8 = 0x23;
pub const REG_CYL_LO: u8 = 0x24;
pub const REG_CYL_HI: u8 = 0x25;
/// Size/drive/head byte.
pub const REG_SDH: u8 = 0x26;
/// Command (write) / status (read).
pub const REG_COMMAND: u8 = 0x27;
pub const REG_STATUS: u8 = 0x27;
/// AT control register: auto-DRQ and ADQ7 enables.
pub const REG_AT_CONTROL: u8 = 0x2A;
/// Auxiliary buffer control: PIO mode, clock source select.
pub const REG_AUX_BUFFER: u8 = 0x2F;
pub const REG_BUFFER_ADDR_LO: u8 = 0x34;
pub const REG_BUFFER_ADDR_HI: u8 = 0x35;
/// Buffer data port; each access advances the buffer address counter.
pub const REG_BUFFER_DATA: u8 = 0x36;
/// Buffer control register.
pub const REG_BCR: u8 = 0x37;
/// Interface control: the block of host-side reset bits.
pub const REG_INTERFACE_RESET: u8 = 0x38;
/// Drive interface control register.
pub const REG_ICR: u8 = 0x3B;
/// DRQ/DDRQ status.
pub const REG_DRQ_STATUS: u8 = 0x3F;

/// Scan ID: latch the next ID field that passes under the head.
pub const CMD_SCAN_ID: u8 = 0x40;
/// Read sector, T=1 (transfer on completion), L=0.
pub const CMD_READ_SECTOR: u8 = 0x20;
/// L bit: long mode, data plus raw check bytes, no checking.
pub const CMD_BIT_LONG: u8 = 0x02;
/// Read sector, M=1: multi-sector, used with count=1 as the verify form
/// (data is checked but never crosses the buffer).
pub const CMD_READ_VERIFY: u8 = 0x24;
/// Write sector.
pub const CMD_WRITE_SECTOR: u8 = 0x30;
/// Format the whole track from the interleave table in the buffer.
pub const CMD_FORMAT_TRACK: u8 = 0x51;
/// Write ID, F=1: rewrite a single ID field at a byte offset from the
/// preceding sector's ID.
pub const CMD_WRITE_ID: u8 = 0xB8;
/// Format single sector, W=1: rewrite one ID and its data field in place.
pub const CMD_FORMAT_SECTOR: u8 = 0xD3;
/// Compute ECC correction pattern for the last long read.
pub const CMD_COMPUTE_CORRECTION: u8 = 0x08;
/// Load the parameter block: soft-sector MFM mode, standard sector sizes.
pub const CMD_LOAD_PARAMS: u8 = 0x8A;
/// K bit of the load-parameter-block command, cleared for RLL media.
pub const CMD_LOAD_PARAMS_MFM: u8 = 0x02;
/// U bit: take a nonstandard sector size (or write-ID offset) from the
/// cylinder registers.
pub const CMD_LOAD_PARAMS_NONSTD: u8 = 0x01;
/// Set parameter: feature bits in the low nibble.
pub const CMD_SET_PARAM: u8 = 0x00;
/// Set-parameter bit: 4-bit head field in SDH (drives with more than 8 heads).
pub const SET_PARAM_4BIT_HEAD: u8 = 0x02;
/// Set-parameter bit: 56-bit ECC polynomial.
pub const SET_PARAM_ECC56: u8 = 0x04;

bitflags! {
    /// Status register (0x27 read).
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct Status: u8 {
        const ERROR         = 0b0000_0001;
        const DRQ           = 0b0000_1000;
        const SEEK_COMPLETE = 0b0001_0000;
        const WRITE_FAULT   = 0b0010_0000;
        const READY         = 0b0100_0000;
        const BUSY          = 0b1000_0000;
    }
}

bitflags! {
    /// Error register (0x21 read). Valid when [`Status::ERROR`] is set.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct ErrorBits: u8 {
        const DATA_MARK_NOT_FOUND = 0b0000_0001;
        const ABORTED_COMMAND     = 0b0000_0100;
        const ID_NOT_FOUND        = 0b0001_0000;
        const DATA_ERROR          = 0b0100_0000;
        const BAD_BLOCK           = 0b1000_0000;
    }
}

bitflags! {
    /// Buffer control register (0x37).
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct Bcr: u8 {
        /// Auto-increment the buffer address on data port access.
        const ADBP = 0b0000_0001;
        /// Buffer direction: set when the buffer is read, clear when it is
        /// filled.
        const DRWB = 0b0000_0100;
        /// AT interface mode.
        const AT_MODE = 0b1000_0000;
    }
}

bitflags! {
    /// Drive interface control register (0x3B).
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct Icr: u8 {
        /// Disable the controller's reset output toward the host bus.
        const DISABLE_RESET_OUT = 0b0000_0100;
        /// Microcontroller access mode: the buffer belongs to the local
        /// microcontroller instead of the sequencer.
        const MAC               = 0b0000_1000;
        /// Latched drive write fault.
        const WRITE_FAULT       = 0b0010_0000;
        /// Reset the drive controller section.
        const RESET_DRIVE_CTRL  = 0b1000_0000;
    }
}

/// DDRQ bit in the DRQ status register (0x3F).
pub const DRQ_DDRQ: u8 = 0x40;
