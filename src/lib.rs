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

//! winchfox is a library for working with ST-412/506 Winchester hard disks
//! through a WD42C22-family controller ASIC driven over its local
//! microcontroller interface.
//!
//! It provides three tightly coupled pieces:
//! - a [`controller`] driver for the WD42C22 register protocol, on-chip
//!   buffer SRAM window and disk commands (seek, scan ID, read/write sector,
//!   format, verify, bad-sector marking, ECC correction),
//! - an [`analyzer`] that reconstructs per-track sector counts and interleave
//!   order from repeated, noisy ID scans,
//! - an [`image`] streaming engine that converts between physical disk I/O
//!   and the WDI container format one fixed-size transport packet at a time.
//!
//! The hardware itself is reached through the [`controller::bus::ControllerBus`]
//! trait, so the whole stack can run against a simulated bus in tests.

pub mod analyzer;
pub mod chs;
pub mod controller;
pub mod image;
pub mod params;
pub mod sector_id;

/// ASCII EOF (SUB). Terminates the free-text WDI header and pads the tail of
/// outgoing transport packets.
pub const ASCII_EOF: u8 = 0x1A;

/// Size of the controller's on-chip buffer SRAM in bytes (a 6116-class 2K part).
pub const BUFFER_SIZE: usize = 2048;

/// Highest cylinder count the controller interface can be configured for.
pub const MAX_CYLINDERS: u16 = 2048;

/// Highest head count the controller interface can be configured for
/// (4-bit head select).
pub const MAX_HEADS: u8 = 16;

/// Number of raw ID probes collected into one sectors table.
pub const MAX_ID_SCANS: usize = 100;

/// Every WDI stream begins with these four bytes.
pub const WDI_MAGIC: &[u8; 4] = b"WDI ";

pub use crate::{
    analyzer::TrackScan,
    chs::DiskCh,
    controller::{bus::ControllerBus, ControllerError, ReadOutcome, Wd42c22},
    image::{
        header::{HeaderSession, ImageHeader},
        read::ReadTransfer,
        write::{BadSectorPolicy, DataErrorPolicy, WriteOptions, WriteTransfer},
        ImageError, SectorClass, TransferStats,
    },
    params::{DriveParameters, EncodingMode, SeekMode, VerifyMode},
    sector_id::{Sdh, SectorId, SectorsTable},
};
