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

//! The `controller` module implements the WD42C22 driver: register protocol,
//! on-chip buffer SRAM windowing, seeking, and the disk command set (scan ID,
//! read/write sector, verify, format, bad-sector marking, hardware-assisted
//! ECC correction).
//!
//! The driver has no knowledge of image formats. It owns the live
//! [`DriveParameters`] and the physical head position, and reaches the
//! hardware exclusively through a [`ControllerBus`] implementation.

pub mod bus;
pub mod registers;

use std::time::Duration;

use thiserror::Error;

use crate::{
    chs::DiskCh,
    controller::{
        bus::{ControllerBus, Deadline, WindowShift},
        registers::*,
    },
    params::{DriveParameters, EncodingMode, VerifyMode, SeekMode},
    sector_id::{Sdh, SectorId, SectorsTable},
    BUFFER_SIZE, MAX_CYLINDERS, MAX_ID_SCANS,
};

/// Debounce window: /READY must stay asserted this long before the drive is
/// believed, as the line can pulse during spin-up.
const READY_DEBOUNCE: Duration = Duration::from_millis(120);
/// A seek must complete within this of the last step pulse.
const SETTLE_TIMEOUT: Duration = Duration::from_millis(500);
/// Any other controller command timeout.
const IO_TIMEOUT: Duration = Duration::from_secs(3);
/// Per-probe bound inside [`Wd42c22::fill_sectors_table`]; the table fill
/// has to stay quick.
const ID_SCAN_TIMEOUT: Duration = Duration::from_millis(60);

/// Inter-pulse step rate for ST506-compatible slow seeks.
const SLOW_STEP_RATE: Duration = Duration::from_millis(4);
/// Inter-pulse step rate for buffered seeks.
const FAST_STEP_RATE: Duration = Duration::from_micros(10);
/// Head settle per single recalibration step (ST506 typical is 18 ms).
const RECAL_STEP_SETTLE: Duration = Duration::from_millis(20);

/// Start of the correction scratch region: 7 syndrome bytes, a 2-byte error
/// location and up to 7 pattern bytes occupy the last 16 bytes of the buffer.
const CORRECTION_OFFSET: u16 = (BUFFER_SIZE - 16) as u16;
/// The 5-byte ID image for a write-ID command sits at the very end of the
/// buffer, clear of any sector payload.
const WRITE_ID_OFFSET: u16 = (BUFFER_SIZE - 5) as u16;

/// ID PLO sync length programmed into format commands; the controller pads a
/// further 9 bytes on top of it.
const ID_PLO_LENGTH: u8 = 2;

/// Result classification shared by every disk command.
///
/// Timeout, drive-not-ready and write-fault are hard faults that abort an
/// in-flight transfer; the rest are per-sector or per-scan outcomes.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Error)]
pub enum ControllerError {
    #[error("Controller command timed out")]
    Timeout,
    #[error("Drive not ready")]
    DriveNotReady,
    #[error("Drive write fault")]
    WriteFault,
    #[error("Data address mark not found")]
    NoAddressMark,
    #[error("Sector ID not found")]
    NoSectorId,
    #[error("Data CRC/ECC error")]
    DataError,
    #[error("Bad block mark encountered")]
    BadBlock,
    #[error("Seek failed")]
    SeekFault,
}

impl ControllerError {
    /// Hard faults are unrecoverable mid-transfer.
    pub fn is_hard(&self) -> bool {
        matches!(
            self,
            ControllerError::Timeout
                | ControllerError::DriveNotReady
                | ControllerError::WriteFault
                | ControllerError::SeekFault
        )
    }
}

/// Outcome of a successful sector read.
#[derive(Copy, Clone, Debug, Eq, PartialEq, strum::Display)]
pub enum ReadOutcome {
    /// Data verified clean.
    Ok,
    /// A data error was corrected in the buffer from the ECC syndrome.
    Corrected,
}

/// Direction of an open buffer window, from the caller's point of view.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BufferDirection {
    /// Caller writes bytes into the SRAM.
    Write,
    /// Caller reads bytes out of the SRAM.
    Read,
}

/// WD42C22 driver over an abstract [`ControllerBus`].
pub struct Wd42c22<B> {
    bus: B,
    params: DriveParameters,
    position: DiskCh,
    seek_forward: bool,
    buffer_open: bool,
    /// Keep 3-bit head numbers in scanned IDs even when more than 8 heads
    /// are configured, for media formatted by 3-bit-SDH controllers.
    force_3bit_head_ids: bool,
}

impl<B: ControllerBus> Wd42c22<B> {
    /// Take ownership of the bus and bring the controller to its post-reset
    /// register state. The drive itself is untouched until
    /// [`select_drive`](Self::select_drive) and
    /// [`recalibrate`](Self::recalibrate).
    pub fn new(bus: B, params: DriveParameters) -> Wd42c22<B> {
        let mut wdc = Wd42c22 {
            bus,
            params: params.normalized(),
            position: DiskCh::default(),
            seek_forward: false,
            buffer_open: false,
            force_3bit_head_ids: false,
        };
        wdc.reset_controller();
        wdc
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn into_bus(self) -> B {
        self.bus
    }

    pub fn params(&self) -> &DriveParameters {
        &self.params
    }

    /// Replace the live drive parameters. Takes effect on the hardware only
    /// after [`apply_params`](Self::apply_params).
    pub fn set_params(&mut self, params: &DriveParameters) {
        self.params = params.normalized();
    }

    pub fn set_force_3bit_head_ids(&mut self, force: bool) {
        self.force_3bit_head_ids = force;
    }

    /// Current physical cylinder and head.
    pub fn position(&self) -> DiskCh {
        self.position
    }

    /// True when scanned SDH bytes carry a 4-bit head number.
    pub fn four_bit_heads(&self) -> bool {
        self.params.heads > 8 && !self.force_3bit_head_ids
    }

    /// Bring the controller to a known state: reset the drive-controller
    /// section, pulse master reset, then program AT mode, PIO buffer access,
    /// the WCLK clock source and DDRQ. Expects the chip's own power-up reset
    /// to have completed.
    pub fn reset_controller(&mut self) {
        self.bus.write_register(
            REG_ICR,
            (Icr::RESET_DRIVE_CTRL | Icr::DISABLE_RESET_OUT).bits(),
        );
        self.bus.write_register(REG_INTERFACE_RESET, 0x7F);
        self.bus.pulse_reset();

        // A lot of bits survive the resets above and need explicit values.
        self.bus.write_register(REG_BCR, Bcr::AT_MODE.bits());
        self.bus.write_register(REG_AT_CONTROL, 0);
        // Clearing SCKS switches the drive controller from BCLK to the data
        // separator's WCLK; required before any drive command.
        self.bus.write_register(REG_AUX_BUFFER, 0);
        self.bus.write_register(REG_DRQ_STATUS, DRQ_DDRQ);

        self.bus.set_window_shift(None);
        self.bus.clear_command_interrupt();
        self.bus.clear_seek_complete();
        self.buffer_open = false;
        log::debug!("reset_controller: controller initialized");
    }

    // *** buffer SRAM window ***

    /// Open the 2K buffer window for sequential access starting at `offset`.
    /// The window is a single exclusively owned resource; every open must be
    /// paired with [`buffer_finish`](Self::buffer_finish), including on error
    /// paths, or subsequent controller operations will misbehave.
    pub fn buffer_begin(&mut self, direction: BufferDirection, offset: u16) {
        let mut bcr = Bcr::from_bits_retain(self.bus.read_register(REG_BCR));
        let mut icr = Icr::from_bits_retain(self.bus.read_register(REG_ICR));

        // MAC must be clear while DRWB changes.
        icr.remove(Icr::MAC);
        self.bus.write_register(REG_ICR, icr.bits());
        bcr.set(Bcr::DRWB, direction == BufferDirection::Read);
        self.bus.write_register(REG_BCR, bcr.bits());

        icr.insert(Icr::MAC);
        self.bus.write_register(REG_ICR, icr.bits());
        self.bus.write_register(REG_BUFFER_ADDR_LO, offset as u8);
        self.bus.write_register(REG_BUFFER_ADDR_HI, (offset >> 8) as u8);

        bcr.insert(Bcr::ADBP);
        self.bus.write_register(REG_BCR, bcr.bits());
        self.buffer_open = true;
    }

    /// Read one byte at the current buffer offset and advance it.
    pub fn buffer_read(&mut self) -> u8 {
        self.bus.read_register(REG_BUFFER_DATA)
    }

    /// Write one byte at the current buffer offset and advance it.
    pub fn buffer_write(&mut self, value: u8) {
        self.bus.write_register(REG_BUFFER_DATA, value);
    }

    /// Close the buffer window and hand the SRAM back to the sequencer.
    pub fn buffer_finish(&mut self) {
        let mut bcr = Bcr::from_bits_retain(self.bus.read_register(REG_BCR));
        let mut icr = Icr::from_bits_retain(self.bus.read_register(REG_ICR));

        icr.remove(Icr::MAC);
        self.bus.write_register(REG_ICR, icr.bits());
        bcr.remove(Bcr::ADBP);
        self.bus.write_register(REG_BCR, bcr.bits());
        self.buffer_open = false;
    }

    pub fn buffer_is_open(&self) -> bool {
        self.buffer_open
    }

    /// Zero the first `count` bytes of the buffer and close the window.
    pub fn buffer_clear(&mut self, count: u16) {
        self.buffer_begin(BufferDirection::Write, 0);
        for _ in 0..count {
            self.buffer_write(0);
        }
        self.buffer_finish();
    }

    /// Simple presence test of the controller and its buffer SRAM: write 2K
    /// of random bytes, read them back, compare.
    pub fn self_test(&mut self) -> bool {
        use rand::Rng;

        let mut pattern = vec![0u8; BUFFER_SIZE];
        rand::thread_rng().fill(pattern.as_mut_slice());

        self.buffer_begin(BufferDirection::Write, 0);
        for &byte in &pattern {
            self.buffer_write(byte);
        }

        self.buffer_begin(BufferDirection::Read, 0);
        let mut ok = true;
        for &byte in &pattern {
            if self.buffer_read() != byte {
                ok = false;
                break;
            }
        }

        // Leaves the window closed whatever the outcome.
        self.buffer_clear(BUFFER_SIZE as u16);
        if !ok {
            log::error!("self_test: buffer SRAM mismatch; controller absent or faulty");
        }
        ok
    }

    // *** drive control lines ***

    /// The drive must be selected before any operation on it.
    pub fn select_drive(&mut self, selected: bool) {
        self.bus.set_drive_select(selected);
    }

    /// Query drive readiness from the /READY line directly so this works
    /// without controller cooperation. The line must hold for the whole
    /// debounce window and no write fault may be latched.
    pub fn is_drive_ready(&mut self) -> bool {
        let deadline = Deadline::after(&mut self.bus, READY_DEBOUNCE);
        while !deadline.expired(&mut self.bus) {
            if !self.bus.drive_ready() {
                return false;
            }
        }
        !self.is_write_fault()
    }

    pub fn is_at_cylinder0(&mut self) -> bool {
        self.bus.at_track0()
    }

    pub fn is_write_fault(&mut self) -> bool {
        Icr::from_bits_retain(self.bus.read_register(REG_ICR)).contains(Icr::WRITE_FAULT)
    }

    /// Shift the data separator's detection window early or late for reads
    /// of marginal media, or release it with `None`. Left released by
    /// [`reset_controller`](Self::reset_controller).
    pub fn set_window_shift(&mut self, shift: Option<WindowShift>) {
        self.bus.set_window_shift(shift);
    }

    /// Step the heads toward cylinder 0 until /TRK0 asserts, one slow pulse
    /// per head-settle interval. A fixed settle is used instead of waiting on
    /// seek-complete because some drives recalibrate on their own (unparking
    /// from a landing zone past the last cylinder) and stop answering STEP.
    /// Exhausting the full configurable cylinder range is a fatal seek error.
    pub fn recalibrate(&mut self) -> Result<(), ControllerError> {
        self.select_drive(true);
        self.bus.set_head_select(0);
        self.position = DiskCh::new(self.position.c(), 0);

        if self.is_at_cylinder0() {
            self.position = DiskCh::new(0, 0);
            return Ok(());
        }

        let mut attempts = MAX_CYLINDERS;
        while !self.is_at_cylinder0() {
            if attempts == 0 {
                log::error!("recalibrate: /TRK0 never asserted");
                return Err(ControllerError::SeekFault);
            }
            attempts -= 1;

            if self.seek_forward {
                self.bus.set_seek_direction(false);
                self.seek_forward = false;
            }
            self.bus.step_pulse();
            self.bus.delay(RECAL_STEP_SETTLE);
        }

        self.position = DiskCh::new(0, 0);
        Ok(())
    }

    /// Seek to a physical cylinder and head: |Δcylinder| step pulses at the
    /// configured rate, a settle on direction change, then a bounded wait on
    /// seek-complete. Afterwards the reduced-write-current and
    /// write-precompensation lines are refreshed from the configured start
    /// cylinders. Requests outside the configured geometry leave the
    /// position unchanged.
    pub fn seek(&mut self, ch: DiskCh) -> Result<(), ControllerError> {
        self.select_drive(true);

        if self.position.h() != ch.h() && ch.h() < self.params.heads {
            self.bus.set_head_select(ch.h());
            self.position = DiskCh::new(self.position.c(), ch.h());
        }

        if self.position.c() != ch.c() && ch.c() < self.params.cylinders {
            let forward = ch.c() > self.position.c();
            let mut count = ch.c().abs_diff(self.position.c());

            if self.seek_forward != forward {
                self.bus.set_seek_direction(forward);
                self.seek_forward = forward;
            }

            let step_rate = match self.params.seek_mode {
                SeekMode::SlowSt506 => SLOW_STEP_RATE,
                SeekMode::Buffered => FAST_STEP_RATE,
            };

            self.bus.clear_seek_complete();
            while count > 0 {
                self.bus.step_pulse();
                self.bus.delay(step_rate);
                count -= 1;
            }

            let deadline = Deadline::after(&mut self.bus, SETTLE_TIMEOUT);
            while !self.bus.seek_complete() {
                if deadline.expired(&mut self.bus) {
                    log::error!("seek: no seek-complete after stepping to {ch}");
                    return Err(ControllerError::SeekFault);
                }
            }
            self.position = DiskCh::new(ch.c(), self.position.h());
        }

        // On drives with 8 or fewer heads the spare head-select line doubles
        // as reduced write current.
        if self.params.use_reduced_current && self.params.heads <= 8 {
            self.bus
                .set_reduced_write_current(self.position.c() >= self.params.reduced_current_start);
        }
        if self.params.use_write_precomp {
            self.bus
                .set_write_precomp(self.position.c() >= self.params.write_precomp_start);
        }
        Ok(())
    }

    // *** controller commands ***

    /// Push the live parameters to the controller: gap/pad fill bytes and
    /// encoding via load-parameter-block, head width and ECC polynomial via
    /// set-parameter, and the RLL/MFM strap to the data separator. Only a
    /// command timeout is treated as failure; status bits from an idle drive
    /// are meaningless here.
    pub fn apply_params(&mut self) -> Result<(), ControllerError> {
        if let Err(ControllerError::Timeout) = self.load_parameter_block(None) {
            return Err(ControllerError::Timeout);
        }
        if let Err(ControllerError::Timeout) = self.set_parameter() {
            return Err(ControllerError::Timeout);
        }
        self.bus
            .set_rll_encoding(self.params.encoding == EncodingMode::Rll);
        Ok(())
    }

    fn gap_fill_byte(&self) -> u8 {
        // Format gaps carry 0x4E on MFM media, 0x33 on RLL.
        match self.params.encoding {
            EncodingMode::Mfm => 0x4E,
            EncodingMode::Rll => 0x33,
        }
    }

    /// WD set-parameter command: no ESDI/NRZ, no relocation ID searches,
    /// 4-bit SDH head select only past 8 heads.
    fn set_parameter(&mut self) -> Result<(), ControllerError> {
        let mut command = CMD_SET_PARAM;
        if self.params.heads > 8 {
            command |= SET_PARAM_4BIT_HEAD;
        }
        if self.params.verify_mode == VerifyMode::Ecc56 {
            command |= SET_PARAM_ECC56;
        }
        self.exec_command(command, IO_TIMEOUT)
    }

    /// WD load-parameter-block command. `nonstandard` loads a custom sector
    /// size, or the byte offset for a write-ID command, through the cylinder
    /// registers with U=1.
    fn load_parameter_block(&mut self, nonstandard: Option<u16>) -> Result<(), ControllerError> {
        let mut command = CMD_LOAD_PARAMS;
        if self.params.encoding == EncodingMode::Rll {
            command &= !CMD_LOAD_PARAMS_MFM;
        }

        // Sector count holds the gap fill byte, sector number the ID/data
        // pad fill byte during format and write.
        self.bus.write_register(REG_SECTOR_COUNT, self.gap_fill_byte());
        self.bus.write_register(REG_SECTOR_NUMBER, 0);

        if let Some(value) = nonstandard {
            command |= CMD_LOAD_PARAMS_NONSTD;
            self.bus.write_register(REG_CYL_LO, value as u8);
            self.bus.write_register(REG_CYL_HI, (value >> 8) as u8);
        }
        self.exec_command(command, IO_TIMEOUT)
    }

    /// Single raw probe of whatever ID field is passing under the head.
    pub fn scan_id(&mut self) -> Result<SectorId, ControllerError> {
        self.exec_command(CMD_SCAN_ID, IO_TIMEOUT)?;
        Ok(self.read_scanned_id())
    }

    fn id_scan_mask(&self) -> u8 {
        let head_mask = if self.four_bit_heads() {
            Sdh::HEAD_MASK_4BIT
        } else {
            Sdh::HEAD_MASK_3BIT
        };
        Sdh::SIZE_MASK | head_mask
    }

    fn read_scanned_id(&mut self) -> SectorId {
        let cylinder = u16::from_le_bytes([
            self.bus.read_register(REG_CYL_LO),
            self.bus.read_register(REG_CYL_HI),
        ]);
        let sector = self.bus.read_register(REG_SECTOR_NUMBER);
        let sdh = self.bus.read_register(REG_SDH) & self.id_scan_mask();
        SectorId {
            cylinder,
            sector,
            sdh: Sdh(sdh),
        }
    }

    /// Repeat the raw ID probe up to [`MAX_ID_SCANS`] times, building a
    /// table in physical arrival order. Stops early on a probe timeout or an
    /// aborted command, leaving the remaining slots unobserved; the partial
    /// table is still returned because the caller judges its quality.
    pub fn fill_sectors_table(&mut self) -> SectorsTable {
        let mut table: SectorsTable = vec![None; MAX_ID_SCANS];

        for slot in table.iter_mut() {
            self.bus.clear_command_interrupt();
            self.bus.write_register(REG_COMMAND, CMD_SCAN_ID);

            let deadline = Deadline::after(&mut self.bus, ID_SCAN_TIMEOUT);
            let mut fired = true;
            while !self.bus.command_interrupt() {
                if deadline.expired(&mut self.bus) {
                    fired = false;
                    break;
                }
            }
            if !fired {
                break;
            }

            let error = ErrorBits::from_bits_retain(self.bus.read_register(REG_ERROR));
            if error.contains(ErrorBits::ABORTED_COMMAND) {
                break;
            }
            *slot = Some(self.read_scanned_id());
        }
        table
    }

    /// Read one sector of the current track into the buffer at offset 0.
    ///
    /// `chs` overrides the cylinder/head written to the task file when the
    /// logical addressing of the sector diverges from the physical position.
    /// In long mode the raw check bytes are appended to the buffer and no
    /// verification happens. Under an ECC verify mode a data error triggers
    /// one hardware correction attempt; success reclassifies the read as
    /// [`ReadOutcome::Corrected`] with the buffer contents repaired.
    pub fn read_sector(
        &mut self,
        sector: u8,
        sector_size: u16,
        long_mode: bool,
        chs: Option<DiskCh>,
    ) -> Result<ReadOutcome, ControllerError> {
        self.command_setup(BufferDirection::Write, 0);
        let ch = chs.unwrap_or(self.position);

        self.bus.write_register(REG_SECTOR_NUMBER, sector);
        self.write_task_chs(ch, sector_size);

        let mut command = CMD_READ_SECTOR;
        if long_mode {
            command |= CMD_BIT_LONG;
        }

        match self.exec_command(command, IO_TIMEOUT) {
            Ok(()) => Ok(ReadOutcome::Ok),
            Err(ControllerError::DataError) if self.params.verify_mode != VerifyMode::Crc16 => {
                self.compute_correction()?;
                self.apply_correction();
                log::debug!("read_sector: corrected ECC error in sector {sector} at {ch}");
                Ok(ReadOutcome::Corrected)
            }
            Err(e) => Err(e),
        }
    }

    /// Bulk multi-sector read for a quick track check. The buffer is too
    /// small for a whole track, so its contents are trashed and nothing is
    /// kept; on failure, fall back to per-sector reads to find the offender.
    pub fn verify_track(
        &mut self,
        sectors_per_track: u8,
        sector_size: u16,
        start_sector: u8,
        chs: Option<DiskCh>,
    ) -> Result<(), ControllerError> {
        self.command_setup(BufferDirection::Write, 0);
        let ch = chs.unwrap_or(self.position);

        self.bus.write_register(REG_SECTOR_COUNT, sectors_per_track);
        self.bus.write_register(REG_SECTOR_NUMBER, start_sector);
        self.write_task_chs(ch, sector_size);

        self.exec_command(CMD_READ_VERIFY, IO_TIMEOUT)
    }

    /// Write one sector from the buffer at offset 0.
    pub fn write_sector(
        &mut self,
        sector: u8,
        sector_size: u16,
        chs: Option<DiskCh>,
    ) -> Result<(), ControllerError> {
        self.command_setup(BufferDirection::Read, 0);
        let ch = chs.unwrap_or(self.position);

        // Data PLO length; the controller pads a fixed 12 bytes on top.
        self.bus.write_register(REG_PLO, 0);
        self.bus.write_register(REG_SECTOR_NUMBER, sector);
        self.write_task_chs(ch, sector_size);

        self.exec_command(CMD_WRITE_SECTOR, IO_TIMEOUT)
    }

    /// Stage the per-sector format table in the buffer: two bytes per
    /// physical sector, a good (0) or bad (0x80) mark followed by the logical
    /// sector number laid out with the requested interleave and biased to
    /// `start_sector`. `bad_blocks` is indexed by physical slot.
    ///
    /// Sector numbers are single bytes and the bias wraps past 255; callers
    /// wanting unique numbers keep `start_sector` at or below
    /// `256 - sectors_per_track`.
    pub fn prepare_format_interleave(
        &mut self,
        sectors_per_track: u8,
        interleave: u8,
        start_sector: u8,
        bad_blocks: Option<&[bool]>,
    ) {
        let table = build_interleave_table(sectors_per_track, interleave);

        self.buffer_begin(BufferDirection::Write, 0);
        for slot in 0..sectors_per_track as usize {
            let bad = bad_blocks.is_some_and(|t| t.get(slot).copied().unwrap_or(false));
            self.buffer_write(if bad { 0x80 } else { 0 });

            let mut number = match &table {
                Some(t) => t[slot + 1],
                None => slot as u8 + 1,
            };
            if start_sector == 0 {
                number -= 1;
            } else if start_sector > 1 {
                number = number.wrapping_add(start_sector - 1);
            }
            self.buffer_write(number);
        }
        self.buffer_finish();
    }

    /// Format the whole track from the staged interleave table.
    ///
    /// The gap-3 length is derived from the sector size: `2*M*S` for ±3%
    /// motor speed variation plus a padding allowance, which works out to
    /// `size/16 + 8`.
    pub fn format_track(
        &mut self,
        sectors_per_track: u8,
        sector_size: u16,
        chs: Option<DiskCh>,
    ) -> Result<(), ControllerError> {
        let gap_size = (sector_size / 16) as u8 + 8;

        self.command_setup(BufferDirection::Read, 0);
        let ch = chs.unwrap_or(self.position);

        self.bus.write_register(REG_PLO, ID_PLO_LENGTH);
        self.bus.write_register(REG_SECTOR_COUNT, sectors_per_track);
        // The gap written on disk is 3 bytes longer than the register value.
        self.bus.write_register(REG_SECTOR_NUMBER, gap_size - 3);
        self.write_task_chs(ch, sector_size);

        log::debug!("format_track: {sectors_per_track} sectors of {sector_size} bytes at {ch}");
        self.exec_command(CMD_FORMAT_TRACK, IO_TIMEOUT)
    }

    /// Mark one existing sector's ID bad in place, without reformatting the
    /// track.
    ///
    /// The write-ID command cannot modify an ID directly; with F=1 it places
    /// a fresh ID at a byte offset from an ID it can find, so for most
    /// sectors the new flagged ID is written at the computed field-length
    /// offset from the immediately preceding logical sector. That offset is
    /// not computable for the track's lowest sector (the gap after the last
    /// sector depends on the format), so that one is rewritten with the
    /// hard-sector format-single-sector command instead, W=1 keeping write
    /// gate off over the gaps where no sector pulse will arrive.
    pub fn set_bad_sector(
        &mut self,
        sector: u8,
        chs: Option<DiskCh>,
    ) -> Result<(), ControllerError> {
        let ch = chs.unwrap_or(self.position);
        let table = self.fill_sectors_table();

        let mut lowest: Option<u8> = None;
        let mut preceding: Option<SectorId> = None;
        for pair in table.windows(2) {
            if pair[1].is_none() {
                continue;
            }
            if let Some(prev) = pair[0] {
                if lowest.is_none_or(|l| prev.sector < l) {
                    lowest = Some(prev.sector);
                }
                if preceding.is_none() && pair[1].is_some_and(|cur| cur.sector == sector) {
                    preceding = Some(prev);
                }
            }
        }

        let Some(lowest) = lowest else {
            return Ok(()); // nothing observed on this track
        };
        let first_on_track = sector == lowest;
        if !first_on_track && preceding.is_none() {
            return Ok(()); // target not seen, nothing to do
        }

        let sector_size = match preceding {
            Some(id) => id.sector_size(),
            None => match table.iter().flatten().find(|id| id.sector == sector) {
                Some(id) => id.sector_size(),
                None => return Ok(()),
            },
        };
        log::debug!("set_bad_sector: marking sector {sector} at {ch}, first_on_track {first_on_track}");

        if first_on_track {
            self.format_single_bad(sector, sector_size, ch)
        } else if let Some(prev) = preceding {
            self.write_id_bad(sector, sector_size, prev.sector, ch)
        } else {
            Ok(())
        }
    }

    /// Write-ID path of [`set_bad_sector`](Self::set_bad_sector): stage the
    /// 5-byte ID image, load the field-length offset with U=1, issue the
    /// command, then restore the standard parameter block.
    fn write_id_bad(
        &mut self,
        sector: u8,
        sector_size: u16,
        preceding_sector: u8,
        ch: DiskCh,
    ) -> Result<(), ControllerError> {
        self.buffer_begin(BufferDirection::Write, WRITE_ID_OFFSET);

        // Byte 0: the sector number to locate; the offset is measured from
        // the end of its ID field.
        self.buffer_write(preceding_sector);

        // Byte 1: IDENT. Bits 7-4 set, bit 3: !cyl10, bit 2 set,
        // bit 1: !cyl9, bit 0: cyl8.
        let msb = (ch.c() >> 8) as u8;
        let mut ident = 0xF4u8;
        if msb & 0x04 == 0 {
            ident |= 0x08;
        }
        if msb & 0x02 == 0 {
            ident |= 0x02;
        }
        if msb & 0x01 != 0 {
            ident |= 0x01;
        }
        self.buffer_write(ident);

        // Byte 2: cylinder low.
        self.buffer_write(ch.c() as u8);
        // Byte 3: bad-block flag, size code, head number.
        self.buffer_write(Sdh::new(sector_size, ch.h(), true).0);
        // Byte 4: the logical sector number being rewritten.
        self.buffer_write(sector);
        self.buffer_finish();

        // Field-length arithmetic from the end of the preceding ID to the
        // start of ours: ID pad and write splice, the data field, its check
        // bytes, the data pad and write splice, then the format gap.
        let mut offset: u16 = 3;
        offset += sector_size;
        offset += self.params.verify_mode.check_bytes();
        offset += 4;
        offset += sector_size / 16 + 8;

        if let Err(ControllerError::Timeout) = self.load_parameter_block(Some(offset)) {
            return Err(ControllerError::Timeout);
        }

        self.command_setup(BufferDirection::Read, WRITE_ID_OFFSET);
        // PLO length 0 would mean a 2048-byte PLO field here.
        self.bus.write_register(REG_PLO, 1);
        self.bus.write_register(REG_SECTOR_COUNT, 1);
        self.bus.write_register(REG_SECTOR_NUMBER, sector);
        self.write_task_chs(ch, sector_size);

        let result = self.exec_command(CMD_WRITE_ID, IO_TIMEOUT);

        // U back to 0 regardless of the command outcome.
        let _ = self.load_parameter_block(None);
        result
    }

    /// Format-single-sector path of [`set_bad_sector`](Self::set_bad_sector)
    /// for the track's lowest sector.
    fn format_single_bad(
        &mut self,
        sector: u8,
        sector_size: u16,
        ch: DiskCh,
    ) -> Result<(), ControllerError> {
        let gap_size = (sector_size / 16) as u8 + 8;

        // A one-entry format table: bad mark plus the sector number.
        self.buffer_begin(BufferDirection::Write, 0);
        self.buffer_write(0x80);
        self.buffer_write(sector);
        self.buffer_finish();

        self.command_setup(BufferDirection::Read, 0);
        self.bus.write_register(REG_PLO, ID_PLO_LENGTH);
        self.bus.write_register(REG_SECTOR_COUNT, 1);
        self.bus.write_register(REG_SECTOR_NUMBER, gap_size - 3);
        self.write_task_chs(ch, sector_size);

        self.exec_command(CMD_FORMAT_SECTOR, IO_TIMEOUT)
    }

    // *** ECC correction ***

    /// Issue the compute-correction command for the last long/errored read.
    /// `Ok` means the error is correctable and the scratch region holds the
    /// location and pattern; an uncorrectable error stays
    /// [`ControllerError::DataError`].
    fn compute_correction(&mut self) -> Result<(), ControllerError> {
        self.command_setup(BufferDirection::Write, CORRECTION_OFFSET);
        self.exec_command(CMD_COMPUTE_CORRECTION, IO_TIMEOUT)
    }

    /// Apply the computed error pattern to the faulty bytes: XOR the pattern
    /// over the data at the error location, folding the spanning-correction
    /// byte into the first one, and write the result back. The buffer window
    /// only moves in one direction at a time, so this is a read pass and a
    /// write pass.
    fn apply_correction(&mut self) {
        // 7 syndrome bytes (unused), 2-byte error location, up to 7 pattern
        // bytes.
        let mut data = [0u8; 16];
        self.buffer_begin(BufferDirection::Read, CORRECTION_OFFSET);
        for byte in data.iter_mut() {
            *byte = self.buffer_read();
        }

        let location = u16::from_be_bytes([data[7], data[8]]);
        let span = match self.params.verify_mode.correction_span() {
            Some(s) => s,
            None => return, // CRC mode has no correction
        };

        // 4-byte ECC corrects a 5-bit span: fold the overlap of the first
        // two pattern bytes; 56-bit ECC folds the third as well.
        let mut spanning = data[9] ^ data[10];
        if span == 7 {
            spanning ^= data[11];
        }

        self.buffer_begin(BufferDirection::Read, location);
        for index in 0..span {
            data[index] = self.buffer_read() ^ data[index + 9];
        }
        data[0] ^= spanning;

        self.buffer_begin(BufferDirection::Write, location);
        for &byte in data.iter().take(span) {
            self.buffer_write(byte);
        }
        self.buffer_finish();
    }

    // *** command plumbing ***

    /// The register dance preceding every buffer-coupled command: park MAC,
    /// point DRWB the right way, set the buffer address, keep DDRQ disabled,
    /// then re-enable auto-increment with MAC released to the sequencer.
    /// `direction` is the controller's access: `Write` for commands that fill
    /// the buffer from disk, `Read` for commands that drain it.
    fn command_setup(&mut self, direction: BufferDirection, offset: u16) {
        let mut bcr = Bcr::from_bits_retain(self.bus.read_register(REG_BCR));
        let mut icr = Icr::from_bits_retain(self.bus.read_register(REG_ICR));

        icr.remove(Icr::MAC);
        self.bus.write_register(REG_ICR, icr.bits());
        bcr.set(Bcr::DRWB, direction == BufferDirection::Read);
        self.bus.write_register(REG_BCR, bcr.bits());
        self.bus.write_register(REG_BUFFER_ADDR_LO, offset as u8);
        self.bus.write_register(REG_BUFFER_ADDR_HI, (offset >> 8) as u8);
        self.bus.write_register(REG_DRQ_STATUS, DRQ_DDRQ);

        icr.insert(Icr::MAC);
        self.bus.write_register(REG_ICR, icr.bits());
        bcr.insert(Bcr::ADBP);
        self.bus.write_register(REG_BCR, bcr.bits());
        icr.remove(Icr::MAC);
        self.bus.write_register(REG_ICR, icr.bits());
    }

    /// Write cylinder and SDH task-file registers, with the ECC flag set for
    /// non-CRC verify modes.
    fn write_task_chs(&mut self, ch: DiskCh, sector_size: u16) {
        self.bus.write_register(REG_CYL_LO, ch.c() as u8);
        self.bus.write_register(REG_CYL_HI, (ch.c() >> 8) as u8);
        let sdh = Sdh::new(sector_size, ch.h(), self.params.verify_mode != VerifyMode::Crc16);
        self.bus.write_register(REG_SDH, sdh.0);
    }

    /// Issue a command byte and busy-wait on the command interrupt up to
    /// `timeout`, then decode the status and error registers.
    fn exec_command(&mut self, command: u8, timeout: Duration) -> Result<(), ControllerError> {
        self.bus.clear_command_interrupt();
        self.bus.write_register(REG_COMMAND, command);

        let deadline = Deadline::after(&mut self.bus, timeout);
        while !self.bus.command_interrupt() {
            if deadline.expired(&mut self.bus) {
                log::error!("exec_command: command {command:02X} timed out");
                return Err(ControllerError::Timeout);
            }
        }
        self.process_result()
    }

    /// Decode the completion status, in the controller's priority order.
    fn process_result(&mut self) -> Result<(), ControllerError> {
        let status = Status::from_bits_retain(self.bus.read_register(REG_STATUS));
        let error = ErrorBits::from_bits_retain(self.bus.read_register(REG_ERROR));

        if !status.contains(Status::ERROR) {
            return Ok(());
        }
        if !status.contains(Status::READY) {
            Err(ControllerError::DriveNotReady)
        } else if status.contains(Status::WRITE_FAULT) {
            Err(ControllerError::WriteFault)
        } else if error.contains(ErrorBits::BAD_BLOCK) {
            Err(ControllerError::BadBlock)
        } else if error.contains(ErrorBits::DATA_ERROR) {
            Err(ControllerError::DataError)
        } else if error.contains(ErrorBits::ID_NOT_FOUND) {
            Err(ControllerError::NoSectorId)
        } else if error.contains(ErrorBits::DATA_MARK_NOT_FOUND) {
            Err(ControllerError::NoAddressMark)
        } else {
            log::warn!("process_result: ERR set with no decodable error bit: {error:?}");
            Ok(())
        }
    }
}

/// Lay out logical sector numbers 1..=spt with the given interleave skip.
/// Index 0 is unused so physical slot `s` maps to entry `s + 1`. `None`
/// means sequential (interleave out of the useful range).
fn build_interleave_table(sectors_per_track: u8, interleave: u8) -> Option<Vec<u8>> {
    if interleave <= 1 || interleave >= sectors_per_track {
        return None;
    }
    let spt = sectors_per_track as usize;
    let skip = interleave as usize;

    let mut table = vec![0u8; spt + 1];
    let mut pos = 1usize;
    for sector in 1..=sectors_per_track {
        table[pos] = sector;
        pos += skip;
        if pos > spt {
            pos %= spt;
            while pos <= spt && table[pos] != 0 {
                pos += 1;
            }
        }
    }
    Some(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interleave_table_sequential_fallback() {
        assert!(build_interleave_table(17, 1).is_none());
        assert!(build_interleave_table(5, 5).is_none());
        assert!(build_interleave_table(2, 3).is_none());
    }

    #[test]
    fn interleave_table_skip_three() {
        let table = build_interleave_table(5, 3).unwrap();
        assert_eq!(&table[1..], &[1, 3, 5, 2, 4]);
    }

    #[test]
    fn interleave_table_places_every_sector_once() {
        for spt in 3..=17u8 {
            for il in 2..spt {
                let table = build_interleave_table(spt, il).unwrap();
                let mut seen = vec![false; spt as usize + 1];
                for &n in &table[1..] {
                    assert!(n >= 1 && n <= spt && !seen[n as usize]);
                    seen[n as usize] = true;
                }
            }
        }
    }
}
