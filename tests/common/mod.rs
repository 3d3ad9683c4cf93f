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

    Common support routines for tests: a register-level WD42C22 simulation
    over an in-memory disk.
*/
#![allow(dead_code)]

use std::time::Duration;

use winchfox::{
    controller::bus::WindowShift,
    ControllerBus,
    DriveParameters,
    EncodingMode,
    Sdh,
    SectorId,
    SeekMode,
    VerifyMode,
    Wd42c22,
    BUFFER_SIZE,
};

/// Byte offset a simulated correctable error corrupts (this byte and the
/// next).
pub const CORRUPT_OFFSET: usize = 5;
/// XOR mask of the simulated corruption.
pub const CORRUPT_MASK: u8 = 0x42;

#[derive(Clone, Debug)]
pub struct SimSector {
    pub id: SectorId,
    pub data: Vec<u8>,
    /// Reads of this sector report a data error.
    pub data_error: bool,
    /// The error is within ECC correction reach: the payload comes back with
    /// [`CORRUPT_MASK`] flipped at [`CORRUPT_OFFSET`] and the controller's
    /// correction pass can undo it.
    pub correctable: bool,
}

impl SimSector {
    pub fn new(cylinder: u16, head: u8, sector: u8, size: u16) -> SimSector {
        SimSector {
            id: SectorId {
                cylinder,
                sector,
                sdh: Sdh::new(size, head, false),
            },
            data: vec![0u8; size as usize],
            data_error: false,
            correctable: false,
        }
    }
}

/// The platters: one sector vector per track, in physical (interleave)
/// order.
#[derive(Clone, Debug)]
pub struct SimDisk {
    pub cylinders: u16,
    pub heads: u8,
    pub tracks: Vec<Vec<SimSector>>,
}

impl SimDisk {
    pub fn blank(cylinders: u16, heads: u8) -> SimDisk {
        SimDisk {
            cylinders,
            heads,
            tracks: vec![Vec::new(); cylinders as usize * heads as usize],
        }
    }

    /// Every track formatted with sequentially numbered sectors starting at
    /// 0, data filled with a byte derived from the position so tracks and
    /// sectors are distinguishable.
    pub fn formatted(cylinders: u16, heads: u8, spt: u8, size: u16) -> SimDisk {
        let mut disk = SimDisk::blank(cylinders, heads);
        for c in 0..cylinders {
            for h in 0..heads {
                let track = disk.track_mut(c, h);
                for s in 0..spt {
                    let mut sector = SimSector::new(c, h, s, size);
                    let fill = (c as u8)
                        .wrapping_mul(7)
                        .wrapping_add(h.wrapping_mul(13))
                        .wrapping_add(s);
                    sector.data.fill(fill);
                    track.push(sector);
                }
            }
        }
        disk
    }

    fn index(&self, cylinder: u16, head: u8) -> usize {
        cylinder as usize * self.heads as usize + head as usize
    }

    pub fn track(&self, cylinder: u16, head: u8) -> &Vec<SimSector> {
        let idx = self.index(cylinder, head);
        &self.tracks[idx]
    }

    pub fn track_mut(&mut self, cylinder: u16, head: u8) -> &mut Vec<SimSector> {
        let idx = self.index(cylinder, head);
        &mut self.tracks[idx]
    }

    pub fn sector_mut(&mut self, cylinder: u16, head: u8, sector: u8) -> Option<&mut SimSector> {
        self.track_mut(cylinder, head)
            .iter_mut()
            .find(|s| s.id.sector == sector)
    }
}

/// One write-ID command observed by the bus.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct WriteIdEvent {
    /// Sector whose ID field the offset was measured from.
    pub preceding: u8,
    /// Sector number written in the new ID.
    pub sector: u8,
    /// Byte offset loaded through the nonstandard parameter path.
    pub offset: u16,
}

/// Register-level WD42C22 and drive simulation.
///
/// Commands complete instantly; the monotonic clock advances a fixed tick
/// per observation so every bounded polling loop in the driver makes
/// progress.
pub struct SimBus {
    pub disk: SimDisk,
    regs: [u8; 0x40],
    sram: [u8; BUFFER_SIZE],
    addr_lo: u8,
    addr_hi: u8,
    sram_ptr: usize,
    status: u8,
    error: u8,
    irq: bool,
    seek_done: bool,
    clock_us: u64,

    /// Sector index a scan-ID returns next; advances per scan, reset by a
    /// track format.
    pub rotation: usize,
    /// Pending correction data for the last correctable errored read.
    pending_correction: Option<u16>,
    /// 56-bit ECC polynomial selected by the last set-parameter command.
    ecc56: bool,

    // drive lines
    pub selected: bool,
    pub ready: bool,
    pub write_fault: bool,
    pub cyl_pos: u16,
    pub head_sel: u8,
    dir_forward: bool,

    // observations for assertions
    pub steps_forward: u32,
    pub steps_back: u32,
    pub formats: u32,
    pub sector_writes: u32,
    pub write_id_events: Vec<WriteIdEvent>,
    pub gap_fill: u8,
    pub nonstd_value: Option<u16>,
    pub rwc_line: bool,
    pub precomp_line: bool,
    pub rll_line: bool,
    /// Last value driven on the window-shift line.
    pub window_shift: Option<WindowShift>,
    /// Times the window-shift line was driven, None included.
    pub window_shift_sets: u32,
}

impl SimBus {
    pub fn new(disk: SimDisk) -> SimBus {
        SimBus {
            disk,
            regs: [0u8; 0x40],
            sram: [0u8; BUFFER_SIZE],
            addr_lo: 0,
            addr_hi: 0,
            sram_ptr: 0,
            status: 0,
            error: 0,
            irq: false,
            seek_done: false,
            clock_us: 0,
            rotation: 0,
            pending_correction: None,
            ecc56: false,
            selected: false,
            ready: true,
            write_fault: false,
            cyl_pos: 0,
            head_sel: 0,
            dir_forward: false,
            steps_forward: 0,
            steps_back: 0,
            formats: 0,
            sector_writes: 0,
            write_id_events: Vec::new(),
            gap_fill: 0,
            nonstd_value: None,
            rwc_line: false,
            precomp_line: false,
            rll_line: false,
            window_shift: None,
            window_shift_sets: 0,
        }
    }

    fn track_index(&self) -> usize {
        let c = self.cyl_pos.min(self.disk.cylinders.saturating_sub(1));
        let h = self.head_sel.min(self.disk.heads.saturating_sub(1));
        c as usize * self.disk.heads as usize + h as usize
    }

    fn advance_sram(&mut self) {
        self.sram_ptr = (self.sram_ptr + 1) % BUFFER_SIZE;
    }

    fn task_cylinder(&self) -> u16 {
        u16::from_le_bytes([self.regs[0x24], self.regs[0x25]])
    }

    /// Locate a sector on the current track by the task-file identity:
    /// sector number register plus cylinder and SDH size/head bits.
    fn find_target(&self) -> Option<usize> {
        let number = self.regs[0x23];
        let cylinder = self.task_cylinder();
        let sdh = self.regs[0x26];
        self.disk.tracks[self.track_index()].iter().position(|s| {
            s.id.sector == number
                && s.id.cylinder == cylinder
                && (s.id.sdh.0 & 0x6F) == (sdh & 0x6F)
        })
    }

    fn fail(&mut self, error: u8) {
        self.status |= 0x01; // ERR
        self.error = error;
    }

    fn exec(&mut self, command: u8) {
        self.status = 0x50; // RDY | SC
        self.error = 0;

        if !self.ready {
            // ERR with READY clear
            self.status = 0x11;
            self.irq = true;
            return;
        }

        match command {
            0x40 => self.cmd_scan_id(),
            0x20 => self.cmd_read_sector(false),
            0x22 => self.cmd_read_sector(true),
            0x24 => self.cmd_verify_track(),
            0x30 => self.cmd_write_sector(),
            0x51 => self.cmd_format_track(),
            0xD3 => self.cmd_format_sector(),
            0xB8 => self.cmd_write_id(),
            0x08 => self.cmd_compute_correction(),
            c if c & 0xF8 == 0x88 => {
                // load parameter block; U selects the nonstandard value in
                // the cylinder registers
                self.gap_fill = self.regs[0x22];
                self.nonstd_value = (c & 0x01 != 0).then(|| self.task_cylinder());
            }
            c if c & 0xF8 == 0x00 => {
                // set parameter: remember the ECC polynomial width, which
                // sizes the check-byte field a long read delivers
                self.ecc56 = c & 0x04 != 0;
            }
            _ => {}
        }
        self.irq = true;
    }

    fn cmd_scan_id(&mut self) {
        let idx = self.track_index();
        if self.disk.tracks[idx].is_empty() {
            // No ID ever arrives: aborted with ID-not-found.
            self.fail(0x14);
            return;
        }
        let len = self.disk.tracks[idx].len();
        let id = self.disk.tracks[idx][self.rotation % len].id;
        self.rotation += 1;

        self.regs[0x24] = id.cylinder as u8;
        self.regs[0x25] = (id.cylinder >> 8) as u8;
        self.regs[0x23] = id.sector;
        self.regs[0x26] = id.sdh.0;
    }

    fn cmd_read_sector(&mut self, long: bool) {
        self.pending_correction = None;
        let Some(pos) = self.find_target() else {
            self.fail(0x10); // IDNF
            return;
        };
        let idx = self.track_index();
        let sector = &self.disk.tracks[idx][pos];
        if sector.id.sdh.is_bad() {
            self.fail(0x80); // bad block mark
            return;
        }

        let mut payload = sector.data.clone();
        if sector.data_error && sector.correctable {
            // The flipped bytes are on the media; every read sees them.
            payload[CORRUPT_OFFSET] ^= CORRUPT_MASK;
            payload[CORRUPT_OFFSET + 1] ^= CORRUPT_MASK;
        }

        if long {
            // L=1: the data field passes through unchecked, followed by the
            // raw check bytes. Field width per the task-file ECC flag and
            // the selected polynomial.
            let count = if self.regs[0x26] & 0x80 == 0 {
                2
            } else if self.ecc56 {
                7
            } else {
                4
            };
            let check = check_bytes_for(&payload, count);
            let len = payload.len();
            self.sram[..len].copy_from_slice(&payload);
            self.sram[len..len + count].copy_from_slice(&check);
            return;
        }

        if sector.data_error {
            if sector.correctable {
                self.pending_correction = Some(CORRUPT_OFFSET as u16);
            }
            self.fail(0x40); // data error
        }
        self.sram[..payload.len()].copy_from_slice(&payload);
    }

    fn cmd_verify_track(&mut self) {
        let idx = self.track_index();
        if self.disk.tracks[idx].is_empty() {
            self.fail(0x10);
        } else if self.disk.tracks[idx].iter().any(|s| s.data_error) {
            self.fail(0x40);
        }
    }

    fn cmd_write_sector(&mut self) {
        let Some(pos) = self.find_target() else {
            self.fail(0x10);
            return;
        };
        let idx = self.track_index();
        if self.disk.tracks[idx][pos].id.sdh.is_bad() {
            self.fail(0x80);
            return;
        }
        let size = self.disk.tracks[idx][pos].data.len();
        self.disk.tracks[idx][pos].data.copy_from_slice(&self.sram[..size]);
        self.disk.tracks[idx][pos].data_error = false;
        self.disk.tracks[idx][pos].correctable = false;
        self.sector_writes += 1;
    }

    fn cmd_format_track(&mut self) {
        let spt = self.regs[0x22] as usize;
        let cylinder = self.task_cylinder();
        let sdh = Sdh(self.regs[0x26]);
        let size = sdh.sector_size();
        let head = sdh.0 & 0x0F;

        let mut track = Vec::with_capacity(spt);
        for slot in 0..spt {
            let flag = self.sram[slot * 2];
            let number = self.sram[slot * 2 + 1];
            track.push(SimSector {
                id: SectorId {
                    cylinder,
                    sector: number,
                    sdh: Sdh::new(size, head, flag & 0x80 != 0),
                },
                // data fields initialize to 0xFF, per the datasheet
                data: vec![0xFF; size as usize],
                data_error: false,
                correctable: false,
            });
        }
        let idx = self.track_index();
        self.disk.tracks[idx] = track;
        self.rotation = 0;
        self.formats += 1;
    }

    fn cmd_format_sector(&mut self) {
        let flag = self.sram[0];
        let number = self.sram[1];
        let idx = self.track_index();
        let Some(sector) = self.disk.tracks[idx].iter_mut().find(|s| s.id.sector == number)
        else {
            self.fail(0x10);
            return;
        };
        let bad = flag & 0x80 != 0;
        sector.id.sdh = if bad {
            sector.id.sdh.with_bad()
        } else {
            Sdh(sector.id.sdh.0 & !Sdh::BAD_BLOCK)
        };
        sector.data.fill(0xFF);
        sector.data_error = false;
        sector.correctable = false;
        self.formats += 1;
    }

    fn cmd_write_id(&mut self) {
        // 5-byte ID image staged at the tail of the buffer:
        // [preceding, ident, cyl lo, sdh, sector]
        let preceding = self.sram[BUFFER_SIZE - 5];
        let staged_sdh = Sdh(self.sram[BUFFER_SIZE - 2]);
        let number = self.sram[BUFFER_SIZE - 1];
        let offset = self.nonstd_value.unwrap_or(0);

        let idx = self.track_index();
        let Some(sector) = self.disk.tracks[idx].iter_mut().find(|s| s.id.sector == number)
        else {
            self.fail(0x10);
            return;
        };
        sector.id.sdh = staged_sdh;
        self.write_id_events.push(WriteIdEvent {
            preceding,
            sector: number,
            offset,
        });
    }

    fn cmd_compute_correction(&mut self) {
        match self.pending_correction {
            Some(location) => {
                // Scratch block: 7 syndrome bytes, BE location, pattern.
                let base = BUFFER_SIZE - 16;
                self.sram[base..].fill(0);
                self.sram[base + 7] = (location >> 8) as u8;
                self.sram[base + 8] = location as u8;
                // Pattern shaped so the driver's spanning-byte fold restores
                // both corrupted bytes.
                self.sram[base + 10] = CORRUPT_MASK;
            }
            None => self.fail(0x40), // uncorrectable
        }
    }
}

impl ControllerBus for SimBus {
    fn read_register(&mut self, reg: u8) -> u8 {
        match reg {
            0x21 => self.error,
            0x27 => self.status,
            0x36 => {
                let byte = self.sram[self.sram_ptr];
                self.advance_sram();
                byte
            }
            0x3B => self.regs[0x3B] | if self.write_fault { 0x20 } else { 0 },
            r => self.regs[r as usize & 0x3F],
        }
    }

    fn write_register(&mut self, reg: u8, value: u8) {
        match reg {
            0x27 => self.exec(value),
            0x34 => {
                self.addr_lo = value;
                self.sram_ptr = (usize::from(self.addr_hi) << 8 | usize::from(value)) % BUFFER_SIZE;
            }
            0x35 => {
                self.addr_hi = value;
                self.sram_ptr =
                    (usize::from(value) << 8 | usize::from(self.addr_lo)) % BUFFER_SIZE;
            }
            0x36 => {
                self.sram[self.sram_ptr] = value;
                self.advance_sram();
            }
            r => self.regs[r as usize & 0x3F] = value,
        }
    }

    fn set_drive_select(&mut self, selected: bool) {
        self.selected = selected;
    }

    fn set_head_select(&mut self, head: u8) {
        self.head_sel = head;
    }

    fn set_seek_direction(&mut self, forward: bool) {
        self.dir_forward = forward;
    }

    fn step_pulse(&mut self) {
        if self.dir_forward {
            self.cyl_pos = self.cyl_pos.saturating_add(1);
            self.steps_forward += 1;
        } else {
            self.cyl_pos = self.cyl_pos.saturating_sub(1);
            self.steps_back += 1;
        }
        self.seek_done = true;
    }

    fn pulse_reset(&mut self) {}

    fn set_reduced_write_current(&mut self, active: bool) {
        self.rwc_line = active;
    }

    fn set_write_precomp(&mut self, active: bool) {
        self.precomp_line = active;
    }

    fn set_rll_encoding(&mut self, rll: bool) {
        self.rll_line = rll;
    }

    fn set_window_shift(&mut self, shift: Option<WindowShift>) {
        self.window_shift = shift;
        self.window_shift_sets += 1;
    }

    fn drive_ready(&mut self) -> bool {
        self.ready
    }

    fn at_track0(&mut self) -> bool {
        self.cyl_pos == 0
    }

    fn seek_complete(&mut self) -> bool {
        self.seek_done
    }

    fn clear_seek_complete(&mut self) {
        self.seek_done = false;
    }

    fn command_interrupt(&mut self) -> bool {
        self.irq
    }

    fn clear_command_interrupt(&mut self) {
        self.irq = false;
    }

    fn delay(&mut self, d: Duration) {
        self.clock_us += d.as_micros() as u64;
    }

    fn now(&mut self) -> Duration {
        // A fixed tick per observation keeps bounded polling loops moving.
        self.clock_us += 25;
        Duration::from_micros(self.clock_us)
    }
}

/// Check bytes the simulation appends to a long-mode read: a fold of the
/// payload, salted per position so the field is recognizable end to end.
pub fn check_bytes_for(payload: &[u8], count: usize) -> Vec<u8> {
    let fold = payload.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    (0..count).map(|i| fold ^ i as u8).collect()
}

/// MFM drive with 32-bit ECC and buffered seeks; the common test geometry.
pub fn drive_params(cylinders: u16, heads: u8) -> DriveParameters {
    DriveParameters {
        encoding: EncodingMode::Mfm,
        verify_mode: VerifyMode::Ecc32,
        cylinders,
        heads,
        seek_mode: SeekMode::Buffered,
        ..Default::default()
    }
}

/// A ready-to-use controller over a freshly formatted simulated disk.
pub fn formatted_drive(cylinders: u16, heads: u8, spt: u8, size: u16) -> Wd42c22<SimBus> {
    let bus = SimBus::new(SimDisk::formatted(cylinders, heads, spt, size));
    let mut wdc = Wd42c22::new(bus, drive_params(cylinders, heads));
    wdc.select_drive(true);
    wdc
}
