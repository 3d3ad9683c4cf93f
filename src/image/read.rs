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

//! Disk-to-stream direction of the WDI engine: [`ReadTransfer`] walks every
//! track in the imaging range and serializes it into fixed-size transport
//! packets, one [`ReadTransfer::fill_packet`] call per packet.
//!
//! The producer is resumable at any byte. Packet boundaries can land in the
//! middle of a sector payload, a map entry or even the two-byte cylinder
//! number; explicit cursors carry the position across calls, and the
//! controller's buffer window is simply left open between them.

use crate::{
    analyzer::{self, arrival_order, find_starting_slot},
    chs::DiskCh,
    controller::{bus::ControllerBus, BufferDirection, ControllerError, ReadOutcome, Wd42c22},
    image::{
        check_packet_size, header::ImageHeader, ImageError, PacketWriter, SectorClass,
        TransferStats, SECTOR_COMPRESSED,
    },
    params::PARAM_BLOCK_SIZE,
    sector_id::SectorId,
    ASCII_EOF,
};

/// Which record of the stream is currently being produced.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Phase {
    Header,
    Params,
    Cylinder,
    Head,
    Spt,
    Map,
    Sectors,
    Finished,
}

/// Streams the contents of a disk out as a WDI image.
///
/// Construction seeks to the first imaged track; each
/// [`fill_packet`](ReadTransfer::fill_packet) call then performs however much
/// disk I/O is needed to produce one more packet. `Ok(true)` means the packet
/// holds data and more may follow (the final data-bearing packet is padded
/// with ASCII EOF); `Ok(false)` means the transfer already completed and the
/// packet holds only padding. Errors are fatal to the transfer.
pub struct ReadTransfer<'a, B: ControllerBus> {
    wdc: &'a mut Wd42c22<B>,
    phase: Phase,
    /// Header text with its EOF terminator.
    header: Vec<u8>,
    header_pos: usize,
    /// Drive parameters snapshotted at construction.
    params_block: [u8; PARAM_BLOCK_SIZE],
    block_pos: usize,
    /// Track currently being serialized.
    ch: DiskCh,
    /// The track's sector IDs in physical arrival order.
    plan: Vec<SectorId>,
    spt: u8,
    /// Index into `plan` for the sector loop.
    cursor: usize,
    /// Byte cursor within the current multi-byte record.
    byte_pos: usize,
    class: u8,
    class_emitted: bool,
    sector_size: u16,
    stats: TransferStats,
}

impl<'a, B: ControllerBus> ReadTransfer<'a, B> {
    /// Begin an imaging run, seeking to the first track of the range.
    pub fn new(
        wdc: &'a mut Wd42c22<B>,
        header: ImageHeader,
    ) -> Result<ReadTransfer<'a, B>, ImageError> {
        let params_block = wdc.params().to_block();
        let start = DiskCh::new(wdc.params().first_cylinder(), 0);
        wdc.seek(start)?;
        log::debug!("read transfer: starting at {start}");

        Ok(ReadTransfer {
            wdc,
            phase: Phase::Header,
            header: header.into_stream(),
            header_pos: 0,
            params_block,
            block_pos: 0,
            ch: start,
            plan: Vec::new(),
            spt: 0,
            cursor: 0,
            byte_pos: 0,
            class: 0,
            class_emitted: false,
            sector_size: 0,
            stats: TransferStats::default(),
        })
    }

    pub fn stats(&self) -> TransferStats {
        self.stats
    }

    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Finished
    }

    /// Produce the next packet of the stream.
    pub fn fill_packet(&mut self, packet: &mut [u8]) -> Result<bool, ImageError> {
        check_packet_size(packet.len())?;
        // EOF padding marks where the stream ends inside the final packet.
        packet.fill(ASCII_EOF);

        if self.phase == Phase::Finished {
            return Ok(false);
        }
        let mut out = PacketWriter::new(packet);

        loop {
            match self.phase {
                Phase::Header => {
                    while self.header_pos < self.header.len() {
                        out.push(self.header[self.header_pos]);
                        self.header_pos += 1;
                        if out.is_full() {
                            return Ok(true);
                        }
                    }
                    self.phase = Phase::Params;
                }

                Phase::Params => {
                    while self.block_pos < PARAM_BLOCK_SIZE {
                        out.push(self.params_block[self.block_pos]);
                        self.block_pos += 1;
                        if out.is_full() {
                            return Ok(true);
                        }
                    }
                    self.phase = Phase::Cylinder;
                }

                Phase::Cylinder => {
                    let bytes = self.ch.c().to_le_bytes();
                    while self.byte_pos < 2 {
                        out.push(bytes[self.byte_pos]);
                        self.byte_pos += 1;
                        if out.is_full() {
                            return Ok(true);
                        }
                    }
                    self.byte_pos = 0;
                    self.phase = Phase::Head;
                }

                Phase::Head => {
                    out.push(self.ch.h());
                    self.phase = Phase::Spt;
                    if out.is_full() {
                        return Ok(true);
                    }
                }

                Phase::Spt => {
                    // Scan the track and plan the physical arrival order the
                    // map and the data records both follow.
                    let scan = analyzer::scan_track(self.wdc)?;
                    let mut spt = scan.sectors_per_track;
                    let mut plan = Vec::new();
                    if spt > 0 {
                        match find_starting_slot(&scan.table)
                            .and_then(|(slot, _)| arrival_order(&scan.table, spt, slot))
                        {
                            Some(order) => {
                                plan = order.iter().filter_map(|&slot| scan.table[slot]).collect()
                            }
                            None => spt = 0,
                        }
                    }
                    self.spt = spt;
                    self.plan = plan;
                    self.cursor = 0;
                    self.byte_pos = 0;
                    self.class_emitted = false;

                    out.push(spt);
                    if spt == 0 {
                        log::debug!("read transfer: unreadable track at {}", self.ch);
                        self.stats.unreadable_tracks += 1;
                        self.advance_track()?;
                        if self.phase == Phase::Finished || out.is_full() {
                            return Ok(true);
                        }
                    } else {
                        self.phase = Phase::Map;
                        if out.is_full() {
                            return Ok(true);
                        }
                    }
                }

                Phase::Map => {
                    let total = self.spt as usize * 4;
                    while self.byte_pos < total {
                        let wire = self.plan[self.byte_pos / 4].to_wire();
                        out.push(wire[self.byte_pos % 4]);
                        self.byte_pos += 1;
                        if out.is_full() {
                            return Ok(true);
                        }
                    }
                    self.byte_pos = 0;
                    self.cursor = 0;
                    self.phase = Phase::Sectors;
                }

                Phase::Sectors => {
                    while self.cursor < self.spt as usize {
                        let id = self.plan[self.cursor];

                        if !self.class_emitted {
                            self.sector_size = id.sector_size();
                            let chs =
                                DiskCh::new(id.cylinder, id.sdh.head(self.wdc.four_bit_heads()));

                            let mut class = match self.wdc.read_sector(
                                id.sector,
                                self.sector_size,
                                false,
                                Some(chs),
                            ) {
                                Ok(ReadOutcome::Ok) => SectorClass::Good.to_wire(false),
                                Ok(ReadOutcome::Corrected) => {
                                    self.stats.corrected += 1;
                                    SectorClass::Good.to_wire(false)
                                }
                                Err(e) if e.is_hard() => return Err(e.into()),
                                Err(ControllerError::DataError) => {
                                    self.stats.data_errors += 1;
                                    SectorClass::DataError.to_wire(false)
                                }
                                Err(_) => {
                                    self.stats.bad_blocks += 1;
                                    SectorClass::Unreadable.to_wire(false)
                                }
                            };

                            if class != 0 {
                                // One pass over the buffer decides whether the
                                // payload collapses to a single fill byte.
                                self.wdc.buffer_begin(BufferDirection::Read, 0);
                                let first = self.wdc.buffer_read();
                                let mut uniform = true;
                                for _ in 1..self.sector_size {
                                    if self.wdc.buffer_read() != first {
                                        uniform = false;
                                        break;
                                    }
                                }
                                if uniform {
                                    class |= SECTOR_COMPRESSED;
                                }
                                // Rewind for the data record.
                                self.wdc.buffer_begin(BufferDirection::Read, 0);
                            }

                            self.class = class;
                            self.class_emitted = true;
                            self.byte_pos = 0;
                            out.push(class);
                            if out.is_full() {
                                return Ok(true);
                            }
                        }

                        if self.class & SECTOR_COMPRESSED != 0 {
                            out.push(self.wdc.buffer_read());
                            self.wdc.buffer_finish();
                            self.cursor += 1;
                            self.class_emitted = false;
                            if out.is_full() {
                                return Ok(true);
                            }
                        } else if self.class != 0 {
                            while self.byte_pos < self.sector_size as usize {
                                out.push(self.wdc.buffer_read());
                                self.byte_pos += 1;
                                if out.is_full() {
                                    return Ok(true);
                                }
                            }
                            self.wdc.buffer_finish();
                            self.byte_pos = 0;
                            self.cursor += 1;
                            self.class_emitted = false;
                        } else {
                            // Unreadable sector: the status byte stands alone.
                            self.cursor += 1;
                            self.class_emitted = false;
                        }
                    }

                    self.advance_track()?;
                    if self.phase == Phase::Finished {
                        return Ok(true);
                    }
                }

                Phase::Finished => return Ok(true),
            }
        }
    }

    /// Step to the next track of the imaging range, or finish the transfer
    /// once the range is exhausted.
    fn advance_track(&mut self) -> Result<(), ImageError> {
        let heads = self.wdc.params().heads;
        self.ch = self.ch.next_track(heads);
        self.cursor = 0;
        self.byte_pos = 0;
        self.class_emitted = false;

        if self.wdc.params().past_end(self.ch.c()) {
            log::debug!("read transfer: complete, {:?}", self.stats);
            self.phase = Phase::Finished;
        } else {
            self.phase = Phase::Cylinder;
            self.wdc.seek(self.ch)?;
        }
        Ok(())
    }
}

impl<B: ControllerBus> Drop for ReadTransfer<'_, B> {
    fn drop(&mut self) {
        // An aborted transfer can leave the buffer window open mid-payload.
        if self.wdc.buffer_is_open() {
            self.wdc.buffer_finish();
        }
    }
}
