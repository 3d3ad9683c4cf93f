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

//! Stream-to-disk direction of the WDI engine: [`WriteTransfer`] parses
//! incoming transport packets and reproduces the image on the drive, one
//! [`WriteTransfer::consume_packet`] call per packet.
//!
//! Each track is formatted in one pass from the image's sector map, which
//! initializes every data field to 0xFF, and the sector payloads are then
//! written individually. The parser is resumable at any byte, so a packet
//! boundary can fall inside any record.

use crate::{
    chs::DiskCh,
    controller::{bus::ControllerBus, BufferDirection, Wd42c22},
    image::{check_packet_size, ImageError, PacketReader, SectorClass, TransferStats},
    params::{self, PARAM_BLOCK_SIZE},
    sector_id::SectorId,
    ASCII_EOF, WDI_MAGIC,
};

/// What to do with sectors the image recorded as unreadable. The track
/// format already leaves them present and empty; they can additionally be
/// flagged bad in their IDs.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum BadSectorPolicy {
    #[default]
    LeaveEmpty,
    MarkBad,
}

/// What to do with sectors whose recorded data failed its CRC/ECC check.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum DataErrorPolicy {
    /// Skip the payload, leaving the freshly formatted contents.
    #[default]
    LeaveEmpty,
    /// Skip the payload and flag the sector bad.
    MarkBad,
    /// Write the payload as if it were good data.
    WriteData,
}

#[derive(Copy, Clone, Debug, Default)]
pub struct WriteOptions {
    /// Replace the live drive parameters with the ones in the image.
    pub override_params: bool,
    pub bad_sectors: BadSectorPolicy,
    pub data_errors: DataErrorPolicy,
}

/// Which record of the stream is currently being parsed.
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

/// Writes a WDI image stream back onto a disk.
///
/// Construction seeks to cylinder 0; each
/// [`consume_packet`](WriteTransfer::consume_packet) call then parses one
/// packet and performs the disk work it calls for. `Ok(true)` asks for the
/// next packet, `Ok(false)` means the stream's EOF padding was reached and
/// the transfer is complete. Errors are fatal to the transfer.
pub struct WriteTransfer<'a, B: ControllerBus> {
    wdc: &'a mut Wd42c22<B>,
    options: WriteOptions,
    phase: Phase,
    started: bool,
    block: [u8; PARAM_BLOCK_SIZE],
    block_pos: usize,
    /// Physical position of the track being restored.
    cylinder: u16,
    cyl_pos: usize,
    head: u8,
    spt: u8,
    /// Raw sector map bytes, 4 per sector, accumulated across packets.
    map_raw: Vec<u8>,
    map: Vec<SectorId>,
    sector_idx: usize,
    class: SectorClass,
    compressed: bool,
    class_seen: bool,
    data_pos: usize,
    sector_size: u16,
    /// Live partial window says this track's data is parsed but discarded.
    skip_track: bool,
    stats: TransferStats,
}

impl<'a, B: ControllerBus> WriteTransfer<'a, B> {
    /// Begin a restore run, seeking to cylinder 0.
    pub fn new(
        wdc: &'a mut Wd42c22<B>,
        options: WriteOptions,
    ) -> Result<WriteTransfer<'a, B>, ImageError> {
        wdc.seek(DiskCh::new(0, 0))?;
        log::debug!("write transfer: starting, options {options:?}");

        Ok(WriteTransfer {
            wdc,
            options,
            phase: Phase::Header,
            started: false,
            block: [0u8; PARAM_BLOCK_SIZE],
            block_pos: 0,
            cylinder: 0,
            cyl_pos: 0,
            head: 0,
            spt: 0,
            map_raw: Vec::new(),
            map: Vec::new(),
            sector_idx: 0,
            class: SectorClass::Unreadable,
            compressed: false,
            class_seen: false,
            data_pos: 0,
            sector_size: 0,
            skip_track: false,
            stats: TransferStats::default(),
        })
    }

    pub fn stats(&self) -> TransferStats {
        self.stats
    }

    pub fn is_complete(&self) -> bool {
        self.phase == Phase::Finished
    }

    /// Parse the next packet of the stream and apply it to the disk.
    pub fn consume_packet(&mut self, packet: &[u8]) -> Result<bool, ImageError> {
        check_packet_size(packet.len())?;
        if self.phase == Phase::Finished {
            return Ok(false);
        }
        let mut rd = PacketReader::new(packet);

        if !self.started {
            if rd.remaining()[..4] != WDI_MAGIC[..] {
                return Err(ImageError::BadHeader);
            }
            rd.skip(4);
            self.started = true;
        }

        loop {
            match self.phase {
                // The header is free text; skip to its EOF terminator.
                Phase::Header => loop {
                    let Some(byte) = rd.take() else { return Ok(true) };
                    if byte == ASCII_EOF {
                        self.phase = Phase::Params;
                        break;
                    }
                },

                Phase::Params => {
                    while self.block_pos < PARAM_BLOCK_SIZE {
                        let Some(byte) = rd.take() else { return Ok(true) };
                        self.block[self.block_pos] = byte;
                        self.block_pos += 1;
                    }

                    let incoming = params::validate_image_block(
                        &self.block,
                        self.wdc.params(),
                        self.options.override_params,
                    )?;
                    if self.options.override_params {
                        self.wdc.set_params(&incoming);
                        self.wdc.apply_params()?;
                    }
                    self.phase = Phase::Cylinder;
                }

                Phase::Cylinder => {
                    if self.cyl_pos == 0 {
                        let Some(lsb) = rd.take() else { return Ok(true) };
                        self.cylinder = lsb as u16;
                        self.cyl_pos = 1;
                    }
                    let Some(msb) = rd.take() else { return Ok(true) };
                    if msb == ASCII_EOF {
                        // EOF padding in place of a track: the stream is over.
                        log::debug!("write transfer: complete, {:?}", self.stats);
                        self.phase = Phase::Finished;
                        return Ok(false);
                    }
                    self.cylinder |= (msb as u16) << 8;
                    self.cyl_pos = 0;

                    if self.cylinder >= self.wdc.params().cylinders {
                        return Err(ImageError::CylinderOutOfRange);
                    }
                    self.phase = Phase::Head;
                }

                Phase::Head => {
                    let Some(head) = rd.take() else { return Ok(true) };
                    if head >= self.wdc.params().heads {
                        return Err(ImageError::HeadOutOfRange);
                    }
                    self.head = head;
                    self.phase = Phase::Spt;
                }

                Phase::Spt => {
                    let Some(spt) = rd.take() else { return Ok(true) };
                    self.spt = spt;
                    if spt == 0 {
                        // The track carried no sectors when imaged; nothing
                        // to restore.
                        self.stats.unreadable_tracks += 1;
                        self.phase = Phase::Cylinder;
                        continue;
                    }

                    let p = self.wdc.params();
                    self.skip_track = p.partial_image
                        && (self.cylinder < p.partial_start || self.cylinder > p.partial_end);
                    self.map_raw.clear();
                    self.map.clear();
                    self.phase = Phase::Map;
                }

                Phase::Map => {
                    let total = self.spt as usize * 4;
                    while self.map_raw.len() < total {
                        let Some(byte) = rd.take() else { return Ok(true) };
                        self.map_raw.push(byte);
                    }

                    self.map = self
                        .map_raw
                        .chunks_exact(4)
                        .map(|c| SectorId::from_wire([c[0], c[1], c[2], c[3]]))
                        .collect();
                    self.sector_size = self.map[0].sector_size();
                    self.sector_idx = 0;
                    self.class_seen = false;
                    self.data_pos = 0;

                    if !self.skip_track {
                        self.format_current_track()?;
                    }
                    self.phase = Phase::Sectors;
                }

                Phase::Sectors => {
                    while self.sector_idx < self.spt as usize {
                        if !self.class_seen {
                            let Some(byte) = rd.take() else { return Ok(true) };
                            let (class, compressed) = SectorClass::from_wire(byte)?;
                            if class == SectorClass::Unreadable && compressed {
                                return Err(ImageError::BadSectorClass);
                            }
                            self.class = class;
                            self.compressed = compressed;
                            self.class_seen = true;
                            self.data_pos = 0;
                        }

                        let id = self.map[self.sector_idx];

                        if self.class == SectorClass::Unreadable {
                            // No payload; the format already left it empty.
                            if !self.skip_track {
                                self.stats.bad_blocks += 1;
                                if self.options.bad_sectors == BadSectorPolicy::MarkBad {
                                    self.mark_bad(id)?;
                                }
                            }
                            self.sector_idx += 1;
                            self.class_seen = false;
                            continue;
                        }

                        if self.skip_track {
                            // Outside the live partial window: parse the
                            // payload but touch nothing.
                            if self.compressed {
                                let Some(_) = rd.take() else { return Ok(true) };
                            } else {
                                while self.data_pos < self.sector_size as usize {
                                    let Some(_) = rd.take() else { return Ok(true) };
                                    self.data_pos += 1;
                                }
                            }
                            self.data_pos = 0;
                            self.sector_idx += 1;
                            self.class_seen = false;
                            continue;
                        }

                        let is_data_error = self.class == SectorClass::DataError;
                        let (mut skip_write, mark_bad) = if is_data_error {
                            match self.options.data_errors {
                                DataErrorPolicy::LeaveEmpty => (true, false),
                                DataErrorPolicy::MarkBad => (true, true),
                                DataErrorPolicy::WriteData => (false, false),
                            }
                        } else {
                            (false, false)
                        };

                        if self.compressed {
                            let Some(fill) = rd.take() else { return Ok(true) };
                            // Formatting initializes every data field to
                            // 0xFF, so that payload is already on disk.
                            if fill == 0xFF {
                                skip_write = true;
                            }
                            if !skip_write {
                                self.wdc.buffer_begin(BufferDirection::Write, 0);
                                for _ in 0..self.sector_size {
                                    self.wdc.buffer_write(fill);
                                }
                                self.wdc.buffer_finish();
                            }
                        } else {
                            if self.data_pos == 0 && !skip_write {
                                self.wdc.buffer_begin(BufferDirection::Write, 0);
                            }
                            while self.data_pos < self.sector_size as usize {
                                let Some(byte) = rd.take() else { return Ok(true) };
                                if !skip_write {
                                    self.wdc.buffer_write(byte);
                                }
                                self.data_pos += 1;
                            }
                            if !skip_write {
                                self.wdc.buffer_finish();
                            }
                        }

                        if !skip_write {
                            let chs =
                                DiskCh::new(id.cylinder, id.sdh.head(self.wdc.four_bit_heads()));
                            match self.wdc.write_sector(id.sector, self.sector_size, Some(chs)) {
                                Ok(()) => {}
                                Err(e) if e.is_hard() => return Err(e.into()),
                                Err(e) => {
                                    log::warn!(
                                        "write transfer: sector {} at {chs}: {e}",
                                        id.sector
                                    );
                                }
                            }
                        }
                        if mark_bad {
                            self.mark_bad(id)?;
                        }
                        // Counted once per sector, after every resumption
                        // point above.
                        if is_data_error {
                            self.stats.data_errors += 1;
                        }

                        self.data_pos = 0;
                        self.sector_idx += 1;
                        self.class_seen = false;
                    }

                    self.phase = Phase::Cylinder;
                }

                Phase::Finished => return Ok(false),
            }
        }
    }

    /// Check the track's map for uniform size and logical identity, then
    /// format it in the image's arrival order.
    ///
    /// The format command stamps one logical cylinder, head and size from
    /// its task registers across the whole track, so a map that varies in
    /// any of them cannot be reproduced without risking data loss through
    /// per-ID rewrites, and is rejected before anything destructive happens.
    fn format_current_track(&mut self) -> Result<(), ImageError> {
        let reference = self.map[0];
        let four_bit = self.wdc.four_bit_heads();
        let logical_head = reference.sdh.head(four_bit);

        for id in &self.map[1..] {
            if !id.sdh.same_size(reference.sdh) {
                return Err(ImageError::MixedSectorSizes);
            }
            if id.cylinder != reference.cylinder || id.sdh.head(four_bit) != logical_head {
                return Err(ImageError::MixedSectorIds);
            }
        }

        // Stage the format table: every slot marked good, logical numbers in
        // the image's arrival order. Bad sectors are flagged afterwards,
        // once their status bytes arrive.
        self.wdc.buffer_begin(BufferDirection::Write, 0);
        for id in &self.map {
            self.wdc.buffer_write(0);
            self.wdc.buffer_write(id.sector);
        }
        self.wdc.buffer_finish();

        self.wdc.seek(DiskCh::new(self.cylinder, self.head))?;

        let chs = DiskCh::new(reference.cylinder, logical_head);
        self.wdc.format_track(self.spt, self.sector_size, Some(chs))?;
        Ok(())
    }

    /// Flag one sector bad in its ID, tolerating soft faults: a sector that
    /// cannot be marked is left as formatted.
    fn mark_bad(&mut self, id: SectorId) -> Result<(), ImageError> {
        let chs = DiskCh::new(id.cylinder, id.sdh.head(self.wdc.four_bit_heads()));
        match self.wdc.set_bad_sector(id.sector, Some(chs)) {
            Ok(()) => Ok(()),
            Err(e) if e.is_hard() => Err(e.into()),
            Err(e) => {
                log::warn!("write transfer: marking sector {} bad at {chs}: {e}", id.sector);
                Ok(())
            }
        }
    }
}

impl<B: ControllerBus> Drop for WriteTransfer<'_, B> {
    fn drop(&mut self) {
        // An aborted transfer can leave the buffer window open mid-payload.
        if self.wdc.buffer_is_open() {
            self.wdc.buffer_finish();
        }
    }
}
