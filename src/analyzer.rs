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

//! The `analyzer` module reconstructs per-track sector geometry from raw ID
//! scans: sectors per track, interleave order, and warnings about tracks
//! whose logical addressing diverges from the physical position.
//!
//! A scan table is inherently noisy. Probes land at arbitrary rotational
//! positions, an ID can fail its CRC and leave a gap, and the table covers
//! several revolutions, so every quantity here is inferred from repetition
//! rather than read off directly.

use crate::{
    controller::{bus::ControllerBus, ControllerError, Wd42c22},
    sector_id::{Sdh, SectorsTable},
};

/// Independent scan attempts before giving up on a clean table.
const MAX_SCAN_ATTEMPTS: usize = 5;

/// The result of analyzing one track's ID scans.
///
/// `sectors_per_track == 0` marks the track unreadable: not a single valid
/// sector ID could be collected.
#[derive(Clone, Debug, Default)]
pub struct TrackScan {
    /// The winning scan table, in physical arrival order.
    pub table: SectorsTable,
    pub sectors_per_track: u8,
    /// Some ID carried a cylinder number other than the physical cylinder.
    pub cylinder_mismatch: bool,
    /// Some ID carried a head number other than the physical head.
    pub head_mismatch: bool,
    /// Sector size codes vary within the track.
    pub variable_size: bool,
}

impl TrackScan {
    pub fn is_unreadable(&self) -> bool {
        self.sectors_per_track == 0
    }
}

/// Scan the track under the heads and infer its sector count.
///
/// Up to [`MAX_SCAN_ATTEMPTS`] tables are collected. For each, the *observed*
/// count is the number of entries until the first logical sector number
/// repeats, and the *maximum* is the highest logical sector value seen, plus
/// one if sector number 0 appears. A gap-free attempt (`observed == maximum`)
/// is accepted immediately; otherwise the attempt with the largest observed
/// count wins. Mismatch flags accumulate across all attempts inspected.
///
/// Hard faults propagate; a track yielding no valid ID at all comes back as
/// an unreadable [`TrackScan`], which is an ordinary per-track outcome.
pub fn scan_track<B: ControllerBus>(
    wdc: &mut Wd42c22<B>,
) -> Result<TrackScan, ControllerError> {
    let position = wdc.position();
    let four_bit = wdc.four_bit_heads();

    // Reference SDH for the variable-size check, retrying soft scan errors.
    let mut reference: Option<Sdh> = None;
    for _ in 0..MAX_SCAN_ATTEMPTS {
        match wdc.scan_id() {
            Ok(id) => {
                reference = Some(id.sdh);
                break;
            }
            Err(e) if e.is_hard() => return Err(e),
            Err(_) => {}
        }
    }
    let Some(reference) = reference else {
        log::debug!("scan_track: no valid sector ID at {position}");
        return Ok(TrackScan::default());
    };

    let mut scan = TrackScan::default();
    let mut best_observed = 0u8;

    for attempt in 0..MAX_SCAN_ATTEMPTS {
        let table = wdc.fill_sectors_table();

        let mut observed = 0u8;
        let mut maximum = 0u8;
        let mut first_seen: Option<u8> = None;
        let mut counting = false;
        let mut zero_seen = false;

        for id in table.iter().flatten() {
            zero_seen |= id.sector == 0;

            if !scan.cylinder_mismatch {
                scan.cylinder_mismatch = id.cylinder != position.c();
            }
            if !scan.head_mismatch {
                scan.head_mismatch = if four_bit {
                    id.sdh.head(true) != position.h()
                } else {
                    id.sdh.head(false) != (position.h() & Sdh::HEAD_MASK_3BIT)
                };
            }
            if !scan.variable_size {
                scan.variable_size = !id.sdh.same_size(reference);
            }

            match first_seen {
                None => {
                    first_seen = Some(id.sector);
                    counting = true;
                }
                Some(first) if first == id.sector => counting = false,
                _ => {}
            }
            if counting {
                observed += 1;
            }
            maximum = maximum.max(id.sector);
        }

        if zero_seen {
            maximum = maximum.saturating_add(1);
        }
        // An observed run longer than the value range means the run never
        // cycled; clamp it.
        observed = observed.min(maximum);

        if observed == maximum && observed > 0 {
            log::trace!("scan_track: attempt {attempt} gap-free, {observed} sectors at {position}");
            scan.table = table;
            scan.sectors_per_track = observed;
            return Ok(scan);
        }
        if observed > best_observed {
            best_observed = observed;
            scan.table = table;
            scan.sectors_per_track = observed;
        }
    }

    log::debug!(
        "scan_track: no gap-free attempt at {position}, best observed {}",
        scan.sectors_per_track
    );
    Ok(scan)
}

/// Infer the interleave skip factor from a scan table.
///
/// Returns `(interleave, known)`. With fewer than 3 sectors the notion is
/// vacuous and the result is declared sequential. Otherwise: locate the
/// lowest logical sector; if the next populated slot holds its successor the
/// track is sequential; otherwise count slots until the successor appears and
/// cross-check that advancing by the same count again lands on the following
/// sector or wraps to the start. Inconsistency falls back to `(1, false)`,
/// which is informational only.
pub fn compute_interleave(table: &SectorsTable, sectors_per_track: u8) -> (u8, bool) {
    if sectors_per_track < 3 {
        return (1, true);
    }

    let mut start: Option<(u8, usize)> = None;
    for (slot, entry) in table.iter().enumerate() {
        if let Some(id) = entry {
            if start.is_none_or(|(lowest, _)| id.sector < lowest) {
                start = Some((id.sector, slot));
            }
        }
    }
    let Some((start_sector, start_slot)) = start else {
        return (1, false);
    };

    // Next populated slot after the start.
    let mut idx = start_slot + 1;
    let mut next_sector = 0u8;
    while idx < table.len() {
        if let Some(id) = table[idx] {
            next_sector = id.sector;
            break;
        }
        idx += 1;
    }

    if idx < table.len() {
        if next_sector > start_sector && next_sector - start_sector == 1 {
            return (1, true);
        }

        // Count slots from here until the start's successor shows up. A gap
        // counts as a slot; it occupied one rotational position.
        let successor = start_sector.wrapping_add(1);
        let mut interleave = 1u8;
        let mut idx2 = idx;
        while idx2 < table.len() {
            let matched = table[idx2].is_some_and(|id| id.sector == successor);
            idx2 += 1;
            if matched {
                break;
            }
            interleave = interleave.saturating_add(1);
        }

        // Cross-check: the same advance from the next sector's slot must land
        // on its own successor, or wrap around to the start sector.
        let check = idx + interleave as usize;
        if check < table.len() && interleave < sectors_per_track {
            if let Some(id) = table[check] {
                if id.sector == next_sector.wrapping_add(1) || id.sector == start_sector {
                    return (interleave, true);
                }
            }
        }
    }

    (1, false)
}

/// Resolve the starting logical sector for imaging purposes.
///
/// Logical numbering need not begin at 0, so probe candidate start values
/// upward until one is present in the table. Returns the slot index and the
/// sector number, or `None` when no candidate up to 255 appears — the track
/// is then unreadable for imaging, which is not a hard fault.
pub fn find_starting_slot(table: &SectorsTable) -> Option<(usize, u8)> {
    for start in 0..=u8::MAX {
        if let Some(slot) = table
            .iter()
            .position(|entry| entry.is_some_and(|id| id.sector == start))
        {
            return Some((slot, start));
        }
    }
    None
}

/// Walk the scan table from `start_slot` and produce the slot indices of the
/// first `sectors_per_track` sectors in physical arrival order.
///
/// Unobserved slots are skipped. Running off the end of the table resumes by
/// searching from the beginning for the most recently visited logical sector
/// (walking the sector number forward through any gaps) and continuing after
/// it. A table too torn to resync on yields `None`; callers treat the track
/// as unreadable.
pub fn arrival_order(
    table: &SectorsTable,
    sectors_per_track: u8,
    start_slot: usize,
) -> Option<Vec<usize>> {
    let want = sectors_per_track as usize;
    let mut order = Vec::with_capacity(want);
    let mut idx = start_slot;
    let mut current_sector: Option<u8> = None;
    let mut wraps = 0usize;

    while order.len() < want {
        if idx >= table.len() {
            // One resync per emitted sector is already generous; more means
            // the table cannot cover the track.
            wraps += 1;
            if wraps > want {
                return None;
            }

            let mut seek = current_sector?;
            let found = loop {
                if let Some(slot) = table
                    .iter()
                    .position(|entry| entry.is_some_and(|id| id.sector == seek))
                {
                    break slot;
                }
                seek = seek.checked_add(1)?;
            };

            idx = found + 1;
            if idx >= table.len() {
                idx = 0;
            }
            continue;
        }

        if let Some(id) = table[idx] {
            order.push(idx);
            current_sector = Some(id.sector);
        }
        idx += 1;
    }
    Some(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sector_id::{Sdh, SectorId};

    fn entry(sector: u8) -> Option<SectorId> {
        Some(SectorId {
            cylinder: 0,
            sector,
            sdh: Sdh::new(512, 0, false),
        })
    }

    /// A scan table of `revolutions` passes over a track laid out by placing
    /// logical sector i at physical slot (i * skip) mod spt.
    fn interleaved_table(spt: u8, skip: u8, revolutions: usize) -> SectorsTable {
        let mut layout = vec![0u8; spt as usize];
        for i in 0..spt {
            layout[(i as usize * skip as usize) % spt as usize] = i;
        }
        let mut table = SectorsTable::new();
        for _ in 0..revolutions {
            table.extend(layout.iter().map(|&s| entry(s)));
        }
        table
    }

    #[test]
    fn interleave_sequential() {
        let table = interleaved_table(17, 1, 3);
        assert_eq!(compute_interleave(&table, 17), (1, true));
    }

    #[test]
    fn interleave_known_skip() {
        // i*k mod spt layouts for k coprime with spt.
        for (spt, skip) in [(5u8, 2u8), (5, 3), (5, 4), (17, 3), (17, 5), (9, 4)] {
            let table = interleaved_table(spt, skip, 3);
            assert_eq!(
                compute_interleave(&table, spt),
                (skip, true),
                "spt {spt} skip {skip}"
            );
        }
    }

    #[test]
    fn interleave_undefined_below_three_sectors() {
        let table = vec![entry(1), entry(0)];
        assert_eq!(compute_interleave(&table, 2), (1, true));
    }

    #[test]
    fn interleave_inconsistent_falls_back() {
        // Successor spacing does not survive the cross-check: sector 1 sits
        // two slots after 0, but advancing two more lands on 2, not 5 or 0.
        let table = vec![
            entry(0),
            entry(4),
            entry(1),
            entry(2),
            entry(3),
            entry(0),
            entry(4),
            entry(1),
        ];
        assert_eq!(compute_interleave(&table, 5), (1, false));
    }

    #[test]
    fn starting_slot_skips_to_first_present_number() {
        // Numbering starts at 2, and the scan landed mid-track.
        let table = vec![entry(4), entry(5), entry(2), entry(3), entry(4)];
        assert_eq!(find_starting_slot(&table), Some((2, 2)));
    }

    #[test]
    fn starting_slot_none_on_empty_table() {
        let table: SectorsTable = vec![None; 10];
        assert_eq!(find_starting_slot(&table), None);
    }

    #[test]
    fn arrival_order_straight_run() {
        let table = interleaved_table(5, 3, 2);
        let (slot, _) = find_starting_slot(&table).unwrap();
        let order = arrival_order(&table, 5, slot).unwrap();
        let sectors: Vec<u8> = order.iter().map(|&i| table[i].unwrap().sector).collect();
        assert_eq!(sectors, vec![0, 2, 4, 1, 3]);
    }

    #[test]
    fn arrival_order_skips_gaps_and_resyncs() {
        // Start near the table's end so the walk has to wrap and find the
        // last visited sector again from the top.
        let mut table = interleaved_table(5, 1, 2);
        table[7] = None; // a failed probe mid-walk
        let order = arrival_order(&table, 5, 6).unwrap();
        let sectors: Vec<u8> = order.iter().map(|&i| table[i].unwrap().sector).collect();
        assert_eq!(sectors, vec![1, 3, 4, 0, 1]);
    }

    #[test]
    fn arrival_order_gives_up_on_torn_table() {
        let table = vec![entry(7), None, None];
        assert_eq!(arrival_order(&table, 3, 0), None);
    }
}
