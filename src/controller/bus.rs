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

//! The `bus` module defines [`ControllerBus`], the seam between the WD42C22
//! driver and the physical world: the multiplexed address/data register bus,
//! the discrete drive control and sense lines, the two interrupt-set flags,
//! and a monotonic clock.
//!
//! Register access carries a strict timing contract that the implementor must
//! honor: the address is latched by toggling ALE around the address phase,
//! data is valid no later than 100 ns after read-enable asserts, and write
//! data requires 50 ns of setup before write-enable deasserts. On a real
//! board these are a handful of instruction cycles; a simulated bus can
//! ignore them entirely.

use std::time::Duration;

/// Data-separator detection window shift, for marginal media.
#[derive(Copy, Clone, Debug, Eq, PartialEq, strum::Display)]
pub enum WindowShift {
    Early,
    Late,
}

/// Hardware access used by [`crate::controller::Wd42c22`].
///
/// The two interrupt flags (`seek_complete`, `command_interrupt`) are set by
/// edge-triggered handlers that touch nothing else; the driver consumes them
/// from bounded polling loops. Implementations only need to make the flags
/// observable from the polling thread.
pub trait ControllerBus {
    /// Read an indexed register over the local microcontroller interface.
    fn read_register(&mut self, reg: u8) -> u8;

    /// Write an indexed register over the local microcontroller interface.
    ///
    /// A write that flips the buffer direction bit (DRWB in the BCR) needs
    /// one write-clock cycle of settle before the next register access;
    /// hardware implementations absorb that settle here. A simulated bus can
    /// ignore it.
    fn write_register(&mut self, reg: u8, value: u8);

    /// Assert or release the DS0 drive-select line.
    fn set_drive_select(&mut self, selected: bool);

    /// Drive the HDSEL0..3 head-select lines.
    fn set_head_select(&mut self, head: u8);

    /// Drive the seek DIRECTION line; `forward` steps toward higher cylinders.
    /// A direction change needs one settle cycle before the next step pulse.
    fn set_seek_direction(&mut self, forward: bool);

    /// Issue one STEP pulse, 3 µs nominal width.
    fn step_pulse(&mut self);

    /// Pulse the controller's /RESET line low for at least 24 write-clock
    /// periods.
    fn pulse_reset(&mut self);

    /// Drive the reduced-write-current line (shared with HDSEL3 on drives
    /// with 8 or fewer heads).
    fn set_reduced_write_current(&mut self, active: bool);

    /// Drive the WPCEN write-precompensation line to the data separator.
    fn set_write_precomp(&mut self, active: bool);

    /// Drive the RLL/MFM encoding strap to the data separator.
    fn set_rll_encoding(&mut self, rll: bool);

    /// Shift the data-separator detection window, or release the line to
    /// high impedance with `None`.
    fn set_window_shift(&mut self, shift: Option<WindowShift>);

    /// Sense the drive /READY line (true when asserted).
    fn drive_ready(&mut self) -> bool;

    /// Sense the drive /TRK0 line (true when the heads sit over cylinder 0).
    fn at_track0(&mut self) -> bool;

    /// Seek-complete flag, set on the drive's /SC edge.
    fn seek_complete(&mut self) -> bool;
    fn clear_seek_complete(&mut self);

    /// Controller command-complete flag, set on the /MCINT falling edge.
    fn command_interrupt(&mut self) -> bool;
    fn clear_command_interrupt(&mut self);

    /// Busy-wait for at least `d`.
    fn delay(&mut self, d: Duration);

    /// Monotonic clock. Only differences are meaningful.
    fn now(&mut self) -> Duration;
}

/// A point on the bus's monotonic clock after which an operation has timed
/// out. Replaces the firmware's decrementing busy-wait counters with the
/// same semantics.
#[derive(Copy, Clone, Debug)]
pub struct Deadline {
    at: Duration,
}

impl Deadline {
    pub fn after<B: ControllerBus + ?Sized>(bus: &mut B, timeout: Duration) -> Deadline {
        Deadline {
            at: bus.now() + timeout,
        }
    }

    pub fn expired<B: ControllerBus + ?Sized>(&self, bus: &mut B) -> bool {
        bus.now() >= self.at
    }
}
