//! Protocol time base and per-bus timing configuration.
//!
//! Everything on the wire is derived from the 60 us timeslot, subdivided
//! into 15 us quarters. Quarters are the granularity used for presence
//! measurement; plain microsecond values cover the lead-in, settle and
//! recovery paddings inside a slot.

use embedded_hal::delay::DelayNs;

/// One bit time on the wire, in microseconds.
pub const TIMESLOT_US: u32 = 60;

/// A quarter of a timeslot, the presence measurement granularity.
pub const QUARTER_TIMESLOT_US: u32 = TIMESLOT_US / 4;

pub(crate) fn delay_quarters(delay: &mut impl DelayNs, quarters: u32) {
    delay.delay_us(quarters * QUARTER_TIMESLOT_US);
}

pub(crate) fn delay_timeslots(delay: &mut impl DelayNs, slots: u32) {
    delay_quarters(delay, slots * 4);
}

/// Timing limits and paddings for one bus.
///
/// How quickly a released line floats back up depends on the pull-up, so
/// the acceptance windows are configuration rather than constants. Two
/// profiles are provided; [`Timing::internal_pullup`] is the default and
/// the right choice for the weak pull-up inside most MCUs. Individual
/// fields can be adjusted afterwards for an unusual electrical setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Timing {
    /// Reset pulse length, in timeslots.
    pub reset_low_slots: u8,
    /// How many 1 us polls to allow for the released line to float up
    /// before the line is declared stuck.
    pub rise_poll_limit: u16,
    /// Longest acceptable high period between line release and the start
    /// of a presence pulse, in quarter-timeslots.
    pub presence_high_max_quarters: u16,
    /// Longest acceptable presence pulse, in quarter-timeslots.
    pub presence_low_max_quarters: u16,
    /// Shortest acceptable presence pulse, in quarter-timeslots.
    pub presence_low_min_quarters: u16,
    /// Idle time devices are guaranteed after a reset before the first
    /// command bit, in timeslots.
    pub reset_recovery_slots: u8,
    /// Low lead-in of a write slot, us. The line level at the end of this
    /// window is what devices latch.
    pub write_low_us: u32,
    /// Recovery after a write slot, us.
    pub write_recovery_us: u32,
    /// Low lead-in that opens a read slot, us.
    pub read_low_us: u32,
    /// Settle time between releasing the line and sampling it, us.
    pub read_settle_us: u32,
    /// Recovery after a read slot, us.
    pub read_recovery_us: u32,
}

impl Timing {
    /// Relaxed profile for a line held up only by the MCU's internal
    /// pull-up. Rise times are slow, so the presence windows are generous
    /// and every slot gets extra recovery.
    pub const fn internal_pullup() -> Self {
        Self {
            reset_low_slots: 10,
            rise_poll_limit: 200,
            presence_high_max_quarters: 90,
            presence_low_max_quarters: 90,
            presence_low_min_quarters: 3,
            reset_recovery_slots: 8,
            write_low_us: 7,
            write_recovery_us: 20,
            read_low_us: 5,
            read_settle_us: 5,
            read_recovery_us: 10,
        }
    }

    /// Tight profile for a strong discrete pull-up. A presence pulse must
    /// start within a timeslot and a half of the release, and the slot
    /// paddings shrink to the datasheet minimums.
    pub const fn external_pullup() -> Self {
        Self {
            reset_low_slots: 10,
            rise_poll_limit: 200,
            presence_high_max_quarters: 6,
            presence_low_max_quarters: 20,
            presence_low_min_quarters: 3,
            reset_recovery_slots: 8,
            write_low_us: 5,
            write_recovery_us: 7,
            read_low_us: 5,
            read_settle_us: 5,
            read_recovery_us: 10,
        }
    }
}

impl Default for Timing {
    fn default() -> Self {
        Self::internal_pullup()
    }
}
