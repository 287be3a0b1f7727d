#![cfg_attr(not(test), no_std)]

//! Bit-banged master for the 1-Wire single-conductor bus.
//!
//! One open-drain line carries data in both directions (and, on parasite
//! powered setups, the supply as well). The master owns all timing: it
//! opens every timeslot by driving the line low, and devices answer only
//! by holding the line down inside windows the master defines. This crate
//! implements that wire protocol and nothing below or above it: reset and
//! presence detection, bit and byte slots, command framing, and the ROM
//! search that enumerates every device sharing the line.
//!
//! Hardware is borrowed from the caller through two `embedded-hal`
//! capabilities:
//!
//! * a pin that is both [`OutputPin`] and [`InputPin`], wired open-drain.
//!   `set_low` drives the line down, `set_high` releases it to the
//!   pull-up. The pin must never drive the line hard high, or the first
//!   answering device will fight it.
//! * a [`DelayNs`] that truly busy-waits. Slot timing works in tens of
//!   microseconds; a delay that yields to a scheduler will smear the
//!   sample points and corrupt data silently rather than loudly. For the
//!   same reason every operation here runs to completion once started.
//!
//! Acceptance windows depend on the strength of the pull-up and live in
//! [`Timing`]; see [`Timing::internal_pullup`] (the default) and
//! [`Timing::external_pullup`].
//!
//! The port is not a shared handle. Nothing in here locks; a bus must be
//! driven from one thread of control at a time.

pub mod commands;

mod address;
mod error;
mod search;
mod timing;

pub use address::Address;
pub use error::{Error, OneWireResult};
pub use timing::{Timing, QUARTER_TIMESLOT_US, TIMESLOT_US};

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use heapless::Vec;

use crate::timing::{delay_quarters, delay_timeslots};

/// After the lead-in, a write slot keeps its level for a timeslot plus a
/// quarter of margin before the line is released.
const WRITE_SLOT_QUARTERS: u32 = 5;

/// Presence timing captured by the most recent reset pulse, in
/// quarter-timeslot units. Useful when diagnosing a marginal bus: a slow
/// rise or a stretched presence pulse shows up here before it turns into
/// hard errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PresenceTiming {
    /// High period between the line release and the first device pulling
    /// the line down.
    pub high_quarters: u16,
    /// Low period during which devices held their presence pulse.
    pub low_quarters: u16,
}

/// One physical bus: the data pin, its timing profile, and the ROM ids
/// found by the latest enumeration.
///
/// `N` fixes at compile time how many devices the port can record; the
/// buffer is owned by the port and never reallocated. A port is created
/// once and reused across any number of reset, search and command
/// cycles.
pub struct OneWireMaster<P, const N: usize> {
    pin: P,
    timing: Timing,
    devices: Vec<Address, N>,
    presence: PresenceTiming,
}

impl<P, E, const N: usize> OneWireMaster<P, N>
where
    P: InputPin<Error = E> + OutputPin<Error = E>,
{
    /// New port with the default (internal pull-up) timing profile.
    pub fn new(pin: P) -> Self {
        Self::with_timing(pin, Timing::default())
    }

    /// New port with an explicit timing profile.
    pub fn with_timing(pin: P, timing: Timing) -> Self {
        Self {
            pin,
            timing,
            devices: Vec::new(),
            presence: PresenceTiming::default(),
        }
    }

    /// Hand the pin back, consuming the port.
    pub fn into_inner(self) -> P {
        self.pin
    }

    /// The timing profile this port runs with.
    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    /// ROM ids found by the most recent enumeration, in discovery order.
    pub fn devices(&self) -> &[Address] {
        &self.devices
    }

    /// Presence timing measured by the most recent reset pulse.
    pub fn presence_timing(&self) -> PresenceTiming {
        self.presence
    }

    /// Reset the bus and validate the presence answer.
    ///
    /// Drives the line low for [`Timing::reset_low_slots`] timeslots,
    /// releases it, and measures the high period (`tPDH`) and the
    /// presence pulse (`tPDL`) in quarter-timeslot steps. Both readings
    /// are stored on the port. Returns once the full recovery window has
    /// passed, so a command byte may follow immediately.
    ///
    /// * the line never floats up within the poll ceiling:
    ///   [`Error::Communication`], the line is stuck or miswired;
    /// * nothing pulls the line down in time: [`Error::NoDevices`];
    /// * the presence pulse overstays its ceiling or is too narrow to be
    ///   real: [`Error::Communication`].
    pub fn reset_pulse(&mut self, delay: &mut impl DelayNs) -> OneWireResult<(), E> {
        self.pin.set_low()?;
        delay_timeslots(delay, self.timing.reset_low_slots as u32);

        // Release and give the pull-up time to bring the line back up.
        self.pin.set_high()?;
        let mut polls: u16 = 0;
        while self.pin.is_low()? {
            delay.delay_us(1);
            polls += 1;
            if polls > self.timing.rise_poll_limit {
                return Err(Error::Communication);
            }
        }

        // High period until some device opens its presence pulse.
        self.presence = PresenceTiming::default();
        loop {
            delay_quarters(delay, 1);
            self.presence.high_quarters += 1;
            if self.presence.high_quarters > self.timing.presence_high_max_quarters {
                return Err(Error::NoDevices);
            }
            if self.pin.is_low()? {
                break;
            }
        }

        // The presence pulse itself.
        loop {
            delay_quarters(delay, 1);
            self.presence.low_quarters += 1;
            if self.presence.low_quarters > self.timing.presence_low_max_quarters {
                return Err(Error::Communication);
            }
            if self.pin.is_high()? {
                break;
            }
        }

        // Wait out the rest of the recovery window so every device is
        // ready to take a command when this returns.
        let recovery_quarters = self.timing.reset_recovery_slots as u16 * 4;
        let spent = self.presence.high_quarters + self.presence.low_quarters;
        if spent < recovery_quarters {
            delay_quarters(delay, (recovery_quarters - spent) as u32);
        }

        if self.presence.low_quarters < self.timing.presence_low_min_quarters {
            return Err(Error::Communication);
        }

        Ok(())
    }

    /// Transmit a single bit.
    ///
    /// The slot opens low; after the lead-in the line is raised early for
    /// a 1 and kept down for a 0. Devices sample shortly after the slot
    /// opens, which is what makes the two shapes distinguishable.
    pub fn write_bit(&mut self, delay: &mut impl DelayNs, bit: bool) -> OneWireResult<(), E> {
        self.pin.set_low()?;
        delay.delay_us(self.timing.write_low_us);
        if bit {
            self.pin.set_high()?;
        }
        delay_quarters(delay, WRITE_SLOT_QUARTERS);

        // Release for recovery; for a 0 this is also what ends the slot.
        self.pin.set_high()?;
        delay.delay_us(self.timing.write_recovery_us);
        Ok(())
    }

    /// Sample a single bit from the bus.
    ///
    /// Opens a read slot, releases the line, samples after the settle
    /// window, then waits out the timeslot. A device still clamping the
    /// line at slot end is a bus fault and reports
    /// [`Error::Communication`].
    pub fn read_bit(&mut self, delay: &mut impl DelayNs) -> OneWireResult<bool, E> {
        self.pin.set_low()?;
        delay.delay_us(self.timing.read_low_us);

        // Release and let whoever wants to answer take the line.
        self.pin.set_high()?;
        delay.delay_us(self.timing.read_settle_us);

        let bit = self.pin.is_high()?;

        delay_timeslots(delay, 1);
        if self.pin.is_low()? {
            return Err(Error::Communication);
        }
        delay.delay_us(self.timing.read_recovery_us);
        Ok(bit)
    }

    /// Sample one read slot and OR the bit into `acc`.
    ///
    /// The wired-AND line reads 0 if any answering device pulled it down,
    /// and 1 only when every participant (or nobody) left it alone.
    /// Accumulating with OR over a zeroed accumulator is the collision
    /// probe the ROM search is built on; it is deliberately separate from
    /// the plain [`read_bit`](Self::read_bit) the byte codec uses.
    pub fn read_or_bit(&mut self, delay: &mut impl DelayNs, acc: &mut u8) -> OneWireResult<(), E> {
        *acc |= self.read_bit(delay)? as u8;
        Ok(())
    }

    /// Transmit one byte, least significant bit first.
    pub fn write_byte(&mut self, delay: &mut impl DelayNs, mut value: u8) -> OneWireResult<(), E> {
        for _ in 0..8 {
            self.write_bit(delay, value & 1 != 0)?;
            value >>= 1;
        }
        Ok(())
    }

    /// Read one byte, least significant bit first. The first slot fault
    /// aborts the read.
    pub fn read_byte(&mut self, delay: &mut impl DelayNs) -> OneWireResult<u8, E> {
        let mut value = 0;
        for i in 0..8 {
            if self.read_bit(delay)? {
                value |= 1 << i;
            }
        }
        Ok(value)
    }

    /// Reset the bus and transmit a command opcode.
    ///
    /// The standard envelope of every transaction. A failed reset
    /// short-circuits without putting anything on the wire.
    pub fn send_command(&mut self, delay: &mut impl DelayNs, opcode: u8) -> OneWireResult<(), E> {
        self.reset_pulse(delay)?;
        self.write_byte(delay, opcode)
    }

    /// Address every device on the bus at once. Follow with a command all
    /// of them understand.
    pub fn skip_rom(&mut self, delay: &mut impl DelayNs) -> OneWireResult<(), E> {
        self.send_command(delay, commands::SKIP_ROM)
    }

    /// Silence all devices except the one with this ROM id. Follow with a
    /// device-class command.
    pub fn match_rom(
        &mut self,
        delay: &mut impl DelayNs,
        address: &Address,
    ) -> OneWireResult<(), E> {
        self.send_command(delay, commands::MATCH_ROM)?;
        for octet in address.0 {
            self.write_byte(delay, octet)?;
        }
        Ok(())
    }

    /// Read the ROM id of the only device on the bus.
    ///
    /// Valid on a single-drop bus only; with several devices the answers
    /// collide and the result is garbage. Use the search for that case.
    pub fn read_rom(&mut self, delay: &mut impl DelayNs) -> OneWireResult<Address, E> {
        self.send_command(delay, commands::READ_ROM)?;
        let mut rom = Address::default();
        for octet in rom.0.iter_mut() {
            *octet = self.read_byte(delay)?;
        }
        Ok(rom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;

    use embedded_hal_mock::eh1::delay::NoopDelay;
    use embedded_hal_mock::eh1::digital::{Mock as PinMock, State, Transaction as PinTransaction};

    fn port(expectations: &[PinTransaction]) -> OneWireMaster<PinMock, 4> {
        OneWireMaster::new(PinMock::new(expectations))
    }

    #[test]
    fn reset_measures_presence_in_quarters() {
        let expectations = [
            PinTransaction::set(State::Low),
            PinTransaction::set(State::High),
            // Line already floated back up when the rise poll starts.
            PinTransaction::get(State::High),
            // Two quarters high before the presence pulse begins.
            PinTransaction::get(State::High),
            PinTransaction::get(State::Low),
            // Three quarters of presence pulse.
            PinTransaction::get(State::Low),
            PinTransaction::get(State::Low),
            PinTransaction::get(State::High),
        ];
        let mut delay = NoopDelay::new();
        let mut master = port(&expectations);

        master.reset_pulse(&mut delay).unwrap();
        let presence = master.presence_timing();
        assert_eq!(presence.high_quarters, 2);
        assert_eq!(presence.low_quarters, 3);

        master.into_inner().done();
    }

    #[test]
    fn reset_on_stuck_line_fails_after_poll_ceiling() {
        let timing = Timing {
            rise_poll_limit: 8,
            ..Timing::internal_pullup()
        };
        let mut expectations = vec![
            PinTransaction::set(State::Low),
            PinTransaction::set(State::High),
        ];
        expectations.extend(vec![PinTransaction::get(State::Low); 9]);

        let mut delay = NoopDelay::new();
        let mut master: OneWireMaster<_, 4> =
            OneWireMaster::with_timing(PinMock::new(&expectations), timing);

        assert!(matches!(
            master.reset_pulse(&mut delay),
            Err(Error::Communication)
        ));

        master.into_inner().done();
    }

    #[test]
    fn reset_without_presence_reports_no_devices() {
        let timing = Timing {
            presence_high_max_quarters: 4,
            ..Timing::internal_pullup()
        };
        let mut expectations = vec![
            PinTransaction::set(State::Low),
            PinTransaction::set(State::High),
            PinTransaction::get(State::High),
        ];
        // Four quarters of silence exhaust the presence window.
        expectations.extend(vec![PinTransaction::get(State::High); 4]);

        let mut delay = NoopDelay::new();
        let mut master: OneWireMaster<_, 4> =
            OneWireMaster::with_timing(PinMock::new(&expectations), timing);

        assert!(matches!(
            master.reset_pulse(&mut delay),
            Err(Error::NoDevices)
        ));

        master.into_inner().done();
    }

    #[test]
    fn short_presence_pulse_is_a_fault() {
        let expectations = [
            PinTransaction::set(State::Low),
            PinTransaction::set(State::High),
            PinTransaction::get(State::High),
            PinTransaction::get(State::Low),
            // One quarter of presence pulse, below the three-quarter floor.
            PinTransaction::get(State::High),
        ];
        let mut delay = NoopDelay::new();
        let mut master = port(&expectations);

        assert!(matches!(
            master.reset_pulse(&mut delay),
            Err(Error::Communication)
        ));
        assert_eq!(master.presence_timing().low_quarters, 1);

        master.into_inner().done();
    }

    fn write_bit_transactions(bit: bool) -> Vec<PinTransaction> {
        if bit {
            vec![
                PinTransaction::set(State::Low),
                PinTransaction::set(State::High),
                PinTransaction::set(State::High),
            ]
        } else {
            vec![
                PinTransaction::set(State::Low),
                PinTransaction::set(State::High),
            ]
        }
    }

    fn read_bit_transactions(bit: bool) -> Vec<PinTransaction> {
        vec![
            PinTransaction::set(State::Low),
            PinTransaction::set(State::High),
            PinTransaction::get(if bit { State::High } else { State::Low }),
            // Line is back high by slot end.
            PinTransaction::get(State::High),
        ]
    }

    #[test]
    fn write_bit_releases_early_only_for_one() {
        let mut expectations = write_bit_transactions(true);
        expectations.extend(write_bit_transactions(false));

        let mut delay = NoopDelay::new();
        let mut master = port(&expectations);

        master.write_bit(&mut delay, true).unwrap();
        master.write_bit(&mut delay, false).unwrap();

        master.into_inner().done();
    }

    #[test]
    fn read_bit_faults_when_line_stays_low() {
        let expectations = [
            PinTransaction::set(State::Low),
            PinTransaction::set(State::High),
            PinTransaction::get(State::Low),
            // Still clamped at slot end.
            PinTransaction::get(State::Low),
        ];
        let mut delay = NoopDelay::new();
        let mut master = port(&expectations);

        assert!(matches!(
            master.read_bit(&mut delay),
            Err(Error::Communication)
        ));

        master.into_inner().done();
    }

    #[test]
    fn bytes_travel_lsb_first() {
        // 0xA5 = 1010_0101, so the wire order is 1,0,1,0,0,1,0,1.
        let wire_bits = [true, false, true, false, false, true, false, true];

        let mut expectations = Vec::new();
        for bit in wire_bits {
            expectations.extend(write_bit_transactions(bit));
        }
        for bit in wire_bits {
            expectations.extend(read_bit_transactions(bit));
        }

        let mut delay = NoopDelay::new();
        let mut master = port(&expectations);

        master.write_byte(&mut delay, 0xA5).unwrap();
        assert_eq!(master.read_byte(&mut delay).unwrap(), 0xA5);

        master.into_inner().done();
    }

    #[test]
    fn read_or_bit_accumulates() {
        let mut expectations = read_bit_transactions(false);
        expectations.extend(read_bit_transactions(true));
        expectations.extend(read_bit_transactions(false));

        let mut delay = NoopDelay::new();
        let mut master = port(&expectations);

        let mut acc = 0;
        master.read_or_bit(&mut delay, &mut acc).unwrap();
        assert_eq!(acc, 0);
        master.read_or_bit(&mut delay, &mut acc).unwrap();
        assert_eq!(acc, 1);
        // A later 0 must not clear what an earlier 1 set.
        master.read_or_bit(&mut delay, &mut acc).unwrap();
        assert_eq!(acc, 1);

        master.into_inner().done();
    }
}
