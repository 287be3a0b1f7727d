//! Bus enumeration.
//!
//! Picture every possible ROM id as a leaf of a binary tree 64 levels
//! deep, bit 0 right below the root. A search transaction walks one
//! root-to-leaf path: at each level every participating device transmits
//! its id bit and then its complement, the master picks a direction and
//! echoes it back, and devices whose bit differs drop out until the next
//! reset. Reading the mirrored pair through the wired-AND line tells the
//! master exactly one of three things per level:
//!
//! * `(bit, complement)` with one side set: every remaining device agrees
//!   on that bit;
//! * both zero: devices disagree, the path forks here;
//! * both one: nobody is left transmitting.
//!
//! One walk resolves one ROM id. To enumerate the whole bus the walk is
//! repeated, carrying a single scalar between rounds: the deepest level
//! where the previous walk settled a fork by taking the 0 side. The next
//! walk replays the previous id above that level, takes the 1 side at it,
//! and falls back to 0-first below it. A full backtracking stack is not
//! needed since only one fork is ever being resumed at a time. When a
//! walk records no 0-side fork at all, every branch has been taken on
//! both sides and the enumeration is complete.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};

use crate::{commands, Address, Error, OneWireMaster, OneWireResult};

/// ROM ids are 64 bits on the wire.
const ID_BITS: u8 = 64;

impl<P, E, const N: usize> OneWireMaster<P, N>
where
    P: InputPin<Error = E> + OutputPin<Error = E>,
{
    /// Enumerate every device on the bus.
    ///
    /// Overwrites the port's device list and returns how many ids were
    /// found. `Err(NoDevices)` means an empty (but healthy) bus. With
    /// `Err(TooManyDevices)` the first `N` ids are kept and readable
    /// through [`devices`](Self::devices); the rest of the bus stays
    /// unexplored.
    ///
    /// Repeating the search on an unchanged bus yields the same ids in
    /// the same order.
    pub fn search(&mut self, delay: &mut impl DelayNs) -> OneWireResult<usize, E> {
        self.enumerate(delay, commands::SEARCH_ROM)
    }

    /// Enumerate only the devices currently flagging an alarm condition.
    ///
    /// Same walk as [`search`](Self::search) under a different opcode;
    /// devices without a pending alarm sit it out, so an alarm-free bus
    /// reports `NoDevices`.
    pub fn search_alarming(&mut self, delay: &mut impl DelayNs) -> OneWireResult<usize, E> {
        self.enumerate(delay, commands::ALARM_SEARCH)
    }

    fn enumerate(&mut self, delay: &mut impl DelayNs, opcode: u8) -> OneWireResult<usize, E> {
        self.devices.clear();
        let mut split = None;

        loop {
            let (rom, next_split) = self.traverse(delay, opcode, split)?;

            if self.devices.push(rom).is_err() {
                #[cfg(feature = "defmt")]
                defmt::warn!("bus search overflowed a zero-capacity port");
                return Err(Error::TooManyDevices);
            }

            match next_split {
                None => {
                    #[cfg(feature = "defmt")]
                    defmt::debug!("bus search complete: {=usize} devices", self.devices.len());
                    return Ok(self.devices.len());
                }
                Some(_) if self.devices.is_full() => {
                    // Unexplored forks remain but every slot is taken.
                    #[cfg(feature = "defmt")]
                    defmt::warn!("bus search stopped at capacity {=usize}", N);
                    return Err(Error::TooManyDevices);
                }
                some => split = some,
            }
        }
    }

    /// One 64-level walk, resolving exactly one ROM id.
    ///
    /// `split` is the deepest level where the previous walk took the 0
    /// side of a fork, or `None` on the first walk. Returns the id and
    /// the deepest 0-side fork of this walk, which becomes the next
    /// walk's `split`.
    fn traverse(
        &mut self,
        delay: &mut impl DelayNs,
        opcode: u8,
        split: Option<u8>,
    ) -> OneWireResult<(Address, Option<u8>), E> {
        self.send_command(delay, opcode)?;

        let previous = self.devices.last().copied();
        let mut rom = Address::default();
        let mut deepest_zero = None;

        for position in 0..ID_BITS {
            let mut bit = 0u8;
            let mut complement = 0u8;
            self.read_or_bit(delay, &mut bit)?;
            self.read_or_bit(delay, &mut complement)?;

            let chosen = match (bit, complement) {
                (1, 1) => {
                    // Silence. Either the bus is empty, or a device that
                    // was answering quit partway through the walk.
                    return Err(if position == 0 {
                        Error::NoDevices
                    } else {
                        Error::Communication
                    });
                }
                (0, 0) => {
                    let direction = match (split, &previous) {
                        // Fork above the split: stay on the previous
                        // walk's path.
                        (Some(s), Some(prev)) if position < s => prev.bit(position),
                        // The split itself: its 0 side is exhausted now,
                        // go right.
                        (Some(s), _) if position == s => true,
                        // A fork not walked before: 0 side first.
                        _ => false,
                    };
                    if !direction {
                        deepest_zero = Some(position);
                    }
                    direction
                }
                // Everyone still in the walk agrees.
                _ => bit != 0,
            };

            if chosen {
                rom.set_bit(position);
            }
            // Echo the direction; devices on the other side fall silent.
            self.write_bit(delay, chosen)?;
        }

        Ok((rom, deepest_zero))
    }
}
