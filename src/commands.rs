//! ROM-level command opcodes.
//!
//! Every transaction opens with a reset pulse followed by one of these.
//! Device-class opcodes (scratchpad, memory) belong to the device drivers
//! layered on top of the bus, not here.

/// Enumerate the ROM ids of all devices on the bus.
pub const SEARCH_ROM: u8 = 0xF0;
/// Like [`SEARCH_ROM`], but only devices in an alarm state take part.
pub const ALARM_SEARCH: u8 = 0xEC;
/// Read the ROM id of the only device on the bus.
pub const READ_ROM: u8 = 0x33;
/// Address a single device by its full ROM id.
pub const MATCH_ROM: u8 = 0x55;
/// Address every device on the bus at once.
pub const SKIP_ROM: u8 = 0xCC;
