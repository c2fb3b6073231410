use crate::{DEFAULT_CAPACITY, MAX_CAPACITY, WINBOND_MANUFACTURER_ID};

/// Response to the Read JEDEC ID command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct JedecId {
    pub manufacturer: u8,
    /// Not used for sizing.
    pub memory_type: u8,
    pub capacity_code: u8,
}

impl JedecId {
    pub fn from_bytes(bytes: [u8; 3]) -> Self {
        Self {
            manufacturer: bytes[0],
            memory_type: bytes[1],
            capacity_code: bytes[2],
        }
    }

    /// Capacity in bytes of a recognized Winbond part, `None` for anything else.
    pub fn known_capacity(&self) -> Option<u32> {
        if self.manufacturer != WINBOND_MANUFACTURER_ID {
            return None;
        }

        match self.capacity_code {
            0x14 => Some(1024 * 1024),     // W25Q80
            0x15 => Some(2 * 1024 * 1024), // W25Q16
            0x16 => Some(4 * 1024 * 1024), // W25Q32
            0x17 => Some(8 * 1024 * 1024), // W25Q64
            0x18 => Some(MAX_CAPACITY),    // W25Q128, clamped to 24-bit addressing
            _ => None,
        }
    }

    /// Capacity in bytes the driver will use for this chip.
    ///
    /// Unrecognized chips are not an error: they are assumed to be [`DEFAULT_CAPACITY`] large.
    pub fn capacity(&self) -> u32 {
        self.known_capacity().unwrap_or(DEFAULT_CAPACITY)
    }
}
