#![no_std]

use core::fmt::Debug;
use embedded_hal::digital::OutputPin;
use embedded_storage::nor_flash::{ErrorType, NorFlashError, NorFlashErrorKind};

mod external_impls;
mod jedec;
pub mod w25q;

pub use jedec::JedecId;
pub use w25q::{ReadSession, WriteSession};

pub const PAGE_SIZE: u32 = 256;
pub const SECTOR_SIZE: u32 = PAGE_SIZE * 16;

/// Winbond's JEDEC manufacturer id.
pub const WINBOND_MANUFACTURER_ID: u8 = 0xEF;
/// Capacity assumed until [`W25q::init`] has identified the chip, and for any chip it does not recognize.
pub const DEFAULT_CAPACITY: u32 = 2 * 1024 * 1024;
/// Highest capacity reachable with 3-byte addressing.
pub const MAX_CAPACITY: u32 = 0x00FF_FFFF;

/// Low level driver for a W25Q flash chip used as external memory.
///
/// The bus is a plain byte exchange; chip select is driven by the driver through `CS`,
/// so a transaction can stay open across several calls (see [`ReadSession`] and [`WriteSession`]).
pub struct W25q<SPI, CS> {
    spi: SPI,
    cs: CS,
    capacity: u32,
}

impl<SPI, CS> W25q<SPI, CS> {
    /// Get the capacity of the flash chip in bytes.
    ///
    /// This is [`DEFAULT_CAPACITY`] until [`W25q::init`] has been called.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}

impl<SPI, S: Debug, P: Debug, CS> W25q<SPI, CS>
where
    SPI: embedded_hal::spi::ErrorType<Error = S>,
    CS: OutputPin<Error = P>,
{
    /// Creates the driver and deselects the chip.
    ///
    /// The chip is not probed; call [`W25q::init`] to detect its capacity.
    pub fn new(spi: SPI, cs: CS) -> Result<Self, Error<S, P>> {
        let mut flash = Self {
            spi,
            cs,
            capacity: DEFAULT_CAPACITY,
        };

        flash.cs.set_high().map_err(Error::PinError)?;

        Ok(flash)
    }

    /// Releases the SPI bus and the chip select pin from the driver.
    pub fn release(self) -> (SPI, CS) {
        (self.spi, self.cs)
    }
}

impl<SPI, S: Debug, P: Debug, CS> ErrorType for W25q<SPI, CS>
where
    SPI: embedded_hal::spi::ErrorType<Error = S>,
    CS: OutputPin<Error = P>,
{
    type Error = Error<S, P>;
}

/// Custom error type for the various errors that can be thrown by W25q.
/// Can be converted into a NorFlashError.
///
/// The chip itself never reports a failure; only the bus, the chip select pin and the
/// range checks of the `embedded-storage` implementation produce errors.
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error<S: Debug, P: Debug> {
    SpiError(S),
    PinError(P),
    NotAligned,
    OutOfBounds,
    ReadbackFail,
}

impl<S: Debug, P: Debug> NorFlashError for Error<S, P> {
    fn kind(&self) -> NorFlashErrorKind {
        match self {
            Error::NotAligned => NorFlashErrorKind::NotAligned,
            Error::OutOfBounds => NorFlashErrorKind::OutOfBounds,
            _ => NorFlashErrorKind::Other,
        }
    }
}

/// Easily readable representation of the command bytes used by the flash chip.
/// 3-byte addressing mode
#[repr(u8)]
enum Command {
    WriteEnable = 0x06,
    PageProgram = 0x02,
    SectorErase = 0x20,
    ReadData = 0x03,
    ReadStatusRegister1 = 0x05,
    ReadJedecId = 0x9F,
}

// Status register 1
const STATUS_BUSY: u8 = 1 << 0;
const STATUS_WRITE_ENABLE_LATCH: u8 = 1 << 1;

/// Placeholder clocked out while the chip is sending.
const DUMMY_BYTE: u8 = 0xFF;

fn command_and_address(command: u8, address: u32) -> [u8; 4] {
    let addr_bytes = address.to_be_bytes();
    [command, addr_bytes[1], addr_bytes[2], addr_bytes[3]]
}
