use super::*;
use core::fmt::Debug;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;

impl<SPI, S: Debug, P: Debug, CS> W25q<SPI, CS>
where
    SPI: SpiBus<Error = S>,
    CS: OutputPin<Error = P>,
{
    /// Reads the JEDEC id of the chip and derives the capacity from it.
    ///
    /// Chips that are not recognized, including a missing chip, are assumed to be
    /// [`DEFAULT_CAPACITY`] large. This is not reported as an error.
    pub fn init(&mut self) -> Result<JedecId, Error<S, P>> {
        let id = self.read_jedec_id()?;

        #[cfg(feature = "defmt")]
        defmt::debug!("flash id: {}", id);

        self.capacity = match id.known_capacity() {
            Some(capacity) => capacity,
            None => {
                #[cfg(feature = "defmt")]
                defmt::warn!(
                    "unrecognized flash {}, assuming {} bytes",
                    id,
                    DEFAULT_CAPACITY
                );
                DEFAULT_CAPACITY
            }
        };

        Ok(id)
    }

    /// Reads manufacturer id, memory type and capacity code of the flash chip.
    pub fn read_jedec_id(&mut self) -> Result<JedecId, Error<S, P>> {
        let bytes = self.transaction(&[Command::ReadJedecId as u8], |spi| {
            let mut buf = [DUMMY_BYTE; 3];
            spi.transfer_in_place(&mut buf)?;
            Ok(buf)
        })?;

        Ok(JedecId::from_bytes(bytes))
    }

    /// Reads status register 1 of the flash chip.
    fn read_status_register(&mut self) -> Result<u8, Error<S, P>> {
        self.transaction(&[Command::ReadStatusRegister1 as u8], |spi| {
            let mut buf = [DUMMY_BYTE];
            spi.transfer_in_place(&mut buf)?;
            Ok(buf[0])
        })
    }

    /// The flash chip is unable to perform new commands while it is still working on a previous one.
    /// This function returns true while the chip is busy programming or erasing.
    ///
    /// Nothing in this driver waits on its own: poll this after [`WriteSession::write_stop`]
    /// or [`W25q::erase_sector`] before issuing the next command.
    pub fn busy(&mut self) -> Result<bool, Error<S, P>> {
        Ok((self.read_status_register()? & STATUS_BUSY) != 0)
    }

    /// This function returns true while the write-enable latch is set.
    pub fn write_enabled(&mut self) -> Result<bool, Error<S, P>> {
        Ok((self.read_status_register()? & STATUS_WRITE_ENABLE_LATCH) != 0)
    }

    /// Sets the write-enable latch of the flash chip.
    /// The chip clears it after every program or erase, so it is sent before each of them.
    fn enable_write(&mut self) -> Result<(), Error<S, P>> {
        self.transaction(&[Command::WriteEnable as u8], |_| Ok(()))
    }

    /// Starts reading at `address`.
    ///
    /// Bytes are then streamed out of the returned session; the chip advances its address
    /// by itself after every byte.
    pub fn read_start(&mut self, address: u32) -> Result<ReadSession<'_, SPI, CS>, Error<S, P>> {
        self.open(&command_and_address(Command::ReadData as u8, address))?;

        Ok(ReadSession {
            session: Session::new(self),
        })
    }

    /// Enables writes, then starts a page program at `address`.
    ///
    /// The chip only latches data within one page: bytes written past the end of the page
    /// wrap around to its start. This is not checked.
    pub fn write_start(
        &mut self,
        address: u32,
    ) -> Result<WriteSession<'_, SPI, CS>, Error<S, P>> {
        self.enable_write()?;
        self.open(&command_and_address(Command::PageProgram as u8, address))?;

        Ok(WriteSession {
            session: Session::new(self),
        })
    }

    /// Erases the [`SECTOR_SIZE`] sector containing `address`.
    ///
    /// Returns as soon as the command is sent. The chip is busy until the erase is done.
    pub fn erase_sector(&mut self, address: u32) -> Result<(), Error<S, P>> {
        self.enable_write()?;
        self.transaction(
            &command_and_address(Command::SectorErase as u8, address),
            |_| Ok(()),
        )
    }

    /// Selects the chip and sends `header`.
    fn open(&mut self, header: &[u8]) -> Result<(), Error<S, P>> {
        self.cs.set_low().map_err(Error::PinError)?;

        if let Err(e) = self.spi.write(header) {
            let _ = self.cs.set_high();
            return Err(Error::SpiError(e));
        }

        Ok(())
    }

    /// Waits for the bus to finish and deselects the chip.
    fn close(&mut self) -> Result<(), Error<S, P>> {
        let flushed = self.spi.flush();
        self.cs.set_high().map_err(Error::PinError)?;
        flushed.map_err(Error::SpiError)
    }

    /// Runs a complete command: select, `header`, `body`, deselect.
    /// The chip is deselected even when `body` fails.
    fn transaction<T>(
        &mut self,
        header: &[u8],
        body: impl FnOnce(&mut SPI) -> Result<T, S>,
    ) -> Result<T, Error<S, P>> {
        self.open(header)?;
        let result = body(&mut self.spi);
        self.close()?;
        result.map_err(Error::SpiError)
    }
}

/// Chip select stays asserted for as long as a session lives.
///
/// A session that is dropped without being stopped still flushes the bus and deselects
/// the chip, ignoring errors.
struct Session<'a, SPI: SpiBus, CS: OutputPin> {
    flash: &'a mut W25q<SPI, CS>,
    open: bool,
}

impl<'a, SPI: SpiBus, CS: OutputPin> Session<'a, SPI, CS> {
    fn new(flash: &'a mut W25q<SPI, CS>) -> Self {
        Self { flash, open: true }
    }
}

impl<SPI, S: Debug, P: Debug, CS> Session<'_, SPI, CS>
where
    SPI: SpiBus<Error = S>,
    CS: OutputPin<Error = P>,
{
    fn spi(&mut self) -> &mut SPI {
        &mut self.flash.spi
    }

    /// The session stays open if chip select could not be raised, so dropping it tries again.
    fn stop(mut self) -> Result<(), Error<S, P>> {
        let flushed = self.flash.spi.flush();
        self.flash.cs.set_high().map_err(Error::PinError)?;
        self.open = false;
        flushed.map_err(Error::SpiError)
    }
}

impl<SPI: SpiBus, CS: OutputPin> Drop for Session<'_, SPI, CS> {
    fn drop(&mut self) {
        if self.open {
            let _ = self.flash.spi.flush();
            let _ = self.flash.cs.set_high();
        }
    }
}

/// An open Read Data command, created by [`W25q::read_start`].
pub struct ReadSession<'a, SPI: SpiBus, CS: OutputPin> {
    session: Session<'a, SPI, CS>,
}

impl<SPI, S: Debug, P: Debug, CS> ReadSession<'_, SPI, CS>
where
    SPI: SpiBus<Error = S>,
    CS: OutputPin<Error = P>,
{
    /// Reads the next byte.
    ///
    /// `is_last` marks the final byte of the session. The chip does not need to know,
    /// so it does not change what is sent.
    pub fn read_byte(&mut self, is_last: bool) -> Result<u8, Error<S, P>> {
        let _ = is_last;
        let mut buf = [DUMMY_BYTE];
        self.session
            .spi()
            .transfer_in_place(&mut buf)
            .map_err(Error::SpiError)?;
        Ok(buf[0])
    }

    /// Fills `buf` with the next `buf.len()` bytes.
    pub fn read_into(&mut self, buf: &mut [u8]) -> Result<(), Error<S, P>> {
        buf.fill(DUMMY_BYTE);
        self.session
            .spi()
            .transfer_in_place(buf)
            .map_err(Error::SpiError)
    }

    /// Ends the read.
    pub fn read_stop(self) -> Result<(), Error<S, P>> {
        self.session.stop()
    }
}

/// An open Page Program command, created by [`W25q::write_start`].
pub struct WriteSession<'a, SPI: SpiBus, CS: OutputPin> {
    session: Session<'a, SPI, CS>,
}

impl<SPI, S: Debug, P: Debug, CS> WriteSession<'_, SPI, CS>
where
    SPI: SpiBus<Error = S>,
    CS: OutputPin<Error = P>,
{
    /// Sends the next data byte.
    pub fn write_byte(&mut self, byte: u8) -> Result<(), Error<S, P>> {
        self.session.spi().write(&[byte]).map_err(Error::SpiError)
    }

    /// Sends `data` as the next data bytes.
    pub fn write_all(&mut self, data: &[u8]) -> Result<(), Error<S, P>> {
        self.session.spi().write(data).map_err(Error::SpiError)
    }

    /// Deselects the chip, which starts programming the page.
    pub fn write_stop(self) -> Result<(), Error<S, P>> {
        self.session.stop()
    }
}
