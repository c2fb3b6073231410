use crate::{Error, W25q, PAGE_SIZE, SECTOR_SIZE};
use core::fmt::Debug;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;
use embedded_storage::nor_flash::{NorFlash, ReadNorFlash};

impl<SPI, S: Debug, P: Debug, CS> W25q<SPI, CS>
where
    SPI: SpiBus<Error = S>,
    CS: OutputPin<Error = P>,
{
    fn check_bounds(&self, offset: u32, len: usize) -> Result<(), Error<S, P>> {
        let len = u32::try_from(len).map_err(|_| Error::OutOfBounds)?;
        match offset.checked_add(len) {
            Some(end) if end <= self.capacity() => Ok(()),
            _ => Err(Error::OutOfBounds),
        }
    }

    fn wait_idle(&mut self) -> Result<(), Error<S, P>> {
        while self.busy()? {}
        Ok(())
    }

    /// Programs `buf` into a single page. The chip must be idle.
    fn program_page(&mut self, address: u32, buf: &[u8]) -> Result<(), Error<S, P>> {
        let mut session = self.write_start(address)?;
        session.write_all(buf)?;
        session.write_stop()?;

        // typical 0.7ms, max 3ms
        self.wait_idle()?;

        if cfg!(feature = "readback-check") {
            self.readback_check(address, buf)?;
        }

        Ok(())
    }

    /// Checks if the data at the provided address matches the provided slice.
    fn readback_check(&mut self, address: u32, data: &[u8]) -> Result<(), Error<S, P>> {
        let mut session = self.read_start(address)?;
        for (i, expected) in data.iter().enumerate() {
            let byte = session.read_byte(i + 1 == data.len())?;
            if byte != *expected {
                session.read_stop()?;
                return Err(Error::ReadbackFail);
            }
        }
        session.read_stop()
    }
}

impl<SPI, S: Debug, P: Debug, CS> ReadNorFlash for W25q<SPI, CS>
where
    SPI: SpiBus<Error = S>,
    CS: OutputPin<Error = P>,
{
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        self.check_bounds(offset, bytes.len())?;

        let mut session = self.read_start(offset)?;
        session.read_into(bytes)?;
        session.read_stop()
    }

    fn capacity(&self) -> usize {
        W25q::capacity(self) as usize
    }
}

impl<SPI, S: Debug, P: Debug, CS> NorFlash for W25q<SPI, CS>
where
    SPI: SpiBus<Error = S>,
    CS: OutputPin<Error = P>,
{
    const WRITE_SIZE: usize = 1;
    const ERASE_SIZE: usize = SECTOR_SIZE as usize;

    /// Erases the sectors in `from..to`. Both ends must be sector aligned.
    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        if from % SECTOR_SIZE != 0 || to % SECTOR_SIZE != 0 {
            return Err(Error::NotAligned);
        }

        if from > to || to > W25q::capacity(self) {
            return Err(Error::OutOfBounds);
        }

        // in case the chip is still busy from a previous operation
        self.wait_idle()?;

        for address in (from..to).step_by(SECTOR_SIZE as usize) {
            self.erase_sector(address)?;

            // typical 45ms, max 400ms
            self.wait_idle()?;

            if cfg!(feature = "readback-check") {
                let erased = [0xFF; 64];
                for offset in (0..SECTOR_SIZE).step_by(erased.len()) {
                    self.readback_check(address + offset, &erased)?;
                }
            }
        }

        Ok(())
    }

    /// Writes `bytes` starting at `offset`, split along page boundaries.
    ///
    /// As this is a NOR-flash chip, writing only changes bits from 1 to 0.
    /// Erase the sectors first.
    fn write(&mut self, mut offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        self.check_bounds(offset, bytes.len())?;

        self.wait_idle()?;

        // First chunk runs up to the next page boundary
        let first_len = core::cmp::min((PAGE_SIZE - offset % PAGE_SIZE) as usize, bytes.len());
        let (first, rest) = bytes.split_at(first_len);

        for chunk in core::iter::once(first).chain(rest.chunks(PAGE_SIZE as usize)) {
            if chunk.is_empty() {
                continue;
            }
            self.program_page(offset, chunk)?;
            offset += chunk.len() as u32;
        }

        Ok(())
    }
}
