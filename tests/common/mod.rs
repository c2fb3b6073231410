#![allow(dead_code)]

use std::cell::RefCell;
use std::convert::Infallible;
use std::rc::Rc;

use embedded_hal::digital::{self, OutputPin};
use embedded_hal::spi::{self, SpiBus};

pub const SECTOR: usize = 4096;
pub const PAGE: usize = 256;

/// Behavioural model of a W25Q chip.
///
/// Busy time is counted in status register polls.
pub struct Chip {
    pub mem: Vec<u8>,
    pub id: [u8; 3],
    pub write_enable_latch: bool,
    pub busy_polls: u32,
    pub program_latency: u32,
    pub erase_latency: u32,
    /// MOSI bytes of every chip select window, in order.
    pub trace: Vec<Vec<u8>>,
    selected: bool,
    address: u32,
    page_latch: Vec<(usize, u8)>,
}

impl Chip {
    fn new(id: [u8; 3], size: usize) -> Self {
        Self {
            mem: vec![0xFF; size],
            id,
            write_enable_latch: false,
            busy_polls: 0,
            program_latency: 0,
            erase_latency: 0,
            trace: Vec::new(),
            selected: false,
            address: 0,
            page_latch: Vec::new(),
        }
    }

    fn select(&mut self) {
        self.selected = true;
        self.address = 0;
        self.page_latch.clear();
        self.trace.push(Vec::new());
    }

    fn deselect(&mut self) {
        if !self.selected {
            return;
        }
        self.selected = false;

        let Some(session) = self.trace.last() else {
            return;
        };
        let Some(&opcode) = session.first() else {
            return;
        };
        if self.busy_polls > 0 && opcode != 0x05 {
            return;
        }

        match opcode {
            0x06 => self.write_enable_latch = true,
            0x02 if self.write_enable_latch && session.len() >= 4 => {
                let page_start = self.address as usize & !(PAGE - 1);
                for &(offset, byte) in &self.page_latch {
                    let index = (page_start + offset) % self.mem.len();
                    self.mem[index] &= byte;
                }
                self.write_enable_latch = false;
                self.busy_polls = self.program_latency;
            }
            0x20 if self.write_enable_latch && session.len() == 4 => {
                let start = (self.address as usize & !(SECTOR - 1)) % self.mem.len();
                let end = (start + SECTOR).min(self.mem.len());
                self.mem[start..end].fill(0xFF);
                self.write_enable_latch = false;
                self.busy_polls = self.erase_latency;
            }
            _ => {}
        }
    }

    fn exchange(&mut self, mosi: u8) -> u8 {
        if !self.selected {
            return 0xFF;
        }

        let session = self.trace.last_mut().expect("selected without session");
        session.push(mosi);
        let position = session.len() - 1;
        let opcode = session[0];

        if position == 0 {
            return 0xFF;
        }

        match opcode {
            0x9F => self.id.get(position - 1).copied().unwrap_or(0xFF),
            0x05 => {
                let busy = self.busy_polls > 0;
                if busy {
                    self.busy_polls -= 1;
                }
                (busy as u8) | ((self.write_enable_latch as u8) << 1)
            }
            0x03 | 0x02 | 0x20 if position <= 3 => {
                self.address = (self.address << 8) | mosi as u32;
                0xFF
            }
            0x03 if self.busy_polls == 0 => {
                let byte = self.mem[self.address as usize % self.mem.len()];
                self.address = self.address.wrapping_add(1);
                byte
            }
            0x02 => {
                let offset = (self.address as usize + position - 4) % PAGE;
                self.page_latch.retain(|&(o, _)| o != offset);
                self.page_latch.push((offset, mosi));
                0xFF
            }
            _ => 0xFF,
        }
    }
}

/// Byte exchange side of the simulated chip.
#[derive(Clone)]
pub struct SimBus(Rc<RefCell<Chip>>);

/// Chip select line of the simulated chip.
#[derive(Clone)]
pub struct SimCs(Rc<RefCell<Chip>>);

/// Handle for inspecting the chip while the driver owns bus and pin.
#[derive(Clone)]
pub struct SimChip(Rc<RefCell<Chip>>);

impl SimChip {
    pub fn new(id: [u8; 3], size: usize) -> (Self, SimBus, SimCs) {
        let chip = Rc::new(RefCell::new(Chip::new(id, size)));
        (Self(chip.clone()), SimBus(chip.clone()), SimCs(chip))
    }

    /// A W25Q16 (2 MiB).
    pub fn w25q16() -> (Self, SimBus, SimCs) {
        Self::new([0xEF, 0x40, 0x15], 2 * 1024 * 1024)
    }

    pub fn with_latency(self, program: u32, erase: u32) -> Self {
        {
            let mut chip = self.0.borrow_mut();
            chip.program_latency = program;
            chip.erase_latency = erase;
        }
        self
    }

    pub fn state(&self) -> std::cell::RefMut<'_, Chip> {
        self.0.borrow_mut()
    }

    pub fn take_trace(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.0.borrow_mut().trace)
    }

    pub fn mem(&self, start: usize, len: usize) -> Vec<u8> {
        self.0.borrow().mem[start..start + len].to_vec()
    }
}

impl spi::ErrorType for SimBus {
    type Error = Infallible;
}

impl SpiBus for SimBus {
    fn read(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        let mut chip = self.0.borrow_mut();
        for word in words.iter_mut() {
            *word = chip.exchange(0x00);
        }
        Ok(())
    }

    fn write(&mut self, words: &[u8]) -> Result<(), Self::Error> {
        let mut chip = self.0.borrow_mut();
        for &word in words {
            chip.exchange(word);
        }
        Ok(())
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Self::Error> {
        let mut chip = self.0.borrow_mut();
        for i in 0..read.len().max(write.len()) {
            let miso = chip.exchange(write.get(i).copied().unwrap_or(0x00));
            if let Some(word) = read.get_mut(i) {
                *word = miso;
            }
        }
        Ok(())
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        let mut chip = self.0.borrow_mut();
        for word in words.iter_mut() {
            *word = chip.exchange(*word);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl digital::ErrorType for SimCs {
    type Error = Infallible;
}

impl OutputPin for SimCs {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.0.borrow_mut().select();
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.0.borrow_mut().deselect();
        Ok(())
    }
}
