//! MBC7: two-axis accelerometer plus a 93LC56 serial EEPROM.

use log::debug;

use crate::bit_utils::{check_bit, check_bit16};

/// Accelerometer reading when the cartridge is held flat.
pub const ACCEL_CENTER: u16 = 0x81D0;
/// Offset applied per tilted axis.
pub const ACCEL_TILT: u16 = 0x70;

const EEPROM_WORDS: usize = 128;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tilt {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) enum EepromState {
    #[default]
    Idle,
    Command {
        bits: u16,
        count: u8,
    },
    Read {
        value: u16,
        count: u8,
    },
    Write {
        addr: Option<u8>,
        value: u16,
        count: u8,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eeprom {
    pub data: [u16; EEPROM_WORDS],
    pub(crate) cs: bool,
    pub(crate) clk: bool,
    pub(crate) di: bool,
    pub(crate) do_bit: bool,
    pub(crate) write_enable: bool,
    pub(crate) state: EepromState,
}

impl Default for Eeprom {
    fn default() -> Self {
        Self {
            data: [0xFFFF; EEPROM_WORDS],
            cs: false,
            clk: false,
            di: false,
            do_bit: true,
            write_enable: false,
            state: EepromState::Idle,
        }
    }
}

impl Eeprom {
    pub fn read_port(&self) -> u8 {
        ((self.cs as u8) << 7) | ((self.clk as u8) << 6) | ((self.di as u8) << 1) | self.do_bit as u8
    }

    pub fn write_port(&mut self, val: u8) {
        let cs = check_bit(val, 7);
        let clk = check_bit(val, 6);
        let rising = clk && !self.clk;
        self.cs = cs;
        self.clk = clk;
        self.di = check_bit(val, 1);

        if !cs {
            self.state = EepromState::Idle;
            self.do_bit = true;
            return;
        }
        if rising {
            self.shift();
        }
    }

    fn shift(&mut self) {
        let di = self.di as u16;
        self.state = match self.state {
            EepromState::Idle if self.di => EepromState::Command { bits: 0, count: 0 },
            EepromState::Idle => EepromState::Idle,
            EepromState::Command { bits, count } => {
                let bits = (bits << 1) | di;
                let count = count + 1;
                if count == 10 {
                    self.decode(bits)
                } else {
                    EepromState::Command { bits, count }
                }
            }
            EepromState::Read { value, count } => {
                self.do_bit = check_bit16(value, 15);
                if count + 1 == 16 {
                    EepromState::Idle
                } else {
                    EepromState::Read {
                        value: value << 1,
                        count: count + 1,
                    }
                }
            }
            EepromState::Write { addr, value, count } => {
                let value = (value << 1) | di;
                if count + 1 < 16 {
                    EepromState::Write {
                        addr,
                        value,
                        count: count + 1,
                    }
                } else {
                    if self.write_enable {
                        match addr {
                            Some(a) => self.data[a as usize] = value,
                            None => self.data.fill(value),
                        }
                    }
                    self.do_bit = true;
                    EepromState::Idle
                }
            }
        };
    }

    fn decode(&mut self, bits: u16) -> EepromState {
        let op = (bits >> 8) & 0x03;
        let addr = (bits & 0x7F) as u8;
        match op {
            0b10 => {
                // Dummy zero precedes the data word.
                self.do_bit = false;
                EepromState::Read {
                    value: self.data[addr as usize],
                    count: 0,
                }
            }
            0b01 => EepromState::Write {
                addr: Some(addr),
                value: 0,
                count: 0,
            },
            0b11 => {
                if self.write_enable {
                    self.data[addr as usize] = 0xFFFF;
                }
                self.do_bit = true;
                EepromState::Idle
            }
            _ => match (bits >> 6) & 0x03 {
                0b11 => {
                    self.write_enable = true;
                    EepromState::Idle
                }
                0b00 => {
                    self.write_enable = false;
                    EepromState::Idle
                }
                0b10 => {
                    if self.write_enable {
                        self.data.fill(0xFFFF);
                    }
                    self.do_bit = true;
                    EepromState::Idle
                }
                _ => EepromState::Write {
                    addr: None,
                    value: 0,
                    count: 0,
                },
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mbc7 {
    pub ramg2: u8,
    pub x: u16,
    pub y: u16,
    pub latched: bool,
    pub tilt: Tilt,
    pub eeprom: Eeprom,
}

impl Default for Mbc7 {
    fn default() -> Self {
        Self {
            ramg2: 0,
            x: 0x8000,
            y: 0x8000,
            latched: false,
            tilt: Tilt::default(),
            eeprom: Eeprom::default(),
        }
    }
}

impl Mbc7 {
    /// Accelerometer values for the current tilt.
    pub fn sample(&self) -> (u16, u16) {
        let mut x = ACCEL_CENTER;
        let mut y = ACCEL_CENTER;
        if self.tilt.left {
            x += ACCEL_TILT;
        }
        if self.tilt.right {
            x -= ACCEL_TILT;
        }
        if self.tilt.up {
            y += ACCEL_TILT;
        }
        if self.tilt.down {
            y -= ACCEL_TILT;
        }
        (x, y)
    }

    fn enabled(&self, ramg1: bool) -> bool {
        ramg1 && self.ramg2 == 0x40
    }

    pub fn read(&self, addr: u16, ramg1: bool) -> u8 {
        if !self.enabled(ramg1) || addr >= 0xB000 {
            return 0xFF;
        }
        match (addr >> 4) & 0x0F {
            0x2 => self.x as u8,
            0x3 => (self.x >> 8) as u8,
            0x4 => self.y as u8,
            0x5 => (self.y >> 8) as u8,
            0x6 => 0x00,
            0x8 => self.eeprom.read_port(),
            _ => 0xFF,
        }
    }

    pub fn write(&mut self, addr: u16, val: u8, ramg1: bool) {
        if !self.enabled(ramg1) || addr >= 0xB000 {
            return;
        }
        match ((addr >> 4) & 0x0F, val) {
            (0x0, 0x55) => {
                self.x = 0x8000;
                self.y = 0x8000;
                self.latched = false;
            }
            (0x1, 0xAA) => {
                if !self.latched {
                    (self.x, self.y) = self.sample();
                    self.latched = true;
                }
            }
            (0x8, _) => self.eeprom.write_port(val),
            (reg, _) => debug!("Ignored MBC7 write {val:02X} to register {reg:X}"),
        }
    }
}
