use std::{
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};

use log::{debug, error};

use crate::{
    bit_utils::check_bit,
    camera::Camera,
    cartridge::{Cartridge, ROM_BANK_SIZE, SRAM_BANK_SIZE},
    mbc7::Mbc7,
};

const MINUTE: i64 = 60;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;

/// Which memory bank controller a cartridge uses, together with any
/// controller specific state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MbcKind {
    None,
    Mbc1,
    Mbc2,
    Mbc3,
    Mbc5,
    Mbc7(Box<Mbc7>),
    Huc1 { ir_mode: bool },
    Huc3(Huc3),
    Mmm01(Mmm01),
    Camera(Box<Camera>),
}

impl MbcKind {
    /// Stable tag used by the savestate format.
    pub fn tag(&self) -> u8 {
        match self {
            MbcKind::None => 0,
            MbcKind::Mbc1 => 1,
            MbcKind::Mbc2 => 2,
            MbcKind::Mbc3 => 3,
            MbcKind::Mbc5 => 5,
            MbcKind::Mbc7(_) => 7,
            MbcKind::Huc1 { .. } => 8,
            MbcKind::Huc3(_) => 9,
            MbcKind::Mmm01(_) => 10,
            MbcKind::Camera(_) => 11,
        }
    }
}

impl fmt::Display for MbcKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MbcKind::None => "ROM only",
            MbcKind::Mbc1 => "MBC1",
            MbcKind::Mbc2 => "MBC2",
            MbcKind::Mbc3 => "MBC3",
            MbcKind::Mbc5 => "MBC5",
            MbcKind::Mbc7(_) => "MBC7",
            MbcKind::Huc1 { .. } => "HuC1",
            MbcKind::Huc3(_) => "HuC3",
            MbcKind::Mmm01(_) => "MMM01",
            MbcKind::Camera(_) => "Pocket Camera",
        };
        f.write_str(name)
    }
}

fn unix_now() -> (i64, u32) {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| (d.as_secs() as i64, d.subsec_nanos()))
        .unwrap_or((0, 0))
}

/// MBC3 real time clock. Time is kept as a wall-clock base; the visible
/// registers are only refreshed on a latch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rtc {
    pub seconds: u8,
    pub minutes: u8,
    pub hours: u8,
    pub day_low: u8,
    pub day_high: u8,
    pub latch: u8,
    pub cur_reg: u8,
    pub mapped: bool,
    pub base_secs: i64,
    pub base_nanos: u32,
}

impl Rtc {
    pub fn halted(&self) -> bool {
        check_bit(self.day_high, 6)
    }

    pub fn reset_base(&mut self) {
        let (secs, nanos) = unix_now();
        self.base_secs = secs;
        self.base_nanos = nanos;
    }

    fn total_secs(&self) -> i64 {
        let days = self.day_low as i64 + ((self.day_high & 0x01) as i64) * 256;
        self.seconds as i64 + self.minutes as i64 * MINUTE + self.hours as i64 * HOUR + days * DAY
    }

    /// Copy the running clock into the registers as of `now_secs`.
    pub fn latch_at(&mut self, now_secs: i64) {
        if self.halted() {
            return;
        }
        let diff = (now_secs - self.base_secs).max(0);
        let days = diff / DAY;
        self.seconds = (diff % MINUTE) as u8;
        self.minutes = ((diff / MINUTE) % 60) as u8;
        self.hours = ((diff / HOUR) % 24) as u8;
        self.day_low = (days & 0xFF) as u8;
        self.day_high = (self.day_high & !0x01) | ((days >> 8) & 0x01) as u8;
        if days > 0x1FF {
            self.day_high |= 0x80;
        }
    }

    fn write_latch(&mut self, val: u8, now_secs: i64) {
        if self.latch == 0 && val == 0x01 {
            self.latch_at(now_secs);
        }
        self.latch = val;
    }

    pub fn read_reg(&self) -> u8 {
        match self.cur_reg {
            0 => self.seconds,
            1 => self.minutes,
            2 => self.hours,
            3 => self.day_low,
            4 => self.day_high,
            reg => {
                error!("Invalid rtc reg {reg}");
                0xFF
            }
        }
    }

    /// Store a register and shift the clock base so the running time
    /// follows the new value.
    pub fn write_reg(&mut self, val: u8, now_secs: i64) {
        let was_halted = self.halted();
        if self.cur_reg == 4 && !was_halted && check_bit(val, 6) {
            self.latch_at(now_secs);
        }
        if !was_halted {
            let (old, new, unit) = match self.cur_reg {
                0 => (self.seconds, val, 1),
                1 => (self.minutes, val, MINUTE),
                2 => (self.hours, val, HOUR),
                3 => (self.day_low, val, DAY),
                4 => (self.day_high & 0x01, val & 0x01, 256 * DAY),
                _ => (0, 0, 0),
            };
            self.base_secs += (old as i64 - new as i64) * unit;
        }
        match self.cur_reg {
            0 => self.seconds = val,
            1 => self.minutes = val,
            2 => self.hours = val,
            3 => self.day_low = val,
            4 => self.day_high = val,
            reg => error!("Invalid rtc reg {reg}"),
        }
        if was_halted && !self.halted() {
            self.base_secs = now_secs - self.total_secs();
        }
    }

    /// Text line appended to battery saves.
    pub fn save_line(&self) -> String {
        format!(
            "\n{}:{}:{}:{}:{}:{}:{}:{}:{}\n",
            self.seconds,
            self.minutes,
            self.hours,
            self.day_low,
            self.day_high,
            self.latch,
            self.cur_reg,
            self.base_secs,
            self.base_nanos
        )
    }

    pub fn parse_line(&mut self, line: &str) -> Option<()> {
        let mut fields = line.trim().split(':');
        let mut next_u8 = || fields.next()?.trim().parse::<u8>().ok();
        let regs = [next_u8()?, next_u8()?, next_u8()?, next_u8()?, next_u8()?, next_u8()?, next_u8()?];
        let base_secs = fields.next()?.trim().parse::<i64>().ok()?;
        let base_nanos = fields.next()?.trim().parse::<u32>().ok()?;
        let [seconds, minutes, hours, day_low, day_high, latch, cur_reg] = regs;
        self.seconds = seconds;
        self.minutes = minutes;
        self.hours = hours;
        self.day_low = day_low;
        self.day_high = day_high;
        self.latch = latch;
        self.cur_reg = cur_reg;
        self.base_secs = base_secs;
        self.base_nanos = base_nanos;
        Some(())
    }
}

/// HuC3 register file: a mode latch and a small nibble-addressed
/// command interface to the clock.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Huc3 {
    pub mode: u8,
    pub addr: u8,
    pub mem: [u8; 16],
    pub last_cmd: u8,
    pub response: u8,
}

impl Huc3 {
    fn read(&self) -> Option<u8> {
        match self.mode {
            0x0C => Some(0x80 | (self.last_cmd << 4) | (self.response & 0x0F)),
            0x0D => Some(0x01),
            0x0E => Some(0xC0),
            _ => None,
        }
    }

    fn command(&mut self, val: u8, rtc: &mut Rtc, now_secs: i64) {
        let cmd = (val >> 4) & 0x07;
        let arg = val & 0x0F;
        self.last_cmd = cmd;
        let idx = (self.addr & 0x0F) as usize;
        match cmd {
            0x1 => {
                self.response = self.mem[idx];
                self.addr = self.addr.wrapping_add(1);
            }
            0x3 => {
                self.mem[idx] = arg;
                self.addr = self.addr.wrapping_add(1);
            }
            0x4 => self.addr = (self.addr & 0xF0) | arg,
            0x5 => self.addr = (self.addr & 0x0F) | (arg << 4),
            0x6 => match arg {
                0x0 => {
                    let total = (now_secs - rtc.base_secs).max(0) / MINUTE;
                    let minutes = (total % 1440) as u16;
                    let days = ((total / 1440) & 0xFFF) as u16;
                    for i in 0..3 {
                        self.mem[i] = ((minutes >> (4 * i)) & 0x0F) as u8;
                        self.mem[3 + i] = ((days >> (4 * i)) & 0x0F) as u8;
                    }
                }
                0x1 => {
                    let nibbles = |start: usize| {
                        (0..3).fold(0i64, |acc, i| acc | ((self.mem[start + i] as i64) << (4 * i)))
                    };
                    let total = nibbles(0) + nibbles(3) * 1440;
                    rtc.base_secs = now_secs - total * MINUTE;
                }
                0x2 => self.response = 0x01,
                _ => debug!("Unhandled HuC3 extended command {arg:X}"),
            },
            _ => debug!("Unhandled HuC3 command {cmd:X}"),
        }
    }
}

/// Multicart mapper. Boots into the menu in the last 32 KiB and locks
/// its outer bank bits once mapped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mmm01 {
    pub mapped: bool,
    pub romb_mid: u8,
    pub romb_high: u8,
    pub ramb_mid: u8,
    pub rom_mask: u8,
    pub mode: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mbc {
    pub kind: MbcKind,
    pub rom0_bank: usize,
    pub romx_bank: usize,
    pub sram_bank: usize,
    pub ramg: u8,
    pub romb0: u8,
    pub romb1: u8,
    pub ramb: u8,
    pub sram_enable: bool,
    pub rtc: Rtc,
}

impl Mbc {
    pub fn new(kind: MbcKind) -> Self {
        Self {
            kind,
            rom0_bank: 0,
            romx_bank: 1,
            sram_bank: 0,
            ramg: 0,
            romb0: 1,
            romb1: 0,
            ramb: 0,
            sram_enable: false,
            rtc: Rtc::default(),
        }
    }
}

impl Cartridge {
    fn rom_byte(&self, bank: usize, offset: u16) -> u8 {
        self.rom
            .get(bank * ROM_BANK_SIZE + offset as usize)
            .copied()
            .unwrap_or(0xFF)
    }

    fn sram_read(&self, addr: u16) -> u8 {
        if self.ram.is_empty() {
            debug!("Trying to read SRAM when there isn't any!");
            return 0xFF;
        }
        let idx = self.mbc.sram_bank * SRAM_BANK_SIZE + (addr as usize - 0xA000);
        self.ram.get(idx).copied().unwrap_or(0xFF)
    }

    fn sram_write(&mut self, addr: u16, val: u8) {
        if self.ram.is_empty() {
            debug!("Trying to write to SRAM when there isn't any!");
            return;
        }
        let idx = self.mbc.sram_bank * SRAM_BANK_SIZE + (addr as usize - 0xA000);
        if let Some(b) = self.ram.get_mut(idx) {
            *b = val;
            self.sram_dirty = true;
        }
    }

    /// Read from the cartridge address space (0x0000-0x7FFF, 0xA000-0xBFFF).
    pub fn read(&self, addr: u16) -> u8 {
        match addr {
            0x0000..=0x3FFF => self.rom_byte(self.mbc.rom0_bank, addr),
            0x4000..=0x7FFF => self.rom_byte(self.mbc.romx_bank, addr - 0x4000),
            0xA000..=0xBFFF => self.read_sram_area(addr),
            _ => {
                error!("Reading memory address 0x{addr:04X} out of bounds.");
                0xFF
            }
        }
    }

    fn read_sram_area(&self, addr: u16) -> u8 {
        let enabled = self.mbc.sram_enable;
        match &self.mbc.kind {
            MbcKind::None => {
                if (addr as usize - 0xA000) < self.ram_size {
                    self.sram_read(addr)
                } else {
                    0xFF
                }
            }
            MbcKind::Mbc1 | MbcKind::Mbc5 | MbcKind::Mmm01(_) => {
                if enabled {
                    self.sram_read(addr)
                } else {
                    debug!("SRAM not enabled!");
                    0xFF
                }
            }
            MbcKind::Mbc2 => {
                if !enabled {
                    return 0xFF;
                }
                let idx = (addr as usize - 0xA000) & 0x01FF;
                self.ram.get(idx).map_or(0xFF, |b| b | 0xF0)
            }
            MbcKind::Mbc3 => {
                if !enabled {
                    0xFF
                } else if self.mbc.rtc.mapped {
                    self.mbc.rtc.read_reg()
                } else {
                    self.sram_read(addr)
                }
            }
            MbcKind::Huc1 { ir_mode: true } => 0xC0,
            MbcKind::Huc1 { ir_mode: false } => self.sram_read(addr),
            MbcKind::Huc3(huc3) => match huc3.read() {
                Some(val) => val,
                None if matches!(huc3.mode, 0x00 | 0x0A) => self.sram_read(addr),
                None => 0xFF,
            },
            MbcKind::Mbc7(mbc7) => mbc7.read(addr, self.mbc.ramg == 0x0A),
            MbcKind::Camera(cam) => {
                if cam.register_mode {
                    cam.read_reg(addr)
                } else if cam.busy() {
                    0x00
                } else {
                    self.sram_read(addr)
                }
            }
        }
    }

    /// Write to the cartridge address space. ROM-area writes go to the
    /// controller registers.
    pub fn write(&mut self, addr: u16, val: u8) {
        match addr {
            0x0000..=0x7FFF => {
                self.write_register(addr, val);
                self.update_banks();
            }
            0xA000..=0xBFFF => self.write_sram_area(addr, val),
            _ => error!("Writing memory address 0x{addr:04X} out of bounds."),
        }
    }

    fn write_register(&mut self, addr: u16, val: u8) {
        let (now_secs, _) = unix_now();
        let mbc = &mut self.mbc;
        match (&mut mbc.kind, addr) {
            (MbcKind::None, _) => debug!("Write to ROM address 0x{addr:04X} ignored"),
            (MbcKind::Mbc1, 0x0000..=0x1FFF) => mbc.ramg = val,
            (MbcKind::Mbc1, 0x2000..=0x3FFF) => mbc.romb0 = val,
            (MbcKind::Mbc1, 0x4000..=0x5FFF) => mbc.romb1 = val,
            (MbcKind::Mbc1, _) => mbc.ramb = val,
            // Address bit 8 selects between RAMG and ROMB.
            (MbcKind::Mbc2, 0x0000..=0x3FFF) if addr & 0x0100 == 0 => mbc.ramg = val,
            (MbcKind::Mbc2, 0x0000..=0x3FFF) => mbc.romb0 = val,
            (MbcKind::Mbc2, _) => debug!("Write to ROM address 0x{addr:04X} ignored"),
            (MbcKind::Mbc3, 0x0000..=0x1FFF) => mbc.ramg = val,
            (MbcKind::Mbc3, 0x2000..=0x3FFF) => mbc.romb0 = val,
            (MbcKind::Mbc3, 0x4000..=0x5FFF) => mbc.ramb = val,
            (MbcKind::Mbc3, _) => mbc.rtc.write_latch(val, now_secs),
            (MbcKind::Mbc5, 0x0000..=0x1FFF) => mbc.ramg = val,
            (MbcKind::Mbc5, 0x2000..=0x2FFF) => mbc.romb0 = val,
            (MbcKind::Mbc5, 0x3000..=0x3FFF) => mbc.romb1 = val,
            (MbcKind::Mbc5, 0x4000..=0x5FFF) => mbc.ramb = val,
            (MbcKind::Mbc5, _) => {}
            (MbcKind::Huc1 { ir_mode }, 0x0000..=0x1FFF) => {
                mbc.ramg = val;
                *ir_mode = val == 0x0E;
            }
            (MbcKind::Huc3(huc3), 0x0000..=0x1FFF) => {
                mbc.ramg = val;
                huc3.mode = val & 0x0F;
            }
            (MbcKind::Huc1 { .. } | MbcKind::Huc3(_), 0x2000..=0x3FFF) => mbc.romb0 = val,
            (MbcKind::Huc1 { .. } | MbcKind::Huc3(_), 0x4000..=0x5FFF) => mbc.ramb = val,
            (MbcKind::Huc1 { .. } | MbcKind::Huc3(_), _) => {}
            (MbcKind::Mmm01(m), 0x0000..=0x1FFF) => {
                mbc.ramg = val & 0x0F;
                if !m.mapped && check_bit(val, 6) {
                    m.mapped = true;
                }
            }
            (MbcKind::Mmm01(m), 0x2000..=0x3FFF) => {
                mbc.romb0 = val & 0x1F;
                if !m.mapped {
                    m.romb_mid = (val >> 5) & 0x03;
                }
            }
            (MbcKind::Mmm01(m), 0x4000..=0x5FFF) => {
                mbc.ramb = val & 0x03;
                if !m.mapped {
                    m.ramb_mid = (val >> 2) & 0x03;
                    m.romb_high = (val >> 4) & 0x03;
                }
            }
            (MbcKind::Mmm01(m), _) => {
                if !m.mapped {
                    m.rom_mask = (val >> 2) & 0x0F;
                }
                m.mode = val & 0x01;
            }
            (MbcKind::Mbc7(_), 0x0000..=0x1FFF) => mbc.ramg = val,
            (MbcKind::Mbc7(_), 0x2000..=0x3FFF) => mbc.romb0 = val,
            (MbcKind::Mbc7(m), 0x4000..=0x5FFF) => m.ramg2 = val,
            (MbcKind::Mbc7(_), _) => {}
            (MbcKind::Camera(_), 0x0000..=0x1FFF) => mbc.ramg = val,
            (MbcKind::Camera(_), 0x2000..=0x3FFF) => mbc.romb0 = val,
            (MbcKind::Camera(_), 0x4000..=0x5FFF) => mbc.ramb = val,
            (MbcKind::Camera(_), _) => {}
        }
    }

    fn update_banks(&mut self) {
        let rumble = self.rumble;
        let mbc = &mut self.mbc;
        mbc.sram_enable = mbc.ramg & 0x0F == 0x0A;
        match &mut mbc.kind {
            MbcKind::None => {}
            MbcKind::Mbc1 => {
                // Banks 0x00, 0x20, 0x40 and 0x60 can never be mapped to ROMX.
                let low = (mbc.romb0 & 0x1F).max(1) as usize;
                let high = (mbc.romb1 & 0x03) as usize;
                mbc.romx_bank = low | (high << 5);
                if check_bit(mbc.ramb, 0) {
                    mbc.sram_bank = high;
                    mbc.rom0_bank = high << 5;
                } else {
                    mbc.sram_bank = 0;
                    mbc.rom0_bank = 0;
                }
            }
            MbcKind::Mbc2 => mbc.romx_bank = (mbc.romb0 & 0x0F).max(1) as usize,
            MbcKind::Mbc3 => {
                mbc.romx_bank = (mbc.romb0 & 0x7F).max(1) as usize;
                match mbc.ramb {
                    0x08..=0x0C => {
                        mbc.rtc.mapped = true;
                        mbc.rtc.cur_reg = mbc.ramb - 0x08;
                    }
                    0x00..=0x03 => {
                        mbc.rtc.mapped = false;
                        mbc.sram_bank = mbc.ramb as usize;
                    }
                    _ => {}
                }
            }
            MbcKind::Mbc5 => {
                mbc.romx_bank = (((mbc.romb1 & 0x01) as usize) << 8) | mbc.romb0 as usize;
                if rumble {
                    self.rumble_state = check_bit(mbc.ramb, 3);
                    mbc.sram_bank = (mbc.ramb & 0x07) as usize;
                } else {
                    mbc.sram_bank = (mbc.ramb & 0x0F) as usize;
                }
            }
            MbcKind::Huc1 { ir_mode } => {
                mbc.sram_enable = !*ir_mode;
                mbc.romx_bank = (mbc.romb0 & 0x3F).max(1) as usize;
                mbc.sram_bank = (mbc.ramb & 0x03) as usize;
            }
            MbcKind::Huc3(huc3) => {
                mbc.sram_enable = huc3.mode == 0x0A;
                mbc.romx_bank = (mbc.romb0 & 0x7F).max(1) as usize;
                mbc.sram_bank = (mbc.ramb & 0x03) as usize;
            }
            MbcKind::Mmm01(m) => {
                if m.mapped {
                    let base = ((m.romb_high as usize) << 7) | ((m.romb_mid as usize) << 5);
                    let mask = ((m.rom_mask as usize) << 1) & 0x1E;
                    let low = (mbc.romb0 as usize) & !mask & 0x1F;
                    mbc.rom0_bank = base;
                    mbc.romx_bank = (base | low).max(1);
                    mbc.sram_bank = ((m.ramb_mid as usize) << 2) | (mbc.ramb & 0x03) as usize;
                } else {
                    mbc.rom0_bank = 0x1FE % self.rom_banks;
                    mbc.romx_bank = mbc.rom0_bank + 1;
                }
            }
            MbcKind::Mbc7(_) => mbc.romx_bank = (mbc.romb0 & 0x7F).max(1) as usize,
            MbcKind::Camera(cam) => {
                mbc.romx_bank = (mbc.romb0 & 0x3F) as usize;
                cam.register_mode = check_bit(mbc.ramb, 4);
                mbc.sram_bank = (mbc.ramb & 0x0F) as usize;
            }
        }
        self.mask_banks();
    }

    /// Discard bank bits the ROM and RAM are too small to decode.
    fn mask_banks(&mut self) {
        let mbc = &mut self.mbc;
        if mbc.romx_bank >= self.rom_banks {
            debug!("Invalid rom bank {}.", mbc.romx_bank);
            mbc.rom0_bank &= self.rom_banks - 1;
            mbc.romx_bank &= self.rom_banks - 1;
        }
        if self.ram_banks > 0 && mbc.sram_bank >= self.ram_banks {
            debug!("Invalid ram bank {}.", mbc.sram_bank);
            mbc.sram_bank &= self.ram_banks - 1;
        }
    }

    fn write_sram_area(&mut self, addr: u16, val: u8) {
        let enabled = self.mbc.sram_enable;
        let (now_secs, _) = unix_now();
        let Mbc { kind, rtc, ramg, .. } = &mut self.mbc;
        match kind {
            MbcKind::None => {
                if (addr as usize - 0xA000) < self.ram_size {
                    self.sram_write(addr, val);
                }
            }
            MbcKind::Mbc1 | MbcKind::Mbc5 | MbcKind::Mmm01(_) | MbcKind::Huc1 { ir_mode: false } => {
                if enabled {
                    self.sram_write(addr, val);
                } else {
                    debug!("SRAM not enabled!");
                }
            }
            MbcKind::Huc1 { ir_mode: true } => {}
            MbcKind::Mbc2 => {
                if enabled {
                    let idx = (addr as usize - 0xA000) & 0x01FF;
                    if let Some(b) = self.ram.get_mut(idx) {
                        *b = val & 0x0F;
                        self.sram_dirty = true;
                    }
                }
            }
            MbcKind::Mbc3 => {
                if !enabled {
                    debug!("SRAM/RTC not enabled!");
                } else if rtc.mapped {
                    rtc.write_reg(val, now_secs);
                } else {
                    self.sram_write(addr, val);
                }
            }
            MbcKind::Huc3(huc3) => match huc3.mode {
                0x0A => self.sram_write(addr, val),
                0x0B => huc3.command(val, rtc, now_secs),
                _ => {}
            },
            MbcKind::Mbc7(mbc7) => mbc7.write(addr, val, *ramg == 0x0A),
            MbcKind::Camera(cam) => {
                if cam.register_mode {
                    cam.write_reg(addr, val);
                } else if enabled && !cam.busy() {
                    self.sram_write(addr, val);
                }
            }
        }
    }

    /// Advance cartridge-side hardware by one clock. `machine_cycle` is set
    /// on the clocks where the CPU acts.
    pub fn clock(&mut self, machine_cycle: bool) {
        if let MbcKind::Camera(cam) = &mut self.mbc.kind {
            cam.clock(&mut self.ram, machine_cycle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cart(cart_type: u8, banks: usize, ram_flag: u8) -> Cartridge {
        let mut rom = vec![0u8; banks * ROM_BANK_SIZE];
        for bank in 0..banks {
            rom[bank * ROM_BANK_SIZE] = bank as u8;
        }
        rom[0x0147] = cart_type;
        rom[0x0149] = ram_flag;
        Cartridge::load(rom).unwrap()
    }

    #[test]
    fn mbc1_bank_zero_maps_to_one() {
        let mut c = cart(0x01, 64, 0);
        c.write(0x2000, 0x00);
        assert_eq!(c.mbc.romx_bank, 1);
        c.write(0x2000, 0x20);
        assert_eq!(c.mbc.romx_bank, 1);
        c.write(0x4000, 0x01);
        c.write(0x2000, 0x00);
        assert_eq!(c.mbc.romx_bank, 0x21);
    }

    #[test]
    fn mbc1_mode1_moves_rom0() {
        let mut c = cart(0x03, 128, 0x03);
        c.write(0x4000, 0x02);
        c.write(0x6000, 0x01);
        assert_eq!(c.mbc.rom0_bank, 0x40);
        assert_eq!(c.mbc.sram_bank, 2);
        assert_eq!(c.read(0x0000), 0x40);
    }

    #[test]
    fn mbc2_ram_is_nibble_wide_and_mirrored() {
        let mut c = cart(0x06, 4, 0);
        c.write(0x0000, 0x0A);
        c.write(0xA000, 0xAB);
        assert_eq!(c.read(0xA000), 0xFB);
        assert_eq!(c.read(0xA200), 0xFB);
        c.write(0x0100, 0x03);
        assert_eq!(c.mbc.romx_bank, 3);
    }

    #[test]
    fn disabled_sram_reads_open_bus() {
        let mut c = cart(0x03, 4, 0x02);
        c.write(0x0000, 0x0A);
        c.write(0xA000, 0x55);
        c.write(0x0000, 0x00);
        assert_eq!(c.read(0xA000), 0xFF);
        c.write(0x0000, 0x0A);
        assert_eq!(c.read(0xA000), 0x55);
        assert!(c.sram_dirty);
    }

    #[test]
    fn mbc5_allows_bank_zero_and_ninth_bit() {
        let mut c = cart(0x19, 512, 0);
        c.write(0x2000, 0x00);
        assert_eq!(c.mbc.romx_bank, 0);
        c.write(0x3000, 0x01);
        c.write(0x2000, 0x05);
        assert_eq!(c.mbc.romx_bank, 0x105);
    }

    #[test]
    fn mbc5_rumble_bit_is_not_a_bank_bit() {
        let mut c = cart(0x1E, 8, 0x03);
        c.write(0x4000, 0x09);
        assert!(c.rumble_state);
        assert_eq!(c.mbc.sram_bank, 1);
    }

    #[test]
    fn rtc_latch_reflects_elapsed_time() {
        let mut rtc = Rtc {
            base_secs: 1_000,
            ..Default::default()
        };
        rtc.latch_at(1_000 + 2 * DAY + 3 * HOUR + 4 * MINUTE + 5);
        assert_eq!(
            (rtc.day_low, rtc.hours, rtc.minutes, rtc.seconds),
            (2, 3, 4, 5)
        );
    }

    #[test]
    fn rtc_write_shifts_base() {
        let mut rtc = Rtc::default();
        rtc.latch_at(100);
        rtc.cur_reg = 1;
        rtc.write_reg(10, 100);
        rtc.latch_at(100);
        assert_eq!(rtc.minutes, 10);
        assert_eq!(rtc.seconds, 40);
    }

    #[test]
    fn rtc_halt_freezes_latch() {
        let mut rtc = Rtc::default();
        rtc.cur_reg = 4;
        rtc.write_reg(0x40, 30);
        rtc.latch_at(500);
        assert_eq!(rtc.seconds, 30);
        rtc.write_reg(0x00, 600);
        rtc.latch_at(610);
        assert_eq!(rtc.seconds, 40);
    }

    #[test]
    fn rtc_save_line_round_trips() {
        let rtc = Rtc {
            seconds: 1,
            minutes: 2,
            hours: 3,
            day_low: 4,
            day_high: 0x41,
            latch: 1,
            cur_reg: 2,
            mapped: false,
            base_secs: 1_700_000_000,
            base_nanos: 42,
        };
        let mut parsed = Rtc::default();
        assert!(parsed.parse_line(&rtc.save_line()).is_some());
        assert_eq!(parsed, rtc);
        assert!(parsed.parse_line("garbage").is_none());
    }

    #[test]
    fn huc3_time_commands() {
        let mut huc3 = Huc3::default();
        let mut rtc = Rtc::default();
        huc3.command(0x60, &mut rtc, 90 * MINUTE + DAY);
        assert_eq!(&huc3.mem[..6], &[0x0A, 0x05, 0x00, 0x01, 0x00, 0x00]);
        huc3.command(0x40, &mut rtc, 0);
        huc3.command(0x10, &mut rtc, 0);
        assert_eq!(huc3.response, 0x0A);
        huc3.mode = 0x0C;
        assert_eq!(huc3.read(), Some(0x80 | 0x10 | 0x0A));
    }

    #[test]
    fn mmm01_boots_into_last_banks() {
        let mut c = cart(0x0B, 512, 0);
        c.write(0x2000, 0x01);
        assert_eq!(c.mbc.rom0_bank, 0x1FE);
        assert_eq!(c.mbc.romx_bank, 0x1FF);
        c.write(0x2000, 0x03);
        c.write(0x0000, 0x40);
        assert_eq!(c.mbc.rom0_bank, 0);
        assert_eq!(c.mbc.romx_bank, 3);
    }
}
