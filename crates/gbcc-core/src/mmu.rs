use log::{debug, warn};

use crate::{
    apu::Apu,
    bit_utils::{bit, check_bit, high_byte, low_byte},
    cartridge::Cartridge,
    cheats::Cheats,
    hardware::{
        BGPD, BGPI, CartMode, DIV, DMA, HDMA1, HDMA2, HDMA3, HDMA4, HDMA5, IE, IF, JOYP, KEY1,
        LCDC, LY, NR10, NR11, NR12, NR14, NR21, NR22, NR24, NR30, NR31, NR32, NR33, NR41, NR42,
        NR43, NR50, NR51, NR52, OBP0, OBP1, OBPD, OBPI, RP, SB, SC, STAT, SVBK, TAC, TIMA, TMA,
        VBK, WAVE_END, WAVE_START, BGP, io,
    },
    input::Keys,
    ppu::{FrameSync, MODE_OAM_READ, MODE_TRANSFER, PALETTE_RAM_SIZE, Ppu, PpuEvents, get_mode},
    serial::LinkCable,
    timer::Timer,
};

pub const WRAM_BANK_SIZE: usize = 0x1000;
pub const HRAM_SIZE: usize = 0x7F;
pub const UNUSED_SIZE: usize = 0x40;
/// CPU ticks an OAM DMA transfer takes.
pub const DMA_TIMER: u8 = 160;

/// Bits of each I/O register that read back; the rest read as 1.
#[rustfmt::skip]
const READ_MASK: [u8; 0x80] = [
    0x3F, 0xFF, 0x83, 0x00, 0xFF, 0xFF, 0xFF, 0x07, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1F,
    0x7F, 0xC0, 0xFF, 0x00, 0x40, 0x00, 0xC0, 0xFF, 0x00, 0x40, 0x80, 0x00, 0x60, 0x00, 0x40, 0x00,
    0x00, 0xFF, 0xFF, 0x40, 0xFF, 0xFF, 0x8F, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    0xFF, 0x7F, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x81, 0x00, 0x01,
    0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xC3, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x00, 0x00,
    0x07, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Bits of each I/O register the CPU may change.
#[rustfmt::skip]
const WRITE_MASK: [u8; 0x80] = [
    0x30, 0xFF, 0x83, 0x00, 0xFF, 0xFF, 0xFF, 0x07, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1F,
    0x7F, 0xFF, 0xFF, 0xFF, 0xC7, 0x00, 0xFF, 0xFF, 0xFF, 0xC7, 0x80, 0xFF, 0x60, 0xFF, 0xC7, 0x00,
    0x3F, 0xFF, 0xFF, 0xC0, 0xFF, 0xFF, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    0xFF, 0x78, 0xFF, 0xFF, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x01, 0x00, 0x01,
    0x00, 0xFF, 0xF0, 0x1F, 0xF0, 0xFF, 0xC2, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x00, 0x00,
    0x07, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Registers that only exist on the GBC. In DMG mode they read 0xFF and
/// ignore writes.
fn gbc_only(addr: u16) -> bool {
    matches!(
        addr,
        KEY1 | VBK | HDMA1 | HDMA2 | HDMA3 | HDMA4 | HDMA5 | RP | BGPI | BGPD | OBPI | OBPD | SVBK
    )
}

/// Offset into the unused area. 0xFED0-0xFEDF is mirrored up to 0xFEFF.
fn unused_index(addr: u16) -> usize {
    if addr < 0xFED0 {
        (addr - 0xFEA0) as usize
    } else {
        0x30 + (addr & 0x0F) as usize
    }
}

/// Power-on register file.
fn initial_io(mode: CartMode) -> [u8; 0x80] {
    let mut regs = [0u8; 0x80];
    for (addr, val) in [
        (JOYP, 0xCF),
        (IF, 0x01),
        (NR10, 0x80),
        (NR11, 0xBF),
        (NR12, 0xF3),
        (NR14, 0xBF),
        (NR21, 0x3F),
        (NR22, 0x00),
        (NR24, 0xBF),
        (NR30, 0x7F),
        (NR31, 0xFF),
        (NR32, 0x9F),
        (NR33, 0xBF),
        (NR41, 0xFF),
        (NR42, 0x00),
        (NR43, 0x00),
        (NR50, 0x77),
        (NR51, 0xF3),
        (NR52, 0xF1),
        (LCDC, 0x91),
        (BGP, 0xFC),
        (OBP0, 0xFF),
        (OBP1, 0xFF),
    ] {
        regs[io(addr)] = val;
    }
    if mode.is_gbc() {
        regs[io(HDMA5)] = 0xFF;
        regs[io(SVBK)] = 0x01;
    }
    regs
}

/// OAM DMA progress. Armed by a DMA register write, started on the next
/// CPU tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OamDma {
    pub source: u16,
    pub new_source: u16,
    pub timer: u8,
    pub requested: bool,
    pub running: bool,
}

/// GBC VRAM DMA.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Hdma {
    pub source: u16,
    pub dest: u16,
    /// Bytes left in the whole transfer.
    pub length: u16,
    /// Bytes the CPU must copy before it may run again.
    pub to_copy: u16,
    /// Copy 0x10 bytes per HBlank instead of everything at once.
    pub hblank: bool,
}

/// The memory map: every CPU-visible address is routed from here, and it
/// owns every device sitting on the bus.
#[derive(Clone, Debug)]
pub struct Mmu {
    pub cart: Cartridge,
    pub mode: CartMode,
    pub wram: [[u8; WRAM_BANK_SIZE]; 8],
    pub wram_bank: usize,
    pub unused: [u8; UNUSED_SIZE],
    /// Raw register file for 0xFF00-0xFF7F. Registers owned by the timer
    /// and link cable live in those components instead.
    pub io: [u8; 0x80],
    pub hram: [u8; HRAM_SIZE],
    pub ie: u8,
    pub ppu: Ppu,
    pub apu: Apu,
    pub timer: Timer,
    pub link: LinkCable,
    pub cheats: Cheats,
    pub keys: Keys,
    pub dma: OamDma,
    pub hdma: Hdma,
    pub double_speed: bool,
    /// Block at VBlank until the frontend posts `frame_sync`.
    pub sync_to_video: bool,
    pub frame_sync: FrameSync,
}

impl Mmu {
    pub fn new(cart: Cartridge) -> Self {
        let mode = cart.mode;
        let mut ppu = Ppu::new(mode);
        // Palette RAM powers up white.
        ppu.bgp = [0xFF; PALETTE_RAM_SIZE];
        let mut timer = Timer::new();
        timer.div_timer = 0xAC00;
        let mut link = LinkCable::new();
        link.sc = 0x7E;
        Self {
            cart,
            mode,
            wram: [[0; WRAM_BANK_SIZE]; 8],
            wram_bank: 1,
            unused: [0; UNUSED_SIZE],
            io: initial_io(mode),
            hram: [0; HRAM_SIZE],
            ie: 0,
            ppu,
            apu: Apu::new(),
            timer,
            link,
            cheats: Cheats::default(),
            keys: Keys::default(),
            dma: OamDma::default(),
            hdma: Hdma::default(),
            double_speed: false,
            sync_to_video: false,
            frame_sync: FrameSync::new(),
        }
    }

    /// CPU read, subject to bus contention and register masks.
    pub fn read(&self, addr: u16) -> u8 {
        self.read_inner(addr, false)
    }

    pub fn write(&mut self, addr: u16, val: u8) {
        self.write_inner(addr, val, false);
    }

    /// Read ignoring OAM contention and register masks.
    pub fn read_force(&self, addr: u16) -> u8 {
        self.read_inner(addr, true)
    }

    /// Store a raw value without masks or register side effects.
    pub fn write_force(&mut self, addr: u16, val: u8) {
        self.write_inner(addr, val, true);
    }

    pub fn if_reg(&self) -> u8 {
        self.io[io(IF)]
    }

    pub fn set_if_reg(&mut self, val: u8) {
        self.io[io(IF)] = val;
    }

    fn oam_blocked(&self) -> bool {
        if self.dma.running {
            return true;
        }
        !self.ppu.lcd_disable
            && matches!(get_mode(self.io[io(STAT)]), MODE_OAM_READ | MODE_TRANSFER)
    }

    fn read_inner(&self, addr: u16, force: bool) -> u8 {
        match addr {
            0x0000..=0x7FFF => {
                let val = self.cart.read(addr);
                if self.cheats.enabled {
                    self.cheats.gamegenie_read(addr, val)
                } else {
                    val
                }
            }
            0x8000..=0x9FFF => self.ppu.vram[self.ppu.vram_bank][(addr - 0x8000) as usize],
            0xA000..=0xBFFF => self.cart.read(addr),
            0xC000..=0xCFFF => self.wram[0][(addr - 0xC000) as usize],
            0xD000..=0xDFFF => self.wram[self.wram_bank][(addr - 0xD000) as usize],
            // Echo RAM
            0xE000..=0xFDFF => self.read_inner(addr - 0x2000, force),
            0xFE00..=0xFE9F => {
                if !force && self.oam_blocked() {
                    0xFF
                } else {
                    self.ppu.oam[(addr - 0xFE00) as usize]
                }
            }
            0xFEA0..=0xFEFF => self.unused[unused_index(addr)],
            0xFF00..=0xFF7F => self.io_read(addr, force),
            0xFF80..=0xFFFE => self.hram[(addr - 0xFF80) as usize],
            IE => self.ie,
        }
    }

    fn write_inner(&mut self, addr: u16, val: u8, force: bool) {
        match addr {
            0x0000..=0x7FFF | 0xA000..=0xBFFF => self.cart.write(addr, val),
            0x8000..=0x9FFF => self.ppu.vram[self.ppu.vram_bank][(addr - 0x8000) as usize] = val,
            0xC000..=0xCFFF => self.wram[0][(addr - 0xC000) as usize] = val,
            0xD000..=0xDFFF => self.wram[self.wram_bank][(addr - 0xD000) as usize] = val,
            0xE000..=0xFDFF => self.write_inner(addr - 0x2000, val, force),
            0xFE00..=0xFE9F => {
                if force || !self.oam_blocked() {
                    self.ppu.oam[(addr - 0xFE00) as usize] = val;
                }
            }
            0xFEA0..=0xFEFF => self.unused[unused_index(addr)] = val,
            0xFF00..=0xFF7F => self.io_write(addr, val, force),
            0xFF80..=0xFFFE => self.hram[(addr - 0xFF80) as usize] = val,
            IE => self.ie = val,
        }
    }

    fn io_read(&self, addr: u16, force: bool) -> u8 {
        if !self.mode.is_gbc() && gbc_only(addr) {
            return 0xFF;
        }
        let idx = io(addr);
        let raw = match addr {
            JOYP if !force => self.keys.joyp(self.io[idx]),
            SB | SC => self.link.read(addr),
            DIV | TIMA | TMA | TAC => self.timer.read(addr),
            // While channel 3 plays, wave RAM reads see the byte being played.
            WAVE_START..WAVE_END if !force && self.apu.ch3.enabled => {
                return self.io[io(self.apu.wave.addr)];
            }
            LY if !force && self.ppu.lcd_disable => 0,
            NR52 => (self.io[idx] & 0xF0) | self.apu.status(),
            BGPD => self.ppu.bgp[(self.io[io(BGPI)] & 0x3F) as usize],
            OBPD => self.ppu.obp[(self.io[io(OBPI)] & 0x3F) as usize],
            _ => self.io[idx],
        };
        if force { raw } else { raw | !READ_MASK[idx] }
    }

    fn io_write(&mut self, addr: u16, val: u8, force: bool) {
        if !self.mode.is_gbc() && gbc_only(addr) {
            return;
        }
        let idx = io(addr);
        if force {
            match addr {
                SB => self.link.sb = val,
                SC => self.link.sc = val,
                DIV => self.timer.div_timer = (val as u16) << 8,
                TIMA => self.timer.tima = val,
                TMA => self.timer.tma = val,
                TAC => self.timer.tac = val,
                _ => self.io[idx] = val,
            }
            return;
        }

        let mask = WRITE_MASK[idx];
        let masked = (self.io[idx] & !mask) | (val & mask);

        if (NR10..=NR52).contains(&addr) {
            if addr != NR52 && self.apu.disabled {
                return;
            }
            self.io[idx] = masked;
            self.apu.write(addr, val, &mut self.io);
            return;
        }

        match addr {
            SB | SC => self.link.write(addr, val & mask),
            DIV => self.timer.write(addr, val),
            TIMA | TMA | TAC => self.timer.write(addr, val & mask),
            LY => self.io[idx] = 0,
            LCDC => {
                if check_bit(val, 7) {
                    self.ppu.enable_lcd();
                } else {
                    self.ppu.disable_lcd(&mut self.io);
                }
                self.io[idx] = masked;
            }
            DMA => {
                self.dma.new_source = (val as u16) << 8;
                // Echo RAM and above fold back onto WRAM.
                if self.dma.new_source > 0xE000 {
                    self.dma.new_source -= 0x2000;
                }
                self.dma.requested = true;
                self.io[idx] = masked;
            }
            VBK => {
                self.io[idx] = masked;
                self.ppu.vram_bank = (masked & 0x01) as usize;
            }
            HDMA1 => {
                // Sources in VRAM or echo/IO space are refused.
                if val < 0x80 || (0xA0..0xE0).contains(&val) {
                    self.io[idx] = val;
                }
            }
            HDMA5 => self.start_hdma(val),
            BGPD | OBPD => self.write_palette(addr, val),
            SVBK => {
                let bank = (val & 0x07).max(1);
                self.io[idx] = bank;
                self.wram_bank = bank as usize;
            }
            _ => self.io[idx] = masked,
        }
    }

    fn write_palette(&mut self, addr: u16, val: u8) {
        let (index_reg, ram) = if addr == BGPD {
            (BGPI, &mut self.ppu.bgp)
        } else {
            (OBPI, &mut self.ppu.obp)
        };
        let mut index = self.io[io(index_reg)];
        ram[(index & 0x3F) as usize] = val;
        if check_bit(index, 7) {
            index = index.wrapping_add(1);
            if index & 0x7F == 0x40 {
                index = bit(7);
            }
            self.io[io(index_reg)] = index;
        }
    }

    fn start_hdma(&mut self, val: u8) {
        let idx = io(HDMA5);
        if !check_bit(val, 7) && self.hdma.length > 0 {
            debug!("HDMA cancelled with 0x{:03X} bytes left", self.hdma.length);
            self.hdma.length = 0;
            self.hdma.to_copy = 0;
            self.io[idx] |= 0x80;
            return;
        }
        let src_hi = self.io[io(HDMA1)];
        let src_lo = self.io[io(HDMA2)] & 0xF0;
        let dst_hi = (self.io[io(HDMA3)] & 0x1F) | 0x80;
        let dst_lo = self.io[io(HDMA4)] & 0xF0;
        self.hdma.source = u16::from_be_bytes([src_hi, src_lo]);
        self.hdma.dest = u16::from_be_bytes([dst_hi, dst_lo]);
        self.hdma.length = ((val & 0x7F) as u16 + 1) * 0x10;
        self.io[idx] = val;
        if check_bit(val, 7) {
            self.hdma.hblank = true;
        } else {
            self.hdma.to_copy = self.hdma.length;
            self.hdma.hblank = false;
        }
    }

    /// Copy the next part of an HDMA transfer. Runs instead of the CPU for
    /// this tick.
    pub fn hdma_copy_chunk(&mut self) {
        if self.hdma.to_copy == 0 {
            warn!("HDMA already finished.");
            return;
        }
        let chunk = if self.double_speed { 4 } else { 8 };
        for _ in 0..chunk {
            if self.hdma.to_copy == 0 {
                break;
            }
            let byte = self.read_force(self.hdma.source);
            self.write_force(self.hdma.dest, byte);
            self.hdma.source = self.hdma.source.wrapping_add(1);
            self.hdma.dest = 0x8000 | (self.hdma.dest.wrapping_add(1) & 0x1FFF);
            self.hdma.length -= 1;
            self.hdma.to_copy -= 1;
        }
        self.write_force(HDMA1, high_byte(self.hdma.source));
        self.write_force(HDMA2, low_byte(self.hdma.source));
        self.write_force(HDMA3, high_byte(self.hdma.dest));
        self.write_force(HDMA4, low_byte(self.hdma.dest));
        let remaining = if self.hdma.length == 0 {
            0xFF
        } else {
            // A partial last block reads back as 0xFF.
            ((self.hdma.length >> 4) as u8).wrapping_sub(1)
        };
        self.write_force(HDMA5, remaining);
    }

    /// Advance OAM DMA by one CPU tick.
    pub fn dma_clock(&mut self) {
        if self.dma.timer > 0 {
            self.dma.running = true;
            let byte = self.read(self.dma.source);
            self.ppu.oam[low_byte(self.dma.source) as usize] = byte;
            self.dma.timer -= 1;
            self.dma.source = self.dma.source.wrapping_add(1);
        } else {
            self.dma.running = false;
        }
        if self.dma.requested {
            self.dma.requested = false;
            self.dma.timer = DMA_TIMER;
            self.dma.source = self.dma.new_source;
        }
    }

    pub fn apu_clock(&mut self) {
        self.apu.clock(&self.io, self.sync_to_video, self.keys.turbo);
    }

    /// One PPU dot plus everything hanging off its HBlank/VBlank edges.
    pub fn ppu_clock(&mut self) -> PpuEvents {
        let events = self.ppu.clock(&mut self.io, self.dma.running);
        if self.hdma.hblank
            && self.hdma.length > 0
            && self.hdma.to_copy == 0
            && (events.hblank || self.ppu.lcd_disable)
        {
            self.hdma.to_copy = 0x10;
        }
        if events.vblank {
            if self.cheats.enabled {
                let (wram0, banks) = self.wram.split_at_mut(1);
                let wramx = &mut banks[self.wram_bank - 1];
                self.cheats.gameshark_update(&mut self.cart, &mut wram0[0], wramx);
            }
            if self.sync_to_video && !self.keys.turbo {
                self.frame_sync.wait();
            }
        }
        events
    }

    /// Advance DIV; the APU frame sequencer follows its falling edges.
    pub fn div_clock(&mut self) {
        let edge = self.timer.clock_div(self.double_speed, &mut self.io[io(IF)]);
        if edge && !self.apu.disabled {
            self.apu.sequencer_clock(&mut self.io);
        }
    }

    pub fn link_clock(&mut self) {
        self.link.clock(&mut self.io[io(IF)]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mmu(gbc: bool) -> Mmu {
        let mut rom = vec![0u8; 0x8000];
        if gbc {
            rom[0x0143] = 0x80;
        }
        Mmu::new(Cartridge::load(rom).unwrap())
    }

    #[test]
    fn echo_mirrors_wram() {
        let mut m = mmu(false);
        m.write(0xC123, 0x42);
        assert_eq!(m.read(0xE123), 0x42);
        m.write(0xF456, 0x99);
        assert_eq!(m.read(0xD456), 0x99);
    }

    #[test]
    fn io_masks_apply() {
        let mut m = mmu(false);
        m.write(IF, 0x00);
        assert_eq!(m.read(IF), 0xE0);
        m.write(STAT, 0xFF);
        // Mode bits are read-only.
        assert_eq!(m.io[io(STAT)] & 0x07, 0x00);
        assert_eq!(m.read(0xFF03), 0xFF);
    }

    #[test]
    fn gbc_registers_hidden_in_dmg_mode() {
        let mut m = mmu(false);
        m.write(SVBK, 0x03);
        assert_eq!(m.read(SVBK), 0xFF);
        assert_eq!(m.wram_bank, 1);
        let mut m = mmu(true);
        m.write(SVBK, 0x03);
        assert_eq!(m.wram_bank, 3);
        m.write(SVBK, 0x00);
        assert_eq!(m.wram_bank, 1);
    }

    #[test]
    fn ly_write_resets_and_lcd_off_reads_zero() {
        let mut m = mmu(false);
        m.io[io(LY)] = 0x40;
        m.write(LY, 0x12);
        assert_eq!(m.io[io(LY)], 0);
        m.write(LCDC, 0x11);
        assert!(m.ppu.lcd_disable);
        assert_eq!(m.read(LY), 0);
    }

    #[test]
    fn oam_blocked_during_dma() {
        let mut m = mmu(false);
        m.write(LCDC, 0x00);
        m.write(0xFE00, 0x11);
        assert_eq!(m.read(0xFE00), 0x11);
        m.dma.running = true;
        assert_eq!(m.read(0xFE00), 0xFF);
        m.write(0xFE00, 0x22);
        assert_eq!(m.read_force(0xFE00), 0x11);
    }

    #[test]
    fn oam_dma_starts_next_tick_and_copies_160_bytes() {
        let mut m = mmu(false);
        for i in 0..0xA0u16 {
            m.write(0xC000 + i, i as u8);
        }
        m.write(DMA, 0xC0);
        assert!(m.dma.requested);
        m.dma_clock();
        assert!(!m.dma.running);
        assert_eq!(m.dma.timer, DMA_TIMER);
        for _ in 0..DMA_TIMER {
            m.dma_clock();
        }
        m.dma_clock();
        assert!(!m.dma.running);
        assert_eq!(m.ppu.oam[0x9F], 0x9F);
        assert_eq!(m.ppu.oam[0x10], 0x10);
    }

    #[test]
    fn dma_from_echo_folds_back() {
        let mut m = mmu(false);
        m.write(DMA, 0xF1);
        assert_eq!(m.dma.new_source, 0xD100);
    }

    #[test]
    fn palette_index_auto_increments() {
        let mut m = mmu(true);
        m.write(BGPI, 0xBE);
        m.write(BGPD, 0x12);
        m.write(BGPD, 0x34);
        assert_eq!(m.ppu.bgp[0x3E], 0x12);
        assert_eq!(m.ppu.bgp[0x3F], 0x34);
        assert_eq!(m.io[io(BGPI)], 0x80);
        m.write(BGPI, 0x3F);
        assert_eq!(m.read(BGPD), 0x34);
    }

    #[test]
    fn general_hdma_copies_whole_block() {
        let mut m = mmu(true);
        for i in 0..0x20u16 {
            m.write(0xC000 + i, 0xA0 + i as u8);
        }
        m.write(HDMA1, 0xC0);
        m.write(HDMA2, 0x00);
        m.write(HDMA3, 0x01);
        m.write(HDMA4, 0x00);
        m.write(HDMA5, 0x01);
        assert_eq!(m.hdma.to_copy, 0x20);
        while m.hdma.to_copy > 0 {
            m.hdma_copy_chunk();
        }
        assert_eq!(m.ppu.vram[0][0x100], 0xA0);
        assert_eq!(m.ppu.vram[0][0x11F], 0xBF);
        assert_eq!(m.read(HDMA5), 0xFF);
    }

    #[test]
    fn hdma_cancel_sets_bit_7() {
        let mut m = mmu(true);
        m.write(HDMA1, 0xC0);
        m.write(HDMA3, 0x00);
        m.write(HDMA5, 0x83);
        assert!(m.hdma.hblank);
        assert_eq!(m.hdma.to_copy, 0);
        m.write(HDMA5, 0x00);
        assert_eq!(m.hdma.length, 0);
        assert_eq!(m.read(HDMA5) & 0x80, 0x80);
    }

    #[test]
    fn apu_registers_ignored_while_powered_off() {
        let mut m = mmu(false);
        m.write(NR52, 0x00);
        m.write(NR50, 0x77);
        assert_eq!(m.read(NR50), 0x00);
        m.write(NR52, 0x80);
        m.write(NR50, 0x77);
        assert_eq!(m.read(NR50), 0x77);
    }

    #[test]
    fn unused_area_mirrors_upper_block() {
        let mut m = mmu(false);
        m.write(0xFED3, 0x5A);
        assert_eq!(m.read(0xFEE3), 0x5A);
        assert_eq!(m.read(0xFEF3), 0x5A);
        m.write(0xFEA0, 0x11);
        assert_eq!(m.read(0xFEA0), 0x11);
    }
}
