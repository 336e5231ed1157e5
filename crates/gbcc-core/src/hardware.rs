/// Master clock of the console in Hz (single speed).
pub const CLOCK_FREQ: u32 = 4_194_304;

/// Clocks between two VBlank interrupts.
pub const CLOCKS_PER_FRAME: u32 = 70_224;

pub const SCREEN_WIDTH: usize = 160;
pub const SCREEN_HEIGHT: usize = 144;
pub const SCREEN_SIZE: usize = SCREEN_WIDTH * SCREEN_HEIGHT;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
/// Which console the cartridge runs on.
///
/// Selected once from the header's GBC flag; GBC-only registers read 0xFF
/// and ignore writes in DMG mode.
pub enum CartMode {
    #[default]
    Dmg,
    Gbc,
}

impl CartMode {
    #[inline]
    pub const fn is_gbc(self) -> bool {
        matches!(self, CartMode::Gbc)
    }

    /// Mode from the header byte at 0x0143.
    pub const fn from_header_flag(flag: u8) -> Self {
        if flag == 0x80 || flag == 0xC0 {
            CartMode::Gbc
        } else {
            CartMode::Dmg
        }
    }
}

/// Offset of an I/O register inside the 0x80-byte register file.
#[inline]
pub const fn io(addr: u16) -> usize {
    (addr - 0xFF00) as usize
}

// I/O register addresses
pub const JOYP: u16 = 0xFF00;
pub const SB: u16 = 0xFF01;
pub const SC: u16 = 0xFF02;
pub const DIV: u16 = 0xFF04;
pub const TIMA: u16 = 0xFF05;
pub const TMA: u16 = 0xFF06;
pub const TAC: u16 = 0xFF07;
pub const IF: u16 = 0xFF0F;
pub const NR10: u16 = 0xFF10;
pub const NR11: u16 = 0xFF11;
pub const NR12: u16 = 0xFF12;
pub const NR13: u16 = 0xFF13;
pub const NR14: u16 = 0xFF14;
pub const NR21: u16 = 0xFF16;
pub const NR22: u16 = 0xFF17;
pub const NR23: u16 = 0xFF18;
pub const NR24: u16 = 0xFF19;
pub const NR30: u16 = 0xFF1A;
pub const NR31: u16 = 0xFF1B;
pub const NR32: u16 = 0xFF1C;
pub const NR33: u16 = 0xFF1D;
pub const NR34: u16 = 0xFF1E;
pub const NR41: u16 = 0xFF20;
pub const NR42: u16 = 0xFF21;
pub const NR43: u16 = 0xFF22;
pub const NR44: u16 = 0xFF23;
pub const NR50: u16 = 0xFF24;
pub const NR51: u16 = 0xFF25;
pub const NR52: u16 = 0xFF26;
pub const WAVE_START: u16 = 0xFF30;
pub const WAVE_END: u16 = 0xFF40;
pub const LCDC: u16 = 0xFF40;
pub const STAT: u16 = 0xFF41;
pub const SCY: u16 = 0xFF42;
pub const SCX: u16 = 0xFF43;
pub const LY: u16 = 0xFF44;
pub const LYC: u16 = 0xFF45;
pub const DMA: u16 = 0xFF46;
pub const BGP: u16 = 0xFF47;
pub const OBP0: u16 = 0xFF48;
pub const OBP1: u16 = 0xFF49;
pub const WY: u16 = 0xFF4A;
pub const WX: u16 = 0xFF4B;
pub const KEY1: u16 = 0xFF4D;
pub const VBK: u16 = 0xFF4F;
pub const HDMA1: u16 = 0xFF51;
pub const HDMA2: u16 = 0xFF52;
pub const HDMA3: u16 = 0xFF53;
pub const HDMA4: u16 = 0xFF54;
pub const HDMA5: u16 = 0xFF55;
pub const RP: u16 = 0xFF56;
pub const BGPI: u16 = 0xFF68;
pub const BGPD: u16 = 0xFF69;
pub const OBPI: u16 = 0xFF6A;
pub const OBPD: u16 = 0xFF6B;
pub const SVBK: u16 = 0xFF70;
pub const IE: u16 = 0xFFFF;

// Interrupt vectors, highest priority first
pub const INT_VBLANK: u16 = 0x40;
pub const INT_LCDSTAT: u16 = 0x48;
pub const INT_TIMER: u16 = 0x50;
pub const INT_SERIAL: u16 = 0x58;
pub const INT_JOYPAD: u16 = 0x60;
