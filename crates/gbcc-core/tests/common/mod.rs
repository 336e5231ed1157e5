#![allow(dead_code)]

use gbcc_core::{
    Core,
    cartridge::{NINTENDO_LOGO, header_checksum},
};
use once_cell::sync::Lazy;

pub const PROGRAM_START: u16 = 0x0150;

/// `JR -2`: spin in place forever.
pub const SPIN: [u8; 2] = [0x18, 0xFE];

/// A 32 KiB DMG ROM with a valid header that just spins.
pub static SPIN_ROM: Lazy<Vec<u8>> = Lazy::new(|| RomBuilder::new().program(&SPIN).build());

/// Builds ROM images with a valid logo and header checksum.
pub struct RomBuilder {
    rom: Vec<u8>,
}

impl RomBuilder {
    pub fn new() -> Self {
        Self {
            rom: vec![0u8; 0x8000],
        }
    }

    pub fn banks(mut self, banks: usize) -> Self {
        self.rom.resize(banks * 0x4000, 0);
        let flag = banks.trailing_zeros().saturating_sub(1) as u8;
        self.rom[0x0148] = flag;
        self
    }

    pub fn cart_type(mut self, cart_type: u8) -> Self {
        self.rom[0x0147] = cart_type;
        self
    }

    pub fn ram_size(mut self, flag: u8) -> Self {
        self.rom[0x0149] = flag;
        self
    }

    pub fn gbc(mut self) -> Self {
        self.rom[0x0143] = 0x80;
        self
    }

    pub fn title(mut self, title: &str) -> Self {
        let bytes = title.as_bytes();
        self.rom[0x0134..0x0134 + bytes.len()].copy_from_slice(bytes);
        self
    }

    /// Code placed after the header, reached by a `JP 0x0150` at the
    /// entry point.
    pub fn program(self, code: &[u8]) -> Self {
        self.code_at(0x0100, &[0xC3, 0x50, 0x01])
            .code_at(PROGRAM_START as usize, code)
    }

    pub fn code_at(mut self, addr: usize, code: &[u8]) -> Self {
        self.rom[addr..addr + code.len()].copy_from_slice(code);
        self
    }

    pub fn build(mut self) -> Vec<u8> {
        self.rom[0x0104..0x0134].copy_from_slice(&NINTENDO_LOGO);
        self.rom[0x014D] = header_checksum(&self.rom);
        self.rom
    }
}

pub fn core(rom: Vec<u8>) -> Core {
    let mut core = Core::from_rom(rom).expect("ROM loads");
    // Skip real-time pacing.
    core.set_turbo(true);
    core
}

/// Run whole CPU ticks (four clocks each at normal speed).
pub fn run_ticks(core: &mut Core, ticks: usize) {
    for _ in 0..ticks * 4 {
        core.emulate_cycle();
    }
}
