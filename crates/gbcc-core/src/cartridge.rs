use std::{
    fs, io,
    path::{Path, PathBuf},
};

use log::{debug, error, info, warn};

use crate::{
    camera::Camera,
    error::CoreError,
    hardware::CartMode,
    mbc::{Huc3, Mbc, MbcKind, Mmm01},
    mbc7::Mbc7,
};

pub const ROM_BANK_SIZE: usize = 0x4000;
pub const SRAM_BANK_SIZE: usize = 0x2000;

const LOGO_START: usize = 0x0104;
// The GBC boot ROM only compares the first half of the logo.
const LOGO_CHECK_END: usize = 0x011C;
const TITLE_START: usize = 0x0134;
const TITLE_SIZE: usize = 16;
const GBC_FLAG: usize = 0x0143;
const CART_TYPE: usize = 0x0147;
const ROM_SIZE_FLAG: usize = 0x0148;
const RAM_SIZE_FLAG: usize = 0x0149;
const DESTINATION_CODE: usize = 0x014A;
const HEADER_CHECKSUM_START: usize = 0x0134;
const HEADER_CHECKSUM_END: usize = 0x014D;
const GLOBAL_CHECKSUM: usize = 0x014E;

/// The bitmap every licensed cartridge carries at 0x0104.
pub const NINTENDO_LOGO: [u8; 48] = [
    0xCE, 0xED, 0x66, 0x66, 0xCC, 0x0D, 0x00, 0x0B, 0x03, 0x73, 0x00, 0x83, 0x00, 0x0C, 0x00, 0x0D,
    0x00, 0x08, 0x11, 0x1F, 0x88, 0x89, 0x00, 0x0E, 0xDC, 0xCC, 0x6E, 0xE6, 0xDD, 0xDD, 0xD9, 0x99,
    0xBB, 0xBB, 0x67, 0x63, 0x6E, 0x0E, 0xEC, 0xCC, 0xDD, 0xDC, 0x99, 0x9F, 0xBB, 0xB9, 0x33, 0x3E,
];

/// Check the logo and header checksum of a bank that starts with a
/// cartridge header.
///
/// The checksum passes when the bytes 0x0134..=0x014D plus 25 sum to a
/// multiple of 256.
pub fn verify_cartridge(bank: &[u8]) -> bool {
    if !logo_matches(bank) {
        return false;
    }
    header_checksum_matches(bank)
}

fn logo_matches(bank: &[u8]) -> bool {
    match bank.get(LOGO_START..LOGO_CHECK_END) {
        Some(logo) => logo == &NINTENDO_LOGO[..LOGO_CHECK_END - LOGO_START],
        None => false,
    }
}

fn header_checksum_matches(bank: &[u8]) -> bool {
    match bank.get(HEADER_CHECKSUM_START..=HEADER_CHECKSUM_END) {
        Some(bytes) => {
            let sum = bytes.iter().fold(25u8, |acc, &b| acc.wrapping_add(b));
            sum == 0
        }
        None => false,
    }
}

/// Value to store at 0x014D so that `verify_cartridge` passes.
pub fn header_checksum(bank: &[u8]) -> u8 {
    let mut x = 0u8;
    for &b in &bank[HEADER_CHECKSUM_START..HEADER_CHECKSUM_END] {
        x = x.wrapping_sub(b).wrapping_sub(1);
    }
    x
}

/// Capabilities decoded from the cartridge-type byte.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Hardware {
    battery: bool,
    timer: bool,
    rumble: bool,
}

fn decode_hardware(cart_type: u8) -> Result<(MbcKind, Hardware), CoreError> {
    let hw = |battery, timer, rumble| Hardware {
        battery,
        timer,
        rumble,
    };
    let decoded = match cart_type {
        0x00 => (MbcKind::None, hw(false, false, false)),
        0x01 | 0x02 => (MbcKind::Mbc1, hw(false, false, false)),
        0x03 => (MbcKind::Mbc1, hw(true, false, false)),
        0x05 => (MbcKind::Mbc2, hw(false, false, false)),
        0x06 => (MbcKind::Mbc2, hw(true, false, false)),
        0x08 => (MbcKind::None, hw(false, false, false)),
        0x09 => (MbcKind::None, hw(true, false, false)),
        0x0B | 0x0C => (MbcKind::Mmm01(Mmm01::default()), hw(false, false, false)),
        0x0D => (MbcKind::Mmm01(Mmm01::default()), hw(true, false, false)),
        0x0F | 0x10 => (MbcKind::Mbc3, hw(true, true, false)),
        0x11 | 0x12 => (MbcKind::Mbc3, hw(false, false, false)),
        0x13 => (MbcKind::Mbc3, hw(true, false, false)),
        0x19 | 0x1A => (MbcKind::Mbc5, hw(false, false, false)),
        0x1B => (MbcKind::Mbc5, hw(true, false, false)),
        0x1C | 0x1D => (MbcKind::Mbc5, hw(false, false, true)),
        0x1E => (MbcKind::Mbc5, hw(true, false, true)),
        0x20 => {
            error!("MBC6 not yet supported.");
            return Err(CoreError::UnsupportedMbc("MBC6"));
        }
        0x22 => (MbcKind::Mbc7(Box::default()), hw(true, false, true)),
        0xFC => (MbcKind::Camera(Box::default()), hw(true, false, false)),
        0xFD => {
            error!("Bandai TAMA5 not yet supported.");
            return Err(CoreError::UnsupportedMbc("Bandai TAMA5"));
        }
        0xFE => {
            warn!("HuC3 support is experimental");
            (MbcKind::Huc3(Huc3::default()), hw(true, true, false))
        }
        0xFF => (MbcKind::Huc1 { ir_mode: false }, hw(true, false, false)),
        other => {
            error!("Unrecognised hardware {other:02X}, falling back to MBC3.");
            (MbcKind::Mbc3, hw(false, false, false))
        }
    };
    Ok(decoded)
}

fn rom_size_from_flag(flag: u8) -> Option<usize> {
    match flag {
        0x00..=0x08 => Some(0x8000 << flag),
        0x52 => Some(72 * ROM_BANK_SIZE),
        0x53 => Some(80 * ROM_BANK_SIZE),
        0x54 => Some(96 * ROM_BANK_SIZE),
        _ => None,
    }
}

fn ram_size_from_flag(flag: u8, kind: &MbcKind) -> Result<usize, CoreError> {
    match flag {
        0x00 => Ok(if matches!(kind, MbcKind::Mbc2) { 0x200 } else { 0 }),
        0x01..=0x04 => Ok(0x200 << (2 * flag as usize)),
        0x05 => Ok(0x10000),
        other => {
            error!("Unknown ram size flag: {other}");
            Err(CoreError::InvalidRamSize(other))
        }
    }
}

#[derive(Debug, Clone)]
pub struct Cartridge {
    pub rom: Vec<u8>,
    pub rom_banks: usize,
    /// Battery RAM. Always at least one full bank when the cartridge has RAM.
    pub ram: Vec<u8>,
    /// RAM size advertised by the header; this many bytes are persisted.
    pub ram_size: usize,
    pub ram_banks: usize,
    pub title: String,
    pub mode: CartMode,
    pub battery: bool,
    pub timer: bool,
    pub rumble: bool,
    pub rumble_state: bool,
    pub mbc: Mbc,
    /// Set on every SRAM write, cleared by whoever persists the RAM.
    pub sram_dirty: bool,
    global_checksum: u16,
}

impl Cartridge {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, CoreError> {
        info!("Loading {}...", path.as_ref().display());
        let data = fs::read(&path)?;
        Self::load(data)
    }

    pub fn load(mut data: Vec<u8>) -> Result<Self, CoreError> {
        if data.is_empty() {
            return Err(CoreError::RomTooSmall);
        }
        let file_size = data.len();
        let mut rom_banks = file_size / ROM_BANK_SIZE;
        info!("Cartridge size: 0x{file_size:X} bytes ({rom_banks} banks)");
        if rom_banks < 2 {
            warn!("ROM smaller than minimum size of 2 banks");
            data.resize(2 * ROM_BANK_SIZE, 0);
            rom_banks = 2;
        }

        // MMM01 images keep their header in the last 32 KiB.
        let mut header_bank = ((0x1FE * ROM_BANK_SIZE) % data.len()) / ROM_BANK_SIZE;
        if !verify_cartridge(&data[header_bank * ROM_BANK_SIZE..]) {
            header_bank = 0;
        }
        let header = &data[header_bank * ROM_BANK_SIZE..];

        if !logo_matches(header) {
            warn!("Cartridge logo check failed");
        } else if !header_checksum_matches(header) {
            warn!("Cartridge checksum failed");
        } else {
            debug!("Cartridge logo and checksum passed");
        }

        let rom_size_flag = header[ROM_SIZE_FLAG];
        match rom_size_from_flag(rom_size_flag) {
            Some(size) if size != file_size => warn!("ROM size flag does not match file size"),
            Some(_) => {}
            None => error!("Unknown ROM size flag: 0x{rom_size_flag:02X}"),
        }

        let title = Self::parse_title(header);
        info!("Title: {title}");
        let mode = CartMode::from_header_flag(header[GBC_FLAG]);
        info!("Mode: {mode:?}");

        let (kind, hw) = decode_hardware(header[CART_TYPE])?;
        info!("Hardware: {kind}");
        let ram_size = ram_size_from_flag(header[RAM_SIZE_FLAG], &kind)?;
        let (ram, ram_banks) = if ram_size > 0 {
            info!(
                "Cartridge RAM: 0x{ram_size:X} bytes ({} banks)",
                ram_size / SRAM_BANK_SIZE
            );
            let len = ram_size.max(SRAM_BANK_SIZE);
            (vec![0u8; len], len / SRAM_BANK_SIZE)
        } else {
            (Vec::new(), 0)
        };

        match header[DESTINATION_CODE] {
            0x00 => info!("Region: Japan"),
            0x01 => info!("Region: Non-Japanese"),
            other => warn!("Unrecognised region code: 0x{other:02X}"),
        }

        let global_checksum =
            u16::from_be_bytes([header[GLOBAL_CHECKSUM], header[GLOBAL_CHECKSUM + 1]]);

        let mut cart = Self {
            rom: data,
            rom_banks,
            ram,
            ram_size,
            ram_banks,
            title,
            mode,
            battery: hw.battery,
            timer: hw.timer,
            rumble: hw.rumble,
            rumble_state: false,
            mbc: Mbc::new(kind),
            sram_dirty: false,
            global_checksum,
        };
        cart.mbc.rom0_bank = header_bank;
        cart.mbc.romx_bank = header_bank + 1;
        if cart.timer {
            cart.mbc.rtc.reset_base();
        }
        Ok(cart)
    }

    fn parse_title(header: &[u8]) -> String {
        let mut slice = &header[TITLE_START..TITLE_START + TITLE_SIZE];
        if let Some(pos) = slice.iter().position(|&b| b == 0) {
            slice = &slice[..pos];
        }
        String::from_utf8_lossy(slice).trim().to_string()
    }

    /// Checksum stored in the header, used to tie savestates to a ROM.
    pub fn global_checksum(&self) -> u16 {
        self.global_checksum
    }

    pub fn has_mbc7(&self) -> bool {
        matches!(self.mbc.kind, MbcKind::Mbc7(_))
    }

    /// Serialise battery-backed state: RAM (or EEPROM), then the RTC line.
    pub fn save_data(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.ram_size + 64);
        if let MbcKind::Mbc7(mbc7) = &self.mbc.kind {
            for cell in mbc7.eeprom.data.iter() {
                out.extend_from_slice(&cell.to_le_bytes());
            }
        } else {
            out.extend_from_slice(&self.ram[..self.ram_size.min(self.ram.len())]);
        }
        if self.timer {
            out.extend_from_slice(self.mbc.rtc.save_line().as_bytes());
        }
        out
    }

    /// Restore battery-backed state produced by [`Cartridge::save_data`].
    pub fn load_save_data(&mut self, data: &[u8]) {
        let body_len = if let MbcKind::Mbc7(mbc7) = &mut self.mbc.kind {
            for (cell, bytes) in mbc7.eeprom.data.iter_mut().zip(data.chunks_exact(2)) {
                *cell = u16::from_le_bytes([bytes[0], bytes[1]]);
            }
            mbc7.eeprom.data.len() * 2
        } else {
            let len = self.ram_size.min(self.ram.len()).min(data.len());
            self.ram[..len].copy_from_slice(&data[..len]);
            self.ram_size
        };
        if self.timer {
            let tail = data.get(body_len..).unwrap_or_default();
            let parsed = std::str::from_utf8(tail)
                .ok()
                .and_then(|line| self.mbc.rtc.parse_line(line));
            if parsed.is_none() {
                warn!("Couldn't parse RTC data, resetting clock base");
                self.mbc.rtc.reset_base();
            }
        }
        info!("Loaded save data ({} bytes)", data.len());
    }

    pub fn save_path(dir: &Path, rom_path: &Path) -> PathBuf {
        let stem = rom_path.file_stem().unwrap_or_default();
        dir.join(stem).with_extension("sav")
    }

    pub fn save_to_file(&mut self, path: &Path) -> io::Result<()> {
        if !self.battery {
            return Ok(());
        }
        fs::write(path, self.save_data())?;
        self.sram_dirty = false;
        info!("Saved {}", path.display());
        Ok(())
    }

    /// Load a save file, if one exists. A missing file leaves RAM at its
    /// power-on contents.
    pub fn load_from_file(&mut self, path: &Path) -> io::Result<()> {
        match fs::read(path) {
            Ok(bytes) => {
                self.load_save_data(&bytes);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No save file at {}", path.display());
                if self.timer {
                    self.mbc.rtc.reset_base();
                }
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub(crate) fn camera_mut(&mut self) -> Option<&mut Camera> {
        match &mut self.mbc.kind {
            MbcKind::Camera(cam) => Some(cam),
            _ => None,
        }
    }

    pub(crate) fn mbc7_mut(&mut self) -> Option<&mut Mbc7> {
        match &mut self.mbc.kind {
            MbcKind::Mbc7(m) => Some(m),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_rom() -> Vec<u8> {
        let mut rom = vec![0u8; 0x8000];
        rom[LOGO_START..LOGO_START + 48].copy_from_slice(&NINTENDO_LOGO);
        rom[TITLE_START..TITLE_START + 4].copy_from_slice(b"TEST");
        rom[HEADER_CHECKSUM_END] = header_checksum(&rom);
        rom
    }

    #[test]
    fn checksum_helper_produces_valid_header() {
        assert!(verify_cartridge(&header_rom()));
    }

    #[test]
    fn title_stops_at_nul() {
        let cart = Cartridge::load(header_rom()).unwrap();
        assert_eq!(cart.title, "TEST");
    }

    #[test]
    fn small_images_are_padded() {
        let cart = Cartridge::load(vec![0u8; 0x100]).unwrap();
        assert_eq!(cart.rom.len(), 0x8000);
        assert_eq!(cart.rom_banks, 2);
    }

    #[test]
    fn mbc6_is_rejected() {
        let mut rom = header_rom();
        rom[CART_TYPE] = 0x20;
        assert!(matches!(
            Cartridge::load(rom),
            Err(CoreError::UnsupportedMbc("MBC6"))
        ));
    }

    #[test]
    fn unknown_type_falls_back_to_mbc3() {
        let mut rom = header_rom();
        rom[CART_TYPE] = 0x42;
        let cart = Cartridge::load(rom).unwrap();
        assert!(matches!(cart.mbc.kind, MbcKind::Mbc3));
    }

    #[test]
    fn ram_sizes_follow_header_flag() {
        let sizes = [(0x01, 0x800), (0x02, 0x2000), (0x03, 0x8000), (0x04, 0x20000), (0x05, 0x10000)];
        for (flag, size) in sizes {
            let mut rom = header_rom();
            rom[CART_TYPE] = 0x03;
            rom[RAM_SIZE_FLAG] = flag;
            let cart = Cartridge::load(rom).unwrap();
            assert_eq!(cart.ram_size, size);
            assert!(cart.ram.len() >= SRAM_BANK_SIZE);
        }
    }

    #[test]
    fn mbc2_gets_internal_ram() {
        let mut rom = header_rom();
        rom[CART_TYPE] = 0x06;
        let cart = Cartridge::load(rom).unwrap();
        assert_eq!(cart.ram_size, 0x200);
        assert!(cart.battery);
    }
}
