//! Game Genie and GameShark codes.
//!
//! Game Genie codes patch ROM reads when the address and original byte
//! match. GameShark codes poke RAM once per frame.

use log::{info, warn};

use crate::{cartridge::Cartridge, error::CheatError};

/// Maximum number of codes of each kind.
pub const MAX_CHEATS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameGenieCheat {
    pub address: u16,
    pub old_data: u8,
    pub new_data: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameSharkCheat {
    pub ram_bank: u8,
    pub address: u16,
    pub new_data: u8,
}

fn hex2int(c: char) -> Result<u8, CheatError> {
    c.to_digit(16)
        .map(|d| d as u8)
        .ok_or(CheatError::InvalidDigit(c))
}

fn digits<const N: usize>(code: &[char]) -> Result<[u8; N], CheatError> {
    let mut out = [0u8; N];
    for (d, &c) in out.iter_mut().zip(code) {
        *d = hex2int(c)?;
    }
    Ok(out)
}

/// Decode a 9-digit Game Genie code (hyphens already removed).
pub fn parse_gamegenie(code: &[char]) -> Result<GameGenieCheat, CheatError> {
    let d: [u8; 9] = digits(code)?;
    let new_data = (d[0] << 4) | d[1];
    let old = (d[6] << 4) | d[8];
    let old_data = ((old << 6) | (old >> 2)) ^ 0xBA;
    // The 8th digit is a checksum nobody verifies.
    let address = (((d[5] ^ 0x0F) as u16) << 12)
        | ((d[2] as u16) << 8)
        | ((d[3] as u16) << 4)
        | d[4] as u16;
    Ok(GameGenieCheat {
        address,
        old_data,
        new_data,
    })
}

/// Decode an 8-digit GameShark code.
pub fn parse_gameshark(code: &[char]) -> Result<GameSharkCheat, CheatError> {
    let d: [u8; 8] = digits(code)?;
    Ok(GameSharkCheat {
        ram_bank: (d[0] << 4) | d[1],
        new_data: (d[2] << 4) | d[3],
        address: ((d[6] as u16) << 12)
            | ((d[7] as u16) << 8)
            | ((d[4] as u16) << 4)
            | d[5] as u16,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cheats {
    pub enabled: bool,
    pub gamegenie: Vec<GameGenieCheat>,
    pub gameshark: Vec<GameSharkCheat>,
}

impl Cheats {
    /// Add a code of either format, telling them apart by digit count.
    pub fn add_fuzzy(&mut self, code: &str) -> Result<(), CheatError> {
        let cheat: Vec<char> = code.chars().filter(|&c| c != '-').collect();
        match cheat.len() {
            8 => {
                if self.gameshark.len() >= MAX_CHEATS {
                    return Err(CheatError::TooMany);
                }
                let parsed = parse_gameshark(&cheat)?;
                info!("Added GameShark code {code}");
                self.gameshark.push(parsed);
            }
            9 => {
                if self.gamegenie.len() >= MAX_CHEATS {
                    return Err(CheatError::TooMany);
                }
                let parsed = parse_gamegenie(&cheat)?;
                info!("Added Game Genie code {code}");
                self.gamegenie.push(parsed);
            }
            n => {
                warn!("Invalid cheat code '{code}'.");
                return Err(CheatError::InvalidLength(n));
            }
        }
        self.enabled = true;
        Ok(())
    }

    /// Substitute a ROM byte if a Game Genie code matches.
    pub fn gamegenie_read(&self, addr: u16, val: u8) -> u8 {
        self.gamegenie
            .iter()
            .find(|c| c.address == addr && c.old_data == val)
            .map_or(val, |c| c.new_data)
    }

    /// Apply every GameShark poke to cartridge RAM or WRAM.
    pub fn gameshark_update(&self, cart: &mut Cartridge, wram0: &mut [u8], wramx: &mut [u8]) {
        for cheat in &self.gameshark {
            match cheat.address {
                0xA000..=0xBFFF => {
                    if cheat.ram_bank as usize > cart.ram_banks {
                        continue;
                    }
                    let idx = cheat.ram_bank as usize * 0x2000 + (cheat.address as usize - 0xA000);
                    if let Some(b) = cart.ram.get_mut(idx) {
                        *b = cheat.new_data;
                    }
                }
                0xC000..=0xCFFF => wram0[cheat.address as usize - 0xC000] = cheat.new_data,
                0xD000..=0xDFFF => wramx[cheat.address as usize - 0xD000] = cheat.new_data,
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    #[test]
    fn gameshark_fixture() {
        let c = parse_gameshark(&chars("01160056")).unwrap();
        assert_eq!(c.ram_bank, 0x01);
        assert_eq!(c.new_data, 0x16);
        assert_eq!(c.address, 0x5600);
    }

    #[test]
    fn gamegenie_decoding() {
        let c = parse_gamegenie(&chars("00A17BC9F")).unwrap();
        assert_eq!(c.new_data, 0x00);
        assert_eq!(c.address, ((0xB ^ 0xF) << 12) | 0xA17);
        let old = 0xCFu8;
        assert_eq!(c.old_data, ((old << 6) | (old >> 2)) ^ 0xBA);
    }

    #[test]
    fn fuzzy_add_strips_hyphens() {
        let mut cheats = Cheats::default();
        cheats.add_fuzzy("00A-17B-C9F").unwrap();
        assert_eq!(cheats.gamegenie.len(), 1);
        cheats.add_fuzzy("01160056").unwrap();
        assert_eq!(cheats.gameshark.len(), 1);
        assert!(cheats.enabled);
    }

    #[test]
    fn rejects_bad_codes() {
        let mut cheats = Cheats::default();
        assert_eq!(cheats.add_fuzzy("1234"), Err(CheatError::InvalidLength(4)));
        assert_eq!(cheats.add_fuzzy("0116005G"), Err(CheatError::InvalidDigit('G')));
        assert_eq!(cheats.add_fuzzy("0123456789"), Err(CheatError::InvalidLength(10)));
    }

    #[test]
    fn limit_per_kind() {
        let mut cheats = Cheats::default();
        for _ in 0..MAX_CHEATS {
            cheats.add_fuzzy("01160056").unwrap();
        }
        assert_eq!(cheats.add_fuzzy("01160056"), Err(CheatError::TooMany));
        assert!(cheats.add_fuzzy("00A17BC9F").is_ok());
    }

    #[test]
    fn genie_read_requires_matching_old_byte() {
        let mut cheats = Cheats::default();
        cheats.gamegenie.push(GameGenieCheat {
            address: 0x4123,
            old_data: 0x10,
            new_data: 0x99,
        });
        assert_eq!(cheats.gamegenie_read(0x4123, 0x10), 0x99);
        assert_eq!(cheats.gamegenie_read(0x4123, 0x11), 0x11);
        assert_eq!(cheats.gamegenie_read(0x4124, 0x10), 0x10);
    }
}
