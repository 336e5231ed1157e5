//! Game Boy Printer emulated on the far end of the link cable.
//!
//! The printer consumes one byte per serial transfer and answers with the
//! byte the game will read back. Packets look like
//! `88 33 | cmd comp len_lo len_hi | data... | sum_lo sum_hi | 00 00`, where
//! the last two positions return the alive byte and the status.

use log::{debug, error, info};

use crate::{bit_utils::set_bit, hardware::CLOCK_FREQ};

pub const IMAGE_BUFFER_SIZE: usize = 0x2000;
pub const PRINTER_WIDTH: usize = 160;

const MAGIC_BYTE_1: u8 = 0x88;
const MAGIC_BYTE_2: u8 = 0x33;
const ALIVE: u8 = 0x81;

const PRINTER_WIDTH_TILES: usize = PRINTER_WIDTH / 8;
const STRIP_HEIGHT: usize = 16;
const BYTES_PER_TILE_ROW: usize = PRINTER_WIDTH_TILES * 16;
/// Paper feed takes about 3ms per printed line.
const CLOCKS_PER_LINE: u32 = CLOCK_FREQ / 1000 * 3;

const CMD_INITIALISE: u8 = 0x01;
const CMD_START_PRINTING: u8 = 0x02;
const CMD_FILL_BUFFER: u8 = 0x04;
const CMD_READ_STATUS: u8 = 0x0F;

// Status register bits.
const STATUS_CHECKSUM_ERROR: u8 = 0;
const STATUS_PRINTING: u8 = 1;
const STATUS_BUFFER_FULL: u8 = 2;
const STATUS_UNPROCESSED: u8 = 3;

/// Position of the next byte within the current packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PacketByte {
    #[default]
    Command,
    Compression,
    LengthLsb,
    LengthMsb,
    Data,
    ChecksumLsb,
    ChecksumMsb,
    AliveIndicator,
    Status,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) enum Rle {
    #[default]
    Control,
    Literal(u8),
    Repeat(u8),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Packet {
    pub command: u8,
    pub compression: u8,
    pub data_length: u16,
    pub printer_checksum: u16,
    pub gb_checksum: u16,
    pub current_byte: PacketByte,
    pub data_byte: u16,
    pub(crate) rle: Rle,
}

/// A finished print, one greyscale byte per pixel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintedImage {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Printer {
    pub image_buffer: Vec<u8>,
    pub packet: Packet,
    pub margins: u8,
    pub palette: u8,
    pub exposure: u8,
    pub status: u8,
    pub magic: bool,
    pub in_packet: bool,
    pub connected: bool,
    /// Clocks left until the current print finishes.
    pub print_timer: u32,
    printed: Option<PrintedImage>,
}

impl Default for Printer {
    fn default() -> Self {
        Self::new()
    }
}

impl Printer {
    pub fn new() -> Self {
        Self {
            image_buffer: Vec::with_capacity(IMAGE_BUFFER_SIZE),
            packet: Packet::default(),
            margins: 0,
            palette: 0,
            exposure: 0,
            status: 0,
            magic: false,
            in_packet: false,
            connected: false,
            print_timer: 0,
            printed: None,
        }
    }

    /// Feed one byte from the Game Boy, returning the printer's reply.
    pub fn parse_byte(&mut self, byte: u8) -> u8 {
        if !self.in_packet {
            self.check_magic(byte);
            return 0;
        }
        let p = &mut self.packet;
        match p.current_byte {
            PacketByte::Command => {
                p.command = byte;
                p.current_byte = PacketByte::Compression;
                p.printer_checksum = p.printer_checksum.wrapping_add(byte as u16);
            }
            PacketByte::Compression => {
                p.compression = byte;
                p.current_byte = PacketByte::LengthLsb;
                p.printer_checksum = p.printer_checksum.wrapping_add(byte as u16);
            }
            PacketByte::LengthLsb => {
                p.data_length = byte as u16;
                p.current_byte = PacketByte::LengthMsb;
                p.printer_checksum = p.printer_checksum.wrapping_add(byte as u16);
            }
            PacketByte::LengthMsb => {
                p.data_length |= (byte as u16) << 8;
                p.current_byte = PacketByte::Data;
                p.printer_checksum = p.printer_checksum.wrapping_add(byte as u16);
            }
            PacketByte::Data if p.data_byte < p.data_length => {
                p.printer_checksum = p.printer_checksum.wrapping_add(byte as u16);
                match p.command {
                    CMD_START_PRINTING => self.parse_print_args(byte),
                    CMD_FILL_BUFFER => self.fill_buffer(byte),
                    _ => {}
                }
                self.packet.data_byte += 1;
                self.status = set_bit(self.status, STATUS_UNPROCESSED);
            }
            // Out of data: this byte is already the checksum.
            PacketByte::Data | PacketByte::ChecksumLsb => {
                p.gb_checksum = byte as u16;
                p.current_byte = PacketByte::ChecksumMsb;
            }
            PacketByte::ChecksumMsb => {
                p.gb_checksum |= (byte as u16) << 8;
                p.current_byte = PacketByte::AliveIndicator;
            }
            PacketByte::AliveIndicator => {
                p.current_byte = PacketByte::Status;
                return ALIVE;
            }
            PacketByte::Status => {
                self.magic = false;
                self.in_packet = false;
                if self.packet.gb_checksum != self.packet.printer_checksum {
                    error!(
                        "Printer checksum incorrect (Expected 0x{:04X}, Calculated 0x{:04X}).",
                        self.packet.gb_checksum, self.packet.printer_checksum
                    );
                    self.status = set_bit(self.status, STATUS_CHECKSUM_ERROR);
                }
                let status = self.status;
                self.execute();
                self.packet = Packet::default();
                return status;
            }
        }
        0
    }

    fn check_magic(&mut self, byte: u8) {
        match byte {
            MAGIC_BYTE_1 => self.magic = true,
            MAGIC_BYTE_2 if self.magic => {
                self.in_packet = true;
                self.magic = false;
            }
            _ => self.magic = false,
        }
    }

    fn printing(&self) -> bool {
        self.status & (1 << STATUS_PRINTING) != 0
    }

    fn execute(&mut self) {
        match self.packet.command {
            CMD_INITIALISE => {
                if self.printing() {
                    return;
                }
                let printed = self.printed.take();
                *self = Self::new();
                self.printed = printed;
                self.connected = true;
            }
            CMD_START_PRINTING => {
                if self.printing() {
                    return;
                }
                self.start_printing();
            }
            CMD_FILL_BUFFER | CMD_READ_STATUS => {}
            other => error!("Invalid printer command {other:02X}."),
        }
    }

    fn start_printing(&mut self) {
        let image = self.render();
        let margin_lines = ((self.margins >> 4) + (self.margins & 0x0F)) as usize * STRIP_HEIGHT;
        self.print_timer = ((image.height + margin_lines) as u32).max(1) * CLOCKS_PER_LINE;
        info!("Printing {}x{} image", image.width, image.height);
        self.printed = Some(image);
        self.status = set_bit(self.status, STATUS_PRINTING);
    }

    /// Advance the paper feed by one clock.
    pub fn clock(&mut self) {
        if self.print_timer == 0 {
            return;
        }
        self.print_timer -= 1;
        if self.print_timer == 0 {
            debug!("Print finished");
            self.status &= !((1 << STATUS_PRINTING) | (1 << STATUS_UNPROCESSED));
            self.image_buffer.clear();
        }
    }

    /// Take the most recently printed image, if any.
    pub fn take_printed(&mut self) -> Option<PrintedImage> {
        self.printed.take()
    }

    fn fill_buffer(&mut self, byte: u8) {
        if self.packet.compression == 0 {
            self.push_image_byte(byte);
            return;
        }
        self.packet.rle = match self.packet.rle {
            Rle::Control if byte & 0x80 != 0 => Rle::Repeat((byte & 0x7F) + 2),
            Rle::Control => Rle::Literal(byte + 1),
            Rle::Literal(n) => {
                self.push_image_byte(byte);
                if n > 1 { Rle::Literal(n - 1) } else { Rle::Control }
            }
            Rle::Repeat(n) => {
                for _ in 0..n {
                    self.push_image_byte(byte);
                }
                Rle::Control
            }
        };
    }

    fn push_image_byte(&mut self, byte: u8) {
        if self.image_buffer.len() < IMAGE_BUFFER_SIZE {
            self.image_buffer.push(byte);
        } else {
            self.status = set_bit(self.status, STATUS_BUFFER_FULL);
        }
    }

    fn parse_print_args(&mut self, byte: u8) {
        match self.packet.data_byte {
            1 => self.margins = byte,
            2 => self.palette = byte,
            3 => self.exposure = byte,
            _ => {}
        }
    }

    fn palette_shade(&self, colour: u8) -> u8 {
        // A zero palette prints with the default mapping.
        let palette = if self.palette == 0 { 0xE4 } else { self.palette };
        (palette >> (2 * colour)) & 0x03
    }

    /// Decode the tile buffer into greyscale rows.
    fn render(&self) -> PrintedImage {
        let tile_rows = self.image_buffer.len() / BYTES_PER_TILE_ROW;
        let height = tile_rows * 8;
        let mut pixels = vec![0xFF; PRINTER_WIDTH * height];
        for y in 0..height {
            let ty = y / 8;
            for tx in 0..PRINTER_WIDTH_TILES {
                let idx = ty * BYTES_PER_TILE_ROW + tx * 16 + (y % 8) * 2;
                let lo = self.image_buffer[idx];
                let hi = self.image_buffer[idx + 1];
                for x in 0..8 {
                    let colour = (((hi >> (7 - x)) & 1) << 1) | ((lo >> (7 - x)) & 1);
                    let shade = self.palette_shade(colour);
                    pixels[y * PRINTER_WIDTH + tx * 8 + x] = 0xFF - shade * 0x55;
                }
            }
        }
        PrintedImage {
            width: PRINTER_WIDTH,
            height,
            pixels,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(command: u8, compression: u8, data: &[u8]) -> Vec<u8> {
        let len = data.len() as u16;
        let mut body = vec![command, compression, len as u8, (len >> 8) as u8];
        body.extend_from_slice(data);
        let sum = body.iter().fold(0u16, |acc, &b| acc.wrapping_add(b as u16));
        let mut out = vec![MAGIC_BYTE_1, MAGIC_BYTE_2];
        out.extend(body);
        out.extend_from_slice(&sum.to_le_bytes());
        out.extend_from_slice(&[0, 0]);
        out
    }

    fn send(p: &mut Printer, bytes: &[u8]) -> Vec<u8> {
        bytes.iter().map(|&b| p.parse_byte(b)).collect()
    }

    #[test]
    fn alive_and_status_bytes() {
        let mut p = Printer::new();
        let replies = send(&mut p, &packet(CMD_INITIALISE, 0, &[]));
        let n = replies.len();
        assert_eq!(replies[n - 2], ALIVE);
        assert_eq!(replies[n - 1], 0);
        assert!(p.connected);
    }

    #[test]
    fn bad_checksum_sets_status_bit() {
        let mut p = Printer::new();
        let mut bytes = packet(CMD_READ_STATUS, 0, &[]);
        let n = bytes.len();
        bytes[n - 4] ^= 0xFF;
        send(&mut p, &bytes);
        let replies = send(&mut p, &packet(CMD_READ_STATUS, 0, &[]));
        assert_eq!(replies.last().copied().unwrap() & 0x01, 0x01);
    }

    #[test]
    fn fill_then_print_renders_strip() {
        let mut p = Printer::new();
        send(&mut p, &packet(CMD_INITIALISE, 0, &[]));
        send(&mut p, &packet(CMD_FILL_BUFFER, 0, &vec![0xFF; 640]));
        assert_eq!(p.image_buffer.len(), 640);
        let replies = send(&mut p, &packet(CMD_READ_STATUS, 0, &[]));
        assert_eq!(replies.last().copied().unwrap() & 0x08, 0x08);

        send(&mut p, &packet(CMD_START_PRINTING, 0, &[0x01, 0x00, 0xE4, 0x40]));
        assert!(p.printing());
        let image = p.take_printed().unwrap();
        assert_eq!((image.width, image.height), (160, 16));
        assert!(image.pixels.iter().all(|&px| px == 0x00));

        while p.print_timer > 0 {
            p.clock();
        }
        assert!(!p.printing());
        assert!(p.image_buffer.is_empty());
    }

    #[test]
    fn compressed_data_expands() {
        let mut p = Printer::new();
        // Run of 0x7F+2 copies of 0xAA, then 2 literal bytes.
        send(&mut p, &packet(CMD_FILL_BUFFER, 1, &[0xFF, 0xAA, 0x01, 0x11, 0x22]));
        assert_eq!(p.image_buffer.len(), 0x81 + 2);
        assert_eq!(&p.image_buffer[0x81..], &[0x11, 0x22]);
    }
}
