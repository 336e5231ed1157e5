//! Pocket Camera sensor and its on-cartridge image processing.
//!
//! Captures run through the same stages as the real sensor chip: exposure,
//! optional inversion, an edge kernel, a vertical 1-D filter and finally the
//! 4x4 dither matrix programmed by the game. The result lands in cartridge
//! RAM as 16x14 tiles.

use std::sync::OnceLock;

use log::debug;

use crate::bit_utils::check_bit;

pub const SENSOR_WIDTH: usize = 128;
pub const SENSOR_HEIGHT: usize = 128;
pub const SENSOR_SIZE: usize = SENSOR_WIDTH * SENSOR_HEIGHT;

const IMAGE_WIDTH_TILES: usize = 16;
const IMAGE_HEIGHT_TILES: usize = 14;
const TILE_DATA_START: usize = 0x0100;
const REGISTER_COUNT: usize = 0x36;
const MATRIX_START: usize = 0x06;

// Registers 1-5 as seen at A001-A005.
const REG_EDGE: usize = 0x01;
const REG_EXPOSURE_HI: usize = 0x02;
const REG_EXPOSURE_LO: usize = 0x03;
const REG_ENHANCE: usize = 0x04;
const REG_OFFSET: usize = 0x05;

/// 3x3 kernels indexed by the VH field minus one.
const FILTER_KERNEL: [[[i32; 3]; 3]; 3] = [
    [[0, 0, 0], [-1, 2, -1], [0, 0, 0]],
    [[0, -1, 0], [0, 2, 0], [0, -1, 0]],
    [[0, -1, 0], [-1, 4, -1], [0, -1, 0]],
];

// The sensor's 1-D filter coefficients are fixed in this model.
const FILTER_P: u8 = 0x01;
const FILTER_M: u8 = 0x00;

static DEFAULT_IMAGE: OnceLock<Vec<u8>> = OnceLock::new();

/// Frame used when the host has not supplied one: a diagonal gradient.
pub fn default_image() -> &'static [u8] {
    DEFAULT_IMAGE.get_or_init(|| {
        (0..SENSOR_SIZE)
            .map(|i| {
                let (x, y) = (i % SENSOR_WIDTH, i / SENSOR_WIDTH);
                (x + y) as u8
            })
            .collect()
    })
}

fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, u8::MAX as i32) as u8
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Camera {
    pub regs: [u8; REGISTER_COUNT],
    /// RAM bank bit 4 maps the registers over A000-BFFF.
    pub register_mode: bool,
    /// Machine cycles until the current capture completes.
    pub capture_timer: u32,
    pub capture_request: bool,
    sensor: Option<Vec<u8>>,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            regs: [0; REGISTER_COUNT],
            register_mode: false,
            capture_timer: 0,
            capture_request: false,
            sensor: None,
        }
    }
}

impl Camera {
    pub fn busy(&self) -> bool {
        self.capture_timer > 0
    }

    /// Replace the sensor frame. Must be `SENSOR_SIZE` greyscale bytes.
    pub fn set_image(&mut self, image: &[u8]) -> bool {
        if image.len() != SENSOR_SIZE {
            debug!("Ignoring camera frame of {} bytes", image.len());
            return false;
        }
        self.sensor = Some(image.to_vec());
        true
    }

    pub fn read_reg(&self, addr: u16) -> u8 {
        match (addr & 0x7F) as usize {
            0 => (self.regs[0] & 0x06) | (self.busy() || self.capture_request) as u8,
            // The rest are write-only.
            _ => 0x00,
        }
    }

    pub fn write_reg(&mut self, addr: u16, val: u8) {
        match (addr & 0x7F) as usize {
            0 => {
                self.regs[0] = val & 0x07;
                if check_bit(val, 0) {
                    self.capture_request = true;
                }
            }
            idx if idx < REGISTER_COUNT => self.regs[idx] = val,
            idx => debug!("Write to unmapped camera register 0x{idx:02X}"),
        }
    }

    /// Called every clock. The capture timer only counts on machine-cycle
    /// boundaries.
    pub fn clock(&mut self, ram: &mut [u8], machine_cycle: bool) {
        if self.capture_request {
            self.capture(ram);
            self.capture_request = false;
        }
        if machine_cycle && self.capture_timer > 0 {
            self.capture_timer -= 1;
            if self.capture_timer == 0 {
                self.regs[0] &= !0x01;
            }
        }
    }

    fn matrix(&self, x: usize, y: usize) -> [u8; 3] {
        let base = MATRIX_START + ((y % 4) * 4 + (x % 4)) * 3;
        [self.regs[base], self.regs[base + 1], self.regs[base + 2]]
    }

    /// Run a capture and write the dithered result into cartridge RAM.
    pub fn capture(&mut self, ram: &mut [u8]) {
        let edge = self.regs[REG_EDGE];
        let n = check_bit(edge, 7);
        let vh = ((edge & 0x70) >> 5) as usize;
        let exposure = u16::from_be_bytes([self.regs[REG_EXPOSURE_HI], self.regs[REG_EXPOSURE_LO]]);
        let enhance = self.regs[REG_ENHANCE];
        let e = (enhance & 0xF0) >> 4;
        let invert = check_bit(enhance, 3);
        debug!(
            "Camera capture: exposure 0x{exposure:04X}, offset 0x{:02X}",
            self.regs[REG_OFFSET] & 0x3F
        );

        self.capture_timer = 32446 + if n { 512 } else { 0 } + 16 * exposure as u32;

        let source = self.sensor.as_deref().unwrap_or_else(|| default_image());
        let mut sensor: Vec<u8> = source
            .iter()
            .map(|&px| clamp_u8(128 + px as i32 * exposure as i32 / 0x2000))
            .collect();
        if invert {
            sensor.iter_mut().for_each(|px| *px = !*px);
        }

        let mut buffer = if vh != 0 {
            let mut ratio = 0.5f32 + 0.25 * (e & 0x03) as f32;
            if check_bit(e, 2) {
                ratio *= 4.0;
            }
            let kernel = &FILTER_KERNEL[vh - 1];
            let mut out = vec![0u8; SENSOR_SIZE];
            for y in 3..SENSOR_HEIGHT - 3 {
                for x in 0..SENSOR_WIDTH {
                    let idx = y * SENSOR_WIDTH + x;
                    let mut res = 0i32;
                    for (ky, row) in kernel.iter().enumerate() {
                        for (kx, &k) in row.iter().enumerate() {
                            let ny = y + ky - 1;
                            let Some(nx) = (x + kx).checked_sub(1) else {
                                continue;
                            };
                            if let Some(&px) = sensor.get(ny * SENSOR_WIDTH + nx) {
                                res += px as i32 * k;
                            }
                        }
                    }
                    res = (res as f32 * ratio) as i32;
                    if !check_bit(e, 3) {
                        res += sensor[idx] as i32;
                    }
                    out[idx] = clamp_u8(res);
                }
            }
            out
        } else {
            sensor
        };

        if !n {
            let p0 = FILTER_P & 0x01;
            let p1 = (FILTER_P >> 1) & 0x01;
            let m0 = FILTER_M & 0x01;
            let m1 = (FILTER_M >> 1) & 0x01;
            for y in (3..=SENSOR_HEIGHT - 4).rev() {
                for x in (0..SENSOR_WIDTH).rev() {
                    let idx = y * SENSOR_WIDTH + x;
                    let res = buffer[idx] as i32 * (p0 as i32 - m0 as i32)
                        + buffer[idx - SENSOR_WIDTH] as i32 * (p1 as i32 - m1 as i32);
                    buffer[idx] = clamp_u8(res);
                }
            }
        }

        for y in 0..SENSOR_HEIGHT {
            for x in 0..SENSOR_WIDTH {
                let idx = y * SENSOR_WIDTH + x;
                let px = buffer[idx];
                let cmp = self.matrix(x, y);
                buffer[idx] = if px < cmp[0] {
                    3
                } else if px < cmp[1] {
                    2
                } else if px < cmp[2] {
                    1
                } else {
                    0
                };
            }
        }

        write_tile_data(ram, &buffer);
    }
}

/// Pack the 2bpp image into tiles, skipping the sensor's top 8 rows.
fn write_tile_data(ram: &mut [u8], image: &[u8]) {
    let needed = TILE_DATA_START + IMAGE_WIDTH_TILES * IMAGE_HEIGHT_TILES * 16;
    if ram.len() < needed {
        debug!("Camera RAM too small for image data");
        return;
    }
    for ty in 0..IMAGE_HEIGHT_TILES {
        for tx in 0..IMAGE_WIDTH_TILES {
            let base_idx = 8 * ty * SENSOR_WIDTH + 8 * tx + 8 * SENSOR_WIDTH;
            let tile_start = TILE_DATA_START + (ty * IMAGE_WIDTH_TILES + tx) * 16;
            for y in 0..8 {
                let (mut lower, mut upper) = (0u8, 0u8);
                for x in 0..8 {
                    let px = image[base_idx + y * SENSOR_WIDTH + x];
                    lower = (lower << 1) | (px & 0x01);
                    upper = (upper << 1) | ((px >> 1) & 0x01);
                }
                ram[tile_start + 2 * y] = lower;
                ram[tile_start + 2 * y + 1] = upper;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_sets_busy_until_timer_expires() {
        let mut cam = Camera::default();
        let mut ram = vec![0u8; 0x2000];
        cam.write_reg(0xA000, 0x01);
        cam.clock(&mut ram, false);
        assert!(cam.busy());
        assert_eq!(cam.read_reg(0xA000) & 0x01, 1);
        let mut clocks = 1u32;
        while cam.busy() {
            cam.clock(&mut ram, clocks % 4 == 0);
            clocks += 1;
        }
        assert_eq!(cam.read_reg(0xA000) & 0x01, 0);
        assert_eq!(clocks, 4 * 32446 + 1);
    }

    #[test]
    fn exposure_lengthens_capture() {
        let mut cam = Camera::default();
        let mut ram = vec![0u8; 0x2000];
        cam.write_reg(0xA002, 0x01);
        cam.capture(&mut ram);
        assert_eq!(cam.capture_timer, 32446 + 16 * 0x100);
    }

    #[test]
    fn n_bit_adds_512_cycles() {
        let mut cam = Camera::default();
        let mut ram = vec![0u8; 0x2000];
        cam.write_reg(0xA001, 0x80);
        cam.capture(&mut ram);
        assert_eq!(cam.capture_timer, 32446 + 512);
    }

    #[test]
    fn white_matrix_produces_black_tiles() {
        let mut cam = Camera::default();
        for i in MATRIX_START..REGISTER_COUNT {
            cam.regs[i] = 0xFF;
        }
        assert!(cam.set_image(&vec![0u8; SENSOR_SIZE]));
        let mut ram = vec![0u8; 0x2000];
        cam.capture(&mut ram);
        assert!(ram[TILE_DATA_START..TILE_DATA_START + 16 * 16 * 14].iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn wrong_size_frame_is_rejected() {
        let mut cam = Camera::default();
        assert!(!cam.set_image(&[0u8; 16]));
    }
}
