//! Dot-clocked scanline renderer.
//!
//! The PPU snapshots its registers from the I/O file at the start of each
//! line and again when pixel transfer begins, so mid-line writes only take
//! effect from the next line. Pixels are emitted one per dot into three line
//! buffers (background, window, sprites) which are composited once the line
//! is complete.

use std::sync::{Arc, Condvar, Mutex};

use crate::{
    bit_utils::{check_bit, clear_bit, set_bit},
    hardware::{
        BGP, CartMode, IF, LCDC, LY, LYC, OBP0, OBP1, SCREEN_HEIGHT, SCREEN_SIZE, SCREEN_WIDTH,
        SCX, SCY, STAT, WX, WY, io,
    },
    palettes::{Palette, gbc_colour},
};

#[cfg(feature = "ppu-trace")]
macro_rules! ppu_trace {
    ($($arg:tt)*) => {
        eprintln!($($arg)*);
    };
}
#[cfg(not(feature = "ppu-trace"))]
macro_rules! ppu_trace {
    ($($arg:tt)*) => {};
}

pub const VRAM_BANK_SIZE: usize = 0x2000;
pub const OAM_SIZE: usize = 0xA0;
pub const PALETTE_RAM_SIZE: usize = 0x40;

const LINE_DOTS: u16 = 456;
const OAM_SCAN_DOTS: u16 = 80;
const TRANSFER_START: u16 = 88;
const VBLANK_LINE: u8 = 144;
const LAST_LINE: u8 = 153;
/// Dots into line 153 after which LY already reads 0.
const LINE_153_RESET: u16 = 10;
const MAX_SPRITES_PER_LINE: usize = 10;

const BG_MAP_0: usize = 0x1800;
const BG_MAP_1: usize = 0x1C00;

// LCD modes as stored in the low bits of STAT
pub const MODE_HBLANK: u8 = 0;
pub const MODE_VBLANK: u8 = 1;
pub const MODE_OAM_READ: u8 = 2;
pub const MODE_TRANSFER: u8 = 3;

// Line buffer attribute bits
const ATTR_DRAWN: u8 = 0x01;
const ATTR_COLOUR0: u8 = 0x02;
const ATTR_PRIORITY: u8 = 0x04;

const WHITE: u32 = 0x00FF_FFFF;

#[derive(Clone, Copy, PartialEq, Eq)]
enum PaletteKind {
    Background,
    Sprite1,
    Sprite2,
}

/// Binary semaphore used to pace the core against a display.
///
/// The emulation thread waits at VBlank; the renderer posts once per shown
/// frame. Posting during shutdown releases a blocked core.
#[derive(Clone, Default)]
pub struct FrameSync {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl FrameSync {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post(&self) {
        let (lock, cvar) = &*self.inner;
        if let Ok(mut ready) = lock.lock() {
            *ready = true;
            cvar.notify_one();
        }
    }

    /// Block until posted, then consume the post.
    pub fn wait(&self) {
        let (lock, cvar) = &*self.inner;
        let Ok(mut ready) = lock.lock() else {
            return;
        };
        while !*ready {
            ready = match cvar.wait(ready) {
                Ok(guard) => guard,
                Err(_) => return,
            };
        }
        *ready = false;
    }
}

impl std::fmt::Debug for FrameSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSync").finish_non_exhaustive()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Tile {
    pub hi: u8,
    pub lo: u8,
    pub x: u8,
    pub attr: u8,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Sprite {
    pub x: u8,
    pub y: u8,
    /// OAM offset of the sprite's first byte.
    pub index: u8,
    pub tile: Tile,
    pub loaded: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LineBuffer {
    pub colour: [u32; SCREEN_WIDTH],
    pub attr: [u8; SCREEN_WIDTH],
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self {
            colour: [0; SCREEN_WIDTH],
            attr: [0; SCREEN_WIDTH],
        }
    }
}

impl LineBuffer {
    fn clear(&mut self) {
        self.attr.fill(0);
    }

    fn put(&mut self, x: usize, colour: u32, index: u8, priority: bool) {
        self.colour[x] = colour;
        let mut attr = ATTR_DRAWN;
        if index == 0 {
            attr |= ATTR_COLOUR0;
        }
        if priority {
            attr |= ATTR_PRIORITY;
        }
        self.attr[x] |= attr;
    }
}

/// What happened during one PPU dot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PpuEvents {
    /// Pixel transfer finished and HBlank began.
    pub hblank: bool,
    /// LY reached 144: the frame is complete and the buffers were swapped.
    pub vblank: bool,
}

#[derive(Clone, Debug)]
pub struct Ppu {
    pub vram: [[u8; VRAM_BANK_SIZE]; 2],
    pub vram_bank: usize,
    pub oam: [u8; OAM_SIZE],
    /// GBC background palette RAM, 8 palettes of 4 little-endian colours.
    pub bgp: [u8; PALETTE_RAM_SIZE],
    /// GBC object palette RAM.
    pub obp: [u8; PALETTE_RAM_SIZE],
    /// Colours used for DMG games.
    pub palette: Palette,
    pub mode: CartMode,

    pub clock: u16,
    pub ly: u8,
    pub lcd_disable: bool,
    pub frame: u64,

    // Register snapshots for the current line
    pub scy: u8,
    pub scx: u8,
    pub lyc: u8,
    pub wy: u8,
    pub wx: u8,
    pub lcdc: u8,

    pub last_stat: bool,
    pub x: u8,
    /// Line of window content to draw next; only advances on lines where
    /// the window actually produced pixels.
    pub window_ly: u8,
    pub window_drawn: bool,
    pub next_dot: u16,
    pub n_sprites: usize,
    pub sprites: [Sprite; MAX_SPRITES_PER_LINE],
    pub bg_tile: Tile,
    pub window_tile: Tile,
    pub bg_line: LineBuffer,
    pub window_line: LineBuffer,
    pub sprite_line: LineBuffer,

    /// Frame being drawn.
    pub(crate) logical: Box<[u32]>,
    /// Most recently completed frame.
    pub(crate) display: Box<[u32]>,

    pub hide_background: bool,
    pub hide_window: bool,
    pub hide_sprites: bool,
}

impl Default for Ppu {
    fn default() -> Self {
        Self::new(CartMode::Dmg)
    }
}

impl Ppu {
    pub fn new(mode: CartMode) -> Self {
        Self {
            vram: [[0; VRAM_BANK_SIZE]; 2],
            vram_bank: 0,
            oam: [0; OAM_SIZE],
            bgp: [0; PALETTE_RAM_SIZE],
            obp: [0; PALETTE_RAM_SIZE],
            palette: Palette::default(),
            mode,
            clock: 0,
            ly: 0,
            lcd_disable: false,
            frame: 0,
            scy: 0,
            scx: 0,
            lyc: 0,
            wy: 0,
            wx: 0,
            lcdc: 0,
            last_stat: false,
            x: 0,
            window_ly: 0,
            window_drawn: false,
            next_dot: 0,
            n_sprites: 0,
            sprites: [Sprite::default(); MAX_SPRITES_PER_LINE],
            bg_tile: Tile::default(),
            window_tile: Tile::default(),
            bg_line: LineBuffer::default(),
            window_line: LineBuffer::default(),
            sprite_line: LineBuffer::default(),
            logical: vec![WHITE; SCREEN_SIZE].into_boxed_slice(),
            display: vec![WHITE; SCREEN_SIZE].into_boxed_slice(),
            hide_background: false,
            hide_window: false,
            hide_sprites: false,
        }
    }

    /// The last completed frame, row-major, 0x00RRGGBB.
    pub fn display(&self) -> &[u32] {
        &self.display
    }

    #[cfg(test)]
    fn logical(&self) -> &[u32] {
        &self.logical
    }

    fn fill_screens(&mut self, colour: u32) {
        self.logical.fill(colour);
        self.display.fill(colour);
    }

    /// Turn the LCD off: LY and the mode reset and the screen shows a blank
    /// colour until it is turned back on.
    pub fn disable_lcd(&mut self, io_regs: &mut [u8; 0x80]) {
        let blank = if self.mode.is_gbc() {
            WHITE
        } else {
            self.palette.background[0]
        };
        self.fill_screens(blank);
        self.lcd_disable = true;
        self.ly = 0;
        io_regs[io(IF)] = clear_bit(io_regs[io(IF)], 1);
        io_regs[io(LY)] = 0;
        io_regs[io(STAT)] = set_mode(io_regs[io(STAT)], MODE_HBLANK);
        ppu_trace!("LCD off");
    }

    pub fn enable_lcd(&mut self) {
        if !self.lcd_disable {
            return;
        }
        self.lcd_disable = false;
        self.clock = 0;
        self.ly = 0;
        ppu_trace!("LCD on");
    }

    /// Advance one dot.
    pub fn clock(&mut self, io_regs: &mut [u8; 0x80], dma_running: bool) -> PpuEvents {
        let mut events = PpuEvents::default();
        if self.lcd_disable {
            return events;
        }
        let mut stat = io_regs[io(STAT)];

        if self.clock == 0 && get_mode(stat) != MODE_VBLANK {
            self.bg_line.clear();
            self.window_line.clear();
            self.sprite_line.clear();
            self.snapshot(io_regs);
            stat = set_mode(stat, MODE_OAM_READ);
            self.oam_scan();
        }
        if self.clock == OAM_SCAN_DOTS && get_mode(stat) != MODE_VBLANK {
            self.snapshot(io_regs);
            stat = set_mode(stat, MODE_TRANSFER);
            self.x = 0;
            self.window_drawn = false;
            self.load_bg_tile();
            // Pixels scrolled off the left edge are discarded.
            self.next_dot = TRANSFER_START + (self.scx % 8) as u16;
            self.bg_tile.x = self.scx % 8;
            self.window_tile.x = 0;
        }
        if get_mode(stat) == MODE_TRANSFER {
            if self.clock == self.next_dot {
                self.draw_background_pixel(io_regs);
                self.draw_window_pixel(io_regs);
                self.draw_sprite_pixel(io_regs, dma_running);
                self.x += 1;
                self.next_dot += 1;
            }
            if self.x as usize == SCREEN_WIDTH {
                stat = set_mode(stat, MODE_HBLANK);
                self.composite_line();
                if self.window_drawn {
                    self.window_ly = self.window_ly.wrapping_add(1);
                }
                events.hblank = true;
            }
        }

        self.clock += 1;
        if self.clock == LINE_DOTS {
            self.clock = 0;
            self.ly += 1;
        }
        if self.ly == LAST_LINE && self.clock == LINE_153_RESET {
            self.ly = 0;
        }
        if self.ly == 1 && get_mode(stat) == MODE_VBLANK {
            self.ly = 0;
            stat = set_mode(stat, MODE_OAM_READ);
        }

        stat = if self.ly == io_regs[io(LYC)] {
            set_bit(stat, 2)
        } else {
            clear_bit(stat, 2)
        };

        if self.ly == VBLANK_LINE && self.clock == 0 {
            io_regs[io(IF)] = set_bit(io_regs[io(IF)], 0);
            stat = set_mode(stat, MODE_VBLANK);
            std::mem::swap(&mut self.logical, &mut self.display);
            self.frame += 1;
            self.window_ly = 0;
            events.vblank = true;
            ppu_trace!("VBlank, frame {}", self.frame);
        }

        // STAT requests on the rising edge of the combined condition only.
        let mode = get_mode(stat);
        let stat_line = (check_bit(stat, 2) && check_bit(stat, 6))
            || (check_bit(stat, 3) && mode == MODE_HBLANK)
            || (check_bit(stat, 4) && mode == MODE_VBLANK)
            || (check_bit(stat, 5) && mode == MODE_OAM_READ);
        if stat_line {
            if !self.last_stat {
                self.last_stat = true;
                io_regs[io(IF)] = set_bit(io_regs[io(IF)], 1);
            }
        } else {
            self.last_stat = false;
        }
        io_regs[io(LY)] = self.ly;
        io_regs[io(STAT)] = stat;
        events
    }

    fn snapshot(&mut self, io_regs: &[u8; 0x80]) {
        self.scy = io_regs[io(SCY)];
        self.scx = io_regs[io(SCX)];
        self.lyc = io_regs[io(LYC)];
        self.wy = io_regs[io(WY)];
        self.wx = io_regs[io(WX)];
        self.lcdc = io_regs[io(LCDC)];
    }

    /// Pick up to ten sprites overlapping the current line, in OAM order.
    fn oam_scan(&mut self) {
        let height = if check_bit(self.lcdc, 2) { 16 } else { 8 };
        let line = self.ly as u16 + 16;
        self.n_sprites = 0;
        for index in (0..OAM_SIZE).step_by(4) {
            let y = self.oam[index] as u16;
            if line < y || line >= y + height {
                continue;
            }
            self.sprites[self.n_sprites] = Sprite {
                x: self.oam[index + 1],
                y: self.oam[index],
                index: index as u8,
                tile: Tile::default(),
                loaded: false,
            };
            self.n_sprites += 1;
            if self.n_sprites == MAX_SPRITES_PER_LINE {
                break;
            }
        }
    }

    fn colour(&self, palette: u8, index: u8, kind: PaletteKind) -> u32 {
        if !self.mode.is_gbc() {
            let shade = ((palette >> (index * 2)) & 0x03) as usize;
            return match kind {
                PaletteKind::Background => self.palette.background[shade],
                PaletteKind::Sprite1 => self.palette.sprite1[shade],
                PaletteKind::Sprite2 => self.palette.sprite2[shade],
            };
        }
        let offset = palette as usize * 8 + index as usize * 2;
        let ram = if kind == PaletteKind::Background {
            &self.bgp
        } else {
            &self.obp
        };
        gbc_colour(ram[offset], ram[offset + 1])
    }

    /// Fetch one row of a background or window tile.
    fn fetch_tile(&self, map: usize, tx: u8, ty: u8, row: u8) -> Tile {
        let map_addr = map + 32 * ty as usize + tx as usize;
        let id = self.vram[0][map_addr];
        let attr = if self.mode.is_gbc() {
            self.vram[1][map_addr]
        } else {
            0
        };
        let base = if check_bit(self.lcdc, 4) {
            16 * id as usize
        } else {
            (0x1000 + 16 * id as i8 as i32) as usize
        };
        let row = usize::from(if check_bit(attr, 6) { 7 - row } else { row });
        let bank = &self.vram[check_bit(attr, 3) as usize];
        Tile {
            lo: bank[base + 2 * row],
            hi: bank[base + 2 * row + 1],
            x: 0,
            attr,
        }
    }

    fn load_bg_tile(&mut self) {
        let map = if check_bit(self.lcdc, 3) { BG_MAP_1 } else { BG_MAP_0 };
        let px = self.scx as u16 + self.x as u16;
        let py = self.scy as u16 + self.ly as u16;
        let tx = ((px / 8) % 32) as u8;
        let ty = ((py / 8) % 32) as u8;
        self.bg_tile = self.fetch_tile(map, tx, ty, (py % 8) as u8);
    }

    fn load_window_tile(&mut self) {
        let map = if check_bit(self.lcdc, 6) { BG_MAP_1 } else { BG_MAP_0 };
        let wx = self.x as u16 + 7 - self.wx as u16;
        let tx = ((wx / 8) % 32) as u8;
        let ty = (self.window_ly / 8) % 32;
        self.window_tile = self.fetch_tile(map, tx, ty, self.window_ly % 8);
    }

    fn draw_background_pixel(&mut self, io_regs: &[u8; 0x80]) {
        if self.bg_tile.x == 0 {
            self.load_bg_tile();
        }
        let t = self.bg_tile;
        let x = self.x as usize;
        let palette = if self.mode.is_gbc() {
            t.attr & 0x07
        } else {
            io_regs[io(BGP)]
        };
        if !self.mode.is_gbc() && !check_bit(self.lcdc, 0) {
            // DMG background off: colour 0 everywhere.
            let colour = self.palette.background[0];
            self.bg_line.put(x, colour, 0, false);
        } else {
            let index = tile_pixel(t.hi, t.lo, t.x, check_bit(t.attr, 5));
            let colour = self.colour(palette, index, PaletteKind::Background);
            self.bg_line.put(x, colour, index, check_bit(t.attr, 7));
        }
        self.bg_tile.x = (self.bg_tile.x + 1) % 8;
    }

    fn draw_window_pixel(&mut self, io_regs: &[u8; 0x80]) {
        if self.ly < self.wy
            || !check_bit(self.lcdc, 5)
            || (!self.mode.is_gbc() && !check_bit(self.lcdc, 0))
        {
            return;
        }
        if (self.x as u16) + 7 < self.wx as u16 {
            return;
        }
        if self.window_tile.x == 0 {
            self.load_window_tile();
        }
        self.window_drawn = true;
        let t = self.window_tile;
        let palette = if self.mode.is_gbc() {
            t.attr & 0x07
        } else {
            io_regs[io(BGP)]
        };
        let index = tile_pixel(t.hi, t.lo, t.x, check_bit(t.attr, 5));
        let colour = self.colour(palette, index, PaletteKind::Background);
        self.window_line
            .put(self.x as usize, colour, index, check_bit(t.attr, 7));
        self.window_tile.x = (self.window_tile.x + 1) % 8;
    }

    fn draw_sprite_pixel(&mut self, io_regs: &[u8; 0x80], dma_running: bool) {
        if !check_bit(self.lcdc, 1) || dma_running {
            return;
        }
        let x = self.x as u16;
        for i in 0..self.n_sprites {
            let s = self.sprites[i];
            if x + 8 < s.x as u16 || x >= s.x as u16 {
                continue;
            }
            // Earlier sprites in OAM win.
            if self.sprite_line.attr[x as usize] & ATTR_DRAWN != 0 {
                continue;
            }
            if !s.loaded {
                self.load_sprite_tile(i);
                // Each new sprite stalls the fetcher.
                let fine = ((x + self.scx as u16) % 8).min(5);
                self.next_dot += 11 - fine;
            }
            let tile = self.sprites[i].tile;
            let col = (x + 8 - s.x as u16) as u8;
            let index = tile_pixel(tile.hi, tile.lo, col, check_bit(tile.attr, 5));
            if index == 0 {
                continue;
            }
            let (palette, kind) = if self.mode.is_gbc() {
                (tile.attr & 0x07, PaletteKind::Sprite1)
            } else if check_bit(tile.attr, 4) {
                (io_regs[io(OBP1)], PaletteKind::Sprite1)
            } else {
                (io_regs[io(OBP0)], PaletteKind::Sprite2)
            };
            let colour = self.colour(palette, index, kind);
            self.sprite_line
                .put(x as usize, colour, index, check_bit(tile.attr, 7));
        }
    }

    fn load_sprite_tile(&mut self, n: usize) {
        let tall = check_bit(self.lcdc, 2);
        let height: u8 = if tall { 16 } else { 8 };
        let sprite = self.sprites[n];
        let base = sprite.index as usize;
        let mut id = self.oam[base + 2];
        let attr = self.oam[base + 3];
        let mut row = self.ly.wrapping_add(16).wrapping_sub(sprite.y);
        if check_bit(attr, 6) {
            row = height - 1 - row;
        }
        if tall {
            id &= 0xFE;
        }
        let bank = if self.mode.is_gbc() {
            check_bit(attr, 3) as usize
        } else {
            0
        };
        let addr = 16 * id as usize + 2 * row as usize;
        self.sprites[n].tile = Tile {
            lo: self.vram[bank][addr],
            hi: self.vram[bank][addr + 1],
            x: 0,
            attr,
        };
        self.sprites[n].loaded = true;
    }

    /// Merge the three line buffers into the frame being drawn.
    fn composite_line(&mut self) {
        let ly = self.ly as usize;
        if ly >= SCREEN_HEIGHT {
            return;
        }
        let start = ly * SCREEN_WIDTH;
        let line = &mut self.logical[start..start + SCREEN_WIDTH];
        if self.hide_background {
            line.fill(WHITE);
        } else {
            line.copy_from_slice(&self.bg_line.colour);
        }
        for (x, px) in line.iter_mut().enumerate() {
            let bg = self.bg_line.attr[x];
            let win = self.window_line.attr[x];
            let ob = self.sprite_line.attr[x];

            if win & ATTR_DRAWN != 0 && !self.hide_window {
                *px = self.window_line.colour[x];
                if win & ATTR_PRIORITY != 0 && win & ATTR_COLOUR0 == 0 {
                    continue;
                }
            }
            if ob & ATTR_DRAWN == 0 {
                continue;
            }
            if win & ATTR_DRAWN != 0 && (win & ATTR_PRIORITY != 0 || ob & ATTR_PRIORITY != 0) {
                continue;
            }
            if bg & ATTR_DRAWN != 0 && bg & ATTR_COLOUR0 == 0 {
                if bg & ATTR_PRIORITY != 0 || ob & ATTR_PRIORITY != 0 {
                    continue;
                }
            }
            if self.hide_sprites {
                continue;
            }
            *px = self.sprite_line.colour[x];
        }
    }
}

#[inline]
pub fn get_mode(stat: u8) -> u8 {
    stat & 0x03
}

#[inline]
fn set_mode(stat: u8, mode: u8) -> u8 {
    (stat & 0xFC) | mode
}

/// Two-bit colour index of column `x` in a tile row.
#[inline]
fn tile_pixel(hi: u8, lo: u8, x: u8, flip: bool) -> u8 {
    let b = if flip { x } else { 7 - x };
    ((check_bit(hi, b) as u8) << 1) | check_bit(lo, b) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::CLOCKS_PER_FRAME;

    fn lcd_on() -> [u8; 0x80] {
        let mut regs = [0u8; 0x80];
        regs[io(LCDC)] = 0x91;
        regs[io(BGP)] = 0xE4;
        regs[io(OBP0)] = 0xE4;
        regs[io(OBP1)] = 0xE4;
        regs
    }

    fn run_line(ppu: &mut Ppu, regs: &mut [u8; 0x80]) {
        for _ in 0..LINE_DOTS {
            ppu.clock(regs, false);
        }
    }

    #[test]
    fn tile_pixel_reads_msb_first() {
        assert_eq!(tile_pixel(0x80, 0x00, 0, false), 2);
        assert_eq!(tile_pixel(0x00, 0x80, 0, false), 1);
        assert_eq!(tile_pixel(0x01, 0x01, 0, true), 3);
    }

    #[test]
    fn frame_takes_70224_dots_and_requests_vblank_once() {
        let mut ppu = Ppu::new(CartMode::Dmg);
        let mut regs = lcd_on();
        let mut vblanks = 0;
        for _ in 0..CLOCKS_PER_FRAME {
            if ppu.clock(&mut regs, false).vblank {
                vblanks += 1;
            }
        }
        assert_eq!(vblanks, 1);
        assert_eq!(ppu.ly, 0);
        assert_eq!(ppu.clock, 0);
        assert_eq!(regs[io(IF)] & 0x01, 0x01);
    }

    #[test]
    fn line_153_reads_zero_early() {
        let mut ppu = Ppu::new(CartMode::Dmg);
        let mut regs = lcd_on();
        for _ in 0..153 * LINE_DOTS as u32 + LINE_153_RESET as u32 {
            ppu.clock(&mut regs, false);
        }
        assert_eq!(ppu.ly, 0);
        assert_eq!(get_mode(regs[io(STAT)]), MODE_VBLANK);
    }

    #[test]
    fn stat_interrupt_fires_on_rising_edge_only() {
        let mut ppu = Ppu::new(CartMode::Dmg);
        let mut regs = lcd_on();
        // HBlank and LYC=LY sources both enabled
        regs[io(STAT)] = 0x48;
        regs[io(LYC)] = 0;
        ppu.clock(&mut regs, false);
        assert_eq!(regs[io(IF)] & 0x02, 0x02);
        regs[io(IF)] = 0;
        for _ in 1..LINE_DOTS {
            ppu.clock(&mut regs, false);
        }
        // LY=LYC held through the line and straight into HBlank: no new edge.
        assert_eq!(regs[io(IF)] & 0x02, 0);
    }

    #[test]
    fn line_render_is_deterministic() {
        let mut ppu = Ppu::new(CartMode::Dmg);
        for (i, b) in ppu.vram[0][..0x800].iter_mut().enumerate() {
            *b = (i * 7 + 3) as u8;
        }
        ppu.oam[0] = 16;
        ppu.oam[1] = 20;
        ppu.oam[2] = 3;
        let render = |ppu: &mut Ppu| {
            let mut regs = lcd_on();
            regs[io(LCDC)] = 0x93;
            regs[io(SCX)] = 5;
            ppu.clock = 0;
            ppu.ly = 0;
            regs[io(STAT)] = 0;
            run_line(ppu, &mut regs);
            ppu.logical()[..SCREEN_WIDTH].to_vec()
        };
        let first = render(&mut ppu);
        let second = render(&mut ppu);
        assert_eq!(first, second);
    }

    #[test]
    fn scx_fine_scroll_delays_hblank() {
        let hblank_dot = |scx: u8| {
            let mut ppu = Ppu::new(CartMode::Dmg);
            let mut regs = lcd_on();
            regs[io(SCX)] = scx;
            (0..LINE_DOTS)
                .find(|_| ppu.clock(&mut regs, false).hblank)
                .unwrap_or(LINE_DOTS)
        };
        assert_eq!(hblank_dot(3), hblank_dot(0) + 3);
    }

    #[test]
    fn sprite_drawn_over_colour0_background() {
        let mut ppu = Ppu::new(CartMode::Dmg);
        ppu.palette = *crate::palettes::get_palette("monochrome").unwrap_or(&Palette::default());
        // Tile 1 row 0: all colour 3.
        ppu.vram[0][16] = 0xFF;
        ppu.vram[0][17] = 0xFF;
        ppu.oam[0] = 16;
        ppu.oam[1] = 8;
        ppu.oam[2] = 1;
        let mut regs = lcd_on();
        regs[io(LCDC)] = 0x93;
        run_line(&mut ppu, &mut regs);
        let line = &ppu.logical()[..SCREEN_WIDTH];
        assert_eq!(line[0], 0x000000);
        assert_eq!(line[7], 0x000000);
        assert_eq!(line[8], 0xFFFFFF);
    }

    #[test]
    fn window_counter_only_advances_when_drawn() {
        let mut ppu = Ppu::new(CartMode::Dmg);
        let mut regs = lcd_on();
        regs[io(LCDC)] = 0xB1;
        regs[io(WX)] = 7;
        regs[io(WY)] = 0;
        run_line(&mut ppu, &mut regs);
        run_line(&mut ppu, &mut regs);
        assert_eq!(ppu.window_ly, 2);
        // Window off for a line: counter holds.
        regs[io(LCDC)] = 0x91;
        run_line(&mut ppu, &mut regs);
        assert_eq!(ppu.window_ly, 2);
        regs[io(LCDC)] = 0xB1;
        run_line(&mut ppu, &mut regs);
        assert_eq!(ppu.window_ly, 3);
    }

    #[test]
    fn disabling_lcd_blanks_screen() {
        let mut ppu = Ppu::new(CartMode::Gbc);
        let mut regs = lcd_on();
        regs[io(STAT)] = MODE_TRANSFER;
        regs[io(IF)] = 0x02;
        ppu.display.fill(0);
        ppu.disable_lcd(&mut regs);
        assert!(ppu.display().iter().all(|&c| c == WHITE));
        assert_eq!(regs[io(LY)], 0);
        assert_eq!(get_mode(regs[io(STAT)]), MODE_HBLANK);
        assert_eq!(regs[io(IF)] & 0x02, 0);
        assert_eq!(ppu.clock(&mut regs, false), PpuEvents::default());
    }

    #[test]
    fn frame_sync_post_releases_waiter() {
        let sync = FrameSync::new();
        let other = sync.clone();
        let handle = std::thread::spawn(move || other.wait());
        sync.post();
        handle.join().unwrap();
    }
}
