use std::{
    fs, io,
    path::{Path, PathBuf},
};

use log::{error, info};

use crate::{
    apu::MIN_TURBO_SPEED,
    audio_queue::AudioProducer,
    cartridge::Cartridge,
    cheats::Cheats,
    cpu::Cpu,
    error::{CheatError, CoreError, SaveStateError},
    input::{Key, Keys},
    mbc7::Tilt,
    mmu::Mmu,
    palettes::get_palette,
    ppu::FrameSync,
    printer::PrintedImage,
    savestate::{MAGIC, Savestate, StateReader, StateWriter, VERSION},
    serial::LinkState,
};

/// The whole emulated machine: CPU plus the bus and everything on it.
#[derive(Clone, Debug)]
pub struct Core {
    pub cpu: Cpu,
    pub mmu: Mmu,
    /// Set when the guest did something the core can't continue from.
    /// The caller checks this between batches of cycles.
    pub error: bool,
    pub error_msg: Option<&'static str>,
}

impl Core {
    /// Load a ROM from disk and power the machine on.
    pub fn initialise<P: AsRef<Path>>(path: P) -> Result<Self, CoreError> {
        let cart = Cartridge::from_file(path)?;
        Ok(Self::new(cart))
    }

    pub fn from_rom(rom: Vec<u8>) -> Result<Self, CoreError> {
        Ok(Self::new(Cartridge::load(rom)?))
    }

    pub fn new(cart: Cartridge) -> Self {
        info!("Starting \"{}\" in {:?} mode", cart.title, cart.mode);
        let mode = cart.mode;
        Self {
            cpu: Cpu::new(mode),
            mmu: Mmu::new(cart),
            error: false,
            error_msg: None,
        }
    }

    /// Advance one clock: one PPU dot, one APU step and one CPU sub-cycle
    /// (two in double speed mode).
    pub fn emulate_cycle(&mut self) {
        self.cpu.check_interrupts(&mut self.mmu);
        self.mmu.apu_clock();
        self.mmu.ppu_clock();
        self.cpu_cycle();
        if self.mmu.double_speed {
            self.cpu_cycle();
        }
        if let Some(op) = self.cpu.invalid_opcode.take() {
            error!("Halting on invalid opcode 0x{op:02X}");
            self.error = true;
            self.error_msg = Some("Invalid opcode encountered.");
        }
    }

    fn cpu_cycle(&mut self) {
        self.cpu.clock(&mut self.mmu);
        self.mmu.div_clock();
        self.mmu.link_clock();
        self.mmu.cart.clock(self.cpu.clock == 0);
    }

    /// Run until the PPU finishes the current frame.
    pub fn run_frame(&mut self) {
        let frame = self.mmu.ppu.frame;
        while self.mmu.ppu.frame == frame && !self.error {
            self.emulate_cycle();
        }
    }

    pub fn memory_read(&self, addr: u16) -> u8 {
        self.mmu.read(addr)
    }

    pub fn memory_write(&mut self, addr: u16, val: u8) {
        self.mmu.write(addr, val);
    }

    pub fn memory_read_force(&self, addr: u16) -> u8 {
        self.mmu.read_force(addr)
    }

    pub fn memory_write_force(&mut self, addr: u16, val: u8) {
        self.mmu.write_force(addr, val);
    }

    pub fn press(&mut self, key: Key) {
        self.set_key(key, true);
    }

    pub fn release(&mut self, key: Key) {
        self.set_key(key, false);
    }

    fn set_key(&mut self, key: Key, pressed: bool) {
        self.mmu.keys.set(key, pressed);
        let tilt = self.mmu.keys.tilt;
        if let Some(mbc7) = self.mmu.cart.mbc7_mut() {
            mbc7.tilt = Tilt {
                up: tilt.up,
                down: tilt.down,
                left: tilt.left,
                right: tilt.right,
            };
        }
    }

    /// The most recently completed frame, 160x144 0x00RRGGBB pixels.
    pub fn frame(&self) -> &[u32] {
        self.mmu.ppu.display()
    }

    pub fn frame_count(&self) -> u64 {
        self.mmu.ppu.frame
    }

    /// Handle a renderer posts once per displayed frame when syncing to
    /// video. Post it during shutdown so the core never stays blocked.
    pub fn frame_sync(&self) -> FrameSync {
        self.mmu.frame_sync.clone()
    }

    pub fn set_sync_to_video(&mut self, sync: bool) {
        self.mmu.sync_to_video = sync;
    }

    pub fn set_turbo(&mut self, turbo: bool) {
        self.mmu.keys.turbo = turbo;
    }

    /// Speed multiplier while turbo is held. 0 means unlimited.
    /// Speed multiplier while in turbo. Anything under `MIN_TURBO_SPEED`,
    /// including 0, means unlimited.
    pub fn set_turbo_speed(&mut self, speed: f32) {
        self.mmu.apu.turbo_speed = if speed >= MIN_TURBO_SPEED { speed } else { 0.0 };
    }

    pub fn set_audio_sink(&mut self, sink: Option<AudioProducer>) {
        self.mmu.apu.set_sink(sink);
    }

    pub fn set_sample_rate(&mut self, rate: u32) {
        self.mmu.apu.set_sample_rate(rate);
    }

    pub fn set_palette(&mut self, name: &str) -> Result<(), CoreError> {
        let palette = get_palette(name).ok_or_else(|| CoreError::UnknownPalette(name.into()))?;
        self.mmu.ppu.palette = *palette;
        info!("Palette set to {}", palette.name);
        Ok(())
    }

    pub fn hide_layers(&mut self, background: bool, window: bool, sprites: bool) {
        let ppu = &mut self.mmu.ppu;
        ppu.hide_background = background;
        ppu.hide_window = window;
        ppu.hide_sprites = sprites;
    }

    pub fn add_cheat(&mut self, code: &str) -> Result<(), CheatError> {
        self.mmu.cheats.add_fuzzy(code)
    }

    pub fn clear_cheats(&mut self) {
        self.mmu.cheats = Cheats::default();
    }

    pub fn set_link_state(&mut self, state: LinkState) {
        self.mmu.link.state = state;
    }

    /// A finished printout, if the printer produced one since the last call.
    pub fn take_printed(&mut self) -> Option<PrintedImage> {
        self.mmu.link.printer.take_printed()
    }

    /// Replace the camera sensor image: `SENSOR_SIZE` bytes of 128x128
    /// greyscale. Returns false if there is no camera or the image has the
    /// wrong size.
    pub fn set_camera_image(&mut self, image: &[u8]) -> bool {
        self.mmu
            .cart
            .camera_mut()
            .is_some_and(|cam| cam.set_image(image))
    }

    pub fn save_data(&self) -> Vec<u8> {
        self.mmu.cart.save_data()
    }

    pub fn load_save_data(&mut self, data: &[u8]) {
        self.mmu.cart.load_save_data(data);
    }

    pub fn save_to_file(&mut self, path: &Path) -> io::Result<()> {
        self.mmu.cart.save_to_file(path)
    }

    pub fn load_from_file(&mut self, path: &Path) -> io::Result<()> {
        self.mmu.cart.load_from_file(path)
    }

    /// `<dir>/<rom stem>.s<slot>`
    pub fn savestate_path(dir: &Path, rom_path: &Path, slot: u8) -> PathBuf {
        let stem = rom_path.file_stem().unwrap_or_default();
        dir.join(stem).with_extension(format!("s{slot}"))
    }

    pub fn save_state(&self) -> Vec<u8> {
        let mut w = StateWriter::new();
        w.bytes(MAGIC);
        w.u32(VERSION);
        w.u16(self.mmu.cart.global_checksum());
        self.cpu.save_state(&mut w);
        self.mmu.save_state(&mut w);
        w.blob(&self.mmu.cart.ram);
        w.into_inner()
    }

    /// Restore a state produced by [`Core::save_state`]. On error the
    /// running machine is left exactly as it was.
    pub fn load_state(&mut self, data: &[u8]) -> Result<(), SaveStateError> {
        let mut r = StateReader::new(data);
        let mut magic = [0u8; 4];
        r.bytes_into(&mut magic)
            .map_err(|_| SaveStateError::BadMagic)?;
        if &magic != MAGIC {
            return Err(SaveStateError::BadMagic);
        }
        let version = r.u32()?;
        if version != VERSION {
            return Err(SaveStateError::VersionMismatch {
                found: version,
                expected: VERSION,
            });
        }
        if r.u16()? != self.mmu.cart.global_checksum() {
            return Err(SaveStateError::RomMismatch);
        }

        let mut fresh = self.clone();
        fresh.cpu.load_state(&mut r)?;
        fresh.mmu.load_state(&mut r)?;
        let ram = r.blob()?;
        if ram.len() != fresh.mmu.cart.ram.len() {
            return Err(SaveStateError::RomMismatch);
        }
        fresh.mmu.cart.ram.copy_from_slice(ram);
        fresh.error = false;
        fresh.error_msg = None;

        *self = fresh;
        self.mmu.keys = Keys::default();
        if let Some(mbc7) = self.mmu.cart.mbc7_mut() {
            mbc7.tilt = Tilt::default();
        }
        Ok(())
    }

    pub fn save_state_to_file(&self, path: &Path) -> Result<(), SaveStateError> {
        fs::write(path, self.save_state())?;
        info!("Saved state to {}", path.display());
        Ok(())
    }

    pub fn load_state_from_file(&mut self, path: &Path) -> Result<(), SaveStateError> {
        let data = fs::read(path)?;
        self.load_state(&data)?;
        info!("Loaded state from {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core(program: &[u8]) -> Core {
        let mut rom = vec![0u8; 0x8000];
        rom[0x0100..0x0100 + program.len()].copy_from_slice(program);
        Core::from_rom(rom).unwrap()
    }

    #[test]
    fn tiny_turbo_speed_means_unlimited() {
        let mut core = core(&[0x18, 0xFE]);
        core.set_turbo_speed(1e-30);
        assert_eq!(core.mmu.apu.turbo_speed, 0.0);
        core.set_turbo_speed(f32::NAN);
        assert_eq!(core.mmu.apu.turbo_speed, 0.0);
        core.set_turbo_speed(4.0);
        assert_eq!(core.mmu.apu.turbo_speed, 4.0);
    }

    #[test]
    fn invalid_opcode_sets_error_flag() {
        let mut core = core(&[0xD3]);
        for _ in 0..8 {
            core.emulate_cycle();
        }
        assert!(core.error);
        assert_eq!(core.error_msg, Some("Invalid opcode encountered."));
    }

    #[test]
    fn unknown_palette_is_rejected() {
        let mut core = core(&[]);
        assert!(matches!(
            core.set_palette("sepia"),
            Err(CoreError::UnknownPalette(name)) if name == "sepia"
        ));
        core.set_palette("invert").unwrap();
        assert_eq!(core.mmu.ppu.palette.name, "Invert");
    }

    #[test]
    fn savestate_slot_path() {
        let path = Core::savestate_path(Path::new("/saves"), Path::new("/roms/tetris.gb"), 3);
        assert_eq!(path, Path::new("/saves/tetris.s3"));
    }

    #[test]
    fn bad_magic_leaves_core_alone() {
        let mut core = core(&[]);
        core.cpu.regs.a = 0x42;
        assert!(matches!(
            core.load_state(b"NOPE"),
            Err(SaveStateError::BadMagic)
        ));
        assert!(matches!(core.load_state(b"GB"), Err(SaveStateError::BadMagic)));
        assert_eq!(core.cpu.regs.a, 0x42);
    }

    #[test]
    fn truncated_state_is_declined() {
        let mut core = core(&[]);
        let state = core.save_state();
        core.cpu.regs.b = 0x99;
        assert!(matches!(
            core.load_state(&state[..state.len() / 2]),
            Err(SaveStateError::Truncated)
        ));
        assert_eq!(core.cpu.regs.b, 0x99);
    }

    #[test]
    fn state_round_trip_restores_registers() {
        let mut core = core(&[]);
        let state = core.save_state();
        let pc = core.cpu.regs.pc;
        core.cpu.regs.pc = 0x1234;
        core.mmu.write(0xC000, 0x77);
        core.load_state(&state).unwrap();
        assert_eq!(core.cpu.regs.pc, pc);
        assert_eq!(core.mmu.read(0xC000), 0x00);
    }
}
