//! Binary savestates.
//!
//! Layout: `b"GBCC"`, u32 version, u16 ROM global checksum, then every
//! component in a fixed order, then the cartridge RAM. All integers are
//! little-endian. Host-side state (audio sink, pacing, frame semaphore,
//! cheats, held keys, palette choice) is not part of a state.

use crate::{
    apu::{self, Apu, Channel, Duty, Envelope, Noise, Sweep, Wave},
    camera::Camera,
    cartridge::Cartridge,
    cpu::{Cpu, Halt, ImeTimer, Instruction, InterruptState, Registers},
    error::SaveStateError,
    mbc::{Huc3, Mbc, MbcKind, Mmm01, Rtc},
    mbc7::{Eeprom, EepromState, Mbc7},
    mmu::{Hdma, Mmu, OamDma},
    ppu::{LineBuffer, Ppu, Sprite, Tile},
    printer::{Packet, PacketByte, Printer, Rle},
    serial::{LinkCable, LinkState},
    timer::Timer,
};

pub const MAGIC: &[u8; 4] = b"GBCC";
pub const VERSION: u32 = 8;

#[derive(Debug, Default)]
pub struct StateWriter {
    buf: Vec<u8>,
}

impl StateWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    pub fn u8(&mut self, val: u8) {
        self.buf.push(val);
    }

    pub fn bool(&mut self, val: bool) {
        self.buf.push(val as u8);
    }

    pub fn u16(&mut self, val: u16) {
        self.buf.extend_from_slice(&val.to_le_bytes());
    }

    pub fn u32(&mut self, val: u32) {
        self.buf.extend_from_slice(&val.to_le_bytes());
    }

    pub fn u64(&mut self, val: u64) {
        self.buf.extend_from_slice(&val.to_le_bytes());
    }

    pub fn i64(&mut self, val: i64) {
        self.buf.extend_from_slice(&val.to_le_bytes());
    }

    pub fn bytes(&mut self, val: &[u8]) {
        self.buf.extend_from_slice(val);
    }

    /// Length-prefixed byte block.
    pub fn blob(&mut self, val: &[u8]) {
        self.u32(val.len() as u32);
        self.bytes(val);
    }
}

#[derive(Debug)]
pub struct StateReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> StateReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], SaveStateError> {
        let end = self.pos.checked_add(len).ok_or(SaveStateError::Truncated)?;
        let slice = self.data.get(self.pos..end).ok_or(SaveStateError::Truncated)?;
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], SaveStateError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, SaveStateError> {
        Ok(self.take(1)?[0])
    }

    pub fn bool(&mut self) -> Result<bool, SaveStateError> {
        Ok(self.u8()? != 0)
    }

    pub fn u16(&mut self) -> Result<u16, SaveStateError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub fn u32(&mut self) -> Result<u32, SaveStateError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn u64(&mut self) -> Result<u64, SaveStateError> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    pub fn i64(&mut self) -> Result<i64, SaveStateError> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    /// Fill `out` completely.
    pub fn bytes_into(&mut self, out: &mut [u8]) -> Result<(), SaveStateError> {
        out.copy_from_slice(self.take(out.len())?);
        Ok(())
    }

    pub fn blob(&mut self) -> Result<&'a [u8], SaveStateError> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }
}

/// A component that can be written to and restored from a savestate.
pub trait Savestate {
    fn save_state(&self, w: &mut StateWriter);
    fn load_state(&mut self, r: &mut StateReader) -> Result<(), SaveStateError>;
}

impl Savestate for Registers {
    fn save_state(&self, w: &mut StateWriter) {
        w.u16(self.af());
        w.u16(self.bc());
        w.u16(self.de());
        w.u16(self.hl());
        w.u16(self.sp);
        w.u16(self.pc);
    }

    fn load_state(&mut self, r: &mut StateReader) -> Result<(), SaveStateError> {
        self.set_af(r.u16()?);
        self.set_bc(r.u16()?);
        self.set_de(r.u16()?);
        self.set_hl(r.u16()?);
        self.sp = r.u16()?;
        self.pc = r.u16()?;
        Ok(())
    }
}

impl Savestate for Cpu {
    fn save_state(&self, w: &mut StateWriter) {
        self.regs.save_state(w);
        let Instruction {
            opcode,
            op1,
            op2,
            addr,
            step,
            running,
            prefix_cb,
        } = self.inst;
        w.u8(opcode);
        w.u8(op1);
        w.u8(op2);
        w.u16(addr);
        w.u8(step);
        w.bool(running);
        w.bool(prefix_cb);
        w.u16(self.interrupt.addr);
        w.bool(self.interrupt.request);
        w.bool(self.interrupt.running);
        w.bool(self.halt.set);
        w.bool(self.halt.no_interrupt);
        w.bool(self.halt.skip);
        w.bool(self.ime);
        w.u8(self.ime_timer.timer);
        w.bool(self.ime_timer.target);
        w.bool(self.stop);
        w.u8(self.clock);
    }

    fn load_state(&mut self, r: &mut StateReader) -> Result<(), SaveStateError> {
        self.regs.load_state(r)?;
        self.inst = Instruction {
            opcode: r.u8()?,
            op1: r.u8()?,
            op2: r.u8()?,
            addr: r.u16()?,
            step: r.u8()?,
            running: r.bool()?,
            prefix_cb: r.bool()?,
        };
        self.interrupt = InterruptState {
            addr: r.u16()?,
            request: r.bool()?,
            running: r.bool()?,
        };
        self.halt = Halt {
            set: r.bool()?,
            no_interrupt: r.bool()?,
            skip: r.bool()?,
        };
        self.ime = r.bool()?;
        self.ime_timer = ImeTimer {
            timer: r.u8()?,
            target: r.bool()?,
        };
        self.stop = r.bool()?;
        self.clock = r.u8()?;
        self.invalid_opcode = None;
        Ok(())
    }
}

impl Savestate for Timer {
    fn save_state(&self, w: &mut StateWriter) {
        w.u16(self.div_timer);
        w.u8(self.tima);
        w.u8(self.tma);
        w.u8(self.tac);
        w.u8(self.tima_reload);
        w.bool(self.tac_bit);
        w.bool(self.apu_div_bit);
    }

    fn load_state(&mut self, r: &mut StateReader) -> Result<(), SaveStateError> {
        self.div_timer = r.u16()?;
        self.tima = r.u8()?;
        self.tma = r.u8()?;
        self.tac = r.u8()?;
        self.tima_reload = r.u8()?;
        self.tac_bit = r.bool()?;
        self.apu_div_bit = r.bool()?;
        Ok(())
    }
}

impl Savestate for apu::Timer {
    fn save_state(&self, w: &mut StateWriter) {
        w.u16(self.period);
        w.u16(self.counter);
    }

    fn load_state(&mut self, r: &mut StateReader) -> Result<(), SaveStateError> {
        self.period = r.u16()?;
        self.counter = r.u16()?;
        Ok(())
    }
}

impl Savestate for Envelope {
    fn save_state(&self, w: &mut StateWriter) {
        self.timer.save_state(w);
        w.u8(self.start_volume);
        w.u8(self.volume);
        w.u8(self.dir as u8);
        w.bool(self.enabled);
    }

    fn load_state(&mut self, r: &mut StateReader) -> Result<(), SaveStateError> {
        self.timer.load_state(r)?;
        self.start_volume = r.u8()?;
        self.volume = r.u8()?;
        self.dir = r.u8()? as i8;
        self.enabled = r.bool()?;
        Ok(())
    }
}

impl Savestate for Duty {
    fn save_state(&self, w: &mut StateWriter) {
        self.timer.save_state(w);
        w.u8(self.counter);
        w.u8(self.cycle);
        w.u16(self.freq);
        w.bool(self.enabled);
    }

    fn load_state(&mut self, r: &mut StateReader) -> Result<(), SaveStateError> {
        self.timer.load_state(r)?;
        self.counter = r.u8()? & 0x07;
        self.cycle = r.u8()? & 0x03;
        self.freq = r.u16()?;
        self.enabled = r.bool()?;
        Ok(())
    }
}

impl Savestate for Channel {
    fn save_state(&self, w: &mut StateWriter) {
        self.envelope.save_state(w);
        self.duty.save_state(w);
        w.u16(self.counter);
        w.bool(self.length_enable);
        w.bool(self.state);
        w.bool(self.enabled);
        w.bool(self.dac);
        w.bool(self.left);
        w.bool(self.right);
    }

    fn load_state(&mut self, r: &mut StateReader) -> Result<(), SaveStateError> {
        self.envelope.load_state(r)?;
        self.duty.load_state(r)?;
        self.counter = r.u16()?;
        self.length_enable = r.bool()?;
        self.state = r.bool()?;
        self.enabled = r.bool()?;
        self.dac = r.bool()?;
        self.left = r.bool()?;
        self.right = r.bool()?;
        Ok(())
    }
}

impl Savestate for Sweep {
    fn save_state(&self, w: &mut StateWriter) {
        self.timer.save_state(w);
        w.u16(self.freq);
        w.u16(self.period);
        w.u8(self.shift);
        w.bool(self.decreasing);
        w.bool(self.enabled);
        w.bool(self.calculated);
    }

    fn load_state(&mut self, r: &mut StateReader) -> Result<(), SaveStateError> {
        self.timer.load_state(r)?;
        self.freq = r.u16()?;
        self.period = r.u16()?;
        self.shift = r.u8()?;
        self.decreasing = r.bool()?;
        self.enabled = r.bool()?;
        self.calculated = r.bool()?;
        Ok(())
    }
}

impl Savestate for Noise {
    fn save_state(&self, w: &mut StateWriter) {
        self.timer.save_state(w);
        w.u8(self.shift);
        w.bool(self.width_mode);
        w.u16(self.lfsr);
    }

    fn load_state(&mut self, r: &mut StateReader) -> Result<(), SaveStateError> {
        self.timer.load_state(r)?;
        self.shift = r.u8()?;
        self.width_mode = r.bool()?;
        self.lfsr = r.u16()?;
        Ok(())
    }
}

impl Savestate for Wave {
    fn save_state(&self, w: &mut StateWriter) {
        self.timer.save_state(w);
        w.u16(self.addr);
        w.u16(self.freq);
        w.u8(self.buffer);
        w.u8(self.position);
        w.u8(self.shift);
    }

    fn load_state(&mut self, r: &mut StateReader) -> Result<(), SaveStateError> {
        self.timer.load_state(r)?;
        self.addr = r.u16()?;
        self.freq = r.u16()?;
        self.buffer = r.u8()?;
        self.position = r.u8()?;
        self.shift = r.u8()?;
        Ok(())
    }
}

impl Savestate for Apu {
    fn save_state(&self, w: &mut StateWriter) {
        for ch in [&self.ch1, &self.ch2, &self.ch3, &self.ch4] {
            ch.save_state(w);
        }
        self.sweep.save_state(w);
        self.noise.save_state(w);
        self.wave.save_state(w);
        w.u8(self.left_vol);
        w.u8(self.right_vol);
        w.bool(self.disabled);
        w.u8(self.sequencer_counter);
    }

    fn load_state(&mut self, r: &mut StateReader) -> Result<(), SaveStateError> {
        for ch in [&mut self.ch1, &mut self.ch2, &mut self.ch3, &mut self.ch4] {
            ch.load_state(r)?;
        }
        self.sweep.load_state(r)?;
        self.noise.load_state(r)?;
        self.wave.load_state(r)?;
        self.left_vol = r.u8()?;
        self.right_vol = r.u8()?;
        self.disabled = r.bool()?;
        self.sequencer_counter = r.u8()?;
        Ok(())
    }
}

impl Savestate for Tile {
    fn save_state(&self, w: &mut StateWriter) {
        w.bytes(&[self.hi, self.lo, self.x, self.attr]);
    }

    fn load_state(&mut self, r: &mut StateReader) -> Result<(), SaveStateError> {
        let [hi, lo, x, attr] = r.array()?;
        *self = Tile { hi, lo, x, attr };
        Ok(())
    }
}

impl Savestate for LineBuffer {
    fn save_state(&self, w: &mut StateWriter) {
        for colour in self.colour {
            w.u32(colour);
        }
        w.bytes(&self.attr);
    }

    fn load_state(&mut self, r: &mut StateReader) -> Result<(), SaveStateError> {
        for colour in self.colour.iter_mut() {
            *colour = r.u32()?;
        }
        r.bytes_into(&mut self.attr)
    }
}

impl Savestate for Ppu {
    fn save_state(&self, w: &mut StateWriter) {
        for bank in &self.vram {
            w.bytes(bank);
        }
        w.u8(self.vram_bank as u8);
        w.bytes(&self.oam);
        w.bytes(&self.bgp);
        w.bytes(&self.obp);
        w.u16(self.clock);
        w.u8(self.ly);
        w.bool(self.lcd_disable);
        w.u64(self.frame);
        w.bytes(&[self.scy, self.scx, self.lyc, self.wy, self.wx, self.lcdc]);
        w.bool(self.last_stat);
        w.u8(self.x);
        w.u8(self.window_ly);
        w.bool(self.window_drawn);
        w.u16(self.next_dot);
        w.u8(self.n_sprites as u8);
        for sprite in &self.sprites {
            w.bytes(&[sprite.x, sprite.y, sprite.index]);
            sprite.tile.save_state(w);
            w.bool(sprite.loaded);
        }
        self.bg_tile.save_state(w);
        self.window_tile.save_state(w);
        self.bg_line.save_state(w);
        self.window_line.save_state(w);
        self.sprite_line.save_state(w);
        for buffer in [&self.logical, &self.display] {
            for &px in buffer.iter() {
                w.u32(px);
            }
        }
    }

    fn load_state(&mut self, r: &mut StateReader) -> Result<(), SaveStateError> {
        for bank in self.vram.iter_mut() {
            r.bytes_into(bank)?;
        }
        self.vram_bank = (r.u8()? & 0x01) as usize;
        r.bytes_into(&mut self.oam)?;
        r.bytes_into(&mut self.bgp)?;
        r.bytes_into(&mut self.obp)?;
        self.clock = r.u16()?;
        self.ly = r.u8()?;
        self.lcd_disable = r.bool()?;
        self.frame = r.u64()?;
        [self.scy, self.scx, self.lyc, self.wy, self.wx, self.lcdc] = r.array()?;
        self.last_stat = r.bool()?;
        self.x = r.u8()?;
        self.window_ly = r.u8()?;
        self.window_drawn = r.bool()?;
        self.next_dot = r.u16()?;
        self.n_sprites = (r.u8()? as usize).min(self.sprites.len());
        for sprite in self.sprites.iter_mut() {
            let [x, y, index] = r.array()?;
            let mut tile = Tile::default();
            tile.load_state(r)?;
            *sprite = Sprite {
                x,
                y,
                index,
                tile,
                loaded: r.bool()?,
            };
        }
        self.bg_tile.load_state(r)?;
        self.window_tile.load_state(r)?;
        self.bg_line.load_state(r)?;
        self.window_line.load_state(r)?;
        self.sprite_line.load_state(r)?;
        for buffer in [&mut self.logical, &mut self.display] {
            for px in buffer.iter_mut() {
                *px = r.u32()?;
            }
        }
        Ok(())
    }
}

impl Savestate for Packet {
    fn save_state(&self, w: &mut StateWriter) {
        w.u8(self.command);
        w.u8(self.compression);
        w.u16(self.data_length);
        w.u16(self.printer_checksum);
        w.u16(self.gb_checksum);
        w.u8(match self.current_byte {
            PacketByte::Command => 0,
            PacketByte::Compression => 1,
            PacketByte::LengthLsb => 2,
            PacketByte::LengthMsb => 3,
            PacketByte::Data => 4,
            PacketByte::ChecksumLsb => 5,
            PacketByte::ChecksumMsb => 6,
            PacketByte::AliveIndicator => 7,
            PacketByte::Status => 8,
        });
        w.u16(self.data_byte);
        let (tag, n) = match self.rle {
            Rle::Control => (0, 0),
            Rle::Literal(n) => (1, n),
            Rle::Repeat(n) => (2, n),
        };
        w.bytes(&[tag, n]);
    }

    fn load_state(&mut self, r: &mut StateReader) -> Result<(), SaveStateError> {
        self.command = r.u8()?;
        self.compression = r.u8()?;
        self.data_length = r.u16()?;
        self.printer_checksum = r.u16()?;
        self.gb_checksum = r.u16()?;
        self.current_byte = match r.u8()? {
            0 => PacketByte::Command,
            1 => PacketByte::Compression,
            2 => PacketByte::LengthLsb,
            3 => PacketByte::LengthMsb,
            4 => PacketByte::Data,
            5 => PacketByte::ChecksumLsb,
            6 => PacketByte::ChecksumMsb,
            7 => PacketByte::AliveIndicator,
            _ => PacketByte::Status,
        };
        self.data_byte = r.u16()?;
        let [tag, n] = r.array()?;
        self.rle = match tag {
            1 => Rle::Literal(n),
            2 => Rle::Repeat(n),
            _ => Rle::Control,
        };
        Ok(())
    }
}

impl Savestate for Printer {
    fn save_state(&self, w: &mut StateWriter) {
        w.blob(&self.image_buffer);
        self.packet.save_state(w);
        w.bytes(&[self.margins, self.palette, self.exposure, self.status]);
        w.bool(self.magic);
        w.bool(self.in_packet);
        w.bool(self.connected);
        w.u32(self.print_timer);
    }

    fn load_state(&mut self, r: &mut StateReader) -> Result<(), SaveStateError> {
        self.image_buffer = r.blob()?.to_vec();
        self.packet.load_state(r)?;
        [self.margins, self.palette, self.exposure, self.status] = r.array()?;
        self.magic = r.bool()?;
        self.in_packet = r.bool()?;
        self.connected = r.bool()?;
        self.print_timer = r.u32()?;
        Ok(())
    }
}

impl Savestate for LinkCable {
    fn save_state(&self, w: &mut StateWriter) {
        w.u8(self.sb);
        w.u8(self.sc);
        w.u8(self.state.tag());
        w.u8(self.received);
        w.u8(self.current_bit);
        w.u16(self.divider);
        self.printer.save_state(w);
    }

    fn load_state(&mut self, r: &mut StateReader) -> Result<(), SaveStateError> {
        self.sb = r.u8()?;
        self.sc = r.u8()?;
        self.state = LinkState::from_tag(r.u8()?).unwrap_or_default();
        self.received = r.u8()?;
        self.current_bit = r.u8()?;
        self.divider = r.u16()?;
        self.printer.load_state(r)
    }
}

impl Savestate for Rtc {
    fn save_state(&self, w: &mut StateWriter) {
        w.bytes(&[
            self.seconds,
            self.minutes,
            self.hours,
            self.day_low,
            self.day_high,
            self.latch,
            self.cur_reg,
        ]);
        w.bool(self.mapped);
        w.i64(self.base_secs);
        w.u32(self.base_nanos);
    }

    fn load_state(&mut self, r: &mut StateReader) -> Result<(), SaveStateError> {
        [
            self.seconds,
            self.minutes,
            self.hours,
            self.day_low,
            self.day_high,
            self.latch,
            self.cur_reg,
        ] = r.array()?;
        self.mapped = r.bool()?;
        self.base_secs = r.i64()?;
        self.base_nanos = r.u32()?;
        Ok(())
    }
}

impl Savestate for Eeprom {
    fn save_state(&self, w: &mut StateWriter) {
        for word in self.data {
            w.u16(word);
        }
        w.bool(self.cs);
        w.bool(self.clk);
        w.bool(self.di);
        w.bool(self.do_bit);
        w.bool(self.write_enable);
        match self.state {
            EepromState::Idle => w.u8(0),
            EepromState::Command { bits, count } => {
                w.u8(1);
                w.u16(bits);
                w.u8(count);
            }
            EepromState::Read { value, count } => {
                w.u8(2);
                w.u16(value);
                w.u8(count);
            }
            EepromState::Write { addr, value, count } => {
                w.u8(3);
                w.bool(addr.is_some());
                w.u8(addr.unwrap_or(0));
                w.u16(value);
                w.u8(count);
            }
        }
    }

    fn load_state(&mut self, r: &mut StateReader) -> Result<(), SaveStateError> {
        for word in self.data.iter_mut() {
            *word = r.u16()?;
        }
        self.cs = r.bool()?;
        self.clk = r.bool()?;
        self.di = r.bool()?;
        self.do_bit = r.bool()?;
        self.write_enable = r.bool()?;
        self.state = match r.u8()? {
            1 => EepromState::Command {
                bits: r.u16()?,
                count: r.u8()?,
            },
            2 => EepromState::Read {
                value: r.u16()?,
                count: r.u8()?,
            },
            3 => {
                let present = r.bool()?;
                let addr = r.u8()?;
                EepromState::Write {
                    addr: present.then_some(addr),
                    value: r.u16()?,
                    count: r.u8()?,
                }
            }
            _ => EepromState::Idle,
        };
        Ok(())
    }
}

impl Savestate for Mbc7 {
    fn save_state(&self, w: &mut StateWriter) {
        w.u8(self.ramg2);
        w.u16(self.x);
        w.u16(self.y);
        w.bool(self.latched);
        self.eeprom.save_state(w);
    }

    fn load_state(&mut self, r: &mut StateReader) -> Result<(), SaveStateError> {
        self.ramg2 = r.u8()?;
        self.x = r.u16()?;
        self.y = r.u16()?;
        self.latched = r.bool()?;
        self.eeprom.load_state(r)
    }
}

impl Savestate for Camera {
    fn save_state(&self, w: &mut StateWriter) {
        w.bytes(&self.regs);
        w.bool(self.register_mode);
        w.u32(self.capture_timer);
        w.bool(self.capture_request);
    }

    fn load_state(&mut self, r: &mut StateReader) -> Result<(), SaveStateError> {
        r.bytes_into(&mut self.regs)?;
        self.register_mode = r.bool()?;
        self.capture_timer = r.u32()?;
        self.capture_request = r.bool()?;
        Ok(())
    }
}

impl Savestate for Huc3 {
    fn save_state(&self, w: &mut StateWriter) {
        w.u8(self.mode);
        w.u8(self.addr);
        w.bytes(&self.mem);
        w.u8(self.last_cmd);
        w.u8(self.response);
    }

    fn load_state(&mut self, r: &mut StateReader) -> Result<(), SaveStateError> {
        self.mode = r.u8()?;
        self.addr = r.u8()?;
        r.bytes_into(&mut self.mem)?;
        self.last_cmd = r.u8()?;
        self.response = r.u8()?;
        Ok(())
    }
}

impl Savestate for Mmm01 {
    fn save_state(&self, w: &mut StateWriter) {
        w.bool(self.mapped);
        w.bytes(&[
            self.romb_mid,
            self.romb_high,
            self.ramb_mid,
            self.rom_mask,
            self.mode,
        ]);
    }

    fn load_state(&mut self, r: &mut StateReader) -> Result<(), SaveStateError> {
        self.mapped = r.bool()?;
        [
            self.romb_mid,
            self.romb_high,
            self.ramb_mid,
            self.rom_mask,
            self.mode,
        ] = r.array()?;
        Ok(())
    }
}

impl Savestate for Mbc {
    fn save_state(&self, w: &mut StateWriter) {
        w.u8(self.kind.tag());
        match &self.kind {
            MbcKind::Mbc7(mbc7) => mbc7.save_state(w),
            MbcKind::Huc1 { ir_mode } => w.bool(*ir_mode),
            MbcKind::Huc3(huc3) => huc3.save_state(w),
            MbcKind::Mmm01(mmm01) => mmm01.save_state(w),
            MbcKind::Camera(camera) => camera.save_state(w),
            MbcKind::None | MbcKind::Mbc1 | MbcKind::Mbc2 | MbcKind::Mbc3 | MbcKind::Mbc5 => {}
        }
        w.u32(self.rom0_bank as u32);
        w.u32(self.romx_bank as u32);
        w.u32(self.sram_bank as u32);
        w.bytes(&[self.ramg, self.romb0, self.romb1, self.ramb]);
        w.bool(self.sram_enable);
        self.rtc.save_state(w);
    }

    fn load_state(&mut self, r: &mut StateReader) -> Result<(), SaveStateError> {
        if r.u8()? != self.kind.tag() {
            return Err(SaveStateError::RomMismatch);
        }
        match &mut self.kind {
            MbcKind::Mbc7(mbc7) => mbc7.load_state(r)?,
            MbcKind::Huc1 { ir_mode } => *ir_mode = r.bool()?,
            MbcKind::Huc3(huc3) => huc3.load_state(r)?,
            MbcKind::Mmm01(mmm01) => mmm01.load_state(r)?,
            MbcKind::Camera(camera) => camera.load_state(r)?,
            MbcKind::None | MbcKind::Mbc1 | MbcKind::Mbc2 | MbcKind::Mbc3 | MbcKind::Mbc5 => {}
        }
        self.rom0_bank = r.u32()? as usize;
        self.romx_bank = r.u32()? as usize;
        self.sram_bank = r.u32()? as usize;
        [self.ramg, self.romb0, self.romb1, self.ramb] = r.array()?;
        self.sram_enable = r.bool()?;
        self.rtc.load_state(r)
    }
}

impl Savestate for Cartridge {
    fn save_state(&self, w: &mut StateWriter) {
        self.mbc.save_state(w);
        w.bool(self.rumble_state);
    }

    fn load_state(&mut self, r: &mut StateReader) -> Result<(), SaveStateError> {
        self.mbc.load_state(r)?;
        self.rumble_state = r.bool()?;
        Ok(())
    }
}

impl Savestate for Mmu {
    fn save_state(&self, w: &mut StateWriter) {
        self.cart.save_state(w);
        for bank in &self.wram {
            w.bytes(bank);
        }
        w.u8(self.wram_bank as u8);
        w.bytes(&self.unused);
        w.bytes(&self.io);
        w.bytes(&self.hram);
        w.u8(self.ie);
        let OamDma {
            source,
            new_source,
            timer,
            requested,
            running,
        } = self.dma;
        w.u16(source);
        w.u16(new_source);
        w.u8(timer);
        w.bool(requested);
        w.bool(running);
        let Hdma {
            source,
            dest,
            length,
            to_copy,
            hblank,
        } = self.hdma;
        w.u16(source);
        w.u16(dest);
        w.u16(length);
        w.u16(to_copy);
        w.bool(hblank);
        w.bool(self.double_speed);
        self.ppu.save_state(w);
        self.apu.save_state(w);
        self.timer.save_state(w);
        self.link.save_state(w);
    }

    fn load_state(&mut self, r: &mut StateReader) -> Result<(), SaveStateError> {
        self.cart.load_state(r)?;
        for bank in self.wram.iter_mut() {
            r.bytes_into(bank)?;
        }
        self.wram_bank = (r.u8()? & 0x07).max(1) as usize;
        r.bytes_into(&mut self.unused)?;
        r.bytes_into(&mut self.io)?;
        r.bytes_into(&mut self.hram)?;
        self.ie = r.u8()?;
        self.dma = OamDma {
            source: r.u16()?,
            new_source: r.u16()?,
            timer: r.u8()?,
            requested: r.bool()?,
            running: r.bool()?,
        };
        self.hdma = Hdma {
            source: r.u16()?,
            dest: r.u16()?,
            length: r.u16()?,
            to_copy: r.u16()?,
            hblank: r.bool()?,
        };
        self.double_speed = r.bool()?;
        self.ppu.load_state(r)?;
        self.apu.load_state(r)?;
        self.timer.load_state(r)?;
        self.link.load_state(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_reports_truncation() {
        let mut r = StateReader::new(&[0x34, 0x12, 0x01]);
        assert_eq!(r.u16().unwrap(), 0x1234);
        assert!(matches!(r.u16(), Err(SaveStateError::Truncated)));
    }

    #[test]
    fn blob_is_length_prefixed() {
        let mut w = StateWriter::new();
        w.blob(&[1, 2, 3]);
        w.bool(true);
        let data = w.into_inner();
        assert_eq!(&data[..4], &[3, 0, 0, 0]);
        let mut r = StateReader::new(&data);
        assert_eq!(r.blob().unwrap(), &[1, 2, 3]);
        assert!(r.bool().unwrap());
        assert!(r.is_empty());
    }

    #[test]
    fn eeprom_state_survives() {
        let mut eeprom = Eeprom::default();
        eeprom.data[5] = 0xBEEF;
        eeprom.state = EepromState::Write {
            addr: Some(0x12),
            value: 0x0F0F,
            count: 3,
        };
        let mut w = StateWriter::new();
        eeprom.save_state(&mut w);
        let data = w.into_inner();
        let mut restored = Eeprom::default();
        restored.load_state(&mut StateReader::new(&data)).unwrap();
        assert_eq!(restored, eeprom);
    }
}
