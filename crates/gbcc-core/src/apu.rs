use std::{
    thread,
    time::{Duration, Instant},
};

use log::warn;

use crate::{
    audio_queue::AudioProducer,
    bit_utils::{bit, check_bit, check_bit16},
    hardware::{
        CLOCK_FREQ, NR10, NR11, NR12, NR13, NR14, NR21, NR22, NR23, NR24, NR30, NR31, NR32, NR33,
        NR34, NR41, NR42, NR43, NR44, NR50, NR51, NR52, WAVE_START, io,
    },
};

#[cfg(feature = "apu-trace")]
macro_rules! apu_trace {
    ($($arg:tt)*) => {
        println!($($arg)*);
    };
}
#[cfg(not(feature = "apu-trace"))]
macro_rules! apu_trace {
    ($($arg:tt)*) => {};
}

// Wall-clock pacing checkpoints per second
const SYNC_FREQ: u64 = 1024;
const SYNC_RESET_CLOCKS: u64 = 512;
const CLOCKS_PER_SYNC: u32 = CLOCK_FREQ / SYNC_FREQ as u32;
const SLEEP_TIME: Duration = Duration::from_nanos(1_000_000_000 / SYNC_FREQ);
/// Turbo speeds below this run unthrottled.
pub const MIN_TURBO_SPEED: f32 = 1e-3;
/// Drift beyond this is treated as a stall and the baseline restarts.
const SLEEP_DETECT: Duration = Duration::from_millis(100);

pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;
const VOLUME_FACTOR: i32 = 64;

const DUTY_TABLE: [[bool; 8]; 4] = [
    [false, false, false, false, false, false, false, true],
    [true, false, false, false, false, false, false, true],
    [true, false, false, false, false, true, true, true],
    [false, true, true, true, true, true, true, false],
];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Timer {
    pub period: u16,
    pub counter: u16,
}

impl Timer {
    /// Count down once. Returns true (and reloads) when the counter hits 0.
    fn clock(&mut self) -> bool {
        self.counter = self.counter.wrapping_sub(1);
        if self.counter == 0 {
            self.reset();
            return true;
        }
        false
    }

    fn reset(&mut self) {
        self.counter = self.period;
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Duty {
    pub timer: Timer,
    pub counter: u8,
    pub cycle: u8,
    pub freq: u16,
    pub enabled: bool,
}

impl Duty {
    fn period(&self) -> u16 {
        (2048 - self.freq) * 4
    }

    fn clock(&mut self) -> bool {
        self.timer.period = self.period();
        if self.timer.counter == 1 {
            self.counter = (self.counter + 1) % 8;
            self.timer.counter = self.timer.period;
        } else {
            self.timer.counter = self.timer.counter.wrapping_sub(1);
        }
        DUTY_TABLE[self.cycle as usize][self.counter as usize]
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Sweep {
    pub timer: Timer,
    /// Shadow frequency.
    pub freq: u16,
    pub period: u16,
    pub shift: u8,
    pub decreasing: bool,
    pub enabled: bool,
    /// A subtraction has been calculated since the last trigger.
    pub calculated: bool,
}

impl Sweep {
    fn calculate(&mut self) -> u16 {
        if self.decreasing {
            self.calculated = true;
            return self.freq - (self.freq >> self.shift);
        }
        self.freq + (self.freq >> self.shift)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Noise {
    pub timer: Timer,
    pub shift: u8,
    pub width_mode: bool,
    pub lfsr: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Wave {
    pub timer: Timer,
    /// Wave RAM byte currently being played.
    pub addr: u16,
    pub freq: u16,
    pub buffer: u8,
    pub position: u8,
    pub shift: u8,
}

impl Default for Wave {
    fn default() -> Self {
        Self {
            timer: Timer::default(),
            addr: WAVE_START,
            freq: 0,
            buffer: 0,
            position: 0,
            shift: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Envelope {
    pub timer: Timer,
    pub start_volume: u8,
    pub volume: u8,
    pub dir: i8,
    pub enabled: bool,
}

impl Envelope {
    fn clock(&mut self) {
        if !self.enabled {
            return;
        }
        if self.timer.period == 0 {
            self.timer.period = 8;
        }
        if self.timer.clock() {
            self.volume = self.volume.wrapping_add_signed(self.dir);
            if self.volume == 0x10 || self.volume == 0xFF {
                self.volume = self.volume.wrapping_add_signed(-self.dir);
                self.enabled = false;
            }
        }
    }

    /// NRx2 write. Returns true if the DAC stays powered.
    fn write(&mut self, val: u8, channel_on: bool) -> bool {
        self.start_volume = val >> 4;
        self.dir = if check_bit(val, 3) { 1 } else { -1 };
        self.timer.period = (val & 0x07) as u16;
        // Add mode with period 0 on a playing channel bumps the volume.
        if channel_on && val & 0x0F == 0x08 {
            self.volume = (self.volume + 1) & 0x0F;
        }
        val & 0xF8 != 0
    }

    fn trigger(&mut self) {
        self.enabled = self.timer.period > 0;
        self.volume = self.start_volume;
        self.timer.reset();
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Channel {
    pub envelope: Envelope,
    pub duty: Duty,
    pub counter: u16,
    pub length_enable: bool,
    /// Current output level of the generator (high or low).
    pub state: bool,
    pub enabled: bool,
    pub dac: bool,
    pub left: bool,
    pub right: bool,
}

impl Channel {
    fn clock_length(&mut self) {
        self.counter = self.counter.saturating_sub(1);
        if self.counter == 0 {
            self.enabled = false;
        }
    }

    /// Handle the length-enable bit of an NRx4 write. Enabling length on an
    /// odd sequencer step clocks the counter once more.
    fn write_length_enable(&mut self, val: u8, sequencer: u8) {
        let was_enabled = self.length_enable;
        self.length_enable = check_bit(val, 6);
        if sequencer & 0x01 != 0 && !was_enabled && self.length_enable && self.counter > 0 {
            self.clock_length();
        }
    }

    /// Reload an expired length counter on trigger.
    fn reload_length(&mut self, full: u16, sequencer: u8) {
        if self.counter == 0 {
            self.counter = if sequencer & 0x01 != 0 && self.length_enable {
                full - 1
            } else {
                full
            };
        }
    }

    /// Digital output level 0-15.
    fn level(&self) -> u8 {
        if self.enabled && self.state {
            self.envelope.volume
        } else {
            0
        }
    }
}

/// Turns channel levels into stereo PCM at the host sample rate.
#[derive(Clone, Debug)]
pub struct Mixer {
    pub sample_rate: u32,
    accumulator: u32,
    sink: Option<AudioProducer>,
    hp_coef: f32,
    hp_prev_in: [f32; 2],
    hp_prev_out: [f32; 2],
}

impl Mixer {
    fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            accumulator: 0,
            sink: None,
            hp_coef: Self::hp_coef(sample_rate),
            hp_prev_in: [0.0; 2],
            hp_prev_out: [0.0; 2],
        }
    }

    fn hp_coef(rate: u32) -> f32 {
        0.999_958_f32.powf(CLOCK_FREQ as f32 / rate as f32)
    }

    /// Returns true when a sample is due on this clock.
    fn tick(&mut self) -> bool {
        self.accumulator += self.sample_rate;
        if self.accumulator >= CLOCK_FREQ {
            self.accumulator -= CLOCK_FREQ;
            return true;
        }
        false
    }

    /// Remove the DC offset the DACs introduce.
    fn dc_block(&mut self, side: usize, sample: i32) -> i16 {
        let input = sample as f32;
        let out = input - self.hp_prev_in[side] + self.hp_coef * self.hp_prev_out[side];
        self.hp_prev_in[side] = input;
        self.hp_prev_out[side] = out;
        out.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
    }
}

/// Real-time pacing state. Not part of the emulated hardware.
#[derive(Clone, Debug)]
struct Pacing {
    sync_clock: u32,
    sample: u64,
    start_time: Instant,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            sync_clock: 0,
            sample: 0,
            start_time: Instant::now(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Apu {
    /// Tone & sweep
    pub ch1: Channel,
    /// Tone
    pub ch2: Channel,
    /// Wave output
    pub ch3: Channel,
    /// Noise
    pub ch4: Channel,
    pub sweep: Sweep,
    pub noise: Noise,
    pub wave: Wave,
    pub left_vol: u8,
    pub right_vol: u8,
    pub disabled: bool,
    pub sequencer_counter: u8,
    /// Speed multiplier while turbo is held; 0 runs unthrottled.
    pub turbo_speed: f32,
    pacing: Pacing,
    mixer: Mixer,
}

impl Default for Apu {
    fn default() -> Self {
        Self::new()
    }
}

impl Apu {
    pub fn new() -> Self {
        Self {
            ch1: Channel::default(),
            ch2: Channel::default(),
            ch3: Channel::default(),
            ch4: Channel::default(),
            sweep: Sweep::default(),
            noise: Noise::default(),
            wave: Wave::default(),
            left_vol: 0,
            right_vol: 0,
            disabled: false,
            sequencer_counter: 0,
            turbo_speed: 0.0,
            pacing: Pacing::default(),
            mixer: Mixer::new(DEFAULT_SAMPLE_RATE),
        }
    }

    /// Reset the sound hardware, keeping the host-side mixer and pacing.
    fn power_off(&mut self) {
        let mixer = self.mixer.clone();
        let pacing = self.pacing.clone();
        let turbo_speed = self.turbo_speed;
        *self = Self::new();
        self.mixer = mixer;
        self.pacing = pacing;
        self.turbo_speed = turbo_speed;
        self.disabled = true;
    }

    pub fn set_sink(&mut self, sink: Option<AudioProducer>) {
        self.mixer.sink = sink;
    }

    pub fn set_sample_rate(&mut self, rate: u32) {
        let rate = rate.max(1);
        self.mixer.sample_rate = rate;
        self.mixer.hp_coef = Mixer::hp_coef(rate);
    }

    pub fn sample_rate(&self) -> u32 {
        self.mixer.sample_rate
    }

    /// NR52 channel status bits.
    pub fn status(&self) -> u8 {
        (self.ch1.enabled as u8)
            | (self.ch2.enabled as u8) << 1
            | (self.ch3.enabled as u8) << 2
            | (self.ch4.enabled as u8) << 3
    }

    /// Advance one clock: generators, then mixing, then pacing.
    pub fn clock(&mut self, io_regs: &[u8; 0x80], sync_to_video: bool, turbo: bool) {
        if !sync_to_video {
            self.pacing.sync_clock += 1;
            if self.pacing.sync_clock == CLOCKS_PER_SYNC {
                self.pacing.sync_clock = 0;
                self.pacing.sample += 1;
                self.time_sync(turbo);
            }
        }

        if !self.disabled {
            // Pulse duty only runs once the channel has been triggered.
            if self.ch1.duty.enabled {
                self.ch1.state = self.ch1.duty.clock();
            }
            if self.ch2.duty.enabled {
                self.ch2.state = self.ch2.duty.clock();
            }

            // The LFSR is frozen for shifts 14 and 15.
            if self.noise.shift < 14 && self.noise.timer.clock() {
                let feedback = (self.noise.lfsr ^ (self.noise.lfsr >> 1)) & 0x01;
                self.noise.lfsr = (self.noise.lfsr >> 1) & !(1 << 14);
                self.noise.lfsr |= feedback << 14;
                if self.noise.width_mode {
                    self.noise.lfsr = (self.noise.lfsr & !(bit(6) as u16)) | feedback << 6;
                }
                self.ch4.state = !check_bit16(self.noise.lfsr, 0);
            }

            if self.wave.timer.clock() {
                self.wave.position = (self.wave.position + 1) & 31;
                self.wave.addr = WAVE_START + (self.wave.position / 2) as u16;
                let byte = io_regs[io(self.wave.addr)];
                // High nibble first.
                self.wave.buffer = if self.wave.position % 2 == 1 {
                    byte & 0x0F
                } else {
                    byte >> 4
                };
                self.ch3.state = true;
            }
        }

        if self.mixer.tick() {
            self.mix();
        }
    }

    fn mix(&mut self) {
        if self.mixer.sink.is_none() {
            return;
        }
        let wave_level = if self.ch3.enabled && self.wave.shift > 0 {
            self.wave.buffer >> (self.wave.shift - 1)
        } else {
            0
        };
        let levels = [
            (self.ch1.dac, self.ch1.level(), self.ch1.left, self.ch1.right),
            (self.ch2.dac, self.ch2.level(), self.ch2.left, self.ch2.right),
            (self.ch3.dac, wave_level, self.ch3.left, self.ch3.right),
            (self.ch4.dac, self.ch4.level(), self.ch4.left, self.ch4.right),
        ];
        let mut left = 0i32;
        let mut right = 0i32;
        let mut any_dac = false;
        for (dac, level, to_left, to_right) in levels {
            if !dac || self.disabled {
                continue;
            }
            any_dac = true;
            let analog = level as i32 * 2 - 15;
            if to_left {
                left += analog;
            }
            if to_right {
                right += analog;
            }
        }
        let (l, r) = if any_dac {
            let left = left * (self.left_vol as i32 + 1) * VOLUME_FACTOR;
            let right = right * (self.right_vol as i32 + 1) * VOLUME_FACTOR;
            (self.mixer.dc_block(0, left), self.mixer.dc_block(1, right))
        } else {
            self.mixer.hp_prev_in = [0.0; 2];
            self.mixer.hp_prev_out = [0.0; 2];
            (0, 0)
        };
        if let Some(sink) = &self.mixer.sink {
            sink.push_stereo(l, r);
        }
    }

    /// Sleep until wall-clock time catches up with emulated time.
    fn time_sync(&mut self, turbo: bool) {
        let speed = if turbo { self.turbo_speed } else { 1.0 };
        let unlimited = speed.is_nan() || speed < MIN_TURBO_SPEED;
        let now = Instant::now();
        let diff = now.duration_since(self.pacing.start_time);
        let target = |sample: u64| {
            Duration::from_nanos(1_000_000_000 * sample / SYNC_FREQ)
                .div_f32(speed.max(MIN_TURBO_SPEED))
        };
        if unlimited || diff > SLEEP_DETECT + target(self.pacing.sample) {
            self.pacing.start_time = now;
            self.pacing.sample = 0;
            return;
        }
        let mut now = now;
        while now.duration_since(self.pacing.start_time) < target(self.pacing.sample) {
            thread::sleep(SLEEP_TIME);
            now = Instant::now();
        }
        if self.pacing.sample > SYNC_RESET_CLOCKS {
            self.pacing.sample = 0;
            self.pacing.start_time = now;
        }
    }

    /// Frame sequencer step, on a falling edge of the divider's APU bit.
    pub fn sequencer_clock(&mut self, io_regs: &mut [u8; 0x80]) {
        if self.sequencer_counter & 0x01 == 0 {
            for ch in [&mut self.ch1, &mut self.ch2, &mut self.ch3, &mut self.ch4] {
                if ch.length_enable && ch.enabled {
                    ch.clock_length();
                }
            }
        }

        if self.sweep.enabled && (self.sequencer_counter == 2 || self.sequencer_counter == 6) {
            if self.sweep.timer.clock() && self.sweep.period != 0 {
                let freq = self.sweep.calculate();
                if self.sweep.shift != 0 && freq < 2048 {
                    self.sweep.freq = freq;
                    self.ch1.duty.freq = freq;
                    io_regs[io(NR13)] = (freq & 0xFF) as u8;
                    io_regs[io(NR14)] = (io_regs[io(NR14)] & !0x07) | (freq >> 8) as u8;
                }
                // The overflow check runs again even with a zero shift.
                if self.sweep.calculate() > 2047 {
                    self.ch1.enabled = false;
                }
            }
        }

        if self.sequencer_counter == 7 {
            self.ch1.envelope.clock();
            self.ch2.envelope.clock();
            self.ch4.envelope.clock();
        }

        self.sequencer_counter = (self.sequencer_counter + 1) & 0x07;
    }

    /// Side effects of a write to NR10-NR52. The register file has already
    /// been updated by the caller.
    pub fn write(&mut self, addr: u16, val: u8, io_regs: &mut [u8; 0x80]) {
        apu_trace!("APU write {addr:04X} = {val:02X}");
        let seq = self.sequencer_counter;
        match addr {
            NR10 => {
                self.sweep.period = ((val & 0x70) >> 4) as u16;
                self.sweep.timer.period = self.sweep.period;
                if self.sweep.timer.period == 0 {
                    self.sweep.timer.period = 8;
                }
                // Leaving subtract mode after a subtraction kills the channel.
                if !check_bit(val, 3) && self.sweep.decreasing && self.sweep.calculated {
                    self.ch1.enabled = false;
                }
                self.sweep.decreasing = check_bit(val, 3);
                self.sweep.shift = val & 0x07;
            }
            NR11 => {
                self.ch1.duty.cycle = val >> 6;
                self.ch1.counter = 64 - (val & 0x3F) as u16;
            }
            NR12 => {
                let on = self.ch1.enabled;
                self.ch1.dac = self.ch1.envelope.write(val, on);
                if !self.ch1.dac {
                    self.ch1.enabled = false;
                }
            }
            NR13 => self.ch1.duty.freq = (self.ch1.duty.freq & 0xFF00) | val as u16,
            NR14 => {
                self.ch1.write_length_enable(val, seq);
                self.ch1.duty.freq = (self.ch1.duty.freq & 0x00FF) | ((val & 0x07) as u16) << 8;
                if check_bit(val, 7) {
                    self.ch1_trigger(io_regs);
                }
            }
            NR21 => {
                self.ch2.duty.cycle = val >> 6;
                self.ch2.counter = 64 - (val & 0x3F) as u16;
            }
            NR22 => {
                let on = self.ch2.enabled;
                self.ch2.dac = self.ch2.envelope.write(val, on);
                if !self.ch2.dac {
                    self.ch2.enabled = false;
                }
            }
            NR23 => self.ch2.duty.freq = (self.ch2.duty.freq & 0xFF00) | val as u16,
            NR24 => {
                self.ch2.write_length_enable(val, seq);
                self.ch2.duty.freq = (self.ch2.duty.freq & 0x00FF) | ((val & 0x07) as u16) << 8;
                if check_bit(val, 7) {
                    self.ch2_trigger(io_regs);
                }
            }
            NR30 => {
                self.ch3.dac = check_bit(val, 7);
                if !self.ch3.dac {
                    self.ch3.enabled = false;
                }
            }
            NR31 => self.ch3.counter = 256 - val as u16,
            NR32 => self.wave.shift = (val & 0x60) >> 5,
            NR33 => {
                self.wave.freq = (self.wave.freq & 0xFF00) | val as u16;
                self.wave.timer.period = (2048 - self.wave.freq) * 2;
            }
            NR34 => {
                self.ch3.write_length_enable(val, seq);
                self.wave.freq = (self.wave.freq & 0x00FF) | ((val & 0x07) as u16) << 8;
                self.wave.timer.period = (2048 - self.wave.freq) * 2;
                if check_bit(val, 7) {
                    self.ch3_trigger();
                }
            }
            NR41 => self.ch4.counter = 64 - (val & 0x3F) as u16,
            NR42 => {
                let on = self.ch4.enabled;
                self.ch4.dac = self.ch4.envelope.write(val, on);
                if !self.ch4.dac {
                    self.ch4.enabled = false;
                }
            }
            NR43 => {
                self.noise.shift = val >> 4;
                self.noise.width_mode = check_bit(val, 3);
                let divisor = match ((val & 0x07) as u16) << 4 {
                    0 => 0x08,
                    d => d,
                };
                self.noise.timer.period = divisor << self.noise.shift.min(13);
            }
            NR44 => {
                self.ch4.write_length_enable(val, seq);
                if check_bit(val, 7) {
                    self.ch4_trigger();
                }
            }
            NR50 => {
                self.left_vol = (val & 0x70) >> 4;
                self.right_vol = val & 0x07;
            }
            NR51 => {
                self.ch4.left = check_bit(val, 7);
                self.ch3.left = check_bit(val, 6);
                self.ch2.left = check_bit(val, 5);
                self.ch1.left = check_bit(val, 4);
                self.ch4.right = check_bit(val, 3);
                self.ch3.right = check_bit(val, 2);
                self.ch2.right = check_bit(val, 1);
                self.ch1.right = check_bit(val, 0);
            }
            NR52 => {
                if check_bit(val, 7) {
                    self.disabled = false;
                } else {
                    io_regs[io(NR10)..io(NR52)].fill(0);
                    self.power_off();
                }
            }
            0xFF15 | 0xFF1F => {}
            _ => warn!("Invalid APU address 0x{addr:04X}"),
        }
    }

    fn ch1_trigger(&mut self, io_regs: &[u8; 0x80]) {
        let seq = self.sequencer_counter;
        let ch = &mut self.ch1;
        ch.duty.enabled = true;
        ch.duty.cycle = io_regs[io(NR11)] >> 6;
        ch.duty.freq = io_regs[io(NR13)] as u16 | ((io_regs[io(NR14)] & 0x07) as u16) << 8;
        ch.enabled = true;
        ch.reload_length(64, seq);
        ch.duty.timer.period = ch.duty.period();
        ch.duty.timer.reset();
        ch.envelope.trigger();

        self.sweep.freq = self.ch1.duty.freq;
        self.sweep.timer.reset();
        self.sweep.calculated = false;
        self.sweep.enabled = self.sweep.shift != 0 || self.sweep.period != 0;
        if self.sweep.shift != 0 && self.sweep.calculate() > 2047 {
            self.ch1.enabled = false;
        }
        if !self.ch1.dac {
            self.ch1.enabled = false;
        }
    }

    fn ch2_trigger(&mut self, io_regs: &[u8; 0x80]) {
        let seq = self.sequencer_counter;
        let ch = &mut self.ch2;
        ch.duty.enabled = true;
        ch.duty.cycle = io_regs[io(NR21)] >> 6;
        ch.duty.freq = io_regs[io(NR23)] as u16 | ((io_regs[io(NR24)] & 0x07) as u16) << 8;
        ch.enabled = true;
        ch.reload_length(64, seq);
        ch.duty.timer.period = ch.duty.period();
        ch.duty.timer.reset();
        ch.envelope.trigger();
        if !ch.dac {
            ch.enabled = false;
        }
    }

    fn ch3_trigger(&mut self) {
        let seq = self.sequencer_counter;
        self.ch3.enabled = true;
        self.ch3.reload_length(256, seq);
        self.wave.timer.reset();
        self.wave.addr = WAVE_START;
        self.wave.position = 0;
        if !self.ch3.dac {
            self.ch3.enabled = false;
        }
    }

    fn ch4_trigger(&mut self) {
        let seq = self.sequencer_counter;
        self.ch4.enabled = true;
        self.ch4.reload_length(64, seq);
        self.noise.timer.reset();
        self.ch4.envelope.trigger();
        self.noise.lfsr = 0xFFFF;
        if !self.ch4.dac {
            self.ch4.enabled = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_queue::audio_queue;

    /// Write through the register file the way the memory map does.
    fn write(apu: &mut Apu, regs: &mut [u8; 0x80], addr: u16, val: u8) {
        regs[io(addr)] = val;
        apu.write(addr, val, regs);
    }

    #[test]
    fn tiny_turbo_speed_runs_unthrottled() {
        let mut apu = Apu::new();
        apu.turbo_speed = 1e-30;
        apu.pacing.sample = 1;
        apu.time_sync(true);
        assert_eq!(apu.pacing.sample, 0);
    }

    fn powered() -> (Apu, [u8; 0x80]) {
        let mut apu = Apu::new();
        let mut regs = [0u8; 0x80];
        write(&mut apu, &mut regs, NR52, 0x80);
        (apu, regs)
    }

    #[test]
    fn trigger_reloads_length_to_64() {
        let (mut apu, mut regs) = powered();
        write(&mut apu, &mut regs, NR12, 0xF0);
        apu.ch1.counter = 0;
        apu.sequencer_counter = 0;
        write(&mut apu, &mut regs, NR14, 0xC0);
        assert_eq!(apu.ch1.counter, 64);
        assert!(apu.ch1.enabled);
    }

    #[test]
    fn trigger_on_odd_step_with_length_enabled_reloads_63() {
        let (mut apu, mut regs) = powered();
        write(&mut apu, &mut regs, NR12, 0xF0);
        apu.ch1.counter = 0;
        apu.ch1.length_enable = true;
        apu.sequencer_counter = 1;
        write(&mut apu, &mut regs, NR14, 0xC0);
        assert_eq!(apu.ch1.counter, 63);

        // Odd step but length disabled: full reload.
        apu.ch1.counter = 0;
        apu.ch1.length_enable = false;
        write(&mut apu, &mut regs, NR14, 0x80);
        assert_eq!(apu.ch1.counter, 64);
    }

    #[test]
    fn trigger_without_dac_stays_off() {
        let (mut apu, mut regs) = powered();
        write(&mut apu, &mut regs, NR22, 0x00);
        write(&mut apu, &mut regs, NR24, 0x80);
        assert!(!apu.ch2.enabled);
        assert_eq!(apu.status() & 0x02, 0);
    }

    #[test]
    fn length_counter_expiry_disables_channel() {
        let (mut apu, mut regs) = powered();
        write(&mut apu, &mut regs, NR22, 0xF0);
        write(&mut apu, &mut regs, NR21, 0x3E);
        apu.sequencer_counter = 0;
        write(&mut apu, &mut regs, NR24, 0xC0);
        assert_eq!(apu.ch2.counter, 2);
        apu.sequencer_clock(&mut regs);
        assert!(apu.ch2.enabled);
        apu.sequencer_clock(&mut regs);
        apu.sequencer_clock(&mut regs);
        assert!(!apu.ch2.enabled);
    }

    #[test]
    fn envelope_add_mode_zero_period_bumps_volume() {
        let (mut apu, mut regs) = powered();
        write(&mut apu, &mut regs, NR12, 0x50);
        write(&mut apu, &mut regs, NR14, 0x80);
        assert_eq!(apu.ch1.envelope.volume, 5);
        write(&mut apu, &mut regs, NR12, 0x58);
        assert_eq!(apu.ch1.envelope.volume, 6);
    }

    #[test]
    fn envelope_stops_at_bounds() {
        let mut env = Envelope::default();
        env.write(0xE9, false);
        env.trigger();
        for _ in 0..8 {
            env.clock();
        }
        assert_eq!(env.volume, 0x0F);
        assert!(!env.enabled);
    }

    #[test]
    fn sweep_overflow_disables_channel_even_with_zero_shift_update() {
        let (mut apu, mut regs) = powered();
        write(&mut apu, &mut regs, NR12, 0xF0);
        // Period 1, increasing, shift 1
        write(&mut apu, &mut regs, NR10, 0x11);
        write(&mut apu, &mut regs, NR13, 0xFF);
        write(&mut apu, &mut regs, NR14, 0x83);
        assert!(apu.ch1.enabled);
        assert!(apu.sweep.enabled);
        apu.sequencer_counter = 2;
        apu.sequencer_clock(&mut regs);
        // 0x3FF + 0x1FF = 0x5FE is applied, then 0x5FE + 0x2FF overflows.
        assert_eq!(regs[io(NR13)], 0xFE);
        assert_eq!(regs[io(NR14)] & 0x07, 0x05);
        assert!(!apu.ch1.enabled);
    }

    #[test]
    fn trigger_with_overflowing_sweep_disables_immediately() {
        let (mut apu, mut regs) = powered();
        write(&mut apu, &mut regs, NR12, 0xF0);
        write(&mut apu, &mut regs, NR10, 0x01);
        write(&mut apu, &mut regs, NR13, 0xFF);
        write(&mut apu, &mut regs, NR14, 0x87);
        assert!(!apu.ch1.enabled);
    }

    #[test]
    fn power_off_clears_registers() {
        let (mut apu, mut regs) = powered();
        write(&mut apu, &mut regs, NR50, 0x77);
        write(&mut apu, &mut regs, NR12, 0xF0);
        write(&mut apu, &mut regs, NR14, 0x80);
        write(&mut apu, &mut regs, NR52, 0x00);
        assert!(apu.disabled);
        assert_eq!(regs[io(NR50)], 0);
        assert_eq!(apu.left_vol, 0);
        assert_eq!(apu.status(), 0);
    }

    #[test]
    fn wave_reads_nibbles_high_first() {
        let (mut apu, mut regs) = powered();
        regs[io(WAVE_START)] = 0xAB;
        write(&mut apu, &mut regs, NR30, 0x80);
        write(&mut apu, &mut regs, NR33, 0xFF);
        write(&mut apu, &mut regs, NR34, 0x87);
        assert!(apu.ch3.enabled);
        // Period 2: position 1 after two clocks, low nibble of byte 0.
        apu.wave.timer.counter = 1;
        apu.clock(&regs, true, true);
        assert_eq!(apu.wave.position, 1);
        assert_eq!(apu.wave.buffer, 0x0B);
    }

    #[test]
    fn mixer_emits_at_sample_rate() {
        let mut apu = Apu::new();
        let (producer, consumer) = audio_queue(8192);
        apu.set_sink(Some(producer));
        apu.set_sample_rate(32_768);
        let regs = [0u8; 0x80];
        for _ in 0..CLOCK_FREQ / 128 {
            apu.clock(&regs, true, true);
        }
        assert_eq!(consumer.len(), 256);
        assert_eq!(consumer.pop_stereo(), Some((0, 0)));
    }
}
