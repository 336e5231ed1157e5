//! Cycle-accurate Game Boy / Game Boy Color emulation core.
//!
//! Everything here is platform-agnostic. A host drives the machine through
//! the [`gameboy::Core`] facade: it feeds key events in, calls
//! `emulate_cycle` in a loop and picks up frames, audio and save data.

/// Audio Processing Unit (APU) emulation.
pub mod apu;

/// Lock-free stereo sample queue between the core and an audio callback.
pub mod audio_queue;

/// Small bit and byte helpers.
pub mod bit_utils;

/// Game Boy Camera sensor pipeline.
pub mod camera;

/// ROM header parsing, RAM sizing and battery saves.
pub mod cartridge;

/// Game Genie and GameShark codes.
pub mod cheats;

/// SM83 CPU state machine and interrupt dispatch.
pub mod cpu;

/// Error types.
pub mod error;

/// High-level facade that wires the CPU and MMU into a single machine.
pub mod gameboy;

/// Register addresses and machine constants.
pub mod hardware;

/// Joypad and tilt keys.
pub mod input;

/// Memory bank controllers and the cartridge RTC.
pub mod mbc;

/// MBC7 accelerometer and serial EEPROM.
pub mod mbc7;

/// Memory map and hardware plumbing.
pub mod mmu;

mod ops;

/// DMG palettes and GBC colour conversion.
pub mod palettes;

/// Pixel Processing Unit (PPU) emulation.
pub mod ppu;

/// Game Boy Printer peripheral.
pub mod printer;

/// Binary savestates.
pub mod savestate;

/// Serial port and link cable.
pub mod serial;

/// Divider/timer unit.
pub mod timer;

pub use gameboy::Core;
