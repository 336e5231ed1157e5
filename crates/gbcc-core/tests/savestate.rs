mod common;

use common::{RomBuilder, core};
use gbcc_core::{
    Core,
    error::SaveStateError,
    input::Key,
    savestate::VERSION,
};
use once_cell::sync::Lazy;
use tempfile::tempdir;

/// Fills WRAM with a running count, over and over.
static COUNTER_ROM: Lazy<Vec<u8>> = Lazy::new(|| {
    RomBuilder::new()
        .cart_type(0x03)
        .ram_size(0x02)
        .program(&[
            0x21, 0x00, 0xC0, // LD HL,0xC000
            0x3C, //             INC A
            0x22, //             LD (HL+),A
            0xCB, 0x6C, //       BIT 5,H
            0x28, 0xFA, //       JR Z,-6
            0x18, 0xF5, //       JR -11
        ])
        .build()
});

#[derive(Debug, PartialEq, Eq)]
struct Snapshot {
    regs: gbcc_core::cpu::Registers,
    wram: Vec<u8>,
    sram: Vec<u8>,
    frame: Vec<u32>,
    ly: u8,
}

fn snapshot(core: &Core) -> Snapshot {
    Snapshot {
        regs: core.cpu.regs,
        wram: core.mmu.wram.concat(),
        sram: core.mmu.cart.ram.clone(),
        frame: core.frame().to_vec(),
        ly: core.memory_read(0xFF44),
    }
}

fn run_frames(core: &mut Core, frames: usize) -> Vec<Snapshot> {
    (0..frames)
        .map(|_| {
            core.run_frame();
            snapshot(core)
        })
        .collect()
}

#[test]
fn restored_state_replays_identically() {
    let mut core = core(COUNTER_ROM.clone());
    core.mmu.cart.ram[0x10] = 0x5A;
    run_frames(&mut core, 3);
    // Stop mid-frame so the PPU and CPU are somewhere awkward.
    for _ in 0..12345 {
        core.emulate_cycle();
    }
    let state = core.save_state();
    let reference = run_frames(&mut core, 5);

    let mut restored = common::core(COUNTER_ROM.clone());
    restored.load_state(&state).unwrap();
    // Loading clears held keys, turbo included.
    restored.press(Key::Turbo);
    assert_eq!(restored.mmu.cart.ram[0x10], 0x5A);
    let replay = run_frames(&mut restored, 5);
    assert_eq!(replay, reference);
}

#[test]
fn version_mismatch_is_declined() {
    let mut core = core(COUNTER_ROM.clone());
    let mut state = core.save_state();
    state[4..8].copy_from_slice(&(VERSION - 1).to_le_bytes());
    core.cpu.regs.a = 0x77;
    let err = core.load_state(&state).unwrap_err();
    assert!(matches!(
        err,
        SaveStateError::VersionMismatch { found, expected } if found == VERSION - 1 && expected == VERSION
    ));
    assert_eq!(core.cpu.regs.a, 0x77);
}

#[test]
fn state_from_another_rom_is_declined() {
    let mut other_rom = COUNTER_ROM.clone();
    other_rom[0x014E] = 0x12;
    let state = core(other_rom).save_state();
    let mut core = core(COUNTER_ROM.clone());
    assert!(matches!(
        core.load_state(&state),
        Err(SaveStateError::RomMismatch)
    ));
}

#[test]
fn slot_files_round_trip() {
    let dir = tempdir().unwrap();
    let path = Core::savestate_path(dir.path(), "counter.gbc".as_ref(), 1);
    assert_eq!(path.file_name().unwrap(), "counter.s1");

    let mut core = core(COUNTER_ROM.clone());
    run_frames(&mut core, 2);
    core.save_state_to_file(&path).unwrap();
    let saved = snapshot(&core);
    run_frames(&mut core, 1);
    assert_ne!(snapshot(&core).regs, saved.regs);

    core.load_state_from_file(&path).unwrap();
    assert_eq!(snapshot(&core), saved);
}

#[test]
fn missing_slot_file_is_an_io_error() {
    let dir = tempdir().unwrap();
    let mut core = core(COUNTER_ROM.clone());
    assert!(matches!(
        core.load_state_from_file(&dir.path().join("nope.s0")),
        Err(SaveStateError::Io(_))
    ));
}
