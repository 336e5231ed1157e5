mod common;

use common::{SPIN_ROM, core};
use gbcc_core::audio_queue::audio_queue;

const NR21: u16 = 0xFF16;
const NR22: u16 = 0xFF17;
const NR23: u16 = 0xFF18;
const NR24: u16 = 0xFF19;
const NR50: u16 = 0xFF24;
const NR51: u16 = 0xFF25;
const NR52: u16 = 0xFF26;

#[test]
fn one_frame_yields_one_frame_of_samples() {
    let (producer, consumer) = audio_queue(4096);
    let mut core = core(SPIN_ROM.clone());
    core.set_sample_rate(48_000);
    core.set_audio_sink(Some(producer));
    // Power-on starts mid-frame, so only count a whole one.
    core.run_frame();
    let before = consumer.len();
    core.run_frame();
    let frames = consumer.len() - before;
    assert!((800..=805).contains(&frames), "{frames} frames");
    assert_eq!(consumer.dropped(), 0);
}

#[test]
fn triggered_square_wave_is_audible() {
    let (producer, consumer) = audio_queue(4096);
    let mut core = core(SPIN_ROM.clone());
    core.set_audio_sink(Some(producer));
    core.memory_write(NR50, 0x77);
    core.memory_write(NR51, 0xFF);
    core.memory_write(NR21, 0x80);
    core.memory_write(NR22, 0xF0);
    core.memory_write(NR23, 0x00);
    core.memory_write(NR24, 0x87);
    assert_eq!(core.memory_read(NR52) & 0x02, 0x02);

    core.run_frame();
    let mut out = vec![0i16; consumer.len() * 2];
    consumer.drain_interleaved(&mut out);
    let peak = out.iter().map(|s| s.unsigned_abs()).max().unwrap_or(0);
    assert!(peak > 1000, "peak {peak}");
}

#[test]
fn powering_off_silences_and_clears_status() {
    let mut core = core(SPIN_ROM.clone());
    core.memory_write(NR22, 0xF0);
    core.memory_write(NR24, 0x80);
    assert_eq!(core.memory_read(NR52) & 0x02, 0x02);
    core.memory_write(NR52, 0x00);
    assert_eq!(core.memory_read(NR52) & 0x0F, 0x00);
    assert_eq!(core.memory_read(NR22), 0x00);
}
