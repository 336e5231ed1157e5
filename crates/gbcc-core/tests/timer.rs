use gbcc_core::timer::Timer;

const TIMA: u16 = 0xFF05;
const TMA: u16 = 0xFF06;
const TAC: u16 = 0xFF07;

/// A timer one increment away from overflowing, at the fastest rate.
fn armed() -> (Timer, u8) {
    let mut t = Timer::new();
    t.write(TAC, 0x05);
    t.write(TMA, 0xAB);
    t.write(TIMA, 0xFF);
    let mut if_reg = 0;
    while t.tima == 0xFF {
        t.clock_div(false, &mut if_reg);
    }
    assert_eq!(t.tima, 0);
    (t, if_reg)
}

// The overflowing clock is the first of the four.
#[test]
fn overflow_reloads_after_four_clocks() {
    let (mut t, mut if_reg) = armed();
    assert_eq!(if_reg & 0x04, 0);
    for _ in 0..2 {
        t.clock_div(false, &mut if_reg);
        assert_eq!(t.read(TIMA), 0);
        assert_eq!(if_reg & 0x04, 0);
    }
    t.clock_div(false, &mut if_reg);
    assert_eq!(t.read(TIMA), 0xAB);
    assert_eq!(if_reg & 0x04, 0x04);
}

#[test]
fn write_during_delay_cancels_interrupt() {
    for delay in 0..3 {
        let (mut t, mut if_reg) = armed();
        for _ in 0..delay {
            t.clock_div(false, &mut if_reg);
        }
        t.write(TIMA, 0x10);
        for _ in 0..8 {
            t.clock_div(false, &mut if_reg);
        }
        assert_eq!(if_reg & 0x04, 0, "write after {delay} clocks");
        assert_ne!(t.read(TIMA), 0xAB);
    }
}

#[test]
fn write_on_reload_clock_is_overridden() {
    let (mut t, mut if_reg) = armed();
    for _ in 0..3 {
        t.clock_div(false, &mut if_reg);
    }
    assert_eq!(if_reg & 0x04, 0x04);
    t.write(TIMA, 0x55);
    for _ in 0..4 {
        t.clock_div(false, &mut if_reg);
    }
    assert_eq!(t.read(TIMA), 0xAB);
}

#[test]
fn timer_stopped_by_tac() {
    let mut t = Timer::new();
    let mut if_reg = 0;
    t.write(TAC, 0x01);
    for _ in 0..4096 {
        t.clock_div(false, &mut if_reg);
    }
    assert_eq!(t.tima, 0);
}
