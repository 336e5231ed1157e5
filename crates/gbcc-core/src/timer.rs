use crate::bit_utils::bit16;

/// Clocks between a TIMA overflow and the reload taking effect.
const RELOAD_DELAY: u8 = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timer {
    /// 16-bit internal divider counter. DIV register is the upper 8 bits.
    pub div_timer: u16,
    /// Timer counter
    pub tima: u8,
    /// Timer modulo
    pub tma: u8,
    /// Timer control
    pub tac: u8,
    /// Countdown from an overflow to the TMA copy
    pub tima_reload: u8,
    /// Last sampled value of the divider bit selected by TAC
    pub tac_bit: bool,
    /// Last sampled divider bit driving the APU frame sequencer
    pub apu_div_bit: bool,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            div_timer: 0,
            tima: 0,
            tma: 0,
            tac: 0,
            tima_reload: 0,
            tac_bit: false,
            apu_div_bit: false,
        }
    }

    pub fn read(&self, addr: u16) -> u8 {
        match addr {
            0xFF04 => (self.div_timer >> 8) as u8,
            0xFF05 => self.tima,
            0xFF06 => self.tma,
            0xFF07 => self.tac,
            _ => 0xFF,
        }
    }

    /// Store a (masked) register value. Writing DIV clears the whole
    /// divider.
    pub fn write(&mut self, addr: u16, val: u8) {
        match addr {
            0xFF04 => self.div_timer = 0,
            0xFF05 => self.tima = val,
            0xFF06 => self.tma = val,
            0xFF07 => self.tac = val,
            _ => {}
        }
    }

    /// Divider bit whose falling edge increments TIMA, or 0 when the
    /// timer is stopped.
    fn tac_mask(&self) -> u16 {
        if self.tac & 0x04 == 0 {
            return 0;
        }
        match self.tac & 0x03 {
            0 => bit16(9),
            1 => bit16(3),
            2 => bit16(5),
            _ => bit16(7),
        }
    }

    /// Advance the divider by one clock.
    ///
    /// Requests the timer interrupt in `if_reg` and returns true on a
    /// falling edge of the divider bit that clocks the APU frame sequencer.
    pub fn clock_div(&mut self, double_speed: bool, if_reg: &mut u8) -> bool {
        self.div_timer = self.div_timer.wrapping_add(1);

        let old_bit = self.tac_bit;
        self.tac_bit = self.div_timer & self.tac_mask() != 0;
        if old_bit && !self.tac_bit {
            self.tima = self.tima.wrapping_add(1);
            if self.tima == 0 {
                self.tima_reload = RELOAD_DELAY;
            }
        }

        if self.tima_reload > 0 {
            self.tima_reload -= 1;
            if self.tima_reload == 4 {
                // A write to TIMA during the delay cancels the reload.
                if self.tima != 0 {
                    self.tima_reload = 0;
                } else {
                    self.tima = self.tma;
                    *if_reg |= 0x04;
                }
            } else if self.tima_reload == 0 {
                self.tima = self.tma;
            }
        }

        let apu_mask = if double_speed { bit16(13) } else { bit16(12) };
        let old_apu = self.apu_div_bit;
        self.apu_div_bit = self.div_timer & apu_mask != 0;
        old_apu && !self.apu_div_bit
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn div_reads_high_byte() {
        let mut t = Timer::new();
        let mut if_reg = 0;
        for _ in 0..0x100 {
            t.clock_div(false, &mut if_reg);
        }
        assert_eq!(t.read(0xFF04), 1);
        t.write(0xFF04, 0x55);
        assert_eq!(t.read(0xFF04), 0);
    }

    #[test]
    fn fastest_rate_ticks_every_16_clocks() {
        let mut t = Timer::new();
        let mut if_reg = 0;
        t.write(0xFF07, 0x05);
        for _ in 0..16 * 10 {
            t.clock_div(false, &mut if_reg);
        }
        assert_eq!(t.tima, 10);
    }

    #[test]
    fn sequencer_edge_every_8192_clocks() {
        let mut t = Timer::new();
        let mut if_reg = 0;
        let edges = (0..8192 * 4)
            .filter(|_| t.clock_div(false, &mut if_reg))
            .count();
        assert_eq!(edges, 4);
    }
}
