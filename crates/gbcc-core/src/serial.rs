use log::debug;

use crate::{bit_utils::check_bit, printer::Printer};

/// Internal clocks per shifted bit with the normal serial clock (8192 Hz).
const SLOW_PERIOD: u16 = 512;
/// Internal clocks per shifted bit with the GBC fast clock.
const FAST_PERIOD: u16 = 16;

/// What sits on the other end of the link cable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LinkState {
    /// Nothing attached: every incoming bit reads as 1.
    #[default]
    Disconnected,
    /// The sent byte is echoed back.
    Loopback,
    Printer,
}

impl LinkState {
    pub fn tag(self) -> u8 {
        match self {
            LinkState::Disconnected => 0,
            LinkState::Loopback => 1,
            LinkState::Printer => 2,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(LinkState::Disconnected),
            1 => Some(LinkState::Loopback),
            2 => Some(LinkState::Printer),
            _ => None,
        }
    }
}

/// The SB/SC serial port and whatever is plugged into it.
///
/// A transfer started with the internal clock shifts one bit per period,
/// exchanging SB with the peer's reply MSB first. After eight bits the
/// serial interrupt is requested and SC bit 7 clears.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkCable {
    pub sb: u8,
    pub sc: u8,
    pub state: LinkState,
    /// Byte being shifted in from the peer.
    pub received: u8,
    pub current_bit: u8,
    pub divider: u16,
    pub printer: Printer,
}

impl Default for LinkCable {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkCable {
    pub fn new() -> Self {
        Self {
            sb: 0,
            sc: 0,
            state: LinkState::Disconnected,
            received: 0xFF,
            current_bit: 0,
            divider: 0,
            printer: Printer::new(),
        }
    }

    pub fn read(&self, addr: u16) -> u8 {
        match addr {
            0xFF01 => self.sb,
            0xFF02 => self.sc,
            _ => 0xFF,
        }
    }

    /// Store SB/SC. Setting SC bit 7 with the internal clock selected
    /// starts a transfer.
    pub fn write(&mut self, addr: u16, val: u8) {
        match addr {
            0xFF01 => self.sb = val,
            0xFF02 => {
                self.sc = val;
                if check_bit(val, 7) && check_bit(val, 0) {
                    self.start_transfer();
                }
            }
            _ => {}
        }
    }

    fn transferring(&self) -> bool {
        check_bit(self.sc, 7) && check_bit(self.sc, 0)
    }

    fn start_transfer(&mut self) {
        self.current_bit = 0;
        self.divider = 0;
        self.received = match self.state {
            LinkState::Disconnected => 0xFF,
            LinkState::Loopback => self.sb,
            LinkState::Printer => self.printer.parse_byte(self.sb),
        };
        debug!("Serial transfer: sent {:02X}, peer {:02X}", self.sb, self.received);
    }

    fn period(&self) -> u16 {
        if check_bit(self.sc, 1) { FAST_PERIOD } else { SLOW_PERIOD }
    }

    /// Advance the port by one internal clock.
    pub fn clock(&mut self, if_reg: &mut u8) {
        if self.state == LinkState::Printer {
            self.printer.clock();
        }
        if !self.transferring() {
            return;
        }
        self.divider += 1;
        if self.divider < self.period() {
            return;
        }
        self.divider = 0;
        self.sb = (self.sb << 1) | (self.received >> 7);
        self.received <<= 1;
        self.current_bit += 1;
        if self.current_bit == 8 {
            self.current_bit = 0;
            self.sc &= !0x80;
            *if_reg |= 0x08;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_transfer(link: &mut LinkCable, byte: u8, sc: u8) -> (u8, u32) {
        let mut if_reg = 0;
        link.write(0xFF01, byte);
        link.write(0xFF02, sc);
        let mut clocks = 0;
        while link.sc & 0x80 != 0 {
            link.clock(&mut if_reg);
            clocks += 1;
        }
        assert_eq!(if_reg & 0x08, 0x08);
        (link.sb, clocks)
    }

    #[test]
    fn disconnected_reads_ff() {
        let mut link = LinkCable::new();
        let (sb, clocks) = run_transfer(&mut link, 0x42, 0x81);
        assert_eq!(sb, 0xFF);
        assert_eq!(clocks, 8 * 512);
    }

    #[test]
    fn loopback_echoes_fast() {
        let mut link = LinkCable::new();
        link.state = LinkState::Loopback;
        let (sb, clocks) = run_transfer(&mut link, 0x5A, 0x83);
        assert_eq!(sb, 0x5A);
        assert_eq!(clocks, 8 * 16);
    }

    #[test]
    fn external_clock_never_completes() {
        let mut link = LinkCable::new();
        let mut if_reg = 0;
        link.write(0xFF02, 0x80);
        for _ in 0..10_000 {
            link.clock(&mut if_reg);
        }
        assert_eq!(link.sc & 0x80, 0x80);
        assert_eq!(if_reg, 0);
    }
}
