use crate::{
    hardware::{CartMode, IE, IF},
    mmu::Mmu,
};

#[cfg(feature = "cpu-trace")]
macro_rules! cpu_trace {
    ($($arg:tt)*) => {
        eprintln!($($arg)*);
    };
}

#[cfg(not(feature = "cpu-trace"))]
macro_rules! cpu_trace {
    ($($arg:tt)*) => {};
}

// CPU flag bits as documented in gbdev.io/pandocs/The_CPU_Flags.html
pub const FLAG_Z: u8 = 0x80;
pub const FLAG_N: u8 = 0x40;
pub const FLAG_H: u8 = 0x20;
pub const FLAG_C: u8 = 0x10;

/// Interrupt bits that exist in IE/IF.
pub const INTERRUPT_MASK: u8 = 0x1F;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Registers {
    pub a: u8,
    pub f: u8,
    pub b: u8,
    pub c: u8,
    pub d: u8,
    pub e: u8,
    pub h: u8,
    pub l: u8,
    pub sp: u16,
    pub pc: u16,
}

impl Registers {
    /// Post-boot register file for the given hardware.
    pub fn post_boot(mode: CartMode) -> Self {
        let mut regs = Self {
            sp: 0xFFFE,
            pc: 0x0100,
            ..Self::default()
        };
        match mode {
            CartMode::Dmg => {
                regs.set_af(0x01B0);
                regs.set_bc(0x0013);
                regs.set_de(0x00D8);
                regs.set_hl(0x014D);
            }
            CartMode::Gbc => {
                regs.set_af(0x1180);
                regs.set_bc(0x0000);
                regs.set_de(0xFF56);
                regs.set_hl(0x000D);
            }
        }
        regs
    }

    pub fn af(&self) -> u16 {
        u16::from_be_bytes([self.a, self.f])
    }

    /// The low nibble of F does not exist and always reads 0.
    pub fn set_af(&mut self, val: u16) {
        let [a, f] = val.to_be_bytes();
        self.a = a;
        self.f = f & 0xF0;
    }

    pub fn bc(&self) -> u16 {
        u16::from_be_bytes([self.b, self.c])
    }

    pub fn set_bc(&mut self, val: u16) {
        [self.b, self.c] = val.to_be_bytes();
    }

    pub fn de(&self) -> u16 {
        u16::from_be_bytes([self.d, self.e])
    }

    pub fn set_de(&mut self, val: u16) {
        [self.d, self.e] = val.to_be_bytes();
    }

    pub fn hl(&self) -> u16 {
        u16::from_be_bytes([self.h, self.l])
    }

    pub fn set_hl(&mut self, val: u16) {
        [self.h, self.l] = val.to_be_bytes();
    }

    pub fn flag(&self, flag: u8) -> bool {
        self.f & flag != 0
    }

    pub fn set_flag(&mut self, flag: u8, cond: bool) {
        if cond {
            self.f |= flag;
        } else {
            self.f &= !flag;
        }
    }
}

/// The instruction currently in flight. Handlers are re-entered once per
/// CPU tick and use `step` to pick up where they left off.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: u8,
    pub op1: u8,
    pub op2: u8,
    pub addr: u16,
    pub step: u8,
    pub running: bool,
    pub prefix_cb: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InterruptState {
    pub addr: u16,
    pub request: bool,
    pub running: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Halt {
    pub set: bool,
    /// Halted with IME clear: wake up without dispatching.
    pub no_interrupt: bool,
    /// HALT bug: the next fetch does not advance PC.
    pub skip: bool,
}

/// Pending IME change from EI/DI.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ImeTimer {
    pub timer: u8,
    pub target: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cpu {
    pub regs: Registers,
    pub inst: Instruction,
    pub interrupt: InterruptState,
    pub halt: Halt,
    pub ime: bool,
    pub ime_timer: ImeTimer,
    pub stop: bool,
    /// Sub-cycle counter; the CPU acts when it wraps to 0.
    pub clock: u8,
    /// Set when an undefined opcode is executed. Cleared by the owner.
    pub invalid_opcode: Option<u8>,
}

impl Cpu {
    pub fn new(mode: CartMode) -> Self {
        Self {
            regs: Registers::post_boot(mode),
            inst: Instruction::default(),
            interrupt: InterruptState::default(),
            halt: Halt::default(),
            ime: false,
            ime_timer: ImeTimer::default(),
            stop: false,
            clock: 0,
            invalid_opcode: None,
        }
    }

    /// Latch joypad presses into IF and wake from HALT/STOP if anything is
    /// both enabled and requested.
    pub fn check_interrupts(&mut self, mmu: &mut Mmu) {
        if mmu.keys.interrupt {
            mmu.keys.interrupt = false;
            let if_reg = mmu.if_reg();
            mmu.set_if_reg(if_reg | 0x10);
        }
        if mmu.ie & mmu.if_reg() & INTERRUPT_MASK != 0 {
            if self.halt.set {
                self.halt.no_interrupt = false;
            }
            self.halt.set = false;
            self.stop = false;
            self.interrupt.request = self.ime;
        } else {
            self.interrupt.request = false;
        }
    }

    /// One sub-cycle. Only every fourth call does any work.
    pub fn clock(&mut self, mmu: &mut Mmu) {
        self.clock = (self.clock + 1) & 3;
        if self.clock != 0 {
            return;
        }
        if !self.inst.running && (self.halt.set || self.stop) {
            return;
        }
        if self.ime_timer.timer > 0 {
            self.ime_timer.timer -= 1;
            if self.ime_timer.timer == 1 {
                self.ime = self.ime_timer.target;
            }
        }
        mmu.dma_clock();
        if mmu.hdma.to_copy > 0 {
            mmu.hdma_copy_chunk();
            return;
        }
        if !self.inst.running {
            if self.interrupt.running || (self.ime && self.interrupt.request) {
                self.service_interrupt(mmu);
                return;
            }
            cpu_trace!(
                "PC={:04X} AF={:04X} BC={:04X} DE={:04X} HL={:04X} SP={:04X}",
                self.regs.pc,
                self.regs.af(),
                self.regs.bc(),
                self.regs.de(),
                self.regs.hl(),
                self.regs.sp
            );
            self.inst.opcode = self.fetch(mmu);
            self.inst.running = true;
        }
        self.execute(mmu);
    }

    /// Read the byte at PC and advance, unless the HALT bug swallows the
    /// increment.
    pub fn fetch(&mut self, mmu: &Mmu) -> u8 {
        if self.halt.skip {
            self.halt.skip = false;
            return mmu.read(self.regs.pc);
        }
        let val = mmu.read(self.regs.pc);
        self.regs.pc = self.regs.pc.wrapping_add(1);
        val
    }

    pub(crate) fn pending_interrupts(mmu: &Mmu) -> u8 {
        mmu.read(IE) & mmu.read(IF) & INTERRUPT_MASK
    }

    pub(crate) fn push_byte(&mut self, mmu: &mut Mmu, val: u8) {
        self.regs.sp = self.regs.sp.wrapping_sub(1);
        mmu.write(self.regs.sp, val);
    }

    pub(crate) fn pop_byte(&mut self, mmu: &Mmu) -> u8 {
        let val = mmu.read(self.regs.sp);
        self.regs.sp = self.regs.sp.wrapping_add(1);
        val
    }

    pub(crate) fn step_on(&mut self) {
        self.inst.step += 1;
    }

    pub(crate) fn done(&mut self) {
        self.inst.step = 0;
        self.inst.running = false;
        self.inst.prefix_cb = false;
    }
}
