//! Opcode handlers. Each one is re-entered once per CPU tick until it calls
//! `done()`; every `step_on(); return` is one machine cycle.

use log::error;

use crate::{
    bit_utils::{check_bit, clear_bit, high_byte, low_byte, set_bit},
    cpu::{Cpu, FLAG_C, FLAG_H, FLAG_N, FLAG_Z},
    hardware::{INT_JOYPAD, INT_LCDSTAT, INT_SERIAL, INT_TIMER, INT_VBLANK, KEY1},
    mmu::Mmu,
};

/// Register order used by the opcode operand fields. Index 6 is (HL).
const HL_OPERAND: u8 = 6;

/// Ticks a HALT entered with IME clear waits before resuming.
const HALT_WAKE_TICKS: u8 = 20;

impl Cpu {
    pub(crate) fn execute(&mut self, mmu: &mut Mmu) {
        if self.inst.prefix_cb {
            self.prefix_cb(mmu);
            return;
        }
        match self.inst.opcode {
            0x00 => self.done(),
            0x01 | 0x11 | 0x21 | 0x31 => self.ld_d16(mmu),
            0x02 | 0x12 | 0x22 | 0x32 | 0x0A | 0x1A | 0x2A | 0x3A => self.ld_a_indirect(mmu),
            0x03 | 0x13 | 0x23 | 0x33 | 0x0B | 0x1B | 0x2B | 0x3B => self.inc_dec_16(),
            0x34 | 0x35 => self.inc_dec_hl(mmu),
            op if op < 0x40 && matches!(op & 0x07, 0x04 | 0x05) => self.inc_dec_reg(mmu),
            op if op < 0x40 && op & 0x07 == 0x06 => self.ld_d8(mmu),
            0x07 | 0x0F | 0x17 | 0x1F => self.shift_a(),
            0x08 => self.store_sp(mmu),
            0x09 | 0x19 | 0x29 | 0x39 => self.add_hl(),
            0x10 => self.stop(mmu),
            0x18 => self.jr(mmu),
            0x20 | 0x28 | 0x30 | 0x38 => self.jr_cond(mmu),
            0x27 => self.daa(),
            0x2F => {
                self.regs.a = !self.regs.a;
                self.regs.set_flag(FLAG_N, true);
                self.regs.set_flag(FLAG_H, true);
                self.done();
            }
            0x37 => {
                self.regs.set_flag(FLAG_C, true);
                self.regs.set_flag(FLAG_N, false);
                self.regs.set_flag(FLAG_H, false);
                self.done();
            }
            0x3F => {
                let carry = self.regs.flag(FLAG_C);
                self.regs.set_flag(FLAG_C, !carry);
                self.regs.set_flag(FLAG_N, false);
                self.regs.set_flag(FLAG_H, false);
                self.done();
            }
            0x76 => self.halt(mmu),
            0x40..=0x7F => self.ld_reg(mmu),
            0x80..=0xBF => self.alu_op(mmu),
            0xC6 | 0xCE | 0xD6 | 0xDE | 0xE6 | 0xEE | 0xF6 | 0xFE => self.alu_op(mmu),
            0xC0 | 0xC8 | 0xD0 | 0xD8 => self.ret_cond(mmu),
            0xC1 | 0xD1 | 0xE1 | 0xF1 => self.pop(mmu),
            0xC2 | 0xCA | 0xD2 | 0xDA => self.jp_cond(mmu),
            0xC3 => self.jp(mmu),
            0xC4 | 0xCC | 0xD4 | 0xDC => self.call_cond(mmu),
            0xC5 | 0xD5 | 0xE5 | 0xF5 => self.push(mmu),
            0xC7 | 0xCF | 0xD7 | 0xDF | 0xE7 | 0xEF | 0xF7 | 0xFF => self.rst(mmu),
            0xC9 => self.ret(mmu),
            0xCB => self.prefix_cb(mmu),
            0xCD => self.call(mmu),
            0xD9 => {
                self.ret(mmu);
                if !self.inst.running {
                    self.ime = true;
                }
            }
            0xE0 | 0xF0 => self.ldh_a8(mmu),
            0xE2 | 0xF2 => self.ldh_c(mmu),
            0xE8 => self.add_sp(mmu),
            0xE9 => {
                self.regs.pc = self.regs.hl();
                self.done();
            }
            0xEA | 0xFA => self.ld_a16(mmu),
            0xF3 => self.di(),
            0xFB => {
                self.ime_timer.target = true;
                self.ime_timer.timer = 2;
                self.done();
            }
            0xF8 => self.ld_hl_sp(mmu),
            0xF9 => {
                if self.inst.step == 0 {
                    self.step_on();
                    return;
                }
                self.regs.sp = self.regs.hl();
                self.done();
            }
            op => {
                if self.invalid_opcode.is_none() {
                    error!("Invalid opcode 0x{op:02X} at 0x{:04X}", self.regs.pc.wrapping_sub(1));
                }
                self.invalid_opcode = Some(op);
            }
        }
    }

    /// Interrupt dispatch: two idle cycles, push PC, then jump. If the push
    /// of the high byte clears the request, the CPU lands on 0x0000.
    pub(crate) fn service_interrupt(&mut self, mmu: &mut Mmu) {
        if self.halt.no_interrupt {
            if self.inst.step < HALT_WAKE_TICKS {
                self.step_on();
                return;
            }
            self.halt.no_interrupt = false;
            self.halt.set = false;
            self.done();
            return;
        }
        let pending = Self::pending_interrupts(mmu);
        if pending == 0 && self.inst.step < 4 {
            if self.inst.step == 3 {
                self.regs.pc = 0x0000;
                self.ime = false;
            }
            self.interrupt.request = false;
            self.interrupt.running = false;
            self.done();
            return;
        }
        match self.inst.step {
            0 => {
                self.ime = false;
                self.interrupt.running = true;
                self.step_on();
                return;
            }
            1 => {
                self.step_on();
                return;
            }
            2 => {
                self.push_byte(mmu, high_byte(self.regs.pc));
                self.step_on();
                return;
            }
            3 => {
                self.push_byte(mmu, low_byte(self.regs.pc));
                // Lower vectors win.
                self.interrupt.addr = match pending.trailing_zeros() {
                    0 => INT_VBLANK,
                    1 => INT_LCDSTAT,
                    2 => INT_TIMER,
                    3 => INT_SERIAL,
                    _ => INT_JOYPAD,
                };
                self.step_on();
                return;
            }
            4 if self.halt.set => {
                self.step_on();
                return;
            }
            _ => {}
        }
        let bit = ((self.interrupt.addr - INT_VBLANK) / 8) as u8;
        let if_reg = mmu.if_reg();
        mmu.set_if_reg(clear_bit(if_reg, bit));
        self.regs.pc = self.interrupt.addr;
        self.ime = false;
        self.interrupt.running = false;
        self.done();
    }

    fn condition(&self, index: u8) -> bool {
        match index & 0x03 {
            0 => !self.regs.flag(FLAG_Z),
            1 => self.regs.flag(FLAG_Z),
            2 => !self.regs.flag(FLAG_C),
            _ => self.regs.flag(FLAG_C),
        }
    }

    fn reg8(&self, index: u8) -> u8 {
        match index & 0x07 {
            0 => self.regs.b,
            1 => self.regs.c,
            2 => self.regs.d,
            3 => self.regs.e,
            4 => self.regs.h,
            5 => self.regs.l,
            _ => self.regs.a,
        }
    }

    fn set_reg8(&mut self, index: u8, val: u8) {
        match index & 0x07 {
            0 => self.regs.b = val,
            1 => self.regs.c = val,
            2 => self.regs.d = val,
            3 => self.regs.e = val,
            4 => self.regs.h = val,
            5 => self.regs.l = val,
            _ => self.regs.a = val,
        }
    }

    fn read_operand(&self, mmu: &Mmu, index: u8) -> u8 {
        if index & 0x07 == HL_OPERAND {
            mmu.read(self.regs.hl())
        } else {
            self.reg8(index)
        }
    }

    fn write_operand(&mut self, mmu: &mut Mmu, index: u8, val: u8) {
        if index & 0x07 == HL_OPERAND {
            mmu.write(self.regs.hl(), val);
        } else {
            self.set_reg8(index, val);
        }
    }

    /// Source operand from the low three opcode bits.
    fn mod_index(&self) -> u8 {
        self.inst.opcode & 0x07
    }

    /// Destination operand from opcode bits 3-5, after removing `offset`.
    fn div_index(&self, offset: u8) -> u8 {
        (self.inst.opcode.wrapping_sub(offset) / 8) & 0x07
    }

    /// BC, DE, HL, SP by opcode bits 4-5.
    fn reg16(&self, index: u8) -> u16 {
        match index & 0x03 {
            0 => self.regs.bc(),
            1 => self.regs.de(),
            2 => self.regs.hl(),
            _ => self.regs.sp,
        }
    }

    fn set_reg16(&mut self, index: u8, val: u16) {
        match index & 0x03 {
            0 => self.regs.set_bc(val),
            1 => self.regs.set_de(val),
            2 => self.regs.set_hl(val),
            _ => self.regs.sp = val,
        }
    }

    fn operand_addr(&self) -> u16 {
        u16::from_le_bytes([self.inst.op1, self.inst.op2])
    }

    fn stop(&mut self, mmu: &mut Mmu) {
        let key1 = mmu.read_force(KEY1);
        if mmu.mode.is_gbc() && check_bit(key1, 0) {
            mmu.double_speed = !mmu.double_speed;
            mmu.write_force(KEY1, if mmu.double_speed { 0x80 } else { 0x00 });
        } else {
            self.stop = true;
        }
        self.fetch(mmu);
        self.done();
    }

    fn halt(&mut self, mmu: &Mmu) {
        let pending = Self::pending_interrupts(mmu) != 0;
        if self.ime {
            self.halt.set = true;
            self.halt.no_interrupt = false;
            self.halt.skip = false;
        } else if !pending {
            self.halt.set = true;
            self.halt.no_interrupt = true;
            self.halt.skip = false;
        } else {
            self.halt.set = false;
            self.halt.no_interrupt = false;
            self.halt.skip = true;
        }
        self.done();
    }

    fn daa(&mut self) {
        let mut a = self.regs.a;
        if self.regs.flag(FLAG_N) {
            if self.regs.flag(FLAG_C) {
                a = a.wrapping_sub(0x60);
            }
            if self.regs.flag(FLAG_H) {
                a = a.wrapping_sub(0x06);
            }
        } else {
            if self.regs.flag(FLAG_C) || a > 0x99 {
                a = a.wrapping_add(0x60);
                self.regs.set_flag(FLAG_C, true);
            }
            if self.regs.flag(FLAG_H) || (a & 0x0F) > 0x09 {
                a = a.wrapping_add(0x06);
            }
        }
        self.regs.a = a;
        self.regs.set_flag(FLAG_Z, a == 0);
        self.regs.set_flag(FLAG_H, false);
        self.done();
    }

    /// DI straight after EI cancels the pending enable.
    fn di(&mut self) {
        if self.ime_timer.timer > 0 && self.ime_timer.target {
            self.ime = false;
            self.done();
            return;
        }
        self.ime_timer.target = false;
        self.ime_timer.timer = 2;
        self.done();
    }

    fn ld_reg(&mut self, mmu: &mut Mmu) {
        let touches_hl = self.mod_index() == HL_OPERAND || self.div_index(0x40) == HL_OPERAND;
        if touches_hl && self.inst.step == 0 {
            self.step_on();
            return;
        }
        let val = self.read_operand(mmu, self.mod_index());
        self.write_operand(mmu, self.div_index(0x40), val);
        self.done();
    }

    fn ld_d8(&mut self, mmu: &mut Mmu) {
        match self.inst.step {
            0 => {
                self.step_on();
                return;
            }
            1 => {
                self.inst.op1 = self.fetch(mmu);
                if self.div_index(0) == HL_OPERAND {
                    self.step_on();
                    return;
                }
            }
            _ => {}
        }
        self.write_operand(mmu, self.div_index(0), self.inst.op1);
        self.done();
    }

    fn ld_d16(&mut self, mmu: &Mmu) {
        match self.inst.step {
            0 | 1 => {
                if self.inst.step == 1 {
                    self.inst.op1 = self.fetch(mmu);
                }
                self.step_on();
                return;
            }
            _ => self.inst.op2 = self.fetch(mmu),
        }
        self.set_reg16(self.inst.opcode >> 4, self.operand_addr());
        self.done();
    }

    /// LD (BC)/(DE)/(HL+)/(HL-) to or from A.
    fn ld_a_indirect(&mut self, mmu: &mut Mmu) {
        if self.inst.step == 0 {
            let hl = self.regs.hl();
            self.inst.addr = match self.inst.opcode >> 4 {
                0 => self.regs.bc(),
                1 => self.regs.de(),
                2 => {
                    self.regs.set_hl(hl.wrapping_add(1));
                    hl
                }
                _ => {
                    self.regs.set_hl(hl.wrapping_sub(1));
                    hl
                }
            };
            self.step_on();
            return;
        }
        if self.inst.opcode & 0x08 == 0 {
            mmu.write(self.inst.addr, self.regs.a);
        } else {
            self.regs.a = mmu.read(self.inst.addr);
        }
        self.done();
    }

    fn ld_a16(&mut self, mmu: &mut Mmu) {
        match self.inst.step {
            0 => {
                self.step_on();
                return;
            }
            1 => {
                self.inst.op1 = self.fetch(mmu);
                self.step_on();
                return;
            }
            2 => {
                self.inst.op2 = self.fetch(mmu);
                self.step_on();
                return;
            }
            _ => {}
        }
        let addr = self.operand_addr();
        if self.inst.opcode == 0xEA {
            mmu.write(addr, self.regs.a);
        } else {
            self.regs.a = mmu.read(addr);
        }
        self.done();
    }

    fn ldh_a8(&mut self, mmu: &mut Mmu) {
        match self.inst.step {
            0 => {
                self.step_on();
                return;
            }
            1 => {
                self.inst.addr = 0xFF00 | self.fetch(mmu) as u16;
                self.step_on();
                return;
            }
            _ => {}
        }
        if self.inst.opcode == 0xE0 {
            mmu.write(self.inst.addr, self.regs.a);
        } else {
            self.regs.a = mmu.read(self.inst.addr);
        }
        self.done();
    }

    fn ldh_c(&mut self, mmu: &mut Mmu) {
        if self.inst.step == 0 {
            self.inst.addr = 0xFF00 | self.regs.c as u16;
            self.step_on();
            return;
        }
        if self.inst.opcode == 0xE2 {
            mmu.write(self.inst.addr, self.regs.a);
        } else {
            self.regs.a = mmu.read(self.inst.addr);
        }
        self.done();
    }

    /// LD (a16),SP
    fn store_sp(&mut self, mmu: &mut Mmu) {
        match self.inst.step {
            0 => {}
            1 => self.inst.op1 = self.fetch(mmu),
            2 => self.inst.op2 = self.fetch(mmu),
            3 => {
                self.inst.addr = self.operand_addr();
                mmu.write(self.inst.addr, low_byte(self.regs.sp));
            }
            _ => {
                mmu.write(self.inst.addr.wrapping_add(1), high_byte(self.regs.sp));
                self.done();
                return;
            }
        }
        self.step_on();
    }

    /// SP plus a signed immediate, with flags from the low byte.
    fn sp_offset(&mut self) -> u16 {
        let sp = self.regs.sp;
        let res = sp.wrapping_add(self.inst.op1 as i8 as u16);
        self.regs.set_flag(FLAG_H, (res & 0x0F) < (sp & 0x0F));
        self.regs.set_flag(FLAG_C, (res & 0xFF) < (sp & 0xFF));
        self.regs.set_flag(FLAG_Z, false);
        self.regs.set_flag(FLAG_N, false);
        res
    }

    fn ld_hl_sp(&mut self, mmu: &Mmu) {
        match self.inst.step {
            0 => {
                self.step_on();
                return;
            }
            1 => {
                self.inst.op1 = self.fetch(mmu);
                self.step_on();
                return;
            }
            _ => {}
        }
        let res = self.sp_offset();
        self.regs.set_hl(res);
        self.done();
    }

    fn add_sp(&mut self, mmu: &Mmu) {
        match self.inst.step {
            0 | 2 => {
                self.step_on();
                return;
            }
            1 => {
                self.inst.op1 = self.fetch(mmu);
                self.step_on();
                return;
            }
            _ => {}
        }
        self.regs.sp = self.sp_offset();
        self.done();
    }

    fn pop(&mut self, mmu: &Mmu) {
        match self.inst.step {
            0 => {
                self.step_on();
                return;
            }
            1 => {
                self.inst.op1 = self.pop_byte(mmu);
                self.step_on();
                return;
            }
            _ => self.inst.op2 = self.pop_byte(mmu),
        }
        let val = self.operand_addr();
        match (self.inst.opcode >> 4) & 0x03 {
            3 => self.regs.set_af(val),
            index => self.set_reg16(index, val),
        }
        self.done();
    }

    fn push(&mut self, mmu: &mut Mmu) {
        match self.inst.step {
            0 => {
                let (hi, lo) = match (self.inst.opcode >> 4) & 0x03 {
                    0 => (self.regs.b, self.regs.c),
                    1 => (self.regs.d, self.regs.e),
                    2 => (self.regs.h, self.regs.l),
                    _ => (self.regs.a, self.regs.f),
                };
                self.inst.op1 = hi;
                self.inst.op2 = lo;
            }
            1 => {}
            2 => self.push_byte(mmu, self.inst.op1),
            _ => {
                self.push_byte(mmu, self.inst.op2);
                self.done();
                return;
            }
        }
        self.step_on();
    }

    fn alu_op(&mut self, mmu: &Mmu) {
        if self.inst.step == 0 && self.mod_index() == HL_OPERAND {
            self.step_on();
            return;
        }
        let (op, offset) = if self.inst.opcode < 0xC0 {
            (self.read_operand(mmu, self.mod_index()), 0x80)
        } else {
            (self.fetch(mmu), 0xC0)
        };
        let a = self.regs.a;
        let carry = self.regs.flag(FLAG_C) as u8;
        match self.div_index(offset) {
            0 => {
                let res = a.wrapping_add(op);
                self.regs.set_flag(FLAG_H, (a & 0x0F) + (op & 0x0F) > 0x0F);
                self.regs.set_flag(FLAG_C, res < a);
                self.set_arith(res, false);
            }
            1 => {
                let res = a.wrapping_add(op).wrapping_add(carry);
                self.regs.set_flag(FLAG_H, (a & 0x0F) + (op & 0x0F) + carry > 0x0F);
                self.regs
                    .set_flag(FLAG_C, a as u16 + op as u16 + carry as u16 > 0xFF);
                self.set_arith(res, false);
            }
            2 => {
                let res = a.wrapping_sub(op);
                self.regs.set_flag(FLAG_H, (a & 0x0F) < (op & 0x0F));
                self.regs.set_flag(FLAG_C, res > a);
                self.set_arith(res, true);
            }
            3 => {
                let res = a.wrapping_sub(op).wrapping_sub(carry);
                self.regs.set_flag(FLAG_H, (a & 0x0F) < (op & 0x0F) + carry);
                self.regs
                    .set_flag(FLAG_C, (a as u16) < op as u16 + carry as u16);
                self.set_arith(res, true);
            }
            4 => {
                self.regs.f = FLAG_H;
                self.set_arith(a & op, false);
            }
            5 => {
                self.regs.f = 0;
                self.set_arith(a ^ op, false);
            }
            6 => {
                self.regs.f = 0;
                self.set_arith(a | op, false);
            }
            _ => {
                let res = a.wrapping_sub(op);
                self.regs.set_flag(FLAG_H, (a & 0x0F) < (op & 0x0F));
                self.regs.set_flag(FLAG_C, res > a);
                self.regs.set_flag(FLAG_Z, res == 0);
                self.regs.set_flag(FLAG_N, true);
            }
        }
        self.done();
    }

    fn set_arith(&mut self, res: u8, subtract: bool) {
        self.regs.a = res;
        self.regs.set_flag(FLAG_Z, res == 0);
        self.regs.set_flag(FLAG_N, subtract);
    }

    /// INC/DEC on an 8-bit value; leaves C untouched.
    fn inc_dec(&mut self, op: u8) -> u8 {
        let res = if self.inst.opcode & 0x01 == 0 {
            self.regs.set_flag(FLAG_N, false);
            self.regs.set_flag(FLAG_H, op & 0x0F == 0x0F);
            op.wrapping_add(1)
        } else {
            self.regs.set_flag(FLAG_N, true);
            self.regs.set_flag(FLAG_H, op & 0x0F == 0x00);
            op.wrapping_sub(1)
        };
        self.regs.set_flag(FLAG_Z, res == 0);
        res
    }

    fn inc_dec_reg(&mut self, mmu: &mut Mmu) {
        let index = self.div_index(0);
        let op = self.read_operand(mmu, index);
        let res = self.inc_dec(op);
        self.write_operand(mmu, index, res);
        self.done();
    }

    fn inc_dec_hl(&mut self, mmu: &mut Mmu) {
        match self.inst.step {
            0 => {
                self.step_on();
                return;
            }
            1 => {
                self.inst.op1 = mmu.read(self.regs.hl());
                self.step_on();
                return;
            }
            _ => {}
        }
        let res = self.inc_dec(self.inst.op1);
        mmu.write(self.regs.hl(), res);
        self.done();
    }

    fn inc_dec_16(&mut self) {
        if self.inst.step == 0 {
            self.step_on();
            return;
        }
        let index = self.inst.opcode >> 4;
        let val = self.reg16(index);
        let res = if self.inst.opcode & 0x08 == 0 {
            val.wrapping_add(1)
        } else {
            val.wrapping_sub(1)
        };
        self.set_reg16(index, res);
        self.done();
    }

    fn add_hl(&mut self) {
        if self.inst.step == 0 {
            self.step_on();
            return;
        }
        let hl = self.regs.hl();
        let op = self.reg16(self.inst.opcode >> 4);
        let res = hl.wrapping_add(op);
        self.regs
            .set_flag(FLAG_H, (hl & 0x0FFF) + (op & 0x0FFF) > 0x0FFF);
        self.regs.set_flag(FLAG_C, res < hl);
        self.regs.set_flag(FLAG_N, false);
        self.regs.set_hl(res);
        self.done();
    }

    /// RLCA, RRCA, RLA, RRA. Z is always cleared.
    fn shift_a(&mut self) {
        let a = self.regs.a;
        let carry = self.regs.flag(FLAG_C) as u8;
        let (res, out) = match self.inst.opcode >> 3 {
            0 => (a.rotate_left(1), check_bit(a, 7)),
            1 => (a.rotate_right(1), check_bit(a, 0)),
            2 => ((a << 1) | carry, check_bit(a, 7)),
            _ => ((a >> 1) | (carry << 7), check_bit(a, 0)),
        };
        self.regs.a = res;
        self.regs.f = if out { FLAG_C } else { 0 };
        self.done();
    }

    fn jp(&mut self, mmu: &Mmu) {
        match self.inst.step {
            0 => {
                self.step_on();
                return;
            }
            1 => {
                self.inst.op1 = self.fetch(mmu);
                self.step_on();
                return;
            }
            2 => {
                self.inst.op2 = self.fetch(mmu);
                self.step_on();
                return;
            }
            _ => {}
        }
        self.regs.pc = self.operand_addr();
        self.done();
    }

    fn jp_cond(&mut self, mmu: &Mmu) {
        match self.inst.step {
            0 => {
                self.step_on();
                return;
            }
            1 => {
                self.inst.op1 = self.fetch(mmu);
                self.step_on();
                return;
            }
            2 => {
                self.inst.op2 = self.fetch(mmu);
                self.inst.addr = self.operand_addr();
                if self.condition((self.inst.opcode - 0xC0) >> 3) {
                    self.regs.pc = self.inst.addr;
                    self.step_on();
                    return;
                }
            }
            _ => {}
        }
        self.done();
    }

    fn jr(&mut self, mmu: &Mmu) {
        match self.inst.step {
            0 => {
                self.step_on();
                return;
            }
            1 => {
                self.inst.op1 = self.fetch(mmu);
                self.step_on();
                return;
            }
            _ => {}
        }
        self.regs.pc = self.regs.pc.wrapping_add(self.inst.op1 as i8 as u16);
        self.done();
    }

    fn jr_cond(&mut self, mmu: &Mmu) {
        match self.inst.step {
            0 => {
                self.step_on();
                return;
            }
            1 => {
                self.inst.op1 = self.fetch(mmu);
                if self.condition((self.inst.opcode - 0x20) >> 3) {
                    self.regs.pc = self.regs.pc.wrapping_add(self.inst.op1 as i8 as u16);
                    self.step_on();
                    return;
                }
            }
            _ => {}
        }
        self.done();
    }

    fn call(&mut self, mmu: &mut Mmu) {
        match self.inst.step {
            0 => {}
            1 => self.inst.op1 = self.fetch(mmu),
            2 => self.inst.op2 = self.fetch(mmu),
            3 => self.inst.addr = self.operand_addr(),
            4 => self.push_byte(mmu, high_byte(self.regs.pc)),
            _ => {
                self.push_byte(mmu, low_byte(self.regs.pc));
                self.regs.pc = self.inst.addr;
                self.done();
                return;
            }
        }
        self.step_on();
    }

    fn call_cond(&mut self, mmu: &mut Mmu) {
        match self.inst.step {
            0 => {}
            1 => self.inst.op1 = self.fetch(mmu),
            2 => {
                self.inst.op2 = self.fetch(mmu);
                if !self.condition((self.inst.opcode - 0xC0) >> 3) {
                    self.done();
                    return;
                }
            }
            3 => self.inst.addr = self.operand_addr(),
            4 => self.push_byte(mmu, high_byte(self.regs.pc)),
            _ => {
                self.push_byte(mmu, low_byte(self.regs.pc));
                self.regs.pc = self.inst.addr;
                self.done();
                return;
            }
        }
        self.step_on();
    }

    fn ret(&mut self, mmu: &Mmu) {
        match self.inst.step {
            0 => {}
            1 => self.inst.op1 = self.pop_byte(mmu),
            2 => self.inst.op2 = self.pop_byte(mmu),
            _ => {
                self.regs.pc = self.operand_addr();
                self.done();
                return;
            }
        }
        self.step_on();
    }

    fn ret_cond(&mut self, mmu: &Mmu) {
        match self.inst.step {
            0 => {}
            1 => {
                if !self.condition((self.inst.opcode - 0xC0) >> 3) {
                    self.done();
                    return;
                }
            }
            2 => self.inst.op1 = self.pop_byte(mmu),
            3 => self.inst.op2 = self.pop_byte(mmu),
            _ => {
                self.regs.pc = self.operand_addr();
                self.done();
                return;
            }
        }
        self.step_on();
    }

    fn rst(&mut self, mmu: &mut Mmu) {
        match self.inst.step {
            0 | 1 => {}
            2 => self.push_byte(mmu, high_byte(self.regs.pc)),
            _ => {
                self.push_byte(mmu, low_byte(self.regs.pc));
                self.regs.pc = (self.inst.opcode - 0xC7) as u16;
                self.done();
                return;
            }
        }
        self.step_on();
    }

    /// CB-prefixed opcodes. The second byte replaces `opcode` once fetched.
    fn prefix_cb(&mut self, mmu: &mut Mmu) {
        self.inst.prefix_cb = true;
        match self.inst.step {
            0 => {
                self.step_on();
                return;
            }
            1 => self.inst.opcode = self.fetch(mmu),
            _ => {}
        }
        match self.inst.opcode >> 6 {
            1 => self.cb_bit(mmu),
            _ => self.cb_modify(mmu),
        }
    }

    fn cb_bit(&mut self, mmu: &Mmu) {
        if self.inst.step == 1 && self.mod_index() == HL_OPERAND {
            self.step_on();
            return;
        }
        let op = self.read_operand(mmu, self.mod_index());
        let b = (self.inst.opcode >> 3) & 0x07;
        self.regs.set_flag(FLAG_Z, !check_bit(op, b));
        self.regs.set_flag(FLAG_N, false);
        self.regs.set_flag(FLAG_H, true);
        self.done();
    }

    /// Shifts, RES and SET: read-modify-write, two extra cycles on (HL).
    fn cb_modify(&mut self, mmu: &mut Mmu) {
        let index = self.mod_index();
        if index == HL_OPERAND {
            match self.inst.step {
                1 => {
                    self.step_on();
                    return;
                }
                2 => {
                    self.inst.op1 = self.read_operand(mmu, index);
                    self.step_on();
                    return;
                }
                _ => {}
            }
        } else {
            self.inst.op1 = self.read_operand(mmu, index);
        }
        let op = self.inst.op1;
        let b = (self.inst.opcode >> 3) & 0x07;
        let res = match self.inst.opcode >> 6 {
            0 => self.cb_shift(op),
            2 => clear_bit(op, b),
            _ => set_bit(op, b),
        };
        self.write_operand(mmu, index, res);
        self.done();
    }

    fn cb_shift(&mut self, op: u8) -> u8 {
        let carry = self.regs.flag(FLAG_C) as u8;
        let (res, out) = match (self.inst.opcode >> 3) & 0x07 {
            0 => (op.rotate_left(1), check_bit(op, 7)),
            1 => (op.rotate_right(1), check_bit(op, 0)),
            2 => ((op << 1) | carry, check_bit(op, 7)),
            3 => ((op >> 1) | (carry << 7), check_bit(op, 0)),
            4 => (op << 1, check_bit(op, 7)),
            5 => ((op >> 1) | (op & 0x80), check_bit(op, 0)),
            6 => (op.rotate_left(4), false),
            _ => (op >> 1, check_bit(op, 0)),
        };
        self.regs.f = 0;
        self.regs.set_flag(FLAG_Z, res == 0);
        self.regs.set_flag(FLAG_C, out);
        res
    }
}

#[cfg(test)]
mod tests {
    use crate::cartridge::Cartridge;
    use crate::cpu::*;
    use crate::hardware::CartMode;
    use crate::mmu::Mmu;

    fn setup(program: &[u8]) -> (Cpu, Mmu) {
        let mut rom = vec![0u8; 0x8000];
        rom[0x0100..0x0100 + program.len()].copy_from_slice(program);
        (Cpu::new(CartMode::Dmg), Mmu::new(Cartridge::load(rom).unwrap()))
    }

    /// Run one CPU tick, returning whether an instruction finished.
    fn tick(cpu: &mut Cpu, mmu: &mut Mmu) -> bool {
        for _ in 0..4 {
            cpu.check_interrupts(mmu);
            cpu.clock(mmu);
        }
        !cpu.inst.running
    }

    /// Ticks taken by the next instruction.
    fn run_one(cpu: &mut Cpu, mmu: &mut Mmu) -> u32 {
        let mut ticks = 1;
        while !tick(cpu, mmu) {
            ticks += 1;
        }
        ticks
    }

    #[test]
    fn machine_cycle_counts() {
        let cases: &[(&[u8], u32)] = &[
            (&[0x00], 1),
            (&[0x01, 0x34, 0x12], 3),
            (&[0x36, 0x99], 3),
            (&[0x06, 0x99], 2),
            (&[0x7E], 2),
            (&[0x41], 1),
            (&[0xC3, 0x00, 0x02], 4),
            (&[0xCD, 0x00, 0x02], 6),
            (&[0xC5], 4),
            (&[0xC1], 3),
            (&[0xE8, 0x01], 4),
            (&[0xF8, 0x01], 3),
            (&[0x08, 0x00, 0xC0], 5),
            (&[0xCB, 0x11], 2),
            (&[0xCB, 0x46], 3),
            (&[0xCB, 0x16], 4),
            (&[0xC7], 4),
            (&[0xFE, 0x10], 2),
        ];
        for (program, expected) in cases {
            let (mut cpu, mut mmu) = setup(program);
            cpu.regs.set_hl(0xC000);
            assert_eq!(run_one(&mut cpu, &mut mmu), *expected, "opcode {:02X}", program[0]);
        }
    }

    #[test]
    fn conditional_branch_timing() {
        // DMG boots with Z set, so NZ conditions fall through.
        let (mut cpu, mut mmu) = setup(&[0x20, 0x05]);
        assert_eq!(run_one(&mut cpu, &mut mmu), 2);
        assert_eq!(cpu.regs.pc, 0x0102);
        let (mut cpu, mut mmu) = setup(&[0x28, 0x05]);
        assert_eq!(run_one(&mut cpu, &mut mmu), 3);
        assert_eq!(cpu.regs.pc, 0x0107);
        let (mut cpu, mut mmu) = setup(&[0xC4, 0x00, 0x02]);
        assert_eq!(run_one(&mut cpu, &mut mmu), 3);
        let (mut cpu, mut mmu) = setup(&[0xC8]);
        cpu.regs.sp = 0xC000;
        assert_eq!(run_one(&mut cpu, &mut mmu), 5);
    }

    #[test]
    fn add_and_sub_flags() {
        let (mut cpu, mut mmu) = setup(&[0xC6, 0x01, 0xD6, 0x01, 0xCE, 0x00]);
        cpu.regs.a = 0xFF;
        run_one(&mut cpu, &mut mmu);
        assert_eq!(cpu.regs.a, 0x00);
        assert_eq!(cpu.regs.f, FLAG_Z | FLAG_H | FLAG_C);
        run_one(&mut cpu, &mut mmu);
        assert_eq!(cpu.regs.a, 0xFF);
        assert_eq!(cpu.regs.f, FLAG_N | FLAG_H | FLAG_C);
        run_one(&mut cpu, &mut mmu);
        assert_eq!(cpu.regs.a, 0x00);
        assert_eq!(cpu.regs.f, FLAG_Z | FLAG_H | FLAG_C);
    }

    #[test]
    fn sbc_borrows_through_carry() {
        let (mut cpu, mut mmu) = setup(&[0xDE, 0x00]);
        cpu.regs.a = 0x00;
        cpu.regs.f = FLAG_C;
        run_one(&mut cpu, &mut mmu);
        assert_eq!(cpu.regs.a, 0xFF);
        assert_eq!(cpu.regs.f, FLAG_N | FLAG_H | FLAG_C);
    }

    #[test]
    fn daa_adjusts_bcd_addition() {
        // 0x45 + 0x38 = 0x7D -> 0x83
        let (mut cpu, mut mmu) = setup(&[0xC6, 0x38, 0x27]);
        cpu.regs.a = 0x45;
        run_one(&mut cpu, &mut mmu);
        run_one(&mut cpu, &mut mmu);
        assert_eq!(cpu.regs.a, 0x83);
        assert!(!cpu.regs.flag(FLAG_C));
    }

    #[test]
    fn inc_dec_half_carry() {
        let (mut cpu, mut mmu) = setup(&[0x04, 0x05, 0x05]);
        cpu.regs.b = 0x0F;
        cpu.regs.f = FLAG_C;
        run_one(&mut cpu, &mut mmu);
        assert_eq!(cpu.regs.b, 0x10);
        assert_eq!(cpu.regs.f, FLAG_H | FLAG_C);
        run_one(&mut cpu, &mut mmu);
        assert_eq!(cpu.regs.b, 0x0F);
        assert_eq!(cpu.regs.f, FLAG_N | FLAG_H | FLAG_C);
        run_one(&mut cpu, &mut mmu);
        assert_eq!(cpu.regs.f, FLAG_N | FLAG_C);
    }

    #[test]
    fn ei_takes_effect_after_next_instruction() {
        let (mut cpu, mut mmu) = setup(&[0xFB, 0x00, 0x00]);
        run_one(&mut cpu, &mut mmu);
        assert!(!cpu.ime);
        run_one(&mut cpu, &mut mmu);
        assert!(cpu.ime);
    }

    #[test]
    fn di_right_after_ei_cancels_enable() {
        let (mut cpu, mut mmu) = setup(&[0xFB, 0xF3, 0x00, 0x00]);
        for _ in 0..4 {
            run_one(&mut cpu, &mut mmu);
        }
        assert!(!cpu.ime);
    }

    #[test]
    fn push_pop_af_masks_flags() {
        let (mut cpu, mut mmu) = setup(&[0xC5, 0xF1]);
        cpu.regs.set_bc(0x12FF);
        run_one(&mut cpu, &mut mmu);
        run_one(&mut cpu, &mut mmu);
        assert_eq!(cpu.regs.af(), 0x12F0);
        assert_eq!(cpu.regs.sp, 0xFFFE);
    }

    #[test]
    fn call_and_ret_round_trip() {
        let mut program = vec![0xCD, 0x10, 0x01];
        program.resize(0x10, 0x00);
        program.push(0xC9);
        let (mut cpu, mut mmu) = setup(&program);
        run_one(&mut cpu, &mut mmu);
        assert_eq!(cpu.regs.pc, 0x0110);
        assert_eq!(run_one(&mut cpu, &mut mmu), 4);
        assert_eq!(cpu.regs.pc, 0x0103);
    }

    #[test]
    fn cb_ops_on_memory() {
        // SWAP (HL); SET 7,(HL); BIT 0,(HL)
        let (mut cpu, mut mmu) = setup(&[0xCB, 0x36, 0xCB, 0xFE, 0xCB, 0x46]);
        cpu.regs.set_hl(0xC000);
        mmu.write(0xC000, 0x12);
        run_one(&mut cpu, &mut mmu);
        assert_eq!(mmu.read(0xC000), 0x21);
        run_one(&mut cpu, &mut mmu);
        assert_eq!(mmu.read(0xC000), 0xA1);
        run_one(&mut cpu, &mut mmu);
        assert!(!cpu.regs.flag(FLAG_Z));
        assert!(cpu.regs.flag(FLAG_H));
    }

    #[test]
    fn ld_hl_sp_flags_from_low_byte() {
        let (mut cpu, mut mmu) = setup(&[0xF8, 0xFF]);
        cpu.regs.sp = 0x0001;
        run_one(&mut cpu, &mut mmu);
        assert_eq!(cpu.regs.hl(), 0x0000);
        assert_eq!(cpu.regs.f, FLAG_H | FLAG_C);
    }

    #[test]
    fn invalid_opcode_is_reported() {
        let (mut cpu, mut mmu) = setup(&[0xD3]);
        tick(&mut cpu, &mut mmu);
        assert_eq!(cpu.invalid_opcode, Some(0xD3));
    }

    #[test]
    fn stop_switches_speed_when_armed() {
        let mut rom = vec![0u8; 0x8000];
        rom[0x0143] = 0x80;
        rom[0x0100] = 0x10;
        let mut mmu = Mmu::new(Cartridge::load(rom).unwrap());
        let mut cpu = Cpu::new(CartMode::Gbc);
        mmu.write(crate::hardware::KEY1, 0x01);
        tick(&mut cpu, &mut mmu);
        assert!(mmu.double_speed);
        assert!(!cpu.stop);
        assert_eq!(mmu.read_force(crate::hardware::KEY1) & 0x81, 0x80);
        assert_eq!(cpu.regs.pc, 0x0102);
    }
}
