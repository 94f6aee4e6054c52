use crate::{
    alu::{self, Shift},
    decoder::{self, Cond, Decoded, Mnemonic, Operand, Step, Target},
    error::{EmuError, RegisterDump},
    mmu::Mmu,
    registers::{FLAG_C, FLAG_H, FLAG_N, FLAG_Z, Reg8, Reg16, Registers},
};

/// Where a resolved operand lives.
#[derive(Debug, Clone, Copy)]
enum Loc {
    Reg8(Reg8),
    Reg16(Reg16),
    Mem(u16),
    Imm8(u8),
    Imm16(u16),
}

/// The LR35902 core. Every bus access charges one machine cycle through
/// [`Mmu::tick`], so peripherals observe accesses at the right time.
pub struct Cpu {
    pub regs: Registers,
    /// Machine cycles executed since power on
    pub cycles: u64,
    pub halted: bool,
    pub stopped: bool,
    /// Next opcode fetch does not advance PC
    halt_bug: bool,
}

impl Cpu {
    pub fn new(cgb: bool) -> Self {
        Self {
            regs: Registers::post_boot(cgb),
            cycles: 0,
            halted: false,
            stopped: false,
            halt_bug: false,
        }
    }

    #[inline]
    fn tick(&mut self, mmu: &mut Mmu, m_cycles: u32) {
        mmu.tick(m_cycles);
        self.cycles += m_cycles as u64;
    }

    #[inline(always)]
    fn fetch8(&mut self, mmu: &mut Mmu) -> u8 {
        let val = mmu.read_byte(self.regs.pc);
        if self.halt_bug {
            self.halt_bug = false;
        } else {
            self.regs.pc = self.regs.pc.wrapping_add(1);
        }
        self.tick(mmu, 1);
        val
    }

    #[inline(always)]
    fn read8(&mut self, mmu: &mut Mmu, addr: u16) -> u8 {
        let val = mmu.read_byte(addr);
        self.tick(mmu, 1);
        val
    }

    #[inline(always)]
    fn write8(&mut self, mmu: &mut Mmu, addr: u16, val: u8) {
        mmu.write_byte(addr, val);
        self.tick(mmu, 1);
    }

    fn push16(&mut self, mmu: &mut Mmu, val: u16) {
        self.regs.sp = self.regs.sp.wrapping_sub(1);
        self.write8(mmu, self.regs.sp, (val >> 8) as u8);
        self.regs.sp = self.regs.sp.wrapping_sub(1);
        self.write8(mmu, self.regs.sp, val as u8);
    }

    fn pop16(&mut self, mmu: &mut Mmu) -> u16 {
        let lo = self.read8(mmu, self.regs.sp) as u16;
        self.regs.sp = self.regs.sp.wrapping_add(1);
        let hi = self.read8(mmu, self.regs.sp) as u16;
        self.regs.sp = self.regs.sp.wrapping_add(1);
        (hi << 8) | lo
    }

    fn condition(&self, cond: Cond) -> bool {
        match cond {
            Cond::NZ => !self.regs.flag(FLAG_Z),
            Cond::Z => self.regs.flag(FLAG_Z),
            Cond::NC => !self.regs.flag(FLAG_C),
            Cond::C => self.regs.flag(FLAG_C),
        }
    }

    /// Interrupt entry: two internal cycles, PC pushed high byte first, then
    /// the vector. If the high-byte push cleared the request (by landing on
    /// IE), dispatch is cancelled and execution continues at 0x0000.
    fn dispatch_interrupt(&mut self, mmu: &mut Mmu) {
        mmu.interrupts.disable();
        self.tick(mmu, 2);
        let pc = self.regs.pc;
        self.regs.sp = self.regs.sp.wrapping_sub(1);
        self.write8(mmu, self.regs.sp, (pc >> 8) as u8);

        let target = match mmu.interrupts.highest() {
            Some(irq) => {
                mmu.interrupts.acknowledge(irq);
                irq.vector()
            }
            None => {
                log::debug!("interrupt dispatch from {pc:04X} cancelled");
                0x0000
            }
        };
        self.regs.sp = self.regs.sp.wrapping_sub(1);
        self.write8(mmu, self.regs.sp, pc as u8);
        self.regs.pc = target;
        self.tick(mmu, 1);
    }

    /// Run one instruction, one interrupt dispatch, or one idle cycle while
    /// halted or stopped. Returns the machine cycles consumed.
    pub fn step(&mut self, mmu: &mut Mmu) -> Result<u32, EmuError> {
        let start = self.cycles;

        if self.stopped {
            if mmu.take_joypad_wake() {
                log::debug!("joypad press ends STOP");
                self.stopped = false;
            } else {
                self.tick(mmu, 1);
                return Ok(self.finish(mmu, start));
            }
        }

        if self.halted {
            if mmu.interrupts.pending() == 0 {
                self.tick(mmu, 1);
                return Ok(self.finish(mmu, start));
            }
            self.halted = false;
        }

        if mmu.interrupts.ime && mmu.interrupts.pending() != 0 {
            self.dispatch_interrupt(mmu);
            return Ok(self.finish(mmu, start));
        }

        let at = self.regs;
        let decoded = decoder::table()?.decode(at, || self.fetch8(mmu))?;
        #[cfg(feature = "cpu-trace")]
        log::trace!("{:04X}: {decoded}", at.pc);
        self.execute(mmu, &decoded, at)?;
        mmu.interrupts.advance_enable_delay();
        Ok(self.finish(mmu, start))
    }

    /// Charge any VRAM DMA stall raised during the step and report the total.
    fn finish(&mut self, mmu: &mut Mmu, start: u64) -> u32 {
        let stall = mmu.take_stall();
        if stall > 0 {
            self.tick(mmu, stall);
        }
        (self.cycles - start) as u32
    }

    fn resolve(&mut self, op: &Operand) -> Loc {
        match (op.target, op.indirect) {
            (Target::Reg8(r), false) => Loc::Reg8(r),
            // (C): high page
            (Target::Reg8(r), true) => Loc::Mem(0xFF00 | self.regs.get8(r) as u16),
            (Target::Reg16(r), false) => Loc::Reg16(r),
            (Target::Reg16(r), true) => {
                let addr = self.regs.get16(r);
                match op.step {
                    Step::Inc => self.regs.set_hl(addr.wrapping_add(1)),
                    Step::Dec => self.regs.set_hl(addr.wrapping_sub(1)),
                    Step::None => {}
                }
                Loc::Mem(addr)
            }
            (Target::Addr8, _) => Loc::Mem(0xFF00 | (op.value & 0xFF)),
            (Target::Addr16, true) => Loc::Mem(op.value),
            (Target::Imm16 | Target::Addr16, false) => Loc::Imm16(op.value),
            _ => Loc::Imm8(op.value as u8),
        }
    }

    fn read_loc(&mut self, mmu: &mut Mmu, loc: Loc) -> u8 {
        match loc {
            Loc::Reg8(r) => self.regs.get8(r),
            Loc::Mem(addr) => self.read8(mmu, addr),
            Loc::Imm8(v) => v,
            Loc::Reg16(r) => self.regs.get16(r) as u8,
            Loc::Imm16(v) => v as u8,
        }
    }

    fn write_loc(&mut self, mmu: &mut Mmu, loc: Loc, val: u8) {
        match loc {
            Loc::Reg8(r) => self.regs.set8(r, val),
            Loc::Mem(addr) => self.write8(mmu, addr, val),
            _ => log::warn!("write of {val:02X} to read-only operand {loc:?}"),
        }
    }

    fn read_word(&self, loc: Loc) -> u16 {
        match loc {
            Loc::Reg16(r) => self.regs.get16(r),
            Loc::Imm16(v) => v,
            Loc::Imm8(v) => v as u16,
            Loc::Reg8(r) => self.regs.get8(r) as u16,
            Loc::Mem(addr) => addr,
        }
    }

    fn execute(&mut self, mmu: &mut Mmu, d: &Decoded, at: Registers) -> Result<(), EmuError> {
        let ops = d.operands();
        match (d.mnemonic(), ops) {
            (Mnemonic::Nop, _) => {}
            (Mnemonic::Ld, [_, _, e8]) => {
                let (val, flags) = alu::add_sp_e8(self.regs.sp, e8.value as u8);
                self.regs.set_hl(val);
                self.regs.f = flags;
                self.tick(mmu, 1);
            }
            (Mnemonic::Ld | Mnemonic::Ldh, [dst, src]) => self.load(mmu, dst, src),
            (Mnemonic::Inc, [op]) => self.inc_dec(mmu, op, true),
            (Mnemonic::Dec, [op]) => self.inc_dec(mmu, op, false),
            (Mnemonic::Add, [dst, src]) => match dst.target {
                Target::Reg16(Reg16::HL) => {
                    let rhs = self.regs.get16(self.resolve_reg16(src));
                    let (val, flags) = alu::add16(self.regs.hl(), rhs, self.regs.f);
                    self.regs.set_hl(val);
                    self.regs.f = flags;
                    self.tick(mmu, 1);
                }
                Target::Reg16(Reg16::SP) => {
                    let (val, flags) = alu::add_sp_e8(self.regs.sp, src.value as u8);
                    self.regs.sp = val;
                    self.regs.f = flags;
                    self.tick(mmu, 2);
                }
                _ => self.arith(mmu, Mnemonic::Add, src),
            },
            (
                m @ (Mnemonic::Adc
                | Mnemonic::Sub
                | Mnemonic::Sbc
                | Mnemonic::And
                | Mnemonic::Xor
                | Mnemonic::Or
                | Mnemonic::Cp),
                [.., src],
            ) => self.arith(mmu, m, src),
            (Mnemonic::Rlca, _) => self.shift_a(Shift::Rlc),
            (Mnemonic::Rrca, _) => self.shift_a(Shift::Rrc),
            (Mnemonic::Rla, _) => self.shift_a(Shift::Rl),
            (Mnemonic::Rra, _) => self.shift_a(Shift::Rr),
            (Mnemonic::Daa, _) => {
                let (a, flags) = alu::daa(self.regs.a, self.regs.f);
                self.regs.a = a;
                self.regs.f = flags;
            }
            (Mnemonic::Cpl, _) => {
                self.regs.a = !self.regs.a;
                self.regs.set_flag(FLAG_N, true);
                self.regs.set_flag(FLAG_H, true);
            }
            (Mnemonic::Scf, _) => {
                self.regs.set_flag(FLAG_N, false);
                self.regs.set_flag(FLAG_H, false);
                self.regs.set_flag(FLAG_C, true);
            }
            (Mnemonic::Ccf, _) => {
                let carry = self.regs.flag(FLAG_C);
                self.regs.set_flag(FLAG_N, false);
                self.regs.set_flag(FLAG_H, false);
                self.regs.set_flag(FLAG_C, !carry);
            }
            (Mnemonic::Jr, [.., rel]) => {
                if self.branch_taken(ops) {
                    let offset = rel.value as u8 as i8 as i16 as u16;
                    self.regs.pc = self.regs.pc.wrapping_add(offset);
                    self.tick(mmu, 1);
                }
            }
            (
                Mnemonic::Jp,
                [Operand {
                    target: Target::Reg16(Reg16::HL),
                    ..
                }],
            ) => self.regs.pc = self.regs.hl(),
            (Mnemonic::Jp, [.., addr]) => {
                if self.branch_taken(ops) {
                    self.regs.pc = addr.value;
                    self.tick(mmu, 1);
                }
            }
            (Mnemonic::Call, [.., addr]) => {
                if self.branch_taken(ops) {
                    self.tick(mmu, 1);
                    let ret = self.regs.pc;
                    self.push16(mmu, ret);
                    self.regs.pc = addr.value;
                }
            }
            (Mnemonic::Ret, []) => {
                self.regs.pc = self.pop16(mmu);
                self.tick(mmu, 1);
            }
            (Mnemonic::Ret, [_]) => {
                self.tick(mmu, 1);
                if self.branch_taken(ops) {
                    self.regs.pc = self.pop16(mmu);
                    self.tick(mmu, 1);
                }
            }
            (Mnemonic::Reti, _) => {
                self.regs.pc = self.pop16(mmu);
                self.tick(mmu, 1);
                mmu.interrupts.enable_immediately();
            }
            (
                Mnemonic::Rst,
                [Operand {
                    target: Target::Vector(vector),
                    ..
                }],
            ) => {
                self.tick(mmu, 1);
                let ret = self.regs.pc;
                self.push16(mmu, ret);
                self.regs.pc = *vector;
            }
            (Mnemonic::Push, [op]) => {
                let val = self.regs.get16(self.resolve_reg16(op));
                self.tick(mmu, 1);
                self.push16(mmu, val);
            }
            (Mnemonic::Pop, [op]) => {
                let val = self.pop16(mmu);
                let reg = self.resolve_reg16(op);
                self.regs.set16(reg, val);
            }
            (Mnemonic::Halt, _) => self.halt(mmu, at)?,
            (Mnemonic::Stop, _) => self.stop(mmu),
            (Mnemonic::Di, _) => mmu.interrupts.disable(),
            (Mnemonic::Ei, _) => mmu.interrupts.schedule_enable(),
            (Mnemonic::Rlc, [op]) => self.shift(mmu, Shift::Rlc, op),
            (Mnemonic::Rrc, [op]) => self.shift(mmu, Shift::Rrc, op),
            (Mnemonic::Rl, [op]) => self.shift(mmu, Shift::Rl, op),
            (Mnemonic::Rr, [op]) => self.shift(mmu, Shift::Rr, op),
            (Mnemonic::Sla, [op]) => self.shift(mmu, Shift::Sla, op),
            (Mnemonic::Sra, [op]) => self.shift(mmu, Shift::Sra, op),
            (Mnemonic::Swap, [op]) => self.shift(mmu, Shift::Swap, op),
            (Mnemonic::Srl, [op]) => self.shift(mmu, Shift::Srl, op),
            (
                m @ (Mnemonic::Bit | Mnemonic::Res | Mnemonic::Set),
                [
                    Operand {
                        target: Target::Bit(n),
                        ..
                    },
                    op,
                ],
            ) => self.bit_op(mmu, m, *n, op),
            _ => {
                return Err(EmuError::MalformedOpcodeTable(format!(
                    "no handler for {d} at {:04X}",
                    at.pc
                )));
            }
        }
        Ok(())
    }

    fn resolve_reg16(&self, op: &Operand) -> Reg16 {
        match op.target {
            Target::Reg16(r) => r,
            _ => Reg16::HL,
        }
    }

    fn branch_taken(&self, ops: &[Operand]) -> bool {
        match ops.first().map(|op| op.target) {
            Some(Target::Cond(cond)) => self.condition(cond),
            _ => true,
        }
    }

    fn load(&mut self, mmu: &mut Mmu, dst: &Operand, src: &Operand) {
        let dst = self.resolve(dst);
        let src = self.resolve(src);
        match (dst, src) {
            (Loc::Reg16(Reg16::SP), Loc::Reg16(Reg16::HL)) => {
                self.regs.sp = self.regs.hl();
                self.tick(mmu, 1);
            }
            (Loc::Reg16(r), src) => {
                let val = self.read_word(src);
                self.regs.set16(r, val);
            }
            (Loc::Mem(addr), Loc::Reg16(Reg16::SP)) => {
                let sp = self.regs.sp;
                self.write8(mmu, addr, sp as u8);
                self.write8(mmu, addr.wrapping_add(1), (sp >> 8) as u8);
            }
            (dst, src) => {
                let val = self.read_loc(mmu, src);
                self.write_loc(mmu, dst, val);
            }
        }
    }

    fn inc_dec(&mut self, mmu: &mut Mmu, op: &Operand, inc: bool) {
        if let (Target::Reg16(r), false) = (op.target, op.indirect) {
            let val = self.regs.get16(r);
            let val = if inc {
                val.wrapping_add(1)
            } else {
                val.wrapping_sub(1)
            };
            self.regs.set16(r, val);
            self.tick(mmu, 1);
            return;
        }
        let loc = self.resolve(op);
        let val = self.read_loc(mmu, loc);
        let (out, flags) = if inc {
            alu::inc8(val, self.regs.f)
        } else {
            alu::dec8(val, self.regs.f)
        };
        self.regs.f = flags;
        self.write_loc(mmu, loc, out);
    }

    fn arith(&mut self, mmu: &mut Mmu, m: Mnemonic, src: &Operand) {
        let loc = self.resolve(src);
        let rhs = self.read_loc(mmu, loc);
        let a = self.regs.a;
        let carry = self.regs.flag(FLAG_C);
        let (out, flags) = match m {
            Mnemonic::Add => alu::add8(a, rhs, false),
            Mnemonic::Adc => alu::add8(a, rhs, carry),
            Mnemonic::Sub | Mnemonic::Cp => alu::sub8(a, rhs, false),
            Mnemonic::Sbc => alu::sub8(a, rhs, carry),
            Mnemonic::And => alu::and8(a, rhs),
            Mnemonic::Xor => alu::xor8(a, rhs),
            _ => alu::or8(a, rhs),
        };
        if m != Mnemonic::Cp {
            self.regs.a = out;
        }
        self.regs.f = flags;
    }

    fn shift_a(&mut self, op: Shift) {
        let (a, flags) = alu::shift_a(op, self.regs.a, self.regs.f);
        self.regs.a = a;
        self.regs.f = flags;
    }

    fn shift(&mut self, mmu: &mut Mmu, kind: Shift, op: &Operand) {
        let loc = self.resolve(op);
        let val = self.read_loc(mmu, loc);
        let (out, flags) = alu::shift(kind, val, self.regs.f);
        self.regs.f = flags;
        self.write_loc(mmu, loc, out);
    }

    fn bit_op(&mut self, mmu: &mut Mmu, m: Mnemonic, n: u8, op: &Operand) {
        let loc = self.resolve(op);
        let val = self.read_loc(mmu, loc);
        match m {
            Mnemonic::Bit => self.regs.f = alu::test_bit(val, n, self.regs.f),
            Mnemonic::Res => self.write_loc(mmu, loc, val & !(1 << n)),
            _ => self.write_loc(mmu, loc, val | (1 << n)),
        }
    }

    fn halt(&mut self, mmu: &Mmu, at: Registers) -> Result<(), EmuError> {
        let irq = &mmu.interrupts;
        if irq.ie & 0x1F == 0 {
            return Err(EmuError::GuestHang {
                pc: at.pc,
                regs: RegisterDump(self.regs),
            });
        }
        if !irq.ime && irq.pending() != 0 {
            log::trace!("HALT bug at {:04X}", at.pc);
            self.halt_bug = true;
        } else {
            self.halted = true;
        }
        Ok(())
    }

    fn stop(&mut self, mmu: &mut Mmu) {
        mmu.reset_div();
        if mmu.speed_switch_armed() {
            mmu.switch_speed();
        } else {
            log::debug!("STOP at {:04X}", self.regs.pc.wrapping_sub(2));
            mmu.take_joypad_wake();
            self.stopped = true;
        }
    }
}
