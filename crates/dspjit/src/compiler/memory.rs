use super::{BlockBuilder, ach, ar, ix, reg, wr};
use crate::{
    emitter::{AluOp, HostCall, Operand},
    host::HostReg,
    regcache::{LogicalReg, Loc},
};
use bitos::BitUtils;
use dspint::{Ins, Reg, ins::Opcode};

/// Start of the hardware interface window in data memory.
pub(super) const IFX_BASE: u16 = 0xFF00;

/// How an address register changes after an access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Step {
    Inc,
    Dec,
    /// Adds `ixN`.
    Add(usize),
    /// Subtracts `ixN`.
    Sub(usize),
}

impl BlockBuilder<'_> {
    /// Value of a 16-bit register as an operand: an immediate if the cache knows it, otherwise a
    /// new temporary.
    pub(super) fn value_of(&mut self, reg: Reg) -> Operand {
        match self.cache.loc(reg.into()) {
            Loc::Imm(value) if LogicalReg::from(reg).parent().is_none() => Operand::Imm(value),
            _ => self.read(reg, false).into(),
        }
    }

    /// Steps `arR` inside the window of `wrR`.
    pub(super) fn step_ar(&mut self, r: usize, step: Step) {
        let wrap = self.read(wr(r), false);
        let (amount, sub) = match step {
            Step::Inc => (Operand::Imm(1), false),
            Step::Dec => (Operand::Imm(1), true),
            Step::Add(i) => (self.read(ix(i), false).into(), false),
            Step::Sub(i) => (self.read(ix(i), false).into(), true),
        };

        let addr = self.cache.acquire(&mut self.em, ar(r).into(), true);
        self.em.addr_step(addr, wrap, amount, sub);
        self.cache.release(&mut self.em, ar(r).into(), true);

        self.free(wrap);
        self.free_operand(amount);
    }

    /// Address of a short access: page from `config`, offset from the low byte of `ins`.
    fn short_addr(&mut self, ins: Ins) -> Operand {
        let offset = ins.base.bits(0, 8) as u64;
        match self.value_of(Reg::Cr) {
            Operand::Imm(config) => Operand::Imm(((config & 0xFF) << 8) | offset),
            Operand::Reg(addr) => {
                self.em.alu(AluOp::And, addr, addr, Operand::Imm(0xFF));
                self.em.alu(AluOp::Shl, addr, addr, Operand::Imm(8));
                self.em.alu(AluOp::Or, addr, addr, Operand::Imm(offset));
                addr.into()
            }
        }
    }

    /// `operand` in a form which survives the start of a host call.
    fn call_arg(&mut self, operand: Operand) -> Operand {
        match operand {
            Operand::Reg(reg) => self.cache.make_call_safe(&mut self.em, reg).into(),
            imm => imm,
        }
    }

    fn ifx_read(&mut self, value: HostReg, addr: Operand) {
        let arg = self.call_arg(addr);

        self.cache.push_regs(&mut self.em);
        self.em
            .call(HostCall::IfxRead, self.next_pc, [arg, Operand::Imm(0)]);
        self.cache.pop_regs(&mut self.em);
        self.em.mov(value, HostReg::RET);

        if arg != addr {
            self.free_operand(arg);
        }

        self.may_stop = true;
    }

    fn ifx_write(&mut self, addr: Operand, value: Operand) {
        let args = [self.call_arg(addr), self.call_arg(value)];

        self.cache.push_regs(&mut self.em);
        self.em.call(HostCall::IfxWrite, self.next_pc, args);
        self.cache.pop_regs(&mut self.em);

        for (arg, operand) in args.into_iter().zip([addr, value]) {
            if arg != operand {
                self.free_operand(arg);
            }
        }

        self.may_stop = true;
    }

    /// Reads data memory at `addr` into a new temporary.
    pub(super) fn load_data(&mut self, addr: Operand) -> HostReg {
        let value = self.scratch();
        match addr {
            Operand::Imm(addr) if addr as u16 >= IFX_BASE => {
                self.ifx_read(value, Operand::Imm(addr & 0xFF));
            }
            Operand::Imm(_) => self.em.read_data(value, addr, self.next_pc),
            Operand::Reg(reg) => {
                // neither path changes the cache state
                let inline = self.em.label();
                let done = self.em.label();

                let below = self.scratch();
                self.em.alu(AluOp::LtU, below, reg, Operand::Imm(IFX_BASE as u64));
                self.em.branch(below, true, inline);
                self.free(below);

                self.ifx_read(value, addr);
                self.em.jump(done);

                self.em.bind(inline);
                self.em.read_data(value, addr, self.next_pc);
                self.em.bind(done);
            }
        }

        value
    }

    /// Writes `value` to data memory at `addr`.
    pub(super) fn store_data(&mut self, addr: Operand, value: HostReg) {
        match addr {
            Operand::Imm(addr) if addr as u16 >= IFX_BASE => {
                self.ifx_write(Operand::Imm(addr & 0xFF), value.into());
            }
            Operand::Imm(_) => self.em.write_data(addr, value, self.next_pc),
            Operand::Reg(reg) => {
                let inline = self.em.label();
                let done = self.em.label();

                let below = self.scratch();
                self.em.alu(AluOp::LtU, below, reg, Operand::Imm(IFX_BASE as u64));
                self.em.branch(below, true, inline);
                self.free(below);

                self.ifx_write(addr, value.into());
                self.em.jump(done);

                self.em.bind(inline);
                self.em.write_data(addr, value, self.next_pc);
                self.em.bind(done);
            }
        }
    }

    pub(super) fn lr(&mut self, ins: Ins) {
        let d = ins.base.bits(0, 5);

        let value = self.load_data(Operand::Imm(ins.extra as u64));
        self.write(reg(d), value);
        self.free(value);
    }

    pub(super) fn sr(&mut self, ins: Ins) {
        let s = ins.base.bits(0, 5);

        let value = self.read(reg(s), false);
        self.store_data(Operand::Imm(ins.extra as u64), value);
        self.free(value);
    }

    pub(super) fn lri(&mut self, ins: Ins) {
        let d = ins.base.bits(0, 5);
        self.write(reg(d), Operand::Imm(ins.extra as u64));
    }

    pub(super) fn lris(&mut self, ins: Ins) {
        let d = ins.base.bits(8, 11);
        let value = ins.base as u8 as i8 as i16 as u16;
        self.write(reg(0x18 + d), Operand::Imm(value as u64));
    }

    pub(super) fn lrs(&mut self, ins: Ins) {
        let d = ins.base.bits(8, 11);

        let addr = self.short_addr(ins);
        let value = self.load_data(addr);
        self.free_operand(addr);

        self.write(reg(0x18 + d), value);
        self.free(value);
    }

    pub(super) fn srs(&mut self, ins: Ins) {
        let s = ins.base.bits(8, 10);

        let value = self.read(reg(0x1C + s), false);
        let addr = self.short_addr(ins);
        self.store_data(addr, value);

        self.free_operand(addr);
        self.free(value);
    }

    pub(super) fn srsh(&mut self, ins: Ins) {
        let s = ins.base.bit(8) as usize;

        let value = self.read(ach(s), false);
        let addr = self.short_addr(ins);
        self.store_data(addr, value);

        self.free_operand(addr);
        self.free(value);
    }

    pub(super) fn si(&mut self, ins: Ins) {
        let offset = ins.base.bits(0, 8) as u64;
        self.ifx_write(Operand::Imm(offset), Operand::Imm(ins.extra as u64));
    }

    /// Address register update of the `lrr` and `srr` families.
    fn indirect_step(opcode: Opcode, r: usize) -> Option<Step> {
        match opcode {
            Opcode::Lrrd | Opcode::Srrd => Some(Step::Dec),
            Opcode::Lrri | Opcode::Srri => Some(Step::Inc),
            Opcode::Lrrn | Opcode::Srrn => Some(Step::Add(r)),
            _ => None,
        }
    }

    pub(super) fn lrr(&mut self, ins: Ins) {
        let d = ins.base.bits(0, 5);
        let s = ins.base.bits(5, 7) as usize;

        let addr = self.value_of(ar(s));
        let value = self.load_data(addr);
        self.free_operand(addr);

        if let Some(step) = Self::indirect_step(ins.decoded().opcode, s) {
            self.step_ar(s, step);
        }

        self.write(reg(d), value);
        self.free(value);
    }

    pub(super) fn srr(&mut self, ins: Ins) {
        let s = ins.base.bits(0, 5);
        let d = ins.base.bits(5, 7) as usize;

        let value = self.read(reg(s), false);
        let addr = self.value_of(ar(d));
        self.store_data(addr, value);
        self.free_operand(addr);
        self.free(value);

        if let Some(step) = Self::indirect_step(ins.decoded().opcode, d) {
            self.step_ar(d, step);
        }
    }

    pub(super) fn mrr(&mut self, ins: Ins) {
        let s = ins.base.bits(0, 5);
        let d = ins.base.bits(5, 10);

        match self.value_of(reg(s)) {
            Operand::Imm(value) => self.write(reg(d), Operand::Imm(value)),
            Operand::Reg(value) => {
                self.write(reg(d), value);
                self.free(value);
            }
        }
    }

    pub(super) fn iar(&mut self, ins: Ins) {
        self.step_ar(ins.base.bits(0, 2) as usize, Step::Inc);
    }

    pub(super) fn dar(&mut self, ins: Ins) {
        self.step_ar(ins.base.bits(0, 2) as usize, Step::Dec);
    }

    pub(super) fn addarn(&mut self, ins: Ins) {
        let d = ins.base.bits(0, 2) as usize;
        let s = ins.base.bits(2, 4) as usize;
        self.step_ar(d, Step::Add(s));
    }

    pub(super) fn subarn(&mut self, ins: Ins) {
        let d = ins.base.bits(0, 2) as usize;
        self.step_ar(d, Step::Sub(d));
    }
}
