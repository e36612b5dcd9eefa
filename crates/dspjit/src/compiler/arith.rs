use super::{BlockBuilder, reg};
use crate::{
    emitter::{AluOp, FlagOp, Operand},
    host::HostReg,
    regcache::LogicalReg,
};
use bitos::BitUtils;
use dspint::Ins;

const MASK_40: u64 = (1 << 40) - 1;

#[inline(always)]
fn imm(value: i64) -> Operand {
    Operand::Imm(value as u64)
}

impl BlockBuilder<'_> {
    /// Computes `acc[d] + rhs` (or `- rhs`), updates the flags and stores the result if `store`
    /// is set. Frees `rhs`.
    fn acc_arith(&mut self, d: usize, rhs: Operand, sub: bool, store: bool) {
        let lhs = self.read(LogicalReg::acc(d), true);
        let result = self.scratch();

        let (op, flags) = if sub {
            (AluOp::Sub, FlagOp::Sub)
        } else {
            (AluOp::Add, FlagOp::Add)
        };

        self.em.alu(op, result, lhs, rhs);
        self.em.extend(result, 40, true);
        self.flags(flags, lhs, rhs, result);

        if store {
            self.write(LogicalReg::acc(d), result);
        }

        self.free(lhs);
        self.free(result);
        self.free_operand(rhs);
    }

    /// Stores `value` into `acc[d]`, clearing carry and overflow. Frees `value`.
    pub(super) fn acc_move(&mut self, d: usize, value: HostReg) {
        self.em.extend(value, 40, true);
        self.flags(FlagOp::Move, value, Operand::Imm(0), value);
        self.write(LogicalReg::acc(d), value);
        self.free(value);
    }

    pub(super) fn add(&mut self, ins: Ins) {
        let d = ins.base.bit(8) as usize;
        let rhs = self.read(LogicalReg::acc(1 - d), true);
        self.acc_arith(d, rhs.into(), false, true);
    }

    pub(super) fn sub(&mut self, ins: Ins) {
        let d = ins.base.bit(8) as usize;
        let rhs = self.read(LogicalReg::acc(1 - d), true);
        self.acc_arith(d, rhs.into(), true, true);
    }

    pub(super) fn addax(&mut self, ins: Ins) {
        let d = ins.base.bit(8) as usize;
        let s = ins.base.bit(9) as usize;

        let rhs = self.read(LogicalReg::ax(s), true);
        self.acc_arith(d, rhs.into(), false, true);
    }

    pub(super) fn subax(&mut self, ins: Ins) {
        let d = ins.base.bit(8) as usize;
        let s = ins.base.bit(9) as usize;

        let rhs = self.read(LogicalReg::ax(s), true);
        self.acc_arith(d, rhs.into(), true, true);
    }

    pub(super) fn addi(&mut self, ins: Ins) {
        let d = ins.base.bit(8) as usize;
        self.acc_arith(d, imm((ins.extra as i16 as i64) << 16), false, true);
    }

    pub(super) fn addis(&mut self, ins: Ins) {
        let d = ins.base.bit(8) as usize;
        self.acc_arith(d, imm((ins.base as u8 as i8 as i64) << 16), false, true);
    }

    pub(super) fn cmp(&mut self, _: Ins) {
        let rhs = self.read(LogicalReg::acc(1), true);
        self.acc_arith(0, rhs.into(), true, false);
    }

    pub(super) fn cmpi(&mut self, ins: Ins) {
        let d = ins.base.bit(8) as usize;
        self.acc_arith(d, imm((ins.extra as i16 as i64) << 16), true, false);
    }

    pub(super) fn cmpis(&mut self, ins: Ins) {
        let d = ins.base.bit(8) as usize;
        self.acc_arith(d, imm((ins.base as u8 as i8 as i64) << 16), true, false);
    }

    pub(super) fn inc(&mut self, ins: Ins) {
        self.acc_arith(ins.base.bit(8) as usize, imm(1), false, true);
    }

    pub(super) fn incm(&mut self, ins: Ins) {
        self.acc_arith(ins.base.bit(8) as usize, imm(1 << 16), false, true);
    }

    pub(super) fn dec(&mut self, ins: Ins) {
        self.acc_arith(ins.base.bit(8) as usize, imm(1), true, true);
    }

    pub(super) fn decm(&mut self, ins: Ins) {
        self.acc_arith(ins.base.bit(8) as usize, imm(1 << 16), true, true);
    }

    pub(super) fn mov(&mut self, ins: Ins) {
        let d = ins.base.bit(8) as usize;
        let value = self.read(LogicalReg::acc(1 - d), true);
        self.acc_move(d, value);
    }

    pub(super) fn movax(&mut self, ins: Ins) {
        let d = ins.base.bit(8) as usize;
        let s = ins.base.bit(9) as usize;

        let value = self.read(LogicalReg::ax(s), true);
        self.acc_move(d, value);
    }

    pub(super) fn movr(&mut self, ins: Ins) {
        let d = ins.base.bit(8) as usize;
        let s = ins.base.bits(9, 11);

        let value = self.read(reg(0x18 + s), true);
        self.em.alu(AluOp::Shl, value, value, Operand::Imm(16));
        self.acc_move(d, value);
    }

    pub(super) fn clr(&mut self, ins: Ins) {
        let d = ins.base.bit(11) as usize;

        let value = self.scratch();
        self.em.imm(value, 0);
        self.acc_move(d, value);
    }

    pub(super) fn tst(&mut self, ins: Ins) {
        let r = ins.base.bit(11) as usize;

        let value = self.read(LogicalReg::acc(r), true);
        self.flags(FlagOp::Move, value, Operand::Imm(0), value);
        self.free(value);
    }

    /// `lsl` and `asl`, which only differ in the assembler.
    pub(super) fn shift_left(&mut self, ins: Ins) {
        let r = ins.base.bit(8) as usize;
        let shift = ins.base.bits(0, 6) as u64;

        let value = self.read(LogicalReg::acc(r), true);
        self.em.alu(AluOp::Shl, value, value, Operand::Imm(shift));
        self.acc_move(r, value);
    }

    pub(super) fn lsr(&mut self, ins: Ins) {
        let r = ins.base.bit(8) as usize;
        let shift = (64 - ins.base.bits(0, 6) as u64) % 64;

        let value = self.read(LogicalReg::acc(r), true);
        self.em.alu(AluOp::And, value, value, Operand::Imm(MASK_40));
        self.em.alu(AluOp::Shr, value, value, Operand::Imm(shift));
        self.acc_move(r, value);
    }

    pub(super) fn asr(&mut self, ins: Ins) {
        let r = ins.base.bit(8) as usize;
        let shift = (64 - ins.base.bits(0, 6) as u64) % 64;

        let value = self.read(LogicalReg::acc(r), true);
        self.em.alu(AluOp::Sar, value, value, Operand::Imm(shift));
        self.acc_move(r, value);
    }
}
