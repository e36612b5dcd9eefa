use super::{BlockBuilder, acm, axh};
use crate::{
    emitter::{AluOp, FlagOp, Operand},
    host::HostReg,
    regcache::LogicalReg,
};
use bitos::BitUtils;
use dspint::{Ins, Reg};

/// Status register bits.
pub(super) const LOGIC_ZERO: u8 = 6;
pub(super) const DONT_DOUBLE_RESULT: u8 = 13;
pub(super) const SIGN_EXTEND_TO_40: u8 = 14;
pub(super) const UNSIGNED_MUL: u8 = 15;

impl BlockBuilder<'_> {
    /// Replaces the middle word of `acc[d]` with `mid` and updates the logic flags. Frees `mid`.
    fn acc_logic(&mut self, d: usize, mid: HostReg) {
        self.write(acm(d), mid);

        let value = self.read(LogicalReg::acc(d), true);
        self.flags(FlagOp::Logic, mid, Operand::Imm(0), value);

        self.free(value);
        self.free(mid);
    }

    /// `andi`, `ori` and `xori`.
    pub(super) fn logic_imm(&mut self, ins: Ins, op: AluOp) {
        let d = ins.base.bit(8) as usize;

        let mid = self.read(acm(d), false);
        self.em.alu(op, mid, mid, Operand::Imm(ins.extra as u64));
        self.acc_logic(d, mid);
    }

    /// `andc`, `orc` and `xorc`: the other accumulator's middle word.
    pub(super) fn logic_acc(&mut self, ins: Ins, op: AluOp) {
        let d = ins.base.bit(8) as usize;

        let mid = self.read(acm(d), false);
        let rhs = self.read(acm(1 - d), false);
        self.em.alu(op, mid, mid, rhs.into());
        self.free(rhs);
        self.acc_logic(d, mid);
    }

    /// `andr`, `orr` and `xorr`: the high half of an AX register.
    pub(super) fn logic_ax(&mut self, ins: Ins, op: AluOp) {
        let d = ins.base.bit(8) as usize;
        let s = ins.base.bit(9) as usize;

        let mid = self.read(acm(d), false);
        let rhs = self.read(axh(s), false);
        self.em.alu(op, mid, mid, rhs.into());
        self.free(rhs);
        self.acc_logic(d, mid);
    }

    pub(super) fn not(&mut self, ins: Ins) {
        let d = ins.base.bit(8) as usize;

        let mid = self.read(acm(d), false);
        self.em.alu(AluOp::Xor, mid, mid, Operand::Imm(0xFFFF));
        self.acc_logic(d, mid);
    }

    /// `andf` and `andcf`. Only the logic zero flag changes.
    pub(super) fn test_mask(&mut self, ins: Ins, complement: bool) {
        let d = ins.base.bit(8) as usize;
        let mask = ins.extra as u64;

        let bit = self.read(acm(d), false);
        self.em.alu(AluOp::And, bit, bit, Operand::Imm(mask));
        let expected = if complement { mask } else { 0 };
        self.em.alu(AluOp::Eq, bit, bit, Operand::Imm(expected));
        self.em.alu(AluOp::Shl, bit, bit, Operand::Imm(LOGIC_ZERO as u64));

        let sr = self.cache.acquire(&mut self.em, Reg::Sr.into(), true);
        self.em
            .alu(AluOp::And, sr, sr, Operand::Imm(!(1u64 << LOGIC_ZERO)));
        self.em.alu(AluOp::Or, sr, sr, bit.into());
        self.cache.release(&mut self.em, Reg::Sr.into(), true);

        self.free(bit);
    }

    /// Sets or clears bit `bit` of the status register.
    pub(super) fn status_bit(&mut self, bit: u8, value: bool) {
        let sr = self.cache.acquire(&mut self.em, Reg::Sr.into(), true);
        if value {
            self.em.alu(AluOp::Or, sr, sr, Operand::Imm(1 << bit));
        } else {
            self.em.alu(AluOp::And, sr, sr, Operand::Imm(!(1u64 << bit)));
        }
        self.cache.release(&mut self.em, Reg::Sr.into(), true);
    }

    pub(super) fn sbset(&mut self, ins: Ins) {
        let bit = 6 + ins.base.bits(0, 3) as u8;
        if bit != DONT_DOUBLE_RESULT && bit != 8 {
            self.status_bit(bit, true);
        }
    }

    pub(super) fn sbclr(&mut self, ins: Ins) {
        let bit = 6 + ins.base.bits(0, 3) as u8;
        if bit != DONT_DOUBLE_RESULT {
            self.status_bit(bit, false);
        }
    }
}
