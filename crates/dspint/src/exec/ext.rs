//! Extension opcodes. They run after the main operation but read their operands from `regs`,
//! the registers as they were before it.
use crate::{
    Dsp, Host, Ins,
    alu::{add_to_addr_reg, sub_from_addr_reg},
    regs::{Reg, Registers},
};
use bitos::BitUtils;

impl Dsp {
    /// Steps `arR` from its value in `regs`, by `ixR` if `by_ix` is set and by one otherwise.
    #[inline(always)]
    fn ext_step(&mut self, regs: &Registers, r: usize, by_ix: bool) {
        let step = if by_ix { regs.indexing[r] as i16 } else { 1 };
        self.regs.addressing[r] = add_to_addr_reg(regs.addressing[r], regs.wrapping[r], step);
    }

    pub(super) fn ext_dr(&mut self, ins: Ins, regs: &Registers) {
        let r = ins.base.bits(0, 2) as usize;
        self.regs.addressing[r] = sub_from_addr_reg(regs.addressing[r], regs.wrapping[r], 1);
    }

    pub(super) fn ext_ir(&mut self, ins: Ins, regs: &Registers) {
        self.ext_step(regs, ins.base.bits(0, 2) as usize, false);
    }

    pub(super) fn ext_nr(&mut self, ins: Ins, regs: &Registers) {
        self.ext_step(regs, ins.base.bits(0, 2) as usize, true);
    }

    pub(super) fn ext_mv(&mut self, ins: Ins, regs: &Registers) {
        let s = ins.base.bits(0, 2) as u8;
        let d = ins.base.bits(2, 4) as u8;

        self.regs
            .set(Reg::new(0x18 + d), regs.get(Reg::new(0x1C + s)));
    }

    fn ext_load(&mut self, host: &mut dyn Host, ins: Ins, regs: &Registers, by_ix: bool) {
        let s = ins.base.bits(0, 2) as usize;
        let d = ins.base.bits(3, 6) as u8;

        let data = self.read_dmem(host, regs.addressing[s]);
        self.regs.op_write(Reg::new(0x18 + d), data);
        self.ext_step(regs, s, by_ix);
    }

    pub(super) fn ext_l(&mut self, host: &mut dyn Host, ins: Ins, regs: &Registers) {
        self.ext_load(host, ins, regs, false);
    }

    pub(super) fn ext_ln(&mut self, host: &mut dyn Host, ins: Ins, regs: &Registers) {
        self.ext_load(host, ins, regs, true);
    }

    fn ext_store(&mut self, host: &mut dyn Host, ins: Ins, regs: &Registers, by_ix: bool) {
        let d = ins.base.bits(0, 2) as usize;
        let s = ins.base.bits(3, 5) as u8;

        let data = regs.get(Reg::new(0x1C + s));
        self.write_dmem(host, regs.addressing[d], data);
        self.ext_step(regs, d, by_ix);
    }

    pub(super) fn ext_s(&mut self, host: &mut dyn Host, ins: Ins, regs: &Registers) {
        self.ext_store(host, ins, regs, false);
    }

    pub(super) fn ext_sn(&mut self, host: &mut dyn Host, ins: Ins, regs: &Registers) {
        self.ext_store(host, ins, regs, true);
    }

    /// Stores `acS.m` through one of `ar0`/`ar3` and loads an AX half through the other. With
    /// `store_ar0` unset the store goes through `ar3`.
    fn ext_load_store(
        &mut self,
        host: &mut dyn Host,
        ins: Ins,
        regs: &Registers,
        store_ar0: bool,
        ix0: bool,
        ix3: bool,
    ) {
        let s = ins.base.bit(0) as u8;
        let d = ins.base.bits(4, 6) as u8;
        let (load_ar, store_ar) = if store_ar0 {
            (regs.addressing[3], regs.addressing[0])
        } else {
            (regs.addressing[0], regs.addressing[3])
        };

        let data = regs.get(Reg::new(0x1E + s));
        self.write_dmem(host, store_ar, data);

        let data = self.read_dmem(host, load_ar);
        self.regs.set(Reg::new(0x18 + d), data);

        self.ext_step(regs, 0, ix0);
        self.ext_step(regs, 3, ix3);
    }

    pub(super) fn ext_ls(&mut self, host: &mut dyn Host, ins: Ins, regs: &Registers) {
        self.ext_load_store(host, ins, regs, false, false, false);
    }

    pub(super) fn ext_sl(&mut self, host: &mut dyn Host, ins: Ins, regs: &Registers) {
        self.ext_load_store(host, ins, regs, true, false, false);
    }

    pub(super) fn ext_lsn(&mut self, host: &mut dyn Host, ins: Ins, regs: &Registers) {
        self.ext_load_store(host, ins, regs, false, true, false);
    }

    pub(super) fn ext_sln(&mut self, host: &mut dyn Host, ins: Ins, regs: &Registers) {
        self.ext_load_store(host, ins, regs, true, true, false);
    }

    pub(super) fn ext_lsm(&mut self, host: &mut dyn Host, ins: Ins, regs: &Registers) {
        self.ext_load_store(host, ins, regs, false, false, true);
    }

    pub(super) fn ext_slm(&mut self, host: &mut dyn Host, ins: Ins, regs: &Registers) {
        self.ext_load_store(host, ins, regs, true, false, true);
    }

    pub(super) fn ext_lsnm(&mut self, host: &mut dyn Host, ins: Ins, regs: &Registers) {
        self.ext_load_store(host, ins, regs, false, true, true);
    }

    pub(super) fn ext_slnm(&mut self, host: &mut dyn Host, ins: Ins, regs: &Registers) {
        self.ext_load_store(host, ins, regs, true, true, true);
    }

    /// Second address of a dual load: `arS` again if it shares a 1K bank with `ar3`.
    #[inline(always)]
    fn dual_load_addr(regs: &Registers, s: usize) -> u16 {
        if (regs.addressing[3] >> 10) == (regs.addressing[s] >> 10) {
            regs.addressing[s]
        } else {
            regs.addressing[3]
        }
    }

    fn ext_load_dual(
        &mut self,
        host: &mut dyn Host,
        ins: Ins,
        regs: &Registers,
        ix_s: bool,
        ix3: bool,
    ) {
        let s = ins.base.bits(0, 2) as usize;
        if s == 3 {
            self.ext_load_ax(host, ins, regs, ix_s, ix3);
            return;
        }

        let r = if ins.base.bit(4) { Reg::Axh1 } else { Reg::Axl1 };
        let d = if ins.base.bit(5) { Reg::Axh0 } else { Reg::Axl0 };

        let data = self.read_dmem(host, regs.addressing[s]);
        self.regs.set(d, data);

        let data = self.read_dmem(host, Self::dual_load_addr(regs, s));
        self.regs.set(r, data);

        self.ext_step(regs, s, ix_s);
        self.ext_step(regs, 3, ix3);
    }

    /// `ldax`: loads a whole AX register, high half through `arS`.
    fn ext_load_ax(
        &mut self,
        host: &mut dyn Host,
        ins: Ins,
        regs: &Registers,
        ix_s: bool,
        ix3: bool,
    ) {
        let s = ins.base.bit(5) as usize;
        let r = ins.base.bit(4) as usize;

        let high = self.read_dmem(host, regs.addressing[s]);
        let low = self.read_dmem(host, Self::dual_load_addr(regs, s));
        self.regs.acc32[r] = (((high as u32) << 16) | low as u32) as i32;

        self.ext_step(regs, s, ix_s);
        self.ext_step(regs, 3, ix3);
    }

    pub(super) fn ext_ld(&mut self, host: &mut dyn Host, ins: Ins, regs: &Registers) {
        self.ext_load_dual(host, ins, regs, false, false);
    }

    pub(super) fn ext_ldn(&mut self, host: &mut dyn Host, ins: Ins, regs: &Registers) {
        self.ext_load_dual(host, ins, regs, true, false);
    }

    pub(super) fn ext_ldm(&mut self, host: &mut dyn Host, ins: Ins, regs: &Registers) {
        self.ext_load_dual(host, ins, regs, false, true);
    }

    pub(super) fn ext_ldnm(&mut self, host: &mut dyn Host, ins: Ins, regs: &Registers) {
        self.ext_load_dual(host, ins, regs, true, true);
    }
}
