use crate::{
    Dsp, Host, Ins,
    alu::{add_to_addr_reg, sub_from_addr_reg},
    regs::Reg,
};
use bitos::BitUtils;

impl Dsp {
    #[inline(always)]
    pub(super) fn ar_inc(&mut self, r: usize) {
        let (ar, wr) = (self.regs.addressing[r], self.regs.wrapping[r]);
        self.regs.addressing[r] = add_to_addr_reg(ar, wr, 1);
    }

    #[inline(always)]
    pub(super) fn ar_dec(&mut self, r: usize) {
        let (ar, wr) = (self.regs.addressing[r], self.regs.wrapping[r]);
        self.regs.addressing[r] = sub_from_addr_reg(ar, wr, 1);
    }

    /// Adds `ixR` to `arR`.
    #[inline(always)]
    pub(super) fn ar_add_ix(&mut self, r: usize) {
        let (ar, wr) = (self.regs.addressing[r], self.regs.wrapping[r]);
        let ix = self.regs.indexing[r];
        self.regs.addressing[r] = add_to_addr_reg(ar, wr, ix as i16);
    }

    /// Address of a short memory access: the low byte of `config` selects the page.
    #[inline(always)]
    fn short_addr(&self, imm: u16) -> u16 {
        ((self.regs.config & 0xFF) << 8) | (imm & 0xFF)
    }

    pub(super) fn dar(&mut self, _: &mut dyn Host, ins: Ins) {
        self.ar_dec(ins.base.bits(0, 2) as usize);
    }

    pub(super) fn iar(&mut self, _: &mut dyn Host, ins: Ins) {
        self.ar_inc(ins.base.bits(0, 2) as usize);
    }

    pub(super) fn addarn(&mut self, _: &mut dyn Host, ins: Ins) {
        let d = ins.base.bits(0, 2) as usize;
        let s = ins.base.bits(2, 4) as usize;

        let (ar, wr) = (self.regs.addressing[d], self.regs.wrapping[d]);
        let ix = self.regs.indexing[s];
        self.regs.addressing[d] = add_to_addr_reg(ar, wr, ix as i16);
    }

    pub(super) fn subarn(&mut self, _: &mut dyn Host, ins: Ins) {
        let d = ins.base.bits(0, 2) as usize;

        let (ar, wr) = (self.regs.addressing[d], self.regs.wrapping[d]);
        let ix = self.regs.indexing[d];
        self.regs.addressing[d] = sub_from_addr_reg(ar, wr, ix as i16);
    }

    pub(super) fn lr(&mut self, host: &mut dyn Host, ins: Ins) {
        let d = ins.base.bits(0, 5) as u8;
        let data = self.read_dmem(host, ins.extra);
        self.regs.op_write(Reg::new(d), data);
    }

    pub(super) fn lri(&mut self, _: &mut dyn Host, ins: Ins) {
        let d = ins.base.bits(0, 5) as u8;
        self.regs.op_write(Reg::new(d), ins.extra);
    }

    pub(super) fn lris(&mut self, _: &mut dyn Host, ins: Ins) {
        let d = ins.base.bits(8, 11) as u8;
        let imm = ins.base.bits(0, 8) as u8 as i8 as i16;
        self.regs.op_write(Reg::new(0x18 + d), imm as u16);
    }

    pub(super) fn lrs(&mut self, host: &mut dyn Host, ins: Ins) {
        let d = ins.base.bits(8, 11) as u8;
        let addr = self.short_addr(ins.base);

        let data = self.read_dmem(host, addr);
        self.regs.op_write(Reg::new(0x18 + d), data);
    }

    fn lrr_common(&mut self, host: &mut dyn Host, ins: Ins, update: fn(&mut Self, usize)) {
        let d = ins.base.bits(0, 5) as u8;
        let s = ins.base.bits(5, 7) as usize;

        let data = self.read_dmem(host, self.regs.addressing[s]);
        update(self, s);
        self.regs.op_write(Reg::new(d), data);
    }

    pub(super) fn lrr(&mut self, host: &mut dyn Host, ins: Ins) {
        self.lrr_common(host, ins, |_, _| ());
    }

    pub(super) fn lrrd(&mut self, host: &mut dyn Host, ins: Ins) {
        self.lrr_common(host, ins, Self::ar_dec);
    }

    pub(super) fn lrri(&mut self, host: &mut dyn Host, ins: Ins) {
        self.lrr_common(host, ins, Self::ar_inc);
    }

    pub(super) fn lrrn(&mut self, host: &mut dyn Host, ins: Ins) {
        self.lrr_common(host, ins, Self::ar_add_ix);
    }

    fn ilrr_common(&mut self, ins: Ins, update: fn(&mut Self, usize)) {
        let s = ins.base.bits(0, 2) as usize;
        let d = if ins.base.bit(8) { Reg::Acm1 } else { Reg::Acm0 };

        let data = self.read_imem(self.regs.addressing[s]);
        self.regs.op_write(d, data);
        update(self, s);
    }

    pub(super) fn ilrr(&mut self, _: &mut dyn Host, ins: Ins) {
        self.ilrr_common(ins, |_, _| ());
    }

    pub(super) fn ilrrd(&mut self, _: &mut dyn Host, ins: Ins) {
        self.ilrr_common(ins, Self::ar_dec);
    }

    pub(super) fn ilrri(&mut self, _: &mut dyn Host, ins: Ins) {
        self.ilrr_common(ins, Self::ar_inc);
    }

    pub(super) fn ilrrn(&mut self, _: &mut dyn Host, ins: Ins) {
        self.ilrr_common(ins, Self::ar_add_ix);
    }

    pub(super) fn si(&mut self, host: &mut dyn Host, ins: Ins) {
        let addr = 0xFF00 | ins.base.bits(0, 8);
        self.write_dmem(host, addr, ins.extra);
    }

    pub(super) fn sr(&mut self, host: &mut dyn Host, ins: Ins) {
        let s = ins.base.bits(0, 5) as u8;
        let data = self.regs.op_read(Reg::new(s));
        self.write_dmem(host, ins.extra, data);
    }

    pub(super) fn srs(&mut self, host: &mut dyn Host, ins: Ins) {
        let s = ins.base.bits(8, 10) as u8;
        let addr = self.short_addr(ins.base);

        let data = self.regs.get(Reg::new(0x1C + s));
        self.write_dmem(host, addr, data);
    }

    pub(super) fn srsh(&mut self, host: &mut dyn Host, ins: Ins) {
        let s = ins.base.bit(8) as usize;
        let addr = self.short_addr(ins.base);

        let data = self.regs.acc40[s].high;
        self.write_dmem(host, addr, data);
    }

    fn srr_common(&mut self, host: &mut dyn Host, ins: Ins, update: fn(&mut Self, usize)) {
        let s = ins.base.bits(0, 5) as u8;
        let d = ins.base.bits(5, 7) as usize;

        let data = self.regs.op_read(Reg::new(s));
        self.write_dmem(host, self.regs.addressing[d], data);
        update(self, d);
    }

    pub(super) fn srr(&mut self, host: &mut dyn Host, ins: Ins) {
        self.srr_common(host, ins, |_, _| ());
    }

    pub(super) fn srrd(&mut self, host: &mut dyn Host, ins: Ins) {
        self.srr_common(host, ins, Self::ar_dec);
    }

    pub(super) fn srri(&mut self, host: &mut dyn Host, ins: Ins) {
        self.srr_common(host, ins, Self::ar_inc);
    }

    pub(super) fn srrn(&mut self, host: &mut dyn Host, ins: Ins) {
        self.srr_common(host, ins, Self::ar_add_ix);
    }

    pub(super) fn mrr(&mut self, _: &mut dyn Host, ins: Ins) {
        let s = ins.base.bits(0, 5) as u8;
        let d = ins.base.bits(5, 10) as u8;

        let data = self.regs.op_read(Reg::new(s));
        self.regs.op_write(Reg::new(d), data);
    }
}

#[cfg(test)]
mod test {
    use crate::{Dsp, Ins, RamHost, hw::ifx, regs::StackId};

    fn run(dsp: &mut Dsp, host: &mut RamHost, words: &[u16]) {
        let ins = Ins::from_words(words).unwrap();
        dsp.regs.pc = ins.decoded().len();
        dsp.execute(host, ins);
    }

    #[test]
    fn lrri_wraps_address() {
        let mut dsp = Dsp::new().unwrap();
        let mut host = RamHost::new(0, 0);
        dsp.mem.dram[0x13] = 0xBEEF;
        dsp.regs.addressing[1] = 0x13;
        dsp.regs.wrapping[1] = 0x3;

        // lrri $ac0.m, @$ar1
        run(&mut dsp, &mut host, &[0x193E]);
        assert_eq!(dsp.regs.acc40[0].mid, 0xBEEF);
        assert_eq!(dsp.regs.addressing[1], 0x10);
    }

    #[test]
    fn short_accesses_use_config_page() {
        let mut dsp = Dsp::new().unwrap();
        let mut host = RamHost::new(0, 0);
        dsp.regs.config = 0x0010;
        dsp.mem.coef[0x42] = 0x1234;

        // lrs $ax1.h, @0x42
        run(&mut dsp, &mut host, &[0x2342]);
        assert_eq!(dsp.regs.acc32[1] >> 16, 0x1234);

        // srs @0x10, $ac0.m
        dsp.regs.config = 0x0000;
        dsp.regs.acc40[0].mid = 0x5678;
        run(&mut dsp, &mut host, &[0x2E10]);
        assert_eq!(dsp.mem.dram[0x10], 0x5678);

        // srsh @0x11, $ac1.h
        dsp.regs.acc40[1].set(-1);
        run(&mut dsp, &mut host, &[0x2911]);
        assert_eq!(dsp.mem.dram[0x11], 0xFFFF);
    }

    #[test]
    fn si_reaches_mailbox() {
        let mut dsp = Dsp::new().unwrap();
        let mut host = RamHost::new(0, 0);

        // si @DMBH, #0x8000
        run(&mut dsp, &mut host, &[0x1600 | ifx::DMBH as u16, 0x8000]);
        // si @DMBL, #0x0001
        run(&mut dsp, &mut host, &[0x1600 | ifx::DMBL as u16, 0x0001]);

        assert_eq!(dsp.hw.shared().dsp_mailbox.take(), Some(0x0000_0001));
    }

    #[test]
    fn mrr_pops_and_pushes_stacks() {
        let mut dsp = Dsp::new().unwrap();
        let mut host = RamHost::new(0, 0);
        dsp.regs.push(StackId::Data, 0x0042);

        // mrr $st0, $st1
        run(&mut dsp, &mut host, &[0x1D8D]);
        assert!(dsp.regs.stack(StackId::Data).is_empty());
        assert_eq!(dsp.regs.stack(StackId::Call).top(), Some(0x0042));
    }

    #[test]
    fn ilrr_loads_from_instruction_memory() {
        let mut dsp = Dsp::new().unwrap();
        let mut host = RamHost::new(0, 0);
        dsp.mem.irom[0x20] = 0x0ABC;
        dsp.regs.addressing[2] = 0x8020;

        // ilrrd $ac1.m, @$ar2
        run(&mut dsp, &mut host, &[0x0316]);
        assert_eq!(dsp.regs.acc40[1].mid, 0x0ABC);
        assert_eq!(dsp.regs.addressing[2], 0x801F);
    }
}
