use crate::{
    Dsp, Host, Ins,
    alu::{add_carried, add_overflowed, round_40, sub_carried, sub_overflowed},
    regs::{Acc40, Reg},
};
use bitos::BitUtils;

impl Dsp {
    /// Stores `lhs + rhs` into accumulator `d` and updates the flags.
    #[inline(always)]
    fn acc_add(&mut self, d: usize, lhs: i64, rhs: i64) {
        let new = self.regs.acc40[d].set(lhs + rhs);
        self.regs
            .status
            .set_arith(add_carried(lhs, new), add_overflowed(lhs, rhs, new), new);
    }

    /// Stores `lhs - rhs` into accumulator `d` and updates the flags.
    #[inline(always)]
    fn acc_sub(&mut self, d: usize, lhs: i64, rhs: i64) {
        let new = self.regs.acc40[d].set(lhs - rhs);
        self.regs
            .status
            .set_arith(sub_carried(lhs, new), sub_overflowed(lhs, rhs, new), new);
    }

    /// Updates the flags as if `lhs - rhs` was computed.
    #[inline(always)]
    fn acc_cmp(&mut self, lhs: i64, rhs: i64) {
        let diff = Acc40::from(lhs - rhs).get();
        self.regs
            .status
            .set_arith(sub_carried(lhs, diff), sub_overflowed(lhs, rhs, diff), diff);
    }

    /// Stores `value` into accumulator `d`, clearing carry and overflow.
    #[inline(always)]
    pub(super) fn acc_move(&mut self, d: usize, value: i64) {
        let new = self.regs.acc40[d].set(value);
        self.regs.status.set_arith(false, false, new);
    }

    pub(super) fn abs(&mut self, _: &mut dyn Host, ins: Ins) {
        let d = ins.base.bit(11) as usize;

        let old = self.regs.acc40[d].get();
        let new = self.regs.acc40[d].set(old.abs());
        self.regs.status.set_arith(false, new == Acc40::MIN, new);
    }

    pub(super) fn add(&mut self, _: &mut dyn Host, ins: Ins) {
        let d = ins.base.bit(8) as usize;

        let lhs = self.regs.acc40[d].get();
        let rhs = self.regs.acc40[1 - d].get();
        self.acc_add(d, lhs, rhs);
    }

    pub(super) fn addax(&mut self, _: &mut dyn Host, ins: Ins) {
        let d = ins.base.bit(8) as usize;
        let s = ins.base.bit(9) as usize;

        let lhs = self.regs.acc40[d].get();
        let rhs = self.regs.acc32[s] as i64;
        self.acc_add(d, lhs, rhs);
    }

    pub(super) fn addaxl(&mut self, _: &mut dyn Host, ins: Ins) {
        let d = ins.base.bit(8) as usize;
        let s = ins.base.bit(9) as usize;

        let lhs = self.regs.acc40[d].get();
        let rhs = self.regs.acc32[s] as u16 as i64;
        self.acc_add(d, lhs, rhs);
    }

    pub(super) fn addi(&mut self, _: &mut dyn Host, ins: Ins) {
        let d = ins.base.bit(8) as usize;

        let lhs = self.regs.acc40[d].get();
        let rhs = (ins.extra as i16 as i64) << 16;
        self.acc_add(d, lhs, rhs);
    }

    pub(super) fn addis(&mut self, _: &mut dyn Host, ins: Ins) {
        let d = ins.base.bit(8) as usize;

        let lhs = self.regs.acc40[d].get();
        let rhs = (ins.base as u8 as i8 as i64) << 16;
        self.acc_add(d, lhs, rhs);
    }

    pub(super) fn addp(&mut self, _: &mut dyn Host, ins: Ins) {
        let d = ins.base.bit(8) as usize;

        let lhs = self.regs.acc40[d].get();
        let (carry, overflow, rhs) = self.regs.product.get();
        let new = self.regs.acc40[d].set(lhs + rhs);

        self.regs.status.set_arith(
            add_carried(lhs, new) || carry,
            add_overflowed(lhs, rhs, new) ^ overflow,
            new,
        );
    }

    pub(super) fn addpaxz(&mut self, _: &mut dyn Host, ins: Ins) {
        let d = ins.base.bit(8) as usize;
        let s = ins.base.bit(9) as usize;

        let (carry, overflow, prod) = self.regs.product.get();
        let lhs = round_40(prod);
        let rhs = self.regs.acc32[s] as i64;
        let new = self.regs.acc40[d].set((lhs + rhs) & !0xFFFF);

        self.regs.status.set_arith(
            add_carried(lhs, new) ^ carry,
            add_overflowed(lhs, rhs, new) ^ overflow,
            new,
        );
    }

    pub(super) fn addr(&mut self, _: &mut dyn Host, ins: Ins) {
        let d = ins.base.bit(8) as usize;
        let s = ins.base.bits(9, 11) as u8;

        let lhs = self.regs.acc40[d].get();
        let rhs = (self.regs.get(Reg::new(0x18 + s)) as i16 as i64) << 16;
        self.acc_add(d, lhs, rhs);
    }

    pub(super) fn inc(&mut self, _: &mut dyn Host, ins: Ins) {
        let d = ins.base.bit(8) as usize;

        let lhs = self.regs.acc40[d].get();
        self.acc_add(d, lhs, 1);
    }

    pub(super) fn incm(&mut self, _: &mut dyn Host, ins: Ins) {
        let d = ins.base.bit(8) as usize;

        let lhs = self.regs.acc40[d].get();
        self.acc_add(d, lhs, 1 << 16);
    }

    pub(super) fn sub(&mut self, _: &mut dyn Host, ins: Ins) {
        let d = ins.base.bit(8) as usize;

        let lhs = self.regs.acc40[d].get();
        let rhs = self.regs.acc40[1 - d].get();
        self.acc_sub(d, lhs, rhs);
    }

    pub(super) fn subax(&mut self, _: &mut dyn Host, ins: Ins) {
        let d = ins.base.bit(8) as usize;
        let s = ins.base.bit(9) as usize;

        let lhs = self.regs.acc40[d].get();
        let rhs = self.regs.acc32[s] as i64;
        self.acc_sub(d, lhs, rhs);
    }

    pub(super) fn subp(&mut self, _: &mut dyn Host, ins: Ins) {
        let d = ins.base.bit(8) as usize;

        let lhs = self.regs.acc40[d].get();
        let (carry, overflow, rhs) = self.regs.product.get();
        let new = self.regs.acc40[d].set(lhs - rhs);

        self.regs.status.set_arith(
            sub_carried(lhs, new) ^ !carry,
            sub_overflowed(lhs, rhs, new) ^ overflow,
            new,
        );
    }

    pub(super) fn subr(&mut self, _: &mut dyn Host, ins: Ins) {
        let d = ins.base.bit(8) as usize;
        let s = ins.base.bits(9, 11) as u8;

        let lhs = self.regs.acc40[d].get();
        let rhs = (self.regs.get(Reg::new(0x18 + s)) as i16 as i64) << 16;
        self.acc_sub(d, lhs, rhs);
    }

    pub(super) fn dec(&mut self, _: &mut dyn Host, ins: Ins) {
        let d = ins.base.bit(8) as usize;

        let old = self.regs.acc40[d].get();
        let new = self.regs.acc40[d].set(old - 1);
        self.regs
            .status
            .set_arith(sub_carried(old, new), add_overflowed(old, -1, new), new);
    }

    pub(super) fn decm(&mut self, _: &mut dyn Host, ins: Ins) {
        let d = ins.base.bit(8) as usize;

        let old = self.regs.acc40[d].get();
        let new = self.regs.acc40[d].set(old - (1 << 16));
        self.regs.status.set_arith(
            sub_carried(old, new),
            add_overflowed(old, -(1 << 16), new),
            new,
        );
    }

    pub(super) fn neg(&mut self, _: &mut dyn Host, ins: Ins) {
        let d = ins.base.bit(8) as usize;

        let old = self.regs.acc40[d].get();
        let new = self.regs.acc40[d].set(-old);
        self.regs.status.set_arith(old == 0, old == Acc40::MIN, new);
    }

    pub(super) fn cmp(&mut self, _: &mut dyn Host, _: Ins) {
        let lhs = self.regs.acc40[0].get();
        let rhs = self.regs.acc40[1].get();
        self.acc_cmp(lhs, rhs);
    }

    pub(super) fn cmpaxh(&mut self, _: &mut dyn Host, ins: Ins) {
        let s = ins.base.bit(11) as usize;
        let r = ins.base.bit(12) as usize;

        let lhs = self.regs.acc40[s].get();
        let rhs = ((self.regs.acc32[r] as i64) >> 16) << 16;
        self.acc_cmp(lhs, rhs);
    }

    pub(super) fn cmpi(&mut self, _: &mut dyn Host, ins: Ins) {
        let d = ins.base.bit(8) as usize;

        let lhs = self.regs.acc40[d].get();
        let rhs = (ins.extra as i16 as i64) << 16;
        self.acc_cmp(lhs, rhs);
    }

    pub(super) fn cmpis(&mut self, _: &mut dyn Host, ins: Ins) {
        let d = ins.base.bit(8) as usize;

        let lhs = self.regs.acc40[d].get();
        let rhs = (ins.base as u8 as i8 as i64) << 16;
        self.acc_cmp(lhs, rhs);
    }

    pub(super) fn clr(&mut self, _: &mut dyn Host, ins: Ins) {
        let d = ins.base.bit(11) as usize;
        self.acc_move(d, 0);
    }

    pub(super) fn clrl(&mut self, _: &mut dyn Host, ins: Ins) {
        let d = ins.base.bit(8) as usize;

        let old = self.regs.acc40[d].get();
        self.acc_move(d, round_40(old));
    }

    pub(super) fn clrp(&mut self, _: &mut dyn Host, _: Ins) {
        self.regs.product.low = 0x0000;
        self.regs.product.mid1 = 0xFFF0;
        self.regs.product.mid2 = 0x0010;
        self.regs.product.high = 0x00FF;
    }

    pub(super) fn mov(&mut self, _: &mut dyn Host, ins: Ins) {
        let d = ins.base.bit(8) as usize;

        let value = self.regs.acc40[1 - d].get();
        self.acc_move(d, value);
    }

    pub(super) fn movax(&mut self, _: &mut dyn Host, ins: Ins) {
        let d = ins.base.bit(8) as usize;
        let s = ins.base.bit(9) as usize;

        let value = self.regs.acc32[s] as i64;
        self.acc_move(d, value);
    }

    pub(super) fn movr(&mut self, _: &mut dyn Host, ins: Ins) {
        let d = ins.base.bit(8) as usize;
        let s = ins.base.bits(9, 11) as u8;

        let value = self.regs.get(Reg::new(0x18 + s)) as i16 as i64;
        self.acc_move(d, value << 16);
    }

    pub(super) fn movp(&mut self, _: &mut dyn Host, ins: Ins) {
        let d = ins.base.bit(8) as usize;

        let (carry, overflow, prod) = self.regs.product.get();
        let new = self.regs.acc40[d].set(prod);
        self.regs.status.set_arith(carry, overflow, new);
    }

    pub(super) fn movnp(&mut self, _: &mut dyn Host, ins: Ins) {
        let d = ins.base.bit(8) as usize;

        let (carry, overflow, prod) = self.regs.product.get();
        let new = self.regs.acc40[d].set(-prod);
        self.regs
            .status
            .set_arith(prod != 0 && !carry, overflow, new);
    }

    pub(super) fn movpz(&mut self, _: &mut dyn Host, ins: Ins) {
        let d = ins.base.bit(8) as usize;

        let (carry, overflow, prod) = self.regs.product.get();
        let new = self.regs.acc40[d].set(round_40(prod));
        self.regs.status.set_arith(carry, overflow, new);
    }

    pub(super) fn tst(&mut self, _: &mut dyn Host, ins: Ins) {
        let r = ins.base.bit(11) as usize;

        let acc = self.regs.acc40[r].get();
        self.regs.status.set_arith(false, false, acc);
    }

    pub(super) fn tstaxh(&mut self, _: &mut dyn Host, ins: Ins) {
        let r = ins.base.bit(8) as usize;

        let high = self.regs.acc32[r] >> 16;
        self.regs.status.set_arith(false, false, high as i64);
        self.regs
            .status
            .set_top_two_bits_eq(high.bit(15) == high.bit(14));
    }

    pub(super) fn tstprod(&mut self, _: &mut dyn Host, _: Ins) {
        let (carry, overflow, prod) = self.regs.product.get();
        self.regs.status.set_arith(carry, overflow, prod);
    }
}

#[cfg(test)]
mod test {
    use crate::{Dsp, Ins, RamHost};

    fn run(dsp: &mut Dsp, words: &[u16]) {
        let mut host = RamHost::new(0, 0);
        let ins = Ins::from_words(words).unwrap();
        dsp.regs.pc = ins.decoded().len();
        dsp.execute(&mut host, ins);
    }

    #[test]
    fn add_sets_carry_and_overflow() {
        let mut dsp = Dsp::new().unwrap();
        dsp.regs.acc40[0].set(0x7F_FFFF_FFFF);
        dsp.regs.acc40[1].set(1);

        // add $ac0, $ac1
        run(&mut dsp, &[0x4C00]);
        assert_eq!(dsp.regs.acc40[0].get(), -0x80_0000_0000);
        assert!(dsp.regs.status.overflow());
        assert!(!dsp.regs.status.carry());
        assert!(dsp.regs.status.sign());
    }

    #[test]
    fn compare_leaves_accumulators() {
        let mut dsp = Dsp::new().unwrap();
        dsp.regs.acc40[0].set(5 << 16);

        // cmpi $ac0, #5
        run(&mut dsp, &[0x0280, 0x0005]);
        assert!(dsp.regs.status.arithmetic_zero());
        assert!(dsp.regs.status.carry());
        assert_eq!(dsp.regs.acc40[0].get(), 5 << 16);
    }

    #[test]
    fn clrp_sums_to_zero() {
        let mut dsp = Dsp::new().unwrap();
        dsp.regs.product.set(0x1234);

        // clrp
        run(&mut dsp, &[0x8400]);
        assert_eq!(dsp.regs.product.value(), 0);

        // movp $ac1
        run(&mut dsp, &[0x6F00]);
        assert_eq!(dsp.regs.acc40[1].get(), 0);
        assert!(dsp.regs.status.carry());
    }

    #[test]
    fn inc_and_neg() {
        let mut dsp = Dsp::new().unwrap();
        dsp.regs.acc40[1].set(-1);

        // inc $ac1
        run(&mut dsp, &[0x7700]);
        assert_eq!(dsp.regs.acc40[1].get(), 0);
        assert!(dsp.regs.status.arithmetic_zero());
        assert!(dsp.regs.status.carry());

        // neg $ac1
        run(&mut dsp, &[0x7D00]);
        assert_eq!(dsp.regs.acc40[1].get(), 0);
        assert!(dsp.regs.status.carry());
    }
}
