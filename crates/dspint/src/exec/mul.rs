use crate::{
    Dsp, Host, Ins,
    alu::{MultiplyMode, multiply, round_40},
    regs::Reg,
};
use bitos::BitUtils;

impl Dsp {
    #[inline(always)]
    fn mul_signed(&self, a: u16, b: u16) -> i64 {
        multiply(self.regs.status, MultiplyMode::Signed, a, b)
    }

    /// `ax.l * ax.h` of AX register `s`.
    #[inline(always)]
    fn mul_ax(&self, s: usize) -> i64 {
        let ax = self.regs.acc32[s];
        self.mul_signed(ax as u16, (ax >> 16) as u16)
    }

    /// `ac.m * ax.h` of accumulator `s` and AX register `t`.
    #[inline(always)]
    fn mul_acm_axh(&self, s: usize, t: usize) -> i64 {
        self.mul_signed(self.regs.acc40[s].mid, (self.regs.acc32[t] >> 16) as u16)
    }

    /// Product of the AX0/AX1 halves selected by `s` and `t`, in the signedness mode they
    /// imply.
    fn mul_x(&self, s: bool, t: bool) -> i64 {
        let lhs = if s {
            (self.regs.acc32[0] >> 16) as u16
        } else {
            self.regs.acc32[0] as u16
        };

        let rhs = if t {
            (self.regs.acc32[1] >> 16) as u16
        } else {
            self.regs.acc32[1] as u16
        };

        let (mode, lhs, rhs) = match (s, t) {
            (false, false) => (MultiplyMode::Unsigned, lhs, rhs),
            (false, true) => (MultiplyMode::Mixed, lhs, rhs),
            (true, false) => (MultiplyMode::Mixed, rhs, lhs),
            (true, true) => (MultiplyMode::Signed, lhs, rhs),
        };

        multiply(self.regs.status, mode, lhs, rhs)
    }

    /// Stores `value` into accumulator `r` and updates the flags of a multiply-and-move.
    #[inline(always)]
    fn mul_store_acc(&mut self, r: usize, value: i64) {
        let new = self.regs.acc40[r].set(value);
        self.regs.status.set_overflow(false);
        self.regs.status.set_result(new);
    }

    #[inline(always)]
    fn prod_accumulate(&mut self, value: i64) {
        let prod = self.regs.product.value();
        self.regs.product.set(prod + value);
    }

    pub(super) fn mul(&mut self, _: &mut dyn Host, ins: Ins) {
        let s = ins.base.bit(11) as usize;
        let result = self.mul_ax(s);
        self.regs.product.set(result);
    }

    pub(super) fn mulaxh(&mut self, _: &mut dyn Host, _: Ins) {
        let high = (self.regs.acc32[0] >> 16) as u16;
        let result = self.mul_signed(high, high);
        self.regs.product.set(result);
    }

    pub(super) fn mulac(&mut self, _: &mut dyn Host, ins: Ins) {
        let r = ins.base.bit(8) as usize;
        let s = ins.base.bit(11) as usize;

        let acc = self.regs.acc40[r].get() + self.regs.product.value();
        let result = self.mul_ax(s);
        self.regs.product.set(result);
        self.mul_store_acc(r, acc);
    }

    pub(super) fn mulmv(&mut self, _: &mut dyn Host, ins: Ins) {
        let r = ins.base.bit(8) as usize;
        let s = ins.base.bit(11) as usize;

        let prod = self.regs.product.value();
        let result = self.mul_ax(s);
        self.regs.product.set(result);
        self.mul_store_acc(r, prod);
    }

    pub(super) fn mulmvz(&mut self, _: &mut dyn Host, ins: Ins) {
        let r = ins.base.bit(8) as usize;
        let s = ins.base.bit(11) as usize;

        let prod = self.regs.product.value();
        let result = self.mul_ax(s);
        self.regs.product.set(result);
        self.mul_store_acc(r, round_40(prod));
    }

    pub(super) fn mulc(&mut self, _: &mut dyn Host, ins: Ins) {
        let t = ins.base.bit(11) as usize;
        let s = ins.base.bit(12) as usize;

        let result = self.mul_acm_axh(s, t);
        self.regs.product.set(result);
    }

    pub(super) fn mulcac(&mut self, _: &mut dyn Host, ins: Ins) {
        let r = ins.base.bit(8) as usize;
        let t = ins.base.bit(11) as usize;
        let s = ins.base.bit(12) as usize;

        let prod = self.regs.product.value();
        let result = self.mul_acm_axh(s, t);
        self.regs.product.set(result);

        let acc = self.regs.acc40[r].get();
        self.mul_store_acc(r, acc + prod);
    }

    pub(super) fn mulcmv(&mut self, _: &mut dyn Host, ins: Ins) {
        let r = ins.base.bit(8) as usize;
        let t = ins.base.bit(11) as usize;
        let s = ins.base.bit(12) as usize;

        let prod = self.regs.product.value();
        let result = self.mul_acm_axh(s, t);
        self.regs.product.set(result);
        self.mul_store_acc(r, prod);
    }

    pub(super) fn mulcmvz(&mut self, _: &mut dyn Host, ins: Ins) {
        let r = ins.base.bit(8) as usize;
        let t = ins.base.bit(11) as usize;
        let s = ins.base.bit(12) as usize;

        let prod = self.regs.product.value();
        let result = self.mul_acm_axh(s, t);
        self.regs.product.set(result);
        self.mul_store_acc(r, round_40(prod));
    }

    pub(super) fn mulx(&mut self, _: &mut dyn Host, ins: Ins) {
        let t = ins.base.bit(11);
        let s = ins.base.bit(12);

        let result = self.mul_x(s, t);
        self.regs.product.set(result);
    }

    pub(super) fn mulxac(&mut self, _: &mut dyn Host, ins: Ins) {
        let r = ins.base.bit(8) as usize;
        let t = ins.base.bit(11);
        let s = ins.base.bit(12);

        let acc = self.regs.acc40[r].get() + self.regs.product.value();
        self.regs.acc40[r].set(acc);

        let result = self.mul_x(s, t);
        self.regs.product.set(result);
    }

    pub(super) fn mulxmv(&mut self, _: &mut dyn Host, ins: Ins) {
        let r = ins.base.bit(8) as usize;
        let t = ins.base.bit(11);
        let s = ins.base.bit(12);

        let prod = self.regs.product.value();
        self.regs.acc40[r].set(prod);

        let result = self.mul_x(s, t);
        self.regs.product.set(result);
    }

    pub(super) fn mulxmvz(&mut self, _: &mut dyn Host, ins: Ins) {
        let r = ins.base.bit(8) as usize;
        let t = ins.base.bit(11);
        let s = ins.base.bit(12);

        let prod = self.regs.product.value();
        self.regs.acc40[r].set(round_40(prod));

        let result = self.mul_x(s, t);
        self.regs.product.set(result);
    }

    pub(super) fn madd(&mut self, _: &mut dyn Host, ins: Ins) {
        let s = ins.base.bit(8) as usize;
        let result = self.mul_ax(s);
        self.prod_accumulate(result);
    }

    pub(super) fn msub(&mut self, _: &mut dyn Host, ins: Ins) {
        let s = ins.base.bit(8) as usize;
        let result = self.mul_ax(s);
        self.prod_accumulate(-result);
    }

    pub(super) fn maddc(&mut self, _: &mut dyn Host, ins: Ins) {
        let t = ins.base.bit(8) as usize;
        let s = ins.base.bit(9) as usize;

        let result = self.mul_acm_axh(s, t);
        self.prod_accumulate(result);
    }

    pub(super) fn msubc(&mut self, _: &mut dyn Host, ins: Ins) {
        let t = ins.base.bit(8) as usize;
        let s = ins.base.bit(9) as usize;

        let result = self.mul_acm_axh(s, t);
        self.prod_accumulate(-result);
    }

    pub(super) fn maddx(&mut self, _: &mut dyn Host, ins: Ins) {
        let t = ins.base.bit(8) as u8;
        let s = ins.base.bit(9) as u8;

        let lhs = self.regs.get(Reg::new(0x18 + 2 * s));
        let rhs = self.regs.get(Reg::new(0x19 + 2 * t));
        let result = self.mul_signed(lhs, rhs);
        self.prod_accumulate(result);
    }

    pub(super) fn msubx(&mut self, _: &mut dyn Host, ins: Ins) {
        let t = ins.base.bit(8) as u8;
        let s = ins.base.bit(9) as u8;

        let lhs = self.regs.get(Reg::new(0x18 + 2 * s));
        let rhs = self.regs.get(Reg::new(0x19 + 2 * t));
        let result = self.mul_signed(lhs, rhs);
        self.prod_accumulate(-result);
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
    fn mul_doubles_unless_m0() {
        let mut dsp = Dsp::new().unwrap();
        // ax0.h = -3, ax0.l = 7
        dsp.regs.acc32[0] = 0xFFFD_0007u32 as i32;

        // mul $ax0.l, $ax0.h
        run(&mut dsp, &[0x9000]);
        assert_eq!(dsp.regs.product.value(), -42);

        // m0
        run(&mut dsp, &[0x8B00]);
        run(&mut dsp, &[0x9000]);
        assert_eq!(dsp.regs.product.value(), -21);
    }

    #[test]
    fn mulx_unsigned_mode() {
        let mut dsp = Dsp::new().unwrap();
        dsp.regs.acc32[0] = 0xFFFF;
        dsp.regs.acc32[1] = 0x0002;

        // mulx $ax0.l, $ax1.l
        run(&mut dsp, &[0xA000]);
        assert_eq!(dsp.regs.product.value(), -4);

        // set15
        run(&mut dsp, &[0x8D00]);
        run(&mut dsp, &[0xA000]);
        assert_eq!(dsp.regs.product.value(), 0xFFFF * 2 * 2);
    }

    #[test]
    fn mulmv_moves_previous_product() {
        let mut dsp = Dsp::new().unwrap();
        dsp.regs.product.set(0x1234_0000);
        dsp.regs.acc32[1] = (2 << 16) | 3;

        // mulmv $ax1.l, $ax1.h, $ac0
        run(&mut dsp, &[0x9E00]);
        assert_eq!(dsp.regs.acc40[0].get(), 0x1234_0000);
        assert_eq!(dsp.regs.product.value(), 12);
    }
}
