use crate::{Dsp, Host, Ins, regs::Status};
use bitos::BitUtils;

const MASK_40: i64 = (1 << 40) - 1;

impl Dsp {
    /// Replaces the middle word of accumulator `d` and updates the logic flags.
    #[inline(always)]
    fn acc_logic(&mut self, d: usize, mid: u16) {
        self.regs.acc40[d].mid = mid;
        let new = self.regs.acc40[d].get();
        self.regs.status.set_logic(new, mid);
    }

    pub(super) fn andc(&mut self, _: &mut dyn Host, ins: Ins) {
        let d = ins.base.bit(8) as usize;
        self.acc_logic(d, self.regs.acc40[d].mid & self.regs.acc40[1 - d].mid);
    }

    pub(super) fn andi(&mut self, _: &mut dyn Host, ins: Ins) {
        let d = ins.base.bit(8) as usize;
        self.acc_logic(d, self.regs.acc40[d].mid & ins.extra);
    }

    pub(super) fn andr(&mut self, _: &mut dyn Host, ins: Ins) {
        let d = ins.base.bit(8) as usize;
        let s = ins.base.bit(9) as usize;
        self.acc_logic(d, self.regs.acc40[d].mid & (self.regs.acc32[s] >> 16) as u16);
    }

    pub(super) fn orc(&mut self, _: &mut dyn Host, ins: Ins) {
        let d = ins.base.bit(8) as usize;
        self.acc_logic(d, self.regs.acc40[d].mid | self.regs.acc40[1 - d].mid);
    }

    pub(super) fn ori(&mut self, _: &mut dyn Host, ins: Ins) {
        let d = ins.base.bit(8) as usize;
        self.acc_logic(d, self.regs.acc40[d].mid | ins.extra);
    }

    pub(super) fn orr(&mut self, _: &mut dyn Host, ins: Ins) {
        let d = ins.base.bit(8) as usize;
        let s = ins.base.bit(9) as usize;
        self.acc_logic(d, self.regs.acc40[d].mid | (self.regs.acc32[s] >> 16) as u16);
    }

    pub(super) fn xorc(&mut self, _: &mut dyn Host, ins: Ins) {
        let d = ins.base.bit(8) as usize;
        self.acc_logic(d, self.regs.acc40[d].mid ^ self.regs.acc40[1 - d].mid);
    }

    pub(super) fn xori(&mut self, _: &mut dyn Host, ins: Ins) {
        let d = ins.base.bit(8) as usize;
        self.acc_logic(d, self.regs.acc40[d].mid ^ ins.extra);
    }

    pub(super) fn xorr(&mut self, _: &mut dyn Host, ins: Ins) {
        let d = ins.base.bit(8) as usize;
        let s = ins.base.bit(9) as usize;
        self.acc_logic(d, self.regs.acc40[d].mid ^ (self.regs.acc32[s] >> 16) as u16);
    }

    pub(super) fn not(&mut self, _: &mut dyn Host, ins: Ins) {
        let d = ins.base.bit(8) as usize;
        self.acc_logic(d, !self.regs.acc40[d].mid);
    }

    pub(super) fn andf(&mut self, _: &mut dyn Host, ins: Ins) {
        let d = ins.base.bit(8) as usize;
        let zero = self.regs.acc40[d].mid & ins.extra == 0;
        self.regs.status.set_logic_zero(zero);
    }

    pub(super) fn andcf(&mut self, _: &mut dyn Host, ins: Ins) {
        let d = ins.base.bit(8) as usize;
        let equal = self.regs.acc40[d].mid & ins.extra == ins.extra;
        self.regs.status.set_logic_zero(equal);
    }

    pub(super) fn lsl(&mut self, _: &mut dyn Host, ins: Ins) {
        let r = ins.base.bit(8) as usize;
        let shift = ins.base.bits(0, 6);

        let old = self.regs.acc40[r].get();
        self.acc_move(r, old << shift);
    }

    pub(super) fn lsr(&mut self, _: &mut dyn Host, ins: Ins) {
        let r = ins.base.bit(8) as usize;
        let shift = (64 - ins.base.bits(0, 6)) % 64;

        let old = self.regs.acc40[r].get() & MASK_40;
        self.acc_move(r, old >> shift);
    }

    pub(super) fn asl(&mut self, _: &mut dyn Host, ins: Ins) {
        let r = ins.base.bit(8) as usize;
        let shift = ins.base.bits(0, 6);

        let old = self.regs.acc40[r].get();
        self.acc_move(r, old << shift);
    }

    pub(super) fn asr(&mut self, _: &mut dyn Host, ins: Ins) {
        let r = ins.base.bit(8) as usize;
        let shift = (64 - ins.base.bits(0, 6)) % 64;

        let old = self.regs.acc40[r].get();
        self.acc_move(r, old >> shift);
    }

    pub(super) fn lsl16(&mut self, _: &mut dyn Host, ins: Ins) {
        let r = ins.base.bit(8) as usize;

        let old = self.regs.acc40[r].get();
        self.acc_move(r, old << 16);
    }

    pub(super) fn lsr16(&mut self, _: &mut dyn Host, ins: Ins) {
        let r = ins.base.bit(8) as usize;

        let old = self.regs.acc40[r].get() & MASK_40;
        self.acc_move(r, old >> 16);
    }

    pub(super) fn asr16(&mut self, _: &mut dyn Host, ins: Ins) {
        let r = ins.base.bit(11) as usize;

        let old = self.regs.acc40[r].get();
        self.acc_move(r, old >> 16);
    }

    /// Shifts accumulator `d` by the signed 7-bit amount in `amount`. If `right_on_set` is set,
    /// a negative amount (bit 6 set) shifts right, otherwise it shifts left.
    fn shift_by(&mut self, d: usize, value: i64, amount: u16, right_on_set: bool) {
        let shift = amount.bits(0, 6);
        let new = match (amount.bit(6), right_on_set) {
            (true, true) => value >> ((64 - shift) % 64),
            (true, false) => value << ((64 - shift) % 64),
            (false, true) => value << shift,
            (false, false) => value >> shift,
        };

        self.acc_move(d, new);
    }

    pub(super) fn lsrn(&mut self, _: &mut dyn Host, _: Ins) {
        let value = self.regs.acc40[0].get() & MASK_40;
        let amount = self.regs.acc40[1].mid;
        self.shift_by(0, value, amount, false);
    }

    pub(super) fn asrn(&mut self, _: &mut dyn Host, _: Ins) {
        let value = self.regs.acc40[0].get();
        let amount = self.regs.acc40[1].mid;
        self.shift_by(0, value, amount, false);
    }

    pub(super) fn lsrnr(&mut self, _: &mut dyn Host, ins: Ins) {
        let d = ins.base.bit(8) as usize;

        let value = self.regs.acc40[d].get() & MASK_40;
        let amount = self.regs.acc40[1 - d].mid;
        self.shift_by(d, value, amount, true);
    }

    pub(super) fn asrnr(&mut self, _: &mut dyn Host, ins: Ins) {
        let d = ins.base.bit(8) as usize;

        let value = self.regs.acc40[d].get();
        let amount = self.regs.acc40[1 - d].mid;
        self.shift_by(d, value, amount, true);
    }

    pub(super) fn lsrnrx(&mut self, _: &mut dyn Host, ins: Ins) {
        let d = ins.base.bit(8) as usize;
        let s = ins.base.bit(9) as usize;

        let value = self.regs.acc40[d].get() & MASK_40;
        let amount = (self.regs.acc32[s] >> 16) as u16;
        self.shift_by(d, value, amount, true);
    }

    pub(super) fn asrnrx(&mut self, _: &mut dyn Host, ins: Ins) {
        let d = ins.base.bit(8) as usize;
        let s = ins.base.bit(9) as usize;

        let value = self.regs.acc40[d].get();
        let amount = (self.regs.acc32[s] >> 16) as u16;
        self.shift_by(d, value, amount, true);
    }

    pub(super) fn sbclr(&mut self, _: &mut dyn Host, ins: Ins) {
        let bit = 6 + ins.base.bits(0, 3) as u8;
        if bit == 13 {
            return;
        }

        let status = self.regs.status.to_bits().with_bit(bit, false);
        self.regs.status = Status::from_bits(status);
    }

    pub(super) fn sbset(&mut self, _: &mut dyn Host, ins: Ins) {
        let bit = 6 + ins.base.bits(0, 3) as u8;
        if bit == 13 || bit == 8 {
            return;
        }

        let status = self.regs.status.to_bits().with_bit(bit, true);
        self.regs.status = Status::from_bits(status);
    }

    pub(super) fn clr15(&mut self, _: &mut dyn Host, _: Ins) {
        self.regs.status.set_unsigned_mul(false);
    }

    pub(super) fn set15(&mut self, _: &mut dyn Host, _: Ins) {
        self.regs.status.set_unsigned_mul(true);
    }

    pub(super) fn set16(&mut self, _: &mut dyn Host, _: Ins) {
        self.regs.status.set_sign_extend_to_40(false);
    }

    pub(super) fn set40(&mut self, _: &mut dyn Host, _: Ins) {
        self.regs.status.set_sign_extend_to_40(true);
    }

    pub(super) fn m0(&mut self, _: &mut dyn Host, _: Ins) {
        self.regs.status.set_dont_double_result(true);
    }

    pub(super) fn m2(&mut self, _: &mut dyn Host, _: Ins) {
        self.regs.status.set_dont_double_result(false);
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
    fn logic_flags_use_middle_word() {
        let mut dsp = Dsp::new().unwrap();
        dsp.regs.acc40[0].set(0x01_00F0_0000);

        // andi $ac0.m, #0x000F
        run(&mut dsp, &[0x0240, 0x000F]);
        assert_eq!(dsp.regs.acc40[0].mid, 0);
        assert_eq!(dsp.regs.acc40[0].high, 1);
        assert!(dsp.regs.status.arithmetic_zero());

        // ori $ac0.m, #0x8000
        run(&mut dsp, &[0x0260, 0x8000]);
        assert!(dsp.regs.status.sign());
    }

    #[test]
    fn andcf_tests_all_bits() {
        let mut dsp = Dsp::new().unwrap();
        dsp.regs.acc40[1].mid = 0x8001;

        // andcf $ac1.m, #0x8000
        run(&mut dsp, &[0x03C0, 0x8000]);
        assert!(dsp.regs.status.logic_zero());

        // andf $ac1.m, #0x8000
        run(&mut dsp, &[0x03A0, 0x8000]);
        assert!(!dsp.regs.status.logic_zero());
    }

    #[test]
    fn immediate_shifts() {
        let mut dsp = Dsp::new().unwrap();
        dsp.regs.acc40[0].set(-0x10);

        // lsl $ac0, #4
        run(&mut dsp, &[0x1404]);
        assert_eq!(dsp.regs.acc40[0].get(), -0x100);

        // asr $ac0, #-4
        run(&mut dsp, &[0x14FC]);
        assert_eq!(dsp.regs.acc40[0].get(), -0x10);

        // lsr $ac0, #-4
        run(&mut dsp, &[0x147C]);
        assert_eq!(dsp.regs.acc40[0].get(), 0x0F_FFFF_FFFF);
    }

    #[test]
    fn status_bits() {
        let mut dsp = Dsp::new().unwrap();

        // sbset #6 (bit 12, unused)
        run(&mut dsp, &[0x1306]);
        assert_eq!(dsp.regs.status.to_bits(), 1 << 12);

        // sbset #2 (bit 8, reserved)
        run(&mut dsp, &[0x1302]);
        assert_eq!(dsp.regs.status.to_bits(), 1 << 12);

        // sbclr #6
        run(&mut dsp, &[0x1206]);
        assert_eq!(dsp.regs.status.to_bits(), 0);

        // set40
        run(&mut dsp, &[0x8F00]);
        assert!(dsp.regs.status.sign_extend_to_40());
    }
}
