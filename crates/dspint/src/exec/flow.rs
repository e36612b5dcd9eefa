use crate::{
    Dsp, Host, Ins,
    ins::CondCode,
    regs::{Reg, StackId},
};
use bitos::BitUtils;

impl Dsp {
    #[inline(always)]
    fn condition(&self, ins: Ins) -> bool {
        let code = CondCode::new(ins.base.bits(0, 4) as u8);
        self.regs.status.condition(code)
    }

    /// Skips the instruction at `pc`.
    #[inline(always)]
    fn skip_next(&mut self) {
        let next = Ins::new(self.read_imem(self.regs.pc));
        self.regs.pc = self.regs.pc.wrapping_add(next.decoded().len());
    }

    fn start_loop(&mut self, end: u16, count: u16) {
        self.regs.push(StackId::Call, self.regs.pc);
        self.regs.push(StackId::LoopAddr, end);
        self.regs.push(StackId::LoopCount, count);
    }

    pub(super) fn halt(&mut self, _: &mut dyn Host, _: Ins) {
        tracing::debug!("{:04X}: halted", self.regs.pc.wrapping_sub(1));
        self.regs.pc = self.regs.pc.wrapping_sub(1);
        self.hw.shared().set_halted(true);
    }

    pub(super) fn ifcc(&mut self, _: &mut dyn Host, ins: Ins) {
        if !self.condition(ins) {
            self.skip_next();
        }
    }

    pub(super) fn jmp(&mut self, _: &mut dyn Host, ins: Ins) {
        if self.condition(ins) {
            self.regs.pc = ins.extra;
        }
    }

    pub(super) fn jr(&mut self, _: &mut dyn Host, ins: Ins) {
        let r = ins.base.bits(5, 8) as u8;
        let addr = self.regs.op_read(Reg::new(r));

        if self.condition(ins) {
            self.regs.pc = addr;
        }
    }

    pub(super) fn call(&mut self, _: &mut dyn Host, ins: Ins) {
        if self.condition(ins) {
            self.regs.push(StackId::Call, self.regs.pc);
            self.regs.pc = ins.extra;
        }
    }

    pub(super) fn callr(&mut self, _: &mut dyn Host, ins: Ins) {
        let r = ins.base.bits(5, 8) as u8;
        let addr = self.regs.op_read(Reg::new(r));

        if self.condition(ins) {
            self.regs.push(StackId::Call, self.regs.pc);
            self.regs.pc = addr;
        }
    }

    pub(super) fn ret(&mut self, _: &mut dyn Host, ins: Ins) {
        if self.condition(ins) {
            self.regs.pc = self.regs.pop(StackId::Call);
        }
    }

    pub(super) fn rti(&mut self, _: &mut dyn Host, ins: Ins) {
        if self.condition(ins) {
            let status = self.regs.pop(StackId::Data);
            self.regs.set(Reg::Sr, status);
            self.regs.pc = self.regs.pop(StackId::Call);
        }
    }

    pub(super) fn loop_(&mut self, _: &mut dyn Host, ins: Ins) {
        let r = ins.base.bits(0, 5) as u8;
        let count = self.regs.op_read(Reg::new(r));

        if count != 0 {
            self.start_loop(self.regs.pc, count);
        } else {
            self.skip_next();
        }
    }

    pub(super) fn loopi(&mut self, _: &mut dyn Host, ins: Ins) {
        let count = ins.base.bits(0, 8);

        if count != 0 {
            self.start_loop(self.regs.pc, count);
        } else {
            self.skip_next();
        }
    }

    pub(super) fn bloop(&mut self, _: &mut dyn Host, ins: Ins) {
        let r = ins.base.bits(0, 5) as u8;
        let count = self.regs.op_read(Reg::new(r));

        if count != 0 {
            self.start_loop(ins.extra, count);
        } else {
            self.regs.pc = ins.extra;
            self.skip_next();
        }
    }

    pub(super) fn bloopi(&mut self, _: &mut dyn Host, ins: Ins) {
        let count = ins.base.bits(0, 8);

        if count != 0 {
            self.start_loop(ins.extra, count);
        } else {
            self.regs.pc = ins.extra;
            self.skip_next();
        }
    }
}
