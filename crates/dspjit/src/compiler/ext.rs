//! Extension opcodes. They see the registers as they were before the main operation; natively
//! compiled main operations never touch the address registers, so only the values stored by
//! `mv` and `s` have to be read in advance.
use super::{BlockBuilder, ar, reg};
use super::memory::Step;
use crate::host::HostReg;
use bitos::BitUtils;
use dspint::{Ins, ins::ExtensionOpcode};

impl BlockBuilder<'_> {
    /// Reads the operands of `ext` which the main operation could overwrite.
    pub(super) fn ext_prepare(&mut self, ext: ExtensionOpcode, ins: Ins) -> Option<HostReg> {
        match ext {
            ExtensionOpcode::Mv => Some(self.read(reg(0x1C + ins.base.bits(0, 2)), false)),
            ExtensionOpcode::S | ExtensionOpcode::Sn => {
                Some(self.read(reg(0x1C + ins.base.bits(3, 5)), false))
            }
            _ => None,
        }
    }

    pub(super) fn ext_finish(&mut self, ext: ExtensionOpcode, ins: Ins, source: Option<HostReg>) {
        let base = ins.base;
        match ext {
            ExtensionOpcode::Nop => (),
            ExtensionOpcode::Dr => self.step_ar(base.bits(0, 2) as usize, Step::Dec),
            ExtensionOpcode::Ir => self.step_ar(base.bits(0, 2) as usize, Step::Inc),
            ExtensionOpcode::Nr => {
                let r = base.bits(0, 2) as usize;
                self.step_ar(r, Step::Add(r));
            }
            ExtensionOpcode::Mv => {
                let Some(source) = source else {
                    unreachable!("mv source was not prepared");
                };

                self.write(reg(0x18 + base.bits(2, 4)), source);
                self.free(source);
            }
            ExtensionOpcode::L | ExtensionOpcode::Ln => {
                let s = base.bits(0, 2) as usize;
                let d = base.bits(3, 6);

                let addr = self.value_of(ar(s));
                let value = self.load_data(addr);
                self.free_operand(addr);

                self.write(reg(0x18 + d), value);
                self.free(value);

                let step = if ext == ExtensionOpcode::Ln {
                    Step::Add(s)
                } else {
                    Step::Inc
                };
                self.step_ar(s, step);
            }
            ExtensionOpcode::S | ExtensionOpcode::Sn => {
                let Some(source) = source else {
                    unreachable!("store source was not prepared");
                };

                let d = base.bits(0, 2) as usize;
                let addr = self.value_of(ar(d));
                self.store_data(addr, source);
                self.free_operand(addr);
                self.free(source);

                let step = if ext == ExtensionOpcode::Sn {
                    Step::Add(d)
                } else {
                    Step::Inc
                };
                self.step_ar(d, step);
            }
            ext => unreachable!("{ext:?} passed the native check"),
        }
    }
}
