//! Stepping and the cycle-budgeted run loops.
use crate::{Dsp, Host};
use bitvec::{bitbox, boxed::BitBox};

/// Cycles run before the first idle check of a slice.
const PLAIN_HEAD: u32 = 8;
/// Cycles during which idle loops are detected.
const IDLE_CHECKED: u32 = 8;
/// Cycles run between idle checks.
const PLAIN_BODY: u32 = 200;

/// A set of instruction addresses to stop at.
#[derive(Debug, Clone)]
pub struct Breakpoints {
    bits: BitBox,
    count: usize,
}

impl Default for Breakpoints {
    fn default() -> Self {
        Self {
            bits: bitbox![0; 1 << 16],
            count: 0,
        }
    }
}

impl Breakpoints {
    pub fn insert(&mut self, addr: u16) {
        if !self.bits.replace(addr as usize, true) {
            self.count += 1;
        }
    }

    pub fn remove(&mut self, addr: u16) {
        if self.bits.replace(addr as usize, false) {
            self.count -= 1;
        }
    }

    #[inline(always)]
    pub fn contains(&self, addr: u16) -> bool {
        self.bits[addr as usize]
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.bits.iter_ones().map(|i| i as u16)
    }
}

/// Why a run loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// The budget was spent, the DSP halted or it went idle.
    Done { remaining: u32 },
    /// The instruction at `pc` is a breakpoint and was not executed.
    Breakpoint { remaining: u32 },
}

impl RunExit {
    pub fn remaining(self) -> u32 {
        match self {
            Self::Done { remaining } | Self::Breakpoint { remaining } => remaining,
        }
    }
}

impl Dsp {
    /// Executes a single instruction, servicing pending exceptions first. Does nothing if the
    /// DSP is halted.
    pub fn step(&mut self, host: &mut dyn Host) {
        if self.halted() {
            return;
        }

        self.check_exceptions();
        self.execute_at(host, self.regs.pc);
    }

    /// Executes the instruction at `addr` as if `pc` pointed to it, including loop bookkeeping.
    /// Exceptions are not serviced.
    pub fn execute_at(&mut self, host: &mut dyn Host, addr: u16) {
        let ins = self.fetch(addr);
        let len = ins.decoded().len();

        self.regs.pc = addr.wrapping_add(len);
        self.execute(host, ins);
        self.step_counter += 1;

        let last = addr.wrapping_add(len - 1);
        if self.analysis.flags(last).loop_end() {
            self.handle_loop(last);
        }

        if self.analysis.flags(addr).check_int() {
            self.check_external_interrupt();
        }
    }

    /// Runs up to `len` instructions of the budget in `cycles`. Returns `Some` if the run loop
    /// should stop.
    fn run_slice(
        &mut self,
        host: &mut dyn Host,
        cycles: &mut u32,
        len: u32,
        idle_check: bool,
        breakpoints: Option<&Breakpoints>,
    ) -> Option<RunExit> {
        for _ in 0..len.min(*cycles) {
            if self.halted() {
                return Some(RunExit::Done { remaining: 0 });
            }

            let pc = self.regs.pc;
            if breakpoints.is_some_and(|b| b.contains(pc)) {
                tracing::debug!("{pc:04X}: breakpoint hit");
                return Some(RunExit::Breakpoint { remaining: *cycles });
            }

            if idle_check && self.analysis.flags(pc).idle_skip() {
                tracing::trace!("{pc:04X}: idle, skipping {} cycles", *cycles);
                return Some(RunExit::Done { remaining: 0 });
            }

            self.step(host);
            *cycles -= 1;
        }

        (*cycles == 0).then_some(RunExit::Done { remaining: 0 })
    }

    fn run_loop(
        &mut self,
        host: &mut dyn Host,
        mut cycles: u32,
        idle_skip: bool,
        breakpoints: Option<&Breakpoints>,
    ) -> RunExit {
        if self.halted() {
            return RunExit::Done { remaining: 0 };
        }

        self.check_external_interrupt();
        if let Some(exit) = self.run_slice(host, &mut cycles, PLAIN_HEAD, false, breakpoints) {
            return exit;
        }

        loop {
            let slices = [(IDLE_CHECKED, idle_skip), (PLAIN_BODY, false)];
            for (len, idle_check) in slices {
                if let Some(exit) =
                    self.run_slice(host, &mut cycles, len, idle_check, breakpoints)
                {
                    return exit;
                }
            }
        }
    }

    /// Runs for `cycles` instructions, skipping the rest of the budget once the DSP is found
    /// polling its mailbox. Returns the unspent cycles.
    pub fn run_cycles(&mut self, host: &mut dyn Host, cycles: u32) -> u32 {
        self.run_loop(host, cycles, true, None).remaining()
    }

    /// Like [`Dsp::run_cycles`], but stops before any instruction in `breakpoints`.
    pub fn run_cycles_debug(
        &mut self,
        host: &mut dyn Host,
        cycles: u32,
        breakpoints: &Breakpoints,
    ) -> RunExit {
        self.run_loop(host, cycles, true, Some(breakpoints))
    }

    /// Runs for exactly `cycles` instructions unless the DSP halts. Never idle-skips.
    pub fn run_cycles_plain(&mut self, host: &mut dyn Host, cycles: u32) -> u32 {
        self.run_loop(host, cycles, false, None).remaining()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{RamHost, regs::StackId};

    fn dsp_with(code: &[u16]) -> Dsp {
        let mut dsp = Dsp::new().unwrap();
        {
            let mut iram = dsp.mem.iram.unprotect().unwrap();
            iram[..code.len()].copy_from_slice(code);
        }

        dsp.analyze_all();
        dsp.regs.pc = 0;
        dsp
    }

    #[test]
    fn breakpoint_set() {
        let mut breakpoints = Breakpoints::default();
        assert!(breakpoints.is_empty());

        breakpoints.insert(0x8000);
        breakpoints.insert(0x8000);
        breakpoints.insert(0x0010);
        assert_eq!(breakpoints.len(), 2);
        assert_eq!(breakpoints.iter().collect::<Vec<_>>(), [0x0010, 0x8000]);

        breakpoints.remove(0x8000);
        breakpoints.remove(0x1234);
        assert!(!breakpoints.contains(0x8000));
        assert_eq!(breakpoints.len(), 1);
    }

    #[test]
    fn halt_stops_stepping() {
        // nop, halt
        let mut dsp = dsp_with(&[0x0000, 0x0021]);
        let mut host = RamHost::new(0, 0);

        assert_eq!(dsp.run_cycles_plain(&mut host, 100), 0);
        assert!(dsp.halted());
        assert_eq!(dsp.regs.pc, 1);
        assert_eq!(dsp.step_counter, 2);

        dsp.step(&mut host);
        assert_eq!(dsp.step_counter, 2);
    }

    #[test]
    fn loopi_repeats_body() {
        // loopi #3; inc $ac0; halt
        let mut dsp = dsp_with(&[0x1003, 0x7600, 0x0021]);
        let mut host = RamHost::new(0, 0);

        dsp.run_cycles_plain(&mut host, 100);
        assert_eq!(dsp.regs.acc40[0].get(), 3);
        assert!(dsp.regs.stack(StackId::LoopCount).is_empty());
        assert!(dsp.regs.stack(StackId::Call).is_empty());
    }

    #[test]
    fn zero_count_loop_skips_body() {
        // bloopi #0, 0x0003; inc $ac0; inc $ac0; inc $ac1; halt
        let mut dsp = dsp_with(&[0x1100, 0x0003, 0x7600, 0x7600, 0x7700, 0x0021]);
        let mut host = RamHost::new(0, 0);

        dsp.run_cycles_plain(&mut host, 100);
        assert_eq!(dsp.regs.acc40[0].get(), 0);
        assert_eq!(dsp.regs.acc40[1].get(), 1);
    }

    #[test]
    fn breakpoint_stops_before_instruction() {
        // inc $ac0 (x3), halt
        let mut dsp = dsp_with(&[0x7600, 0x7600, 0x7600, 0x0021]);
        let mut host = RamHost::new(0, 0);
        let mut breakpoints = Breakpoints::default();
        breakpoints.insert(2);

        let exit = dsp.run_cycles_debug(&mut host, 50, &breakpoints);
        assert_eq!(exit, RunExit::Breakpoint { remaining: 48 });
        assert_eq!(dsp.regs.pc, 2);
        assert_eq!(dsp.regs.acc40[0].get(), 2);
    }

    #[test]
    fn idle_loop_forfeits_budget() {
        // 0: lrs $ac0.m, @cmbh; 1: andcf $ac0.m, #0x8000; 3: jlnz 0x0000
        let mut dsp = dsp_with(&[0x26FE, 0x02C0, 0x8000, 0x029C, 0x0000]);
        let mut host = RamHost::new(0, 0);
        dsp.regs.config = 0xFF;

        assert!(dsp.analysis.flags(0).idle_skip());
        assert_eq!(dsp.run_cycles(&mut host, 10_000), 0);
        assert!(dsp.step_counter < 20);
    }

    #[test]
    fn idle_skip_matches_plain_run() {
        // (code, setup); each loop is three instructions long and starts at 0
        let cases: [(&[u16], fn(&mut Dsp)); 3] = [
            // lrs $ac0.m, @cmbh; andcf $ac0.m, #0x8000; jlnz 0x0000
            (&[0x26FE, 0x02C0, 0x8000, 0x029C, 0x0000], |dsp| {
                dsp.regs.config = 0xFF;
            }),
            // lr $ac0.m, @cmbh; andcf $ac0.m, #0x8000; jlnz 0x0000
            (&[0x00DE, 0xFFFE, 0x02C0, 0x8000, 0x029C, 0x0000], |_| ()),
            // lrs $ac0.m, @dmbh; andcf $ac0.m, #0x8000; jlz 0x0000, with unread mail
            (&[0x26FC, 0x02C0, 0x8000, 0x029D, 0x0000], |dsp| {
                dsp.regs.config = 0xFF;
                dsp.hw.shared().dsp_mailbox.send(0x8000_1234);
            }),
        ];

        for (code, setup) in cases {
            let mut plain = dsp_with(code);
            let mut skipped = dsp_with(code);
            setup(&mut plain);
            setup(&mut skipped);
            assert!(skipped.analysis.flags(0).idle_skip(), "{code:04X?}");

            let mut host = RamHost::new(0, 0);
            assert_eq!(plain.run_cycles_plain(&mut host, 300), 0);
            assert_eq!(skipped.run_cycles(&mut host, 300), 0);

            // only the skipped cycles differ
            assert!(skipped.step_counter < plain.step_counter, "{code:04X?}");
            assert_eq!(skipped.regs, plain.regs, "{code:04X?}");
            assert_eq!(skipped.mem.dram, plain.mem.dram, "{code:04X?}");
            assert_eq!(skipped.exceptions, plain.exceptions, "{code:04X?}");
            assert_eq!(skipped.halted(), plain.halted(), "{code:04X?}");

            let (plain, skipped) = (plain.hw.shared(), skipped.hw.shared());
            assert_eq!(skipped.cpu_mailbox.peek(), plain.cpu_mailbox.peek());
            assert_eq!(skipped.dsp_mailbox.peek(), plain.dsp_mailbox.peek());
        }
    }
}
