//! A block recompiler for DSP microcode.
//!
//! Straight-line runs of instructions are compiled into [`blocks::Block`]s of host operations,
//! which a [`machine::Machine`] executes against the same [`Dsp`] state the interpreter uses.
//! Control flow and anything without a native implementation is delegated to the interpreter
//! one instruction at a time, so the two can be mixed freely.
pub mod blocks;
pub mod emitter;
pub mod host;
pub mod machine;
pub mod regcache;

mod compiler;

pub use compiler::{Compiler, EmitError};

use blocks::Blocks;
use dspint::{Dsp, Host};
use machine::Machine;

/// Recompiler settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Maximum number of guest instructions in a block.
    pub max_block_len: u32,
    /// Whether to keep both accumulators in fixed host registers for the whole block instead of
    /// allocating them like any other register.
    pub static_accumulators: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_block_len: 64,
            static_accumulators: false,
        }
    }
}

/// The recompiler: a compiler, its block cache and the machine which runs the blocks.
#[derive(Debug, Default)]
pub struct Jit {
    compiler: Compiler,
    blocks: Blocks,
    machine: Machine,
}

impl Jit {
    pub fn new(settings: Settings) -> Self {
        Self {
            compiler: Compiler::new(settings),
            blocks: Blocks::new(),
            machine: Machine::new(),
        }
    }

    pub fn settings(&self) -> &Settings {
        self.compiler.settings()
    }

    pub fn blocks(&self) -> &Blocks {
        &self.blocks
    }

    /// Drops every compiled block.
    pub fn invalidate(&mut self) {
        self.blocks.clear();
    }

    fn run(&mut self, dsp: &mut Dsp, host: &mut dyn Host, cycles: u32, idle_skip: bool) -> u32 {
        if dsp.halted() {
            return 0;
        }

        dsp.check_external_interrupt();

        let mut remaining = cycles;
        while remaining > 0 {
            if dsp.halted() {
                return 0;
            }

            if dsp.hw.code_changed {
                self.blocks.clear();
                dsp.hw.code_changed = false;
            }

            dsp.check_exceptions();

            // the first block always runs, so a polling loop gets to see new mail
            let pc = dsp.regs.pc;
            if idle_skip && remaining < cycles && dsp.analysis.flags(pc).idle_skip() {
                tracing::trace!("{pc:04X}: idle, skipping {remaining} cycles");
                return 0;
            }

            let compiler = &self.compiler;
            let block = self
                .blocks
                .get_or_compile(pc, || compiler.compile(dsp, pc));

            if block.instructions() > remaining {
                // not enough budget left for the whole block
                dsp.execute_at(host, pc);
                remaining -= 1;
                continue;
            }

            let executed = self.machine.run(block, dsp, host);
            remaining = remaining.saturating_sub(executed.max(1));
        }

        0
    }

    /// Runs for `cycles` instructions, skipping the rest of the budget once the DSP is found
    /// polling its mailbox. Returns the unspent cycles.
    pub fn run_cycles(&mut self, dsp: &mut Dsp, host: &mut dyn Host, cycles: u32) -> u32 {
        self.run(dsp, host, cycles, true)
    }

    /// Runs for exactly `cycles` instructions unless the DSP halts. Never idle-skips.
    pub fn run_cycles_plain(&mut self, dsp: &mut Dsp, host: &mut dyn Host, cycles: u32) -> u32 {
        self.run(dsp, host, cycles, false)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use dspint::RamHost;

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

    const LOOP: &[u16] = &[
        0x0080, 0x0000, // lri $ar0, #0x0000
        0x0818, // lris $ax0.l, #0x18
        0x4800, // addax $acc0, $ax0
        0x1B1C, // srri @$ar0, $ac0.l
        0x1FC0, // mrr $ac0.m, $ar0
        0x029F, 0x0003, // jmp 0x0003
    ];

    #[test]
    fn matches_interpreter_over_many_blocks() {
        for static_accumulators in [false, true] {
            let mut jit_dsp = dsp_with(LOOP);
            let mut interp_dsp = dsp_with(LOOP);
            let mut jit = Jit::new(Settings {
                static_accumulators,
                ..Default::default()
            });

            jit.run_cycles_plain(&mut jit_dsp, &mut RamHost::new(0, 0), 1000);
            interp_dsp.run_cycles_plain(&mut RamHost::new(0, 0), 1000);

            assert_eq!(jit_dsp.regs, interp_dsp.regs);
            assert_eq!(jit_dsp.mem.dram, interp_dsp.mem.dram);
            assert_eq!(jit_dsp.step_counter, interp_dsp.step_counter);
            assert!(!jit.blocks().is_empty());
        }
    }

    #[test]
    fn halted_dsp_does_not_run() {
        let mut dsp = dsp_with(&[0x0021]);
        let mut jit = Jit::default();

        jit.run_cycles(&mut dsp, &mut RamHost::new(0, 0), 10);
        assert!(dsp.halted());
        assert_eq!(dsp.step_counter, 1);

        jit.run_cycles(&mut dsp, &mut RamHost::new(0, 0), 10);
        assert_eq!(dsp.step_counter, 1);
    }

    #[test]
    fn code_changes_drop_blocks() {
        let mut dsp = dsp_with(&[0x0000, 0x0000, 0x029F, 0x0000]);
        let mut jit = Jit::default();

        jit.run_cycles_plain(&mut dsp, &mut RamHost::new(0, 0), 3);
        assert_eq!(jit.blocks().len(), 1);

        dsp.hw.code_changed = true;
        jit.run_cycles_plain(&mut dsp, &mut RamHost::new(0, 0), 3);
        assert!(!dsp.hw.code_changed);
        assert_eq!(jit.blocks().len(), 1);
    }

    #[test]
    fn idle_loops_skip_the_budget() {
        // lr $ac0.m, @CMBH; andcf $ac0.m, #0x8000; jlnz 0x0000; halt
        let mut dsp = dsp_with(&[0x00DE, 0xFFFE, 0x02C0, 0x8000, 0x029C, 0x0000, 0x0021]);
        let mut jit = Jit::default();

        assert_eq!(jit.run_cycles(&mut dsp, &mut RamHost::new(0, 0), 100), 0);
        assert_eq!(dsp.step_counter, 3);
        assert_eq!(dsp.regs.pc, 0);

        dsp.hw.shared().cpu_mailbox.send(0x8000_0000);
        jit.run_cycles(&mut dsp, &mut RamHost::new(0, 0), 100);
        assert!(dsp.halted());
    }

    #[test]
    fn short_budgets_fall_back_to_stepping() {
        let mut dsp = dsp_with(&[0x0000; 8]);
        let mut jit = Jit::default();

        jit.run_cycles_plain(&mut dsp, &mut RamHost::new(0, 0), 5);
        assert_eq!(dsp.step_counter, 5);
        assert_eq!(dsp.regs.pc, 5);
    }
}
