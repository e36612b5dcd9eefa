//! Driver for the DSP coprocessor.
//!
//! A [`Core`] owns a [`Dsp`] and decides how it runs: through the interpreter or the
//! recompiler, freely or under the control of a debugger. It also owns the debugging aids
//! (breakpoints, labels and symbols) and save-states.
pub mod labels;
pub mod rom;
pub mod state;
pub mod step;
pub mod symbols;

use dspint::{
    COEF_LEN, Dsp, HALT, Host, IROM_LEN, Reg, Slot,
    hw::{DmaControl, DmaDirection, DmaTarget, DmaOverflow, Fault, Mailbox, Shared, ifx},
    interp::{Breakpoints, RunExit},
};
use dspjit::{Jit, Settings};
use easyerr::{Error, ResultExt};
use labels::LabelMap;
use rom::{Firmware, FirmwareError, KnownRom};
use state::SaveStateError;
use std::sync::Arc;
use step::{Request, State, StepHandle, Wake};
use symbols::Symbols;

/// Index of the program counter in the debugger register file. Lower indices are the
/// architectural registers.
pub const PC_INDEX: u8 = 32;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CoreKind {
    #[default]
    Interpreter,
    Recompiler,
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub kind: CoreKind,
    /// Recompiler settings. Unused by the interpreter.
    pub jit: Settings,
    pub dma_overflow: DmaOverflow,
}

#[derive(Debug, Error)]
pub enum InitError {
    #[error(transparent)]
    Firmware { source: FirmwareError },
    #[error("ROM images were rejected")]
    RomRejected,
    #[error(transparent)]
    Region { source: dspint::RegionError },
}

#[derive(Debug, Error)]
pub enum DebugError {
    #[error("no register with index {index}")]
    InvalidRegister { index: u8 },
}

/// One of the DSP memories, as seen by a debugger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryRegion {
    Iram,
    Irom,
    Dram,
    Coef,
}

/// The DSP coprocessor, its execution strategy and its debugging state.
pub struct Core {
    dsp: Dsp,
    jit: Jit,
    kind: CoreKind,
    rom: Option<&'static KnownRom>,
    control: StepHandle,
    breakpoints: Breakpoints,
    /// A breakpoint which already stopped execution, and must be stepped over when resuming.
    stopped_at: Option<u16>,
    labels: LabelMap,
    symbols: Symbols,
}

impl Core {
    /// Creates a DSP running `firmware`. If the ROMs are not a known pair, `confirm` is asked
    /// whether to continue anyway.
    pub fn new(
        config: Config,
        firmware: &Firmware,
        confirm: impl FnOnce(u32, u32) -> bool,
    ) -> Result<Self, InitError> {
        Self::with_shared(config, firmware, Arc::new(Shared::default()), confirm)
    }

    /// Like [`Core::new`], but communicates with the host CPU through `shared`.
    pub fn with_shared(
        config: Config,
        firmware: &Firmware,
        shared: Arc<Shared>,
        confirm: impl FnOnce(u32, u32) -> bool,
    ) -> Result<Self, InitError> {
        firmware.validate().context(InitCtx::Firmware)?;

        let (irom_hash, coef_hash) = firmware.checksums();
        let rom = rom::identify(irom_hash, coef_hash);
        match rom {
            Some(rom) => tracing::info!("using {} DSP ROMs", rom.name),
            None => {
                tracing::warn!(
                    "unknown DSP ROMs (IROM {irom_hash:08X}, COEF {coef_hash:08X})"
                );

                if !confirm(irom_hash, coef_hash) {
                    return Err(InitError::RomRejected);
                }
            }
        }

        let mut dsp = Dsp::with_shared(shared).context(InitCtx::Region)?;
        dsp.mem.irom.copy_from_slice(&firmware.irom[..IROM_LEN]);
        dsp.mem.coef.copy_from_slice(&firmware.coef[..COEF_LEN]);
        dsp.mem.iram.unprotect().context(InitCtx::Region)?.fill(HALT);
        dsp.mem.dram.fill(0);
        dsp.regs.status.set_interrupt_enable(true);
        dsp.regs.status.set_external_interrupt_enable(true);
        dsp.hw.dma_overflow = config.dma_overflow;

        let mut core = Self {
            dsp,
            jit: Jit::new(config.jit),
            kind: config.kind,
            rom,
            control: StepHandle::default(),
            breakpoints: Breakpoints::default(),
            stopped_at: None,
            labels: LabelMap::new(),
            symbols: Symbols::default(),
        };

        core.labels.register_defaults();
        core.reset();

        Ok(core)
    }

    pub fn dsp(&self) -> &Dsp {
        &self.dsp
    }

    pub fn dsp_mut(&mut self) -> &mut Dsp {
        &mut self.dsp
    }

    pub fn kind(&self) -> CoreKind {
        self.kind
    }

    /// The identified ROM pair, if it is a known one.
    pub fn rom(&self) -> Option<&'static KnownRom> {
        self.rom
    }

    /// Soft resets the DSP.
    pub fn reset(&mut self) {
        self.dsp.reset();
        self.dsp.hw.fault = None;
        self.jit.invalidate();
        self.dsp.hw.code_changed = false;
        self.stopped_at = None;
    }

    fn run_free(&mut self, host: &mut dyn Host, cycles: u32) -> u32 {
        if !self.breakpoints.is_empty() {
            let mut cycles = cycles;
            if self.stopped_at.take() == Some(self.dsp.regs.pc) && cycles > 0 {
                self.dsp.step(host);
                cycles -= 1;
            }

            return match self.dsp.run_cycles_debug(host, cycles, &self.breakpoints) {
                RunExit::Done { remaining } => remaining,
                RunExit::Breakpoint { remaining } => {
                    tracing::info!("{:04X}: breakpoint", self.dsp.regs.pc);
                    self.stopped_at = Some(self.dsp.regs.pc);
                    self.control.request(Request::Pause);
                    remaining
                }
            };
        }

        match self.kind {
            CoreKind::Interpreter => self.dsp.run_cycles(host, cycles),
            CoreKind::Recompiler => self.jit.run_cycles(&mut self.dsp, host, cycles),
        }
    }

    /// Runs the DSP for up to `cycles` instructions. Returns the unspent cycles.
    ///
    /// When stepping, this blocks until a step is requested through the [`StepHandle`] and
    /// executes a single instruction.
    pub fn run_cycles(&mut self, host: &mut dyn Host, cycles: u32) -> u32 {
        let state = match self.control.state() {
            State::Stepping => match self.control.wait() {
                Wake::Step => {
                    self.step(host);
                    return cycles.saturating_sub(1);
                }
                Wake::Changed(state) => state,
            },
            state => state,
        };

        match state {
            State::Running => self.run_free(host, cycles),
            State::Stopped | State::Stepping => cycles,
        }
    }

    /// Executes a single instruction, whatever the run state.
    pub fn step(&mut self, host: &mut dyn Host) {
        self.stopped_at = None;
        self.dsp.step(host);
    }

    pub fn state(&self) -> State {
        self.control.state()
    }

    pub fn set_state(&self, state: State) {
        self.control.request(match state {
            State::Running => Request::Run,
            State::Stopped => Request::Stop,
            State::Stepping => Request::Pause,
        });
    }

    /// A handle for controlling execution from another thread.
    pub fn controller(&self) -> StepHandle {
        self.control.clone()
    }

    /// Reads a register without side effects. Accumulator parts are read raw, without
    /// saturation.
    pub fn read_register(&self, index: u8) -> Result<u16, DebugError> {
        match index {
            0..32 => Ok(self.dsp.regs.load_slot(Slot::Reg(Reg::new(index))) as u16),
            PC_INDEX => Ok(self.dsp.regs.pc),
            _ => Err(DebugError::InvalidRegister { index }),
        }
    }

    /// Writes a register raw. Stack registers replace their top entry.
    pub fn write_register(&mut self, index: u8, value: u16) -> Result<(), DebugError> {
        match index {
            0..32 => self
                .dsp
                .regs
                .store_slot(Slot::Reg(Reg::new(index)), value as u64),
            PC_INDEX => {
                self.dsp.regs.pc = value;
                self.stopped_at = None;
            }
            _ => return Err(DebugError::InvalidRegister { index }),
        }

        Ok(())
    }

    /// Reads a word of `region` at an offset into it. Out of range offsets read `None`.
    pub fn read_memory(&self, region: MemoryRegion, offset: u16) -> Option<u16> {
        let mem = &self.dsp.mem;
        let offset = offset as usize;
        match region {
            MemoryRegion::Iram => mem.iram.as_slice().get(offset),
            MemoryRegion::Irom => mem.irom.get(offset),
            MemoryRegion::Dram => mem.dram.get(offset),
            MemoryRegion::Coef => mem.coef.get(offset),
        }
        .copied()
    }

    pub fn set_breakpoint(&mut self, addr: u16) {
        self.breakpoints.insert(addr);
    }

    pub fn clear_breakpoint(&mut self, addr: u16) {
        self.breakpoints.remove(addr);
    }

    pub fn breakpoints(&self) -> &Breakpoints {
        &self.breakpoints
    }

    /// The `(cpu, dsp)` mailboxes.
    pub fn mailboxes(&self) -> (&Mailbox, &Mailbox) {
        let shared = self.dsp.hw.shared();
        (&shared.cpu_mailbox, &shared.dsp_mailbox)
    }

    pub fn shared(&self) -> &Arc<Shared> {
        self.dsp.hw.shared()
    }

    pub fn request_external_interrupt(&self) {
        self.shared().request_external_interrupt();
    }

    /// Uploads `len` bytes of host memory at `host_addr` to instruction RAM at `iram_addr`,
    /// the same way microcode does it.
    pub fn upload(&mut self, host: &mut dyn Host, host_addr: u32, iram_addr: u16, len: u16) {
        let control = DmaControl::default()
            .with_direction(DmaDirection::FromHost)
            .with_target(DmaTarget::Iram);

        let dsp = &mut self.dsp;
        dsp.ifx_write(host, ifx::DSMAH, (host_addr >> 16) as u16);
        dsp.ifx_write(host, ifx::DSMAL, host_addr as u16);
        dsp.ifx_write(host, ifx::DSPA, iram_addr);
        dsp.ifx_write(host, ifx::DSCR, control.to_bits());
        dsp.ifx_write(host, ifx::DSBL, len);
    }

    /// What stopped the DSP, if anything.
    pub fn fault(&self) -> Option<Fault> {
        self.dsp.hw.fault
    }

    pub fn save_state(&self) -> Result<Vec<u8>, SaveStateError> {
        state::save(&self.dsp)
    }

    pub fn load_state(&mut self, data: &[u8]) -> Result<(), SaveStateError> {
        state::load(&mut self.dsp, data)?;
        self.jit.invalidate();
        self.dsp.hw.code_changed = false;
        self.stopped_at = None;

        Ok(())
    }

    pub fn labels(&self) -> &LabelMap {
        &self.labels
    }

    pub fn labels_mut(&mut self) -> &mut LabelMap {
        &mut self.labels
    }

    /// Layout of the last listing produced by [`Core::disassemble`].
    pub fn symbols(&self) -> &Symbols {
        &self.symbols
    }

    /// Disassembles `count` instructions starting at `addr`, annotated with the labels.
    pub fn disassemble(&mut self, addr: u16, count: usize) -> Vec<String> {
        let (symbols, lines) = Symbols::build(&self.dsp.mem, addr, count, &self.labels);
        self.symbols = symbols;
        lines
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use dspint::{RESET_VECTOR, RamHost, regs::Status};

    fn firmware() -> Firmware {
        let mut irom = vec![0; IROM_LEN];
        // jmp 0x0000
        irom[..2].copy_from_slice(&[0x029F, 0x0000]);

        Firmware {
            irom,
            coef: vec![0; COEF_LEN],
        }
    }

    fn load_code(core: &mut Core, code: &[u16]) {
        let dsp = core.dsp_mut();
        dsp.mem.iram.unprotect().unwrap()[..code.len()].copy_from_slice(code);
        dsp.analyze_all();
        core.write_register(PC_INDEX, 0).unwrap();
    }

    fn core(kind: CoreKind) -> Core {
        let config = Config {
            kind,
            ..Default::default()
        };

        Core::new(config, &firmware(), |_, _| true).unwrap()
    }

    #[test]
    fn init_state() {
        let mut asked = None;
        let core = Core::new(Config::default(), &firmware(), |irom, coef| {
            asked = Some((irom, coef));
            true
        })
        .unwrap();

        assert_eq!(asked, Some(firmware().checksums()));
        assert!(core.rom().is_none());

        let dsp = core.dsp();
        assert_eq!(dsp.regs.pc, RESET_VECTOR);
        assert!(dsp.mem.iram.as_slice().iter().all(|&w| w == HALT));
        assert!(dsp.mem.dram.iter().all(|&w| w == 0));
        assert_eq!(dsp.mem.irom[0], 0x029F);
        assert_eq!(
            dsp.regs.status,
            Status::from_bits(0)
                .with_interrupt_enable(true)
                .with_external_interrupt_enable(true)
        );
        assert_eq!(core.labels().get("CMBH", labels::LabelKind::Value), Some(0xFFFE));
    }

    #[test]
    fn rejected_roms() {
        let result = Core::new(Config::default(), &firmware(), |_, _| false);
        assert!(matches!(result, Err(InitError::RomRejected)));

        let mut bad = firmware();
        bad.coef.pop();
        let result = Core::new(Config::default(), &bad, |_, _| true);
        assert!(matches!(result, Err(InitError::Firmware { .. })));
    }

    #[test]
    fn register_access() {
        let mut core = core(CoreKind::Interpreter);

        core.write_register(Reg::Acm0 as u8, 0x8000).unwrap();
        core.write_register(PC_INDEX, 0x0042).unwrap();
        assert_eq!(core.read_register(Reg::Acm0 as u8).unwrap(), 0x8000);
        assert_eq!(core.read_register(PC_INDEX).unwrap(), 0x0042);
        assert!(matches!(
            core.read_register(33),
            Err(DebugError::InvalidRegister { index: 33 })
        ));

        assert_eq!(core.read_memory(MemoryRegion::Iram, 0), Some(HALT));
        assert_eq!(core.read_memory(MemoryRegion::Coef, COEF_LEN as u16), None);
    }

    #[test]
    fn stopped_cores_do_not_run() {
        let mut core = core(CoreKind::Interpreter);
        let mut host = RamHost::new(0, 0);

        core.set_state(State::Stopped);
        assert_eq!(core.run_cycles(&mut host, 100), 100);
        assert_eq!(core.dsp().step_counter, 0);

        core.set_state(State::Running);
        core.run_cycles(&mut host, 100);
        assert!(core.dsp().step_counter > 0);
    }

    #[test]
    fn breakpoints_switch_to_stepping() {
        let mut core = core(CoreKind::Interpreter);
        let mut host = RamHost::new(0, 0);

        // inc $acc0; jmp 0x0000
        load_code(&mut core, &[0x7600, 0x029F, 0x0000]);
        core.set_breakpoint(0x0001);

        assert_eq!(core.run_cycles(&mut host, 50), 49);
        assert_eq!(core.dsp().regs.pc, 0x0001);
        assert_eq!(core.state(), State::Stepping);

        // one instruction per step
        core.controller().request(Request::Step);
        assert_eq!(core.run_cycles(&mut host, 50), 49);
        assert_eq!(core.dsp().regs.pc, 0x0000);

        core.set_state(State::Running);
        core.run_cycles(&mut host, 50);
        assert_eq!(core.dsp().regs.pc, 0x0001);
        assert_eq!(core.dsp().regs.acc40[0].get(), 2);

        // resuming steps over the breakpoint it stopped at
        core.set_state(State::Running);
        assert_eq!(core.run_cycles(&mut host, 3), 1);
        assert_eq!(core.dsp().regs.pc, 0x0001);
        assert_eq!(core.dsp().regs.acc40[0].get(), 3);
        assert_eq!(core.state(), State::Stepping);
    }

    #[test]
    fn recompiler_runs_uploaded_code() {
        for kind in [CoreKind::Interpreter, CoreKind::Recompiler] {
            let mut core = core(kind);
            let mut host = RamHost::new(0x100, 0);

            // lri $ac0.m, #0x1234; sr @0x0010, $ac0.m; halt
            let code: [u16; 5] = [0x009E, 0x1234, 0x00FE, 0x0010, 0x0021];
            for (i, word) in code.iter().enumerate() {
                host.ram[0x40 + 2 * i..][..2].copy_from_slice(&word.to_be_bytes());
            }

            core.upload(&mut host, 0x40, 0x0000, 2 * code.len() as u16);
            assert_eq!(host.uploads, [(0x0000, 5)]);
            core.write_register(PC_INDEX, 0).unwrap();

            core.run_cycles(&mut host, 100);
            assert!(core.dsp().halted());
            assert_eq!(core.read_memory(MemoryRegion::Dram, 0x10), Some(0x1234));
        }
    }

    #[test]
    fn oversized_dma_faults() {
        let mut core = core(CoreKind::Interpreter);
        let mut host = RamHost::new(0, 0);

        core.upload(&mut host, 0, 0, 0x8000);
        assert!(core.dsp().halted());
        assert_eq!(core.fault(), Some(Fault::OversizedDma { len: 0x8000 }));
    }

    #[test]
    fn save_and_load() {
        let mut core = core(CoreKind::Recompiler);
        let mut host = RamHost::new(0, 0);

        // inc $acc0; jmp 0x0000
        load_code(&mut core, &[0x7600, 0x029F, 0x0000]);
        core.run_cycles(&mut host, 20);

        let saved = core.save_state().unwrap();
        let regs = core.dsp().regs.clone();
        let steps = core.dsp().step_counter;

        core.run_cycles(&mut host, 20);
        assert_ne!(core.dsp().regs, regs);

        core.load_state(&saved).unwrap();
        assert_eq!(core.dsp().regs, regs);
        assert_eq!(core.dsp().step_counter, steps);

        // blocks compiled before the load are gone, execution picks up where it was
        core.run_cycles(&mut host, 20);
        assert_eq!(core.dsp().step_counter, steps + 20);
    }

    #[test]
    fn listing() {
        let mut core = core(CoreKind::Interpreter);
        core.labels_mut()
            .register_label("boot", RESET_VECTOR, labels::LabelKind::Procedure);

        let lines = core.disassemble(RESET_VECTOR, 2);
        assert_eq!(lines[0], "boot:");
        assert!(lines[1].ends_with("jmp 0x0000"));
        assert_eq!(core.symbols().line_of(RESET_VECTOR), Some(1));
    }
}
