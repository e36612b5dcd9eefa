//! Interpreter for the audio DSP coprocessor.
//!
//! [`Dsp`] owns the whole coprocessor state: registers, the four memories, the hardware interface
//! and the static code analysis. Everything the DSP needs from the outside world goes through a
//! [`Host`].
pub mod alu;
pub mod analysis;
pub mod disasm;
pub mod host;
pub mod hw;
pub mod ins;
pub mod interp;
pub mod regs;

mod exec;

use crate::analysis::Analysis;
use crate::hw::{Interface, Shared};
use crate::regs::StackId;
use pagemem::ProtectedRegion;
use std::sync::Arc;
use util::boxed_array;

pub use host::{Host, RamHost};
pub use ins::Ins;
pub use pagemem::RegionError;
pub use regs::{Reg, Registers, Slot, Status};

pub const IRAM_BASE: u16 = 0x0000;
pub const IROM_BASE: u16 = 0x8000;
pub const DRAM_BASE: u16 = 0x0000;
pub const COEF_BASE: u16 = 0x1000;

pub const IRAM_LEN: usize = 0x1000;
pub const IROM_LEN: usize = 0x1000;
pub const DRAM_LEN: usize = 0x1000;
pub const COEF_LEN: usize = 0x0800;

pub const RESET_VECTOR: u16 = IROM_BASE;

/// Opcode of `halt`, used to fill instruction RAM.
pub const HALT: u16 = 0x0021;

pub struct Memory {
    /// Instruction RAM. Only writable through [`ProtectedRegion::unprotect`].
    pub iram: ProtectedRegion,
    pub irom: Box<[u16; IROM_LEN]>,
    pub dram: Box<[u16; DRAM_LEN]>,
    pub coef: Box<[u16; COEF_LEN]>,
}

impl Memory {
    pub fn new() -> Result<Self, RegionError> {
        Ok(Self {
            iram: ProtectedRegion::new(IRAM_LEN)?,
            irom: boxed_array(0),
            dram: boxed_array(0),
            coef: boxed_array(0),
        })
    }

    /// Reads instruction memory. Returns `None` for unmapped addresses.
    #[inline(always)]
    pub fn imem(&self, addr: u16) -> Option<u16> {
        match addr >> 12 {
            0x0 => Some(self.iram.as_slice()[(addr - IRAM_BASE) as usize]),
            0x8 => Some(self.irom[(addr - IROM_BASE) as usize]),
            _ => None,
        }
    }

    /// Reads data memory without side effects. The IFX window and unmapped addresses return
    /// `None`.
    #[inline(always)]
    pub fn dmem(&self, addr: u16) -> Option<u16> {
        match addr >> 12 {
            0x0 => Some(self.dram[(addr - DRAM_BASE) as usize]),
            0x1 => Some(self.coef[(addr - COEF_BASE) as usize % COEF_LEN]),
            _ => None,
        }
    }
}

/// The DSP coprocessor.
pub struct Dsp {
    pub regs: Registers,
    pub mem: Memory,
    pub hw: Interface,
    pub analysis: Analysis,
    /// Pending exceptions, one bit per level.
    pub exceptions: u8,
    pub step_counter: u64,
}

impl Dsp {
    pub fn new() -> Result<Self, RegionError> {
        Self::with_shared(Arc::new(Shared::default()))
    }

    /// Creates a DSP which communicates with the host CPU through `shared`.
    pub fn with_shared(shared: Arc<Shared>) -> Result<Self, RegionError> {
        Ok(Self {
            regs: Registers::default(),
            mem: Memory::new()?,
            hw: Interface::new(shared),
            analysis: Analysis::default(),
            exceptions: 0,
            step_counter: 0,
        })
    }

    /// Soft resets the DSP.
    pub fn reset(&mut self) {
        self.step_counter = 0;
        self.exceptions = 0;

        self.regs.pc = RESET_VECTOR;
        self.regs.wrapping = [0xFFFF; 4];
        for stack in &mut self.regs.stacks {
            stack.clear();
        }

        self.analyze_all();
        tracing::debug!("reset, starting at {RESET_VECTOR:04X}");
    }

    #[inline(always)]
    pub fn halted(&self) -> bool {
        self.hw.shared().halted()
    }

    /// Recomputes the code flags of instruction memory in `start..end`.
    pub fn analyze(&mut self, start: u16, end: u16) {
        self.analysis.analyze(&self.mem, start, end);
    }

    pub fn analyze_all(&mut self) {
        self.analysis.analyze_all(&self.mem);
    }

    /// Reads from instruction memory.
    #[inline(always)]
    pub fn read_imem(&self, addr: u16) -> u16 {
        self.mem.imem(addr).unwrap_or_else(|| {
            tracing::warn!("{:04X}: read from unmapped IMEM {addr:04X}", self.regs.pc);
            0
        })
    }

    /// Reads from data memory.
    pub fn read_dmem(&mut self, host: &mut dyn Host, addr: u16) -> u16 {
        match addr >> 12 {
            0x0 | 0x1 => self.mem.dmem(addr).unwrap_or_default(),
            0xF if addr >= 0xFF00 => self.ifx_read(host, addr as u8),
            _ => {
                tracing::warn!("{:04X}: read from unmapped DMEM {addr:04X}", self.regs.pc);
                0
            }
        }
    }

    /// Writes to data memory.
    pub fn write_dmem(&mut self, host: &mut dyn Host, addr: u16, value: u16) {
        match addr >> 12 {
            0x0 => self.mem.dram[(addr - DRAM_BASE) as usize] = value,
            0x1 => tracing::warn!(
                "{:04X}: ignored write of {value:04X} to COEF {addr:04X}",
                self.regs.pc
            ),
            0xF if addr >= 0xFF00 => self.ifx_write(host, addr as u8, value),
            _ => tracing::warn!(
                "{:04X}: ignored write of {value:04X} to unmapped DMEM {addr:04X}",
                self.regs.pc
            ),
        }
    }

    /// Fetches the instruction at `addr`.
    #[inline(always)]
    pub fn fetch(&self, addr: u16) -> Ins {
        let ins = Ins::new(self.read_imem(addr));
        if ins.decoded().needs_extra {
            Ins::with_extra(ins.base, self.read_imem(addr.wrapping_add(1)))
        } else {
            ins
        }
    }

    /// Loop bookkeeping, run after an instruction whose last word ends a loop. `end` is the
    /// address of that word.
    pub(crate) fn handle_loop(&mut self, end: u16) {
        let count = self.regs.stack(StackId::LoopCount).top().unwrap_or_default();
        let loop_addr = self.regs.stack(StackId::LoopAddr).top();

        if count == 0 || loop_addr != Some(end) || self.regs.pc != end.wrapping_add(1) {
            return;
        }

        let count = count - 1;
        self.regs.pop(StackId::LoopCount);
        if count > 0 {
            self.regs.push(StackId::LoopCount, count);
            self.regs.pc = self.regs.stack(StackId::Call).top().unwrap_or_default();
        } else {
            self.regs.pop(StackId::Call);
            self.regs.pop(StackId::LoopAddr);
        }
    }
}
