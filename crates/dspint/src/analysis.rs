//! Static analysis of instruction memory.
//!
//! Computes per-address flags used by the run loops and the recompiler: where instructions start,
//! where loops end, which addresses begin a mailbox polling loop and which instructions may change
//! the interrupt enable state.
use crate::{
    IRAM_BASE, IRAM_LEN, IROM_BASE, IROM_LEN, Memory,
    ins::{Ins, Opcode},
    regs::Reg,
};
use bitos::bitos;
use util::boxed_array;

#[bitos(8)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodeFlags {
    #[bits(0)]
    pub start_of_inst: bool,
    #[bits(1)]
    pub idle_skip: bool,
    #[bits(2)]
    pub loop_end: bool,
    #[bits(3)]
    pub check_int: bool,
}

/// Matches any word.
const WILDCARD: u16 = 0xFFFF;

/// Busy-wait loops polling a mailbox, as emitted by known microcode.
const IDLE_SIGNATURES: [&[u16]; 6] = [
    // lrs $acm0, @dmbh; andcf $acm0, #0x8000; jlz <back>
    &[0x26FC, 0x02C0, 0x8000, 0x029D, WILDCARD],
    // lrs $acm1, @dmbh; andcf $acm1, #0x8000; jlz <back>
    &[0x27FC, 0x03C0, 0x8000, 0x029D, WILDCARD],
    // lrs $acm0, @cmbh; andcf $acm0, #0x8000; jlnz <back>
    &[0x26FE, 0x02C0, 0x8000, 0x029C, WILDCARD],
    // lrs $acm1, @cmbh; andcf $acm1, #0x8000; jlnz <back>
    &[0x27FE, 0x03C0, 0x8000, 0x029C, WILDCARD],
    // lr $acm0, @cmbh; andcf $acm0, #0x8000; jlnz <back>
    &[0x00DE, 0xFFFE, 0x02C0, 0x8000, 0x029C, WILDCARD],
    // lr $ax0.h, @0x0352; tstaxh $ax0.h; jz <back>
    &[0x00DA, 0x0352, 0x8600, 0x0295, WILDCARD],
];

/// Per-address code flags for the whole instruction address space.
#[derive(Clone)]
pub struct Analysis {
    flags: Box<[CodeFlags; 1 << 16]>,
}

impl Default for Analysis {
    fn default() -> Self {
        Self {
            flags: boxed_array(CodeFlags::default()),
        }
    }
}

/// Whether `ins` writes the status register as its destination.
fn writes_status(ins: Ins) -> bool {
    let opcode = ins.decoded().opcode;
    let dest = match opcode {
        Opcode::Mrr => (ins.base >> 5) & 0x1F,
        Opcode::Lri
        | Opcode::Lr
        | Opcode::Lrr
        | Opcode::Lrrd
        | Opcode::Lrri
        | Opcode::Lrrn => ins.base & 0x1F,
        _ => return false,
    };

    dest == Reg::Sr as u16
}

impl Analysis {
    #[inline(always)]
    pub fn flags(&self, addr: u16) -> CodeFlags {
        self.flags[addr as usize]
    }

    pub fn clear(&mut self) {
        self.flags.fill(CodeFlags::default());
    }

    /// Analyzes both IRAM and IROM from scratch.
    pub fn analyze_all(&mut self, mem: &Memory) {
        self.clear();
        self.analyze(mem, IRAM_BASE, IRAM_BASE + IRAM_LEN as u16);
        self.analyze(mem, IROM_BASE, IROM_BASE + IROM_LEN as u16);
    }

    /// Analyzes the instructions in `start..end`. Flags of the range are recomputed.
    pub fn analyze(&mut self, mem: &Memory, start: u16, end: u16) {
        let read = |addr: u16| mem.imem(addr).unwrap_or_default();

        for addr in start..end {
            self.flags[addr as usize] = CodeFlags::default();
        }

        let mut addr = start;
        while addr < end {
            let base = read(addr);
            let ins = Ins::with_extra(base, read(addr.wrapping_add(1)));
            let decoded = ins.decoded();

            if decoded.opcode == Opcode::Illegal {
                addr += 1;
                continue;
            }

            self.flags[addr as usize].set_start_of_inst(true);

            match decoded.opcode {
                Opcode::Bloop | Opcode::Bloopi => {
                    self.flags[ins.extra as usize].set_loop_end(true);
                }
                Opcode::Loop | Opcode::Loopi => {
                    self.flags[addr.wrapping_add(1) as usize].set_loop_end(true);
                }
                Opcode::Rti | Opcode::Sbclr | Opcode::Sbset => {
                    self.flags[addr as usize].set_check_int(true);
                }
                _ if writes_status(ins) => {
                    self.flags[addr as usize].set_check_int(true);
                }
                _ => (),
            }

            addr = addr.saturating_add(decoded.len());
        }

        for signature in IDLE_SIGNATURES {
            for addr in start..end {
                let matched = signature.iter().enumerate().all(|(i, expected)| {
                    *expected == WILDCARD || *expected == read(addr.wrapping_add(i as u16))
                });

                if matched {
                    tracing::trace!("idle loop at {addr:04X}");
                    self.flags[addr as usize].set_idle_skip(true);
                }
            }
        }
    }
}
