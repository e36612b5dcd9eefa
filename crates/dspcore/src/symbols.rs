//! Mapping between instruction addresses and lines of a disassembly listing.
use crate::labels::{LabelKind, LabelMap};
use dspint::{Ins, Memory, disasm};
use rustc_hash::FxHashMap;

/// Line layout of a disassembled range.
#[derive(Debug, Clone, Default)]
pub struct Symbols {
    /// Address of every line. Label lines map to the address they name.
    line_addrs: Vec<u16>,
    addr_lines: FxHashMap<u16, usize>,
}

impl Symbols {
    /// Disassembles `count` instructions starting at `start`, emitting a `name:` line before
    /// every labeled instruction. Returns the layout and the listing.
    pub fn build(mem: &Memory, start: u16, count: usize, labels: &LabelMap) -> (Self, Vec<String>) {
        let mut symbols = Self::default();
        let mut lines = Vec::with_capacity(count);

        let mut addr = start;
        for _ in 0..count {
            if let Some(name) = labels
                .name_of(addr, LabelKind::Procedure)
                .or_else(|| labels.name_of(addr, LabelKind::Instruction))
            {
                symbols.line_addrs.push(addr);
                lines.push(format!("{name}:"));
            }

            let Some(base) = mem.imem(addr) else {
                symbols.push(addr, lines.len());
                lines.push(format!("{addr:04X}  ----  <unmapped>"));
                addr = addr.wrapping_add(1);
                continue;
            };

            let ins = Ins::new(base);
            let ins = if ins.decoded().needs_extra {
                Ins::with_extra(base, mem.imem(addr.wrapping_add(1)).unwrap_or_default())
            } else {
                ins
            };

            let words = if ins.decoded().needs_extra {
                format!("{base:04X} {:04X}", ins.extra)
            } else {
                format!("{base:04X}     ")
            };

            symbols.push(addr, lines.len());
            lines.push(format!(
                "{addr:04X}  {words}  {}",
                disasm::disassemble(ins, addr, labels)
            ));

            addr = addr.wrapping_add(ins.decoded().len());
        }

        (symbols, lines)
    }

    fn push(&mut self, addr: u16, line: usize) {
        self.line_addrs.push(addr);
        self.addr_lines.insert(addr, line);
    }

    /// Listing line of the instruction at `addr`.
    pub fn line_of(&self, addr: u16) -> Option<usize> {
        self.addr_lines.get(&addr).copied()
    }

    /// Address shown at `line`.
    pub fn addr_of(&self, line: usize) -> Option<u16> {
        self.line_addrs.get(line).copied()
    }

    pub fn lines(&self) -> usize {
        self.line_addrs.len()
    }
}
