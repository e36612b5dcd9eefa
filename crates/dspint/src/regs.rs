//! The register file.
use bitos::{BitUtils, bitos};
use strum::{FromRepr, VariantArray};
use tinyvec::ArrayVec;

/// Sign extends a 40-bit value stored in the low bits of `value`.
#[inline(always)]
pub fn sext40(value: i64) -> i64 {
    (value << 24) >> 24
}

/// A 40-bit accumulator. `high` holds the top 8 bits sign extended to 16.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Acc40 {
    pub low: u16,
    pub mid: u16,
    pub high: u16,
}

impl Acc40 {
    pub const MIN: i64 = (1 << 63) >> 24;

    pub fn from(value: i64) -> Self {
        Self {
            low: value.bits(0, 16) as u16,
            mid: value.bits(16, 32) as u16,
            high: value.bits(32, 40) as u8 as i8 as i16 as u16,
        }
    }

    #[inline(always)]
    pub fn get(&self) -> i64 {
        let bits = 0
            .with_bits(0, 16, self.low as i64)
            .with_bits(16, 32, self.mid as i64)
            .with_bits(32, 40, (self.high & 0xFF) as i64);

        sext40(bits)
    }

    #[inline(always)]
    pub fn set(&mut self, value: i64) -> i64 {
        *self = Self::from(value);
        self.get()
    }

    /// The middle word as seen by instructions: saturated to `0x7FFF`/`0x8000` if the
    /// accumulator does not fit in 32 bits and `saturate` is set.
    #[inline(always)]
    pub fn mid_saturated(&self, saturate: bool) -> u16 {
        let value = self.get();
        if saturate && value != value as i32 as i64 {
            if value >= 0 { 0x7FFF } else { 0x8000 }
        } else {
            self.mid
        }
    }
}

/// The product register. The value is `low + (mid1 + mid2) << 16 + high << 32`, with `high`
/// masked to 8 bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Product {
    pub low: u16,
    pub mid1: u16,
    pub high: u16,
    pub mid2: u16,
}

impl Product {
    /// Returns `(carry, overflow, value)`.
    pub fn get(&self) -> (bool, bool, i64) {
        let high = self.high as u8;
        let (sum, carry) = self.mid1.overflowing_add(self.mid2);
        let (c_high, carry) = high.overflowing_add(carry as u8);
        let overflow = high as i8 >= 0 && ((c_high as i8) < 0);

        let bits = 0
            .with_bits(0, 16, self.low as i64)
            .with_bits(16, 32, sum as i64)
            .with_bits(32, 40, c_high as i64);

        (carry, overflow, sext40(bits))
    }

    #[inline(always)]
    pub fn value(&self) -> i64 {
        self.get().2
    }

    pub fn set(&mut self, value: i64) {
        self.low = value as u16;
        self.mid1 = 0;
        self.mid2 = (value >> 16) as u16;
        self.high = (value >> 32) as u8 as u16;
    }
}

#[bitos(16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    #[bits(0)]
    pub carry: bool,
    #[bits(1)]
    pub overflow: bool,
    #[bits(2)]
    pub arithmetic_zero: bool,
    #[bits(3)]
    pub sign: bool,
    #[bits(4)]
    pub above_s32: bool,
    #[bits(5)]
    pub top_two_bits_eq: bool,
    #[bits(6)]
    pub logic_zero: bool,
    #[bits(7)]
    pub overflow_fused: bool,
    #[bits(9)]
    pub interrupt_enable: bool,
    #[bits(11)]
    pub external_interrupt_enable: bool,
    #[bits(13)]
    pub dont_double_result: bool,
    #[bits(14)]
    pub sign_extend_to_40: bool,
    #[bits(15)]
    pub unsigned_mul: bool,
}

impl Default for Status {
    fn default() -> Self {
        Self::from_bits(0)
    }
}

/// A logical register, numbered as in instruction encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, VariantArray)]
#[repr(u8)]
pub enum Reg {
    Ar0,
    Ar1,
    Ar2,
    Ar3,
    Ix0,
    Ix1,
    Ix2,
    Ix3,
    Wr0,
    Wr1,
    Wr2,
    Wr3,
    St0,
    St1,
    St2,
    St3,
    Ach0,
    Ach1,
    Cr,
    Sr,
    Prodl,
    Prodm,
    Prodh,
    Prodm2,
    Axl0,
    Axl1,
    Axh0,
    Axh1,
    Acl0,
    Acl1,
    Acm0,
    Acm1,
}

impl Reg {
    /// Decodes the low 5 bits of `index`.
    #[inline(always)]
    pub fn new(index: u8) -> Self {
        Self::VARIANTS[(index & 0x1F) as usize]
    }

    #[inline(always)]
    pub fn index(self) -> u8 {
        self as u8
    }

    /// Assembler name of this register.
    pub fn name(self) -> &'static str {
        const NAMES: [&str; 32] = [
            "ar0", "ar1", "ar2", "ar3", "ix0", "ix1", "ix2", "ix3", "wr0", "wr1", "wr2", "wr3",
            "st0", "st1", "st2", "st3", "ac0.h", "ac1.h", "config", "sr", "prod.l", "prod.m1",
            "prod.h", "prod.m2", "ax0.l", "ax1.l", "ax0.h", "ax1.h", "ac0.l", "ac1.l", "ac0.m",
            "ac1.m",
        ];

        NAMES[self as usize]
    }

    /// The stack behind `St0..=St3`.
    pub fn stack(self) -> Option<StackId> {
        match self {
            Reg::St0 => Some(StackId::Call),
            Reg::St1 => Some(StackId::Data),
            Reg::St2 => Some(StackId::LoopAddr),
            Reg::St3 => Some(StackId::LoopCount),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, VariantArray)]
pub enum StackId {
    Call,
    Data,
    LoopAddr,
    LoopCount,
}

impl StackId {
    pub fn depth(self) -> usize {
        match self {
            Self::Call => 8,
            _ => 4,
        }
    }
}

/// A hardware stack. Pushing onto a full stack drops the oldest entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stack {
    values: ArrayVec<[u16; 8]>,
}

impl Stack {
    #[inline(always)]
    pub fn top(&self) -> Option<u16> {
        self.values.last().copied()
    }

    pub fn as_slice(&self) -> &[u16] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Returns the dropped entry, if any.
    fn push(&mut self, depth: usize, value: u16) -> Option<u16> {
        let dropped = (self.values.len() >= depth).then(|| self.values.remove(0));
        self.values.push(value);
        dropped
    }

    fn pop(&mut self) -> Option<u16> {
        self.values.pop()
    }

    /// Replaces the top entry, pushing if the stack is empty.
    fn set_top(&mut self, value: u16) {
        match self.values.last_mut() {
            Some(top) => *top = value,
            None => self.values.push(value),
        }
    }
}

/// A raw storage slot. Slots are what the recompiler loads and stores: no saturation, no sign
/// normalisation and no stack push or pop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Reg(Reg),
    /// `low | high << 16` of an AX register pair.
    Ax(u8),
    /// `low | mid << 16 | high << 32`, sign extended from bit 47.
    Acc(u8),
    /// `low | mid1 << 16 | high << 32 | mid2 << 48`.
    Prod,
    Pc,
}

impl Slot {
    pub fn size(self) -> u8 {
        match self {
            Self::Reg(_) | Self::Pc => 2,
            Self::Ax(_) => 4,
            Self::Acc(_) | Self::Prod => 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registers {
    pub pc: u16,
    pub addressing: [u16; 4],
    pub indexing: [u16; 4],
    pub wrapping: [u16; 4],
    pub stacks: [Stack; 4],
    pub product: Product,
    pub acc40: [Acc40; 2],
    pub acc32: [i32; 2],
    pub config: u16,
    pub status: Status,
}

impl Default for Registers {
    fn default() -> Self {
        Self {
            pc: 0,
            addressing: [0; 4],
            indexing: [0; 4],
            wrapping: [0xFFFF; 4],
            stacks: Default::default(),
            product: Product::default(),
            acc40: [Acc40::default(); 2],
            acc32: [0; 2],
            config: 0,
            status: Status::default(),
        }
    }
}

impl Registers {
    #[inline(always)]
    pub fn stack(&self, id: StackId) -> &Stack {
        &self.stacks[id as usize]
    }

    pub fn push(&mut self, id: StackId, value: u16) {
        if let Some(dropped) = self.stacks[id as usize].push(id.depth(), value) {
            tracing::warn!(
                "{:04X}: {id:?} stack overflow, dropped {dropped:04X}",
                self.pc
            );
        }
    }

    pub fn pop(&mut self, id: StackId) -> u16 {
        self.stacks[id as usize].pop().unwrap_or_else(|| {
            tracing::warn!("{:04X}: {id:?} stack underflow", self.pc);
            0
        })
    }

    /// Reads a register as an instruction would, without side effects. `AcmN` saturates in
    /// 40-bit mode.
    pub fn get(&self, reg: Reg) -> u16 {
        match reg {
            Reg::Ar0 | Reg::Ar1 | Reg::Ar2 | Reg::Ar3 => self.addressing[reg as usize],
            Reg::Ix0 | Reg::Ix1 | Reg::Ix2 | Reg::Ix3 => self.indexing[reg as usize - 4],
            Reg::Wr0 | Reg::Wr1 | Reg::Wr2 | Reg::Wr3 => self.wrapping[reg as usize - 8],
            Reg::St0 | Reg::St1 | Reg::St2 | Reg::St3 => {
                self.stacks[reg as usize - 12].top().unwrap_or_default()
            }
            Reg::Ach0 => self.acc40[0].high,
            Reg::Ach1 => self.acc40[1].high,
            Reg::Cr => self.config,
            Reg::Sr => self.status.to_bits(),
            Reg::Prodl => self.product.low,
            Reg::Prodm => self.product.mid1,
            Reg::Prodh => self.product.high,
            Reg::Prodm2 => self.product.mid2,
            Reg::Axl0 => self.acc32[0] as u16,
            Reg::Axl1 => self.acc32[1] as u16,
            Reg::Axh0 => (self.acc32[0] >> 16) as u16,
            Reg::Axh1 => (self.acc32[1] >> 16) as u16,
            Reg::Acl0 => self.acc40[0].low,
            Reg::Acl1 => self.acc40[1].low,
            Reg::Acm0 => self.acc40[0].mid_saturated(self.status.sign_extend_to_40()),
            Reg::Acm1 => self.acc40[1].mid_saturated(self.status.sign_extend_to_40()),
        }
    }

    /// Stores a register keeping the architectural invariants (`AchN` sign extended from 8 bits,
    /// `Prodh` masked to 8 bits, bit 8 of `Sr` clear). Stack registers replace their top.
    pub fn set(&mut self, reg: Reg, value: u16) {
        match reg {
            Reg::Ar0 | Reg::Ar1 | Reg::Ar2 | Reg::Ar3 => self.addressing[reg as usize] = value,
            Reg::Ix0 | Reg::Ix1 | Reg::Ix2 | Reg::Ix3 => self.indexing[reg as usize - 4] = value,
            Reg::Wr0 | Reg::Wr1 | Reg::Wr2 | Reg::Wr3 => self.wrapping[reg as usize - 8] = value,
            Reg::St0 | Reg::St1 | Reg::St2 | Reg::St3 => {
                self.stacks[reg as usize - 12].set_top(value)
            }
            Reg::Ach0 => self.acc40[0].high = value as u8 as i8 as i16 as u16,
            Reg::Ach1 => self.acc40[1].high = value as u8 as i8 as i16 as u16,
            Reg::Cr => self.config = value,
            Reg::Sr => self.status = Status::from_bits(value.with_bit(8, false)),
            Reg::Prodl => self.product.low = value,
            Reg::Prodm => self.product.mid1 = value,
            Reg::Prodh => self.product.high = value & 0xFF,
            Reg::Prodm2 => self.product.mid2 = value,
            Reg::Axl0 => self.acc32[0] = self.acc32[0].with_bits(0, 16, value as i32),
            Reg::Axl1 => self.acc32[1] = self.acc32[1].with_bits(0, 16, value as i32),
            Reg::Axh0 => self.acc32[0] = self.acc32[0].with_bits(16, 32, value as i32),
            Reg::Axh1 => self.acc32[1] = self.acc32[1].with_bits(16, 32, value as i32),
            Reg::Acl0 => self.acc40[0].low = value,
            Reg::Acl1 => self.acc40[1].low = value,
            Reg::Acm0 => self.acc40[0].mid = value,
            Reg::Acm1 => self.acc40[1].mid = value,
        }
    }

    /// Reads a register as an instruction operand. Stack registers are popped.
    pub fn op_read(&mut self, reg: Reg) -> u16 {
        match reg.stack() {
            Some(id) => self.pop(id),
            None => self.get(reg),
        }
    }

    /// Writes a register as an instruction destination. Stack registers are pushed and, in
    /// 40-bit mode, writing `AcmN` loads the whole accumulator with `value << 16`.
    pub fn op_write(&mut self, reg: Reg, value: u16) {
        match reg {
            Reg::Acm0 | Reg::Acm1 if self.status.sign_extend_to_40() => {
                let acc = &mut self.acc40[reg as usize - Reg::Acm0 as usize];
                acc.set((value as i16 as i64) << 16);
            }
            _ => match reg.stack() {
                Some(id) => self.push(id, value),
                None => self.set(reg, value),
            },
        }
    }

    /// Loads a raw storage slot.
    pub fn load_slot(&self, slot: Slot) -> u64 {
        match slot {
            Slot::Reg(Reg::Acm0) => self.acc40[0].mid as u64,
            Slot::Reg(Reg::Acm1) => self.acc40[1].mid as u64,
            Slot::Reg(reg) => self.get(reg) as u64,
            Slot::Ax(i) => self.acc32[i as usize] as u32 as u64,
            Slot::Acc(i) => {
                let acc = self.acc40[i as usize];
                0u64.with_bits(0, 16, acc.low as u64)
                    .with_bits(16, 32, acc.mid as u64)
                    .with_bits(32, 64, acc.high as i16 as i64 as u64)
            }
            Slot::Prod => 0u64
                .with_bits(0, 16, self.product.low as u64)
                .with_bits(16, 32, self.product.mid1 as u64)
                .with_bits(32, 48, self.product.high as u64)
                .with_bits(48, 64, self.product.mid2 as u64),
            Slot::Pc => self.pc as u64,
        }
    }

    /// Stores a raw storage slot.
    pub fn store_slot(&mut self, slot: Slot, value: u64) {
        match slot {
            Slot::Reg(reg) => match reg {
                Reg::Ach0 => self.acc40[0].high = value as u16,
                Reg::Ach1 => self.acc40[1].high = value as u16,
                Reg::Prodh => self.product.high = value as u16,
                Reg::Sr => self.status = Status::from_bits(value as u16),
                _ => self.set(reg, value as u16),
            },
            Slot::Ax(i) => self.acc32[i as usize] = value as u32 as i32,
            Slot::Acc(i) => {
                self.acc40[i as usize] = Acc40 {
                    low: value as u16,
                    mid: (value >> 16) as u16,
                    high: (value >> 32) as u16,
                }
            }
            Slot::Prod => {
                self.product = Product {
                    low: value as u16,
                    mid1: (value >> 16) as u16,
                    high: (value >> 32) as u16,
                    mid2: (value >> 48) as u16,
                }
            }
            Slot::Pc => self.pc = value as u16,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn acc40_sign_extends() {
        let mut acc = Acc40::default();
        assert_eq!(acc.set(0xFF_8000_0000), -0x8000_0000);
        assert_eq!(acc.high, 0xFFFF);

        assert_eq!(acc.set(0x7F_FFFF_FFFF), 0x7F_FFFF_FFFF);
        assert_eq!(acc.high, 0x007F);

        assert_eq!(acc.set(1 << 40), 0);
        assert_eq!(Acc40::from(Acc40::MIN).get(), Acc40::MIN);
    }

    #[test]
    fn mid_saturates_in_40_bit_mode() {
        let acc = Acc40::from(0x01_2345_6789);
        assert_eq!(acc.mid_saturated(false), 0x2345);
        assert_eq!(acc.mid_saturated(true), 0x7FFF);

        let acc = Acc40::from(-0x01_2345_6789);
        assert_eq!(acc.mid_saturated(true), 0x8000);

        let acc = Acc40::from(-0x1234);
        assert_eq!(acc.mid_saturated(true), 0xFFFF);
    }

    #[test]
    fn product_sums_middle_words() {
        let mut product = Product::default();
        product.set(-0x1234_5678);
        assert_eq!(product.get(), (false, false, -0x1234_5678));

        let product = Product {
            low: 0,
            mid1: 0xFFF0,
            high: 0xFF,
            mid2: 0x0010,
        };
        assert_eq!(product.get(), (true, false, 0));
    }

    #[test]
    fn stack_registers() {
        let mut regs = Registers::default();
        regs.op_write(Reg::St0, 0x10);
        regs.op_write(Reg::St0, 0x20);
        assert_eq!(regs.get(Reg::St0), 0x20);

        regs.set(Reg::St0, 0x30);
        assert_eq!(regs.op_read(Reg::St0), 0x30);
        assert_eq!(regs.op_read(Reg::St0), 0x10);
        assert_eq!(regs.op_read(Reg::St0), 0);

        for i in 0..5 {
            regs.push(StackId::Data, i);
        }
        assert_eq!(regs.stack(StackId::Data).as_slice(), &[1, 2, 3, 4]);
    }

    #[test]
    fn op_write_normalises() {
        let mut regs = Registers::default();
        regs.op_write(Reg::Ach0, 0x0080);
        assert_eq!(regs.get(Reg::Ach0), 0xFF80);

        regs.op_write(Reg::Prodh, 0x1234);
        assert_eq!(regs.get(Reg::Prodh), 0x34);

        regs.op_write(Reg::Sr, 0xFFFF);
        assert_eq!(regs.get(Reg::Sr), 0xFEFF);

        regs.op_write(Reg::Acl1, 0x5555);
        regs.op_write(Reg::Acm1, 0x8000);
        assert_eq!(regs.acc40[1].get(), -0x8000_0000);
        assert_eq!(regs.acc40[1].low, 0);
    }

    #[test]
    fn slots_are_raw() {
        let mut regs = Registers::default();
        regs.acc40[0].set(-2);
        assert_eq!(regs.load_slot(Slot::Acc(0)), -2i64 as u64);

        regs.store_slot(Slot::Reg(Reg::Ach1), 0x0180);
        assert_eq!(regs.acc40[1].high, 0x0180);

        regs.store_slot(Slot::Prod, 0x0010_00FF_FFF0_0000);
        assert_eq!(regs.product.mid1, 0xFFF0);
        assert_eq!(regs.product.high, 0x00FF);
        assert_eq!(regs.product.mid2, 0x0010);
        assert_eq!(regs.load_slot(Slot::Prod), 0x0010_00FF_FFF0_0000);

        regs.store_slot(Slot::Ax(1), 0x8000_0001);
        assert_eq!(regs.get(Reg::Axh1), 0x8000);
        assert_eq!(regs.get(Reg::Axl1), 0x0001);
    }
}
