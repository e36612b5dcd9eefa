//! Arithmetic shared by the interpreter and the recompiler.
use crate::ins::CondCode;
use crate::regs::Status;
use bitos::BitUtils;

#[inline(always)]
pub fn add_carried(lhs: i64, new: i64) -> bool {
    lhs as u64 > new as u64
}

#[inline(always)]
pub fn sub_carried(lhs: i64, new: i64) -> bool {
    lhs as u64 >= new as u64
}

#[inline(always)]
pub fn add_overflowed(lhs: i64, rhs: i64, new: i64) -> bool {
    (lhs > 0 && rhs > 0 && new <= 0) || (lhs < 0 && rhs < 0 && new >= 0)
}

#[inline(always)]
pub fn sub_overflowed(lhs: i64, rhs: i64, new: i64) -> bool {
    add_overflowed(lhs, -rhs, new)
}

#[inline(always)]
pub fn round_40(value: i64) -> i64 {
    if value.bit(16) {
        (value + 0x8000) & !0xFFFF
    } else {
        (value + 0x7FFF) & !0xFFFF
    }
}

/// Adds `value` to an address register, wrapping inside the power-of-two window described by
/// `wr`.
pub fn add_to_addr_reg(ar: u16, wr: u16, value: i16) -> u16 {
    // significant bits of wr, minimum 1
    let n = (16 - wr.leading_zeros()).max(1);
    let mask = 1u16.checked_shl(n).map_or(!0, |r| r - 1);

    // carry out of bit n
    let carry = ((ar & mask) as u32 + (value as u16 & mask) as u32) > mask as u32;

    let mut result = ar.wrapping_add_signed(value);
    if value >= 0 {
        if carry {
            result = result.wrapping_sub(wr.wrapping_add(1));
        }
    } else {
        let low_sum = result & mask;
        let low_not_wrap = (!wr) & mask;
        let carry_again = low_sum < low_not_wrap;

        if !carry || carry_again {
            result = result.wrapping_add(wr.wrapping_add(1));
        }
    }

    result
}

/// Subtracts `value` from an address register, wrapping inside the power-of-two window
/// described by `wr`.
pub fn sub_from_addr_reg(ar: u16, wr: u16, value: i16) -> u16 {
    // one's complement, the missing +1 is folded into the carry below
    let value = !value;

    let n = (16 - wr.leading_zeros()).max(1);
    let mask = 1u16.checked_shl(n).map_or(!0, |r| r - 1);

    let carry = ((ar & mask) as u32 + (value as u16 & mask) as u32 + 1) > mask as u32;

    let mut result = ar.wrapping_add_signed(value).wrapping_add(1);
    if value.wrapping_add(1) > 0 || value.wrapping_add(1) == i16::MIN {
        if carry {
            result = result.wrapping_sub(wr.wrapping_add(1));
        }
    } else {
        let low_sum = result & mask;
        let low_not_wrap = (!wr) & mask;
        let carry_again = low_sum < low_not_wrap;

        if !carry || carry_again {
            result = result.wrapping_add(wr.wrapping_add(1));
        }
    }

    result
}

impl Status {
    /// Updates the flags every accumulator-producing instruction sets.
    #[inline(always)]
    pub fn set_result(&mut self, value: i64) {
        self.set_sign(value < 0);
        self.set_arithmetic_zero(value == 0);
        self.set_above_s32(value != value as i32 as i64);
        self.set_top_two_bits_eq(value.bit(30) == value.bit(31));
        self.set_overflow_fused(self.overflow() || self.overflow_fused());
    }

    /// Flags of an arithmetic result with explicit carry and overflow.
    #[inline(always)]
    pub fn set_arith(&mut self, carry: bool, overflow: bool, value: i64) {
        self.set_carry(carry);
        self.set_overflow(overflow);
        self.set_result(value);
    }

    /// Flags of a logic operation on the middle word of an accumulator.
    #[inline(always)]
    pub fn set_logic(&mut self, value: i64, mid: u16) {
        self.set_arith(false, false, value);
        self.set_arithmetic_zero(mid == 0);
        self.set_sign((mid as i16) < 0);
    }

    /// Evaluates a condition code.
    pub fn condition(self, code: CondCode) -> bool {
        match code {
            CondCode::GreaterOrEqual => self.overflow() == self.sign(),
            CondCode::Less => self.overflow() != self.sign(),
            CondCode::Greater => self.overflow() == self.sign() && !self.arithmetic_zero(),
            CondCode::LessOrEqual => self.overflow() != self.sign() || self.arithmetic_zero(),
            CondCode::NotZero => !self.arithmetic_zero(),
            CondCode::Zero => self.arithmetic_zero(),
            CondCode::NotCarry => !self.carry(),
            CondCode::Carry => self.carry(),
            CondCode::BelowS32 => !self.above_s32(),
            CondCode::AboveS32 => self.above_s32(),
            CondCode::WeirdA => {
                (self.above_s32() || self.top_two_bits_eq()) && !self.arithmetic_zero()
            }
            CondCode::WeirdB => {
                (!self.above_s32() && !self.top_two_bits_eq()) || self.arithmetic_zero()
            }
            CondCode::NotLogicZero => !self.logic_zero(),
            CondCode::LogicZero => self.logic_zero(),
            CondCode::Overflow => self.overflow(),
            CondCode::Always => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiplyMode {
    Unsigned,
    Mixed,
    Signed,
}

/// Multiplies two 16-bit operands, doubling the result unless `dont_double_result` is set.
/// Operands are only treated as unsigned in unsigned multiplication mode.
pub fn multiply(status: Status, mode: MultiplyMode, a: u16, b: u16) -> i64 {
    let factor = if status.dont_double_result() { 1 } else { 2 };
    let (a, b) = if mode == MultiplyMode::Signed || !status.unsigned_mul() {
        (a as i16 as i64, b as i16 as i64)
    } else if mode == MultiplyMode::Mixed {
        (a as i64, b as i16 as i64)
    } else {
        (a as i64, b as i64)
    };

    a * b * factor
}
