//! Host instructions and the [`Emitter`] which collects them.
use crate::host::HostReg;
use dspint::{Slot, ins::CondCode};

/// A position in the instruction stream. Bound with [`Emitter::bind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(u32);

impl Label {
    #[inline(always)]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Reg(HostReg),
    Imm(u64),
}

impl From<HostReg> for Operand {
    fn from(value: HostReg) -> Self {
        Self::Reg(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
    Add,
    Sub,
    And,
    Or,
    Xor,
    Shl,
    /// Logical shift right.
    Shr,
    /// Arithmetic shift right.
    Sar,
    /// `1` if equal, `0` otherwise.
    Eq,
    /// `1` if unsigned less than, `0` otherwise.
    LtU,
}

/// How a [`Op::Flags`] instruction derives the status flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagOp {
    /// `result = lhs + rhs`.
    Add,
    /// `result = lhs - rhs`.
    Sub,
    /// Carry and overflow cleared.
    Move,
    /// `result` is the accumulator and `lhs` its new middle word.
    Logic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostCall {
    /// `RET = ifx_read(args[0])`.
    IfxRead,
    /// `ifx_write(args[0], args[1])`.
    IfxWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Label(Label),

    Imm {
        dst: HostReg,
        value: u64,
    },
    Mov {
        dst: HostReg,
        src: HostReg,
    },
    Alu {
        op: AluOp,
        dst: HostReg,
        lhs: HostReg,
        rhs: Operand,
    },
    /// Sign or zero extends the low `bits` of `dst`.
    Extend {
        dst: HostReg,
        bits: u8,
        signed: bool,
    },
    /// Replaces the low `bits` of `dst` with those of `src`.
    Insert {
        dst: HostReg,
        src: Operand,
        bits: u8,
    },
    /// Rotates the low `width` bits of `dst` right by `amount`. Bits above `width` are cleared.
    Rotate {
        dst: HostReg,
        amount: u8,
        width: u8,
    },
    /// Steps an address register inside the window described by `wrap`.
    AddrStep {
        dst: HostReg,
        wrap: HostReg,
        step: Operand,
        sub: bool,
    },
    /// Updates the status register `sr` from an accumulator result.
    Flags {
        op: FlagOp,
        sr: HostReg,
        lhs: HostReg,
        rhs: Operand,
        result: HostReg,
    },
    /// `dst = 1` if `code` holds for the status register `sr`, `0` otherwise.
    Condition {
        dst: HostReg,
        sr: HostReg,
        code: CondCode,
    },

    Load {
        dst: HostReg,
        slot: Slot,
    },
    Store {
        slot: Slot,
        src: HostReg,
    },
    /// Reads data memory below the IFX window. `pc` is the program counter seen by diagnostics.
    ReadData {
        dst: HostReg,
        addr: Operand,
        pc: u16,
    },
    /// Writes data memory below the IFX window.
    WriteData {
        addr: Operand,
        src: HostReg,
        pc: u16,
    },

    Push(HostReg),
    Pop(HostReg),
    SaveFrame,
    RestoreFrame,

    Jump(Label),
    /// Jumps to `target` if `reg` is non-zero (or zero, if `nonzero` is unset).
    Branch {
        reg: HostReg,
        nonzero: bool,
        target: Label,
    },
    /// Calls into the interface with `pc` as the current program counter. Requests a stop if the
    /// DSP halted, its code changed or an exception was raised.
    Call {
        func: HostCall,
        pc: u16,
        args: [Operand; 2],
    },
    /// Runs the instruction at `addr` with the interpreter. Requests a stop if it did not fall
    /// through to `addr + len`.
    Interpret {
        addr: u16,
        len: u16,
    },
    /// Retires one natively executed instruction.
    Retire,
    /// Continues at `resume` unless a host call requested a stop since the last check.
    CheckStop {
        resume: Label,
    },
    Exit {
        check_interrupt: bool,
    },
}

/// Collects host instructions for a block.
#[derive(Debug, Default)]
pub struct Emitter {
    ops: Vec<Op>,
    targets: Vec<Option<usize>>,
}

impl Emitter {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline(always)]
    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    #[inline(always)]
    fn push_op(&mut self, op: Op) {
        self.ops.push(op);
    }

    /// Creates an unbound label.
    pub fn label(&mut self) -> Label {
        self.targets.push(None);
        Label(self.targets.len() as u32 - 1)
    }

    pub fn bind(&mut self, label: Label) {
        let target = &mut self.targets[label.index()];
        assert!(target.is_none(), "{label:?} bound twice");

        *target = Some(self.ops.len());
        self.push_op(Op::Label(label));
    }

    pub fn imm(&mut self, dst: HostReg, value: u64) {
        self.push_op(Op::Imm { dst, value });
    }

    pub fn mov(&mut self, dst: HostReg, src: HostReg) {
        if dst != src {
            self.push_op(Op::Mov { dst, src });
        }
    }

    pub fn alu(&mut self, op: AluOp, dst: HostReg, lhs: HostReg, rhs: Operand) {
        self.push_op(Op::Alu { op, dst, lhs, rhs });
    }

    pub fn extend(&mut self, dst: HostReg, bits: u8, signed: bool) {
        debug_assert!((1..64).contains(&bits));
        self.push_op(Op::Extend { dst, bits, signed });
    }

    pub fn insert(&mut self, dst: HostReg, src: Operand, bits: u8) {
        self.push_op(Op::Insert { dst, src, bits });
    }

    pub fn rotate(&mut self, dst: HostReg, amount: u8, width: u8) {
        if amount % width != 0 {
            self.push_op(Op::Rotate { dst, amount, width });
        }
    }

    pub fn addr_step(&mut self, dst: HostReg, wrap: HostReg, step: Operand, sub: bool) {
        self.push_op(Op::AddrStep {
            dst,
            wrap,
            step,
            sub,
        });
    }

    pub fn flags(&mut self, op: FlagOp, sr: HostReg, lhs: HostReg, rhs: Operand, result: HostReg) {
        self.push_op(Op::Flags {
            op,
            sr,
            lhs,
            rhs,
            result,
        });
    }

    pub fn condition(&mut self, dst: HostReg, sr: HostReg, code: CondCode) {
        self.push_op(Op::Condition { dst, sr, code });
    }

    pub fn load(&mut self, dst: HostReg, slot: Slot) {
        self.push_op(Op::Load { dst, slot });
    }

    pub fn store(&mut self, slot: Slot, src: HostReg) {
        self.push_op(Op::Store { slot, src });
    }

    pub fn read_data(&mut self, dst: HostReg, addr: Operand, pc: u16) {
        self.push_op(Op::ReadData { dst, addr, pc });
    }

    pub fn write_data(&mut self, addr: Operand, src: HostReg, pc: u16) {
        self.push_op(Op::WriteData { addr, src, pc });
    }

    pub fn push(&mut self, reg: HostReg) {
        self.push_op(Op::Push(reg));
    }

    pub fn pop(&mut self, reg: HostReg) {
        self.push_op(Op::Pop(reg));
    }

    pub fn save_frame(&mut self) {
        self.push_op(Op::SaveFrame);
    }

    pub fn restore_frame(&mut self) {
        self.push_op(Op::RestoreFrame);
    }

    pub fn jump(&mut self, target: Label) {
        self.push_op(Op::Jump(target));
    }

    pub fn branch(&mut self, reg: HostReg, nonzero: bool, target: Label) {
        self.push_op(Op::Branch {
            reg,
            nonzero,
            target,
        });
    }

    pub fn call(&mut self, func: HostCall, pc: u16, args: [Operand; 2]) {
        for arg in args {
            assert_ne!(
                arg,
                Operand::Reg(HostReg::FRAME),
                "host calls cannot take arguments in the frame register"
            );
        }

        self.push_op(Op::Call { func, pc, args });
    }

    pub fn interpret(&mut self, addr: u16, len: u16) {
        self.push_op(Op::Interpret { addr, len });
    }

    pub fn retire(&mut self) {
        self.push_op(Op::Retire);
    }

    pub fn check_stop(&mut self, resume: Label) {
        self.push_op(Op::CheckStop { resume });
    }

    pub fn exit(&mut self, check_interrupt: bool) {
        self.push_op(Op::Exit { check_interrupt });
    }

    /// Finishes the instruction stream, resolving labels to op indices.
    pub fn finish(self) -> (Vec<Op>, Vec<usize>) {
        let targets = self
            .targets
            .into_iter()
            .enumerate()
            .map(|(i, target)| target.unwrap_or_else(|| panic!("label {i} was never bound")))
            .collect();

        (self.ops, targets)
    }
}
