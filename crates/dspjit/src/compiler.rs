mod arith;
mod ext;
mod logic;
mod memory;

use crate::{
    Settings,
    blocks::Block,
    emitter::{AluOp, Emitter, FlagOp, Operand},
    host::HostReg,
    regcache::{LogicalReg, RegCache},
};
use bitos::BitUtils;
use dspint::{
    Dsp, Ins, Reg, Slot,
    ins::{CondCode, ExtensionOpcode, Opcode},
};
use easyerr::Error;

#[derive(Debug, Error)]
pub enum EmitError {
    #[error("{f0:?} has no native implementation")]
    Unsupported(Ins),
    #[error("extension of {f0:?} has no native implementation")]
    UnsupportedExtension(Ins),
}

/// Registers which read and write like plain storage: no stack push or pop and no saturation.
fn is_plain(reg: Reg) -> bool {
    reg.stack().is_none() && !matches!(reg, Reg::Acm0 | Reg::Acm1)
}

/// Like [`is_plain`], but also excludes `SR`, whose writes may enable interrupts.
fn is_plain_dest(reg: Reg) -> bool {
    is_plain(reg) && reg != Reg::Sr
}

#[inline(always)]
fn reg(index: u16) -> Reg {
    Reg::new(index as u8)
}

#[inline(always)]
fn ar(r: usize) -> Reg {
    Reg::new(r as u8)
}

#[inline(always)]
fn ix(r: usize) -> Reg {
    Reg::new(4 + r as u8)
}

#[inline(always)]
fn wr(r: usize) -> Reg {
    Reg::new(8 + r as u8)
}

#[inline(always)]
fn ach(r: usize) -> Reg {
    Reg::new(Reg::Ach0 as u8 + r as u8)
}

#[inline(always)]
fn axh(r: usize) -> Reg {
    Reg::new(Reg::Axh0 as u8 + r as u8)
}

#[inline(always)]
fn acm(r: usize) -> Reg {
    Reg::new(Reg::Acm0 as u8 + r as u8)
}

/// Whether the data at the static address `addr` can be read without the interpreter.
fn static_read(addr: u16) -> bool {
    addr >= memory::IFX_BASE || addr >> 12 <= 1
}

/// Whether the static address `addr` can be written without the interpreter.
fn static_write(addr: u16) -> bool {
    addr >= memory::IFX_BASE || addr >> 12 == 0
}

/// Checks whether `ins` can be compiled to host code.
fn check(ins: Ins) -> Result<(), EmitError> {
    use Opcode::*;

    let base = ins.base;
    let decoded = ins.decoded();
    let supported = match decoded.opcode {
        Nop | Nx | Iar | Dar | Addarn | Subarn | Si | Srsh => true,
        Mrr => is_plain(reg(base.bits(0, 5))) && is_plain_dest(reg(base.bits(5, 10))),
        Lri => is_plain_dest(reg(base.bits(0, 5))),
        Lr => is_plain_dest(reg(base.bits(0, 5))) && static_read(ins.extra),
        Sr => is_plain(reg(base.bits(0, 5))) && static_write(ins.extra),
        Lrr | Lrrd | Lrri | Lrrn => is_plain_dest(reg(base.bits(0, 5))),
        Srr | Srrd | Srri | Srrn => is_plain(reg(base.bits(0, 5))),
        Lris | Lrs => is_plain_dest(reg(0x18 + base.bits(8, 11))),
        Srs => is_plain(reg(0x1C + base.bits(8, 10))),

        Add | Sub | Addi | Addis | Addax | Subax | Cmp | Cmpi | Cmpis | Inc | Incm | Dec
        | Decm | Mov | Movax | Clr | Tst => true,
        Movr => is_plain(reg(0x18 + base.bits(9, 11))),

        Andi | Ori | Xori | Andc | Orc | Xorc | Andr | Orr | Xorr | Not | Andf | Andcf => true,
        Lsl | Lsr | Asl | Asr => true,
        Sbset | Sbclr | Set15 | Clr15 | Set16 | Set40 | M0 | M2 => true,
        _ => false,
    };

    if !supported {
        return Err(EmitError::Unsupported(ins));
    }

    let extension = match decoded.extension {
        None => true,
        Some(extension) => match extension {
            ExtensionOpcode::Nop | ExtensionOpcode::Dr | ExtensionOpcode::Ir | ExtensionOpcode::Nr => {
                true
            }
            ExtensionOpcode::Mv => is_plain(reg(0x1C + base.bits(0, 2))),
            ExtensionOpcode::L | ExtensionOpcode::Ln => is_plain_dest(reg(0x18 + base.bits(3, 6))),
            ExtensionOpcode::S | ExtensionOpcode::Sn => is_plain(reg(0x1C + base.bits(3, 5))),
            _ => false,
        },
    };

    if !extension {
        return Err(EmitError::UnsupportedExtension(ins));
    }

    Ok(())
}

/// Compiles straight-line guest code into [`Block`]s.
#[derive(Debug, Default)]
pub struct Compiler {
    settings: Settings,
}

impl Compiler {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Whether the instruction `ins` is compiled to host code instead of being interpreted.
    pub fn is_native(ins: Ins) -> bool {
        !ins.decoded().opcode.is_control_flow() && check(ins).is_ok()
    }

    /// Compiles the block starting at `start`.
    pub fn compile(&self, dsp: &Dsp, start: u16) -> Block {
        let block = BlockBuilder::new(dsp, &self.settings).build(start);
        tracing::trace!(
            "compiled {start:04X}..{:04X}: {} instructions, {} ops",
            start.wrapping_add(block.len()),
            block.instructions(),
            block.ops().len()
        );

        block
    }
}

pub(crate) struct BlockBuilder<'a> {
    dsp: &'a Dsp,
    settings: &'a Settings,
    em: Emitter,
    cache: RegCache,
    /// Upper bound of guest instructions executed by the block.
    instructions: u32,
    /// Address of the instruction after the one being compiled.
    next_pc: u16,
    /// Set once the instruction being compiled makes a host call which may request a stop.
    may_stop: bool,
}

impl<'a> BlockBuilder<'a> {
    fn new(dsp: &'a Dsp, settings: &'a Settings) -> Self {
        Self {
            dsp,
            settings,
            em: Emitter::new(),
            cache: RegCache::new(settings),
            instructions: 0,
            next_pc: 0,
            may_stop: false,
        }
    }

    /// Whether `ins` at `addr` must be the last instruction of a block.
    fn ends_block(&self, addr: u16, ins: Ins) -> bool {
        let decoded = ins.decoded();
        let last = addr.wrapping_add(decoded.len() - 1);

        (decoded.opcode.is_control_flow() && decoded.opcode != Opcode::If)
            || self.dsp.analysis.flags(last).loop_end()
    }

    fn build(mut self, start: u16) -> Block {
        self.cache.load_regs(&mut self.em);

        let mut addr = start;
        loop {
            let current = addr;
            let ins = self.dsp.fetch(current);
            let len = ins.decoded().len();
            let next = current.wrapping_add(len);

            if self.ends_block(current, ins) {
                self.terminal(current, len);
                addr = next;
                break;
            }

            let native = if ins.decoded().opcode == Opcode::If {
                let target = self.dsp.fetch(next);
                let nested = self.ends_block(next, target)
                    || target.decoded().opcode == Opcode::If
                    || self.dsp.analysis.flags(next).check_int();

                if nested {
                    self.terminal(current, len);
                    addr = next;
                    break;
                }

                self.conditional(ins, next, target);
                addr = next.wrapping_add(target.decoded().len());
                true
            } else {
                addr = next;
                self.instruction(current, ins)
            };

            // interpreted instructions already checked for interrupts
            if self.dsp.analysis.flags(current).check_int() {
                self.exit_at(addr, native);
                break;
            }

            if self.instructions >= self.settings.max_block_len {
                self.exit_at(addr, false);
                break;
            }
        }

        Block::new(
            start,
            addr.wrapping_sub(start),
            self.instructions,
            self.em,
        )
    }

    /// Interprets the instruction at `addr` and leaves the block.
    fn terminal(&mut self, addr: u16, len: u16) {
        self.cache.flush_all(&mut self.em);
        self.em.interpret(addr, len);
        self.instructions += 1;

        self.cache.save_regs(&mut self.em);
        self.em.exit(false);
    }

    /// Leaves the block, continuing at `pc`.
    fn exit_at(&mut self, pc: u16, check_interrupt: bool) {
        self.cache.save_regs(&mut self.em);
        self.em.imm(HostReg::RET, pc as u64);
        self.em.store(Slot::Pc, HostReg::RET);
        self.em.exit(check_interrupt);
    }

    /// Leaves the block if a host call requested it. The program counter was already set by the
    /// call.
    fn check_stop(&mut self) {
        let resume = self.em.label();
        self.em.check_stop(resume);

        let snapshot = self.cache.snapshot();
        self.cache.save_regs(&mut self.em);
        self.em.exit(false);
        self.cache.restore(snapshot);

        self.em.bind(resume);
    }

    /// Compiles the instruction `ins` at `addr`. Returns whether it was compiled natively.
    fn instruction(&mut self, addr: u16, ins: Ins) -> bool {
        let len = ins.decoded().len();
        self.next_pc = addr.wrapping_add(len);
        self.may_stop = false;

        match check(ins) {
            Ok(()) => {
                self.native(ins);
                self.em.retire();
                self.instructions += 1;

                if self.may_stop {
                    self.check_stop();
                }

                true
            }
            Err(err) => {
                tracing::trace!("{addr:04X}: {err}");
                self.interpret(addr, len);
                false
            }
        }
    }

    /// Runs the instruction at `addr` through the interpreter without leaving the block.
    fn interpret(&mut self, addr: u16, len: u16) {
        self.cache.flush_mem_backed(&mut self.em);
        self.cache.push_regs(&mut self.em);
        self.em.interpret(addr, len);
        self.cache.pop_regs(&mut self.em);
        self.cache.refresh_homes(&mut self.em);

        self.instructions += 1;
        self.check_stop();
    }

    /// Compiles `if cc` followed by `target`, the instruction at `next` it guards.
    fn conditional(&mut self, ins: Ins, next: u16, target: Ins) {
        self.em.retire();
        self.instructions += 1;

        let cond = self.scratch();
        let sr = self.cache.acquire(&mut self.em, Reg::Sr.into(), true);
        self.em
            .condition(cond, sr, CondCode::new(ins.base.bits(0, 4) as u8));
        self.cache.release(&mut self.em, Reg::Sr.into(), false);
        self.cache.settle(&mut self.em);

        let skip = self.em.label();
        self.em.branch(cond, false, skip);
        self.free(cond);

        let merge = self.cache.snapshot();
        self.instruction(next, target);
        self.cache.flush_to(&mut self.em, merge);

        self.em.bind(skip);
    }

    fn native(&mut self, ins: Ins) {
        use Opcode::*;

        let decoded = ins.decoded();
        let extension = decoded
            .extension
            .filter(|extension| *extension != ExtensionOpcode::Nop);
        let source = extension.and_then(|extension| self.ext_prepare(extension, ins));

        match decoded.opcode {
            Nop | Nx => (),

            Iar => self.iar(ins),
            Dar => self.dar(ins),
            Addarn => self.addarn(ins),
            Subarn => self.subarn(ins),
            Mrr => self.mrr(ins),
            Lri => self.lri(ins),
            Lris => self.lris(ins),
            Lr => self.lr(ins),
            Sr => self.sr(ins),
            Lrs => self.lrs(ins),
            Srs => self.srs(ins),
            Srsh => self.srsh(ins),
            Si => self.si(ins),
            Lrr | Lrrd | Lrri | Lrrn => self.lrr(ins),
            Srr | Srrd | Srri | Srrn => self.srr(ins),

            Add => self.add(ins),
            Sub => self.sub(ins),
            Addax => self.addax(ins),
            Subax => self.subax(ins),
            Addi => self.addi(ins),
            Addis => self.addis(ins),
            Cmp => self.cmp(ins),
            Cmpi => self.cmpi(ins),
            Cmpis => self.cmpis(ins),
            Inc => self.inc(ins),
            Incm => self.incm(ins),
            Dec => self.dec(ins),
            Decm => self.decm(ins),
            Mov => self.mov(ins),
            Movax => self.movax(ins),
            Movr => self.movr(ins),
            Clr => self.clr(ins),
            Tst => self.tst(ins),
            Lsl | Asl => self.shift_left(ins),
            Lsr => self.lsr(ins),
            Asr => self.asr(ins),

            Andi => self.logic_imm(ins, AluOp::And),
            Ori => self.logic_imm(ins, AluOp::Or),
            Xori => self.logic_imm(ins, AluOp::Xor),
            Andc => self.logic_acc(ins, AluOp::And),
            Orc => self.logic_acc(ins, AluOp::Or),
            Xorc => self.logic_acc(ins, AluOp::Xor),
            Andr => self.logic_ax(ins, AluOp::And),
            Orr => self.logic_ax(ins, AluOp::Or),
            Xorr => self.logic_ax(ins, AluOp::Xor),
            Not => self.not(ins),
            Andf => self.test_mask(ins, false),
            Andcf => self.test_mask(ins, true),

            Sbset => self.sbset(ins),
            Sbclr => self.sbclr(ins),
            Set15 => self.status_bit(logic::UNSIGNED_MUL, true),
            Clr15 => self.status_bit(logic::UNSIGNED_MUL, false),
            Set40 => self.status_bit(logic::SIGN_EXTEND_TO_40, true),
            Set16 => self.status_bit(logic::SIGN_EXTEND_TO_40, false),
            M0 => self.status_bit(logic::DONT_DOUBLE_RESULT, true),
            M2 => self.status_bit(logic::DONT_DOUBLE_RESULT, false),

            opcode => unreachable!("{opcode:?} passed the native check"),
        }

        if let Some(extension) = extension {
            self.ext_finish(extension, ins, source);
        }
    }

    #[inline(always)]
    fn scratch(&mut self) -> HostReg {
        self.cache.scratch(&mut self.em)
    }

    #[inline(always)]
    fn free(&mut self, host: HostReg) {
        self.cache.free_scratch(host);
    }

    /// Frees `operand` if it is a register.
    #[inline(always)]
    fn free_operand(&mut self, operand: Operand) {
        if let Operand::Reg(host) = operand {
            self.free(host);
        }
    }

    /// Copies `reg` into a new temporary.
    fn read(&mut self, reg: impl Into<LogicalReg>, signed: bool) -> HostReg {
        let dst = self.scratch();
        self.cache.read(&mut self.em, reg.into(), dst, signed);
        dst
    }

    fn write(&mut self, reg: impl Into<LogicalReg>, value: impl Into<Operand>) {
        self.cache.write(&mut self.em, reg.into(), value.into());
    }

    /// Updates the status register from an accumulator result.
    fn flags(&mut self, op: FlagOp, lhs: HostReg, rhs: Operand, result: HostReg) {
        let sr = self.cache.acquire(&mut self.em, Reg::Sr.into(), true);
        self.em.flags(op, sr, lhs, rhs, result);
        self.cache.release(&mut self.em, Reg::Sr.into(), true);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::machine::Machine;
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

    /// Runs `code` once through a compiled block and once through the interpreter, returning
    /// both final states.
    fn both(code: &[u16], setup: impl Fn(&mut Dsp), settings: Settings) -> (Dsp, Dsp, Block) {
        let mut jit = dsp_with(code);
        setup(&mut jit);
        let block = Compiler::new(settings).compile(&jit, 0);
        let executed = Machine::new().run(&block, &mut jit, &mut RamHost::new(0, 0));

        let mut interp = dsp_with(code);
        setup(&mut interp);
        for _ in 0..executed {
            interp.step(&mut RamHost::new(0, 0));
        }

        (jit, interp, block)
    }

    fn assert_same(code: &[u16], setup: impl Fn(&mut Dsp)) {
        for static_accumulators in [false, true] {
            let settings = Settings {
                static_accumulators,
                ..Default::default()
            };

            let (jit, interp, _) = both(code, &setup, settings);
            assert_eq!(jit.regs, interp.regs, "static accumulators: {static_accumulators}");
            assert_eq!(jit.mem.dram, interp.mem.dram);
            assert_eq!(jit.step_counter, interp.step_counter);
        }
    }

    #[test]
    fn native_check() {
        // lri $ar0, #0x1234
        assert!(Compiler::is_native(Ins::with_extra(0x0080, 0x1234)));
        // lri $st0, #0x1234
        assert!(!Compiler::is_native(Ins::with_extra(0x008C, 0x1234)));
        // lri $sr, #0x1234
        assert!(!Compiler::is_native(Ins::with_extra(0x0093, 0x1234)));
        // lris $ac0.m, #0x12
        assert!(!Compiler::is_native(Ins::new(0x0E12)));
        // lris $ax0.l, #0x12
        assert!(Compiler::is_native(Ins::new(0x0812)));
        // mulx (no native version)
        assert!(!Compiler::is_native(Ins::new(0xA000)));
        // jmp
        assert!(!Compiler::is_native(Ins::with_extra(0x029F, 0x0010)));
        // clr $acc0'ls (no native extension)
        assert!(!Compiler::is_native(Ins::new(0x8180)));
        // clr $acc0'mv $ax0.l, $ac0.l
        assert!(Compiler::is_native(Ins::new(0x8110)));
    }

    #[test]
    fn arithmetic_matches_interpreter() {
        assert_same(
            &[
                0x0A12, // lris $ax0.h, #0x12
                0x4A00, // addax $acc0, $ax1
                0x4C00, // add $acc0, $acc1
                0x0400 | 0x80, // addis $acc0, #-0x80
                0x7600, // inc $acc0
                0x7B00, // dec $acc1
                0x8200, // cmp
                0x6D00, // mov $acc1, $acc0
                0x1404, // lsl $acc0, #4
                0x14FC, // asr $acc0, #-4
                0x147C, // lsr $acc0, #-4
                0x0021, // halt
            ],
            |dsp| {
                dsp.regs.acc40[0].set(0x7F_FFFF_0000);
                dsp.regs.acc40[1].set(-3);
            },
        );
    }

    #[test]
    fn logic_matches_interpreter() {
        assert_same(
            &[
                0x0240, 0x0F0F, // andi $ac0.m, #0x0F0F
                0x0360, 0x8000, // ori $ac1.m, #0x8000
                0x3C00, // andc $ac0.m, $ac1.m
                0x3280, // not $ac0.m
                0x02A0, 0x0001, // andf $ac0.m, #0x0001
                0x02C0, 0x0F00, // andcf $ac0.m, #0x0F00
                0x3A00, // orr $ac0.m, $ax1.h
                0x8F00, // set40
                0x8B00, // m0
                0x1303, // sbset #9
                0x0021, // halt
            ],
            |dsp| {
                dsp.regs.acc40[0].set(0x01_1234_5678);
                dsp.regs.acc40[1].set(0x7777_0000);
            },
        );
    }

    #[test]
    fn memory_matches_interpreter() {
        assert_same(
            &[
                0x0081, 0x0010, // lri $ar1, #0x0010
                0x0085, 0x0001, // lri $ix1, #0x0001
                0x1938, // lrri $ax0.l, @$ar1
                0x1B3C, // srri @$ar1, $ac0.l
                0x00FC, 0x0020, // sr @0x0020, $ac0.l
                0x00DA, 0x0020, // lr $ax0.h, @0x0020
                0x2F30, // srs @0x30, $ac1.m (interpreted: saturating read)
                0x2931, // srsh @0x31, $ac1.h
                0x8051, // nx'l $ax0.h, @$ar1
                0x1C60, // mrr $ar3, $ar0
                0x0017, // addarn $ar3, $ix1
                0x0021, // halt
            ],
            |dsp| {
                dsp.mem.dram[0x10] = 0xBEEF;
                dsp.mem.dram[0x11] = 0x1234;
                dsp.regs.acc40[1].set(-0x12_3456_789A);
            },
        );
    }

    #[test]
    fn conditional_matches_interpreter() {
        for sr in [0, 1 << 2] {
            assert_same(
                &[
                    0x0275, // ifz
                    0x0082, 0x5555, // lri $ar2, #0x5555
                    0x0274, // ifnz
                    0x7600, // inc $acc0
                    0x0021, // halt
                ],
                |dsp| dsp.regs.status = dspint::Status::from_bits(sr),
            );
        }
    }

    #[test]
    fn blocks_end_at_control_flow() {
        let dsp = dsp_with(&[
            0x8100, // clr $acc0
            0x029F, 0x0000, // jmp 0x0000
            0x8100, // clr $acc0
        ]);

        let block = Compiler::default().compile(&dsp, 0);
        assert_eq!(block.len(), 3);
        assert_eq!(block.instructions(), 2);
    }

    #[test]
    fn blocks_respect_max_len() {
        let dsp = dsp_with(&[0x0000; 16]);
        let settings = Settings {
            max_block_len: 4,
            ..Default::default()
        };

        let block = Compiler::new(settings).compile(&dsp, 0);
        assert_eq!(block.len(), 4);
        assert_eq!(block.instructions(), 4);

        let mut dsp = dsp;
        let executed = Machine::new().run(&block, &mut dsp, &mut RamHost::new(0, 0));
        assert_eq!(executed, 4);
        assert_eq!(dsp.regs.pc, 4);
    }

    #[test]
    fn status_writes_end_block() {
        let dsp = dsp_with(&[
            0x1306, // sbset #6
            0x0000, // nop
        ]);

        let block = Compiler::default().compile(&dsp, 0);
        assert_eq!(block.len(), 1);
    }
}
