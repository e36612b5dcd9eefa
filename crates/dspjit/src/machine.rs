//! Executes compiled blocks on the abstract host machine.
use crate::{
    blocks::Block,
    emitter::{AluOp, FlagOp, HostCall, Op, Operand},
    host::{HOST_REGS, HostReg, SCRATCH},
};
use dspint::{Dsp, Host, Status, alu};

/// Value of the frame register on block entry. Blocks must hand it back unchanged.
const FRAME_SENTINEL: u64 = 0x0F4A_3E5E_0F4A_3E5E;

/// Value left in registers clobbered by host calls.
const CLOBBERED: u64 = 0xDEAD_BEEF_DEAD_BEEF;

#[inline(always)]
fn extend(value: u64, bits: u8, signed: bool) -> u64 {
    let shift = 64 - bits as u32;
    if signed {
        (((value << shift) as i64) >> shift) as u64
    } else {
        (value << shift) >> shift
    }
}

#[inline(always)]
fn alu(op: AluOp, lhs: u64, rhs: u64) -> u64 {
    match op {
        AluOp::Add => lhs.wrapping_add(rhs),
        AluOp::Sub => lhs.wrapping_sub(rhs),
        AluOp::And => lhs & rhs,
        AluOp::Or => lhs | rhs,
        AluOp::Xor => lhs ^ rhs,
        AluOp::Shl => lhs.wrapping_shl(rhs as u32),
        AluOp::Shr => lhs.wrapping_shr(rhs as u32),
        AluOp::Sar => (lhs as i64).wrapping_shr(rhs as u32) as u64,
        AluOp::Eq => (lhs == rhs) as u64,
        AluOp::LtU => (lhs < rhs) as u64,
    }
}

#[inline(always)]
fn rotate(value: u64, amount: u8, width: u8) -> u64 {
    match width {
        64 => value.rotate_right(amount as u32),
        32 => (value as u32).rotate_right(amount as u32) as u64,
        16 => (value as u16).rotate_right(amount as u32) as u64,
        _ => unreachable!("unsupported rotation width {width}"),
    }
}

/// The host machine state.
#[derive(Debug)]
pub struct Machine {
    regs: [u64; HOST_REGS],
    stack: Vec<u64>,
    /// Set by host calls which require the block to exit.
    stop: bool,
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

impl Machine {
    pub fn new() -> Self {
        Self {
            regs: [0; HOST_REGS],
            stack: Vec::with_capacity(16),
            stop: false,
        }
    }

    #[inline(always)]
    fn get(&self, reg: HostReg) -> u64 {
        self.regs[reg.index()]
    }

    #[inline(always)]
    fn set(&mut self, reg: HostReg, value: u64) {
        self.regs[reg.index()] = value;
    }

    #[inline(always)]
    fn operand(&self, operand: Operand) -> u64 {
        match operand {
            Operand::Reg(reg) => self.get(reg),
            Operand::Imm(value) => value,
        }
    }

    fn clobber_scratch(&mut self) {
        for reg in SCRATCH {
            self.set(reg, CLOBBERED);
        }
    }

    fn pop(&mut self) -> u64 {
        let Some(value) = self.stack.pop() else {
            panic!("host stack underflow");
        };

        value
    }

    /// Runs `block` until it exits and returns how many guest instructions it executed.
    pub fn run(&mut self, block: &Block, dsp: &mut Dsp, host: &mut dyn Host) -> u32 {
        self.regs = [0; HOST_REGS];
        self.set(HostReg::FRAME, FRAME_SENTINEL);
        self.stack.clear();
        self.stop = false;

        let ops = block.ops();
        let mut executed = 0;
        let mut index = 0;

        loop {
            match ops[index] {
                Op::Label(_) => (),
                Op::Imm { dst, value } => self.set(dst, value),
                Op::Mov { dst, src } => self.set(dst, self.get(src)),
                Op::Alu { op, dst, lhs, rhs } => {
                    let value = alu(op, self.get(lhs), self.operand(rhs));
                    self.set(dst, value);
                }
                Op::Extend { dst, bits, signed } => self.set(dst, extend(self.get(dst), bits, signed)),
                Op::Insert { dst, src, bits } => {
                    let mask = (1u64 << bits) - 1;
                    let value = (self.get(dst) & !mask) | (self.operand(src) & mask);
                    self.set(dst, value);
                }
                Op::Rotate { dst, amount, width } => {
                    self.set(dst, rotate(self.get(dst), amount, width));
                }
                Op::AddrStep {
                    dst,
                    wrap,
                    step,
                    sub,
                } => {
                    let (ar, wr) = (self.get(dst) as u16, self.get(wrap) as u16);
                    let step = self.operand(step) as u16 as i16;
                    let value = if sub {
                        alu::sub_from_addr_reg(ar, wr, step)
                    } else {
                        alu::add_to_addr_reg(ar, wr, step)
                    };

                    self.set(dst, value as u64);
                }
                Op::Flags {
                    op,
                    sr,
                    lhs,
                    rhs,
                    result,
                } => {
                    let mut status = Status::from_bits(self.get(sr) as u16);
                    let lhs = self.get(lhs) as i64;
                    let rhs = self.operand(rhs) as i64;
                    let result = self.get(result) as i64;

                    match op {
                        FlagOp::Add => status.set_arith(
                            alu::add_carried(lhs, result),
                            alu::add_overflowed(lhs, rhs, result),
                            result,
                        ),
                        FlagOp::Sub => status.set_arith(
                            alu::sub_carried(lhs, result),
                            alu::sub_overflowed(lhs, rhs, result),
                            result,
                        ),
                        FlagOp::Move => status.set_arith(false, false, result),
                        FlagOp::Logic => status.set_logic(result, lhs as u16),
                    }

                    self.set(sr, status.to_bits() as u64);
                }
                Op::Condition { dst, sr, code } => {
                    let status = Status::from_bits(self.get(sr) as u16);
                    self.set(dst, status.condition(code) as u64);
                }

                Op::Load { dst, slot } => self.set(dst, dsp.regs.load_slot(slot)),
                Op::Store { slot, src } => dsp.regs.store_slot(slot, self.get(src)),
                Op::ReadData { dst, addr, pc } => {
                    let addr = self.operand(addr) as u16;
                    debug_assert!(addr < 0xFF00, "inline read from IFX {addr:04X}");

                    dsp.regs.pc = pc;
                    self.set(dst, dsp.read_dmem(host, addr) as u64);
                }
                Op::WriteData { addr, src, pc } => {
                    let addr = self.operand(addr) as u16;
                    debug_assert!(addr < 0xFF00, "inline write to IFX {addr:04X}");

                    dsp.regs.pc = pc;
                    dsp.write_dmem(host, addr, self.get(src) as u16);
                }

                Op::Push(reg) => self.stack.push(self.get(reg)),
                Op::Pop(reg) => {
                    let value = self.pop();
                    self.set(reg, value);
                }
                Op::SaveFrame => self.stack.push(self.get(HostReg::FRAME)),
                Op::RestoreFrame => {
                    let value = self.pop();
                    self.set(HostReg::FRAME, value);
                }

                Op::Jump(target) => {
                    index = block.target(target);
                    continue;
                }
                Op::Branch {
                    reg,
                    nonzero,
                    target,
                } => {
                    if (self.get(reg) != 0) == nonzero {
                        index = block.target(target);
                        continue;
                    }
                }
                Op::Call { func, pc, args } => {
                    self.set(HostReg::FRAME, CLOBBERED);
                    let [a, b] = args.map(|arg| self.operand(arg));

                    dsp.regs.pc = pc;
                    let result = match func {
                        HostCall::IfxRead => dsp.ifx_read(host, a as u8) as u64,
                        HostCall::IfxWrite => {
                            dsp.ifx_write(host, a as u8, b as u16);
                            0
                        }
                    };

                    self.stop |= dsp.halted() || dsp.hw.code_changed || dsp.exceptions != 0;

                    self.clobber_scratch();
                    self.set(HostReg::RET, result);
                }
                Op::Interpret { addr, len } => {
                    self.set(HostReg::FRAME, CLOBBERED);

                    dsp.execute_at(host, addr);
                    executed += 1;
                    self.stop |= dsp.regs.pc != addr.wrapping_add(len)
                        || dsp.halted()
                        || dsp.hw.code_changed
                        || dsp.exceptions != 0;

                    self.clobber_scratch();
                    self.set(HostReg::RET, CLOBBERED);
                }
                Op::Retire => {
                    executed += 1;
                    dsp.step_counter += 1;
                }
                Op::CheckStop { resume } => {
                    if !self.stop {
                        index = block.target(resume);
                        continue;
                    }

                    self.stop = false;
                }
                Op::Exit { check_interrupt } => {
                    assert!(self.stack.is_empty(), "host stack is unbalanced on exit");
                    debug_assert_eq!(
                        self.get(HostReg::FRAME),
                        FRAME_SENTINEL,
                        "frame register was not preserved"
                    );

                    if check_interrupt {
                        dsp.check_external_interrupt();
                    }

                    return executed;
                }
            }

            index += 1;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::emitter::Emitter;
    use dspint::{RamHost, Reg, Slot, hw::ifx, ins::CondCode};

    fn run(em: Emitter, dsp: &mut Dsp, host: &mut RamHost) -> u32 {
        let block = Block::new(0, 0, 0, em);
        Machine::new().run(&block, dsp, host)
    }

    fn h(index: u8) -> HostReg {
        HostReg::new(index)
    }

    #[test]
    fn arithmetic_and_flags() {
        let mut dsp = Dsp::new().unwrap();
        let mut host = RamHost::new(0, 0);

        let mut em = Emitter::new();
        em.save_frame();
        em.imm(h(1), 0x7F_FFFF_FFFF);
        em.mov(h(2), h(1));
        em.alu(AluOp::Add, h(2), h(2), Operand::Imm(1));
        em.extend(h(2), 40, true);
        em.load(h(3), Slot::Reg(Reg::Sr));
        em.flags(FlagOp::Add, h(3), h(1), Operand::Imm(1), h(2));
        em.store(Slot::Reg(Reg::Sr), h(3));
        em.store(Slot::Acc(0), h(2));
        em.restore_frame();
        em.exit(false);
        run(em, &mut dsp, &mut host);

        assert_eq!(dsp.regs.acc40[0].get(), -0x80_0000_0000);
        assert!(dsp.regs.status.overflow());
        assert!(dsp.regs.status.sign());
        assert!(!dsp.regs.status.carry());
    }

    #[test]
    fn branches_follow_conditions() {
        let mut dsp = Dsp::new().unwrap();
        let mut host = RamHost::new(0, 0);
        dsp.regs.status.set_arithmetic_zero(true);

        let mut em = Emitter::new();
        let skip = em.label();
        em.save_frame();
        em.load(h(4), Slot::Reg(Reg::Sr));
        em.condition(h(1), h(4), CondCode::new(0b0100));
        em.imm(h(5), 0x1111);
        em.branch(h(1), false, skip);
        em.imm(h(5), 0x2222);
        em.bind(skip);
        em.store(Slot::Reg(Reg::Ar0), h(5));
        em.restore_frame();
        em.exit(false);
        run(em, &mut dsp, &mut host);

        // NZ does not hold, so the second immediate is skipped
        assert_eq!(dsp.regs.addressing[0], 0x1111);
    }

    #[test]
    fn rotation_and_insertion() {
        assert_eq!(rotate(0x1234_5678, 16, 32), 0x5678_1234);
        assert_eq!(rotate(0x0000_0001_0000_0000, 32, 64), 1);
        assert_eq!(extend(0x80, 8, true), u64::MAX - 0x7F);
        assert_eq!(extend(0xFFFF_8000, 16, false), 0x8000);
        assert_eq!(alu(AluOp::Sar, (-16i64) as u64, 2), (-4i64) as u64);
        assert_eq!(alu(AluOp::LtU, 0xFEFF, 0xFF00), 1);
    }

    #[test]
    fn retire_counts_steps() {
        let mut dsp = Dsp::new().unwrap();
        let mut host = RamHost::new(0, 0);

        let mut em = Emitter::new();
        em.save_frame();
        em.retire();
        em.retire();
        em.restore_frame();
        em.exit(false);

        assert_eq!(run(em, &mut dsp, &mut host), 2);
        assert_eq!(dsp.step_counter, 2);
    }

    #[test]
    fn ifx_write_requests_stop() {
        let mut dsp = Dsp::new().unwrap();
        let mut host = RamHost::new(0, 0);

        let mut em = Emitter::new();
        let resume = em.label();
        em.save_frame();
        em.call(
            HostCall::IfxWrite,
            0x0010,
            [Operand::Imm(0xFF00 | ifx::DIRQ as u64), Operand::Imm(1)],
        );
        em.check_stop(resume);
        em.restore_frame();
        em.imm(h(1), 0xAAAA);
        em.store(Slot::Reg(Reg::Ar1), h(1));
        em.exit(false);
        em.bind(resume);
        em.restore_frame();
        em.exit(false);
        run(em, &mut dsp, &mut host);

        // raising the CPU interrupt does not stop the block
        assert_eq!(dsp.regs.addressing[1], 0);
        assert_eq!(dsp.regs.pc, 0x0010);
    }

    #[test]
    fn interpret_stops_on_halt() {
        let mut dsp = Dsp::new().unwrap();
        let mut host = RamHost::new(0, 0);
        {
            let mut iram = dsp.mem.iram.unprotect().unwrap();
            iram[0] = 0x0021; // halt
        }

        let mut em = Emitter::new();
        let resume = em.label();
        em.save_frame();
        em.interpret(0, 1);
        em.check_stop(resume);
        em.restore_frame();
        em.exit(false);
        em.bind(resume);
        em.imm(h(1), 0x5555);
        em.store(Slot::Reg(Reg::Ar0), h(1));
        em.restore_frame();
        em.exit(false);

        assert_eq!(run(em, &mut dsp, &mut host), 1);
        assert!(dsp.halted());
        assert_eq!(dsp.regs.addressing[0], 0);
    }

    #[test]
    #[should_panic(expected = "unbalanced")]
    fn unbalanced_stack_is_caught() {
        let mut dsp = Dsp::new().unwrap();
        let mut host = RamHost::new(0, 0);

        let mut em = Emitter::new();
        em.save_frame();
        em.exit(false);
        run(em, &mut dsp, &mut host);
    }
}
