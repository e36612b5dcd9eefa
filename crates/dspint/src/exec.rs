//! Instruction semantics.
//!
//! Every handler runs with `pc` already pointing past the instruction, so branches simply
//! overwrite it and calls push it as the return address.
mod arith;
mod ext;
mod flow;
mod logic;
mod mem;
mod mul;

use crate::{
    Dsp, Host, Ins,
    ins::{ExtensionOpcode, Opcode},
    regs::Registers,
};

pub(crate) type ExecFn = for<'a, 'b> fn(&'a mut Dsp, &'b mut dyn Host, Ins);

pub(crate) static OPCODE_EXEC_LUT: [ExecFn; 1 << 8] = {
    fn nop(_: &mut Dsp, _: &mut dyn Host, _: Ins) {}
    let mut lut = [nop as ExecFn; 1 << 8];

    lut[Opcode::Abs as usize] = Dsp::abs as ExecFn;
    lut[Opcode::Add as usize] = Dsp::add as ExecFn;
    lut[Opcode::Addarn as usize] = Dsp::addarn as ExecFn;
    lut[Opcode::Addax as usize] = Dsp::addax as ExecFn;
    lut[Opcode::Addaxl as usize] = Dsp::addaxl as ExecFn;
    lut[Opcode::Addi as usize] = Dsp::addi as ExecFn;
    lut[Opcode::Addis as usize] = Dsp::addis as ExecFn;
    lut[Opcode::Addp as usize] = Dsp::addp as ExecFn;
    lut[Opcode::Addpaxz as usize] = Dsp::addpaxz as ExecFn;
    lut[Opcode::Addr as usize] = Dsp::addr as ExecFn;
    lut[Opcode::Andc as usize] = Dsp::andc as ExecFn;
    lut[Opcode::Andcf as usize] = Dsp::andcf as ExecFn;
    lut[Opcode::Andf as usize] = Dsp::andf as ExecFn;
    lut[Opcode::Andi as usize] = Dsp::andi as ExecFn;
    lut[Opcode::Andr as usize] = Dsp::andr as ExecFn;
    lut[Opcode::Asl as usize] = Dsp::asl as ExecFn;
    lut[Opcode::Asr as usize] = Dsp::asr as ExecFn;
    lut[Opcode::Asr16 as usize] = Dsp::asr16 as ExecFn;
    lut[Opcode::Asrn as usize] = Dsp::asrn as ExecFn;
    lut[Opcode::Asrnr as usize] = Dsp::asrnr as ExecFn;
    lut[Opcode::Asrnrx as usize] = Dsp::asrnrx as ExecFn;
    lut[Opcode::Bloop as usize] = Dsp::bloop as ExecFn;
    lut[Opcode::Bloopi as usize] = Dsp::bloopi as ExecFn;
    lut[Opcode::Call as usize] = Dsp::call as ExecFn;
    lut[Opcode::Callr as usize] = Dsp::callr as ExecFn;
    lut[Opcode::Clr as usize] = Dsp::clr as ExecFn;
    lut[Opcode::Clr15 as usize] = Dsp::clr15 as ExecFn;
    lut[Opcode::Clrl as usize] = Dsp::clrl as ExecFn;
    lut[Opcode::Clrp as usize] = Dsp::clrp as ExecFn;
    lut[Opcode::Cmp as usize] = Dsp::cmp as ExecFn;
    lut[Opcode::Cmpaxh as usize] = Dsp::cmpaxh as ExecFn;
    lut[Opcode::Cmpi as usize] = Dsp::cmpi as ExecFn;
    lut[Opcode::Cmpis as usize] = Dsp::cmpis as ExecFn;
    lut[Opcode::Dar as usize] = Dsp::dar as ExecFn;
    lut[Opcode::Dec as usize] = Dsp::dec as ExecFn;
    lut[Opcode::Decm as usize] = Dsp::decm as ExecFn;
    lut[Opcode::Halt as usize] = Dsp::halt as ExecFn;
    lut[Opcode::Iar as usize] = Dsp::iar as ExecFn;
    lut[Opcode::If as usize] = Dsp::ifcc as ExecFn;
    lut[Opcode::Ilrr as usize] = Dsp::ilrr as ExecFn;
    lut[Opcode::Ilrrd as usize] = Dsp::ilrrd as ExecFn;
    lut[Opcode::Ilrri as usize] = Dsp::ilrri as ExecFn;
    lut[Opcode::Ilrrn as usize] = Dsp::ilrrn as ExecFn;
    lut[Opcode::Inc as usize] = Dsp::inc as ExecFn;
    lut[Opcode::Incm as usize] = Dsp::incm as ExecFn;
    lut[Opcode::Jmp as usize] = Dsp::jmp as ExecFn;
    lut[Opcode::Jr as usize] = Dsp::jr as ExecFn;
    lut[Opcode::Loop as usize] = Dsp::loop_ as ExecFn;
    lut[Opcode::Loopi as usize] = Dsp::loopi as ExecFn;
    lut[Opcode::Lr as usize] = Dsp::lr as ExecFn;
    lut[Opcode::Lri as usize] = Dsp::lri as ExecFn;
    lut[Opcode::Lris as usize] = Dsp::lris as ExecFn;
    lut[Opcode::Lrr as usize] = Dsp::lrr as ExecFn;
    lut[Opcode::Lrrd as usize] = Dsp::lrrd as ExecFn;
    lut[Opcode::Lrri as usize] = Dsp::lrri as ExecFn;
    lut[Opcode::Lrrn as usize] = Dsp::lrrn as ExecFn;
    lut[Opcode::Lrs as usize] = Dsp::lrs as ExecFn;
    lut[Opcode::Lsl as usize] = Dsp::lsl as ExecFn;
    lut[Opcode::Lsl16 as usize] = Dsp::lsl16 as ExecFn;
    lut[Opcode::Lsr as usize] = Dsp::lsr as ExecFn;
    lut[Opcode::Lsr16 as usize] = Dsp::lsr16 as ExecFn;
    lut[Opcode::Lsrn as usize] = Dsp::lsrn as ExecFn;
    lut[Opcode::Lsrnr as usize] = Dsp::lsrnr as ExecFn;
    lut[Opcode::Lsrnrx as usize] = Dsp::lsrnrx as ExecFn;
    lut[Opcode::M0 as usize] = Dsp::m0 as ExecFn;
    lut[Opcode::M2 as usize] = Dsp::m2 as ExecFn;
    lut[Opcode::Madd as usize] = Dsp::madd as ExecFn;
    lut[Opcode::Maddc as usize] = Dsp::maddc as ExecFn;
    lut[Opcode::Maddx as usize] = Dsp::maddx as ExecFn;
    lut[Opcode::Mov as usize] = Dsp::mov as ExecFn;
    lut[Opcode::Movax as usize] = Dsp::movax as ExecFn;
    lut[Opcode::Movnp as usize] = Dsp::movnp as ExecFn;
    lut[Opcode::Movp as usize] = Dsp::movp as ExecFn;
    lut[Opcode::Movpz as usize] = Dsp::movpz as ExecFn;
    lut[Opcode::Movr as usize] = Dsp::movr as ExecFn;
    lut[Opcode::Mrr as usize] = Dsp::mrr as ExecFn;
    lut[Opcode::Msub as usize] = Dsp::msub as ExecFn;
    lut[Opcode::Msubc as usize] = Dsp::msubc as ExecFn;
    lut[Opcode::Msubx as usize] = Dsp::msubx as ExecFn;
    lut[Opcode::Mul as usize] = Dsp::mul as ExecFn;
    lut[Opcode::Mulac as usize] = Dsp::mulac as ExecFn;
    lut[Opcode::Mulaxh as usize] = Dsp::mulaxh as ExecFn;
    lut[Opcode::Mulc as usize] = Dsp::mulc as ExecFn;
    lut[Opcode::Mulcac as usize] = Dsp::mulcac as ExecFn;
    lut[Opcode::Mulcmv as usize] = Dsp::mulcmv as ExecFn;
    lut[Opcode::Mulcmvz as usize] = Dsp::mulcmvz as ExecFn;
    lut[Opcode::Mulmv as usize] = Dsp::mulmv as ExecFn;
    lut[Opcode::Mulmvz as usize] = Dsp::mulmvz as ExecFn;
    lut[Opcode::Mulx as usize] = Dsp::mulx as ExecFn;
    lut[Opcode::Mulxac as usize] = Dsp::mulxac as ExecFn;
    lut[Opcode::Mulxmv as usize] = Dsp::mulxmv as ExecFn;
    lut[Opcode::Mulxmvz as usize] = Dsp::mulxmvz as ExecFn;
    lut[Opcode::Neg as usize] = Dsp::neg as ExecFn;
    lut[Opcode::Not as usize] = Dsp::not as ExecFn;
    lut[Opcode::Orc as usize] = Dsp::orc as ExecFn;
    lut[Opcode::Ori as usize] = Dsp::ori as ExecFn;
    lut[Opcode::Orr as usize] = Dsp::orr as ExecFn;
    lut[Opcode::Ret as usize] = Dsp::ret as ExecFn;
    lut[Opcode::Rti as usize] = Dsp::rti as ExecFn;
    lut[Opcode::Sbclr as usize] = Dsp::sbclr as ExecFn;
    lut[Opcode::Sbset as usize] = Dsp::sbset as ExecFn;
    lut[Opcode::Set15 as usize] = Dsp::set15 as ExecFn;
    lut[Opcode::Set16 as usize] = Dsp::set16 as ExecFn;
    lut[Opcode::Set40 as usize] = Dsp::set40 as ExecFn;
    lut[Opcode::Si as usize] = Dsp::si as ExecFn;
    lut[Opcode::Sr as usize] = Dsp::sr as ExecFn;
    lut[Opcode::Srr as usize] = Dsp::srr as ExecFn;
    lut[Opcode::Srrd as usize] = Dsp::srrd as ExecFn;
    lut[Opcode::Srri as usize] = Dsp::srri as ExecFn;
    lut[Opcode::Srrn as usize] = Dsp::srrn as ExecFn;
    lut[Opcode::Srs as usize] = Dsp::srs as ExecFn;
    lut[Opcode::Srsh as usize] = Dsp::srsh as ExecFn;
    lut[Opcode::Sub as usize] = Dsp::sub as ExecFn;
    lut[Opcode::Subarn as usize] = Dsp::subarn as ExecFn;
    lut[Opcode::Subax as usize] = Dsp::subax as ExecFn;
    lut[Opcode::Subp as usize] = Dsp::subp as ExecFn;
    lut[Opcode::Subr as usize] = Dsp::subr as ExecFn;
    lut[Opcode::Tst as usize] = Dsp::tst as ExecFn;
    lut[Opcode::Tstaxh as usize] = Dsp::tstaxh as ExecFn;
    lut[Opcode::Tstprod as usize] = Dsp::tstprod as ExecFn;
    lut[Opcode::Xorc as usize] = Dsp::xorc as ExecFn;
    lut[Opcode::Xori as usize] = Dsp::xori as ExecFn;
    lut[Opcode::Xorr as usize] = Dsp::xorr as ExecFn;
    lut[Opcode::Illegal as usize] = Dsp::illegal as ExecFn;

    lut
};

impl Dsp {
    fn illegal(&mut self, _: &mut dyn Host, ins: Ins) {
        tracing::error!(
            "{:04X}: illegal instruction {:04X}",
            self.regs.pc.wrapping_sub(1),
            ins.base
        );
    }

    /// Executes `ins`, including its extension. `pc` must already point past it.
    pub(crate) fn execute(&mut self, host: &mut dyn Host, ins: Ins) {
        let decoded = ins.decoded();
        match decoded.extension {
            None | Some(ExtensionOpcode::Nop) => {
                OPCODE_EXEC_LUT[decoded.opcode as usize](self, host, ins);
            }
            Some(extension) => {
                // extension operands come from the registers before the main operation
                let previous = self.regs.clone();
                OPCODE_EXEC_LUT[decoded.opcode as usize](self, host, ins);
                self.execute_extension(host, extension, ins, &previous);
            }
        }
    }

    fn execute_extension(
        &mut self,
        host: &mut dyn Host,
        extension: ExtensionOpcode,
        ins: Ins,
        regs: &Registers,
    ) {
        match extension {
            ExtensionOpcode::Nop => (),
            ExtensionOpcode::Dr => self.ext_dr(ins, regs),
            ExtensionOpcode::Ir => self.ext_ir(ins, regs),
            ExtensionOpcode::Nr => self.ext_nr(ins, regs),
            ExtensionOpcode::Mv => self.ext_mv(ins, regs),
            ExtensionOpcode::S => self.ext_s(host, ins, regs),
            ExtensionOpcode::Sn => self.ext_sn(host, ins, regs),
            ExtensionOpcode::L => self.ext_l(host, ins, regs),
            ExtensionOpcode::Ln => self.ext_ln(host, ins, regs),
            ExtensionOpcode::Ls => self.ext_ls(host, ins, regs),
            ExtensionOpcode::Sl => self.ext_sl(host, ins, regs),
            ExtensionOpcode::Lsn => self.ext_lsn(host, ins, regs),
            ExtensionOpcode::Sln => self.ext_sln(host, ins, regs),
            ExtensionOpcode::Lsm => self.ext_lsm(host, ins, regs),
            ExtensionOpcode::Slm => self.ext_slm(host, ins, regs),
            ExtensionOpcode::Lsnm => self.ext_lsnm(host, ins, regs),
            ExtensionOpcode::Slnm => self.ext_slnm(host, ins, regs),
            ExtensionOpcode::Ld => self.ext_ld(host, ins, regs),
            ExtensionOpcode::Ldn => self.ext_ldn(host, ins, regs),
            ExtensionOpcode::Ldm => self.ext_ldm(host, ins, regs),
            ExtensionOpcode::Ldnm => self.ext_ldnm(host, ins, regs),
            ExtensionOpcode::Illegal => tracing::error!(
                "{:04X}: illegal extension opcode in {:04X}",
                self.regs.pc,
                ins.base
            ),
        }
    }
}
