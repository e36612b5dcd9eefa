//! Disassembler.
use crate::{
    hw::ifx,
    ins::{CondCode, ExtensionOpcode, Ins, Opcode},
    regs::Reg,
};
use bitos::BitUtils;
use std::fmt::Write;

/// Symbolic names for addresses.
pub trait Names {
    /// Name of an instruction address, used for branch targets.
    fn code(&self, addr: u16) -> Option<&str>;

    /// Name of a data address. Defaults to the IFX register names.
    fn data(&self, addr: u16) -> Option<&str> {
        if addr >= 0xFF00 {
            ifx::name(addr as u8)
        } else {
            None
        }
    }
}

/// [`Names`] without any labels.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoNames;

impl Names for NoNames {
    fn code(&self, _: u16) -> Option<&str> {
        None
    }
}

fn reg(index: u16) -> String {
    format!("${}", Reg::new(index as u8).name())
}

fn acc(index: bool) -> &'static str {
    if index { "$ac1" } else { "$ac0" }
}

fn acc_mid(index: bool) -> &'static str {
    if index { "$ac1.m" } else { "$ac0.m" }
}

fn ax(index: bool) -> &'static str {
    if index { "$ax1" } else { "$ax0" }
}

fn ax_high(index: bool) -> &'static str {
    if index { "$ax1.h" } else { "$ax0.h" }
}

fn code_addr(names: &dyn Names, addr: u16) -> String {
    match names.code(addr) {
        Some(name) => name.to_owned(),
        None => format!("0x{addr:04X}"),
    }
}

fn data_addr(names: &dyn Names, addr: u16) -> String {
    match names.data(addr) {
        Some(name) => format!("@{name}"),
        None => format!("@0x{addr:04X}"),
    }
}

/// 6-bit signed shift amount.
fn shift(base: u16) -> i8 {
    ((base.bits(0, 6) as u8) << 2) as i8 >> 2
}

fn conditional(prefix: &str, base: u16) -> String {
    let suffix = CondCode::new(base.bits(0, 4) as u8).suffix();
    format!("{prefix}{suffix}")
}

/// Mnemonic and operands of the main operation.
fn main_op(ins: Ins, names: &dyn Names) -> (String, Vec<String>) {
    let base = ins.base;
    let opcode = ins.decoded().opcode;
    let b8 = base.bit(8);
    let b11 = base.bit(11);
    let imm16 = || format!("#0x{:04X}", ins.extra);
    let imm8s = || format!("#{}", base.bits(0, 8) as u8 as i8);
    let ar = |i: u16| format!("$ar{i}");
    let mnemonic = format!("{opcode:?}").to_lowercase();

    let operands = match opcode {
        Opcode::Dar | Opcode::Iar | Opcode::Subarn => vec![ar(base.bits(0, 2))],
        Opcode::Addarn => vec![ar(base.bits(0, 2)), format!("$ix{}", base.bits(2, 4))],
        Opcode::Loop => vec![reg(base.bits(0, 5))],
        Opcode::Bloop => vec![reg(base.bits(0, 5)), code_addr(names, ins.extra)],
        Opcode::Loopi => vec![format!("#{}", base.bits(0, 8))],
        Opcode::Bloopi => vec![format!("#{}", base.bits(0, 8)), code_addr(names, ins.extra)],
        Opcode::Lri => vec![reg(base.bits(0, 5)), imm16()],
        Opcode::Lr => vec![reg(base.bits(0, 5)), data_addr(names, ins.extra)],
        Opcode::Sr => vec![data_addr(names, ins.extra), reg(base.bits(0, 5))],
        Opcode::Si => vec![data_addr(names, 0xFF00 | base.bits(0, 8)), imm16()],
        Opcode::Lris => vec![reg(0x18 + base.bits(8, 11)), imm8s()],

        Opcode::If => return (conditional("if", base), vec![]),
        Opcode::Jmp => {
            let mnemonic = if base.bits(0, 4) == 0xF {
                "jmp".to_owned()
            } else {
                conditional("j", base)
            };

            return (mnemonic, vec![code_addr(names, ins.extra)]);
        }
        Opcode::Call => return (conditional("call", base), vec![code_addr(names, ins.extra)]),
        Opcode::Ret => return (conditional("ret", base), vec![]),
        Opcode::Rti => return (conditional("rti", base), vec![]),
        Opcode::Jr => return (conditional("jr", base), vec![reg(base.bits(5, 8))]),
        Opcode::Callr => return (conditional("callr", base), vec![reg(base.bits(5, 8))]),

        Opcode::Addi | Opcode::Cmpi => vec![acc(b8).to_owned(), imm16()],
        Opcode::Xori | Opcode::Andi | Opcode::Ori | Opcode::Andf | Opcode::Andcf => {
            vec![acc_mid(b8).to_owned(), imm16()]
        }
        Opcode::Addis | Opcode::Cmpis => vec![acc(b8).to_owned(), imm8s()],

        Opcode::Ilrr | Opcode::Ilrrd | Opcode::Ilrri | Opcode::Ilrrn => {
            vec![acc_mid(b8).to_owned(), format!("@{}", ar(base.bits(0, 2)))]
        }
        Opcode::Lrr | Opcode::Lrrd | Opcode::Lrri | Opcode::Lrrn => {
            vec![reg(base.bits(0, 5)), format!("@{}", ar(base.bits(5, 7)))]
        }
        Opcode::Srr | Opcode::Srrd | Opcode::Srri | Opcode::Srrn => {
            vec![format!("@{}", ar(base.bits(5, 7))), reg(base.bits(0, 5))]
        }
        Opcode::Mrr => vec![reg(base.bits(5, 10)), reg(base.bits(0, 5))],
        Opcode::Lrs => vec![
            reg(0x18 + base.bits(8, 11)),
            format!("@0x{:02X}", base.bits(0, 8)),
        ],
        Opcode::Srs => vec![
            format!("@0x{:02X}", base.bits(0, 8)),
            reg(0x1C + base.bits(8, 10)),
        ],
        Opcode::Srsh => vec![
            format!("@0x{:02X}", base.bits(0, 8)),
            reg(0x10 + b8 as u16),
        ],

        Opcode::Sbclr | Opcode::Sbset => vec![format!("#{}", 6 + base.bits(0, 3))],
        Opcode::Lsl | Opcode::Lsr | Opcode::Asl | Opcode::Asr => {
            vec![acc(b8).to_owned(), format!("#{}", shift(base))]
        }

        Opcode::Xorr | Opcode::Andr | Opcode::Orr => {
            vec![acc_mid(b8).to_owned(), ax_high(base.bit(9)).to_owned()]
        }
        Opcode::Andc | Opcode::Orc | Opcode::Xorc => {
            vec![acc_mid(b8).to_owned(), acc_mid(!b8).to_owned()]
        }
        Opcode::Not => vec![acc_mid(b8).to_owned()],
        Opcode::Lsrnrx | Opcode::Asrnrx => {
            vec![acc(b8).to_owned(), ax_high(base.bit(9)).to_owned()]
        }
        Opcode::Lsrnr | Opcode::Asrnr => vec![acc(b8).to_owned(), acc_mid(!b8).to_owned()],

        Opcode::Addr | Opcode::Subr | Opcode::Movr => {
            vec![acc(b8).to_owned(), reg(0x18 + base.bits(9, 11))]
        }
        Opcode::Addax | Opcode::Subax | Opcode::Movax | Opcode::Addaxl => {
            vec![acc(b8).to_owned(), ax(base.bit(9)).to_owned()]
        }
        Opcode::Add | Opcode::Sub | Opcode::Mov => {
            vec![acc(b8).to_owned(), acc(!b8).to_owned()]
        }
        Opcode::Addp
        | Opcode::Subp
        | Opcode::Movp
        | Opcode::Movnp
        | Opcode::Movpz
        | Opcode::Incm
        | Opcode::Inc
        | Opcode::Decm
        | Opcode::Dec
        | Opcode::Neg
        | Opcode::Clrl
        | Opcode::Lsl16
        | Opcode::Lsr16 => vec![acc(b8).to_owned()],
        Opcode::Addpaxz => vec![acc(b8).to_owned(), ax(base.bit(9)).to_owned()],
        Opcode::Clr | Opcode::Abs | Opcode::Tst | Opcode::Asr16 => vec![acc(b11).to_owned()],
        Opcode::Tstaxh => vec![ax_high(b8).to_owned()],
        Opcode::Cmpaxh => vec![acc(b11).to_owned(), ax_high(base.bit(12)).to_owned()],

        Opcode::Mul | Opcode::Mulmvz | Opcode::Mulac | Opcode::Mulmv => {
            let s = if b11 { "1" } else { "0" };
            let mut operands = vec![format!("$ax{s}.l"), format!("$ax{s}.h")];
            if opcode != Opcode::Mul {
                operands.push(acc(b8).to_owned());
            }
            operands
        }
        Opcode::Mulx | Opcode::Mulxmvz | Opcode::Mulxac | Opcode::Mulxmv => {
            let lhs = if base.bit(12) { "$ax0.h" } else { "$ax0.l" };
            let rhs = if b11 { "$ax1.h" } else { "$ax1.l" };
            let mut operands = vec![lhs.to_owned(), rhs.to_owned()];
            if opcode != Opcode::Mulx {
                operands.push(acc(b8).to_owned());
            }
            operands
        }
        Opcode::Mulc | Opcode::Mulcmvz | Opcode::Mulcac | Opcode::Mulcmv => {
            let mut operands = vec![
                acc_mid(base.bit(12)).to_owned(),
                ax_high(b11).to_owned(),
            ];
            if opcode != Opcode::Mulc {
                operands.push(acc(b8).to_owned());
            }
            operands
        }
        Opcode::Maddx | Opcode::Msubx => {
            let lhs = if base.bit(9) { "$ax0.h" } else { "$ax0.l" };
            let rhs = if b8 { "$ax1.h" } else { "$ax1.l" };
            vec![lhs.to_owned(), rhs.to_owned()]
        }
        Opcode::Maddc | Opcode::Msubc => {
            vec![acc_mid(base.bit(9)).to_owned(), ax_high(b8).to_owned()]
        }
        Opcode::Madd | Opcode::Msub => {
            let s = if b8 { "1" } else { "0" };
            vec![format!("$ax{s}.l"), format!("$ax{s}.h")]
        }

        Opcode::Illegal => return (format!(".word 0x{base:04X}"), vec![]),
        _ => vec![],
    };

    (mnemonic, operands)
}

/// Mnemonic and operands of the extension operation.
fn extension_op(ins: Ins, extension: ExtensionOpcode) -> (String, Vec<String>) {
    let base = ins.base;
    let ar = |i: u16| format!("@$ar{i}");
    let mnemonic = format!("{extension:?}").to_lowercase();

    let operands = match extension {
        ExtensionOpcode::Dr | ExtensionOpcode::Ir | ExtensionOpcode::Nr => {
            vec![format!("$ar{}", base.bits(0, 2))]
        }
        ExtensionOpcode::Mv => vec![reg(0x18 + base.bits(2, 4)), reg(0x1C + base.bits(0, 2))],
        ExtensionOpcode::L | ExtensionOpcode::Ln => {
            vec![reg(0x18 + base.bits(3, 6)), ar(base.bits(0, 2))]
        }
        ExtensionOpcode::S | ExtensionOpcode::Sn => {
            vec![ar(base.bits(0, 2)), reg(0x1C + base.bits(3, 5))]
        }
        ExtensionOpcode::Ls
        | ExtensionOpcode::Lsn
        | ExtensionOpcode::Lsm
        | ExtensionOpcode::Lsnm => vec![
            reg(0x18 + base.bits(4, 6)),
            acc_mid(base.bit(0)).to_owned(),
        ],
        ExtensionOpcode::Sl
        | ExtensionOpcode::Sln
        | ExtensionOpcode::Slm
        | ExtensionOpcode::Slnm => vec![
            acc_mid(base.bit(0)).to_owned(),
            reg(0x18 + base.bits(4, 6)),
        ],
        ExtensionOpcode::Ld
        | ExtensionOpcode::Ldn
        | ExtensionOpcode::Ldm
        | ExtensionOpcode::Ldnm => {
            let suffix = &mnemonic[2..];
            if base.bits(0, 2) == 3 {
                let operands = vec![ax(base.bit(4)).to_owned(), ar(base.bit(5) as u16)];
                return (format!("ldax{suffix}"), operands);
            }

            let d = if base.bit(5) { "$ax0.h" } else { "$ax0.l" };
            let r = if base.bit(4) { "$ax1.h" } else { "$ax1.l" };
            vec![d.to_owned(), r.to_owned(), ar(base.bits(0, 2))]
        }
        ExtensionOpcode::Nop | ExtensionOpcode::Illegal => vec![],
    };

    (mnemonic, operands)
}

fn push_op(out: &mut String, mnemonic: &str, operands: &[String]) {
    out.push_str(mnemonic);
    if !operands.is_empty() {
        out.push(' ');
        out.push_str(&operands.join(", "));
    }
}

/// Disassembles `ins`, located at `pc`.
pub fn disassemble(ins: Ins, pc: u16, names: &dyn Names) -> String {
    let (mnemonic, operands) = main_op(ins, names);
    let mut out = String::new();
    push_op(&mut out, &mnemonic, &operands);

    match ins.decoded().extension {
        None | Some(ExtensionOpcode::Nop) => (),
        Some(extension) => {
            let (mnemonic, operands) = extension_op(ins, extension);
            out.push_str(" : ");
            push_op(&mut out, &mnemonic, &operands);
        }
    }

    if ins.decoded().opcode.is_control_flow() && ins.decoded().opcode != Opcode::Halt {
        let next = pc.wrapping_add(ins.decoded().len());
        if let Some(name) = names.code(next) {
            let _ = write!(out, " ; next: {name}");
        }
    }

    out
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashMap;

    struct Labels(HashMap<u16, String>);

    impl Names for Labels {
        fn code(&self, addr: u16) -> Option<&str> {
            self.0.get(&addr).map(String::as_str)
        }
    }

    fn dis(words: &[u16]) -> String {
        disassemble(Ins::from_words(words).unwrap(), 0, &NoNames)
    }

    #[test]
    fn plain_instructions() {
        assert_eq!(dis(&[0x0021]), "halt");
        assert_eq!(dis(&[0x0000]), "nop");
        assert_eq!(dis(&[0x0080, 0x1234]), "lri $ar0, #0x1234");
        assert_eq!(dis(&[0x14FC]), "asr $ac0, #-4");
        assert_eq!(dis(&[0x1D8D]), "mrr $st0, $st1");
        assert_eq!(dis(&[0x0816]), "lris $ax0.l, #22");
        assert_eq!(dis(&[0xFFFF]), "movpz $ac1 : ldaxnm $ax1, @$ar1");
    }

    #[test]
    fn conditions() {
        assert_eq!(dis(&[0x029F, 0x0010]), "jmp 0x0010");
        assert_eq!(dis(&[0x029C, 0x0010]), "jlnz 0x0010");
        assert_eq!(dis(&[0x02DF]), "ret");
        assert_eq!(dis(&[0x0275]), "ifz");
    }

    #[test]
    fn extensions() {
        assert_eq!(dis(&[0x8112]), "clr $ac0 : mv $ax0.l, $ac0.m");
        assert_eq!(dis(&[0x8050]), "nx : l $ax0.h, @$ar0");
        assert_eq!(dis(&[0x80C0]), "nx : ld $ax0.l, $ax1.l, @$ar0");
    }

    #[test]
    fn names() {
        let labels = Labels(HashMap::from([(0x0010, "main".to_owned())]));
        let ins = Ins::from_words(&[0x02BF, 0x0010]).unwrap();
        assert_eq!(disassemble(ins, 0, &labels), "call main");

        let ins = Ins::from_words(&[0x00DE, 0xFFFE]).unwrap();
        assert_eq!(disassemble(ins, 0, &labels), "lr $ac0.m, @CMBH");
    }
}
