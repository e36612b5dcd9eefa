use dspint::Dsp;

/// A program run through both the interpreter and the recompiler.
pub struct Program {
    pub name: &'static str,
    /// Loaded at IRAM address 0.
    pub code: &'static [u16],
    /// Additional code, by IRAM address.
    pub extra: &'static [(usize, &'static [u16])],
    /// Host RAM contents, by address.
    pub ram: &'static [(usize, &'static [u8])],
    pub setup: fn(&mut Dsp),
    pub cycles: u32,
}

fn nothing(_: &mut Dsp) {}

fn fill_dram(dsp: &mut Dsp, start: usize, len: usize) {
    for (i, word) in dsp.mem.dram[start..start + len].iter_mut().enumerate() {
        *word = (i as u16).wrapping_mul(0x9E37) ^ 0x5555;
    }
}

#[rustfmt::skip]
pub static PROGRAMS: &[Program] = &[
    Program {
        name: "arithmetic",
        code: &[
            0x0098, 0x1234, // lri $ax0.l, #0x1234
            0x009A, 0x0012, // lri $ax0.h, #0x0012
            0x0D80,         // lris $ac1.l, #-0x80
            0x1110, 0x0017, // bloopi #16, 0x0017
            0x4800,         // addax $acc0, $ax0
            0x4D00,         // add $acc1, $acc0
            0x5C00,         // sub $acc0, $acc1
            0x0300, 0x7FFF, // addi $acc1, #0x7FFF
            0x0601,         // cmpis $acc0, #1
            0x7600,         // inc $acc0
            0x7500,         // incm $acc1
            0x7A00,         // dec $acc0
            0x7900,         // decm $acc1
            0x0280, 0x0010, // cmpi $acc0, #0x0010
            0x8200,         // cmp
            0xB100,         // tst $acc0
            0x6100,         // movr $acc1, $ax0.l
            0x1508,         // lsl $acc1, #8
            0x14F8,         // asr $acc0, #-8
            0x1578,         // lsr $acc1, #-8
            0x6800,         // movax $acc0, $ax0
            0x6C00,         // mov $acc0, $acc1
            0x8900,         // clr $acc1
            0x0021,         // halt
        ],
        extra: &[],
        ram: &[],
        setup: nothing,
        cycles: 1000,
    },
    Program {
        name: "logic",
        code: &[
            0x1108, 0x0018, // bloopi #8, 0x0018
            0x0240, 0x0FF0, // andi $ac0.m, #0x0FF0
            0x0360, 0x8001, // ori $ac1.m, #0x8001
            0x0220, 0x5A5A, // xori $ac0.m, #0x5A5A
            0x3C00,         // andc $ac0.m, $ac1.m
            0x3F00,         // orc $ac1.m, $ac0.m
            0x3080,         // xorc $ac0.m, $ac1.m
            0x3600,         // andr $ac0.m, $ax1.h
            0x3B00,         // orr $ac1.m, $ax1.h
            0x3200,         // xorr $ac0.m, $ax1.h
            0x3380,         // not $ac1.m
            0x02A0, 0x0100, // andf $ac0.m, #0x0100
            0x027D,         // iflz
            0x7600,         // inc $acc0
            0x03C0, 0x0003, // andcf $ac1.m, #0x0003
            0x027C,         // iflnz
            0x7500,         // incm $acc1
            0x8F00,         // set40
            0x8E00,         // set16
            0x8B00,         // m0
            0x8D00,         // set15
            0x1204,         // sbclr #10
            0x1306,         // sbset #12
            0x8A00,         // m2
            0x8C00,         // clr15
            0x0021,         // halt
        ],
        extra: &[],
        ram: &[],
        setup: |dsp| {
            dsp.regs.acc40[0].set(0x01_1234_5678);
            dsp.regs.acc40[1].set(0x00_8765_4321);
            dsp.regs.acc32[1] = 0x0F0F_F0F0;
        },
        cycles: 1000,
    },
    Program {
        name: "memory",
        code: &[
            0x0092, 0x0000, // lri $cr, #0x0000
            0x1120, 0x000F, // bloopi #32, 0x000F
            0x19BD,         // lrrn $ac1.l, @$ar1
            0x1AD8,         // srrd @$ar2, $ax0.l
            0x18FA,         // lrrd $ax0.h, @$ar3
            0x1B3C,         // srri @$ar1, $ac0.l
            0x000A,         // iar $ar2
            0x0007,         // dar $ar3
            0x0015,         // addarn $ar1, $ix1
            0x000E,         // subarn $ar2
            0x2340,         // lrs $ax1.h, @0x40
            0x2D41,         // srs @0x41, $ac1.l
            0x2842,         // srsh @0x42, $ac0.h
            0x1F21,         // mrr $ax1.l, $ar1
            0x00F8, 0x0300, // sr @0x0300, $ax0.l
            0x00C7, 0x0300, // lr $ix3, @0x0300
            0x00D9, 0x1000, // lr $ax1.l, @0x1000
            0x1806,         // lrr $ix2, @$ar0
            0x1A01,         // srr @$ar0, $ar1
            0x1D46,         // mrr $wr2, $ix2
            0x00FE, 0x0301, // sr @0x0301, $ac0.m
            0x0021,         // halt
        ],
        extra: &[],
        ram: &[],
        setup: |dsp| {
            fill_dram(dsp, 0, 0x80);
            dsp.regs.addressing = [0x0008, 0x0010, 0x0020, 0x0030];
            dsp.regs.indexing = [0, 3, 0, 0];
            dsp.regs.wrapping[1] = 0x000F;
            dsp.regs.acc40[0].set(0x7F_1234_5678);
            dsp.regs.acc40[1].set(-0x55_4433);
        },
        cycles: 2000,
    },
    Program {
        name: "extensions",
        code: &[
            0x1110, 0x0009, // bloopi #16, 0x0009
            0x7642,         // inc $acc0 : l $ax0.l, @$ar2
            0x4920,         // addax $acc1, $ax0 : s @$ar0, $ac0.l
            0x6C1C,         // mov $acc0, $acc1 : mv $ax1.h, $ac0.l
            0x890A,         // clr $acc1 : ir $ar2
            0x806F,         // nx : ln $ac1.l, @$ar3
            0x802D,         // nx : sn @$ar1, $ac1.l
            0x7A05,         // dec $acc0 : dr $ar1
            0x8180,         // clr $acc0 : ls $ax0.l, $ac0.m
            0x7611,         // inc $acc0 : mv $ax0.l, $ac1.l
            0x800F,         // nx : nr $ar3
            0x0021,         // halt
        ],
        extra: &[],
        ram: &[],
        setup: |dsp| {
            fill_dram(dsp, 0x100, 0x80);
            dsp.regs.addressing = [0x0100, 0x0110, 0x0120, 0x0130];
            dsp.regs.indexing = [0, 2, 0, 0xFFFF];
            dsp.regs.acc40[1].set(0x1234_5678);
        },
        cycles: 1000,
    },
    Program {
        name: "mailbox",
        code: &[
            0x00DB, 0xFFFE, // lr $ax1.h, @CMBH
            0x00DE, 0xFFFE, // lr $ac0.m, @CMBH
            0x02C0, 0x8000, // andcf $ac0.m, #0x8000
            0x029C, 0x0000, // jlnz 0x0000
            0x0080, 0xFFFF, // lri $ar0, #CMBL
            0x1918,         // lrri $ax0.l, @$ar0
            0x16FC, 0xDCD1, // si @DMBH, #0xDCD1
            0x0081, 0xFFFD, // lri $ar1, #DMBL
            0x1A38,         // srr @$ar1, $ax0.l
            0x0021,         // halt
        ],
        extra: &[],
        ram: &[],
        setup: |dsp| dsp.hw.shared().cpu_mailbox.send(0x8000_0041),
        cycles: 200,
    },
    Program {
        name: "calls",
        code: &[
            0x1004,         // loopi #4
            0x7600,         // inc $acc0
            0x02BF, 0x0010, // call 0x0010
            0x7900,         // decm $acc1
            0x0294, 0x0000, // jnz 0x0000
            0x0021,         // halt
        ],
        extra: &[(
            0x10,
            &[
                0x4800, // addax $acc0, $ax0
                0x0275, // ifz
                0x7400, // incm $acc0
                0x02DF, // ret
            ],
        )],
        ram: &[],
        setup: |dsp| {
            dsp.regs.acc40[1].set(6 << 16);
            dsp.regs.acc32[0] = 0x0001_0000;
        },
        cycles: 1000,
    },
    Program {
        name: "interrupt",
        code: &[
            0x7600,         // inc $acc0
            0x029F, 0x0000, // jmp 0x0000
        ],
        extra: &[(
            14,
            &[
                0x0098, 0x5A5A, // lri $ax0.l, #0x5A5A
                0x02FF,         // rti
            ],
        )],
        ram: &[],
        setup: |dsp| {
            dsp.regs.status.set_external_interrupt_enable(true);
            dsp.hw.shared().request_external_interrupt();
        },
        cycles: 100,
    },
    Program {
        name: "upload",
        code: &[
            0x16CE, 0x0000, // si @DSMAH, #0x0000
            0x16CF, 0x0040, // si @DSMAL, #0x0040
            0x16CD, 0x0100, // si @DSPA, #0x0100
            0x16C9, 0x0002, // si @DSCR, #0x0002
            0x16CB, 0x000A, // si @DSBL, #0x000A
            0x029F, 0x0100, // jmp 0x0100
        ],
        extra: &[],
        ram: &[(
            0x40,
            &[
                0x11, 0x04, 0x01, 0x03, // bloopi #4, 0x0103
                0x76, 0x00,             // inc $acc0
                0x77, 0x00,             // inc $acc1
                0x00, 0x21,             // halt
            ],
        )],
        setup: nothing,
        cycles: 100,
    },
];

/// Programs which end up polling a mailbox. `cycles` stops the interpreter at the start of the
/// poll loop, where the recompiler's idle skipping leaves it.
#[rustfmt::skip]
pub static IDLE_PROGRAMS: &[Program] = &[
    Program {
        name: "idle_cmbh",
        code: &[
            0x0098, 0x1234, // lri $ax0.l, #0x1234
            0x00F8, 0x0010, // sr @0x0010, $ax0.l
            0x00DE, 0xFFFE, // lr $ac0.m, @CMBH
            0x02C0, 0x8000, // andcf $ac0.m, #0x8000
            0x029C, 0x0004, // jlnz 0x0004
            0x0021,         // halt
        ],
        extra: &[],
        ram: &[],
        setup: nothing,
        cycles: 2 + 3 * 50,
    },
    Program {
        name: "idle_dmbh",
        code: &[
            0x26FC,         // lrs $ac0.m, @DMBH
            0x02C0, 0x8000, // andcf $ac0.m, #0x8000
            0x029D, 0x0000, // jlz 0x0000
            0x0021,         // halt
        ],
        extra: &[],
        ram: &[],
        setup: |dsp| {
            dsp.regs.config = 0xFF;
            dsp.hw.shared().dsp_mailbox.send(0x8000_1234);
        },
        cycles: 3 * 100,
    },
];
