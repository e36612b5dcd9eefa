mod programs;

use dspint::{Dsp, RamHost, Reg};
use dspjit::{Jit, Settings};
use libtest_mimic::{Arguments, Failed, Trial};
use programs::{IDLE_PROGRAMS, PROGRAMS, Program};
use std::fmt::Write;

/// Budget of each recompiler call, so that budgets run out in the middle of blocks.
const CHUNK: u32 = 37;

fn prepare(program: &Program) -> (Dsp, RamHost) {
    let mut dsp = Dsp::new().unwrap();
    let mut host = RamHost::new(0x1000, 0);

    {
        let mut iram = dsp.mem.iram.unprotect().unwrap();
        iram[..program.code.len()].copy_from_slice(program.code);
        for (addr, code) in program.extra {
            iram[*addr..][..code.len()].copy_from_slice(code);
        }
    }

    for (addr, data) in program.ram {
        host.ram[*addr..][..data.len()].copy_from_slice(data);
    }

    dsp.analyze_all();
    dsp.regs.pc = 0;
    (program.setup)(&mut dsp);

    (dsp, host)
}

/// Differences between two final states. Step counts are only compared if `steps` is set.
fn divergences(expected: &(Dsp, RamHost), got: &(Dsp, RamHost), steps: bool) -> Vec<String> {
    let (expected, expected_host) = expected;
    let (got, got_host) = got;
    let mut out = vec![];

    for i in 0..32 {
        let reg = Reg::new(i);
        let (e, v) = (expected.regs.get(reg), got.regs.get(reg));
        if e != v {
            out.push(format!("{}(v={v:04X}, e={e:04X})", reg.name()));
        }
    }

    if out.is_empty() && expected.regs != got.regs {
        out.push(format!("registers: v={:04X?}, e={:04X?}", got.regs, expected.regs));
    }

    let mut check = |what: &str, e: String, v: String| {
        if e != v {
            out.push(format!("{what}(v={v}, e={e})"));
        }
    };

    check("pc", format!("{:04X}", expected.regs.pc), format!("{:04X}", got.regs.pc));
    if steps {
        check(
            "steps",
            expected.step_counter.to_string(),
            got.step_counter.to_string(),
        );
    }
    check(
        "halted",
        expected.halted().to_string(),
        got.halted().to_string(),
    );
    check(
        "exceptions",
        format!("{:08b}", expected.exceptions),
        format!("{:08b}", got.exceptions),
    );

    let (e_shared, v_shared) = (expected.hw.shared(), got.hw.shared());
    check(
        "dsp mailbox",
        format!("{:08X}", e_shared.dsp_mailbox.peek()),
        format!("{:08X}", v_shared.dsp_mailbox.peek()),
    );
    check(
        "cpu mailbox",
        format!("{:08X}", e_shared.cpu_mailbox.peek()),
        format!("{:08X}", v_shared.cpu_mailbox.peek()),
    );

    let dram = expected
        .mem
        .dram
        .iter()
        .zip(got.mem.dram.iter())
        .position(|(e, v)| e != v);

    if let Some(addr) = dram {
        out.push(format!(
            "dram[{addr:04X}](v={:04X}, e={:04X})",
            got.mem.dram[addr], expected.mem.dram[addr]
        ));
    }

    if expected_host.ram != got_host.ram {
        out.push("host ram".to_owned());
    }

    if expected_host.uploads != got_host.uploads || expected_host.interrupts != got_host.interrupts {
        out.push(format!(
            "host(v={:?}/{}, e={:?}/{})",
            got_host.uploads, got_host.interrupts, expected_host.uploads, expected_host.interrupts
        ));
    }

    out
}

/// Runs `program` through the interpreter without idle skipping and through the recompiler,
/// idle skipping if `idle` is set. Skipped cycles aside, both must end in the same state.
fn run_case(program: &Program, settings: Settings, idle: bool) -> Result<(), Failed> {
    let mut expected = prepare(program);
    expected
        .0
        .run_cycles_plain(&mut expected.1, program.cycles);

    let mut got = prepare(program);
    let mut jit = Jit::new(settings);
    let mut left = program.cycles;
    while left > 0 {
        let chunk = left.min(CHUNK);
        if idle {
            jit.run_cycles(&mut got.0, &mut got.1, chunk);
        } else {
            jit.run_cycles_plain(&mut got.0, &mut got.1, chunk);
        }
        left -= chunk;
    }

    let mut divergences = divergences(&expected, &got, !idle);
    if idle && got.0.step_counter >= expected.0.step_counter {
        divergences.push(format!(
            "no cycles skipped (v={}, e={})",
            got.0.step_counter, expected.0.step_counter
        ));
    }

    if divergences.is_empty() {
        return Ok(());
    }

    let mut msg = format!("{} diverged after {} cycles\r\n", program.name, program.cycles);
    writeln!(&mut msg, "DIVERGENCES: {}", divergences.join(", ")).unwrap();
    writeln!(&mut msg, "BLOCKS: {}", jit.blocks().len()).unwrap();

    Err(Failed::from(msg))
}

fn main() {
    let args = Arguments::from_args();

    let mut tests = vec![];
    let cases = PROGRAMS
        .iter()
        .map(|p| (p, false))
        .chain(IDLE_PROGRAMS.iter().map(|p| (p, true)));

    for (program, idle) in cases {
        for (mode, static_accumulators) in [("dynamic", false), ("static", true)] {
            let settings = Settings {
                static_accumulators,
                ..Default::default()
            };

            tests.push(Trial::test(format!("{}::{mode}", program.name), move || {
                let result = std::panic::catch_unwind(move || run_case(program, settings, idle));
                match result {
                    Ok(r) => r,
                    Err(e) => {
                        let mut msg = "<unknown panic>".to_owned();
                        if let Some(s) = e.downcast_ref::<String>() {
                            msg = s.clone();
                        } else if let Some(s) = e.downcast_ref::<&'static str>() {
                            msg = (*s).to_owned();
                        }

                        Err(Failed::from(msg))
                    }
                }
            }));
        }
    }

    std::panic::set_hook(Box::new(move |_| ()));
    libtest_mimic::run(&args, tests).exit();
}
