mod report;

use bytesize::ByteSize;
use clap::{Parser, Subcommand};
use dspcore::{
    Config, Core, CoreKind, PC_INDEX,
    labels::LabelMap,
    rom::{self, Firmware},
    symbols::Symbols,
};
use dspint::{COEF_LEN, IRAM_LEN, IROM_BASE, IROM_LEN, Memory, RamHost, hw::MAX_DMA_LEN};
use eyre_pretty::{Context, Result, bail};
use std::path::{Path, PathBuf};

/// Cycles run between mailbox checks.
const SLICE: u32 = 1000;

fn parse_number(s: &str) -> std::result::Result<u64, std::num::ParseIntError> {
    let s = s.replace('_', "");
    if let Some(hex) = s.strip_prefix("0x") {
        u64::from_str_radix(hex, 16)
    } else {
        s.parse()
    }
}

fn parse_u16(s: &str) -> std::result::Result<u16, String> {
    let value = parse_number(s).map_err(|e| e.to_string())?;
    u16::try_from(value).map_err(|e| e.to_string())
}

fn parse_u32(s: &str) -> std::result::Result<u32, String> {
    let value = parse_number(s).map_err(|e| e.to_string())?;
    u32::try_from(value).map_err(|e| e.to_string())
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Upload microcode to instruction RAM and run it
    Run {
        /// Path to the instruction ROM dump
        #[arg(long)]
        irom: PathBuf,
        /// Path to the coefficient ROM dump. Zeroed if missing
        #[arg(long)]
        coef: Option<PathBuf>,
        /// Path to the microcode, big endian
        #[arg(long)]
        ucode: PathBuf,
        /// Instruction RAM address to start at
        #[arg(long, default_value = "0", value_parser = parse_u16)]
        entry: u16,
        /// Number of instructions to run
        #[arg(long, default_value = "100000", value_parser = parse_u32)]
        cycles: u32,
        /// Whether to use the recompiler instead of the interpreter
        #[arg(long, default_value_t = false)]
        jit: bool,
        /// Mail to send to the DSP, in order. Each one is sent once the previous was read
        #[arg(long, value_parser = parse_u32)]
        mail: Vec<u32>,
        /// Path to a label file (`NAME ADDR [KIND]` lines)
        #[arg(long)]
        labels: Option<PathBuf>,
    },
    /// Disassemble microcode
    Disasm {
        /// Path to the microcode, big endian
        file: PathBuf,
        /// Address the microcode is loaded at
        #[arg(long, default_value = "0", value_parser = parse_u16)]
        base: u16,
        /// Path to a label file (`NAME ADDR [KIND]` lines)
        #[arg(long)]
        labels: Option<PathBuf>,
    },
    /// Identify a pair of ROM dumps
    Identify { irom: PathBuf, coef: PathBuf },
}

/// A CLI to run and inspect DSP microcode.
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// Action to take
    #[command(subcommand)]
    command: Command,
}

fn setup_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or(EnvFilter::new(
        "dsptool=info,dspcore=info,dspint=info,dspjit=info",
    ));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

fn read(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading {}", path.display()))
}

fn words(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair.get(1).copied().unwrap_or_default()]))
        .collect()
}

fn labels(path: Option<&Path>) -> Result<LabelMap> {
    let mut labels = LabelMap::new();
    labels.register_defaults();

    if let Some(path) = path {
        let text = String::from_utf8(read(path)?).context("label file is not UTF-8")?;
        let count = labels.parse(&text).context("parsing label file")?;
        tracing::info!("loaded {count} labels from {}", path.display());
    }

    Ok(labels)
}

#[allow(clippy::too_many_arguments)]
fn run(
    irom: &Path,
    coef: Option<&Path>,
    ucode: &Path,
    entry: u16,
    cycles: u32,
    jit: bool,
    mail: &[u32],
    label_file: Option<&Path>,
) -> Result<()> {
    let irom = read(irom)?;
    let coef = match coef {
        Some(path) => read(path)?,
        None => vec![0; 2 * COEF_LEN],
    };

    let firmware = Firmware::from_be_bytes(&irom, &coef).context("loading ROMs")?;
    let config = Config {
        kind: if jit {
            CoreKind::Recompiler
        } else {
            CoreKind::Interpreter
        },
        ..Default::default()
    };

    let mut core = Core::new(config, &firmware, |irom, coef| {
        eprintln!("warning: unknown ROMs (IROM {irom:08X}, COEF {coef:08X}), continuing");
        true
    })?;
    *core.labels_mut() = labels(label_file)?;

    let ucode = read(ucode)?;
    if ucode.len() > 2 * IRAM_LEN {
        bail!(
            "microcode is {} but instruction RAM only holds {}",
            ByteSize(ucode.len() as u64).display(),
            ByteSize(2 * IRAM_LEN as u64).display()
        );
    }

    let mut host = RamHost::new(ucode.len().next_multiple_of(2), 0);
    host.ram[..ucode.len()].copy_from_slice(&ucode);

    for offset in (0..host.ram.len()).step_by(MAX_DMA_LEN as usize) {
        let len = (host.ram.len() - offset).min(MAX_DMA_LEN as usize);
        core.upload(&mut host, offset as u32, (offset / 2) as u16, len as u16);
    }

    tracing::info!(
        "uploaded {} of microcode, starting at {entry:04X}",
        ByteSize(ucode.len() as u64).display()
    );

    core.write_register(PC_INDEX, entry)?;

    let mut pending = mail.iter().copied();
    let mut received = vec![];
    let mut spent = 0;
    while spent < cycles && !core.dsp().halted() {
        let (cpu, _) = core.mailboxes();
        if !cpu.has_mail()
            && let Some(mail) = pending.next()
        {
            tracing::info!("sending {mail:08X}");
            cpu.send(mail);
        }

        let slice = SLICE.min(cycles - spent);
        core.run_cycles(&mut host, slice);
        spent += slice;

        if let Some(mail) = core.mailboxes().1.take() {
            received.push((core.dsp().step_counter, mail));
        }
    }

    if let Some(fault) = core.fault() {
        tracing::error!("DSP stopped: {fault:?}");
    }

    report::mails(&received);
    report::registers(&core);
    println!(
        "{} instructions executed{}",
        core.dsp().step_counter,
        if core.dsp().halted() { ", halted" } else { "" }
    );

    Ok(())
}

fn disasm(file: &Path, base: u16, label_file: Option<&Path>) -> Result<()> {
    let code = words(&read(file)?);
    let labels = labels(label_file)?;

    let mut mem = Memory::new()?;
    let (offset, region_len, name) = if base < IROM_BASE {
        (base as usize, IRAM_LEN, "instruction RAM")
    } else {
        ((base - IROM_BASE) as usize, IROM_LEN, "instruction ROM")
    };

    if offset + code.len() > region_len {
        bail!("{} words at {base:04X} do not fit in {name}", code.len());
    }

    if base < IROM_BASE {
        mem.iram.unprotect()?[offset..][..code.len()].copy_from_slice(&code);
    } else {
        mem.irom[offset..][..code.len()].copy_from_slice(&code);
    }

    let end = base as usize + code.len();
    let (symbols, lines) = Symbols::build(&mem, base, code.len(), &labels);
    for (i, line) in lines.iter().enumerate() {
        if symbols.addr_of(i).is_none_or(|addr| addr as usize >= end) {
            break;
        }

        println!("{line}");
    }

    Ok(())
}

fn identify(irom: &Path, coef: &Path) -> Result<()> {
    let (irom, coef) = (read(irom)?, read(coef)?);
    let firmware = Firmware::from_be_bytes(&irom, &coef).context("loading ROMs")?;
    let (irom_hash, coef_hash) = firmware.checksums();

    println!("IROM adler32: {irom_hash:08X}");
    println!("COEF adler32: {coef_hash:08X}");
    match rom::identify(irom_hash, coef_hash) {
        Some(rom) => println!("known ROMs: {}", rom.name),
        None => println!("unknown ROMs"),
    }

    Ok(())
}

fn main() -> Result<()> {
    eyre_pretty::install()?;
    setup_tracing();

    let args = Args::parse();
    match args.command {
        Command::Run {
            irom,
            coef,
            ucode,
            entry,
            cycles,
            jit,
            mail,
            labels,
        } => run(
            &irom,
            coef.as_deref(),
            &ucode,
            entry,
            cycles,
            jit,
            &mail,
            labels.as_deref(),
        ),
        Command::Disasm { file, base, labels } => disasm(&file, base, labels.as_deref()),
        Command::Identify { irom, coef } => identify(&irom, &coef),
    }
}
