//! Hardware interface: mailboxes, the IFX register window, DMA and exceptions.
use crate::{Dsp, Host, IRAM_BASE, IRAM_LEN, regs::StackId};
use bitos::{BitUtils, bitos};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};
use strum::FromRepr;
use zerocopy::{IntoBytes, big_endian::U16};

/// Offsets of the IFX registers inside the `0xFF00..` window.
pub mod ifx {
    pub const DSCR: u8 = 0xC9;
    pub const DSBL: u8 = 0xCB;
    pub const DSPA: u8 = 0xCD;
    pub const DSMAH: u8 = 0xCE;
    pub const DSMAL: u8 = 0xCF;
    pub const FORMAT: u8 = 0xD1;
    pub const ACDAT: u8 = 0xD3;
    pub const ACSAH: u8 = 0xD4;
    pub const ACSAL: u8 = 0xD5;
    pub const ACEAH: u8 = 0xD6;
    pub const ACEAL: u8 = 0xD7;
    pub const ACCAH: u8 = 0xD8;
    pub const ACCAL: u8 = 0xD9;
    pub const GAIN: u8 = 0xDE;
    pub const AMDM: u8 = 0xEF;
    pub const DIRQ: u8 = 0xFB;
    pub const DMBH: u8 = 0xFC;
    pub const DMBL: u8 = 0xFD;
    pub const CMBH: u8 = 0xFE;
    pub const CMBL: u8 = 0xFF;

    const NAMED: [(u8, &str); 24] = [
        (DSCR, "DSCR"),
        (DSBL, "DSBL"),
        (DSPA, "DSPA"),
        (DSMAH, "DSMAH"),
        (DSMAL, "DSMAL"),
        (FORMAT, "SampleFormat"),
        (ACDAT, "ACDAT"),
        (ACSAH, "ACSAH"),
        (ACSAL, "ACSAL"),
        (ACEAH, "ACEAH"),
        (ACEAL, "ACEAL"),
        (ACCAH, "ACCAH"),
        (ACCAL, "ACCAL"),
        (0xDA, "pred_scale"),
        (0xDB, "yn1"),
        (0xDC, "yn2"),
        (0xDD, "ARAM"),
        (GAIN, "GAIN"),
        (AMDM, "AMDM"),
        (DIRQ, "DIRQ"),
        (DMBH, "DMBH"),
        (DMBL, "DMBL"),
        (CMBH, "CMBH"),
        (CMBL, "CMBL"),
    ];

    /// Name of a known IFX register.
    pub fn name(offset: u8) -> Option<&'static str> {
        NAMED
            .iter()
            .find_map(|(o, name)| (*o == offset).then_some(*name))
    }

    /// Every named IFX register, as `(offset, name)`.
    pub fn named() -> impl Iterator<Item = (u8, &'static str)> {
        NAMED.iter().copied()
    }
}

/// Access modes of the raw ARAM port (`ACDAT`), selected through `FORMAT`. Sample decoding
/// formats are not supported by this port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(u16)]
pub enum AccelFormat {
    /// Reads return one byte, at byte address `current`.
    Read8 = 0x5,
    /// Reads return one big endian word, at word address `current`.
    Read16 = 0x6,
    /// Writes store one big endian word, at word address `current`.
    Write16 = 0xA,
}

/// Largest transfer a single DMA may perform, in bytes.
pub const MAX_DMA_LEN: u16 = 0x4000;

/// A 32-bit mailbox with a "new mail" flag in bit 31.
#[derive(Debug, Default)]
pub struct Mailbox(AtomicU32);

impl Mailbox {
    const FLAG: u32 = 1 << 31;

    pub const fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    /// The whole mailbox value, flag included.
    #[inline(always)]
    pub fn peek(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }

    /// Overwrites the whole mailbox value, flag included.
    pub fn restore(&self, value: u32) {
        self.0.store(value, Ordering::Release);
    }

    #[inline(always)]
    pub fn has_mail(&self) -> bool {
        self.peek() & Self::FLAG != 0
    }

    /// Sets the high half and clears the flag.
    pub fn write_high(&self, value: u16) {
        let old = self.0.load(Ordering::Acquire);
        let new = (old & 0xFFFF) | ((value as u32) << 16);
        self.0.store(new & !Self::FLAG, Ordering::Release);
    }

    /// Sets the low half and raises the flag.
    pub fn write_low(&self, value: u16) {
        let old = self.0.load(Ordering::Acquire);
        let new = (old & !0xFFFF) | value as u32;
        self.0.store(new | Self::FLAG, Ordering::Release);
    }

    /// The high half, flag included.
    #[inline(always)]
    pub fn read_high(&self) -> u16 {
        (self.peek() >> 16) as u16
    }

    /// The low half. Acknowledges the mail.
    pub fn read_low(&self) -> u16 {
        self.0.fetch_and(!Self::FLAG, Ordering::AcqRel) as u16
    }

    /// Writes a full mail, high half first.
    pub fn send(&self, mail: u32) {
        self.write_high((mail >> 16) as u16);
        self.write_low(mail as u16);
    }

    /// Takes the pending mail, if any.
    pub fn take(&self) -> Option<u32> {
        self.has_mail().then(|| {
            let high = self.read_high() & 0x7FFF;
            let low = self.read_low();
            ((high as u32) << 16) | low as u32
        })
    }
}

#[bitos(16)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Control {
    #[bits(0)]
    pub reset: bool,
    #[bits(1)]
    pub external_interrupt: bool,
    #[bits(2)]
    pub halt: bool,
}

/// State shared between the DSP thread and the host.
#[derive(Debug, Default)]
pub struct Shared {
    /// Data from the host CPU to the DSP.
    pub cpu_mailbox: Mailbox,
    /// Data from the DSP to the host CPU.
    pub dsp_mailbox: Mailbox,
    external_interrupt: AtomicBool,
    control: AtomicU16,
}

impl Shared {
    pub fn control(&self) -> Control {
        Control::from_bits(self.control.load(Ordering::Acquire))
            .with_external_interrupt(self.external_interrupt.load(Ordering::Acquire))
    }

    pub fn set_control(&self, control: Control) {
        self.control
            .store(control.with_external_interrupt(false).to_bits(), Ordering::Release);
        if control.external_interrupt() {
            self.request_external_interrupt();
        }
    }

    #[inline(always)]
    pub fn halted(&self) -> bool {
        self.control.load(Ordering::Acquire).bit(2)
    }

    pub fn set_halted(&self, halted: bool) {
        if halted {
            self.control.fetch_or(1 << 2, Ordering::AcqRel);
        } else {
            self.control.fetch_and(!(1 << 2), Ordering::AcqRel);
        }
    }

    /// Signals an external interrupt to the DSP. Delivered on the next run slice.
    pub fn request_external_interrupt(&self) {
        self.external_interrupt.store(true, Ordering::Release);
    }

    pub fn take_external_interrupt(&self) -> bool {
        self.external_interrupt.swap(false, Ordering::AcqRel)
    }
}

#[bitos(1)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaDirection {
    FromHost = 0,
    ToHost = 1,
}

#[bitos(1)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaTarget {
    Dram = 0,
    Iram = 1,
}

#[bitos(16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DmaControl {
    #[bits(0)]
    pub direction: DmaDirection,
    #[bits(1)]
    pub target: DmaTarget,
    #[bits(2)]
    pub busy: bool,
}

/// A DMA transfer as described by the IFX registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dma {
    pub host_addr: u32,
    /// Word address inside the DSP memory.
    pub dsp_addr: u16,
    /// Length in bytes.
    pub len: u16,
    pub control: DmaControl,
}

/// What to do with a DMA longer than [`MAX_DMA_LEN`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DmaOverflow {
    /// Reject the transfer, halt the DSP and report a [`Fault`].
    #[default]
    Halt,
    /// Abort the process.
    Abort,
}

/// A condition that stopped the DSP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    OversizedDma { len: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(u8)]
pub enum Exception {
    Reset = 0,
    StackOverflow = 1,
    Unknown2 = 2,
    AccelRawReadOverflow = 3,
    AccelRawWriteOverflow = 4,
    AccelSampleReadOverflow = 5,
    Unknown6 = 6,
    ExternalInterrupt = 7,
}

/// DSP side of the hardware interface.
pub struct Interface {
    shared: Arc<Shared>,
    pub regs: Box<[u16; 256]>,
    /// Set when instruction RAM was written. Compiled code must be dropped.
    pub code_changed: bool,
    pub fault: Option<Fault>,
    pub dma_overflow: DmaOverflow,
}

impl Interface {
    pub fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            regs: util::boxed_array(0),
            code_changed: false,
            fault: None,
            dma_overflow: DmaOverflow::default(),
        }
    }

    #[inline(always)]
    pub fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    pub fn dma(&self) -> Dma {
        Dma {
            host_addr: 0u32
                .with_bits(16, 32, self.regs[ifx::DSMAH as usize] as u32)
                .with_bits(0, 16, self.regs[ifx::DSMAL as usize] as u32),
            dsp_addr: self.regs[ifx::DSPA as usize],
            len: self.regs[ifx::DSBL as usize],
            control: DmaControl::from_bits(self.regs[ifx::DSCR as usize]),
        }
    }

    fn pair(&self, high: u8) -> u32 {
        ((self.regs[high as usize] as u32) << 16) | self.regs[high as usize + 1] as u32
    }

    fn set_pair(&mut self, high: u8, value: u32) {
        self.regs[high as usize] = (value >> 16) as u16;
        self.regs[high as usize + 1] = value as u16;
    }

    /// Accelerator `(start, end, current)` word addresses.
    pub fn accelerator(&self) -> (u32, u32, u32) {
        (
            self.pair(ifx::ACSAH),
            self.pair(ifx::ACEAH),
            self.pair(ifx::ACCAH),
        )
    }
}

impl Dsp {
    /// Reads an IFX register.
    pub fn ifx_read(&mut self, host: &mut dyn Host, offset: u8) -> u16 {
        let shared = self.hw.shared.as_ref();
        match offset {
            ifx::DMBH => shared.dsp_mailbox.read_high(),
            ifx::DMBL => shared.dsp_mailbox.read_low(),
            ifx::CMBH => shared.cpu_mailbox.read_high(),
            ifx::CMBL => {
                let value = shared.cpu_mailbox.read_low();
                tracing::trace!(
                    "{:04X}: received mail {:08X}",
                    self.regs.pc,
                    shared.cpu_mailbox.peek()
                );
                value
            }
            ifx::ACDAT => self.accelerator_read(host),
            ifx::DSCR
            | ifx::DSBL
            | ifx::DSPA
            | ifx::DSMAH
            | ifx::DSMAL
            | ifx::DIRQ
            | ifx::ACSAH..=ifx::ACCAL => self.hw.regs[offset as usize],
            _ => {
                let value = self.hw.regs[offset as usize];
                match ifx::name(offset) {
                    Some(name) => {
                        tracing::debug!("{:04X}: read {name} ({value:04X})", self.regs.pc)
                    }
                    None => tracing::warn!(
                        "{:04X}: read unknown IFX register {offset:02X} ({value:04X})",
                        self.regs.pc
                    ),
                }

                value
            }
        }
    }

    /// Writes an IFX register.
    pub fn ifx_write(&mut self, host: &mut dyn Host, offset: u8, value: u16) {
        let shared = self.hw.shared.as_ref();
        match offset {
            ifx::DIRQ => {
                self.hw.regs[offset as usize] = value;
                if value.bit(0) {
                    host.interrupt_request();
                } else {
                    tracing::info!(
                        "{:04X}: unknown interrupt request ({value:04X})",
                        self.regs.pc
                    );
                }
            }
            ifx::DMBH => shared.dsp_mailbox.write_high(value),
            ifx::DMBL => {
                shared.dsp_mailbox.write_low(value);
                tracing::debug!(
                    "{:04X}: sent mail {:08X}",
                    self.regs.pc,
                    shared.dsp_mailbox.peek()
                );
            }
            ifx::CMBH => {
                tracing::warn!("{:04X}: DSP writing CPU mailbox high", self.regs.pc);
                shared.cpu_mailbox.write_high(value);
            }
            ifx::CMBL => {
                tracing::warn!("{:04X}: DSP writing CPU mailbox low", self.regs.pc);
                shared.cpu_mailbox.write_low(value);
            }
            ifx::DSBL => {
                self.hw.regs[ifx::DSBL as usize] = value;
                self.hw.regs[ifx::DSCR as usize] |= 1 << 2;
                if self.hw.regs[ifx::AMDM as usize] == 0 {
                    self.do_dma(host);
                } else {
                    tracing::info!("{:04X}: masked DMA skipped", self.regs.pc);
                }
                self.hw.regs[ifx::DSCR as usize] &= !(1 << 2);
                self.hw.regs[ifx::DSBL as usize] = 0;
            }
            ifx::ACDAT => self.accelerator_write(host, value),
            ifx::GAIN => {
                if value != 0 {
                    tracing::debug!("{:04X}: gain written ({value:04X})", self.regs.pc);
                }
                self.hw.regs[offset as usize] = value;
            }
            ifx::DSCR | ifx::DSPA | ifx::DSMAH | ifx::DSMAL | ifx::ACSAH..=ifx::ACCAL => {
                self.hw.regs[offset as usize] = value;
            }
            _ => {
                match ifx::name(offset) {
                    Some(name) => {
                        tracing::debug!("{:04X}: write {name} ({value:04X})", self.regs.pc)
                    }
                    None => tracing::warn!(
                        "{:04X}: write to unknown IFX register {offset:02X} ({value:04X})",
                        self.regs.pc
                    ),
                }
                self.hw.regs[offset as usize] = value;
            }
        }
    }

    fn accelerator_format(&self) -> Option<AccelFormat> {
        let raw = self.hw.regs[ifx::FORMAT as usize];
        let format = AccelFormat::from_repr(raw);
        if format.is_none() {
            tracing::warn!(
                "{:04X}: unsupported accelerator format {raw:04X}",
                self.regs.pc
            );
        }

        format
    }

    fn accelerator_read(&mut self, host: &mut dyn Host) -> u16 {
        let (start, end, current) = self.hw.accelerator();

        let (value, mut next) = match self.accelerator_format() {
            Some(AccelFormat::Read8) => {
                let mut byte = [0; 1];
                host.read_aram(current, &mut byte);
                (byte[0] as u16, current.wrapping_add(1))
            }
            Some(AccelFormat::Read16) => {
                let mut bytes = [0; 2];
                host.read_aram(current.wrapping_mul(2), &mut bytes);
                (u16::from_be_bytes(bytes), current.wrapping_add(1))
            }
            Some(AccelFormat::Write16) | None => (0, current),
        };

        if next >= end {
            next = start;
        }
        self.hw.set_pair(ifx::ACCAH, next);

        tracing::trace!(
            "{:04X}: accelerator read {value:04X} from ARAM {current:08X}",
            self.regs.pc
        );

        value
    }

    fn accelerator_write(&mut self, host: &mut dyn Host, value: u16) {
        let (_, _, current) = self.hw.accelerator();
        if self.accelerator_format() != Some(AccelFormat::Write16) {
            return;
        }

        host.write_aram(current.wrapping_mul(2), &value.to_be_bytes());
        self.hw.set_pair(ifx::ACCAH, current.wrapping_add(1));

        tracing::trace!(
            "{:04X}: accelerator wrote {value:04X} to ARAM {current:08X}",
            self.regs.pc
        );
    }

    fn do_dma(&mut self, host: &mut dyn Host) {
        let dma = self.hw.dma();
        let pc = self.regs.pc;

        if dma.len > MAX_DMA_LEN {
            tracing::error!(
                "{pc:04X}: oversized DMA (control {:04X}, host {:08X}, dsp {:04X}, {} bytes)",
                dma.control.to_bits(),
                dma.host_addr,
                dma.dsp_addr,
                dma.len
            );

            match self.hw.dma_overflow {
                DmaOverflow::Halt => {
                    self.hw.fault = Some(Fault::OversizedDma { len: dma.len });
                    self.hw.shared.set_halted(true);
                }
                DmaOverflow::Abort => std::process::abort(),
            }

            return;
        }

        let words = dma.len as usize / 2;
        match (dma.control.target(), dma.control.direction()) {
            (DmaTarget::Dram, DmaDirection::FromHost) => {
                let mut data = vec![U16::ZERO; words];
                host.read_ram(dma.host_addr, data.as_mut_bytes());

                for (i, word) in data.iter().enumerate() {
                    let addr = (dma.dsp_addr as usize + i) % self.mem.dram.len();
                    self.mem.dram[addr] = word.get();
                }

                tracing::debug!(
                    "{pc:04X}: DMA {} bytes from host {:08X} to DRAM {:04X}",
                    dma.len,
                    dma.host_addr,
                    dma.dsp_addr
                );
            }
            (DmaTarget::Dram, DmaDirection::ToHost) => {
                let data = (0..words)
                    .map(|i| {
                        let addr = (dma.dsp_addr as usize + i) % self.mem.dram.len();
                        U16::new(self.mem.dram[addr])
                    })
                    .collect::<Vec<_>>();
                host.write_ram(dma.host_addr, data.as_bytes());

                tracing::debug!(
                    "{pc:04X}: DMA {} bytes from DRAM {:04X} to host {:08X}",
                    dma.len,
                    dma.dsp_addr,
                    dma.host_addr
                );
            }
            (DmaTarget::Iram, DmaDirection::FromHost) => self.upload_code(host, dma),
            (DmaTarget::Iram, DmaDirection::ToHost) => {
                tracing::error!(
                    "{pc:04X}: unsupported DMA {} bytes from IRAM {:04X} to host {:08X}",
                    dma.len,
                    dma.dsp_addr,
                    dma.host_addr
                );
            }
        }
    }

    fn upload_code(&mut self, host: &mut dyn Host, dma: Dma) {
        let pc = self.regs.pc;
        let words = dma.len as usize / 2;
        let start = dma.dsp_addr & (IRAM_LEN as u16 - 1);

        let mut data = vec![U16::ZERO; words];
        host.read_ram(dma.host_addr, data.as_mut_bytes());
        let code = data.iter().map(|w| w.get()).collect::<Vec<_>>();

        {
            let mut iram = match self.mem.iram.unprotect() {
                Ok(iram) => iram,
                Err(e) => {
                    tracing::error!("{pc:04X}: failed to unprotect IRAM: {e}");
                    return;
                }
            };

            for (i, word) in code.iter().enumerate() {
                iram[(start as usize + i) % IRAM_LEN] = *word;
            }
        }

        host.code_loaded(start, &code);

        let hash = twox_hash::XxHash3_64::oneshot(code.as_bytes());
        tracing::info!(
            "{pc:04X}: uploaded {} bytes of code from {:08X} to IRAM {:04X} (xxh3 {hash:016X})",
            dma.len,
            dma.host_addr,
            dma.dsp_addr
        );

        // the written window may wrap around the end of IRAM
        let end = start as usize + words.min(IRAM_LEN);
        if end <= IRAM_LEN {
            self.analyze(IRAM_BASE + start, IRAM_BASE + end as u16);
        } else {
            self.analyze(IRAM_BASE + start, IRAM_BASE + IRAM_LEN as u16);
            self.analyze(IRAM_BASE, IRAM_BASE + (end - IRAM_LEN) as u16);
        }

        self.hw.code_changed = true;
    }

    /// Marks `exception` as pending.
    pub fn raise(&mut self, exception: Exception) {
        self.exceptions |= 1 << exception as u8;
    }

    /// Services the highest priority pending exception, if it is not masked.
    pub fn check_exceptions(&mut self) {
        if self.exceptions == 0 {
            return;
        }

        for level in (1..8u8).rev() {
            if !self.exceptions.bit(level) {
                continue;
            }

            let status = self.regs.status;
            if status.interrupt_enable() || level == Exception::ExternalInterrupt as u8 {
                self.regs.push(StackId::Call, self.regs.pc);
                self.regs.push(StackId::Data, status.to_bits());

                self.regs.pc = level as u16 * 2;
                self.exceptions &= !(1 << level);

                if level == Exception::ExternalInterrupt as u8 {
                    self.regs.status.set_external_interrupt_enable(false);
                } else {
                    self.regs.status.set_interrupt_enable(false);
                }

                tracing::debug!(
                    "serviced {:?} from {pc:04X}",
                    Exception::from_repr(level),
                    pc = self.regs.stack(StackId::Call).top().unwrap_or_default()
                );

                break;
            }

            tracing::trace!("{:04X}: exception {level} is masked", self.regs.pc);
        }
    }

    /// Delivers a pending external interrupt request.
    pub fn check_external_interrupt(&mut self) {
        if !self.hw.shared.take_external_interrupt() {
            return;
        }

        if self.regs.status.external_interrupt_enable() {
            self.raise(Exception::ExternalInterrupt);
        } else {
            tracing::debug!(
                "{:04X}: external interrupt dropped, interrupts disabled",
                self.regs.pc
            );
        }
    }
}
