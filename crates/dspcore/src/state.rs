//! Save-states: a CBOR encoding of the whole coprocessor state.
use dspint::{
    Dsp,
    hw::{Control, Fault},
    regs::{Acc40, Product, StackId, Status},
};
use easyerr::{Error, ResultExt};
use serde::{Deserialize, Serialize};

/// Bumped whenever the layout of [`Snapshot`] changes.
const VERSION: u32 = 1;

const STACKS: [StackId; 4] = [
    StackId::Call,
    StackId::Data,
    StackId::LoopAddr,
    StackId::LoopCount,
];

#[derive(Debug, Error)]
pub enum SaveStateError {
    #[error(transparent)]
    Encode {
        source: ciborium::ser::Error<std::io::Error>,
    },
    #[error(transparent)]
    Decode {
        source: ciborium::de::Error<std::io::Error>,
    },
    #[error("save-state version {found} is not supported (expected {VERSION})")]
    Version { found: u32 },
    #[error("save-state {what} has {len} entries, expected {expected}")]
    Layout {
        what: &'static str,
        len: usize,
        expected: usize,
    },
    #[error(transparent)]
    Region { source: dspint::RegionError },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct RegisterState {
    pc: u16,
    addressing: [u16; 4],
    indexing: [u16; 4],
    wrapping: [u16; 4],
    stacks: [Vec<u16>; 4],
    /// `low, mid1, high, mid2`
    product: [u16; 4],
    /// `low, mid, high` of each accumulator.
    acc40: [[u16; 3]; 2],
    acc32: [i32; 2],
    config: u16,
    status: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    regs: RegisterState,
    iram: Vec<u16>,
    irom: Vec<u16>,
    dram: Vec<u16>,
    coef: Vec<u16>,
    ifx: Vec<u16>,
    cpu_mailbox: u32,
    dsp_mailbox: u32,
    control: u16,
    exceptions: u8,
    step_counter: u64,
    oversized_dma: Option<u16>,
}

impl Snapshot {
    fn capture(dsp: &Dsp) -> Self {
        let regs = &dsp.regs;
        let shared = dsp.hw.shared();

        Self {
            version: VERSION,
            regs: RegisterState {
                pc: regs.pc,
                addressing: regs.addressing,
                indexing: regs.indexing,
                wrapping: regs.wrapping,
                stacks: std::array::from_fn(|i| regs.stacks[i].as_slice().to_vec()),
                product: [
                    regs.product.low,
                    regs.product.mid1,
                    regs.product.high,
                    regs.product.mid2,
                ],
                acc40: regs.acc40.map(|acc| [acc.low, acc.mid, acc.high]),
                acc32: regs.acc32,
                config: regs.config,
                status: regs.status.to_bits(),
            },
            iram: dsp.mem.iram.as_slice().to_vec(),
            irom: dsp.mem.irom.to_vec(),
            dram: dsp.mem.dram.to_vec(),
            coef: dsp.mem.coef.to_vec(),
            ifx: dsp.hw.regs.to_vec(),
            cpu_mailbox: shared.cpu_mailbox.peek(),
            dsp_mailbox: shared.dsp_mailbox.peek(),
            control: shared.control().to_bits(),
            exceptions: dsp.exceptions,
            step_counter: dsp.step_counter,
            oversized_dma: dsp.hw.fault.map(|Fault::OversizedDma { len }| len),
        }
    }

    fn check(what: &'static str, data: &[u16], expected: usize) -> Result<(), SaveStateError> {
        if data.len() == expected {
            Ok(())
        } else {
            Err(SaveStateError::Layout {
                what,
                len: data.len(),
                expected,
            })
        }
    }

    /// Validates everything before touching `dsp`, so a failed restore leaves it unchanged.
    fn validate(&self, dsp: &Dsp) -> Result<(), SaveStateError> {
        if self.version != VERSION {
            return Err(SaveStateError::Version {
                found: self.version,
            });
        }

        Self::check("IRAM", &self.iram, dsp.mem.iram.len())?;
        Self::check("IROM", &self.irom, dsp.mem.irom.len())?;
        Self::check("DRAM", &self.dram, dsp.mem.dram.len())?;
        Self::check("COEF", &self.coef, dsp.mem.coef.len())?;
        Self::check("IFX", &self.ifx, dsp.hw.regs.len())?;

        for (stack, id) in self.regs.stacks.iter().zip(STACKS) {
            if stack.len() > id.depth() {
                return Err(SaveStateError::Layout {
                    what: "stack",
                    len: stack.len(),
                    expected: id.depth(),
                });
            }
        }

        Ok(())
    }

    fn restore(&self, dsp: &mut Dsp) -> Result<(), SaveStateError> {
        self.validate(dsp)?;

        dsp.mem
            .iram
            .unprotect()
            .context(SaveStateCtx::Region)?
            .copy_from_slice(&self.iram);
        dsp.mem.irom.copy_from_slice(&self.irom);
        dsp.mem.dram.copy_from_slice(&self.dram);
        dsp.mem.coef.copy_from_slice(&self.coef);
        dsp.hw.regs.copy_from_slice(&self.ifx);

        let state = &self.regs;
        let regs = &mut dsp.regs;
        regs.pc = state.pc;
        regs.addressing = state.addressing;
        regs.indexing = state.indexing;
        regs.wrapping = state.wrapping;
        for (values, id) in state.stacks.iter().zip(STACKS) {
            regs.stacks[id as usize].clear();
            for value in values {
                regs.push(id, *value);
            }
        }

        let [low, mid1, high, mid2] = state.product;
        regs.product = Product {
            low,
            mid1,
            high,
            mid2,
        };
        regs.acc40 = state.acc40.map(|[low, mid, high]| Acc40 { low, mid, high });
        regs.acc32 = state.acc32;
        regs.config = state.config;
        regs.status = Status::from_bits(state.status);

        let shared = dsp.hw.shared();
        shared.cpu_mailbox.restore(self.cpu_mailbox);
        shared.dsp_mailbox.restore(self.dsp_mailbox);
        shared.take_external_interrupt();
        shared.set_control(Control::from_bits(self.control));

        dsp.exceptions = self.exceptions;
        dsp.step_counter = self.step_counter;
        dsp.hw.fault = self.oversized_dma.map(|len| Fault::OversizedDma { len });

        dsp.analyze_all();
        dsp.hw.code_changed = true;

        Ok(())
    }
}

/// Encodes the state of `dsp`.
pub fn save(dsp: &Dsp) -> Result<Vec<u8>, SaveStateError> {
    let mut out = Vec::new();
    ciborium::into_writer(&Snapshot::capture(dsp), &mut out).context(SaveStateCtx::Encode)?;
    Ok(out)
}

/// Restores a state encoded by [`save`]. On error, `dsp` is left unchanged.
pub fn load(dsp: &mut Dsp, data: &[u8]) -> Result<(), SaveStateError> {
    let snapshot: Snapshot = ciborium::from_reader(data).context(SaveStateCtx::Decode)?;
    snapshot.restore(dsp)
}

#[cfg(test)]
mod test {
    use super::*;
    use dspint::{RamHost, hw::ifx};

    fn busy_dsp() -> Dsp {
        let mut dsp = Dsp::new().unwrap();
        {
            let mut iram = dsp.mem.iram.unprotect().unwrap();
            // call 0x0010; halt
            iram[..3].copy_from_slice(&[0x02BF, 0x0010, 0x0021]);
        }

        dsp.analyze_all();
        dsp.regs.pc = 0;
        dsp.regs.acc40[1].set(-0x12_3456_789A);
        dsp.regs.product.mid2 = 0x4321;
        dsp.regs.status.set_interrupt_enable(true);
        dsp.mem.dram[0x123] = 0xBEEF;
        dsp.mem.coef[7] = 0x7777;
        dsp.exceptions = 0b1000_0010;

        let mut host = RamHost::new(0, 0);
        dsp.step(&mut host);
        dsp.ifx_write(&mut host, ifx::ACSAH, 0x0012);
        dsp.ifx_write(&mut host, ifx::DMBH, 0x8765);
        dsp.hw.shared().cpu_mailbox.send(0x8000_1234);

        dsp
    }

    #[test]
    fn round_trip() {
        let dsp = busy_dsp();
        let data = save(&dsp).unwrap();

        let mut restored = Dsp::new().unwrap();
        load(&mut restored, &data).unwrap();

        assert_eq!(restored.regs, dsp.regs);
        assert_eq!(restored.mem.iram.as_slice(), dsp.mem.iram.as_slice());
        assert_eq!(restored.mem.dram, dsp.mem.dram);
        assert_eq!(restored.mem.coef, dsp.mem.coef);
        assert_eq!(restored.hw.regs, dsp.hw.regs);
        assert_eq!(restored.exceptions, dsp.exceptions);
        assert_eq!(restored.step_counter, 1);
        assert_eq!(
            restored.hw.shared().cpu_mailbox.peek(),
            dsp.hw.shared().cpu_mailbox.peek()
        );
        assert_eq!(
            restored.hw.shared().dsp_mailbox.peek(),
            dsp.hw.shared().dsp_mailbox.peek()
        );
        assert!(restored.hw.code_changed);

        // saving the restored state yields the same bytes
        assert_eq!(save(&restored).unwrap(), data);
    }

    #[test]
    fn garbage_is_rejected() {
        let mut dsp = Dsp::new().unwrap();
        assert!(matches!(
            load(&mut dsp, &[0xFF, 0x00, 0x13]),
            Err(SaveStateError::Decode { .. })
        ));
    }

    #[test]
    fn bad_layouts_leave_the_state_alone() {
        let dsp = busy_dsp();
        let mut snapshot = Snapshot::capture(&dsp);
        snapshot.dram.pop();

        let mut data = Vec::new();
        ciborium::into_writer(&snapshot, &mut data).unwrap();

        let mut target = Dsp::new().unwrap();
        assert!(matches!(
            load(&mut target, &data),
            Err(SaveStateError::Layout { what: "DRAM", .. })
        ));
        assert_eq!(target.regs, Default::default());

        snapshot = Snapshot::capture(&dsp);
        snapshot.version = 0;
        data.clear();
        ciborium::into_writer(&snapshot, &mut data).unwrap();
        assert!(matches!(
            load(&mut target, &data),
            Err(SaveStateError::Version { found: 0 })
        ));
    }
}
