//! The abstract host machine targeted by the recompiler.
//!
//! It has [`HOST_REGS`] 64-bit registers and a stack. Host calls clobber [`HostReg::RET`],
//! [`HostReg::FRAME`] and the [`SCRATCH`] registers; every other register survives them.
use std::fmt;

pub const HOST_REGS: usize = 16;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostReg(u8);

impl HostReg {
    /// Receives the result of host calls. Never allocated.
    pub const RET: Self = Self(0);
    /// Allocatable, but clobbered by host calls before their arguments are read.
    pub const FRAME: Self = Self(13);
    /// The host stack pointer. Never allocated.
    pub const SP: Self = Self(15);

    pub const fn new(index: u8) -> Self {
        assert!((index as usize) < HOST_REGS);
        Self(index)
    }

    #[inline(always)]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Whether host calls may change the value of this register.
    pub fn call_clobbered(self) -> bool {
        self == Self::RET || self == Self::FRAME || SCRATCH.contains(&self)
    }
}

impl fmt::Debug for HostReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "h{}", self.0)
    }
}

/// Registers preferred for short lived temporaries.
pub const SCRATCH: [HostReg; 3] = [HostReg(1), HostReg(2), HostReg(3)];

/// Static homes of the two 40-bit accumulators.
pub const ACC_HOMES: [HostReg; 2] = [HostReg(8), HostReg(9)];

/// Allocation priority for guest registers. `FRAME` comes last since it must be saved around
/// every host call.
pub const GUEST_ORDER: [HostReg; 11] = [
    HostReg(4),
    HostReg(5),
    HostReg(6),
    HostReg(7),
    HostReg(10),
    HostReg(11),
    HostReg(12),
    HostReg(14),
    HostReg(8),
    HostReg(9),
    HostReg::FRAME,
];
