//! Instruction decoding.
mod opcodes;

pub use opcodes::{CondCode, ExtensionOpcode, Opcode};

include!(concat!(env!("OUT_DIR"), "/dsp_decoding_lut.rs"));

/// A fetched instruction: the base word and, for two-word instructions, the immediate word.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Ins {
    pub base: u16,
    pub extra: u16,
}

impl std::fmt::Debug for Ins {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let decoded = self.decoded();
        if let Some(extension) = decoded.extension {
            write!(
                f,
                "{:?}'{:?} ({:04X}:{:04X})",
                decoded.opcode, extension, self.base, self.extra
            )
        } else {
            write!(
                f,
                "{:?} ({:04X}:{:04X})",
                decoded.opcode, self.base, self.extra
            )
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoded {
    pub opcode: Opcode,
    pub extension: Option<ExtensionOpcode>,
    pub needs_extra: bool,
}

impl Decoded {
    /// Length of the instruction in words.
    #[inline(always)]
    pub fn len(self) -> u16 {
        if self.needs_extra { 2 } else { 1 }
    }
}

impl Ins {
    pub fn new(base: u16) -> Self {
        Self { base, extra: 0 }
    }

    pub fn with_extra(base: u16, extra: u16) -> Self {
        Self { base, extra }
    }

    #[inline(always)]
    pub fn decoded(self) -> Decoded {
        DECODING_LUT[self.base as usize]
    }

    /// Decodes the base word at index 0 of `words`, taking the extra word from index 1 if needed.
    /// Returns `None` if `words` is too short.
    pub fn from_words(words: &[u16]) -> Option<Self> {
        let base = *words.first()?;
        let ins = Self::new(base);
        if ins.decoded().needs_extra {
            Some(Self::with_extra(base, *words.get(1)?))
        } else {
            Some(ins)
        }
    }
}
