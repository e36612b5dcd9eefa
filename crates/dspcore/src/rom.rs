//! Boot ROM images and their identification.
use dspint::{COEF_LEN, IROM_LEN};
use easyerr::Error;

/// A ROM pair with a known checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnownRom {
    pub name: &'static str,
    /// Adler-32 of the instruction ROM, as big endian bytes.
    pub irom: u32,
    /// Adler-32 of the coefficient ROM, as big endian bytes.
    pub coef: u32,
}

pub static KNOWN_ROMS: [KnownRom; 4] = [
    KnownRom {
        name: "official",
        irom: 0x66F3_34FE,
        coef: 0xF3B9_3527,
    },
    KnownRom {
        name: "LM1234 replacement",
        irom: 0x9C8F_593C,
        coef: 0x1000_0001,
    },
    KnownRom {
        name: "delroth replacement",
        irom: 0xD990_7F71,
        coef: 0xB019_C2FB,
    },
    KnownRom {
        name: "improved coefficients",
        irom: 0xD990_7F71,
        coef: 0xDB68_80C1,
    },
];

/// Looks up a ROM pair by its checksums.
pub fn identify(irom: u32, coef: u32) -> Option<&'static KnownRom> {
    KNOWN_ROMS
        .iter()
        .find(|rom| rom.irom == irom && rom.coef == coef)
}

#[derive(Debug, Error)]
pub enum FirmwareError {
    #[error("instruction ROM has {len} words, expected {IROM_LEN}")]
    IromSize { len: usize },
    #[error("coefficient ROM has {len} words, expected {COEF_LEN}")]
    CoefSize { len: usize },
    #[error("ROM image has an odd number of bytes ({len})")]
    OddLength { len: usize },
}

fn words(bytes: &[u8]) -> Result<Vec<u16>, FirmwareError> {
    if bytes.len() % 2 != 0 {
        return Err(FirmwareError::OddLength { len: bytes.len() });
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect())
}

fn checksum(words: &[u16]) -> u32 {
    let bytes = words
        .iter()
        .flat_map(|word| word.to_be_bytes())
        .collect::<Vec<_>>();

    util::adler32(&bytes)
}

/// Contents of the instruction and coefficient ROMs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Firmware {
    pub irom: Vec<u16>,
    pub coef: Vec<u16>,
}

impl Firmware {
    /// Builds firmware from ROM dumps, which are stored big endian.
    pub fn from_be_bytes(irom: &[u8], coef: &[u8]) -> Result<Self, FirmwareError> {
        let firmware = Self {
            irom: words(irom)?,
            coef: words(coef)?,
        };

        firmware.validate()?;
        Ok(firmware)
    }

    /// Checks that both images have the size of their ROM.
    pub fn validate(&self) -> Result<(), FirmwareError> {
        if self.irom.len() != IROM_LEN {
            return Err(FirmwareError::IromSize {
                len: self.irom.len(),
            });
        }

        if self.coef.len() != COEF_LEN {
            return Err(FirmwareError::CoefSize {
                len: self.coef.len(),
            });
        }

        Ok(())
    }

    /// Adler-32 checksums of the instruction and coefficient ROMs.
    pub fn checksums(&self) -> (u32, u32) {
        (checksum(&self.irom), checksum(&self.coef))
    }

    pub fn identify(&self) -> Option<&'static KnownRom> {
        let (irom, coef) = self.checksums();
        identify(irom, coef)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn known_pairs() {
        assert_eq!(identify(0x66F3_34FE, 0xF3B9_3527).unwrap().name, "official");
        assert_eq!(
            identify(0xD990_7F71, 0xDB68_80C1).unwrap().name,
            "improved coefficients"
        );

        // right IROM, wrong COEF
        assert!(identify(0x66F3_34FE, 0x1000_0001).is_none());
    }

    #[test]
    fn checksums_hash_big_endian_bytes() {
        let firmware = Firmware {
            irom: vec![0x0102; IROM_LEN],
            coef: vec![0; COEF_LEN],
        };

        let bytes = [1, 2].repeat(IROM_LEN);
        assert_eq!(firmware.checksums().0, util::adler32(&bytes));

        // all zeroes: a = 1, b = len
        assert_eq!(firmware.checksums().1, ((2 * COEF_LEN as u32) << 16) | 1);
    }

    #[test]
    fn rejects_bad_sizes() {
        let coef = vec![0; 2 * COEF_LEN];
        assert!(matches!(
            Firmware::from_be_bytes(&[0; 4], &coef),
            Err(FirmwareError::IromSize { len: 2 })
        ));
        assert!(matches!(
            Firmware::from_be_bytes(&[0; 3], &coef),
            Err(FirmwareError::OddLength { len: 3 })
        ));

        let irom = vec![0; 2 * IROM_LEN];
        let firmware = Firmware::from_be_bytes(&irom, &coef).unwrap();
        assert_eq!(firmware.irom.len(), IROM_LEN);
        assert!(firmware.identify().is_none());
    }
}
