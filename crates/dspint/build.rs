//! Generates `DECODING_LUT`, the decoding of every base word.
//!
//! Only a few hundred distinct decodings exist, so each gets a named constant and the table
//! refers to those by name.
#[allow(dead_code)]
#[path = "src/ins/opcodes.rs"]
mod opcodes;

use opcodes::{ExtensionOpcode, Opcode};
use std::collections::HashMap;
use std::fmt::Write;
use std::path::PathBuf;

/// The decoding of a base word, mirroring `ins::Decoded`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct Entry {
    opcode: Opcode,
    extension: Option<ExtensionOpcode>,
}

impl Entry {
    fn decode(base: u16) -> Self {
        let opcode = Opcode::find_match(base);
        let extension = opcode
            .has_extension()
            .then(|| ExtensionOpcode::find_match(base & opcode.extension_mask()));

        Self { opcode, extension }
    }

    fn literal(self) -> String {
        let extension = match self.extension {
            Some(ext) => format!("Some(ExtensionOpcode::{ext:?})"),
            None => "None".to_owned(),
        };

        format!(
            "Decoded {{ opcode: Opcode::{:?}, extension: {extension}, needs_extra: {} }}",
            self.opcode,
            self.opcode.needs_extra(),
        )
    }
}

fn main() -> std::io::Result<()> {
    println!("cargo::rerun-if-changed=build.rs");
    println!("cargo::rerun-if-changed=src/ins/opcodes.rs");

    let mut ids = HashMap::new();
    let mut consts = String::new();
    let mut table = String::from("static DECODING_LUT: [Decoded; 1 << 16] = [");

    for base in 0..=u16::MAX {
        let entry = Entry::decode(base);
        let id = match ids.get(&entry) {
            Some(id) => *id,
            None => {
                let id = ids.len();
                ids.insert(entry, id);
                writeln!(consts, "const D{id}: Decoded = {};", entry.literal()).unwrap();
                id
            }
        };

        write!(table, "D{id},").unwrap();
    }

    table.push_str("];\n");
    consts.push_str(&table);

    let path = PathBuf::from(std::env::var("OUT_DIR").unwrap()).join("dsp_decoding_lut.rs");
    std::fs::write(path, consts)
}
