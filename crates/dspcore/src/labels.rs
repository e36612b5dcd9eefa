//! Named addresses.
use dspint::{disasm::Names, hw::ifx};
use easyerr::Error;
use indexmap::IndexMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LabelKind {
    Procedure,
    Instruction,
    Value,
    /// Matches every kind. Only meaningful in lookups.
    Any,
}

impl LabelKind {
    pub fn matches(self, other: LabelKind) -> bool {
        self == LabelKind::Any || other == LabelKind::Any || self == other
    }

    fn parse(s: &str) -> Option<Self> {
        Some(match s.to_ascii_lowercase().as_str() {
            "proc" | "procedure" => Self::Procedure,
            "ins" | "instruction" => Self::Instruction,
            "value" | "data" => Self::Value,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label {
    pub addr: u16,
    pub kind: LabelKind,
}

#[derive(Debug, Error)]
pub enum LabelError {
    #[error("line {line}: expected a name and an address")]
    Missing { line: usize },
    #[error("line {line}: invalid address {value:?}")]
    Address { line: usize, value: String },
    #[error("line {line}: unknown label kind {value:?}")]
    Kind { line: usize, value: String },
    #[error("line {line}: trailing input")]
    Trailing { line: usize },
}

fn parse_addr(s: &str) -> Option<u16> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);

    u16::from_str_radix(digits, 16).ok()
}

/// Labels in registration order. Names are unique.
#[derive(Debug, Clone, Default)]
pub struct LabelMap {
    labels: IndexMap<String, Label>,
}

impl LabelMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Label)> {
        self.labels.iter().map(|(name, label)| (name.as_str(), *label))
    }

    /// Registers a label. A label with the same name is replaced.
    pub fn register_label(&mut self, name: impl Into<String>, addr: u16, kind: LabelKind) {
        let name = name.into();
        if let Some(old) = self.labels.insert(name.clone(), Label { addr, kind }) {
            tracing::trace!("label {name} moved from {:04X} to {addr:04X}", old.addr);
        }
    }

    /// Removes a label. Returns whether it existed.
    pub fn delete_label(&mut self, name: &str) -> bool {
        self.labels.shift_remove(name).is_some()
    }

    pub fn clear(&mut self) {
        self.labels.clear();
    }

    /// Address of the label called `name`, if it has a matching kind.
    pub fn get(&self, name: &str, kind: LabelKind) -> Option<u16> {
        self.labels
            .get(name)
            .filter(|label| label.kind.matches(kind))
            .map(|label| label.addr)
    }

    /// Name of the first registered label at `addr` with a matching kind.
    pub fn name_of(&self, addr: u16, kind: LabelKind) -> Option<&str> {
        self.labels
            .iter()
            .find(|(_, label)| label.addr == addr && label.kind.matches(kind))
            .map(|(name, _)| name.as_str())
    }

    /// Registers the names of the hardware interface registers.
    pub fn register_defaults(&mut self) {
        for (offset, name) in ifx::named() {
            self.register_label(name, 0xFF00 | offset as u16, LabelKind::Value);
        }
    }

    /// Parses `NAME ADDR [KIND]` lines into labels. Blank lines and lines starting with `#`
    /// are skipped. Labels without a kind are [`LabelKind::Instruction`]s.
    pub fn parse(&mut self, text: &str) -> Result<usize, LabelError> {
        let mut count = 0;
        for (i, line) in text.lines().enumerate() {
            let line_number = i + 1;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut parts = line.split_whitespace();
            let (Some(name), Some(addr)) = (parts.next(), parts.next()) else {
                return Err(LabelError::Missing { line: line_number });
            };

            let Some(addr) = parse_addr(addr) else {
                return Err(LabelError::Address {
                    line: line_number,
                    value: addr.to_owned(),
                });
            };

            let kind = match parts.next() {
                Some(kind) => LabelKind::parse(kind).ok_or_else(|| LabelError::Kind {
                    line: line_number,
                    value: kind.to_owned(),
                })?,
                None => LabelKind::Instruction,
            };

            if parts.next().is_some() {
                return Err(LabelError::Trailing { line: line_number });
            }

            self.register_label(name, addr, kind);
            count += 1;
        }

        Ok(count)
    }
}

impl Names for LabelMap {
    fn code(&self, addr: u16) -> Option<&str> {
        self.name_of(addr, LabelKind::Procedure)
            .or_else(|| self.name_of(addr, LabelKind::Instruction))
    }

    fn data(&self, addr: u16) -> Option<&str> {
        self.name_of(addr, LabelKind::Value).or_else(|| {
            if addr >= 0xFF00 {
                ifx::name(addr as u8)
            } else {
                None
            }
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn register_and_lookup() {
        let mut labels = LabelMap::new();
        labels.register_label("main", 0x0010, LabelKind::Procedure);
        labels.register_label("buffer", 0x0010, LabelKind::Value);

        assert_eq!(labels.get("main", LabelKind::Any), Some(0x0010));
        assert_eq!(labels.get("main", LabelKind::Value), None);
        assert_eq!(labels.name_of(0x0010, LabelKind::Any), Some("main"));
        assert_eq!(labels.name_of(0x0010, LabelKind::Value), Some("buffer"));

        labels.register_label("main", 0x0020, LabelKind::Procedure);
        assert_eq!(labels.len(), 2);
        assert_eq!(labels.get("main", LabelKind::Procedure), Some(0x0020));

        assert!(labels.delete_label("main"));
        assert!(!labels.delete_label("main"));
        assert_eq!(labels.name_of(0x0020, LabelKind::Any), None);
    }

    #[test]
    fn defaults_name_the_hardware_registers() {
        let mut labels = LabelMap::new();
        labels.register_defaults();

        assert_eq!(labels.get("CMBL", LabelKind::Value), Some(0xFFFF));
        assert_eq!(labels.name_of(0xFFC9, LabelKind::Any), Some("DSCR"));
        assert_eq!(labels.data(0xFFFC), Some("DMBH"));
        assert_eq!(labels.code(0xFFFC), None);
    }

    #[test]
    fn parse_lines() {
        let text = "
            # entry points
            start   0x0000 proc
            loop    001A
            samples 0x0400 value
        ";

        let mut labels = LabelMap::new();
        assert_eq!(labels.parse(text).unwrap(), 3);
        assert_eq!(labels.get("loop", LabelKind::Instruction), Some(0x001A));
        assert_eq!(labels.code(0x0000), Some("start"));
        assert_eq!(labels.data(0x0400), Some("samples"));
        assert_eq!(
            labels.iter().map(|(name, _)| name).collect::<Vec<_>>(),
            ["start", "loop", "samples"]
        );
    }

    #[test]
    fn parse_errors_carry_the_line() {
        let mut labels = LabelMap::new();
        assert!(matches!(
            labels.parse("a 10\nb"),
            Err(LabelError::Missing { line: 2 })
        ));
        assert!(matches!(
            labels.parse("a zz"),
            Err(LabelError::Address { line: 1, .. })
        ));
        assert!(matches!(
            labels.parse("\n\na 10 weird"),
            Err(LabelError::Kind { line: 3, .. })
        ));
        assert!(matches!(
            labels.parse("a 10 proc extra"),
            Err(LabelError::Trailing { line: 1 })
        ));
    }
}
