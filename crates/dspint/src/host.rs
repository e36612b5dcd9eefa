//! The host side of the DSP: main memory, auxiliary memory and the interrupt line.

/// Services the DSP needs from the system it is attached to.
pub trait Host {
    /// Reads `buf.len()` bytes of main memory starting at `addr`.
    fn read_ram(&mut self, addr: u32, buf: &mut [u8]);
    /// Writes `data` to main memory starting at `addr`.
    fn write_ram(&mut self, addr: u32, data: &[u8]);
    /// Reads `buf.len()` bytes of auxiliary memory starting at `addr`.
    fn read_aram(&mut self, addr: u32, buf: &mut [u8]);
    /// Writes `data` to auxiliary memory starting at `addr`.
    fn write_aram(&mut self, addr: u32, data: &[u8]);
    /// Raises the DSP interrupt on the host CPU.
    fn interrupt_request(&mut self);
    /// Called after microcode has been uploaded to instruction RAM.
    fn code_loaded(&mut self, _addr: u16, _words: &[u16]) {}
}

/// A [`Host`] backed by plain byte vectors. Out of range accesses read as zero and drop writes.
#[derive(Debug, Clone, Default)]
pub struct RamHost {
    pub ram: Vec<u8>,
    pub aram: Vec<u8>,
    pub interrupts: u32,
    pub uploads: Vec<(u16, u64)>,
}

impl RamHost {
    pub fn new(ram_len: usize, aram_len: usize) -> Self {
        Self {
            ram: vec![0; ram_len],
            aram: vec![0; aram_len],
            ..Default::default()
        }
    }
}

fn read(mem: &[u8], addr: u32, buf: &mut [u8]) {
    let start = addr as usize;
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte = mem.get(start + i).copied().unwrap_or_default();
    }
}

fn write(mem: &mut [u8], addr: u32, data: &[u8]) {
    let start = (addr as usize).min(mem.len());
    let end = (start + data.len()).min(mem.len());
    mem[start..end].copy_from_slice(&data[..end - start]);
}

impl Host for RamHost {
    fn read_ram(&mut self, addr: u32, buf: &mut [u8]) {
        read(&self.ram, addr, buf);
    }

    fn write_ram(&mut self, addr: u32, data: &[u8]) {
        write(&mut self.ram, addr, data);
    }

    fn read_aram(&mut self, addr: u32, buf: &mut [u8]) {
        read(&self.aram, addr, buf);
    }

    fn write_aram(&mut self, addr: u32, data: &[u8]) {
        write(&mut self.aram, addr, data);
    }

    fn interrupt_request(&mut self) {
        self.interrupts += 1;
    }

    fn code_loaded(&mut self, addr: u16, words: &[u16]) {
        self.uploads.push((addr, words.len() as u64));
    }
}
