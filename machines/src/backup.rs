//! Cartridge-side backup memory and the large-ROM bank mapper.

use overdrive_core::core::machine::Host;
use overdrive_core::state::{StateError, StateReader, StateWriter, check};

use crate::cartridge::{CartridgeRom, RomHeader};

/// Battery-backed static RAM mapped over a header-declared range of
/// cartridge space. Words are big-endian on the bus. When the range
/// overlaps ROM the mapping is gated by the 0xA130F1 enable bit.
pub struct Sram {
    mem: Vec<u16>,
    start_word: u32,
    end_word: u32,
    start_byte: u32,
    end_byte: u32,
    overlapped: bool,
    overlap_enabled: bool,
}

impl Sram {
    /// Build from the header's backup-RAM range; `None` when the header
    /// declares none or the range is nonsense.
    pub fn from_header(header: &RomHeader, rom_bytes: usize, host: &mut dyn Host) -> Option<Self> {
        if !header.sram_flags.available {
            return None;
        }
        let start_byte = header.sram_start & !1;
        let end_byte = (header.sram_end & !1) + 2;
        if end_byte <= start_byte || end_byte > 0x40_0000 {
            return None;
        }
        let start_word = start_byte >> 1;
        let end_word = end_byte >> 1;
        let n_words = (end_word - start_word) as usize;
        let mut mem = host.get_static_ram(n_words);
        mem.resize(n_words, 0);
        Some(Self {
            mem,
            start_word,
            end_word,
            start_byte,
            end_byte,
            overlapped: start_byte < rom_bytes as u32,
            overlap_enabled: false,
        })
    }

    pub fn power_on(&mut self) {
        self.overlap_enabled = false;
    }

    /// Mapped right now (either outside ROM, or the overlay is enabled).
    pub fn active(&self) -> bool {
        !self.overlapped || self.overlap_enabled
    }

    pub fn set_overlap_enabled(&mut self, enabled: bool) {
        self.overlap_enabled = enabled;
    }

    pub fn contains_word(&self, word_addr: u32) -> bool {
        word_addr >= self.start_word && word_addr < self.end_word
    }

    /// Word writes below the range still decode into the region (the
    /// chip ignores them); only the end bound blocks the mapping.
    pub fn below_end_word(&self, word_addr: u32) -> bool {
        word_addr < self.end_word
    }

    pub fn contains_byte(&self, addr: u32) -> bool {
        addr >= self.start_byte && addr < self.end_byte
    }

    pub fn below_end_byte(&self, addr: u32) -> bool {
        addr < self.end_byte
    }

    pub fn read_word(&self, word_addr: u32) -> u16 {
        self.mem[(word_addr - self.start_word) as usize]
    }

    pub fn write_word(&mut self, word_addr: u32, data: u16) {
        self.mem[(word_addr - self.start_word) as usize] = data;
    }

    pub fn read_byte(&self, addr: u32) -> u8 {
        let off = addr - self.start_byte;
        let word = self.mem[(off >> 1) as usize];
        if off & 1 == 0 { (word >> 8) as u8 } else { word as u8 }
    }

    pub fn write_byte(&mut self, addr: u32, data: u8) {
        let off = addr - self.start_byte;
        let word = &mut self.mem[(off >> 1) as usize];
        if off & 1 == 0 {
            *word = (*word & 0x00FF) | (u16::from(data) << 8);
        } else {
            *word = (*word & 0xFF00) | u16::from(data);
        }
    }

    /// Persistent contents (for host-side saving).
    pub fn memory(&self) -> &[u16] {
        &self.mem
    }

    pub fn save_state(&self, w: &mut StateWriter) -> Result<(), StateError> {
        w.put_u32(self.start_word)?;
        w.put_u32(self.end_word)?;
        w.put_u32(self.start_byte)?;
        w.put_u32(self.end_byte)?;
        w.put_bool(self.overlapped)?;
        w.put_bool(self.overlap_enabled)?;
        w.put_u16s(&self.mem)?;
        Ok(())
    }

    pub fn load_state(&mut self, r: &mut StateReader) -> Result<(), StateError> {
        // The geometry is a property of the cartridge; a state for a
        // different one is rejected.
        check(r.get_u32()? == self.start_word)?;
        check(r.get_u32()? == self.end_word)?;
        check(r.get_u32()? == self.start_byte)?;
        check(r.get_u32()? == self.end_byte)?;
        check(r.get_bool()? == self.overlapped)?;
        self.overlap_enabled = r.get_bool()?;
        r.get_u16s(&mut self.mem)?;
        Ok(())
    }
}

/// 512 KiB bank size of the large-ROM mapper.
pub const BANK_SIZE: usize = 512 * 1024;

/// Bank mapper for ROMs of 4 MiB and up: eight 512 KiB windows, each
/// pointing at a selectable physical bank. Window 0 is fixed to bank 0.
/// The size heuristic is deliberately loose; homebrew uses the mapper
/// with images that are not a whole number of banks.
pub struct Ssf2Mapper {
    enabled: bool,
    n_banks: usize,
    banks: [usize; 8],
}

impl Ssf2Mapper {
    pub fn new(rom_bytes: usize) -> Self {
        let enabled = rom_bytes >= 4 * 1024 * 1024;
        Self {
            enabled,
            n_banks: if enabled { rom_bytes / BANK_SIZE } else { 0 },
            banks: [0, 1, 2, 3, 4, 5, 6, 7],
        }
    }

    pub fn power_on(&mut self) {
        self.banks = [0, 1, 2, 3, 4, 5, 6, 7];
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Select the physical bank for window 1-7.
    pub fn configure(&mut self, window: usize, bank: u8, host: &mut dyn Host) {
        if !self.enabled {
            return;
        }
        if usize::from(bank) >= self.n_banks {
            host.warning(&format!("mapper: selected bank {bank} does not exist"));
            return;
        }
        self.banks[window] = usize::from(bank);
    }

    pub fn read_word(&self, rom: &CartridgeRom, addr: u32) -> u16 {
        let window = ((addr >> 19) & 0x7) as usize;
        let offset = self.banks[window] * BANK_SIZE + (addr as usize & 0x7FFFF);
        rom.word(offset >> 1)
    }

    pub fn read_byte(&self, rom: &CartridgeRom, addr: u32) -> u8 {
        let window = ((addr >> 19) & 0x7) as usize;
        rom.byte(self.banks[window] * BANK_SIZE + (addr as usize & 0x7FFFF))
    }

    pub fn save_state(&self, w: &mut StateWriter) -> Result<(), StateError> {
        if !self.enabled {
            return Ok(());
        }
        w.put_u32(self.n_banks as u32)?;
        for bank in self.banks {
            w.put_u32(bank as u32)?;
        }
        Ok(())
    }

    pub fn load_state(&mut self, r: &mut StateReader) -> Result<(), StateError> {
        if !self.enabled {
            return Ok(());
        }
        check(r.get_u32()? as usize == self.n_banks)?;
        for bank in &mut self.banks {
            *bank = r.get_u32()? as usize;
            check(*bank < self.n_banks)?;
        }
        check(self.banks[0] == 0)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullHost;
    impl Host for NullHost {}

    #[test]
    fn mapper_disabled_below_4mib() {
        assert!(!Ssf2Mapper::new(2 * 1024 * 1024).enabled());
        assert!(Ssf2Mapper::new(4 * 1024 * 1024).enabled());
    }

    #[test]
    fn mapper_window_zero_stays_identity() {
        let mut rom_bytes = vec![0u8; 4 * 1024 * 1024];
        rom_bytes[0] = 0xAB;
        rom_bytes[BANK_SIZE] = 0xCD;
        let rom = CartridgeRom::new(rom_bytes).unwrap();
        let mapper = Ssf2Mapper::new(rom.len_bytes());
        assert_eq!(mapper.read_byte(&rom, 0), 0xAB);
        assert_eq!(mapper.read_byte(&rom, BANK_SIZE as u32), 0xCD);
    }

    #[test]
    fn mapper_rejects_missing_bank() {
        let rom = CartridgeRom::new(vec![0u8; 4 * 1024 * 1024]).unwrap();
        let mut mapper = Ssf2Mapper::new(rom.len_bytes());
        mapper.configure(1, 200, &mut NullHost);
        assert_eq!(mapper.read_byte(&rom, 0x80000), 0);
    }
}
