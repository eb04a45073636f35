/// Identifies who is accessing the bus (for multi-CPU/DMA arbitration)
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BusMaster {
    Cpu(usize), // CPU 0 (main), CPU 1 (sound), etc.
    Dma,        // VDP DMA reads through the main bus
}

/// The main (68000-side) bus: a 24-bit address space of big-endian 16-bit
/// words with byte strobes. Word accesses decode on the word address;
/// byte accesses can hit half-populated devices (SRAM with only odd or
/// only even bytes, the VDP data port H/L halves), so both widths are
/// first-class operations rather than a generic data type.
pub trait MainBus {
    fn read_word(&mut self, master: BusMaster, addr: u32) -> u16;
    fn write_word(&mut self, master: BusMaster, addr: u32, data: u16);
    fn read_byte(&mut self, master: BusMaster, addr: u32) -> u8;
    fn write_byte(&mut self, master: BusMaster, addr: u32, data: u8);

    /// Interrupt acknowledge cycle for an autovectored interrupt.
    /// Called by the CPU core when it begins servicing level `level`;
    /// the board routes this to the interrupt source.
    fn acknowledge_interrupt(&mut self, level: u8) {
        let _ = level;
    }
}

/// The sound (Z80-side) bus: 16-bit addresses, 8-bit data.
pub trait SoundBus {
    fn read(&mut self, addr: u16) -> u8;
    fn write(&mut self, addr: u16, data: u8);
}
