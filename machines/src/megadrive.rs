//! The Mega Drive machine: every chip wired to the 68000 memory map,
//! the Z80 gating logic, the master cycle loop and whole-machine
//! save-states.
//!
//! The CPU cores live beside the board rather than inside it, so
//! `m68k.step(&mut board)` borrows cleanly: the board is the bus.
//!
//! Memory map (dispatch on the upper bits of the 24-bit address):
//!
//! | Range               | Target                                      |
//! |---------------------|---------------------------------------------|
//! | 0x000000-0x3FFFFF   | ROM / SRAM overlay / EEPROM pins / mapper   |
//! | 0xA00000-0xA0FFFF   | Z80 address space window                    |
//! | 0xA10000-0xA10FFF   | Version byte, controller data/control       |
//! | 0xA11100            | Z80 bus request                             |
//! | 0xA11200            | Z80 reset                                   |
//! | 0xA130F1            | SRAM overlay enable                         |
//! | 0xA130F3-0xA130FF   | Bank mapper windows 1-7 (odd bytes)         |
//! | 0xA15000-0xA1500F   | SVP mailbox/status (SVP cartridges)         |
//! | 0xC00000-0xC0001F   | VDP data/control/HV                         |
//! | 0xFF0000-0xFFFFFF   | Work RAM (mirrored through 0xE00000+)       |

use std::io;

use overdrive_core::core::bus::{BusMaster, MainBus, SoundBus};
use overdrive_core::core::machine::{Host, Machine, Signals};
use overdrive_core::cpu::{MainCpu, SoundCpu};
use overdrive_core::device::eeprom::Eeprom;
use overdrive_core::device::mixer::AudioMixer;
use overdrive_core::device::pad::{IoPorts, PORT_1, PORT_2, PORT_EXP, PluggedDevices};
use overdrive_core::device::sn76489::Sn76489;
use overdrive_core::device::svp::Svp;
use overdrive_core::device::vdp::Vdp;
use overdrive_core::device::ym2612::Ym2612;
use overdrive_core::state::{StateError, StateReader, StateWriter, check};

use crate::backup::{Sram, Ssf2Mapper};
use crate::cartridge::{CartridgeError, CartridgeRom, RomHeader, classify};
use crate::registry::MachineEntry;

/// Main-CPU cycles between host signal polls, about 10 ms of emulated
/// time.
const SIGNAL_POLL_CC: u32 = 76100;

const STATE_MAGIC: &[u8; 8] = b"MDSTATE\n";

/// Console model selection.
#[derive(Clone, Copy, Debug, Default)]
pub struct Model {
    pub overseas: bool,
    pub pal: bool,
}

/// The externally supplied CPU interpreter cores.
pub struct CpuCores {
    pub m68k: Box<dyn MainCpu>,
    pub z80: Box<dyn SoundCpu>,
}

// Z80 gating and its private address space.
struct Z80Control {
    busreq: bool,
    reset_line: bool,
    cc: i32,
    ram: Box<[u8]>, // 8 KiB
    // 9-bit serial bank register selecting the 32 KiB 68000-space
    // window at 0x8000-0xFFFF.
    bank_addr: u32,
    bank_addr_shift: u32,
    bank_bit: u32,
    // A falling reset edge resets the Z80 core, which lives outside the
    // board; latched here and applied between instructions (the Z80 is
    // bus-stopped for the whole handshake anyway).
    core_reset_request: bool,
}

impl Z80Control {
    fn new() -> Self {
        Self {
            busreq: true,
            reset_line: true,
            cc: 0,
            ram: vec![0u8; 8192].into_boxed_slice(),
            bank_addr: 0,
            bank_addr_shift: 0,
            bank_bit: 0,
            core_reset_request: false,
        }
    }

    fn power_on(&mut self) {
        self.busreq = true;
        self.reset_line = true;
        self.cc = 0;
        self.ram.fill(0);
        self.bank_addr = 0;
        self.bank_addr_shift = 0;
        self.bank_bit = 0;
        self.core_reset_request = false;
    }
}

// Everything the buses can reach. Owning the host keeps every chip's
// warning/video/audio callbacks one field away.
struct Board {
    rom: CartridgeRom,
    version_no: u8,
    ram: Box<[u16]>, // 32768 words of work RAM
    sram: Option<Sram>,
    mapper: Ssf2Mapper,
    eeprom: Option<Eeprom>,
    svp: Option<Svp>,
    z80_ctl: Z80Control,
    vdp: Vdp,
    fm: Ym2612,
    psg: Sn76489,
    mixer: AudioMixer,
    io: IoPorts,
    host: Box<dyn Host>,
}

/// The assembled console.
pub struct MegaDrive {
    m68k: Box<dyn MainCpu>,
    z80: Box<dyn SoundCpu>,
    board: Board,
    header: RomHeader,
    signal_cc: u32,
    stop: bool,
}

impl MegaDrive {
    pub fn new(
        rom: CartridgeRom,
        model: Model,
        devices: PluggedDevices,
        cores: CpuCores,
        mut host: Box<dyn Host>,
    ) -> Self {
        let header = RomHeader::parse(&rom);
        let kind = classify(&header);

        let mut version_no = 0x00;
        if model.overseas {
            version_no |= 0x80;
        }
        if model.pal {
            version_no |= 0x40;
        }

        let svp = if kind.has_svp { Some(Svp::new()) } else { None };
        let eeprom = kind.eeprom.map(|k| Eeprom::new(k, &mut *host));
        let sram = Sram::from_header(&header, rom.len_bytes(), &mut *host);
        let mapper = Ssf2Mapper::new(rom.len_bytes());
        let mut vdp = Vdp::new(model.pal, &mut *host);
        // The SVP sits between ROM and the bus and delays DMA fetches
        // by one word.
        vdp.set_dma_lag(if kind.has_svp { 2 } else { 0 });

        let mut machine = Self {
            m68k: cores.m68k,
            z80: cores.z80,
            board: Board {
                rom,
                version_no,
                ram: vec![0u16; 32768].into_boxed_slice(),
                sram,
                mapper,
                eeprom,
                svp,
                z80_ctl: Z80Control::new(),
                vdp,
                fm: Ym2612::new(),
                psg: Sn76489::new(),
                mixer: AudioMixer::new(),
                io: IoPorts::new(devices),
                host,
            },
            header,
            signal_cc: 0,
            stop: false,
        };
        machine.m68k.power_on();
        machine.m68k.assert_reset();
        machine.z80.power_on();
        machine
    }

    /// The VERSION register value (bit 7 overseas, bit 6 PAL).
    pub fn version_no(&self) -> u8 {
        self.board.version_no
    }

    pub fn rom(&self) -> &CartridgeRom {
        &self.board.rom
    }

    pub fn header(&self) -> &RomHeader {
        &self.header
    }

    pub fn plugged_devices(&self) -> PluggedDevices {
        self.board.io.plugged_devices()
    }

    pub fn set_plugged_devices(&mut self, devices: PluggedDevices) {
        self.board.io.set_plugged_devices(devices);
    }

    /// Debug/frontend peek-poke into the 68000 address space.
    pub fn bus_read_word(&mut self, addr: u32) -> u16 {
        self.board.mem_read_word(addr)
    }

    pub fn bus_read_byte(&mut self, addr: u32) -> u8 {
        self.board.mem_read_byte(addr)
    }

    pub fn bus_write_word(&mut self, addr: u32, data: u16) {
        self.board.mem_write_word(addr, data);
    }

    pub fn bus_write_byte(&mut self, addr: u32, data: u8) {
        self.board.mem_write_byte(addr, data);
    }

    pub fn vram(&self) -> &[u8] {
        self.board.vdp.vram()
    }

    pub fn cram(&self) -> &[u16; 64] {
        self.board.vdp.cram()
    }

    pub fn work_ram(&self) -> &[u16] {
        &self.board.ram
    }

    pub fn backup_ram(&self) -> Option<&[u16]> {
        self.board.sram.as_ref().map(Sram::memory)
    }

    pub fn eeprom_memory(&self) -> Option<&[u8]> {
        self.board.eeprom.as_ref().map(Eeprom::memory)
    }

    pub fn svp_dram(&self) -> Option<&[u16]> {
        self.board.svp.as_ref().map(Svp::dram)
    }

    // One 68000 instruction plus chip catch-up and DMA servicing.
    fn step_machine(&mut self) -> u32 {
        let mut cc = self.m68k.step(&mut self.board);
        let mut total = cc;
        self.apply_z80_core_reset();
        self.advance_sound_chips(cc);
        loop {
            let stalled = self.board.vdp.advance(cc, &mut *self.board.host);
            if !stalled {
                break;
            }
            cc = self.board.dma_service_word();
            total += cc;
            self.apply_z80_core_reset();
            self.advance_sound_chips(cc);
        }
        self.sync_interrupt_lines();

        self.signal_cc += total;
        if self.signal_cc >= SIGNAL_POLL_CC {
            self.signal_cc -= SIGNAL_POLL_CC;
            let Signals { stop, reset } = self.board.host.check_signals();
            if stop {
                self.stop = true;
            }
            if reset {
                self.apply_reset();
            }
        }
        total
    }

    fn advance_sound_chips(&mut self, cc: u32) {
        // The Z80 only runs while it owns its bus.
        if !self.board.z80_ctl.busreq {
            self.z80.set_irq_line(self.board.vdp.z80_irq_line());
            // Z80 clock = main clock * 7/15.
            self.board.z80_ctl.cc += (cc * 7) as i32;
            while self.board.z80_ctl.cc >= 15 {
                let t = self.z80.step(&mut self.board);
                self.board.z80_ctl.cc -= 15 * t as i32;
                if self.board.z80_ctl.core_reset_request {
                    self.apply_z80_core_reset();
                }
            }
        }
        self.board.advance_svp(cc);
        self.board.advance_fm_psg(cc);
    }

    fn apply_z80_core_reset(&mut self) {
        if self.board.z80_ctl.core_reset_request {
            self.board.z80_ctl.core_reset_request = false;
            self.z80.reset();
        }
    }

    fn sync_interrupt_lines(&mut self) {
        self.m68k.set_autovector(4, self.board.vdp.autovector_line(4));
        self.m68k.set_autovector(6, self.board.vdp.autovector_line(6));
        self.z80.set_irq_line(self.board.vdp.z80_irq_line());
    }

    // The documented reset dance; the FM chip resets through the Z80
    // reset line, so the ordering is load-bearing.
    fn apply_reset(&mut self) {
        self.m68k.assert_reset();
        self.board.z80_busreq_write(0x01); // take the bus
        self.board.z80_reset_write(0x00); // assert reset (resets Z80+FM)
        self.board.z80_busreq_write(0x00); // hand the bus back
        self.board.z80_reset_write(0x01); // release reset
        self.board.z80_busreq_write(0x01); // park the Z80 again
        self.apply_z80_core_reset();
        if let Some(svp) = &mut self.board.svp {
            svp.reset();
        }
    }

    fn power_on_state(&mut self) {
        self.m68k.power_on();
        self.z80.power_on();
        let b = &mut self.board;
        b.ram.fill(0);
        if let Some(sram) = &mut b.sram {
            sram.power_on();
        }
        b.mapper.power_on();
        if let Some(eeprom) = &mut b.eeprom {
            eeprom.power_on();
        }
        if let Some(svp) = &mut b.svp {
            svp.power_on();
        }
        b.z80_ctl.power_on();
        b.io.power_on();
        b.psg.power_on();
        b.fm.power_on();
        b.mixer.power_on();
        b.vdp.power_on(&mut *b.host);
        self.signal_cc = 0;
        self.stop = false;
    }

    fn load_state_inner(&mut self, r: &mut StateReader) -> Result<(), StateError> {
        let mut magic = [0u8; 8];
        r.get_bytes(&mut magic)?;
        check(&magic == STATE_MAGIC)?;

        self.m68k.load_state(r)?;
        self.z80.load_state(r)?;
        let b = &mut self.board;
        r.get_bytes(&mut b.z80_ctl.ram)?;
        b.z80_ctl.bank_addr = r.get_u32()?;
        b.z80_ctl.bank_addr_shift = r.get_u32()?;
        b.z80_ctl.bank_bit = r.get_u32()?;
        check(b.z80_ctl.bank_addr & 0xFF_8000 == b.z80_ctl.bank_addr)?;
        check(b.z80_ctl.bank_addr_shift & 0xFF_8000 == b.z80_ctl.bank_addr_shift)?;
        check(b.z80_ctl.bank_bit <= 8)?;
        b.z80_ctl.cc = r.get_i32()?;
        b.z80_ctl.busreq = r.get_bool()?;
        b.z80_ctl.reset_line = r.get_bool()?;

        let tag = r.get_u8()?;
        match &mut b.eeprom {
            Some(eeprom) => {
                check(tag == eeprom.kind() as u8 + 1)?;
                eeprom.load_state(r)?;
            }
            None => check(tag == 0)?,
        }

        if let Some(svp) = &mut b.svp {
            svp.load_state(r)?;
        }

        check(r.get_u32()? as usize == b.rom.word_count())?;
        r.get_u16s(&mut b.ram)?;
        match &mut b.sram {
            Some(sram) => {
                check(r.get_bool()?)?;
                sram.load_state(r)?;
            }
            None => check(!r.get_bool()?)?,
        }
        b.mapper.load_state(r)?;

        b.io.load_state(r)?;
        b.psg.load_state(r)?;
        b.fm.load_state(r)?;
        b.mixer.load_state(r)?;
        b.vdp.load_state(r, &mut *b.host)?;
        Ok(())
    }
}

impl Machine for MegaDrive {
    fn step(&mut self) -> u32 {
        self.step_machine()
    }

    fn run(&mut self) {
        self.stop = false;
        while !self.stop {
            self.step_machine();
        }
        self.stop = false;
    }

    fn reset(&mut self) {
        self.apply_reset();
    }

    fn save_state(&self, w: &mut dyn io::Write) -> Result<(), StateError> {
        let mut w = StateWriter::new(w);
        w.put_bytes(STATE_MAGIC)?;

        self.m68k.save_state(&mut w)?;
        self.z80.save_state(&mut w)?;
        let b = &self.board;
        w.put_bytes(&b.z80_ctl.ram)?;
        w.put_u32(b.z80_ctl.bank_addr)?;
        w.put_u32(b.z80_ctl.bank_addr_shift)?;
        w.put_u32(b.z80_ctl.bank_bit)?;
        w.put_i32(b.z80_ctl.cc)?;
        w.put_bool(b.z80_ctl.busreq)?;
        w.put_bool(b.z80_ctl.reset_line)?;

        match &b.eeprom {
            Some(eeprom) => {
                w.put_u8(eeprom.kind() as u8 + 1)?;
                eeprom.save_state(&mut w)?;
            }
            None => w.put_u8(0)?,
        }

        if let Some(svp) = &b.svp {
            svp.save_state(&mut w)?;
        }

        w.put_u32(b.rom.word_count() as u32)?;
        w.put_u16s(&b.ram)?;
        match &b.sram {
            Some(sram) => {
                w.put_bool(true)?;
                sram.save_state(&mut w)?;
            }
            None => w.put_bool(false)?,
        }
        b.mapper.save_state(&mut w)?;

        b.io.save_state(&mut w)?;
        b.psg.save_state(&mut w)?;
        b.fm.save_state(&mut w)?;
        b.mixer.save_state(&mut w)?;
        b.vdp.save_state(&mut w)?;
        Ok(())
    }

    fn load_state(&mut self, r: &mut dyn io::Read) -> Result<(), StateError> {
        self.stop = false;
        let mut r = StateReader::new(r);
        match self.load_state_inner(&mut r) {
            Ok(()) => Ok(()),
            Err(e) => {
                // A half-applied state is worse than a cold boot.
                self.board
                    .host
                    .warning("state: restore failed, machine re-initialized");
                self.power_on_state();
                Err(e)
            }
        }
    }
}

impl Board {
    // -----------------------------------------------------------------
    // Chip catch-up helpers
    // -----------------------------------------------------------------

    fn advance_svp(&mut self, cc: u32) {
        if let Some(svp) = &mut self.svp {
            svp.advance(cc, self.rom.bytes(), &mut *self.host);
        }
    }

    fn advance_fm_psg(&mut self, cc: u32) {
        self.fm.advance(cc, &mut self.mixer, &mut *self.host);
        self.psg.advance(cc, &mut self.mixer, &mut *self.host);
    }

    // Fetch and write one memory-to-VRAM DMA word; returns its cost.
    fn dma_service_word(&mut self) -> u32 {
        let src = self.vdp.dma_source();
        let word = self.mem_read_word(src);
        self.vdp.dma_step_write(word, &mut *self.host)
    }

    // Controller read phases are frame-relative; apply any frame
    // boundaries the VDP crossed before the port is sampled.
    fn io_frame_sync(&mut self) {
        if self.vdp.take_io_frame_events() > 0 {
            self.io.end_frame();
        }
    }

    // -----------------------------------------------------------------
    // Z80 control registers
    // -----------------------------------------------------------------

    fn z80_busreq_read(&self) -> u8 {
        if self.z80_ctl.busreq { 0x00 } else { 0x01 }
    }

    fn z80_busreq_write(&mut self, data: u8) {
        self.z80_ctl.busreq = data & 0x1 != 0;
    }

    fn z80_reset_write(&mut self, data: u8) {
        let line = data & 0x1 != 0;
        if self.z80_ctl.reset_line && !line {
            // Falling edge: the Z80 resets, and the FM chip hangs off
            // the same line.
            self.z80_ctl.core_reset_request = true;
            self.fm.reset(&mut self.mixer, &mut *self.host);
        }
        self.z80_ctl.reset_line = line;
    }

    // -----------------------------------------------------------------
    // Z80 address space
    // -----------------------------------------------------------------

    fn z80_mem_read(&mut self, addr: u16) -> u8 {
        if addr < 0x2000 {
            self.z80_ctl.ram[usize::from(addr)]
        } else if addr < 0x8000 {
            match addr {
                0x4000..=0x4003 => self.fm.status(&mut self.mixer, &mut *self.host),
                _ => 0x00,
            }
        } else {
            let mapped = self.z80_ctl.bank_addr | u32::from(addr & 0x7FFF);
            self.mem_read_byte(mapped)
        }
    }

    fn z80_mem_write(&mut self, addr: u16, data: u8) {
        if addr < 0x2000 {
            self.z80_ctl.ram[usize::from(addr)] = data;
        } else if addr < 0x8000 {
            match addr {
                0x4000 => self.fm.set_addr_part1(data, &mut self.mixer, &mut *self.host),
                0x4001 => self.fm.write_data_part1(data, &mut self.mixer, &mut *self.host),
                0x4002 => self.fm.set_addr_part2(data, &mut self.mixer, &mut *self.host),
                0x4003 => self.fm.write_data_part2(data, &mut self.mixer, &mut *self.host),
                0x6000 => {
                    // Bank register: bit 0 shifts into bit 23, nine
                    // writes latch a new window base.
                    let ctl = &mut self.z80_ctl;
                    ctl.bank_addr_shift =
                        (u32::from(data & 0x1) << 23) | ((ctl.bank_addr_shift >> 1) & 0xFF_8000);
                    ctl.bank_bit += 1;
                    if ctl.bank_bit == 9 {
                        ctl.bank_bit = 0;
                        ctl.bank_addr = ctl.bank_addr_shift;
                    }
                }
                0x7F11 => self.psg.write(data, &mut self.mixer, &mut *self.host),
                _ => {}
            }
        } else {
            let mapped = self.z80_ctl.bank_addr | u32::from(addr & 0x7FFF);
            self.mem_write_byte(mapped, data);
        }
    }

    // -----------------------------------------------------------------
    // 68000 address space, word access
    // -----------------------------------------------------------------

    fn mem_read_word(&mut self, addr: u32) -> u16 {
        let aux = (addr & 0xFF_FFFF) >> 1;

        if aux < 0x20_0000 {
            // Cartridge
            if let Some(sram) = &self.sram {
                if sram.active() && sram.contains_word(aux) {
                    return sram.read_word(aux);
                }
            }
            if self.mapper.enabled() {
                return self.mapper.read_word(&self.rom, addr);
            }
            if (aux as usize) < self.rom.word_count() {
                return self.rom.word(aux as usize);
            }
            if let Some(svp) = &mut self.svp {
                return svp.mem_read(addr);
            }
            if let Some(eeprom) = &self.eeprom {
                let base = addr & 0xFF_FFFE;
                return (u16::from(eeprom.read(base)) << 8) | u16::from(eeprom.read(base | 1));
            }
            0
        } else if aux < 0x50_0000 {
            0 // reserved
        } else if aux < 0x50_8000 {
            // Z80 window
            let a16 = (addr & 0xFFFE) as u16;
            let hi = self.z80_mem_read(a16);
            let lo = self.z80_mem_read(a16 | 1);
            (u16::from(hi) << 8) | u16::from(lo)
        } else if aux < 0x50_8800 {
            // I/O area; registers answer on the low byte.
            match aux {
                0x50_8000 => u16::from(self.version_no),
                0x50_8001 => {
                    self.io_frame_sync();
                    u16::from(self.io.data_read(PORT_1, &mut *self.host))
                }
                0x50_8002 => {
                    self.io_frame_sync();
                    u16::from(self.io.data_read(PORT_2, &mut *self.host))
                }
                0x50_8003 => {
                    self.io_frame_sync();
                    u16::from(self.io.data_read(PORT_EXP, &mut *self.host))
                }
                0x50_8004 => u16::from(self.io.control_read(PORT_1)),
                0x50_8005 => u16::from(self.io.control_read(PORT_2)),
                0x50_8006 => u16::from(self.io.control_read(PORT_EXP)),
                0x50_8007..=0x50_800F => {
                    self.host.warning("io: serial port registers are not implemented");
                    0xFFFF
                }
                _ => 0xFFFF, // access prohibited or misaligned
            }
        } else if aux < 0x60_0000 {
            // Control area
            match aux {
                0x50_8880 => u16::from(self.z80_busreq_read()) << 8,
                0x50_A800..=0x50_A807 => match &mut self.svp {
                    Some(svp) => svp.port_read(addr),
                    None => 0,
                },
                _ => 0, // memory mode, TMSS, Z80 reset, reserved
            }
        } else if aux < 0x70_0000 {
            // VDP area
            match aux {
                0x60_0000 | 0x60_0001 => self.vdp.data_read(&mut *self.host),
                0x60_0002 | 0x60_0003 => self.vdp.status(&mut *self.host),
                0x60_0004 => self.vdp.hv(&mut *self.host),
                _ => 0, // reserved or PSG
            }
        } else {
            self.ram[(aux & 0x7FFF) as usize]
        }
    }

    fn mem_write_word(&mut self, addr: u32, data: u16) {
        let aux = (addr & 0xFF_FFFF) >> 1;

        if aux < 0x20_0000 {
            // Cartridge: SRAM, the SVP's DRAM windows, or EEPROM pins.
            let mut claimed = false;
            if let Some(sram) = &mut self.sram {
                if sram.active() && sram.below_end_word(aux) {
                    claimed = true;
                    if sram.contains_word(aux) {
                        sram.write_word(aux, data);
                    }
                }
            }
            if !claimed {
                if let Some(svp) = &mut self.svp {
                    svp.mem_write(addr, data);
                } else if let Some(eeprom) = &mut self.eeprom {
                    let base = addr & 0xFF_FFFE;
                    eeprom.write(base, (data >> 8) as u8);
                    eeprom.write(base | 1, data as u8);
                }
            }
        } else if aux < 0x50_0000 {
            // ROM and reserved; serial EEPROM pins decode here.
            if let Some(eeprom) = &mut self.eeprom {
                let base = addr & 0xFF_FFFE;
                eeprom.write(base, (data >> 8) as u8);
                eeprom.write(base | 1, data as u8);
            }
        } else if aux < 0x50_8000 {
            let a16 = (addr & 0xFFFE) as u16;
            self.z80_mem_write(a16, (data >> 8) as u8);
            self.z80_mem_write(a16 | 1, data as u8);
        } else if aux < 0x50_8800 {
            match aux {
                0x50_8001 => {
                    self.io_frame_sync();
                    self.io.data_write(PORT_1, data as u8);
                }
                0x50_8002 => {
                    self.io_frame_sync();
                    self.io.data_write(PORT_2, data as u8);
                }
                0x50_8003 => {
                    self.io_frame_sync();
                    self.io.data_write(PORT_EXP, data as u8);
                }
                0x50_8004 => self.io.control_write(PORT_1, data as u8, &mut *self.host),
                0x50_8005 => self.io.control_write(PORT_2, data as u8, &mut *self.host),
                0x50_8006 => self.io.control_write(PORT_EXP, data as u8, &mut *self.host),
                0x50_8007..=0x50_800F => {
                    self.host.warning("io: serial port registers are not implemented");
                }
                _ => {} // version register, access prohibited
            }
        } else if aux < 0x60_0000 {
            match aux {
                0x50_8800 => self.host.warning("mem: memory mode register is not implemented"),
                // Both Z80 control registers sample the high byte.
                0x50_8880 => self.z80_busreq_write((data >> 8) as u8),
                0x50_8900 => self.z80_reset_write((data >> 8) as u8),
                0x50_9879..=0x50_987F => {
                    self.host.warning("mapper: word-size bank select is ignored");
                }
                0x50_A800..=0x50_A807 => {
                    if let Some(svp) = &mut self.svp {
                        svp.port_write(addr, data);
                    }
                }
                _ => {} // TMSS or reserved
            }
        } else if aux < 0x70_0000 {
            match aux {
                0x60_0000 | 0x60_0001 => self.vdp.data_write(data, &mut *self.host),
                0x60_0002 | 0x60_0003 => self.vdp.control_write(data, &mut *self.host),
                _ => {} // reserved, HV or PSG
            }
        } else {
            self.ram[(aux & 0x7FFF) as usize] = data;
        }
    }

    // -----------------------------------------------------------------
    // 68000 address space, byte access
    // -----------------------------------------------------------------

    fn mem_read_byte(&mut self, addr: u32) -> u8 {
        let aux = addr & 0xFF_FFFF;

        if aux < 0x40_0000 {
            if let Some(sram) = &self.sram {
                if sram.active() && sram.contains_byte(aux) {
                    return sram.read_byte(aux);
                }
            }
            if self.mapper.enabled() {
                return self.mapper.read_byte(&self.rom, addr);
            }
            if (aux as usize) < self.rom.len_bytes() {
                return self.rom.byte(aux as usize);
            }
            if self.svp.is_some() {
                self.host.warning("svp: byte read from DSP memory window");
                return 0x00;
            }
            if let Some(eeprom) = &self.eeprom {
                return eeprom.read(aux);
            }
            0x00
        } else if aux < 0xA0_0000 {
            0x00 // reserved
        } else if aux < 0xA1_0000 {
            self.z80_mem_read((aux & 0xFFFF) as u16)
        } else if aux < 0xA1_1000 {
            match aux {
                0xA1_0000 => 0x00,
                0xA1_0001 => self.version_no,
                0xA1_0003 => {
                    self.io_frame_sync();
                    self.io.data_read(PORT_1, &mut *self.host)
                }
                0xA1_0005 => {
                    self.io_frame_sync();
                    self.io.data_read(PORT_2, &mut *self.host)
                }
                0xA1_0007 => {
                    self.io_frame_sync();
                    self.io.data_read(PORT_EXP, &mut *self.host)
                }
                0xA1_0009 => self.io.control_read(PORT_1),
                0xA1_000B => self.io.control_read(PORT_2),
                0xA1_000D => self.io.control_read(PORT_EXP),
                0xA1_000F..=0xA1_001F if aux & 1 == 1 => {
                    self.host.warning("io: serial port registers are not implemented");
                    0x00
                }
                _ => 0x00,
            }
        } else if aux < 0xC0_0000 {
            match aux {
                0xA1_1100 => self.z80_busreq_read(),
                0xA1_5000..=0xA1_500F => {
                    if self.svp.is_some() {
                        self.host.warning("svp: byte read from the mailbox registers");
                    }
                    0x00
                }
                _ => 0x00,
            }
        } else if aux < 0xE0_0000 {
            match aux {
                0xC0_0000 | 0xC0_0002 => (self.vdp.data_read(&mut *self.host) >> 8) as u8,
                0xC0_0001 | 0xC0_0003 => self.vdp.data_read(&mut *self.host) as u8,
                0xC0_0004 | 0xC0_0006 => (self.vdp.status(&mut *self.host) >> 8) as u8,
                0xC0_0005 | 0xC0_0007 => self.vdp.status(&mut *self.host) as u8,
                0xC0_0008 => (self.vdp.hv(&mut *self.host) >> 8) as u8,
                0xC0_0009 => self.vdp.hv(&mut *self.host) as u8,
                0xC0_0011 => {
                    self.host.warning("psg: the output port is write-only");
                    0x00
                }
                _ => 0x00,
            }
        } else {
            let word = self.ram[((aux & 0xFFFF) >> 1) as usize];
            if aux & 1 == 0 { (word >> 8) as u8 } else { word as u8 }
        }
    }

    fn mem_write_byte(&mut self, addr: u32, data: u8) {
        let aux = addr & 0xFF_FFFF;

        if aux < 0x40_0000 {
            let mut claimed = false;
            if let Some(sram) = &mut self.sram {
                if sram.active() && sram.below_end_byte(aux) {
                    claimed = true;
                    if sram.contains_byte(aux) {
                        sram.write_byte(aux, data);
                    }
                }
            }
            if !claimed {
                if self.svp.is_some() {
                    self.host.warning("svp: byte write to DSP memory window");
                } else if let Some(eeprom) = &mut self.eeprom {
                    eeprom.write(aux, data);
                }
            }
        } else if aux < 0xA0_0000 {
            if let Some(eeprom) = &mut self.eeprom {
                eeprom.write(aux, data);
            }
        } else if aux < 0xA1_0000 {
            self.z80_mem_write((aux & 0xFFFF) as u16, data);
        } else if aux < 0xA1_1000 {
            match aux {
                0xA1_0003 => {
                    self.io_frame_sync();
                    self.io.data_write(PORT_1, data);
                }
                0xA1_0005 => {
                    self.io_frame_sync();
                    self.io.data_write(PORT_2, data);
                }
                0xA1_0007 => {
                    self.io_frame_sync();
                    self.io.data_write(PORT_EXP, data);
                }
                0xA1_0009 => self.io.control_write(PORT_1, data, &mut *self.host),
                0xA1_000B => self.io.control_write(PORT_2, data, &mut *self.host),
                0xA1_000D => self.io.control_write(PORT_EXP, data, &mut *self.host),
                0xA1_000F..=0xA1_001F if aux & 1 == 1 => {
                    self.host.warning("io: serial port registers are not implemented");
                }
                _ => {}
            }
        } else if aux < 0xC0_0000 {
            match aux {
                0xA1_1000 | 0xA1_1001 => {
                    self.host.warning("mem: memory mode register is not implemented");
                }
                0xA1_1100 => self.z80_busreq_write(data),
                0xA1_1200 => self.z80_reset_write(data),
                0xA1_30F1 => {
                    if let Some(sram) = &mut self.sram {
                        sram.set_overlap_enabled(data & 0x1 != 0);
                    }
                }
                0xA1_30F3 => self.bank_select(1, data),
                0xA1_30F5 => self.bank_select(2, data),
                0xA1_30F7 => self.bank_select(3, data),
                0xA1_30F9 => self.bank_select(4, data),
                0xA1_30FB => self.bank_select(5, data),
                0xA1_30FD => self.bank_select(6, data),
                0xA1_30FF => self.bank_select(7, data),
                0xA1_5000..=0xA1_500F => {
                    if self.svp.is_some() {
                        self.host.warning("svp: byte write to the mailbox registers");
                    }
                }
                _ => {}
            }
        } else if aux < 0xE0_0000 {
            match aux {
                0xC0_0000 | 0xC0_0002 => self.vdp.data_write8(data, true, &mut *self.host),
                0xC0_0001 | 0xC0_0003 => self.vdp.data_write8(data, false, &mut *self.host),
                0xC0_0011 => self.psg.write(data, &mut self.mixer, &mut *self.host),
                _ => {}
            }
        } else {
            let word = &mut self.ram[((aux & 0xFFFF) >> 1) as usize];
            if aux & 1 == 0 {
                *word = (*word & 0x00FF) | (u16::from(data) << 8);
            } else {
                *word = (*word & 0xFF00) | u16::from(data);
            }
        }
    }

    fn bank_select(&mut self, window: usize, data: u8) {
        self.mapper.configure(window, data, &mut *self.host);
    }
}

impl MainBus for Board {
    fn read_word(&mut self, _master: BusMaster, addr: u32) -> u16 {
        self.mem_read_word(addr)
    }

    fn write_word(&mut self, _master: BusMaster, addr: u32, data: u16) {
        self.mem_write_word(addr, data);
    }

    fn read_byte(&mut self, _master: BusMaster, addr: u32) -> u8 {
        self.mem_read_byte(addr)
    }

    fn write_byte(&mut self, _master: BusMaster, addr: u32, data: u8) {
        self.mem_write_byte(addr, data);
    }

    fn acknowledge_interrupt(&mut self, level: u8) {
        self.vdp.acknowledge_interrupt(level, &mut *self.host);
    }
}

impl SoundBus for Board {
    fn read(&mut self, addr: u16) -> u8 {
        self.z80_mem_read(addr)
    }

    fn write(&mut self, addr: u16, data: u8) {
        self.z80_mem_write(addr, data);
    }
}

fn create_machine(
    rom_bytes: Vec<u8>,
    model: Model,
    cores: CpuCores,
    host: Box<dyn Host>,
) -> Result<Box<dyn Machine>, CartridgeError> {
    let rom = CartridgeRom::new(rom_bytes)?;
    Ok(Box::new(MegaDrive::new(
        rom,
        model,
        PluggedDevices::default(),
        cores,
        host,
    )))
}

fn create_ntsc(
    rom_bytes: Vec<u8>,
    cores: CpuCores,
    host: Box<dyn Host>,
) -> Result<Box<dyn Machine>, CartridgeError> {
    create_machine(rom_bytes, Model { overseas: true, pal: false }, cores, host)
}

fn create_pal(
    rom_bytes: Vec<u8>,
    cores: CpuCores,
    host: Box<dyn Host>,
) -> Result<Box<dyn Machine>, CartridgeError> {
    create_machine(rom_bytes, Model { overseas: true, pal: true }, cores, host)
}

inventory::submit! {
    MachineEntry::new("megadrive", create_ntsc)
}

inventory::submit! {
    MachineEntry::new("megadrive-pal", create_pal)
}
