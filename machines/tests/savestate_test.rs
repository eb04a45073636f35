mod common;

use common::{SharedHost, StubMainCpu, StubSoundCpu};
use overdrive_core::core::machine::Machine;
use overdrive_core::device::pad::PluggedDevices;
use overdrive_machines::cartridge::CartridgeRom;
use overdrive_machines::megadrive::{CpuCores, MegaDrive, Model};

fn machine_with(rom_bytes: Vec<u8>) -> MegaDrive {
    let (m68k, _) = StubMainCpu::new(8);
    let (z80, _) = StubSoundCpu::new();
    let (host, _) = SharedHost::new();
    MegaDrive::new(
        CartridgeRom::new(rom_bytes).unwrap(),
        Model { overseas: true, pal: false },
        PluggedDevices::default(),
        CpuCores { m68k, z80 },
        host,
    )
}

fn sram_rom() -> Vec<u8> {
    let mut bytes = vec![0u8; 0x1000];
    bytes[0x1B0..0x1B4].copy_from_slice(&[b'R', b'A', 0xE0, 0x20]);
    bytes[0x1B4..0x1B8].copy_from_slice(&[0x00, 0x20, 0x00, 0x00]);
    bytes[0x1B8..0x1BC].copy_from_slice(&[0x00, 0x20, 0x03, 0xFF]);
    bytes
}

#[test]
fn roundtrip_restores_memory_contents() {
    let mut machine = machine_with(vec![0u8; 0x1000]);
    machine.bus_write_word(0xFF0100, 0xABCD);
    machine.bus_write_byte(0xA00010, 0x42);
    // VRAM through the data port: auto-increment 2, address 0x20.
    machine.bus_write_word(0xC00004, 0x8F02);
    machine.bus_write_word(0xC00004, 0x4020);
    machine.bus_write_word(0xC00004, 0x0000);
    machine.bus_write_word(0xC00000, 0xD1CE);
    for _ in 0..100 {
        machine.step();
    }

    let mut saved = Vec::new();
    machine.save_state(&mut saved).unwrap();

    machine.bus_write_word(0xFF0100, 0x0000);
    machine.bus_write_byte(0xA00010, 0x00);

    machine.load_state(&mut saved.as_slice()).unwrap();
    assert_eq!(machine.bus_read_word(0xFF0100), 0xABCD);
    assert_eq!(machine.work_ram()[0x80], 0xABCD);
    assert_eq!(machine.bus_read_byte(0xA00010), 0x42);
    assert_eq!(machine.vram()[0x20], 0xD1);
    assert_eq!(machine.vram()[0x21], 0xCE);

    // The reloaded machine serializes to the same stream.
    let mut resaved = Vec::new();
    machine.save_state(&mut resaved).unwrap();
    assert_eq!(saved, resaved);
}

#[test]
fn roundtrip_covers_backup_ram() {
    let mut machine = machine_with(sram_rom());
    machine.bus_write_word(0x200010, 0x600D);

    let mut saved = Vec::new();
    machine.save_state(&mut saved).unwrap();
    machine.bus_write_word(0x200010, 0x0BAD);

    machine.load_state(&mut saved.as_slice()).unwrap();
    assert_eq!(machine.bus_read_word(0x200010), 0x600D);
}

#[test]
fn bad_magic_reinitializes_the_machine() {
    let mut machine = machine_with(vec![0u8; 0x1000]);
    machine.bus_write_word(0xFF0000, 0x1111);

    let mut saved = Vec::new();
    machine.save_state(&mut saved).unwrap();
    saved[0] = b'X';

    assert!(machine.load_state(&mut saved.as_slice()).is_err());
    // Fresh power-on state: work RAM cleared.
    assert_eq!(machine.bus_read_word(0xFF0000), 0x0000);
}

#[test]
fn truncated_state_fails_and_reinitializes() {
    let mut machine = machine_with(vec![0u8; 0x1000]);
    let mut saved = Vec::new();
    machine.save_state(&mut saved).unwrap();
    saved.truncate(saved.len() / 2);

    machine.bus_write_word(0xFF0000, 0x2222);
    assert!(machine.load_state(&mut saved.as_slice()).is_err());
    assert_eq!(machine.bus_read_word(0xFF0000), 0x0000);
}

#[test]
fn state_for_a_different_rom_is_rejected() {
    let mut machine_a = machine_with(vec![0u8; 0x1000]);
    let mut saved = Vec::new();
    machine_a.save_state(&mut saved).unwrap();

    // Same hardware, different ROM size: the memory block refuses it.
    let mut machine_b = machine_with(vec![0u8; 0x2000]);
    assert!(machine_b.load_state(&mut saved.as_slice()).is_err());
}

#[test]
fn state_for_an_sram_cartridge_needs_the_sram() {
    let mut machine_a = machine_with(sram_rom());
    let mut saved = Vec::new();
    machine_a.save_state(&mut saved).unwrap();

    let mut machine_b = machine_with(vec![0u8; 0x1000]);
    assert!(machine_b.load_state(&mut saved.as_slice()).is_err());
}

#[test]
fn stepping_continues_after_a_restore() {
    let mut machine = machine_with(vec![0u8; 0x1000]);
    for _ in 0..50 {
        machine.step();
    }
    let mut saved = Vec::new();
    machine.save_state(&mut saved).unwrap();

    machine.load_state(&mut saved.as_slice()).unwrap();
    for _ in 0..50 {
        machine.step();
    }
}
