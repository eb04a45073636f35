mod common;

use std::cell::RefCell;
use std::rc::Rc;

use common::{HostRecord, MainCpuRecord, SharedHost, StubMainCpu, StubSoundCpu};
use overdrive_core::core::machine::{Machine, Signals, buttons};
use overdrive_machines::megadrive::{CpuCores, MegaDrive, Model};
use overdrive_machines::cartridge::CartridgeRom;
use overdrive_machines::registry;
use overdrive_core::device::pad::PluggedDevices;

type Handles = (MegaDrive, Rc<RefCell<MainCpuRecord>>, Rc<RefCell<HostRecord>>);

fn machine_with(rom_bytes: Vec<u8>) -> Handles {
    let (m68k, cpu_record) = StubMainCpu::new(8);
    let (z80, _z80_record) = StubSoundCpu::new();
    let (host, host_record) = SharedHost::new();
    let machine = MegaDrive::new(
        CartridgeRom::new(rom_bytes).unwrap(),
        Model { overseas: true, pal: false },
        PluggedDevices::default(),
        CpuCores { m68k, z80 },
        host,
    );
    (machine, cpu_record, host_record)
}

fn plain_rom(len: usize) -> Vec<u8> {
    vec![0u8; len]
}

#[test]
fn rom_checksum_verifies_against_the_header() {
    // S1: header checksum field 0x1234, image arranged to sum to it.
    let mut bytes = plain_rom(512 * 1024);
    bytes[0x18E] = 0x12;
    bytes[0x18F] = 0x34;
    bytes[0x200] = 0x12;
    bytes[0x201] = 0x34;
    let (machine, _, _) = machine_with(bytes);

    assert_eq!(machine.header().checksum, 0x1234);
    assert!(machine.rom().checksum_ok());

    // Same header over different contents: the check fails.
    let mut bytes = plain_rom(512 * 1024);
    bytes[0x18E] = 0x12;
    bytes[0x18F] = 0x34;
    let (machine, _, _) = machine_with(bytes);
    assert!(!machine.rom().checksum_ok());
}

#[test]
fn work_ram_is_word_and_byte_addressable() {
    let (mut machine, _, _) = machine_with(plain_rom(0x1000));
    machine.bus_write_word(0xFF0000, 0xBEEF);
    assert_eq!(machine.bus_read_word(0xFF0000), 0xBEEF);
    assert_eq!(machine.bus_read_byte(0xFF0000), 0xBE);
    assert_eq!(machine.bus_read_byte(0xFF0001), 0xEF);

    machine.bus_write_byte(0xFF0000, 0x12);
    assert_eq!(machine.bus_read_word(0xFF0000), 0x12EF);

    // Mirrored through the whole top region.
    assert_eq!(machine.bus_read_word(0xE00000), 0x12EF);
}

#[test]
fn rom_reads_are_big_endian_words() {
    let mut bytes = plain_rom(0x1000);
    bytes[0x10] = 0xCA;
    bytes[0x11] = 0xFE;
    let (mut machine, _, _) = machine_with(bytes);
    assert_eq!(machine.bus_read_word(0x10), 0xCAFE);
    assert_eq!(machine.bus_read_byte(0x10), 0xCA);
    assert_eq!(machine.bus_read_byte(0x11), 0xFE);
}

#[test]
fn z80_bus_request_handshake() {
    // S5: granting the bus drops the busy bit.
    let (mut machine, _, _) = machine_with(plain_rom(0x1000));
    machine.bus_write_word(0xA11100, 0x0100);
    assert_eq!(machine.bus_read_word(0xA11100), 0x0000);
    machine.bus_write_word(0xA11100, 0x0000);
    assert_eq!(machine.bus_read_word(0xA11100), 0x0100);
}

#[test]
fn z80_window_reaches_sound_ram() {
    let (mut machine, _, _) = machine_with(plain_rom(0x1000));
    machine.bus_write_byte(0xA00042, 0x99);
    assert_eq!(machine.bus_read_byte(0xA00042), 0x99);
}

#[test]
fn fm_registers_reachable_through_the_z80_window() {
    let (mut machine, _, _) = machine_with(plain_rom(0x1000));
    // Timer A = 0x3FF, load + flag enable: overflows within a few
    // hundred cycles.
    machine.bus_write_byte(0xA04000, 0x24);
    machine.bus_write_byte(0xA04001, 0xFF);
    machine.bus_write_byte(0xA04000, 0x25);
    machine.bus_write_byte(0xA04001, 0x03);
    machine.bus_write_byte(0xA04000, 0x27);
    machine.bus_write_byte(0xA04001, 0x05);

    for _ in 0..50 {
        machine.step();
    }
    assert_eq!(machine.bus_read_byte(0xA04000) & 0x01, 0x01);
}

#[test]
fn version_register_reports_the_model() {
    let (mut machine, _, _) = machine_with(plain_rom(0x1000));
    assert_eq!(machine.version_no(), 0x80);
    assert_eq!(machine.bus_read_byte(0xA10001), 0x80);
    assert_eq!(machine.bus_read_word(0xA10000), 0x0080);
}

#[test]
fn pad_reads_reflect_host_buttons() {
    let (mut machine, _, host) = machine_with(plain_rom(0x1000));
    host.borrow_mut().buttons[0] = buttons::UP | buttons::C | buttons::A | buttons::START;

    machine.bus_write_byte(0xA10009, 0x40); // TH as output
    machine.bus_write_byte(0xA10003, 0x40); // TH high
    assert_eq!(machine.bus_read_byte(0xA10003), 0x5E);
    machine.bus_write_byte(0xA10003, 0x00); // TH low
    assert_eq!(machine.bus_read_byte(0xA10003), 0x02);
}

#[test]
fn pads_can_be_hot_swapped() {
    let (mut machine, _, host) = machine_with(plain_rom(0x1000));
    host.borrow_mut().buttons[0] = buttons::X | buttons::Y | buttons::Z;

    use overdrive_core::device::pad::DeviceKind;
    assert_eq!(machine.plugged_devices().port1, DeviceKind::Pad3);
    machine.set_plugged_devices(PluggedDevices {
        port1: DeviceKind::Pad6,
        port2: DeviceKind::None,
        expansion: DeviceKind::None,
    });
    assert_eq!(machine.plugged_devices().port1, DeviceKind::Pad6);

    // The 6-button identification phase answers through the bus: the
    // 7th read of a frame carries X/Y/Z on the low bits.
    machine.bus_write_byte(0xA10009, 0x40);
    let mut reads = Vec::new();
    for i in 0..8 {
        machine.bus_write_byte(0xA10003, if i % 2 == 0 { 0x40 } else { 0x00 });
        reads.push(machine.bus_read_byte(0xA10003));
    }
    assert_eq!(reads[6] & 0x07, 0x00);
}

#[test]
fn vint_fires_once_per_frame() {
    // S3: from fresh init the vertical interrupt pends near line 225.
    let (mut machine, cpu, _) = machine_with(plain_rom(0x1000));
    machine.bus_write_word(0xC00004, 0x8120); // VInt enable

    let mut cycles: u64 = 0;
    while cpu.borrow().level6_asserts == 0 {
        cycles += u64::from(machine.step());
        assert!(cycles < 200_000, "VInt never fired");
    }
    // Roughly 225 of 262 lines into the ~127,841-cycle frame.
    assert!((100_000..125_000).contains(&cycles), "VInt at {cycles} cycles");
    assert_ne!(machine.bus_read_word(0xC00004) & 0x0080, 0, "VInt pending bit");

    // No second assertion within the same frame.
    while cycles < 135_000 {
        cycles += u64::from(machine.step());
    }
    assert_eq!(cpu.borrow().level6_asserts, 1);
}

#[test]
fn bank_mapper_switches_high_windows() {
    // S6: on a 4 MiB image, bank 2 mapped into window 1.
    let mut bytes = plain_rom(4 * 1024 * 1024);
    bytes[0x80000] = 0x11;
    bytes[2 * 0x80000] = 0x22;
    bytes[2 * 0x80000 + 1] = 0x33;
    let (mut machine, _, _) = machine_with(bytes);

    assert_eq!(machine.bus_read_byte(0x80000), 0x11);
    machine.bus_write_byte(0xA130F3, 2);
    assert_eq!(machine.bus_read_byte(0x80000), 0x22);
    assert_eq!(machine.bus_read_word(0x80000), 0x2233);
    // Window 0 is locked to the first bank.
    assert_eq!(machine.bus_read_byte(0x00000), 0x00);
}

#[test]
fn bank_mapper_rejects_missing_banks() {
    let (mut machine, _, host) = machine_with(plain_rom(4 * 1024 * 1024));
    machine.bus_write_byte(0xA130F3, 0x55);
    assert!(host.borrow().warnings.iter().any(|w| w.contains("bank")));
}

#[test]
fn sram_overlay_gates_cartridge_reads() {
    // Backup RAM at 0x200000-0x2003FF, not overlapping this small ROM.
    let mut bytes = plain_rom(0x1000);
    bytes[0x1B0..0x1B4].copy_from_slice(&[b'R', b'A', 0xE0, 0x20]);
    bytes[0x1B4..0x1B8].copy_from_slice(&[0x00, 0x20, 0x00, 0x00]);
    bytes[0x1B8..0x1BC].copy_from_slice(&[0x00, 0x20, 0x03, 0xFF]);
    let (mut machine, _, _) = machine_with(bytes);

    machine.bus_write_word(0x200000, 0x5AA5);
    assert_eq!(machine.bus_read_word(0x200000), 0x5AA5);
    machine.bus_write_byte(0x200002, 0x77);
    assert_eq!(machine.bus_read_byte(0x200002), 0x77);
    assert_eq!(machine.backup_ram().unwrap()[0], 0x5AA5);
}

#[test]
fn eeprom_cartridge_accepts_a_serial_write() {
    // A Sega-board title: SDA on bit 0 and SCL on bit 1 of 0x200001.
    let mut bytes = plain_rom(0x1000);
    bytes[0x180..0x18E].copy_from_slice(b"GM G-4060  -00");
    bytes[0x18E] = 0x9D;
    bytes[0x18F] = 0x79;
    let (mut machine, _, _) = machine_with(bytes);
    assert!(machine.eeprom_memory().is_some());

    let mut lines = |sda: u8, scl: u8| {
        machine.bus_write_byte(0x200001, (scl << 1) | sda);
    };
    let mut send_byte = |lines: &mut dyn FnMut(u8, u8), byte: u8| {
        for bit in (0..8).rev() {
            let b = (byte >> bit) & 1;
            lines(b, 0);
            lines(b, 1);
            lines(b, 0);
        }
        // ACK clock
        lines(0, 1);
        lines(0, 0);
    };

    // Idle, start, select address 3 for write, one data byte.
    lines(1, 1);
    lines(0, 1);
    lines(0, 0);
    send_byte(&mut lines, 3 << 1);
    send_byte(&mut lines, 0x5A);

    assert_eq!(machine.eeprom_memory().unwrap()[3], 0x5A);
}

#[test]
fn svp_cartridge_maps_dram_and_mailbox() {
    let mut bytes = plain_rom(0x40000);
    bytes[0x180..0x18E].copy_from_slice(b"GM MK-1229 -00");
    bytes[0x18E] = 0x34;
    bytes[0x18F] = 0x5D;
    let (mut machine, _, _) = machine_with(bytes);

    assert!(machine.svp_dram().is_some());
    machine.bus_write_word(0x300000, 0x4D44);
    assert_eq!(machine.bus_read_word(0x300000), 0x4D44);
    assert_eq!(machine.svp_dram().unwrap()[0], 0x4D44);

    // Mailbox write flows into the DSP-visible status.
    machine.bus_write_word(0xA15000, 0x00AB);
    assert_eq!(machine.bus_read_word(0xA15000), 0x00AB);
}

#[test]
fn reset_sequence_parks_the_z80() {
    let (mut machine, cpu, _) = machine_with(plain_rom(0x1000));
    let resets_before = cpu.borrow().resets;
    machine.reset();
    assert_eq!(cpu.borrow().resets, resets_before + 1);
    // The Z80 ends the sequence bus-stopped.
    assert_eq!(machine.bus_read_byte(0xA11100), 0x00);
}

#[test]
fn host_signals_are_polled_and_stop_is_honored() {
    let (mut machine, _, host) = machine_with(plain_rom(0x1000));
    // First poll: reset request; second: stop.
    host.borrow_mut().pending_signals =
        vec![Signals { stop: false, reset: true }, Signals { stop: true, reset: false }];

    machine.run();
    let record = host.borrow();
    assert!(record.signal_polls >= 2);
}

#[test]
fn frames_and_audio_reach_the_host() {
    let (mut machine, _, host) = machine_with(plain_rom(0x1000));
    let mut cycles: u64 = 0;
    while cycles < 300_000 {
        cycles += u64::from(machine.step());
    }
    let record = host.borrow();
    assert!(record.frame_count >= 2);
    assert_eq!(record.last_frame.len(), 256 * 224);
    assert!(record.audio_samples >= 1024);
    assert_eq!(record.resolutions.first(), Some(&(256, 224)));
}

#[test]
fn registry_lists_both_regions() {
    let names: Vec<_> = registry::all().iter().map(|e| e.name).collect();
    assert_eq!(names, vec!["megadrive", "megadrive-pal"]);

    let entry = registry::find("megadrive").unwrap();
    let (m68k, _) = StubMainCpu::new(8);
    let (z80, _) = StubSoundCpu::new();
    let (host, _) = SharedHost::new();
    let machine = (entry.create)(plain_rom(0x1000), CpuCores { m68k, z80 }, host);
    assert!(machine.is_ok());

    assert!(registry::find("saturn").is_none());
}

#[test]
fn registry_rejects_bad_images() {
    let entry = registry::find("megadrive").unwrap();
    let (m68k, _) = StubMainCpu::new(8);
    let (z80, _) = StubSoundCpu::new();
    let (host, _) = SharedHost::new();
    assert!((entry.create)(vec![0; 3], CpuCores { m68k, z80 }, host).is_err());
}
