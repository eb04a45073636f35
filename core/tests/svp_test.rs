mod common;

use common::RecordingHost;
use overdrive_core::device::svp::Svp;
use overdrive_core::state::{StateReader, StateWriter};

// Program words land at word address 0x400, the DSP entry point; the
// surrounding zero words decode as NOPs.
fn make_rom(program: &[u16]) -> Vec<u8> {
    let mut rom = vec![0u8; 0x4000];
    for (i, word) in program.iter().enumerate() {
        let byte = (0x400 + i) * 2;
        rom[byte] = (word >> 8) as u8;
        rom[byte + 1] = *word as u8;
    }
    rom
}

// Assembler shorthands for the handful of encodings the tests use.
fn ldi(d: u16, imm: u16) -> [u16; 2] {
    [(0x04 << 9) | (d << 4), imm]
}

fn ld(d: u16, s: u16) -> u16 {
    (d << 4) | s
}

const REG_X: u16 = 1;
const REG_Y: u16 = 2;
const REG_A: u16 = 3;
const REG_ST: u16 = 4;
const REG_STACK: u16 = 5;
const REG_PC: u16 = 6;
const REG_STATUS: u16 = 8; // XST status with ST5/ST6 clear
const REG_XST: u16 = 11;

#[test]
fn dsp_write_raises_the_mailbox_flag() {
    let mut host = RecordingHost::new();
    let mut svp = Svp::new();
    let mut program = Vec::new();
    program.extend_from_slice(&ldi(REG_A, 0x1234));
    program.push(ld(REG_XST, REG_A));
    let rom = make_rom(&program);

    svp.advance(4, &rom, &mut host);
    assert_eq!(svp.port_read(0xA15000), 0x1234);
    assert_eq!(svp.port_read(0xA15004) & 0x1, 0x1);
    // Reading the status from the 68000 side acknowledges it.
    assert_eq!(svp.port_read(0xA15004) & 0x1, 0x0);
}

#[test]
fn subtraction_sets_the_zero_flag() {
    let mut host = RecordingHost::new();
    let mut svp = Svp::new();
    let mut program = Vec::new();
    program.extend_from_slice(&ldi(REG_A, 2));
    program.extend_from_slice(&[0x14 << 9, 2]); // sub A, imm
    program.push(ld(REG_XST, REG_ST));
    let rom = make_rom(&program);

    svp.advance(4, &rom, &mut host);
    let st = svp.port_read(0xA15000);
    assert_ne!(st & 0x2000, 0, "Z must be set");
    assert_eq!(st & 0x8000, 0, "N must be clear");
}

#[test]
fn add_simm_lands_in_the_high_word() {
    let mut host = RecordingHost::new();
    let mut svp = Svp::new();
    let mut program = Vec::new();
    program.extend_from_slice(&ldi(REG_A, 0x0010));
    program.push((0x4C << 9) | 0x0F); // add A, 0x0F
    program.push(ld(REG_XST, REG_A));
    let rom = make_rom(&program);

    svp.advance(4, &rom, &mut host);
    assert_eq!(svp.port_read(0xA15000), 0x001F);
}

#[test]
fn branch_always_skips_the_fallthrough() {
    let mut host = RecordingHost::new();
    let mut svp = Svp::new();
    // 0x400: ldi A, 0xAAAA     (2 words)
    // 0x402: ld XST, A
    // 0x403: ldi A, 0xBBBB     (2 words)
    // 0x405: bra always, 0x408 (2 words)
    // 0x407: ld XST, A         (skipped)
    let mut program = Vec::new();
    program.extend_from_slice(&ldi(REG_A, 0xAAAA));
    program.push(ld(REG_XST, REG_A));
    program.extend_from_slice(&ldi(REG_A, 0xBBBB));
    program.extend_from_slice(&[0x26 << 9, 0x0408]);
    program.push(ld(REG_XST, REG_A));
    let rom = make_rom(&program);

    svp.advance(8, &rom, &mut host);
    assert_eq!(svp.port_read(0xA15000), 0xAAAA);
}

#[test]
fn call_and_stack_return() {
    let mut host = RecordingHost::new();
    let mut svp = Svp::new();
    // 0x400: call always, 0x500
    // 0x402: ld XST, A
    // 0x500: ldi A, 0x0077 ; ld PC, STACK
    let mut program = vec![0u16; 0x200];
    program[0] = 0x24 << 9;
    program[1] = 0x0500;
    program[2] = ld(REG_XST, REG_A);
    let sub = ldi(REG_A, 0x0077);
    program[0x100] = sub[0];
    program[0x101] = sub[1];
    program[0x102] = ld(REG_PC, REG_STACK);
    let rom = make_rom(&program);

    svp.advance(8, &rom, &mut host);
    assert_eq!(svp.port_read(0xA15000), 0x0077);
}

#[test]
fn stack_overflow_warns() {
    let mut host = RecordingHost::new();
    let mut svp = Svp::new();
    let program = vec![ld(REG_STACK, REG_A); 7];
    let rom = make_rom(&program);

    svp.advance(4, &rom, &mut host);
    assert!(host.warnings.iter().any(|w| w.contains("stack")));
}

#[test]
fn pointer_register_indirection_hits_internal_ram() {
    let mut host = RecordingHost::new();
    let mut svp = Svp::new();
    let mut program = Vec::new();
    program.extend_from_slice(&ldi(REG_A, 0x7E57));
    program.push((0x0C << 9) | 5); // ldi r0, 5
    program.push((0x02 << 9) | (REG_A << 4)); // ld (r0), A
    program.push((0x01 << 9) | (REG_Y << 4)); // ld Y, (r0)
    program.push(ld(REG_XST, REG_Y));
    let rom = make_rom(&program);

    svp.advance(6, &rom, &mut host);
    assert_eq!(svp.port_read(0xA15000), 0x7E57);
}

#[test]
fn mailbox_handshake_toward_the_dsp() {
    let mut host = RecordingHost::new();
    let mut svp = Svp::new();
    let mut program = Vec::new();
    program.push(ld(REG_Y, REG_STATUS)); // reads status, clears the 68k bit
    program.push(ld(REG_XST, REG_Y)); // reflect it back
    let rom = make_rom(&program);

    svp.port_write(0xA15000, 0x00FE);
    svp.advance(2, &rom, &mut host);
    // The DSP observed the 68000-write flag...
    assert_eq!(svp.port_read(0xA15000), 0x0002);
    // ...and its own write raised bit 0, consumed by this read.
    assert_eq!(svp.port_read(0xA15004) & 0x1, 0x1);
}

#[test]
fn x_times_y_lands_in_p() {
    let mut host = RecordingHost::new();
    let mut svp = Svp::new();
    let mut program = Vec::new();
    program.extend_from_slice(&ldi(REG_X, 0x0003));
    program.extend_from_slice(&ldi(REG_Y, 0x0004));
    // ld A, P: moves the full 32-bit product 2*X*Y.
    program.push(ld(REG_A, 7));
    program.push(ld(REG_XST, 15)); // AL: low word of A
    let rom = make_rom(&program);

    svp.advance(6, &rom, &mut host);
    assert_eq!(svp.port_read(0xA15000), 24);
}

#[test]
fn dram_windows_from_the_68000_side() {
    let mut svp = Svp::new();

    svp.mem_write(0x300000, 0x1234);
    assert_eq!(svp.mem_read(0x300000), 0x1234);
    // Mirrored every 128 KiB.
    assert_eq!(svp.mem_read(0x320000), 0x1234);
    // The cell-arrange window aliases the low half of DRAM.
    assert_eq!(svp.mem_read(0x390000), 0x1234);
    // Unused space floats high.
    assert_eq!(svp.mem_read(0x3B0000), 0xFFFF);
}

#[test]
fn reset_restores_the_entry_point() {
    let mut host = RecordingHost::new();
    let mut svp = Svp::new();
    let mut program = Vec::new();
    program.extend_from_slice(&ldi(REG_A, 0x4242));
    program.push(ld(REG_XST, REG_A));
    let rom = make_rom(&program);

    svp.advance(4, &rom, &mut host);
    assert_eq!(svp.port_read(0xA15000), 0x4242);
    svp.reset();
    assert_eq!(svp.port_read(0xA15000), 0xFFFF);
    // Runs the program again from 0x400.
    svp.advance(4, &rom, &mut host);
    assert_eq!(svp.port_read(0xA15000), 0x4242);
}

#[test]
fn state_roundtrip_is_stable() {
    let mut host = RecordingHost::new();
    let mut svp = Svp::new();
    let mut program = Vec::new();
    program.extend_from_slice(&ldi(REG_A, 0x1357));
    program.push(ld(REG_XST, REG_A));
    let rom = make_rom(&program);
    svp.mem_write(0x300010, 0xCAFE);
    svp.advance(3, &rom, &mut host);

    let mut saved = Vec::new();
    svp.save_state(&mut StateWriter::new(&mut saved)).unwrap();

    let mut restored = Svp::new();
    let mut cur = saved.as_slice();
    restored.load_state(&mut StateReader::new(&mut cur)).unwrap();

    let mut resaved = Vec::new();
    restored.save_state(&mut StateWriter::new(&mut resaved)).unwrap();
    assert_eq!(saved, resaved);
    assert_eq!(restored.mem_read(0x300010), 0xCAFE);
}
