//! Video display processor.
//!
//! Owns 64 KiB VRAM, the 64-entry 9-bit CRAM palette and the 40-entry
//! vertical scroll table. The control port composes two-word commands
//! (or register writes), the data port reads/writes the addressed
//! memory, and a three-mode DMA engine (memory-to-VRAM, fill, copy)
//! runs against per-scanline byte budgets. Only memory-to-VRAM DMA
//! stalls the main CPU: [`Vdp::advance`] reports the stall and the
//! machine services one source word at a time through
//! [`Vdp::dma_source`] / [`Vdp::dma_step_write`].
//!
//! Timing is tracked in "points" (pixel clocks) per line, 342 in H32
//! and 422 in H40, against 262 (NTSC) or 313 (PAL) lines per frame.
//! Point fractions are fixed-point in units of one `frac`-th of a
//! main-CPU cycle so NTSC's non-integer cycles-per-point stay exact
//! over a frame.
//!
//! Rendering is scanline painter's order: background, scroll B then A
//! at low priority (the window replacing scroll A cells), sprites at
//! low priority, scroll B then A at high priority, sprites at high
//! priority; shadow/highlight tags resolve per pixel against the
//! priority state of both scroll layers.
//!
//! The frame buffer stores 11-bit color words: 9 bits of BGR plus the
//! shadow (0x200) and highlight (0x400) tags. [`color_to_rgb`] maps
//! them to 8-bit RGB.

use crate::core::machine::Host;
use crate::state::{StateError, StateReader, StateWriter, check};

/// Main-CPU clock rates; the master clock is 7x this and the Z80/VDP
/// clock is master/15.
pub const CYCLES_PER_SEC_NTSC: u32 = 7_670_454;
pub const CYCLES_PER_SEC_PAL: u32 = 7_600_489;

const NTSC_LINES: i32 = 262;
const PAL_LINES: i32 = 313;

// Point fraction per main-CPU cycle: NTSC runs 3 frame-thirds per 20th
// of a second, PAL 1 frame per 50th.
const NTSC_FRAC: i64 = (CYCLES_PER_SEC_NTSC / 20) as i64;
const NTSC_CC2PP: i64 = 3;
const PAL_FRAC: i64 = (CYCLES_PER_SEC_PAL / 50) as i64;
const PAL_CC2PP: i64 = 1;

const POINTS_PER_LINE_H32: i64 = 342;
const POINTS_PER_LINE_H40: i64 = 422;

// Horizontal event positions in points. The HInt counter decrements at
// the end of active display.
const LINEPP_END_DISPLAY_H32: i32 = 256;
const LINEPP_BEGIN_HBLANK_H32: i32 = 268;
const LINEPP_END_HBLANK_H32: i32 = 10;
const LINEPP_END_DISPLAY_H40: i32 = 320;
const LINEPP_BEGIN_HBLANK_H40: i32 = 330;
const LINEPP_END_HBLANK_H40: i32 = 12;

// Main-CPU cycles per memory-to-VRAM DMA access. The CPU is stopped for
// the duration, so a flat cost keeps every game's transfer inside its
// blanking budget without tracking slot-level timing.
const DMA_MEM2VRAM_CC_H32_DISPLAY: i32 = 1;
const DMA_MEM2VRAM_CC_H32_VBLANK: i32 = 1;
const DMA_MEM2VRAM_CC_H40_DISPLAY: i32 = 1;
const DMA_MEM2VRAM_CC_H40_VBLANK: i32 = 1;

// Fill/copy DMA progress per scanline.
const DMA_FILL_BPL_H32_DISPLAY: i32 = 15;
const DMA_FILL_BPL_H32_VBLANK: i32 = 166;
const DMA_FILL_BPL_H40_DISPLAY: i32 = 17;
const DMA_FILL_BPL_H40_VBLANK: i32 = 204;
const DMA_COPY_BPL_H32_DISPLAY: i32 = 8;
const DMA_COPY_BPL_H32_VBLANK: i32 = 83;
const DMA_COPY_BPL_H40_DISPLAY: i32 = 9;
const DMA_COPY_BPL_H40_VBLANK: i32 = 102;

const MAX_WIDTH: usize = 640;
const MAX_HEIGHT: usize = 480;

const NSPRITES: usize = 80;

// Sprite pixel tags for the shadow/highlight pass-through colors.
const SHA_COLOR: i16 = -1;
const HIG_COLOR: i16 = -2;

// Shadow/highlight tags carried in frame-buffer color words.
const TAG_NORMAL: u16 = 0x000;
const TAG_SHADOW: u16 = 0x200;
const TAG_HIGHLIGHT: u16 = 0x400;

/// An 8-bit-per-channel color.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// Expand an 11-bit frame-buffer color word (9-bit BGR plus
/// shadow/highlight tag) to RGB.
pub fn color_to_rgb(color: u16) -> Rgb {
    let r = (color & 0x7) as f64;
    let g = ((color >> 3) & 0x7) as f64;
    let b = ((color >> 6) & 0x7) as f64;
    let full = 255.0 / 7.0;
    let half = 127.0 / 7.0;
    match (color >> 9) & 0x3 {
        1 => Rgb {
            r: (r * half + 0.5) as u8,
            g: (g * half + 0.5) as u8,
            b: (b * half + 0.5) as u8,
        },
        2 => Rgb {
            r: (r * half + 0.5) as u8 + 128,
            g: (g * half + 0.5) as u8 + 128,
            b: (b * half + 0.5) as u8 + 128,
        },
        _ => Rgb {
            r: (r * full + 0.5) as u8,
            g: (g * full + 0.5) as u8,
            b: (b * full + 0.5) as u8,
        },
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum HscrollMode {
    Full = 0,
    Cell = 1,
    Line = 2,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum DmaMode {
    Mem2Vram = 0,
    Fill = 1,
    Copy = 2,
}

// Control-port access state: code and address composed over two writes.
struct Access {
    second_pass: bool,
    addr: u16,
    code: u8,
}

struct Regs {
    // Reg 0
    hint_enabled: bool,
    hv_counter_stop: bool,
    // Reg 1
    display_enabled: bool,
    vint_enabled: bool,
    dma_enabled: bool,
    v30_mode_latch: bool,
    v30_mode: bool,
    // Regs 2-5
    scroll_a_nt_addr: u16,
    window_nt_addr: u16,
    scroll_b_nt_addr: u16,
    sprite_table_addr: u16,
    // Reg 7
    bgcolor: u8,
    // Reg 10
    hint_reload: u8,
    // Reg 11
    vscroll_2cell: bool,
    hscroll_mode: HscrollMode,
    // Reg 12
    h40_mode_latch: bool,
    h40_mode: bool,
    interlace_latch: u8,
    interlace: u8, // 0, 1 or 3
    shadow_highlight: bool,
    // Reg 13
    hscroll_table_addr: u16,
    // Reg 15
    auto_increment: u8,
    // Reg 16
    vsz: u8, // plane height in cells: 32/64/128
    hsz: u8, // plane width in cells
    // Reg 17/18
    window_right: bool,
    window_h_cells: u8,
    window_down: bool,
    window_v_cells: u8,
    // Regs 19-23
    dma_length: u16,
    dma_length_counter: u16,
    dma_source: u32,
    dma_source_counter: u32,
    dma_mode: DmaMode,
}

struct Timing {
    // Point fractions: `frac` units per point, `cc2frac` units per
    // main-CPU cycle.
    cc2frac: i64,
    frac: i64,
    points_per_line: i64,
    cycles_per_line: i64,
    cc: i64,
    h: i32,
    v: i32,
    lines: i32,
    lines_before_end_display: i32,
    linepp_before_hint: i32,
    linepp_begin_hblank: i32,
    linepp_end_hblank: i32,
    linepp_end_display: i32,
    cc_to_vint: i64,
    cc_to_hint: i64,
    cc_to_end_frame: i64,
    cc_to_next_line: i64,
    dma_mem2vram_cc_display: i32,
    dma_mem2vram_cc_vblank: i32,
}

struct Dma {
    fill_bpl_display: i32,
    fill_bpl_vblank: i32,
    copy_bpl_display: i32,
    copy_bpl_vblank: i32,
    fill_data: u16,
    fill_started: bool,
    to_vram: bool,
}

struct Status {
    vint: bool,
    hint: bool,
    pal: bool,
    odd_frame: bool,
    dma_busy: bool,
    // The FIFO itself is not modeled: the empty flag raises on every
    // status read and frame end, drops on data writes.
    fifo_empty: bool,
    too_many_sprites: bool,
    sprite_collision: bool,
    hvc: u16,
    vblank: bool,
}

struct CSize {
    width: i32,
    ntiles: i32,
    height: i32,
    res_w: i32,
    res_h: i32,
}

// Per-layer scanline work buffers: resolved colors, low-priority flags
// and index stacks of opaque pixels per priority.
struct ScrollLine {
    // Horizontal-scroll table byte offset and VSRAM entry offset for
    // this plane (A: 0/0, B: 2/1).
    off: u16,
    off_2: usize,
    nt_addr: u16,
    line: [u8; MAX_WIDTH],
    is_low_prio: [bool; MAX_WIDTH],
    prio0: [u16; MAX_WIDTH],
    prio1: [u16; MAX_WIDTH],
    n0: usize,
    n1: usize,
}

#[derive(Clone, Copy)]
struct Sprite {
    vflip: bool,
    hflip: bool,
    prio: bool,
    width: u8,  // cells
    height: u8, // cells
    pal: u8,    // pre-shifted palette bits
    y: u16,
    x: u16,
    pat: u16,
}

struct SpriteCache {
    v: [Sprite; NSPRITES],
    n: usize,
}

#[derive(Clone, Copy, Default)]
struct SpriteEval {
    row: i32,
    ind: usize,
    width: i32,
    is_low_prio: bool,
}

struct SpriteBuffer {
    v: [SpriteEval; NSPRITES],
    n: usize,
}

#[derive(Clone, Copy)]
struct SpritePixel {
    color: i16, // palette index, SHA_COLOR or HIG_COLOR
    kind: i8,   // -1 none, 0 low priority, 1 high priority
    coll_counter: u8,
}

struct Render {
    fb: Vec<u16>,
    fb_pos: usize,
    bgcolor: u8,
    width: i32, // frame-buffer line stride in pixels
    tmp: [u8; MAX_WIDTH],
    spr_line: [SpritePixel; MAX_WIDTH],
    s_te: [u16; MAX_WIDTH],
    lines: u16,
    sc: [ScrollLine; 2], // 0 = A, 1 = B
    htable: u16,
    hsz: u8,
    vsz: u8,
    hscroll_mode: HscrollMode,
    vscroll_2cell: bool,
    win_nt_addr: u16,
    window_right: bool,
    window_down: bool,
    window_h_cells: u8,
    window_v_cells: u8,
    dot_overflow: bool,
    shadow_highlight: bool,
}

pub struct Vdp {
    access: Access,
    vram: Box<[u8]>,
    cram: [u16; 64],
    vsram: [u16; 40],
    regs: Regs,
    csize: CSize,
    timing: Timing,
    dma: Dma,
    status: Status,
    hint_counter: i32,
    render: Render,
    sprites: SpriteCache,
    sprite_buf: SpriteBuffer,

    // Output lines toward the CPUs, synced by the machine after every
    // step. `z80_int_armed` tracks whether the Z80 line waits for the
    // next line boundary to drop.
    line4: bool,
    line6: bool,
    z80_int_line: bool,
    z80_int_armed: bool,

    // Frame boundaries seen since the machine last asked (controller
    // read phases reset there).
    io_frame_events: u32,

    // Source-address lag applied to memory-to-VRAM DMA on cartridges
    // with a bus-latency device in front of ROM (the SVP). Not part of
    // the machine state: it is a property of the inserted cartridge.
    dma_lag: u32,
}

impl Vdp {
    pub fn new(pal: bool, host: &mut dyn Host) -> Self {
        let mut vdp = Self {
            access: Access { second_pass: false, addr: 0, code: 0 },
            vram: vec![0u8; 0x10000].into_boxed_slice(),
            cram: [0; 64],
            vsram: [0; 40],
            regs: Regs {
                hint_enabled: false,
                hv_counter_stop: false,
                display_enabled: false,
                vint_enabled: false,
                dma_enabled: false,
                v30_mode_latch: false,
                v30_mode: false,
                scroll_a_nt_addr: 0,
                window_nt_addr: 0,
                scroll_b_nt_addr: 0,
                sprite_table_addr: 0,
                bgcolor: 0,
                hint_reload: 0,
                vscroll_2cell: false,
                hscroll_mode: HscrollMode::Full,
                h40_mode_latch: false,
                h40_mode: false,
                interlace_latch: 0,
                interlace: 0,
                shadow_highlight: false,
                hscroll_table_addr: 0,
                auto_increment: 0,
                vsz: 32,
                hsz: 32,
                window_right: false,
                window_h_cells: 0,
                window_down: false,
                window_v_cells: 0,
                dma_length: 0,
                dma_length_counter: 0,
                dma_source: 0,
                dma_source_counter: 0,
                dma_mode: DmaMode::Mem2Vram,
            },
            csize: CSize { width: 256, ntiles: 32, height: 224, res_w: 0, res_h: 0 },
            timing: Timing {
                cc2frac: 0,
                frac: if pal { PAL_FRAC } else { NTSC_FRAC },
                points_per_line: POINTS_PER_LINE_H32,
                cycles_per_line: 0,
                cc: 0,
                h: 0,
                v: 0,
                lines: if pal { PAL_LINES } else { NTSC_LINES },
                lines_before_end_display: 224,
                linepp_before_hint: LINEPP_END_DISPLAY_H32,
                linepp_begin_hblank: LINEPP_BEGIN_HBLANK_H32,
                linepp_end_hblank: LINEPP_END_HBLANK_H32,
                linepp_end_display: LINEPP_END_DISPLAY_H32,
                cc_to_vint: 0,
                cc_to_hint: 0,
                cc_to_end_frame: 0,
                cc_to_next_line: 0,
                dma_mem2vram_cc_display: DMA_MEM2VRAM_CC_H32_DISPLAY,
                dma_mem2vram_cc_vblank: DMA_MEM2VRAM_CC_H32_VBLANK,
            },
            dma: Dma {
                fill_bpl_display: DMA_FILL_BPL_H32_DISPLAY,
                fill_bpl_vblank: DMA_FILL_BPL_H32_VBLANK,
                copy_bpl_display: DMA_COPY_BPL_H32_DISPLAY,
                copy_bpl_vblank: DMA_COPY_BPL_H32_VBLANK,
                fill_data: 0,
                fill_started: false,
                to_vram: true,
            },
            status: Status {
                vint: false,
                hint: false,
                pal,
                odd_frame: false,
                dma_busy: false,
                fifo_empty: true,
                too_many_sprites: false,
                sprite_collision: false,
                hvc: 0,
                vblank: true,
            },
            hint_counter: 0,
            render: Render {
                fb: vec![0; MAX_WIDTH * MAX_HEIGHT],
                fb_pos: 0,
                bgcolor: 0,
                width: 256,
                tmp: [0; MAX_WIDTH],
                spr_line: [SpritePixel { color: 0, kind: -1, coll_counter: 0 }; MAX_WIDTH],
                s_te: [TAG_NORMAL; MAX_WIDTH],
                lines: 0,
                sc: [
                    ScrollLine {
                        off: 0,
                        off_2: 0,
                        nt_addr: 0,
                        line: [0; MAX_WIDTH],
                        is_low_prio: [true; MAX_WIDTH],
                        prio0: [0; MAX_WIDTH],
                        prio1: [0; MAX_WIDTH],
                        n0: 0,
                        n1: 0,
                    },
                    ScrollLine {
                        off: 2,
                        off_2: 1,
                        nt_addr: 0,
                        line: [0; MAX_WIDTH],
                        is_low_prio: [true; MAX_WIDTH],
                        prio0: [0; MAX_WIDTH],
                        prio1: [0; MAX_WIDTH],
                        n0: 0,
                        n1: 0,
                    },
                ],
                htable: 0,
                hsz: 32,
                vsz: 32,
                hscroll_mode: HscrollMode::Full,
                vscroll_2cell: false,
                win_nt_addr: 0,
                window_right: false,
                window_down: false,
                window_h_cells: 0,
                window_v_cells: 0,
                dot_overflow: false,
                shadow_highlight: false,
            },
            sprites: SpriteCache {
                v: [Sprite {
                    vflip: false,
                    hflip: false,
                    prio: false,
                    width: 1,
                    height: 1,
                    pal: 0,
                    y: 0,
                    x: 0,
                    pat: 0,
                }; NSPRITES],
                n: 0,
            },
            sprite_buf: SpriteBuffer { v: [SpriteEval::default(); NSPRITES], n: 0 },
            line4: false,
            line6: false,
            z80_int_line: false,
            z80_int_armed: false,
            io_frame_events: 0,
            dma_lag: 0,
        };
        vdp.power_on(host);
        vdp
    }

    pub fn power_on(&mut self, host: &mut dyn Host) {
        self.csize.width = 256;
        self.csize.ntiles = 32;
        self.csize.height = 224;
        self.res_changed(256, 224, host);

        self.vram.fill(0);
        self.cram = [0; 64];
        self.vsram = [0; 40];

        self.access.second_pass = false;
        self.access.addr = 0;
        self.access.code = 0;

        let r = &mut self.regs;
        r.hint_enabled = false;
        r.hv_counter_stop = false;
        r.display_enabled = false;
        r.vint_enabled = false;
        r.dma_enabled = false;
        r.v30_mode_latch = false;
        r.v30_mode = false;
        r.scroll_a_nt_addr = 0;
        r.window_nt_addr = 0;
        r.scroll_b_nt_addr = 0;
        r.sprite_table_addr = 0;
        r.bgcolor = 0;
        r.hint_reload = 0;
        r.vscroll_2cell = false;
        r.hscroll_mode = HscrollMode::Full;
        r.h40_mode_latch = false;
        r.h40_mode = false;
        r.interlace_latch = 0;
        r.interlace = 0;
        r.shadow_highlight = false;
        r.hscroll_table_addr = 0;
        r.auto_increment = 0;
        r.vsz = 32;
        r.hsz = 32;
        r.window_right = false;
        r.window_h_cells = 0;
        r.window_down = false;
        r.window_v_cells = 0;
        r.dma_length = 0;
        r.dma_length_counter = 0;
        r.dma_source = 0;
        r.dma_source_counter = 0;
        r.dma_mode = DmaMode::Mem2Vram;

        self.timing.cc = 0;
        self.timing.h = 0;
        self.timing.v = 0;
        self.timing.lines_before_end_display = self.csize.height;
        self.timing.linepp_before_hint = LINEPP_END_DISPLAY_H32;
        self.timing.linepp_end_hblank = LINEPP_END_HBLANK_H32;
        self.timing.linepp_begin_hblank = LINEPP_BEGIN_HBLANK_H32;
        self.timing.linepp_end_display = LINEPP_END_DISPLAY_H32;
        self.timing.dma_mem2vram_cc_display = DMA_MEM2VRAM_CC_H32_DISPLAY;
        self.timing.dma_mem2vram_cc_vblank = DMA_MEM2VRAM_CC_H32_VBLANK;
        self.recalc_points_per_line();

        self.dma.fill_bpl_display = DMA_FILL_BPL_H32_DISPLAY;
        self.dma.fill_bpl_vblank = DMA_FILL_BPL_H32_VBLANK;
        self.dma.copy_bpl_display = DMA_COPY_BPL_H32_DISPLAY;
        self.dma.copy_bpl_vblank = DMA_COPY_BPL_H32_VBLANK;
        self.dma.fill_data = 0;
        self.dma.fill_started = false;
        self.dma.to_vram = true;

        self.status.vint = false;
        self.status.hint = false;
        self.status.odd_frame = false;
        self.status.dma_busy = false;
        self.status.fifo_empty = true;
        self.status.too_many_sprites = false;
        self.status.sprite_collision = false;
        self.status.hvc = 0;
        self.status.vblank = true;

        self.hint_counter = 0;

        self.render.fb.fill(0);
        self.render.fb_pos = 0;
        self.render.width = self.csize.width;
        self.render.bgcolor = 0;
        self.render.sc[0].nt_addr = 0;
        self.render.sc[1].nt_addr = 0;
        self.render.lines = 0;
        self.render.hsz = self.regs.hsz;
        self.render.vsz = self.regs.vsz;
        self.render.hscroll_mode = self.regs.hscroll_mode;
        self.render.vscroll_2cell = self.regs.vscroll_2cell;
        self.render.htable = 0;
        self.render.win_nt_addr = 0;
        self.render.window_right = false;
        self.render.window_down = false;
        self.render.window_h_cells = 0;
        self.render.window_v_cells = 0;
        self.render.dot_overflow = false;
        self.render.shadow_highlight = false;
        for px in &mut self.render.spr_line {
            *px = SpritePixel { color: 0, kind: -1, coll_counter: 0 };
        }
        self.render.s_te = [TAG_NORMAL; MAX_WIDTH];
        self.render.tmp = [0; MAX_WIDTH];

        self.sprites.n = 0;
        self.sprite_buf.n = 0;

        self.line4 = false;
        self.line6 = false;
        self.z80_int_line = false;
        self.z80_int_armed = false;
        self.io_frame_events = 0;
    }

    /// Source-address lag (in bytes) for memory-to-VRAM DMA. Zero on
    /// plain cartridges; bus-latency hardware in front of ROM (the SVP)
    /// needs 2.
    pub fn set_dma_lag(&mut self, lag: u32) {
        self.dma_lag = lag;
    }

    // ---------------------------------------------------------------
    // Machine-facing lines and events
    // ---------------------------------------------------------------

    /// State of the autovector interrupt line for `level` (4 or 6).
    pub fn autovector_line(&self, level: u8) -> bool {
        match level {
            4 => self.line4,
            6 => self.line6,
            _ => false,
        }
    }

    /// State of the Z80 interrupt line.
    pub fn z80_irq_line(&self) -> bool {
        self.z80_int_line
    }

    /// CPU acknowledge of an autovectored interrupt.
    pub fn acknowledge_interrupt(&mut self, level: u8, host: &mut dyn Host) {
        self.catch_up(host);
        match level {
            4 => {
                self.status.hint = false;
                self.line4 = false;
            }
            6 => {
                self.status.vint = false;
                self.line6 = false;
            }
            _ => {}
        }
    }

    /// Number of frame boundaries crossed since the last call.
    pub fn take_io_frame_events(&mut self) -> u32 {
        std::mem::take(&mut self.io_frame_events)
    }

    /// Current resolution as (width, height).
    pub fn resolution(&self) -> (u32, u32) {
        (self.csize.res_w as u32, self.csize.res_h as u32)
    }

    pub fn vram(&self) -> &[u8] {
        &self.vram
    }

    pub fn cram(&self) -> &[u16; 64] {
        &self.cram
    }

    // ---------------------------------------------------------------
    // Clock
    // ---------------------------------------------------------------

    /// Advance by `cc` main-CPU cycles. Returns true while a
    /// memory-to-VRAM DMA is holding the main CPU off the bus.
    pub fn advance(&mut self, cc: u32, host: &mut dyn Host) -> bool {
        self.timing.cc += i64::from(cc) * self.timing.cc2frac;
        // The VInt deadline is honored even with interrupts disabled:
        // it also paces frame rendering.
        if self.timing.cc >= self.timing.cc_to_vint
            || self.timing.cc >= self.timing.cc_to_end_frame
            || (self.regs.hint_enabled && self.timing.cc >= self.timing.cc_to_hint)
            || ((self.status.dma_busy || self.z80_int_armed)
                && self.timing.cc >= self.timing.cc_to_next_line)
        {
            self.catch_up(host);
        }
        self.status.dma_busy && self.regs.dma_mode == DmaMode::Mem2Vram
    }

    fn catch_up(&mut self, host: &mut dyn Host) {
        let npoints = self.timing.cc / self.timing.frac;
        let cc_used = npoints * self.timing.frac;
        self.timing.cc %= self.timing.frac;

        self.timing.cc_to_vint -= cc_used;
        self.timing.cc_to_hint -= cc_used;
        self.timing.cc_to_next_line -= cc_used;
        self.timing.cc_to_end_frame -= cc_used;

        let mut new_v = self.timing.v + (npoints / self.timing.points_per_line) as i32;
        let mut new_h = self.timing.h + (npoints % self.timing.points_per_line) as i32;
        if new_h >= self.timing.points_per_line as i32 {
            new_v += 1;
            new_h -= self.timing.points_per_line as i32;
        }
        while new_v >= self.timing.lines {
            let (v, h, lines) = (self.timing.v, self.timing.h, self.timing.lines);
            self.run(v, h, lines, 0, host);
            new_v -= self.timing.lines;
            self.timing.v = 0;
            self.timing.h = 0;
        }
        let (v, h) = (self.timing.v, self.timing.h);
        self.run(v, h, new_v, new_h, host);
        self.timing.v = new_v;
        self.timing.h = new_h;
        self.status.vblank = (new_v == self.timing.lines_before_end_display
            && new_h >= self.timing.linepp_before_hint)
            || (new_v > self.timing.lines_before_end_display && new_v < self.timing.lines - 1)
            || (new_v == self.timing.lines - 1 && new_h < self.timing.linepp_before_hint);

        if self.timing.cc_to_next_line <= 0 {
            if self.z80_int_armed {
                self.z80_int_line = false;
                self.z80_int_armed = false;
            }
            self.timing.cc_to_next_line =
                (self.timing.points_per_line - i64::from(new_h)) * self.timing.frac;
        }
        if self.timing.cc_to_vint <= 0 {
            self.z80_int_line = true;
            self.z80_int_armed = true;
            self.status.vint = true;
            if self.regs.vint_enabled {
                self.line6 = true;
            }
            self.recalc_cc_to_vint(new_v, new_h);
        }
        if self.timing.cc_to_hint <= 0 {
            if self.hint_counter < 0 {
                self.hint_counter = i32::from(self.regs.hint_reload);
                self.status.hint = true;
                if self.regs.hint_enabled {
                    self.line4 = true;
                }
            }
            self.recalc_cc_to_hint(new_v, new_h);
        }
        if self.timing.cc_to_end_frame <= 0 {
            self.recalc_cc_to_end_frame(new_v, new_h);
        }
    }

    fn recalc_cc_to_end_frame(&mut self, v: i32, h: i32) {
        self.timing.cc_to_end_frame = i64::from(self.timing.lines - v)
            * self.timing.cycles_per_line
            - i64::from(h) * self.timing.frac;
    }

    fn recalc_cc_to_vint(&mut self, v: i32, h: i32) {
        // VInt pends at HCounter=2 (H point 4) of the line after the
        // display ends.
        let end = self.timing.lines_before_end_display;
        self.timing.cc_to_vint = if v <= end || (v == end + 1 && h < 4) {
            i64::from(end + 1 - v) * self.timing.cycles_per_line
        } else {
            i64::from(end + 1 + self.timing.lines - v) * self.timing.cycles_per_line
        };
        self.timing.cc_to_vint += i64::from(4 - h) * self.timing.frac;
    }

    fn recalc_cc_to_hint(&mut self, v: i32, h: i32) {
        let hint_pp = self.timing.linepp_before_hint;
        if v <= self.timing.lines_before_end_display {
            if h < hint_pp {
                self.timing.cc_to_hint = i64::from(hint_pp - h) * self.timing.frac;
            } else if v == self.timing.lines_before_end_display {
                self.timing.cc_to_hint = i64::from(self.timing.lines - v)
                    * self.timing.cycles_per_line
                    + i64::from(hint_pp - h) * self.timing.frac;
            } else {
                self.timing.cc_to_hint = (self.timing.points_per_line - i64::from(h)
                    + i64::from(hint_pp))
                    * self.timing.frac;
            }
        } else {
            self.timing.cc_to_hint = i64::from(self.timing.lines - v)
                * self.timing.cycles_per_line
                + i64::from(hint_pp - h) * self.timing.frac;
        }
    }

    fn recalc_points_per_line(&mut self) {
        self.timing.points_per_line = if self.regs.h40_mode {
            POINTS_PER_LINE_H40
        } else {
            POINTS_PER_LINE_H32
        };
        self.timing.cc2frac = self.timing.points_per_line
            * i64::from(self.timing.lines)
            * if self.status.pal { PAL_CC2PP } else { NTSC_CC2PP };
        self.timing.cycles_per_line = self.timing.points_per_line * self.timing.frac;
        self.timing.cc_to_next_line =
            (self.timing.points_per_line - i64::from(self.timing.h)) * self.timing.frac;
        let (v, h) = (self.timing.v, self.timing.h);
        self.recalc_cc_to_vint(v, h);
        self.recalc_cc_to_hint(v, h);
        self.recalc_cc_to_end_frame(v, h);
    }

    fn res_changed(&mut self, width: i32, height: i32, host: &mut dyn Host) {
        self.csize.res_w = width;
        self.csize.res_h = height;
        host.resolution_changed(width as u32, height as u32);
    }

    fn set_h40_mode(&mut self, mode: bool, host: &mut dyn Host) {
        if mode == self.regs.h40_mode {
            return;
        }
        self.regs.h40_mode = mode;
        if mode {
            self.csize.width = 320;
            self.csize.ntiles = 40;
            self.timing.linepp_before_hint = LINEPP_END_DISPLAY_H40;
            self.timing.linepp_begin_hblank = LINEPP_BEGIN_HBLANK_H40;
            self.timing.linepp_end_hblank = LINEPP_END_HBLANK_H40;
            self.timing.linepp_end_display = LINEPP_END_DISPLAY_H40;
            self.timing.dma_mem2vram_cc_display = DMA_MEM2VRAM_CC_H40_DISPLAY;
            self.timing.dma_mem2vram_cc_vblank = DMA_MEM2VRAM_CC_H40_VBLANK;
            self.dma.fill_bpl_display = DMA_FILL_BPL_H40_DISPLAY;
            self.dma.fill_bpl_vblank = DMA_FILL_BPL_H40_VBLANK;
            self.dma.copy_bpl_display = DMA_COPY_BPL_H40_DISPLAY;
            self.dma.copy_bpl_vblank = DMA_COPY_BPL_H40_VBLANK;
        } else {
            self.csize.width = 256;
            self.csize.ntiles = 32;
            self.timing.linepp_before_hint = LINEPP_END_DISPLAY_H32;
            self.timing.linepp_begin_hblank = LINEPP_BEGIN_HBLANK_H32;
            self.timing.linepp_end_hblank = LINEPP_END_HBLANK_H32;
            self.timing.linepp_end_display = LINEPP_END_DISPLAY_H32;
            self.timing.dma_mem2vram_cc_display = DMA_MEM2VRAM_CC_H32_DISPLAY;
            self.timing.dma_mem2vram_cc_vblank = DMA_MEM2VRAM_CC_H32_VBLANK;
            self.dma.fill_bpl_display = DMA_FILL_BPL_H32_DISPLAY;
            self.dma.fill_bpl_vblank = DMA_FILL_BPL_H32_VBLANK;
            self.dma.copy_bpl_display = DMA_COPY_BPL_H32_DISPLAY;
            self.dma.copy_bpl_vblank = DMA_COPY_BPL_H32_VBLANK;
        }
        self.recalc_points_per_line();
        let scale = if self.regs.interlace == 3 { 2 } else { 1 };
        let (w, h) = (self.csize.width * scale, self.csize.height * scale);
        self.res_changed(w, h, host);
    }

    fn set_v30_mode(&mut self, mode: bool, host: &mut dyn Host) {
        if mode == self.regs.v30_mode {
            return;
        }
        self.regs.v30_mode = mode;
        self.csize.height = if mode { 240 } else { 224 };
        self.timing.lines_before_end_display = self.csize.height;
        let (v, h) = (self.timing.v, self.timing.h);
        self.recalc_cc_to_vint(v, h);
        self.recalc_cc_to_hint(v, h);
        self.recalc_cc_to_end_frame(v, h);
        let scale = if self.regs.interlace == 3 { 2 } else { 1 };
        let (w, hh) = (self.csize.width * scale, self.csize.height * scale);
        self.res_changed(w, hh, host);
    }

    // ---------------------------------------------------------------
    // HV counter
    // ---------------------------------------------------------------

    fn update_hvc(&mut self) {
        // H byte: two ramps with a mode-specific gap.
        let h = self.timing.h;
        let h_byte = if self.regs.h40_mode {
            if h < 0xB7 * 2 { (h >> 1) as u8 } else { ((h >> 1) + (0xE4 - 0xB7)) as u8 }
        } else if h < 0x94 * 2 {
            (h >> 1) as u8
        } else {
            ((h >> 1) + (0xE9 - 0x94)) as u8
        };

        // Line numbering starts at the HInt point, so before it the
        // previous line number is still reported.
        let mut v = self.timing.v;
        if self.timing.h < self.timing.linepp_before_hint {
            v -= 1;
            if v == -1 {
                v = self.timing.lines - 1;
            }
        }
        let odd = self.status.odd_frame;
        let v_byte: u8 = if self.status.pal {
            if self.regs.v30_mode {
                match self.regs.interlace {
                    0 => {
                        if v < 0x100 {
                            v as u8
                        } else if v < 0x10B {
                            (v - 0x100) as u8
                        } else {
                            ((v - 0x100) + (0xD2 - 0x0B)) as u8
                        }
                    }
                    1 => {
                        if v < 0x100 {
                            v as u8
                        } else if v < 0x10B {
                            ((v - 0x100) | 0x01) as u8
                        } else if odd {
                            if v == 0x10B {
                                0xD1
                            } else {
                                (((v - 0x100) + (0xD2 - 0x0C)) | 0x01) as u8
                            }
                        } else {
                            (((v - 0x100) + (0xD2 - 0x0B)) | 0x01) as u8
                        }
                    }
                    3 => {
                        if v < 0x80 {
                            (v << 1) as u8
                        } else if v < 0x100 {
                            (((v - 0x80) << 1) | 0x01) as u8
                        } else if v < 0x10A {
                            ((v - 0x100) << 1) as u8
                        } else if odd {
                            if v == 0x10A {
                                0xA3
                            } else {
                                ((((v - 0x100) + (0x52 - 0x0B)) << 1) | 0x01) as u8
                            }
                        } else {
                            ((((v - 0x100) + (0x52 - 0x0A)) << 1) | 0x01) as u8
                        }
                    }
                    _ => 0,
                }
            } else {
                match self.regs.interlace {
                    0 => {
                        if v < 0x100 {
                            v as u8
                        } else if v < 0x103 {
                            (v - 0x100) as u8
                        } else {
                            ((v - 0x100) + (0xCA - 0x03)) as u8
                        }
                    }
                    1 => {
                        if v < 0x100 {
                            (v & 0xFE) as u8
                        } else if v < 0x103 {
                            ((v - 0x100) | 0x01) as u8
                        } else if odd {
                            if v == 0x103 {
                                0xC9
                            } else {
                                (((v - 0x100) + (0xCA - 0x04)) | 0x01) as u8
                            }
                        } else {
                            (((v - 0x100) + (0xCA - 0x03)) | 0x01) as u8
                        }
                    }
                    3 => {
                        if v < 0x80 {
                            (v << 1) as u8
                        } else if v < 0x100 {
                            (((v - 0x80) << 1) | 0x01) as u8
                        } else if v < 0x102 {
                            ((v - 0x100) << 1) as u8
                        } else if odd {
                            if v == 0x102 {
                                0x93
                            } else {
                                ((((v - 0x100) + (0x4A - 0x03)) << 1) | 0x01) as u8
                            }
                        } else {
                            ((((v - 0x100) + (0x4A - 0x02)) << 1) | 0x01) as u8
                        }
                    }
                    _ => 0,
                }
            }
        } else if self.regs.v30_mode {
            // V30 on NTSC never leaves VBlank cleanly; the counter just
            // wraps through the whole byte range.
            match self.regs.interlace {
                0 => {
                    if v < 0x100 {
                        v as u8
                    } else {
                        (v - 0x100) as u8
                    }
                }
                1 => {
                    if v < 0x100 {
                        (v & 0xFE) as u8
                    } else {
                        ((v - 0x100) | 0x01) as u8
                    }
                }
                3 => {
                    if v < 0x80 {
                        (v << 1) as u8
                    } else if v < 0x100 {
                        (((v - 0x80) << 1) | 0x01) as u8
                    } else if v < 0x180 {
                        ((v - 0x100) << 1) as u8
                    } else {
                        (((v - 0x180) << 1) | 0x01) as u8
                    }
                }
                _ => 0,
            }
        } else {
            match self.regs.interlace {
                0 => {
                    if v < 0xEB {
                        v as u8
                    } else {
                        ((v - 0xEB) + 0xE5) as u8
                    }
                }
                1 => {
                    if v < 0xEA {
                        (v & 0xFE) as u8
                    } else if v == 0xEA {
                        0xEA
                    } else {
                        (((v - 0xEB) + 0xE5) | 0x01) as u8
                    }
                }
                3 => {
                    if v < 0x80 {
                        (v << 1) as u8
                    } else if v < 0xEB {
                        (((v - 0x80) << 1) | 0x01) as u8
                    } else if odd {
                        if v == 0xEB {
                            0xE4
                        } else {
                            ((((v - 0xEC) + 0x65) << 1) | 0x01) as u8
                        }
                    } else {
                        ((((v - 0xEB) + 0x65) << 1) | 0x01) as u8
                    }
                }
                _ => 0,
            }
        };

        self.status.hvc = (u16::from(v_byte) << 8) | u16::from(h_byte);
    }

    /// HV counter read.
    pub fn hv(&mut self, host: &mut dyn Host) -> u16 {
        self.catch_up(host);
        if !self.regs.hv_counter_stop {
            self.update_hvc();
        }
        self.status.hvc
    }

    // ---------------------------------------------------------------
    // Ports
    // ---------------------------------------------------------------

    /// Status word read.
    pub fn status(&mut self, host: &mut dyn Host) -> u16 {
        self.catch_up(host);
        self.access.second_pass = false;

        let mut ret = 0u16;
        if self.status.fifo_empty {
            ret |= 0x0200;
        }
        self.status.fifo_empty = true;
        if self.status.vint {
            ret |= 0x0080;
        }
        if self.status.too_many_sprites {
            self.status.too_many_sprites = false;
            ret |= 0x0040;
        }
        if self.status.sprite_collision {
            ret |= 0x0020;
        }
        if self.status.odd_frame {
            ret |= 0x0010;
        }
        if self.status.vblank {
            ret |= 0x0008;
        }
        if self.timing.h < self.timing.linepp_end_hblank
            || self.timing.h >= self.timing.linepp_begin_hblank
        {
            ret |= 0x0004;
        }
        if self.status.dma_busy {
            ret |= 0x0002;
        }
        if self.status.pal {
            ret |= 0x0001;
        }
        ret
    }

    /// Control port write.
    pub fn control_write(&mut self, data: u16, host: &mut dyn Host) {
        if self.status.dma_busy {
            return;
        }
        self.catch_up(host);

        if self.access.second_pass {
            self.access.code = (self.access.code & 0x03) | (((data & 0xF0) >> 2) as u8);
            self.access.addr = (self.access.addr & 0x3FFF) | (data << 14);
            self.access.second_pass = false;
            let dma_code = self.access.code & 0x30;
            if dma_code != 0 && self.regs.dma_enabled {
                match self.regs.dma_mode {
                    DmaMode::Mem2Vram => {
                        if dma_code != 0x20 {
                            host.warning("vdp: bad CD5/CD4 for memory-to-VRAM DMA");
                            return;
                        }
                        // The busy bit replaces CD5 until the DMA ends.
                        self.access.code &= 0x0F;
                        self.status.dma_busy = true;
                        self.dma.to_vram = self.access.code == 0x01;
                        self.regs.dma_length_counter = self.regs.dma_length;
                        self.regs.dma_source_counter = self.regs.dma_source;
                    }
                    DmaMode::Copy => {
                        if dma_code != 0x30 {
                            host.warning("vdp: bad CD5/CD4 for DMA copy");
                            return;
                        }
                        if self.access.code & 0x0F != 0x01 {
                            host.warning("vdp: DMA copy targets VRAM only");
                            return;
                        }
                        self.access.code &= 0x0F;
                        self.status.dma_busy = true;
                        self.regs.dma_length_counter = self.regs.dma_length;
                        self.regs.dma_source_counter = self.regs.dma_source;
                    }
                    DmaMode::Fill => {
                        if dma_code != 0x20 {
                            host.warning("vdp: bad CD5/CD4 for DMA fill");
                            return;
                        }
                        // Fill arms on the next data-port write.
                        self.regs.dma_length_counter = self.regs.dma_length;
                    }
                }
            }
            return;
        }

        // Register write: 100r rrrr dddd dddd.
        if data & 0xE000 == 0x8000 {
            self.set_register(((data >> 8) & 0x1F) as u8, data as u8, host);
            return;
        }

        // First command word.
        self.access.code = (self.access.code & 0xFC) | ((data >> 14) as u8);
        self.access.addr = (self.access.addr & 0xC000) | (data & 0x3FFF);
        self.access.second_pass = true;
    }

    fn set_register(&mut self, reg: u8, data: u8, host: &mut dyn Host) {
        match reg {
            0 => {
                self.regs.hint_enabled = data & 0x10 != 0;
                if self.regs.hint_enabled && self.status.hint {
                    self.line4 = true;
                } else {
                    self.line4 = false;
                }
                self.regs.hv_counter_stop = data & 0x02 != 0;
                if self.regs.hv_counter_stop {
                    self.update_hvc();
                }
            }
            1 => {
                self.regs.display_enabled = data & 0x40 != 0;
                self.regs.vint_enabled = data & 0x20 != 0;
                if self.regs.vint_enabled && self.status.vint {
                    self.line6 = true;
                } else {
                    self.line6 = false;
                }
                self.regs.dma_enabled = data & 0x10 != 0;
                if data & 0x08 != 0 {
                    if !self.status.pal {
                        host.warning("vdp: V30 mode is only available on PAL systems");
                    } else {
                        self.regs.v30_mode_latch = true;
                    }
                } else {
                    self.regs.v30_mode_latch = false;
                }
            }
            2 => self.regs.scroll_a_nt_addr = u16::from(data & 0x38) << 10,
            3 => self.regs.window_nt_addr = u16::from(data & 0x3E) << 10,
            4 => self.regs.scroll_b_nt_addr = u16::from(data & 0x07) << 13,
            5 => {
                self.regs.sprite_table_addr = u16::from(data) << 9;
                self.update_sprites();
            }
            7 => self.regs.bgcolor = data & 0x3F,
            10 => {
                self.regs.hint_reload = data;
                if self.status.vblank {
                    self.hint_counter = i32::from(data);
                }
            }
            11 => {
                if data & 0x80 != 0 {
                    host.warning("vdp: external interrupts are not implemented");
                }
                self.regs.vscroll_2cell = data & 0x04 != 0;
                match data & 0x03 {
                    0 => self.regs.hscroll_mode = HscrollMode::Full,
                    2 => self.regs.hscroll_mode = HscrollMode::Cell,
                    3 => self.regs.hscroll_mode = HscrollMode::Line,
                    _ => host.warning("vdp: invalid H scroll mode"),
                }
            }
            12 => {
                match data & 0x81 {
                    0x00 => self.regs.h40_mode_latch = false,
                    0x81 => self.regs.h40_mode_latch = true,
                    _ => host.warning("vdp: RS0 and RS1 must agree in register 12"),
                }
                self.regs.shadow_highlight = data & 0x08 != 0;
                let lsm = (data & 0x06) >> 1;
                self.regs.interlace_latch = if lsm == 2 { 0 } else { lsm };
            }
            13 => self.regs.hscroll_table_addr = u16::from(data & 0x3F) << 10,
            15 => self.regs.auto_increment = data,
            16 => {
                match (data & 0x30) >> 4 {
                    0 => self.regs.vsz = 32,
                    1 => self.regs.vsz = 64,
                    3 => self.regs.vsz = 128,
                    _ => host.warning("vdp: forbidden VSZ"),
                }
                match data & 0x03 {
                    0 => self.regs.hsz = 32,
                    1 => self.regs.hsz = 64,
                    3 => self.regs.hsz = 128,
                    _ => host.warning("vdp: forbidden HSZ"),
                }
            }
            17 => {
                self.regs.window_right = data & 0x80 != 0;
                self.regs.window_h_cells = data & 0x1F;
            }
            18 => {
                self.regs.window_down = data & 0x80 != 0;
                self.regs.window_v_cells = data & 0x1F;
            }
            19 => self.regs.dma_length = (self.regs.dma_length & 0xFF00) | u16::from(data),
            20 => {
                self.regs.dma_length = (self.regs.dma_length & 0x00FF) | (u16::from(data) << 8)
            }
            21 => {
                self.regs.dma_source =
                    (self.regs.dma_source & 0x00FF_FE00) | (u32::from(data) << 1)
            }
            22 => {
                self.regs.dma_source =
                    (self.regs.dma_source & 0x00FE_01FF) | (u32::from(data) << 9)
            }
            23 => {
                self.regs.dma_source &= 0x0001_FFFF;
                if data & 0x80 != 0 {
                    self.regs.dma_mode =
                        if data & 0x40 != 0 { DmaMode::Copy } else { DmaMode::Fill };
                    self.regs.dma_source |= u32::from(data & 0x3F) << 17;
                } else {
                    self.regs.dma_mode = DmaMode::Mem2Vram;
                    self.regs.dma_source |= u32::from(data) << 17;
                }
            }
            _ => {}
        }
    }

    /// Data port word read.
    pub fn data_read(&mut self, host: &mut dyn Host) -> u16 {
        if self.status.dma_busy {
            return 0;
        }
        self.catch_up(host);
        self.access.second_pass = false;

        let ret = match self.access.code & 0x0F {
            0x00 => {
                // VRAM read
                let addr = usize::from(self.access.addr & 0xFFFE);
                (u16::from(self.vram[addr]) << 8) | u16::from(self.vram[addr | 1])
            }
            0x04 => self.vsram[usize::from((self.access.addr & 0x4F) >> 1)],
            0x08 => {
                let c = self.cram[usize::from((self.access.addr & 0x7F) >> 1)];
                ((c << 3) & 0x0E00) | ((c << 2) & 0x00E0) | ((c << 1) & 0x000E)
            }
            _ => {
                host.warning(&format!(
                    "vdp: unknown access code on read: {:02X}",
                    self.access.code
                ));
                0
            }
        };
        self.access.addr = self.access.addr.wrapping_add(u16::from(self.regs.auto_increment));
        ret
    }

    // Raw data-port write, shared by CPU writes and DMA.
    fn port_data_write(&mut self, data: u16, host: &mut dyn Host) {
        self.status.fifo_empty = false;
        match self.access.code & 0x0F {
            0x01 => {
                let addr = usize::from(self.access.addr);
                if addr & 1 != 0 {
                    self.vram[addr & 0xFFFE] = data as u8;
                    self.vram[addr] = (data >> 8) as u8;
                } else {
                    self.vram[addr] = (data >> 8) as u8;
                    self.vram[addr | 1] = data as u8;
                }
            }
            0x03 => {
                self.cram[usize::from((self.access.addr & 0x7F) >> 1)] =
                    ((data >> 3) & 0x01C0) | ((data >> 2) & 0x0038) | ((data >> 1) & 0x0007);
            }
            0x05 => {
                self.vsram[usize::from(self.access.addr % 80) >> 1] = data & 0x07FF;
            }
            _ => host.warning(&format!(
                "vdp: unknown access code on write: {:02X}",
                self.access.code
            )),
        }
        self.access.addr = self.access.addr.wrapping_add(u16::from(self.regs.auto_increment));
    }

    /// Data port word write.
    pub fn data_write(&mut self, data: u16, host: &mut dyn Host) {
        if self.status.dma_busy {
            return;
        }
        self.catch_up(host);
        self.access.second_pass = false;

        if self.access.code & 0x30 != 0 && self.regs.dma_enabled && self.regs.dma_mode == DmaMode::Fill
        {
            if self.access.code & 0x30 != 0x20 {
                host.warning("vdp: bad CD5/CD4 for DMA fill");
                return;
            }
            if self.access.code & 0x0F != 0x01 {
                host.warning("vdp: DMA fill targets VRAM only");
                return;
            }
            self.access.code &= 0x0F;
            self.status.dma_busy = true;
            self.dma.fill_data = data;
            self.dma.fill_started = false;
            return;
        }

        self.port_data_write(data, host);
    }

    /// Data port byte write; `is_high` selects the written half.
    pub fn data_write8(&mut self, data: u8, is_high: bool, host: &mut dyn Host) {
        if self.status.dma_busy {
            return;
        }
        self.catch_up(host);
        self.access.second_pass = false;

        if self.access.code & 0x30 != 0 && self.regs.dma_enabled && self.regs.dma_mode == DmaMode::Fill
        {
            if self.access.code & 0x30 != 0x20 {
                host.warning("vdp: bad CD5/CD4 for DMA fill");
                return;
            }
            if self.access.code & 0x0F != 0x01 {
                host.warning("vdp: DMA fill targets VRAM only");
                return;
            }
            self.access.code &= 0x0F;
            self.status.dma_busy = true;
            self.dma.fill_data = (u16::from(data) << 8) | u16::from(data);
            self.dma.fill_started = false;
            return;
        }

        self.status.fifo_empty = false;
        match self.access.code & 0x0F {
            0x01 => {
                let addr = usize::from(self.access.addr);
                if addr & 1 != 0 {
                    self.vram[addr & 0xFFFE] = data;
                } else {
                    self.vram[addr | 1] = data;
                }
            }
            0x03 => {
                let idx = usize::from((self.access.addr & 0x7F) >> 1);
                if is_high {
                    self.cram[idx] = (self.cram[idx] & 0x003F) | (u16::from(data & 0x0E) << 5);
                } else {
                    self.cram[idx] = (self.cram[idx] & 0x01C0)
                        | (u16::from(data >> 2) & 0x38)
                        | (u16::from(data >> 1) & 0x07);
                }
            }
            0x05 => {
                let idx = usize::from((self.access.addr & 0x4F) >> 1);
                if is_high {
                    self.vsram[idx] = (self.vsram[idx] & 0x00FF) | (u16::from(data & 0x07) << 8);
                } else {
                    self.vsram[idx] = (self.vsram[idx] & 0x0700) | u16::from(data);
                }
            }
            _ => host.warning(&format!(
                "vdp: unknown access code on write: {:02X}",
                self.access.code
            )),
        }
        self.access.addr = self.access.addr.wrapping_add(u16::from(self.regs.auto_increment));
    }

    // ---------------------------------------------------------------
    // DMA
    // ---------------------------------------------------------------

    /// Byte address of the next memory-to-VRAM source word, with the
    /// cartridge lag applied below the ROM window.
    pub fn dma_source(&self) -> u32 {
        if self.dma_lag != 0 && self.regs.dma_source_counter <= 0x3F_FFFF {
            self.regs.dma_source_counter.wrapping_sub(self.dma_lag)
        } else {
            self.regs.dma_source_counter
        }
    }

    /// Write one fetched word through the data port and account for it.
    /// Returns the main-CPU cycles the access consumed; the caller must
    /// re-advance every other chip by that amount.
    pub fn dma_step_write(&mut self, data: u16, host: &mut dyn Host) -> u32 {
        self.port_data_write(data, host);
        self.regs.dma_source_counter = self.regs.dma_source_counter.wrapping_add(2);
        if self.regs.dma_source_counter > 0x00FF_FFFF {
            self.regs.dma_source_counter = 0x00FE_0000;
        }
        self.regs.dma_length_counter = self.regs.dma_length_counter.wrapping_sub(1);
        if self.regs.dma_length_counter == 0 {
            self.finish_dma();
        }

        // VRAM targets take two byte accesses per word.
        let scale = if self.dma.to_vram { 2 } else { 1 };
        let cost = if !self.regs.display_enabled || self.status.vblank {
            self.timing.dma_mem2vram_cc_vblank * scale
        } else {
            self.timing.dma_mem2vram_cc_display * scale
        };
        cost as u32
    }

    fn finish_dma(&mut self) {
        self.status.dma_busy = false;
        self.access.code |= 0x20;
    }

    // Returns true when the transfer completed.
    fn dma_fill(&mut self, nbytes: i32) -> bool {
        if nbytes == 0 {
            return false;
        }
        if !self.dma.fill_started {
            // The arming write lands as a whole word first.
            let addr = usize::from(self.access.addr);
            self.vram[addr] = self.dma.fill_data as u8;
            self.vram[addr ^ 1] = (self.dma.fill_data >> 8) as u8;
            self.access.addr =
                self.access.addr.wrapping_add(u16::from(self.regs.auto_increment));
            self.dma.fill_started = true;
        }
        for _ in 0..nbytes {
            self.vram[usize::from(self.access.addr) ^ 1] = (self.dma.fill_data >> 8) as u8;
            self.access.addr =
                self.access.addr.wrapping_add(u16::from(self.regs.auto_increment));
            self.regs.dma_length_counter = self.regs.dma_length_counter.wrapping_sub(1);
            if self.regs.dma_length_counter == 0 {
                return true;
            }
        }
        false
    }

    fn dma_copy(&mut self, nbytes: i32) -> bool {
        for _ in 0..nbytes {
            self.vram[usize::from(self.access.addr)] =
                self.vram[(self.regs.dma_source_counter & 0xFFFF) as usize];
            self.regs.dma_source_counter = self.regs.dma_source_counter.wrapping_add(1);
            self.access.addr =
                self.access.addr.wrapping_add(u16::from(self.regs.auto_increment));
            self.regs.dma_length_counter = self.regs.dma_length_counter.wrapping_sub(1);
            if self.regs.dma_length_counter == 0 {
                return true;
            }
        }
        false
    }

    // Run fill/copy progress across the lines [vb, ve).
    fn run_dma(&mut self, vb: i32, ve: i32) {
        let mut v = vb;
        if v >= ve {
            return;
        }

        let mut done = false;
        if v <= self.timing.lines_before_end_display {
            let limit = ve.min(self.timing.lines_before_end_display);
            let lines = limit - v;
            v = limit;
            done = if self.regs.dma_mode == DmaMode::Fill {
                let bpl = if self.regs.display_enabled {
                    self.dma.fill_bpl_display
                } else {
                    self.dma.fill_bpl_vblank
                };
                self.dma_fill(lines * bpl)
            } else {
                let bpl = if self.regs.display_enabled {
                    self.dma.copy_bpl_display
                } else {
                    self.dma.copy_bpl_vblank
                };
                self.dma_copy(lines * bpl)
            };
        }
        if !done && v < ve {
            let lines = ve - v;
            done = if self.regs.dma_mode == DmaMode::Fill {
                self.dma_fill(lines * self.dma.fill_bpl_vblank)
            } else {
                self.dma_copy(lines * self.dma.copy_bpl_vblank)
            };
        }
        if done {
            self.finish_dma();
        }
    }

    // ---------------------------------------------------------------
    // Frame progression
    // ---------------------------------------------------------------

    fn run(&mut self, vb: i32, hb: i32, ve: i32, he: i32, host: &mut dyn Host) {
        if self.status.dma_busy && self.regs.dma_mode != DmaMode::Mem2Vram {
            self.run_dma(vb, ve);
        }

        if vb < self.timing.lines_before_end_display {
            if ve < self.timing.lines_before_end_display {
                let mut lines = ve - vb;
                let mut lines_h = lines;
                if he >= self.timing.linepp_before_hint {
                    lines_h += 1;
                }
                if hb >= self.timing.linepp_before_hint {
                    lines_h -= 1;
                }
                if he >= self.timing.linepp_end_display {
                    lines += 1;
                }
                if hb >= self.timing.linepp_end_display {
                    lines -= 1;
                }
                self.hint_counter -= lines_h;
                self.render_lines(lines);
            } else if ve < self.timing.lines {
                // Finish the visible field, then enter VBlank.
                let mut lines = self.timing.lines_before_end_display - vb;
                let mut lines_h = lines;
                if hb >= self.timing.linepp_before_hint {
                    lines_h -= 1;
                }
                if hb >= self.timing.linepp_end_display {
                    lines -= 1;
                }
                self.hint_counter -= lines_h;
                self.render_lines(lines);

                self.io_frame_events += 1;
                if self.regs.interlace != 3 || !self.status.odd_frame {
                    let n = (self.csize.res_w * self.csize.res_h) as usize;
                    host.update_screen(&self.render.fb[..n]);
                }
                if self.regs.v30_mode_latch != self.regs.v30_mode {
                    let latch = self.regs.v30_mode_latch;
                    self.set_v30_mode(latch, host);
                }
                if self.regs.h40_mode_latch != self.regs.h40_mode {
                    let latch = self.regs.h40_mode_latch;
                    self.set_h40_mode(latch, host);
                }
                if self.regs.interlace_latch != self.regs.interlace {
                    if (self.regs.interlace_latch == 3) != (self.regs.interlace == 3) {
                        let scale = if self.regs.interlace_latch == 3 { 2 } else { 1 };
                        let (w, h) =
                            (self.csize.width * scale, self.csize.height * scale);
                        self.res_changed(w, h, host);
                    }
                    self.status.odd_frame = false;
                    self.regs.interlace = self.regs.interlace_latch;
                }
                if self.regs.interlace != 0 {
                    self.status.odd_frame = !self.status.odd_frame;
                }
            } else {
                self.run_end_frame();
            }
        } else if vb < self.timing.lines {
            if ve == self.timing.lines {
                self.run_end_frame();
            }
        } else {
            self.run_end_frame();
        }
    }

    fn run_end_frame(&mut self) {
        self.hint_counter = i32::from(self.regs.hint_reload);
        self.status.sprite_collision = false;
        self.status.fifo_empty = true;

        if self.regs.interlace == 3 {
            self.render.width = self.csize.width * 2;
            self.render.fb_pos =
                if self.status.odd_frame { self.render.width as usize } else { 0 };
            self.render.lines = if self.status.odd_frame { 1 } else { 0 };
        } else {
            self.render.width = self.csize.width;
            self.render.fb_pos = 0;
            self.render.lines = 0;
        }
        self.update_render_values();
        self.render.dot_overflow = false;

        // The VInt flag is dropped unconditionally at frame end: some
        // titles enable CPU interrupts out of sync with VBlank and
        // never acknowledge this one.
        if self.status.vint {
            self.status.vint = false;
            self.line6 = false;
        }
    }

    fn update_render_values(&mut self) {
        self.render.bgcolor = self.regs.bgcolor;
        self.render.sc[0].nt_addr = self.regs.scroll_a_nt_addr;
        self.render.sc[1].nt_addr = self.regs.scroll_b_nt_addr;
        self.render.htable = self.regs.hscroll_table_addr;
        self.render.hsz = self.regs.hsz;
        self.render.vsz = self.regs.vsz;
        self.render.hscroll_mode = self.regs.hscroll_mode;
        self.render.vscroll_2cell = self.regs.vscroll_2cell;
        self.render.win_nt_addr = self.regs.window_nt_addr;
        self.render.window_right = self.regs.window_right;
        self.render.window_down = self.regs.window_down;
        self.render.window_h_cells = self.regs.window_h_cells;
        self.render.window_v_cells = self.regs.window_v_cells;
        self.render.shadow_highlight = self.regs.shadow_highlight;
        self.update_sprites();
    }

    // Refresh the sprite cache from the attribute table's linked list.
    fn update_sprites(&mut self) {
        let base = self.regs.sprite_table_addr;
        let nsprites = if self.regs.h40_mode { 80 } else { 64 };
        let mut next: u8 = 0;
        let mut i = 0;
        self.sprites.n = 0;
        loop {
            let entry = usize::from(base.wrapping_add(u16::from(next) * 8)) & 0xFFFF;
            let mut q = [0u8; 8];
            for (k, byte) in q.iter_mut().enumerate() {
                *byte = self.vram[(entry + k) & 0xFFFF];
            }
            let sprite = &mut self.sprites.v[self.sprites.n];
            self.sprites.n += 1;
            sprite.y = ((u16::from(q[0]) << 8) | u16::from(q[1])) & 0x3FF;
            sprite.width = ((q[2] >> 2) & 0x3) + 1;
            sprite.height = (q[2] & 0x3) + 1;
            next = q[3] & 0x7F;
            sprite.prio = q[4] & 0x80 != 0;
            sprite.pal = (q[4] & 0x60) >> 1;
            sprite.vflip = q[4] & 0x10 != 0;
            sprite.hflip = q[4] & 0x08 != 0;
            sprite.pat = ((u16::from(q[4]) << 8) | u16::from(q[5])) & 0x7FF;
            sprite.x = ((u16::from(q[6]) << 8) | u16::from(q[7])) & 0x1FF;
            i += 1;
            if !(next > 0 && usize::from(next) < nsprites && i < nsprites) {
                break;
            }
        }
    }

    // ---------------------------------------------------------------
    // Line rendering
    // ---------------------------------------------------------------

    fn render_lines(&mut self, lines: i32) {
        if lines == 0 {
            return;
        }
        self.render_line();
        self.update_render_values();
        for _ in 1..lines {
            self.render_line();
        }
    }

    fn render_line(&mut self) {
        let width = self.csize.width as usize;

        for i in 0..width {
            self.render.tmp[i] = self.render.bgcolor;
        }
        if self.regs.display_enabled {
            self.render_scroll_line(1);
            self.render_scroll_a_with_window();
            self.eval_sprite_line();
            self.render_sprite_line();

            // Scroll B then A, low priority.
            for layer in [1usize, 0] {
                for n in 0..self.render.sc[layer].n0 {
                    let i = usize::from(self.render.sc[layer].prio0[n]);
                    self.render.tmp[i] = self.render.sc[layer].line[i];
                }
            }
            // Shadow/highlight baseline: shadowed wherever both scroll
            // layers are low priority.
            if self.render.shadow_highlight {
                for i in 0..width {
                    self.render.s_te[i] = if self.render.sc[0].is_low_prio[i]
                        && self.render.sc[1].is_low_prio[i]
                    {
                        TAG_SHADOW
                    } else {
                        TAG_NORMAL
                    };
                }
            }
            // Sprites, low priority.
            for i in 0..width {
                let px = self.render.spr_line[i];
                if px.kind == 0 {
                    if px.color == SHA_COLOR {
                        self.render.s_te[i] = if self.render.s_te[i] == TAG_HIGHLIGHT {
                            TAG_NORMAL
                        } else {
                            TAG_SHADOW
                        };
                    } else if px.color == HIG_COLOR {
                        self.render.s_te[i] = if self.render.s_te[i] == TAG_SHADOW {
                            TAG_NORMAL
                        } else {
                            TAG_HIGHLIGHT
                        };
                    } else {
                        self.render.tmp[i] = px.color as u8;
                    }
                }
            }
            // Scroll B then A, high priority (clearing shadow there).
            for layer in [1usize, 0] {
                for n in 0..self.render.sc[layer].n1 {
                    let i = usize::from(self.render.sc[layer].prio1[n]);
                    self.render.tmp[i] = self.render.sc[layer].line[i];
                }
                if self.render.shadow_highlight {
                    for n in 0..self.render.sc[layer].n1 {
                        self.render.s_te[usize::from(self.render.sc[layer].prio1[n])] =
                            TAG_NORMAL;
                    }
                }
            }
            // Sprites, high priority.
            for i in 0..width {
                let px = self.render.spr_line[i];
                if px.kind == 1 {
                    if px.color == SHA_COLOR {
                        self.render.s_te[i] = if self.render.s_te[i] == TAG_HIGHLIGHT {
                            TAG_NORMAL
                        } else {
                            TAG_SHADOW
                        };
                    } else if px.color == HIG_COLOR {
                        self.render.s_te[i] = if self.render.s_te[i] == TAG_SHADOW {
                            TAG_NORMAL
                        } else {
                            TAG_HIGHLIGHT
                        };
                    } else {
                        self.render.tmp[i] = px.color as u8;
                        self.render.s_te[i] = TAG_NORMAL;
                    }
                }
            }
        }

        if self.regs.interlace == 3 {
            // Interlace doubles horizontally into a double-width field
            // buffer and skips the other field's line.
            for i in 0..width {
                let mut color = self.cram[usize::from(self.render.tmp[i])];
                if self.render.shadow_highlight {
                    color |= self.render.s_te[i];
                }
                self.render.fb[self.render.fb_pos] = color;
                self.render.fb[self.render.fb_pos + 1] = color;
                self.render.fb_pos += 2;
            }
            self.render.fb_pos += self.render.width as usize;
            self.render.lines += 2;
        } else {
            for i in 0..width {
                let mut color = self.cram[usize::from(self.render.tmp[i])];
                if self.render.shadow_highlight {
                    color |= self.render.s_te[i];
                }
                self.render.fb[self.render.fb_pos] = color;
                self.render.fb_pos += 1;
            }
            self.render.lines += 1;
        }
    }

    // Render one full line of a scroll plane into its work buffers.
    fn render_scroll_line(&mut self, which: usize) {
        let interlace3 = self.regs.interlace == 3;
        let lines = i32::from(self.render.lines);

        let mut row_mask: i32 = match self.render.vsz {
            32 => 0xFF,
            64 => 0x1FF,
            128 => 0x3FF,
            _ => 0x000,
        };
        let (addr_row_shift, cols_px): (u32, i32) = match self.render.hsz {
            32 => (6, 256),
            64 => (7, 512),
            128 => (8, 1024),
            _ => (6, 256),
        };
        let (pat_shift, max_row_cell, row_bits): (u32, i32, u32) = if interlace3 {
            row_mask <<= 1;
            (6, 0xF, 4)
        } else {
            (5, 0x7, 3)
        };

        let ntiles = self.csize.ntiles;
        let (niters, tiles_per_iter) = if self.render.vscroll_2cell {
            (ntiles / 2, 2)
        } else {
            (1, ntiles)
        };

        let htable = self.render.htable;
        let hscroll_mode = self.render.hscroll_mode;

        let vram = &self.vram;
        let vsram = &self.vsram;
        let sc = &mut self.render.sc[which];
        sc.n0 = 0;
        sc.n1 = 0;

        let mut x = 0usize;
        for n in 0..niters {
            // Vertical scroll for this column pair (or the whole line).
            let vs_mask = if interlace3 { 0x7FF } else { 0x3FF };
            let vs = i32::from(vsram[sc.off_2 + (n as usize) * 2] & vs_mask);
            let row = (lines + vs) & row_mask;
            let addr_row = sc.nt_addr | (((row >> row_bits) as u16) << addr_row_shift);

            // Horizontal scroll entry.
            let mut haddr = htable | sc.off;
            match hscroll_mode {
                HscrollMode::Cell => {
                    haddr = haddr.wrapping_add((((lines >> row_bits) << 5) & 0xFFFF) as u16);
                }
                HscrollMode::Line => {
                    let off = if interlace3 { (lines >> 1) << 2 } else { lines << 2 };
                    haddr = haddr.wrapping_add((off & 0xFFFF) as u16);
                }
                HscrollMode::Full => {}
            }
            let hs = i32::from(
                ((u16::from(vram[usize::from(haddr)]) << 8)
                    | u16::from(vram[usize::from(haddr | 1)]))
                    & 0x3FF,
            );
            let init_col = (16 * n + cols_px - (hs % cols_px)) % cols_px;

            // Walk plane pixels, fetching a name-table entry per tile.
            let mut col = init_col;
            let mut cur_tile = -1i32;
            let mut pat_row_addr = 0usize;
            let mut pal = 0u8;
            let mut prio = false;
            let mut hflip = false;
            for _ in 0..tiles_per_iter * 8 {
                let tile_col = col >> 3;
                if tile_col != cur_tile {
                    cur_tile = tile_col;
                    let addr = usize::from(addr_row | ((tile_col as u16) << 1));
                    let nt = (u16::from(vram[addr]) << 8) | u16::from(vram[addr | 1]);
                    let mut ap = u32::from(nt & 0x07FF) << pat_shift;
                    let pat_row = if nt & 0x1000 != 0 {
                        max_row_cell - (row & max_row_cell)
                    } else {
                        row & max_row_cell
                    };
                    ap |= (pat_row as u32) << 2;
                    pat_row_addr = ap as usize;
                    pal = (((nt >> 13) & 0x3) << 4) as u8;
                    prio = nt & 0x8000 != 0;
                    hflip = nt & 0x0800 != 0;
                }
                let px_in_tile = (col & 0x7) as u32;
                let px = if hflip { 7 - px_in_tile } else { px_in_tile };
                let byte = vram[(pat_row_addr + (px >> 1) as usize) & 0xFFFF];
                let color = if px & 1 == 0 { byte >> 4 } else { byte & 0xF };
                if color != 0 {
                    sc.line[x] = color | pal;
                    if prio {
                        sc.prio1[sc.n1] = x as u16;
                        sc.n1 += 1;
                    } else {
                        sc.prio0[sc.n0] = x as u16;
                        sc.n0 += 1;
                    }
                } else {
                    sc.line[x] = 0;
                }
                sc.is_low_prio[x] = !prio;
                x += 1;
                col = (col + 1) % cols_px;
            }
        }
    }

    // Render window cells [begin, end) into the scroll A buffers.
    fn render_window_cells(&mut self, begin: i32, end: i32) {
        let interlace3 = self.regs.interlace == 3;
        let pat_shift: u32 = if interlace3 { 6 } else { 5 };
        let lines = i32::from(self.render.lines);
        let (addr_nt, addr_row_shift): (u16, u32) = if self.regs.h40_mode {
            (self.render.win_nt_addr & 0xF800, 7)
        } else {
            (self.render.win_nt_addr, 6)
        };

        let vram = &self.vram;
        let sc = &mut self.render.sc[0];

        let mut addr =
            usize::from(addr_nt | ((((lines >> 3) as u16) << addr_row_shift) | ((begin as u16) << 1)));
        let mut x = (begin * 8) as usize;
        for _ in begin..end {
            let nt = (u16::from(vram[addr & 0xFFFF]) << 8) | u16::from(vram[(addr | 1) & 0xFFFF]);
            addr += 2;

            let mut pat_addr = u32::from(nt & 0x07FF) << pat_shift;
            // The window always indexes 8-pixel rows, interlace or not.
            if nt & 0x1000 != 0 {
                pat_addr |= ((7 - (lines & 0x7)) as u32) << 2;
            } else {
                pat_addr |= ((lines & 0x7) as u32) << 2;
            }

            let pal = (((nt >> 13) & 0x3) << 4) as u8;
            let high_prio = nt & 0x8000 != 0;
            for px in 0..8u32 {
                let src = if nt & 0x0800 != 0 { 7 - px } else { px };
                let byte = vram[(pat_addr + (src >> 1)) as usize & 0xFFFF];
                let color = if src & 1 == 0 { byte >> 4 } else { byte & 0xF };
                // Window cells report the priority flag itself in the
                // low-priority buffer (used by shadow/highlight).
                sc.is_low_prio[x] = high_prio;
                if color != 0 {
                    if high_prio {
                        sc.prio1[sc.n1] = x as u16;
                        sc.n1 += 1;
                    } else {
                        sc.prio0[sc.n0] = x as u16;
                        sc.n0 += 1;
                    }
                    sc.line[x] = color | pal;
                } else {
                    sc.line[x] = 0;
                }
                x += 1;
            }
        }
    }

    fn render_scroll_a_with_window(&mut self) {
        // A full-window line?
        let limit = i32::from(self.render.window_v_cells) * 8;
        let lines = i32::from(self.render.lines);
        let all_window = if self.render.window_down { lines >= limit } else { lines < limit };

        if all_window {
            self.render.sc[0].n0 = 0;
            self.render.sc[0].n1 = 0;
            let ntiles = self.csize.ntiles;
            self.render_window_cells(0, ntiles);
            return;
        }

        let (begin, end) = if self.render.window_right {
            (i32::from(self.render.window_h_cells) * 2, self.csize.ntiles)
        } else {
            (0, i32::from(self.render.window_h_cells) * 2)
        };

        self.render_scroll_line(0);
        if begin < end {
            // Drop scroll A pixels inside the window span before laying
            // the window cells down.
            let lo = (begin * 8) as u16;
            let hi = (end * 8) as u16;
            let sc = &mut self.render.sc[0];
            let mut n = 0;
            while n < sc.n0 {
                if sc.prio0[n] >= lo && sc.prio0[n] < hi {
                    sc.n0 -= 1;
                    sc.prio0[n] = sc.prio0[sc.n0];
                } else {
                    n += 1;
                }
            }
            let mut n = 0;
            while n < sc.n1 {
                if sc.prio1[n] >= lo && sc.prio1[n] < hi {
                    sc.n1 -= 1;
                    sc.prio1[n] = sc.prio1[sc.n1];
                } else {
                    n += 1;
                }
            }
            self.render_window_cells(begin, end);
        }
    }

    // Collect the sprites crossing the current line, applying the
    // per-line sprite and dot budgets and the X=0 masking rules.
    fn eval_sprite_line(&mut self) {
        let (base_row, pat_height, y_mask): (i32, i32, u16) = if self.regs.interlace == 3 {
            (256, 16, 0x3FF)
        } else {
            (128, 8, 0x1FF)
        };
        let (mut dots_left, max_line_sprites): (i32, usize) =
            if self.regs.h40_mode { (320, 20) } else { (256, 16) };

        let mut dot_overflow = false;
        let mut line_sprites = 0usize;
        let mut s1_mask_armed = false;
        let mut masked = false;
        self.sprite_buf.n = 0;

        for n in 0..self.sprites.n {
            if dot_overflow {
                break;
            }
            let sprite = self.sprites.v[n];
            let max_row = pat_height * i32::from(sprite.height);
            let row = (i32::from(self.render.lines) + base_row) - i32::from(sprite.y & y_mask);
            if row < 0 || row >= max_row {
                continue;
            }
            if line_sprites == max_line_sprites {
                self.status.too_many_sprites = true;
                break;
            }
            if !masked && sprite.x == 0 {
                // An X=0 sprite in the first slot arms an exemption
                // (unless the previous line ran out of dots); X=0
                // anywhere later masks the rest of the line.
                if line_sprites == 0 && !self.render.dot_overflow {
                    s1_mask_armed = true;
                } else if !s1_mask_armed {
                    masked = true;
                }
            }
            let mut width = i32::from(sprite.width) * 8;
            if width > dots_left {
                dot_overflow = true;
                width = dots_left;
            } else {
                dots_left -= width;
            }
            if !masked && width > 0 {
                self.sprite_buf.v[self.sprite_buf.n] = SpriteEval {
                    ind: n,
                    row,
                    width,
                    is_low_prio: !sprite.prio,
                };
                self.sprite_buf.n += 1;
            }
            line_sprites += 1;
        }
        self.render.dot_overflow = dot_overflow;
    }

    fn sprite_put_pixel(&mut self, color: u8, pal: u8, x: usize, is_low_prio: bool) {
        let new_color: i16 = if self.render.shadow_highlight && pal == 0x30 {
            match color {
                0xF => SHA_COLOR,
                0xE => HIG_COLOR,
                0 => return,
                _ => i16::from(color | pal),
            }
        } else if color != 0 {
            i16::from(color | pal)
        } else {
            return;
        };

        let px = &mut self.render.spr_line[x];
        if px.kind == -1 {
            px.coll_counter = 0;
        }
        px.color = new_color;
        px.kind = if is_low_prio { 0 } else { 1 };
        if new_color != SHA_COLOR && new_color != HIG_COLOR {
            px.coll_counter += 1;
            if px.coll_counter > 1 {
                self.status.sprite_collision = true;
            }
        }
    }

    fn render_sprite_line(&mut self) {
        let width = self.csize.width as usize;
        for i in 0..width {
            self.render.spr_line[i].kind = -1;
        }
        let (pat_height, pat_size): (i32, i32) =
            if self.regs.interlace == 3 { (16, 64) } else { (8, 32) };

        // Draw back-to-front so earlier table entries win.
        for n in (0..self.sprite_buf.n).rev() {
            let entry = self.sprite_buf.v[n];
            let sprite = self.sprites.v[entry.ind];
            let mut row = entry.row;
            if sprite.vflip {
                row = i32::from(sprite.height) * pat_height - row - 1;
            }

            let inc_pat = pat_size * i32::from(sprite.height);
            let begin = i32::from(sprite.x) - 128;
            let mut end = begin + entry.width;
            if end > self.csize.width {
                end = self.csize.width;
            }

            let base = i32::from(sprite.pat) * pat_size
                + (row / pat_height) * pat_size
                + (row % pat_height) * 4;

            let mut x = begin;
            for w in 0..i32::from(sprite.width) {
                if x >= end {
                    break;
                }
                // Column-major cell layout: each 8-pixel column strip
                // is `inc_pat` bytes after the previous one.
                let col_base = if sprite.hflip {
                    base + inc_pat * (i32::from(sprite.width) - 1 - w) + 3
                } else {
                    base + inc_pat * w
                };
                for i in 0..4 {
                    if x >= end {
                        break;
                    }
                    let addr = if sprite.hflip { col_base - i } else { col_base + i };
                    let byte = self.vram[(addr as usize) & 0xFFFF];
                    let (first, second) = if sprite.hflip {
                        (byte & 0xF, byte >> 4)
                    } else {
                        (byte >> 4, byte & 0xF)
                    };
                    if x >= 0 {
                        self.sprite_put_pixel(first, sprite.pal, x as usize, entry.is_low_prio);
                    }
                    x += 1;
                    if x >= end {
                        break;
                    }
                    if x >= 0 {
                        self.sprite_put_pixel(second, sprite.pal, x as usize, entry.is_low_prio);
                    }
                    x += 1;
                }
            }
        }
    }

    // ---------------------------------------------------------------
    // Save state
    // ---------------------------------------------------------------

    pub fn save_state(&self, w: &mut StateWriter) -> Result<(), StateError> {
        w.put_bool(self.access.second_pass)?;
        w.put_u16(self.access.addr)?;
        w.put_u8(self.access.code)?;
        w.put_bytes(&self.vram)?;
        w.put_u16s(&self.cram)?;
        w.put_u16s(&self.vsram)?;

        let r = &self.regs;
        w.put_bool(r.hint_enabled)?;
        w.put_bool(r.hv_counter_stop)?;
        w.put_bool(r.display_enabled)?;
        w.put_bool(r.vint_enabled)?;
        w.put_bool(r.dma_enabled)?;
        w.put_bool(r.v30_mode_latch)?;
        w.put_bool(r.v30_mode)?;
        w.put_u16(r.scroll_a_nt_addr)?;
        w.put_u16(r.window_nt_addr)?;
        w.put_u16(r.scroll_b_nt_addr)?;
        w.put_u16(r.sprite_table_addr)?;
        w.put_u8(r.bgcolor)?;
        w.put_u8(r.hint_reload)?;
        w.put_bool(r.vscroll_2cell)?;
        w.put_u8(r.hscroll_mode as u8)?;
        w.put_bool(r.h40_mode_latch)?;
        w.put_bool(r.h40_mode)?;
        w.put_u8(r.interlace_latch)?;
        w.put_u8(r.interlace)?;
        w.put_bool(r.shadow_highlight)?;
        w.put_u16(r.hscroll_table_addr)?;
        w.put_u8(r.auto_increment)?;
        w.put_u8(r.vsz)?;
        w.put_u8(r.hsz)?;
        w.put_bool(r.window_right)?;
        w.put_u8(r.window_h_cells)?;
        w.put_bool(r.window_down)?;
        w.put_u8(r.window_v_cells)?;
        w.put_u16(r.dma_length)?;
        w.put_u16(r.dma_length_counter)?;
        w.put_u32(r.dma_source)?;
        w.put_u32(r.dma_source_counter)?;
        w.put_u8(r.dma_mode as u8)?;

        w.put_i32(self.csize.width)?;
        w.put_i32(self.csize.ntiles)?;
        w.put_i32(self.csize.height)?;
        w.put_i32(self.csize.res_w)?;
        w.put_i32(self.csize.res_h)?;

        let t = &self.timing;
        w.put_i64(t.cc2frac)?;
        w.put_i64(t.frac)?;
        w.put_i64(t.points_per_line)?;
        w.put_i64(t.cycles_per_line)?;
        w.put_i64(t.cc)?;
        w.put_i32(t.h)?;
        w.put_i32(t.v)?;
        w.put_i32(t.lines)?;
        w.put_i32(t.lines_before_end_display)?;
        w.put_i32(t.linepp_before_hint)?;
        w.put_i32(t.linepp_begin_hblank)?;
        w.put_i32(t.linepp_end_hblank)?;
        w.put_i32(t.linepp_end_display)?;
        w.put_i64(t.cc_to_vint)?;
        w.put_i64(t.cc_to_hint)?;
        w.put_i64(t.cc_to_end_frame)?;
        w.put_i64(t.cc_to_next_line)?;
        w.put_i32(t.dma_mem2vram_cc_display)?;
        w.put_i32(t.dma_mem2vram_cc_vblank)?;

        w.put_i32(self.dma.fill_bpl_display)?;
        w.put_i32(self.dma.fill_bpl_vblank)?;
        w.put_i32(self.dma.copy_bpl_display)?;
        w.put_i32(self.dma.copy_bpl_vblank)?;
        w.put_u16(self.dma.fill_data)?;
        w.put_bool(self.dma.fill_started)?;
        w.put_bool(self.dma.to_vram)?;

        let s = &self.status;
        w.put_bool(s.vint)?;
        w.put_bool(s.hint)?;
        w.put_bool(s.pal)?;
        w.put_bool(s.odd_frame)?;
        w.put_bool(s.dma_busy)?;
        w.put_bool(s.fifo_empty)?;
        w.put_bool(s.too_many_sprites)?;
        w.put_bool(s.sprite_collision)?;
        w.put_u16(s.hvc)?;
        w.put_bool(s.vblank)?;

        w.put_i32(self.hint_counter)?;

        let rd = &self.render;
        w.put_u16s(&rd.fb)?;
        w.put_u64(rd.fb_pos as u64)?;
        w.put_u8(rd.bgcolor)?;
        w.put_i32(rd.width)?;
        w.put_bytes(&rd.tmp)?;
        for px in &rd.spr_line {
            w.put_u16(px.color as u16)?;
            w.put_u8(px.kind as u8)?;
            w.put_u8(px.coll_counter)?;
        }
        for tag in &rd.s_te {
            w.put_u16(*tag)?;
        }
        w.put_u16(rd.lines)?;
        for sc in &rd.sc {
            w.put_u16(sc.nt_addr)?;
            w.put_bytes(&sc.line)?;
            for b in &sc.is_low_prio {
                w.put_bool(*b)?;
            }
            w.put_u16s(&sc.prio0)?;
            w.put_u16s(&sc.prio1)?;
            w.put_u32(sc.n0 as u32)?;
            w.put_u32(sc.n1 as u32)?;
        }
        w.put_u16(rd.htable)?;
        w.put_u8(rd.hsz)?;
        w.put_u8(rd.vsz)?;
        w.put_u8(rd.hscroll_mode as u8)?;
        w.put_bool(rd.vscroll_2cell)?;
        w.put_u16(rd.win_nt_addr)?;
        w.put_bool(rd.window_right)?;
        w.put_bool(rd.window_down)?;
        w.put_u8(rd.window_h_cells)?;
        w.put_u8(rd.window_v_cells)?;
        w.put_bool(rd.dot_overflow)?;
        w.put_bool(rd.shadow_highlight)?;

        w.put_u32(self.sprites.n as u32)?;
        for sprite in &self.sprites.v {
            w.put_bool(sprite.vflip)?;
            w.put_bool(sprite.hflip)?;
            w.put_bool(sprite.prio)?;
            w.put_u8(sprite.width)?;
            w.put_u8(sprite.height)?;
            w.put_u8(sprite.pal)?;
            w.put_u16(sprite.y)?;
            w.put_u16(sprite.x)?;
            w.put_u16(sprite.pat)?;
        }
        w.put_u32(self.sprite_buf.n as u32)?;
        for entry in &self.sprite_buf.v {
            w.put_i32(entry.row)?;
            w.put_u32(entry.ind as u32)?;
            w.put_i32(entry.width)?;
            w.put_bool(entry.is_low_prio)?;
        }

        w.put_bool(self.z80_int_armed)?;
        w.put_bool(self.z80_int_line)?;
        w.put_bool(self.line4)?;
        w.put_bool(self.line6)?;
        w.put_u32(self.io_frame_events)?;
        Ok(())
    }

    pub fn load_state(
        &mut self,
        r: &mut StateReader,
        host: &mut dyn Host,
    ) -> Result<(), StateError> {
        self.access.second_pass = r.get_bool()?;
        self.access.addr = r.get_u16()?;
        self.access.code = r.get_u8()?;
        r.get_bytes(&mut self.vram)?;
        r.get_u16s(&mut self.cram)?;
        for c in self.cram {
            check(c & 0x1FF == c)?;
        }
        r.get_u16s(&mut self.vsram)?;
        for v in self.vsram {
            check(v & 0x7FF == v)?;
        }

        let rg = &mut self.regs;
        rg.hint_enabled = r.get_bool()?;
        rg.hv_counter_stop = r.get_bool()?;
        rg.display_enabled = r.get_bool()?;
        rg.vint_enabled = r.get_bool()?;
        rg.dma_enabled = r.get_bool()?;
        rg.v30_mode_latch = r.get_bool()?;
        rg.v30_mode = r.get_bool()?;
        rg.scroll_a_nt_addr = r.get_u16()?;
        rg.window_nt_addr = r.get_u16()?;
        rg.scroll_b_nt_addr = r.get_u16()?;
        rg.sprite_table_addr = r.get_u16()?;
        rg.bgcolor = r.get_u8()?;
        rg.hint_reload = r.get_u8()?;
        rg.vscroll_2cell = r.get_bool()?;
        rg.hscroll_mode = match r.get_u8()? {
            0 => HscrollMode::Full,
            1 => HscrollMode::Cell,
            2 => HscrollMode::Line,
            _ => return Err(StateError::Corrupt),
        };
        rg.h40_mode_latch = r.get_bool()?;
        rg.h40_mode = r.get_bool()?;
        rg.interlace_latch = r.get_u8()?;
        rg.interlace = r.get_u8()?;
        rg.shadow_highlight = r.get_bool()?;
        rg.hscroll_table_addr = r.get_u16()?;
        rg.auto_increment = r.get_u8()?;
        rg.vsz = r.get_u8()?;
        rg.hsz = r.get_u8()?;
        rg.window_right = r.get_bool()?;
        rg.window_h_cells = r.get_u8()?;
        rg.window_down = r.get_bool()?;
        rg.window_v_cells = r.get_u8()?;
        rg.dma_length = r.get_u16()?;
        rg.dma_length_counter = r.get_u16()?;
        rg.dma_source = r.get_u32()?;
        rg.dma_source_counter = r.get_u32()?;
        rg.dma_mode = match r.get_u8()? {
            0 => DmaMode::Mem2Vram,
            1 => DmaMode::Fill,
            2 => DmaMode::Copy,
            _ => return Err(StateError::Corrupt),
        };
        check(rg.scroll_a_nt_addr & 0xE000 == rg.scroll_a_nt_addr)?;
        check(rg.window_nt_addr & 0xF800 == rg.window_nt_addr)?;
        check(rg.scroll_b_nt_addr & 0xE000 == rg.scroll_b_nt_addr)?;
        check(rg.bgcolor & 0x3F == rg.bgcolor)?;
        check(rg.hscroll_table_addr & 0xFC00 == rg.hscroll_table_addr)?;
        check(matches!(rg.vsz, 32 | 64 | 128))?;
        check(matches!(rg.hsz, 32 | 64 | 128))?;
        check(rg.window_h_cells & 0x1F == rg.window_h_cells)?;
        check(rg.window_v_cells & 0x1F == rg.window_v_cells)?;
        check(matches!(rg.interlace, 0 | 1 | 3))?;
        check(matches!(rg.interlace_latch, 0 | 1 | 3))?;

        self.csize.width = r.get_i32()?;
        self.csize.ntiles = r.get_i32()?;
        self.csize.height = r.get_i32()?;
        self.csize.res_w = r.get_i32()?;
        self.csize.res_h = r.get_i32()?;
        check(self.csize.width == 320 || self.csize.width == 256)?;
        check(self.csize.ntiles == 40 || self.csize.ntiles == 32)?;
        check(self.csize.height == 240 || self.csize.height == 224)?;
        check(
            (self.csize.res_w == self.csize.width && self.csize.res_h == self.csize.height)
                || (self.csize.res_w == self.csize.width * 2
                    && self.csize.res_h == self.csize.height * 2),
        )?;
        let (rw, rh) = (self.csize.res_w, self.csize.res_h);
        self.res_changed(rw, rh, host);

        let t = &mut self.timing;
        t.cc2frac = r.get_i64()?;
        t.frac = r.get_i64()?;
        t.points_per_line = r.get_i64()?;
        t.cycles_per_line = r.get_i64()?;
        t.cc = r.get_i64()?;
        t.h = r.get_i32()?;
        t.v = r.get_i32()?;
        t.lines = r.get_i32()?;
        t.lines_before_end_display = r.get_i32()?;
        t.linepp_before_hint = r.get_i32()?;
        t.linepp_begin_hblank = r.get_i32()?;
        t.linepp_end_hblank = r.get_i32()?;
        t.linepp_end_display = r.get_i32()?;
        t.cc_to_vint = r.get_i64()?;
        t.cc_to_hint = r.get_i64()?;
        t.cc_to_end_frame = r.get_i64()?;
        t.cc_to_next_line = r.get_i64()?;
        t.dma_mem2vram_cc_display = r.get_i32()?;
        t.dma_mem2vram_cc_vblank = r.get_i32()?;
        check(t.cc >= 0)?;
        check(t.lines == NTSC_LINES || t.lines == PAL_LINES)?;
        check(t.frac == NTSC_FRAC || t.frac == PAL_FRAC)?;
        check(
            t.points_per_line == POINTS_PER_LINE_H32 || t.points_per_line == POINTS_PER_LINE_H40,
        )?;
        check(t.h >= 0 && i64::from(t.h) < t.points_per_line)?;
        check(t.v >= 0 && t.v < t.lines)?;
        check(
            t.dma_mem2vram_cc_display == DMA_MEM2VRAM_CC_H32_DISPLAY
                || t.dma_mem2vram_cc_display == DMA_MEM2VRAM_CC_H40_DISPLAY,
        )?;
        check(
            t.dma_mem2vram_cc_vblank == DMA_MEM2VRAM_CC_H32_VBLANK
                || t.dma_mem2vram_cc_vblank == DMA_MEM2VRAM_CC_H40_VBLANK,
        )?;

        self.dma.fill_bpl_display = r.get_i32()?;
        self.dma.fill_bpl_vblank = r.get_i32()?;
        self.dma.copy_bpl_display = r.get_i32()?;
        self.dma.copy_bpl_vblank = r.get_i32()?;
        self.dma.fill_data = r.get_u16()?;
        self.dma.fill_started = r.get_bool()?;
        self.dma.to_vram = r.get_bool()?;
        check(
            self.dma.fill_bpl_display == DMA_FILL_BPL_H32_DISPLAY
                || self.dma.fill_bpl_display == DMA_FILL_BPL_H40_DISPLAY,
        )?;
        check(
            self.dma.fill_bpl_vblank == DMA_FILL_BPL_H32_VBLANK
                || self.dma.fill_bpl_vblank == DMA_FILL_BPL_H40_VBLANK,
        )?;

        let s = &mut self.status;
        s.vint = r.get_bool()?;
        s.hint = r.get_bool()?;
        let pal = r.get_bool()?;
        check(pal == s.pal)?;
        s.odd_frame = r.get_bool()?;
        s.dma_busy = r.get_bool()?;
        s.fifo_empty = r.get_bool()?;
        s.too_many_sprites = r.get_bool()?;
        s.sprite_collision = r.get_bool()?;
        s.hvc = r.get_u16()?;
        s.vblank = r.get_bool()?;

        self.hint_counter = r.get_i32()?;

        let rd = &mut self.render;
        r.get_u16s(&mut rd.fb)?;
        for c in rd.fb.iter() {
            check(*c <= 0x7FF)?;
        }
        rd.fb_pos = r.get_u64()? as usize;
        rd.bgcolor = r.get_u8()?;
        rd.width = r.get_i32()?;
        r.get_bytes(&mut rd.tmp)?;
        for px in &mut rd.spr_line {
            px.color = r.get_u16()? as i16;
            px.kind = r.get_u8()? as i8;
            px.coll_counter = r.get_u8()?;
            check(
                (px.color >= 0 && px.color <= 0x3F)
                    || px.color == SHA_COLOR
                    || px.color == HIG_COLOR,
            )?;
            check(matches!(px.kind, -1 | 0 | 1))?;
        }
        for tag in &mut rd.s_te {
            *tag = r.get_u16()?;
            check(matches!(*tag, TAG_NORMAL | TAG_SHADOW | TAG_HIGHLIGHT))?;
        }
        rd.lines = r.get_u16()?;
        for sc in &mut rd.sc {
            sc.nt_addr = r.get_u16()?;
            r.get_bytes(&mut sc.line)?;
            for b in &mut sc.is_low_prio {
                *b = r.get_bool()?;
            }
            r.get_u16s(&mut sc.prio0)?;
            r.get_u16s(&mut sc.prio1)?;
            sc.n0 = r.get_u32()? as usize;
            sc.n1 = r.get_u32()? as usize;
            check(sc.n0 <= MAX_WIDTH && sc.n1 <= MAX_WIDTH)?;
        }
        check(rd.bgcolor & 0x3F == rd.bgcolor)?;
        check(rd.width == self.csize.width || rd.width == self.csize.width * 2)?;
        check(rd.fb_pos <= rd.fb.len())?;
        check(rd.fb_pos == usize::from(rd.lines) * rd.width as usize)?;
        rd.htable = r.get_u16()?;
        rd.hsz = r.get_u8()?;
        rd.vsz = r.get_u8()?;
        rd.hscroll_mode = match r.get_u8()? {
            0 => HscrollMode::Full,
            1 => HscrollMode::Cell,
            2 => HscrollMode::Line,
            _ => return Err(StateError::Corrupt),
        };
        rd.vscroll_2cell = r.get_bool()?;
        rd.win_nt_addr = r.get_u16()?;
        rd.window_right = r.get_bool()?;
        rd.window_down = r.get_bool()?;
        rd.window_h_cells = r.get_u8()?;
        rd.window_v_cells = r.get_u8()?;
        rd.dot_overflow = r.get_bool()?;
        rd.shadow_highlight = r.get_bool()?;
        check(rd.htable & 0xFC00 == rd.htable)?;
        check(matches!(rd.hsz, 32 | 64 | 128) && matches!(rd.vsz, 32 | 64 | 128))?;
        check(rd.win_nt_addr & 0xF800 == rd.win_nt_addr)?;
        check(rd.window_h_cells & 0x1F == rd.window_h_cells)?;
        check(rd.window_v_cells & 0x1F == rd.window_v_cells)?;

        self.sprites.n = r.get_u32()? as usize;
        check(self.sprites.n <= NSPRITES)?;
        for sprite in &mut self.sprites.v {
            sprite.vflip = r.get_bool()?;
            sprite.hflip = r.get_bool()?;
            sprite.prio = r.get_bool()?;
            sprite.width = r.get_u8()?;
            sprite.height = r.get_u8()?;
            sprite.pal = r.get_u8()?;
            sprite.y = r.get_u16()?;
            sprite.x = r.get_u16()?;
            sprite.pat = r.get_u16()?;
        }
        for sprite in &self.sprites.v[..self.sprites.n] {
            check((1..=4).contains(&sprite.width))?;
            check((1..=4).contains(&sprite.height))?;
            check(sprite.pal & 0x30 == sprite.pal)?;
            check(sprite.y & 0x3FF == sprite.y)?;
            check(sprite.x & 0x1FF == sprite.x)?;
            check(sprite.pat & 0x7FF == sprite.pat)?;
        }
        self.sprite_buf.n = r.get_u32()? as usize;
        check(self.sprite_buf.n <= NSPRITES)?;
        for entry in &mut self.sprite_buf.v {
            entry.row = r.get_i32()?;
            entry.ind = r.get_u32()? as usize;
            entry.width = r.get_i32()?;
            entry.is_low_prio = r.get_bool()?;
        }
        for entry in &self.sprite_buf.v[..self.sprite_buf.n] {
            check(entry.ind < NSPRITES)?;
        }

        self.z80_int_armed = r.get_bool()?;
        self.z80_int_line = r.get_bool()?;
        self.line4 = r.get_bool()?;
        self.line6 = r.get_bool()?;
        self.io_frame_events = r.get_u32()?;
        Ok(())
    }
}
