use std::io;

use crate::state::StateError;

/// Pad button bits reported by [`Host::check_buttons`].
pub mod buttons {
    pub const UP: u16 = 0x001;
    pub const DOWN: u16 = 0x002;
    pub const LEFT: u16 = 0x004;
    pub const RIGHT: u16 = 0x008;
    pub const A: u16 = 0x010;
    pub const B: u16 = 0x020;
    pub const C: u16 = 0x040;
    pub const START: u16 = 0x080;
    // 6-button pads only
    pub const X: u16 = 0x100;
    pub const Y: u16 = 0x200;
    pub const Z: u16 = 0x400;
}

/// External signals polled by the machine roughly every 10 ms of
/// emulated time.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Signals {
    pub stop: bool,
    pub reset: bool,
}

/// Stereo frames per audio block handed to [`Host::play_sound`].
pub const AUDIO_BLOCK_FRAMES: usize = 512;

/// Everything the emulation core needs from its embedder, as one
/// capability object. All callbacks run synchronously on the emulation
/// thread and must not re-enter the machine.
///
/// `play_sound` is allowed to block: a host whose audio device applies
/// back-pressure throttles the whole machine to real time through it.
pub trait Host {
    /// Printable diagnostic about guest misbehavior or unimplemented
    /// hardware corners. The machine continues after every warning.
    fn warning(&mut self, message: &str) {
        let _ = message;
    }

    /// Poll for stop/reset. Also the host's chance to pump its own
    /// event loop.
    fn check_signals(&mut self) -> Signals {
        Signals::default()
    }

    /// The visible resolution changed (H32/H40, V28/V30, interlace).
    /// Called at least once during machine construction.
    fn resolution_changed(&mut self, width: u32, height: u32) {
        let _ = (width, height);
    }

    /// One finished frame of `width * height` color words. Convert the
    /// entries to RGB with [`color_to_rgb`](crate::device::vdp::color_to_rgb).
    fn update_screen(&mut self, frame: &[u16]) {
        let _ = frame;
    }

    /// One block of interleaved stereo samples.
    fn play_sound(&mut self, samples: &[i16; AUDIO_BLOCK_FRAMES * 2]) {
        let _ = samples;
    }

    /// Initial contents for cartridge static RAM (persisted battery
    /// backup). Hosts without persistence can use the default.
    fn get_static_ram(&mut self, n_words: usize) -> Vec<u16> {
        vec![0; n_words]
    }

    /// Initial contents for a serial EEPROM, `fill` being the device's
    /// erased-cell value.
    fn get_eeprom(&mut self, n_bytes: usize, fill: u8) -> Vec<u8> {
        vec![fill; n_bytes]
    }

    /// Bitmask of currently-held buttons for pad 0 or 1 (see [`buttons`]).
    fn check_buttons(&mut self, pad: usize) -> u16 {
        let _ = pad;
        0
    }
}

/// A complete emulated system.
pub trait Machine {
    /// Execute one main-CPU instruction and bring every other chip up to
    /// date, servicing any memory-to-VRAM DMA the instruction triggered.
    /// Returns the main-CPU cycles consumed.
    fn step(&mut self) -> u32;

    /// Run [`step`](Self::step) until the host's stop signal. The host is
    /// polled through [`Host::check_signals`] often enough to service its
    /// event loop; a pending reset request is applied at the same cadence.
    fn run(&mut self);

    /// Request a reset; applied at the next signal-poll boundary (or
    /// immediately when invoked between steps).
    fn reset(&mut self);

    /// Serialize the whole machine state.
    fn save_state(&self, w: &mut dyn io::Write) -> Result<(), StateError>;

    /// Restore a previously saved state. On any validation failure every
    /// component is re-initialized to its power-on state and an error is
    /// returned.
    fn load_state(&mut self, r: &mut dyn io::Read) -> Result<(), StateError>;
}
