//! Shared test doubles for the device suites.

use overdrive_core::core::machine::{AUDIO_BLOCK_FRAMES, Host, Signals};

/// A host that records everything the devices hand it.
#[derive(Default)]
pub struct RecordingHost {
    pub warnings: Vec<String>,
    pub resolutions: Vec<(u32, u32)>,
    pub frames: Vec<Vec<u16>>,
    pub audio: Vec<i16>,
    pub buttons: [u16; 2],
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Host for RecordingHost {
    fn warning(&mut self, message: &str) {
        self.warnings.push(message.to_string());
    }

    fn check_signals(&mut self) -> Signals {
        Signals::default()
    }

    fn resolution_changed(&mut self, width: u32, height: u32) {
        self.resolutions.push((width, height));
    }

    fn update_screen(&mut self, frame: &[u16]) {
        self.frames.push(frame.to_vec());
    }

    fn play_sound(&mut self, samples: &[i16; AUDIO_BLOCK_FRAMES * 2]) {
        self.audio.extend_from_slice(samples);
    }

    fn check_buttons(&mut self, pad: usize) -> u16 {
        self.buttons[pad]
    }
}
