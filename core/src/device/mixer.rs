//! FM/PSG output mixer.
//!
//! The two sound chips run at incommensurate sample rates measured in
//! master-clock cycles: one FM sample every 7*144 = 1008 cycles, one PSG
//! sample every 15*16 = 240 cycles, i.e. 4.2 PSG samples per FM sample.
//! The mixer produces output at the FM rate by weight-summing a window
//! of five PSG samples per FM sample; the 48-cycle remainder rotates
//! through a five-step schedule, consuming four PSG samples on four
//! steps out of five and five on the last.

use crate::core::machine::{AUDIO_BLOCK_FRAMES, Host};
use crate::state::{StateError, StateReader, StateWriter, check};

const PSG_STEPS: usize = 5;
const PSG_SAMPLES_PER_FM: usize = 5;

// Ring capacities, generous in case a burst of samples arrives at once.
const FM_BUF_LEN: usize = 50;
const PSG_BUF_LEN: usize = FM_BUF_LEN * PSG_SAMPLES_PER_FM;

const FM_SAMPLE_CYCLES: f64 = 1008.0;

struct PsgStep {
    discard: usize,
    weights: [f64; PSG_SAMPLES_PER_FM],
}

// Each weight is the share of the 1008-cycle FM sample period covered by
// that PSG sample; the partial 48-cycle slice walks from the tail of the
// window to its head over the five steps.
const PSG_STEP_WEIGHTS: [PsgStep; PSG_STEPS] = [
    // 240 + 240 + 240 + 240 + 48
    PsgStep {
        discard: 4,
        weights: [
            240.0 / FM_SAMPLE_CYCLES,
            240.0 / FM_SAMPLE_CYCLES,
            240.0 / FM_SAMPLE_CYCLES,
            240.0 / FM_SAMPLE_CYCLES,
            48.0 / FM_SAMPLE_CYCLES,
        ],
    },
    // 192 + 240 + 240 + 240 + 96
    PsgStep {
        discard: 4,
        weights: [
            192.0 / FM_SAMPLE_CYCLES,
            240.0 / FM_SAMPLE_CYCLES,
            240.0 / FM_SAMPLE_CYCLES,
            240.0 / FM_SAMPLE_CYCLES,
            96.0 / FM_SAMPLE_CYCLES,
        ],
    },
    // 144 + 240 + 240 + 240 + 144
    PsgStep {
        discard: 4,
        weights: [
            144.0 / FM_SAMPLE_CYCLES,
            240.0 / FM_SAMPLE_CYCLES,
            240.0 / FM_SAMPLE_CYCLES,
            240.0 / FM_SAMPLE_CYCLES,
            144.0 / FM_SAMPLE_CYCLES,
        ],
    },
    // 96 + 240 + 240 + 240 + 192
    PsgStep {
        discard: 4,
        weights: [
            96.0 / FM_SAMPLE_CYCLES,
            240.0 / FM_SAMPLE_CYCLES,
            240.0 / FM_SAMPLE_CYCLES,
            240.0 / FM_SAMPLE_CYCLES,
            192.0 / FM_SAMPLE_CYCLES,
        ],
    },
    // 48 + 240 + 240 + 240 + 240
    PsgStep {
        discard: 5,
        weights: [
            48.0 / FM_SAMPLE_CYCLES,
            240.0 / FM_SAMPLE_CYCLES,
            240.0 / FM_SAMPLE_CYCLES,
            240.0 / FM_SAMPLE_CYCLES,
            240.0 / FM_SAMPLE_CYCLES,
        ],
    },
];

pub struct AudioMixer {
    // PSG samples waiting to be consumed (normalized 0.0..1.0).
    psg_buf: [f64; PSG_BUF_LEN],
    psg_pos: usize,
    psg_len: usize,
    psg_step: usize,

    // FM samples waiting to be consumed.
    fm_left: [i16; FM_BUF_LEN],
    fm_right: [i16; FM_BUF_LEN],
    fm_pos: usize,
    fm_len: usize,

    // Interleaved output block under construction.
    out: [i16; AUDIO_BLOCK_FRAMES * 2],
    out_len: usize,
}

impl AudioMixer {
    pub fn new() -> Self {
        Self {
            psg_buf: [0.0; PSG_BUF_LEN],
            psg_pos: 0,
            psg_len: 0,
            psg_step: 0,
            fm_left: [0; FM_BUF_LEN],
            fm_right: [0; FM_BUF_LEN],
            fm_pos: 0,
            fm_len: 0,
            out: [0; AUDIO_BLOCK_FRAMES * 2],
            out_len: 0,
        }
    }

    pub fn power_on(&mut self) {
        *self = Self::new();
    }

    /// Enqueue one FM sample pair and emit any output frames that became
    /// computable.
    pub fn push_fm(&mut self, left: i16, right: i16, host: &mut dyn Host) {
        if self.fm_len == FM_BUF_LEN {
            host.warning("audio: FM sample buffer overrun, sample dropped");
            return;
        }
        let pos = (self.fm_pos + self.fm_len) % FM_BUF_LEN;
        self.fm_left[pos] = left;
        self.fm_right[pos] = right;
        self.fm_len += 1;
        self.render(host);
    }

    /// Enqueue one PSG sample and emit any output frames that became
    /// computable.
    pub fn push_psg(&mut self, sample: f64, host: &mut dyn Host) {
        if self.psg_len == PSG_BUF_LEN {
            host.warning("audio: PSG sample buffer overrun, sample dropped");
            return;
        }
        self.psg_buf[(self.psg_pos + self.psg_len) % PSG_BUF_LEN] = sample;
        self.psg_len += 1;
        self.render(host);
    }

    /// Stereo frames accumulated in the pending output block.
    pub fn buffered_output_frames(&self) -> usize {
        self.out_len / 2
    }

    fn render(&mut self, host: &mut dyn Host) {
        while self.fm_len > 0 && self.psg_len >= PSG_SAMPLES_PER_FM {
            let step = &PSG_STEP_WEIGHTS[self.psg_step];

            let mut sample = 0.0;
            for (i, w) in step.weights.iter().enumerate() {
                sample += self.psg_buf[(self.psg_pos + i) % PSG_BUF_LEN] * w;
            }
            self.psg_len -= step.discard;
            self.psg_pos = (self.psg_pos + step.discard) % PSG_BUF_LEN;
            self.psg_step = (self.psg_step + 1) % PSG_STEPS;
            let psg = (sample * 8192.0 * 4.0 + 0.5) as i32;

            let fm_left = i32::from(self.fm_left[self.fm_pos]);
            let fm_right = i32::from(self.fm_right[self.fm_pos]);
            self.fm_pos = (self.fm_pos + 1) % FM_BUF_LEN;
            self.fm_len -= 1;

            self.out[self.out_len] = ((6 * fm_left + psg) / 7) as i16;
            self.out[self.out_len + 1] = ((6 * fm_right + psg) / 7) as i16;
            self.out_len += 2;
            if self.out_len == AUDIO_BLOCK_FRAMES * 2 {
                host.play_sound(&self.out);
                self.out_len = 0;
            }
        }
    }

    pub fn save_state(&self, w: &mut StateWriter) -> Result<(), StateError> {
        for v in self.psg_buf {
            w.put_f64(v)?;
        }
        w.put_u32(self.psg_pos as u32)?;
        w.put_u32(self.psg_len as u32)?;
        w.put_u32(self.psg_step as u32)?;
        for v in self.fm_left {
            w.put_u16(v as u16)?;
        }
        for v in self.fm_right {
            w.put_u16(v as u16)?;
        }
        w.put_u32(self.fm_pos as u32)?;
        w.put_u32(self.fm_len as u32)?;
        for v in self.out {
            w.put_u16(v as u16)?;
        }
        w.put_u32(self.out_len as u32)?;
        Ok(())
    }

    pub fn load_state(&mut self, r: &mut StateReader) -> Result<(), StateError> {
        for v in &mut self.psg_buf {
            *v = r.get_f64()?;
        }
        self.psg_pos = r.get_u32()? as usize;
        self.psg_len = r.get_u32()? as usize;
        self.psg_step = r.get_u32()? as usize;
        check(self.psg_pos < PSG_BUF_LEN)?;
        check(self.psg_len <= PSG_BUF_LEN)?;
        check(self.psg_step < PSG_STEPS)?;
        for v in &mut self.fm_left {
            *v = r.get_u16()? as i16;
        }
        for v in &mut self.fm_right {
            *v = r.get_u16()? as i16;
        }
        self.fm_pos = r.get_u32()? as usize;
        self.fm_len = r.get_u32()? as usize;
        check(self.fm_pos < FM_BUF_LEN)?;
        check(self.fm_len <= FM_BUF_LEN)?;
        for v in &mut self.out {
            *v = r.get_u16()? as i16;
        }
        self.out_len = r.get_u32()? as usize;
        check(self.out_len < AUDIO_BLOCK_FRAMES * 2 && self.out_len % 2 == 0)?;
        Ok(())
    }
}

impl Default for AudioMixer {
    fn default() -> Self {
        Self::new()
    }
}
