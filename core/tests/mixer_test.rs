mod common;

use common::RecordingHost;
use overdrive_core::core::machine::AUDIO_BLOCK_FRAMES;
use overdrive_core::device::mixer::AudioMixer;
use overdrive_core::state::{StateReader, StateWriter};

#[test]
fn emits_one_frame_per_fm_sample() {
    let mut host = RecordingHost::new();
    let mut mixer = AudioMixer::new();

    // A generous PSG supply: output count must track the FM side.
    for _ in 0..3000 {
        mixer.push_psg(0.0, &mut host);
    }
    for _ in 0..AUDIO_BLOCK_FRAMES {
        mixer.push_fm(0, 0, &mut host);
    }
    assert_eq!(host.audio.len(), AUDIO_BLOCK_FRAMES * 2);
    assert_eq!(mixer.buffered_output_frames(), 0);

    for _ in 0..100 {
        mixer.push_fm(0, 0, &mut host);
    }
    assert_eq!(host.audio.len(), AUDIO_BLOCK_FRAMES * 2);
    assert_eq!(mixer.buffered_output_frames(), 100);
}

#[test]
fn starves_without_psg_window() {
    let mut host = RecordingHost::new();
    let mut mixer = AudioMixer::new();

    for _ in 0..4 {
        mixer.push_psg(0.0, &mut host);
    }
    mixer.push_fm(1000, 1000, &mut host);
    // Four PSG samples are one short of a window.
    assert_eq!(mixer.buffered_output_frames(), 0);
    mixer.push_psg(0.0, &mut host);
    assert_eq!(mixer.buffered_output_frames(), 1);
}

#[test]
fn fm_takes_six_sevenths_of_the_mix() {
    let mut host = RecordingHost::new();
    let mut mixer = AudioMixer::new();

    for _ in 0..3000 {
        mixer.push_psg(0.0, &mut host);
    }
    for _ in 0..AUDIO_BLOCK_FRAMES {
        mixer.push_fm(7000, -7000, &mut host);
    }
    assert_eq!(host.audio[0], 6000);
    assert_eq!(host.audio[1], -6000);
}

#[test]
fn psg_scale_lands_at_one_seventh() {
    let mut host = RecordingHost::new();
    let mut mixer = AudioMixer::new();

    for _ in 0..3000 {
        mixer.push_psg(1.0, &mut host);
    }
    for _ in 0..AUDIO_BLOCK_FRAMES {
        mixer.push_fm(0, 0, &mut host);
    }
    // Full-scale PSG maps to 8192*4 before the 1/7 share.
    assert_eq!(host.audio[0], (8192 * 4 / 7) as i16);
    assert_eq!(host.audio[0], host.audio[1]);
}

#[test]
fn overrun_warns_and_drops() {
    let mut host = RecordingHost::new();
    let mut mixer = AudioMixer::new();

    // No FM samples ever arrive, so the PSG ring fills up.
    for _ in 0..300 {
        mixer.push_psg(0.5, &mut host);
    }
    assert!(host.warnings.iter().any(|w| w.contains("PSG")));
}

#[test]
fn state_roundtrip_preserves_stream_position() {
    let mut host = RecordingHost::new();
    let mut mixer = AudioMixer::new();

    for _ in 0..17 {
        mixer.push_psg(0.25, &mut host);
    }
    for _ in 0..3 {
        mixer.push_fm(123, -123, &mut host);
    }

    let mut saved = Vec::new();
    mixer.save_state(&mut StateWriter::new(&mut saved)).unwrap();

    let mut restored = AudioMixer::new();
    let mut cur = saved.as_slice();
    restored.load_state(&mut StateReader::new(&mut cur)).unwrap();

    let mut resaved = Vec::new();
    restored.save_state(&mut StateWriter::new(&mut resaved)).unwrap();
    assert_eq!(saved, resaved);
    assert_eq!(restored.buffered_output_frames(), mixer.buffered_output_frames());
}

#[test]
fn state_rejects_bad_step() {
    let mut mixer = AudioMixer::new();
    let mut saved = Vec::new();
    mixer.save_state(&mut StateWriter::new(&mut saved)).unwrap();

    // psg_step lives right after the 250 f64 samples and two u32s.
    let step_offset = 250 * 8 + 4 + 4;
    saved[step_offset] = 9;
    let mut cur = saved.as_slice();
    assert!(mixer.load_state(&mut StateReader::new(&mut cur)).is_err());
}
