//! Shared test doubles: scripted CPU cores and a recording host with
//! handles that outlive the machine.

use std::cell::RefCell;
use std::rc::Rc;

use overdrive_core::core::bus::{MainBus, SoundBus};
use overdrive_core::core::machine::{AUDIO_BLOCK_FRAMES, Host, Signals};
use overdrive_core::cpu::{MainCpu, SoundCpu};
use overdrive_core::state::{StateError, StateReader, StateWriter, check};

#[derive(Default)]
pub struct MainCpuRecord {
    pub level4: bool,
    pub level6: bool,
    pub level6_asserts: u32,
    pub resets: u32,
    pub steps: u64,
}

/// A main CPU that burns a fixed cycle count per step and records its
/// interrupt lines.
pub struct StubMainCpu {
    pub cycles_per_step: u32,
    pub record: Rc<RefCell<MainCpuRecord>>,
}

impl StubMainCpu {
    pub fn new(cycles_per_step: u32) -> (Box<Self>, Rc<RefCell<MainCpuRecord>>) {
        let record = Rc::new(RefCell::new(MainCpuRecord::default()));
        (Box::new(Self { cycles_per_step, record: record.clone() }), record)
    }
}

impl MainCpu for StubMainCpu {
    fn step(&mut self, _bus: &mut dyn MainBus) -> u32 {
        self.record.borrow_mut().steps += 1;
        self.cycles_per_step
    }

    fn assert_reset(&mut self) {
        self.record.borrow_mut().resets += 1;
    }

    fn set_autovector(&mut self, level: u8, asserted: bool) {
        let mut record = self.record.borrow_mut();
        match level {
            4 => record.level4 = asserted,
            6 => {
                if asserted && !record.level6 {
                    record.level6_asserts += 1;
                }
                record.level6 = asserted;
            }
            _ => {}
        }
    }

    fn power_on(&mut self) {}

    fn save_state(&self, w: &mut StateWriter) -> Result<(), StateError> {
        w.put_u32(0x4D36_384B)
    }

    fn load_state(&mut self, r: &mut StateReader) -> Result<(), StateError> {
        check(r.get_u32()? == 0x4D36_384B)
    }
}

#[derive(Default)]
pub struct SoundCpuRecord {
    pub resets: u32,
    pub steps: u64,
    pub irq: bool,
}

/// A sound CPU that burns four cycles per step.
pub struct StubSoundCpu {
    pub record: Rc<RefCell<SoundCpuRecord>>,
}

impl StubSoundCpu {
    pub fn new() -> (Box<Self>, Rc<RefCell<SoundCpuRecord>>) {
        let record = Rc::new(RefCell::new(SoundCpuRecord::default()));
        (Box::new(Self { record: record.clone() }), record)
    }
}

impl SoundCpu for StubSoundCpu {
    fn step(&mut self, _bus: &mut dyn SoundBus) -> u32 {
        self.record.borrow_mut().steps += 1;
        4
    }

    fn reset(&mut self) {
        self.record.borrow_mut().resets += 1;
    }

    fn set_irq_line(&mut self, asserted: bool) {
        self.record.borrow_mut().irq = asserted;
    }

    fn power_on(&mut self) {}

    fn save_state(&self, w: &mut StateWriter) -> Result<(), StateError> {
        w.put_u32(0x5A38_302E)
    }

    fn load_state(&mut self, r: &mut StateReader) -> Result<(), StateError> {
        check(r.get_u32()? == 0x5A38_302E)
    }
}

#[derive(Default)]
pub struct HostRecord {
    pub warnings: Vec<String>,
    pub resolutions: Vec<(u32, u32)>,
    pub frame_count: u32,
    pub last_frame: Vec<u16>,
    pub audio_samples: u64,
    pub buttons: [u16; 2],
    pub signal_polls: u32,
    pub pending_signals: Vec<Signals>,
}

/// A host whose record stays inspectable after the machine takes the
/// box.
pub struct SharedHost {
    pub record: Rc<RefCell<HostRecord>>,
}

impl SharedHost {
    pub fn new() -> (Box<Self>, Rc<RefCell<HostRecord>>) {
        let record = Rc::new(RefCell::new(HostRecord::default()));
        (Box::new(Self { record: record.clone() }), record)
    }
}

impl Host for SharedHost {
    fn warning(&mut self, message: &str) {
        self.record.borrow_mut().warnings.push(message.to_string());
    }

    fn check_signals(&mut self) -> Signals {
        let mut record = self.record.borrow_mut();
        record.signal_polls += 1;
        if record.pending_signals.is_empty() {
            Signals::default()
        } else {
            record.pending_signals.remove(0)
        }
    }

    fn resolution_changed(&mut self, width: u32, height: u32) {
        self.record.borrow_mut().resolutions.push((width, height));
    }

    fn update_screen(&mut self, frame: &[u16]) {
        let mut record = self.record.borrow_mut();
        record.frame_count += 1;
        record.last_frame = frame.to_vec();
    }

    fn play_sound(&mut self, samples: &[i16; AUDIO_BLOCK_FRAMES * 2]) {
        self.record.borrow_mut().audio_samples += samples.len() as u64;
    }

    fn check_buttons(&mut self, pad: usize) -> u16 {
        self.record.borrow().buttons[pad]
    }
}
