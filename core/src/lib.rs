pub mod core;
pub mod cpu;
pub mod device;
pub mod state;

pub mod prelude {
    pub use crate::core::bus::{BusMaster, MainBus, SoundBus};
    pub use crate::core::machine::{Host, Machine, Signals, buttons};
    pub use crate::cpu::{MainCpu, SoundCpu};
    pub use crate::device::vdp::{Rgb, color_to_rgb};
    pub use crate::state::{StateError, StateReader, StateWriter};
}
