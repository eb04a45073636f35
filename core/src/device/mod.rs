pub mod eeprom;
pub mod mixer;
pub mod pad;
pub mod sn76489;
pub mod svp;
pub mod vdp;
pub mod ym2612;

pub use eeprom::{Eeprom, EepromKind};
pub use mixer::AudioMixer;
pub use pad::IoPorts;
pub use sn76489::Sn76489;
pub use svp::Svp;
pub use vdp::Vdp;
pub use ym2612::Ym2612;
