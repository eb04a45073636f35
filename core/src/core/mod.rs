pub mod bus;
pub mod machine;

pub use bus::{BusMaster, MainBus, SoundBus};
pub use machine::{Host, Machine, Signals};
