//! CPU core interfaces.
//!
//! The instruction interpreters themselves are external collaborators;
//! the machine drives them through these traits and wires their buses,
//! interrupt lines and save-state blocks.

use crate::core::bus::{MainBus, SoundBus};
use crate::state::{StateError, StateReader, StateWriter};

/// The main processor (68000-shaped: 24-bit bus, autovectored
/// interrupts, cycle-counted instructions).
pub trait MainCpu {
    /// Execute one instruction (or service a pending exception) and
    /// return the clock cycles consumed.
    fn step(&mut self, bus: &mut dyn MainBus) -> u32;

    /// Assert the reset line; the core performs its reset sequence on
    /// the next step.
    fn assert_reset(&mut self);

    /// Drive an autovector interrupt line (levels 1-7). The core samples
    /// the lines at its next instruction boundary and acknowledges
    /// through [`MainBus::acknowledge_interrupt`].
    fn set_autovector(&mut self, level: u8, asserted: bool);

    /// Return to the power-on state.
    fn power_on(&mut self);

    fn save_state(&self, w: &mut StateWriter) -> Result<(), StateError>;
    fn load_state(&mut self, r: &mut StateReader) -> Result<(), StateError>;
}

/// The sound processor (Z80-shaped: 16-bit bus, single maskable IRQ
/// line).
pub trait SoundCpu {
    /// Execute one instruction and return the clock cycles consumed.
    fn step(&mut self, bus: &mut dyn SoundBus) -> u32;

    /// Hardware reset (PC to 0, interrupts disabled).
    fn reset(&mut self);

    /// Drive the maskable interrupt line.
    fn set_irq_line(&mut self, asserted: bool);

    /// Return to the power-on state.
    fn power_on(&mut self);

    fn save_state(&self, w: &mut StateWriter) -> Result<(), StateError>;
    fn load_state(&mut self, r: &mut StateReader) -> Result<(), StateError>;
}
