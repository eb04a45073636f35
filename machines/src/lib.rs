pub mod backup;
pub mod cartridge;
pub mod megadrive;
pub mod registry;

pub use cartridge::{CartridgeError, CartridgeKind, CartridgeRom, RomHeader, classify};
pub use megadrive::{CpuCores, MegaDrive, Model};
