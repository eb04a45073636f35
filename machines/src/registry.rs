//! Machine registry for automatic front-end discovery.
//!
//! Each machine variant self-registers via [`inventory::submit!`] with
//! a [`MachineEntry`] holding its name and a factory from (cartridge
//! image, CPU cores, host) to a running machine. Front ends discover
//! the variants at runtime without a central list.

use overdrive_core::core::machine::{Host, Machine};

use crate::cartridge::CartridgeError;
use crate::megadrive::CpuCores;

/// A front-end-selectable machine variant.
pub struct MachineEntry {
    /// CLI name used to select this variant (e.g., "megadrive-pal").
    pub name: &'static str,
    /// Factory: build a machine around a cartridge image.
    pub create: fn(Vec<u8>, CpuCores, Box<dyn Host>) -> Result<Box<dyn Machine>, CartridgeError>,
}

impl MachineEntry {
    pub const fn new(
        name: &'static str,
        create: fn(Vec<u8>, CpuCores, Box<dyn Host>) -> Result<Box<dyn Machine>, CartridgeError>,
    ) -> Self {
        Self { name, create }
    }
}

inventory::collect!(MachineEntry);

/// All registered machine variants, sorted by name.
pub fn all() -> Vec<&'static MachineEntry> {
    let mut entries: Vec<_> = inventory::iter::<MachineEntry>.into_iter().collect();
    entries.sort_by_key(|e| e.name);
    entries
}

/// Look up a variant by name.
pub fn find(name: &str) -> Option<&'static MachineEntry> {
    inventory::iter::<MachineEntry>.into_iter().find(|e| e.name == name)
}
