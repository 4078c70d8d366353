//! Boot parameters handed to the kernel loader.

use std::path::PathBuf;

use utils::endian::{EndianData, LittleEndian32};

/// Secondary CPU parking loop: `wfi` then branch back to it.
pub const SECONDARY_STUB: [u32; 2] = [
    0xe320f003, // wfi
    0xeafffffd, // b <wfi>
];

/// Little-endian bytes of [SECONDARY_STUB].
pub fn secondary_boot_stub() -> Vec<u8> {
    SECONDARY_STUB
        .iter()
        .flat_map(|insn| LittleEndian32::from_value(*insn).to_bytes())
        .collect()
}

/// Where and what secondary CPUs execute until released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecondaryBoot {
    pub entry: u64,
    pub bootreg: u64,
    pub stub: Vec<u8>,
}

impl SecondaryBoot {
    pub fn parked_at(entry: u64, bootreg: u64) -> SecondaryBoot {
        SecondaryBoot {
            entry,
            bootreg,
            stub: secondary_boot_stub(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootInfo {
    pub loader_start: u64,
    pub ram_size: u64,
    pub kernel: Option<PathBuf>,
    pub initrd: Option<PathBuf>,
    pub cmdline: Option<String>,
    pub cpu_count: u32,
    pub secondary: Option<SecondaryBoot>,
    pub board_id: u32,
    pub secure_boot: bool,
    /// Flattened tree for the guest, if any.
    pub dtb: Option<Vec<u8>>,
}

/// The external collaborator placing kernel, initrd and CPU entry points in guest memory.
pub trait KernelLoader {
    fn load(&mut self, info: &BootInfo) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// A [KernelLoader] that only logs what it would load.
#[derive(Debug, Default)]
pub struct LoggingLoader;

impl KernelLoader for LoggingLoader {
    fn load(&mut self, info: &BootInfo) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        log::info!(
            "Loading {:?} at {:#x}, {:#x} bytes of RAM, {} CPU(s)",
            info.kernel,
            info.loader_start,
            info.ram_size,
            info.cpu_count
        );
        Ok(())
    }
}
