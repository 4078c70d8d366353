use std::path::{Path, PathBuf};

use config::{zynq7000, zynqmp};

/// Default CPU model when the request names none.
pub const DEFAULT_CPU_MODEL: &str = "cortex-a9";

/// The two platform parameters of the low/high RAM split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    /// Largest RAM size that fits below the high-RAM hole.
    pub low_ram_ceiling: u64,
    /// Where RAM beyond the ceiling starts.
    pub high_ram_base: u64,
}

impl Platform {
    pub const fn zynqmp() -> Platform {
        Platform {
            low_ram_ceiling: zynqmp::MAX_LOW_RAM_SIZE,
            high_ram_base: zynqmp::HIGH_RAM_START,
        }
    }

    pub const fn zynq7000() -> Platform {
        Platform {
            low_ram_ceiling: zynq7000::LOW_RAM_CEILING,
            high_ram_base: zynq7000::HIGH_RAM_BASE,
        }
    }
}

/// What the user asked the machine to be. Immutable once handed to a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineRequest {
    ram_size: u64,
    platform: Option<Platform>,
    cpu_model: String,
    cpu_count: u32,
    nic_count: u32,
    kernel: Option<PathBuf>,
    initrd: Option<PathBuf>,
    cmdline: Option<String>,
}

impl MachineRequest {
    pub fn new(ram_size: u64) -> MachineRequest {
        MachineRequest {
            ram_size,
            platform: None,
            cpu_model: DEFAULT_CPU_MODEL.to_string(),
            cpu_count: 1,
            nic_count: 0,
            kernel: None,
            initrd: None,
            cmdline: None,
        }
    }

    /// Override the machine's own RAM split parameters.
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn with_cpu_model(mut self, model: &str) -> Self {
        self.cpu_model = model.to_string();
        self
    }

    pub fn with_cpu_count(mut self, count: u32) -> Self {
        self.cpu_count = count;
        self
    }

    /// Network interfaces for boards with a fixed device table.
    pub fn with_nics(mut self, count: u32) -> Self {
        self.nic_count = count;
        self
    }

    pub fn with_kernel(mut self, path: impl Into<PathBuf>) -> Self {
        self.kernel = Some(path.into());
        self
    }

    pub fn with_initrd(mut self, path: impl Into<PathBuf>) -> Self {
        self.initrd = Some(path.into());
        self
    }

    pub fn with_cmdline(mut self, cmdline: &str) -> Self {
        self.cmdline = Some(cmdline.to_string());
        self
    }

    pub fn ram_size(&self) -> u64 {
        self.ram_size
    }

    pub fn platform(&self) -> Option<Platform> {
        self.platform
    }

    pub fn cpu_model(&self) -> &str {
        &self.cpu_model
    }

    pub fn cpu_count(&self) -> u32 {
        self.cpu_count
    }

    pub fn nic_count(&self) -> u32 {
        self.nic_count
    }

    pub fn kernel(&self) -> Option<&Path> {
        self.kernel.as_deref()
    }

    pub fn initrd(&self) -> Option<&Path> {
        self.initrd.as_deref()
    }

    pub fn cmdline(&self) -> Option<&str> {
        self.cmdline.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_a9_boards() {
        let req = MachineRequest::new(0x4000_0000);
        assert_eq!(req.cpu_model(), "cortex-a9");
        assert_eq!(req.cpu_count(), 1);
        assert!(req.kernel().is_none());
        assert_eq!(req.platform(), None);

        let req = req.with_kernel("/boot/zImage").with_cmdline("console=ttyPS0");
        assert_eq!(req.kernel(), Some(Path::new("/boot/zImage")));
        assert_eq!(req.cmdline(), Some("console=ttyPS0"));
        assert_eq!(Platform::zynqmp().low_ram_ceiling, 0x8000_0000);
    }
}
