//! Board constants.
//! Values are declared per platform in `platform_flags.json` at the workspace root and turned into
//! `pub const` items by the build script, one module per platform.

include!(concat!(env!("OUT_DIR"), "/platform_flags.rs"));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_constants_match_the_board_manuals() {
        assert_eq!(zynq7000::MPCORE_PERIPHBASE, 0xF8F0_0000);
        assert_eq!(zynq7000::OCM_BASE + zynq7000::OCM_SIZE, 0x1_0000_0000);
        assert_eq!(zynqmp::HIGH_RAM_START, 0x8_0000_0000);
        assert_eq!(zynqmp::MAX_LOW_RAM_SIZE, 0x8000_0000);
        assert_eq!(legacy_zynq::MAX_RAM_SIZE, 0x8000_0000);
        assert_eq!(legacy_zynq::BOARD_ID, 0xD32);
        // plain JSON integers are accepted next to hex strings
        assert_eq!(zynq7000::MAX_CPUS, 4);
        assert_eq!(zynqmp::MAX_CPUS, 4);
    }
}
