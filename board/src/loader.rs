//! Loading of the software and hardware descriptions.
//!
//! The software tree is what the guest kernel receives; the hardware tree drives device
//! construction. With only a software tree, or the same source twice, both roles are played by
//! one tree and the guest sees its mutated form.

use std::{
    fs,
    path::{Path, PathBuf},
};

use dt::DeviceTree;

use crate::error::BuildError;

/// Where a flattened tree comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeSource {
    File(PathBuf),
    /// An in-memory blob with a display name.
    Blob { name: String, bytes: Vec<u8> },
}

impl TreeSource {
    pub fn file(path: impl AsRef<Path>) -> TreeSource {
        TreeSource::File(path.as_ref().to_path_buf())
    }

    pub fn blob(name: &str, bytes: Vec<u8>) -> TreeSource {
        TreeSource::Blob {
            name: name.to_string(),
            bytes,
        }
    }

    pub fn name(&self) -> String {
        match self {
            TreeSource::File(path) => path.display().to_string(),
            TreeSource::Blob { name, .. } => name.clone(),
        }
    }

    fn read(&self) -> Result<Vec<u8>, BuildError> {
        match self {
            TreeSource::File(path) => fs::read(path).map_err(|source| BuildError::Io {
                path: path.clone(),
                source,
            }),
            TreeSource::Blob { bytes, .. } => Ok(bytes.clone()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeSources {
    pub software: Option<TreeSource>,
    pub hardware: Option<TreeSource>,
}

impl TreeSources {
    pub fn software(source: TreeSource) -> TreeSources {
        TreeSources {
            software: Some(source),
            hardware: None,
        }
    }

    pub fn with_hardware(mut self, source: TreeSource) -> TreeSources {
        self.hardware = Some(source);
        self
    }
}

#[derive(Debug, Clone)]
pub struct LoadedTrees {
    /// The tree devices are built from.
    pub hardware: DeviceTree,
    /// Untouched bytes of a distinct software tree.
    pub software: Option<Vec<u8>>,
    /// Whether the hardware tree is also the software tree.
    pub shared: bool,
}

fn parse(source: &TreeSource, bytes: &[u8]) -> Result<DeviceTree, BuildError> {
    let tree = DeviceTree::from_fdt(bytes).map_err(|source_err| BuildError::Parse {
        source_name: source.name(),
        source: source_err,
    })?;
    log::info!(
        "Loaded hardware description {} ({} nodes)",
        source.name(),
        tree.node_count()
    );
    Ok(tree)
}

pub fn load_effective_tree(sources: &TreeSources) -> Result<LoadedTrees, BuildError> {
    match (&sources.software, &sources.hardware) {
        (None, None) => Err(BuildError::Configuration(
            "no hardware description supplied".to_string(),
        )),
        (Some(sw), None) => Ok(LoadedTrees {
            hardware: parse(sw, &sw.read()?)?,
            software: None,
            shared: true,
        }),
        (Some(sw), Some(hw)) if sw == hw => Ok(LoadedTrees {
            hardware: parse(sw, &sw.read()?)?,
            software: None,
            shared: true,
        }),
        (sw, Some(hw)) => {
            // validate the software tree even though the guest gets it byte for byte
            let software = match sw {
                Some(sw) => {
                    let bytes = sw.read()?;
                    parse(sw, &bytes)?;
                    Some(bytes)
                }
                None => None,
            };
            Ok(LoadedTrees {
                hardware: parse(hw, &hw.read()?)?,
                software,
                shared: false,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(name: &str, node: &str) -> TreeSource {
        let mut tree = DeviceTree::new();
        tree.add_subnode("/", node).unwrap();
        TreeSource::blob(name, tree.to_fdt())
    }

    #[test]
    fn no_source_is_a_configuration_error() {
        assert!(matches!(
            load_effective_tree(&TreeSources::default()),
            Err(BuildError::Configuration(_))
        ));
    }

    #[test]
    fn software_only_is_shared() {
        let loaded = load_effective_tree(&TreeSources::software(blob("sw", "chosen"))).unwrap();
        assert!(loaded.shared);
        assert!(loaded.software.is_none());
        assert!(loaded.hardware.contains("/chosen"));
    }

    #[test]
    fn distinct_hardware_keeps_software_bytes() {
        let sw = blob("sw", "chosen");
        let TreeSource::Blob { bytes, .. } = sw.clone() else {
            unreachable!()
        };
        let loaded =
            load_effective_tree(&TreeSources::software(sw).with_hardware(blob("hw", "amba")))
                .unwrap();
        assert!(!loaded.shared);
        assert_eq!(loaded.software, Some(bytes));
        assert!(loaded.hardware.contains("/amba"));
        assert!(!loaded.hardware.contains("/chosen"));
    }

    #[test]
    fn malformed_blobs_are_parse_errors() {
        let sources = TreeSources::software(TreeSource::blob("junk", vec![0xde, 0xad]));
        assert!(matches!(
            load_effective_tree(&sources),
            Err(BuildError::Parse { .. })
        ));
    }
}
