//! Error types of a machine build.
//!
//! Every error is fatal at machine-build granularity: the build stops at the first one and the
//! caller decides whether to terminate.

use core::fmt::{self, Display};
use std::path::PathBuf;

use dt::{FdtError, TreeError};

use crate::memory::MemoryError;

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// The machine was asked for something it cannot be: no description source, an unknown
    /// machine name, a required node or object missing.
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("malformed hardware description '{source_name}': {source}")]
    Parse {
        source_name: String,
        #[source]
        source: FdtError,
    },
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error("unable to read '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{} pending binding(s) never resolved: {}", .unresolved.len(), list(.unresolved))]
    UnresolvedDependency { unresolved: Vec<Unresolved> },
    #[error("builder for '{node}' failed: {source}")]
    Builder {
        node: String,
        #[source]
        source: DeviceError,
    },
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error("kernel loader failed: {0}")]
    KernelLoader(#[source] Box<dyn std::error::Error + Send + Sync>),
}

fn list(unresolved: &[Unresolved]) -> String {
    unresolved
        .iter()
        .map(|u| u.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// A pending binding left over after the instantiation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unresolved {
    pub node: String,
    pub waits_for: String,
    pub reason: UnresolvedReason,
}

impl Display for Unresolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' waits for '{}' ({})", self.node, self.waits_for, self.reason)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnresolvedReason {
    /// The awaited path is not in the tree and nothing registered it.
    Absent,
    /// Following the wait chain leads back to the waiting node.
    Cycle,
    /// The path exists but no builder produced an object for it.
    NeverBuilt,
}

impl Display for UnresolvedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnresolvedReason::Absent => "absent from the tree",
            UnresolvedReason::Cycle => "dependency cycle",
            UnresolvedReason::NeverBuilt => "never built",
        })
    }
}

/// Errors raised by builders and by the device collaborator.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("unknown device kind '{kind}'")]
    UnknownKind { kind: String },
    #[error("invalid property '{name}' for '{kind}': {reason}")]
    InvalidProperty {
        kind: String,
        name: String,
        reason: String,
    },
    #[error("node '{path}' lacks the '{name}' property")]
    MissingProperty { path: String, name: String },
    #[error("object at '{path}' is not a memory region")]
    NotARegion { path: String },
    #[error("node '{path}' has no parent")]
    Detached { path: String },
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error(transparent)]
    Memory(#[from] MemoryError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresolved_bindings_are_listed() {
        let err = BuildError::UnresolvedDependency {
            unresolved: vec![
                Unresolved {
                    node: "/a".into(),
                    waits_for: "/nowhere".into(),
                    reason: UnresolvedReason::Absent,
                },
                Unresolved {
                    node: "/b".into(),
                    waits_for: "/c".into(),
                    reason: UnresolvedReason::Cycle,
                },
            ],
        };
        assert_eq!(
            err.to_string(),
            "2 pending binding(s) never resolved: '/a' waits for '/nowhere' (absent from the \
             tree), '/b' waits for '/c' (dependency cycle)"
        );
    }
}
