//! Dependency-ordered instantiation of the tree's device objects.
//!
//! One pre-order pass over a snapshot of the node paths. Every registration is followed by a
//! drain of the pending bindings whose awaited object now exists, so cascades resolve at once.
//! Each binding is resumed at most once; whatever is still pending after the pass can never
//! resolve and is reported as [BuildError::UnresolvedDependency].

use std::collections::BTreeSet;

use dt::DeviceTree;

use crate::{
    debug_ex,
    devices::{
        builder::{BuildContext, BuildOutcome, BuilderTable, NodeView, PendingBinding, Selected},
        object::DeviceRegistry,
    },
    error::{BuildError, Unresolved, UnresolvedReason},
    memory::AddressSpace,
};

/// Number of objects registered and bindings resumed by a pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InstantiationReport {
    pub visited: usize,
    pub built: usize,
    pub resumed: usize,
}

pub fn instantiate(
    tree: &DeviceTree,
    table: &BuilderTable<'_>,
    space: &mut AddressSpace,
    registry: &mut DeviceRegistry,
) -> Result<InstantiationReport, BuildError> {
    let mut ctx = BuildContext {
        tree,
        space,
        registry,
        factory: table.factory(),
    };
    let mut pending: Vec<PendingBinding> = vec![];
    let mut report = InstantiationReport::default();

    let snapshot = tree.paths();
    for path in snapshot.iter() {
        let Some(node) = tree.get_node(path) else {
            continue;
        };
        report.visited += 1;
        let view = NodeView { path, node, tree };
        let builder_err = |source| BuildError::Builder {
            node: path.clone(),
            source,
        };
        let outcome = match table.select(node) {
            None => {
                log::trace!("No builder for {path}");
                continue;
            }
            Some(Selected::Builder(builder)) => {
                debug_ex!("Building {path} with '{}'", builder.name());
                builder.build(&view, &mut ctx).map_err(builder_err)?
            }
            Some(Selected::Factory(factory, kind)) => {
                debug_ex!("Creating {kind} for {path}");
                BuildOutcome::Built(
                    factory
                        .create(kind, &node.full_name, &node.props)
                        .map_err(builder_err)?,
                )
            }
        };
        match outcome {
            BuildOutcome::Built(handle) => {
                ctx.register(path, handle);
                report.built += 1;
            }
            BuildOutcome::Deferred { handle, binding } => {
                ctx.register(path, handle);
                report.built += 1;
                defer(&mut pending, binding, tree);
            }
            BuildOutcome::Waiting(binding) => defer(&mut pending, binding, tree),
            BuildOutcome::Skipped => {}
        }
        report.resumed += drain(&mut pending, &mut ctx)?;
    }

    if !pending.is_empty() {
        let unresolved = diagnose(&pending, tree, ctx.registry);
        for u in unresolved.iter() {
            log::error!("Unresolved binding: {u}");
        }
        return Err(BuildError::UnresolvedDependency { unresolved });
    }
    log::info!(
        "Instantiated {} objects from {} nodes ({} deferred bindings)",
        report.built,
        report.visited,
        report.resumed
    );
    Ok(report)
}

fn defer(pending: &mut Vec<PendingBinding>, mut binding: PendingBinding, tree: &DeviceTree) {
    if let Some(canonical) = tree.canonical_path(&binding.waits_for) {
        binding.waits_for = canonical;
    }
    debug_ex!("{} waits for {}", binding.node, binding.waits_for);
    pending.push(binding);
}

/// Resume every binding whose awaited object exists, until none is ready.
fn drain(pending: &mut Vec<PendingBinding>, ctx: &mut BuildContext<'_>) -> Result<usize, BuildError> {
    let mut resumed = 0;
    while let Some(idx) = pending
        .iter()
        .position(|b| ctx.registry.contains(&b.waits_for))
    {
        let binding = pending.remove(idx);
        let Some(target) = ctx.registry.get(&binding.waits_for).cloned() else {
            continue;
        };
        debug_ex!("Resuming {} on {}", binding.node, binding.waits_for);
        (binding.resume)(target, ctx).map_err(|source| BuildError::Builder {
            node: binding.node.clone(),
            source,
        })?;
        resumed += 1;
    }
    Ok(resumed)
}

fn diagnose(pending: &[PendingBinding], tree: &DeviceTree, registry: &DeviceRegistry) -> Vec<Unresolved> {
    pending
        .iter()
        .map(|binding| {
            let reason = if in_cycle(pending, binding) {
                UnresolvedReason::Cycle
            } else if !tree.contains(&binding.waits_for) && !registry.contains(&binding.waits_for)
            {
                UnresolvedReason::Absent
            } else {
                UnresolvedReason::NeverBuilt
            };
            Unresolved {
                node: binding.node.clone(),
                waits_for: binding.waits_for.clone(),
                reason,
            }
        })
        .collect()
}

/// Whether following the wait chain from `binding` leads back to its own node.
fn in_cycle(pending: &[PendingBinding], binding: &PendingBinding) -> bool {
    let mut seen = BTreeSet::new();
    let mut current = binding.waits_for.as_str();
    while seen.insert(current) {
        if current == binding.node {
            return true;
        }
        match pending.iter().find(|b| b.node == current) {
            Some(next) => current = next.waits_for.as_str(),
            None => return false,
        }
    }
    false
}
