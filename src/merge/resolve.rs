// Deterministic auto-resolution for conflicts classified `auto`.
// Anything that cannot be resolved here is downgraded to review.

use crate::merge::classify::{is_line_superset, Conflict, ConflictType, ResolutionComplexity};

/// Fill `suggested_resolution` for every auto conflict in place. An auto
/// conflict the rules cannot decide is demoted to `assisted` so it reaches
/// review instead of merging unresolved. Returns how many were resolved.
pub fn resolve_auto_conflicts(conflicts: &mut [Conflict]) -> usize {
    let mut resolved = 0;

    for conflict in conflicts.iter_mut() {
        if !conflict.is_auto() || conflict.suggested_resolution.is_some() {
            continue;
        }

        let suggestion = match conflict.conflict_type {
            ConflictType::Trivial => Some(resolve_trivial(conflict)),
            ConflictType::Dependent => resolve_dependent(conflict),
            _ => None,
        };

        match suggestion {
            Some(content) => {
                conflict.suggested_resolution = Some(content);
                resolved += 1;
            }
            None => {
                log::warn!(
                    "[Merge] Auto rule undecided for {}, leaving for review",
                    conflict.file
                );
                conflict.resolution_complexity = ResolutionComplexity::Assisted;
            }
        }
    }

    resolved
}

/// Whitespace-only divergence: keep the side that actually changed
/// relative to the base. When both reformatted (or there is no base) the
/// sides are equivalent anyway, so ours wins.
fn resolve_trivial(conflict: &Conflict) -> String {
    match &conflict.base_content {
        Some(base) if conflict.ours_content == *base => conflict.theirs_content.clone(),
        _ => conflict.ours_content.clone(),
    }
}

/// Superset edits: the side containing every line of the other carries
/// both changes, so it is the merged result.
fn resolve_dependent(conflict: &Conflict) -> Option<String> {
    if is_line_superset(&conflict.theirs_content, &conflict.ours_content) {
        Some(conflict.theirs_content.clone())
    } else if is_line_superset(&conflict.ours_content, &conflict.theirs_content) {
        Some(conflict.ours_content.clone())
    } else {
        None
    }
}
