// Conflict classification: assign each conflicted file a type and a
// resolution complexity, from the three-way contents alone

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::git::ConflictEntry;

/// What kind of divergence produced the conflict
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// Sides differ only in whitespace or formatting
    Trivial,
    /// Disjoint edits colliding on adjacent lines
    Parallel,
    /// One side's edit builds on the other's (superset)
    Dependent,
    /// File deleted, moved or reorganized on one side
    Structural,
    /// Both sides edited the same lines to different effect
    Semantic,
    /// Binary content, no line-level resolution possible
    Binary,
}

/// How much human involvement a resolution needs
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionComplexity {
    Auto,
    Assisted,
    Manual,
}

impl ConflictType {
    pub fn complexity(&self) -> ResolutionComplexity {
        match self {
            ConflictType::Trivial | ConflictType::Dependent => ResolutionComplexity::Auto,
            ConflictType::Parallel | ConflictType::Semantic => ResolutionComplexity::Assisted,
            ConflictType::Structural | ConflictType::Binary => ResolutionComplexity::Manual,
        }
    }
}

/// One classified merge conflict. A deleted side carries an empty string;
/// `base_content` is `None` when both sides added the path independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub file: String,
    pub ours_content: String,
    pub theirs_content: String,
    pub base_content: Option<String>,
    pub conflict_type: ConflictType,
    pub resolution_complexity: ResolutionComplexity,
    pub suggested_resolution: Option<String>,
}

impl Conflict {
    pub fn is_auto(&self) -> bool {
        self.resolution_complexity == ResolutionComplexity::Auto
    }
}

/// Aggregate view of a conflict set, for logging and review prompts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictSummary {
    pub total_conflicts: usize,
    pub auto_resolvable: usize,
    pub assisted: usize,
    pub manual_required: usize,
    pub conflicts_by_type: HashMap<ConflictType, usize>,
}

impl ConflictSummary {
    pub fn from_conflicts(conflicts: &[Conflict]) -> Self {
        let mut by_type = HashMap::new();
        let mut auto = 0;
        let mut assisted = 0;
        let mut manual = 0;

        for conflict in conflicts {
            *by_type.entry(conflict.conflict_type).or_insert(0) += 1;
            match conflict.resolution_complexity {
                ResolutionComplexity::Auto => auto += 1,
                ResolutionComplexity::Assisted => assisted += 1,
                ResolutionComplexity::Manual => manual += 1,
            }
        }

        Self {
            total_conflicts: conflicts.len(),
            auto_resolvable: auto,
            assisted,
            manual_required: manual,
            conflicts_by_type: by_type,
        }
    }
}

/// Classify one conflicted index entry
pub fn classify(entry: &ConflictEntry) -> Conflict {
    let conflict_type = classify_type(entry);

    Conflict {
        file: entry.path.clone(),
        ours_content: entry.our_content.clone().unwrap_or_default(),
        theirs_content: entry.their_content.clone().unwrap_or_default(),
        base_content: entry.ancestor_content.clone(),
        conflict_type,
        resolution_complexity: conflict_type.complexity(),
        suggested_resolution: None,
    }
}

/// Classify a whole conflict set
pub fn classify_all(entries: &[ConflictEntry]) -> Vec<Conflict> {
    entries.iter().map(classify).collect()
}

fn classify_type(entry: &ConflictEntry) -> ConflictType {
    if entry.is_binary {
        return ConflictType::Binary;
    }

    // A missing side means deletion or rename: the line-level heuristics
    // below have nothing to compare
    let (ours, theirs) = match (&entry.our_content, &entry.their_content) {
        (Some(o), Some(t)) => (o.as_str(), t.as_str()),
        _ => return ConflictType::Structural,
    };

    if normalize_whitespace(ours) == normalize_whitespace(theirs) {
        return ConflictType::Trivial;
    }

    if is_line_superset(theirs, ours) || is_line_superset(ours, theirs) {
        return ConflictType::Dependent;
    }

    // With a common base we can tell disjoint edits (each side changed
    // different lines) from a genuine behavioral divergence
    if let Some(base) = &entry.ancestor_content {
        let ours_changed = changed_lines(base, ours);
        let theirs_changed = changed_lines(base, theirs);
        if ours_changed.is_disjoint(&theirs_changed) {
            return ConflictType::Parallel;
        }
    }

    ConflictType::Semantic
}

/// Collapse each line's whitespace so formatting-only divergence compares
/// equal. Blank lines drop out entirely.
fn normalize_whitespace(content: &str) -> Vec<String> {
    content
        .lines()
        .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|l| !l.is_empty())
        .collect()
}

/// True when every line of `sub` appears in `sup` in the same order, i.e.
/// `sup` is `sub` plus insertions
pub(crate) fn is_line_superset(sup: &str, sub: &str) -> bool {
    if sup == sub {
        return false;
    }

    let sup_lines: Vec<&str> = sup.lines().collect();
    let sub_lines: Vec<&str> = sub.lines().collect();
    if sub_lines.len() >= sup_lines.len() {
        return false;
    }

    let mut pos = 0;
    for line in &sub_lines {
        match sup_lines[pos..].iter().position(|l| l == line) {
            Some(offset) => pos += offset + 1,
            None => return false,
        }
    }
    true
}

/// Line numbers (in the base) whose content the side changed or removed,
/// plus a marker past the end for pure appends
fn changed_lines(base: &str, side: &str) -> std::collections::HashSet<usize> {
    let base_lines: Vec<&str> = base.lines().collect();
    let side_lines: Vec<&str> = side.lines().collect();
    let mut changed = std::collections::HashSet::new();

    for (i, base_line) in base_lines.iter().enumerate() {
        if side_lines.get(i) != Some(base_line) {
            changed.insert(i);
        }
    }
    if side_lines.len() > base_lines.len() {
        changed.insert(base_lines.len());
    }
    changed
}
