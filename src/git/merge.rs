// In-memory merge primitives. Integration merges never touch a working
// tree: merge_commits produces an index, resolutions are staged as blobs,
// and the result is committed directly onto the integration branch ref.
// The target branch is only ever moved by a single fast-forward.

use git2::{build::CheckoutBuilder, Error as GitError, Index, IndexEntry, IndexTime, Oid};
use std::path::Path;

use crate::git::types::ConflictEntry;
use crate::git::GitManager;

impl GitManager {
    /// Merge two commits into an in-memory index. The repository working
    /// tree and HEAD are untouched.
    pub fn merge_commits_index(&self, ours: Oid, theirs: Oid) -> Result<Index, GitError> {
        let our_commit = self.repo.find_commit(ours)?;
        let their_commit = self.repo.find_commit(theirs)?;
        self.repo.merge_commits(&our_commit, &their_commit, None)
    }

    /// Conflict paths from a trial merge of two branch tips. Read-only:
    /// no refs move, nothing is checked out.
    pub fn trial_merge(&self, ours_branch: &str, theirs_branch: &str) -> Result<Vec<String>, GitError> {
        let ours = self.branch_tip(ours_branch)?;
        let theirs = self.branch_tip(theirs_branch)?;
        let index = self.merge_commits_index(ours, theirs)?;

        let mut conflict_files = Vec::new();
        if index.has_conflicts() {
            for conflict in index.conflicts()? {
                let conflict = conflict?;
                if let Some(entry) = conflict.our.or(conflict.their).or(conflict.ancestor) {
                    conflict_files.push(String::from_utf8_lossy(&entry.path).to_string());
                }
            }
        }

        Ok(conflict_files)
    }

    /// Extract full three-way content for every conflict in an index.
    /// Sides that deleted the file come back as `None`.
    pub fn conflict_entries(&self, index: &Index) -> Result<Vec<ConflictEntry>, GitError> {
        if !index.has_conflicts() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for conflict in index.conflicts()? {
            let conflict = conflict?;

            let path = conflict
                .our
                .as_ref()
                .or(conflict.their.as_ref())
                .or(conflict.ancestor.as_ref())
                .map(|e| String::from_utf8_lossy(&e.path).to_string());
            let path = match path {
                Some(p) => p,
                None => continue,
            };

            let mut is_binary = false;
            let mut side = |entry: Option<&IndexEntry>| -> Result<Option<String>, GitError> {
                match entry {
                    Some(entry) => {
                        let blob = self.repo.find_blob(entry.id)?;
                        if blob.is_binary() {
                            is_binary = true;
                        }
                        Ok(Some(String::from_utf8_lossy(blob.content()).to_string()))
                    }
                    None => Ok(None),
                }
            };

            let our_content = side(conflict.our.as_ref())?;
            let their_content = side(conflict.their.as_ref())?;
            let ancestor_content = side(conflict.ancestor.as_ref())?;

            entries.push(ConflictEntry {
                path,
                our_content,
                their_content,
                ancestor_content,
                is_binary,
            });
        }

        log::info!("[Git] Extracted {} conflict(s) from merge index", entries.len());
        Ok(entries)
    }

    /// Stage resolved content for one conflicted path in an in-memory index.
    /// The content is written as a blob; the working tree is not involved.
    pub fn resolve_in_index(
        &self,
        index: &mut Index,
        path: &str,
        content: &str,
    ) -> Result<(), GitError> {
        let blob_id = self.repo.blob(content.as_bytes())?;

        index.remove_path(Path::new(path))?;

        let entry = IndexEntry {
            ctime: IndexTime::new(0, 0),
            mtime: IndexTime::new(0, 0),
            dev: 0,
            ino: 0,
            mode: 0o100644,
            uid: 0,
            gid: 0,
            file_size: content.len() as u32,
            id: blob_id,
            flags: 0,
            flags_extended: 0,
            path: path.as_bytes().to_vec(),
        };
        index.add(&entry)?;

        log::info!("[Git] Staged resolution for: {}", path);
        Ok(())
    }

    /// Write the merged index as a tree and commit it onto the named ref.
    /// Fails if unresolved conflicts remain.
    pub fn commit_merge_on_ref(
        &self,
        refname: &str,
        index: &mut Index,
        message: &str,
        parents: &[Oid],
    ) -> Result<Oid, GitError> {
        if index.has_conflicts() {
            return Err(GitError::from_str(
                "Cannot commit merge: unresolved conflicts remain",
            ));
        }

        let tree_id = index.write_tree_to(&self.repo)?;
        let tree = self.repo.find_tree(tree_id)?;

        let parent_commits = parents
            .iter()
            .map(|oid| self.repo.find_commit(*oid))
            .collect::<Result<Vec<_>, _>>()?;
        let parent_refs: Vec<_> = parent_commits.iter().collect();

        let signature = self.signature()?;
        let commit_id = self.repo.commit(
            Some(refname),
            &signature,
            &signature,
            message,
            &tree,
            &parent_refs,
        )?;

        log::info!("[Git] Committed merge {} onto {}", commit_id, refname);
        Ok(commit_id)
    }

    /// Move a branch to a descendant commit in one ref update. Refuses
    /// anything that is not a fast-forward. If the branch is checked out in
    /// the main worktree, the working tree is updated to match.
    pub fn fast_forward(&self, branch: &str, to: Oid) -> Result<(), GitError> {
        let refname = format!("refs/heads/{}", branch);
        let mut reference = self.repo.find_reference(&refname)?;
        let current = reference.peel_to_commit()?.id();

        if current != to && !self.repo.graph_descendant_of(to, current)? {
            return Err(GitError::from_str(&format!(
                "Refusing non-fast-forward update of {} ({} -> {})",
                branch, current, to
            )));
        }

        reference.set_target(to, &format!("Fast-forward {} to {}", branch, to))?;

        let head_is_branch = self
            .repo
            .head()
            .ok()
            .and_then(|h| h.shorthand().map(|s| s == branch))
            .unwrap_or(false);
        if head_is_branch && self.repo.workdir().is_some() {
            self.repo
                .checkout_head(Some(CheckoutBuilder::default().force()))?;
        }

        log::info!("[Git] Fast-forwarded {} to {}", branch, to);
        Ok(())
    }

    /// Best common ancestor of two commits
    pub fn merge_base(&self, a: Oid, b: Oid) -> Result<Oid, GitError> {
        self.repo.merge_base(a, b)
    }

    /// Paths changed between two commits' trees
    pub fn changed_files_between(&self, base: Oid, tip: Oid) -> Result<Vec<String>, GitError> {
        let base_tree = self.repo.find_commit(base)?.tree()?;
        let tip_tree = self.repo.find_commit(tip)?.tree()?;

        let diff = self
            .repo
            .diff_tree_to_tree(Some(&base_tree), Some(&tip_tree), None)?;

        let mut files = Vec::new();
        for delta in diff.deltas() {
            let path = delta
                .new_file()
                .path()
                .or_else(|| delta.old_file().path())
                .map(|p| p.to_string_lossy().to_string());
            if let Some(path) = path {
                files.push(path);
            }
        }

        Ok(files)
    }
}
