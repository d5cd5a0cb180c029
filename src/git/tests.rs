// Tests for GitManager

#[cfg(test)]
mod tests {
    use crate::git::GitManager;
    use git2::{BranchType, Oid, Repository, Signature};
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn setup_test_repo() -> (TempDir, GitManager) {
        let temp_dir = TempDir::new().unwrap();
        let repo_path = temp_dir.path();

        let repo = Repository::init(repo_path).unwrap();

        let sig = Signature::now("Test User", "test@example.com").unwrap();
        let tree_id = {
            let mut index = repo.index().unwrap();

            let test_file = repo_path.join("shared.txt");
            fs::write(&test_file, "line one\nline two\nline three\n").unwrap();
            index.add_path(Path::new("shared.txt")).unwrap();
            index.write().unwrap();
            index.write_tree().unwrap()
        };

        let tree = repo.find_tree(tree_id).unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "Initial commit", &tree, &[])
            .unwrap();

        let manager = GitManager::new(repo_path).unwrap();
        (temp_dir, manager)
    }

    /// Commit a file onto a branch ref without checking it out
    fn commit_file(manager: &GitManager, branch: &str, path: &str, content: &str) -> Oid {
        let repo = &manager.repo;
        let sig = Signature::now("Test User", "test@example.com").unwrap();

        let parent = repo
            .find_branch(branch, BranchType::Local)
            .unwrap()
            .get()
            .peel_to_commit()
            .unwrap();

        let mut builder = repo.treebuilder(Some(&parent.tree().unwrap())).unwrap();
        let blob = repo.blob(content.as_bytes()).unwrap();
        builder.insert(path, blob, 0o100644).unwrap();
        let tree_id = builder.write().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();

        repo.commit(
            Some(&format!("refs/heads/{}", branch)),
            &sig,
            &sig,
            &format!("Update {}", path),
            &tree,
            &[&parent],
        )
        .unwrap()
    }

    #[test]
    fn test_create_and_list_branches() {
        let (_temp_dir, manager) = setup_test_repo();

        manager.create_branch("agent/slot-0", false).unwrap();
        manager.create_branch("agent/slot-1", false).unwrap();

        let names: Vec<String> = manager
            .list_branches()
            .unwrap()
            .iter()
            .map(|b| b.name.clone())
            .collect();
        assert!(names.contains(&"agent/slot-0".to_string()));
        assert!(names.contains(&"agent/slot-1".to_string()));
    }

    #[test]
    fn test_branch_tip_follows_commits() {
        let (_temp_dir, manager) = setup_test_repo();

        manager.create_branch("work", false).unwrap();
        let before = manager.branch_tip("work").unwrap();
        let after = commit_file(&manager, "work", "new.txt", "content\n");

        assert_ne!(before, after);
        assert_eq!(manager.branch_tip("work").unwrap(), after);
    }

    #[test]
    fn test_create_and_remove_worktree() {
        let (temp_dir, manager) = setup_test_repo();

        let wt_path = temp_dir.path().join("worktrees").join("slot-0");
        fs::create_dir_all(wt_path.parent().unwrap()).unwrap();
        let info = manager
            .create_worktree("agent/slot-0", &wt_path)
            .unwrap();

        assert!(wt_path.exists());
        assert_eq!(info.branch.as_deref(), Some("agent/slot-0"));

        manager
            .remove_worktree(&wt_path.to_string_lossy())
            .unwrap();
        assert!(!wt_path.exists());
        assert!(manager.list_worktrees().unwrap().is_empty());
    }

    #[test]
    fn test_prune_orphaned_worktrees() {
        let (temp_dir, manager) = setup_test_repo();

        let wt_path = temp_dir.path().join("worktrees").join("slot-0");
        fs::create_dir_all(wt_path.parent().unwrap()).unwrap();
        manager.create_worktree("agent/slot-0", &wt_path).unwrap();

        fs::remove_dir_all(&wt_path).unwrap();
        let pruned = manager.prune_orphaned_worktrees().unwrap();
        assert_eq!(pruned, 1);
        assert!(manager.list_worktrees().unwrap().is_empty());
    }

    #[test]
    fn test_trial_merge_disjoint_files_is_clean() {
        let (_temp_dir, manager) = setup_test_repo();

        manager.create_branch("a", false).unwrap();
        manager.create_branch("b", false).unwrap();
        commit_file(&manager, "a", "a.txt", "from a\n");
        commit_file(&manager, "b", "b.txt", "from b\n");

        let conflicts = manager.trial_merge("a", "b").unwrap();
        assert!(conflicts.is_empty());
    }

    #[test]
    fn test_trial_merge_reports_conflicting_path() {
        let (_temp_dir, manager) = setup_test_repo();

        manager.create_branch("a", false).unwrap();
        manager.create_branch("b", false).unwrap();
        commit_file(&manager, "a", "shared.txt", "edited by a\n");
        commit_file(&manager, "b", "shared.txt", "edited by b\n");

        let conflicts = manager.trial_merge("a", "b").unwrap();
        assert_eq!(conflicts, vec!["shared.txt".to_string()]);
    }

    #[test]
    fn test_trial_merge_leaves_refs_untouched() {
        let (_temp_dir, manager) = setup_test_repo();

        manager.create_branch("a", false).unwrap();
        manager.create_branch("b", false).unwrap();
        commit_file(&manager, "a", "shared.txt", "edited by a\n");
        commit_file(&manager, "b", "shared.txt", "edited by b\n");

        let tip_a = manager.branch_tip("a").unwrap();
        let tip_b = manager.branch_tip("b").unwrap();
        let head = manager.repo.head().unwrap().peel_to_commit().unwrap().id();

        manager.trial_merge("a", "b").unwrap();

        assert_eq!(manager.branch_tip("a").unwrap(), tip_a);
        assert_eq!(manager.branch_tip("b").unwrap(), tip_b);
        assert_eq!(
            manager.repo.head().unwrap().peel_to_commit().unwrap().id(),
            head
        );
    }

    #[test]
    fn test_conflict_entries_carry_three_way_content() {
        let (_temp_dir, manager) = setup_test_repo();

        manager.create_branch("a", false).unwrap();
        manager.create_branch("b", false).unwrap();
        let tip_a = commit_file(&manager, "a", "shared.txt", "edited by a\n");
        let tip_b = commit_file(&manager, "b", "shared.txt", "edited by b\n");

        let index = manager.merge_commits_index(tip_a, tip_b).unwrap();
        let entries = manager.conflict_entries(&index).unwrap();

        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.path, "shared.txt");
        assert_eq!(entry.our_content.as_deref(), Some("edited by a\n"));
        assert_eq!(entry.their_content.as_deref(), Some("edited by b\n"));
        assert_eq!(
            entry.ancestor_content.as_deref(),
            Some("line one\nline two\nline three\n")
        );
        assert!(!entry.is_binary);
    }

    #[test]
    fn test_conflict_entries_deletion_side_is_none() {
        let (_temp_dir, manager) = setup_test_repo();

        manager.create_branch("a", false).unwrap();
        manager.create_branch("b", false).unwrap();

        // a edits the file, b deletes it
        let tip_a = commit_file(&manager, "a", "shared.txt", "edited by a\n");
        let tip_b = {
            let repo = &manager.repo;
            let sig = Signature::now("Test User", "test@example.com").unwrap();
            let parent = repo
                .find_branch("b", BranchType::Local)
                .unwrap()
                .get()
                .peel_to_commit()
                .unwrap();
            let mut builder = repo.treebuilder(Some(&parent.tree().unwrap())).unwrap();
            builder.remove("shared.txt").unwrap();
            let tree = repo.find_tree(builder.write().unwrap()).unwrap();
            repo.commit(
                Some("refs/heads/b"),
                &sig,
                &sig,
                "Delete shared.txt",
                &tree,
                &[&parent],
            )
            .unwrap()
        };

        let index = manager.merge_commits_index(tip_a, tip_b).unwrap();
        let entries = manager.conflict_entries(&index).unwrap();

        assert_eq!(entries.len(), 1);
        assert!(entries[0].our_content.is_some());
        assert!(entries[0].their_content.is_none());
    }

    #[test]
    fn test_resolve_and_commit_merge_on_ref() {
        let (_temp_dir, manager) = setup_test_repo();

        manager.create_branch("a", false).unwrap();
        manager.create_branch("b", false).unwrap();
        let tip_a = commit_file(&manager, "a", "shared.txt", "edited by a\n");
        let tip_b = commit_file(&manager, "b", "shared.txt", "edited by b\n");

        let mut index = manager.merge_commits_index(tip_a, tip_b).unwrap();
        assert!(index.has_conflicts());

        manager
            .resolve_in_index(&mut index, "shared.txt", "resolved\n")
            .unwrap();
        assert!(!index.has_conflicts());

        manager.create_branch_at("integration/s1", tip_a, false).unwrap();
        let merge_commit = manager
            .commit_merge_on_ref(
                "refs/heads/integration/s1",
                &mut index,
                "Merge branch 'b'",
                &[tip_a, tip_b],
            )
            .unwrap();

        assert_eq!(manager.branch_tip("integration/s1").unwrap(), merge_commit);

        // The resolution landed in the merge commit's tree
        let commit = manager.repo.find_commit(merge_commit).unwrap();
        let tree = commit.tree().unwrap();
        let entry = tree.get_path(Path::new("shared.txt")).unwrap();
        let blob = manager.repo.find_blob(entry.id()).unwrap();
        assert_eq!(blob.content(), b"resolved\n");
    }

    #[test]
    fn test_commit_merge_with_conflicts_rejected() {
        let (_temp_dir, manager) = setup_test_repo();

        manager.create_branch("a", false).unwrap();
        manager.create_branch("b", false).unwrap();
        let tip_a = commit_file(&manager, "a", "shared.txt", "edited by a\n");
        let tip_b = commit_file(&manager, "b", "shared.txt", "edited by b\n");

        let mut index = manager.merge_commits_index(tip_a, tip_b).unwrap();
        let result = manager.commit_merge_on_ref(
            "refs/heads/integration/s1",
            &mut index,
            "Merge branch 'b'",
            &[tip_a, tip_b],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_fast_forward_moves_branch() {
        let (_temp_dir, manager) = setup_test_repo();

        let target = manager.get_default_branch_name();
        manager.create_branch("integration/s1", false).unwrap();
        let tip = commit_file(&manager, "integration/s1", "done.txt", "done\n");

        manager.fast_forward(&target, tip).unwrap();
        assert_eq!(manager.branch_tip(&target).unwrap(), tip);
    }

    #[test]
    fn test_fast_forward_refuses_divergent_commit() {
        let (_temp_dir, manager) = setup_test_repo();

        let target = manager.get_default_branch_name();
        manager.create_branch("side", false).unwrap();
        let side_tip = commit_file(&manager, "side", "side.txt", "side\n");

        // Advance the target so the side branch is no longer a descendant
        commit_file(&manager, &target, "target.txt", "target\n");

        assert!(manager.fast_forward(&target, side_tip).is_err());
    }

    #[test]
    fn test_integration_rollback_leaves_target_untouched() {
        let (_temp_dir, manager) = setup_test_repo();

        let target = manager.get_default_branch_name();
        let target_tip_before = manager.branch_tip(&target).unwrap();

        manager.create_branch("a", false).unwrap();
        let tip_a = commit_file(&manager, "a", "a.txt", "from a\n");

        // Integration branch accumulates a merge, then is discarded
        manager
            .create_branch_at("integration/s1", target_tip_before, false)
            .unwrap();
        let mut index = manager
            .merge_commits_index(target_tip_before, tip_a)
            .unwrap();
        manager
            .commit_merge_on_ref(
                "refs/heads/integration/s1",
                &mut index,
                "Merge branch 'a'",
                &[target_tip_before, tip_a],
            )
            .unwrap();

        manager.delete_branch("integration/s1").unwrap();

        assert_eq!(manager.branch_tip(&target).unwrap(), target_tip_before);
        assert!(!manager.branch_exists("integration/s1"));
    }

    #[test]
    fn test_changed_files_between_commits() {
        let (_temp_dir, manager) = setup_test_repo();

        let target = manager.get_default_branch_name();
        let base = manager.branch_tip(&target).unwrap();

        manager.create_branch("work", false).unwrap();
        commit_file(&manager, "work", "one.txt", "1\n");
        let tip = commit_file(&manager, "work", "two.txt", "2\n");

        let mut files = manager.changed_files_between(base, tip).unwrap();
        files.sort();
        assert_eq!(files, vec!["one.txt".to_string(), "two.txt".to_string()]);
    }
}
