//! Integration tests against the real inotify backend

#![cfg(target_os = "linux")]

mod common;

use common::Harness;
use std::fs;
use std::path::PathBuf;
use watcher::PathState;

#[test]
fn test_end_to_end_scenario() {
    let harness = Harness::start("proj");
    let root = harness.root.clone();

    fs::write(root.join("a"), b"first").unwrap();
    assert_eq!(harness.settle(), 1);

    fs::create_dir(root.join("sub")).unwrap();
    assert_eq!(harness.settle(), 1);
    assert_eq!(harness.watch.tree().state(&root.join("sub")), Some(PathState::Active));

    fs::write(root.join("sub/b"), b"second").unwrap();
    assert_eq!(harness.settle(), 1);

    assert_eq!(harness.watch.active_paths(), vec![root.clone(), root.join("sub")]);

    let registry = state::RootRegistry::load(&harness.state_dir()).unwrap();
    assert_eq!(registry.mapping().get(&root).map(String::as_str), Some("proj"));
}

#[test]
fn test_install_activates_existing_tree() {
    let harness = Harness::start("proj");
    let other = tempfile::TempDir::new().unwrap();
    for dir in ["x/y/z", "x/w", "v"] {
        fs::create_dir_all(other.path().join(dir)).unwrap();
    }
    fs::write(other.path().join("x/file.txt"), b"x").unwrap();

    let other_root = harness.watch.add_root(other.path(), "other").unwrap();

    // Checked right away, without waiting for any event
    let mut expected: Vec<PathBuf> = walkdir::WalkDir::new(&other_root)
        .into_iter()
        .map(|e| e.unwrap())
        .filter(|e| e.file_type().is_dir())
        .map(|e| e.into_path())
        .collect();
    expected.sort();

    let active: Vec<PathBuf> = harness
        .watch
        .active_paths()
        .into_iter()
        .filter(|p| p.starts_with(&other_root))
        .collect();
    assert_eq!(active, expected);
    assert_eq!(expected.len(), 6);
    assert!(harness.watch.tree().is_consistent());
}

#[test]
fn test_create_then_modify_is_one_notification() {
    let harness = Harness::start("proj");
    let file = harness.root.join("notes.txt");

    fs::write(&file, b"one").unwrap();
    fs::write(&file, b"two").unwrap();
    fs::write(&file, b"three").unwrap();

    assert_eq!(harness.settle(), 1);
}

#[test]
fn test_nested_creation_in_one_burst() {
    let harness = Harness::start("proj");
    let root = harness.root.clone();

    fs::create_dir_all(root.join("deep/er/still")).unwrap();
    fs::write(root.join("deep/er/still/file"), b"x").unwrap();

    assert_eq!(harness.settle(), 1);
    for dir in ["deep", "deep/er", "deep/er/still"] {
        assert_eq!(
            harness.watch.tree().state(&root.join(dir)),
            Some(PathState::Active),
            "{} not active",
            dir
        );
    }

    // Activity deep inside the new tree is seen
    fs::write(root.join("deep/er/still/file"), b"y").unwrap();
    assert_eq!(harness.settle(), 1);
}

#[test]
fn test_deleted_subdirectory_is_retired() {
    let harness = Harness::start("proj");
    let root = harness.root.clone();
    let sub = root.join("sub");

    fs::create_dir(&sub).unwrap();
    harness.settle();
    let handle = harness.watch.tree().handle_of(&sub).unwrap();

    fs::remove_dir(&sub).unwrap();
    assert_eq!(harness.settle(), 1);

    let tree = harness.watch.tree();
    assert_eq!(tree.handle_of(&sub), None);
    assert_eq!(tree.path_of(handle), None);
    assert_eq!(tree.active_paths(), vec![root]);
    assert!(tree.is_consistent());
}

#[test]
fn test_subtree_moved_out_and_back() {
    let harness = Harness::start("proj");
    let outside = tempfile::TempDir::new().unwrap();
    let root = harness.root.clone();

    fs::create_dir_all(root.join("pkg/inner")).unwrap();
    harness.settle();
    assert_eq!(harness.watch.active_paths().len(), 3);

    fs::rename(root.join("pkg"), outside.path().join("pkg")).unwrap();
    assert_eq!(harness.settle(), 1);
    assert_eq!(harness.watch.active_paths(), vec![root.clone()]);

    // Nothing reported for the moved-away tree
    fs::write(outside.path().join("pkg/inner/f"), b"x").unwrap();
    assert_eq!(harness.settle(), 0);

    fs::rename(outside.path().join("pkg"), root.join("pkg")).unwrap();
    assert_eq!(harness.settle(), 1);
    assert_eq!(
        harness.watch.active_paths(),
        vec![root.clone(), root.join("pkg"), root.join("pkg/inner")]
    );
    assert!(harness.watch.tree().is_consistent());
}

#[test]
fn test_removed_root_goes_quiet() {
    let harness = Harness::start("proj");
    let root = harness.root.clone();

    assert!(harness.watch.remove_root(&root).unwrap());
    assert!(harness.watch.roots().is_empty());

    fs::write(root.join("ignored.txt"), b"x").unwrap();
    assert_eq!(harness.settle(), 0);

    // The first event after removal released the monitor
    assert_eq!(harness.watch.tree().len(), 0);
}

#[test]
fn test_hidden_directories_are_not_watched() {
    let harness = Harness::start("proj");
    let root = harness.root.clone();

    fs::create_dir_all(root.join(".git/objects")).unwrap();
    harness.settle();
    assert_eq!(harness.watch.tree().state(&root.join(".git")), None);

    fs::write(root.join(".git/objects/blob"), b"x").unwrap();
    assert_eq!(harness.settle(), 0);
}
