//! Child process accounting around a launch that fails part way.
//!
//! A single test in its own binary: concurrent tests would add and remove
//! children of this process while the snapshots are taken.

use std::fs;

use lazypipe::prelude::*;

/// Pids of every live child of this process, across all its threads.
fn children() -> Vec<u32> {
    let mut pids: Vec<u32> = fs::read_dir("/proc/self/task")
        .map(|tasks| {
            tasks
                .flatten()
                .filter_map(|t| fs::read_to_string(t.path().join("children")).ok())
                .flat_map(|s| s.split_whitespace().filter_map(|p| p.parse().ok()).collect::<Vec<u32>>())
                .collect()
        })
        .unwrap_or_default();
    pids.sort_unstable();
    pids
}

#[test]
fn failed_launch_leaves_no_children() {
    let before = children();
    let sleeper = CommandSpec::new("sleep").arg("30");
    let p = &sleeper | CommandSpec::new("lazypipe-definitely-missing") | &sleeper;
    match p.spawn() {
        Err(PipeError::Launch { stage, .. }) => assert_eq!(stage, 1),
        other => panic!("expected launch error, got {:?}", other.map(|s| s.pids())),
    }
    assert_eq!(children(), before);

    // stages spawn last to first, so the sleeper at stage 1 is already
    // running when stage 0's input cannot be opened
    let p = sleeper.clone().stdin_file("/nonexistent/lazypipe/in") | &sleeper;
    assert!(matches!(p.spawn(), Err(PipeError::Launch { stage: 0, .. })));
    assert_eq!(children(), before);
}
