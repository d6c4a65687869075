use std::fs;

use harvest_engine::{Checkpoint, CheckpointStore, CHECKPOINT_FILENAME};
use tempfile::TempDir;

fn sample() -> Checkpoint {
    Checkpoint {
        next_batch: 42,
        next_key: Some("cursor-41".into()),
        total_records: 199_920,
        total_reported: 1_250_000,
    }
}

#[test]
fn save_then_load_round_trips() {
    let temp = TempDir::new().unwrap();
    let store = CheckpointStore::new(temp.path());

    store.save(&sample()).unwrap();
    assert_eq!(store.load(), Some(sample()));

    // Overwrite, not append.
    let updated = Checkpoint {
        next_batch: 43,
        ..sample()
    };
    store.save(&updated).unwrap();
    assert_eq!(store.load(), Some(updated));
}

#[test]
fn missing_file_means_no_resume_state() {
    let temp = TempDir::new().unwrap();
    let store = CheckpointStore::new(temp.path());
    assert_eq!(store.load(), None);
}

#[test]
fn corrupt_file_is_downgraded_to_no_resume_state() {
    harvest_logging::initialize_for_tests();
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join(CHECKPOINT_FILENAME), "{not json").unwrap();

    let store = CheckpointStore::new(temp.path());
    assert_eq!(store.load(), None);
}

#[test]
fn clear_removes_file_and_tolerates_absence() {
    let temp = TempDir::new().unwrap();
    let store = CheckpointStore::new(temp.path());

    store.save(&sample()).unwrap();
    assert!(store.path().exists());

    store.clear().unwrap();
    assert!(!store.path().exists());

    // Clearing again is not an error.
    store.clear().unwrap();
}
