use std::sync::Arc;

use super::*;
use crate::models::Message;
use crate::storage::MockNoteStore;

fn temp_storage() -> JsonStorage {
    let dir = std::env::temp_dir()
        .join(format!("chatnote-test-{}", uuid::Uuid::new_v4()))
        .to_string_lossy()
        .to_string();
    JsonStorage::new(Arc::new(FsNoteStore), &dir)
}

#[tokio::test]
async fn test_round_trip() {
    let storage = temp_storage();
    let messages = vec![
        Message::user("Hello"),
        Message::assistant("Hi there"),
        Message::user("How are you?"),
    ];

    storage
        .save("default", &messages)
        .await
        .expect("failed to save");
    let loaded = storage.load("default").await.expect("failed to load");

    assert_eq!(loaded.len(), messages.len());
    for (stored, original) in loaded.iter().zip(messages.iter()) {
        assert_eq!(stored.role(), original.role());
        assert_eq!(stored.content(), original.content());
    }
}

#[tokio::test]
async fn test_load_missing_profile_is_empty() {
    let storage = temp_storage();
    let loaded = storage.load("nobody").await.expect("failed to load");
    assert!(loaded.is_empty());
}

#[tokio::test]
async fn test_profiles_are_isolated() {
    let storage = temp_storage();
    storage
        .save("work", &[Message::user("work note")])
        .await
        .unwrap();
    storage
        .save("home", &[Message::user("home note")])
        .await
        .unwrap();

    let work = storage.load("work").await.unwrap();
    let home = storage.load("home").await.unwrap();
    assert_eq!(work[0].content(), "work note");
    assert_eq!(home[0].content(), "home note");
}

#[tokio::test]
async fn test_clear_persists_empty_array() {
    let storage = temp_storage();
    storage
        .save("default", &[Message::user("Hello")])
        .await
        .unwrap();

    storage.clear("default").await.expect("failed to clear");

    let loaded = storage.load("default").await.unwrap();
    assert!(loaded.is_empty());
}

#[tokio::test]
async fn test_history_is_pretty_printed_records() {
    let mut notes_mock = MockNoteStore::new();
    notes_mock.expect_exists().returning(|_| Ok(true));
    notes_mock
        .expect_write()
        .withf(|path, text| {
            path == "history/history-default.json"
                && text.contains("\"role\": \"user\"")
                && text.contains("\"content\": \"Hello\"")
                && text.starts_with("[\n")
        })
        .times(1)
        .returning(|_, _| Ok(()));

    let storage = JsonStorage::new(Arc::new(notes_mock), "history");
    storage
        .save("default", &[Message::user("Hello")])
        .await
        .expect("failed to save");
}
