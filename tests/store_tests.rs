//! Integration tests for store lifecycle and item CRUD

use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::json;
use shmstore::{Item, ItemKind, ItemValue, SharedStore, StorageError};

static NAME_SEQ: AtomicU64 = AtomicU64::new(0);

/// Store names must be unique across concurrently running tests, and the
/// backing objects must not outlive the test run
fn unique_name(prefix: &str) -> String {
    format!(
        "shmstore_test_{}_{}_{}",
        prefix,
        std::process::id(),
        NAME_SEQ.fetch_add(1, Ordering::Relaxed)
    )
}

struct Cleanup(String);

impl Drop for Cleanup {
    fn drop(&mut self) {
        let _ = SharedStore::destroy(&self.0);
    }
}

fn create_store(prefix: &str, size: usize) -> (Cleanup, SharedStore) {
    let name = unique_name(prefix);
    let store = SharedStore::create(&name, size).unwrap();
    (Cleanup(name), store)
}

#[test]
fn test_create_twice_fails() {
    let (_cleanup, _store) = create_store("dup", 1 << 20);
    let err = SharedStore::create(&_cleanup.0, 1 << 20).unwrap_err();
    assert!(matches!(err, StorageError::CannotCreateStorage { .. }));
}

#[test]
fn test_open_without_create_fails() {
    let err = SharedStore::open(&unique_name("missing")).unwrap_err();
    assert!(matches!(err, StorageError::CannotOpenStorage { .. }));
}

#[test]
fn test_destroy_missing_fails() {
    let err = SharedStore::destroy(&unique_name("missing")).unwrap_err();
    assert!(matches!(err, StorageError::CannotDestroyStorage { .. }));
}

#[test]
fn test_destroy_then_open_fails() {
    let name = unique_name("gone");
    let store = SharedStore::create(&name, 1 << 20).unwrap();
    drop(store);
    SharedStore::destroy(&name).unwrap();
    assert!(SharedStore::open(&name).is_err());
}

#[test]
fn test_set_get_roundtrip_every_kind() {
    let (_cleanup, store) = create_store("kinds", 1 << 20);

    let cases = [
        ("flag", ItemValue::Bool(true), "a-bool"),
        ("pi", ItemValue::Double(3.14159), ""),
        ("motd", ItemValue::Text("hello world".to_string()), "banner"),
        (
            "doc",
            ItemValue::Json(json!({"nested": {"list": [1, 2, 3]}, "ok": true})),
            "object",
        ),
        ("nothing", ItemValue::Null, "placeholder"),
    ];

    for (key, value, tag) in &cases {
        store.set_item(key, Item::new(value.clone(), *tag)).unwrap();
    }
    assert_eq!(store.len(), cases.len() as u64);

    for (key, value, tag) in &cases {
        let item = store.get_item(key).unwrap();
        assert_eq!(&item.value, value, "value mismatch for '{}'", key);
        assert_eq!(&item.tag, tag, "tag mismatch for '{}'", key);
        assert_eq!(item.kind(), value.kind());
    }
}

#[test]
fn test_same_kind_update_in_place() {
    let (_cleanup, store) = create_store("update", 1 << 20);

    store.set_item("a", Item::new(1.0, "first")).unwrap();
    store.set_item("b", Item::new("other", "keep")).unwrap();

    store.set_item("a", Item::new(2.0, "second")).unwrap();

    let a = store.get_item("a").unwrap();
    assert_eq!(a.value, ItemValue::Double(2.0));
    assert_eq!(a.tag, "second");
    assert_eq!(a.kind(), ItemKind::Double);

    // Unrelated keys are untouched
    let b = store.get_item("b").unwrap();
    assert_eq!(b.value.as_text(), Some("other"));
    assert_eq!(b.tag, "keep");
    assert_eq!(store.len(), 2);
}

#[test]
fn test_tag_update_without_type_change() {
    let (_cleanup, store) = create_store("tag", 1 << 20);

    store.set_item("k", Item::new("payload", "old")).unwrap();
    store.set_item("k", Item::new("payload", "new")).unwrap();

    let item = store.get_item("k").unwrap();
    assert_eq!(item.value.as_text(), Some("payload"));
    assert_eq!(item.tag, "new");
}

#[test]
fn test_type_transition_fully_replaces() {
    let (_cleanup, store) = create_store("transition", 1 << 20);

    store
        .set_item("k", Item::new("a long enough string value", "text-tag"))
        .unwrap();
    store.set_item("k", Item::untagged(true)).unwrap();

    let item = store.get_item("k").unwrap();
    assert_eq!(item.kind(), ItemKind::Bool);
    assert_eq!(item.value, ItemValue::Bool(true));
    assert_eq!(item.tag, "");
    assert_eq!(store.len(), 1);
}

#[test]
fn test_text_growth_in_place() {
    let (_cleanup, store) = create_store("growth", 1 << 20);

    store.set_item("k", Item::untagged("tiny")).unwrap();
    let grown = "g".repeat(10_000);
    store.set_item("k", Item::untagged(grown.clone())).unwrap();

    let item = store.get_item("k").unwrap();
    assert_eq!(item.value.as_text(), Some(grown.as_str()));
    assert_eq!(item.kind(), ItemKind::Text);
}

#[test]
fn test_remove_item() {
    let (_cleanup, store) = create_store("remove", 1 << 20);

    let err = store.remove_item("absent").unwrap_err();
    assert!(matches!(err, StorageError::ItemNotFound { .. }));

    store.set_item("k", Item::untagged(1.5)).unwrap();
    store.remove_item("k").unwrap();
    assert!(matches!(
        store.get_item("k").unwrap_err(),
        StorageError::ItemNotFound { .. }
    ));
    assert!(store.is_empty());
}

#[test]
fn test_removed_key_space_is_reclaimed() {
    let (_cleanup, store) = create_store("reclaim", 1 << 20);

    let blob = "b".repeat(64 * 1024);
    // Far more write volume than the segment could hold without reuse
    for _ in 0..64 {
        store.set_item("blob", Item::untagged(blob.clone())).unwrap();
        store.remove_item("blob").unwrap();
    }
    assert!(store.is_empty());
}

#[test]
fn test_clear_empties_store() {
    let (_cleanup, store) = create_store("clear", 1 << 20);

    for i in 0..32 {
        store
            .set_item(&format!("key_{}", i), Item::new(i as f64, "n"))
            .unwrap();
    }
    assert_eq!(store.len(), 32);

    store.clear().unwrap();
    assert!(store.is_empty());
    assert!(matches!(
        store.get_item("key_0").unwrap_err(),
        StorageError::ItemNotFound { .. }
    ));

    // A cleared store is fully usable again
    store.set_item("fresh", Item::untagged(true)).unwrap();
    assert_eq!(store.len(), 1);
}

#[test]
fn test_lifecycle_scenario() {
    // The canonical sequence: bool, then double under the same key, then gone
    let (_cleanup, store) = create_store("scenario", 1 << 20);

    store.set_item("k", Item::untagged(true)).unwrap();
    let item = store.get_item("k").unwrap();
    assert_eq!(item.kind(), ItemKind::Bool);
    assert_eq!(item.value.as_bool(), Some(true));
    assert_eq!(item.tag, "");

    store.set_item("k", Item::untagged(3.14)).unwrap();
    let item = store.get_item("k").unwrap();
    assert_eq!(item.kind(), ItemKind::Double);
    assert_eq!(item.value.as_double(), Some(3.14));
    assert_eq!(item.tag, "");

    store.remove_item("k").unwrap();
    assert!(matches!(
        store.get_item("k").unwrap_err(),
        StorageError::ItemNotFound { .. }
    ));
}

#[test]
fn test_exhaustion_leaves_directory_unchanged() {
    let (_cleanup, store) = create_store("exhaust", 64 * 1024);

    store.set_item("existing", Item::untagged(1.0)).unwrap();
    let len_before = store.len();

    let oversized = "x".repeat(1 << 20);
    let err = store
        .set_item("too_big", Item::untagged(oversized))
        .unwrap_err();
    assert!(matches!(err, StorageError::CannotConstructItem { .. }));

    assert_eq!(store.len(), len_before);
    assert!(matches!(
        store.get_item("too_big").unwrap_err(),
        StorageError::ItemNotFound { .. }
    ));
    // The pre-existing item is intact
    assert_eq!(store.double_or("existing", -1.0), 1.0);
}

#[test]
fn test_second_handle_sees_items() {
    let (_cleanup, store) = create_store("twohandles", 1 << 20);

    store.set_item("shared", Item::new("visible", "t")).unwrap();

    let other = SharedStore::open(&_cleanup.0).unwrap();
    let item = other.get_item("shared").unwrap();
    assert_eq!(item.value.as_text(), Some("visible"));
    assert_eq!(item.tag, "t");

    other.set_item("back", Item::untagged(9.0)).unwrap();
    assert_eq!(store.double_or("back", -1.0), 9.0);
}

#[test]
fn test_stats_reflect_usage() {
    let (_cleanup, store) = create_store("stats", 1 << 20);

    let initial = store.stats();
    assert_eq!(initial.capacity, 1 << 20);
    assert_eq!(initial.item_count, 0);

    store.set_item("k", Item::untagged("some text")).unwrap();
    let after = store.stats();
    assert_eq!(after.item_count, 1);
    assert!(after.free_bytes < initial.free_bytes);

    store.remove_item("k").unwrap();
    assert_eq!(store.stats().free_bytes, initial.free_bytes);
}

#[test]
fn test_explicit_lock_composes_with_crud() {
    let (_cleanup, store) = create_store("recursive", 1 << 20);

    // The lock is recursive: CRUD under an explicit lock must not deadlock
    store.lock();
    store.set_item("k", Item::untagged(1.0)).unwrap();
    let read = store.double_or("k", -1.0);
    store.set_item("k", Item::untagged(read + 1.0)).unwrap();
    store.unlock();

    assert_eq!(store.double_or("k", -1.0), 2.0);
}
