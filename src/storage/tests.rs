use super::*;

#[test]
fn test_paths() {
    assert_eq!(policy_path("", "k"), "policy/k");
    assert_eq!(archive_path("transit/", "k"), "transit/archive/k");
}

#[test]
fn test_inmem_round_trip_and_list() {
    let storage = InmemStorage::new();
    assert_eq!(storage.get("policy/a").unwrap(), None);

    storage.put("policy/a", b"one").unwrap();
    storage.put("policy/b", b"two").unwrap();
    storage.put("archive/a", b"three").unwrap();
    assert_eq!(storage.get("policy/a").unwrap(), Some(b"one".to_vec()));

    assert_eq!(storage.list("policy/").unwrap(), vec!["a", "b"]);
    assert_eq!(storage.list("").unwrap(), vec!["archive/", "policy/"]);

    storage.delete("policy/a").unwrap();
    storage.delete("policy/missing").unwrap();
    assert!(!storage.contains("policy/a"));
    assert_eq!(storage.len(), 2);
}

#[test]
fn test_inmem_fault_injection() {
    let storage = InmemStorage::new();
    storage.put("k", b"v").unwrap();

    storage.set_fail_put(true);
    let err = storage.put("k", b"w").unwrap_err();
    assert_eq!(err.error_type(), "Storage");
    storage.set_fail_put(false);
    assert_eq!(storage.get("k").unwrap(), Some(b"v".to_vec()));

    storage.set_fail_get(true);
    assert!(storage.get("k").is_err());
    storage.set_fail_get(false);

    storage.set_fail_delete(true);
    assert!(storage.delete("k").is_err());
    assert!(storage.contains("k"));
}

#[test]
fn test_file_storage_round_trip() {
    let temp_dir = tempfile::tempdir().unwrap();
    let storage = FileStorage::new(temp_dir.path().join("transit")).unwrap();

    storage.put("policy/a", b"{}").unwrap();
    storage.put("archive/a", b"[]").unwrap();
    assert_eq!(storage.get("policy/a").unwrap(), Some(b"{}".to_vec()));
    assert_eq!(storage.get("policy/b").unwrap(), None);
    assert_eq!(storage.list("").unwrap(), vec!["archive/", "policy/"]);
    assert_eq!(storage.list("policy/").unwrap(), vec!["a"]);

    storage.delete("policy/a").unwrap();
    storage.delete("policy/a").unwrap();
    assert_eq!(storage.get("policy/a").unwrap(), None);
    assert!(storage.root().ends_with("transit"));
}

#[test]
fn test_file_storage_rejects_escaping_paths() {
    let temp_dir = tempfile::tempdir().unwrap();
    let storage = FileStorage::new(temp_dir.path()).unwrap();
    assert!(storage.put("../outside", b"x").is_err());
    assert!(storage.get("/etc/passwd").is_err());
}
