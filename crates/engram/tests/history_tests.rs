//! Integration tests for versioned history
//!
//! Walks full version chains through the public API: save, resolve, diff,
//! branch, merge, and garbage collection.

use engram::history::{MergeStrategy, VersionedHistory, is_meaningful_change};
use engram::record::{MemoryRecord, RecordKind};

fn conversation(id: &str, content: &str) -> MemoryRecord {
    MemoryRecord::new(RecordKind::Conversation, id, content)
}

#[test]
fn test_chain_grows_append_only() {
    let history = VersionedHistory::new();
    let mut record = conversation("r1", "draft");

    let mut ids = Vec::new();
    for i in 0..5 {
        record.content = format!("revision {i}");
        record.version = i + 1;
        ids.push(history.save_version(&record, "update", "tester").unwrap());
    }

    let metas = history.history("r1");
    assert_eq!(metas.len(), 5);
    for (i, meta) in metas.iter().enumerate() {
        assert_eq!(meta.version_id, ids[i]);
        if i == 0 {
            assert_eq!(meta.parent_version_id, None);
        } else {
            assert_eq!(meta.parent_version_id, Some(ids[i - 1].clone()));
        }
    }
    assert_eq!(history.latest("r1"), Some(ids[4].clone()));

    // Earlier snapshots remain readable after later saves.
    let first = history.get_version("r1", Some(&ids[0])).unwrap();
    assert_eq!(first.content, "revision 0");
}

#[test]
fn test_diff_across_distant_versions() {
    let history = VersionedHistory::new();
    let mut record = conversation("r1", "start");
    record.importance = 0.2;
    let v1 = history.save_version(&record, "create", "tester").unwrap();

    record.content = "middle".to_string();
    history.save_version(&record, "update", "tester").unwrap();

    record.content = "end".to_string();
    record.importance = 0.9;
    record.tags.push("protected".to_string());
    let v3 = history.save_version(&record, "update", "tester").unwrap();

    let changes = history.diff("r1", &v1, &v3).unwrap();
    let fields: Vec<&str> = changes.iter().map(|c| c.field.as_str()).collect();
    assert_eq!(fields, vec!["content", "importance", "tags"]);

    let content_change = &changes[0];
    assert_eq!(content_change.old, serde_json::json!("start"));
    assert_eq!(content_change.new, serde_json::json!("end"));
}

#[test]
fn test_branch_then_continue_both_lines() {
    let history = VersionedHistory::new();
    let mut record = conversation("r1", "base");
    let base = history.save_version(&record, "create", "tester").unwrap();

    record.content = "mainline".to_string();
    history.save_version(&record, "update", "tester").unwrap();

    let branch = history.branch("r1", "what-if", Some(&base)).unwrap();

    let branched = history.get_version("r1", Some(&branch)).unwrap();
    assert_eq!(branched.content, "base");
    assert!(branched.tags.contains(&"what-if".to_string()));

    // The branch snapshot chains to its source, not to the mainline tip.
    let metas = history.history("r1");
    let branch_meta = metas.iter().find(|m| m.version_id == branch).unwrap();
    assert_eq!(branch_meta.parent_version_id, Some(base));

    // LATEST now points at the branch entry; resolving None follows it.
    assert_eq!(history.latest("r1"), Some(branch.clone()));
    assert_eq!(history.get_version("r1", None).unwrap().content, "base");
}

#[test]
fn test_merge_combine_then_persist_as_new_version() {
    let history = VersionedHistory::new();

    let mut a = conversation("r1", "from session one");
    a.tags = vec!["joy".to_string()];
    a.importance = 0.4;

    let mut b = conversation("r1", "from session two");
    b.tags = vec!["milestone".to_string()];
    b.importance = 0.7;
    b.last_accessed_at = a.last_accessed_at + chrono::Duration::seconds(30);

    let merged = VersionedHistory::merge(&a, &b, MergeStrategy::Combine);
    assert_eq!(merged.content, "from session two");
    assert_eq!(merged.importance, 0.7);
    assert!(merged.tags.contains(&"joy".to_string()));
    assert!(merged.tags.contains(&"milestone".to_string()));

    // Merging is pure; persisting the result is an explicit second step.
    assert!(history.is_empty("r1"));
    history.save_version(&merged, "merge", "tester").unwrap();
    assert_eq!(history.len("r1"), 1);
}

#[test]
fn test_gc_bounds_every_chain_independently() {
    let history = VersionedHistory::new();

    for record_id in ["a", "b"] {
        let mut record = conversation(record_id, "v");
        let versions = if record_id == "a" { 15 } else { 3 };
        for i in 0..versions {
            record.content = format!("v{i}");
            record.version = i;
            history.save_version(&record, "update", "tester").unwrap();
        }
    }

    let removed = history.garbage_collect(10);
    assert_eq!(removed, 5);
    assert_eq!(history.len("a"), 10);
    assert_eq!(history.len("b"), 3);

    // The survivor set is the most recent versions and LATEST still
    // resolves.
    let newest = history.get_version("a", None).unwrap();
    assert_eq!(newest.content, "v14");
    let metas = history.history("a");
    assert_eq!(metas[0].reason, "update");
}

#[test]
fn test_meaningful_change_filter() {
    let old = conversation("r1", "same");
    let mut scored = old.clone();
    scored.set_retention_score(0.42);
    assert!(!is_meaningful_change(&old, &scored));

    let mut tagged = old.clone();
    tagged.tags.push("milestone".to_string());
    assert!(is_meaningful_change(&old, &tagged));
}
