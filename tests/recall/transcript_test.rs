//! Tests for transcript loading and quarantine accounting.

use std::io::Write;

use openclaw::recall::transcript::{self, QUARANTINE_THRESHOLD};

fn message_line(role: &str, text: &str) -> String {
    serde_json::json!({
        "type": "message",
        "message": { "role": role, "content": text },
        "timestamp": "2026-01-01T00:00:00Z",
    })
    .to_string()
}

#[tokio::test]
async fn load_file_parses_valid_lines() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("2026-01-01-chat.jsonl");
    let mut file = std::fs::File::create(&path).expect("create");
    writeln!(file, "{}", message_line("user", "hello")).expect("write");
    writeln!(file, "{}", message_line("assistant", "hi")).expect("write");

    let loaded = transcript::load_file(&path).await.expect("load");
    assert_eq!(loaded.records.len(), 2);
    assert_eq!(loaded.parse_errors, 0);
    assert_eq!(loaded.total_lines, 2);
    assert!(!loaded.should_quarantine());
}

#[tokio::test]
async fn malformed_lines_are_skipped_and_counted() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("s.jsonl");
    let mut file = std::fs::File::create(&path).expect("create");
    writeln!(file, "{}", message_line("user", "ok")).expect("write");
    writeln!(file, "this is not json").expect("write");
    writeln!(file).expect("blank line is ignored");
    writeln!(file, "{}", message_line("assistant", "fine")).expect("write");

    let loaded = transcript::load_file(&path).await.expect("load");
    assert_eq!(loaded.records.len(), 2);
    assert_eq!(loaded.parse_errors, 1);
    assert_eq!(loaded.total_lines, 3);
    assert!(!loaded.should_quarantine());
}

#[tokio::test]
async fn crossing_the_threshold_quarantines() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("bad.jsonl");
    let mut file = std::fs::File::create(&path).expect("create");
    for i in 0..=QUARANTINE_THRESHOLD {
        writeln!(file, "garbage line {i}").expect("write");
    }
    writeln!(file, "{}", message_line("user", "still here")).expect("write");

    let loaded = transcript::load_file(&path).await.expect("load");
    assert_eq!(loaded.parse_errors, QUARANTINE_THRESHOLD + 1);
    assert!(loaded.should_quarantine());
}

#[tokio::test]
async fn exactly_at_threshold_is_not_quarantined() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("edge.jsonl");
    let mut file = std::fs::File::create(&path).expect("create");
    for i in 0..QUARANTINE_THRESHOLD {
        writeln!(file, "garbage line {i}").expect("write");
    }

    let loaded = transcript::load_file(&path).await.expect("load");
    assert_eq!(loaded.parse_errors, QUARANTINE_THRESHOLD);
    assert!(!loaded.should_quarantine());
}

#[tokio::test]
async fn non_utf8_file_is_a_parse_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("binary.jsonl");
    std::fs::write(&path, [0xFFu8, 0xFE, 0x00, 0x01]).expect("write");

    assert!(transcript::load_file(&path).await.is_err());
}

#[tokio::test]
async fn missing_file_is_a_parse_error() {
    let path = std::path::Path::new("/nonexistent/nope.jsonl");
    assert!(transcript::load_file(path).await.is_err());
}
