use std::fs;
use tempfile::TempDir;

use insight_core::records::RecordLoader;
use insight_core::Error;

#[test]
fn load_single_file_skips_blank_lines_and_text() {
    let tmp = TempDir::new().unwrap();
    let file = tmp.path().join("chunks.jsonl");
    fs::write(
        &file,
        "{\"id\":\"1\",\"text\":\"Love is the true devotion\",\"section\":\"Japji\"}\n\n{\"id\":\"2\",\"text\":\"   \"}\n{\"text\":\"Ego is the disease\",\"embedding\":[0.1,0.2]}\n",
    )
    .unwrap();

    let records = RecordLoader::new().load(&file).expect("load");

    assert_eq!(records.len(), 2, "blank-text record dropped");
    assert_eq!(records[0].stable_id(), "1");
    assert_eq!(records[1].embedding.as_deref(), Some(&[0.1f32, 0.2][..]));
}

#[test]
fn load_directory_walks_jsonl_in_sorted_order() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();
    fs::create_dir_all(dir.join("nested")).unwrap();
    fs::write(dir.join("b.jsonl"), "{\"id\":\"b\",\"text\":\"bravo\"}\n").unwrap();
    fs::write(dir.join("a.jsonl"), "{\"id\":\"a\",\"text\":\"alpha\"}\n").unwrap();
    fs::write(dir.join("nested/c.jsonl"), "{\"id\":\"c\",\"text\":\"charlie\"}\n").unwrap();
    fs::write(dir.join("notes.txt"), "not a record").unwrap();

    let records = RecordLoader::new().load(dir).expect("load dir");

    let ids: Vec<String> = records.iter().map(|r| r.stable_id()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
}

#[test]
fn malformed_line_reports_location() {
    let tmp = TempDir::new().unwrap();
    let file = tmp.path().join("bad.jsonl");
    fs::write(&file, "{\"text\":\"ok\"}\n{not json}\n").unwrap();

    let err = RecordLoader::new().load(&file).unwrap_err();

    match err {
        Error::InvalidChunk { id, .. } => assert!(id.ends_with("bad.jsonl:2"), "got {id}"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn empty_directory_yields_no_records() {
    let tmp = TempDir::new().unwrap();
    let records = RecordLoader::new().load(tmp.path()).expect("load");
    assert!(records.is_empty());
}
