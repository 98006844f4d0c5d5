//! Shared fixtures for the integration tests
#![allow(dead_code)]

use laana::config::StorageConfig;
use laana::storage::{import_jsonl, LocalStore};
use std::io::Write;
use tempfile::TempDir;

/// A small newspaper corpus with metadata, one blank document and sentences split on import
pub const CORPUS: &[&str] = &[
    r#"{"source_id": 1, "text": "Aloha mai kākou. Ua hele mai ka moku.", "group_name": "nupepa", "source_name": "Ka Nupepa Kuokoa", "authors": "Kamakau", "date": "1865-02-04", "quality_ratio": 0.95}"#,
    r#"{"source_id": 2, "text": "Mai aloha ʻoe iaʻu. Pehea ʻoe?", "group_name": "nupepa", "source_name": "Ka Hoku o Hawaii", "date": "1910-07-01", "quality_ratio": 0.7}"#,
    r#"{"source_id": 3, "text": "Aloha nui loa mai ka ʻāina.", "group_name": "buke", "source_name": "Moolelo", "authors": "Malo", "date": "1838-01-01", "quality_ratio": 0.4}"#,
    r#"{"source_id": 4, "text": "The ship arrived from Boston with aloha.", "group_name": "nupepa", "source_name": "Pacific Commercial Advertiser", "date": "1870-05-05", "quality_ratio": 0.05}"#,
    r#"{"source_id": 5, "text": "ʻŌlelo Hawaiʻi ka ʻōlelo makuahine.", "group_name": "buke", "source_name": "Puke Aʻo", "date": "1922-03-03", "quality_ratio": 0.9}"#,
    r#"{"source_id": 6, "text": "   ", "group_name": "nupepa"}"#,
];

pub fn storage_config(temp: &TempDir) -> StorageConfig {
    StorageConfig {
        data_dir: temp.path().to_path_buf(),
        database: "corpus.db".to_string(),
        vocabulary_file: None,
    }
}

/// Open a fresh store and import `lines` into it
pub fn store_with(temp: &TempDir, lines: &[&str]) -> LocalStore {
    let store = LocalStore::open(&storage_config(temp)).unwrap();
    let path = temp.path().join("import.jsonl");
    let mut file = std::fs::File::create(&path).unwrap();
    for line in lines {
        writeln!(file, "{}", line).unwrap();
    }
    import_jsonl(&store.corpus, &path, None).unwrap();
    store
}

/// `count` plain documents with ids 1..=count
pub fn numbered_documents(count: i64) -> Vec<String> {
    (1..=count)
        .map(|id| format!(r#"{{"source_id": {}, "text": "palapala helu {}"}}"#, id, id))
        .collect()
}
