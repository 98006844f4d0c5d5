//! JSONL import into the local corpus

use super::SqliteCorpus;
use crate::corpus::{split_sentences, Document, EntityId, QualityScorer, Sentence};
use crate::error::{LaanaError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, info};

/// One line of an import file: a document with optional sentences
#[derive(Debug, Clone, Deserialize)]
pub struct ImportRecord {
    #[serde(flatten)]
    pub document: Document,
    #[serde(default)]
    pub sentences: Option<Vec<ImportSentence>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImportSentence {
    #[serde(default)]
    pub sentence_id: Option<EntityId>,
    pub text: String,
    #[serde(default)]
    pub position: Option<i64>,
    #[serde(default)]
    pub quality_ratio: Option<f32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportStats {
    pub documents: usize,
    pub sentences: usize,
    /// Quality ratios computed because the record had none
    pub scored: usize,
}

/// Import a JSONL file in a single transaction
///
/// Records without sentences are split on sentence punctuation, replacing
/// any sentences previously stored for that document.
pub fn import_jsonl(corpus: &SqliteCorpus, path: &Path, scorer: Option<&QualityScorer>) -> Result<ImportStats> {
    let file = File::open(path).map_err(|e| LaanaError::Io {
        source: e,
        context: format!("Failed to open import file: {}", path.display()),
    })?;

    let mut conn = corpus.database().get_conn()?;
    let tx = conn.transaction()?;
    let mut stats = ImportStats::default();

    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| LaanaError::Io {
            source: e,
            context: format!("Failed to read {}", path.display()),
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let record: ImportRecord = serde_json::from_str(&line).map_err(|e| LaanaError::Json {
            source: e,
            context: format!("{} line {}", path.display(), index + 1),
        })?;
        import_record(corpus, &tx, record, scorer, &mut stats)?;
    }

    tx.commit()?;
    info!(
        "Imported {} documents and {} sentences from {}",
        stats.documents,
        stats.sentences,
        path.display()
    );
    Ok(stats)
}

fn import_record(
    corpus: &SqliteCorpus,
    conn: &rusqlite::Connection,
    record: ImportRecord,
    scorer: Option<&QualityScorer>,
    stats: &mut ImportStats,
) -> Result<()> {
    let mut document = record.document;
    if document.quality_ratio.is_none() {
        if let Some(scorer) = scorer {
            document.quality_ratio = Some(scorer.ratio(&document.text));
            stats.scored += 1;
        }
    }
    corpus.upsert_document(conn, &document)?;
    stats.documents += 1;

    let sentences: Vec<ImportSentence> = match record.sentences {
        Some(sentences) => sentences,
        None => {
            conn.execute(
                "DELETE FROM sentences WHERE source_id = ?1",
                [document.source_id],
            )?;
            split_sentences(&document.text)
                .into_iter()
                .map(|text| ImportSentence {
                    sentence_id: None,
                    text,
                    position: None,
                    quality_ratio: None,
                })
                .collect()
        }
    };

    for (position, sentence) in sentences.into_iter().enumerate() {
        let quality_ratio = match (sentence.quality_ratio, scorer) {
            (Some(ratio), _) => Some(ratio),
            (None, Some(scorer)) => {
                stats.scored += 1;
                Some(scorer.ratio(&sentence.text))
            }
            (None, None) => None,
        };
        corpus.upsert_sentence(
            conn,
            &Sentence {
                sentence_id: sentence.sentence_id.unwrap_or(-1),
                source_id: document.source_id,
                position: sentence.position.unwrap_or(position as i64),
                text: sentence.text,
                quality_ratio,
            },
        )?;
        stats.sentences += 1;
    }

    debug!("Imported document {}", document.source_id);
    Ok(())
}
