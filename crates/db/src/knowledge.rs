//! In-memory document store with term-overlap ranking.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use plantwise_core::domain::tool::{Citation, Passage};
use plantwise_core::stores::{CollectionId, KnowledgeRetriever, RetrievalError};
use thiserror::Error;

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "at", "be", "by", "does", "do", "for", "from", "has", "have", "how",
    "in", "is", "it", "many", "of", "on", "or", "the", "to", "was", "what", "which", "with",
];

#[derive(Debug, Error)]
pub enum KnowledgeLoadError {
    #[error("could not read knowledge path `{path}`: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("knowledge root `{0}` is not a directory")]
    NotADirectory(PathBuf),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    pub source: String,
    pub title: Option<String>,
    pub subject: Option<String>,
    pub attributes: BTreeMap<String, String>,
    pub paragraphs: Vec<String>,
}

impl Document {
    /// Parses an optional `key: value` header block followed by a blank line,
    /// then splits the body into paragraphs.
    pub fn parse(source: impl Into<String>, raw: &str) -> Self {
        let mut title = None;
        let mut subject = None;
        let mut attributes = BTreeMap::new();

        let lines = raw.lines().collect::<Vec<_>>();
        let header_len = if lines.first().is_some_and(|line| header_entry(line).is_some()) {
            lines.iter().position(|line| line.trim().is_empty()).unwrap_or(lines.len())
        } else {
            0
        };

        for line in &lines[..header_len] {
            let Some((key, value)) = header_entry(line) else {
                continue;
            };
            match key.as_str() {
                "title" => title = Some(value),
                "subject" => subject = Some(value),
                _ => {
                    attributes.insert(key, value);
                }
            }
        }

        let mut paragraphs = Vec::new();
        let mut current = Vec::new();
        for line in &lines[header_len..] {
            if line.trim().is_empty() {
                if !current.is_empty() {
                    paragraphs.push(current.join(" "));
                    current.clear();
                }
            } else {
                current.push(line.trim());
            }
        }
        if !current.is_empty() {
            paragraphs.push(current.join(" "));
        }

        Self { source: source.into(), title, subject, attributes, paragraphs }
    }

    fn passages(&self) -> impl Iterator<Item = Passage> + '_ {
        self.paragraphs.iter().enumerate().map(|(index, text)| Passage {
            text: text.clone(),
            citation: Citation {
                source: self.source.clone(),
                location: Some(format!("paragraph {}", index + 1)),
            },
            score: 0.0,
            subject: self.subject.clone(),
            attributes: self.attributes.clone(),
        })
    }
}

fn header_entry(line: &str) -> Option<(String, String)> {
    let (key, value) = line.split_once(':')?;
    let key = key.trim();
    let valid_key = !key.is_empty()
        && key.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == ' ');
    let value = value.trim();
    (valid_key && !value.is_empty()).then(|| (key.to_ascii_lowercase(), value.to_string()))
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> KnowledgeLoadError {
    let path = path.to_path_buf();
    move |source| KnowledgeLoadError::Io { path, source }
}

fn terms(text: &str) -> BTreeSet<String> {
    text.split(|ch: char| !(ch.is_alphanumeric() || ch == '-'))
        .map(|term| term.trim_matches('-').to_lowercase())
        .filter(|term| term.chars().count() >= 2 && !STOP_WORDS.contains(&term.as_str()))
        .collect()
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryKnowledgeStore {
    collections: BTreeMap<CollectionId, Vec<Document>>,
}

impl InMemoryKnowledgeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, collection: CollectionId, document: Document) {
        self.collections.entry(collection).or_default().push(document);
    }

    pub fn with_document(mut self, collection: &str, source: &str, raw: &str) -> Self {
        self.insert(CollectionId::new(collection), Document::parse(source, raw));
        self
    }

    pub fn collections(&self) -> impl Iterator<Item = (&CollectionId, usize)> {
        self.collections.iter().map(|(id, documents)| (id, documents.len()))
    }

    /// Loads `<root>/<collection>/*.md` and `*.txt`; every sub-directory is a collection.
    pub async fn load_dir(root: &Path) -> Result<Self, KnowledgeLoadError> {
        let metadata = tokio::fs::metadata(root).await.map_err(io_error(root))?;
        if !metadata.is_dir() {
            return Err(KnowledgeLoadError::NotADirectory(root.to_path_buf()));
        }

        let mut store = Self::new();
        let mut collections = tokio::fs::read_dir(root).await.map_err(io_error(root))?;
        while let Some(entry) = collections.next_entry().await.map_err(io_error(root))? {
            let collection_path = entry.path();
            if !entry.file_type().await.map_err(io_error(&collection_path))?.is_dir() {
                continue;
            }
            let collection = CollectionId::new(entry.file_name().to_string_lossy());

            let mut files = Vec::new();
            let mut documents =
                tokio::fs::read_dir(&collection_path).await.map_err(io_error(&collection_path))?;
            while let Some(file) = documents.next_entry().await.map_err(io_error(&collection_path))?
            {
                let path = file.path();
                let supported = path
                    .extension()
                    .and_then(|extension| extension.to_str())
                    .is_some_and(|extension| matches!(extension, "md" | "txt"));
                if supported {
                    files.push(path);
                }
            }
            files.sort();

            for path in files {
                let raw = tokio::fs::read_to_string(&path).await.map_err(io_error(&path))?;
                let name = path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default();
                store.insert(
                    collection.clone(),
                    Document::parse(format!("{collection}/{name}"), &raw),
                );
            }
            tracing::debug!(
                event_name = "knowledge.collection_loaded",
                collection = %collection,
                documents = store.collections.get(&collection).map(Vec::len).unwrap_or(0),
                "knowledge collection loaded"
            );
        }

        Ok(store)
    }

    pub fn search(&self, query: &str, collection: &CollectionId, limit: usize) -> Option<Vec<Passage>> {
        let documents = self.collections.get(collection)?;
        let query_terms = terms(query);
        if query_terms.is_empty() {
            return Some(Vec::new());
        }

        let mut scored = documents
            .iter()
            .flat_map(Document::passages)
            .filter_map(|mut passage| {
                let passage_terms = terms(&passage.text);
                let shared = query_terms.intersection(&passage_terms).count();
                (shared > 0).then(|| {
                    passage.score = shared as f64 / query_terms.len() as f64;
                    passage
                })
            })
            .collect::<Vec<_>>();

        scored.sort_by(|left, right| {
            right.score.total_cmp(&left.score).then_with(|| left.citation.cmp(&right.citation))
        });
        scored.truncate(limit);
        Some(scored)
    }
}

#[async_trait]
impl KnowledgeRetriever for InMemoryKnowledgeStore {
    async fn retrieve(
        &self,
        query: &str,
        collection: &CollectionId,
        limit: usize,
    ) -> Result<Vec<Passage>, RetrievalError> {
        self.search(query, collection, limit).ok_or_else(|| {
            RetrievalError::Unavailable(format!("collection `{collection}` is not loaded"))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use plantwise_core::stores::{CollectionId, KnowledgeRetriever, RetrievalError};
    use tempfile::TempDir;

    use super::{Document, InMemoryKnowledgeStore, KnowledgeLoadError};

    const NOTICE: &str = "title: Pump Notice\nsubject: P-102\nstatus: decommissioned\n\n\
                          Pump P-102 was decommissioned in 2024.\n\nSpare parts go back to stores.\n";

    #[test]
    fn header_block_becomes_metadata() {
        let document = Document::parse("maintenance/notice.md", NOTICE);
        assert_eq!(document.title.as_deref(), Some("Pump Notice"));
        assert_eq!(document.subject.as_deref(), Some("P-102"));
        assert_eq!(document.attributes.get("status").map(String::as_str), Some("decommissioned"));
        assert_eq!(document.paragraphs.len(), 2);
    }

    #[test]
    fn documents_without_header_keep_every_paragraph() {
        let document = Document::parse("notes.txt", "Line one\ncontinues here.\n\nSecond: part");
        assert!(document.subject.is_none());
        assert_eq!(document.paragraphs, vec!["Line one continues here.", "Second: part"]);
    }

    #[tokio::test]
    async fn retrieval_ranks_by_term_overlap_and_is_restartable() {
        let store = InMemoryKnowledgeStore::new()
            .with_document("maintenance", "notice.md", NOTICE)
            .with_document("maintenance", "tanks.md", "Feed tanks K-901 and K-902 hold feedstock.");
        let collection = CollectionId::new("maintenance");

        let first = store.retrieve("P-102 decommissioned", &collection, 5).await.expect("retrieve");
        let second = store.retrieve("P-102 decommissioned", &collection, 5).await.expect("retrieve");
        assert_eq!(first, second);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].citation.source, "notice.md");
        assert_eq!(first[0].subject.as_deref(), Some("P-102"));
        assert!((first[0].score - 1.0).abs() < f64::EPSILON);

        let limited = store.retrieve("tanks spare", &collection, 1).await.expect("retrieve");
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn unknown_collection_is_unavailable() {
        let store = InMemoryKnowledgeStore::new();
        let error = store
            .retrieve("anything", &CollectionId::new("regulatory"), 3)
            .await
            .expect_err("collection missing");
        assert!(matches!(error, RetrievalError::Unavailable(_)));
    }

    #[tokio::test]
    async fn load_dir_reads_one_collection_per_directory() {
        let root = TempDir::new().expect("tempdir");
        let maintenance = root.path().join("maintenance");
        fs::create_dir(&maintenance).expect("mkdir");
        fs::write(maintenance.join("notice.md"), NOTICE).expect("write");
        fs::write(maintenance.join("ignored.pdf"), "binary").expect("write");

        let store = InMemoryKnowledgeStore::load_dir(root.path()).await.expect("load");
        let collections = store.collections().collect::<Vec<_>>();
        assert_eq!(collections.len(), 1);
        assert_eq!(collections[0].0.as_str(), "maintenance");
        assert_eq!(collections[0].1, 1);

        let passages = store
            .retrieve("spare parts", &CollectionId::new("maintenance"), 5)
            .await
            .expect("retrieve");
        assert_eq!(passages[0].citation.source, "maintenance/notice.md");
    }

    #[tokio::test]
    async fn load_dir_names_the_path_it_could_not_read() {
        let root = TempDir::new().expect("tempdir");
        let missing = root.path().join("absent");

        let error = InMemoryKnowledgeStore::load_dir(&missing).await.expect_err("missing root");
        match error {
            KnowledgeLoadError::Io { path, .. } => assert_eq!(path, missing),
            other => panic!("unexpected error: {other}"),
        }

        let file = root.path().join("notice.md");
        fs::write(&file, NOTICE).expect("write");
        let error = InMemoryKnowledgeStore::load_dir(&file).await.expect_err("file root");
        assert!(matches!(error, KnowledgeLoadError::NotADirectory(path) if path == file));
    }
}
