use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use pgvector::Vector;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::crawler::Crawler;
use crate::database::models::{NewChunk, Source, SourceStatus, SourceType};
use crate::database::Repository;
use crate::document::{DocumentParser, TextChunker};
use crate::embedding::EmbeddingOrchestrator;
use crate::storage::ObjectStore;

const OBJECT_STORE_TIMEOUT: Duration = Duration::from_secs(30);

/// One unit of background work: ingest a single source end to end.
#[derive(Debug, Clone, Copy)]
pub struct IngestJob {
    pub bot_id: Uuid,
    pub source_id: Uuid,
}

pub type IngestQueue = flume::Sender<IngestJob>;

/// Per-source state machine: uploaded -> parsing -> indexed, or
/// parsing -> failed with the error recorded on the row. The coordinator
/// never retries a job; operators delete and resubmit failed sources.
pub struct IngestionCoordinator {
    repository: Arc<Repository>,
    storage: Arc<dyn ObjectStore>,
    crawler: Arc<Crawler>,
    embeddings: Arc<EmbeddingOrchestrator>,
    chunker: TextChunker,
}

impl IngestionCoordinator {
    pub fn new(
        repository: Arc<Repository>,
        storage: Arc<dyn ObjectStore>,
        crawler: Arc<Crawler>,
        embeddings: Arc<EmbeddingOrchestrator>,
    ) -> Self {
        Self {
            repository,
            storage,
            crawler,
            embeddings,
            chunker: TextChunker::new(),
        }
    }

    pub async fn run(&self, job: IngestJob) {
        let source = match self.repository.get_source(job.bot_id, job.source_id).await {
            Ok(Some(source)) => source,
            Ok(None) => {
                warn!(source_id = %job.source_id, "source vanished before ingestion");
                return;
            }
            Err(e) => {
                error!(source_id = %job.source_id, "failed to load source: {}", e);
                return;
            }
        };

        if let Err(e) = self
            .repository
            .update_source_status(source.id, SourceStatus::Parsing, None)
            .await
        {
            error!(source_id = %source.id, "failed to mark source parsing: {}", e);
            return;
        }

        match self.process(&source).await {
            Ok(chunk_count) => {
                if let Err(e) = self
                    .repository
                    .update_source_status(source.id, SourceStatus::Indexed, None)
                    .await
                {
                    error!(source_id = %source.id, "failed to mark source indexed: {}", e);
                    return;
                }
                info!(source_id = %source.id, chunks = chunk_count, "source indexed");
            }
            Err(e) => {
                let message = e.to_string();
                warn!(source_id = %source.id, "ingestion failed: {}", message);
                if let Err(e) = self
                    .repository
                    .update_source_status(source.id, SourceStatus::Failed, Some(&message))
                    .await
                {
                    error!(source_id = %source.id, "failed to mark source failed: {}", e);
                }
            }
        }
    }

    /// Parse -> chunk -> embed -> persist, strictly sequential. Chunks are
    /// written only after every embedding succeeded.
    async fn process(&self, source: &Source) -> Result<usize> {
        let bot = self
            .repository
            .get_bot_by_id(source.bot_id)
            .await?
            .ok_or_else(|| anyhow!("bot {} no longer exists", source.bot_id))?;

        let (text, title, url, publish_date) = match source.source_type {
            SourceType::Html => {
                let original_url = source
                    .original_url
                    .as_deref()
                    .ok_or_else(|| anyhow!("html source has no url"))?;

                let page = self.crawler.crawl(original_url).await?;

                self.repository
                    .update_source_crawl_meta(
                        source.id,
                        &page.canonical_url,
                        page.etag.as_deref(),
                        page.last_modified.as_deref(),
                        &page.checksum,
                    )
                    .await?;

                // Unchanged page with chunks already indexed: skip re-chunking.
                if source.page_checksum.as_deref() == Some(page.checksum.as_str())
                    && self.repository.source_has_chunks(source.id).await?
                {
                    info!(source_id = %source.id, "content unchanged, skipping re-index");
                    return Ok(0);
                }

                let publish_date = page.last_modified.as_deref().and_then(parse_http_date);
                (page.text, page.title, Some(page.canonical_url), publish_date)
            }
            _ => {
                let bytes = tokio::time::timeout(
                    OBJECT_STORE_TIMEOUT,
                    self.storage.get(&source.storage_path),
                )
                .await
                .context("object store read timed out")??;

                let parsed = DocumentParser::parse(&bytes, source.source_type)?;
                let title = filename_stem(&source.storage_path);
                (parsed.content, title, None, None)
            }
        };

        let pieces = self
            .chunker
            .chunk(&text, title.as_deref(), url.as_deref());
        if pieces.is_empty() {
            bail!("no extractable text");
        }

        let excerpts: Vec<String> = pieces.iter().map(|p| p.excerpt.clone()).collect();
        let vectors = self
            .embeddings
            .embed(&excerpts, Some(bot.llm_provider.as_str()))
            .await?;

        let chunks: Vec<NewChunk> = pieces
            .into_iter()
            .zip(vectors)
            .map(|(piece, vector)| NewChunk {
                chunk_index: piece.index as i32,
                excerpt: piece.excerpt,
                heading: piece.heading,
                publish_date,
                char_start: piece.char_start as i32,
                char_end: piece.char_end as i32,
                tokens_estimate: piece.tokens_estimate as i32,
                embedding: Vector::from(vector),
            })
            .collect();

        let count = self
            .repository
            .replace_chunks(source.id, source.bot_id, chunks)
            .await?;

        Ok(count)
    }
}

/// Fixed pool of background workers draining the ingestion queue. Sources
/// across bots run in parallel up to the pool size; work within one source
/// stays sequential inside its worker.
pub fn spawn_workers(
    coordinator: Arc<IngestionCoordinator>,
    receiver: flume::Receiver<IngestJob>,
    count: usize,
) {
    for worker_id in 0..count.max(1) {
        let coordinator = coordinator.clone();
        let receiver = receiver.clone();
        tokio::spawn(async move {
            info!(worker_id, "ingestion worker started");
            while let Ok(job) = receiver.recv_async().await {
                coordinator.run(job).await;
            }
            info!(worker_id, "ingestion worker stopped");
        });
    }
}

/// HTTP Last-Modified values are IMF-fixdate, which RFC 2822 parsing covers.
fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

fn filename_stem(storage_path: &str) -> Option<String> {
    let name = storage_path.rsplit('/').next()?;
    let stem = name.rsplit_once('.').map(|(s, _)| s).unwrap_or(name);
    if stem.is_empty() {
        None
    } else {
        Some(stem.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_dates_parse_to_utc() {
        let parsed = parse_http_date("Tue, 15 Nov 1994 08:12:31 GMT").unwrap();
        assert_eq!(parsed.to_rfc3339(), "1994-11-15T08:12:31+00:00");
        assert!(parse_http_date("not a date").is_none());
    }

    #[test]
    fn filename_stem_drops_directory_and_extension() {
        assert_eq!(
            filename_stem("bots/a/sources/b/handbook.pdf").as_deref(),
            Some("handbook")
        );
        assert_eq!(filename_stem("notes.txt").as_deref(), Some("notes"));
        assert_eq!(filename_stem("noext").as_deref(), Some("noext"));
        assert_eq!(filename_stem(""), None);
    }
}
