use anyhow::Result;
use chrono::{DateTime, Utc};
use pgvector::Vector;
use sqlx::types::Json;
use tracing::debug;
use uuid::Uuid;

use super::models::{
    Bot, CitationSource, LlmProvider, LlmSettings, NewChunk, NewQueryLog, ScoredChunk, Source,
    SourceStatus, SourceType, WidgetToken,
};
use super::Database;

/// All SQL lives here. Every owner-scoped read or write filters on
/// `bots.owner_id`; widget-scoped operations take the bot id resolved from a
/// validated token and touch nothing else.
pub struct Repository {
    db: Database,
}

impl Repository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn pool(&self) -> &sqlx::PgPool {
        self.db.pool()
    }

    // ------------------------------------------------------------------
    // Bots
    // ------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub async fn create_bot(
        &self,
        owner_id: Uuid,
        name: &str,
        description: Option<&str>,
        system_prompt: &str,
        llm_provider: LlmProvider,
        llm_config: &LlmSettings,
        rate_limit_per_min: Option<i32>,
        retention_days: i32,
    ) -> Result<Bot> {
        let bot = sqlx::query_as::<_, Bot>(
            r#"INSERT INTO bots
               (owner_id, name, description, system_prompt, llm_provider,
                llm_config, rate_limit_per_min, retention_days)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
               RETURNING *"#,
        )
        .bind(owner_id)
        .bind(name)
        .bind(description)
        .bind(system_prompt)
        .bind(llm_provider)
        .bind(Json(llm_config))
        .bind(rate_limit_per_min)
        .bind(retention_days)
        .fetch_one(self.pool())
        .await?;

        Ok(bot)
    }

    pub async fn list_bots(&self, owner_id: Uuid) -> Result<Vec<Bot>> {
        let bots = sqlx::query_as::<_, Bot>(
            "SELECT * FROM bots WHERE owner_id = $1 ORDER BY created_at DESC",
        )
        .bind(owner_id)
        .fetch_all(self.pool())
        .await?;

        Ok(bots)
    }

    /// Ownership-gated read: absent row and foreign row are indistinguishable.
    pub async fn get_bot_owned(&self, bot_id: Uuid, owner_id: Uuid) -> Result<Option<Bot>> {
        let bot = sqlx::query_as::<_, Bot>("SELECT * FROM bots WHERE id = $1 AND owner_id = $2")
            .bind(bot_id)
            .bind(owner_id)
            .fetch_optional(self.pool())
            .await?;

        Ok(bot)
    }

    /// Widget-scope read: only callable with a bot id resolved from a
    /// validated widget token.
    pub async fn get_bot_by_id(&self, bot_id: Uuid) -> Result<Option<Bot>> {
        let bot = sqlx::query_as::<_, Bot>("SELECT * FROM bots WHERE id = $1")
            .bind(bot_id)
            .fetch_optional(self.pool())
            .await?;

        Ok(bot)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn update_bot(
        &self,
        bot_id: Uuid,
        owner_id: Uuid,
        name: Option<&str>,
        description: Option<&str>,
        system_prompt: Option<&str>,
        llm_provider: Option<LlmProvider>,
        llm_config: Option<&LlmSettings>,
        rate_limit_per_min: Option<i32>,
        retention_days: Option<i32>,
    ) -> Result<Option<Bot>> {
        let bot = sqlx::query_as::<_, Bot>(
            r#"UPDATE bots SET
                 name = COALESCE($3, name),
                 description = COALESCE($4, description),
                 system_prompt = COALESCE($5, system_prompt),
                 llm_provider = COALESCE($6, llm_provider),
                 llm_config = COALESCE($7, llm_config),
                 rate_limit_per_min = COALESCE($8, rate_limit_per_min),
                 retention_days = COALESCE($9, retention_days),
                 updated_at = now()
               WHERE id = $1 AND owner_id = $2
               RETURNING *"#,
        )
        .bind(bot_id)
        .bind(owner_id)
        .bind(name)
        .bind(description)
        .bind(system_prompt)
        .bind(llm_provider)
        .bind(llm_config.map(Json))
        .bind(rate_limit_per_min)
        .bind(retention_days)
        .fetch_optional(self.pool())
        .await?;

        Ok(bot)
    }

    /// Cascades through sources, chunks, query logs, widget tokens and rate
    /// counters via the schema's foreign keys.
    pub async fn delete_bot(&self, bot_id: Uuid, owner_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM bots WHERE id = $1 AND owner_id = $2")
            .bind(bot_id)
            .bind(owner_id)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // ------------------------------------------------------------------
    // Sources
    // ------------------------------------------------------------------

    /// The id is generated by the caller so the object-store path can embed
    /// it before the row exists.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_source(
        &self,
        id: Uuid,
        bot_id: Uuid,
        source_type: SourceType,
        original_url: Option<&str>,
        storage_path: &str,
        page_checksum: Option<&str>,
        file_size: Option<i64>,
        mime_type: Option<&str>,
    ) -> Result<Source> {
        let source = sqlx::query_as::<_, Source>(
            r#"INSERT INTO sources
               (id, bot_id, source_type, original_url, storage_path,
                page_checksum, file_size, mime_type, status)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'uploaded')
               RETURNING *"#,
        )
        .bind(id)
        .bind(bot_id)
        .bind(source_type)
        .bind(original_url)
        .bind(storage_path)
        .bind(page_checksum)
        .bind(file_size)
        .bind(mime_type)
        .fetch_one(self.pool())
        .await?;

        Ok(source)
    }

    pub async fn list_sources(&self, bot_id: Uuid) -> Result<Vec<Source>> {
        let sources = sqlx::query_as::<_, Source>(
            "SELECT * FROM sources WHERE bot_id = $1 ORDER BY created_at DESC",
        )
        .bind(bot_id)
        .fetch_all(self.pool())
        .await?;

        Ok(sources)
    }

    pub async fn get_source(&self, bot_id: Uuid, source_id: Uuid) -> Result<Option<Source>> {
        let source =
            sqlx::query_as::<_, Source>("SELECT * FROM sources WHERE id = $1 AND bot_id = $2")
                .bind(source_id)
                .bind(bot_id)
                .fetch_optional(self.pool())
                .await?;

        Ok(source)
    }

    /// Deletes the row (chunks cascade) and hands back the storage path so
    /// the caller can drop the object bytes.
    pub async fn delete_source(&self, bot_id: Uuid, source_id: Uuid) -> Result<Option<String>> {
        let path = sqlx::query_scalar::<_, String>(
            "DELETE FROM sources WHERE id = $1 AND bot_id = $2 RETURNING storage_path",
        )
        .bind(source_id)
        .bind(bot_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(path)
    }

    pub async fn update_source_status(
        &self,
        source_id: Uuid,
        status: SourceStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"UPDATE sources
               SET status = $2, error_message = $3, updated_at = now()
               WHERE id = $1"#,
        )
        .bind(source_id)
        .bind(status)
        .bind(error_message)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    pub async fn update_source_crawl_meta(
        &self,
        source_id: Uuid,
        canonical_url: &str,
        etag: Option<&str>,
        last_modified: Option<&str>,
        page_checksum: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"UPDATE sources
               SET canonical_url = $2, etag = $3, last_modified = $4,
                   page_checksum = $5, updated_at = now()
               WHERE id = $1"#,
        )
        .bind(source_id)
        .bind(canonical_url)
        .bind(etag)
        .bind(last_modified)
        .bind(page_checksum)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    // ------------------------------------------------------------------
    // Chunks
    // ------------------------------------------------------------------

    /// All-or-nothing replacement of a source's chunks; keeps the
    /// "indexed implies fully embedded" invariant.
    pub async fn replace_chunks(
        &self,
        source_id: Uuid,
        bot_id: Uuid,
        chunks: Vec<NewChunk>,
    ) -> Result<usize> {
        let mut transaction = self.pool().begin().await?;

        sqlx::query("DELETE FROM chunks WHERE source_id = $1")
            .bind(source_id)
            .execute(&mut *transaction)
            .await?;

        let count = chunks.len();
        for chunk in chunks {
            sqlx::query(
                r#"INSERT INTO chunks
                   (source_id, bot_id, chunk_index, excerpt, heading,
                    publish_date, char_start, char_end, tokens_estimate, embedding)
                   VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"#,
            )
            .bind(source_id)
            .bind(bot_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.excerpt)
            .bind(&chunk.heading)
            .bind(chunk.publish_date)
            .bind(chunk.char_start)
            .bind(chunk.char_end)
            .bind(chunk.tokens_estimate)
            .bind(chunk.embedding)
            .execute(&mut *transaction)
            .await?;
        }

        transaction.commit().await?;
        debug!(source_id = %source_id, chunks = count, "persisted chunks");

        Ok(count)
    }

    pub async fn source_has_chunks(&self, source_id: Uuid) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM chunks WHERE source_id = $1)",
        )
        .bind(source_id)
        .fetch_one(self.pool())
        .await?;

        Ok(exists)
    }

    // ------------------------------------------------------------------
    // Vector search
    // ------------------------------------------------------------------

    /// Tenant-scoped cosine ANN search. Score is `1 - cosine_distance`; ties
    /// break on chunk id for determinism.
    pub async fn search_chunks(
        &self,
        bot_id: Uuid,
        query_vec: Vector,
        top_k: i64,
        min_score: f32,
    ) -> Result<Vec<ScoredChunk>> {
        let chunks = sqlx::query_as::<_, ScoredChunk>(
            r#"SELECT id AS chunk_id, excerpt, heading, publish_date,
                      (1 - (embedding <=> $2))::float4 AS score
               FROM chunks
               WHERE bot_id = $1
                 AND embedding IS NOT NULL
                 AND (1 - (embedding <=> $2))::float4 >= $3
               ORDER BY score DESC, id ASC
               LIMIT $4"#,
        )
        .bind(bot_id)
        .bind(query_vec)
        .bind(min_score)
        .bind(top_k)
        .fetch_all(self.pool())
        .await?;

        debug!(bot_id = %bot_id, hits = chunks.len(), "vector search");

        Ok(chunks)
    }

    pub async fn get_citation_sources(&self, chunk_ids: &[Uuid]) -> Result<Vec<CitationSource>> {
        let rows = sqlx::query_as::<_, CitationSource>(
            r#"SELECT c.id AS chunk_id, s.source_type, s.original_url,
                      s.canonical_url, s.storage_path
               FROM chunks c
               JOIN sources s ON s.id = c.source_id
               WHERE c.id = ANY($1)"#,
        )
        .bind(chunk_ids)
        .fetch_all(self.pool())
        .await?;

        Ok(rows)
    }

    // ------------------------------------------------------------------
    // Query logs
    // ------------------------------------------------------------------

    pub async fn insert_query_log(&self, log: &NewQueryLog) -> Result<Uuid> {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"INSERT INTO query_logs
               (bot_id, session_id, query_text, page_url, returned_sources,
                response_summary, tokens_used, prompt_tokens, completion_tokens,
                confidence, latency_ms)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
               RETURNING id"#,
        )
        .bind(log.bot_id)
        .bind(&log.session_id)
        .bind(&log.query_text)
        .bind(&log.page_url)
        .bind(Json(&log.returned_sources))
        .bind(&log.response_summary)
        .bind(log.tokens_used)
        .bind(log.prompt_tokens)
        .bind(log.completion_tokens)
        .bind(log.confidence)
        .bind(log.latency_ms)
        .fetch_one(self.pool())
        .await?;

        Ok(id)
    }

    /// Drops logs older than each bot's retention window.
    pub async fn purge_expired_query_logs(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"DELETE FROM query_logs q
               USING bots b
               WHERE q.bot_id = b.id
                 AND q.created_at < now() - make_interval(days => b.retention_days)"#,
        )
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }

    // ------------------------------------------------------------------
    // Widget tokens
    // ------------------------------------------------------------------

    pub async fn insert_widget_token(
        &self,
        bot_id: Uuid,
        token_hash: &str,
        token_prefix: &str,
        allowed_domains: &[String],
        expires_at: Option<DateTime<Utc>>,
        name: Option<&str>,
    ) -> Result<WidgetToken> {
        let token = sqlx::query_as::<_, WidgetToken>(
            r#"INSERT INTO widget_tokens
               (bot_id, token_hash, token_prefix, allowed_domains, expires_at, name)
               VALUES ($1, $2, $3, $4, $5, $6)
               RETURNING *"#,
        )
        .bind(bot_id)
        .bind(token_hash)
        .bind(token_prefix)
        .bind(allowed_domains)
        .bind(expires_at)
        .bind(name)
        .fetch_one(self.pool())
        .await?;

        Ok(token)
    }

    pub async fn list_widget_tokens(&self, bot_id: Uuid) -> Result<Vec<WidgetToken>> {
        let tokens = sqlx::query_as::<_, WidgetToken>(
            "SELECT * FROM widget_tokens WHERE bot_id = $1 ORDER BY created_at DESC",
        )
        .bind(bot_id)
        .fetch_all(self.pool())
        .await?;

        Ok(tokens)
    }

    pub async fn delete_widget_token(&self, bot_id: Uuid, token_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM widget_tokens WHERE id = $1 AND bot_id = $2")
            .bind(token_id)
            .bind(bot_id)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn find_widget_token_by_hash(&self, token_hash: &str) -> Result<Option<WidgetToken>> {
        let token = sqlx::query_as::<_, WidgetToken>(
            "SELECT * FROM widget_tokens WHERE lower(token_hash) = lower($1)",
        )
        .bind(token_hash)
        .fetch_optional(self.pool())
        .await?;

        Ok(token)
    }

    /// Best-effort; validation must not fail on a lost update here.
    pub async fn touch_widget_token(&self, token_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE widget_tokens SET last_used_at = now() WHERE id = $1")
            .bind(token_id)
            .execute(self.pool())
            .await?;

        Ok(())
    }

    // ------------------------------------------------------------------
    // Rate counters
    // ------------------------------------------------------------------

    /// Atomic single-round-trip increment; returns the count after this
    /// request so the caller can compare against the bot's limit.
    pub async fn increment_rate_counter(
        &self,
        bot_id: Uuid,
        window_start: DateTime<Utc>,
    ) -> Result<i32> {
        let count = sqlx::query_scalar::<_, i32>(
            r#"INSERT INTO rate_counters (bot_id, window_start, count)
               VALUES ($1, $2, 1)
               ON CONFLICT (bot_id, window_start)
               DO UPDATE SET count = rate_counters.count + 1
               RETURNING count"#,
        )
        .bind(bot_id)
        .bind(window_start)
        .fetch_one(self.pool())
        .await?;

        Ok(count)
    }

    pub async fn sweep_rate_counters(&self) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM rate_counters WHERE window_start < now() - interval '1 hour'")
                .execute(self.pool())
                .await?;

        Ok(result.rows_affected())
    }
}
