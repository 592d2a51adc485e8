//! SQLite-backed registry with an in-process read cache.

use std::collections::HashMap;

use {sqlx::SqlitePool, tokio::sync::RwLock, tracing::debug};

use {
    crate::{ContextPolicy, LlmDefinition, LlmPatch},
    orac_common::{ActorId, Audit, EngineError, EngineResult, new_id, now_ms},
};

/// Input for `Registry::register`.
#[derive(Debug, Clone)]
pub struct NewLlm {
    pub name: String,
    pub provider: String,
    pub model: String,
    pub context_policy: ContextPolicy,
    pub max_context_tokens: Option<i64>,
    pub enabled: bool,
    pub properties: serde_json::Value,
}

pub struct Registry {
    pool: SqlitePool,
    cache: RwLock<HashMap<String, LlmDefinition>>,
}

#[derive(sqlx::FromRow)]
struct LlmRow {
    id: String,
    name: String,
    provider: String,
    model: String,
    context_policy: String,
    max_context_tokens: Option<i64>,
    enabled: i64,
    properties: String,
    created_on: i64,
    created_by: String,
    updated_on: i64,
    updated_by: String,
    row_version: i64,
}

impl TryFrom<LlmRow> for LlmDefinition {
    type Error = EngineError;

    fn try_from(r: LlmRow) -> Result<Self, EngineError> {
        Ok(Self {
            id: r.id,
            name: r.name,
            provider: r.provider,
            model: r.model,
            context_policy: r.context_policy.parse()?,
            max_context_tokens: r.max_context_tokens,
            enabled: r.enabled != 0,
            properties: serde_json::from_str(&r.properties)
                .unwrap_or(serde_json::Value::Null),
            audit: Audit {
                created_on: r.created_on,
                created_by: r.created_by,
                updated_on: r.updated_on,
                updated_by: r.updated_by,
                row_version: r.row_version,
            },
        })
    }
}

impl Registry {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Create the `llm_definitions` table if it doesn't exist.
    pub async fn init(pool: &SqlitePool) -> EngineResult<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS llm_definitions (
                id                 TEXT PRIMARY KEY,
                name               TEXT NOT NULL UNIQUE,
                provider           TEXT NOT NULL,
                model              TEXT NOT NULL,
                context_policy     TEXT NOT NULL,
                max_context_tokens INTEGER,
                enabled            INTEGER NOT NULL DEFAULT 1,
                properties         TEXT NOT NULL DEFAULT 'null',
                created_on         INTEGER NOT NULL,
                created_by         TEXT NOT NULL,
                updated_on         INTEGER NOT NULL,
                updated_by         TEXT NOT NULL,
                row_version        INTEGER NOT NULL DEFAULT 1
            )"#,
        )
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Register a new LLM definition. Fails with `DuplicateName` if the
    /// name is taken.
    pub async fn register(&self, new: NewLlm, actor: &ActorId) -> EngineResult<LlmDefinition> {
        let audit = Audit::new(actor);
        let id = new_id();
        let properties = serde_json::to_string(&new.properties)
            .map_err(|e| EngineError::InvalidInput(e.to_string()))?;

        let res = sqlx::query(
            r#"INSERT INTO llm_definitions
               (id, name, provider, model, context_policy, max_context_tokens,
                enabled, properties, created_on, created_by, updated_on, updated_by)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&id)
        .bind(&new.name)
        .bind(&new.provider)
        .bind(&new.model)
        .bind(new.context_policy.as_str())
        .bind(new.max_context_tokens)
        .bind(new.enabled as i64)
        .bind(&properties)
        .bind(audit.created_on)
        .bind(&audit.created_by)
        .bind(audit.updated_on)
        .bind(&audit.updated_by)
        .execute(&self.pool)
        .await;

        if let Err(e) = res {
            if EngineError::is_unique_violation(&e) {
                return Err(EngineError::DuplicateName {
                    kind: "llm",
                    name: new.name,
                });
            }
            return Err(e.into());
        }

        debug!(name = %new.name, policy = new.context_policy.as_str(), "registered llm");
        let def = LlmDefinition {
            id,
            name: new.name,
            provider: new.provider,
            model: new.model,
            context_policy: new.context_policy,
            max_context_tokens: new.max_context_tokens,
            enabled: new.enabled,
            properties: new.properties,
            audit,
        };
        self.cache
            .write()
            .await
            .insert(def.name.clone(), def.clone());
        Ok(def)
    }

    /// Look up a definition by name, serving from cache when possible.
    pub async fn get(&self, name: &str) -> EngineResult<LlmDefinition> {
        if let Some(def) = self.cache.read().await.get(name) {
            return Ok(def.clone());
        }

        let row = sqlx::query_as::<_, LlmRow>("SELECT * FROM llm_definitions WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| EngineError::NotFound {
                kind: "llm",
                name: name.to_string(),
            })?;

        let def: LlmDefinition = row.try_into()?;
        self.cache
            .write()
            .await
            .insert(def.name.clone(), def.clone());
        Ok(def)
    }

    /// Versioned update. The patch cannot rename a definition; the name is
    /// the registry key.
    pub async fn update(
        &self,
        name: &str,
        patch: LlmPatch,
        expected_version: i64,
        actor: &ActorId,
    ) -> EngineResult<LlmDefinition> {
        let current = self.fetch_uncached(name).await?;

        let provider = patch.provider.unwrap_or(current.provider);
        let model = patch.model.unwrap_or(current.model);
        let policy = patch.context_policy.unwrap_or(current.context_policy);
        let max_tokens = patch
            .max_context_tokens
            .unwrap_or(current.max_context_tokens);
        let enabled = patch.enabled.unwrap_or(current.enabled);
        let properties = patch.properties.unwrap_or(current.properties);
        let properties_json = serde_json::to_string(&properties)
            .map_err(|e| EngineError::InvalidInput(e.to_string()))?;
        let now = now_ms();

        let res = sqlx::query(
            r#"UPDATE llm_definitions
               SET provider = ?, model = ?, context_policy = ?,
                   max_context_tokens = ?, enabled = ?, properties = ?,
                   updated_on = ?, updated_by = ?, row_version = row_version + 1
               WHERE name = ? AND row_version = ?"#,
        )
        .bind(&provider)
        .bind(&model)
        .bind(policy.as_str())
        .bind(max_tokens)
        .bind(enabled as i64)
        .bind(&properties_json)
        .bind(now)
        .bind(actor.as_str())
        .bind(name)
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        if res.rows_affected() == 0 {
            return Err(EngineError::StaleWrite {
                kind: "llm",
                id: current.id,
                expected: expected_version,
            });
        }

        // Invalidate, then repopulate from the authoritative row.
        self.cache.write().await.remove(name);
        self.get(name).await
    }

    /// List definitions, optionally only enabled ones, in name order.
    pub async fn list(&self, enabled_only: bool) -> EngineResult<Vec<LlmDefinition>> {
        let sql = if enabled_only {
            "SELECT * FROM llm_definitions WHERE enabled = 1 ORDER BY name"
        } else {
            "SELECT * FROM llm_definitions ORDER BY name"
        };
        let rows = sqlx::query_as::<_, LlmRow>(sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// Delete a definition. Rejected with `InUse` while any turn still
    /// references it — history is never silently cascaded.
    pub async fn remove(&self, name: &str, _actor: &ActorId) -> EngineResult<()> {
        let def = self.fetch_uncached(name).await?;

        let referenced: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM turns WHERE llm_id = ?")
                .bind(&def.id)
                .fetch_one(&self.pool)
                .await?;
        if referenced > 0 {
            return Err(EngineError::InUse {
                kind: "llm",
                name: name.to_string(),
            });
        }

        sqlx::query("DELETE FROM llm_definitions WHERE id = ?")
            .bind(&def.id)
            .execute(&self.pool)
            .await?;
        self.cache.write().await.remove(name);
        debug!(name, "removed llm definition");
        Ok(())
    }

    async fn fetch_uncached(&self, name: &str) -> EngineResult<LlmDefinition> {
        sqlx::query_as::<_, LlmRow>("SELECT * FROM llm_definitions WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| EngineError::NotFound {
                kind: "llm",
                name: name.to_string(),
            })?
            .try_into()
    }
}
