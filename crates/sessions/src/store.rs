//! Append-only turn storage.
//!
//! `turn_index` is assigned atomically with the insert via a single
//! `INSERT ... SELECT COALESCE(MAX(turn_index) + 1, 0)` statement, so two
//! concurrent appends to the same session can never be assigned the same
//! index. A loser that does interleave (e.g. under snapshot isolation)
//! hits the UNIQUE(session, turn_index) constraint and surfaces `Conflict`;
//! the retry is the caller's, with a freshly computed index.

use {sqlx::SqlitePool, tracing::debug};

use {
    crate::{Role, Turn, TurnPatch},
    orac_common::{ActorId, Audit, EngineError, EngineResult, new_id, now_ms},
};

/// Input for `TurnStore::append`.
#[derive(Debug, Clone)]
pub struct NewTurn {
    pub session: String,
    pub user_id: String,
    pub role: Role,
    pub content: serde_json::Value,
    pub llm_id: Option<String>,
    pub tokens_used: Option<i64>,
    pub meta: serde_json::Value,
}

/// Per-session aggregate for listings.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionSummary {
    pub session: String,
    pub turn_count: i64,
    pub last_activity: i64,
}

pub struct TurnStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct TurnRow {
    id: String,
    user_id: String,
    llm_id: Option<String>,
    session: String,
    turn_index: i64,
    role: String,
    content: String,
    tokens_used: Option<i64>,
    meta: String,
    created_on: i64,
    created_by: String,
    updated_on: i64,
    updated_by: String,
    row_version: i64,
}

impl TryFrom<TurnRow> for Turn {
    type Error = EngineError;

    fn try_from(r: TurnRow) -> Result<Self, EngineError> {
        Ok(Self {
            id: r.id,
            user_id: r.user_id,
            llm_id: r.llm_id,
            session: r.session,
            turn_index: r.turn_index,
            role: r.role.parse()?,
            content: serde_json::from_str(&r.content).unwrap_or(serde_json::Value::Null),
            tokens_used: r.tokens_used,
            meta: serde_json::from_str(&r.meta).unwrap_or(serde_json::Value::Null),
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

impl TurnStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the `turns` table if it doesn't exist. Requires the `users`
    /// and `llm_definitions` tables (foreign-key targets) to exist first.
    pub async fn init(pool: &SqlitePool) -> EngineResult<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS turns (
                id          TEXT PRIMARY KEY,
                user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                llm_id      TEXT REFERENCES llm_definitions(id) ON DELETE RESTRICT,
                session     TEXT NOT NULL,
                turn_index  INTEGER NOT NULL,
                role        TEXT NOT NULL,
                content     TEXT NOT NULL,
                tokens_used INTEGER,
                meta        TEXT NOT NULL DEFAULT 'null',
                created_on  INTEGER NOT NULL,
                created_by  TEXT NOT NULL,
                updated_on  INTEGER NOT NULL,
                updated_by  TEXT NOT NULL,
                row_version INTEGER NOT NULL DEFAULT 1,
                UNIQUE (session, turn_index)
            )"#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_turns_session ON turns(session, turn_index)")
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Append a turn, assigning the next `turn_index` for the session
    /// atomically with the insert (0 when the session is empty).
    pub async fn append(&self, new: NewTurn, actor: &ActorId) -> EngineResult<Turn> {
        let audit = Audit::new(actor);
        let id = new_id();
        let content = serde_json::to_string(&new.content)
            .map_err(|e| EngineError::InvalidInput(e.to_string()))?;
        let meta = serde_json::to_string(&new.meta)
            .map_err(|e| EngineError::InvalidInput(e.to_string()))?;

        let res = sqlx::query(
            r#"INSERT INTO turns
               (id, user_id, llm_id, session, turn_index, role, content,
                tokens_used, meta, created_on, created_by, updated_on, updated_by)
               VALUES (?, ?, ?, ?,
                       (SELECT COALESCE(MAX(turn_index) + 1, 0) FROM turns WHERE session = ?),
                       ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&id)
        .bind(&new.user_id)
        .bind(&new.llm_id)
        .bind(&new.session)
        .bind(&new.session)
        .bind(new.role.as_str())
        .bind(&content)
        .bind(new.tokens_used)
        .bind(&meta)
        .bind(audit.created_on)
        .bind(&audit.created_by)
        .bind(audit.updated_on)
        .bind(&audit.updated_by)
        .execute(&self.pool)
        .await;

        if let Err(e) = res {
            if EngineError::is_unique_violation(&e) {
                return Err(EngineError::Conflict {
                    session: new.session,
                });
            }
            return Err(e.into());
        }

        let turn = self.get(&id).await?;
        debug!(session = %turn.session, turn_index = turn.turn_index, role = turn.role.as_str(), "appended turn");
        Ok(turn)
    }

    pub async fn get(&self, id: &str) -> EngineResult<Turn> {
        sqlx::query_as::<_, TurnRow>("SELECT * FROM turns WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| EngineError::NotFound {
                kind: "turn",
                name: id.to_string(),
            })?
            .try_into()
    }

    /// Canonical conversation order: ascending `turn_index`, never
    /// recency-of-write. With `limit`, returns the latest `limit` turns
    /// below `before_index` (or the end), still in ascending order.
    pub async fn history(
        &self,
        session: &str,
        before_index: Option<i64>,
        limit: Option<i64>,
    ) -> EngineResult<Vec<Turn>> {
        let before = before_index.unwrap_or(i64::MAX);
        let mut rows = match limit {
            Some(n) => {
                sqlx::query_as::<_, TurnRow>(
                    r#"SELECT * FROM turns
                       WHERE session = ? AND turn_index < ?
                       ORDER BY turn_index DESC LIMIT ?"#,
                )
                .bind(session)
                .bind(before)
                .bind(n)
                .fetch_all(&self.pool)
                .await?
            },
            None => {
                sqlx::query_as::<_, TurnRow>(
                    r#"SELECT * FROM turns
                       WHERE session = ? AND turn_index < ?
                       ORDER BY turn_index DESC"#,
                )
                .bind(session)
                .bind(before)
                .fetch_all(&self.pool)
                .await?
            },
        };
        rows.reverse();
        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// Corrective edit. May not change `session` or `turn_index`; subject
    /// to the versioned-record contract.
    pub async fn edit(
        &self,
        turn_id: &str,
        patch: TurnPatch,
        expected_version: i64,
        actor: &ActorId,
    ) -> EngineResult<Turn> {
        let current = self.get(turn_id).await?;

        let content = patch.content.unwrap_or(current.content);
        let tokens_used = patch.tokens_used.unwrap_or(current.tokens_used);
        let meta = patch.meta.unwrap_or(current.meta);
        let content_json = serde_json::to_string(&content)
            .map_err(|e| EngineError::InvalidInput(e.to_string()))?;
        let meta_json = serde_json::to_string(&meta)
            .map_err(|e| EngineError::InvalidInput(e.to_string()))?;

        let res = sqlx::query(
            r#"UPDATE turns
               SET content = ?, tokens_used = ?, meta = ?,
                   updated_on = ?, updated_by = ?, row_version = row_version + 1
               WHERE id = ? AND row_version = ?"#,
        )
        .bind(&content_json)
        .bind(tokens_used)
        .bind(&meta_json)
        .bind(now_ms())
        .bind(actor.as_str())
        .bind(turn_id)
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        if res.rows_affected() == 0 {
            return Err(EngineError::StaleWrite {
                kind: "turn",
                id: turn_id.to_string(),
                expected: expected_version,
            });
        }
        self.get(turn_id).await
    }

    /// All sessions with turn counts, most recently active first.
    pub async fn list_sessions(&self) -> EngineResult<Vec<SessionSummary>> {
        #[derive(sqlx::FromRow)]
        struct Row {
            session: String,
            turn_count: i64,
            last_activity: i64,
        }

        let rows = sqlx::query_as::<_, Row>(
            r#"SELECT session, COUNT(*) AS turn_count, MAX(updated_on) AS last_activity
               FROM turns GROUP BY session ORDER BY last_activity DESC"#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| SessionSummary {
                session: r.session,
                turn_count: r.turn_count,
                last_activity: r.last_activity,
            })
            .collect())
    }
}
