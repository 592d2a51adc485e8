//! Users and their preferences.

use {sqlx::SqlitePool, tracing::debug};

use orac_common::{ActorId, Audit, EngineError, EngineResult, new_id, now_ms};

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub email: Option<String>,
    /// Soft-deactivation flag; users are never hard-deleted while history
    /// references them unless the caller explicitly cascades.
    pub active: bool,
    #[serde(flatten)]
    pub audit: Audit,
}

/// A key/value setting scoped to one user. Unique on (user, key).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Preference {
    pub id: String,
    pub user_id: String,
    pub key: String,
    pub value: serde_json::Value,
    #[serde(flatten)]
    pub audit: Audit,
}

pub struct UserStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: String,
    username: String,
    display_name: String,
    email: Option<String>,
    active: i64,
    created_on: i64,
    created_by: String,
    updated_on: i64,
    updated_by: String,
    row_version: i64,
}

impl From<UserRow> for User {
    fn from(r: UserRow) -> Self {
        Self {
            id: r.id,
            username: r.username,
            display_name: r.display_name,
            email: r.email,
            active: r.active != 0,
            audit: Audit {
                created_on: r.created_on,
                created_by: r.created_by,
                updated_on: r.updated_on,
                updated_by: r.updated_by,
                row_version: r.row_version,
            },
        }
    }
}

#[derive(sqlx::FromRow)]
struct PreferenceRow {
    id: String,
    user_id: String,
    key: String,
    value: String,
    created_on: i64,
    created_by: String,
    updated_on: i64,
    updated_by: String,
    row_version: i64,
}

impl From<PreferenceRow> for Preference {
    fn from(r: PreferenceRow) -> Self {
        Self {
            id: r.id,
            user_id: r.user_id,
            key: r.key,
            value: serde_json::from_str(&r.value).unwrap_or(serde_json::Value::Null),
            audit: Audit {
                created_on: r.created_on,
                created_by: r.created_by,
                updated_on: r.updated_on,
                updated_by: r.updated_by,
                row_version: r.row_version,
            },
        }
    }
}

impl UserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the `users` and `preferences` tables if they don't exist.
    pub async fn init(pool: &SqlitePool) -> EngineResult<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS users (
                id           TEXT PRIMARY KEY,
                username     TEXT NOT NULL UNIQUE,
                display_name TEXT NOT NULL,
                email        TEXT,
                active       INTEGER NOT NULL DEFAULT 1,
                created_on   INTEGER NOT NULL,
                created_by   TEXT NOT NULL,
                updated_on   INTEGER NOT NULL,
                updated_by   TEXT NOT NULL,
                row_version  INTEGER NOT NULL DEFAULT 1
            )"#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS preferences (
                id          TEXT PRIMARY KEY,
                user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                key         TEXT NOT NULL,
                value       TEXT NOT NULL,
                created_on  INTEGER NOT NULL,
                created_by  TEXT NOT NULL,
                updated_on  INTEGER NOT NULL,
                updated_by  TEXT NOT NULL,
                row_version INTEGER NOT NULL DEFAULT 1,
                UNIQUE (user_id, key)
            )"#,
        )
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Register a new user. Fails with `DuplicateName` on a taken username.
    pub async fn create_user(
        &self,
        username: &str,
        display_name: &str,
        email: Option<&str>,
        actor: &ActorId,
    ) -> EngineResult<User> {
        let audit = Audit::new(actor);
        let id = new_id();

        let res = sqlx::query(
            r#"INSERT INTO users
               (id, username, display_name, email, active,
                created_on, created_by, updated_on, updated_by)
               VALUES (?, ?, ?, ?, 1, ?, ?, ?, ?)"#,
        )
        .bind(&id)
        .bind(username)
        .bind(display_name)
        .bind(email)
        .bind(audit.created_on)
        .bind(&audit.created_by)
        .bind(audit.updated_on)
        .bind(&audit.updated_by)
        .execute(&self.pool)
        .await;

        if let Err(e) = res {
            if EngineError::is_unique_violation(&e) {
                return Err(EngineError::DuplicateName {
                    kind: "user",
                    name: username.to_string(),
                });
            }
            return Err(e.into());
        }

        debug!(username, "created user");
        Ok(User {
            id,
            username: username.to_string(),
            display_name: display_name.to_string(),
            email: email.map(str::to_string),
            active: true,
            audit,
        })
    }

    pub async fn get_user(&self, id: &str) -> EngineResult<User> {
        sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Into::into)
            .ok_or_else(|| EngineError::NotFound {
                kind: "user",
                name: id.to_string(),
            })
    }

    pub async fn get_user_by_username(&self, username: &str) -> EngineResult<User> {
        sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?
            .map(Into::into)
            .ok_or_else(|| EngineError::NotFound {
                kind: "user",
                name: username.to_string(),
            })
    }

    /// All users in registration order.
    pub async fn list_users(&self) -> EngineResult<Vec<User>> {
        let rows = sqlx::query_as::<_, UserRow>("SELECT * FROM users ORDER BY created_on")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Soft-deactivate: history stays intact. Versioned.
    pub async fn deactivate_user(
        &self,
        id: &str,
        expected_version: i64,
        actor: &ActorId,
    ) -> EngineResult<User> {
        let res = sqlx::query(
            r#"UPDATE users
               SET active = 0, updated_on = ?, updated_by = ?,
                   row_version = row_version + 1
               WHERE id = ? AND row_version = ?"#,
        )
        .bind(now_ms())
        .bind(actor.as_str())
        .bind(id)
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        if res.rows_affected() == 0 {
            // Distinguish a missing user from a lost version race.
            self.get_user(id).await?;
            return Err(EngineError::StaleWrite {
                kind: "user",
                id: id.to_string(),
                expected: expected_version,
            });
        }
        self.get_user(id).await
    }

    /// Hard delete. Cascades preferences and turns (and transitively the
    /// turns' embedding chunks) via foreign keys.
    pub async fn delete_user(&self, id: &str, _actor: &ActorId) -> EngineResult<()> {
        let res = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(EngineError::NotFound {
                kind: "user",
                name: id.to_string(),
            });
        }
        debug!(user_id = id, "deleted user and cascaded history");
        Ok(())
    }

    /// Write a preference. `expected_version: None` inserts a new row and
    /// fails with `DuplicateName` if the key exists; `Some(v)` is a
    /// versioned update of the existing row.
    pub async fn put_preference(
        &self,
        user_id: &str,
        key: &str,
        value: serde_json::Value,
        expected_version: Option<i64>,
        actor: &ActorId,
    ) -> EngineResult<Preference> {
        let value_json = serde_json::to_string(&value)
            .map_err(|e| EngineError::InvalidInput(e.to_string()))?;

        match expected_version {
            None => {
                let audit = Audit::new(actor);
                let id = new_id();
                let res = sqlx::query(
                    r#"INSERT INTO preferences
                       (id, user_id, key, value,
                        created_on, created_by, updated_on, updated_by)
                       VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
                )
                .bind(&id)
                .bind(user_id)
                .bind(key)
                .bind(&value_json)
                .bind(audit.created_on)
                .bind(&audit.created_by)
                .bind(audit.updated_on)
                .bind(&audit.updated_by)
                .execute(&self.pool)
                .await;

                if let Err(e) = res {
                    if EngineError::is_unique_violation(&e) {
                        return Err(EngineError::DuplicateName {
                            kind: "preference",
                            name: format!("{user_id}/{key}"),
                        });
                    }
                    return Err(e.into());
                }
                Ok(Preference {
                    id,
                    user_id: user_id.to_string(),
                    key: key.to_string(),
                    value,
                    audit,
                })
            },
            Some(version) => {
                let res = sqlx::query(
                    r#"UPDATE preferences
                       SET value = ?, updated_on = ?, updated_by = ?,
                           row_version = row_version + 1
                       WHERE user_id = ? AND key = ? AND row_version = ?"#,
                )
                .bind(&value_json)
                .bind(now_ms())
                .bind(actor.as_str())
                .bind(user_id)
                .bind(key)
                .bind(version)
                .execute(&self.pool)
                .await?;

                if res.rows_affected() == 0 {
                    self.get_preference(user_id, key).await?;
                    return Err(EngineError::StaleWrite {
                        kind: "preference",
                        id: format!("{user_id}/{key}"),
                        expected: version,
                    });
                }
                self.get_preference(user_id, key).await
            },
        }
    }

    pub async fn get_preference(&self, user_id: &str, key: &str) -> EngineResult<Preference> {
        sqlx::query_as::<_, PreferenceRow>(
            "SELECT * FROM preferences WHERE user_id = ? AND key = ?",
        )
        .bind(user_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?
        .map(Into::into)
        .ok_or_else(|| EngineError::NotFound {
            kind: "preference",
            name: format!("{user_id}/{key}"),
        })
    }

    pub async fn list_preferences(&self, user_id: &str) -> EngineResult<Vec<Preference>> {
        let rows = sqlx::query_as::<_, PreferenceRow>(
            "SELECT * FROM preferences WHERE user_id = ? ORDER BY key",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn delete_preference(
        &self,
        user_id: &str,
        key: &str,
        _actor: &ActorId,
    ) -> EngineResult<()> {
        let res = sqlx::query("DELETE FROM preferences WHERE user_id = ? AND key = ?")
            .bind(user_id)
            .bind(key)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(EngineError::NotFound {
                kind: "preference",
                name: format!("{user_id}/{key}"),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> UserStore {
        let pool = orac_common::db::connect_memory().await.unwrap();
        UserStore::init(&pool).await.unwrap();
        UserStore::new(pool)
    }

    #[tokio::test]
    async fn create_get_and_duplicate_username() {
        let store = setup().await;
        let actor = ActorId::from("admin");

        let user = store
            .create_user("ada", "Ada Lovelace", Some("ada@example.com"), &actor)
            .await
            .unwrap();
        assert!(user.active);
        assert_eq!(user.audit.row_version, 1);

        let by_name = store.get_user_by_username("ada").await.unwrap();
        assert_eq!(by_name.id, user.id);

        let err = store
            .create_user("ada", "Other", None, &actor)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateName { .. }));
    }

    #[tokio::test]
    async fn deactivate_is_versioned() {
        let store = setup().await;
        let actor = ActorId::from("admin");
        let user = store.create_user("ada", "Ada", None, &actor).await.unwrap();

        let updated = store.deactivate_user(&user.id, 1, &actor).await.unwrap();
        assert!(!updated.active);
        assert_eq!(updated.audit.row_version, 2);

        let err = store.deactivate_user(&user.id, 1, &actor).await.unwrap_err();
        assert!(matches!(err, EngineError::StaleWrite { .. }));
    }

    #[tokio::test]
    async fn preference_lifecycle() {
        let store = setup().await;
        let actor = ActorId::from("admin");
        let user = store.create_user("ada", "Ada", None, &actor).await.unwrap();

        let pref = store
            .put_preference(
                &user.id,
                "theme",
                serde_json::json!({"mode": "dark"}),
                None,
                &actor,
            )
            .await
            .unwrap();
        assert_eq!(pref.audit.row_version, 1);

        // Re-insert without a version is a duplicate, not an update.
        let err = store
            .put_preference(&user.id, "theme", serde_json::json!("x"), None, &actor)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::DuplicateName {
                kind: "preference",
                ..
            }
        ));

        // Versioned update succeeds once.
        let pref = store
            .put_preference(
                &user.id,
                "theme",
                serde_json::json!({"mode": "light"}),
                Some(1),
                &actor,
            )
            .await
            .unwrap();
        assert_eq!(pref.audit.row_version, 2);
        assert_eq!(pref.value["mode"], "light");

        let err = store
            .put_preference(&user.id, "theme", serde_json::json!("y"), Some(1), &actor)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::StaleWrite { .. }));

        assert_eq!(store.list_preferences(&user.id).await.unwrap().len(), 1);
        store.delete_preference(&user.id, "theme", &actor).await.unwrap();
        assert!(store.get_preference(&user.id, "theme").await.is_err());
    }

    #[tokio::test]
    async fn delete_user_cascades_preferences() {
        let store = setup().await;
        let actor = ActorId::from("admin");
        let user = store.create_user("ada", "Ada", None, &actor).await.unwrap();
        store
            .put_preference(&user.id, "lang", serde_json::json!("en"), None, &actor)
            .await
            .unwrap();

        store.delete_user(&user.id, &actor).await.unwrap();
        assert!(store.get_user(&user.id).await.is_err());
        assert!(store.list_preferences(&user.id).await.unwrap().is_empty());
    }
}
