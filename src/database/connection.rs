use std::borrow::Cow;
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::report::PersistedResult;

pub struct Connection {
    pool: PgPool,
}

impl Connection {
    pub async fn connect<'a>(connection_string: Cow<'a, str>) -> Self {
        let pool = PgPool::connect(&connection_string)
            .await
            .expect("Failed to connect to database");
        Self { pool }
    }

    pub async fn run_migrations(&self) {
        sqlx::migrate!()
            .run(&self.pool)
            .await
            .expect("Failed to run migrations");
    }
}

#[derive(Debug)]
pub enum StoreError {
    Database(Box<dyn Error + Send + Sync>),
    DeadlineExceeded,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Database(e) => write!(f, "database error: {e}"),
            StoreError::DeadlineExceeded => write!(f, "store write exceeded its deadline"),
        }
    }
}

impl Error for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(Box::new(e))
    }
}

/// A registered student, as the user directory sees them.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub telegram_id: i64,
    pub name: String,
    pub level: Option<String>,
    pub test_completed: bool,
}

/// Resolves messaging-platform identities to internal user records.
pub trait UserDirectory: Send + Sync + 'static {
    fn register_user(
        &self,
        telegram_id: i64,
        name: &str,
    ) -> impl Future<Output = Result<UserRecord, StoreError>> + Send;

    fn find_user(
        &self,
        telegram_id: i64,
    ) -> impl Future<Output = Result<Option<UserRecord>, StoreError>> + Send;
}

/// Durable storage for completed placement sessions.
pub trait SaveSession: Send + Sync + 'static {
    fn save_session(
        &self,
        result: &PersistedResult,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

impl<S: SaveSession> SaveSession for Arc<S> {
    fn save_session(
        &self,
        result: &PersistedResult,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        (**self).save_session(result)
    }
}

fn user_record(row: &sqlx::postgres::PgRow) -> Result<UserRecord, sqlx::Error> {
    Ok(UserRecord {
        telegram_id: row.try_get("telegram_id")?,
        name: row.try_get("nome")?,
        level: row.try_get("nivel")?,
        test_completed: row.try_get("teste_concluido")?,
    })
}

impl UserDirectory for Connection {
    async fn register_user(&self, telegram_id: i64, name: &str) -> Result<UserRecord, StoreError> {
        let row = sqlx::query(
            "INSERT INTO usuarios (telegram_id, nome) VALUES ($1, $2) \
             ON CONFLICT (telegram_id) DO UPDATE SET nome = EXCLUDED.nome \
             RETURNING telegram_id, nome, nivel, teste_concluido",
        )
        .bind(telegram_id)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;

        Ok(user_record(&row)?)
    }

    async fn find_user(&self, telegram_id: i64) -> Result<Option<UserRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT telegram_id, nome, nivel, teste_concluido FROM usuarios WHERE telegram_id = $1",
        )
        .bind(telegram_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(user_record(&row)?)),
            None => Ok(None),
        }
    }
}

impl SaveSession for Connection {
    /// One logical transaction: the session row, its five answer rows and
    /// the user's new level, all or nothing.
    async fn save_session(&self, result: &PersistedResult) -> Result<(), StoreError> {
        log::debug!(
            "persisting session {} for {}",
            result.session_id,
            result.user_id
        );
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO sessoes_nivelamento \
             (uuid, telegram_id, categoria, tempo_total_segundos, acertos, nivel) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(result.session_id)
        .bind(result.user_id.0)
        .bind(result.category.tag())
        .bind(result.total_time_seconds as i64)
        .bind(i32::from(result.score))
        .bind(result.level)
        .execute(&mut *tx)
        .await?;

        for answer in &result.answers {
            sqlx::query(
                "INSERT INTO respostas_nivelamento \
                 (uuid, sessao_id, numero_questao, resultado, letra_correta, letra_enviada) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(uuid::Uuid::new_v4())
            .bind(result.session_id)
            .bind(i32::from(answer.question_number))
            .bind(answer.resolution.as_str())
            .bind(answer.correct_letter.as_str())
            .bind(answer.submitted_letter.map(|l| l.as_str()).unwrap_or(""))
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE usuarios SET nivel = $1, teste_concluido = TRUE WHERE telegram_id = $2")
            .bind(result.level)
            .bind(result.user_id.0)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}
