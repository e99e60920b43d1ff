use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tonic::async_trait;

use crate::config::StoreConfig;
use crate::scheduler::job::{
    SERVER_STATUS_ACCEPTED, SERVER_STATUS_FINISHED, SERVER_STATUS_TIMED_OUT,
};
use crate::scheduler::{Job, JobId, JobStatus, NewJob, OperationCosts};
use crate::store::{ClaimOutcome, JobStore, StoreError, StoreResult};

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS calculations (
        id BIGSERIAL PRIMARY KEY,
        operation TEXT NOT NULL,
        result DOUBLE PRECISION,
        status TEXT NOT NULL,
        created_time TIMESTAMPTZ NOT NULL,
        start_time TIMESTAMPTZ,
        end_time TIMESTAMPTZ,
        operation_server TEXT,
        server_status TEXT,
        add_duration BIGINT NOT NULL DEFAULT 0,
        subtract_duration BIGINT NOT NULL DEFAULT 0,
        multiply_duration BIGINT NOT NULL DEFAULT 0,
        divide_duration BIGINT NOT NULL DEFAULT 0,
        inactive_server_time BIGINT NOT NULL DEFAULT 0
    )
"#;

const JOB_COLUMNS: &str = "id, operation, result, status, created_time, start_time, end_time, \
     operation_server, server_status, add_duration, subtract_duration, multiply_duration, \
     divide_duration, inactive_server_time";

#[derive(sqlx::FromRow)]
struct JobRow {
    id: i64,
    operation: String,
    result: Option<f64>,
    status: String,
    created_time: DateTime<Utc>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    operation_server: Option<String>,
    server_status: Option<String>,
    add_duration: i64,
    subtract_duration: i64,
    multiply_duration: i64,
    divide_duration: i64,
    inactive_server_time: i64,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<JobStatus>()
            .map_err(|message| StoreError::Corrupt {
                id: row.id,
                message,
            })?;
        Ok(Job {
            id: row.id,
            operation: row.operation,
            costs: OperationCosts {
                add_duration: unsigned(row.add_duration),
                subtract_duration: unsigned(row.subtract_duration),
                multiply_duration: unsigned(row.multiply_duration),
                divide_duration: unsigned(row.divide_duration),
            },
            status,
            result: row.result,
            created_at: row.created_time,
            start_time: row.start_time,
            end_time: row.end_time,
            operation_server: row.operation_server,
            server_status: row.server_status,
            inactive_server_time: unsigned(row.inactive_server_time),
        })
    }
}

fn unsigned(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn signed(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn into_jobs(rows: Vec<JobRow>) -> StoreResult<Vec<Job>> {
    rows.into_iter().map(Job::try_from).collect()
}

/// Job store backed by the `calculations` table in PostgreSQL.
#[derive(Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect, then create the `calculations` table if it does not exist yet.
    pub async fn connect(config: &StoreConfig) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url)
            .await?;
        let store = Self::new(pool);
        store.ensure_schema().await?;
        tracing::info!("Database connection established");
        Ok(store)
    }

    pub async fn ensure_schema(&self) -> StoreResult<()> {
        sqlx::query(CREATE_TABLE).execute(&self.pool).await?;
        Ok(())
    }

}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn insert(&self, new_job: NewJob) -> StoreResult<Job> {
        let query = format!(
            r#"
            INSERT INTO calculations
                (operation, status, created_time, add_duration, subtract_duration,
                 multiply_duration, divide_duration, inactive_server_time)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {JOB_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, JobRow>(&query)
            .bind(&new_job.operation)
            .bind(JobStatus::Pending.as_str())
            .bind(Utc::now())
            .bind(signed(new_job.costs.add_duration))
            .bind(signed(new_job.costs.subtract_duration))
            .bind(signed(new_job.costs.multiply_duration))
            .bind(signed(new_job.costs.divide_duration))
            .bind(signed(new_job.inactive_server_time))
            .fetch_one(&self.pool)
            .await?;
        let job = Job::try_from(row)?;
        tracing::debug!(job_id = job.id, "Calculation record inserted");
        Ok(job)
    }

    async fn get(&self, id: JobId) -> StoreResult<Option<Job>> {
        let query = format!("SELECT {JOB_COLUMNS} FROM calculations WHERE id = $1");
        sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Job::try_from)
            .transpose()
    }

    async fn list(&self) -> StoreResult<Vec<Job>> {
        let query = format!("SELECT {JOB_COLUMNS} FROM calculations ORDER BY id");
        let rows = sqlx::query_as::<_, JobRow>(&query)
            .fetch_all(&self.pool)
            .await?;
        into_jobs(rows)
    }

    async fn pending_batch(&self, limit: usize) -> StoreResult<Vec<Job>> {
        let query = format!(
            "SELECT {JOB_COLUMNS} FROM calculations WHERE status = $1 ORDER BY id LIMIT $2"
        );
        let rows = sqlx::query_as::<_, JobRow>(&query)
            .bind(JobStatus::Pending.as_str())
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        into_jobs(rows)
    }

    async fn in_progress(&self) -> StoreResult<Vec<Job>> {
        let query = format!("SELECT {JOB_COLUMNS} FROM calculations WHERE status = $1 ORDER BY id");
        let rows = sqlx::query_as::<_, JobRow>(&query)
            .bind(JobStatus::InProgress.as_str())
            .fetch_all(&self.pool)
            .await?;
        into_jobs(rows)
    }

    async fn claim(
        &self,
        id: JobId,
        server: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<ClaimOutcome> {
        let result = sqlx::query(
            r#"
            UPDATE calculations
            SET status = $1, start_time = $2, operation_server = $3, server_status = $4
            WHERE id = $5 AND status = $6
            "#,
        )
        .bind(JobStatus::InProgress.as_str())
        .bind(now)
        .bind(server)
        .bind(SERVER_STATUS_ACCEPTED)
        .bind(id)
        .bind(JobStatus::Pending.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 1 {
            return Ok(ClaimOutcome::Claimed);
        }

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM calculations WHERE id = $1)")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        Ok(if exists {
            ClaimOutcome::NotPending
        } else {
            ClaimOutcome::NotFound
        })
    }

    async fn complete(&self, id: JobId, result: f64, now: DateTime<Utc>) -> StoreResult<()> {
        let outcome = sqlx::query(
            r#"
            UPDATE calculations
            SET result = $1, status = $2, end_time = $3, server_status = $4
            WHERE id = $5
            "#,
        )
        .bind(result)
        .bind(JobStatus::Completed.as_str())
        .bind(now)
        .bind(SERVER_STATUS_FINISHED)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if outcome.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn reset_to_pending(
        &self,
        id: JobId,
        observed_start: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let outcome = sqlx::query(
            r#"
            UPDATE calculations
            SET status = $1, start_time = NULL, server_status = $2
            WHERE id = $3 AND status = $4 AND start_time = $5
            "#,
        )
        .bind(JobStatus::Pending.as_str())
        .bind(SERVER_STATUS_TIMED_OUT)
        .bind(id)
        .bind(JobStatus::InProgress.as_str())
        .bind(observed_start)
        .execute(&self.pool)
        .await?;
        Ok(outcome.rows_affected() == 1)
    }

    async fn clear(&self) -> StoreResult<u64> {
        let outcome = sqlx::query("DELETE FROM calculations")
            .execute(&self.pool)
            .await?;
        Ok(outcome.rows_affected())
    }
}
