//! Repositories for run rows and the per-stage run log.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use kite_domain::{RunId, RunRecord, Stage};

/// Terminal/active run states as stored.
pub const RUN_RUNNING: &str = "RUNNING";
pub const RUN_COMPLETED: &str = "COMPLETED";
pub const RUN_FAILED: &str = "FAILED";

/// Insert the run row. Fails with a duplicate-key error when the run_id
/// already exists; the orchestrator maps that to DUPLICATE_RUN.
pub async fn insert_run(pool: &PgPool, run: &RunRecord, config_hash: &str) -> Result<()> {
    let result = sqlx::query(
        r#"
        insert into audit.runs (
          run_id, date, git_sha, feature_version, capital, dry_run,
          config_hash, status, started_at
        ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        on conflict (run_id) do nothing
        "#,
    )
    .bind(run.run_id.as_str())
    .bind(run.date)
    .bind(&run.git_sha)
    .bind(&run.feature_version)
    .bind(run.capital)
    .bind(run.dry_run)
    .bind(config_hash)
    .bind(RUN_RUNNING)
    .bind(run.started_at)
    .execute(pool)
    .await
    .context("insert_run failed")?;

    if result.rows_affected() == 0 {
        return Err(anyhow!("run already exists: {}", run.run_id));
    }
    Ok(())
}

pub async fn finish_run(pool: &PgPool, run_id: &RunId, status: &str) -> Result<()> {
    sqlx::query(
        r#"
        update audit.runs
        set status = $2, finished_at = now()
        where run_id = $1
        "#,
    )
    .bind(run_id.as_str())
    .bind(status)
    .execute(pool)
    .await
    .context("finish_run failed")?;
    Ok(())
}

#[derive(Clone, Debug, PartialEq)]
pub struct RunRow {
    pub record: RunRecord,
    pub config_hash: String,
    pub status: String,
    pub finished_at: Option<DateTime<Utc>>,
}

pub async fn fetch_run(pool: &PgPool, run_id: &RunId) -> Result<Option<RunRow>> {
    let row = sqlx::query(
        r#"
        select run_id, date, git_sha, feature_version, capital, dry_run,
               config_hash, status, started_at, finished_at
        from audit.runs
        where run_id = $1
        "#,
    )
    .bind(run_id.as_str())
    .fetch_optional(pool)
    .await
    .context("fetch_run failed")?;

    row.map(|row| row_to_run(&row)).transpose()
}

pub async fn fetch_recent_runs(pool: &PgPool, limit: i64) -> Result<Vec<RunRow>> {
    let rows = sqlx::query(
        r#"
        select run_id, date, git_sha, feature_version, capital, dry_run,
               config_hash, status, started_at, finished_at
        from audit.runs
        order by run_id desc
        limit $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("fetch_recent_runs failed")?;

    rows.iter().map(row_to_run).collect()
}

fn row_to_run(row: &sqlx::postgres::PgRow) -> Result<RunRow> {
    let run_id_s: String = row.try_get("run_id")?;
    Ok(RunRow {
        record: RunRecord {
            run_id: RunId::parse(&run_id_s)
                .ok_or_else(|| anyhow!("malformed run_id in db: {run_id_s}"))?,
            date: row.try_get("date")?,
            git_sha: row.try_get("git_sha")?,
            feature_version: row.try_get("feature_version")?,
            capital: row.try_get("capital")?,
            dry_run: row.try_get("dry_run")?,
            started_at: row.try_get("started_at")?,
        },
        config_hash: row.try_get("config_hash")?,
        status: row.try_get("status")?,
        finished_at: row.try_get("finished_at")?,
    })
}

// ---------------------------------------------------------------------------
// Stage log
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub struct StageRow {
    pub stage: Stage,
    pub status: String,
    pub detail: String,
    pub artifact_count: i64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Record a stage starting. Re-runs overwrite the previous attempt.
pub async fn stage_started(pool: &PgPool, run_id: &RunId, stage: Stage) -> Result<()> {
    sqlx::query(
        r#"
        insert into audit.run_stages (run_id, stage, status, started_at)
        values ($1, $2, 'RUNNING', now())
        on conflict (run_id, stage) do update
          set status = 'RUNNING',
              detail = '',
              artifact_count = 0,
              started_at = now(),
              finished_at = null
        "#,
    )
    .bind(run_id.as_str())
    .bind(stage.as_str())
    .execute(pool)
    .await
    .with_context(|| format!("stage_started failed for {}", stage.as_str()))?;
    Ok(())
}

/// Record a stage finishing (status COMPLETED / FAILED / SKIPPED, detail =
/// error kind for failures).
pub async fn stage_finished(
    pool: &PgPool,
    run_id: &RunId,
    stage: Stage,
    status: &str,
    detail: &str,
    artifact_count: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        update audit.run_stages
        set status = $3, detail = $4, artifact_count = $5, finished_at = now()
        where run_id = $1 and stage = $2
        "#,
    )
    .bind(run_id.as_str())
    .bind(stage.as_str())
    .bind(status)
    .bind(detail)
    .bind(artifact_count)
    .execute(pool)
    .await
    .with_context(|| format!("stage_finished failed for {}", stage.as_str()))?;
    Ok(())
}

pub async fn fetch_stages(pool: &PgPool, run_id: &RunId) -> Result<Vec<StageRow>> {
    let rows = sqlx::query(
        r#"
        select stage, status, detail, artifact_count, started_at, finished_at
        from audit.run_stages
        where run_id = $1
        order by started_at asc
        "#,
    )
    .bind(run_id.as_str())
    .fetch_all(pool)
    .await
    .context("fetch_stages failed")?;

    rows.into_iter()
        .map(|row| {
            let stage_s: String = row.try_get("stage")?;
            Ok(StageRow {
                stage: Stage::parse(&stage_s)
                    .ok_or_else(|| anyhow!("bad stage in db: {stage_s}"))?,
                status: row.try_get("status")?,
                detail: row.try_get("detail")?,
                artifact_count: row.try_get("artifact_count")?,
                started_at: row.try_get("started_at")?,
                finished_at: row.try_get("finished_at")?,
            })
        })
        .collect()
}
