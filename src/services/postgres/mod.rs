use crate::config::PostgresConfig;
use crate::error::{RecommenderError, Result};
use crate::models::*;
use crate::services::interactions::ActivityWeightStore;
use crate::services::similarity::{CommitReceipt, SimilarityCommit, SimilarityRepository, VersionRef};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{debug, info};

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Opens the pool and applies pending migrations.
pub async fn connect(config: &PostgresConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await?;

    MIGRATOR
        .run(&pool)
        .await
        .map_err(|e| RecommenderError::Storage(format!("migration failed: {}", e)))?;

    info!(max_connections = config.max_connections, "Connected to PostgreSQL");
    Ok(pool)
}

#[derive(Debug, sqlx::FromRow)]
struct VersionRow {
    id: i64,
    item_type: String,
    created_at: DateTime<Utc>,
    n_topics: i32,
    n_items_at_training_time: i32,
}

impl TryFrom<VersionRow> for SimilarityVersion {
    type Error = RecommenderError;

    fn try_from(row: VersionRow) -> Result<Self> {
        Ok(SimilarityVersion {
            id: row.id,
            item_type: row.item_type.parse()?,
            created_at: row.created_at,
            n_topics: row.n_topics.max(0) as usize,
            n_items_at_training_time: row.n_items_at_training_time.max(0) as usize,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EdgeRow {
    id: i64,
    source_item_id: i64,
    target_item_id: i64,
    item_type: String,
    similarity: f64,
    version_id: i64,
}

impl TryFrom<EdgeRow> for SimilarityEdge {
    type Error = RecommenderError;

    fn try_from(row: EdgeRow) -> Result<Self> {
        Ok(SimilarityEdge {
            id: row.id,
            source_item_id: row.source_item_id,
            target_item_id: row.target_item_id,
            item_type: row.item_type.parse()?,
            similarity: row.similarity,
            version_id: row.version_id,
        })
    }
}

fn convert<R, T>(rows: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = RecommenderError>,
{
    rows.into_iter().map(T::try_from).collect()
}

pub struct PgSimilarityRepository {
    pool: PgPool,
}

impl PgSimilarityRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SimilarityRepository for PgSimilarityRepository {
    async fn latest_version(&self, item_type: ItemType) -> Result<Option<SimilarityVersion>> {
        let row = sqlx::query_as::<_, VersionRow>(
            r#"
            SELECT id, item_type, created_at, n_topics, n_items_at_training_time
            FROM similarity_versions
            WHERE item_type = $1
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(item_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(SimilarityVersion::try_from).transpose()
    }

    async fn versions(&self, item_type: ItemType) -> Result<Vec<SimilarityVersion>> {
        let rows = sqlx::query_as::<_, VersionRow>(
            r#"
            SELECT id, item_type, created_at, n_topics, n_items_at_training_time
            FROM similarity_versions
            WHERE item_type = $1
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(item_type.as_str())
        .fetch_all(&self.pool)
        .await?;

        convert(rows)
    }

    async fn edges_for_type(&self, item_type: ItemType) -> Result<Vec<SimilarityEdge>> {
        let rows = sqlx::query_as::<_, EdgeRow>(
            r#"
            SELECT id, source_item_id, target_item_id, item_type, similarity, version_id
            FROM similarity_edges
            WHERE item_type = $1
            ORDER BY id
            "#,
        )
        .bind(item_type.as_str())
        .fetch_all(&self.pool)
        .await?;

        convert(rows)
    }

    async fn edges_for_item(
        &self,
        item_type: ItemType,
        item_id: ItemId,
        min_similarity: f64,
    ) -> Result<Vec<SimilarityEdge>> {
        let rows = sqlx::query_as::<_, EdgeRow>(
            r#"
            SELECT id, source_item_id, target_item_id, item_type, similarity, version_id
            FROM similarity_edges
            WHERE item_type = $1
              AND (source_item_id = $2 OR target_item_id = $2)
              AND similarity >= $3
            ORDER BY similarity DESC, id
            "#,
        )
        .bind(item_type.as_str())
        .bind(item_id)
        .bind(min_similarity)
        .fetch_all(&self.pool)
        .await?;

        convert(rows)
    }

    async fn commit(&self, commit: SimilarityCommit) -> Result<CommitReceipt> {
        let mut tx = self.pool.begin().await?;
        let item_type = commit.item_type.as_str();

        let version_id = match &commit.version {
            VersionRef::New(version) => {
                sqlx::query_scalar::<_, i64>(
                    r#"
                    INSERT INTO similarity_versions (item_type, created_at, n_topics, n_items_at_training_time)
                    VALUES ($1, $2, $3, $4)
                    RETURNING id
                    "#,
                )
                .bind(version.item_type.as_str())
                .bind(version.created_at)
                .bind(version.n_topics as i32)
                .bind(version.n_items_at_training_time as i32)
                .fetch_one(&mut *tx)
                .await?
            }
            VersionRef::Existing(id) => {
                let exists = sqlx::query_scalar::<_, bool>(
                    "SELECT EXISTS(SELECT 1 FROM similarity_versions WHERE id = $1 AND item_type = $2)",
                )
                .bind(*id)
                .bind(item_type)
                .fetch_one(&mut *tx)
                .await?;
                if !exists {
                    return Err(RecommenderError::MissingSimilarityData {
                        item_type: commit.item_type,
                    });
                }
                *id
            }
        };

        if !commit.updates.is_empty() {
            let ids: Vec<i64> = commit.updates.iter().map(|u| u.edge_id).collect();
            let similarities: Vec<f64> = commit.updates.iter().map(|u| u.similarity).collect();

            let updated = sqlx::query(
                r#"
                UPDATE similarity_edges AS e
                SET similarity = u.similarity, version_id = $3
                FROM UNNEST($1::BIGINT[], $2::DOUBLE PRECISION[]) AS u(id, similarity)
                WHERE e.id = u.id
                "#,
            )
            .bind(&ids)
            .bind(&similarities)
            .bind(version_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            // Dropping the transaction rolls back the version insert too.
            if updated as usize != commit.updates.len() {
                return Err(RecommenderError::StoreWriteConflict(format!(
                    "{} of {} edges vanished before update",
                    commit.updates.len() - updated as usize,
                    commit.updates.len()
                )));
            }
        }

        if !commit.inserts.is_empty() {
            let sources: Vec<i64> = commit.inserts.iter().map(|e| e.source_item_id).collect();
            let targets: Vec<i64> = commit.inserts.iter().map(|e| e.target_item_id).collect();
            let similarities: Vec<f64> = commit.inserts.iter().map(|e| e.similarity).collect();

            sqlx::query(
                r#"
                INSERT INTO similarity_edges (source_item_id, target_item_id, item_type, similarity, version_id)
                SELECT source, target, $4, similarity, $5
                FROM UNNEST($1::BIGINT[], $2::BIGINT[], $3::DOUBLE PRECISION[]) AS t(source, target, similarity)
                "#,
            )
            .bind(&sources)
            .bind(&targets)
            .bind(&similarities)
            .bind(item_type)
            .bind(version_id)
            .execute(&mut *tx)
            .await?;
        }

        let purged = sqlx::query("DELETE FROM similarity_edges WHERE item_type = $1 AND similarity = 0")
            .bind(item_type)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;

        debug!(
            item_type = %commit.item_type,
            version_id,
            inserted = commit.inserts.len(),
            updated = commit.updates.len(),
            purged,
            "Committed similarity edges"
        );

        Ok(CommitReceipt {
            version_id,
            inserted: commit.inserts.len(),
            updated: commit.updates.len(),
            purged: purged as usize,
        })
    }
}

pub struct PgActivityWeightStore {
    pool: PgPool,
}

impl PgActivityWeightStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ActivityWeightStore for PgActivityWeightStore {
    async fn get_or_create(&self, activity_name: &str, default_weight: f64) -> Result<f64> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO activity_weights (activity_name, weight)
            VALUES ($1, $2)
            ON CONFLICT (activity_name) DO NOTHING
            "#,
        )
        .bind(activity_name)
        .bind(default_weight)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted > 0 {
            info!(activity = %activity_name, weight = default_weight, "Created default activity weight");
        }

        let weight = sqlx::query_scalar::<_, f64>("SELECT weight FROM activity_weights WHERE activity_name = $1")
            .bind(activity_name)
            .fetch_one(&self.pool)
            .await?;
        Ok(weight)
    }

    async fn all(&self) -> Result<Vec<ActivityWeight>> {
        let rows = sqlx::query_as::<_, (String, f64)>(
            "SELECT activity_name, weight FROM activity_weights ORDER BY activity_name",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(activity_name, weight)| ActivityWeight {
                activity_name,
                weight,
            })
            .collect())
    }

    async fn upsert_many(&self, weights: &[ActivityWeight]) -> Result<()> {
        if weights.is_empty() {
            return Ok(());
        }
        let names: Vec<String> = weights.iter().map(|w| w.activity_name.clone()).collect();
        let values: Vec<f64> = weights.iter().map(|w| w.weight).collect();

        sqlx::query(
            r#"
            INSERT INTO activity_weights (activity_name, weight)
            SELECT * FROM UNNEST($1::VARCHAR[], $2::DOUBLE PRECISION[])
            ON CONFLICT (activity_name) DO UPDATE SET weight = EXCLUDED.weight
            "#,
        )
        .bind(&names)
        .bind(&values)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
