//! Threshold config repository implementation.

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{Pool, Postgres, Row};
use tracing::{debug, info};

use invex_core::{Error, IdentificationThresholdConfig, Result, ThresholdConfigStore};

const CONFIG_COLUMNS: &str = "id, barcode_threshold, hash_threshold, brand_model_threshold, \
     vision_match_threshold, vector_similarity_threshold, tag_category_threshold, \
     auto_approve_threshold, manual_validation_threshold, total_identifications, \
     correct_identifications, false_positives, false_negatives, accuracy, last_training_at, \
     training_samples, model_version, is_active, created_at";

/// PostgreSQL implementation of ThresholdConfigStore.
///
/// The single-active rule is enforced by a deferred exclusion constraint, so
/// `activate` can flip every row in one statement.
pub struct PgThresholdConfigRepository {
    pool: Pool<Postgres>,
}

impl PgThresholdConfigRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

fn row_to_config(row: &PgRow) -> IdentificationThresholdConfig {
    IdentificationThresholdConfig {
        id: row.get("id"),
        barcode_threshold: row.get("barcode_threshold"),
        hash_threshold: row.get("hash_threshold"),
        brand_model_threshold: row.get("brand_model_threshold"),
        vision_match_threshold: row.get("vision_match_threshold"),
        vector_similarity_threshold: row.get("vector_similarity_threshold"),
        tag_category_threshold: row.get("tag_category_threshold"),
        auto_approve_threshold: row.get("auto_approve_threshold"),
        manual_validation_threshold: row.get("manual_validation_threshold"),
        total_identifications: row.get("total_identifications"),
        correct_identifications: row.get("correct_identifications"),
        false_positives: row.get("false_positives"),
        false_negatives: row.get("false_negatives"),
        accuracy: row.get("accuracy"),
        last_training_at: row.get("last_training_at"),
        training_samples: row.get("training_samples"),
        model_version: row.get("model_version"),
        is_active: row.get("is_active"),
        created_at: row.get("created_at"),
    }
}

/// Bind every persisted field except `id` and `is_active`, as `$1..$17`.
fn bind_config_fields<'q>(
    query: Query<'q, Postgres, PgArguments>,
    config: &IdentificationThresholdConfig,
) -> Query<'q, Postgres, PgArguments> {
    query
        .bind(config.barcode_threshold)
        .bind(config.hash_threshold)
        .bind(config.brand_model_threshold)
        .bind(config.vision_match_threshold)
        .bind(config.vector_similarity_threshold)
        .bind(config.tag_category_threshold)
        .bind(config.auto_approve_threshold)
        .bind(config.manual_validation_threshold)
        .bind(config.total_identifications)
        .bind(config.correct_identifications)
        .bind(config.false_positives)
        .bind(config.false_negatives)
        .bind(config.accuracy)
        .bind(config.last_training_at)
        .bind(config.training_samples)
        .bind(config.model_version.clone())
        .bind(config.created_at)
}

#[async_trait]
impl ThresholdConfigStore for PgThresholdConfigRepository {
    async fn active(&self) -> Result<Option<IdentificationThresholdConfig>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM identification_threshold_config WHERE is_active",
            CONFIG_COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(row.as_ref().map(row_to_config))
    }

    async fn get(&self, id: i64) -> Result<Option<IdentificationThresholdConfig>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM identification_threshold_config WHERE id = $1",
            CONFIG_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(row.as_ref().map(row_to_config))
    }

    async fn save(
        &self,
        config: &IdentificationThresholdConfig,
    ) -> Result<IdentificationThresholdConfig> {
        config.validate()?;

        // Activation state is owned by `activate`; inserts start inactive and
        // updates leave is_active untouched.
        let sql = if config.id == 0 {
            format!(
                "INSERT INTO identification_threshold_config (
                     barcode_threshold, hash_threshold, brand_model_threshold,
                     vision_match_threshold, vector_similarity_threshold, tag_category_threshold,
                     auto_approve_threshold, manual_validation_threshold, total_identifications,
                     correct_identifications, false_positives, false_negatives, accuracy,
                     last_training_at, training_samples, model_version, is_active, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, FALSE, $17)
                 RETURNING {}",
                CONFIG_COLUMNS
            )
        } else {
            format!(
                "UPDATE identification_threshold_config SET
                     barcode_threshold = $1, hash_threshold = $2, brand_model_threshold = $3,
                     vision_match_threshold = $4, vector_similarity_threshold = $5,
                     tag_category_threshold = $6, auto_approve_threshold = $7,
                     manual_validation_threshold = $8, total_identifications = $9,
                     correct_identifications = $10, false_positives = $11, false_negatives = $12,
                     accuracy = $13, last_training_at = $14, training_samples = $15,
                     model_version = $16, created_at = $17
                 WHERE id = $18
                 RETURNING {}",
                CONFIG_COLUMNS
            )
        };

        let mut query = bind_config_fields(sqlx::query(&sql), config);
        if config.id != 0 {
            query = query.bind(config.id);
        }
        let row = query
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        let saved = row
            .as_ref()
            .map(row_to_config)
            .ok_or_else(|| Error::NotFound(format!("threshold config {}", config.id)))?;
        debug!(
            subsystem = "db",
            component = "threshold_configs",
            op = "save",
            config_id = saved.id,
            "Threshold config saved"
        );
        Ok(saved)
    }

    async fn activate(&self, id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let exists = sqlx::query("SELECT 1 FROM identification_threshold_config WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(Error::Database)?;
        if exists.is_none() {
            return Err(Error::NotFound(format!("threshold config {}", id)));
        }

        // Every row is rewritten so a concurrent activation blocks on the
        // row locks and re-evaluates against the committed winner.
        sqlx::query("UPDATE identification_threshold_config SET is_active = (id = $1)")
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;

        info!(
            subsystem = "db",
            component = "threshold_configs",
            op = "activate",
            config_id = id,
            "Threshold config activated"
        );
        Ok(())
    }

    async fn all_ordered_by_accuracy(&self) -> Result<Vec<IdentificationThresholdConfig>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM identification_threshold_config ORDER BY accuracy DESC, id DESC",
            CONFIG_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(rows.iter().map(row_to_config).collect())
    }

    async fn delete(&self, id: i64) -> Result<()> {
        let result = sqlx::query(
            "DELETE FROM identification_threshold_config WHERE id = $1 AND NOT is_active",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 1 {
            return Ok(());
        }
        match self.get(id).await? {
            Some(_) => Err(Error::Conflict(format!(
                "threshold config {} is active and cannot be deleted",
                id
            ))),
            None => Err(Error::NotFound(format!("threshold config {}", id))),
        }
    }
}
