//! Validation feedback repository implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use tracing::debug;

use invex_core::{
    CorrectionType, Error, MatchType, NewValidation, ProductIdentificationValidation, Result,
    ValidationSource, ValidationStore,
};

const VALIDATION_COLUMNS: &str = "id, image_hash, suggested_product_id, actual_product_id, \
     confidence_score, match_type, similarity_score, was_correct, correction_type, validated_by, \
     validated_at, feedback, source, sale_id, stock_id";

/// PostgreSQL implementation of ValidationStore. Rows are never updated.
pub struct PgValidationRepository {
    pool: Pool<Postgres>,
}

impl PgValidationRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    async fn count_where(&self, clause: &str) -> Result<i64> {
        let row = sqlx::query(&format!(
            "SELECT COUNT(*) AS count FROM product_identification_validation WHERE {}",
            clause
        ))
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(row.get("count"))
    }

    async fn count_correction(&self, correction: CorrectionType) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM product_identification_validation
             WHERE correction_type = $1",
        )
        .bind(correction.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(row.get("count"))
    }
}

fn row_to_validation(row: &PgRow) -> Result<ProductIdentificationValidation> {
    let match_type: Option<String> = row.get("match_type");
    let correction_type: String = row.get("correction_type");
    let source: String = row.get("source");

    Ok(ProductIdentificationValidation {
        id: row.get("id"),
        image_hash: row.get("image_hash"),
        suggested_product_id: row.get("suggested_product_id"),
        actual_product_id: row.get("actual_product_id"),
        confidence_score: row.get("confidence_score"),
        match_type: match_type
            .as_deref()
            .map(str::parse::<MatchType>)
            .transpose()?,
        similarity_score: row.get("similarity_score"),
        was_correct: row.get("was_correct"),
        correction_type: correction_type.parse()?,
        validated_by: row.get("validated_by"),
        validated_at: row.get("validated_at"),
        feedback: row.get("feedback"),
        source: source.parse::<ValidationSource>()?,
        sale_id: row.get("sale_id"),
        stock_id: row.get("stock_id"),
    })
}

#[async_trait]
impl ValidationStore for PgValidationRepository {
    async fn save(&self, validation: NewValidation) -> Result<ProductIdentificationValidation> {
        validation.validate()?;

        let row = sqlx::query(&format!(
            "INSERT INTO product_identification_validation (
                 image_hash, suggested_product_id, actual_product_id, confidence_score,
                 match_type, similarity_score, was_correct, correction_type, validated_by,
                 feedback, source, sale_id, stock_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
             RETURNING {}",
            VALIDATION_COLUMNS
        ))
        .bind(&validation.image_hash)
        .bind(validation.suggested_product_id)
        .bind(validation.actual_product_id)
        .bind(validation.confidence_score)
        .bind(validation.match_type.map(|m| m.as_str()))
        .bind(validation.similarity_score)
        .bind(validation.was_correct)
        .bind(validation.correction_type.as_str())
        .bind(&validation.validated_by)
        .bind(&validation.feedback)
        .bind(validation.source.as_str())
        .bind(validation.sale_id)
        .bind(validation.stock_id)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        let saved = row_to_validation(&row)?;
        debug!(
            subsystem = "db",
            component = "validations",
            op = "save",
            correction_type = %saved.correction_type,
            "Validation recorded"
        );
        Ok(saved)
    }

    async fn count_since(&self, since: Option<DateTime<Utc>>) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM product_identification_validation
             WHERE $1::timestamptz IS NULL OR validated_at > $1",
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(row.get("count"))
    }

    async fn find_since(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ProductIdentificationValidation>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM product_identification_validation
             WHERE $1::timestamptz IS NULL OR validated_at > $1
             ORDER BY validated_at, id",
            VALIDATION_COLUMNS
        ))
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        rows.iter().map(row_to_validation).collect()
    }

    async fn count_total(&self) -> Result<i64> {
        self.count_where("TRUE").await
    }

    async fn count_correct(&self) -> Result<i64> {
        self.count_where("was_correct").await
    }

    async fn count_improved(&self) -> Result<i64> {
        self.count_correction(CorrectionType::Improved).await
    }

    async fn count_false_positives(&self) -> Result<i64> {
        self.count_correction(CorrectionType::FalsePositive).await
    }

    async fn count_false_negatives(&self) -> Result<i64> {
        self.count_correction(CorrectionType::FalseNegative).await
    }

    async fn find_all(&self) -> Result<Vec<ProductIdentificationValidation>> {
        self.find_since(None).await
    }
}
