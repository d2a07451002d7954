//! Product repository implementation.

use async_trait::async_trait;
use pgvector::Vector;
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use tracing::debug;

use invex_core::{
    EmbeddingVector, Error, NewProduct, Product, ProductLookup, RecognitionData, Result,
    SimilarProduct,
};

use crate::map_write_error;

const PRODUCT_COLUMNS: &str =
    "id, name, description, category_id, stock, min_stock, recognition, embedding, created_at, updated_at";

/// PostgreSQL implementation of ProductLookup.
///
/// Recognition data is stored as JSONB next to a native `vector` column
/// holding the embedding; image hash and barcode are generated columns so
/// the unique index on the hash can back the one-product-per-image rule.
pub struct PgProductRepository {
    pool: Pool<Postgres>,
}

impl PgProductRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    async fn fetch_many(&self, sql: &str, binds: Vec<Option<String>>) -> Result<Vec<Product>> {
        let mut query = sqlx::query(sql);
        for value in binds {
            query = query.bind(value);
        }
        let rows = query.fetch_all(&self.pool).await.map_err(Error::Database)?;
        rows.iter().map(row_to_product).collect()
    }

    async fn fetch_one(&self, sql: &str, binds: Vec<Option<String>>) -> Result<Option<Product>> {
        Ok(self.fetch_many(sql, binds).await?.into_iter().next())
    }
}

/// Trimmed owned bind value.
fn bind_text(value: Option<&str>) -> Option<String> {
    value.map(|v| v.trim().to_string())
}

fn row_to_product(row: &PgRow) -> Result<Product> {
    let recognition: Option<JsonValue> = row.get("recognition");
    let embedding: Option<Vector> = row.get("embedding");

    let recognition = match recognition {
        Some(value) => {
            let mut data: RecognitionData = serde_json::from_value(value)?;
            data.embedding = embedding.map(|v| v.to_vec());
            Some(data)
        }
        None => None,
    };

    Ok(Product {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        category_id: row.get("category_id"),
        stock: row.get("stock"),
        min_stock: row.get("min_stock"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        recognition,
    })
}

/// Split recognition data into the JSONB document and the native vector.
fn split_recognition(
    recognition: Option<&RecognitionData>,
) -> Result<(Option<JsonValue>, Option<Vector>)> {
    let Some(recognition) = recognition else {
        return Ok((None, None));
    };
    let embedding = recognition.embedding.clone().map(Vector::from);
    let mut document = recognition.clone();
    document.embedding = None;
    Ok((Some(serde_json::to_value(&document)?), embedding))
}

fn lowercase_all(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
        .collect()
}

#[async_trait]
impl ProductLookup for PgProductRepository {
    async fn get(&self, id: i64) -> Result<Option<Product>> {
        let row = sqlx::query(&format!("SELECT {} FROM product WHERE id = $1", PRODUCT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;
        row.as_ref().map(row_to_product).transpose()
    }

    async fn by_barcode(&self, barcode: &str) -> Result<Option<Product>> {
        self.fetch_one(
            &format!(
                "SELECT {} FROM product WHERE barcode = $1 ORDER BY id LIMIT 1",
                PRODUCT_COLUMNS
            ),
            vec![bind_text(Some(barcode))],
        )
        .await
    }

    async fn by_image_hash(&self, hash: &str) -> Result<Option<Product>> {
        self.fetch_one(
            &format!("SELECT {} FROM product WHERE image_hash = $1", PRODUCT_COLUMNS),
            vec![bind_text(Some(hash))],
        )
        .await
    }

    async fn by_brand_and_model(&self, brand: &str, model: &str) -> Result<Vec<Product>> {
        self.fetch_many(
            &format!(
                "SELECT {} FROM product
                 WHERE lower(recognition->>'brand') = lower($1)
                   AND lower(recognition->>'model') = lower($2)
                 ORDER BY id",
                PRODUCT_COLUMNS
            ),
            vec![bind_text(Some(brand)), bind_text(Some(model))],
        )
        .await
    }

    async fn by_exact_fields(
        &self,
        brand: Option<&str>,
        model: Option<&str>,
        category: Option<&str>,
    ) -> Result<Vec<Product>> {
        if brand.is_none() && model.is_none() && category.is_none() {
            return Ok(Vec::new());
        }
        self.fetch_many(
            &format!(
                "SELECT {} FROM product
                 WHERE recognition IS NOT NULL
                   AND ($1::text IS NULL OR lower(recognition->>'brand') = lower($1))
                   AND ($2::text IS NULL OR lower(recognition->>'model') = lower($2))
                   AND ($3::text IS NULL OR lower(recognition->>'inferred_category') = lower($3))
                 ORDER BY id",
                PRODUCT_COLUMNS
            ),
            vec![bind_text(brand), bind_text(model), bind_text(category)],
        )
        .await
    }

    async fn by_vector_similarity(
        &self,
        embedding: &EmbeddingVector,
        threshold: f32,
    ) -> Result<Option<SimilarProduct>> {
        if embedding.is_empty() {
            return Ok(None);
        }
        let query_vec = Vector::from(embedding.values.clone());

        let row = sqlx::query(&format!(
            "SELECT {}, 1.0 - (embedding <=> $1::vector) AS similarity
             FROM product
             WHERE embedding IS NOT NULL
               AND recognition->>'embedding_model' = $2
               AND vector_dims(embedding) = $3
             ORDER BY embedding <=> $1::vector, id
             LIMIT 1",
            PRODUCT_COLUMNS
        ))
        .bind(&query_vec)
        .bind(&embedding.model)
        .bind(embedding.dimension() as i32)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let similarity = row.get::<f64, _>("similarity") as f32;
        debug!(
            subsystem = "db",
            component = "products",
            op = "by_vector_similarity",
            similarity,
            threshold,
            "Nearest neighbor found"
        );
        if !similarity.is_finite() || similarity < threshold {
            return Ok(None);
        }
        Ok(Some(SimilarProduct {
            product: row_to_product(&row)?,
            similarity: similarity.clamp(0.0, 1.0),
        }))
    }

    async fn by_tags_and_category(
        &self,
        tags: &[String],
        category: Option<&str>,
    ) -> Result<Vec<Product>> {
        let tags = lowercase_all(tags);
        if tags.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(&format!(
            "SELECT {} FROM product
             WHERE EXISTS (
                     SELECT 1
                     FROM jsonb_array_elements_text(
                         COALESCE(recognition->'inferred_usage_tags', '[]'::jsonb)
                     ) AS t(tag)
                     WHERE lower(t.tag) = ANY($1)
                   )
               AND ($2::text IS NULL OR lower(recognition->>'inferred_category') = lower($2))
             ORDER BY id",
            PRODUCT_COLUMNS
        ))
        .bind(&tags)
        .bind(category.map(str::trim))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        rows.iter().map(row_to_product).collect()
    }

    async fn create(&self, product: NewProduct) -> Result<Product> {
        product.validate()?;
        let (recognition, embedding) = split_recognition(product.recognition.as_ref())?;

        let row = sqlx::query(&format!(
            "INSERT INTO product (name, description, category_id, stock, min_stock, recognition, embedding)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING {}",
            PRODUCT_COLUMNS
        ))
        .bind(product.name.trim())
        .bind(&product.description)
        .bind(product.category_id)
        .bind(product.stock)
        .bind(product.min_stock)
        .bind(recognition)
        .bind(embedding)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_write_error(e, "product with this image hash"))?;

        let created = row_to_product(&row)?;
        debug!(
            subsystem = "db",
            component = "products",
            op = "create",
            product_id = created.id,
            "Product created"
        );
        Ok(created)
    }

    async fn update(&self, product: &Product) -> Result<Product> {
        let (recognition, embedding) = split_recognition(product.recognition.as_ref())?;

        let row = sqlx::query(&format!(
            "UPDATE product
             SET name = $2, description = $3, category_id = $4, stock = $5, min_stock = $6,
                 recognition = $7, embedding = $8, updated_at = now()
             WHERE id = $1
             RETURNING {}",
            PRODUCT_COLUMNS
        ))
        .bind(product.id)
        .bind(product.name.trim())
        .bind(&product.description)
        .bind(product.category_id)
        .bind(product.stock)
        .bind(product.min_stock)
        .bind(recognition)
        .bind(embedding)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_write_error(e, "product with this image hash"))?;

        match row {
            Some(row) => row_to_product(&row),
            None => Err(Error::NotFound(format!("product {}", product.id))),
        }
    }
}
