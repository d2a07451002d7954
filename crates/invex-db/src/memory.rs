//! In-memory store implementations.
//!
//! Used by the engine's integration tests and by deployments that do not
//! need persistence. Each store keeps its state behind a single tokio lock,
//! so the same uniqueness and single-active guarantees hold as in
//! PostgreSQL.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use invex_core::{
    CorrectionType, EmbeddingVector, Error, IdentificationThresholdConfig, NewProduct,
    NewValidation, Product, ProductIdentificationValidation, ProductLookup, Result,
    SimilarProduct, ThresholdConfigStore, ValidationStore,
};

/// Cosine similarity of two equal-length vectors; `None` for zero vectors
/// or mismatched lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some((dot / (norm_a.sqrt() * norm_b.sqrt())) as f32)
}

fn eq_ignore_case(stored: Option<&str>, wanted: &str) -> bool {
    stored.is_some_and(|s| s.trim().eq_ignore_ascii_case(wanted.trim()))
}

// =============================================================================
// PRODUCTS
// =============================================================================

#[derive(Default)]
struct ProductState {
    next_id: i64,
    products: BTreeMap<i64, Product>,
}

impl ProductState {
    fn hash_taken_by_other(&self, hash: Option<&str>, id: i64) -> bool {
        let Some(hash) = hash else {
            return false;
        };
        self.products
            .values()
            .any(|p| p.id != id && p.image_hash() == Some(hash))
    }
}

/// In-memory ProductLookup. Ids are assigned sequentially from 1.
#[derive(Default)]
pub struct MemoryProductStore {
    state: RwLock<ProductState>,
}

impl MemoryProductStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.products.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Snapshot of every stored product, by id.
    pub async fn all(&self) -> Vec<Product> {
        self.state.read().await.products.values().cloned().collect()
    }

    async fn filter<F>(&self, predicate: F) -> Vec<Product>
    where
        F: Fn(&Product) -> bool,
    {
        self.state
            .read()
            .await
            .products
            .values()
            .filter(|p| predicate(p))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ProductLookup for MemoryProductStore {
    async fn get(&self, id: i64) -> Result<Option<Product>> {
        Ok(self.state.read().await.products.get(&id).cloned())
    }

    async fn by_barcode(&self, barcode: &str) -> Result<Option<Product>> {
        let barcode = barcode.trim();
        Ok(self
            .filter(|p| p.barcode() == Some(barcode))
            .await
            .into_iter()
            .next())
    }

    async fn by_image_hash(&self, hash: &str) -> Result<Option<Product>> {
        let hash = hash.trim();
        Ok(self
            .filter(|p| p.image_hash() == Some(hash))
            .await
            .into_iter()
            .next())
    }

    async fn by_brand_and_model(&self, brand: &str, model: &str) -> Result<Vec<Product>> {
        Ok(self
            .filter(|p| eq_ignore_case(p.brand(), brand) && eq_ignore_case(p.model(), model))
            .await)
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
        Ok(self
            .filter(|p| {
                p.recognition.is_some()
                    && brand.map_or(true, |b| eq_ignore_case(p.brand(), b))
                    && model.map_or(true, |m| eq_ignore_case(p.model(), m))
                    && category.map_or(true, |c| eq_ignore_case(p.inferred_category(), c))
            })
            .await)
    }

    async fn by_vector_similarity(
        &self,
        embedding: &EmbeddingVector,
        threshold: f32,
    ) -> Result<Option<SimilarProduct>> {
        if embedding.is_empty() {
            return Ok(None);
        }
        let state = self.state.read().await;
        let mut best: Option<(f32, &Product)> = None;
        for product in state.products.values() {
            let Some(recognition) = product.recognition.as_ref() else {
                continue;
            };
            if recognition.embedding_model.as_deref() != Some(embedding.model.as_str()) {
                continue;
            }
            let Some(stored) = recognition.embedding.as_deref() else {
                continue;
            };
            let Some(similarity) = cosine_similarity(stored, &embedding.values) else {
                continue;
            };
            // Strictly greater keeps the lowest id on ties (BTreeMap order).
            if best.map_or(true, |(s, _)| similarity > s) {
                best = Some((similarity, product));
            }
        }
        Ok(best
            .filter(|(similarity, _)| *similarity >= threshold)
            .map(|(similarity, product)| SimilarProduct {
                product: product.clone(),
                similarity: similarity.clamp(0.0, 1.0),
            }))
    }

    async fn by_tags_and_category(
        &self,
        tags: &[String],
        category: Option<&str>,
    ) -> Result<Vec<Product>> {
        let wanted: Vec<String> = tags
            .iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        if wanted.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .filter(|p| {
                let Some(recognition) = p.recognition.as_ref() else {
                    return false;
                };
                let shares_tag = recognition
                    .inferred_usage_tags
                    .iter()
                    .any(|t| wanted.contains(&t.trim().to_lowercase()));
                shares_tag && category.map_or(true, |c| eq_ignore_case(p.inferred_category(), c))
            })
            .await)
    }

    async fn create(&self, product: NewProduct) -> Result<Product> {
        product.validate()?;
        let mut state = self.state.write().await;

        let hash = product
            .recognition
            .as_ref()
            .and_then(|r| r.image_hash.as_deref());
        if state.hash_taken_by_other(hash, 0) {
            return Err(Error::Conflict(
                "product with this image hash already exists".to_string(),
            ));
        }

        state.next_id += 1;
        let now = Utc::now();
        let created = Product {
            id: state.next_id,
            name: product.name.trim().to_string(),
            description: product.description,
            category_id: product.category_id,
            stock: product.stock,
            min_stock: product.min_stock,
            created_at: now,
            updated_at: now,
            recognition: product.recognition,
        };
        state.products.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update(&self, product: &Product) -> Result<Product> {
        let mut state = self.state.write().await;
        if !state.products.contains_key(&product.id) {
            return Err(Error::NotFound(format!("product {}", product.id)));
        }
        if state.hash_taken_by_other(product.image_hash(), product.id) {
            return Err(Error::Conflict(
                "product with this image hash already exists".to_string(),
            ));
        }
        let mut updated = product.clone();
        updated.updated_at = Utc::now();
        state.products.insert(updated.id, updated.clone());
        Ok(updated)
    }
}

// =============================================================================
// THRESHOLD CONFIGS
// =============================================================================

#[derive(Default)]
struct ConfigState {
    next_id: i64,
    configs: BTreeMap<i64, IdentificationThresholdConfig>,
}

/// In-memory ThresholdConfigStore. Activation flips every entry under one
/// write lock, so readers never observe zero or two active configs.
#[derive(Default)]
pub struct MemoryThresholdConfigStore {
    state: RwLock<ConfigState>,
}

impl MemoryThresholdConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of currently active configs (0 or 1).
    pub async fn active_count(&self) -> usize {
        self.state
            .read()
            .await
            .configs
            .values()
            .filter(|c| c.is_active)
            .count()
    }
}

#[async_trait]
impl ThresholdConfigStore for MemoryThresholdConfigStore {
    async fn active(&self) -> Result<Option<IdentificationThresholdConfig>> {
        Ok(self
            .state
            .read()
            .await
            .configs
            .values()
            .find(|c| c.is_active)
            .cloned())
    }

    async fn get(&self, id: i64) -> Result<Option<IdentificationThresholdConfig>> {
        Ok(self.state.read().await.configs.get(&id).cloned())
    }

    async fn save(
        &self,
        config: &IdentificationThresholdConfig,
    ) -> Result<IdentificationThresholdConfig> {
        config.validate()?;
        let mut state = self.state.write().await;

        let mut saved = config.clone();
        if saved.id == 0 {
            state.next_id += 1;
            saved.id = state.next_id;
            saved.is_active = false;
        } else {
            let existing = state
                .configs
                .get(&saved.id)
                .ok_or_else(|| Error::NotFound(format!("threshold config {}", saved.id)))?;
            saved.is_active = existing.is_active;
        }
        state.configs.insert(saved.id, saved.clone());
        Ok(saved)
    }

    async fn activate(&self, id: i64) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.configs.contains_key(&id) {
            return Err(Error::NotFound(format!("threshold config {}", id)));
        }
        for config in state.configs.values_mut() {
            config.is_active = config.id == id;
        }
        Ok(())
    }

    async fn all_ordered_by_accuracy(&self) -> Result<Vec<IdentificationThresholdConfig>> {
        let mut configs: Vec<_> = self.state.read().await.configs.values().cloned().collect();
        configs.sort_by(|a, b| b.accuracy.total_cmp(&a.accuracy).then(b.id.cmp(&a.id)));
        Ok(configs)
    }

    async fn delete(&self, id: i64) -> Result<()> {
        let mut state = self.state.write().await;
        match state.configs.get(&id) {
            None => Err(Error::NotFound(format!("threshold config {}", id))),
            Some(config) if config.is_active => Err(Error::Conflict(format!(
                "threshold config {} is active and cannot be deleted",
                id
            ))),
            Some(_) => {
                state.configs.remove(&id);
                Ok(())
            }
        }
    }
}

// =============================================================================
// VALIDATIONS
// =============================================================================

/// In-memory append-only ValidationStore.
#[derive(Default)]
pub struct MemoryValidationStore {
    validations: RwLock<Vec<ProductIdentificationValidation>>,
}

impl MemoryValidationStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn count_matching<F>(&self, predicate: F) -> i64
    where
        F: Fn(&ProductIdentificationValidation) -> bool,
    {
        self.validations
            .read()
            .await
            .iter()
            .filter(|v| predicate(v))
            .count() as i64
    }
}

#[async_trait]
impl ValidationStore for MemoryValidationStore {
    async fn save(&self, validation: NewValidation) -> Result<ProductIdentificationValidation> {
        validation.validate()?;
        let mut validations = self.validations.write().await;
        let saved = validation.into_validation(validations.len() as i64 + 1, Utc::now());
        validations.push(saved.clone());
        Ok(saved)
    }

    async fn count_since(&self, since: Option<DateTime<Utc>>) -> Result<i64> {
        Ok(self
            .count_matching(|v| since.map_or(true, |ts| v.validated_at > ts))
            .await)
    }

    async fn find_since(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ProductIdentificationValidation>> {
        Ok(self
            .validations
            .read()
            .await
            .iter()
            .filter(|v| since.map_or(true, |ts| v.validated_at > ts))
            .cloned()
            .collect())
    }

    async fn count_total(&self) -> Result<i64> {
        Ok(self.validations.read().await.len() as i64)
    }

    async fn count_correct(&self) -> Result<i64> {
        Ok(self.count_matching(|v| v.was_correct).await)
    }

    async fn count_improved(&self) -> Result<i64> {
        Ok(self
            .count_matching(|v| v.correction_type == CorrectionType::Improved)
            .await)
    }

    async fn count_false_positives(&self) -> Result<i64> {
        Ok(self
            .count_matching(|v| v.correction_type == CorrectionType::FalsePositive)
            .await)
    }

    async fn count_false_negatives(&self) -> Result<i64> {
        Ok(self
            .count_matching(|v| v.correction_type == CorrectionType::FalseNegative)
            .await)
    }

    async fn find_all(&self) -> Result<Vec<ProductIdentificationValidation>> {
        Ok(self.validations.read().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use invex_core::{RecognitionData, ValidationSource};

    use super::*;

    fn new_product(name: &str, hash: Option<&str>) -> NewProduct {
        NewProduct {
            name: name.to_string(),
            description: None,
            category_id: 1,
            stock: 0,
            min_stock: 0,
            recognition: Some(RecognitionData {
                image_hash: hash.map(str::to_string),
                ..Default::default()
            }),
        }
    }

    fn with_embedding(name: &str, values: Vec<f32>, model: &str) -> NewProduct {
        let mut product = new_product(name, None);
        if let Some(r) = product.recognition.as_mut() {
            r.embedding = Some(values);
            r.embedding_model = Some(model.to_string());
        }
        product
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]).unwrap() - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).unwrap().abs() < 1e-6);
        assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]).is_none());
        assert!(cosine_similarity(&[1.0], &[1.0, 0.0]).is_none());
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_hash() {
        let store = MemoryProductStore::new();
        store.create(new_product("A", Some("h1"))).await.unwrap();

        let err = store.create(new_product("B", Some("h1"))).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(store.len().await, 1);

        store.create(new_product("C", None)).await.unwrap();
        store.create(new_product("D", None)).await.unwrap();
        assert_eq!(store.len().await, 3);
    }

    #[tokio::test]
    async fn test_concurrent_creates_single_winner() {
        let store = Arc::new(MemoryProductStore::new());
        let mut handles = Vec::new();
        for i in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.create(new_product(&format!("P{}", i), Some("same"))).await
            }));
        }
        let mut ok = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                ok += 1;
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_vector_similarity_filters_model_and_threshold() {
        let store = MemoryProductStore::new();
        let near = store
            .create(with_embedding("near", vec![1.0, 0.1], "clip"))
            .await
            .unwrap();
        store
            .create(with_embedding("far", vec![0.0, 1.0], "clip"))
            .await
            .unwrap();
        store
            .create(with_embedding("other-model", vec![1.0, 0.0], "siglip"))
            .await
            .unwrap();

        let query = EmbeddingVector::new(vec![1.0, 0.0], "clip", 0.9);
        let hit = store.by_vector_similarity(&query, 0.8).await.unwrap().unwrap();
        assert_eq!(hit.product.id, near.id);
        assert!(hit.similarity > 0.99);

        assert!(store.by_vector_similarity(&query, 0.999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_exact_fields_requires_some_field() {
        let store = MemoryProductStore::new();
        let mut product = new_product("Drill", None);
        if let Some(r) = product.recognition.as_mut() {
            r.brand = Some("Acme".into());
            r.inferred_category = Some("Tools".into());
        }
        store.create(product).await.unwrap();

        assert!(store.by_exact_fields(None, None, None).await.unwrap().is_empty());
        assert_eq!(
            store
                .by_exact_fields(Some("ACME"), None, Some("tools"))
                .await
                .unwrap()
                .len(),
            1
        );
        assert!(store
            .by_exact_fields(Some("Acme"), Some("X9"), None)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_activate_keeps_single_active() {
        let store = MemoryThresholdConfigStore::new();
        let a = store.save(&IdentificationThresholdConfig::default()).await.unwrap();
        let b = store.save(&IdentificationThresholdConfig::default()).await.unwrap();

        store.activate(a.id).await.unwrap();
        store.activate(b.id).await.unwrap();

        assert_eq!(store.active_count().await, 1);
        assert_eq!(store.active().await.unwrap().unwrap().id, b.id);
        assert!(matches!(store.activate(99).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_save_preserves_activation() {
        let store = MemoryThresholdConfigStore::new();
        let a = store.save(&IdentificationThresholdConfig::default()).await.unwrap();
        store.activate(a.id).await.unwrap();

        let mut edited = a.clone();
        edited.is_active = false;
        edited.accuracy = 0.5;
        let saved = store.save(&edited).await.unwrap();
        assert!(saved.is_active);
    }

    #[tokio::test]
    async fn test_delete_active_config_conflicts() {
        let store = MemoryThresholdConfigStore::new();
        let a = store.save(&IdentificationThresholdConfig::default()).await.unwrap();
        let b = store.save(&IdentificationThresholdConfig::default()).await.unwrap();
        store.activate(a.id).await.unwrap();

        assert!(matches!(store.delete(a.id).await, Err(Error::Conflict(_))));
        store.delete(b.id).await.unwrap();
        assert!(matches!(store.delete(b.id).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_validation_counts() {
        let store = MemoryValidationStore::new();
        let before = Utc::now() - chrono::Duration::seconds(1);
        for (i, correction) in [
            CorrectionType::Correct,
            CorrectionType::Improved,
            CorrectionType::FalsePositive,
        ]
        .into_iter()
        .enumerate()
        {
            store
                .save(NewValidation {
                    image_hash: format!("h{}", i),
                    suggested_product_id: Some(1),
                    actual_product_id: Some(1),
                    confidence_score: 0.8,
                    match_type: None,
                    similarity_score: None,
                    was_correct: correction != CorrectionType::FalsePositive,
                    correction_type: correction,
                    validated_by: None,
                    feedback: None,
                    source: ValidationSource::Manual,
                    sale_id: None,
                    stock_id: None,
                })
                .await
                .unwrap();
        }

        assert_eq!(store.count_total().await.unwrap(), 3);
        assert_eq!(store.count_correct().await.unwrap(), 2);
        assert_eq!(store.count_improved().await.unwrap(), 1);
        assert_eq!(store.count_false_positives().await.unwrap(), 1);
        assert_eq!(store.count_false_negatives().await.unwrap(), 0);
        assert_eq!(store.count_since(Some(before)).await.unwrap(), 3);
        assert_eq!(store.count_since(Some(Utc::now())).await.unwrap(), 0);
        assert_eq!(store.find_all().await.unwrap()[0].id, 1);
    }
}
