//! # invex-db
//!
//! Storage layer for invex product identification.
//!
//! This crate provides:
//! - Connection pool management
//! - PostgreSQL repositories for products, threshold configs and validations
//! - Vector similarity search with pgvector
//! - In-memory stores with the same guarantees, for tests and embedded use
//!
//! ## Example
//!
//! ```rust,ignore
//! use invex_db::{Database, ProductLookup};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/invex").await?;
//!     let product = db.products.by_barcode("4006381333931").await?;
//!     println!("{:?}", product.map(|p| p.name));
//!     Ok(())
//! }
//! ```

pub mod memory;
pub mod pool;
pub mod products;
pub mod threshold_configs;
pub mod validations;

// Always compiled so integration tests (in tests/) can use DEFAULT_TEST_DATABASE_URL
pub mod test_fixtures;

// Re-export core types
pub use invex_core::*;

pub use memory::{MemoryProductStore, MemoryThresholdConfigStore, MemoryValidationStore};
pub use pool::{
    create_pool, create_pool_with_config, database_url_from_env, log_pool_metrics, PoolConfig,
};
pub use products::PgProductRepository;
pub use threshold_configs::PgThresholdConfigRepository;
pub use validations::PgValidationRepository;

/// Map a write error, turning unique violations into `Error::Conflict`.
pub(crate) fn map_write_error(e: sqlx::Error, what: &str) -> Error {
    let unique = e
        .as_database_error()
        .is_some_and(|db_err| db_err.is_unique_violation());
    if unique {
        Error::Conflict(format!("{} already exists", what))
    } else {
        Error::Database(e)
    }
}

/// Combined database context with all repositories.
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Catalog products with recognition data.
    pub products: PgProductRepository,
    /// Versioned threshold configs.
    pub threshold_configs: PgThresholdConfigRepository,
    /// Append-only validation feedback.
    pub validations: PgValidationRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            products: PgProductRepository::new(pool.clone()),
            threshold_configs: PgThresholdConfigRepository::new(pool.clone()),
            validations: PgValidationRepository::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Connect using `DATABASE_URL` and `PoolConfig::from_env()`.
    pub async fn connect_from_env() -> Result<Self> {
        let url = database_url_from_env()?;
        Self::connect_with_config(&url, PoolConfig::from_env()).await
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}
