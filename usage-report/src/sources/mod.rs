pub mod postgres_usage;

pub use postgres_usage::PostgresUsageSource;
