pub mod batch;
pub mod config;
pub mod domain;
pub mod error;
pub mod form;
pub mod h2h;
pub mod poisson;
pub mod prediction;
pub mod prediction_cache;
pub mod seeded;
pub mod sqlite_store;
pub mod store;
pub mod streak;
