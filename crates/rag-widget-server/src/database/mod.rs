pub mod models;
pub mod pool;
pub mod repository;

pub use models::*;
pub use pool::Database;
pub use repository::Repository;
