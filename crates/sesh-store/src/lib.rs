pub mod database;
pub mod error;
pub mod feed;
pub mod functions;
pub mod overrides;
pub mod parties;
pub mod row_helpers;
pub mod schema;
pub mod sessions;
pub mod ticks;
pub mod users;
pub mod votes;

pub use database::Database;
pub use error::StoreError;
