pub mod builders;
pub mod db;

pub use builders::{ClassBuilder, EngineBuilder};
pub use db::TestDb;
