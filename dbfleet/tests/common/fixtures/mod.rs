pub mod fake_db;
pub mod test_data;

pub use fake_db::*;
pub use test_data::*;
