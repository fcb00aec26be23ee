pub mod postgres;

pub use postgres::PgJobStore;
