//! PostgreSQL driver.

mod connection;
mod params;

pub use connection::PgConnection;
pub use params::{decode_value, PgParam};
