//! MySQL driver.

mod connection;

pub use connection::MySqlConnection;
