//! Microsoft SQL Server driver.

mod connection;

pub use connection::MssqlConnection;
