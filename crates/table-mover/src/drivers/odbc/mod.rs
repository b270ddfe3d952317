//! ODBC driver, the route to Oracle, H2 and other databases without a
//! native async client. Built with the `odbc` feature.

mod connection;

pub use connection::OdbcConnection;
