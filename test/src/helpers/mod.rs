pub mod assertions;
pub mod test_client;
pub mod test_server;

pub use assertions::{eventually, spawn_receiver};
pub use test_client::{connect, trusting_config, unrelated_certificate};
pub use test_server::{fast_connection, TestServer};
