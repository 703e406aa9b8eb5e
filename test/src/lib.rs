//! End-to-end harness: real tandem servers and clients talking over loopback

pub mod helpers;

pub use helpers::*;
