//! Test support: a small threaded HTTP fixture server.

pub mod server;
