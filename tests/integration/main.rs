//! Integration tests

mod common;
mod e2e_test;
mod persistence_test;
mod replay_test;
