//! Integration tests for the connection manager

mod loopback_tests;
mod reconnect_tests;
mod support;
