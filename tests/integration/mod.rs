//! Integration tests for twirl
//! These drive the listener router and subscription manager together

// Shared fixtures
pub mod test_harness;

// Individual test modules
pub mod eventsub_callback_test;
pub mod maintenance_test;
pub mod webhook_callback_test;
