//! Integration tests that need a real Postgres instance (started through
//! testcontainers). The test targets live next to this file.
