//! OAuth flow integration tests.

mod flow;
