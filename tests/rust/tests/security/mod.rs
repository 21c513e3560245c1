//! Token and cookie security tests.

mod session;
