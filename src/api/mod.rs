//! Structured results for hosts
//!
//! Every operation result can be wrapped in an [`ApiResponse`], which
//! serializes to `{"success": true, "data": ...}` or
//! `{"success": false, "errorKind": ..., "message": ...}`.

pub mod types;

pub use types::ApiResponse;
