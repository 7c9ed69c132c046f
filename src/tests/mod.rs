//! Integration and unit tests for the BilderWald application.
//!
//! ## Test Modules
//!
//! - **scanner_tests**: Scanning, idempotent re-indexing, skip/reap behavior
//! - **repo_tests**: Pagination, tag filter semantics, cascading delete
//! - **storage_tests**: Object store put/get/range/presign/prefix-delete
//! - **media_tests**: Delivery modes, Range/206/416, HEAD mirroring
//! - **tag_cache_tests**: TTL caching and explicit invalidation
//! - **api_tests**: End-to-end router tests
//! - **config_tests**: Configuration loading and validation
//! - **db_tests**: Schema initialization and scan-state recovery
//! - **error_tests**: Error mapping and validation helpers
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test
//! ```

pub mod api_tests;
pub mod error_tests;
pub mod storage_tests;
pub mod tag_cache_tests;
