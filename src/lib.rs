//! # BilderWald Backend Library
//!
//! This is the core library for BilderWald, an image-library indexing and
//! media-delivery backend. BilderWald scans registered directory roots for
//! image files, renders bounded-size JPEG thumbnails, stores originals and
//! derivatives in an object store and keeps tag-based metadata queryable
//! with cursor-stable pagination.
//!
//! ## Architecture
//!
//! The application is built using:
//! - **Axum**: Modern web framework for HTTP server and routing
//! - **SQLx**: Asynchronous database operations with SQLite
//! - **Tokio**: Async runtime for concurrent operations
//! - **image**: Thumbnail decoding, resizing and JPEG encoding
//! - **Serde**: Serialization/deserialization for JSON APIs
//!
//! ## Core Components
//!
//! - [`config`]: Application configuration management
//! - [`db`]: Database schema initialization and index management
//! - [`error`]: Centralized error handling and HTTP error responses
//! - [`metrics`]: Application performance and usage metrics
//! - [`middleware`]: HTTP middleware for security and validation
//! - [`repo`]: Metadata repository (libraries, images, tags)
//! - [`routes`]: HTTP API endpoint handlers
//! - [`scanner`]: Concurrent library scanning engine
//! - [`state`]: Shared application state and scan registry
//! - [`storage`]: Object store gateway for originals and thumbnails
//! - [`tag_cache`]: TTL-bounded tag-count aggregation cache
//! - [`thumbs`]: Derivative (thumbnail) generator
//! - [`types`]: Data transfer objects and shared type definitions
//!
//! ## Features
//!
//! - Bounded-parallel directory scanning with live progress counters
//! - Idempotent incremental indexing via deterministic composite ids
//! - Real-time scan updates via Server-Sent Events (SSE)
//! - Three media delivery modes: proxy (Range-aware), redirect, url
//! - Presigned object access with signature and expiry checks
//! - Cursor-stable filtered pagination over tag metadata
//! - Comprehensive error handling and logging

pub mod config;
pub mod db;
pub mod error;
pub mod metrics;
pub mod middleware;
pub mod repo;
pub mod routes;
pub mod scanner;
pub mod state;
pub mod storage;
pub mod tag_cache;
pub mod thumbs;
pub mod types;

#[cfg(test)]
mod tests;
