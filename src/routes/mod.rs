//! HTTP route handlers for the BilderWald API.
//!
//! Each sub-module handles a specific domain of functionality:
//!
//! - `health`: Health check and system status endpoints
//! - `images`: Filtered, cursor-paged image listing and single fetch
//! - `libraries`: Library lifecycle, scan triggering and progress
//! - `media`: Original/thumbnail delivery (proxy/redirect/url, Range-aware)
//! - `store`: Presigned object access
//! - `tags`: Tag aggregation, apply/remove and batch mutation

pub mod health;
pub mod images;
pub mod libraries;
pub mod media;
pub mod store;
pub mod tags;
