//! code-sandbox library
//!
//! This crate provides the core functionality for the code-sandbox service:
//! - Language strategy table and recipe loading
//! - Scratch files for file-based execution
//! - Backend trait and the local process backend
//! - Result normalization and request orchestration
//! - HTTP interface built on axum

pub mod backend;
pub mod config;
pub mod error;
pub mod http;
pub mod language;
pub mod normalize;
pub mod sandbox;
pub mod scratch;
