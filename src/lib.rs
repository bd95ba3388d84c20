//! CRM screen capture and indicator extraction service.
//!
//! A bank employee uploads a client roster (CSV), picks a client, photographs
//! the CRM screen, and a multimodal model extracts the client's indicators,
//! product holdings and volumes into a fixed JSON structure.
//!
//! # Modules
//!
//! - `api`: HTTP-facing components.
//! - `core`: Roster ingestion, result types and session flow.
//! - `integrations`: Remote model client.
//! - `config`: Configuration management.
//! - `csv_ingestor`: Roster parsing with skipped-row diagnostics.
//! - `errors`: Error handling types.
//! - `extraction_schema`: Result types and the response schema derived from them.
//! - `extraction_service`: Retry and deadline around the model call.
//! - `gemini_client`: Gemini `generateContent` client.
//! - `handlers`: HTTP request handlers.
//! - `models`: Roster, session and API models.
//! - `session`: In-memory capture sessions.
//! - `summary`: Plain-text rendering of results.

pub mod api;
pub mod core;
pub mod integrations;

pub mod config;
pub mod csv_ingestor;
pub mod errors;
pub mod extraction_schema;
pub mod extraction_service;
pub mod gemini_client;
pub mod handlers;
pub mod models;
pub mod session;
pub mod summary;
