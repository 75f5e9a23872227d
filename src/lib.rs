//! Municipal meeting agenda ingestion and enrichment pipeline.
//!
//! Syncs agendas from the meeting-management platforms US city councils
//! publish through (PrimeGov, CivicClerk, Legistar, Granicus, NovusAgenda,
//! CivicPlus), extracts structured items and attachments, and turns them
//! into searchable summaries with canonical topic tags.
//!
//! The flow: the conductor's sync loop asks a vendor adapter for meetings,
//! stores them with their items, and enqueues each processable packet. The
//! processing loop drains the queue - cache lookup, PDF text extraction,
//! optional item detection, LLM summarization - and persists summaries and
//! topics back onto the store.

pub mod conductor;
pub mod config;
pub mod db;
pub mod error;
pub mod filters;
pub mod http;
mod migrations;
pub mod parsing;
pub mod processor;
pub mod summarizer;
pub mod topics;
pub mod types;
pub mod validator;
pub mod vendors;
