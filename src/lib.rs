//! Pincer — a credential-isolation gateway.
//!
//! Sits between an untrusted autonomous agent and external HTTP APIs. The
//! agent holds an opaque proxy token (`pxr_…`) and never observes real API
//! keys: per call, the gateway resolves the token to an agent, checks the
//! agent's grant for the tool, decrypts the real secret just in time from a
//! keychain-rooted encrypted vault, performs the outbound call, scrubs the
//! secret, and appends a hash-chained audit entry.
//!
//! Module map:
//! - [`secrets`] — master key (OS keychain), AEAD cipher, SQLite vault.
//! - [`gateway`] — authentication, JIT injection/scrub, per-call pipeline.
//! - [`audit`] — append-only hash-chained JSONL log.
//! - [`callers`] — outbound adapter contract, retry base, provider adapters.
//! - [`tools`] — tool schemas and the argument-validation predicate.
//! - [`cli`] / [`server`] — control-plane commands and the stdio serve loop.

pub mod audit;
pub mod callers;
pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod protocol;
pub mod secrets;
pub mod server;
pub mod tools;

pub use error::PincerError;
