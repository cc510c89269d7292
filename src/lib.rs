//! # docchat
//!
//! Application layer around [`docchat_core`]: configuration, concrete
//! OpenAI-compatible providers, file text extraction, and snapshot
//! persistence. The `docchat` binary wires these into a CLI for ingesting
//! documents and asking questions about them.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and validation |
//! | [`providers`] | HTTP embedding/generation providers with retry |
//! | [`extract`] | Plain text and PDF extraction |
//! | [`snapshot`] | JSON index persistence |

pub mod config;
pub mod extract;
pub mod providers;
pub mod snapshot;
