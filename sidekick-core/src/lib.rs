#![doc = "sidekick-core: Notion sync engine and block renderer for sidekick."]

//! Mirrors Notion databases into a local SQLite store and renders the
//! synced content blocks to HTML.
//!
//! # Layout
//! - [`sync`]: the forward ([`sync::to_model`]) and reverse
//!   ([`sync::from_model`], [`sync::push`]) sync passes.
//! - [`property`] and [`block`]: conversion of remote property values and
//!   content blocks.
//! - [`render`]: stored blocks → markup.
//! - [`store`], [`model`]: the local schema and its SQLite persistence.
//! - [`collections`]: per-collection sync settings and [`collections::sync_all`].
//! - [`digest`], [`excerpt`]: newsletter helpers built on the synced data.
//! - [`contract`]: traits for the remote API, media download, templates and mail.

pub mod attachment;
pub mod block;
pub mod client;
pub mod collections;
pub mod config;
pub mod contract;
pub mod digest;
pub mod error;
pub mod excerpt;
pub mod model;
pub mod property;
pub mod remote;
pub mod render;
pub mod store;
pub mod sync;

pub use error::{Result, SyncError};
