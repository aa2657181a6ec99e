//! # Itemforge - item blob auditing and duplication
//!
//! Itemforge reads the opaque per-item property blobs stored in a game server's
//! SQLite persistence snapshot, turns them into typed property models, reports who
//! owns how many of an item, and replays a model onto a freshly spawned copy through
//! the server's command channel.
//!
//! ## Features
//!
//! - **Blob decoding**: Anchor-based, bounds-checked decoding of header, strings and property blocks, with truncation reported instead of guessed.
//! - **Property schema**: Category-aware int/float typing of property ids, built in or loaded from TOML.
//! - **Ownership audit**: Character, clan and container ownership resolved against a read-only snapshot.
//! - **Duplication**: Spawn, wait for sync, inject; one state machine per job, many jobs concurrently.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use itemforge::blob;
//! use itemforge::schema::PropertySchema;
//! use itemforge::snapshot::{InventoryType, SnapshotDb};
//!
//! fn main() -> anyhow::Result<()> {
//!     let db = SnapshotDb::open("game.db")?;
//!     if let Some(row) = db.item(201709, 31, InventoryType::Backpack)? {
//!         let model = blob::decode(&row.data, row.template_id)?;
//!         for property in model.resolve(&PropertySchema::builtin()) {
//!             println!("{} = {}", property.id, property.value);
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`blob`] - binary item blob decoder
//! - [`model`] - decoded property model and comparison
//! - [`schema`] - property id typing
//! - [`snapshot`] - read-only SQLite access and ownership resolution
//! - [`audit`] - per-template ownership reports and the item name catalog
//! - [`dupe`] - duplication state machine and the command channel seam
//! - [`config`] - TOML configuration
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐      ┌─────────────────┐
//! │ Snapshot (ro)   │ ───▶ │  Blob decoder   │ ← pure, bounds-checked
//! └─────────────────┘      └─────────────────┘
//!          │                        │
//! ┌─────────────────┐      ┌─────────────────┐
//! │ Ownership/Audit │      │   Duplicator    │ ← one job per request
//! └─────────────────┘      └─────────────────┘
//!                                   │
//!                          ┌─────────────────┐
//!                          │ Command channel │ ← server console verbs
//!                          └─────────────────┘
//! ```

pub mod audit;
pub mod blob;
pub mod config;
pub mod dupe;
pub mod errors;
pub mod logutil;
pub mod model;
pub mod schema;
pub mod snapshot;
