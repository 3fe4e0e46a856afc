//! # Pattern Loom
//!
//! **A hot-path classification engine for short free-text observations.**
//!
//! Pattern Loom classifies weave units — short observations like *"she
//! took an early morning nap in her crib"* — into a hierarchical pattern
//! taxonomy by nearest-neighbour lookup in a dense embedding space, and
//! exposes that pipeline over a small JSON HTTP gateway.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌───────────────────────────────┐
//! │  artifact  │──▶│  IndexLoader                  │
//! │  (JSON)    │   │  validate → build → publish   │
//! └────────────┘   └──────────────┬────────────────┘
//!                                 ▼ atomic swap
//!                  ┌───────────────────────────────┐
//!                  │  IndexSnapshot                │
//!                  │  vectors + catalogue          │
//!                  └──────────────▲────────────────┘
//!                                 │ search
//! ┌────────────┐   ┌──────────────┴────────────────┐   ┌──────────┐
//! │  weave     │──▶│  Classifier                   │◀──│ Embedding │
//! │  unit      │   │  embed → top-k → rank → hydrate│   │ Provider  │
//! └────────────┘   └──────────────▲────────────────┘   └──────────┘
//!                                 │
//!                  ┌──────────────┴────────────────┐
//!                  │  HTTP gateway (Axum)          │
//!                  │  /classify /reload /status    │
//!                  └───────────────────────────────┘
//! ```
//!
//! ## Request flow
//!
//! 1. The **gateway** ([`server`]) validates the wire payload, applies
//!    backpressure, and assigns a wall-clock deadline.
//! 2. The **classifier** ([`classifier`]) embeds the input through the
//!    [`embedding`] provider, runs exhaustive top-k cosine search over
//!    the active [`index`] snapshot, applies the confidence threshold
//!    and domain filter, and hydrates matches from the [`catalogue`].
//! 3. The **loader** ([`loader`]) builds new snapshots from cold-path
//!    artifacts and publishes them atomically; queries in flight keep
//!    the snapshot they started with.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration, env overrides, validation |
//! | [`models`] | Core data types: `Pattern`, `WeaveUnit`, request/response |
//! | [`error`] | Structured engine error kinds and wire codes |
//! | [`embedding`] | Embedding provider trait and implementations |
//! | [`index`] | Immutable vector index snapshot, top-k search |
//! | [`catalogue`] | `pattern_id → Pattern` hydration lookup |
//! | [`classifier`] | Classification pipeline and atomic snapshot slot |
//! | [`loader`] | Artifact validation, snapshot build, atomic publish |
//! | [`server`] | HTTP gateway (Axum) with CORS, backpressure, deadlines |
//! | [`stats`] | Runtime request counters for `/status` |

pub mod catalogue;
pub mod classifier;
pub mod config;
pub mod embedding;
pub mod error;
pub mod index;
pub mod loader;
pub mod models;
pub mod server;
pub mod stats;
