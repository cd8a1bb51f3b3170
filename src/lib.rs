//! # notes-retrieval
//!
//! Retrieval core that finds the notes, rubrics, sample answers and
//! reference material relevant to a candidate's spoken answer, so a
//! downstream evaluator can ground its feedback.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌────────────────┐
//! │ Note dirs   │──▶│ Corpus       │──▶│ Embedding      │
//! │ (per kind)  │   │ chunk + memo │   │ cache (JSON)   │
//! └─────────────┘   └──────┬───────┘   └───────┬────────┘
//!                          ▼                   ▼
//!                   ┌──────────────────────────────┐
//!                   │ Search (keyword | vector)    │
//!                   └──────────────┬───────────────┘
//!                                  ▼
//!                   ┌──────────────────────────────┐
//!                   │ Fusion (RRF + relaxation)    │──▶ NoteHit list
//!                   └──────────────────────────────┘
//! ```
//!
//! [`warmup`] runs the corpus and cache stages ahead of time.
//!
//! ## Usage
//!
//! ```rust,no_run
//! # async fn run() -> anyhow::Result<()> {
//! use notes_retrieval::config::load_config;
//! use notes_retrieval::store::RetrievalStore;
//!
//! let settings = load_config("./config/notes.toml".as_ref())?.resolve();
//! let store = RetrievalStore::from_settings(&settings);
//! let corpus = store.build(&settings.dirs).await?;
//! let hits = store
//!     .search_multi(&["what is rural revitalization"], &corpus, &settings.search)
//!     .await?;
//! # Ok(()) }
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and resolved settings |
//! | [`models`] | Chunks and hits |
//! | [`chunk`] | Heading/paragraph chunker |
//! | [`corpus`] | Directory walking and corpus memo |
//! | [`embedding`] | Embedding collaborator and cosine similarity |
//! | [`cache`] | Content-addressed embedding cache |
//! | [`search`] | Keyword and vector scoring |
//! | [`fusion`] | Multi-query reciprocal rank fusion |
//! | [`warmup`] | Cache pre-population |
//! | [`store`] | Owner of all caches |
//! | [`progress`] | Warmup progress reporters |

pub mod cache;
pub mod chunk;
pub mod config;
pub mod corpus;
pub mod embedding;
pub mod error;
pub mod fusion;
pub mod models;
pub mod progress;
pub mod search;
pub mod store;
pub mod warmup;
