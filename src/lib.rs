//! Real-time opinion poll service.
//!
//! Visitors cast anonymous votes tagged with self-reported demographics and an
//! IP-derived location. Results are aggregated per state, age range and gender
//! and pushed live to every connected client. An admin manages the voting
//! options, posts a banner message and can reset all votes.
//!
//! # Layout
//! - [`store`]: the [`VoteStore`](store::VoteStore) seam with Postgres and in-memory backends
//! - [`aggregate`]: pivoting aggregate rows into chart rows, raw tallies
//! - [`feed`] and [`sync`]: change notifications and the live-sync controller
//! - [`geo`]: IP geolocation waterfall with a static fallback
//! - [`demographics`]: once-per-device demographics capture
//! - [`admin`]: sessions and gated admin mutations
//! - [`client`]: the vote pipeline and the per-device facade
//! - [`routes`] and [`handlers`]: the HTTP surface
pub mod admin;
pub mod aggregate;
pub mod client;
pub mod config;
pub mod demographics;
pub mod error;
pub mod feed;
pub mod geo;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod state;
pub mod store;
pub mod sync;
