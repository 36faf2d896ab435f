#![cfg_attr(
    test,
    expect(clippy::expect_used, reason = "tests require contextual panics")
)]
#![cfg_attr(not(any(test, doctest)), deny(clippy::unwrap_used))]
#![cfg_attr(not(any(test, doctest)), deny(clippy::expect_used))]
//! Core library for the append-only, hash-chained event ledger.
//!
//! Modules are ordered leaf-first: [`canonical`] and [`hashing`] have no
//! dependency on the rest of the crate; [`ledger`] builds on `hashing`;
//! [`ports`] and [`metrics`] define the edges of the hexagon; [`append`],
//! [`verify`], and [`projections`] are the core operations; [`importer`]
//! composes all of the above; [`outbound`] holds storage and metrics
//! adapters; [`config`] is the ambient configuration layer.

pub mod append;
pub mod canonical;
pub mod config;
pub mod hashing;
pub mod importer;
pub mod ledger;
pub mod metrics;
pub mod outbound;
pub mod ports;
pub mod projections;
pub mod verify;
