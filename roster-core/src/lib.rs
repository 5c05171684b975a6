#![doc = "roster-core: fetch, cache, reconcile and bill Harvest/Forecast allocation data."]

//! This crate contains the whole pipeline; the `roster` CLI only loads config and
//! wires it together.
//!
//! # Layout
//! - [`fetch`] and [`cache`] are the leaves: paginated GETs and the file-backed dataset cache.
//! - [`sources`] combines them into typed accessors for both upstream systems.
//! - [`reconcile`], [`matcher`] and [`billing`] hold the decision logic.
//! - [`pipeline`] runs one reporting period end to end; [`publish`] writes the results.

pub mod billing;
pub mod cache;
pub mod contract;
pub mod diagnostic;
pub mod error;
pub mod fetch;
pub mod matcher;
pub mod model;
pub mod period;
pub mod pipeline;
pub mod publish;
pub mod reconcile;
pub mod sources;
