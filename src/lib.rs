//! Core library for the data-tracker command line application.
//!
//! The library keeps remote sheets in line with external tabular sources.
//! Settings live under [`tracker::config`], source connectors under
//! [`tracker::source`], and the reconciliation itself is split between
//! [`tracker::matcher`], [`tracker::missing`], and [`tracker::payload`].
//! Delivery to the store goes through [`tracker::dispatch`], and
//! [`tracker::sync`] orchestrates a full run.

pub mod tracker;

pub use tracker::{
    Result, TrackerError, chunk, client, columns, config, dispatch, error, matcher, missing, model,
    payload, source, sync,
};
