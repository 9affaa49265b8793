//! Core building blocks for the bucketlayer document-store access layer.
//!
//! This crate defines the driver seam ([`driver`]), the resilient cluster
//! client built on top of it ([`client`]), the retrying execution strategy
//! ([`executor`]), streaming query enumerators ([`rows`]), and the
//! composite-key id encoding ([`keys`]). Concrete drivers live in sibling
//! crates; everything here is written against the traits in [`driver`].

#[allow(unused_extern_crates)]
extern crate self as bucketlayer_core;

pub mod client;
pub mod config;
pub mod document;
pub mod driver;
pub mod error;
pub mod executor;
pub mod keys;
pub mod query;
pub mod rows;
