#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod error;

pub mod client;
pub mod keys;
/// Object storage provider factories.
pub mod providers;

pub use client::ObjectStoreClient;
pub use error::{Error, Result};
