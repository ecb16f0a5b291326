#![doc = include_str!("../README.md")]
//!

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, clippy::unimplemented)]

pub mod wire;

pub mod engine;
pub use engine::{Engine, Options};

pub mod transport;

pub mod rmanager;
