//! This is a stresstest library which drives a content-addressable file store with synthetic
//! uploads and sustained read load.
//!
//! Every upload is a *checked upload*: the payload is streamed to the [`Backend`], fetched back
//! right away and compared by length and SHA-256 digest. Payloads are windows into a pool of
//! random bytes that is filled once per process, so generating them is cheap even at high
//! upload rates.
//!
//! Locators of verified uploads are offered to a bounded [`LocatorQueue`]. A [`ReaderPool`]
//! drains that queue concurrently with the upload round and re-enqueues objects it has read,
//! which keeps read traffic flowing without unbounded memory growth. The queue never blocks a
//! producer: whatever does not fit is dropped.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

use std::io;

use bytes::Bytes;
use futures::stream::BoxStream;

pub mod backend;
pub mod cli;
pub mod config;
pub mod digest;
pub mod error;
pub mod observability;
pub mod payload;
pub mod queue;
pub mod reader;
pub mod retry;
pub mod round;
pub mod stresstest;
pub mod upload;

pub use crate::backend::{Backend, Locator, SharedBackend};
pub use crate::error::Error;
pub use crate::payload::{Payload, PayloadGenerator};
pub use crate::queue::LocatorQueue;
pub use crate::reader::ReaderPool;
pub use crate::stresstest::run;

/// The type of stream used for payload contents, both on upload and on read-back.
pub type PayloadStream = BoxStream<'static, io::Result<Bytes>>;
