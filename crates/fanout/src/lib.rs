#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod allocator;
mod engine;
mod error;
#[cfg(feature = "async-tokio")]
mod futures;
mod id;
mod message;
mod request;
#[cfg(feature = "async-tokio")]
mod runtime;
mod status;
mod store;
mod time;

pub use crate::allocator::*;
pub use crate::engine::*;
pub use crate::error::*;
#[cfg(feature = "async-tokio")]
pub use crate::futures::*;
pub use crate::id::*;
pub use crate::message::*;
pub use crate::request::*;
#[cfg(feature = "async-tokio")]
pub use crate::runtime::*;
pub use crate::status::*;
pub use crate::store::*;
pub use crate::time::*;
