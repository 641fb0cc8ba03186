//! # vk-core: the streaming adapter of VOYAGER-KSQL
//!
//! Bridges ksqlDB push queries to a dashboard host. A push query emits a
//! header once and then rows forever; each row is turned into a single-row
//! columnar [`Frame`](frame::Frame) and handed downstream as it arrives.
//!
//! - [`value`]: row values and the classifier picking a column type.
//! - [`assembler`]: header + row → frame, with the `DATETIME` convention.
//! - [`driver`]: lifecycle of one subscription (timeout, cancel, errors).
//! - [`client`]: transport trait, the ksqlDB HTTP client and its factory.
//! - [`settings`] / [`datasource`]: instance configuration and the
//!   operations the host calls.

pub mod assembler;
pub mod client;
pub mod datasource;
pub mod driver;
pub mod error;
pub mod frame;
pub mod settings;
pub mod value;

pub use error::{DatasourceError, Result};
