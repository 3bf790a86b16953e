//! Reference connector implementations: an in-process connector for local
//! development and testing, and a REST-based connector that forwards the
//! capability set to a remote agent process over HTTP.

mod local;
mod rest;

pub use local::LocalConnector;
pub use rest::RestConnector;
