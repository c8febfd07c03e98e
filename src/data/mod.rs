//! This module contains custom data structures used in the implementation of
//! the recorder.

pub mod edge_map;

pub use edge_map::EdgeMap;
