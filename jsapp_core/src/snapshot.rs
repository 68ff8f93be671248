//! Snapshot codec: named-index serialization of the App -> Runtimes ->
//! Contexts -> Modules hierarchy to and from a byte buffer carrying the
//! VM start-up blobs.

pub mod buffer;
pub mod creator;
pub mod data;
pub mod named_indexes;
pub mod provider;

pub use buffer::{ReadBuffer, WriteBuffer};
pub use creator::{JsSnapshotCreator, V8SnapshotCreator};
pub use data::{
  AppSnapData, ContextSnapData, FuncTplSnapData, ModuleSnapData,
  RuntimeSnapData,
};
pub use named_indexes::NamedIndexes;
pub use provider::{JsSnapshotProvider, V8SnapshotProvider};

#[cfg(test)]
mod buffer_tests;
#[cfg(test)]
mod data_tests;
#[cfg(test)]
mod named_indexes_tests;
