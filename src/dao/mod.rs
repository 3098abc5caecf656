/// Typed record collections over the shared tree.
pub mod repository;
/// Storage error taxonomy shared by every backend.
pub mod storage;
/// Shared tree store abstraction and its backends.
pub mod tree;
