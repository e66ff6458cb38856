/// Reverse membership index over the record store.
pub mod membership;
/// Persisted record models.
pub mod models;
/// Key-value record store abstraction and its backends.
pub mod record_store;
/// Storage error types shared by every backend.
pub mod storage;
/// Teamspace repository.
pub mod teamspace;
