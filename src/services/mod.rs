/// Structured audit trail of lifecycle operations.
pub mod audit;
/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Credential verification.
pub mod identity;
/// Lobby event fan-out and redelivery.
pub mod notification_service;
/// Teamspace and party lifecycle.
pub mod party_service;
/// Record store supervision with degraded mode.
pub mod storage_supervisor;
/// Cross-teamspace user state lookup.
pub mod user_state_service;
/// Observer WebSocket connection handling.
pub mod websocket_service;
