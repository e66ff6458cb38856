/// Health check payloads.
pub mod health;
/// Teamspace and party request/response payloads.
pub mod team;
pub mod validation;
/// Events pushed to WebSocket observers.
pub mod ws;
