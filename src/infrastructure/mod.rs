// Infrastructure layer - External dependencies and adapters
pub mod backoff;
pub mod chunked_json;
pub mod config;
pub mod http_response;
pub mod sample_mapper;
pub mod socketio;
pub mod socketio_transport;
