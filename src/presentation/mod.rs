// Presentation layer - HTTP surface over the query interface
pub mod app_state;
pub mod handlers;
