// Application state for HTTP handlers
use crate::application::query_service::QueryService;
use crate::application::subscription_registry::SubscriptionRegistry;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct AppState {
    pub query: QueryService,
    pub registry: Arc<SubscriptionRegistry>,
    /// Cancelled on server shutdown; ends open snapshot streams
    pub shutdown: CancellationToken,
}
