use crate::config::Config;
use crate::kv::KvClient;
use crate::upstream::UpstreamManager;

/// Shared application state passed to every handler.
///
/// `kv` is `None` when Redis was unreachable at startup; the rate limiter
/// treats that the same as a runtime KV failure and fails open.
pub struct AppState {
    pub config: Config,
    pub upstreams: UpstreamManager,
    pub kv: Option<KvClient>,
    pub http_client: reqwest::Client,
}
