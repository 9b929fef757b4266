//! Central shared state — one `Arc<AppState>` threaded through the
//! orchestrator, the channel adapters, and every HTTP handler.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, RwLock};

use dashmap::DashMap;
use lru::LruCache;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use wisp_agent::context::ContextBuilder;
use wisp_agent::embed::EmbeddingProvider;
use wisp_agent::Provider;
use wisp_channels::types::InboundMessage;
use wisp_channels::Channel;
use wisp_core::types::SenderId;
use wisp_core::WispConfig;
use wisp_memory::{CostStore, MemoryStore};
use wisp_sessions::SessionManager;

/// Capacity of the bounded last-seen tracker. Organic growth or an
/// adversarial flood of unique senders must not grow memory without bound.
pub const LAST_SEEN_CAPACITY: usize = 4096;

pub struct AppState {
    /// Reloadable config: SIGHUP builds a fresh immutable value and swaps
    /// the pointer. Readers clone the `Arc` and never observe a torn value.
    config: RwLock<Arc<WispConfig>>,
    /// Provider instances keyed by profile name, built at startup.
    pub providers: HashMap<String, Arc<dyn Provider>>,
    pub embedder: Option<Arc<dyn EmbeddingProvider>>,
    pub sessions: Arc<SessionManager>,
    pub memory: Arc<MemoryStore>,
    pub costs: Arc<CostStore>,
    pub context: Arc<ContextBuilder>,
    /// Connected channel adapters, keyed by `Channel::name()`.
    pub channels: DashMap<String, Arc<dyn Channel>>,
    /// Per-sender processing slots: a bounded queue into a serial task.
    pub slots: DashMap<SenderId, mpsc::Sender<InboundMessage>>,
    /// Bounded recency tracker, shared with the HTTP sessions listing.
    pub last_seen: Mutex<LruCache<SenderId, chrono::DateTime<chrono::Utc>>>,
    /// Daemon-wide shutdown signal.
    pub shutdown: CancellationToken,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: WispConfig,
        providers: HashMap<String, Arc<dyn Provider>>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        sessions: Arc<SessionManager>,
        memory: Arc<MemoryStore>,
        costs: Arc<CostStore>,
    ) -> Self {
        let context = Arc::new(ContextBuilder::new(config.workspace.path.clone()));
        Self {
            config: RwLock::new(Arc::new(config)),
            providers,
            embedder,
            sessions,
            memory,
            costs,
            context,
            channels: DashMap::new(),
            slots: DashMap::new(),
            last_seen: Mutex::new(LruCache::new(
                NonZeroUsize::new(LAST_SEEN_CAPACITY).unwrap(),
            )),
            shutdown: CancellationToken::new(),
            started_at: chrono::Utc::now(),
        }
    }

    /// Current config snapshot. Hold the `Arc`, not the lock.
    pub fn config(&self) -> Arc<WispConfig> {
        Arc::clone(&self.config.read().unwrap())
    }

    /// Swap in a freshly-loaded config (SIGHUP).
    pub fn replace_config(&self, next: WispConfig) {
        *self.config.write().unwrap() = Arc::new(next);
    }

    pub fn touch_sender(&self, sender: &SenderId) {
        self.last_seen
            .lock()
            .unwrap()
            .put(sender.clone(), chrono::Utc::now());
    }

    /// Provider handle for a profile key.
    pub fn provider(&self, key: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(key).map(Arc::clone)
    }
}
