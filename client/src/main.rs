use classifieds_client::config::Config;
use classifieds_client::query::{CollectionRequest, ListingFilters};
use classifieds_client::{Backend, Listings, QueryCache, SessionManager};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "classifieds=debug,classifieds_client=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = Config::from_env()?;
    config.validate()?;
    info!("Loaded configuration: backend={:?}", config.backend);

    if let Some(addr) = config.metrics_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;
        info!("Prometheus metrics on http://{}/metrics", addr);
    }

    let backend = Backend::from_config(&config)?;
    let session = Arc::new(SessionManager::new(
        backend.identity.clone(),
        backend.data.clone(),
    ));
    let state = session.initialize().await;
    if let Some(e) = &state.last_error {
        warn!("Session restore failed: {}", e);
    }

    let cache = QueryCache::new(backend.data.clone(), &config.cache);
    let listings = Listings::new(cache.clone(), Arc::clone(&session));

    let categories = cache.fetch(&CollectionRequest::Categories).await?;
    let search = std::env::args().nth(1);
    let filters = match &search {
        Some(text) => ListingFilters::default().search(text.as_str()),
        None => ListingFilters::default(),
    };
    let results = listings.browse(&filters).await?;
    info!(
        "{} listings{} across {} categories",
        results.len(),
        search
            .as_deref()
            .map(|s| format!(" matching {s:?}"))
            .unwrap_or_default(),
        categories.len()
    );

    let counts = listings.category_counts(&filters);
    for category in categories.categories().unwrap_or_default() {
        info!(
            "  {:<24} {}",
            category.name,
            counts.get(&category.id).copied().unwrap_or(0)
        );
    }

    let stats = cache.stats();
    info!(
        "Cache: {} hits, {} misses, {} coalesced",
        stats.hits, stats.misses, stats.coalesced
    );

    session.shutdown();
    Ok(())
}
