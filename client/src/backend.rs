//! Backend selection
//!
//! Builds the identity and data services for the configured `BackendMode`.
//! In Supabase mode both adapters share one HTTP client, so data requests are
//! made with the signed-in user's token.

use std::sync::Arc;
use tracing::info;

use crate::config::{BackendMode, Config};
use crate::data::{DataService, InMemoryDataService, PostgrestDataService};
use crate::error::ServiceError;
use crate::identity::{IdentityService, InMemoryIdentityService, SupabaseIdentityService};
use crate::supabase::SupabaseClient;

#[derive(Clone)]
pub struct Backend {
    pub identity: Arc<dyn IdentityService>,
    pub data: Arc<dyn DataService>,
}

impl Backend {
    pub fn from_config(config: &Config) -> Result<Self, ServiceError> {
        match config.backend {
            BackendMode::Supabase => {
                let client = SupabaseClient::new(&config.supabase)?;
                info!("Using Supabase backend at {}", client.base_url());
                Ok(Self {
                    identity: Arc::new(SupabaseIdentityService::new(client.clone())),
                    data: Arc::new(PostgrestDataService::new(client)),
                })
            }
            BackendMode::InMemory => {
                info!("Using in-memory backend");
                Ok(Self::in_memory())
            }
        }
    }

    /// Empty process-local backend
    pub fn in_memory() -> Self {
        Self {
            identity: Arc::new(InMemoryIdentityService::new()),
            data: Arc::new(InMemoryDataService::new()),
        }
    }
}
