//! Provider registry.
//!
//! Holds provider descriptors and lazily builds one live provider per id.
//! The descriptor map and the instance cache sit behind a single async
//! mutex that is held across construction, so concurrent lookups of the
//! same id never build it twice.

use metrics::{counter, gauge};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::binary::BinaryManagerProvider;
use super::builtin::default_factories;
use super::{
    Backend, BackendFactory, BlobProvider, ProviderDescriptor, PROP_NAMESPACE, PROP_TRANSIENT,
};
use crate::dispatch::Dispatch;
use crate::errors::{BlobError, BlobResult};
use crate::metrics::{PROVIDERS_CLOSED_TOTAL, PROVIDERS_INITIALIZED_TOTAL, PROVIDERS_REGISTERED};

#[derive(Default)]
struct RegistryState {
    descriptors: HashMap<String, ProviderDescriptor>,
    providers: HashMap<String, Arc<dyn BlobProvider>>,
    shut_down: bool,
}

/// Registry of blob provider descriptors and their live instances.
pub struct ProviderRegistry {
    factories: RwLock<HashMap<String, BackendFactory>>,
    state: Mutex<RegistryState>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    /// Registry with the built-in `memory` and `local` backends.
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(default_factories()),
            state: Mutex::new(RegistryState::default()),
        }
    }

    /// Make a backend kind available to descriptors.
    pub fn register_factory(&self, kind: impl Into<String>, factory: BackendFactory) {
        let mut factories = self.factories.write().expect("rwlock poisoned");
        factories.insert(kind.into(), factory);
    }

    /// Upsert a descriptor, merging it into any existing one. A live
    /// instance for that id is closed first so the next lookup rebuilds it
    /// with the new configuration. Nothing is instantiated here.
    ///
    /// Names may not contain `:`, which separates the provider id from the
    /// key in deletion candidates.
    pub async fn register_provider(&self, descriptor: ProviderDescriptor) -> BlobResult<()> {
        let mut state = self.state.lock().await;
        Self::register_locked(&mut state, descriptor).await
    }

    /// Close any live instance and drop the descriptor.
    pub async fn unregister_provider(&self, descriptor: &ProviderDescriptor) {
        let mut state = self.state.lock().await;
        if let Some(provider) = state.providers.remove(&descriptor.name) {
            close_provider(&descriptor.name, provider).await;
        }
        if state.descriptors.remove(&descriptor.name).is_some() {
            info!("Unregistered blob provider {}", descriptor.name);
            gauge!(PROVIDERS_REGISTERED).set(state.descriptors.len() as f64);
        }
    }

    /// Return the live provider for `id`, building it on first use.
    ///
    /// `Ok(None)` means no descriptor is registered under `id`.
    pub async fn get_provider(&self, id: &str) -> BlobResult<Option<Arc<dyn BlobProvider>>> {
        let mut state = self.state.lock().await;
        self.get_or_create_locked(&mut state, id).await
    }

    /// Return the provider for `id`, synthesizing its descriptor from
    /// `default_id` (renamed, with `namespace` set to `id`) if `id` is not
    /// registered yet.
    pub async fn get_provider_with_namespace(
        &self,
        id: &str,
        default_id: &str,
    ) -> BlobResult<Arc<dyn BlobProvider>> {
        let mut state = self.state.lock().await;
        if !state.descriptors.contains_key(id) {
            let template = state.descriptors.get(default_id).cloned().ok_or_else(|| {
                BlobError::configuration(format!(
                    "cannot create provider {id}: no descriptor for default provider {default_id}"
                ))
            })?;
            let mut descriptor = template;
            descriptor.name = id.to_string();
            descriptor
                .properties
                .insert(PROP_NAMESPACE.to_string(), id.to_string());
            info!("Cloning blob provider {default_id} as {id} with namespace {id}");
            Self::register_locked(&mut state, descriptor).await?;
        }
        self.get_or_create_locked(&mut state, id)
            .await?
            .ok_or_else(|| BlobError::UnknownProvider {
                provider_id: id.to_string(),
            })
    }

    /// Provider for a dispatch decision. Repository-name decisions may
    /// name a provider that was never configured; those are cloned from
    /// `namespace_template`.
    pub async fn provider_for(
        &self,
        dispatch: &Dispatch,
        namespace_template: &str,
    ) -> BlobResult<Arc<dyn BlobProvider>> {
        if dispatch.rule_based {
            self.get_provider(&dispatch.provider_id)
                .await?
                .ok_or_else(|| BlobError::UnknownProvider {
                    provider_id: dispatch.provider_id.clone(),
                })
        } else {
            self.get_provider_with_namespace(&dispatch.provider_id, namespace_template)
                .await
        }
    }

    /// Current descriptor for `id`.
    pub async fn descriptor(&self, id: &str) -> Option<ProviderDescriptor> {
        self.state.lock().await.descriptors.get(id).cloned()
    }

    /// Registered provider ids, sorted.
    pub async fn provider_ids(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut ids: Vec<String> = state.descriptors.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Close every live provider exactly once. Idempotent.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        if state.shut_down {
            return;
        }
        state.shut_down = true;
        let providers: Vec<(String, Arc<dyn BlobProvider>)> = state.providers.drain().collect();
        for (id, provider) in providers {
            close_provider(&id, provider).await;
        }
        info!("Blob provider registry shut down");
    }

    async fn register_locked(
        state: &mut RegistryState,
        descriptor: ProviderDescriptor,
    ) -> BlobResult<()> {
        let name = descriptor.name.clone();
        if name.is_empty() || name.contains(':') {
            return Err(BlobError::configuration(format!(
                "invalid blob provider name {name:?}: must be non-empty and contain no ':'"
            )));
        }
        if let Some(provider) = state.providers.remove(&name) {
            close_provider(&name, provider).await;
        }
        let merged = match state.descriptors.remove(&name) {
            Some(mut existing) => {
                existing.merge(descriptor);
                existing
            }
            None => descriptor,
        };
        debug!("Registered blob provider {} (kind={})", name, merged.kind);
        state.descriptors.insert(name, merged);
        gauge!(PROVIDERS_REGISTERED).set(state.descriptors.len() as f64);
        Ok(())
    }

    async fn get_or_create_locked(
        &self,
        state: &mut RegistryState,
        id: &str,
    ) -> BlobResult<Option<Arc<dyn BlobProvider>>> {
        if state.shut_down {
            return Err(anyhow::anyhow!("provider registry is shut down").into());
        }
        if let Some(provider) = state.providers.get(id) {
            return Ok(Some(provider.clone()));
        }
        let descriptor = match state.descriptors.get(id) {
            Some(descriptor) => descriptor.clone(),
            None => return Ok(None),
        };
        let provider = self.construct(&descriptor).await?;
        state.providers.insert(id.to_string(), provider.clone());
        Ok(Some(provider))
    }

    async fn construct(&self, descriptor: &ProviderDescriptor) -> BlobResult<Arc<dyn BlobProvider>> {
        let id = descriptor.name.as_str();
        let factory = {
            let factories = self.factories.read().expect("rwlock poisoned");
            factories.get(&descriptor.kind).cloned()
        };
        let factory = factory.ok_or_else(|| BlobError::Construction {
            provider_id: id.to_string(),
            source: anyhow::anyhow!("no backend registered for kind {:?}", descriptor.kind),
        })?;

        let mut properties = descriptor.properties.clone();
        if descriptor.is_transient() {
            properties.insert(PROP_TRANSIENT.to_string(), "true".to_string());
        }

        let mut provider: Box<dyn BlobProvider> = match factory() {
            Backend::Blob(provider) => provider,
            Backend::Binary(manager) => Box::new(BinaryManagerProvider::new(manager)),
        };
        provider
            .initialize(id, &properties)
            .await
            .map_err(|source| BlobError::Construction {
                provider_id: id.to_string(),
                source,
            })?;

        counter!(PROVIDERS_INITIALIZED_TOTAL, "kind" => descriptor.kind.clone()).increment(1);
        info!(
            "Initialized blob provider {} (kind={}, record={}, transient={})",
            id,
            descriptor.kind,
            provider.is_record_mode(),
            provider.is_transient()
        );
        Ok(Arc::from(provider))
    }
}

async fn close_provider(id: &str, provider: Arc<dyn BlobProvider>) {
    provider.close().await;
    counter!(PROVIDERS_CLOSED_TOTAL).increment(1);
    if Arc::strong_count(&provider) > 1 {
        warn!("Blob provider {id} closed while still referenced by callers");
    } else {
        debug!("Closed blob provider {id}");
    }
}
