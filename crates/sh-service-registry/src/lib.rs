//! Service registry with async handlers
//!
//! Services are registered per `domain.service` key with an async handler.
//! Calls carry no response payload; a handler either succeeds or returns a
//! [`ServiceError`] that is surfaced to the caller unchanged.

use dashmap::DashMap;
use serde::Serialize;
use sh_core::events::{ServiceEventData, SERVICE_REGISTERED, SERVICE_REMOVED};
use sh_core::{Context, Event, ServiceCall};
use sh_event_bus::EventBus;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument, warn};

pub type ServiceResult = Result<(), ServiceError>;

pub type ServiceFuture = Pin<Box<dyn Future<Output = ServiceResult> + Send>>;

pub type ServiceHandler = Arc<dyn Fn(ServiceCall) -> ServiceFuture + Send + Sync>;

#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error("service not found: {domain}.{service}")]
    NotFound { domain: String, service: String },

    #[error("service call failed: {0}")]
    CallFailed(String),

    #[error("invalid service data: {0}")]
    InvalidData(String),

    /// The handler rejected the call's data; the message is user-facing
    #[error("{0}")]
    Validation(String),
}

/// Metadata served alongside a registered service
#[derive(Debug, Clone, Serialize)]
pub struct ServiceDescription {
    pub domain: String,
    pub service: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Field documentation keyed by field name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<serde_json::Value>,
}

impl ServiceDescription {
    pub fn new(domain: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            service: service.into(),
            name: None,
            description: None,
            fields: None,
        }
    }
}

struct RegisteredService {
    handler: ServiceHandler,
    description: ServiceDescription,
}

pub struct ServiceRegistry {
    /// Keyed by "domain.service"
    services: DashMap<String, RegisteredService>,
    /// Registration and removal are announced here when present
    event_bus: Option<Arc<EventBus>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            services: DashMap::new(),
            event_bus: None,
        }
    }

    pub fn with_event_bus(event_bus: Arc<EventBus>) -> Self {
        Self {
            services: DashMap::new(),
            event_bus: Some(event_bus),
        }
    }

    pub fn register<F, Fut>(&self, domain: impl Into<String>, service: impl Into<String>, handler: F)
    where
        F: Fn(ServiceCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServiceResult> + Send + 'static,
    {
        self.register_with_description(ServiceDescription::new(domain, service), handler);
    }

    #[instrument(skip(self, handler), fields(domain = %description.domain, service = %description.service))]
    pub fn register_with_description<F, Fut>(&self, description: ServiceDescription, handler: F)
    where
        F: Fn(ServiceCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServiceResult> + Send + 'static,
    {
        let key = format!("{}.{}", description.domain, description.service);
        debug!("Registering service");

        let handler: ServiceHandler =
            Arc::new(move |call| Box::pin(handler(call)) as ServiceFuture);
        let announce = ServiceEventData {
            domain: description.domain.clone(),
            service: description.service.clone(),
        };

        self.services.insert(
            key,
            RegisteredService {
                handler,
                description,
            },
        );
        self.announce(SERVICE_REGISTERED, announce);
    }

    #[instrument(skip(self, service_data, context))]
    pub async fn call(
        &self,
        domain: &str,
        service: &str,
        service_data: serde_json::Value,
        context: Context,
    ) -> ServiceResult {
        let key = format!("{}.{}", domain, service);

        let handler = self
            .services
            .get(&key)
            .map(|s| s.handler.clone())
            .ok_or_else(|| {
                warn!("Service not found");
                ServiceError::NotFound {
                    domain: domain.to_string(),
                    service: service.to_string(),
                }
            })?;
        // The map guard is gone before the handler runs, so handlers may
        // register or remove services themselves.

        debug!("Calling service");
        handler(ServiceCall::new(domain, service, service_data, context)).await
    }

    pub fn has_service(&self, domain: &str, service: &str) -> bool {
        self.services.contains_key(&format!("{}.{}", domain, service))
    }

    pub fn get_service(&self, domain: &str, service: &str) -> Option<ServiceDescription> {
        self.services
            .get(&format!("{}.{}", domain, service))
            .map(|s| s.description.clone())
    }

    /// All registered services grouped by domain
    pub fn all_services(&self) -> HashMap<String, Vec<ServiceDescription>> {
        let mut result: HashMap<String, Vec<ServiceDescription>> = HashMap::new();
        for entry in self.services.iter() {
            result
                .entry(entry.description.domain.clone())
                .or_default()
                .push(entry.description.clone());
        }
        result
    }

    #[instrument(skip(self))]
    pub fn unregister(&self, domain: &str, service: &str) -> bool {
        let removed = self
            .services
            .remove(&format!("{}.{}", domain, service))
            .is_some();

        if removed {
            debug!("Unregistered service");
            self.announce(
                SERVICE_REMOVED,
                ServiceEventData {
                    domain: domain.to_string(),
                    service: service.to_string(),
                },
            );
        }
        removed
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    fn announce(&self, event_type: &str, data: ServiceEventData) {
        if let Some(bus) = &self.event_bus {
            let data = serde_json::to_value(data).unwrap_or_default();
            bus.fire(Event::new(event_type, data, Context::new()));
        }
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedServiceRegistry = Arc<ServiceRegistry>;
