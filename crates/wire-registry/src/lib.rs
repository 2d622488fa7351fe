//! Explicit (non-reflective) service/method registration and dispatch.
//!
//! A [`ServiceRegistry`] maps `"Service.Method"` strings to handlers whose
//! argument and reply types are nailed down at registration time through
//! ordinary generics, not discovered at call time through `std::any` or
//! reflection: registering a handler fixes its `Args`/`Reply` types once,
//! and every later dispatch for that method just runs the closure built
//! from them.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use wire_core::CodecKind;

/// A registered handler, already erased to operate on encoded bytes. Built
/// from a typed `Fn(Args) -> impl Future<Output = Result<Reply, String>>` by
/// [`ServiceRegistryBuilder::register`]; the encode/decode step happens
/// inside the closure, where `Args`/`Reply` are still concrete types.
type BoxedHandler = Arc<
    dyn Fn(CodecKind, Vec<u8>) -> BoxFuture<'static, Result<Vec<u8>, String>> + Send + Sync,
>;

/// Builds a [`ServiceRegistry`] one method at a time.
#[derive(Default)]
pub struct ServiceRegistryBuilder {
    handlers: HashMap<String, BoxedHandler>,
}

impl ServiceRegistryBuilder {
    pub fn new() -> Self {
        ServiceRegistryBuilder {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for `"{service}.{method}"`. `handler` receives the
    /// already-decoded arguments and returns either the reply to encode and
    /// send back, or an error message for `Header::error`.
    ///
    /// Registering the same `service`/`method` pair twice replaces the
    /// earlier handler; this mirrors a plain `HashMap::insert` rather than
    /// panicking, since nothing downstream depends on registration order.
    pub fn register<Args, Reply, F, Fut>(
        mut self,
        service: impl AsRef<str>,
        method: impl AsRef<str>,
        handler: F,
    ) -> Self
    where
        Args: DeserializeOwned + Send + 'static,
        Reply: Serialize + Send + 'static,
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, String>> + Send + 'static,
    {
        let key = format!("{}.{}", service.as_ref(), method.as_ref());
        let handler = Arc::new(handler);
        let boxed: BoxedHandler = Arc::new(move |kind, body| {
            let handler = handler.clone();
            Box::pin(async move {
                let args: Args = kind.decode(&body).map_err(|e| e.to_string())?;
                let reply = handler(args).await?;
                kind.encode(&reply).map_err(|e| e.to_string())
            })
        });
        self.handlers.insert(key, boxed);
        self
    }

    pub fn build(self) -> ServiceRegistry {
        ServiceRegistry {
            handlers: self.handlers,
        }
    }
}

/// An immutable map from `"Service.Method"` to handler, shared read-only
/// across every connection a server loop accepts.
pub struct ServiceRegistry {
    handlers: HashMap<String, BoxedHandler>,
}

impl ServiceRegistry {
    pub fn builder() -> ServiceRegistryBuilder {
        ServiceRegistryBuilder::new()
    }

    /// Look up and invoke the handler for `service_method`, encoding its
    /// reply (or error) with `kind`. An unregistered method is reported the
    /// same way a handler-level error is: as an `Err(String)` destined for
    /// `Header::error`, never a panic or a dropped connection.
    pub fn dispatch(
        &self,
        service_method: &str,
        kind: CodecKind,
        body: Vec<u8>,
    ) -> BoxFuture<'static, Result<Vec<u8>, String>> {
        match self.handlers.get(service_method) {
            Some(handler) => handler(kind, body),
            None => {
                let service_method = service_method.to_string();
                Box::pin(async move {
                    Err(format!("wire: can't find method {service_method:?}"))
                })
            }
        }
    }

    pub fn contains(&self, service_method: &str) -> bool {
        self.handlers.contains_key(service_method)
    }
}
