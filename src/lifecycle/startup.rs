//! Startup orchestration.
//!
//! # Responsibilities
//! - Validate configuration
//! - Initialize all subsystems in dependency order
//! - Start background tasks (readiness prober, admin API)
//! - Bind listeners and begin accepting traffic
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - One connection pool, shared by forwarding and probing
//! - Listeners start last (traffic only when ready)

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use crate::admin::{setup_admin_router, AdminState};
use crate::config::{validate_config, AdminConfig, ConfigError, ProxyConfig};
use crate::forwarding::{ForwardingConfig, ForwardingHandler};
use crate::http::HttpServer;
use crate::lifecycle::Shutdown;
use crate::placeholder::{PlaceholderResponder, TemplatePlaceholder};
use crate::routing::{RouteError, RouteTable};
use crate::scaling::{EndpointsWaiter, InMemoryEndpointsCache, ReadinessProber};
use crate::upstream::{build_client_config, select_round_tripper, Dial, ProxyEnv, TlsConfigError, UpstreamTransport};

const DEFAULT_ADMIN_KEY: &str = "CHANGE_ME_IN_PRODUCTION";

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Route(#[from] RouteError),
    #[error("upstream TLS: {0}")]
    Tls(#[from] TlsConfigError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A fully wired interceptor, ready to serve.
pub struct Interceptor {
    admin: AdminConfig,
    cache: Arc<InMemoryEndpointsCache>,
    routes: Arc<RouteTable>,
    server: HttpServer,
    prober: ReadinessProber,
}

impl Interceptor {
    pub fn build(config: ProxyConfig) -> Result<Self, StartupError> {
        Self::builder(config).build()
    }

    pub fn builder(config: ProxyConfig) -> InterceptorBuilder {
        InterceptorBuilder {
            config,
            dialer: None,
            proxy: None,
        }
    }

    /// The readiness cache every request consults.
    pub fn cache(&self) -> Arc<InMemoryEndpointsCache> {
        self.cache.clone()
    }

    pub fn server(&self) -> &HttpServer {
        &self.server
    }

    /// Serve on `listener` until `shutdown` fires.
    pub async fn run(self, listener: TcpListener, shutdown: &Shutdown) -> Result<(), StartupError> {
        tokio::spawn(self.prober.run(shutdown.subscribe()));

        if self.admin.enabled {
            if self.admin.api_key == DEFAULT_ADMIN_KEY {
                tracing::warn!("Admin API uses the default key, set admin.api_key");
            }
            let admin_listener = TcpListener::bind(&self.admin.bind_address).await?;
            tracing::info!(address = %admin_listener.local_addr()?, "Admin API listening");
            let router = setup_admin_router(AdminState {
                cache: self.cache.clone(),
                routes: self.routes.clone(),
                api_key: Arc::from(self.admin.api_key.as_str()),
            });
            let mut stop = shutdown.subscribe();
            tokio::spawn(async move {
                let served = axum::serve(admin_listener, router)
                    .with_graceful_shutdown(async move {
                        let _ = stop.recv().await;
                    })
                    .await;
                if let Err(e) = served {
                    tracing::error!(error = %e, "Admin API stopped with error");
                }
            });
        }

        self.server.run(listener, shutdown.subscribe()).await?;
        Ok(())
    }
}

/// Overrides for the parts of the wiring that don't come from config.
pub struct InterceptorBuilder {
    config: ProxyConfig,
    dialer: Option<Arc<dyn Dial>>,
    proxy: Option<ProxyEnv>,
}

impl InterceptorBuilder {
    /// Dial upstreams (and proxies) through `dialer`.
    pub fn dialer(mut self, dialer: Arc<dyn Dial>) -> Self {
        self.dialer = Some(dialer);
        self
    }

    /// Use `proxy` instead of the proxy environment variables.
    pub fn proxy(mut self, proxy: ProxyEnv) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn build(self) -> Result<Interceptor, StartupError> {
        let config = self.config;
        validate_config(&config).map_err(ConfigError::Validation)?;

        let forwarding = ForwardingConfig::from_timeouts(&config.timeouts);
        let routes = Arc::new(RouteTable::from_config(&config.routes, &config.placeholder)?);

        let tls = build_client_config(&config.upstream_tls)?;
        let mut transport = UpstreamTransport::builder(&forwarding, tls);
        if let Some(dialer) = self.dialer {
            transport = transport.dialer(dialer);
        }
        if let Some(proxy) = self.proxy {
            transport = transport.proxy(proxy);
        }
        let transport = transport.build();

        let cache = Arc::new(InMemoryEndpointsCache::new());
        let wait = Arc::new(EndpointsWaiter::new(cache.clone()));
        let placeholder = config
            .placeholder
            .enabled
            .then(|| Arc::new(TemplatePlaceholder::new()) as Arc<dyn PlaceholderResponder>);

        let handler = Arc::new(ForwardingHandler::new(
            forwarding,
            wait,
            cache.clone(),
            placeholder,
            select_round_tripper(transport.clone(), &config.tracing),
        ));

        let prober = ReadinessProber::new(
            cache.clone(),
            Arc::new(transport),
            config.readiness.clone(),
            routes.targets(),
        );

        let server = HttpServer::new(
            routes.clone(),
            handler,
            Duration::from_secs(config.listener.request_timeout_secs),
            config.listener.tls.clone(),
        );

        tracing::info!(
            routes = routes.len(),
            wait_timeout = ?forwarding.wait_timeout(),
            placeholder = config.placeholder.enabled,
            tracing = config.tracing.enabled,
            "Interceptor initialized"
        );

        Ok(Interceptor {
            admin: config.admin,
            cache,
            routes,
            server,
            prober,
        })
    }
}
