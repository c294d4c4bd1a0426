//! Component wiring.
//!
//! Every component receives its collaborators explicitly, so tests can
//! assemble the same graph over in-memory fakes.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::HeaderName;

use calbridge_providers::google::{GoogleClientFactory, OAuthClient};
use calbridge_providers::{AuthorizationServer, ClientFactory};

use crate::actions::EventActions;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::{ServerError, ServerResult};
use crate::locks::UserLocks;
use crate::notify::{HttpNotifier, LogNotifier, Notifier};
use crate::oauth::OAuthFlow;
use crate::routes;
use crate::scheduler::{RenewFn, RenewalConfig, RenewalScheduler, TokioRenewalScheduler};
use crate::service::CalendarServiceFactory;
use crate::store::{KvStore, MemoryStore};
use crate::sync::{DigestSync, SyncEngine};
use crate::token_store::TokenStore;
use crate::watch::WatchManager;
use crate::webhook::WebhookHandler;

/// External collaborators.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn KvStore>,
    pub auth: Arc<dyn AuthorizationServer>,
    pub clients: Arc<dyn ClientFactory>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
}

/// Shared state of the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub flow: Arc<OAuthFlow>,
    pub actions: Arc<EventActions>,
    pub webhook: Arc<WebhookHandler>,
    pub notifier: Arc<dyn Notifier>,
    pub user_header: HeaderName,
}

/// The assembled component graph.
pub struct App {
    pub state: AppState,
    pub tokens: TokenStore,
    pub services: Arc<CalendarServiceFactory>,
    pub watch: Arc<WatchManager>,
    pub sync: Arc<dyn SyncEngine>,
    pub scheduler: Arc<dyn RenewalScheduler>,
    renewal_tasks: Option<Arc<TokioRenewalScheduler>>,
}

impl App {
    /// Wires the Google implementations over an in-memory store.
    pub fn from_config(config: &Config) -> ServerResult<Self> {
        let google = config
            .google
            .to_provider_config(&config.server.redirect_url())?;
        let auth = OAuthClient::new(google.clone())
            .map_err(|e| ServerError::config(e.to_string()))?;
        let clients =
            GoogleClientFactory::new(&google).map_err(|e| ServerError::config(e.to_string()))?;

        let notifier: Arc<dyn Notifier> = match config.notify.webhook_url {
            Some(ref url) => Arc::new(HttpNotifier::new(
                url.clone(),
                Duration::from_secs(config.google.timeout_secs),
            )?),
            None => Arc::new(LogNotifier),
        };

        let user_header = HeaderName::from_bytes(config.server.user_header.as_bytes())
            .map_err(|e| ServerError::config(format!("invalid user header: {}", e)))?;

        let mut builder = AppBuilder::new(
            Collaborators {
                store: Arc::new(MemoryStore::new()),
                auth: Arc::new(auth),
                clients: Arc::new(clients),
                notifier,
                clock: Arc::new(SystemClock),
            },
            config.server.webhook_url(),
        )
        .user_header(user_header)
        .renewal(config.renewal.to_renewal_config());
        if let Some(ttl) = config.renewal.channel_ttl_secs {
            builder = builder.channel_ttl(Duration::from_secs(ttl));
        }
        Ok(builder.build())
    }

    pub fn router(&self) -> Router {
        routes::router(self.state.clone())
    }

    /// Stops background renewal jobs.
    pub fn shutdown(&self) {
        if let Some(ref tasks) = self.renewal_tasks {
            tasks.shutdown();
        }
    }
}

pub struct AppBuilder {
    collaborators: Collaborators,
    callback_url: String,
    user_header: HeaderName,
    renewal: RenewalConfig,
    channel_ttl: Option<Duration>,
    scheduler: Option<Arc<dyn RenewalScheduler>>,
    sync: Option<Arc<dyn SyncEngine>>,
}

impl AppBuilder {
    /// `callback_url` is the public address of the `/watch` route.
    pub fn new(collaborators: Collaborators, callback_url: impl Into<String>) -> Self {
        Self {
            collaborators,
            callback_url: callback_url.into(),
            user_header: HeaderName::from_static("mattermost-user-id"),
            renewal: RenewalConfig::default(),
            channel_ttl: None,
            scheduler: None,
            sync: None,
        }
    }

    pub fn user_header(mut self, header: HeaderName) -> Self {
        self.user_header = header;
        self
    }

    pub fn renewal(mut self, config: RenewalConfig) -> Self {
        self.renewal = config;
        self
    }

    pub fn channel_ttl(mut self, ttl: Duration) -> Self {
        self.channel_ttl = Some(ttl);
        self
    }

    /// Replaces the tokio renewal scheduler.
    pub fn scheduler(mut self, scheduler: Arc<dyn RenewalScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Replaces [`DigestSync`].
    pub fn sync_engine(mut self, sync: Arc<dyn SyncEngine>) -> Self {
        self.sync = Some(sync);
        self
    }

    pub fn build(self) -> App {
        let Collaborators {
            store,
            auth,
            clients,
            notifier,
            clock,
        } = self.collaborators;

        let tokens = TokenStore::new(store);
        let locks = Arc::new(UserLocks::new());

        let services = Arc::new(CalendarServiceFactory::new(
            tokens.clone(),
            auth.clone(),
            clients,
            clock.clone(),
            locks.clone(),
        ));

        let mut watch = WatchManager::new(
            tokens.clone(),
            services.clone(),
            locks.clone(),
            self.callback_url,
        );
        if let Some(ttl) = self.channel_ttl {
            watch = watch.with_ttl(ttl);
        }
        let watch = Arc::new(watch);

        let sync = self.sync.unwrap_or_else(|| {
            Arc::new(DigestSync::new(
                tokens.clone(),
                services.clone(),
                notifier.clone(),
                locks.clone(),
            ))
        });

        let (scheduler, renewal_tasks) = match self.scheduler {
            Some(scheduler) => (scheduler, None),
            None => {
                let renewer = watch.clone();
                let renew: RenewFn = Arc::new(move |user| {
                    let renewer = renewer.clone();
                    Box::pin(async move { renewer.renew(&user).await })
                });
                let tasks = Arc::new(TokioRenewalScheduler::new(self.renewal, renew));
                (tasks.clone() as Arc<dyn RenewalScheduler>, Some(tasks))
            }
        };

        let flow = Arc::new(OAuthFlow::new(
            tokens.clone(),
            auth,
            sync.clone(),
            watch.clone(),
            scheduler.clone(),
            notifier.clone(),
            clock,
            locks,
        ));
        let actions = Arc::new(EventActions::new(services.clone(), notifier.clone()));
        let webhook = Arc::new(WebhookHandler::new(tokens.clone(), watch.clone(), sync.clone()));

        App {
            state: AppState {
                flow,
                actions,
                webhook,
                notifier,
                user_header: self.user_header,
            },
            tokens,
            services,
            watch,
            sync,
            scheduler,
            renewal_tasks,
        }
    }
}
