//! Shared application state

use std::sync::Arc;

use crate::bot::Bot;
use crate::config::Config;
use crate::linking::{LinkTokenIssuer, LinkTokenRegistrar, TelegramLinker};
use crate::otp::OtpService;
use crate::ratelimit::{FixedWindowLimiter, NoopLimiter, RateLimiter};
use crate::store::Store;
use crate::telegram::MarkupSender;

/// Admission limiters for the internal API, one per admission key class
pub struct ApiLimiters {
    pub link_token: Arc<dyn RateLimiter>,
    pub link_token_global: Arc<dyn RateLimiter>,
    pub otp_chat: Arc<dyn RateLimiter>,
    pub otp_global: Arc<dyn RateLimiter>,
}

impl ApiLimiters {
    pub fn noop() -> Self {
        let noop: Arc<dyn RateLimiter> = Arc::new(NoopLimiter);
        Self {
            link_token: noop.clone(),
            link_token_global: noop.clone(),
            otp_chat: noop.clone(),
            otp_global: noop,
        }
    }

    /// Fixed-window limiters sharing one limit/window pair. The global
    /// limiters get ten times the per-key budget.
    pub fn fixed_window(limit: u32, window: std::time::Duration) -> Self {
        Self {
            link_token: Arc::new(FixedWindowLimiter::new(limit, window)),
            link_token_global: Arc::new(FixedWindowLimiter::new(limit * 10, window)),
            otp_chat: Arc::new(FixedWindowLimiter::new(limit, window)),
            otp_global: Arc::new(FixedWindowLimiter::new(limit * 10, window)),
        }
    }
}

/// Application state shared across handlers, generic over the store and the
/// message sender so tests can swap both.
pub struct AppState<S: Store, M: MarkupSender> {
    pub store: Arc<S>,
    pub issuer: LinkTokenIssuer<S>,
    pub registrar: LinkTokenRegistrar<S>,
    pub otp: OtpService<S, M>,
    pub bot: Arc<Bot>,
    pub internal_key: String,
    pub webhook_secret: Option<String>,
    pub limiters: ApiLimiters,
}

impl<S: Store + 'static, M: MarkupSender + 'static> AppState<S, M> {
    pub fn new(store: Arc<S>, sender: Arc<M>, config: &Config, limiters: ApiLimiters) -> Self {
        let secret = config.hash_secret.as_bytes().to_vec();

        let issue_limiter: Option<Arc<dyn RateLimiter>> = if config.rate_limit > 0 {
            Some(Arc::new(FixedWindowLimiter::new(
                config.rate_limit,
                config.rate_window,
            )))
        } else {
            None
        };

        let issuer = LinkTokenIssuer::new(
            store.clone(),
            issue_limiter,
            config.link_token_ttl,
            secret.clone(),
        );
        let registrar =
            LinkTokenRegistrar::new(store.clone(), config.link_token_ttl, secret.clone());
        let linker = TelegramLinker::new(store.clone(), secret);

        let otp = OtpService::new(
            store.clone(),
            sender.clone(),
            config.otp_ttl,
            config.otp_min_interval,
            config.otp_message_prefix.clone(),
        );

        let bot = Arc::new(Bot::new(sender, Arc::new(linker), store.clone()));

        Self {
            store,
            issuer,
            registrar,
            otp,
            bot,
            internal_key: config.internal_key.clone(),
            webhook_secret: config.webhook_secret.clone(),
            limiters,
        }
    }
}
