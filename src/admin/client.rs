use backon::{ExponentialBuilder, Retryable};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use std::{num::NonZeroU32, sync::Arc, time::Duration};
use tracing::{debug, info, warn};
use url::Url;

use super::error::{BankingError, GENERIC_MESSAGE, classify_error};
use super::{AUTH_HEADER, AdminCredentials, SUBSCRIPTION_METHOD, Subscription};
use crate::config::AdminConfig;
use crate::error::{IsRetryable, SettingsError};

fn default_retry_policy() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(500))
        .with_max_delay(Duration::from_secs(3))
        .with_max_times(3)
        .with_jitter()
}

/// HTTP client for the banking admin app, shared by all requests.
#[derive(Clone)]
pub struct AdminClient {
    client: reqwest::Client,
    limiter: Arc<DefaultDirectRateLimiter>,
    retry_policy: ExponentialBuilder,
}

impl AdminClient {
    pub fn new(cfg: &AdminConfig) -> Result<Self, SettingsError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .connect_timeout(Duration::from_secs(cfg.connect_timeout_secs))
            .timeout(Duration::from_secs(cfg.timeout_secs));
        // only the configured proxy is used, never the environment's
        builder = match cfg.proxy.as_ref() {
            Some(proxy_url) => builder.proxy(reqwest::Proxy::all(proxy_url.as_str())?),
            None => builder.no_proxy(),
        };
        let client = builder.build()?;

        let per_minute = NonZeroU32::new(cfg.requests_per_minute).unwrap_or(NonZeroU32::MIN);
        let limiter = Arc::new(RateLimiter::direct(Quota::per_minute(per_minute)));
        info!(
            rate_limit = per_minute.get(),
            proxy = %cfg.proxy.as_ref().map(|u| u.as_str()).unwrap_or("<none>"),
            "admin client ready"
        );

        Ok(Self {
            client,
            limiter,
            retry_policy: default_retry_policy(),
        })
    }

    /// Replace the retry policy, e.g. to drop the delays in tests.
    pub fn with_retry_policy(mut self, retry_policy: ExponentialBuilder) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Ask the admin app for the subscription of `creds.customer_id`.
    pub async fn fetch_subscription(
        &self,
        creds: &AdminCredentials,
    ) -> Result<Subscription, SettingsError> {
        let url = Url::parse(&creds.method_url(SUBSCRIPTION_METHOD))?;
        let url = &url;

        let body = (|| async { self.get_json(url, creds).await })
            .retry(self.retry_policy)
            .when(|e: &SettingsError| e.is_retryable())
            .notify(|err, dur: Duration| {
                warn!(
                    "get_subscription retrying after error {}, sleeping {:?}",
                    err, dur
                );
            })
            .await?;

        match body.get("message") {
            Some(message) if !message.is_null() => {
                let subscription: Subscription = serde_json::from_value(message.clone())
                    .map_err(|e| {
                        warn!(error = %e, "admin app returned an unreadable subscription");
                        BankingError::new(None, GENERIC_MESSAGE)
                    })?;
                debug!(
                    customer_id = %creds.customer_id,
                    plan = ?subscription.plan,
                    status = ?subscription.status,
                    "subscription fetched"
                );
                Ok(subscription)
            }
            _ => Err(BankingError::new(None, GENERIC_MESSAGE).into()),
        }
    }

    async fn get_json(&self, url: &Url, creds: &AdminCredentials) -> Result<Value, SettingsError> {
        self.limiter.until_ready().await;

        let resp = self
            .client
            .get(url.clone())
            .header(AUTH_HEADER, creds.auth_value())
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let content_type = resp
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            let body = resp.bytes().await?;
            return Err(classify_error(status, content_type.as_deref(), &body).into());
        }

        Ok(resp.json::<Value>().await?)
    }
}
