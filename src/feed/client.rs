use reqwest::redirect::Policy;
use std::time::Duration;

use super::fetcher::FetchOptions;
use crate::util::validate_fetch_url;

const MAX_REDIRECTS: usize = 5;

/// HTTP client shared by the fetcher, the favicon resolver and enrichment.
///
/// Redirect targets go through the same host policy as the initial URL, so
/// a public feed cannot bounce the engine onto an internal address.
pub fn build_http_client(options: &FetchOptions) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .redirect(redirect_policy(options.allow_private_hosts))
        .user_agent(concat!("feedsync/", env!("CARGO_PKG_VERSION")))
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(30))
        .tcp_keepalive(Duration::from_secs(60))
        .connect_timeout(options.timeout)
        .build()
}

fn redirect_policy(allow_private_hosts: bool) -> Policy {
    Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error(format!("Too many redirects (max {MAX_REDIRECTS})"));
        }

        let url = attempt.url();
        if attempt.previous().iter().any(|prev| prev.as_str() == url.as_str()) {
            return attempt.error("Redirect loop detected");
        }

        if let Err(e) = validate_fetch_url(url.as_str(), allow_private_hosts) {
            return attempt.error(format!("Redirect target rejected: {e}"));
        }

        tracing::debug!(
            from = %attempt.previous().last().map(|u| u.as_str()).unwrap_or("initial"),
            to = %url,
            hop = attempt.previous().len() + 1,
            "Following redirect"
        );

        attempt.follow()
    })
}
