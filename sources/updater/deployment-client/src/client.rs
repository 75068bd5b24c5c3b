use crate::error::{self, Result};
use reqwest::blocking::{Client, ClientBuilder};
use reqwest::Proxy;
use snafu::ResultExt;
use std::env;
use std::time::Duration;

/// Reads `HTTP_PROXY`/`http_proxy`, `HTTPS_PROXY`/`https_proxy`, and `NO_PROXY`/`no_proxy` the
/// same way most proxy-aware CLI tools do: lowercase wins when both cases are set for the same
/// scheme, but a scheme set in *both* upper and lower case to *different* values is rejected as
/// ambiguous rather than silently picking one.
fn proxy_var(upper: &str, lower: &str) -> Result<Option<String>> {
    let upper_val = env::var(upper).ok();
    let lower_val = env::var(lower).ok();
    match (upper_val, lower_val) {
        (Some(u), Some(l)) if u != l => error::ConflictingProxyConfigSnafu {
            a: upper.to_string(),
            b: lower.to_string(),
        }
        .fail(),
        (_, Some(l)) => Ok(Some(l)),
        (Some(u), None) => Ok(Some(u)),
        (None, None) => Ok(None),
    }
}

/// Builds a blocking `reqwest::Client` honoring the standard proxy environment variables, with a
/// fixed per-request timeout. `reqwest` would pick these up itself by default, but building the
/// proxy config explicitly lets us detect and reject the upper/lower-case conflicts above instead
/// of reqwest silently preferring one.
pub fn build_client(timeout: Duration) -> Result<Client> {
    let mut builder: ClientBuilder = Client::builder().timeout(timeout).no_proxy();

    if let Some(no_proxy) = proxy_var("NO_PROXY", "no_proxy")? {
        // Applied per-proxy below via `Proxy::no_proxy`, which parses the same comma-separated
        // host list `reqwest` itself accepts.
        if let Some(http_proxy) = proxy_var("HTTP_PROXY", "http_proxy")? {
            let proxy = Proxy::http(&http_proxy)
                .context(error::BuildClientSnafu)?
                .no_proxy(reqwest::NoProxy::from_string(&no_proxy));
            builder = builder.proxy(proxy);
        }
        if let Some(https_proxy) = proxy_var("HTTPS_PROXY", "https_proxy")? {
            let proxy = Proxy::https(&https_proxy)
                .context(error::BuildClientSnafu)?
                .no_proxy(reqwest::NoProxy::from_string(&no_proxy));
            builder = builder.proxy(proxy);
        }
    } else {
        if let Some(http_proxy) = proxy_var("HTTP_PROXY", "http_proxy")? {
            builder = builder.proxy(Proxy::http(&http_proxy).context(error::BuildClientSnafu)?);
        }
        if let Some(https_proxy) = proxy_var("HTTPS_PROXY", "https_proxy")? {
            builder = builder.proxy(Proxy::https(&https_proxy).context(error::BuildClientSnafu)?);
        }
    }

    builder.build().context(error::BuildClientSnafu)
}
