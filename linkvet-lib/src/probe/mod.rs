//! A single validation attempt against a single URL.
//!
//! The [`Prober`] sends `HEAD` (falling back to `GET` where servers reject
//! it), follows redirects itself to keep track of the chain, and reads at
//! most a bounded prefix of the body to recognize challenge pages. It never
//! retries. With [`Prober::probe_paced`] every request, including the `GET`
//! fallback and each redirect hop, first waits for a permit of the host it
//! goes to.

mod protection;
mod signal;

use std::collections::HashSet;
use std::time::Duration;

use http::{HeaderMap, Method, StatusCode, header};
use log::debug;
use reqwest::Response;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use typed_builder::TypedBuilder;
use url::Url;

use crate::ratelimit::{HostKey, HostLimiter, parse_retry_after};
use crate::{Error, Redirects, Result};

pub use protection::ProtectionSignature;
pub use signal::TransportSignal;

/// Default number of redirects followed before giving up
pub const DEFAULT_MAX_REDIRECTS: u32 = 5;
/// Default number of body bytes inspected on `GET`
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 64 * 1024;
/// Default user agent, identifying the tool honestly
pub const DEFAULT_USER_AGENT: &str = concat!("linkvet/", env!("CARGO_PKG_VERSION"));

/// Statuses with which servers commonly reject `HEAD` while serving `GET`.
/// 404 and 410 are never in this list: they mean the resource is gone.
pub const DEFAULT_FALLBACK_STATUSES: [StatusCode; 5] = [
    StatusCode::BAD_REQUEST,
    StatusCode::FORBIDDEN,
    StatusCode::METHOD_NOT_ALLOWED,
    StatusCode::NOT_ACCEPTABLE,
    StatusCode::NOT_IMPLEMENTED,
];

/// TCP connect timeout in seconds, independent of the request timeout
const CONNECT_TIMEOUT: u64 = 10;

/// TCP keep-alive interval in seconds
const TCP_KEEPALIVE: u64 = 60;

/// Which HTTP methods a probe may use
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MethodPolicy {
    /// `HEAD` first, `GET` once if the server rejects `HEAD`
    #[default]
    HeadThenGet,
    /// Always `GET`
    GetOnly,
    /// Always `HEAD`
    HeadOnly,
}

impl MethodPolicy {
    const fn first_method(self) -> Method {
        match self {
            Self::HeadThenGet | Self::HeadOnly => Method::HEAD,
            Self::GetOnly => Method::GET,
        }
    }
}

/// The final response of a probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResponse {
    /// Status of the final response
    pub status: StatusCode,
    /// URL of the final response
    pub final_url: Url,
    /// Number of redirects followed to get there
    pub redirect_count: u32,
    /// `Content-Type` of the final response
    pub content_type: Option<String>,
    /// Method of the final request
    pub method: Method,
    /// Protection layer detected in headers or body
    pub protection: Option<ProtectionSignature>,
    /// Delay requested by the server through `Retry-After`
    pub retry_after: Option<Duration>,
}

/// A probe which got no usable response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeFailure {
    /// What went wrong
    pub signal: TransportSignal,
    /// Human-readable description, including the underlying cause
    pub detail: String,
    /// Redirects followed before the failure
    pub redirect_count: u32,
}

/// Everything a single probe can observe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawOutcome {
    /// Some server answered
    Response(ProbeResponse),
    /// No response, or a redirect chain that cannot be completed
    Failure(ProbeFailure),
}

impl RawOutcome {
    /// The status of the final response, if there is one
    #[must_use]
    pub const fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Response(response) => Some(response.status),
            Self::Failure(_) => None,
        }
    }

    fn failure(signal: TransportSignal, detail: impl Into<String>, redirect_count: u32) -> Self {
        Self::Failure(ProbeFailure {
            signal,
            detail: detail.into(),
            redirect_count,
        })
    }
}

/// Builder for a [`Prober`]
#[derive(TypedBuilder, Debug, Clone)]
#[builder(field_defaults(default))]
pub struct ProberBuilder {
    /// User agent sent with every request
    #[builder(default = DEFAULT_USER_AGENT.to_string(), setter(into))]
    user_agent: String,

    /// Redirects followed before giving up
    #[builder(default = DEFAULT_MAX_REDIRECTS)]
    max_redirects: u32,

    /// Body bytes inspected on `GET`
    #[builder(default = DEFAULT_MAX_RESPONSE_BYTES)]
    max_response_bytes: usize,

    /// Statuses of a `HEAD` response which trigger the `GET` fallback
    #[builder(default = DEFAULT_FALLBACK_STATUSES.into_iter().collect())]
    fallback_statuses: HashSet<StatusCode>,
}

impl Default for ProberBuilder {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ProberBuilder {
    /// Instantiates a [`Prober`].
    ///
    /// # Errors
    ///
    /// Returns an `Err` if:
    /// - The user-agent is invalid.
    /// - The request client cannot be created.
    ///   See [here](https://docs.rs/reqwest/latest/reqwest/struct.ClientBuilder.html#errors).
    pub fn prober(self) -> Result<Prober> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::USER_AGENT,
            header::HeaderValue::from_str(&self.user_agent)?,
        );

        let client = reqwest::ClientBuilder::new()
            .gzip(true)
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT))
            .tcp_keepalive(Duration::from_secs(TCP_KEEPALIVE))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(Error::BuildClient)?;

        Ok(Prober {
            client,
            max_redirects: self.max_redirects,
            max_response_bytes: self.max_response_bytes,
            fallback_statuses: self.fallback_statuses,
        })
    }
}

/// Performs probes. Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct Prober {
    client: reqwest::Client,
    max_redirects: u32,
    max_response_bytes: usize,
    fallback_statuses: HashSet<StatusCode>,
}

impl Prober {
    /// Probe `url` once.
    ///
    /// `timeout` bounds every single request of the probe, including the
    /// `GET` fallback and each redirect hop.
    pub async fn probe(&self, url: &Url, timeout: Duration, method_policy: MethodPolicy) -> RawOutcome {
        self.run(url, timeout, method_policy, None).await
    }

    /// Probe `url` once, taking a permit from `hosts` before every request.
    ///
    /// Redirects to other hosts are charged to those hosts. The permits also
    /// record what each host answered.
    pub async fn probe_paced(
        &self,
        url: &Url,
        timeout: Duration,
        method_policy: MethodPolicy,
        hosts: &HostLimiter,
    ) -> RawOutcome {
        self.run(url, timeout, method_policy, Some(hosts)).await
    }

    async fn run(
        &self,
        url: &Url,
        timeout: Duration,
        method_policy: MethodPolicy,
        hosts: Option<&HostLimiter>,
    ) -> RawOutcome {
        let outcome = self
            .follow(url, method_policy.first_method(), timeout, hosts)
            .await;
        match &outcome {
            RawOutcome::Response(response)
                if method_policy == MethodPolicy::HeadThenGet
                    && response.method == Method::HEAD
                    && self.fallback_statuses.contains(&response.status) =>
            {
                debug!(
                    "HEAD {url} answered with {}, retrying with GET",
                    response.status
                );
                self.follow(url, Method::GET, timeout, hosts).await
            }
            _ => outcome,
        }
    }

    /// Send `method` to `url` and follow redirects manually
    async fn follow(
        &self,
        url: &Url,
        mut method: Method,
        timeout: Duration,
        hosts: Option<&HostLimiter>,
    ) -> RawOutcome {
        let mut chain = Redirects::start(url.clone());
        let mut current = url.clone();

        loop {
            let hops = redirect_count(&chain);
            let permit = match hosts {
                Some(hosts) => match HostKey::try_from(&current) {
                    Ok(host) => Some(hosts.acquire(&host).await),
                    Err(e) => {
                        return RawOutcome::failure(TransportSignal::InvalidUrl, e.to_string(), hops);
                    }
                },
                None => None,
            };
            let response = match self
                .client
                .request(method.clone(), current.clone())
                .timeout(timeout)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    if let Some(permit) = &permit {
                        permit.record_failure();
                    }
                    let (signal, detail) = signal::analyze(&e);
                    debug!("{method} {current} failed ({signal}): {detail}");
                    return RawOutcome::failure(signal, detail, hops);
                }
            };

            let status = response.status();
            if let Some(permit) = &permit {
                permit.record_response(status.as_u16());
            }
            let location = status
                .is_redirection()
                .then(|| response.headers().get(header::LOCATION))
                .flatten();
            let Some(location) = location else {
                return RawOutcome::Response(self.inspect(response, method, hops).await);
            };

            let next = match location
                .to_str()
                .ok()
                .and_then(|location| current.join(location).ok())
            {
                Some(mut next) if matches!(next.scheme(), "http" | "https") => {
                    next.set_fragment(None);
                    next
                }
                _ => {
                    return RawOutcome::failure(
                        TransportSignal::InvalidUrl,
                        format!("Invalid redirect target {location:?} from {current}"),
                        hops,
                    );
                }
            };

            if chain.contains(&next) {
                chain.push(next);
                return RawOutcome::failure(
                    TransportSignal::RedirectLoop,
                    format!("Redirect loop: {chain}"),
                    hops,
                );
            }
            if hops >= self.max_redirects {
                return RawOutcome::failure(
                    TransportSignal::TooManyRedirects,
                    format!("More than {} redirects: {chain} --> {next}", self.max_redirects),
                    hops,
                );
            }

            if status == StatusCode::SEE_OTHER && method != Method::HEAD {
                method = Method::GET;
            }
            debug!("{status} redirect {current} --> {next}");
            chain.push(next.clone());
            current = next;
        }
    }

    /// Extract everything classification needs from the final response
    async fn inspect(&self, mut response: Response, method: Method, redirect_count: u32) -> ProbeResponse {
        let status = response.status();
        let final_url = response.url().clone();
        let headers = response.headers();
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(String::from);
        let retry_after = headers.get(header::RETRY_AFTER).and_then(parse_retry_after);
        let mut protection = protection::from_headers(status, headers);

        if protection.is_none() && method == Method::GET && !status.is_success() {
            let body = self.read_prefix(&mut response).await;
            protection = protection::from_body(&body);
        }

        ProbeResponse {
            status,
            final_url,
            redirect_count,
            content_type,
            method,
            protection,
            retry_after,
        }
    }

    /// Read at most `max_response_bytes` of the body. Errors only shorten
    /// the prefix: the status is already known.
    async fn read_prefix(&self, response: &mut Response) -> Vec<u8> {
        let mut body = Vec::new();
        while body.len() < self.max_response_bytes {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    let take = chunk.len().min(self.max_response_bytes - body.len());
                    body.extend_from_slice(&chunk[..take]);
                }
                Ok(None) => break,
                Err(e) => {
                    debug!("Stopped reading body of {}: {e}", response.url());
                    break;
                }
            }
        }
        body
    }
}

fn redirect_count(chain: &Redirects) -> u32 {
    u32::try_from(chain.count()).unwrap_or(u32::MAX)
}
