use actix_web::{
    Error, HttpResponse,
    body::EitherBody,
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
    http::header::RETRY_AFTER,
};
use futures::future::{Ready, ok};
use shared::ErrorDetail;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::{ConfigError, ThrottleConfig};

const PRUNE_THRESHOLD: usize = 1024;

/// `<count>/<period>`, e.g. `100/hour` or `5/m`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rate {
    pub num_requests: usize,
    pub duration: Duration,
}

impl Rate {
    pub fn parse(rate: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidRate(rate.to_string());
        let (count, period) = rate.split_once('/').ok_or_else(invalid)?;

        let num_requests: usize = count.trim().parse().map_err(|_| invalid())?;
        if num_requests == 0 {
            return Err(invalid());
        }

        let seconds = match period.trim().chars().next() {
            Some('s') => 1,
            Some('m') => 60,
            Some('h') => 60 * 60,
            Some('d') => 24 * 60 * 60,
            _ => return Err(invalid()),
        };

        Ok(Self {
            num_requests,
            duration: Duration::from_secs(seconds),
        })
    }
}

/// Per-client request history over a sliding window.
pub struct SlidingWindow {
    rate: Rate,
    histories: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl SlidingWindow {
    pub fn new(rate: Rate) -> Self {
        Self {
            rate,
            histories: Mutex::new(HashMap::new()),
        }
    }

    /// Records the request, or returns how long the client has to wait.
    pub fn check(&self, client: &str, now: Instant) -> Result<(), Duration> {
        let duration = self.rate.duration;
        let mut histories = self
            .histories
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if histories.len() > PRUNE_THRESHOLD {
            histories.retain(|_, history| {
                history
                    .back()
                    .is_some_and(|last| now.duration_since(*last) < duration)
            });
        }

        let history = histories.entry(client.to_string()).or_default();
        while history
            .front()
            .is_some_and(|oldest| now.duration_since(*oldest) >= duration)
        {
            history.pop_front();
        }

        if history.len() >= self.rate.num_requests {
            let oldest = history.front().copied().unwrap_or(now);
            return Err(duration.saturating_sub(now.duration_since(oldest)));
        }

        history.push_back(now);
        Ok(())
    }
}

fn wait_seconds(wait: Duration) -> u64 {
    wait.as_secs_f64().ceil().max(1.0) as u64
}

pub fn throttled_message(wait: Duration) -> String {
    let seconds = wait_seconds(wait);
    let unit = if seconds == 1 { "second" } else { "seconds" };
    format!(
        "Request was throttled. Expected available in {} {}.",
        seconds, unit
    )
}

/// Anonymous per-IP throttle for the routes it wraps. Without a rate it lets
/// everything through.
#[derive(Clone, Default)]
pub struct Throttle {
    window: Option<Arc<SlidingWindow>>,
    trust_forwarded: bool,
}

impl Throttle {
    pub fn new(rate: Rate) -> Self {
        Self {
            window: Some(Arc::new(SlidingWindow::new(rate))),
            trust_forwarded: false,
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn from_config(config: &ThrottleConfig) -> Result<Self, ConfigError> {
        let throttle = match &config.anon_rate {
            Some(rate) => Self::new(Rate::parse(rate)?),
            None => Self::disabled(),
        };
        Ok(throttle.trusting_forwarded(config.trust_forwarded))
    }

    pub fn trusting_forwarded(mut self, trust: bool) -> Self {
        self.trust_forwarded = trust;
        self
    }
}

/// Throttle key for a request.
///
/// `Forwarded` and `X-Forwarded-For` are set by the client unless a proxy
/// rewrites them, so they are only honoured when `trust_forwarded` is on.
/// Otherwise the key is the IP of the TCP peer.
fn client_key(req: &ServiceRequest, trust_forwarded: bool) -> String {
    if trust_forwarded {
        if let Some(addr) = req.connection_info().realip_remote_addr() {
            return addr.to_string();
        }
    }
    req.peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

impl<S, B> Transform<S, ServiceRequest> for Throttle
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = ThrottleService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(ThrottleService {
            service: Arc::new(service),
            window: self.window.clone(),
            trust_forwarded: self.trust_forwarded,
        })
    }
}

pub struct ThrottleService<S> {
    service: Arc<S>,
    window: Option<Arc<SlidingWindow>>,
    trust_forwarded: bool,
}

impl<S, B> Service<ServiceRequest> for ThrottleService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let client = client_key(&req, self.trust_forwarded);

        let verdict = match &self.window {
            Some(window) => window.check(&client, Instant::now()),
            None => Ok(()),
        };

        match verdict {
            Ok(()) => {
                let service = self.service.clone();
                Box::pin(async move {
                    let res = service.call(req).await?;
                    Ok(res.map_into_left_body())
                })
            }
            Err(wait) => {
                log::warn!("Throttled request from {} to {}", client, req.path());

                let (http_req, _payload) = req.into_parts();
                let response = HttpResponse::TooManyRequests()
                    .insert_header((RETRY_AFTER, wait_seconds(wait).to_string()))
                    .json(ErrorDetail {
                        detail: throttled_message(wait),
                    })
                    .map_into_right_body();
                Box::pin(async move { Ok(ServiceResponse::new(http_req, response)) })
            }
        }
    }
}
