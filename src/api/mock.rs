//! Scripted in-process transport for tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::transport::{HttpRequest, HttpResponse, Transport, TransportError};
use crate::auth::LoginRedirect;

type Responder = Box<dyn Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync>;
type Delay = Box<dyn Fn(&HttpRequest) -> Duration + Send + Sync>;

pub struct MockTransport {
    responder: Responder,
    delay: Delay,
    calls: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            delay: Box::new(|_| Duration::ZERO),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Suspend every call for `delay` before answering, so concurrent
    /// requests overlap.
    pub fn with_delay(self, delay: Duration) -> Self {
        self.with_delay_for(move |_| delay)
    }

    /// Per-call delay, e.g. to stall only the first refresh
    pub fn with_delay_for<F>(mut self, delay: F) -> Self
    where
        F: Fn(&HttpRequest) -> Duration + Send + Sync + 'static,
    {
        self.delay = Box::new(delay);
        self
    }

    pub fn calls(&self) -> Vec<HttpRequest> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of calls whose URL ends with `suffix`
    pub fn count(&self, suffix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.url.ends_with(suffix))
            .count()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.calls.lock().unwrap().push(request.clone());
        let delay = (self.delay)(&request);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        (self.responder)(&request)
    }
}

/// Counts login redirects
#[derive(Default)]
pub struct CountingRedirect {
    count: AtomicUsize,
}

impl CountingRedirect {
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl LoginRedirect for CountingRedirect {
    fn redirect_to_login(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}
