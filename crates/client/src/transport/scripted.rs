//! Scripted in-process transport.
//!
//! Routes requests by substring match on the URL and form values, replays the
//! configured responses and counts every call.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{ApiRequest, ApiResponse, HttpTransport};
use crate::FetchError;

type Reply = Result<ApiResponse, FetchError>;

struct Route {
    needle: String,
    /// Replayed front to back; the last reply repeats.
    replies: VecDeque<Reply>,
}

/// Test double for `HttpTransport`.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<ApiRequest>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every request matching `needle` with `reply`.
    pub fn on(self, needle: impl Into<String>, reply: Reply) -> Self {
        self.on_sequence(needle, vec![reply])
    }

    /// Answer successive matching requests with `replies`, repeating the last.
    pub fn on_sequence(self, needle: impl Into<String>, replies: Vec<Reply>) -> Self {
        assert!(!replies.is_empty(), "a route needs at least one reply");
        self.routes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Route { needle: needle.into(), replies: replies.into() });
        self
    }

    /// Sleep before answering, to hold requests in flight.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Total requests received.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests whose URL or form values contain `needle`.
    pub fn calls_matching(&self, needle: &str) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|r| haystack(r).contains(needle))
            .count()
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn reply_for(&self, request: &ApiRequest) -> Reply {
        let target = haystack(request);
        let mut routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        let Some(route) = routes.iter_mut().find(|r| target.contains(&r.needle)) else {
            return Err(FetchError::Connection(format!("connection refused: no route for {}", request.url)));
        };
        if route.replies.len() > 1 {
            route.replies.pop_front().unwrap_or_else(|| Err(FetchError::Timeout))
        } else {
            route.replies.front().cloned().unwrap_or(Err(FetchError::Timeout))
        }
    }
}

fn haystack(request: &ApiRequest) -> String {
    let mut target = request.url.clone();
    for (_, value) in request.form.iter().flatten() {
        target.push('\n');
        target.push_str(value);
    }
    target
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: ApiRequest, _timeout: Duration) -> Result<ApiResponse, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.reply_for(&request)
    }
}
