//! Deduplication of incoming CoAP requests.
//!
//! A device retransmits a confirmable request under the same message id until
//! it sees the acknowledgement. Requests are keyed by `(peer, message id)` and
//! applied once; a duplicate gets the recorded response back.

use bytes::Bytes;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// How long a message id stays reserved after the first copy arrives.
pub const EXCHANGE_LIFETIME: Duration = Duration::from_secs(247);

/// Outcome of looking up an incoming request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Seen {
    /// First copy; the caller applies it and records the response.
    New,
    /// A copy is still being applied; drop this one.
    InProgress,
    /// Already answered; send this response again.
    Replay(Bytes),
}

#[derive(Debug)]
struct Exchange {
    received: Instant,
    response: Option<Bytes>,
}

impl Exchange {
    fn started(at: Instant) -> Self {
        Self {
            received: at,
            response: None,
        }
    }
}

/// Recent request exchanges, by peer and message id.
#[derive(Debug)]
pub struct ExchangeCache {
    exchanges: DashMap<(SocketAddr, u16), Exchange>,
    lifetime: Duration,
}

impl ExchangeCache {
    /// Create a cache holding exchanges for `lifetime`.
    #[must_use]
    pub fn new(lifetime: Duration) -> Self {
        Self {
            exchanges: DashMap::new(),
            lifetime,
        }
    }

    /// Record an incoming request and report whether it was seen before.
    pub fn begin(&self, peer: SocketAddr, message_id: u16) -> Seen {
        let now = Instant::now();
        let mut fresh = false;
        let mut exchange = self
            .exchanges
            .entry((peer, message_id))
            .or_insert_with(|| {
                fresh = true;
                Exchange::started(now)
            });
        if fresh {
            return Seen::New;
        }
        if now.duration_since(exchange.received) >= self.lifetime {
            // The id was reused after its lifetime: a new request.
            *exchange = Exchange::started(now);
            return Seen::New;
        }
        match &exchange.response {
            Some(response) => Seen::Replay(response.clone()),
            None => Seen::InProgress,
        }
    }

    /// Record the response sent for a request.
    pub fn complete(&self, peer: SocketAddr, message_id: u16, response: Bytes) {
        if let Some(mut exchange) = self.exchanges.get_mut(&(peer, message_id)) {
            exchange.response = Some(response);
        }
    }

    /// Forget a request that produced no response.
    pub fn abandon(&self, peer: SocketAddr, message_id: u16) {
        self.exchanges.remove(&(peer, message_id));
    }

    /// Drop exchanges past their lifetime.
    pub fn purge(&self) {
        let lifetime = self.lifetime;
        self.exchanges
            .retain(|_, exchange| exchange.received.elapsed() < lifetime);
    }

    /// Get the number of remembered exchanges.
    #[must_use]
    pub fn len(&self) -> usize {
        self.exchanges.len()
    }

    /// Check if no exchanges are remembered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }
}

impl Default for ExchangeCache {
    fn default() -> Self {
        Self::new(EXCHANGE_LIFETIME)
    }
}
