use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use crate::types::DEFAULT_ROUND_TIMER_SECS;

/// Relay configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind_addr: IpAddr,
    pub port: u16,
    /// Lobbies with no activity for this long are evicted
    pub lobby_idle_ttl: Duration,
    pub sweep_interval: Duration,
    /// Per-subscriber backlog of the relay broadcast channel
    pub channel_capacity: usize,
    /// Round timer given to lobbies the relay creates itself
    pub round_timer_seconds: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 3001,
            lobby_idle_ttl: Duration::from_secs(6 * 60 * 60),
            sweep_interval: Duration::from_secs(60),
            channel_capacity: 256,
            round_timer_seconds: DEFAULT_ROUND_TIMER_SECS,
        }
    }
}

impl RelayConfig {
    /// Load configuration from environment variables
    ///
    /// - `BIND_ADDR`: listen address (default 0.0.0.0)
    /// - `PORT_WS`: listen port (default 3001)
    /// - `LOBBY_IDLE_TTL_SECS`: idle lobby lifetime (default 21600)
    /// - `LOBBY_SWEEP_INTERVAL_SECS`: eviction sweep period (default 60)
    /// - `RELAY_CHANNEL_CAPACITY`: broadcast backlog (default 256)
    /// - `ROUND_TIMER_SECS`: default round timer (default 30)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let config = Self {
            bind_addr: env_or("BIND_ADDR", defaults.bind_addr),
            port: env_or("PORT_WS", defaults.port),
            lobby_idle_ttl: Duration::from_secs(env_or(
                "LOBBY_IDLE_TTL_SECS",
                defaults.lobby_idle_ttl.as_secs(),
            )),
            sweep_interval: Duration::from_secs(
                env_or(
                    "LOBBY_SWEEP_INTERVAL_SECS",
                    defaults.sweep_interval.as_secs(),
                )
                .max(1),
            ),
            channel_capacity: env_or("RELAY_CHANNEL_CAPACITY", defaults.channel_capacity).max(1),
            round_timer_seconds: env_or("ROUND_TIMER_SECS", defaults.round_timer_seconds),
        };

        tracing::info!(
            "Relay config: addr={}, idle_ttl={}s, sweep={}s, channel_capacity={}",
            config.socket_addr(),
            config.lobby_idle_ttl.as_secs(),
            config.sweep_interval.as_secs(),
            config.channel_capacity
        );

        config
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }
}

/// Settings for a participating device
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Relay endpoint, e.g. `ws://localhost:3001/ws`
    pub url: String,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub title_lookup_timeout: Duration,
    pub round_timer_seconds: u32,
    pub event_buffer: usize,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
            title_lookup_timeout: Duration::from_secs(5),
            round_timer_seconds: DEFAULT_ROUND_TIMER_SECS,
            event_buffer: 64,
        }
    }

    /// Read `RELAY_URL` (default `ws://localhost:3001/ws`)
    pub fn from_env() -> Self {
        let url = std::env::var("RELAY_URL").unwrap_or_else(|_| "ws://localhost:3001/ws".into());
        let mut config = Self::new(url);
        config.round_timer_seconds = env_or("ROUND_TIMER_SECS", config.round_timer_seconds);
        config
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max.max(initial);
        self
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring invalid {}={:?}", key, raw);
            default
        }),
        Err(_) => default,
    }
}
