//! Round-robin server selection with reconnect jitter and lap cooldown.

use rand::Rng;
use std::net::SocketAddr;
use std::time::Duration;

/// One planned connect attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    /// Index of the server in the address list
    pub index: usize,
    /// Server to dial
    pub addr: SocketAddr,
    /// Random delay applied before dialing, `None` on the very first attempt
    pub jitter: Option<Duration>,
    /// Extra delay after a full lap without success
    pub cooldown: Option<Duration>,
}

impl Attempt {
    /// Total time to wait before dialing
    pub fn delay(&self) -> Duration {
        self.jitter.unwrap_or_default() + self.cooldown.unwrap_or_default()
    }
}

/// Cursor over the configured servers
#[derive(Debug, Clone)]
pub struct AddressRotation {
    addrs: Vec<SocketAddr>,
    last_connect_index: Option<usize>,
    next_addr_to_try: usize,
    current_connect_index: usize,
    max_jitter: Duration,
    lap_cooldown: Duration,
}

impl AddressRotation {
    /// Create a rotation; `addrs` must not be empty
    pub fn new(addrs: Vec<SocketAddr>, max_jitter: Duration, lap_cooldown: Duration) -> Self {
        debug_assert!(!addrs.is_empty());
        Self {
            addrs,
            last_connect_index: None,
            next_addr_to_try: 0,
            current_connect_index: 0,
            max_jitter,
            lap_cooldown,
        }
    }

    /// Plan the next attempt and advance the cursor
    pub fn next_attempt(&mut self) -> Attempt {
        let (jitter, cooldown) = match self.last_connect_index {
            None => {
                // first try goes out immediately
                self.last_connect_index = Some(0);
                (None, None)
            }
            Some(last) => {
                let jitter = self.random_jitter();
                let cooldown = (self.next_addr_to_try == last).then_some(self.lap_cooldown);
                (Some(jitter), cooldown)
            }
        };

        self.current_connect_index = self.next_addr_to_try;
        let addr = self.addrs[self.next_addr_to_try];
        self.next_addr_to_try = (self.next_addr_to_try + 1) % self.addrs.len();

        Attempt {
            index: self.current_connect_index,
            addr,
            jitter,
            cooldown,
        }
    }

    /// Record that the in-progress attempt produced a socket
    pub fn mark_connected(&mut self) {
        self.last_connect_index = Some(self.current_connect_index);
    }

    /// Number of configured servers
    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    /// Whether no servers are configured
    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }

    fn random_jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..max_ms))
    }
}
