use anyhow::{Result, bail};
use governor::clock::{Clock, DefaultClock};
use governor::state::InMemoryState;
use governor::state::direct::NotKeyed;
use governor::{Quota, RateLimiter as Gcra};
use std::fmt;
use std::num::NonZeroU32;

use crate::shutdown::{Cancelled, Shutdown};

/// Process-wide request throttle for the remote repository.
///
/// One instance is built at startup and handed to every retrieval path by
/// reference; the underlying GCRA state is lock-free, so concurrent workers
/// share a single QPS ceiling. The burst size is one token, which means idle
/// periods never build up a backlog of requests.
pub struct RateLimiter {
    limiter: Gcra<NotKeyed, InMemoryState, DefaultClock>,
    clock: DefaultClock,
    shutdown: Shutdown,
    qps: NonZeroU32,
}

impl RateLimiter {
    pub fn new(qps: u32, shutdown: Shutdown) -> Result<Self> {
        let Some(qps) = NonZeroU32::new(qps) else {
            bail!("rate limit must be at least 1 request per second");
        };
        let quota = Quota::per_second(qps).allow_burst(NonZeroU32::MIN);
        Ok(Self {
            limiter: Gcra::direct(quota),
            clock: DefaultClock::default(),
            shutdown,
            qps,
        })
    }

    /// Blocks until a token is available and consumes it.
    pub fn acquire(&self) -> Result<(), Cancelled> {
        loop {
            self.shutdown.check()?;
            match self.limiter.check() {
                Ok(()) => return Ok(()),
                Err(not_until) => {
                    let wait = not_until.wait_time_from(self.clock.now());
                    self.shutdown.sleep(wait)?;
                }
            }
        }
    }
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter").field("qps", &self.qps).finish()
    }
}
