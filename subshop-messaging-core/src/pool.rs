// subshop-messaging-core/src/pool.rs
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use crate::MessagingError;

/// Where pooled channels come from: normally the live broker connection.
#[async_trait]
pub trait ChannelSource: Send + Sync + 'static {
    type Channel: Send + 'static;

    /// Opens a channel on the current connection. Fails with
    /// [`MessagingError::Connection`] when there is no live connection.
    async fn open_channel(&self) -> Result<Self::Channel, MessagingError>;

    /// Closes a channel that will not be reused. Must not block.
    fn discard(&self, channel: Self::Channel);

    fn is_open(&self, _channel: &Self::Channel) -> bool {
        true
    }
}

struct PoolState<C> {
    idle: Vec<C>,
    generation: u64,
}

/// Bounded pool of reusable channels.
///
/// Every connection gets its own generation; channels from an older generation
/// are never handed out or stored again.
pub struct ChannelPool<C> {
    state: Arc<Mutex<PoolState<C>>>,
    max_channels: usize,
}

impl<C> Clone for ChannelPool<C> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            max_channels: self.max_channels,
        }
    }
}

impl<C: Send + 'static> ChannelPool<C> {
    pub fn new(max_channels: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(PoolState {
                idle: Vec::new(),
                generation: 0,
            })),
            max_channels: max_channels.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState<C>> {
        // the state stays consistent even if a holder panicked
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn max_channels(&self) -> usize {
        self.max_channels
    }

    /// Number of idle channels.
    pub fn len(&self) -> usize {
        self.lock().idle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Takes an idle channel or opens a new one through `source`.
    ///
    /// The lock is released before `open_channel` runs.
    pub async fn borrow<S>(&self, source: &Arc<S>) -> Result<PooledChannel<S>, MessagingError>
    where
        S: ChannelSource<Channel = C>,
    {
        let (reused, generation) = {
            let mut state = self.lock();
            let mut reused = None;
            while let Some(ch) = state.idle.pop() {
                if source.is_open(&ch) {
                    reused = Some(ch);
                    break;
                }
                source.discard(ch);
            }
            (reused, state.generation)
        };

        let channel = match reused {
            Some(ch) => ch,
            None => {
                debug!(generation, "opening new channel");
                source.open_channel().await?
            }
        };

        Ok(PooledChannel {
            channel: Some(channel),
            generation,
            pool: self.clone(),
            source: Arc::clone(source),
        })
    }

    /// Puts a channel back. Returns it when it has to be discarded instead
    /// (pool full or stale generation).
    fn release(&self, channel: C, generation: u64) -> Option<C> {
        let mut state = self.lock();
        if generation != state.generation || state.idle.len() >= self.max_channels {
            return Some(channel);
        }
        state.idle.push(channel);
        None
    }

    /// Starts a new generation and discards every idle channel.
    pub fn reset<S>(&self, source: &S)
    where
        S: ChannelSource<Channel = C>,
    {
        let stale = {
            let mut state = self.lock();
            state.generation += 1;
            std::mem::take(&mut state.idle)
        };
        debug!(discarded = stale.len(), "channel pool reset");
        for ch in stale {
            source.discard(ch);
        }
    }
}

/// A borrowed channel. Goes back to its pool on drop, on every path.
pub struct PooledChannel<S: ChannelSource> {
    channel: Option<S::Channel>,
    generation: u64,
    pool: ChannelPool<S::Channel>,
    source: Arc<S>,
}

impl<S: ChannelSource> PooledChannel<S> {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Closes the channel instead of returning it to the pool.
    pub fn invalidate(mut self) {
        if let Some(ch) = self.channel.take() {
            self.source.discard(ch);
        }
    }
}

impl<S: ChannelSource> Deref for PooledChannel<S> {
    type Target = S::Channel;

    fn deref(&self) -> &S::Channel {
        match self.channel.as_ref() {
            Some(ch) => ch,
            None => unreachable!("pooled channel used after release"),
        }
    }
}

impl<S: ChannelSource> Drop for PooledChannel<S> {
    fn drop(&mut self) {
        let Some(ch) = self.channel.take() else {
            return;
        };
        if !self.source.is_open(&ch) {
            self.source.discard(ch);
            return;
        }
        if let Some(ch) = self.pool.release(ch, self.generation) {
            self.source.discard(ch);
        }
    }
}
