//! Background and periodic sync tags.
//!
//! The one-off sync tags hand off to a [`SyncHandler`]. The shipped handler
//! only logs: replaying queued offline writes belongs to whatever owns that
//! queue.

use crate::error::Result;
use async_trait::async_trait;
use std::fmt;
use tracing::{debug, info};

/// One-off background sync tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncTag {
    Habits,
    Transactions,
}

impl SyncTag {
    pub const HABITS: &'static str = "sync-habits";
    pub const TRANSACTIONS: &'static str = "sync-transactions";

    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            Self::HABITS => Some(SyncTag::Habits),
            Self::TRANSACTIONS => Some(SyncTag::Transactions),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncTag::Habits => Self::HABITS,
            SyncTag::Transactions => Self::TRANSACTIONS,
        }
    }
}

impl fmt::Display for SyncTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Periodic sync tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeriodicTag {
    MorningBriefing,
}

impl PeriodicTag {
    pub const MORNING_BRIEFING: &'static str = "morning-briefing";

    pub fn parse(tag: &str) -> Option<Self> {
        (tag == Self::MORNING_BRIEFING).then_some(PeriodicTag::MorningBriefing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodicTag::MorningBriefing => Self::MORNING_BRIEFING,
        }
    }
}

/// Receives background sync events.
#[async_trait]
pub trait SyncHandler: Send + Sync {
    async fn sync(&self, tag: SyncTag) -> Result<()>;
}

/// Handler that records the sync in the log and does nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSyncHandler;

#[async_trait]
impl SyncHandler for LoggingSyncHandler {
    async fn sync(&self, tag: SyncTag) -> Result<()> {
        match tag {
            SyncTag::Habits => info!("Syncing habits..."),
            SyncTag::Transactions => info!("Syncing transactions..."),
        }
        Ok(())
    }
}

/// Route a background sync event. Unknown tags are ignored and return `None`.
pub async fn dispatch_sync(handler: &dyn SyncHandler, tag: &str) -> Result<Option<SyncTag>> {
    let Some(parsed) = SyncTag::parse(tag) else {
        debug!("Ignoring unknown sync tag {}", tag);
        return Ok(None);
    };
    handler.sync(parsed).await?;
    Ok(Some(parsed))
}
