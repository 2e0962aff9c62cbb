//! Work a provider attaches to committed pages.
//!
//! A [`CommitHook`] sees every page right after it commits and may hand back
//! follow-up work, typically image downloads for the records just written.
//! The run owns that work. It waits for it before finalizing and drops it
//! if the run ends any other way. Follow-up failures never fail the run.

use crate::source::Record;
use crate::types::SyncScope;
use futures::future::BoxFuture;

/// Follow-up work spawned for one committed page.
pub type FollowUp = BoxFuture<'static, ()>;

pub trait CommitHook: Send + Sync {
    /// Called once per committed page, before the next page is fetched.
    ///
    /// Return `None` when the page needs nothing further.
    fn after_commit(&self, scope: &SyncScope, records: &[Record]) -> Option<FollowUp>;
}
