//! Property feeds and the directories that cache what they deliver

pub mod directory;
pub mod store;

pub use directory::{Directory, PropertyItem};
pub use store::{MemoryStore, PropertyStore, PropertySubscriber, WatchId};

use futures::future::BoxFuture;
use std::fmt;
use std::future::IntoFuture;
use tokio::sync::oneshot;

use crate::error::{Error, Result};

/// The three independently updated feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    Cluster,
    Service,
    Uri,
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Cluster => "cluster",
            Self::Service => "service",
            Self::Uri => "uri",
        };
        f.write_str(name)
    }
}

/// Completion signal of a `listen_to_*` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenEvent {
    pub kind: PropertyKind,
    pub name: String,
}

/// Resolves once every watch started by a `listen_to_*` call has
/// delivered and processed its initial value
///
/// Await it, or poll [`ListenCompletion::is_done`] from synchronous code.
#[must_use = "dropping the completion does not cancel the watch, but its signal is lost"]
pub struct ListenCompletion {
    event: ListenEvent,
    pending: Vec<oneshot::Receiver<ListenEvent>>,
}

impl ListenCompletion {
    pub(crate) fn new(kind: PropertyKind, name: &str, pending: Vec<oneshot::Receiver<ListenEvent>>) -> Self {
        Self {
            event: ListenEvent {
                kind,
                name: name.to_string(),
            },
            pending,
        }
    }

    #[must_use]
    pub const fn event(&self) -> &ListenEvent {
        &self.event
    }

    /// Non-blocking check for completion
    pub fn is_done(&mut self) -> bool {
        self.pending
            .retain_mut(|rx| matches!(rx.try_recv(), Err(oneshot::error::TryRecvError::Empty)));
        self.pending.is_empty()
    }
}

impl IntoFuture for ListenCompletion {
    type Output = Result<ListenEvent>;
    type IntoFuture = BoxFuture<'static, Result<ListenEvent>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move {
            for rx in self.pending {
                rx.await.map_err(|_| Error::ShutDown)?;
            }
            Ok(self.event)
        })
    }
}
