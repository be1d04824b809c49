//! Lazily consumed post sequence returned by scheduled and cached queries.

use crate::api::post::Post;
use anyhow::Result;
use futures::{Stream, TryStreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

enum Source {
    Empty,
    Buffered(std::vec::IntoIter<Post>),
    Live(mpsc::Receiver<Result<Post>>),
}

/// Finite stream of posts. A live stream ends after its last page, or right
/// after yielding an error item. Dropping it stops the producer from
/// submitting more pages.
pub struct PostStream {
    source: Source,
}

impl std::fmt::Debug for PostStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.source {
            Source::Empty => "empty",
            Source::Buffered(_) => "buffered",
            Source::Live(_) => "live",
        };
        f.debug_struct("PostStream").field("source", &kind).finish()
    }
}

impl PostStream {
    pub fn empty() -> Self {
        Self {
            source: Source::Empty,
        }
    }

    pub fn from_posts(posts: Vec<Post>) -> Self {
        Self {
            source: Source::Buffered(posts.into_iter()),
        }
    }

    pub(crate) fn live(receiver: mpsc::Receiver<Result<Post>>) -> Self {
        Self {
            source: Source::Live(receiver),
        }
    }

    /// Drains the stream, failing on the first error item.
    pub async fn try_collect_all(self) -> Result<Vec<Post>> {
        self.try_collect().await
    }
}

impl Stream for PostStream {
    type Item = Result<Post>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match &mut self.get_mut().source {
            Source::Empty => Poll::Ready(None),
            Source::Buffered(posts) => Poll::Ready(posts.next().map(Ok)),
            Source::Live(receiver) => receiver.poll_recv(cx),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match &self.source {
            Source::Empty => (0, Some(0)),
            Source::Buffered(posts) => posts.size_hint(),
            Source::Live(_) => (0, None),
        }
    }
}
