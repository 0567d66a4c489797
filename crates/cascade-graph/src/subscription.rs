//! Commit notifications for observers.

use cascade_core::{Artifact, ArtifactId, ArtifactType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use uuid::Uuid;

/// A committed artifact version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitNotice {
    pub artifact: ArtifactId,
    pub artifact_type: ArtifactType,
    /// Identity path.
    pub path: String,
    /// Storage path.
    pub file_path: String,
    pub version: u64,
    pub committed_at: DateTime<Utc>,
}

impl CommitNotice {
    /// Notice for an artifact that was just committed.
    pub fn from_artifact(artifact: &Artifact) -> Self {
        Self {
            artifact: artifact.id(),
            artifact_type: artifact.artifact_type(),
            path: artifact.path(),
            file_path: artifact.file_path(),
            version: artifact.version(),
            committed_at: artifact.committed_at().unwrap_or_else(Utc::now),
        }
    }
}

/// Filter for commit subscriptions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommitFilter {
    /// Artifact types to match.
    pub artifact_types: Option<Vec<ArtifactType>>,

    /// Identity path prefix to match.
    pub path_prefix: Option<String>,
}

impl CommitFilter {
    /// Match commits of the given types.
    pub fn types(types: Vec<ArtifactType>) -> Self {
        Self {
            artifact_types: Some(types),
            ..Default::default()
        }
    }

    /// Match commits under a path prefix.
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self {
            path_prefix: Some(prefix.into()),
            ..Default::default()
        }
    }

    /// Check if a notice matches this filter.
    pub fn matches(&self, notice: &CommitNotice) -> bool {
        if let Some(ref types) = self.artifact_types {
            if !types.contains(&notice.artifact_type) {
                return false;
            }
        }
        if let Some(ref prefix) = self.path_prefix {
            if !notice.path.starts_with(prefix.as_str()) {
                return false;
            }
        }
        true
    }
}

/// A filtered view of the commit feed. Dropping it unsubscribes.
pub struct CommitSubscription {
    pub id: Uuid,
    pub filter: CommitFilter,
    receiver: broadcast::Receiver<CommitNotice>,
}

impl CommitSubscription {
    /// Wait for the next matching notice. `None` once the feed is gone.
    ///
    /// Lagged receivers skip what they missed.
    pub async fn recv(&mut self) -> Option<CommitNotice> {
        loop {
            match self.receiver.recv().await {
                Ok(notice) if self.filter.matches(&notice) => return Some(notice),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Commit subscription {} skipped {} notice(s)", self.id, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Turn the subscription into a stream of matching notices.
    pub fn into_stream(self) -> impl Stream<Item = CommitNotice> {
        let filter = self.filter;
        BroadcastStream::new(self.receiver)
            .filter_map(move |item| item.ok().filter(|notice| filter.matches(notice)))
    }
}

/// Broadcasts commit notices to subscribers.
#[derive(Clone)]
pub struct CommitFeed {
    sender: broadcast::Sender<CommitNotice>,
}

impl CommitFeed {
    /// Create a feed buffering up to `capacity` notices per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe with a filter.
    pub fn subscribe(&self, filter: CommitFilter) -> CommitSubscription {
        CommitSubscription {
            id: Uuid::new_v4(),
            filter,
            receiver: self.sender.subscribe(),
        }
    }

    /// Publish a notice; returns how many receivers got it.
    pub fn publish(&self, notice: CommitNotice) -> usize {
        self.sender.send(notice).unwrap_or(0)
    }

    /// Number of live subscriptions, including ones turned into streams.
    pub fn subscription_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for CommitFeed {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notice(artifact_type: ArtifactType, path: &str) -> CommitNotice {
        CommitNotice {
            artifact: ArtifactId(0),
            artifact_type,
            path: path.to_string(),
            file_path: path.to_string(),
            version: 1,
            committed_at: Utc::now(),
        }
    }

    #[test]
    fn test_filter_types_and_prefix() {
        let filter = CommitFilter {
            artifact_types: Some(vec![ArtifactType::Prd]),
            path_prefix: Some("docs/".to_string()),
        };
        assert!(filter.matches(&notice(ArtifactType::Prd, "docs/X.md")));
        assert!(!filter.matches(&notice(ArtifactType::Design, "docs/X.md")));
        assert!(!filter.matches(&notice(ArtifactType::Prd, "src/X.md")));
        assert!(CommitFilter::default().matches(&notice(ArtifactType::Code, "src/a.rs")));
    }

    #[tokio::test]
    async fn test_subscription_receives_matching_notices() {
        let feed = CommitFeed::default();
        let mut sub = feed.subscribe(CommitFilter::types(vec![ArtifactType::Design]));

        feed.publish(notice(ArtifactType::Prd, "docs/X.md"));
        assert_eq!(feed.publish(notice(ArtifactType::Design, "docs/X.md")), 1);

        let received = sub.recv().await.unwrap();
        assert_eq!(received.artifact_type, ArtifactType::Design);
        assert_eq!(feed.subscription_count(), 1);
        drop(sub);
        assert_eq!(feed.subscription_count(), 0);
        assert_eq!(feed.publish(notice(ArtifactType::Design, "docs/X.md")), 0);
    }

    #[tokio::test]
    async fn test_subscription_as_stream() {
        let feed = CommitFeed::default();
        let sub = feed.subscribe(CommitFilter::prefix("docs/"));
        let mut stream = Box::pin(sub.into_stream());

        feed.publish(notice(ArtifactType::Code, "src/main.rs"));
        feed.publish(notice(ArtifactType::Prd, "docs/X.md"));
        drop(feed);

        let received = stream.next().await.unwrap();
        assert_eq!(received.path, "docs/X.md");
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn test_publish_without_subscribers() {
        let feed = CommitFeed::default();
        assert_eq!(feed.publish(notice(ArtifactType::Prd, "docs/X.md")), 0);
    }
}
