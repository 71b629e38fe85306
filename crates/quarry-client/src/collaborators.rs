//! Interfaces to the host application.

use async_trait::async_trait;
use quarry_core::errors::ClientError;
use quarry_core::messages::{BoundingBox, Message};

use crate::session::ActivatedSource;

/// Supplies a fresh identity token for every connection attempt.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Failures should be reported as [`ClientError::TokenUnavailable`].
    async fn identity_token(&self) -> Result<String, ClientError>;
}

/// Maps backend file keys to what a user should see.
pub trait FileResolver: Send + Sync {
    fn resolve_file_name(&self, file_key: &str) -> String;

    fn resolve_bounding_box(&self, _file_key: &str) -> Option<BoundingBox> {
        None
    }
}

/// Receives view-model changes.
pub trait SessionObserver: Send + Sync {
    fn on_session_messages_changed(&self, messages: &[Message]);

    fn on_source_activated(&self, _source: &ActivatedSource) {}
}

/// Shows the last path segment of a file key.
#[derive(Clone, Copy, Debug, Default)]
pub struct BasenameResolver;

impl FileResolver for BasenameResolver {
    fn resolve_file_name(&self, file_key: &str) -> String {
        file_key.rsplit('/').next().unwrap_or(file_key).to_string()
    }
}

/// Observer that ignores everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {
    fn on_session_messages_changed(&self, _messages: &[Message]) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basename_strips_folders() {
        assert_eq!(BasenameResolver.resolve_file_name("org/contracts/lease.pdf"), "lease.pdf");
        assert_eq!(BasenameResolver.resolve_file_name("lease.pdf"), "lease.pdf");
        assert!(BasenameResolver.resolve_bounding_box("lease.pdf").is_none());
    }
}
