use thiserror::Error;
use uuid::Uuid;

/// Errors from bot registry operations.
///
/// These are synchronous and local to the registration/lookup call; they
/// are never surfaced as conversation messages.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("bot identity '{0}' is already registered")]
    DuplicateIdentity(String),

    #[error("bot identity '{0}' is not registered")]
    NotFound(String),
}

/// Errors from conversation log and store operations.
#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("conversation {0} is closed")]
    Closed(Uuid),

    #[error("conversation {0} does not exist")]
    NotFound(Uuid),

    #[error(transparent)]
    Message(#[from] crate::message::MessageError),
}

/// Errors from addressee resolution and dispatch.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No bot could be matched to the message.
    #[error("no addressee could be resolved for the message")]
    NoAddressee,

    /// Multiple bots matched with equal confidence and no recency record
    /// broke the tie.
    #[error("ambiguous addressee for '{capability}': candidates {candidates:?}")]
    AmbiguousAddressee {
        capability: String,
        candidates: Vec<String>,
    },

    /// The message named a bot identity that is not registered.
    #[error("unknown addressee '{0}'")]
    UnknownAddressee(String),

    /// The external intent classifier failed.
    #[error("intent classification failed: {0}")]
    Classifier(String),

    /// The message could not be matched to any delivery mode for the
    /// selected bot (no text and no accepted schema).
    #[error("bot '{0}' accepts neither the payload schema nor natural language input")]
    NoDeliveryMode(String),

    /// A bot-to-bot delegation chain exceeded the configured depth bound.
    #[error("delegation depth {depth} exceeds the configured maximum {max}")]
    DelegationDepthExceeded { depth: u32, max: u32 },

    /// A delegation resolved to a bot that is already running in the same
    /// chain; queuing it on the pair serialization lock would deadlock.
    #[error("delegation cycle: '{identity}' is already running in this delegation chain")]
    DelegationCycle { identity: String },

    #[error(transparent)]
    Conversation(#[from] ConversationError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Errors terminating or interrupting an invocation.
#[derive(Debug, Error)]
pub enum InvocationError {
    /// The bot handler returned an error.
    #[error("invocation failed (retryable: {retryable}): {message}")]
    Failed { message: String, retryable: bool },

    /// Cancellation was requested and the handler did not finish within
    /// the grace period.
    #[error("invocation cancelled and did not finish within the grace period")]
    CancelledTimeout,

    /// The conversation was closed while the invocation was outstanding.
    #[error("conversation {0} closed while the invocation was outstanding")]
    ConversationClosed(Uuid),

    /// The interposition reply channel was dropped without a reply.
    #[error("user reply channel closed without a response")]
    ReplyChannelClosed,
}

impl InvocationError {
    /// Whether the router may retry the invocation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, InvocationError::Failed { retryable: true, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_error_display() {
        let err = RegistryError::DuplicateIdentity("read-file".to_string());
        assert_eq!(err.to_string(), "bot identity 'read-file' is already registered");
    }

    #[test]
    fn conversation_closed_display() {
        let id = Uuid::now_v7();
        let err = ConversationError::Closed(id);
        assert!(err.to_string().contains(&id.to_string()));
    }

    #[test]
    fn ambiguous_addressee_lists_candidates() {
        let err = DispatchError::AmbiguousAddressee {
            capability: "file-access".to_string(),
            candidates: vec!["read-file".to_string(), "grep".to_string()],
        };
        let display = err.to_string();
        assert!(display.contains("file-access"));
        assert!(display.contains("read-file"));
        assert!(display.contains("grep"));
    }

    #[test]
    fn invocation_failed_retryable_flag() {
        let retryable = InvocationError::Failed {
            message: "connection reset".to_string(),
            retryable: true,
        };
        assert!(retryable.is_retryable());
        assert!(retryable.to_string().contains("retryable: true"));

        let permanent = InvocationError::Failed {
            message: "bad input".to_string(),
            retryable: false,
        };
        assert!(!permanent.is_retryable());
        assert!(permanent.to_string().contains("retryable: false"));
    }

    #[test]
    fn delegation_cycle_names_the_bot() {
        let err = DispatchError::DelegationCycle {
            identity: "selfish".to_string(),
        };
        assert!(err.to_string().contains("delegation cycle"));
        assert!(err.to_string().contains("selfish"));
    }

    #[test]
    fn cancelled_timeout_not_retryable() {
        assert!(!InvocationError::CancelledTimeout.is_retryable());
    }
}
