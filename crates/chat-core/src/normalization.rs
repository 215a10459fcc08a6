use crate::{
    error::ChatError,
    types::{ChatEvent, SendAck},
};

/// Send/edit command success or failure before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The write landed; carries the affected message ID.
    Success { message_id: String },
    Failure { error: ChatError },
}

/// Convert a send/edit outcome to a stable `ChatEvent::SendAck`.
pub fn normalize_send_outcome(client_txn_id: impl Into<String>, outcome: SendOutcome) -> ChatEvent {
    let client_txn_id = client_txn_id.into();
    match outcome {
        SendOutcome::Success { message_id } => ChatEvent::SendAck(SendAck {
            client_txn_id,
            message_id: Some(message_id),
            error_code: None,
        }),
        SendOutcome::Failure { error } => ChatEvent::SendAck(SendAck {
            client_txn_id,
            message_id: None,
            error_code: Some(error.code),
        }),
    }
}

/// Convert a swallowed error into its diagnostic `Failure` event.
pub fn normalize_failure(error: ChatError) -> ChatEvent {
    ChatEvent::Failure {
        code: error.code,
        message: error.message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChatErrorCategory;

    #[test]
    fn maps_success_to_send_ack() {
        let event = normalize_send_outcome(
            "txn-1",
            SendOutcome::Success {
                message_id: "m-abc".into(),
            },
        );

        match event {
            ChatEvent::SendAck(ack) => {
                assert_eq!(ack.client_txn_id, "txn-1");
                assert_eq!(ack.message_id.as_deref(), Some("m-abc"));
                assert!(ack.is_success());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn maps_failure_to_send_ack_with_stable_error_code() {
        let event = normalize_send_outcome(
            "txn-2",
            SendOutcome::Failure {
                error: ChatError::new(
                    ChatErrorCategory::Permission,
                    "permission-denied",
                    "rules rejected write",
                ),
            },
        );

        match event {
            ChatEvent::SendAck(ack) => {
                assert_eq!(ack.client_txn_id, "txn-2");
                assert_eq!(ack.message_id, None);
                assert_eq!(ack.error_code.as_deref(), Some("permission-denied"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn failure_event_keeps_code_and_message() {
        let event = normalize_failure(ChatError::message_not_found("m9"));
        match event {
            ChatEvent::Failure { code, message } => {
                assert_eq!(code, "message_not_found");
                assert!(message.contains("m9"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
