//! Input validation for external data.
//!
//! Provides centralized validation for all fields that cross trust
//! boundaries (sender and subscriber identities, conversation ids, message
//! content and type).

#![allow(clippy::result_large_err)]

use tonic::Status;

use crate::proto::MessageType;

/// Length limits for validated fields.
pub mod limits {
    /// Maximum user identity length.
    pub const MAX_IDENTITY_LENGTH: usize = 128;
    /// Maximum message content size in bytes.
    pub const MAX_CONTENT_BYTES: usize = 64 * 1024;
}

/// Error constants for validation failures.
pub mod errmsg {
    pub const IDENTITY_EMPTY: &str = "user identity cannot be empty";
    pub const IDENTITY_TOO_LONG: &str = "user identity exceeds maximum length";
    pub const IDENTITY_INVALID_CHARS: &str =
        "user identity contains invalid characters (allowed: a-zA-Z0-9._-)";

    pub const CONVERSATION_ID_NOT_POSITIVE: &str = "conversation_id must be positive";

    pub const CONTENT_EMPTY: &str = "message content cannot be empty";
    pub const CONTENT_TOO_LARGE: &str = "message content exceeds maximum size";

    pub const MESSAGE_TYPE_UNSPECIFIED: &str = "message type must be specified";
    pub const MESSAGE_TYPE_UNKNOWN: &str = "message type is not recognized";
}

/// Validate a user identity (message sender or stream subscriber).
///
/// Rules:
/// - Must not be empty
/// - Maximum 128 characters
/// - May contain: letters (a-zA-Z), digits (0-9), dot (.), underscore (_), hyphen (-)
pub fn validate_identity(identity: &str) -> Result<(), Status> {
    if identity.is_empty() {
        return Err(Status::invalid_argument(errmsg::IDENTITY_EMPTY));
    }
    if identity.len() > limits::MAX_IDENTITY_LENGTH {
        return Err(Status::invalid_argument(format!(
            "{} (max: {}, got: {})",
            errmsg::IDENTITY_TOO_LONG,
            limits::MAX_IDENTITY_LENGTH,
            identity.len()
        )));
    }

    for ch in identity.chars() {
        if !matches!(ch, 'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '_' | '-') {
            return Err(Status::invalid_argument(errmsg::IDENTITY_INVALID_CHARS));
        }
    }

    Ok(())
}

/// Validate a conversation identifier. Identifiers are assigned by the
/// store and are always positive.
pub fn validate_conversation_id(id: i64) -> Result<(), Status> {
    if id <= 0 {
        return Err(Status::invalid_argument(format!(
            "{} (got: {})",
            errmsg::CONVERSATION_ID_NOT_POSITIVE,
            id
        )));
    }
    Ok(())
}

/// Validate message content.
///
/// Rules:
/// - Must not be empty
/// - Maximum 64 KiB
pub fn validate_content(content: &str) -> Result<(), Status> {
    if content.is_empty() {
        return Err(Status::invalid_argument(errmsg::CONTENT_EMPTY));
    }
    if content.len() > limits::MAX_CONTENT_BYTES {
        return Err(Status::invalid_argument(format!(
            "{} (max: {} bytes, got: {} bytes)",
            errmsg::CONTENT_TOO_LARGE,
            limits::MAX_CONTENT_BYTES,
            content.len()
        )));
    }
    Ok(())
}

/// Validate the wire message type discriminant, returning the decoded
/// enum. Unknown values and the unspecified placeholder are rejected.
pub fn validate_message_type(raw: i32) -> Result<MessageType, Status> {
    match MessageType::try_from(raw) {
        Ok(MessageType::Unspecified) => {
            Err(Status::invalid_argument(errmsg::MESSAGE_TYPE_UNSPECIFIED))
        }
        Ok(message_type) => Ok(message_type),
        Err(_) => Err(Status::invalid_argument(format!(
            "{} (got: {})",
            errmsg::MESSAGE_TYPE_UNKNOWN,
            raw
        ))),
    }
}
