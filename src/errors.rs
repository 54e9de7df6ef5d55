use thiserror::Error;

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ErrValidation = 1001,
    ErrUnauthorized = 1002,

    ErrItemNotFound = 1101,

    ErrConversationNotFound = 1201,
    ErrMessageNotFound = 1202,
    ErrNotParticipant = 1203,
    ErrNotMessageSender = 1204,

    ErrClaimNotFound = 1301,

    ErrForbidden = 1401,
    ErrInvalidState = 1402,
    ErrItemNotClaimable = 1403,
    ErrOwnClaimForbidden = 1404,

    ErrClaimAlreadyExists = 1501,

    ErrTooManyClaims = 1601,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("validation failed: {0}")]
    Validation(&'static str),
    #[error("unauthorized")]
    Unauthorized,
    #[error("item not found")]
    ItemNotFound,
    #[error("conversation not found")]
    ConversationNotFound,
    #[error("message not found")]
    MessageNotFound,
    #[error("not a participant")]
    NotParticipant,
    #[error("not the message sender")]
    NotMessageSender,
    #[error("claim not found")]
    ClaimNotFound,
    #[error("forbidden")]
    Forbidden,
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    #[error("item is not open for claims")]
    ItemNotClaimable,
    #[error("owners cannot claim their own item")]
    OwnClaimForbidden,
    #[error("a claim for this item already exists")]
    ClaimAlreadyExists,
    #[error("too many recent claims")]
    TooManyClaims,
}

impl ServiceError {
    pub fn code(&self) -> u16 {
        match self {
            ServiceError::Validation(_) => ErrorCode::ErrValidation as u16,
            ServiceError::Unauthorized => ErrorCode::ErrUnauthorized as u16,
            ServiceError::ItemNotFound => ErrorCode::ErrItemNotFound as u16,
            ServiceError::ConversationNotFound => ErrorCode::ErrConversationNotFound as u16,
            ServiceError::MessageNotFound => ErrorCode::ErrMessageNotFound as u16,
            ServiceError::NotParticipant => ErrorCode::ErrNotParticipant as u16,
            ServiceError::NotMessageSender => ErrorCode::ErrNotMessageSender as u16,
            ServiceError::ClaimNotFound => ErrorCode::ErrClaimNotFound as u16,
            ServiceError::Forbidden => ErrorCode::ErrForbidden as u16,
            ServiceError::InvalidState(_) => ErrorCode::ErrInvalidState as u16,
            ServiceError::ItemNotClaimable => ErrorCode::ErrItemNotClaimable as u16,
            ServiceError::OwnClaimForbidden => ErrorCode::ErrOwnClaimForbidden as u16,
            ServiceError::ClaimAlreadyExists => ErrorCode::ErrClaimAlreadyExists as u16,
            ServiceError::TooManyClaims => ErrorCode::ErrTooManyClaims as u16,
        }
    }
}
