//! Failure classification for everything the orchestrator hands to the UI.
//!
//! Every failure becomes an [`EntitlementError`] with a stable [`ErrorCode`].
//! The UI only ever sees the [`UiError`] projection of it.

use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

use crate::api::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NetworkTimeout,
    NetworkUnreachable,
    ServerUnavailable,
    VerificationFailed,
    VerificationTimeout,
    MissingUserId,
    InvalidUserId,
    PurchaseFailed,
    PurchasePending,
    InvalidProduct,
    TrialAlreadyUsed,
    RestoreFailed,
    NothingToRestore,
    RestoreTimeout,
    InvalidStateTransition,
    CacheCorrupted,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Network,
    Verification,
    Purchase,
    Restore,
    State,
    Unknown,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NetworkTimeout => "NETWORK_TIMEOUT",
            ErrorCode::NetworkUnreachable => "NETWORK_UNREACHABLE",
            ErrorCode::ServerUnavailable => "SERVER_UNAVAILABLE",
            ErrorCode::VerificationFailed => "VERIFICATION_FAILED",
            ErrorCode::VerificationTimeout => "VERIFICATION_TIMEOUT",
            ErrorCode::MissingUserId => "MISSING_USER_ID",
            ErrorCode::InvalidUserId => "INVALID_USER_ID",
            ErrorCode::PurchaseFailed => "PURCHASE_FAILED",
            ErrorCode::PurchasePending => "PURCHASE_PENDING",
            ErrorCode::InvalidProduct => "INVALID_PRODUCT",
            ErrorCode::TrialAlreadyUsed => "TRIAL_ALREADY_USED",
            ErrorCode::RestoreFailed => "RESTORE_FAILED",
            ErrorCode::NothingToRestore => "NOTHING_TO_RESTORE",
            ErrorCode::RestoreTimeout => "RESTORE_TIMEOUT",
            ErrorCode::InvalidStateTransition => "INVALID_STATE_TRANSITION",
            ErrorCode::CacheCorrupted => "CACHE_CORRUPTED",
            ErrorCode::Unknown => "UNKNOWN",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ErrorCode::NetworkTimeout | ErrorCode::NetworkUnreachable | ErrorCode::ServerUnavailable => {
                ErrorCategory::Network
            }
            ErrorCode::VerificationFailed
            | ErrorCode::VerificationTimeout
            | ErrorCode::MissingUserId
            | ErrorCode::InvalidUserId => ErrorCategory::Verification,
            ErrorCode::PurchaseFailed
            | ErrorCode::PurchasePending
            | ErrorCode::InvalidProduct
            | ErrorCode::TrialAlreadyUsed => ErrorCategory::Purchase,
            ErrorCode::RestoreFailed | ErrorCode::NothingToRestore | ErrorCode::RestoreTimeout => {
                ErrorCategory::Restore
            }
            ErrorCode::InvalidStateTransition | ErrorCode::CacheCorrupted => ErrorCategory::State,
            ErrorCode::Unknown => ErrorCategory::Unknown,
        }
    }

    /// Transient by nature: any network failure and any timeout.
    pub fn is_retryable_by_default(&self) -> bool {
        matches!(
            self,
            ErrorCode::NetworkTimeout
                | ErrorCode::NetworkUnreachable
                | ErrorCode::ServerUnavailable
                | ErrorCode::VerificationTimeout
                | ErrorCode::RestoreTimeout
        )
    }

    pub fn default_user_message(&self) -> &'static str {
        match self {
            ErrorCode::NetworkTimeout => "The connection timed out. Please try again.",
            ErrorCode::NetworkUnreachable => "No connection. Check your network and try again.",
            ErrorCode::ServerUnavailable => "The service is temporarily unavailable. Please try again shortly.",
            ErrorCode::VerificationFailed => "We could not verify your subscription.",
            ErrorCode::VerificationTimeout => "Verifying your subscription took too long. Please try again.",
            ErrorCode::MissingUserId | ErrorCode::InvalidUserId => "Please sign in again.",
            ErrorCode::PurchaseFailed => "The purchase could not be completed.",
            ErrorCode::PurchasePending => "Your purchase is pending. Access unlocks once payment clears.",
            ErrorCode::InvalidProduct => "This product is not available.",
            ErrorCode::TrialAlreadyUsed => "Your free trial has already been used.",
            ErrorCode::RestoreFailed => "Purchases could not be restored.",
            ErrorCode::NothingToRestore => "No purchases to restore.",
            ErrorCode::RestoreTimeout => "Restoring purchases took too long. Please try again.",
            ErrorCode::InvalidStateTransition | ErrorCode::CacheCorrupted | ErrorCode::Unknown => {
                "Something went wrong. Please try again."
            }
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct EntitlementError {
    pub code: ErrorCode,
    pub message: String,
    pub user_message: Option<String>,
    retryable: bool,
    #[source]
    source: Option<anyhow::Error>,
}

impl EntitlementError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            user_message: None,
            retryable: false,
            source: None,
        }
    }

    pub fn with_user_message(mut self, user_message: impl Into<String>) -> Self {
        self.user_message = Some(user_message.into());
        self
    }

    /// Marks the error retryable even when its code is not.
    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }

    pub fn with_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable || self.code.is_retryable_by_default()
    }

    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    pub fn to_ui(&self) -> UiError {
        UiError {
            code: self.code,
            user_message: self
                .user_message
                .clone()
                .unwrap_or_else(|| self.code.default_user_message().to_string()),
            is_retryable: self.is_retryable(),
        }
    }
}

/// The only failure shape the UI renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UiError {
    pub code: ErrorCode,
    pub user_message: String,
    pub is_retryable: bool,
}

impl From<&EntitlementError> for UiError {
    fn from(err: &EntitlementError) -> Self {
        err.to_ui()
    }
}

/// Retryability of an arbitrary error, decided by the first classified error
/// in its source chain.
pub fn is_retryable_error(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(err) = current {
        if let Some(classified) = err.downcast_ref::<EntitlementError>() {
            return classified.is_retryable();
        }
        if let Some(api) = err.downcast_ref::<ApiError>() {
            return api.is_transient();
        }
        if let Some(http) = err.downcast_ref::<reqwest::Error>() {
            return http.is_timeout() || http.is_connect();
        }
        current = err.source();
    }
    false
}

/// Which client operation a protocol failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiContext {
    Verification,
    Purchase,
    Restore,
    Trial,
}

pub fn classify_api_error(err: ApiError, context: ApiContext) -> EntitlementError {
    let code = match &err {
        ApiError::Timeout => match context {
            ApiContext::Verification => ErrorCode::VerificationTimeout,
            ApiContext::Restore => ErrorCode::RestoreTimeout,
            ApiContext::Purchase | ApiContext::Trial => ErrorCode::NetworkTimeout,
        },
        ApiError::Unreachable(_) => ErrorCode::NetworkUnreachable,
        ApiError::Decode(_) => ErrorCode::VerificationFailed,
        ApiError::Http { status, code, .. } => match (*status, code.as_str()) {
            (500.., _) => ErrorCode::ServerUnavailable,
            (401 | 403, _) => ErrorCode::InvalidUserId,
            (409, "ALREADY_USED") => ErrorCode::TrialAlreadyUsed,
            (_, "INVALID_REQUEST") if context == ApiContext::Purchase => ErrorCode::InvalidProduct,
            (_, "INVALID_REQUEST") if context == ApiContext::Restore => ErrorCode::RestoreFailed,
            (_, "INVALID_REQUEST") => ErrorCode::MissingUserId,
            _ => match context {
                ApiContext::Verification => ErrorCode::VerificationFailed,
                ApiContext::Purchase => ErrorCode::PurchaseFailed,
                ApiContext::Restore => ErrorCode::RestoreFailed,
                ApiContext::Trial => ErrorCode::Unknown,
            },
        },
    };

    let message = err.to_string();
    let classified = EntitlementError::new(code, message);
    // Server-side verifier refusals carry a reason worth showing as-is.
    let classified = match &err {
        ApiError::Http { code: server_code, message, .. } if server_code == "VERIFICATION_FAILED" => {
            classified.with_user_message(format!("{} {}", code.default_user_message(), message))
        }
        _ => classified,
    };
    classified.with_source(err)
}
