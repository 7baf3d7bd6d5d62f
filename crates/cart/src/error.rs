//! Cart error handling with Sentry integration.
//!
//! Every store-facing failure is converted into a [`CartError`] at the
//! mutator/synchronizer boundary and reported there. Callers turn errors into
//! a user-facing [`Notice`]; nothing crosses into the presentation layer as a
//! panic.

use core::fmt;

use pocketshop_core::LineItemId;
use thiserror::Error;

use crate::store::StoreError;

/// The user intent a failed write belonged to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CartOperation {
    Add,
    UpdateQuantity,
    Remove,
    Clear,
}

impl fmt::Display for CartOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Add => "add item",
            Self::UpdateQuantity => "update quantity",
            Self::Remove => "remove item",
            Self::Clear => "clear cart",
        })
    }
}

/// Errors surfaced by the cart core.
#[derive(Debug, Error)]
pub enum CartError {
    /// A mutation was attempted with no signed-in user.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// The store rejected the write, or it timed out.
    #[error("Failed to {operation}: {source}")]
    WriteFailed {
        operation: CartOperation,
        #[source]
        source: StoreError,
    },

    /// The targeted line item is not in the cart.
    #[error("Line item not found: {0}")]
    NotFound(LineItemId),

    /// The cart feed could not be established or was dropped.
    #[error("Cart subscription failed: {0}")]
    SubscriptionError(String),

    /// Quantity cannot be stored.
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(i64),
}

impl CartError {
    /// Wrap a store error raised while performing `operation`.
    #[must_use]
    pub fn write_failed(operation: CartOperation, source: StoreError) -> Self {
        Self::WriteFailed { operation, source }
    }

    /// Whether the error is worth an error report (as opposed to a benign or
    /// user-caused condition).
    #[must_use]
    pub const fn is_reportable(&self) -> bool {
        matches!(self, Self::WriteFailed { .. } | Self::SubscriptionError(_))
    }

    /// Log the error and, for store failures, capture it to Sentry.
    pub fn report(&self) {
        if self.is_reportable() {
            let event_id = sentry::capture_error(self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Cart error"
            );
        } else {
            tracing::debug!(error = %self, "Cart request refused");
        }
    }

    /// The notification to show the user.
    #[must_use]
    pub fn notice(&self) -> Notice {
        Notice::from(self)
    }
}

/// Result type alias for `CartError`.
pub type Result<T> = std::result::Result<T, CartError>;

/// A user-facing notification.
///
/// Never carries internal error details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub title: String,
    pub message: String,
}

impl Notice {
    fn new(title: &str, message: impl Into<String>) -> Self {
        Self {
            title: title.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.title, self.message)
    }
}

impl From<&CartError> for Notice {
    fn from(err: &CartError) -> Self {
        match err {
            CartError::NotAuthenticated => {
                Self::new("Login Required", "Please log in to manage your cart.")
            }
            CartError::WriteFailed { operation, .. } => {
                Self::new("Error", format!("Failed to {operation}. Please try again."))
            }
            CartError::NotFound(_) => Self::new(
                "Item Unavailable",
                "This item is no longer in your cart.",
            ),
            CartError::SubscriptionError(_) => Self::new(
                "Connection Problem",
                "Your cart could not be loaded. Please try again.",
            ),
            CartError::InvalidQuantity(_) => {
                Self::new("Invalid Quantity", "Please choose a quantity of at least 1.")
            }
        }
    }
}

/// Set the Sentry user context from a user ID.
///
/// Call this after sign-in to associate errors with users.
pub fn set_sentry_user(user_id: &impl ToString, email: Option<&str>) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(user_id.to_string()),
            email: email.map(String::from),
            ..Default::default()
        }));
    });
}

/// Clear the Sentry user context.
///
/// Call this on sign-out to stop associating errors with the user.
pub fn clear_sentry_user() {
    sentry::configure_scope(|scope| {
        scope.set_user(None);
    });
}

/// Add a breadcrumb for a cart action.
///
/// Breadcrumbs appear in Sentry error reports to show the trail of user
/// actions leading up to an error.
pub fn add_breadcrumb(message: &str, data: &[(&str, &str)]) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some("cart".to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    for (key, value) in data {
        breadcrumb.data.insert(
            (*key).to_string(),
            serde_json::Value::String((*value).to_string()),
        );
    }

    sentry::add_breadcrumb(breadcrumb);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cart_error_display() {
        let err = CartError::NotFound(LineItemId::new("-Nabc"));
        assert_eq!(err.to_string(), "Line item not found: -Nabc");

        let err = CartError::write_failed(
            CartOperation::UpdateQuantity,
            StoreError::Injected("offline".to_string()),
        );
        assert_eq!(
            err.to_string(),
            "Failed to update quantity: Injected failure: offline"
        );
    }

    #[test]
    fn test_notice_hides_internal_details() {
        let err = CartError::write_failed(
            CartOperation::Remove,
            StoreError::Rejected {
                status: 401,
                message: "Permission denied".to_string(),
            },
        );
        let notice = err.notice();
        assert_eq!(notice.title, "Error");
        assert_eq!(notice.message, "Failed to remove item. Please try again.");
        assert!(!notice.to_string().contains("Permission denied"));
    }

    #[test]
    fn test_not_authenticated_notice() {
        let notice = Notice::from(&CartError::NotAuthenticated);
        assert_eq!(notice.title, "Login Required");
        assert_eq!(notice.message, "Please log in to manage your cart.");
        assert!(!notice.message.contains("add"));
    }

    #[test]
    fn test_reportable_errors() {
        assert!(CartError::SubscriptionError("dropped".to_string()).is_reportable());
        assert!(!CartError::NotAuthenticated.is_reportable());
        assert!(!CartError::NotFound(LineItemId::new("x")).is_reportable());
        assert!(!CartError::InvalidQuantity(0).is_reportable());
    }
}
