pub mod admin;
pub mod deposits;
pub mod entitlements;
pub mod listings;
pub mod payments;
pub mod root;
pub mod subscriptions;
pub mod users;
pub mod webhooks;

use validator::Validate;

use crate::error::{AppError, Result};

/// Runs the request's `validator` rules and maps failures to a 422.
pub(crate) fn validate<T: Validate>(request: &T) -> Result<()> {
    request
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))
}
