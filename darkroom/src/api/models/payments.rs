//! API request/response models for checkout.

use serde::{Deserialize, Serialize};

/// Request to start a checkout session for a configured credit package
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutRequest {
    /// Package id from the `packages` config section
    pub package: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutResponse {
    /// Provider-hosted checkout URL to redirect the user to
    pub url: String,
}
