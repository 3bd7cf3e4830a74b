//! Request and response payloads for the auth endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPayload {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoginPayload {
    pub email: String,
    pub password: String,
}

/// Password re-entry for the step-up gate.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReauthPayload {
    pub password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityQuery {
    pub value: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccountBody {
    pub id: Uuid,
    pub username: String,
    pub email: String,
}

impl From<super::storage::Account> for AccountBody {
    fn from(account: super::storage::Account) -> Self {
        Self {
            id: account.id,
            username: account.username,
            email: account.email,
        }
    }
}

/// Login/refresh/reauth success body. The refresh token travels in the
/// cookie, never in this payload.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionBody {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<AccountBody>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityBody {
    pub available: bool,
}
