// ABOUTME: Response types for CherryIN account endpoints reached with an OAuth token
// ABOUTME: Accepts both bare JSON objects and `{ "data": ... }` envelopes

use serde::{Deserialize, Serialize};

pub const BALANCE_PATH: &str = "api/v1/oauth/balance";
pub const USER_INFO_PATH: &str = "api/v1/oauth/userinfo";

/// Remaining account credit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub balance: f64,
    #[serde(default)]
    pub currency: Option<String>,
}

/// Profile of the signed-in account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(alias = "id")]
    pub sub: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum Envelope<T> {
    Wrapped { data: T },
    Bare(T),
}

impl<T> Envelope<T> {
    pub(crate) fn into_inner(self) -> T {
        match self {
            Self::Wrapped { data } => data,
            Self::Bare(inner) => inner,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balance_bare_and_wrapped() {
        let bare: Envelope<Balance> = serde_json::from_str(r#"{"balance": 12.5}"#).unwrap();
        assert_eq!(bare.into_inner().balance, 12.5);

        let wrapped: Envelope<Balance> =
            serde_json::from_str(r#"{"data": {"balance": 3, "currency": "USD"}}"#).unwrap();
        let balance = wrapped.into_inner();
        assert_eq!(balance.balance, 3.0);
        assert_eq!(balance.currency.as_deref(), Some("USD"));
    }

    #[test]
    fn test_user_info_id_alias() {
        let info: Envelope<UserInfo> =
            serde_json::from_str(r#"{"id": "u-42", "email": "a@b.c"}"#).unwrap();
        let info = info.into_inner();
        assert_eq!(info.sub, "u-42");
        assert_eq!(info.email.as_deref(), Some("a@b.c"));
        assert_eq!(info.name, None);
    }
}
