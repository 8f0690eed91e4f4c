//! XSTS token claims
//!
//! [`XstsPayload`] is the inner JWT payload exactly as the platform writes it.
//! [`ClientClaims`] is the validated, immutable view handed to request
//! handlers, with one user entry selected by the hash from the
//! `Authorization` header.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// Device claims (`xdi`) as issued
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDeviceClaims {
    /// Debug mode flag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ddm: Option<String>,
    /// Device type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dty: Option<String>,
    /// Device version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dvr: Option<String>,
    /// Space-separated device groups
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dgr: Option<String>,
    /// Device pairwise id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dpi: Option<String>,
}

/// Title claims (`xti`) as issued
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTitleClaims {
    /// Title id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tid: Option<String>,
    /// Title version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tvr: Option<String>,
    /// Space-separated title groups
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tgr: Option<String>,
}

/// Per-user claims (`xui` entries) as issued
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawUserClaims {
    /// Delegation token, forwarded verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dlt: Option<String>,
    /// Gamertag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gtg: Option<String>,
    /// User hash
    #[serde(default)]
    pub uhs: String,
    /// Test account marker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uts: Option<String>,
    /// Space-separated user groups
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ugr: Option<String>,
    /// Age group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agg: Option<String>,
    /// Country derived from the client address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ctr: Option<String>,
    /// Space-separated privilege ids
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prv: Option<String>,
    /// User pairwise id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upi: Option<String>,
    /// Partner family id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pfi: Option<String>,
    /// Partner-scoped stable user id (pxuid)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ptx: Option<String>,
}

/// Inner JWT payload of an XSTS token
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct XstsPayload {
    /// Audience (relying party)
    #[serde(default)]
    pub aud: String,
    /// Issuer
    #[serde(default)]
    pub iss: String,
    /// Sandbox id
    #[serde(default)]
    pub sbx: String,
    /// Not-before, epoch seconds
    pub nbf: i64,
    /// Expiry, epoch seconds
    pub exp: i64,
    /// Device claims
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xdi: Option<RawDeviceClaims>,
    /// Title claims
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xti: Option<RawTitleClaims>,
    /// Confirmation (client proof key), kept opaque
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cnf: Option<serde_json::Value>,
    /// User claims
    #[serde(default)]
    pub xui: Vec<RawUserClaims>,
}

fn split_list(value: Option<String>) -> Vec<String> {
    value
        .map(|v| v.split_whitespace().map(ToString::to_string).collect())
        .unwrap_or_default()
}

fn epoch_to_datetime(field: &str, seconds: i64) -> Result<DateTime<Utc>, AuthError> {
    DateTime::from_timestamp(seconds, 0).ok_or_else(|| AuthError::malformed(format!("{field} out of range: {seconds}")))
}

/// Device the token was issued to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceClaims {
    /// Device type, e.g. `XboxOne`
    pub device_type: Option<String>,
    /// Operating system version
    pub version: Option<String>,
    /// Device group memberships
    pub groups: Vec<String>,
    /// Debug mode flag as issued
    pub debug: Option<String>,
    /// Device pairwise id
    pub pwid: Option<String>,
}

impl From<RawDeviceClaims> for DeviceClaims {
    fn from(raw: RawDeviceClaims) -> Self {
        Self {
            device_type: raw.dty,
            version: raw.dvr,
            groups: split_list(raw.dgr),
            debug: raw.ddm,
            pwid: raw.dpi,
        }
    }
}

/// Title the token was issued to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TitleClaims {
    /// Title id
    pub title_id: Option<String>,
    /// Title version
    pub version: Option<String>,
    /// Title group memberships
    pub groups: Vec<String>,
}

impl From<RawTitleClaims> for TitleClaims {
    fn from(raw: RawTitleClaims) -> Self {
        Self {
            title_id: raw.tid,
            version: raw.tvr,
            groups: split_list(raw.tgr),
        }
    }
}

/// Claims about one user of the device
#[derive(Clone, PartialEq, Eq)]
pub struct UserClaims {
    user_hash: String,
    delegation_token: Option<String>,
    gamertag: Option<String>,
    pxuid: Option<String>,
    age_group: Option<String>,
    country: Option<String>,
    privileges: Vec<String>,
    groups: Vec<String>,
    pwid: Option<String>,
    partner_family_id: Option<String>,
    test_account: Option<String>,
}

impl From<RawUserClaims> for UserClaims {
    fn from(raw: RawUserClaims) -> Self {
        Self {
            user_hash: raw.uhs,
            delegation_token: raw.dlt,
            gamertag: raw.gtg,
            pxuid: raw.ptx,
            age_group: raw.agg,
            country: raw.ctr,
            privileges: split_list(raw.prv),
            groups: split_list(raw.ugr),
            pwid: raw.upi,
            partner_family_id: raw.pfi,
            test_account: raw.uts,
        }
    }
}

impl UserClaims {
    /// User hash
    #[must_use]
    pub fn user_hash(&self) -> &str {
        &self.user_hash
    }

    /// Delegation token to forward when acting for this user
    #[must_use]
    pub fn delegation_token(&self) -> Option<&str> {
        self.delegation_token.as_deref()
    }

    /// Gamertag
    #[must_use]
    pub fn gamertag(&self) -> Option<&str> {
        self.gamertag.as_deref()
    }

    /// Partner-scoped stable user id
    #[must_use]
    pub fn pxuid(&self) -> Option<&str> {
        self.pxuid.as_deref()
    }

    /// Age group
    #[must_use]
    pub fn age_group(&self) -> Option<&str> {
        self.age_group.as_deref()
    }

    /// Country
    #[must_use]
    pub fn country(&self) -> Option<&str> {
        self.country.as_deref()
    }

    /// Privilege ids
    #[must_use]
    pub fn privileges(&self) -> &[String] {
        &self.privileges
    }

    /// Whether the user holds a privilege
    #[must_use]
    pub fn has_privilege(&self, id: u32) -> bool {
        let id = id.to_string();
        self.privileges.iter().any(|p| *p == id)
    }

    /// Group memberships
    #[must_use]
    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    /// User pairwise id
    #[must_use]
    pub fn pwid(&self) -> Option<&str> {
        self.pwid.as_deref()
    }

    /// Partner family id
    #[must_use]
    pub fn partner_family_id(&self) -> Option<&str> {
        self.partner_family_id.as_deref()
    }

    /// Test account marker
    #[must_use]
    pub fn test_account(&self) -> Option<&str> {
        self.test_account.as_deref()
    }

    /// Key identifying this user for per-user token caching
    #[must_use]
    pub fn cache_identity(&self) -> &str {
        self.pxuid.as_deref().unwrap_or(&self.user_hash)
    }
}

impl fmt::Debug for UserClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserClaims")
            .field("user_hash", &self.user_hash)
            .field("gamertag", &self.gamertag)
            .field("pxuid", &self.pxuid)
            .field("age_group", &self.age_group)
            .field("country", &self.country)
            .field("privileges", &self.privileges)
            .field("delegation_token", &self.delegation_token.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

/// Validated claims of an inbound XSTS token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientClaims {
    issuer: String,
    audience: String,
    sandbox: String,
    not_before: DateTime<Utc>,
    expires: DateTime<Utc>,
    device: DeviceClaims,
    title: TitleClaims,
    users: Vec<UserClaims>,
    selected: usize,
}

impl ClientClaims {
    /// Build claims from a payload, selecting the user with `user_hash`
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::UserNotFound`] unless exactly one user entry has
    /// the hash, and [`AuthError::MalformedToken`] for unrepresentable times.
    pub fn from_payload(payload: XstsPayload, user_hash: &str) -> Result<Self, AuthError> {
        let mut matching = payload.xui.iter().enumerate().filter(|(_, u)| u.uhs == user_hash);
        let selected = match (matching.next(), matching.next()) {
            (Some((index, _)), None) => index,
            _ => {
                return Err(AuthError::UserNotFound {
                    user_hash: user_hash.to_string(),
                });
            }
        };

        Ok(Self {
            not_before: epoch_to_datetime("nbf", payload.nbf)?,
            expires: epoch_to_datetime("exp", payload.exp)?,
            issuer: payload.iss,
            audience: payload.aud,
            sandbox: payload.sbx,
            device: payload.xdi.map(DeviceClaims::from).unwrap_or_default(),
            title: payload.xti.map(TitleClaims::from).unwrap_or_default(),
            users: payload.xui.into_iter().map(UserClaims::from).collect(),
            selected,
        })
    }

    /// Check that `now` lies within `[not_before, expires]`
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::NotYetValid`] or [`AuthError::Expired`].
    pub fn check_lifetime(&self, now: SystemTime) -> Result<(), AuthError> {
        let now = match now.duration_since(UNIX_EPOCH) {
            Ok(since) => i64::try_from(since.as_secs()).unwrap_or(i64::MAX),
            Err(before) => -i64::try_from(before.duration().as_secs()).unwrap_or(i64::MAX),
        };
        let not_before = self.not_before.timestamp();
        let expires = self.expires.timestamp();

        if now < not_before {
            return Err(AuthError::NotYetValid { not_before, now });
        }
        if now > expires {
            return Err(AuthError::Expired { expires, now });
        }
        Ok(())
    }

    /// Issuer
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Audience
    #[must_use]
    pub fn audience(&self) -> &str {
        &self.audience
    }

    /// Sandbox id
    #[must_use]
    pub fn sandbox(&self) -> &str {
        &self.sandbox
    }

    /// Start of validity
    #[must_use]
    pub fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    /// End of validity
    #[must_use]
    pub fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    /// Device claims
    #[must_use]
    pub fn device(&self) -> &DeviceClaims {
        &self.device
    }

    /// Title claims
    #[must_use]
    pub fn title(&self) -> &TitleClaims {
        &self.title
    }

    /// All user entries, in token order
    #[must_use]
    pub fn users(&self) -> &[UserClaims] {
        &self.users
    }

    /// Hash of the user selected by the `Authorization` header
    #[must_use]
    pub fn selected_user_hash(&self) -> &str {
        self.users[self.selected].user_hash()
    }

    /// The user selected by the `Authorization` header
    #[must_use]
    pub fn selected_user(&self) -> &UserClaims {
        &self.users[self.selected]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn payload() -> XstsPayload {
        XstsPayload {
            aud: "rp://gameservice.example/".to_string(),
            iss: "xsts.auth.xboxlive.com".to_string(),
            sbx: "XDKS.1".to_string(),
            nbf: 1_700_000_000,
            exp: 1_700_003_600,
            xui: vec![
                RawUserClaims {
                    uhs: "111".to_string(),
                    gtg: Some("First".to_string()),
                    prv: Some("184 254".to_string()),
                    ..RawUserClaims::default()
                },
                RawUserClaims {
                    uhs: "222".to_string(),
                    gtg: Some("Second".to_string()),
                    ptx: Some("PX2".to_string()),
                    dlt: Some("secret".to_string()),
                    ..RawUserClaims::default()
                },
            ],
            ..XstsPayload::default()
        }
    }

    #[test]
    fn test_selects_matching_user() {
        let claims = ClientClaims::from_payload(payload(), "222").unwrap();
        assert_eq!(claims.selected_user().gamertag(), Some("Second"));
        assert_eq!(claims.selected_user().cache_identity(), "PX2");
        assert_eq!(claims.users().len(), 2);
        assert_eq!(claims.not_before().timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_missing_user_hash_rejected() {
        let result = ClientClaims::from_payload(payload(), "333");
        assert!(matches!(result, Err(AuthError::UserNotFound { .. })));
    }

    #[test]
    fn test_duplicate_user_hash_rejected() {
        let mut duplicated = payload();
        duplicated.xui[1].uhs = "111".to_string();
        assert!(ClientClaims::from_payload(duplicated, "111").is_err());
    }

    #[test]
    fn test_privileges_are_split() {
        let claims = ClientClaims::from_payload(payload(), "111").unwrap();
        assert!(claims.selected_user().has_privilege(254));
        assert!(!claims.selected_user().has_privilege(1));
        assert_eq!(claims.selected_user().cache_identity(), "111");
    }

    #[test]
    fn test_lifetime_bounds_are_inclusive() {
        let claims = ClientClaims::from_payload(payload(), "111").unwrap();
        let at = |secs: u64| UNIX_EPOCH + Duration::from_secs(secs);

        assert!(claims.check_lifetime(at(1_700_000_000)).is_ok());
        assert!(claims.check_lifetime(at(1_700_003_600)).is_ok());
        assert!(matches!(claims.check_lifetime(at(1_699_999_999)), Err(AuthError::NotYetValid { .. })));
        assert!(matches!(claims.check_lifetime(at(1_700_003_601)), Err(AuthError::Expired { .. })));
    }

    #[test]
    fn test_debug_hides_delegation_token() {
        let claims = ClientClaims::from_payload(payload(), "222").unwrap();
        let rendered = format!("{:?}", claims.selected_user());
        assert!(!rendered.contains("secret"));
    }
}
