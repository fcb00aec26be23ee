//! Identity-provider client: the fallback masking-rule lookup and the
//! per-county service token mint used by the cron fan-out (§6).

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

use report_core::masking::{MaskingRuleSource, RuleSet};
use report_core::{CoreError, Result};

use crate::cron_fanout::TokenMinter;

#[derive(Debug, Clone)]
pub struct IdentityProviderConfig {
    pub base_url: String,
    pub realm: String,
    pub client_uuid: String,
    pub admin_username: String,
    pub admin_password: String,
    pub client_id: String,
    pub client_secret: String,
}

struct CachedAdminToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

pub struct IdentityProviderClient {
    http: reqwest::Client,
    config: IdentityProviderConfig,
    admin_token: Mutex<Option<CachedAdminToken>>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Deserialize)]
struct RoleRepresentation {
    #[allow(dead_code)]
    name: String,
    attributes: Option<RoleAttributes>,
}

#[derive(Deserialize)]
struct RoleAttributes {
    field_masking_rules: Option<Vec<String>>,
}

impl IdentityProviderClient {
    pub fn new(config: IdentityProviderConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            admin_token: Mutex::new(None),
        }
    }

    async fn admin_token(&self) -> Result<String> {
        let mut guard = self.admin_token.lock().await;
        if let Some(cached) = guard.as_ref() {
            if cached.expires_at > Utc::now() + chrono::Duration::minutes(5) {
                return Ok(cached.access_token.clone());
            }
        }

        let resp: TokenResponse = self
            .http
            .post(format!("{}/realms/master/protocol/openid-connect/token", self.config.base_url))
            .form(&[
                ("grant_type", "password"),
                ("client_id", &self.config.client_id),
                ("client_secret", &self.config.client_secret),
                ("username", &self.config.admin_username),
                ("password", &self.config.admin_password),
            ])
            .send()
            .await
            .map_err(|e| CoreError::DataAccess(e.to_string()))?
            .json()
            .await
            .map_err(|e| CoreError::DataAccess(e.to_string()))?;

        let expires_at = Utc::now() + chrono::Duration::seconds(resp.expires_in);
        *guard = Some(CachedAdminToken {
            access_token: resp.access_token.clone(),
            expires_at,
        });
        Ok(resp.access_token)
    }

    fn role_url(&self, role: &str) -> String {
        format!(
            "{}/admin/realms/{}/clients/{}/roles/{}",
            self.config.base_url, self.config.realm, self.config.client_uuid, role
        )
    }
}

#[async_trait::async_trait]
impl MaskingRuleSource for IdentityProviderClient {
    async fn fetch(&self, role: &str, _report_type: &str) -> Result<RuleSet> {
        let token = self.admin_token().await?;
        let resp = self
            .http
            .get(self.role_url(role))
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| CoreError::DataAccess(e.to_string()))?;

        if !resp.status().is_success() {
            warn!(role, status = %resp.status(), "identity provider role lookup failed");
            return Ok(RuleSet::default());
        }

        let role_repr: RoleRepresentation = resp
            .json()
            .await
            .map_err(|e| CoreError::DataAccess(e.to_string()))?;

        let rules = role_repr
            .attributes
            .and_then(|a| a.field_masking_rules)
            .unwrap_or_default()
            .iter()
            .filter_map(|s| parse_rule_string(s))
            .collect();

        Ok(RuleSet { rules })
    }
}

fn parse_rule_string(s: &str) -> Option<report_core::masking::MaskingRule> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() < 3 {
        return None;
    }
    Some(report_core::masking::MaskingRule {
        field: parts[0].to_string(),
        masking_type: parts[1].parse().ok()?,
        access_level: parts[2].parse().ok()?,
        masking_pattern: None,
        enabled: parts.get(3).map(|s| *s == "true").unwrap_or(true),
    })
}

#[async_trait::async_trait]
impl TokenMinter for IdentityProviderClient {
    async fn mint(&self, role: &str, county: Option<&str>) -> Result<String> {
        let role_prefix = role.to_lowercase();
        let county_part = county.map(|c| c.to_lowercase()).unwrap_or_else(|| "all".to_string());
        let username = format!("cron_{role_prefix}_{county_part}");

        let resp: TokenResponse = self
            .http
            .post(format!("{}/{}/protocol/openid-connect/token", self.config.base_url, self.config.realm))
            .form(&[
                ("grant_type", "password"),
                ("client_id", &self.config.client_id),
                ("client_secret", &self.config.client_secret),
                ("username", &username),
                ("password", &self.config.admin_password),
            ])
            .send()
            .await
            .map_err(|e| CoreError::DataAccess(e.to_string()))?
            .json()
            .await
            .map_err(|e| CoreError::DataAccess(e.to_string()))?;

        Ok(resp.access_token)
    }
}

/// Used in tests and in standalone deployments that carry masking rules
/// entirely in the token, never needing the admin API at all.
pub struct UnavailableRuleSource;

#[async_trait::async_trait]
impl MaskingRuleSource for UnavailableRuleSource {
    async fn fetch(&self, _role: &str, _report_type: &str) -> Result<RuleSet> {
        Ok(RuleSet::default())
    }
}

pub fn noop_rule_source() -> Arc<dyn MaskingRuleSource> {
    Arc::new(UnavailableRuleSource)
}
