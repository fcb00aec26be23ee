//! Bearer token inspection (C1).
//!
//! Tokens are three base64url segments joined by `.`; only the middle
//! (claims) segment is ever decoded here. No signature verification is
//! performed — that is the identity provider's job, not ours.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::{CoreError, Result};
use crate::masking::{AccessLevel, MaskingRule, MaskingType};

const RESERVED_ROLE_PREFIXES: &[&str] = &["default-roles-"];
const RESERVED_ROLES: &[&str] = &["offline_access", "uma_authorization"];

#[derive(Debug, Clone)]
pub struct TokenClaims {
    pub role: String,
    pub tenant_id: Option<String>,
    pub masking_rules: Vec<MaskingRule>,
    raw: Value,
}

impl TokenClaims {
    pub fn raw(&self) -> &Value {
        &self.raw
    }
}

/// Parse and decode the claims segment of a bearer token.
pub fn inspect(token: &str) -> Result<TokenClaims> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(CoreError::InvalidToken(format!(
            "expected 3 dot-delimited segments, found {}",
            segments.len()
        )));
    }

    let claims_bytes = URL_SAFE_NO_PAD
        .decode(segments[1])
        .map_err(|e| CoreError::InvalidToken(format!("base64url decode failed: {e}")))?;

    let raw: Value = serde_json::from_slice(&claims_bytes)
        .map_err(|e| CoreError::InvalidToken(format!("claims segment is not valid JSON: {e}")))?;

    let role = extract_role(&raw)?;
    let tenant_id = extract_tenant_id(&raw);
    let masking_rules = extract_masking_rules(&raw);

    Ok(TokenClaims {
        role,
        tenant_id,
        masking_rules,
        raw,
    })
}

fn extract_role(claims: &Value) -> Result<String> {
    if let Some(role) = first_non_reserved_role(
        claims
            .pointer("/resource_access")
            .and_then(Value::as_object)
            .and_then(|clients| clients.values().next())
            .and_then(|client| client.get("roles"))
            .and_then(Value::as_array),
    ) {
        return Ok(role);
    }

    if let Some(role) = first_non_reserved_role(
        claims
            .pointer("/realm_access/roles")
            .and_then(Value::as_array),
    ) {
        return Ok(role);
    }

    if let Some(username) = claims.get("preferred_username").and_then(Value::as_str) {
        return Ok(username.to_string());
    }

    Err(CoreError::MissingClaim("role".to_string()))
}

fn first_non_reserved_role(roles: Option<&Vec<Value>>) -> Option<String> {
    roles?.iter().find_map(|v| {
        let s = v.as_str()?;
        if is_reserved_role(s) {
            None
        } else {
            Some(s.to_string())
        }
    })
}

fn is_reserved_role(role: &str) -> bool {
    RESERVED_ROLES.contains(&role) || RESERVED_ROLE_PREFIXES.iter().any(|p| role.starts_with(p))
}

fn extract_tenant_id(claims: &Value) -> Option<String> {
    if let Some(s) = claims.get("countyId").and_then(Value::as_str) {
        return Some(s.to_string());
    }
    if let Some(arr) = claims.pointer("/attributes/countyId").and_then(Value::as_array) {
        if let Some(first) = arr.first().and_then(Value::as_str) {
            return Some(first.to_string());
        }
    }
    if let Some(s) = claims.get("county_id").and_then(Value::as_str) {
        return Some(s.to_string());
    }
    None
}

/// Accepts both wire shapes documented in the external interfaces section:
/// the protocol-mapper array-of-strings shape and the legacy object shape.
fn extract_masking_rules(claims: &Value) -> Vec<MaskingRule> {
    match claims.get("field_masking_rules") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .filter_map(parse_protocol_mapper_rule)
            .collect(),
        Some(Value::Object(map)) => map
            .iter()
            .filter_map(|(field, v)| parse_legacy_rule(field, v))
            .collect(),
        _ => Vec::new(),
    }
}

fn parse_protocol_mapper_rule(s: &str) -> Option<MaskingRule> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() < 3 {
        return None;
    }
    let field = parts[0].to_string();
    let masking_type: MaskingType = parts[1].parse().ok()?;
    let access_level: AccessLevel = parts[2].parse().ok()?;
    let enabled = parts.get(3).map(|s| *s == "true").unwrap_or(true);
    Some(MaskingRule {
        field,
        masking_type,
        access_level,
        masking_pattern: None,
        enabled,
    })
}

fn parse_legacy_rule(field: &str, v: &Value) -> Option<MaskingRule> {
    let masking_type: MaskingType = v.get("maskingType")?.as_str()?.parse().ok()?;
    let access_level: AccessLevel = v.get("accessLevel")?.as_str()?.parse().ok()?;
    let masking_pattern = v
        .get("maskingPattern")
        .and_then(Value::as_str)
        .map(String::from);
    let enabled = v.get("enabled").and_then(Value::as_bool).unwrap_or(true);
    Some(MaskingRule {
        field: field.to_string(),
        masking_type,
        access_level,
        masking_pattern,
        enabled,
    })
}

/// Index masking rules by field name for fast lookup during row masking.
pub fn rules_by_field(rules: &[MaskingRule]) -> HashMap<String, &MaskingRule> {
    rules.iter().map(|r| (r.field.clone(), r)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_claims(claims: &Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(b"{\"alg\":\"none\"}");
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).unwrap());
        format!("{header}.{payload}.sig")
    }

    #[test]
    fn rejects_malformed_segment_count() {
        let err = inspect("only.two").unwrap_err();
        assert!(matches!(err, CoreError::InvalidToken(_)));
    }

    #[test]
    fn extracts_role_tenant_and_protocol_mapper_rules() {
        let claims = serde_json::json!({
            "realm_access": {"roles": ["default-roles-county", "CASE_WORKER"]},
            "countyId": "MARICOPA",
            "field_masking_rules": ["ssn:HASH_MASK:MASKED_ACCESS:true"],
        });
        let token = encode_claims(&claims);
        let parsed = inspect(&token).unwrap();
        assert_eq!(parsed.role, "CASE_WORKER");
        assert_eq!(parsed.tenant_id.as_deref(), Some("MARICOPA"));
        assert_eq!(parsed.masking_rules.len(), 1);
        assert_eq!(parsed.masking_rules[0].masking_type, MaskingType::HashMask);
    }

    #[test]
    fn extracts_legacy_object_shape_rules() {
        let claims = serde_json::json!({
            "realm_access": {"roles": ["ADMIN"]},
            "field_masking_rules": {
                "email": {"maskingType": "ANONYMIZE", "accessLevel": "MASKED_ACCESS", "enabled": true}
            }
        });
        let token = encode_claims(&claims);
        let parsed = inspect(&token).unwrap();
        assert_eq!(parsed.masking_rules[0].field, "email");
        assert_eq!(parsed.masking_rules[0].masking_type, MaskingType::Anonymize);
    }

    #[test]
    fn falls_back_to_preferred_username_when_no_roles_present() {
        let claims = serde_json::json!({"preferred_username": "svc-cron"});
        let token = encode_claims(&claims);
        let parsed = inspect(&token).unwrap();
        assert_eq!(parsed.role, "svc-cron");
    }

    #[test]
    fn missing_role_is_an_error() {
        let claims = serde_json::json!({});
        let token = encode_claims(&claims);
        assert!(matches!(inspect(&token), Err(CoreError::MissingClaim(_))));
    }
}
