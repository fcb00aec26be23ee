//! Query planning (C3): maps a caller + request into a bounded, tenant-safe plan.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryPlan {
    pub role: String,
    pub report_type: String,
    pub tenant_id: Option<String>,
    pub user_id: Option<String>,
    pub date_range: Option<DateRange>,
    pub extra_filters: serde_json::Value,
}

const UNRESTRICTED_ROLES: &[&str] = &["ADMIN", "SYSTEM_SCHEDULER"];
const TENANT_REQUIRED_ROLES: &[&str] = &["SUPERVISOR", "CASE_WORKER"];
const OWNER_SCOPED_ROLES: &[&str] = &["PROVIDER", "RECIPIENT"];

pub struct PlanRequest {
    pub role: String,
    pub report_type: String,
    pub tenant_id: Option<String>,
    pub user_id: Option<String>,
    pub date_range: Option<DateRange>,
    pub extra_filters: serde_json::Value,
}

pub fn plan(req: PlanRequest) -> Result<QueryPlan> {
    let role = req.role.as_str();

    if TENANT_REQUIRED_ROLES.contains(&role) && req.tenant_id.is_none() {
        return Err(CoreError::MissingTenant {
            role: role.to_string(),
        });
    }

    if OWNER_SCOPED_ROLES.contains(&role) && req.user_id.is_none() {
        return Err(CoreError::MissingClaim("userId".to_string()));
    }

    let _ = UNRESTRICTED_ROLES.contains(&role); // documents the unrestricted branch; no extra validation needed

    Ok(QueryPlan {
        role: req.role,
        report_type: req.report_type,
        tenant_id: req.tenant_id,
        user_id: req.user_id,
        date_range: req.date_range,
        extra_filters: req.extra_filters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(role: &str) -> PlanRequest {
        PlanRequest {
            role: role.to_string(),
            report_type: "TIMESHEET_SUMMARY".to_string(),
            tenant_id: None,
            user_id: None,
            date_range: None,
            extra_filters: serde_json::json!({}),
        }
    }

    #[test]
    fn case_worker_requires_tenant() {
        let err = plan(base("CASE_WORKER")).unwrap_err();
        assert!(matches!(err, CoreError::MissingTenant { .. }));
    }

    #[test]
    fn admin_has_no_tenant_requirement() {
        let p = plan(base("ADMIN")).unwrap();
        assert!(p.tenant_id.is_none());
    }

    #[test]
    fn provider_requires_user_id() {
        let err = plan(base("PROVIDER")).unwrap_err();
        assert!(matches!(err, CoreError::MissingClaim(_)));
    }

    #[test]
    fn supervisor_with_tenant_succeeds() {
        let mut req = base("SUPERVISOR");
        req.tenant_id = Some("MARICOPA".to_string());
        let p = plan(req).unwrap();
        assert_eq!(p.tenant_id.as_deref(), Some("MARICOPA"));
    }
}
