//! Cloud Resource Manager project enumeration

use crate::auth::GcpAuth;
use crate::http::ApiClient;
use crate::Result;
use async_trait::async_trait;
use lens_core::{ExternalResult, ProjectId, ResourceEnumerator, TenantId};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

pub const RESOURCE_MANAGER_BASE_URL: &str = "https://cloudresourcemanager.googleapis.com";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectsListResponse {
    #[serde(default)]
    projects: Vec<ApiProject>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiProject {
    project_id: String,
}

/// Lists the active projects directly under a tenant's organization
///
/// The tenant id is the numeric organization id.
pub struct ResourceManagerClient {
    api: ApiClient,
}

impl ResourceManagerClient {
    pub fn new(auth: Arc<GcpAuth>) -> Result<Self> {
        Self::with_base_url(auth, RESOURCE_MANAGER_BASE_URL)
    }

    pub fn with_base_url(auth: Arc<GcpAuth>, base_url: &str) -> Result<Self> {
        Ok(Self {
            api: ApiClient::new(auth, base_url, Duration::from_secs(30))?,
        })
    }

    fn filter(tenant: &TenantId) -> String {
        format!("parent.type:organization parent.id:{tenant} lifecycleState:ACTIVE")
    }
}

#[async_trait]
impl ResourceEnumerator for ResourceManagerClient {
    #[instrument(skip(self), fields(tenant = %tenant))]
    async fn list_projects(&self, tenant: &TenantId) -> ExternalResult<Vec<ProjectId>> {
        let mut projects = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut params = vec![("filter", Self::filter(tenant))];
            if let Some(t) = &token {
                params.push(("pageToken", t.clone()));
            }
            let page: ProjectsListResponse = self.api.get("/v1/projects", &params).await?;
            projects.extend(page.projects.into_iter().map(|p| ProjectId::new(p.project_id)));
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        debug!(count = projects.len(), base_url = %self.api.base_url(), "Listed tenant projects");
        Ok(projects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_scopes_to_active_org_projects() {
        assert_eq!(
            ResourceManagerClient::filter(&TenantId::new("1234")),
            "parent.type:organization parent.id:1234 lifecycleState:ACTIVE"
        );
    }
}
