//! [`TenantManagerClient`] over the tenant manager's REST API.

use super::{Tenant, TenantManagerClient, TenantRequest};
use crate::error::{FleetError, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, info, instrument};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const TENANTS_PATH: &str = "api/v1/tenants";

#[derive(Clone)]
pub struct HttpTenantManagerClient {
    http: reqwest::Client,
}

impl HttpTenantManagerClient {
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(format!("fleet-core/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FleetError::Configuration(format!("Invalid HTTP client setup: {e}")))?;
        Ok(Self { http })
    }

    fn tenants_url(tenant_manager_url: &str) -> String {
        format!("{}/{TENANTS_PATH}", tenant_manager_url.trim_end_matches('/'))
    }
}

fn request_error(operation: &str, err: reqwest::Error) -> FleetError {
    FleetError::External(format!("Tenant manager {operation} failed: {err}"))
}

fn status_error(operation: &str, status: StatusCode, body: &str) -> FleetError {
    FleetError::External(format!(
        "Tenant manager {operation} returned HTTP {}: {body}",
        status.as_u16()
    ))
}

#[async_trait]
impl TenantManagerClient for HttpTenantManagerClient {
    #[instrument(skip(self, request), fields(tenant_id = %request.tenant_id))]
    async fn create_tenant(
        &self,
        tenant_manager_url: &str,
        request: &TenantRequest,
    ) -> Result<Tenant> {
        let response = self
            .http
            .post(Self::tenants_url(tenant_manager_url))
            .json(request)
            .send()
            .await
            .map_err(|e| request_error("create", e))?;

        let status = response.status();
        if status == StatusCode::CONFLICT {
            debug!("Tenant already exists");
            return Ok(Tenant::from(request));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error("create", status, &body));
        }

        let tenant = response
            .json::<Tenant>()
            .await
            .map_err(|e| request_error("create", e))?;
        info!("🏗️ Tenant created");
        Ok(tenant)
    }

    #[instrument(skip(self))]
    async fn delete_tenant(&self, tenant_manager_url: &str, tenant_id: &str) -> Result<bool> {
        let response = self
            .http
            .delete(format!("{}/{tenant_id}", Self::tenants_url(tenant_manager_url)))
            .send()
            .await
            .map_err(|e| request_error("delete", e))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => {
                info!("🗑️ Tenant deleted");
                Ok(true)
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(status_error("delete", status, &body))
            }
        }
    }
}
