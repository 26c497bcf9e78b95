use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use clinigate_access::middleware::error_response;
use clinigate_access::{AccessError, AccessGrant, Role};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::server::AppState;

#[derive(Serialize)]
pub struct HealthResponse<'a> {
    status: &'a str,
}

pub async fn root() -> impl IntoResponse {
    let body = json!({
        "service": "Clinigate",
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    });
    (StatusCode::OK, Json(body))
}

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// Region policy in force for the caller.
pub async fn current_region(grant: AccessGrant) -> impl IntoResponse {
    Json(json!({
        "region": grant.region_code,
        "degraded": grant.region_degraded,
        "flags": grant.policy.flags,
        "features": grant.policy.features,
        "do_not_sell": grant.do_not_sell,
    }))
}

// ---- Demo tenant endpoints ----

fn org_of(grant: &AccessGrant) -> Result<&str, Response> {
    grant.org_id.as_deref().ok_or_else(|| {
        error_response(
            &AccessError::invalid_request("Request does not name an organization"),
            Some(&grant.request_id),
        )
    })
}

pub async fn list_patients(grant: AccessGrant) -> Result<Json<Value>, Response> {
    let org_id = org_of(&grant)?;
    Ok(Json(json!({
        "organization_id": org_id,
        "region": grant.region_code,
        "decision": grant.decision.as_str(),
        "actor": grant.actor_id(),
        "patients": [],
    })))
}

/// Accepts a patient record and writes a data-access audit entry.
///
/// Persistence of the record itself belongs to the clinical backend.
pub async fn create_patient(
    State(state): State<AppState>,
    grant: AccessGrant,
    Json(patient): Json<Value>,
) -> Result<(StatusCode, Json<Value>), Response> {
    let org_id = org_of(&grant)?;
    let id = Uuid::new_v4().to_string();

    state
        .pipeline
        .audit()
        .log(
            grant.actor_id(),
            Some(org_id),
            "patient.create",
            Some("patient"),
            Some(&id),
            grant.audit_options().with_changes(patient),
        )
        .await
        .map_err(|err| error_response(&err, Some(&grant.request_id)))?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "id": id, "organization_id": org_id })),
    ))
}

pub async fn list_roles(
    State(state): State<AppState>,
    grant: AccessGrant,
) -> Result<Json<Vec<Role>>, Response> {
    let org_id = org_of(&grant)?;
    state
        .roles
        .list_roles(org_id)
        .await
        .map(Json)
        .map_err(|err| error_response(&err, Some(&grant.request_id)))
}

#[derive(Debug, Deserialize)]
pub struct CreateRoleRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

pub async fn create_role(
    State(state): State<AppState>,
    grant: AccessGrant,
    Json(request): Json<CreateRoleRequest>,
) -> Result<(StatusCode, Json<Role>), Response> {
    let org_id = org_of(&grant)?;

    let mut builder = Role::builder(request.name).organization(org_id);
    if let Some(description) = request.description {
        builder = builder.description(description);
    }
    for permission in request.permissions {
        builder = builder.add_permission(permission);
    }

    let role = state
        .roles
        .create_role(builder.build())
        .await
        .map_err(|err| error_response(&err, Some(&grant.request_id)))?;

    state.pipeline.audit().log_async(
        grant.actor_id(),
        Some(org_id),
        "role.create",
        Some("role"),
        Some(&role.id.to_string()),
        grant.audit_options(),
    );

    Ok((StatusCode::CREATED, Json(role)))
}

pub async fn list_audit(
    State(state): State<AppState>,
    grant: AccessGrant,
) -> Result<Json<Vec<clinigate_access::AuditRecord>>, Response> {
    let org_id = org_of(&grant)?;
    let records = state
        .stores
        .audit
        .records()
        .into_iter()
        .filter(|record| record.organization_id() == Some(org_id))
        .collect();
    Ok(Json(records))
}
