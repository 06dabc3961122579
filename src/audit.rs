//! Append-only log of mutating actions.

use diesel::prelude::*;
use rocket::serde::json::Json;
use rocket::{Route, State};
use serde_json::Value;

use crate::auth::AuthUser;
use crate::config::LabConfig;
use crate::db::{new_id, now, AnyConnection, LabDatabase, MultiBackend};
use crate::error::ApiResult;
use crate::models::AuditEntry;
use crate::paging::{Page, PageParams, Window};
use crate::schema::audit_log;

/// Appends an entry. Entries are never updated or deleted.
pub fn record(
    c: &mut AnyConnection,
    actor: &AuthUser,
    action: &str,
    entity_type: &str,
    entity_id: &str,
    details: Option<Value>,
) -> ApiResult<()> {
    let entry = AuditEntry {
        id: new_id(),
        workspace_id: actor.workspace_id.clone(),
        user_id: Some(actor.id.clone()),
        action: action.to_string(),
        entity_type: entity_type.to_string(),
        entity_id: entity_id.to_string(),
        details: details.map(|d| d.to_string()),
        created_at: now(),
    };
    debug!("audit: {} {} {} by {}", action, entity_type, entity_id, actor.email);
    diesel::insert_into(audit_log::table)
        .values(&entry)
        .execute(c)?;
    Ok(())
}

fn list(
    c: &mut AnyConnection,
    workspace_id: &str,
    entity_type: Option<String>,
    entity_id: Option<String>,
    window: Window,
) -> ApiResult<Page<AuditEntry>> {
    let filtered = || -> audit_log::BoxedQuery<'static, MultiBackend> {
        let mut q = audit_log::table
            .filter(audit_log::workspace_id.eq(workspace_id.to_string()))
            .into_boxed();
        if let Some(t) = &entity_type {
            q = q.filter(audit_log::entity_type.eq(t.clone()));
        }
        if let Some(id) = &entity_id {
            q = q.filter(audit_log::entity_id.eq(id.clone()));
        }
        q
    };

    let total: i64 = filtered().count().get_result(c)?;
    let items: Vec<AuditEntry> = filtered()
        .order((audit_log::created_at.desc(), audit_log::id.desc()))
        .limit(window.limit)
        .offset(window.offset())
        .load(c)?;
    Ok(Page::new(items, window, total))
}

#[get("/?<entity_type>&<entity_id>&<paging..>")]
async fn list_route(
    user: AuthUser,
    db: LabDatabase,
    config: &State<LabConfig>,
    entity_type: Option<String>,
    entity_id: Option<String>,
    paging: PageParams,
) -> ApiResult<Json<Page<AuditEntry>>> {
    user.require_admin()?;
    let window = paging.window(config)?;
    let page = db
        .run(move |c| list(c, &user.workspace_id, entity_type, entity_id, window))
        .await?;
    Ok(Json(page))
}

pub fn routes() -> Vec<Route> {
    routes![list_route]
}

#[cfg(test)]
mod tests {
    use crate::testing::{register_workspace, TestLab};
    use rocket::http::Status;
    use serde_json::{json, Value};

    #[test]
    fn mutations_are_logged_and_admin_only() {
        let lab = TestLab::new();
        let admin = register_workspace(&lab, "Audit Lab", "root@audit.lab");
        let project = admin.post("/api/projects", json!({ "name": "Leukemia panel" }));
        let project_id = project["id"].as_str().unwrap();

        let (status, page) = admin.get(&format!(
            "/api/audit?entity_type=project&entity_id={}",
            project_id
        ));
        assert_eq!(status, Status::Ok);
        assert_eq!(page["total"], 1);
        assert_eq!(page["items"][0]["action"], "project.create");

        let (status, page) = admin.get("/api/audit");
        assert_eq!(status, Status::Ok);
        // workspace creation + project creation
        assert_eq!(page["total"], 2);
        // newest first
        assert_eq!(page["items"][0]["action"], "project.create");

        let member = admin.add_user("mem@audit.lab", "member");
        let (status, _): (Status, Value) = member.get("/api/audit");
        assert_eq!(status, Status::Forbidden);
    }
}
