//! Projects and their ordered stages.

use diesel::dsl::max;
use diesel::prelude::*;
use rocket::response::status::Created;
use rocket::serde::json::Json;
use rocket::{Route, State};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::audit;
use crate::auth::AuthUser;
use crate::config::LabConfig;
use crate::db::{new_id, now, AnyConnection, LabDatabase, MultiBackend};
use crate::error::{ApiError, ApiResult};
use crate::models::{Project, ProjectStage};
use crate::notify::{self, Event, Kind};
use crate::organizations;
use crate::paging::{Page, PageParams, Window};
use crate::schema::{project_stages, projects};
use crate::validate;

pub const STATUSES: &[&str] = &["planning", "active", "on_hold", "completed", "archived"];

const STAGE_PENDING: &str = "pending";
const STAGE_ACTIVE: &str = "active";
const STAGE_COMPLETED: &str = "completed";

#[derive(Debug, Deserialize)]
pub struct NewProject {
    pub name: String,
    pub description: Option<String>,
    pub status: Option<String>,
    pub organization_id: Option<String>,
}

#[derive(Debug, Default, Deserialize, AsChangeset)]
#[diesel(table_name = projects)]
pub struct ProjectPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    /// Absent leaves the link alone, `null` or `""` clears it.
    #[serde(default, with = "::serde_with::rust::double_option")]
    pub organization_id: Option<Option<String>>,
}

#[derive(Debug, Deserialize)]
pub struct NewStage {
    pub name: String,
}

pub(crate) fn find(c: &mut AnyConnection, workspace_id: &str, id: &str) -> ApiResult<Project> {
    projects::table
        .filter(projects::id.eq(id))
        .filter(projects::workspace_id.eq(workspace_id))
        .filter(projects::deleted_at.is_null())
        .first(c)
        .optional()?
        .ok_or(ApiError::NotFound("project"))
}

fn check_organization(c: &mut AnyConnection, workspace_id: &str, organization_id: Option<&str>) -> ApiResult<()> {
    if let Some(org) = organization_id {
        organizations::find(c, workspace_id, org)
            .map_err(|e| e.unknown_reference(format!("unknown organization {}", org)))?;
    }
    Ok(())
}

fn create(c: &mut AnyConnection, user: &AuthUser, input: NewProject) -> ApiResult<Project> {
    let created_at = now();
    let project = Project {
        id: new_id(),
        workspace_id: user.workspace_id.clone(),
        organization_id: validate::optional(input.organization_id),
        name: validate::required("name", &input.name)?,
        description: validate::optional(input.description),
        status: validate::one_of("status", input.status.as_deref().unwrap_or("planning"), STATUSES)?,
        created_by: user.id.clone(),
        created_at,
        updated_at: created_at,
        deleted_at: None,
    };

    c.transaction(|c| {
        check_organization(c, &user.workspace_id, project.organization_id.as_deref())?;
        diesel::insert_into(projects::table).values(&project).execute(c)?;
        audit::record(c, user, "project.create", "project", &project.id, Some(json!({ "name": project.name })))?;
        Ok(project)
    })
}

fn update(c: &mut AnyConnection, config: &LabConfig, user: &AuthUser, id: &str, patch: ProjectPatch) -> ApiResult<Project> {
    let patch = ProjectPatch {
        name: patch.name.as_deref().map(|n| validate::required("name", n)).transpose()?,
        description: patch.description,
        status: patch.status.as_deref().map(|s| validate::one_of("status", s, STATUSES)).transpose()?,
        organization_id: patch.organization_id.map(validate::optional),
    };

    c.transaction(|c| {
        let before = find(c, &user.workspace_id, id)?;
        check_organization(c, &user.workspace_id, patch.organization_id.clone().flatten().as_deref())?;
        diesel::update(projects::table.find(&before.id))
            .set((&patch, projects::updated_at.eq(now())))
            .execute(c)?;
        let after = find(c, &user.workspace_id, &before.id)?;

        audit::record(
            c,
            user,
            "project.update",
            "project",
            &after.id,
            Some(json!({ "status": { "from": before.status, "to": after.status } })),
        )?;

        if before.status != after.status && before.created_by != user.id {
            notify::emit(
                c,
                config,
                &user.workspace_id,
                &before.created_by,
                Event {
                    kind: Kind::Project,
                    title: format!("Project {} is now {}", after.name, after.status),
                    message: format!("{} changed the status from {} to {}.", user.name, before.status, after.status),
                    entity_type: "project",
                    entity_id: &after.id,
                },
            )?;
        }
        Ok(after)
    })
}

fn soft_delete(c: &mut AnyConnection, user: &AuthUser, id: &str) -> ApiResult<()> {
    c.transaction(|c| {
        let project = find(c, &user.workspace_id, id)?;
        diesel::update(projects::table.find(&project.id))
            .set(projects::deleted_at.eq(Some(now())))
            .execute(c)?;
        audit::record(c, user, "project.delete", "project", &project.id, None)
    })
}

fn filtered(workspace_id: &str, status: &Option<String>, organization_id: &Option<String>) -> projects::BoxedQuery<'static, MultiBackend> {
    let mut q = projects::table
        .filter(projects::workspace_id.eq(workspace_id.to_string()))
        .filter(projects::deleted_at.is_null())
        .into_boxed();
    if let Some(status) = status {
        q = q.filter(projects::status.eq(status.clone()));
    }
    if let Some(org) = organization_id {
        q = q.filter(projects::organization_id.eq(org.clone()));
    }
    q
}

fn list(
    c: &mut AnyConnection,
    workspace_id: &str,
    status: Option<String>,
    organization_id: Option<String>,
    window: Window,
) -> ApiResult<Page<Project>> {
    let total: i64 = filtered(workspace_id, &status, &organization_id)
        .count()
        .get_result(c)?;
    let items = filtered(workspace_id, &status, &organization_id)
        .order((projects::created_at.desc(), projects::id.desc()))
        .limit(window.limit)
        .offset(window.offset())
        .load(c)?;
    Ok(Page::new(items, window, total))
}

fn stages(c: &mut AnyConnection, project_id: &str) -> ApiResult<Vec<ProjectStage>> {
    Ok(project_stages::table
        .filter(project_stages::project_id.eq(project_id))
        .order(project_stages::position.asc())
        .load(c)?)
}

fn add_stage(c: &mut AnyConnection, user: &AuthUser, project_id: &str, input: NewStage) -> ApiResult<ProjectStage> {
    let name = validate::required("name", &input.name)?;
    c.transaction(|c| {
        let project = find(c, &user.workspace_id, project_id)?;
        let last: Option<i32> = project_stages::table
            .filter(project_stages::project_id.eq(&project.id))
            .select(max(project_stages::position))
            .first(c)?;
        let stage = ProjectStage {
            id: new_id(),
            project_id: project.id.clone(),
            name,
            position: last.map_or(1, |p| p + 1),
            status: STAGE_PENDING.to_string(),
            started_at: None,
            completed_at: None,
        };
        diesel::insert_into(project_stages::table).values(&stage).execute(c)?;
        audit::record(
            c,
            user,
            "project.stage.create",
            "project",
            &project.id,
            Some(json!({ "stage": stage.name, "position": stage.position })),
        )?;
        Ok(stage)
    })
}

/// Which stage gets completed and which gets activated by an advance.
/// Stages must be sorted by position.
pub(crate) fn plan_advance(stages: &[ProjectStage]) -> ApiResult<(Option<usize>, Option<usize>)> {
    if stages.is_empty() {
        return Err(ApiError::conflict("project has no stages"));
    }
    let active = stages.iter().position(|s| s.status == STAGE_ACTIVE);
    let search_from = active.map_or(0, |i| i + 1);
    let next = stages
        .iter()
        .enumerate()
        .skip(search_from)
        .find(|(_, s)| s.status == STAGE_PENDING)
        .map(|(i, _)| i);

    if active.is_none() && next.is_none() {
        return Err(ApiError::conflict("all stages are completed"));
    }
    Ok((active, next))
}

fn advance(c: &mut AnyConnection, user: &AuthUser, project_id: &str) -> ApiResult<Vec<ProjectStage>> {
    c.transaction(|c| {
        let project = find(c, &user.workspace_id, project_id)?;
        let current = stages(c, &project.id)?;
        let (done, next) = plan_advance(&current)?;
        let at = now();

        if let Some(i) = done {
            diesel::update(project_stages::table.find(&current[i].id))
                .set((
                    project_stages::status.eq(STAGE_COMPLETED),
                    project_stages::completed_at.eq(Some(at)),
                ))
                .execute(c)?;
        }
        if let Some(i) = next {
            info!("Project {} enters stage {}", project.name, current[i].name);
            diesel::update(project_stages::table.find(&current[i].id))
                .set((
                    project_stages::status.eq(STAGE_ACTIVE),
                    project_stages::started_at.eq(Some(at)),
                ))
                .execute(c)?;
        }

        audit::record(
            c,
            user,
            "project.stage.advance",
            "project",
            &project.id,
            Some(json!({
                "completed": done.map(|i| current[i].name.clone()),
                "activated": next.map(|i| current[i].name.clone()),
            })),
        )?;
        stages(c, &project.id)
    })
}

#[get("/?<status>&<organization_id>&<paging..>")]
async fn list_route(
    user: AuthUser,
    db: LabDatabase,
    config: &State<LabConfig>,
    status: Option<String>,
    organization_id: Option<String>,
    paging: PageParams,
) -> ApiResult<Json<Page<Project>>> {
    let window = paging.window(config)?;
    Ok(Json(
        db.run(move |c| list(c, &user.workspace_id, status, organization_id, window))
            .await?,
    ))
}

#[post("/", data = "<input>")]
async fn create_route(user: AuthUser, db: LabDatabase, input: Json<NewProject>) -> ApiResult<Created<Json<Project>>> {
    user.require_write()?;
    let input = input.into_inner();
    let project = db.run(move |c| create(c, &user, input)).await?;
    Ok(Created::new(format!("/api/projects/{}", project.id)).body(Json(project)))
}

#[get("/<id>")]
async fn get_route(user: AuthUser, db: LabDatabase, id: String) -> ApiResult<Json<Project>> {
    Ok(Json(db.run(move |c| find(c, &user.workspace_id, &id)).await?))
}

#[patch("/<id>", data = "<input>")]
async fn update_route(
    user: AuthUser,
    db: LabDatabase,
    config: &State<LabConfig>,
    id: String,
    input: Json<ProjectPatch>,
) -> ApiResult<Json<Project>> {
    user.require_write()?;
    let config = config.inner().clone();
    let patch = input.into_inner();
    Ok(Json(db.run(move |c| update(c, &config, &user, &id, patch)).await?))
}

#[delete("/<id>")]
async fn delete_route(user: AuthUser, db: LabDatabase, id: String) -> ApiResult<Json<Value>> {
    user.require_write()?;
    db.run(move |c| soft_delete(c, &user, &id)).await?;
    Ok(Json(json!({ "deleted": true })))
}

#[get("/<id>/stages")]
async fn stages_route(user: AuthUser, db: LabDatabase, id: String) -> ApiResult<Json<Vec<ProjectStage>>> {
    let stages = db
        .run(move |c| {
            let project = find(c, &user.workspace_id, &id)?;
            stages(c, &project.id)
        })
        .await?;
    Ok(Json(stages))
}

#[post("/<id>/stages", data = "<input>")]
async fn add_stage_route(user: AuthUser, db: LabDatabase, id: String, input: Json<NewStage>) -> ApiResult<Created<Json<ProjectStage>>> {
    user.require_write()?;
    let input = input.into_inner();
    let stage = db.run(move |c| add_stage(c, &user, &id, input)).await?;
    Ok(Created::new(format!("/api/projects/{}/stages", stage.project_id)).body(Json(stage)))
}

#[post("/<id>/stages/advance")]
async fn advance_route(user: AuthUser, db: LabDatabase, id: String) -> ApiResult<Json<Vec<ProjectStage>>> {
    user.require_write()?;
    Ok(Json(db.run(move |c| advance(c, &user, &id)).await?))
}

pub fn routes() -> Vec<Route> {
    routes![
        list_route,
        create_route,
        get_route,
        update_route,
        delete_route,
        stages_route,
        add_stage_route,
        advance_route
    ]
}
