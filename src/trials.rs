//! Trials: experiments run inside a project.

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
use crate::models::Trial;
use crate::paging::{Page, PageParams, Window};
use crate::projects;
use crate::schema::trials;
use crate::validate;

pub const STATUSES: &[&str] = &["planned", "active", "completed", "cancelled"];

#[derive(Debug, Deserialize)]
pub struct NewTrial {
    pub project_id: String,
    pub name: String,
    pub description: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Default, Deserialize, AsChangeset)]
#[diesel(table_name = trials)]
pub struct TrialPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
}

pub(crate) fn find(c: &mut AnyConnection, workspace_id: &str, id: &str) -> ApiResult<Trial> {
    trials::table
        .filter(trials::id.eq(id))
        .filter(trials::workspace_id.eq(workspace_id))
        .filter(trials::deleted_at.is_null())
        .first(c)
        .optional()?
        .ok_or(ApiError::NotFound("trial"))
}

fn create(c: &mut AnyConnection, user: &AuthUser, input: NewTrial) -> ApiResult<Trial> {
    let created_at = now();
    let status = validate::one_of("status", input.status.as_deref().unwrap_or("planned"), STATUSES)?;
    let trial = Trial {
        id: new_id(),
        workspace_id: user.workspace_id.clone(),
        project_id: input.project_id,
        name: validate::required("name", &input.name)?,
        description: validate::optional(input.description),
        started_at: (status == "active").then(|| created_at),
        completed_at: (status == "completed").then(|| created_at),
        status,
        created_by: user.id.clone(),
        created_at,
        updated_at: created_at,
        deleted_at: None,
    };

    c.transaction(|c| {
        projects::find(c, &user.workspace_id, &trial.project_id)
            .map_err(|e| e.unknown_reference(format!("unknown project {}", trial.project_id)))?;
        diesel::insert_into(trials::table).values(&trial).execute(c)?;
        audit::record(c, user, "trial.create", "trial", &trial.id, Some(json!({ "name": trial.name, "status": trial.status })))?;
        Ok(trial)
    })
}

fn update(c: &mut AnyConnection, user: &AuthUser, id: &str, patch: TrialPatch) -> ApiResult<Trial> {
    let patch = TrialPatch {
        name: patch.name.as_deref().map(|n| validate::required("name", n)).transpose()?,
        description: patch.description,
        status: patch.status.as_deref().map(|s| validate::one_of("status", s, STATUSES)).transpose()?,
    };

    c.transaction(|c| {
        let trial = find(c, &user.workspace_id, id)?;
        let at = now();
        diesel::update(trials::table.find(&trial.id))
            .set((&patch, trials::updated_at.eq(at)))
            .execute(c)?;

        // entering a state stamps it once
        match patch.status.as_deref() {
            Some("active") if trial.started_at.is_none() => {
                diesel::update(trials::table.find(&trial.id))
                    .set(trials::started_at.eq(Some(at)))
                    .execute(c)?;
            }
            Some("completed") if trial.completed_at.is_none() => {
                diesel::update(trials::table.find(&trial.id))
                    .set(trials::completed_at.eq(Some(at)))
                    .execute(c)?;
            }
            _ => {}
        }
        if let Some(status) = patch.status.as_deref().filter(|s| *s != trial.status) {
            debug!("Trial {} moves from {} to {}", trial.id, trial.status, status);
        }

        audit::record(
            c,
            user,
            "trial.update",
            "trial",
            &trial.id,
            Some(json!({ "status": { "from": trial.status, "to": patch.status } })),
        )?;
        find(c, &user.workspace_id, &trial.id)
    })
}

fn soft_delete(c: &mut AnyConnection, user: &AuthUser, id: &str) -> ApiResult<()> {
    c.transaction(|c| {
        let trial = find(c, &user.workspace_id, id)?;
        diesel::update(trials::table.find(&trial.id))
            .set(trials::deleted_at.eq(Some(now())))
            .execute(c)?;
        audit::record(c, user, "trial.delete", "trial", &trial.id, None)
    })
}

fn filtered(workspace_id: &str, project_id: &Option<String>, status: &Option<String>) -> trials::BoxedQuery<'static, MultiBackend> {
    let mut q = trials::table
        .filter(trials::workspace_id.eq(workspace_id.to_string()))
        .filter(trials::deleted_at.is_null())
        .into_boxed();
    if let Some(project_id) = project_id {
        q = q.filter(trials::project_id.eq(project_id.clone()));
    }
    if let Some(status) = status {
        q = q.filter(trials::status.eq(status.clone()));
    }
    q
}

fn list(
    c: &mut AnyConnection,
    workspace_id: &str,
    project_id: Option<String>,
    status: Option<String>,
    window: Window,
) -> ApiResult<Page<Trial>> {
    let total: i64 = filtered(workspace_id, &project_id, &status).count().get_result(c)?;
    let items = filtered(workspace_id, &project_id, &status)
        .order((trials::created_at.desc(), trials::id.desc()))
        .limit(window.limit)
        .offset(window.offset())
        .load(c)?;
    Ok(Page::new(items, window, total))
}

#[get("/?<project_id>&<status>&<paging..>")]
async fn list_route(
    user: AuthUser,
    db: LabDatabase,
    config: &State<LabConfig>,
    project_id: Option<String>,
    status: Option<String>,
    paging: PageParams,
) -> ApiResult<Json<Page<Trial>>> {
    let window = paging.window(config)?;
    Ok(Json(
        db.run(move |c| list(c, &user.workspace_id, project_id, status, window))
            .await?,
    ))
}

#[post("/", data = "<input>")]
async fn create_route(user: AuthUser, db: LabDatabase, input: Json<NewTrial>) -> ApiResult<Created<Json<Trial>>> {
    user.require_write()?;
    let input = input.into_inner();
    let trial = db.run(move |c| create(c, &user, input)).await?;
    Ok(Created::new(format!("/api/trials/{}", trial.id)).body(Json(trial)))
}

#[get("/<id>")]
async fn get_route(user: AuthUser, db: LabDatabase, id: String) -> ApiResult<Json<Trial>> {
    Ok(Json(db.run(move |c| find(c, &user.workspace_id, &id)).await?))
}

#[patch("/<id>", data = "<input>")]
async fn update_route(user: AuthUser, db: LabDatabase, id: String, input: Json<TrialPatch>) -> ApiResult<Json<Trial>> {
    user.require_write()?;
    let patch = input.into_inner();
    Ok(Json(db.run(move |c| update(c, &user, &id, patch)).await?))
}

#[delete("/<id>")]
async fn delete_route(user: AuthUser, db: LabDatabase, id: String) -> ApiResult<Json<Value>> {
    user.require_write()?;
    db.run(move |c| soft_delete(c, &user, &id)).await?;
    Ok(Json(json!({ "deleted": true })))
}

pub fn routes() -> Vec<Route> {
    routes![list_route, create_route, get_route, update_route, delete_route]
}
