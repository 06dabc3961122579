//! The caller's workspace and its user accounts.

use diesel::prelude::*;
use rocket::response::status::Created;
use rocket::serde::json::Json;
use rocket::{Route, State};
use serde::Deserialize;
use serde_json::json;

use crate::audit;
use crate::auth::{self, AuthUser, Role};
use crate::config::LabConfig;
use crate::db::{AnyConnection, LabDatabase};
use crate::error::{ApiError, ApiResult};
use crate::models::{User, Workspace};
use crate::paging::{Page, PageParams, Window};
use crate::schema::{users, workspaces};
use crate::validate;

#[derive(Debug, Deserialize)]
pub struct WorkspaceUpdate {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct NewUserInput {
    pub email: String,
    pub name: String,
    pub password: String,
    pub role: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UserUpdate {
    pub name: Option<String>,
    pub role: Option<String>,
    pub is_active: Option<bool>,
}

fn load_workspace(c: &mut AnyConnection, id: &str) -> ApiResult<Workspace> {
    workspaces::table
        .find(id)
        .first(c)
        .optional()?
        .ok_or(ApiError::NotFound("workspace"))
}

fn rename_workspace(c: &mut AnyConnection, user: &AuthUser, input: WorkspaceUpdate) -> ApiResult<Workspace> {
    let name = validate::required("name", &input.name)?;
    c.transaction(|c| {
        diesel::update(workspaces::table.find(&user.workspace_id))
            .set(workspaces::name.eq(&name))
            .execute(c)?;
        audit::record(c, user, "workspace.update", "workspace", &user.workspace_id, Some(json!({ "name": name })))?;
        load_workspace(c, &user.workspace_id)
    })
}

/// Users of a workspace; users of other workspaces are reported as missing.
pub(crate) fn find_user(c: &mut AnyConnection, workspace_id: &str, id: &str) -> ApiResult<User> {
    users::table
        .filter(users::id.eq(id))
        .filter(users::workspace_id.eq(workspace_id))
        .first(c)
        .optional()?
        .ok_or(ApiError::NotFound("user"))
}

fn list_users(c: &mut AnyConnection, workspace_id: &str, window: Window) -> ApiResult<Page<User>> {
    let total: i64 = users::table
        .filter(users::workspace_id.eq(workspace_id))
        .count()
        .get_result(c)?;
    let items = users::table
        .filter(users::workspace_id.eq(workspace_id))
        .order((users::created_at.desc(), users::id.desc()))
        .limit(window.limit)
        .offset(window.offset())
        .load(c)?;
    Ok(Page::new(items, window, total))
}

fn create_user(c: &mut AnyConnection, admin: &AuthUser, input: NewUserInput) -> ApiResult<User> {
    let role: Role = input.role.as_deref().unwrap_or("member").parse()?;
    let user = auth::new_user(&admin.workspace_id, &input.email, &input.name, &input.password, role)?;

    c.transaction(|c| {
        if auth::email_taken(c, &user.email)? {
            return Err(ApiError::conflict(format!("{} is already registered", user.email)));
        }
        diesel::insert_into(users::table).values(&user).execute(c)?;
        audit::record(
            c,
            admin,
            "user.create",
            "user",
            &user.id,
            Some(json!({ "email": user.email, "role": user.role })),
        )?;
        Ok(user)
    })
}

fn update_user(c: &mut AnyConnection, admin: &AuthUser, id: &str, input: UserUpdate) -> ApiResult<User> {
    let role = input.role.as_deref().map(str::parse::<Role>).transpose()?;
    let name = input.name.as_deref().map(|n| validate::required("name", n)).transpose()?;

    if admin.id == id {
        if matches!(role, Some(r) if r != Role::Admin) {
            return Err(ApiError::conflict("admins cannot demote themselves"));
        }
        if input.is_active == Some(false) {
            return Err(ApiError::conflict("admins cannot deactivate themselves"));
        }
    }

    c.transaction(|c| {
        let user = find_user(c, &admin.workspace_id, id)?;
        if let Some(name) = &name {
            diesel::update(users::table.find(&user.id)).set(users::name.eq(name)).execute(c)?;
        }
        if let Some(role) = role {
            diesel::update(users::table.find(&user.id)).set(users::role.eq(role.as_str())).execute(c)?;
        }
        if let Some(active) = input.is_active {
            diesel::update(users::table.find(&user.id)).set(users::is_active.eq(active)).execute(c)?;
            if !active {
                let dropped = auth::end_sessions(c, &user.id)?;
                info!("Deactivated {}, dropped {} sessions", user.email, dropped);
            }
        }
        audit::record(
            c,
            admin,
            "user.update",
            "user",
            &user.id,
            Some(json!({ "name": name, "role": role.map(|r| r.as_str()), "is_active": input.is_active })),
        )?;
        find_user(c, &admin.workspace_id, &user.id)
    })
}

#[get("/")]
async fn get_workspace(user: AuthUser, db: LabDatabase) -> ApiResult<Json<Workspace>> {
    Ok(Json(db.run(move |c| load_workspace(c, &user.workspace_id)).await?))
}

#[patch("/", data = "<input>")]
async fn patch_workspace(user: AuthUser, db: LabDatabase, input: Json<WorkspaceUpdate>) -> ApiResult<Json<Workspace>> {
    user.require_admin()?;
    let input = input.into_inner();
    Ok(Json(db.run(move |c| rename_workspace(c, &user, input)).await?))
}

#[get("/?<paging..>")]
async fn users_index(
    user: AuthUser,
    db: LabDatabase,
    config: &State<LabConfig>,
    paging: PageParams,
) -> ApiResult<Json<Page<User>>> {
    let window = paging.window(config)?;
    Ok(Json(db.run(move |c| list_users(c, &user.workspace_id, window)).await?))
}

#[post("/", data = "<input>")]
async fn users_create(user: AuthUser, db: LabDatabase, input: Json<NewUserInput>) -> ApiResult<Created<Json<User>>> {
    user.require_admin()?;
    let input = input.into_inner();
    let created = db.run(move |c| create_user(c, &user, input)).await?;
    Ok(Created::new(format!("/api/users/{}", created.id)).body(Json(created)))
}

#[get("/<id>")]
async fn users_get(user: AuthUser, db: LabDatabase, id: String) -> ApiResult<Json<User>> {
    Ok(Json(db.run(move |c| find_user(c, &user.workspace_id, &id)).await?))
}

#[patch("/<id>", data = "<input>")]
async fn users_update(user: AuthUser, db: LabDatabase, id: String, input: Json<UserUpdate>) -> ApiResult<Json<User>> {
    user.require_admin()?;
    let input = input.into_inner();
    Ok(Json(db.run(move |c| update_user(c, &user, &id, input)).await?))
}

pub fn workspace_routes() -> Vec<Route> {
    routes![get_workspace, patch_workspace]
}

pub fn user_routes() -> Vec<Route> {
    routes![users_index, users_create, users_get, users_update]
}
