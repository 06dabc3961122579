//! Partner organizations (clients, collaborating sites) of a workspace.

use diesel::prelude::*;
use rocket::response::status::Created;
use rocket::serde::json::Json;
use rocket::{Route, State};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::audit;
use crate::auth::{self, AuthUser};
use crate::config::LabConfig;
use crate::db::{new_id, now, AnyConnection, LabDatabase};
use crate::error::{ApiError, ApiResult};
use crate::models::Organization;
use crate::paging::{Page, PageParams, Window};
use crate::schema::organizations;
use crate::validate;

#[derive(Debug, Deserialize)]
pub struct NewOrganization {
    pub name: String,
    pub contact_email: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize, AsChangeset)]
#[diesel(table_name = organizations)]
pub struct OrganizationPatch {
    pub name: Option<String>,
    pub contact_email: Option<String>,
    pub notes: Option<String>,
}

pub(crate) fn find(c: &mut AnyConnection, workspace_id: &str, id: &str) -> ApiResult<Organization> {
    organizations::table
        .filter(organizations::id.eq(id))
        .filter(organizations::workspace_id.eq(workspace_id))
        .filter(organizations::deleted_at.is_null())
        .first(c)
        .optional()?
        .ok_or(ApiError::NotFound("organization"))
}

fn contact(email: Option<String>) -> ApiResult<Option<String>> {
    validate::optional(email)
        .map(|e| auth::normalize_email(&e))
        .transpose()
}

fn create(c: &mut AnyConnection, user: &AuthUser, input: NewOrganization) -> ApiResult<Organization> {
    let created_at = now();
    let org = Organization {
        id: new_id(),
        workspace_id: user.workspace_id.clone(),
        name: validate::required("name", &input.name)?,
        contact_email: contact(input.contact_email)?,
        notes: validate::optional(input.notes),
        created_at,
        updated_at: created_at,
        deleted_at: None,
    };
    c.transaction(|c| {
        diesel::insert_into(organizations::table).values(&org).execute(c)?;
        audit::record(c, user, "organization.create", "organization", &org.id, Some(json!({ "name": org.name })))?;
        Ok(org)
    })
}

fn update(c: &mut AnyConnection, user: &AuthUser, id: &str, patch: OrganizationPatch) -> ApiResult<Organization> {
    let patch = OrganizationPatch {
        name: patch.name.as_deref().map(|n| validate::required("name", n)).transpose()?,
        contact_email: contact(patch.contact_email)?,
        notes: patch.notes,
    };
    c.transaction(|c| {
        let org = find(c, &user.workspace_id, id)?;
        diesel::update(organizations::table.find(&org.id))
            .set((&patch, organizations::updated_at.eq(now())))
            .execute(c)?;
        audit::record(c, user, "organization.update", "organization", &org.id, None)?;
        find(c, &user.workspace_id, &org.id)
    })
}

fn soft_delete(c: &mut AnyConnection, user: &AuthUser, id: &str) -> ApiResult<()> {
    c.transaction(|c| {
        let org = find(c, &user.workspace_id, id)?;
        diesel::update(organizations::table.find(&org.id))
            .set(organizations::deleted_at.eq(Some(now())))
            .execute(c)?;
        audit::record(c, user, "organization.delete", "organization", &org.id, None)
    })
}

fn list(c: &mut AnyConnection, workspace_id: &str, window: Window) -> ApiResult<Page<Organization>> {
    let live = organizations::table
        .filter(organizations::workspace_id.eq(workspace_id))
        .filter(organizations::deleted_at.is_null());
    let total: i64 = live.clone().count().get_result(c)?;
    let items = live
        .order((organizations::created_at.desc(), organizations::id.desc()))
        .limit(window.limit)
        .offset(window.offset())
        .load(c)?;
    Ok(Page::new(items, window, total))
}

#[get("/?<paging..>")]
async fn list_route(user: AuthUser, db: LabDatabase, config: &State<LabConfig>, paging: PageParams) -> ApiResult<Json<Page<Organization>>> {
    let window = paging.window(config)?;
    Ok(Json(db.run(move |c| list(c, &user.workspace_id, window)).await?))
}

#[post("/", data = "<input>")]
async fn create_route(user: AuthUser, db: LabDatabase, input: Json<NewOrganization>) -> ApiResult<Created<Json<Organization>>> {
    user.require_write()?;
    let input = input.into_inner();
    let org = db.run(move |c| create(c, &user, input)).await?;
    Ok(Created::new(format!("/api/organizations/{}", org.id)).body(Json(org)))
}

#[get("/<id>")]
async fn get_route(user: AuthUser, db: LabDatabase, id: String) -> ApiResult<Json<Organization>> {
    Ok(Json(db.run(move |c| find(c, &user.workspace_id, &id)).await?))
}

#[patch("/<id>", data = "<input>")]
async fn update_route(user: AuthUser, db: LabDatabase, id: String, input: Json<OrganizationPatch>) -> ApiResult<Json<Organization>> {
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
