//! Samples as received by the lab.

use std::collections::HashMap;

use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel::sql_types::{Nullable, Text};
use rocket::response::status::Created;
use rocket::serde::json::Json;
use rocket::{Route, State};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::audit;
use crate::auth::AuthUser;
use crate::config::LabConfig;
use crate::db::{new_id, now, AnyConnection, LabDatabase, MultiBackend};
use crate::error::{ApiError, ApiResult};
use crate::lineage::{self, Lineage};
use crate::models::Sample;
use crate::paging::{Page, PageParams, Window};
use crate::projects;
use crate::schema::{derived_samples, samples};
use crate::validate;

pub const STATUSES: &[&str] = &["received", "in_storage", "processing", "consumed", "discarded"];

/// Columns the free filter string may refer to
const FILTER_KEYS: &[&str] = &["name", "sample_type", "status", "external_id"];

define_sql_function! {
    /// Wildcard filters compare case-folded text, so SQLite and PostgreSQL agree.
    fn lower(x: Nullable<Text>) -> Nullable<Text>;
}

#[derive(Debug, Deserialize)]
pub struct NewSample {
    pub project_id: String,
    pub name: String,
    pub sample_type: String,
    pub external_id: Option<String>,
    pub status: Option<String>,
    pub collected_at: Option<NaiveDateTime>,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize, AsChangeset)]
#[diesel(table_name = samples)]
pub struct SamplePatch {
    pub project_id: Option<String>,
    pub name: Option<String>,
    pub sample_type: Option<String>,
    pub external_id: Option<String>,
    pub status: Option<String>,
    pub collected_at: Option<NaiveDateTime>,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SampleList {
    #[serde(flatten)]
    pub page: Page<Sample>,
    /// Problems found in the filter string; the rest of it still applies
    pub warnings: Vec<String>,
}

/// Splits `key=value key2=value2` into its pairs. A bare word is taken as a
/// name search; malformed pairs and unknown keys are skipped with a warning.
pub fn parse_filters(filter_str: &str, warnings: &mut Vec<String>) -> HashMap<String, String> {
    let mut filters = HashMap::new();
    for f in filter_str.split_whitespace() {
        let parts: Vec<&str> = f.split('=').collect();
        match parts.as_slice() {
            [word] => {
                warnings.push(format!("filter '{}' has no key, searching it as name=%{}%", word, word));
                filters.insert(String::from("name"), format!("%{}%", word));
            }
            [key, value] => {
                if !FILTER_KEYS.contains(key) {
                    warnings.push(format!("ignoring unknown filter column '{}'", key));
                } else if value.is_empty() {
                    warnings.push(format!("ignoring empty filter for '{}'", key));
                } else {
                    filters.insert(key.to_string(), value.to_string());
                }
            }
            _ => warnings.push(format!("ignoring '{}', filters are key=value pairs", f)),
        }
    }
    filters
}

pub(crate) fn find(c: &mut AnyConnection, workspace_id: &str, id: &str) -> ApiResult<Sample> {
    samples::table
        .filter(samples::id.eq(id))
        .filter(samples::workspace_id.eq(workspace_id))
        .filter(samples::deleted_at.is_null())
        .first(c)
        .optional()?
        .ok_or(ApiError::NotFound("sample"))
}

fn check_project(c: &mut AnyConnection, workspace_id: &str, project_id: &str) -> ApiResult<()> {
    projects::find(c, workspace_id, project_id)
        .map(|_| ())
        .map_err(|e| e.unknown_reference(format!("unknown project {}", project_id)))
}

fn create(c: &mut AnyConnection, user: &AuthUser, input: NewSample) -> ApiResult<Sample> {
    let created_at = now();
    let sample = Sample {
        id: new_id(),
        workspace_id: user.workspace_id.clone(),
        project_id: input.project_id,
        name: validate::required("name", &input.name)?,
        sample_type: validate::required("sample_type", &input.sample_type)?,
        external_id: validate::optional(input.external_id),
        status: validate::one_of("status", input.status.as_deref().unwrap_or("received"), STATUSES)?,
        collected_at: input.collected_at,
        notes: validate::optional(input.notes),
        created_by: user.id.clone(),
        created_at,
        updated_at: created_at,
        deleted_at: None,
    };

    c.transaction(|c| {
        check_project(c, &user.workspace_id, &sample.project_id)?;
        diesel::insert_into(samples::table).values(&sample).execute(c)?;
        audit::record(
            c,
            user,
            "sample.create",
            "sample",
            &sample.id,
            Some(json!({ "name": sample.name, "project_id": sample.project_id })),
        )?;
        Ok(sample)
    })
}

fn update(c: &mut AnyConnection, user: &AuthUser, id: &str, patch: SamplePatch) -> ApiResult<Sample> {
    let patch = SamplePatch {
        project_id: patch.project_id,
        name: patch.name.as_deref().map(|n| validate::required("name", n)).transpose()?,
        sample_type: patch.sample_type.as_deref().map(|t| validate::required("sample_type", t)).transpose()?,
        external_id: patch.external_id,
        status: patch.status.as_deref().map(|s| validate::one_of("status", s, STATUSES)).transpose()?,
        collected_at: patch.collected_at,
        notes: patch.notes,
    };

    c.transaction(|c| {
        let sample = find(c, &user.workspace_id, id)?;
        if let Some(project_id) = &patch.project_id {
            check_project(c, &user.workspace_id, project_id)?;
        }
        diesel::update(samples::table.find(&sample.id))
            .set((&patch, samples::updated_at.eq(now())))
            .execute(c)?;
        audit::record(
            c,
            user,
            "sample.update",
            "sample",
            &sample.id,
            Some(json!({ "status": patch.status, "project_id": patch.project_id })),
        )?;
        find(c, &user.workspace_id, &sample.id)
    })
}

fn soft_delete(c: &mut AnyConnection, user: &AuthUser, id: &str) -> ApiResult<()> {
    c.transaction(|c| {
        let sample = find(c, &user.workspace_id, id)?;
        let derived: i64 = derived_samples::table
            .filter(derived_samples::sample_id.eq(&sample.id))
            .filter(derived_samples::deleted_at.is_null())
            .count()
            .get_result(c)?;
        if derived > 0 {
            return Err(ApiError::conflict(format!(
                "sample {} still has {} derived samples",
                sample.name, derived
            )));
        }
        diesel::update(samples::table.find(&sample.id))
            .set(samples::deleted_at.eq(Some(now())))
            .execute(c)?;
        audit::record(c, user, "sample.delete", "sample", &sample.id, None)
    })
}

fn filtered(
    workspace_id: &str,
    project_id: &Option<String>,
    filters: &HashMap<String, String>,
) -> samples::BoxedQuery<'static, MultiBackend> {
    let mut q = samples::table
        .filter(samples::workspace_id.eq(workspace_id.to_string()))
        .filter(samples::deleted_at.is_null())
        .into_boxed();
    if let Some(project_id) = project_id {
        q = q.filter(samples::project_id.eq(project_id.clone()));
    }

    for (key, value) in filters {
        let value = value.clone();
        let wildcard = value.contains('%');
        q = match (key.as_str(), wildcard) {
            ("name", true) => q.filter(lower(samples::name.nullable()).like(lower(value))),
            ("name", false) => q.filter(samples::name.eq(value)),
            ("sample_type", true) => q.filter(lower(samples::sample_type.nullable()).like(lower(value))),
            ("sample_type", false) => q.filter(samples::sample_type.eq(value)),
            ("status", true) => q.filter(lower(samples::status.nullable()).like(lower(value))),
            ("status", false) => q.filter(samples::status.eq(value)),
            ("external_id", true) => q.filter(lower(samples::external_id).like(lower(value))),
            ("external_id", false) => q.filter(samples::external_id.eq(value)),
            (other, _) => {
                warn!("filter key {} slipped through parsing", other);
                q
            }
        };
    }
    q
}

fn list(
    c: &mut AnyConnection,
    workspace_id: &str,
    project_id: Option<String>,
    filter: Option<String>,
    window: Window,
) -> ApiResult<SampleList> {
    let mut warnings = Vec::new();
    let filters = filter
        .as_deref()
        .map(|f| parse_filters(f, &mut warnings))
        .unwrap_or_default();

    let total: i64 = filtered(workspace_id, &project_id, &filters)
        .count()
        .get_result(c)?;
    let items = filtered(workspace_id, &project_id, &filters)
        .order((samples::created_at.desc(), samples::id.desc()))
        .limit(window.limit)
        .offset(window.offset())
        .load(c)?;
    Ok(SampleList {
        page: Page::new(items, window, total),
        warnings,
    })
}

#[get("/?<project_id>&<filter>&<paging..>")]
async fn list_route(
    user: AuthUser,
    db: LabDatabase,
    config: &State<LabConfig>,
    project_id: Option<String>,
    filter: Option<String>,
    paging: PageParams,
) -> ApiResult<Json<SampleList>> {
    let window = paging.window(config)?;
    Ok(Json(
        db.run(move |c| list(c, &user.workspace_id, project_id, filter, window))
            .await?,
    ))
}

#[post("/", data = "<input>")]
async fn create_route(user: AuthUser, db: LabDatabase, input: Json<NewSample>) -> ApiResult<Created<Json<Sample>>> {
    user.require_write()?;
    let input = input.into_inner();
    let sample = db.run(move |c| create(c, &user, input)).await?;
    Ok(Created::new(format!("/api/samples/{}", sample.id)).body(Json(sample)))
}

#[get("/<id>")]
async fn get_route(user: AuthUser, db: LabDatabase, id: String) -> ApiResult<Json<Sample>> {
    Ok(Json(db.run(move |c| find(c, &user.workspace_id, &id)).await?))
}

#[patch("/<id>", data = "<input>")]
async fn update_route(user: AuthUser, db: LabDatabase, id: String, input: Json<SamplePatch>) -> ApiResult<Json<Sample>> {
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

#[get("/<id>/lineage")]
async fn lineage_route(user: AuthUser, db: LabDatabase, id: String) -> ApiResult<Json<Lineage>> {
    Ok(Json(db.run(move |c| lineage::tree(c, &user.workspace_id, &id)).await?))
}

pub fn routes() -> Vec<Route> {
    routes![list_route, create_route, get_route, update_route, delete_route, lineage_route]
}
