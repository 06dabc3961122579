//! Analysis batches: derived samples grouped for a run, with their
//! draft → submitted → completed lifecycle.

use diesel::dsl::max;
use diesel::prelude::*;
use rocket::http::ContentType;
use rocket::response::status::Created;
use rocket::serde::json::Json;
use rocket::{Route, State};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::analyses;
use crate::audit;
use crate::auth::AuthUser;
use crate::config::LabConfig;
use crate::db::{new_id, now, AnyConnection, LabDatabase, MultiBackend};
use crate::error::{ApiError, ApiResult};
use crate::lineage;
use crate::models::{Analysis, Batch, BatchItem};
use crate::notify::{self, Event, Kind};
use crate::paging::{Page, PageParams, Window};
use crate::schema::{batch_items, batches, derived_samples, samples};
use crate::trials;
use crate::validate;

pub const DRAFT: &str = "draft";
pub const SUBMITTED: &str = "submitted";
pub const COMPLETED: &str = "completed";
pub const STATUSES: &[&str] = &[DRAFT, SUBMITTED, COMPLETED];

#[derive(Debug, Deserialize)]
pub struct NewBatch {
    pub name: String,
    pub trial_id: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize, AsChangeset)]
#[diesel(table_name = batches)]
pub struct BatchPatch {
    pub name: Option<String>,
    #[serde(default, with = "::serde_with::rust::double_option")]
    pub trial_id: Option<Option<String>>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NewItem {
    pub derived_sample_id: String,
}

#[derive(Debug, Serialize)]
pub struct BatchDetail {
    #[serde(flatten)]
    pub batch: Batch,
    pub items: Vec<BatchItem>,
}

/// One line of the sample sheet handed to the instrument.
#[derive(Debug, Clone, Queryable)]
pub struct ManifestRow {
    pub position: i32,
    pub derived_sample: String,
    pub derived_sample_id: String,
    pub sample: String,
    pub derivation: String,
    pub depth: i32,
}

pub(crate) fn find(c: &mut AnyConnection, workspace_id: &str, id: &str) -> ApiResult<Batch> {
    batches::table
        .filter(batches::id.eq(id))
        .filter(batches::workspace_id.eq(workspace_id))
        .filter(batches::deleted_at.is_null())
        .first(c)
        .optional()?
        .ok_or(ApiError::NotFound("batch"))
}

fn find_draft(c: &mut AnyConnection, workspace_id: &str, id: &str) -> ApiResult<Batch> {
    let batch = find(c, workspace_id, id)?;
    if batch.status != DRAFT {
        return Err(ApiError::conflict(format!("batch {} is {}, not a draft", batch.name, batch.status)));
    }
    Ok(batch)
}

fn check_trial(c: &mut AnyConnection, workspace_id: &str, trial_id: Option<&str>) -> ApiResult<()> {
    if let Some(trial_id) = trial_id {
        trials::find(c, workspace_id, trial_id)
            .map_err(|e| e.unknown_reference(format!("unknown trial {}", trial_id)))?;
    }
    Ok(())
}

fn items(c: &mut AnyConnection, batch_id: &str) -> ApiResult<Vec<BatchItem>> {
    Ok(batch_items::table
        .filter(batch_items::batch_id.eq(batch_id))
        .order(batch_items::position.asc())
        .load(c)?)
}

fn detail(c: &mut AnyConnection, workspace_id: &str, id: &str) -> ApiResult<BatchDetail> {
    let batch = find(c, workspace_id, id)?;
    let items = items(c, &batch.id)?;
    Ok(BatchDetail { batch, items })
}

fn create(c: &mut AnyConnection, user: &AuthUser, input: NewBatch) -> ApiResult<Batch> {
    let created_at = now();
    let batch = Batch {
        id: new_id(),
        workspace_id: user.workspace_id.clone(),
        trial_id: validate::optional(input.trial_id),
        name: validate::required("name", &input.name)?,
        status: DRAFT.to_string(),
        notes: validate::optional(input.notes),
        created_by: user.id.clone(),
        created_at,
        updated_at: created_at,
        submitted_at: None,
        completed_at: None,
        deleted_at: None,
    };

    c.transaction(|c| {
        check_trial(c, &user.workspace_id, batch.trial_id.as_deref())?;
        diesel::insert_into(batches::table).values(&batch).execute(c)?;
        audit::record(c, user, "batch.create", "batch", &batch.id, Some(json!({ "name": batch.name })))?;
        Ok(batch)
    })
}

fn update(c: &mut AnyConnection, user: &AuthUser, id: &str, patch: BatchPatch) -> ApiResult<Batch> {
    let patch = BatchPatch {
        name: patch.name.as_deref().map(|n| validate::required("name", n)).transpose()?,
        trial_id: patch.trial_id.map(validate::optional),
        notes: patch.notes,
    };

    c.transaction(|c| {
        let batch = find_draft(c, &user.workspace_id, id)?;
        check_trial(c, &user.workspace_id, patch.trial_id.clone().flatten().as_deref())?;
        diesel::update(batches::table.find(&batch.id))
            .set((&patch, batches::updated_at.eq(now())))
            .execute(c)?;
        audit::record(c, user, "batch.update", "batch", &batch.id, None)?;
        find(c, &user.workspace_id, &batch.id)
    })
}

fn soft_delete(c: &mut AnyConnection, user: &AuthUser, id: &str) -> ApiResult<()> {
    c.transaction(|c| {
        let batch = find_draft(c, &user.workspace_id, id)?;
        diesel::update(batches::table.find(&batch.id))
            .set(batches::deleted_at.eq(Some(now())))
            .execute(c)?;
        audit::record(c, user, "batch.delete", "batch", &batch.id, None)
    })
}

fn add_item(c: &mut AnyConnection, user: &AuthUser, batch_id: &str, input: NewItem) -> ApiResult<BatchItem> {
    c.transaction(|c| {
        let batch = find_draft(c, &user.workspace_id, batch_id)?;
        let derived = lineage::find(c, &user.workspace_id, &input.derived_sample_id)
            .map_err(|e| e.unknown_reference(format!("unknown derived sample {}", input.derived_sample_id)))?;

        let present: i64 = batch_items::table
            .filter(batch_items::batch_id.eq(&batch.id))
            .filter(batch_items::derived_sample_id.eq(&derived.id))
            .count()
            .get_result(c)?;
        if present > 0 {
            return Err(ApiError::conflict(format!("{} is already in batch {}", derived.name, batch.name)));
        }

        let last: Option<i32> = batch_items::table
            .filter(batch_items::batch_id.eq(&batch.id))
            .select(max(batch_items::position))
            .first(c)?;
        let item = BatchItem {
            id: new_id(),
            batch_id: batch.id.clone(),
            derived_sample_id: derived.id.clone(),
            position: last.map_or(1, |p| p + 1),
            added_at: now(),
        };
        diesel::insert_into(batch_items::table).values(&item).execute(c)?;
        audit::record(
            c,
            user,
            "batch.item.add",
            "batch",
            &batch.id,
            Some(json!({ "derived_sample_id": derived.id, "position": item.position })),
        )?;
        Ok(item)
    })
}

fn remove_item(c: &mut AnyConnection, user: &AuthUser, batch_id: &str, item_id: &str) -> ApiResult<()> {
    c.transaction(|c| {
        let batch = find_draft(c, &user.workspace_id, batch_id)?;
        let removed = diesel::delete(
            batch_items::table
                .filter(batch_items::id.eq(item_id))
                .filter(batch_items::batch_id.eq(&batch.id)),
        )
        .execute(c)?;
        if removed == 0 {
            return Err(ApiError::NotFound("batch item"));
        }
        audit::record(c, user, "batch.item.remove", "batch", &batch.id, Some(json!({ "item_id": item_id })))
    })
}

/// Moves a batch from `from` to `to`, stamping the matching timestamp and
/// telling the batch creator.
fn transition(c: &mut AnyConnection, config: &LabConfig, user: &AuthUser, id: &str, from: &str, to: &str) -> ApiResult<Batch> {
    c.transaction(|c| {
        let batch = find(c, &user.workspace_id, id)?;
        if batch.status != from {
            return Err(ApiError::conflict(format!(
                "batch {} is {}, it can only be {} from {}",
                batch.name, batch.status, to, from
            )));
        }

        let at = now();
        if to == SUBMITTED {
            let count: i64 = batch_items::table
                .filter(batch_items::batch_id.eq(&batch.id))
                .count()
                .get_result(c)?;
            if count == 0 {
                return Err(ApiError::conflict(format!("batch {} has no items", batch.name)));
            }
            diesel::update(batches::table.find(&batch.id))
                .set(batches::submitted_at.eq(Some(at)))
                .execute(c)?;
        } else if to == COMPLETED {
            diesel::update(batches::table.find(&batch.id))
                .set(batches::completed_at.eq(Some(at)))
                .execute(c)?;
        }
        diesel::update(batches::table.find(&batch.id))
            .set((batches::status.eq(to), batches::updated_at.eq(at)))
            .execute(c)?;

        audit::record(
            c,
            user,
            &format!("batch.{}", if to == SUBMITTED { "submit" } else { "complete" }),
            "batch",
            &batch.id,
            Some(json!({ "from": from, "to": to })),
        )?;
        notify::emit(
            c,
            config,
            &user.workspace_id,
            &batch.created_by,
            Event {
                kind: Kind::Batch,
                title: format!("Batch {} {}", batch.name, to),
                message: format!("{} marked batch {} as {}.", user.name, batch.name, to),
                entity_type: "batch",
                entity_id: &batch.id,
            },
        )?;
        info!("Batch {} ({}) is now {}", batch.name, batch.id, to);
        find(c, &user.workspace_id, &batch.id)
    })
}

fn manifest_rows(c: &mut AnyConnection, workspace_id: &str, id: &str) -> ApiResult<(Batch, Vec<ManifestRow>)> {
    let batch = find(c, workspace_id, id)?;
    let rows = batch_items::table
        .inner_join(derived_samples::table.inner_join(samples::table))
        .filter(batch_items::batch_id.eq(&batch.id))
        .order(batch_items::position.asc())
        .select((
            batch_items::position,
            derived_samples::name,
            derived_samples::id,
            samples::name,
            derived_samples::derivation,
            derived_samples::depth,
        ))
        .load::<ManifestRow>(c)?;
    Ok((batch, rows))
}

/// Renders the rows as a sample sheet, one line per item.
pub fn write_manifest(rows: &[ManifestRow], separator: &str) -> String {
    let header = ["position", "derived sample", "derived sample id", "sample", "derivation", "depth"];

    // separators or line breaks inside a value would shift the columns
    let clean = |s: &str| s.replace(separator, " ").replace(['\n', '\r'], " ");

    let mut out = header.join(separator);
    out += "\n";
    for r in rows {
        let fields = [
            r.position.to_string(),
            clean(&r.derived_sample),
            r.derived_sample_id.clone(),
            clean(&r.sample),
            clean(&r.derivation),
            r.depth.to_string(),
        ];
        out += &fields.join(separator);
        out += "\n";
    }
    out
}

fn filtered(workspace_id: &str, status: &Option<String>, trial_id: &Option<String>) -> batches::BoxedQuery<'static, MultiBackend> {
    let mut q = batches::table
        .filter(batches::workspace_id.eq(workspace_id.to_string()))
        .filter(batches::deleted_at.is_null())
        .into_boxed();
    if let Some(status) = status {
        q = q.filter(batches::status.eq(status.clone()));
    }
    if let Some(trial_id) = trial_id {
        q = q.filter(batches::trial_id.eq(trial_id.clone()));
    }
    q
}

fn list(
    c: &mut AnyConnection,
    workspace_id: &str,
    status: Option<String>,
    trial_id: Option<String>,
    window: Window,
) -> ApiResult<Page<Batch>> {
    if let Some(s) = &status {
        validate::one_of("status", s, STATUSES)?;
    }
    let total: i64 = filtered(workspace_id, &status, &trial_id).count().get_result(c)?;
    let items = filtered(workspace_id, &status, &trial_id)
        .order((batches::created_at.desc(), batches::id.desc()))
        .limit(window.limit)
        .offset(window.offset())
        .load(c)?;
    Ok(Page::new(items, window, total))
}

#[get("/?<status>&<trial_id>&<paging..>")]
async fn list_route(
    user: AuthUser,
    db: LabDatabase,
    config: &State<LabConfig>,
    status: Option<String>,
    trial_id: Option<String>,
    paging: PageParams,
) -> ApiResult<Json<Page<Batch>>> {
    let window = paging.window(config)?;
    Ok(Json(
        db.run(move |c| list(c, &user.workspace_id, status, trial_id, window))
            .await?,
    ))
}

#[post("/", data = "<input>")]
async fn create_route(user: AuthUser, db: LabDatabase, input: Json<NewBatch>) -> ApiResult<Created<Json<Batch>>> {
    user.require_write()?;
    let input = input.into_inner();
    let batch = db.run(move |c| create(c, &user, input)).await?;
    Ok(Created::new(format!("/api/batches/{}", batch.id)).body(Json(batch)))
}

#[get("/<id>")]
async fn get_route(user: AuthUser, db: LabDatabase, id: String) -> ApiResult<Json<BatchDetail>> {
    Ok(Json(db.run(move |c| detail(c, &user.workspace_id, &id)).await?))
}

#[patch("/<id>", data = "<input>")]
async fn update_route(user: AuthUser, db: LabDatabase, id: String, input: Json<BatchPatch>) -> ApiResult<Json<Batch>> {
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

#[post("/<id>/items", data = "<input>")]
async fn add_item_route(user: AuthUser, db: LabDatabase, id: String, input: Json<NewItem>) -> ApiResult<Created<Json<BatchItem>>> {
    user.require_write()?;
    let input = input.into_inner();
    let item = db.run(move |c| add_item(c, &user, &id, input)).await?;
    Ok(Created::new(format!("/api/batches/{}", item.batch_id)).body(Json(item)))
}

#[delete("/<id>/items/<item_id>")]
async fn remove_item_route(user: AuthUser, db: LabDatabase, id: String, item_id: String) -> ApiResult<Json<Value>> {
    user.require_write()?;
    db.run(move |c| remove_item(c, &user, &id, &item_id)).await?;
    Ok(Json(json!({ "deleted": true })))
}

#[post("/<id>/submit")]
async fn submit_route(user: AuthUser, db: LabDatabase, config: &State<LabConfig>, id: String) -> ApiResult<Json<Batch>> {
    user.require_write()?;
    let config = config.inner().clone();
    Ok(Json(
        db.run(move |c| transition(c, &config, &user, &id, DRAFT, SUBMITTED))
            .await?,
    ))
}

#[post("/<id>/complete")]
async fn complete_route(user: AuthUser, db: LabDatabase, config: &State<LabConfig>, id: String) -> ApiResult<Json<Batch>> {
    user.require_write()?;
    let config = config.inner().clone();
    Ok(Json(
        db.run(move |c| transition(c, &config, &user, &id, SUBMITTED, COMPLETED))
            .await?,
    ))
}

#[get("/<id>/manifest")]
async fn manifest_route(user: AuthUser, db: LabDatabase, id: String) -> ApiResult<(ContentType, String)> {
    let (batch, rows) = db.run(move |c| manifest_rows(c, &user.workspace_id, &id)).await?;
    debug!("Manifest for batch {} with {} rows", batch.name, rows.len());
    Ok((ContentType::new("text", "tab-separated-values"), write_manifest(&rows, "\t")))
}

#[get("/<id>/authoritative")]
async fn authoritative_route(user: AuthUser, db: LabDatabase, id: String) -> ApiResult<Json<Analysis>> {
    Ok(Json(
        db.run(move |c| analyses::authoritative_for_batch(c, &user.workspace_id, &id))
            .await?,
    ))
}

pub fn routes() -> Vec<Route> {
    routes![
        list_route,
        create_route,
        get_route,
        update_route,
        delete_route,
        add_item_route,
        remove_item_route,
        submit_route,
        complete_route,
        manifest_route,
        authoritative_route
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{register_workspace, sample_fixture, TestLab};
    use rocket::http::Status;

    #[test]
    fn manifest_layout() {
        let rows = vec![ManifestRow {
            position: 1,
            derived_sample: String::from("PB-001\tDNA"),
            derived_sample_id: String::from("d1"),
            sample: String::from("PB-001"),
            derivation: String::from("extraction"),
            depth: 1,
        }];
        let tsv = write_manifest(&rows, "\t");
        let lines: Vec<&str> = tsv.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].split('\t').count(), 6);
        assert_eq!(lines[1], "1\tPB-001 DNA\td1\tPB-001\textraction\t1");
    }

    #[test]
    fn lifecycle() {
        let lab = TestLab::new();
        let admin = register_workspace(&lab, "Batch Lab", "admin@batch.lab");
        let fixture = sample_fixture(&admin);
        let batch = admin.post("/api/batches", json!({ "name": "Run 7" }));
        let id = batch["id"].as_str().unwrap();
        assert_eq!(batch["status"], "draft");

        // nothing to submit yet, and nothing to complete
        assert_eq!(admin.post_status(&format!("/api/batches/{}/submit", id), json!({})).0, Status::Conflict);
        assert_eq!(admin.post_status(&format!("/api/batches/{}/complete", id), json!({})).0, Status::Conflict);

        let item = admin.post(&format!("/api/batches/{}/items", id), json!({ "derived_sample_id": fixture.derived_id }));
        assert_eq!(item["position"], 1);
        let (status, _) = admin.post_status(&format!("/api/batches/{}/items", id), json!({ "derived_sample_id": fixture.derived_id }));
        assert_eq!(status, Status::Conflict);

        let submitted = admin.post(&format!("/api/batches/{}/submit", id), json!({}));
        assert_eq!(submitted["status"], "submitted");
        assert!(submitted["submitted_at"].is_string());

        // frozen once submitted
        let (status, _) = admin.post_status(&format!("/api/batches/{}/items", id), json!({ "derived_sample_id": fixture.derived_id }));
        assert_eq!(status, Status::Conflict);
        let item_uri = format!("/api/batches/{}/items/{}", id, item["id"].as_str().unwrap());
        assert_eq!(admin.delete(&item_uri).0, Status::Conflict);
        assert_eq!(admin.patch(&format!("/api/batches/{}", id), json!({ "name": "x" })).0, Status::Conflict);
        assert_eq!(admin.delete(&format!("/api/batches/{}", id)).0, Status::Conflict);

        let completed = admin.post(&format!("/api/batches/{}/complete", id), json!({}));
        assert_eq!(completed["status"], "completed");
        assert_eq!(admin.post_status(&format!("/api/batches/{}/submit", id), json!({})).0, Status::Conflict);

        let (_, detail) = admin.get(&format!("/api/batches/{}", id));
        assert_eq!(detail["items"].as_array().unwrap().len(), 1);

        let (_, inbox) = admin.get("/api/notifications");
        assert_eq!(inbox["total"], 2);
    }

    #[test]
    fn trial_link_can_be_cleared() {
        let lab = TestLab::new();
        let admin = register_workspace(&lab, "Batch Lab", "admin@batch.lab");
        let fixture = sample_fixture(&admin);
        let trial = admin.post("/api/trials", json!({ "project_id": fixture.project_id, "name": "Arm A" }));
        let batch = admin.post("/api/batches", json!({ "name": "Run 8", "trial_id": trial["id"] }));
        let uri = format!("/api/batches/{}", batch["id"].as_str().unwrap());
        assert_eq!(batch["trial_id"], trial["id"]);

        let (_, kept) = admin.patch(&uri, json!({ "notes": "on ice" }));
        assert_eq!(kept["trial_id"], trial["id"]);

        let (status, cleared) = admin.patch(&uri, json!({ "trial_id": null }));
        assert_eq!(status, Status::Ok);
        assert!(cleared["trial_id"].is_null());
        assert_eq!(cleared["notes"], "on ice");
    }

    #[test]
    fn items_only_from_own_workspace() {
        let lab = TestLab::new();
        let a = register_workspace(&lab, "Lab A", "a@a.lab");
        let b = register_workspace(&lab, "Lab B", "b@b.lab");
        let foreign = sample_fixture(&b);
        let batch = a.post("/api/batches", json!({ "name": "Mine" }));
        let (status, _) = a.post_status(
            &format!("/api/batches/{}/items", batch["id"].as_str().unwrap()),
            json!({ "derived_sample_id": foreign.derived_id }),
        );
        assert_eq!(status, Status::BadRequest);
        assert_eq!(b.get(&format!("/api/batches/{}", batch["id"].as_str().unwrap())).0, Status::NotFound);
    }

    #[test]
    fn manifest_and_removal() {
        let lab = TestLab::new();
        let admin = register_workspace(&lab, "Batch Lab", "admin@batch.lab");
        let fixture = sample_fixture(&admin);
        let extra = admin.post(
            "/api/derived-samples",
            json!({ "sample_id": fixture.sample_id, "name": "PB-001-RNA", "derivation": "extraction" }),
        );
        let batch = admin.post("/api/batches", json!({ "name": "Run 8" }));
        let id = batch["id"].as_str().unwrap();
        let first = admin.post(&format!("/api/batches/{}/items", id), json!({ "derived_sample_id": fixture.derived_id }));
        let second = admin.post(&format!("/api/batches/{}/items", id), json!({ "derived_sample_id": extra["id"] }));
        assert_eq!(second["position"], 2);

        let (status, tsv) = admin.get_text(&format!("/api/batches/{}/manifest", id));
        assert_eq!(status, Status::Ok);
        let lines: Vec<&str> = tsv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("1\tPB-001-DNA\t"));
        assert!(lines[2].contains("PB-001-RNA"));

        let uri = format!("/api/batches/{}/items/{}", id, first["id"].as_str().unwrap());
        assert_eq!(admin.delete(&uri).0, Status::Ok);
        assert_eq!(admin.delete(&uri).0, Status::NotFound);
        assert_eq!(admin.get_text(&format!("/api/batches/{}/manifest", id)).1.lines().count(), 2);
    }
}
