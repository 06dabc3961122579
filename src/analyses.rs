//! Analysis results and their provenance.
//!
//! Results are write-once. A correction is a new row that supersedes the old
//! one, so every result belongs to a linear revision chain. Per batch, at most
//! one result is authoritative; the flag is the only column ever updated and
//! it only moves inside a transaction that demotes before it promotes. The
//! partial unique indexes on `analyses(batch_id) WHERE is_authoritative` and
//! `analyses(supersedes_id)` back both rules in the database.

use std::collections::BTreeMap;

use diesel::prelude::*;
use rocket::response::status::Created;
use rocket::serde::json::Json;
use rocket::{Route, State};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::audit;
use crate::auth::AuthUser;
use crate::batches;
use crate::config::LabConfig;
use crate::db::{new_id, now, AnyConnection, LabDatabase, MultiBackend};
use crate::error::{ApiError, ApiResult};
use crate::models::{Analysis, AnalysisType, Batch};
use crate::notify::{self, Event, Kind};
use crate::paging::{Page, PageParams, Window};
use crate::schema::{analyses, analysis_types};
use crate::validate;

#[derive(Debug, Deserialize)]
pub struct NewAnalysisType {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NewAnalysis {
    pub batch_id: String,
    pub analysis_type_id: String,
    pub result: Value,
    pub notes: Option<String>,
    #[serde(default)]
    pub authoritative: bool,
}

#[derive(Debug, Deserialize)]
pub struct Revision {
    pub result: Value,
    pub notes: Option<String>,
}

/// A batch that has more than one authoritative analysis.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct Conflict {
    pub batch_id: String,
    pub analysis_ids: Vec<String>,
}

fn find_type(c: &mut AnyConnection, workspace_id: &str, id: &str) -> ApiResult<AnalysisType> {
    analysis_types::table
        .filter(analysis_types::id.eq(id))
        .filter(analysis_types::workspace_id.eq(workspace_id))
        .first(c)
        .optional()?
        .ok_or(ApiError::NotFound("analysis type"))
}

fn create_type(c: &mut AnyConnection, user: &AuthUser, input: NewAnalysisType) -> ApiResult<AnalysisType> {
    let kind = AnalysisType {
        id: new_id(),
        workspace_id: user.workspace_id.clone(),
        name: validate::required("name", &input.name)?,
        description: validate::optional(input.description),
        created_at: now(),
    };
    c.transaction(|c| {
        let taken: i64 = analysis_types::table
            .filter(analysis_types::workspace_id.eq(&kind.workspace_id))
            .filter(analysis_types::name.eq(&kind.name))
            .count()
            .get_result(c)?;
        if taken > 0 {
            return Err(ApiError::conflict(format!("analysis type {} already exists", kind.name)));
        }
        diesel::insert_into(analysis_types::table).values(&kind).execute(c)?;
        audit::record(c, user, "analysis_type.create", "analysis_type", &kind.id, None)?;
        Ok(kind)
    })
}

fn list_types(c: &mut AnyConnection, workspace_id: &str) -> ApiResult<Vec<AnalysisType>> {
    Ok(analysis_types::table
        .filter(analysis_types::workspace_id.eq(workspace_id))
        .order(analysis_types::name.asc())
        .load(c)?)
}

pub(crate) fn find(c: &mut AnyConnection, workspace_id: &str, id: &str) -> ApiResult<Analysis> {
    analyses::table
        .filter(analyses::id.eq(id))
        .filter(analyses::workspace_id.eq(workspace_id))
        .first(c)
        .optional()?
        .ok_or(ApiError::NotFound("analysis"))
}

fn current_authority(c: &mut AnyConnection, batch_id: &str) -> QueryResult<Option<Analysis>> {
    analyses::table
        .filter(analyses::batch_id.eq(batch_id))
        .filter(analyses::is_authoritative.eq(true))
        .first(c)
        .optional()
}

fn successor(c: &mut AnyConnection, id: &str) -> QueryResult<Option<Analysis>> {
    analyses::table
        .filter(analyses::supersedes_id.eq(id))
        .first(c)
        .optional()
}

pub fn authoritative_for_batch(c: &mut AnyConnection, workspace_id: &str, batch_id: &str) -> ApiResult<Analysis> {
    let batch = batches::find(c, workspace_id, batch_id)?;
    current_authority(c, &batch.id)?.ok_or(ApiError::NotFound("authoritative analysis"))
}

fn set_authority(c: &mut AnyConnection, id: &str, authoritative: bool) -> QueryResult<usize> {
    diesel::update(analyses::table.find(id))
        .set(analyses::is_authoritative.eq(authoritative))
        .execute(c)
}

fn tell_batch_owner(
    c: &mut AnyConnection,
    config: &LabConfig,
    user: &AuthUser,
    batch: &Batch,
    analysis: &Analysis,
    what: &str,
) -> ApiResult<()> {
    notify::emit(
        c,
        config,
        &user.workspace_id,
        &batch.created_by,
        Event {
            kind: Kind::Analysis,
            title: format!("Analysis {} for batch {}", what, batch.name),
            message: format!(
                "{} {} an analysis for batch {}{}.",
                user.name,
                what,
                batch.name,
                if analysis.is_authoritative { ", now authoritative" } else { "" }
            ),
            entity_type: "analysis",
            entity_id: &analysis.id,
        },
    )?;
    Ok(())
}

fn create(c: &mut AnyConnection, config: &LabConfig, user: &AuthUser, input: NewAnalysis) -> ApiResult<Analysis> {
    if input.result.is_null() {
        return Err(ApiError::validation("result must not be empty"));
    }

    c.transaction(|c| {
        let batch = batches::find(c, &user.workspace_id, &input.batch_id)
            .map_err(|e| e.unknown_reference(format!("unknown batch {}", input.batch_id)))?;
        if batch.status == batches::DRAFT {
            return Err(ApiError::conflict(format!("batch {} has not been submitted yet", batch.name)));
        }
        let kind = find_type(c, &user.workspace_id, &input.analysis_type_id)
            .map_err(|e| e.unknown_reference(format!("unknown analysis type {}", input.analysis_type_id)))?;

        if input.authoritative {
            if let Some(current) = current_authority(c, &batch.id)? {
                return Err(ApiError::conflict(format!(
                    "batch {} already has authoritative analysis {}, promote instead",
                    batch.name, current.id
                )));
            }
        }

        let analysis = Analysis {
            id: new_id(),
            workspace_id: user.workspace_id.clone(),
            batch_id: batch.id.clone(),
            analysis_type_id: kind.id.clone(),
            result: input.result.to_string(),
            notes: validate::optional(input.notes.clone()),
            is_authoritative: input.authoritative,
            supersedes_id: None,
            created_by: user.id.clone(),
            created_at: now(),
        };
        diesel::insert_into(analyses::table).values(&analysis).execute(c)?;
        audit::record(
            c,
            user,
            "analysis.create",
            "analysis",
            &analysis.id,
            Some(serde_json::json!({
                "batch_id": batch.id,
                "analysis_type": kind.name,
                "authoritative": analysis.is_authoritative,
            })),
        )?;
        tell_batch_owner(c, config, user, &batch, &analysis, "recorded")?;
        Ok(analysis)
    })
}

fn revise(c: &mut AnyConnection, config: &LabConfig, user: &AuthUser, id: &str, input: Revision) -> ApiResult<Analysis> {
    if input.result.is_null() {
        return Err(ApiError::validation("result must not be empty"));
    }

    c.transaction(|c| {
        let old = find(c, &user.workspace_id, id)?;
        if let Some(newer) = successor(c, &old.id)? {
            return Err(ApiError::conflict(format!(
                "analysis {} was already superseded by {}",
                old.id, newer.id
            )));
        }
        let batch = batches::find(c, &user.workspace_id, &old.batch_id)?;

        // authority follows the chain; demote first so the index never sees two
        if old.is_authoritative {
            set_authority(c, &old.id, false)?;
        }
        let revision = Analysis {
            id: new_id(),
            workspace_id: old.workspace_id.clone(),
            batch_id: old.batch_id.clone(),
            analysis_type_id: old.analysis_type_id.clone(),
            result: input.result.to_string(),
            notes: validate::optional(input.notes.clone()),
            is_authoritative: old.is_authoritative,
            supersedes_id: Some(old.id.clone()),
            created_by: user.id.clone(),
            created_at: now(),
        };
        diesel::insert_into(analyses::table).values(&revision).execute(c)?;

        audit::record(
            c,
            user,
            "analysis.revise",
            "analysis",
            &revision.id,
            Some(serde_json::json!({ "supersedes": old.id, "authoritative": revision.is_authoritative })),
        )?;
        tell_batch_owner(c, config, user, &batch, &revision, "revised")?;
        Ok(revision)
    })
}

fn promote(c: &mut AnyConnection, config: &LabConfig, user: &AuthUser, id: &str) -> ApiResult<Analysis> {
    c.transaction(|c| {
        let analysis = find(c, &user.workspace_id, id)?;
        if let Some(newer) = successor(c, &analysis.id)? {
            return Err(ApiError::conflict(format!(
                "analysis {} is superseded by {} and cannot become authoritative",
                analysis.id, newer.id
            )));
        }
        if analysis.is_authoritative {
            return Ok(analysis);
        }
        let batch = batches::find(c, &user.workspace_id, &analysis.batch_id)?;

        let demoted = current_authority(c, &batch.id)?;
        if let Some(previous) = &demoted {
            set_authority(c, &previous.id, false)?;
        }
        set_authority(c, &analysis.id, true)?;
        let promoted = find(c, &user.workspace_id, &analysis.id)?;

        audit::record(
            c,
            user,
            "analysis.promote",
            "analysis",
            &promoted.id,
            Some(serde_json::json!({ "batch_id": batch.id, "demoted": demoted.map(|a| a.id) })),
        )?;
        tell_batch_owner(c, config, user, &batch, &promoted, "promoted")?;
        Ok(promoted)
    })
}

/// The whole revision chain `id` belongs to, oldest first.
fn history(c: &mut AnyConnection, workspace_id: &str, id: &str) -> ApiResult<Vec<Analysis>> {
    let mut root = find(c, workspace_id, id)?;
    while let Some(prev) = root.supersedes_id.clone() {
        root = find(c, workspace_id, &prev)?;
    }

    let mut chain = vec![root];
    while let Some(next) = successor(c, &chain[chain.len() - 1].id)? {
        chain.push(next);
    }
    Ok(chain)
}

/// Groups `(analysis id, batch id)` pairs of authoritative rows by batch and
/// keeps the batches that have more than one.
pub fn find_conflicts(rows: Vec<(String, String)>) -> Vec<Conflict> {
    let mut by_batch: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (id, batch_id) in rows {
        by_batch.entry(batch_id).or_default().push(id);
    }
    by_batch
        .into_iter()
        .filter(|(_, ids)| ids.len() > 1)
        .map(|(batch_id, analysis_ids)| Conflict { batch_id, analysis_ids })
        .collect()
}

fn conflicts(c: &mut AnyConnection, workspace_id: &str) -> ApiResult<Vec<Conflict>> {
    let rows = analyses::table
        .filter(analyses::workspace_id.eq(workspace_id))
        .filter(analyses::is_authoritative.eq(true))
        .select((analyses::id, analyses::batch_id))
        .load::<(String, String)>(c)?;
    let found = find_conflicts(rows);
    if !found.is_empty() {
        error!("{} batches with several authoritative analyses in workspace {}", found.len(), workspace_id);
    }
    Ok(found)
}

fn filtered(workspace_id: &str, batch_id: &Option<String>, authoritative: Option<bool>) -> analyses::BoxedQuery<'static, MultiBackend> {
    let mut q = analyses::table
        .filter(analyses::workspace_id.eq(workspace_id.to_string()))
        .into_boxed();
    if let Some(batch_id) = batch_id {
        q = q.filter(analyses::batch_id.eq(batch_id.clone()));
    }
    if let Some(flag) = authoritative {
        q = q.filter(analyses::is_authoritative.eq(flag));
    }
    q
}

fn list(
    c: &mut AnyConnection,
    workspace_id: &str,
    batch_id: Option<String>,
    authoritative: Option<bool>,
    window: Window,
) -> ApiResult<Page<Analysis>> {
    let total: i64 = filtered(workspace_id, &batch_id, authoritative).count().get_result(c)?;
    let items = filtered(workspace_id, &batch_id, authoritative)
        .order((analyses::created_at.desc(), analyses::id.desc()))
        .limit(window.limit)
        .offset(window.offset())
        .load(c)?;
    Ok(Page::new(items, window, total))
}

/// Answer to any attempt at changing a stored result.
fn immutable(c: &mut AnyConnection, workspace_id: &str, id: &str) -> ApiError {
    match find(c, workspace_id, id) {
        Ok(analysis) => ApiError::conflict(format!(
            "analysis {} is immutable, record a revision instead",
            analysis.id
        )),
        Err(e) => e,
    }
}

#[get("/")]
async fn types_route(user: AuthUser, db: LabDatabase) -> ApiResult<Json<Vec<AnalysisType>>> {
    Ok(Json(db.run(move |c| list_types(c, &user.workspace_id)).await?))
}

#[post("/", data = "<input>")]
async fn create_type_route(user: AuthUser, db: LabDatabase, input: Json<NewAnalysisType>) -> ApiResult<Created<Json<AnalysisType>>> {
    user.require_admin()?;
    let input = input.into_inner();
    let kind = db.run(move |c| create_type(c, &user, input)).await?;
    Ok(Created::new(format!("/api/analysis-types/{}", kind.id)).body(Json(kind)))
}

#[get("/?<batch_id>&<authoritative>&<paging..>")]
async fn list_route(
    user: AuthUser,
    db: LabDatabase,
    config: &State<LabConfig>,
    batch_id: Option<String>,
    authoritative: Option<String>,
    paging: PageParams,
) -> ApiResult<Json<Page<Analysis>>> {
    let window = paging.window(config)?;
    let authoritative = validate::flag("authoritative", authoritative.as_deref())?;
    Ok(Json(
        db.run(move |c| list(c, &user.workspace_id, batch_id, authoritative, window))
            .await?,
    ))
}

#[post("/", data = "<input>")]
async fn create_route(
    user: AuthUser,
    db: LabDatabase,
    config: &State<LabConfig>,
    input: Json<NewAnalysis>,
) -> ApiResult<Created<Json<Analysis>>> {
    user.require_write()?;
    let config = config.inner().clone();
    let input = input.into_inner();
    let analysis = db.run(move |c| create(c, &config, &user, input)).await?;
    Ok(Created::new(format!("/api/analyses/{}", analysis.id)).body(Json(analysis)))
}

#[get("/conflicts")]
async fn conflicts_route(user: AuthUser, db: LabDatabase) -> ApiResult<Json<Vec<Conflict>>> {
    Ok(Json(db.run(move |c| conflicts(c, &user.workspace_id)).await?))
}

#[get("/<id>")]
async fn get_route(user: AuthUser, db: LabDatabase, id: String) -> ApiResult<Json<Analysis>> {
    Ok(Json(db.run(move |c| find(c, &user.workspace_id, &id)).await?))
}

#[put("/<id>")]
async fn replace_route(user: AuthUser, db: LabDatabase, id: String) -> ApiResult<()> {
    Err(db.run(move |c| immutable(c, &user.workspace_id, &id)).await)
}

#[patch("/<id>")]
async fn update_route(user: AuthUser, db: LabDatabase, id: String) -> ApiResult<()> {
    Err(db.run(move |c| immutable(c, &user.workspace_id, &id)).await)
}

#[delete("/<id>")]
async fn delete_route(user: AuthUser, db: LabDatabase, id: String) -> ApiResult<()> {
    Err(db.run(move |c| immutable(c, &user.workspace_id, &id)).await)
}

#[post("/<id>/revise", data = "<input>")]
async fn revise_route(
    user: AuthUser,
    db: LabDatabase,
    config: &State<LabConfig>,
    id: String,
    input: Json<Revision>,
) -> ApiResult<Created<Json<Analysis>>> {
    user.require_write()?;
    let config = config.inner().clone();
    let input = input.into_inner();
    let revision = db.run(move |c| revise(c, &config, &user, &id, input)).await?;
    Ok(Created::new(format!("/api/analyses/{}", revision.id)).body(Json(revision)))
}

#[post("/<id>/promote")]
async fn promote_route(user: AuthUser, db: LabDatabase, config: &State<LabConfig>, id: String) -> ApiResult<Json<Analysis>> {
    user.require_write()?;
    let config = config.inner().clone();
    Ok(Json(db.run(move |c| promote(c, &config, &user, &id)).await?))
}

#[get("/<id>/history")]
async fn history_route(user: AuthUser, db: LabDatabase, id: String) -> ApiResult<Json<Vec<Analysis>>> {
    Ok(Json(db.run(move |c| history(c, &user.workspace_id, &id)).await?))
}

pub fn type_routes() -> Vec<Route> {
    routes![types_route, create_type_route]
}

pub fn routes() -> Vec<Route> {
    routes![
        list_route,
        create_route,
        conflicts_route,
        get_route,
        replace_route,
        update_route,
        delete_route,
        revise_route,
        promote_route,
        history_route
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{register_workspace, sample_fixture, submitted_batch, TestLab, TestUser};
    use rocket::http::Status;
    use serde_json::json;

    fn record(user: &TestUser<'_>, batch_id: &str, type_id: &str, copies: i64, authoritative: bool) -> Value {
        user.post(
            "/api/analyses",
            json!({
                "batch_id": batch_id,
                "analysis_type_id": type_id,
                "result": { "copies_per_ul": copies },
                "authoritative": authoritative,
            }),
        )
    }

    #[test]
    fn conflict_grouping() {
        let rows = vec![
            (String::from("a1"), String::from("b1")),
            (String::from("a2"), String::from("b2")),
            (String::from("a3"), String::from("b1")),
        ];
        assert_eq!(
            find_conflicts(rows),
            vec![Conflict {
                batch_id: String::from("b1"),
                analysis_ids: vec![String::from("a1"), String::from("a3")],
            }]
        );
        assert!(find_conflicts(Vec::new()).is_empty());
    }

    #[test]
    fn drafts_take_no_results() {
        let lab = TestLab::new();
        let admin = register_workspace(&lab, "qPCR Lab", "admin@qpcr.lab");
        let (_, type_id) = submitted_batch(&admin, &sample_fixture(&admin));
        let draft = admin.post("/api/batches", json!({ "name": "Draft" }));
        let (status, _) = admin.post_status(
            "/api/analyses",
            json!({ "batch_id": draft["id"], "analysis_type_id": type_id, "result": { "ct": 31.2 } }),
        );
        assert_eq!(status, Status::Conflict);
    }

    #[test]
    fn results_are_immutable() {
        let lab = TestLab::new();
        let admin = register_workspace(&lab, "qPCR Lab", "admin@qpcr.lab");
        let (batch_id, type_id) = submitted_batch(&admin, &sample_fixture(&admin));
        let analysis = record(&admin, &batch_id, &type_id, 120, false);
        assert_eq!(analysis["result"]["copies_per_ul"], 120);
        let uri = format!("/api/analyses/{}", analysis["id"].as_str().unwrap());

        assert_eq!(admin.put(&uri, json!({ "result": { "copies_per_ul": 1 } })).0, Status::Conflict);
        assert_eq!(admin.patch(&uri, json!({ "notes": "typo" })).0, Status::Conflict);
        assert_eq!(admin.delete(&uri).0, Status::Conflict);
        assert_eq!(admin.delete("/api/analyses/missing").0, Status::NotFound);

        let (_, stored) = admin.get(&uri);
        assert_eq!(stored["result"]["copies_per_ul"], 120);
    }

    #[test]
    fn one_authority_per_batch() {
        let lab = TestLab::new();
        let admin = register_workspace(&lab, "qPCR Lab", "admin@qpcr.lab");
        let (batch_id, type_id) = submitted_batch(&admin, &sample_fixture(&admin));
        let first = record(&admin, &batch_id, &type_id, 100, true);
        let second = record(&admin, &batch_id, &type_id, 110, false);

        let (status, _) = admin.post_status(
            "/api/analyses",
            json!({ "batch_id": batch_id, "analysis_type_id": type_id, "result": { "copies_per_ul": 1 }, "authoritative": true }),
        );
        assert_eq!(status, Status::Conflict);

        let promoted = admin.post(&format!("/api/analyses/{}/promote", second["id"].as_str().unwrap()), json!({}));
        assert_eq!(promoted["is_authoritative"], true);
        let (_, old) = admin.get(&format!("/api/analyses/{}", first["id"].as_str().unwrap()));
        assert_eq!(old["is_authoritative"], false);

        let (status, current) = admin.get(&format!("/api/batches/{}/authoritative", batch_id));
        assert_eq!(status, Status::Ok);
        assert_eq!(current["id"], second["id"]);
        assert_eq!(admin.get(&format!("/api/analyses?batch_id={}&authoritative=true", batch_id)).1["total"], 1);
        assert_eq!(admin.get("/api/analyses/conflicts").1.as_array().unwrap().len(), 0);
    }

    #[test]
    fn database_rejects_second_authority() {
        let lab = TestLab::new();
        let admin = register_workspace(&lab, "qPCR Lab", "admin@qpcr.lab");
        let (batch_id, type_id) = submitted_batch(&admin, &sample_fixture(&admin));
        let first = record(&admin, &batch_id, &type_id, 100, true);

        let mut c = lab.conn();
        let mut rogue: Analysis = analyses::table
            .find(first["id"].as_str().unwrap())
            .first(&mut c)
            .unwrap();
        rogue.id = new_id();
        let inserted = diesel::insert_into(analyses::table).values(&rogue).execute(&mut c);
        assert!(inserted.is_err());

        // a second successor of the same row is refused as well
        rogue.is_authoritative = false;
        rogue.supersedes_id = Some(first["id"].as_str().unwrap().to_string());
        diesel::insert_into(analyses::table).values(&rogue).execute(&mut c).unwrap();
        rogue.id = new_id();
        assert!(diesel::insert_into(analyses::table).values(&rogue).execute(&mut c).is_err());
    }

    #[test]
    fn revisions_form_a_chain() {
        let lab = TestLab::new();
        let admin = register_workspace(&lab, "qPCR Lab", "admin@qpcr.lab");
        let (batch_id, type_id) = submitted_batch(&admin, &sample_fixture(&admin));
        let v1 = record(&admin, &batch_id, &type_id, 100, true);
        let v1_id = v1["id"].as_str().unwrap();

        let v2 = admin.post(&format!("/api/analyses/{}/revise", v1_id), json!({ "result": { "copies_per_ul": 105 } }));
        assert_eq!(v2["supersedes_id"], v1_id);
        assert_eq!(v2["is_authoritative"], true);
        let v2_id = v2["id"].as_str().unwrap();

        // v1 can neither be revised again nor promoted back
        let (status, _) = admin.post_status(&format!("/api/analyses/{}/revise", v1_id), json!({ "result": { "copies_per_ul": 1 } }));
        assert_eq!(status, Status::Conflict);
        assert_eq!(admin.post_status(&format!("/api/analyses/{}/promote", v1_id), json!({})).0, Status::Conflict);

        let v3 = admin.post(&format!("/api/analyses/{}/revise", v2_id), json!({ "result": { "copies_per_ul": 104 }, "notes": "recalibrated" }));

        let (status, chain) = admin.get(&format!("/api/analyses/{}/history", v2_id));
        assert_eq!(status, Status::Ok);
        let ids: Vec<&str> = chain.as_array().unwrap().iter().map(|a| a["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec![v1_id, v2_id, v3["id"].as_str().unwrap()]);
        assert_eq!(chain[0]["result"]["copies_per_ul"], 100);

        let (_, current) = admin.get(&format!("/api/batches/{}/authoritative", batch_id));
        assert_eq!(current["id"], v3["id"]);
        assert_eq!(admin.get(&format!("/api/analyses?batch_id={}", batch_id)).1["total"], 3);
    }

    #[test]
    fn authority_lookup_and_types() {
        let lab = TestLab::new();
        let admin = register_workspace(&lab, "qPCR Lab", "admin@qpcr.lab");
        let member = admin.add_user("tech@qpcr.lab", "member");
        let (batch_id, type_id) = submitted_batch(&admin, &sample_fixture(&admin));
        record(&member, &batch_id, &type_id, 5, false);
        assert_eq!(admin.get(&format!("/api/batches/{}/authoritative", batch_id)).0, Status::NotFound);

        let (status, _) = member.post_status("/api/analysis-types", json!({ "name": "ddPCR" }));
        assert_eq!(status, Status::Forbidden);
        let (status, _) = admin.post_status("/api/analysis-types", json!({ "name": format!("qPCR {}", batch_id) }));
        assert_eq!(status, Status::Conflict);
        assert_eq!(member.get("/api/analysis-types").1.as_array().unwrap().len(), 1);

        // the batch creator hears about results on their batch
        let (_, inbox) = admin.get("/api/notifications?unread_only=true");
        assert!(inbox["items"].as_array().unwrap().iter().any(|n| n["kind"] == "analysis"));
    }
}
