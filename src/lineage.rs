//! Derived samples (aliquots, extracts, libraries) and the tree they form
//! below a sample.

use std::collections::HashMap;

use diesel::prelude::*;
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
use crate::models::{DerivedSample, Sample};
use crate::paging::{Page, PageParams, Window};
use crate::samples;
use crate::schema::derived_samples;
use crate::validate;

#[derive(Debug, Deserialize)]
pub struct NewDerivedSample {
    pub sample_id: Option<String>,
    pub parent_id: Option<String>,
    pub name: String,
    pub derivation: String,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct LineageNode {
    #[serde(flatten)]
    pub derived: DerivedSample,
    pub children: Vec<LineageNode>,
}

#[derive(Debug, Serialize)]
pub struct Lineage {
    pub sample: Sample,
    pub derived: Vec<LineageNode>,
}

pub(crate) fn find(c: &mut AnyConnection, workspace_id: &str, id: &str) -> ApiResult<DerivedSample> {
    derived_samples::table
        .filter(derived_samples::id.eq(id))
        .filter(derived_samples::workspace_id.eq(workspace_id))
        .filter(derived_samples::deleted_at.is_null())
        .first(c)
        .optional()?
        .ok_or(ApiError::NotFound("derived sample"))
}

fn create(c: &mut AnyConnection, config: &LabConfig, user: &AuthUser, input: NewDerivedSample) -> ApiResult<DerivedSample> {
    let name = validate::required("name", &input.name)?;
    let derivation = validate::required("derivation", &input.derivation)?;
    let sample_id = validate::optional(input.sample_id);
    let parent_id = validate::optional(input.parent_id);

    c.transaction(|c| {
        let (root, depth) = match (&parent_id, &sample_id) {
            (Some(parent_id), requested) => {
                let parent = find(c, &user.workspace_id, parent_id)
                    .map_err(|e| e.unknown_reference(format!("unknown parent {}", parent_id)))?;
                if matches!(requested, Some(s) if *s != parent.sample_id) {
                    return Err(ApiError::validation("sample_id does not match the parent's sample"));
                }
                (parent.sample_id, parent.depth + 1)
            }
            (None, Some(sample_id)) => {
                let sample = samples::find(c, &user.workspace_id, sample_id)
                    .map_err(|e| e.unknown_reference(format!("unknown sample {}", sample_id)))?;
                (sample.id, 1)
            }
            (None, None) => return Err(ApiError::validation("either sample_id or parent_id is required")),
        };

        if depth > config.max_lineage_depth {
            return Err(ApiError::validation(format!(
                "derivation depth {} exceeds the limit of {}",
                depth, config.max_lineage_depth
            )));
        }

        let derived = DerivedSample {
            id: new_id(),
            workspace_id: user.workspace_id.clone(),
            sample_id: root,
            parent_id: parent_id.clone(),
            name,
            derivation,
            depth,
            created_by: user.id.clone(),
            created_at: now(),
            deleted_at: None,
        };
        diesel::insert_into(derived_samples::table).values(&derived).execute(c)?;
        audit::record(
            c,
            user,
            "derived_sample.create",
            "derived_sample",
            &derived.id,
            Some(json!({ "sample_id": derived.sample_id, "parent_id": derived.parent_id, "depth": derived.depth })),
        )?;
        Ok(derived)
    })
}

fn soft_delete(c: &mut AnyConnection, user: &AuthUser, id: &str) -> ApiResult<()> {
    c.transaction(|c| {
        let derived = find(c, &user.workspace_id, id)?;
        let children: i64 = derived_samples::table
            .filter(derived_samples::parent_id.eq(&derived.id))
            .filter(derived_samples::deleted_at.is_null())
            .count()
            .get_result(c)?;
        if children > 0 {
            return Err(ApiError::conflict(format!("{} has {} derived samples of its own", derived.name, children)));
        }
        diesel::update(derived_samples::table.find(&derived.id))
            .set(derived_samples::deleted_at.eq(Some(now())))
            .execute(c)?;
        audit::record(c, user, "derived_sample.delete", "derived_sample", &derived.id, None)
    })
}

fn filtered(workspace_id: &str, sample_id: &Option<String>) -> derived_samples::BoxedQuery<'static, MultiBackend> {
    let mut q = derived_samples::table
        .filter(derived_samples::workspace_id.eq(workspace_id.to_string()))
        .filter(derived_samples::deleted_at.is_null())
        .into_boxed();
    if let Some(sample_id) = sample_id {
        q = q.filter(derived_samples::sample_id.eq(sample_id.clone()));
    }
    q
}

fn list(c: &mut AnyConnection, workspace_id: &str, sample_id: Option<String>, window: Window) -> ApiResult<Page<DerivedSample>> {
    let total: i64 = filtered(workspace_id, &sample_id).count().get_result(c)?;
    let items = filtered(workspace_id, &sample_id)
        .order((derived_samples::created_at.desc(), derived_samples::id.desc()))
        .limit(window.limit)
        .offset(window.offset())
        .load(c)?;
    Ok(Page::new(items, window, total))
}

/// Nests `rows` by `parent_id`. Rows are expected in creation order, which
/// the children keep.
pub fn build_tree(rows: Vec<DerivedSample>) -> Vec<LineageNode> {
    let mut by_parent: HashMap<Option<String>, Vec<DerivedSample>> = HashMap::new();
    for row in rows {
        by_parent.entry(row.parent_id.clone()).or_default().push(row);
    }

    fn attach(parent: Option<String>, by_parent: &mut HashMap<Option<String>, Vec<DerivedSample>>) -> Vec<LineageNode> {
        by_parent
            .remove(&parent)
            .unwrap_or_default()
            .into_iter()
            .map(|derived| {
                let children = attach(Some(derived.id.clone()), by_parent);
                LineageNode { derived, children }
            })
            .collect()
    }

    let roots = attach(None, &mut by_parent);
    if !by_parent.is_empty() {
        warn!("{} derived samples hang off missing parents", by_parent.values().map(Vec::len).sum::<usize>());
    }
    roots
}

pub fn tree(c: &mut AnyConnection, workspace_id: &str, sample_id: &str) -> ApiResult<Lineage> {
    let sample = samples::find(c, workspace_id, sample_id)?;
    let rows = derived_samples::table
        .filter(derived_samples::sample_id.eq(&sample.id))
        .filter(derived_samples::deleted_at.is_null())
        .order((derived_samples::created_at.asc(), derived_samples::id.asc()))
        .load(c)?;
    Ok(Lineage {
        sample,
        derived: build_tree(rows),
    })
}

#[get("/?<sample_id>&<paging..>")]
async fn list_route(
    user: AuthUser,
    db: LabDatabase,
    config: &State<LabConfig>,
    sample_id: Option<String>,
    paging: PageParams,
) -> ApiResult<Json<Page<DerivedSample>>> {
    let window = paging.window(config)?;
    Ok(Json(db.run(move |c| list(c, &user.workspace_id, sample_id, window)).await?))
}

#[post("/", data = "<input>")]
async fn create_route(
    user: AuthUser,
    db: LabDatabase,
    config: &State<LabConfig>,
    input: Json<NewDerivedSample>,
) -> ApiResult<Created<Json<DerivedSample>>> {
    user.require_write()?;
    let config = config.inner().clone();
    let input = input.into_inner();
    let derived = db.run(move |c| create(c, &config, &user, input)).await?;
    Ok(Created::new(format!("/api/derived-samples/{}", derived.id)).body(Json(derived)))
}

#[get("/<id>")]
async fn get_route(user: AuthUser, db: LabDatabase, id: String) -> ApiResult<Json<DerivedSample>> {
    Ok(Json(db.run(move |c| find(c, &user.workspace_id, &id)).await?))
}

#[delete("/<id>")]
async fn delete_route(user: AuthUser, db: LabDatabase, id: String) -> ApiResult<Json<Value>> {
    user.require_write()?;
    db.run(move |c| soft_delete(c, &user, &id)).await?;
    Ok(Json(json!({ "deleted": true })))
}

pub fn routes() -> Vec<Route> {
    routes![list_route, create_route, get_route, delete_route]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{register_workspace, sample_fixture, TestLab};
    use rocket::http::Status;

    fn row(id: &str, parent: Option<&str>) -> DerivedSample {
        DerivedSample {
            id: id.to_string(),
            workspace_id: String::from("w"),
            sample_id: String::from("s"),
            parent_id: parent.map(String::from),
            name: id.to_string(),
            derivation: String::from("aliquot"),
            depth: 1,
            created_by: String::from("u"),
            created_at: now(),
            deleted_at: None,
        }
    }

    #[test]
    fn tree_keeps_creation_order() {
        let tree = build_tree(vec![
            row("a", None),
            row("b", None),
            row("a1", Some("a")),
            row("a2", Some("a")),
            row("a1x", Some("a1")),
        ]);
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].derived.id, "a");
        let kids: Vec<&str> = tree[0].children.iter().map(|n| n.derived.id.as_str()).collect();
        assert_eq!(kids, vec!["a1", "a2"]);
        assert_eq!(tree[0].children[0].children[0].derived.id, "a1x");
        assert!(tree[1].children.is_empty());
    }

    #[test]
    fn depth_follows_parents_and_is_capped() {
        let lab = TestLab::with_settings(&[("max_lineage_depth", 2)]);
        let admin = register_workspace(&lab, "Lineage Lab", "admin@lineage.lab");
        let fixture = sample_fixture(&admin);

        let child = admin.post(
            "/api/derived-samples",
            json!({ "parent_id": fixture.derived_id, "name": "library", "derivation": "library prep" }),
        );
        assert_eq!(child["depth"], 2);
        assert_eq!(child["sample_id"], fixture.sample_id.as_str());

        let (status, body) = admin.post_status(
            "/api/derived-samples",
            json!({ "parent_id": child["id"], "name": "too deep", "derivation": "pool" }),
        );
        assert_eq!(status, Status::BadRequest, "{}", body);
    }

    #[test]
    fn parent_and_sample_must_agree() {
        let lab = TestLab::new();
        let admin = register_workspace(&lab, "Lineage Lab", "admin@lineage.lab");
        let fixture = sample_fixture(&admin);
        let other = admin.post(
            "/api/samples",
            json!({ "project_id": fixture.project_id, "name": "PB-002", "sample_type": "blood" }),
        );

        let (status, _) = admin.post_status(
            "/api/derived-samples",
            json!({ "sample_id": other["id"], "parent_id": fixture.derived_id, "name": "x", "derivation": "y" }),
        );
        assert_eq!(status, Status::BadRequest);
        let (status, _) = admin.post_status("/api/derived-samples", json!({ "name": "x", "derivation": "y" }));
        assert_eq!(status, Status::BadRequest);
    }

    #[test]
    fn lineage_tree_and_guarded_delete() {
        let lab = TestLab::new();
        let admin = register_workspace(&lab, "Lineage Lab", "admin@lineage.lab");
        let fixture = sample_fixture(&admin);
        let child = admin.post(
            "/api/derived-samples",
            json!({ "parent_id": fixture.derived_id, "name": "library", "derivation": "library prep" }),
        );
        admin.post(
            "/api/derived-samples",
            json!({ "sample_id": fixture.sample_id, "name": "RNA", "derivation": "extraction" }),
        );

        let (status, lineage) = admin.get(&format!("/api/samples/{}/lineage", fixture.sample_id));
        assert_eq!(status, Status::Ok);
        assert_eq!(lineage["sample"]["id"], fixture.sample_id.as_str());
        let roots = lineage["derived"].as_array().unwrap();
        assert_eq!(roots.len(), 2);
        assert_eq!(roots[0]["name"], "PB-001-DNA");
        assert_eq!(roots[0]["children"][0]["name"], "library");

        let parent_uri = format!("/api/derived-samples/{}", fixture.derived_id);
        assert_eq!(admin.delete(&parent_uri).0, Status::Conflict);
        assert_eq!(admin.delete(&format!("/api/derived-samples/{}", child["id"].as_str().unwrap())).0, Status::Ok);
        assert_eq!(admin.delete(&parent_uri).0, Status::Ok);

        let (_, page) = admin.get(&format!("/api/derived-samples?sample_id={}", fixture.sample_id));
        assert_eq!(page["total"], 1);
    }
}
