//! Per-user notifications and the preferences that gate them.

use chrono::Duration;
use diesel::prelude::*;
use rocket::serde::json::Json;
use rocket::{Route, State};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::auth::AuthUser;
use crate::config::LabConfig;
use crate::db::{new_id, now, AnyConnection, LabDatabase, MultiBackend};
use crate::error::{ApiError, ApiResult};
use crate::models::{Notification, NotificationPreferences};
use crate::paging::{Page, PageParams, Window};
use crate::schema::{notification_preferences, notifications};
use crate::validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Analysis,
    Batch,
    Project,
}

impl Kind {
    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Analysis => "analysis",
            Kind::Batch => "batch",
            Kind::Project => "project",
        }
    }

    fn enabled(self, prefs: &NotificationPreferences) -> bool {
        match self {
            Kind::Analysis => prefs.analysis_updates,
            Kind::Batch => prefs.batch_updates,
            Kind::Project => prefs.project_updates,
        }
    }
}

/// Something a user may want to hear about.
pub struct Event<'a> {
    pub kind: Kind,
    pub title: String,
    pub message: String,
    pub entity_type: &'a str,
    pub entity_id: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct PreferencesUpdate {
    pub analysis_updates: Option<bool>,
    pub batch_updates: Option<bool>,
    pub project_updates: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct UnreadCount {
    pub unread: i64,
}

fn default_preferences(user_id: &str) -> NotificationPreferences {
    NotificationPreferences {
        user_id: user_id.to_string(),
        analysis_updates: true,
        batch_updates: true,
        project_updates: true,
        updated_at: now(),
    }
}

/// Stored preferences, or everything enabled if the user never changed them.
pub fn preferences(c: &mut AnyConnection, user_id: &str) -> ApiResult<NotificationPreferences> {
    let stored = notification_preferences::table
        .find(user_id)
        .first(c)
        .optional()?;
    Ok(stored.unwrap_or_else(|| default_preferences(user_id)))
}

/// Creates a notification for `recipient` unless they opted out of its kind.
/// Returns whether one was created.
pub fn emit(
    c: &mut AnyConnection,
    config: &LabConfig,
    workspace_id: &str,
    recipient: &str,
    event: Event<'_>,
) -> ApiResult<bool> {
    let prefs = preferences(c, recipient)?;
    if !event.kind.enabled(&prefs) {
        debug!("{} muted {} notifications", recipient, event.kind.as_str());
        return Ok(false);
    }

    let created_at = now();
    let expires_at = if config.notification_ttl_days > 0 {
        Some(created_at + Duration::days(config.notification_ttl_days))
    } else {
        None
    };
    let n = Notification {
        id: new_id(),
        workspace_id: workspace_id.to_string(),
        user_id: recipient.to_string(),
        kind: event.kind.as_str().to_string(),
        title: event.title,
        message: event.message,
        entity_type: Some(event.entity_type.to_string()),
        entity_id: Some(event.entity_id.to_string()),
        is_read: false,
        created_at,
        expires_at,
    };
    diesel::insert_into(notifications::table).values(&n).execute(c)?;
    Ok(true)
}

/// The caller's notifications that have not expired yet.
fn visible(user_id: &str, unread_only: bool) -> notifications::BoxedQuery<'static, MultiBackend> {
    let mut q = notifications::table
        .filter(notifications::user_id.eq(user_id.to_string()))
        .filter(
            notifications::expires_at
                .is_null()
                .or(notifications::expires_at.gt(now())),
        )
        .into_boxed();
    if unread_only {
        q = q.filter(notifications::is_read.eq(false));
    }
    q
}

fn list(c: &mut AnyConnection, user_id: &str, unread_only: bool, window: Window) -> ApiResult<Page<Notification>> {
    let total: i64 = visible(user_id, unread_only).count().get_result(c)?;
    let items = visible(user_id, unread_only)
        .order((notifications::created_at.desc(), notifications::id.desc()))
        .limit(window.limit)
        .offset(window.offset())
        .load(c)?;
    Ok(Page::new(items, window, total))
}

fn find(c: &mut AnyConnection, user_id: &str, id: &str) -> ApiResult<Notification> {
    notifications::table
        .filter(notifications::id.eq(id))
        .filter(notifications::user_id.eq(user_id))
        .first(c)
        .optional()?
        .ok_or(ApiError::NotFound("notification"))
}

fn mark_read(c: &mut AnyConnection, user_id: &str, id: &str) -> ApiResult<Notification> {
    let n = find(c, user_id, id)?;
    diesel::update(notifications::table.find(&n.id))
        .set(notifications::is_read.eq(true))
        .execute(c)?;
    find(c, user_id, &n.id)
}

fn mark_all_read(c: &mut AnyConnection, user_id: &str) -> ApiResult<usize> {
    Ok(diesel::update(
        notifications::table
            .filter(notifications::user_id.eq(user_id))
            .filter(notifications::is_read.eq(false)),
    )
    .set(notifications::is_read.eq(true))
    .execute(c)?)
}

fn remove(c: &mut AnyConnection, user_id: &str, id: &str) -> ApiResult<()> {
    let n = find(c, user_id, id)?;
    diesel::delete(notifications::table.find(&n.id)).execute(c)?;
    Ok(())
}

fn update_preferences(c: &mut AnyConnection, user_id: &str, input: PreferencesUpdate) -> ApiResult<NotificationPreferences> {
    c.transaction(|c| {
        let existing: Option<NotificationPreferences> = notification_preferences::table
            .find(user_id)
            .first(c)
            .optional()?;
        let base = existing.clone().unwrap_or_else(|| default_preferences(user_id));
        let prefs = NotificationPreferences {
            user_id: user_id.to_string(),
            analysis_updates: input.analysis_updates.unwrap_or(base.analysis_updates),
            batch_updates: input.batch_updates.unwrap_or(base.batch_updates),
            project_updates: input.project_updates.unwrap_or(base.project_updates),
            updated_at: now(),
        };
        if existing.is_some() {
            diesel::update(notification_preferences::table.find(user_id))
                .set(&prefs)
                .execute(c)?;
        } else {
            diesel::insert_into(notification_preferences::table)
                .values(&prefs)
                .execute(c)?;
        }
        Ok(prefs)
    })
}

#[get("/?<unread_only>&<paging..>")]
async fn list_route(
    user: AuthUser,
    db: LabDatabase,
    config: &State<LabConfig>,
    unread_only: Option<String>,
    paging: PageParams,
) -> ApiResult<Json<Page<Notification>>> {
    let window = paging.window(config)?;
    let unread_only = validate::flag("unread_only", unread_only.as_deref())?.unwrap_or(false);
    Ok(Json(db.run(move |c| list(c, &user.id, unread_only, window)).await?))
}

#[get("/unread-count")]
async fn unread_count_route(user: AuthUser, db: LabDatabase) -> ApiResult<Json<UnreadCount>> {
    let unread = db
        .run(move |c| -> ApiResult<i64> { Ok(visible(&user.id, true).count().get_result(c)?) })
        .await?;
    Ok(Json(UnreadCount { unread }))
}

#[post("/<id>/read")]
async fn read_route(user: AuthUser, db: LabDatabase, id: String) -> ApiResult<Json<Notification>> {
    Ok(Json(db.run(move |c| mark_read(c, &user.id, &id)).await?))
}

#[post("/read-all")]
async fn read_all_route(user: AuthUser, db: LabDatabase) -> ApiResult<Json<Value>> {
    let updated = db.run(move |c| mark_all_read(c, &user.id)).await?;
    Ok(Json(json!({ "updated": updated })))
}

#[delete("/<id>")]
async fn delete_route(user: AuthUser, db: LabDatabase, id: String) -> ApiResult<Json<Value>> {
    db.run(move |c| remove(c, &user.id, &id)).await?;
    Ok(Json(json!({ "deleted": true })))
}

#[get("/preferences")]
async fn preferences_route(user: AuthUser, db: LabDatabase) -> ApiResult<Json<NotificationPreferences>> {
    Ok(Json(db.run(move |c| preferences(c, &user.id)).await?))
}

#[put("/preferences", data = "<input>")]
async fn update_preferences_route(
    user: AuthUser,
    db: LabDatabase,
    input: Json<PreferencesUpdate>,
) -> ApiResult<Json<NotificationPreferences>> {
    let input = input.into_inner();
    Ok(Json(db.run(move |c| update_preferences(c, &user.id, input)).await?))
}

pub fn routes() -> Vec<Route> {
    routes![
        list_route,
        unread_count_route,
        read_route,
        read_all_route,
        delete_route,
        preferences_route,
        update_preferences_route
    ]
}
