use rocket::fairing::{self, AdHoc};
use rocket::figment::Figment;
use rocket::http::Status;
use rocket::serde::json::{Json, Value};
use rocket::{Build, Request, Rocket};

use crate::config::LabConfig;
use crate::db::LabDatabase;
use crate::error::error_body;
use crate::{analyses, audit, auth, batches, lineage, notify, organizations, projects, samples, trials, workspaces};

#[get("/health")]
fn health() -> Json<Value> {
    Json(rocket::serde::json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// Renders guard failures and unmatched routes in the same shape as `ApiError`.
/// Rocket answers unparseable bodies and query values with 422; clients get 400.
#[catch(default)]
fn default_catcher(status: Status, req: &Request<'_>) -> (Status, Json<Value>) {
    debug!("{} {} caught: {}", req.method(), req.uri(), status);
    let (status, message) = match status.code {
        400 | 422 => (Status::BadRequest, "request could not be parsed"),
        401 => (status, "authentication required"),
        404 => (status, "no such resource"),
        _ => (status, status.reason_lossy()),
    };
    (status, Json(error_body(status, message)))
}

async fn prepare_schema(rocket: Rocket<Build>) -> fairing::Result {
    let conn = match LabDatabase::get_one(&rocket).await {
        Some(conn) => conn,
        None => {
            error!("No database connection available, cannot prepare schema");
            return Err(rocket);
        }
    };
    match conn.run(|c| crate::db::initialize(c, false)).await {
        Ok(()) => {
            info!("Database schema is ready");
            Ok(rocket)
        }
        Err(e) => {
            error!("Could not initialize database schema: {}", e);
            Err(rocket)
        }
    }
}

pub fn build(figment: Figment) -> Rocket<Build> {
    rocket::custom(figment)
        .attach(LabDatabase::fairing())
        .attach(AdHoc::try_on_ignite("Database schema", prepare_schema))
        .attach(AdHoc::config::<LabConfig>())
        .register("/", catchers![default_catcher])
        .mount("/api", routes![health])
        .mount("/api/auth", auth::routes())
        .mount("/api/workspace", workspaces::workspace_routes())
        .mount("/api/users", workspaces::user_routes())
        .mount("/api/organizations", organizations::routes())
        .mount("/api/projects", projects::routes())
        .mount("/api/samples", samples::routes())
        .mount("/api/derived-samples", lineage::routes())
        .mount("/api/trials", trials::routes())
        .mount("/api/batches", batches::routes())
        .mount("/api/analysis-types", analyses::type_routes())
        .mount("/api/analyses", analyses::routes())
        .mount("/api/notifications", notify::routes())
        .mount("/api/audit", audit::routes())
}

pub fn launch(figment: Figment) -> Result<(), rocket::Error> {
    rocket::execute(async move {
        if let Err(e) = build(figment).launch().await {
            error!("Could not launch rocket: {}", e);
            return Err(e);
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use crate::testing::{register_workspace, TestLab};
    use rocket::http::Status;
    use serde_json::json;

    #[test]
    fn health_and_json_404() {
        let lab = TestLab::new();
        let res = lab.client.get("/api/health").dispatch();
        assert_eq!(res.status(), Status::Ok);

        let res = lab.client.get("/api/nothing-here").dispatch();
        assert_eq!(res.status(), Status::NotFound);
        let body: serde_json::Value = res.into_json().unwrap();
        assert_eq!(body["status"], 404);
    }

    #[test]
    fn unparseable_input_is_400() {
        let lab = TestLab::new();
        let admin = register_workspace(&lab, "Parse Lab", "admin@parse.lab");

        let (status, body) = admin.post_status("/api/projects", json!({}));
        assert_eq!(status, Status::BadRequest);
        assert_eq!(body["status"], 400);

        let (status, _) = admin.post_status("/api/projects", json!({ "name": 7 }));
        assert_eq!(status, Status::BadRequest);

        let (status, body) = admin.get("/api/projects?page=abc");
        assert_eq!(status, Status::BadRequest);
        assert_eq!(body["status"], 400);

        assert_eq!(admin.get("/api/analyses?authoritative=maybe").0, Status::BadRequest);
        assert_eq!(admin.get("/api/projects?page=0").0, Status::BadRequest);
    }
}
