//! Test harness: a full Rocket instance on a throwaway SQLite file.

use rocket::figment::providers::Serialized;
use rocket::figment::util::map;
use rocket::figment::value::{Map, Value as FigmentValue};
use rocket::http::{ContentType, Header, Status};
use rocket::local::blocking::{Client, LocalResponse};
use serde_json::{json, Value};
use tempfile::TempDir;

use crate::db::{self, AnyConnection};

pub const PASSWORD: &str = "secret-password";

pub struct TestLab {
    pub client: Client,
    db_url: String,
    _dir: TempDir,
}

impl TestLab {
    pub fn new() -> Self {
        Self::with_settings(&[])
    }

    /// Extra top-level settings, e.g. `("max_lineage_depth", 2)`
    pub fn with_settings(settings: &[(&str, i64)]) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let db_url = dir.path().join("mylab.sqlite").display().to_string();

        // a single pooled connection: SQLite allows one writer at a time anyway
        let db: Map<_, FigmentValue> = map! {
            "url" => db_url.clone().into(),
            "pool_size" => 1.into(),
        };
        // global values beat whatever profile Rocket.toml selects
        let mut figment = rocket::Config::figment()
            .merge(Serialized::global("databases", map!["mylab" => db]))
            .merge(Serialized::global("log_level", "off"));
        for (key, value) in settings {
            figment = figment.merge(Serialized::global(*key, *value));
        }

        let client = Client::tracked(crate::web::build(figment)).expect("valid rocket instance");
        TestLab {
            client,
            db_url,
            _dir: dir,
        }
    }

    /// A second connection to the same database, for poking at rows directly.
    pub fn conn(&self) -> AnyConnection {
        db::establish(&self.db_url).expect("test database")
    }
}

fn read_json(res: LocalResponse<'_>) -> (Status, Value) {
    let status = res.status();
    let body = res
        .into_string()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or(Value::Null);
    (status, body)
}

/// A logged-in user with helpers that send its bearer token.
pub struct TestUser<'a> {
    lab: &'a TestLab,
    pub token: String,
    pub id: String,
    pub workspace_id: String,
}

impl<'a> TestUser<'a> {
    fn auth(&self) -> Header<'static> {
        Header::new("Authorization", format!("Bearer {}", self.token))
    }

    pub fn get(&self, uri: &str) -> (Status, Value) {
        read_json(self.lab.client.get(uri).header(self.auth()).dispatch())
    }

    pub fn get_text(&self, uri: &str) -> (Status, String) {
        let res = self.lab.client.get(uri).header(self.auth()).dispatch();
        (res.status(), res.into_string().unwrap_or_default())
    }

    pub fn post_status(&self, uri: &str, body: Value) -> (Status, Value) {
        read_json(
            self.lab
                .client
                .post(uri)
                .header(ContentType::JSON)
                .header(self.auth())
                .body(body.to_string())
                .dispatch(),
        )
    }

    /// POST that is expected to succeed; returns the body.
    pub fn post(&self, uri: &str, body: Value) -> Value {
        let (status, value) = self.post_status(uri, body);
        assert!(
            status.class().is_success(),
            "POST {} failed with {}: {}",
            uri,
            status,
            value
        );
        value
    }

    pub fn patch(&self, uri: &str, body: Value) -> (Status, Value) {
        read_json(
            self.lab
                .client
                .patch(uri)
                .header(ContentType::JSON)
                .header(self.auth())
                .body(body.to_string())
                .dispatch(),
        )
    }

    pub fn put(&self, uri: &str, body: Value) -> (Status, Value) {
        read_json(
            self.lab
                .client
                .put(uri)
                .header(ContentType::JSON)
                .header(self.auth())
                .body(body.to_string())
                .dispatch(),
        )
    }

    pub fn delete(&self, uri: &str) -> (Status, Value) {
        read_json(self.lab.client.delete(uri).header(self.auth()).dispatch())
    }

    /// Lets this (admin) user create another account and logs it in.
    pub fn add_user(&self, email: &str, role: &str) -> TestUser<'a> {
        self.post(
            "/api/users",
            json!({ "email": email, "name": email, "password": PASSWORD, "role": role }),
        );
        login(self.lab, email)
    }
}

pub fn login<'a>(lab: &'a TestLab, email: &str) -> TestUser<'a> {
    let res = lab
        .client
        .post("/api/auth/login")
        .header(ContentType::JSON)
        .body(json!({ "email": email, "password": PASSWORD }).to_string())
        .dispatch();
    let (status, body) = read_json(res);
    assert_eq!(status, Status::Ok, "login of {} failed: {}", email, body);
    session_user(lab, &body)
}

fn session_user<'a>(lab: &'a TestLab, body: &Value) -> TestUser<'a> {
    TestUser {
        lab,
        token: body["token"].as_str().expect("token").to_string(),
        id: body["user"]["id"].as_str().expect("user id").to_string(),
        workspace_id: body["workspace"]["id"].as_str().expect("workspace id").to_string(),
    }
}

/// Registers a new workspace and returns its admin.
pub fn register_workspace<'a>(lab: &'a TestLab, workspace: &str, email: &str) -> TestUser<'a> {
    let res = lab
        .client
        .post("/api/auth/register")
        .header(ContentType::JSON)
        .body(
            json!({
                "workspace_name": workspace,
                "email": email,
                "name": "Admin",
                "password": PASSWORD,
            })
            .to_string(),
        )
        .dispatch();
    let (status, body) = read_json(res);
    assert_eq!(status, Status::Created, "registration failed: {}", body);
    session_user(lab, &body)
}

/// Project, sample and one derived sample, ready to be batched.
pub struct Fixture {
    pub project_id: String,
    pub sample_id: String,
    pub derived_id: String,
}

pub fn sample_fixture(user: &TestUser<'_>) -> Fixture {
    let project = user.post("/api/projects", json!({ "name": "MRD study" }));
    let project_id = project["id"].as_str().unwrap().to_string();
    let sample = user.post(
        "/api/samples",
        json!({ "project_id": project_id, "name": "PB-001", "sample_type": "blood" }),
    );
    let sample_id = sample["id"].as_str().unwrap().to_string();
    let derived = user.post(
        "/api/derived-samples",
        json!({ "sample_id": sample_id, "name": "PB-001-DNA", "derivation": "extraction" }),
    );
    Fixture {
        project_id,
        sample_id,
        derived_id: derived["id"].as_str().unwrap().to_string(),
    }
}

/// A submitted batch holding the fixture's derived sample, plus an analysis type.
pub fn submitted_batch(user: &TestUser<'_>, fixture: &Fixture) -> (String, String) {
    let batch = user.post("/api/batches", json!({ "name": "Run 42" }));
    let batch_id = batch["id"].as_str().unwrap().to_string();
    user.post(
        &format!("/api/batches/{}/items", batch_id),
        json!({ "derived_sample_id": fixture.derived_id }),
    );
    user.post(&format!("/api/batches/{}/submit", batch_id), json!({}));
    let kind = user.post(
        "/api/analysis-types",
        json!({ "name": format!("qPCR {}", batch_id), "description": "quantitative PCR" }),
    );
    (batch_id, kind["id"].as_str().unwrap().to_string())
}
