//! Registration, login sessions and the `AuthUser` request guard.
//!
//! Clients authenticate with `Authorization: Bearer <token>`. Tokens are
//! opaque random strings stored in the `sessions` table together with their
//! expiry. Every other module scopes its queries by the workspace of the
//! `AuthUser` that the guard resolves.
//!
//! The guard borrows a pooled connection of its own and returns it before the
//! handler's `LabDatabase` guard runs, so handlers list `AuthUser` first.

use std::fmt;
use std::str::FromStr;

use chrono::{Duration, NaiveDateTime};
use diesel::prelude::*;
use lazy_static::lazy_static;
use regex::Regex;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};
use rocket::response::status::Created;
use rocket::serde::json::Json;
use rocket::{Route, State};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::audit;
use crate::config::LabConfig;
use crate::db::{new_id, now, AnyConnection, LabDatabase};
use crate::error::{ApiError, ApiResult};
use crate::models::{Session, User, Workspace};
use crate::schema::{sessions, users, workspaces};

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Member,
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Member => "member",
            Role::Viewer => "viewer",
        }
    }
}

impl FromStr for Role {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "member" => Ok(Role::Member),
            "viewer" => Ok(Role::Viewer),
            other => Err(ApiError::validation(format!(
                "unknown role '{}', expected admin, member or viewer",
                other
            ))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The authenticated caller of a request
#[derive(Debug, Clone, Serialize)]
pub struct AuthUser {
    pub id: String,
    pub workspace_id: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    #[serde(skip_serializing)]
    pub token: String,
}

impl AuthUser {
    fn from_user(user: &User, token: &str) -> ApiResult<Self> {
        Ok(AuthUser {
            id: user.id.clone(),
            workspace_id: user.workspace_id.clone(),
            email: user.email.clone(),
            name: user.name.clone(),
            role: user.role.parse()?,
            token: token.to_string(),
        })
    }

    /// Viewers may only read.
    pub fn require_write(&self) -> ApiResult<()> {
        if self.role == Role::Viewer {
            return Err(ApiError::forbidden("viewers have read-only access"));
        }
        Ok(())
    }

    pub fn require_admin(&self) -> ApiResult<()> {
        if self.role != Role::Admin {
            return Err(ApiError::forbidden("this action requires the admin role"));
        }
        Ok(())
    }
}

fn bearer_token<'a>(req: &'a Request<'_>) -> Option<&'a str> {
    req.headers()
        .get_one("Authorization")
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthUser {
    type Error = ApiError;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let token = match bearer_token(req) {
            Some(t) => t.to_string(),
            None => {
                return Outcome::Error((
                    Status::Unauthorized,
                    ApiError::Unauthorized(String::from("missing bearer token")),
                ))
            }
        };

        let db = match req.guard::<LabDatabase>().await {
            Outcome::Success(db) => db,
            _ => {
                error!("No database connection available for authentication");
                return Outcome::Error((
                    Status::ServiceUnavailable,
                    ApiError::Internal(String::from("database unavailable")),
                ));
            }
        };

        match db.run(move |c| user_for_token(c, &token)).await {
            Ok(Some(user)) => Outcome::Success(user),
            Ok(None) => Outcome::Error((
                Status::Unauthorized,
                ApiError::Unauthorized(String::from("invalid or expired token")),
            )),
            Err(e) => Outcome::Error((e.status(), e)),
        }
    }
}

lazy_static! {
    static ref RE_EMAIL: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    static ref RE_SLUG_SEP: Regex = Regex::new(r"[^a-z0-9]+").unwrap();
}

pub(crate) fn normalize_email(email: &str) -> ApiResult<String> {
    let email = email.trim().to_lowercase();
    if !RE_EMAIL.is_match(&email) {
        return Err(ApiError::validation(format!("'{}' is not a valid e-mail address", email)));
    }
    Ok(email)
}

/// Turns a workspace name into its URL slug, e.g. "Kiel Haematology Lab" -> "kiel-haematology-lab"
pub(crate) fn slugify(name: &str) -> String {
    RE_SLUG_SEP
        .replace_all(&name.trim().to_lowercase(), "-")
        .trim_matches('-')
        .to_string()
}

pub(crate) fn check_password(password: &str) -> ApiResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::validation(format!(
            "password must have at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

pub(crate) fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn verify_password(user: &User, password: &str) -> bool {
    let candidate = hash_password(&user.password_salt, password);
    // compare without short-circuiting on the first mismatch
    candidate.len() == user.password_hash.len()
        && candidate
            .bytes()
            .zip(user.password_hash.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

fn new_token() -> String {
    format!(
        "{}{}",
        uuid::Uuid::new_v4().simple(),
        uuid::Uuid::new_v4().simple()
    )
}

/// Builds a user row with a fresh salt. Does not touch the database.
pub(crate) fn new_user(
    workspace_id: &str,
    email: &str,
    name: &str,
    password: &str,
    role: Role,
) -> ApiResult<User> {
    let email = normalize_email(email)?;
    let name = crate::validate::required("name", name)?;
    check_password(password)?;

    let salt = uuid::Uuid::new_v4().simple().to_string();
    Ok(User {
        id: new_id(),
        workspace_id: workspace_id.to_string(),
        email,
        name,
        role: role.as_str().to_string(),
        password_hash: hash_password(&salt, password),
        password_salt: salt,
        is_active: true,
        created_at: now(),
        last_login_at: None,
    })
}

pub(crate) fn email_taken(c: &mut AnyConnection, email: &str) -> ApiResult<bool> {
    let count: i64 = users::table
        .filter(users::email.eq(email))
        .count()
        .get_result(c)?;
    Ok(count > 0)
}

#[derive(Debug, Deserialize)]
pub struct RegisterInput {
    pub workspace_name: String,
    pub email: String,
    pub name: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginInput {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct SessionInfo {
    pub token: String,
    pub expires_at: NaiveDateTime,
    pub user: User,
    pub workspace: Workspace,
}

/// Creates a workspace and its first admin in one transaction.
pub fn create_workspace_with_admin(
    c: &mut AnyConnection,
    input: &RegisterInput,
) -> ApiResult<(Workspace, User)> {
    let workspace_name = crate::validate::required("workspace_name", &input.workspace_name)?;
    let slug = slugify(&workspace_name);
    if slug.is_empty() {
        return Err(ApiError::validation(
            "workspace_name must contain at least one letter or digit",
        ));
    }

    let workspace = Workspace {
        id: new_id(),
        name: workspace_name,
        slug,
        created_at: now(),
    };
    let admin = new_user(
        &workspace.id,
        &input.email,
        &input.name,
        &input.password,
        Role::Admin,
    )?;

    c.transaction::<_, ApiError, _>(|c| {
        let slug_count: i64 = workspaces::table
            .filter(workspaces::slug.eq(&workspace.slug))
            .count()
            .get_result(c)?;
        if slug_count > 0 {
            return Err(ApiError::conflict(format!(
                "a workspace named '{}' already exists",
                workspace.name
            )));
        }
        if email_taken(c, &admin.email)? {
            return Err(ApiError::conflict(format!(
                "{} is already registered",
                admin.email
            )));
        }

        diesel::insert_into(workspaces::table)
            .values(&workspace)
            .execute(c)?;
        diesel::insert_into(users::table).values(&admin).execute(c)?;

        let actor = AuthUser::from_user(&admin, "")?;
        audit::record(
            c,
            &actor,
            "workspace.create",
            "workspace",
            &workspace.id,
            Some(json!({ "name": workspace.name, "slug": workspace.slug })),
        )?;
        Ok(())
    })?;

    info!("Registered workspace {} with admin {}", workspace.slug, admin.email);
    Ok((workspace, admin))
}

fn open_session(c: &mut AnyConnection, user: &User, config: &LabConfig) -> ApiResult<Session> {
    let created_at = now();
    let session = Session {
        token: new_token(),
        user_id: user.id.clone(),
        created_at,
        expires_at: created_at + Duration::hours(config.session_hours),
    };

    // housekeeping: forget this user's expired sessions
    diesel::delete(
        sessions::table
            .filter(sessions::user_id.eq(&user.id))
            .filter(sessions::expires_at.le(created_at)),
    )
    .execute(c)?;

    diesel::insert_into(sessions::table)
        .values(&session)
        .execute(c)?;
    diesel::update(users::table.find(&user.id))
        .set(users::last_login_at.eq(Some(created_at)))
        .execute(c)?;
    Ok(session)
}

fn load_workspace(c: &mut AnyConnection, id: &str) -> ApiResult<Workspace> {
    workspaces::table
        .find(id)
        .first(c)
        .optional()?
        .ok_or(ApiError::NotFound("workspace"))
}

pub fn login(c: &mut AnyConnection, input: &LoginInput, config: &LabConfig) -> ApiResult<SessionInfo> {
    let email = input.email.trim().to_lowercase();
    let user: Option<User> = users::table
        .filter(users::email.eq(&email))
        .first(c)
        .optional()?;

    // same message for all failures so accounts can't be probed
    let user = match user {
        Some(u) if u.is_active && verify_password(&u, &input.password) => u,
        _ => {
            warn!("Failed login for {}", email);
            return Err(ApiError::Unauthorized(String::from("invalid e-mail or password")));
        }
    };

    let session = open_session(c, &user, config)?;
    let workspace = load_workspace(c, &user.workspace_id)?;
    debug!("{} logged in", user.email);
    Ok(SessionInfo {
        token: session.token,
        expires_at: session.expires_at,
        user,
        workspace,
    })
}

pub fn user_for_token(c: &mut AnyConnection, token: &str) -> ApiResult<Option<AuthUser>> {
    let user: Option<User> = sessions::table
        .inner_join(users::table)
        .filter(sessions::token.eq(token))
        .filter(sessions::expires_at.gt(now()))
        .filter(users::is_active.eq(true))
        .select(users::all_columns)
        .first(c)
        .optional()?;

    user.map(|u| AuthUser::from_user(&u, token)).transpose()
}

/// Drops all sessions of a user, e.g. after deactivation
pub(crate) fn end_sessions(c: &mut AnyConnection, user_id: &str) -> ApiResult<usize> {
    Ok(diesel::delete(sessions::table.filter(sessions::user_id.eq(user_id))).execute(c)?)
}

#[post("/register", data = "<input>")]
async fn register(
    db: LabDatabase,
    config: &State<LabConfig>,
    input: Json<RegisterInput>,
) -> ApiResult<Created<Json<SessionInfo>>> {
    let config = config.inner().clone();
    let input = input.into_inner();
    let info = db
        .run(move |c| {
            let (_, admin) = create_workspace_with_admin(c, &input)?;
            login(
                c,
                &LoginInput {
                    email: admin.email,
                    password: input.password,
                },
                &config,
            )
        })
        .await?;
    Ok(Created::new("/api/auth/me").body(Json(info)))
}

#[post("/login", data = "<input>")]
async fn login_route(
    db: LabDatabase,
    config: &State<LabConfig>,
    input: Json<LoginInput>,
) -> ApiResult<Json<SessionInfo>> {
    let config = config.inner().clone();
    let input = input.into_inner();
    Ok(Json(db.run(move |c| login(c, &input, &config)).await?))
}

#[post("/logout")]
async fn logout(user: AuthUser, db: LabDatabase) -> ApiResult<Json<serde_json::Value>> {
    let token = user.token.clone();
    db.run(move |c| diesel::delete(sessions::table.find(token)).execute(c))
        .await?;
    Ok(Json(json!({ "logged_out": true })))
}

#[get("/me")]
async fn me(user: AuthUser) -> Json<AuthUser> {
    Json(user)
}

pub fn routes() -> Vec<Route> {
    routes![register, login_route, logout, me]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{register_workspace, TestLab};
    use rocket::http::{ContentType, Header, Status};

    #[test]
    fn slugs() {
        assert_eq!(slugify("Kiel Haematology Lab"), "kiel-haematology-lab");
        assert_eq!(slugify("  ACME -- Bio/Labs! "), "acme-bio-labs");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn password_hashes_are_salted() {
        let a = hash_password("salt-a", "correct horse");
        let b = hash_password("salt-b", "correct horse");
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
        assert_eq!(a, hash_password("salt-a", "correct horse"));
    }

    #[test]
    fn email_validation() {
        assert_eq!(normalize_email(" Ann@Lab.ORG ").unwrap(), "ann@lab.org");
        assert!(normalize_email("ann.lab.org").is_err());
        assert!(normalize_email("ann@lab").is_err());
    }

    #[test]
    fn register_login_and_logout() {
        let lab = TestLab::new();
        let ws = register_workspace(&lab, "Blood Lab", "ann@blood.lab");

        let res = lab
            .client
            .get("/api/auth/me")
            .header(Header::new("Authorization", format!("Bearer {}", ws.token)))
            .dispatch();
        assert_eq!(res.status(), Status::Ok);
        let body: serde_json::Value = res.into_json().unwrap();
        assert_eq!(body["email"], "ann@blood.lab");
        assert_eq!(body["role"], "admin");

        let res = lab
            .client
            .post("/api/auth/login")
            .header(ContentType::JSON)
            .body(r#"{"email":"ANN@blood.lab","password":"wrong password"}"#)
            .dispatch();
        assert_eq!(res.status(), Status::Unauthorized);

        let res = lab
            .client
            .post("/api/auth/login")
            .header(ContentType::JSON)
            .body(r#"{"email":"ANN@blood.lab","password":"secret-password"}"#)
            .dispatch();
        assert_eq!(res.status(), Status::Ok);
        let body: serde_json::Value = res.into_json().unwrap();
        assert!(body["user"].get("password_hash").is_none());
        let second_token = body["token"].as_str().unwrap().to_string();

        let res = lab
            .client
            .post("/api/auth/logout")
            .header(Header::new("Authorization", format!("Bearer {}", second_token)))
            .dispatch();
        assert_eq!(res.status(), Status::Ok);

        let res = lab
            .client
            .get("/api/auth/me")
            .header(Header::new("Authorization", format!("Bearer {}", second_token)))
            .dispatch();
        assert_eq!(res.status(), Status::Unauthorized);
        let body: serde_json::Value = res.into_json().unwrap();
        assert_eq!(body["status"], 401);

        // the first session is unaffected
        let res = lab
            .client
            .get("/api/auth/me")
            .header(Header::new("Authorization", format!("Bearer {}", ws.token)))
            .dispatch();
        assert_eq!(res.status(), Status::Ok);
    }

    #[test]
    fn duplicate_workspace_or_email_conflicts() {
        let lab = TestLab::new();
        register_workspace(&lab, "Blood Lab", "ann@blood.lab");

        let res = lab
            .client
            .post("/api/auth/register")
            .header(ContentType::JSON)
            .body(r#"{"workspace_name":"blood lab","email":"bob@x.org","name":"Bob","password":"secret-password"}"#)
            .dispatch();
        assert_eq!(res.status(), Status::Conflict);

        let res = lab
            .client
            .post("/api/auth/register")
            .header(ContentType::JSON)
            .body(r#"{"workspace_name":"Other Lab","email":"ann@blood.lab","name":"Ann","password":"secret-password"}"#)
            .dispatch();
        assert_eq!(res.status(), Status::Conflict);
    }

    #[test]
    fn missing_or_bogus_token_is_401() {
        let lab = TestLab::new();
        assert_eq!(lab.client.get("/api/auth/me").dispatch().status(), Status::Unauthorized);
        let res = lab
            .client
            .get("/api/projects")
            .header(Header::new("Authorization", "Bearer not-a-token"))
            .dispatch();
        assert_eq!(res.status(), Status::Unauthorized);
    }

    #[test]
    fn expired_sessions_are_401_and_purged_on_login() {
        let lab = TestLab::new();
        let admin = register_workspace(&lab, "Clock Lab", "admin@clock.lab");
        let stale = Session {
            token: String::from("stale-session-token"),
            user_id: admin.id.clone(),
            created_at: now() - Duration::hours(48),
            expires_at: now() - Duration::hours(1),
        };
        let mut c = lab.conn();
        diesel::insert_into(sessions::table).values(&stale).execute(&mut c).unwrap();

        let res = lab
            .client
            .get("/api/auth/me")
            .header(Header::new("Authorization", "Bearer stale-session-token"))
            .dispatch();
        assert_eq!(res.status(), Status::Unauthorized);
        assert_eq!(admin.get("/api/auth/me").0, Status::Ok);

        crate::testing::login(&lab, "admin@clock.lab");
        let left: i64 = sessions::table
            .filter(sessions::token.eq("stale-session-token"))
            .count()
            .get_result(&mut c)
            .unwrap();
        assert_eq!(left, 0);
    }

    #[test]
    fn short_passwords_are_rejected() {
        let lab = TestLab::new();
        let res = lab
            .client
            .post("/api/auth/register")
            .header(ContentType::JSON)
            .body(r#"{"workspace_name":"Lab","email":"a@b.org","name":"A","password":"short"}"#)
            .dispatch();
        assert_eq!(res.status(), Status::BadRequest);
    }
}
