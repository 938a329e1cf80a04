//! Credential checks for the administrative API.
//!
//! Endpoints (admin host only): `/api/auth/check`, `/api/auth/login`,
//! `/api/auth/register`, `/api/auth/any`.
//!
//! SECURITY: there is exactly one session token per process and every
//! successful login receives the same token. Anyone holding the cookie of one
//! user is authenticated as every user. Passwords are stored as unsalted
//! SHA-256 digests. Both are known weaknesses of this scheme.

use axum::http::{Method, StatusCode};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex, PoisonError};

use super::admin::{self, AdminHost};
use super::{Phases, PhaseResult, Policy, PolicyError, Verdict};
use crate::flow::{Flow, FlowResponse, CONTENT_TYPE_JSON};
use crate::observability::metrics;
use crate::store::{ConfigStore, StoreError, UserRecord, USERS};

pub const ID: &str = "auth";
pub const SESSION_COOKIE: &str = "session";
const TOKEN_LEN: usize = 20;

/// Process-wide session token.
///
/// Generated once at startup, held for the process lifetime and never
/// persisted; a restart logs everybody out. Shared by all users.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn generate() -> Self {
        let token = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(TOKEN_LEN)
            .map(char::from)
            .collect();
        Self(token)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, candidate: Option<&str>) -> bool {
        candidate == Some(self.0.as_str())
    }
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionToken(..)")
    }
}

/// Hex SHA-256 digest of a password.
pub fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Deserialize)]
struct Credentials {
    username: Option<String>,
    password: Option<String>,
}

enum Registration {
    PasswordTaken,
    UsernameTaken,
    Created,
}

pub struct AuthPolicy {
    store: Arc<ConfigStore>,
    admin: AdminHost,
    session: Arc<SessionToken>,
    require_session: bool,
    registration: Mutex<()>,
}

impl AuthPolicy {
    pub fn new(
        store: Arc<ConfigStore>,
        admin: AdminHost,
        session: Arc<SessionToken>,
        require_session: bool,
    ) -> Self {
        Self {
            store,
            admin,
            session,
            require_session,
            registration: Mutex::new(()),
        }
    }

    pub fn is_logged_in(&self, flow: &dyn Flow) -> bool {
        self.session.matches(flow.cookie(SESSION_COOKIE).as_deref())
    }

    fn check(&self, flow: &mut dyn Flow) -> Result<(), PolicyError> {
        if self.is_logged_in(flow) {
            admin::respond_json(
                flow,
                StatusCode::OK,
                &json!({"authenticated": true, "message": "user is authenticated"}),
            )?;
        } else {
            admin::respond_json(
                flow,
                StatusCode::FORBIDDEN,
                &json!({"authenticated": false, "message": "user is not authenticated"}),
            )?;
        }
        Ok(())
    }

    fn any_user(&self, flow: &mut dyn Flow) -> Result<(), PolicyError> {
        let exists = !self.store.fetch_all(USERS).is_empty();
        let status = if exists { StatusCode::OK } else { StatusCode::FORBIDDEN };
        admin::respond_json(flow, status, &json!({ "user_exist": exists }))?;
        Ok(())
    }

    fn credentials(flow: &mut dyn Flow) -> Result<Option<(String, String)>, PolicyError> {
        let parsed = admin::parse_body::<Credentials>(flow)
            .ok()
            .and_then(|c| Some((admin::non_empty(c.username)?, c.password.filter(|p| !p.is_empty())?)));
        if parsed.is_none() {
            admin::respond_json(
                flow,
                StatusCode::BAD_REQUEST,
                &json!({"message": "Username and password are required"}),
            )?;
        }
        Ok(parsed)
    }

    fn register(&self, flow: &mut dyn Flow) -> Result<(), PolicyError> {
        let Some((username, password)) = Self::credentials(flow)? else {
            return Ok(());
        };
        let hashed = hash_password(&password);

        let outcome = {
            let _guard = self.registration.lock().unwrap_or_else(PoisonError::into_inner);
            self.try_register(&username, hashed)
        };

        match outcome {
            Ok(Registration::Created) => {
                tracing::info!(username = %username, "User registered");
                metrics::record_admin_mutation(ID, "ok");
                admin::respond_json(flow, StatusCode::OK, &json!({"message": "You have registered."}))?;
            }
            Ok(Registration::PasswordTaken) => {
                admin::respond_json(flow, StatusCode::FORBIDDEN, &json!({"message": "Try another password"}))?;
            }
            Ok(Registration::UsernameTaken) => {
                admin::respond_json(flow, StatusCode::FORBIDDEN, &json!({"message": "Username already taken"}))?;
            }
            Err(e) => {
                tracing::error!(username = %username, error = %e, "Failed to store user");
                admin::storage_failure(flow, ID)?;
            }
        }
        Ok(())
    }

    fn try_register(&self, username: &str, hashed: String) -> Result<Registration, StoreError> {
        if !self.store.search(USERS, "password", &json!(hashed)).is_empty() {
            return Ok(Registration::PasswordTaken);
        }
        if !self.store.search(USERS, "user-name", &json!(username)).is_empty() {
            return Ok(Registration::UsernameTaken);
        }
        self.store.insert(
            USERS,
            UserRecord {
                username: username.to_string(),
                password: hashed,
            },
        )?;
        Ok(Registration::Created)
    }

    fn login(&self, flow: &mut dyn Flow) -> Result<(), PolicyError> {
        let Some((username, password)) = Self::credentials(flow)? else {
            return Ok(());
        };

        let user = self
            .store
            .search_as::<UserRecord>(USERS, "user-name", &json!(username))?
            .into_iter()
            .next();

        match user {
            Some(user) if user.password == hash_password(&password) => {
                tracing::info!(username = %username, "User logged in");
                let body = json!({"message": "You are logged in."}).to_string();
                flow.commit(
                    FlowResponse::new(StatusCode::OK, body, CONTENT_TYPE_JSON)
                        .with_cookie(SESSION_COOKIE, self.session.as_str()),
                )?;
            }
            _ => {
                tracing::warn!(username = %username, "Login rejected");
                admin::respond_json(flow, StatusCode::FORBIDDEN, &json!({"message": "Invalid credentials"}))?;
            }
        }
        Ok(())
    }

    fn post_only(
        &self,
        flow: &mut dyn Flow,
        handler: fn(&Self, &mut dyn Flow) -> Result<(), PolicyError>,
    ) -> Result<(), PolicyError> {
        if flow.request().method == Method::POST {
            handler(self, flow)
        } else {
            admin::method_not_allowed(flow).map_err(PolicyError::from)
        }
    }
}

impl Policy for AuthPolicy {
    fn id(&self) -> &'static str {
        ID
    }

    fn title(&self) -> &'static str {
        "Auth"
    }

    fn phases(&self) -> Phases {
        Phases::REQUEST
    }

    fn on_request(&self, flow: &mut dyn Flow) -> PhaseResult {
        if !self.admin.is_admin(flow) {
            return Ok(Verdict::Continue);
        }

        let path = flow.request().path.to_string();
        if path.ends_with("/api/auth/check") {
            self.check(flow)?;
        } else if path.ends_with("/api/auth/login") {
            self.post_only(flow, Self::login)?;
        } else if path.ends_with("/api/auth/register") {
            self.post_only(flow, Self::register)?;
        } else if path.ends_with("/api/auth/any") {
            self.any_user(flow)?;
        } else if self.require_session && path.starts_with("/api/") && !self.is_logged_in(flow) {
            tracing::warn!(path = %path, "Admin API call without a session, rejected");
            admin::respond_json(
                flow,
                StatusCode::FORBIDDEN,
                &json!({"authenticated": false, "message": "user is not authenticated"}),
            )?;
            return Ok(Verdict::Stop);
        }
        Ok(Verdict::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::HttpFlow;
    use axum::http::header;

    fn policy(require_session: bool) -> (tempfile::TempDir, AuthPolicy) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ConfigStore::open(dir.path().join("db.json")).unwrap());
        let policy = AuthPolicy::new(
            store,
            AdminHost::default(),
            Arc::new(SessionToken::generate()),
            require_session,
        );
        (dir, policy)
    }

    fn call(policy: &AuthPolicy, method: Method, path: &str, body: &str) -> HttpFlow {
        let mut flow = HttpFlow::new("settings.it", method, path).with_body(body.to_string());
        policy.on_request(&mut flow).unwrap();
        flow
    }

    #[test]
    fn test_token_shape() {
        let token = SessionToken::generate();
        assert_eq!(token.as_str().len(), TOKEN_LEN);
        assert!(token.as_str().chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(token.matches(Some(token.as_str())));
        assert!(!token.matches(None));
        assert_eq!(format!("{:?}", token), "SessionToken(..)");
    }

    #[test]
    fn test_hash_password() {
        assert_eq!(
            hash_password("secret"),
            "2bb80d537b1da3e38bd30361aa855686bde0eacd7162fef6a25fe97bf527a25b"
        );
    }

    #[test]
    fn test_credential_flow() {
        let (_dir, policy) = policy(false);
        let creds = r#"{"username": "alice", "password": "secret"}"#;

        let reg = call(&policy, Method::POST, "/api/auth/register", creds);
        assert_eq!(reg.committed().unwrap().status, StatusCode::OK);

        let login = call(&policy, Method::POST, "/api/auth/login", creds);
        let res = login.committed().unwrap();
        assert_eq!(res.status, StatusCode::OK);
        let cookie = res.set_cookie_header().unwrap();
        assert_eq!(cookie, format!("session={}", policy.session.as_str()));

        let mut check = HttpFlow::new("settings.it", Method::GET, "/api/auth/check")
            .with_header(header::COOKIE, &cookie);
        policy.on_request(&mut check).unwrap();
        let res = check.committed().unwrap();
        assert_eq!(res.status, StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(&res.body).unwrap();
        assert_eq!(body["authenticated"], true);

        let anonymous = call(&policy, Method::GET, "/api/auth/check", "");
        assert_eq!(anonymous.committed().unwrap().status, StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_login_rejections() {
        let (_dir, policy) = policy(false);
        call(&policy, Method::POST, "/api/auth/register", r#"{"username": "alice", "password": "secret"}"#);

        let unknown = call(&policy, Method::POST, "/api/auth/login", r#"{"username": "bob", "password": "secret"}"#);
        assert_eq!(unknown.committed().unwrap().status, StatusCode::FORBIDDEN);

        let wrong = call(&policy, Method::POST, "/api/auth/login", r#"{"username": "alice", "password": "nope"}"#);
        let res = wrong.committed().unwrap();
        assert_eq!(res.status, StatusCode::FORBIDDEN);
        assert!(res.set_cookie.is_none());

        let missing = call(&policy, Method::POST, "/api/auth/login", r#"{"username": "alice"}"#);
        assert_eq!(missing.committed().unwrap().status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let (_dir, policy) = policy(false);
        call(&policy, Method::POST, "/api/auth/register", r#"{"username": "alice", "password": "secret"}"#);

        let same_password = call(&policy, Method::POST, "/api/auth/register", r#"{"username": "bob", "password": "secret"}"#);
        assert_eq!(same_password.committed().unwrap().status, StatusCode::FORBIDDEN);

        let same_name = call(&policy, Method::POST, "/api/auth/register", r#"{"username": "alice", "password": "other"}"#);
        assert_eq!(same_name.committed().unwrap().status, StatusCode::FORBIDDEN);

        assert_eq!(policy.store.fetch_all(USERS).len(), 1);
    }

    #[test]
    fn test_any_user() {
        let (_dir, policy) = policy(false);
        let none = call(&policy, Method::GET, "/api/auth/any", "");
        assert_eq!(none.committed().unwrap().status, StatusCode::FORBIDDEN);

        call(&policy, Method::POST, "/api/auth/register", r#"{"username": "alice", "password": "secret"}"#);
        let some = call(&policy, Method::GET, "/api/auth/any", "");
        assert_eq!(some.committed().unwrap().status, StatusCode::OK);
    }

    #[test]
    fn test_session_gate() {
        let (_dir, open) = policy(false);
        let mut flow = HttpFlow::new("settings.it", Method::GET, "/api/approved-domains");
        assert_eq!(open.on_request(&mut flow).unwrap(), Verdict::Continue);
        assert!(!flow.is_committed());

        let (_dir, gated) = policy(true);
        let mut flow = HttpFlow::new("settings.it", Method::GET, "/api/approved-domains");
        assert_eq!(gated.on_request(&mut flow).unwrap(), Verdict::Stop);
        assert_eq!(flow.committed().unwrap().status, StatusCode::FORBIDDEN);

        let cookie = format!("session={}", gated.session.as_str());
        let mut flow = HttpFlow::new("settings.it", Method::GET, "/api/approved-domains")
            .with_header(header::COOKIE, &cookie);
        assert_eq!(gated.on_request(&mut flow).unwrap(), Verdict::Continue);
    }

    #[test]
    fn test_ignores_other_hosts() {
        let (_dir, policy) = policy(true);
        let mut flow = HttpFlow::new("example.com", Method::POST, "/api/auth/login");
        assert_eq!(policy.on_request(&mut flow).unwrap(), Verdict::Continue);
        assert!(!flow.is_committed());
    }
}
