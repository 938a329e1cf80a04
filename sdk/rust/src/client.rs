use reqwest::header::{COOKIE, SET_COOKIE};
use reqwest::{Client, Method, Proxy, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Mutex;

pub const DEFAULT_ADMIN_HOST: &str = "settings.it";

type SdkResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRule {
    pub domain_name: String,
    #[serde(rename = "content")]
    pub content_types: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleOrdering {
    #[serde(default)]
    pub request_modules: Vec<String>,
    #[serde(default)]
    pub response_modules: Vec<String>,
}

pub struct AdminClient {
    client: Client,
    admin_host: String,
    session: Mutex<Option<String>>,
}

impl AdminClient {
    /// Client sending admin requests through the proxy at `proxy_url`.
    pub fn new(proxy_url: &str) -> SdkResult<Self> {
        Self::with_admin_host(proxy_url, DEFAULT_ADMIN_HOST)
    }

    pub fn with_admin_host(proxy_url: &str, admin_host: &str) -> SdkResult<Self> {
        let client = Client::builder().proxy(Proxy::http(proxy_url)?).build()?;
        Ok(Self {
            client,
            admin_host: admin_host.to_string(),
            session: Mutex::new(None),
        })
    }

    /// Session cookie value received from the last successful login.
    pub fn session(&self) -> Option<String> {
        self.session.lock().ok().and_then(|s| s.clone())
    }

    async fn send(&self, method: Method, endpoint: &str, body: Option<Value>) -> SdkResult<Response> {
        let mut req = self
            .client
            .request(method, format!("http://{}{}", self.admin_host, endpoint));
        if let Some(session) = self.session() {
            req = req.header(COOKIE, format!("session={}", session));
        }
        if let Some(body) = body {
            req = req.json(&body);
        }
        Ok(req.send().await?)
    }

    /// Sends the request and returns the body text of a 2xx answer.
    async fn call(&self, method: Method, endpoint: &str, body: Option<Value>) -> SdkResult<String> {
        let resp = self.send(method, endpoint, body).await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(format!("Admin API returned status {}: {}", status, text).into());
        }
        Ok(text)
    }

    // Approved domains

    pub async fn domains(&self) -> SdkResult<Vec<String>> {
        let text = self.call(Method::GET, "/api/approved-domains", None).await?;
        Ok(serde_json::from_str(&text)?)
    }

    pub async fn add_domain(&self, domain: &str) -> SdkResult<String> {
        self.call(Method::POST, "/api/approved-domains", Some(json!({ "domain": domain })))
            .await
    }

    /// Removes a domain and returns the remaining list.
    pub async fn remove_domain(&self, domain: &str) -> SdkResult<Vec<String>> {
        let text = self
            .call(Method::DELETE, "/api/approved-domains", Some(json!({ "domain": domain })))
            .await?;
        Ok(serde_json::from_str(&text)?)
    }

    // Content rules

    pub async fn content_rules(&self) -> SdkResult<Vec<ContentRule>> {
        let text = self.call(Method::GET, "/api/contents", None).await?;
        Ok(serde_json::from_str(&text)?)
    }

    pub async fn add_content(&self, domain: &str, content_type: &str) -> SdkResult<String> {
        self.call(
            Method::POST,
            "/api/contents",
            Some(json!({ "domain_name": domain, "content": content_type })),
        )
        .await
    }

    pub async fn remove_content(&self, domain: &str, content_type: &str) -> SdkResult<String> {
        self.call(
            Method::DELETE,
            "/api/contents",
            Some(json!({ "domain_name": domain, "content": content_type })),
        )
        .await
    }

    // Module ordering

    pub async fn plugins(&self) -> SdkResult<ModuleOrdering> {
        let text = self.call(Method::GET, "/api/plugins", None).await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Replaces the lists that are `Some`, keeping the others.
    pub async fn set_plugins(
        &self,
        request_modules: Option<Vec<String>>,
        response_modules: Option<Vec<String>>,
    ) -> SdkResult<String> {
        let mut body = serde_json::Map::new();
        if let Some(list) = request_modules {
            body.insert("request_modules".to_string(), json!(list));
        }
        if let Some(list) = response_modules {
            body.insert("response_modules".to_string(), json!(list));
        }
        self.call(Method::PUT, "/api/plugins", Some(Value::Object(body)))
            .await
    }

    pub async fn remove_plugin(&self, name: &str) -> SdkResult<String> {
        self.call(Method::DELETE, "/api/plugins", Some(json!({ "plugin_name": name })))
            .await
    }

    // Authentication

    pub async fn register(&self, username: &str, password: &str) -> SdkResult<String> {
        self.call(
            Method::POST,
            "/api/auth/register",
            Some(json!({ "username": username, "password": password })),
        )
        .await
    }

    /// Logs in and keeps the session cookie for later calls.
    pub async fn login(&self, username: &str, password: &str) -> SdkResult<()> {
        let resp = self
            .send(
                Method::POST,
                "/api/auth/login",
                Some(json!({ "username": username, "password": password })),
            )
            .await?;
        let status = resp.status();
        let cookie = resp
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(|v| v.split(';').next()?.trim().strip_prefix("session=").map(str::to_string));
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(format!("Login failed with status {}: {}", status, text).into());
        }

        let cookie = cookie.ok_or("Login answer carried no session cookie")?;
        if let Ok(mut session) = self.session.lock() {
            *session = Some(cookie);
        }
        Ok(())
    }

    /// Whether the kept session cookie is accepted.
    pub async fn check(&self) -> SdkResult<bool> {
        let resp = self.send(Method::POST, "/api/auth/check", None).await?;
        Ok(resp.status() == StatusCode::OK)
    }

    /// Whether at least one user is registered.
    pub async fn any_user(&self) -> SdkResult<bool> {
        let resp = self.send(Method::POST, "/api/auth/any", None).await?;
        Ok(resp.status() == StatusCode::OK)
    }
}
