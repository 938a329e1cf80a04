//! Per-domain content-type filtering of upstream responses.
//!
//! For a response, the first rule whose `domain_name` is a substring of the
//! normalized host decides. The MIME top-level type of the response must be
//! listed in that rule, otherwise the response is replaced with a 403.
//! Hosts without a rule are unrestricted, as are responses without a
//! `Content-Type` header.

use axum::http::{header, Method, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::sync::{Arc, PoisonError, RwLock};

use super::admin::{self, normalize_host, AdminHost};
use super::{Phases, PhaseResult, Policy, PolicyError, Verdict};
use crate::flow::Flow;
use crate::observability::metrics;
use crate::store::{ConfigStore, ContentRule, StoreError, CONTENTS};

pub const ID: &str = "content_type";
const ENDPOINT: &str = "/api/contents";

#[derive(Debug, Deserialize)]
struct ContentBody {
    domain_name: Option<String>,
    content: Option<String>,
}

/// Top-level type of a `Content-Type` value, lowercased.
///
/// `text/html; charset=utf-8` gives `text`. A value without `/` is taken
/// whole. Blank values give `None`.
pub fn mime_top_level(content_type: &str) -> Option<String> {
    let essence = content_type.split(';').next().unwrap_or_default();
    let top = essence.split('/').next().unwrap_or_default().trim();
    if top.is_empty() {
        None
    } else {
        Some(top.to_ascii_lowercase())
    }
}

/// First rule whose domain is a substring of `host`.
pub fn matching_rule<'a>(host: &str, rules: &'a [ContentRule]) -> Option<&'a ContentRule> {
    rules.iter().find(|rule| host.contains(rule.domain_name.as_str()))
}

/// Mirrors a stored append in the cached rules.
fn cache_append(rules: &mut Vec<ContentRule>, domain: &str, content: &str) {
    match rules.iter_mut().find(|r| r.domain_name == domain) {
        Some(rule) if rule.allows(content) => {}
        Some(rule) => rule.content_types.push(content.to_string()),
        None => rules.push(ContentRule {
            domain_name: domain.to_string(),
            content_types: vec![content.to_string()],
        }),
    }
}

/// Mirrors a stored removal in the cached rules. Empty rules are dropped.
fn cache_remove(rules: &mut Vec<ContentRule>, domain: &str, content: &str) {
    for rule in rules.iter_mut().filter(|r| r.domain_name == domain) {
        rule.content_types.retain(|t| t != content);
    }
    rules.retain(|r| r.domain_name != domain || !r.content_types.is_empty());
}

enum DeleteOutcome {
    NotFound,
    Deleted,
}

pub struct ContentTypePolicy {
    store: Arc<ConfigStore>,
    admin: AdminHost,
    rules: RwLock<Vec<ContentRule>>,
}

impl ContentTypePolicy {
    pub fn new(store: Arc<ConfigStore>, admin: AdminHost) -> Result<Self, StoreError> {
        let rules = store.fetch_all_as::<ContentRule>(CONTENTS)?;
        tracing::info!(count = rules.len(), "Content rules loaded");
        Ok(Self {
            store,
            admin,
            rules: RwLock::new(rules),
        })
    }

    pub fn rules(&self) -> Vec<ContentRule> {
        self.rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether a response of `content_type` may reach a client of `host`.
    pub fn allows(&self, host: &str, content_type: Option<&str>) -> bool {
        let rules = self.rules.read().unwrap_or_else(PoisonError::into_inner);
        let Some(rule) = matching_rule(normalize_host(host), &rules) else {
            return true;
        };
        match content_type.and_then(mime_top_level) {
            Some(top) => rule.allows(&top),
            None => true,
        }
    }

    fn find_rule(&self, domain: &str) -> Result<Option<ContentRule>, StoreError> {
        Ok(self
            .store
            .search_as::<ContentRule>(CONTENTS, "domain_name", &json!(domain))?
            .into_iter()
            .next())
    }

    fn handle_admin(&self, flow: &mut dyn Flow) -> Result<(), PolicyError> {
        let method = flow.request().method.clone();
        match method {
            Method::GET => {
                let rules = self.rules();
                admin::respond_json(flow, StatusCode::OK, &json!(rules))?;
            }
            Method::POST => self.handle_post(flow)?,
            Method::DELETE => self.handle_delete(flow)?,
            _ => admin::method_not_allowed(flow)?,
        }
        Ok(())
    }

    fn parse(flow: &dyn Flow) -> Option<(String, String)> {
        let body: ContentBody = admin::parse_body(flow).ok()?;
        let domain = admin::non_empty(body.domain_name)?.to_ascii_lowercase();
        let content = admin::non_empty(body.content)?.to_ascii_lowercase();
        Some((domain, content))
    }

    fn handle_post(&self, flow: &mut dyn Flow) -> Result<(), PolicyError> {
        let Some((domain, content)) = Self::parse(flow) else {
            admin::respond_text(
                flow,
                StatusCode::BAD_REQUEST,
                "Domain name and content must both be non-empty",
            )?;
            return Ok(());
        };

        let written = {
            let mut rules = self.rules.write().unwrap_or_else(PoisonError::into_inner);
            self.append(&domain, &content)
                .map(|()| cache_append(&mut rules, &domain, &content))
        };

        match written {
            Ok(()) => {
                tracing::info!(domain = %domain, content = %content, "Content type allowed");
                metrics::record_admin_mutation(ID, "ok");
                admin::respond_text(flow, StatusCode::OK, "Content added successfully")?;
            }
            Err(e) => {
                tracing::error!(domain = %domain, error = %e, "Failed to add content rule");
                admin::storage_failure(flow, ID)?;
            }
        }
        Ok(())
    }

    fn append(&self, domain: &str, content: &str) -> Result<(), StoreError> {
        match self.find_rule(domain)? {
            Some(rule) if rule.allows(content) => Ok(()),
            Some(mut rule) => {
                rule.content_types.push(content.to_string());
                self.store
                    .update(
                        CONTENTS,
                        json!({ "content": rule.content_types }),
                        "domain_name",
                        &json!(domain),
                    )
                    .map(|_| ())
            }
            None => self.store.insert(
                CONTENTS,
                ContentRule {
                    domain_name: domain.to_string(),
                    content_types: vec![content.to_string()],
                },
            ),
        }
    }

    fn handle_delete(&self, flow: &mut dyn Flow) -> Result<(), PolicyError> {
        let Some((domain, content)) = Self::parse(flow) else {
            admin::respond_text(flow, StatusCode::BAD_REQUEST, "Invalid format")?;
            return Ok(());
        };

        let outcome = {
            let mut rules = self.rules.write().unwrap_or_else(PoisonError::into_inner);
            self.delete(&domain, &content).inspect(|outcome| {
                if let DeleteOutcome::Deleted = outcome {
                    cache_remove(&mut rules, &domain, &content);
                }
            })
        };

        match outcome {
            Ok(DeleteOutcome::Deleted) => {
                tracing::info!(domain = %domain, content = %content, "Content type removed");
                metrics::record_admin_mutation(ID, "ok");
                admin::respond_text(flow, StatusCode::OK, "Content deleted successfully")?;
            }
            Ok(DeleteOutcome::NotFound) => {
                admin::respond_text(flow, StatusCode::BAD_REQUEST, "Content not found")?;
            }
            Err(e) => {
                tracing::error!(domain = %domain, error = %e, "Failed to delete content rule");
                admin::storage_failure(flow, ID)?;
            }
        }
        Ok(())
    }

    fn delete(&self, domain: &str, content: &str) -> Result<DeleteOutcome, StoreError> {
        let Some(mut rule) = self.find_rule(domain)? else {
            return Ok(DeleteOutcome::NotFound);
        };
        if !rule.allows(content) {
            return Ok(DeleteOutcome::NotFound);
        }

        rule.content_types.retain(|t| t != content);
        if rule.content_types.is_empty() {
            self.store.remove(CONTENTS, "domain_name", &json!(domain))?;
        } else {
            self.store.update(
                CONTENTS,
                json!({ "content": rule.content_types }),
                "domain_name",
                &json!(domain),
            )?;
        }
        Ok(DeleteOutcome::Deleted)
    }
}

impl Policy for ContentTypePolicy {
    fn id(&self) -> &'static str {
        ID
    }

    fn title(&self) -> &'static str {
        "Filter Content"
    }

    fn phases(&self) -> Phases {
        Phases::BOTH
    }

    fn on_request(&self, flow: &mut dyn Flow) -> PhaseResult {
        if self.admin.targets(flow, ENDPOINT) {
            self.handle_admin(flow)?;
        }
        Ok(Verdict::Continue)
    }

    fn on_response(&self, flow: &mut dyn Flow) -> PhaseResult {
        let content_type = flow.response_header(header::CONTENT_TYPE.as_str());
        if self.allows(flow.host(), content_type) {
            return Ok(Verdict::Continue);
        }

        tracing::info!(
            host = %flow.host(),
            content_type = content_type.unwrap_or_default(),
            "Response content type not allowed, blocked"
        );
        flow.kill()?;
        Ok(Verdict::Stop)
    }
}
