//! Domain allow-list enforcement.
//!
//! A host is admitted when any approved domain is a substring of the
//! normalized host. Matching is loose: `example.com` also admits
//! `example.com.evil.org`. An empty list denies every non-admin host.

use axum::http::{Method, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::sync::{Arc, PoisonError, RwLock};

use super::admin::{self, normalize_host, AdminHost};
use super::{Phases, PhaseResult, Policy, PolicyError, Verdict};
use crate::flow::Flow;
use crate::observability::metrics;
use crate::store::{ApprovedDomain, ConfigStore, StoreError, APPROVED_DOMAINS};

pub const ID: &str = "allow_list";
const ENDPOINT: &str = "/api/approved-domains";

#[derive(Debug, Deserialize)]
struct DomainBody {
    domain: Option<String>,
}

/// True if some approved domain is a substring of `host`.
pub fn admits(host: &str, approved: &[String]) -> bool {
    approved.iter().any(|domain| host.contains(domain.as_str()))
}

pub struct AllowListPolicy {
    store: Arc<ConfigStore>,
    admin: AdminHost,
    domains: RwLock<Vec<String>>,
}

impl AllowListPolicy {
    pub fn new(store: Arc<ConfigStore>, admin: AdminHost) -> Result<Self, StoreError> {
        let domains = Self::load(&store)?;
        tracing::info!(count = domains.len(), "Approved domains loaded");
        Ok(Self {
            store,
            admin,
            domains: RwLock::new(domains),
        })
    }

    fn load(store: &ConfigStore) -> Result<Vec<String>, StoreError> {
        Ok(store
            .fetch_all_as::<ApprovedDomain>(APPROVED_DOMAINS)?
            .into_iter()
            .map(|d| d.domain)
            .collect())
    }

    /// Snapshot of the cached approved domains.
    pub fn domains(&self) -> Vec<String> {
        self.domains
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Admission check against an already normalized host.
    pub fn is_admitted(&self, host: &str) -> bool {
        let domains = self.domains.read().unwrap_or_else(PoisonError::into_inner);
        admits(host, &domains)
    }

    fn handle_admin(&self, flow: &mut dyn Flow) -> Result<(), PolicyError> {
        let method = flow.request().method.clone();
        match method {
            Method::GET => {
                let domains = self.domains();
                admin::respond_json(flow, StatusCode::OK, &json!(domains))?;
            }
            Method::POST => self.handle_post(flow)?,
            Method::DELETE => self.handle_delete(flow)?,
            _ => admin::method_not_allowed(flow)?,
        }
        Ok(())
    }

    fn handle_post(&self, flow: &mut dyn Flow) -> Result<(), PolicyError> {
        let body: DomainBody = match admin::parse_body(flow) {
            Ok(body) => body,
            Err(e) => {
                tracing::debug!(error = %e, "Malformed approved-domain body");
                admin::respond_text(flow, StatusCode::BAD_REQUEST, "Bad Request: Invalid JSON body")?;
                return Ok(());
            }
        };
        let Some(domain) = admin::non_empty(body.domain).map(|d| d.to_ascii_lowercase()) else {
            admin::respond_text(flow, StatusCode::BAD_REQUEST, "Bad Request: Missing domain")?;
            return Ok(());
        };

        let outcome = {
            let mut domains = self.domains.write().unwrap_or_else(PoisonError::into_inner);
            if domains.contains(&domain) {
                None
            } else {
                let written = self
                    .store
                    .insert(APPROVED_DOMAINS, ApprovedDomain { domain: domain.clone() });
                Some(written.map(|()| domains.push(domain.clone())))
            }
        };

        match outcome {
            None => {
                admin::respond_text(flow, StatusCode::BAD_REQUEST, "Domain already exists")?;
            }
            Some(Ok(())) => {
                tracing::info!(domain = %domain, "Approved domain added");
                metrics::record_admin_mutation(ID, "ok");
                admin::respond_text(flow, StatusCode::OK, "Domain added successfully")?;
            }
            Some(Err(e)) => {
                tracing::error!(domain = %domain, error = %e, "Failed to add approved domain");
                admin::storage_failure(flow, ID)?;
            }
        }
        Ok(())
    }

    /// Removes `domain` from the store, then from the cache.
    /// Returns whether a stored row was removed.
    fn remove_domain(&self, domain: &str) -> Result<bool, StoreError> {
        let mut domains = self.domains.write().unwrap_or_else(PoisonError::into_inner);
        if !domains.iter().any(|d| d == domain) {
            return Ok(false);
        }
        let count = self.store.remove(APPROVED_DOMAINS, "domain", &json!(domain))?;
        domains.retain(|d| d != domain);
        Ok(count > 0)
    }

    fn handle_delete(&self, flow: &mut dyn Flow) -> Result<(), PolicyError> {
        let domain = match admin::parse_body::<DomainBody>(flow).map(|b| admin::non_empty(b.domain)) {
            Ok(Some(domain)) => domain.to_ascii_lowercase(),
            Ok(None) => {
                admin::respond_text(flow, StatusCode::BAD_REQUEST, "Bad Request: Missing domain")?;
                return Ok(());
            }
            Err(_) => {
                admin::respond_text(flow, StatusCode::BAD_REQUEST, "Bad Request: Invalid JSON body")?;
                return Ok(());
            }
        };

        match self.remove_domain(&domain) {
            Ok(false) => {
                tracing::debug!(domain = %domain, "Domain not on the allow list, nothing removed");
            }
            Ok(true) => {
                tracing::info!(domain = %domain, "Approved domain removed");
                metrics::record_admin_mutation(ID, "ok");
            }
            Err(e) => {
                tracing::error!(domain = %domain, error = %e, "Failed to remove approved domain");
                admin::storage_failure(flow, ID)?;
                return Ok(());
            }
        }

        let domains = self.domains();
        admin::respond_json(flow, StatusCode::OK, &json!(domains))?;
        Ok(())
    }
}

impl Policy for AllowListPolicy {
    fn id(&self) -> &'static str {
        ID
    }

    fn title(&self) -> &'static str {
        "White List"
    }

    fn phases(&self) -> Phases {
        Phases::REQUEST
    }

    fn on_request(&self, flow: &mut dyn Flow) -> PhaseResult {
        if self.admin.is_admin(flow) {
            if self.admin.targets(flow, ENDPOINT) {
                self.handle_admin(flow)?;
            }
            return Ok(Verdict::Continue);
        }

        if self.is_admitted(normalize_host(flow.host())) {
            return Ok(Verdict::Continue);
        }

        tracing::info!(host = %flow.host(), "Host not on the allow list, denied");
        flow.kill()?;
        Ok(Verdict::Stop)
    }
}
