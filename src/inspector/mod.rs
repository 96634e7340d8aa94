//! Per-exchange orchestration of the detectors, the rule engine and the
//! content normalizer.

pub mod context;

pub use context::{RequestContext, ResponseContext};

use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, COOKIE, HOST, REFERER, USER_AGENT};
use http::{HeaderMap, Request, Response};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::Arc;

use crate::config::{DecodeErrorAction, InspectionConfig, Replacement, WafConfig};
use crate::content::{self, ContentCoding};
use crate::error::RuleError;
use crate::geo::GeoManager;
use crate::metrics::MetricsCollector;
use crate::rules::{RequestFact, RuleEngine};
use crate::waf::*;

/// Final decision for one request or response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Block {
        detector: Detector,
        title: String,
        content: String,
    },
    Redirect(RedirectTarget),
    /// The message was modified in place and should be forwarded.
    Rewrite,
}

impl Verdict {
    pub fn name(&self) -> &'static str {
        match self {
            Verdict::Pass => "pass",
            Verdict::Block { .. } => "block",
            Verdict::Redirect(_) => "redirect",
            Verdict::Rewrite => "rewrite",
        }
    }

    fn from_detection(result: &DetectionResult) -> Self {
        Verdict::Block {
            detector: result.detector,
            title: result.title.clone(),
            content: result.content.clone(),
        }
    }
}

/// Result of inspecting a request: the verdict, the fact as the detectors
/// and rules left it, and every detector outcome in order.
#[derive(Debug, Clone, Serialize)]
pub struct Inspection {
    pub verdict: Verdict,
    pub fact: RequestFact,
    pub detections: Vec<DetectionResult>,
}

fn header<'a>(headers: &'a HeaderMap, name: http::header::HeaderName) -> &'a str {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
}

/// `name: value\r\n` for every header, in order.
fn flatten_headers(headers: &HeaderMap) -> String {
    let mut out = String::new();
    for (name, value) in headers {
        out.push_str(name.as_str());
        out.push_str(": ");
        out.push_str(&String::from_utf8_lossy(value.as_bytes()));
        out.push_str("\r\n");
    }
    out
}

fn applies_to(replacement: &Replacement, host: &str) -> bool {
    replacement.host.is_empty() || HostPolicy::new(replacement.host.as_str()).matches_host(host)
}

pub struct Inspector {
    geo: Arc<GeoManager>,
    rules: Arc<RuleEngine>,
    xss: XssDetector,
    fact_name: String,
    acme_challenge_path: String,
    inspection: InspectionConfig,
    global: HostPolicy,
    hosts: Vec<HostPolicy>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl Inspector {
    pub fn new(config: &WafConfig, geo: Arc<GeoManager>, rules: Arc<RuleEngine>) -> Self {
        Self {
            geo,
            rules,
            xss: XssDetector::new(config.xss.enabled, config.xss.escalate_form_fields),
            fact_name: config.rules.fact_name.clone(),
            acme_challenge_path: config.https.acme_challenge_path.clone(),
            inspection: config.inspection.clone(),
            global: config.global_host.clone(),
            hosts: config.hosts.clone(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Policy for `host`: an exact entry wins over a wildcard one; the global
    /// policy serves hosts without their own.
    pub fn policy_for(&self, host: &str) -> &HostPolicy {
        let (name, _) = split_host_port(host);
        self.hosts
            .iter()
            .find(|policy| policy.host.eq_ignore_ascii_case(host) || policy.host.eq_ignore_ascii_case(name))
            .or_else(|| self.hosts.iter().find(|policy| policy.matches_host(host)))
            .unwrap_or(&self.global)
    }

    /// Build the fact detectors and rules see, plus the decoded form values.
    pub fn build_fact(&self, ctx: &RequestContext, request: &Request<Bytes>) -> (RequestFact, Vec<(String, String)>) {
        let headers = request.headers();
        let host = match header(headers, HOST) {
            "" => request.uri().authority().map(|a| a.to_string()).unwrap_or_default(),
            value => value.to_string(),
        };
        let url = request
            .uri()
            .path_and_query()
            .map(|pq| pq.to_string())
            .unwrap_or_else(|| "/".to_string());

        let raw = request.body();
        let limit = raw.len().min(self.inspection.max_body_size);
        let body = match content::decode_limited(headers, &raw[..limit], self.inspection.max_body_size) {
            Ok(decoded) => decoded.text().into_owned(),
            Err(e) => {
                debug!("Inspecting raw request body: {}", e);
                String::from_utf8_lossy(&raw[..limit]).into_owned()
            }
        };
        let is_form = content::is_form_content_type(header(headers, CONTENT_TYPE));
        let post_form = if is_form { body.clone() } else { String::new() };
        let form_values = content::parse_form(&post_form);

        let cookies = headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect::<Vec<_>>()
            .join("; ");
        let content_length = header(headers, CONTENT_LENGTH)
            .trim()
            .parse::<i64>()
            .unwrap_or(raw.len() as i64);

        let mut fact = RequestFact {
            src_ip: client_ip_from_headers(headers, ctx.peer_addr),
            net_src_ip: ctx.peer_addr.to_string(),
            host,
            url,
            method: request.method().to_string(),
            scheme: ctx.scheme().to_string(),
            referer: header(headers, REFERER).to_string(),
            user_agent: header(headers, USER_AGENT).to_string(),
            cookies,
            header: flatten_headers(headers),
            body,
            post_form,
            content_length,
            ..RequestFact::default()
        };
        let location = self.geo.lookup(&fact.src_ip);
        fact.apply_geo(&location);

        (fact, form_values)
    }

    fn https_redirect(&self, ctx: &RequestContext, fact: &RequestFact, policy: &HostPolicy) -> Option<RedirectTarget> {
        if ctx.tls {
            return None;
        }
        let request_host = match split_host_port(&fact.host) {
            (_, Some(_)) => fact.host.clone(),
            (name, None) if name.contains(':') => format!("[{}]:{}", name, ctx.listen_port),
            (name, None) => format!("{}:{}", name, ctx.listen_port),
        };
        let (jump, domain) = should_auto_jump_https(
            &request_host,
            &policy.host,
            &fact.url,
            policy.auto_jump_https,
            policy.ssl,
            &self.acme_challenge_path,
        );
        jump.then(|| RedirectTarget::https(domain, &fact.url))
    }

    fn check_rules(&self, fact: &mut RequestFact) -> DetectionResult {
        let matched = match self.rules.match_rules(&self.fact_name, fact) {
            Ok(matched) => matched,
            Err(RuleError::NoRuleData) => return DetectionResult::pass(Detector::Rule),
            Err(e) => {
                warn!("Skipping rule check: {}", e);
                return DetectionResult::pass(Detector::Rule);
            }
        };
        let Some(first) = matched.first() else {
            return DetectionResult::pass(Detector::Rule);
        };

        if let Err(e) = self.rules.exec(&self.fact_name, fact) {
            error!("Rule actions failed for {}: {}", first.name, e);
        }
        let content = if first.description.is_empty() {
            first.name.clone()
        } else {
            first.description.clone()
        };
        DetectionResult::block(Detector::Rule, format!("Rule {}", first.name), content)
    }

    fn rewrite_request(&self, host: &str, request: &mut Request<Bytes>) -> bool {
        let before_uri = request.uri().clone();
        let before_body = request.body().clone();

        for replacement in self
            .inspection
            .request_url_replacements
            .iter()
            .filter(|r| applies_to(r, host))
        {
            if let Err(e) = content::replace_url_content(request, &replacement.olds, &replacement.new) {
                warn!("URL rewrite skipped: {}", e);
            }
        }
        for replacement in self
            .inspection
            .request_body_replacements
            .iter()
            .filter(|r| applies_to(r, host))
        {
            content::replace_body_content(request, &replacement.olds, &replacement.new);
        }

        request.uri() != &before_uri || request.body() != &before_body
    }

    fn finish(&self, verdict: Verdict, fact: RequestFact, detections: Vec<DetectionResult>) -> Inspection {
        if let Some(metrics) = &self.metrics {
            metrics.record_inspection(verdict.name());
            if let Verdict::Block { detector, .. } = &verdict {
                metrics.record_block(*detector);
            }
        }
        match &verdict {
            Verdict::Block { detector, title, .. } => warn!(
                "Blocked request - IP: {}, Method: {}, URL: {}, Detector: {}, Title: {}",
                fact.src_ip, fact.method, fact.url, detector, title
            ),
            Verdict::Redirect(target) => info!(
                "Redirecting request - IP: {}, URL: {}, Location: {}",
                fact.src_ip,
                fact.url,
                target.location()
            ),
            _ => debug!(
                "Request {} - IP: {}, URL: {}",
                verdict.name(),
                fact.src_ip,
                fact.url
            ),
        }
        Inspection {
            verdict,
            fact,
            detections,
        }
    }

    /// Inspect a request. HTTPS upgrade first, then the allow-list (a hit
    /// ends inspection), XSS, rules, and finally the configured rewrites,
    /// which modify `request` in place.
    pub fn inspect_request(&self, ctx: &RequestContext, request: &mut Request<Bytes>) -> Inspection {
        let (mut fact, form_values) = self.build_fact(ctx, request);
        let policy = self.policy_for(&fact.host);
        let mut detections = Vec::new();

        if let Some(target) = self.https_redirect(ctx, &fact, policy) {
            return self.finish(Verdict::Redirect(target), fact, detections);
        }

        if policy.guard_enabled {
            let allow = check_allow_ip(&fact, policy, &self.global);
            let bypass = allow.bypass_further_guards;
            detections.push(allow);
            if bypass {
                return self.finish(Verdict::Pass, fact, detections);
            }

            let xss = self.xss.check_xss(&mut fact, &form_values);
            if xss.is_blocked {
                let verdict = Verdict::from_detection(&xss);
                detections.push(xss);
                return self.finish(verdict, fact, detections);
            }
            detections.push(xss);

            let rule = self.check_rules(&mut fact);
            if rule.is_blocked {
                let verdict = Verdict::from_detection(&rule);
                detections.push(rule);
                return self.finish(verdict, fact, detections);
            }
            detections.push(rule);
        } else {
            debug!("Guard disabled for {}", policy.host);
        }

        let verdict = if self.rewrite_request(&fact.host, request) {
            Verdict::Rewrite
        } else {
            Verdict::Pass
        };
        self.finish(verdict, fact, detections)
    }

    /// Apply the configured response replacements for `ctx.host`, decoding
    /// and re-encoding the body around them.
    pub fn inspect_response(&self, ctx: &ResponseContext, response: &mut Response<Bytes>) -> Verdict {
        let replacements: Vec<&Replacement> = self
            .inspection
            .response_replacements
            .iter()
            .filter(|r| applies_to(r, &ctx.host))
            .collect();
        if replacements.is_empty() || response.body().is_empty() {
            return Verdict::Pass;
        }
        if response.body().len() > self.inspection.max_body_size {
            debug!("Response for {} too large to rewrite", ctx.host);
            return Verdict::Pass;
        }

        let limit = self.inspection.max_body_size;
        let decoded = match content::decode_limited(response.headers(), response.body(), limit) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("Failed to decode response for {}: {}", ctx.host, e);
                return match self.inspection.on_decode_error {
                    DecodeErrorAction::Pass => Verdict::Pass,
                    DecodeErrorAction::Block => {
                        if let Some(metrics) = &self.metrics {
                            metrics.record_block(Detector::Decoder);
                        }
                        Verdict::Block {
                            detector: Detector::Decoder,
                            title: "Undecodable response".to_string(),
                            content: e.to_string(),
                        }
                    }
                };
            }
        };
        if let ContentCoding::Passthrough(coding) = &decoded.coding {
            debug!("Not rewriting {} encoded response", coding);
            return Verdict::Pass;
        }

        let original = decoded.text();
        let mut text = original.to_string();
        for replacement in replacements {
            for old in replacement.olds.iter().filter(|old| !old.is_empty()) {
                text = text.replace(old.as_str(), &replacement.new);
            }
        }
        if text == original {
            return Verdict::Pass;
        }

        match decoded.encode(text.as_bytes()) {
            Ok(body) => {
                content::apply_encoded_body(response, body);
                Verdict::Rewrite
            }
            Err(e) => {
                error!("Failed to re-encode response for {}: {}", ctx.host, e);
                Verdict::Pass
            }
        }
    }
}
