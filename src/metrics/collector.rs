use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

use crate::geo::IpFamily;
use crate::waf::Detector;

/// Inspection counters, registered into a registry owned by the collector so
/// several instances (and tests) can coexist in one process.
pub struct MetricsCollector {
    pub registry: Registry,
    inspections: IntCounterVec,
    blocked: IntCounterVec,
    geo_reloads: IntCounterVec,
    rule_loads: IntCounterVec,
    rule_errors: IntCounterVec,
}

fn outcome(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "failure"
    }
}

impl MetricsCollector {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let inspections = IntCounterVec::new(
            Opts::new("waf_inspections_total", "Inspected exchanges by verdict"),
            &["verdict"],
        )?;
        let blocked = IntCounterVec::new(
            Opts::new("waf_blocked_total", "Blocked requests by detector"),
            &["detector"],
        )?;
        let geo_reloads = IntCounterVec::new(
            Opts::new("waf_geo_reloads_total", "Geolocation database loads"),
            &["family", "outcome"],
        )?;
        let rule_loads = IntCounterVec::new(
            Opts::new("waf_rule_loads_total", "Rule set compilations"),
            &["outcome"],
        )?;

        let rule_errors = IntCounterVec::new(
            Opts::new("waf_rule_errors_total", "Rule conditions that failed to evaluate"),
            &["rule"],
        )?;

        registry.register(Box::new(inspections.clone()))?;
        registry.register(Box::new(blocked.clone()))?;
        registry.register(Box::new(geo_reloads.clone()))?;
        registry.register(Box::new(rule_loads.clone()))?;
        registry.register(Box::new(rule_errors.clone()))?;

        Ok(Self {
            registry,
            inspections,
            blocked,
            geo_reloads,
            rule_loads,
            rule_errors,
        })
    }

    pub fn record_inspection(&self, verdict: &str) {
        self.inspections.with_label_values(&[verdict]).inc();
    }

    pub fn record_block(&self, detector: Detector) {
        self.blocked.with_label_values(&[detector.name()]).inc();
    }

    pub fn record_geo_reload(&self, family: IpFamily, success: bool) {
        self.geo_reloads
            .with_label_values(&[family.as_str(), outcome(success)])
            .inc();
    }

    pub fn record_rule_load(&self, success: bool) {
        self.rule_loads.with_label_values(&[outcome(success)]).inc();
    }

    pub fn record_rule_error(&self, rule: &str) {
        self.rule_errors.with_label_values(&[rule]).inc();
    }

    pub fn inspections(&self, verdict: &str) -> u64 {
        self.inspections.with_label_values(&[verdict]).get()
    }

    pub fn blocked(&self, detector: Detector) -> u64 {
        self.blocked.with_label_values(&[detector.name()]).get()
    }

    pub fn rule_errors(&self, rule: &str) -> u64 {
        self.rule_errors.with_label_values(&[rule]).get()
    }

    /// Prometheus text exposition of every counter.
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = MetricsCollector::new().unwrap();
        metrics.record_inspection("block");
        metrics.record_inspection("block");
        metrics.record_block(Detector::Xss);
        assert_eq!(metrics.inspections("block"), 2);
        assert_eq!(metrics.inspections("pass"), 0);
        assert_eq!(metrics.blocked(Detector::Xss), 1);
    }

    #[test]
    fn test_render() {
        let metrics = MetricsCollector::new().unwrap();
        metrics.record_geo_reload(IpFamily::V6, false);
        metrics.record_rule_load(true);
        let text = metrics.render().unwrap();
        assert!(text.contains(r#"waf_geo_reloads_total{family="ipv6",outcome="failure"} 1"#));
        assert!(text.contains(r#"waf_rule_loads_total{outcome="success"} 1"#));
    }

    #[test]
    fn test_independent_instances() {
        let a = MetricsCollector::new().unwrap();
        let b = MetricsCollector::new().unwrap();
        a.record_block(Detector::Rule);
        assert_eq!(b.blocked(Detector::Rule), 0);
    }
}
