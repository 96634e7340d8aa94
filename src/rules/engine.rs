use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Local};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{RuleError, RuleResult};
use crate::geo::GeoManager;
use crate::metrics::MetricsCollector;

use super::ast::{Rule, Statement};
use super::eval::{eval, truth, Scope};
use super::fact::RequestFact;
use super::parser::parse_rules;

pub const DEFAULT_NAMESPACE: &str = "Region";
pub const DEFAULT_VERSION: &str = "0.0.1";
pub const DEFAULT_FACT_NAME: &str = "MF";
pub const DEFAULT_MAX_CYCLES: usize = 5000;

/// One operator-authored rule as stored by the management side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleConfig {
    pub code: String,
    pub name: String,
    pub content: String,
    pub version: i64,
    pub version_name: String,
    pub host_code: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Compiled, immutable rule set.
#[derive(Debug)]
pub struct KnowledgeBase {
    pub namespace: String,
    pub version: String,
    /// Highest salience first, declaration order within equal salience.
    rules: Vec<Rule>,
    /// Every fact object name the rules refer to.
    facts: HashSet<String>,
    pub source: String,
    pub built_at: DateTime<Local>,
}

/// Outcome of evaluating every condition once. Rules whose condition
/// failed to evaluate are left out of `matched` and reported in `errors`.
#[derive(Debug, Default)]
pub struct RuleScan {
    pub matched: Vec<MatchedRule>,
    pub errors: Vec<RuleError>,
}

impl KnowledgeBase {
    pub fn compile(namespace: &str, version: &str, source: &str) -> RuleResult<Self> {
        let mut rules = parse_rules(source)?;

        let mut seen = HashSet::new();
        for rule in &rules {
            if !seen.insert(rule.name.as_str()) {
                return Err(RuleError::DuplicateRule(rule.name.clone()));
            }
        }
        rules.sort_by(|a, b| b.salience.cmp(&a.salience));
        let facts = rules
            .iter()
            .flat_map(|rule| rule.fact_objects())
            .map(str::to_string)
            .collect();

        Ok(Self {
            namespace: namespace.to_string(),
            version: version.to_string(),
            rules,
            facts,
            source: source.to_string(),
            built_at: Local::now(),
        })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|rule| rule.name.as_str()).collect()
    }

    fn check_fact_name(&self, fact_name: &str) -> RuleResult<()> {
        if self.facts.is_empty() || self.facts.contains(fact_name) {
            Ok(())
        } else {
            Err(RuleError::UnknownFact(fact_name.to_string()))
        }
    }

    /// Evaluate every condition against `fact`. A rule that fails to
    /// evaluate is logged and skipped; the rest still run.
    pub fn scan(&self, fact_name: &str, fact: &RequestFact) -> RuleResult<RuleScan> {
        self.check_fact_name(fact_name)?;
        let mut scan = RuleScan::default();
        for rule in &self.rules {
            match condition_holds(rule, fact_name, fact) {
                Ok(true) => scan.matched.push(MatchedRule::from(rule)),
                Ok(false) => {}
                Err(e) => {
                    warn!("Treating rule {} as not matched: {}", rule.name, e);
                    scan.errors.push(e);
                }
            }
        }
        Ok(scan)
    }

    /// Matching rules for `fact`, highest salience first. Does not mutate.
    pub fn matching(&self, fact_name: &str, fact: &RequestFact) -> RuleResult<Vec<MatchedRule>> {
        self.scan(fact_name, fact).map(|scan| scan.matched)
    }

    /// Forward-chaining execution on `fact` in place.
    pub fn execute(&self, fact_name: &str, fact: &mut RequestFact, max_cycles: usize) -> RuleResult<()> {
        let index: HashMap<&str, usize> = self
            .rules
            .iter()
            .enumerate()
            .map(|(i, rule)| (rule.name.as_str(), i))
            .collect();
        self.check_fact_name(fact_name)?;
        let mut retracted = HashSet::new();
        let mut failed = HashSet::new();
        let mut cycles = 0;

        loop {
            cycles += 1;
            if cycles > max_cycles {
                return Err(RuleError::CycleLimit(max_cycles));
            }

            let mut candidate = None;
            for (i, rule) in self.rules.iter().enumerate() {
                if retracted.contains(&i) || failed.contains(&i) {
                    continue;
                }
                match condition_holds(rule, fact_name, fact) {
                    Ok(true) => {
                        candidate = Some(rule);
                        break;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!("Skipping rule {} for this execution: {}", rule.name, e);
                        failed.insert(i);
                    }
                }
            }
            let Some(rule) = candidate else {
                debug!("Rule execution settled after {} cycle(s)", cycles);
                return Ok(());
            };

            debug!("Firing rule {}", rule.name);
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                run_actions(rule, fact_name, fact, &index, &mut retracted)
            }));
            match outcome {
                Ok(Ok(ActionOutcome::Continue)) => {}
                Ok(Ok(ActionOutcome::Complete)) => return Ok(()),
                Ok(Err(e)) => return Err(e),
                Err(payload) => {
                    let message = panic_message(payload);
                    error!("Rule {} panicked in its actions: {}", rule.name, message);
                    return Err(RuleError::Panicked {
                        rule: rule.name.clone(),
                        message,
                    });
                }
            }
        }
    }
}

enum ActionOutcome {
    Continue,
    Complete,
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Evaluate a rule's condition. A panic counts as a non-match.
fn condition_holds(rule: &Rule, fact_name: &str, fact: &RequestFact) -> RuleResult<bool> {
    let scope = Scope { fact_name, fact };
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        eval(&rule.when, &scope).and_then(truth)
    }));
    match result {
        Ok(Ok(holds)) => Ok(holds),
        Ok(Err(message)) => Err(RuleError::Evaluation {
            rule: rule.name.clone(),
            message,
        }),
        Err(payload) => {
            error!(
                "Rule {} panicked while evaluating its condition: {}",
                rule.name,
                panic_message(payload)
            );
            Ok(false)
        }
    }
}

fn run_actions(
    rule: &Rule,
    fact_name: &str,
    fact: &mut RequestFact,
    index: &HashMap<&str, usize>,
    retracted: &mut HashSet<usize>,
) -> RuleResult<ActionOutcome> {
    let evaluation = |message: String| RuleError::Evaluation {
        rule: rule.name.clone(),
        message,
    };

    for statement in &rule.then {
        match statement {
            Statement::Assign {
                object,
                field,
                value,
            } => {
                if object != fact_name {
                    return Err(evaluation(format!("unknown fact object '{}'", object)));
                }
                let scope = Scope {
                    fact_name,
                    fact: &*fact,
                };
                let value = eval(value, &scope).map_err(evaluation)?;
                fact.set(*field, value).map_err(evaluation)?;
            }
            Statement::Retract(name) => match index.get(name.as_str()) {
                Some(i) => {
                    retracted.insert(*i);
                }
                None => warn!("Rule {} retracts unknown rule {}", rule.name, name),
            },
            Statement::Complete => return Ok(ActionOutcome::Complete),
        }
    }
    Ok(ActionOutcome::Continue)
}

/// A rule whose condition held for a fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchedRule {
    pub name: String,
    pub description: String,
    pub salience: i64,
}

impl From<&Rule> for MatchedRule {
    fn from(rule: &Rule) -> Self {
        Self {
            name: rule.name.clone(),
            description: rule.description.clone(),
            salience: rule.salience,
        }
    }
}

/// Synthetic request used to try a rule before saving it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleTestRequest {
    pub test_src_ip: String,
    pub host: String,
    pub url: String,
    pub method: String,
    pub user_agent: String,
    pub referer: String,
    pub header: String,
    pub cookies: String,
    pub body: String,
}

impl RuleTestRequest {
    /// Build the fact the rule will see, with location fields resolved.
    pub fn to_fact(&self, geo: &GeoManager) -> RequestFact {
        let mut fact = RequestFact {
            src_ip: self.test_src_ip.clone(),
            net_src_ip: self.test_src_ip.clone(),
            host: self.host.clone(),
            url: self.url.clone(),
            method: if self.method.is_empty() {
                "GET".to_string()
            } else {
                self.method.clone()
            },
            user_agent: self.user_agent.clone(),
            referer: self.referer.clone(),
            header: self.header.clone(),
            cookies: self.cookies.clone(),
            body: self.body.clone(),
            content_length: self.body.len() as i64,
            ..RequestFact::default()
        };
        if !self.test_src_ip.is_empty() {
            fact.apply_geo(&geo.lookup(&self.test_src_ip));
        }
        fact
    }
}

/// Holds the live knowledge base and swaps it atomically on reload.
pub struct RuleEngine {
    knowledge: ArcSwapOption<KnowledgeBase>,
    max_cycles: usize,
    metrics: Option<Arc<MetricsCollector>>,
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CYCLES)
    }
}

impl RuleEngine {
    pub fn new(max_cycles: usize) -> Self {
        Self {
            knowledge: ArcSwapOption::empty(),
            max_cycles,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn knowledge_base(&self) -> Option<Arc<KnowledgeBase>> {
        self.knowledge.load_full()
    }

    /// Compile the enabled rules into a new knowledge base and publish it.
    ///
    /// Returns the concatenated source. On failure the current knowledge
    /// base stays live.
    pub fn load_rules(&self, configs: &[RuleConfig]) -> RuleResult<String> {
        let source: String = configs
            .iter()
            .filter(|config| config.enabled)
            .map(|config| format!("{} \n", config.content))
            .collect();

        match KnowledgeBase::compile(DEFAULT_NAMESPACE, DEFAULT_VERSION, &source) {
            Ok(kb) => {
                info!(
                    "Loaded {} rule(s) into {} {}",
                    kb.len(),
                    kb.namespace,
                    kb.version
                );
                self.knowledge.store(Some(Arc::new(kb)));
                if let Some(metrics) = &self.metrics {
                    metrics.record_rule_load(true);
                }
                Ok(source)
            }
            Err(e) => {
                error!("Failed to compile rules: {}", e);
                if let Some(metrics) = &self.metrics {
                    metrics.record_rule_load(false);
                }
                Err(e)
            }
        }
    }

    /// Run the rules against `fact`, applying their actions.
    ///
    /// Works on a copy and writes it back only when execution succeeds.
    pub fn exec(&self, fact_name: &str, fact: &mut RequestFact) -> RuleResult<()> {
        let kb = self.knowledge.load_full().ok_or(RuleError::NoRuleData)?;
        let mut working = fact.clone();
        match kb.execute(fact_name, &mut working, self.max_cycles) {
            Ok(()) => {
                *fact = working;
                Ok(())
            }
            Err(e) => {
                error!("Rule execution failed: {}", e);
                Err(e)
            }
        }
    }

    /// Matching rules, highest salience first. Rules whose condition fails
    /// to evaluate count as not matched and are recorded in the metrics.
    pub fn match_rules(&self, fact_name: &str, fact: &RequestFact) -> RuleResult<Vec<MatchedRule>> {
        let kb = self.knowledge.load_full().ok_or(RuleError::NoRuleData)?;
        let scan = kb.scan(fact_name, fact).map_err(|e| {
            warn!("Rule match failed: {}", e);
            e
        })?;
        if let Some(metrics) = &self.metrics {
            for error in &scan.errors {
                if let RuleError::Evaluation { rule, .. } = error {
                    metrics.record_rule_error(rule);
                }
            }
        }
        Ok(scan.matched)
    }
}

/// Compile `text` in isolation and match it against a placeholder fact.
pub fn check_rule_available(text: &str) -> RuleResult<()> {
    let kb = KnowledgeBase::compile("CheckRule", DEFAULT_VERSION, text)?;
    let fact = RequestFact {
        src_ip: "127.0.0.1".to_string(),
        ..RequestFact::default()
    };
    match kb.scan(DEFAULT_FACT_NAME, &fact)?.errors.into_iter().next() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Compile `text` in isolation and report which rules match `request`.
pub fn test_rule(text: &str, request: &RuleTestRequest, geo: &GeoManager) -> RuleResult<Vec<MatchedRule>> {
    let kb = KnowledgeBase::compile("TestRule", DEFAULT_VERSION, text)?;
    let fact = request.to_fact(geo);
    kb.matching(DEFAULT_FACT_NAME, &fact)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALLOW_INTRANET: &str = r#"
rule R835f9bf09867473dbe873027241db107 "allow internal ranges" salience 10 {
    when
        RF.IPInRanges(MF.SRC_IP, "172.16.0.0-172.20.255.254", "192.168.0.0-192.168.1.254") == true
    then
        Retract("R835f9bf09867473dbe873027241db107");
}"#;

    fn config(content: &str) -> RuleConfig {
        RuleConfig {
            code: "R1".into(),
            name: "test".into(),
            content: content.into(),
            version: 1,
            version_name: "1.0".into(),
            enabled: true,
            ..RuleConfig::default()
        }
    }

    fn fact(ip: &str) -> RequestFact {
        RequestFact {
            src_ip: ip.into(),
            ..RequestFact::default()
        }
    }

    #[test]
    fn test_ip_ranges_rule() {
        let engine = RuleEngine::default();
        engine.load_rules(&[config(ALLOW_INTRANET)]).unwrap();

        let cases = [
            ("172.16.0.0", true),
            ("172.18.100.50", true),
            ("172.20.255.254", true),
            ("172.21.0.0", false),
            ("192.168.0.0", true),
            ("192.168.0.100", true),
            ("192.168.1.254", true),
            ("192.168.2.0", false),
            ("8.8.8.8", false),
            ("127.0.0.1", false),
        ];
        for (ip, expected) in cases {
            let matched = engine.match_rules("MF", &fact(ip)).unwrap();
            assert_eq!(!matched.is_empty(), expected, "ip {}", ip);
        }
    }

    #[test]
    fn test_cidr_and_reversed_logic() {
        let engine = RuleEngine::default();
        engine
            .load_rules(&[config(
                r#"rule C "deny outside" salience 10 {
                    when RF.IPInRanges(MF.SRC_IP, "192.168.1.0/24", "10.0.0.0/8") == false
                    then Retract("C");
                }"#,
            )])
            .unwrap();
        assert!(engine.match_rules("MF", &fact("10.255.255.255")).unwrap().is_empty());
        assert_eq!(engine.match_rules("MF", &fact("11.0.0.1")).unwrap().len(), 1);
    }

    #[test]
    fn test_load_concatenates_enabled_rules() {
        let engine = RuleEngine::default();
        let mut disabled = config(r#"rule B { when true then Retract("B"); }"#);
        disabled.enabled = false;
        let source = engine
            .load_rules(&[config(ALLOW_INTRANET), disabled])
            .unwrap();
        assert_eq!(source, format!("{} \n", ALLOW_INTRANET));
        let kb = engine.knowledge_base().unwrap();
        assert_eq!(kb.namespace, "Region");
        assert_eq!(kb.version, "0.0.1");
        assert_eq!(kb.len(), 1);
    }

    #[test]
    fn test_failed_load_keeps_previous_rules() {
        let engine = RuleEngine::default();
        engine.load_rules(&[config(ALLOW_INTRANET)]).unwrap();
        assert!(engine.load_rules(&[config("rule broken {")]).is_err());
        assert_eq!(engine.match_rules("MF", &fact("172.18.0.1")).unwrap().len(), 1);
    }

    #[test]
    fn test_duplicate_rule_names_rejected() {
        let engine = RuleEngine::default();
        let rule = r#"rule Same { when true then Complete(); }"#;
        assert!(matches!(
            engine.load_rules(&[config(rule), config(rule)]),
            Err(RuleError::DuplicateRule(name)) if name == "Same"
        ));
    }

    #[test]
    fn test_no_rule_data() {
        let engine = RuleEngine::default();
        assert!(matches!(
            engine.match_rules("MF", &fact("1.1.1.1")),
            Err(RuleError::NoRuleData)
        ));
        assert!(matches!(
            engine.exec("MF", &mut fact("1.1.1.1")),
            Err(RuleError::NoRuleData)
        ));
    }

    #[test]
    fn test_match_sorted_by_salience_and_non_mutating() {
        let engine = RuleEngine::default();
        engine
            .load_rules(&[
                config(r#"rule Low "low" salience 1 { when true then MF.EXEC_RESULT = 1; Retract("Low"); }"#),
                config(r#"rule High "high" salience 50 { when true then MF.EXEC_RESULT = 2; Retract("High"); }"#),
            ])
            .unwrap();
        let f = fact("1.1.1.1");
        let before = f.clone();
        let matched = engine.match_rules("MF", &f).unwrap();
        assert_eq!(
            matched.iter().map(|m| m.name.as_str()).collect::<Vec<_>>(),
            vec!["High", "Low"]
        );
        assert_eq!(f, before);
    }

    #[test]
    fn test_exec_applies_actions_in_salience_order() {
        let engine = RuleEngine::default();
        engine
            .load_rules(&[
                config(r#"rule Low salience 1 { when true then MF.EXEC_RESULT = 1; Retract("Low"); }"#),
                config(r#"rule High salience 50 { when true then MF.EXEC_RESULT = 2; MF.COUNTRY = "X"; Retract("High"); }"#),
            ])
            .unwrap();
        let mut f = fact("1.1.1.1");
        engine.exec("MF", &mut f).unwrap();
        assert_eq!(f.exec_result, 1);
        assert_eq!(f.country, "X");
    }

    #[test]
    fn test_exec_chains_on_changed_facts() {
        let engine = RuleEngine::default();
        engine
            .load_rules(&[
                config(r#"rule First salience 10 { when MF.RISK_LEVEL == 0 then MF.RISK_LEVEL = 1; }"#),
                config(r#"rule Second salience 5 { when MF.RISK_LEVEL == 1 then MF.EXEC_RESULT = 9; Complete(); }"#),
            ])
            .unwrap();
        let mut f = fact("1.1.1.1");
        engine.exec("MF", &mut f).unwrap();
        assert_eq!(f.risk_level, 1);
        assert_eq!(f.exec_result, 9);
    }

    #[test]
    fn test_cycle_limit_leaves_fact_untouched() {
        let engine = RuleEngine::new(10);
        engine
            .load_rules(&[config(r#"rule Spin { when true then MF.EXEC_RESULT = MF.EXEC_RESULT + 1; }"#)])
            .unwrap();
        let mut f = fact("1.1.1.1");
        assert!(matches!(
            engine.exec("MF", &mut f),
            Err(RuleError::CycleLimit(10))
        ));
        assert_eq!(f.exec_result, 0);
    }

    #[test]
    fn test_wrong_fact_name_is_an_error() {
        let engine = RuleEngine::default();
        engine.load_rules(&[config(ALLOW_INTRANET)]).unwrap();
        assert!(matches!(
            engine.match_rules("fact", &fact("1.1.1.1")),
            Err(RuleError::UnknownFact(name)) if name == "fact"
        ));
        assert!(matches!(
            engine.exec("fact", &mut fact("1.1.1.1")),
            Err(RuleError::UnknownFact(_))
        ));
    }

    #[test]
    fn test_failing_rule_does_not_hide_others() {
        let metrics = Arc::new(MetricsCollector::new().unwrap());
        let engine = RuleEngine::default().with_metrics(metrics.clone());
        engine
            .load_rules(&[
                config(r#"rule Bad "divides" salience 100 { when MF.CONTENT_LENGTH / MF.RISK_LEVEL > 1 then Retract("Bad"); }"#),
                config(r#"rule Admin "admin area" salience 1 { when MF.URL == "/admin" then MF.EXEC_RESULT = 7; Retract("Admin"); }"#),
            ])
            .unwrap();
        let mut f = RequestFact {
            url: "/admin".into(),
            content_length: 10,
            ..fact("1.1.1.1")
        };

        let matched = engine.match_rules("MF", &f).unwrap();
        assert_eq!(matched.iter().map(|m| m.name.as_str()).collect::<Vec<_>>(), vec!["Admin"]);
        assert_eq!(metrics.rule_errors("Bad"), 1);

        engine.exec("MF", &mut f).unwrap();
        assert_eq!(f.exec_result, 7);

        let kb = engine.knowledge_base().unwrap();
        let scan = kb.scan("MF", &f).unwrap();
        assert!(matches!(&scan.errors[..], [RuleError::Evaluation { rule, .. }] if rule == "Bad"));
    }

    #[test]
    fn test_check_rule_available() {
        assert!(check_rule_available(ALLOW_INTRANET).is_ok());
        assert!(check_rule_available("rule X { when MF.NOPE then Complete(); }").is_err());
        assert!(check_rule_available(r#"rule X { when MF.SRC_IP + 1 then Complete(); }"#).is_err());
    }

    #[test]
    fn test_rule_tester_uses_request_fields() {
        let request = RuleTestRequest {
            test_src_ip: "10.1.1.1".into(),
            url: "/wp-login.php".into(),
            user_agent: "curl/8.0".into(),
            ..RuleTestRequest::default()
        };
        let geo = GeoManager::new();
        let matched = test_rule(
            r#"rule Probe "probe" salience 1 {
                when MF.URL.EndsWith(".php") && MF.USER_AGENT.StartsWith("curl") && MF.METHOD == "GET"
                    && MF.COUNTRY == "Unconfigured"
                then Retract("Probe");
            }"#,
            &request,
            &geo,
        )
        .unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].description, "probe");
    }

    #[test]
    fn test_concurrent_match_during_reload() {
        let engine = Arc::new(RuleEngine::default());
        engine.load_rules(&[config(ALLOW_INTRANET)]).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let matched = engine.match_rules("MF", &fact("172.18.0.1")).unwrap();
                        assert_eq!(matched.len(), 1);
                    }
                })
            })
            .collect();
        for _ in 0..50 {
            engine.load_rules(&[config(ALLOW_INTRANET)]).unwrap();
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
