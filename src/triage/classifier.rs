//! Deterministic rule-based classifier.
//!
//! Keyword tables and escalation rules are configuration data, not logic.
//! Matching is case- and accent-insensitive (French is the primary
//! locale, with English mirrors in the default tables). The classifier
//! never fails: an email matching nothing is a low-urgency question.

use chrono::Utc;
use regex::Regex;
use tracing::debug;

use crate::text::normalize;
use crate::triage::types::{Category, Classification, Email, Urgency};

/// What fires an escalation rule. Each firing rule raises urgency by
/// exactly one level, capped at critical.
#[derive(Debug, Clone)]
pub enum Trigger {
    /// An extracted id looks like an HTTP 4xx/5xx error code.
    ErrorCode,
    /// Any of these phrases appears in subject + body
    /// (accent/case-insensitive).
    AnyPhrase(Vec<String>),
    /// Sender address belongs to one of these domains. Off by default.
    SenderDomain(Vec<String>),
    /// Message received within this window. Off by default — this rule
    /// depends on the wall clock, so enabling it trades away the
    /// classifier's purity.
    ReceivedWithin(chrono::Duration),
}

/// A named escalation rule.
#[derive(Debug, Clone)]
pub struct EscalationRule {
    /// Short name, shown in the rationale.
    pub name: String,
    pub trigger: Trigger,
}

/// Classifier configuration: keyword tables per category plus the ordered
/// escalation rules.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// `(category, trigger phrases)` — categories are evaluated in
    /// incident > request > question priority order regardless of the
    /// order here.
    pub keywords: Vec<(Category, Vec<String>)>,
    /// Ordered escalation rules; each match raises urgency one level.
    pub escalations: Vec<EscalationRule>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        let phrases = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        Self {
            keywords: vec![
                (
                    Category::Incident,
                    phrases(&[
                        "incident",
                        "panne",
                        "bug",
                        "erreur",
                        "impossible",
                        "ne marche pas",
                        "ne fonctionne pas",
                        "bloqué",
                        "échec",
                        "hors service",
                        "error",
                        "broken",
                        "outage",
                        "crash",
                        "down",
                    ]),
                ),
                (
                    Category::Request,
                    phrases(&[
                        "demande",
                        "créer",
                        "création",
                        "ajouter",
                        "ajout",
                        "accès",
                        "activer",
                        "activation",
                        "suppression",
                        "request",
                        "create",
                        "access",
                        "enable",
                        "provision",
                    ]),
                ),
                (
                    Category::Question,
                    phrases(&[
                        "comment",
                        "pourquoi",
                        "pouvez-vous",
                        "quelle",
                        "quel",
                        "question",
                        "how",
                        "why",
                        "what",
                        "?",
                    ]),
                ),
            ],
            escalations: vec![
                EscalationRule {
                    name: "code_erreur".into(),
                    trigger: Trigger::ErrorCode,
                },
                EscalationRule {
                    name: "termes_urgents".into(),
                    trigger: Trigger::AnyPhrase(phrases(&[
                        "urgent",
                        "urgence",
                        "asap",
                        "immédiat",
                        "au plus vite",
                    ])),
                },
                EscalationRule {
                    name: "blocage_production".into(),
                    trigger: Trigger::AnyPhrase(phrases(&[
                        "critique",
                        "bloqué",
                        "bloquant",
                        "production",
                        "en panne",
                        "down",
                        "hors service",
                    ])),
                },
            ],
        }
    }
}

/// Compiled classifier. `classify` is a pure function of the email under
/// the default configuration.
#[derive(Debug)]
pub struct Classifier {
    /// Normalized keyword tables, one entry per category.
    keywords: Vec<(Category, Vec<String>)>,
    escalations: Vec<EscalationRule>,
    error_code_re: Regex,
}

/// Category evaluation order: incidents are costlier to miss.
const CATEGORY_PRIORITY: [Category; 3] = [Category::Incident, Category::Request, Category::Question];

impl Classifier {
    pub fn new(config: ClassifierConfig) -> Self {
        let keywords = config
            .keywords
            .into_iter()
            .map(|(category, phrases)| {
                (category, phrases.iter().map(|p| normalize(p)).collect())
            })
            .collect();

        let escalations = config
            .escalations
            .into_iter()
            .map(|rule| EscalationRule {
                name: rule.name,
                trigger: match rule.trigger {
                    Trigger::AnyPhrase(phrases) => {
                        Trigger::AnyPhrase(phrases.iter().map(|p| normalize(p)).collect())
                    }
                    other => other,
                },
            })
            .collect();

        Self {
            keywords,
            escalations,
            error_code_re: Regex::new(r"^[45]\d\d$").expect("error code pattern is valid"),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ClassifierConfig::default())
    }

    /// Classify an email. Never fails; no match at all yields
    /// `{question, low}`.
    pub fn classify(&self, email: &Email) -> Classification {
        let text = normalize(&email.text());
        let subject = normalize(&email.subject);
        let mut reasons: Vec<String> = Vec::new();

        let category = self.pick_category(&subject, &text, &mut reasons);

        let mut urgency = Urgency::Low;
        for rule in &self.escalations {
            if self.rule_fires(rule, email, &text) {
                urgency = urgency.raised();
                reasons.push(format!("urgence +1 ({})", rule.name));
            }
        }

        let classification = Classification {
            category,
            urgency,
            rationale: reasons.join("; "),
        };
        debug!(
            category = category.label(),
            urgency = urgency.label(),
            rationale = %classification.rationale,
            "Classified email"
        );
        classification
    }

    fn pick_category(&self, subject: &str, text: &str, reasons: &mut Vec<String>) -> Category {
        // Explicit subject tags short-circuit keyword matching.
        if subject.contains("[incident]") {
            reasons.push("sujet tagué [incident]".into());
            return Category::Incident;
        }
        if subject.contains("[demande]") || subject.contains("[request]") {
            reasons.push("sujet tagué [demande]".into());
            return Category::Request;
        }

        // First category in priority order with a matching phrase wins.
        for wanted in CATEGORY_PRIORITY {
            let Some((_, phrases)) = self.keywords.iter().find(|(c, _)| *c == wanted) else {
                continue;
            };
            if let Some(hit) = phrases.iter().find(|p| text.contains(p.as_str())) {
                reasons.push(format!("mot-clé {} « {} »", wanted.label(), hit));
                return wanted;
            }
        }

        reasons.push("aucun mot-clé de catégorie".into());
        Category::Question
    }

    fn rule_fires(&self, rule: &EscalationRule, email: &Email, text: &str) -> bool {
        match &rule.trigger {
            Trigger::ErrorCode => email
                .entities
                .ids
                .iter()
                .any(|id| self.error_code_re.is_match(id)),
            Trigger::AnyPhrase(phrases) => {
                phrases.iter().any(|p| text.contains(p.as_str()))
            }
            Trigger::SenderDomain(domains) => {
                let sender = normalize(&email.sender);
                domains
                    .iter()
                    .any(|d| sender.ends_with(&normalize(d)))
            }
            Trigger::ReceivedWithin(window) => {
                Utc::now().signed_duration_since(email.received_at) <= *window
            }
        }
    }
}
