//! Reply composition — deterministic, cited rendering.
//!
//! Renders the session outcome into a professional French reply:
//! salutation, classification line, answer body, detected references,
//! security note, and a numbered source list in evidence order. No
//! generation calls happen here.

use tracing::debug;

use crate::error::ComposeError;
use crate::triage::types::{Category, Classification, Email, EvidenceSet, Urgency};

/// At most this many detected ids/urls are echoed back.
const MAX_REFS: usize = 5;

const SECURITY_NOTE: &str = "Sécurité : ne partagez jamais de mot de passe en clair et ne \
     communiquez pas d'informations sensibles (clés, tokens) par e-mail.";

/// Deterministic reply renderer.
pub struct Composer {
    /// Refuse to compose an incident reply without at least one citation.
    strict_citation_for_incident: bool,
}

impl Composer {
    pub fn new(strict_citation_for_incident: bool) -> Self {
        Self {
            strict_citation_for_incident,
        }
    }

    /// Render the final reply.
    ///
    /// `answer` is the generation capability's text; `None` (aborted
    /// session) falls back to a per-category action plan. Fails only
    /// under strict mode, for an incident with no citations.
    pub fn compose(
        &self,
        email: &Email,
        classification: &Classification,
        answer: Option<&str>,
        evidence: &EvidenceSet,
        aborted: bool,
    ) -> Result<String, ComposeError> {
        if self.strict_citation_for_incident
            && classification.category == Category::Incident
            && evidence.is_empty()
        {
            return Err(ComposeError::EmptyEvidenceForIncident);
        }

        let subject = if email.subject.is_empty() {
            "(sans objet)"
        } else {
            &email.subject
        };

        let mut parts: Vec<String> = Vec::new();
        parts.push(salutation(&email.sender));
        parts.push(format!(
            "Votre message a été classé : {} (urgence : {}).",
            classification.category.label(),
            classification.urgency.label(),
        ));
        parts.push(opening(classification));

        match answer {
            Some(text) if !text.trim().is_empty() => parts.push(text.trim().to_string()),
            _ => parts.push(fallback_plan(classification.category)),
        }

        if let Some(refs) = references_block(email) {
            parts.push(refs);
        }

        if aborted {
            parts.push(
                "Note : le traitement automatique de ce message a été interrompu ; \
                 un agent reprendra votre dossier."
                    .to_string(),
            );
        }

        parts.push(SECURITY_NOTE.to_string());
        parts.push(sources_block(evidence));
        parts.push("Cordialement,\nL'équipe Support".to_string());

        debug!(
            citations = evidence.len(),
            aborted, "Composed reply"
        );
        Ok(format!("Objet: RE: {subject}\n\n{}\n", parts.join("\n\n")))
    }
}

/// `Alice Martin <alice@example.com>` → `Bonjour Alice,`.
fn salutation(sender: &str) -> String {
    let display = sender.split('<').next().unwrap_or("").trim();
    match display.split_whitespace().next() {
        Some(first) if !first.contains('@') => format!("Bonjour {first},"),
        _ => "Bonjour,".to_string(),
    }
}

fn opening(classification: &Classification) -> String {
    match classification.category {
        Category::Incident => {
            if classification.urgency >= Urgency::High {
                "Nous avons bien pris en compte votre incident et le traitons en priorité."
                    .to_string()
            } else {
                "Nous avons bien pris en compte votre incident. Voici notre plan d'action."
                    .to_string()
            }
        }
        Category::Request => "Merci pour votre demande. Voici la procédure envisagée :".to_string(),
        Category::Question => "Merci pour votre message. Voici des éléments de réponse :".to_string(),
    }
}

/// Generic action plan used when the session produced no answer text.
fn fallback_plan(category: Category) -> String {
    let steps: &[&str] = match category {
        Category::Incident => &[
            "Identifier le périmètre de l'incident (utilisateur impacté, URL, horodatage).",
            "Reproduire l'erreur et collecter les logs pertinents.",
            "Appliquer la procédure de remédiation documentée si disponible.",
            "Escalader au niveau approprié si le blocage persiste.",
        ],
        Category::Request => &[
            "Vérifier la complétude de la demande et son éligibilité.",
            "Appliquer la procédure décrite dans la base de connaissances.",
            "Informer le demandeur des délais et validations nécessaires.",
            "Confirmer la bonne exécution et clore la demande.",
        ],
        Category::Question => &[
            "Qualifier la question et vérifier la documentation existante.",
            "Fournir l'explication ou le lien vers la procédure adaptée.",
            "Proposer, si nécessaire, un rendez-vous court pour clarifier.",
        ],
    };
    steps
        .iter()
        .enumerate()
        .map(|(i, s)| format!("{}. {}", i + 1, s))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Ids and urls detected in the email, capped at [`MAX_REFS`] each.
fn references_block(email: &Email) -> Option<String> {
    let mut lines = Vec::new();
    if !email.entities.ids.is_empty() {
        let shown: Vec<&str> = email
            .entities
            .ids
            .iter()
            .take(MAX_REFS)
            .map(String::as_str)
            .collect();
        lines.push(format!("Références détectées : {}", shown.join(", ")));
    }
    if !email.entities.urls.is_empty() {
        let shown: Vec<&str> = email
            .entities
            .urls
            .iter()
            .take(MAX_REFS)
            .map(String::as_str)
            .collect();
        lines.push(format!("Liens mentionnés : {}", shown.join(", ")));
    }
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

/// Numbered source list, in evidence accumulation order.
fn sources_block(evidence: &EvidenceSet) -> String {
    if evidence.is_empty() {
        return "Sources : (aucune référence trouvée)".to_string();
    }
    let mut lines = vec!["Sources :".to_string()];
    for (i, citation) in evidence.citations().iter().enumerate() {
        lines.push(format!(
            "{}. {} — {}",
            i + 1,
            citation.document_id,
            citation.section_heading,
        ));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::Extractor;
    use crate::triage::types::Citation;
    use chrono::Utc;

    fn email(sender: &str, subject: &str, body: &str) -> Email {
        let extractor = Extractor::with_defaults();
        let entities = extractor.entities(&format!("{subject} {body}"));
        Email {
            sender: sender.into(),
            subject: subject.into(),
            body: body.into(),
            received_at: Utc::now(),
            entities,
        }
    }

    fn classification(category: Category, urgency: Urgency) -> Classification {
        Classification {
            category,
            urgency,
            rationale: "test".into(),
        }
    }

    fn citation(doc: &str, heading: &str) -> Citation {
        Citation {
            document_id: doc.into(),
            section_heading: heading.into(),
            excerpt: "extrait".into(),
            score: 1.0,
        }
    }

    #[test]
    fn sources_are_numbered_in_accumulation_order() {
        let mut evidence = EvidenceSet::new();
        evidence.push(citation("incident_502", "Procédure de diagnostic"));
        evidence.push(citation("reset_mot_de_passe", "Procédure"));
        evidence.push(citation("provisioning_acces", "Création d'un accès"));

        let composer = Composer::new(false);
        let reply = composer
            .compose(
                &email("alice@client.example", "Erreur 502", "Erreur 502 sur login"),
                &classification(Category::Incident, Urgency::Medium),
                Some("Voici la marche à suivre."),
                &evidence,
                false,
            )
            .unwrap();

        assert!(reply.contains("1. incident_502 — Procédure de diagnostic"));
        assert!(reply.contains("2. reset_mot_de_passe — Procédure"));
        assert!(reply.contains("3. provisioning_acces — Création d'un accès"));
    }

    #[test]
    fn strict_mode_rejects_incident_without_citations() {
        let composer = Composer::new(true);
        let result = composer.compose(
            &email("a@b.example", "Panne", "Tout est en panne"),
            &classification(Category::Incident, Urgency::High),
            Some("Réponse"),
            &EvidenceSet::new(),
            false,
        );
        assert!(matches!(
            result,
            Err(ComposeError::EmptyEvidenceForIncident)
        ));
    }

    #[test]
    fn strict_mode_allows_non_incident_without_citations() {
        let composer = Composer::new(true);
        let reply = composer
            .compose(
                &email("a@b.example", "Question", "Comment faire ?"),
                &classification(Category::Question, Urgency::Low),
                Some("Réponse"),
                &EvidenceSet::new(),
                false,
            )
            .unwrap();
        assert!(reply.contains("aucune référence trouvée"));
    }

    #[test]
    fn zero_citations_yield_explicit_notice() {
        let composer = Composer::new(false);
        let reply = composer
            .compose(
                &email("a@b.example", "Incident", "Grosse panne"),
                &classification(Category::Incident, Urgency::High),
                Some("Nous investiguons."),
                &EvidenceSet::new(),
                false,
            )
            .unwrap();
        assert!(reply.contains("Sources : (aucune référence trouvée)"));
    }

    #[test]
    fn salutation_uses_display_name() {
        assert_eq!(
            salutation("Alice Martin <alice@client.example>"),
            "Bonjour Alice,"
        );
        assert_eq!(salutation("alice@client.example"), "Bonjour,");
        assert_eq!(salutation(""), "Bonjour,");
    }

    #[test]
    fn aborted_session_gets_notice_and_fallback_plan() {
        let composer = Composer::new(false);
        let reply = composer
            .compose(
                &email("a@b.example", "Panne", "Erreur 502 partout"),
                &classification(Category::Incident, Urgency::High),
                None,
                &EvidenceSet::new(),
                true,
            )
            .unwrap();
        assert!(reply.contains("interrompu"));
        assert!(reply.contains("1. Identifier le périmètre de l'incident"));
    }

    #[test]
    fn references_echo_detected_ids_and_urls() {
        let composer = Composer::new(false);
        let reply = composer
            .compose(
                &email(
                    "a@b.example",
                    "Erreur",
                    "Erreur 502 sur https://portal.example.com, ticket INC-99",
                ),
                &classification(Category::Incident, Urgency::Medium),
                Some("ok"),
                &EvidenceSet::new(),
                false,
            )
            .unwrap();
        assert!(reply.contains("Références détectées : 502, INC-99"));
        assert!(reply.contains("Liens mentionnés : https://portal.example.com"));
    }

    #[test]
    fn subject_line_is_prefixed() {
        let composer = Composer::new(false);
        let reply = composer
            .compose(
                &email("a@b.example", "Accès portail", "Merci de créer un accès"),
                &classification(Category::Request, Urgency::Low),
                Some("ok"),
                &EvidenceSet::new(),
                false,
            )
            .unwrap();
        assert!(reply.starts_with("Objet: RE: Accès portail\n"));
    }

    #[test]
    fn empty_subject_renders_placeholder() {
        let composer = Composer::new(false);
        let reply = composer
            .compose(
                &email("a@b.example", "", "Bonjour"),
                &classification(Category::Question, Urgency::Low),
                Some("ok"),
                &EvidenceSet::new(),
                false,
            )
            .unwrap();
        assert!(reply.starts_with("Objet: RE: (sans objet)"));
    }

    #[test]
    fn classification_line_present() {
        let composer = Composer::new(false);
        let reply = composer
            .compose(
                &email("a@b.example", "Panne", "panne critique en production"),
                &classification(Category::Incident, Urgency::Critical),
                Some("ok"),
                &EvidenceSet::new(),
                false,
            )
            .unwrap();
        assert!(reply.contains("classé : incident (urgence : critique)"));
    }

    #[test]
    fn compose_is_deterministic() {
        let composer = Composer::new(false);
        let e = email("a@b.example", "Erreur 502", "Erreur 502 sur login");
        let c = classification(Category::Incident, Urgency::Medium);
        let first = composer
            .compose(&e, &c, Some("Réponse."), &EvidenceSet::new(), false)
            .unwrap();
        let second = composer
            .compose(&e, &c, Some("Réponse."), &EvidenceSet::new(), false)
            .unwrap();
        assert_eq!(first, second);
    }
}
