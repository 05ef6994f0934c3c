//! Intent Classifier
//!
//! Routes a question to one specialist:
//! - Statistical: descriptive statistics over the ledger (mean, percentiles, spread)
//! - Financial: risk, projections, liquidity and trends
//!
//! Rules are checked in order and the first match wins. Every input gets a route.

use crate::models::Specialist;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref STAT_TERMS: Regex = Regex::new(
        r"(?i)promedio|media|mediana|percentil|desviaci[oó]n|varianza|correlaci[oó]n|regresi[oó]n|distribuci[oó]n|histograma|\bEDA\b|kpi|\bstd\b|\bmean\b|average|median|percentile|deviation|variance|correlation|regression|distribution|histogram"
    )
    .unwrap();

    static ref FIN_TERMS: Regex = Regex::new(
        r"(?i)riesgo|proyecci[oó]n|tendenc|variaci[oó]n|flujo|rendimiento|sensibilidad|escenario|\bVaR\b|valor en riesgo|margen|liquidez|apalancamiento|\bEBIT|WACC|\brisk|projection|\btrend|variation|\bflow|\byield|sensitivity|scenario|\bmargin|liquidity|leverage"
    )
    .unwrap();

    static ref DOMAIN_CUES: Regex = Regex::new(
        r"(?i)banco|cuenta|saldo|adiciones|salidas|libros|empresa|periodo|\bmes\b|a[ñn]o|\b\d{4}-\d{2}\b|\bbank|account|balance|company|period|month|\byear|inflow|outflow"
    )
    .unwrap();

    static ref FORWARD_LOOKING: Regex = Regex::new(
        r"(?i)proyecci[oó]n|pron[oó]stico|escenario|riesgo|tendenc|variaci[oó]n|forecast|projection|scenario|\brisk|\btrend"
    )
    .unwrap();
}

/// Which rule produced the route, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteReason {
    StatisticalTerms,
    FinancialTerms,
    DomainCueForwardLooking,
    DomainCueDescriptive,
    Default,
}

/// Intent classifier
pub struct IntentClassifier;

impl IntentClassifier {
    /// Classify a question into a specialist.
    pub fn classify(text: &str) -> Specialist {
        Self::classify_with_reason(text).0
    }

    pub fn classify_with_reason(text: &str) -> (Specialist, RouteReason) {
        if STAT_TERMS.is_match(text) {
            return (Specialist::Statistical, RouteReason::StatisticalTerms);
        }
        if FIN_TERMS.is_match(text) {
            return (Specialist::Financial, RouteReason::FinancialTerms);
        }
        if DOMAIN_CUES.is_match(text) {
            return if FORWARD_LOOKING.is_match(text) {
                (Specialist::Financial, RouteReason::DomainCueForwardLooking)
            } else {
                (Specialist::Statistical, RouteReason::DomainCueDescriptive)
            };
        }
        (Specialist::Financial, RouteReason::Default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statistical_questions() {
        let cases = vec![
            "¿Cuál es el promedio de movimientos?",
            "mediana del saldo libros por banco",
            "show me the percentile distribution",
            "desviación estándar de las salidas",
        ];

        for c in cases {
            assert_eq!(IntentClassifier::classify(c), Specialist::Statistical, "{}", c);
        }
    }

    #[test]
    fn test_financial_questions() {
        let cases = vec![
            "¿Qué riesgo de liquidez hay?",
            "proyección del saldo para el próximo mes",
            "what is the cash flow trend",
            "apalancamiento de la empresa",
        ];

        for c in cases {
            assert_eq!(IntentClassifier::classify(c), Specialist::Financial, "{}", c);
        }
    }

    #[test]
    fn test_statistical_wins_over_financial() {
        assert_eq!(
            IntentClassifier::classify("percentil 90 del riesgo"),
            Specialist::Statistical
        );
    }

    #[test]
    fn test_domain_cues() {
        assert_eq!(
            IntentClassifier::classify_with_reason("saldo del banco en 2024-01"),
            (Specialist::Statistical, RouteReason::DomainCueDescriptive)
        );
        assert_eq!(
            IntentClassifier::classify_with_reason("pronóstico del saldo de la cuenta"),
            (Specialist::Financial, RouteReason::DomainCueForwardLooking)
        );
    }

    #[test]
    fn test_default_is_financial() {
        assert_eq!(
            IntentClassifier::classify_with_reason("hola"),
            (Specialist::Financial, RouteReason::Default)
        );
        assert_eq!(IntentClassifier::classify(""), Specialist::Financial);
    }
}
