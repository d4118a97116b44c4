use prometheus_client::{
    encoding::{text, EncodeLabelSet},
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};

/// Error classification for `ghostwire_errors_total`. Label cardinality is
/// bounded to this enumeration.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    LabelRead,
    Iptables,
    ChainVerify,
}

impl ErrorKind {
    const ALL: [ErrorKind; 3] = [ErrorKind::LabelRead, ErrorKind::Iptables, ErrorKind::ChainVerify];

    fn as_str(self) -> &'static str {
        match self {
            ErrorKind::LabelRead => "label_read",
            ErrorKind::Iptables => "iptables",
            ErrorKind::ChainVerify => "chain_verify",
        }
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ErrorLabels {
    kind: &'static str,
}

// === Metrics ===

/// Prometheus instruments for the watcher.
#[derive(Debug)]
pub struct Metrics {
    registry: Registry,
    jump_active: Gauge,
    errors: Family<ErrorLabels, Counter>,
    dnat_rules: Gauge,
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("ghostwire");

        let jump_active = Gauge::default();
        registry.register(
            "jump_active",
            "Whether the DNAT jump rule is active (1) or inactive (0)",
            jump_active.clone(),
        );

        let errors = Family::<ErrorLabels, Counter>::default();
        registry.register(
            "errors",
            "Total number of watcher errors by kind",
            errors.clone(),
        );
        // Pre-register every kind so the series appear before the first
        // error.
        for kind in ErrorKind::ALL {
            let _ = errors.get_or_create(&ErrorLabels {
                kind: kind.as_str(),
            });
        }

        let dnat_rules = Gauge::default();
        registry.register(
            "dnat_rules",
            "Number of DNAT rules discovered from the audit map",
            dnat_rules.clone(),
        );

        Self {
            registry,
            jump_active,
            errors,
            dnat_rules,
        }
    }

    pub fn set_jump_active(&self, active: bool) {
        self.jump_active.set(i64::from(active));
    }

    pub fn incr_error(&self, kind: ErrorKind) {
        self.errors
            .get_or_create(&ErrorLabels {
                kind: kind.as_str(),
            })
            .inc();
    }

    pub fn set_dnat_rules(&self, count: usize) {
        self.dnat_rules.set(count as i64);
    }

    /// Renders the registry in the OpenMetrics text format.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buf = String::new();
        text::encode(&mut buf, &self.registry)?;
        Ok(buf)
    }

    #[cfg(test)]
    pub(crate) fn jump_active_value(&self) -> i64 {
        self.jump_active.get()
    }

    #[cfg(test)]
    pub(crate) fn error_count(&self, kind: ErrorKind) -> u64 {
        self.errors
            .get_or_create(&ErrorLabels {
                kind: kind.as_str(),
            })
            .get()
    }

    #[cfg(test)]
    pub(crate) fn dnat_rules_value(&self) -> i64 {
        self.dnat_rules.get()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposition_carries_all_instruments() {
        let metrics = Metrics::new();
        metrics.set_jump_active(true);
        metrics.incr_error(ErrorKind::Iptables);
        metrics.set_dnat_rules(4);

        let text = metrics.encode().unwrap();
        assert!(text.contains("ghostwire_jump_active 1"), "{text}");
        assert!(
            text.contains("ghostwire_errors_total{kind=\"iptables\"} 1"),
            "{text}"
        );
        assert!(text.contains("ghostwire_dnat_rules 4"), "{text}");
    }

    #[test]
    fn error_kinds_are_preregistered() {
        let metrics = Metrics::new();
        let text = metrics.encode().unwrap();
        for kind in ["label_read", "iptables", "chain_verify"] {
            assert!(
                text.contains(&format!("ghostwire_errors_total{{kind=\"{kind}\"}} 0")),
                "{kind}: {text}"
            );
        }
    }

    #[test]
    fn jump_gauge_toggles() {
        let metrics = Metrics::new();
        assert_eq!(metrics.jump_active_value(), 0);
        metrics.set_jump_active(true);
        assert_eq!(metrics.jump_active_value(), 1);
        metrics.set_jump_active(false);
        assert_eq!(metrics.jump_active_value(), 0);
    }

    #[test]
    fn error_counters_accumulate_per_kind() {
        let metrics = Metrics::new();
        metrics.incr_error(ErrorKind::LabelRead);
        metrics.incr_error(ErrorKind::LabelRead);
        metrics.incr_error(ErrorKind::ChainVerify);
        assert_eq!(metrics.error_count(ErrorKind::LabelRead), 2);
        assert_eq!(metrics.error_count(ErrorKind::ChainVerify), 1);
        assert_eq!(metrics.error_count(ErrorKind::Iptables), 0);
    }
}
