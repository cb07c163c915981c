//! Per-session usage accounting.

use std::time::SystemTime;

use tether_types::{ApiUsage, Provider, UsageEntry};

/// Ordered record of usage entries with running totals.
///
/// Rollback and branch call [`UsageLedger::reset`]; the counts describe the
/// conversation as it now stands.
#[derive(Debug, Clone, Default)]
pub struct UsageLedger {
    entries: Vec<UsageEntry>,
}

impl UsageLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record counts the provider reported.
    pub fn record_reported(
        &mut self,
        provider: Provider,
        model: &str,
        usage: ApiUsage,
    ) -> &UsageEntry {
        self.push(provider, model, usage, false)
    }

    /// Record counts produced by the local estimator.
    pub fn record_estimated(
        &mut self,
        provider: Provider,
        model: &str,
        usage: ApiUsage,
    ) -> &UsageEntry {
        self.push(provider, model, usage, true)
    }

    fn push(
        &mut self,
        provider: Provider,
        model: &str,
        usage: ApiUsage,
        is_estimated: bool,
    ) -> &UsageEntry {
        tracing::debug!(
            provider = provider.as_str(),
            model,
            input = usage.input_tokens,
            output = usage.output_tokens,
            is_estimated,
            "Usage recorded"
        );
        self.entries.push(UsageEntry {
            provider,
            model: model.to_string(),
            usage,
            is_estimated,
            recorded_at: SystemTime::now(),
        });
        let last = self.entries.len() - 1;
        &self.entries[last]
    }

    #[must_use]
    pub fn entries(&self) -> &[UsageEntry] {
        &self.entries
    }

    #[must_use]
    pub fn last(&self) -> Option<&UsageEntry> {
        self.entries.last()
    }

    #[must_use]
    pub fn totals(&self) -> ApiUsage {
        self.entries.iter().fold(ApiUsage::default(), |acc, e| ApiUsage {
            input_tokens: acc.input_tokens.saturating_add(e.usage.input_tokens),
            output_tokens: acc.output_tokens.saturating_add(e.usage.output_tokens),
        })
    }

    /// Whether any entry in the ledger is an estimate.
    #[must_use]
    pub fn has_estimates(&self) -> bool {
        self.entries.iter().any(|e| e.is_estimated)
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use tether_types::{ApiUsage, Provider};

    use super::UsageLedger;

    #[test]
    fn totals_sum_entries_and_reset_clears() {
        let mut ledger = UsageLedger::new();
        ledger.record_reported(Provider::OpenAI, "gpt-4o", ApiUsage::new(10, 5));
        let entry = ledger.record_estimated(Provider::Local, "local", ApiUsage::new(3, 7));
        assert!(entry.is_estimated);
        assert_eq!(ledger.totals(), ApiUsage::new(13, 12));
        assert!(ledger.has_estimates());

        ledger.reset();
        assert!(ledger.entries().is_empty());
        assert_eq!(ledger.totals(), ApiUsage::default());
    }
}
