//! Reference data read by transform steps

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;

use super::TransformStep;
use crate::errors::AppResult;

/// One canonical name and the spellings that map onto it
#[derive(Debug, Clone, PartialEq)]
pub struct SynonymEntry {
    pub canonical: String,
    pub synonyms: Vec<String>,
}

impl SynonymEntry {
    /// `raw_synonyms` is a list separated by `,`, `;` or `|`
    pub fn new(canonical: &str, raw_synonyms: &str) -> Self {
        Self {
            canonical: canonical.to_string(),
            synonyms: raw_synonyms
                .split([',', ';', '|'])
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }
}

/// Read-only access to lookup tables; implementations must not modify them
#[async_trait]
pub trait ReferenceData: Send + Sync {
    async fn synonyms(&self, lookup: &str) -> AppResult<Vec<SynonymEntry>>;

    /// `(date, rate)` pairs for one currency, ascending by date
    async fn exchange_rates(&self, currency: &str) -> AppResult<Vec<(NaiveDate, f64)>>;
}

/// Reference data that is never consulted; for sources without lookup steps
pub struct NoReferenceData;

#[async_trait]
impl ReferenceData for NoReferenceData {
    async fn synonyms(&self, lookup: &str) -> AppResult<Vec<SynonymEntry>> {
        Err(crate::errors::AppError::configuration(format!(
            "reference lookup '{lookup}' is not available"
        )))
    }

    async fn exchange_rates(&self, currency: &str) -> AppResult<Vec<(NaiveDate, f64)>> {
        Err(crate::errors::AppError::configuration(format!(
            "exchange rates for '{currency}' are not available"
        )))
    }
}

/// Reference data loaded once per transform call
#[derive(Debug, Clone, Default)]
pub struct ReferenceSnapshot {
    /// lookup name -> normalized spelling -> canonical name
    synonyms: HashMap<String, HashMap<String, String>>,
    rates: HashMap<String, Vec<(NaiveDate, f64)>>,
}

impl ReferenceSnapshot {
    /// Load only what `steps` refer to
    pub async fn load(reference: &dyn ReferenceData, steps: &[TransformStep]) -> AppResult<Self> {
        let mut snapshot = Self::default();
        for step in steps {
            if let Some(lookup) = step.lookup_name()
                && !snapshot.synonyms.contains_key(lookup)
            {
                let entries = reference.synonyms(lookup).await?;
                snapshot = snapshot.with_synonyms(lookup, entries);
            }
            if let TransformStep::ConvertCurrency { currency, .. } = step
                && !snapshot.rates.contains_key(currency)
            {
                let rates = reference.exchange_rates(currency).await?;
                snapshot = snapshot.with_rates(currency, rates);
            }
        }
        Ok(snapshot)
    }

    pub fn with_synonyms(mut self, lookup: &str, entries: Vec<SynonymEntry>) -> Self {
        let mut index = HashMap::new();
        for entry in entries {
            index.insert(normalize_name(&entry.canonical), entry.canonical.clone());
            for synonym in &entry.synonyms {
                index
                    .entry(normalize_name(synonym))
                    .or_insert_with(|| entry.canonical.clone());
            }
        }
        self.synonyms.insert(lookup.to_string(), index);
        self
    }

    pub fn with_rates(mut self, currency: &str, mut rates: Vec<(NaiveDate, f64)>) -> Self {
        rates.sort_by_key(|(d, _)| *d);
        self.rates.insert(currency.to_string(), rates);
        self
    }

    /// Canonical name for `raw`, matched case-insensitively after trimming
    pub fn resolve(&self, lookup: &str, raw: &str) -> Option<&str> {
        self.synonyms
            .get(lookup)?
            .get(&normalize_name(raw))
            .map(String::as_str)
    }

    /// Most recent rate on or before `date`
    pub fn rate_on(&self, currency: &str, date: NaiveDate) -> Option<f64> {
        let rates = self.rates.get(currency)?;
        let idx = rates.partition_point(|(d, _)| *d <= date);
        idx.checked_sub(1).map(|i| rates[i].1)
    }
}

fn normalize_name(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    #[test]
    fn test_synonym_entry_parsing() {
        let entry = SynonymEntry::new("Odisha", " Orissa;Odisa | ,");
        assert_eq!(entry.synonyms, vec!["Orissa", "Odisa"]);
    }

    #[test]
    fn test_resolve_case_and_whitespace_insensitive() {
        let snapshot = ReferenceSnapshot::default().with_synonyms(
            "states",
            vec![
                SynonymEntry::new("Jammu and Kashmir", "J&K, Jammu & Kashmir"),
                SynonymEntry::new("Odisha", "Orissa"),
            ],
        );
        assert_eq!(snapshot.resolve("states", "  ORISSA "), Some("Odisha"));
        assert_eq!(snapshot.resolve("states", "jammu  &  kashmir"), Some("Jammu and Kashmir"));
        assert_eq!(snapshot.resolve("states", "odisha"), Some("Odisha"));
        assert_eq!(snapshot.resolve("states", "Atlantis"), None);
        assert_eq!(snapshot.resolve("districts", "Odisha"), None);
    }

    #[test]
    fn test_rate_on_uses_latest_earlier_rate() {
        let snapshot = ReferenceSnapshot::default()
            .with_rates("USD", vec![(d(5), 83.5), (d(1), 83.0)]);
        assert_eq!(snapshot.rate_on("USD", d(1)), Some(83.0));
        assert_eq!(snapshot.rate_on("USD", d(4)), Some(83.0));
        assert_eq!(snapshot.rate_on("USD", d(9)), Some(83.5));
        assert_eq!(
            snapshot.rate_on("USD", NaiveDate::from_ymd_opt(2023, 12, 31).unwrap()),
            None
        );
        assert_eq!(snapshot.rate_on("EUR", d(4)), None);
    }
}
