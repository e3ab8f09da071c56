//! History query options: date bounds and ordering

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::str::FromStr;

use crate::error::SettlementError;
use crate::transaction::ConfirmedTransaction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Date,
    Amount,
    Id,
}

/// One ordering criterion, `-date` style
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    pub field: SortField,
    pub descending: bool,
}

impl FromStr for SortKey {
    type Err = SettlementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (descending, name) = match s.strip_prefix('-') {
            Some(name) => (true, name),
            None => (false, s),
        };
        let field = match name {
            "date" => SortField::Date,
            "amount" => SortField::Amount,
            "id" => SortField::Id,
            other => {
                return Err(SettlementError::InvalidQuery(format!(
                    "unknown sort field: {}",
                    other
                )));
            }
        };
        Ok(Self { field, descending })
    }
}

impl SortKey {
    fn compare(&self, a: &ConfirmedTransaction, b: &ConfirmedTransaction) -> Ordering {
        let ord = match self.field {
            SortField::Date => a.timestamp.cmp(&b.timestamp),
            SortField::Amount => a.amount.cmp(&b.amount),
            SortField::Id => a.id.cmp(&b.id),
        };
        if self.descending { ord.reverse() } else { ord }
    }
}

/// Ordering of a merged history, most significant key first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec(Vec<SortKey>);

impl Default for SortSpec {
    /// Newest first
    fn default() -> Self {
        Self(vec![SortKey {
            field: SortField::Date,
            descending: true,
        }])
    }
}

impl SortSpec {
    /// Parse keys such as `["-date", "amount"]`; empty means the default
    pub fn parse<S: AsRef<str>>(keys: &[S]) -> Result<Self, SettlementError> {
        if keys.is_empty() {
            return Ok(Self::default());
        }
        let keys = keys
            .iter()
            .map(|k| k.as_ref().parse())
            .collect::<Result<Vec<SortKey>, _>>()?;
        Ok(Self(keys))
    }

    pub fn keys(&self) -> &[SortKey] {
        &self.0
    }

    /// `Less` when `a` must come out before `b`
    pub fn compare(&self, a: &ConfirmedTransaction, b: &ConfirmedTransaction) -> Ordering {
        self.0
            .iter()
            .map(|key| key.compare(a, b))
            .find(|ord| *ord != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }
}

/// Options of a history request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryQuery {
    pub date_begin: Option<DateTime<Utc>>,
    pub date_end: Option<DateTime<Utc>>,
    pub order: SortSpec,
}

impl HistoryQuery {
    pub fn between(begin: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            date_begin: Some(begin),
            date_end: Some(end),
            order: SortSpec::default(),
        }
    }

    pub fn with_order(mut self, order: SortSpec) -> Self {
        self.order = order;
        self
    }

    /// Epoch-second bounds for an export query, `None` to page instead.
    ///
    /// Only one of the two bounds is an error.
    pub fn bounds(&self) -> Result<Option<(i64, i64)>, SettlementError> {
        match (self.date_begin, self.date_end) {
            (Some(begin), Some(end)) => Ok(Some((epoch_seconds(begin), epoch_seconds(end)))),
            (None, None) => Ok(None),
            _ => Err(SettlementError::UnsupportedPartialRange),
        }
    }
}

/// Rounded to the nearest second
fn epoch_seconds(at: DateTime<Utc>) -> i64 {
    (at.timestamp_millis() + 500).div_euclid(1000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use crate::ledger::mock::raw_entry;
    use crate::transaction::Direction;
    use chrono::TimeZone;

    fn tx(id: &str, amount: i64, time: i64) -> ConfirmedTransaction {
        let raw = raw_entry(id, "aaaa", "bbbb", false, amount, time);
        ConfirmedTransaction::from_raw(raw, "aaaa", Direction::Inbound, "LEM", &LedgerConfig::default())
    }

    #[test]
    fn test_parse_sort_keys() {
        let spec = SortSpec::parse(&["-date", "amount"]).unwrap();
        assert_eq!(
            spec.keys(),
            &[
                SortKey {
                    field: SortField::Date,
                    descending: true
                },
                SortKey {
                    field: SortField::Amount,
                    descending: false
                }
            ]
        );
        assert_eq!(SortSpec::parse::<&str>(&[]).unwrap(), SortSpec::default());
        assert_eq!(
            SortSpec::parse(&["-color"]).unwrap_err().code(),
            "INVALID_QUERY"
        );
    }

    #[test]
    fn test_compare_with_secondary_key() {
        let spec = SortSpec::parse(&["-date", "amount"]).unwrap();
        let newer = tx("0x1", 500, 200);
        let older = tx("0x2", 100, 100);
        let same_time_small = tx("0x3", 50, 200);
        assert_eq!(spec.compare(&newer, &older), Ordering::Less);
        assert_eq!(spec.compare(&same_time_small, &newer), Ordering::Less);
        assert_eq!(spec.compare(&newer, &newer), Ordering::Equal);
    }

    #[test]
    fn test_bounds() {
        let begin = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.timestamp_millis_opt(1_704_153_600_600).unwrap();

        assert_eq!(HistoryQuery::default().bounds().unwrap(), None);
        assert_eq!(
            HistoryQuery::between(begin, end).bounds().unwrap(),
            Some((1_704_067_200, 1_704_153_601))
        );

        let partial = HistoryQuery {
            date_begin: Some(begin),
            ..HistoryQuery::default()
        };
        assert!(matches!(
            partial.bounds(),
            Err(SettlementError::UnsupportedPartialRange)
        ));
        let partial = HistoryQuery {
            date_end: Some(end),
            ..HistoryQuery::default()
        };
        assert!(matches!(
            partial.bounds(),
            Err(SettlementError::UnsupportedPartialRange)
        ));
    }
}
