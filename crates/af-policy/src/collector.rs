//! Result Collector
//!
//! Named store of execution records published by policies. Records are a
//! tagged union, so a lookup can tell a policy that never ran apart from one
//! that produced a different kind of record.

use std::collections::HashMap;
use parking_lot::RwLock;
use thiserror::Error;

/// Process state published by a retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryData {
    /// Index of the last attempt examined (0-based).
    pub attempts: u32,
    pub max: u32,
}

/// Process state published by a timeout policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutData {
    pub limit_ms: u64,
    pub timed_out: bool,
}

/// A typed execution record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultData {
    Retry(RetryData),
    Timeout(TimeoutData),
    Text(String),
}

impl ResultData {
    pub fn kind(&self) -> &'static str {
        match self {
            ResultData::Retry(_) => RetryData::KIND,
            ResultData::Timeout(_) => TimeoutData::KIND,
            ResultData::Text(_) => String::KIND,
        }
    }
}

/// A named record, keyed in the collector by `name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyResult {
    pub name: String,
    pub data: ResultData,
}

impl PolicyResult {
    pub fn new(name: impl Into<String>, data: ResultData) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

/// Types that can be extracted from a [`ResultData`].
pub trait ResultKind: Sized {
    const KIND: &'static str;

    fn from_data(data: &ResultData) -> Option<Self>;
}

impl ResultKind for RetryData {
    const KIND: &'static str = "retry";

    fn from_data(data: &ResultData) -> Option<Self> {
        match data {
            ResultData::Retry(d) => Some(*d),
            _ => None,
        }
    }
}

impl ResultKind for TimeoutData {
    const KIND: &'static str = "timeout";

    fn from_data(data: &ResultData) -> Option<Self> {
        match data {
            ResultData::Timeout(d) => Some(*d),
            _ => None,
        }
    }
}

impl ResultKind for String {
    const KIND: &'static str = "text";

    fn from_data(data: &ResultData) -> Option<Self> {
        match data {
            ResultData::Text(s) => Some(s.clone()),
            _ => None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("no result recorded for {name}")]
    NotFound { name: String },

    #[error("result {name} is {found}, expected {expected}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        found: &'static str,
    },
}

#[derive(Debug, Default)]
struct CollectorState {
    results: HashMap<String, ResultData>,
    duration_ms: u64,
}

/// Thread-safe result store shared between a composite policy and its members.
#[derive(Debug, Default)]
pub struct ResultCollector {
    state: RwLock<CollectorState>,
}

impl ResultCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record; an existing record with the same name is replaced.
    pub fn add(&self, result: PolicyResult) {
        self.state.write().results.insert(result.name, result.data);
    }

    pub fn reset(&self) {
        let mut state = self.state.write();
        state.results.clear();
        state.duration_ms = 0;
    }

    pub fn set_duration_ms(&self, duration_ms: u64) {
        self.state.write().duration_ms = duration_ms;
    }

    /// Wall-clock duration of the last composite execution, in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        self.state.read().duration_ms
    }

    pub fn get(&self, name: &str) -> Option<ResultData> {
        self.state.read().results.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.read().results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_as<T: ResultKind>(&self, name: &str) -> Result<T, LookupError> {
        let state = self.state.read();
        let data = state.results.get(name).ok_or_else(|| LookupError::NotFound {
            name: name.to_string(),
        })?;

        T::from_data(data).ok_or_else(|| LookupError::TypeMismatch {
            name: name.to_string(),
            expected: T::KIND,
            found: data.kind(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_get_as() {
        let collector = ResultCollector::new();
        collector.add(PolicyResult::new(
            "retry",
            ResultData::Retry(RetryData { attempts: 2, max: 3 }),
        ));

        let data: RetryData = collector.get_as("retry").unwrap();
        assert_eq!(data, RetryData { attempts: 2, max: 3 });
    }

    #[test]
    fn test_missing_and_mismatched_are_distinct() {
        let collector = ResultCollector::new();
        collector.add(PolicyResult::new("note", ResultData::Text("hi".to_string())));

        assert_eq!(
            collector.get_as::<RetryData>("retry"),
            Err(LookupError::NotFound { name: "retry".to_string() })
        );
        assert_eq!(
            collector.get_as::<RetryData>("note"),
            Err(LookupError::TypeMismatch {
                name: "note".to_string(),
                expected: "retry",
                found: "text",
            })
        );
    }

    #[test]
    fn test_last_write_wins() {
        let collector = ResultCollector::new();
        collector.add(PolicyResult::new("retry", ResultData::Retry(RetryData { attempts: 0, max: 1 })));
        collector.add(PolicyResult::new("retry", ResultData::Retry(RetryData { attempts: 1, max: 1 })));

        assert_eq!(collector.len(), 1);
        assert_eq!(collector.get_as::<RetryData>("retry").unwrap().attempts, 1);
    }

    #[test]
    fn test_reset_clears_results_and_duration() {
        let collector = ResultCollector::new();
        collector.add(PolicyResult::new("note", ResultData::Text("x".to_string())));
        collector.set_duration_ms(42);

        collector.reset();
        assert!(collector.is_empty());
        assert_eq!(collector.duration_ms(), 0);
    }
}
