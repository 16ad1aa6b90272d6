//! User comments attached to a country's data.
//!
//! Annotations are append-only: once stored they are never updated or
//! deleted through this service.

pub mod data_api;

pub use self::data_api::DataApiAnnotationStore;

use std::sync::{PoisonError, RwLock};

use chrono::Utc;

use crate::model::{Annotation, AnnotationError, NewAnnotation};

/// Query parameters for annotation lookups.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnotationQuery {
    pub country: Option<String>,
    pub province: Option<String>,
    pub limit: Option<usize>,
}

impl AnnotationQuery {
    pub fn country(country: &str) -> Self {
        AnnotationQuery {
            country: Some(country.to_string()),
            ..Default::default()
        }
    }

    fn matches(&self, annotation: &Annotation) -> bool {
        self.country.as_deref().is_none_or(|c| annotation.country == c)
            && self
                .province
                .as_deref()
                .is_none_or(|p| annotation.province.as_deref() == Some(p))
    }
}

pub trait AnnotationStore: Send + Sync {
    /// Short label used in logs and verification reports.
    fn name(&self) -> &str;

    /// Stores a new annotation and returns its id.
    fn append(&self, annotation: NewAnnotation) -> Result<String, AnnotationError>;

    /// Annotations matching the query, in insertion order.
    fn query(&self, query: &AnnotationQuery) -> Result<Vec<Annotation>, AnnotationError>;
}

/// In-process annotation store. Ids are random UUIDs.
#[derive(Debug, Default)]
pub struct MemoryAnnotationStore {
    entries: RwLock<Vec<(String, Annotation)>>,
}

impl MemoryAnnotationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AnnotationStore for MemoryAnnotationStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn append(&self, annotation: NewAnnotation) -> Result<String, AnnotationError> {
        let id = uuid::Uuid::new_v4().to_string();
        let stored = annotation.into_annotation(Utc::now());
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id.clone(), stored));
        Ok(id)
    }

    fn query(&self, query: &AnnotationQuery) -> Result<Vec<Annotation>, AnnotationError> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let matching = entries
            .iter()
            .map(|(_, a)| a)
            .filter(|a| query.matches(a))
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(matching)
    }
}
