use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum GalleryError {
    #[error("identity {0:?} is already enrolled")]
    DuplicateName(String),
    #[error("embedding has {actual} dimensions, gallery uses {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("embedding for {0:?} has zero or non-finite norm")]
    ZeroNorm(String),
    #[error("embedding for {0:?} is empty")]
    Empty(String),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GalleryEntry {
    pub name: String,
    pub employee_id: i64,
    /// Unit length.
    pub embedding: Vec<f32>,
}

/// Known identities in enrolment order. Names are unique and every
/// embedding shares the dimensionality of the first one inserted.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, employee_id: i64, embedding: &[f32]) -> Result<(), GalleryError> {
        let name = name.into();
        if embedding.is_empty() {
            return Err(GalleryError::Empty(name));
        }
        if let Some(expected) = self.dimension() {
            if embedding.len() != expected {
                return Err(GalleryError::DimensionMismatch {
                    expected,
                    actual: embedding.len(),
                });
            }
        }
        if self.get(&name).is_some() {
            return Err(GalleryError::DuplicateName(name));
        }
        let Some(embedding) = normalize(embedding) else {
            return Err(GalleryError::ZeroNorm(name));
        };

        self.entries.push(GalleryEntry {
            name,
            employee_id,
            embedding,
        });
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Option<GalleryEntry> {
        let index = self.entries.iter().position(|e| e.name == name)?;
        Some(self.entries.remove(index))
    }

    pub fn remove_employee(&mut self, employee_id: i64) -> Option<GalleryEntry> {
        let index = self.entries.iter().position(|e| e.employee_id == employee_id)?;
        Some(self.entries.remove(index))
    }

    pub fn get(&self, name: &str) -> Option<&GalleryEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn dimension(&self) -> Option<usize> {
        self.entries.first().map(|e| e.embedding.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Scale to unit L2 norm; `None` for a zero or non-finite norm.
pub fn normalize(vector: &[f32]) -> Option<Vec<f32>> {
    let norm = vector
        .iter()
        .map(|&v| f64::from(v) * f64::from(v))
        .sum::<f64>()
        .sqrt();
    if !norm.is_finite() || norm < 1e-12 {
        return None;
    }
    Some(vector.iter().map(|&v| (f64::from(v) / norm) as f32).collect())
}
