//! Label names and the per-label override rules that decide where a
//! classified image is copied.

use std::collections::HashSet;
use std::path::{Component, Path};

use crate::classification::Prediction;
use crate::errors::{Result, TriageError};

/// Label names shipped with the released checkpoint, in output order.
pub const DEFAULT_CLASS_NAMES: [&str; 4] = ["其他", "高质量涩图", "多人", "低质量缩略图"];

/// Sends confident predictions of one label to a separate directory.
#[derive(Debug, Clone, PartialEq)]
pub struct OverridePolicy {
    /// Confidence must be strictly greater than this to trigger.
    pub threshold: f32,
    pub destination: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Label {
    pub name: String,
    pub override_policy: Option<OverridePolicy>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Label,
    Override,
}

/// Directory chosen for one prediction, relative to the output root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Destination<'a> {
    pub dir_name: &'a str,
    pub label: &'a str,
    pub route: Route,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LabelSet {
    labels: Vec<Label>,
}

impl LabelSet {
    pub fn new<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let labels: Vec<Label> = names
            .into_iter()
            .map(|name| Label {
                name: name.into(),
                override_policy: None,
            })
            .collect();

        if labels.is_empty() {
            return Err(TriageError::validation("class_names", "must not be empty"));
        }

        let mut seen = HashSet::new();
        for label in &labels {
            check_dir_name("class_names", &label.name)?;
            if !seen.insert(label.name.as_str()) {
                return Err(TriageError::validation(
                    "class_names",
                    format!("contains `{}` more than once", label.name),
                ));
            }
        }

        Ok(Self { labels })
    }

    pub fn with_override(mut self, index: usize, policy: OverridePolicy) -> Result<Self> {
        if !(0.0..=1.0).contains(&policy.threshold) {
            return Err(TriageError::validation(
                "threshold",
                format!("{} is outside [0, 1]", policy.threshold),
            ));
        }
        check_dir_name("override destination", &policy.destination)?;
        if self.labels.iter().any(|l| l.name == policy.destination) {
            return Err(TriageError::validation(
                "override destination",
                format!("`{}` collides with a label name", policy.destination),
            ));
        }

        let len = self.labels.len();
        let label = self.labels.get_mut(index).ok_or_else(|| {
            TriageError::validation(
                "override index",
                format!("{index} is out of range for {len} labels"),
            )
        })?;
        label.override_policy = Some(policy);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Label> {
        self.labels.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Label> {
        self.labels.iter()
    }

    /// Every directory a run may write into, labels first.
    pub fn directory_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.iter().map(|l| l.name.as_str()).collect();
        for label in self.iter() {
            if let Some(policy) = &label.override_policy {
                if !names.contains(&policy.destination.as_str()) {
                    names.push(&policy.destination);
                }
            }
        }
        names
    }

    pub fn route(&self, prediction: &Prediction) -> Result<Destination<'_>> {
        let label = self.get(prediction.class_index).ok_or_else(|| {
            TriageError::validation(
                "prediction",
                format!(
                    "class index {} has no label (expected fewer than {})",
                    prediction.class_index,
                    self.len()
                ),
            )
        })?;

        let destination = match &label.override_policy {
            Some(policy) if prediction.confidence > policy.threshold => Destination {
                dir_name: &policy.destination,
                label: &label.name,
                route: Route::Override,
            },
            _ => Destination {
                dir_name: &label.name,
                label: &label.name,
                route: Route::Label,
            },
        };
        Ok(destination)
    }
}

fn check_dir_name(field: &str, name: &str) -> Result<()> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(c)), None) if c == name => Ok(()),
        _ => Err(TriageError::validation(
            field,
            format!("`{name}` is not a single directory name"),
        )),
    }
}
