//! Diagnosis classes of the default chest X-ray classifier.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Findings predicted by the default three-class classifier, in output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Diagnosis {
    /// No finding.
    Normal,
    /// Bacterial or viral pneumonia.
    Pneumonia,
    /// COVID-19 pneumonia.
    #[serde(rename = "COVID-19")]
    Covid19,
}

impl Diagnosis {
    /// All classes in logit order.
    pub const ALL: [Diagnosis; 3] = [Diagnosis::Normal, Diagnosis::Pneumonia, Diagnosis::Covid19];

    /// Class for a logit index.
    #[must_use]
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Logit index of this class.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Diagnosis::Normal => 0,
            Diagnosis::Pneumonia => 1,
            Diagnosis::Covid19 => 2,
        }
    }

    /// Human readable label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Diagnosis::Normal => "Normal",
            Diagnosis::Pneumonia => "Pneumonia",
            Diagnosis::Covid19 => "COVID-19",
        }
    }
}

impl fmt::Display for Diagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Diagnosis {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|d| d.label().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown diagnosis `{s}`"))
    }
}

/// Default label set, one entry per class.
pub fn default_labels() -> Vec<String> {
    Diagnosis::ALL.iter().map(|d| d.label().to_string()).collect()
}
