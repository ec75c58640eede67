use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const LIGHT_MAX_LINES: usize = 100;
const MEDIUM_MAX_LINES: usize = 300;
const CODER_MAX_LINES: usize = 800;

/// Processing class of a submission, chosen from its line count.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Light,
    Medium,
    Coder,
    Long,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Light, Tier::Medium, Tier::Coder, Tier::Long];

    /// Pure routing function: `<100` light, `<300` medium, `<800` coder, else long.
    pub fn route(source: &str) -> Tier {
        match line_count(source) {
            n if n < LIGHT_MAX_LINES => Tier::Light,
            n if n < MEDIUM_MAX_LINES => Tier::Medium,
            n if n < CODER_MAX_LINES => Tier::Coder,
            _ => Tier::Long,
        }
    }

    /// Long submissions are executed off the request path.
    pub fn is_deferred(&self) -> bool {
        matches!(self, Tier::Long)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Light => "light",
            Tier::Medium => "medium",
            Tier::Coder => "coder",
            Tier::Long => "long",
        }
    }
}

/// Number of `\n`-separated segments, so an empty source counts as one line.
pub fn line_count(source: &str) -> usize {
    source.split('\n').count()
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "light" => Ok(Tier::Light),
            "medium" => Ok(Tier::Medium),
            "coder" => Ok(Tier::Coder),
            "long" => Ok(Tier::Long),
            other => Err(format!("unknown tier: {}", other)),
        }
    }
}
