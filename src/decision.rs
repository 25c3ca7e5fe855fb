//! Closed vocabulary of oracle verdicts.

use crate::types::{Direction, Signal};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Decision {
    Long,
    Short,
    BoostedLong,
    BoostedShort,
    Skip,
}

impl Decision {
    pub const VOCABULARY: [Decision; 5] = [
        Decision::Long,
        Decision::Short,
        Decision::BoostedLong,
        Decision::BoostedShort,
        Decision::Skip,
    ];

    /// Parse an oracle reply. Anything outside the vocabulary is SKIP.
    ///
    /// Only surrounding whitespace, quotes, backticks and trailing sentence
    /// punctuation are tolerated, plus any letter case. The token itself must
    /// match exactly, so `BOOSTED LONG` or `**LONG**` are SKIP.
    pub fn parse(raw: &str) -> Decision {
        let token = raw
            .trim()
            .trim_matches(|c: char| matches!(c, '"' | '\'' | '`'))
            .trim_end_matches(['.', '!'])
            .to_ascii_uppercase();

        match token.as_str() {
            "LONG" => Decision::Long,
            "SHORT" => Decision::Short,
            "BOOSTED_LONG" => Decision::BoostedLong,
            "BOOSTED_SHORT" => Decision::BoostedShort,
            _ => Decision::Skip,
        }
    }

    pub fn direction(&self) -> Option<Direction> {
        match self {
            Decision::Long | Decision::BoostedLong => Some(Direction::Long),
            Decision::Short | Decision::BoostedShort => Some(Direction::Short),
            Decision::Skip => None,
        }
    }

    pub fn is_actionable(&self) -> bool {
        self.direction().is_some()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Long => "LONG",
            Decision::Short => "SHORT",
            Decision::BoostedLong => "BOOSTED_LONG",
            Decision::BoostedShort => "BOOSTED_SHORT",
            Decision::Skip => "SKIP",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Used when the oracle is disabled: pass the classifier's view through,
/// collapsing super-boosted tiers onto the boosted ones.
impl From<Signal> for Decision {
    fn from(signal: Signal) -> Self {
        match signal {
            Signal::Long => Decision::Long,
            Signal::Short => Decision::Short,
            Signal::BoostedLong | Signal::SuperBoostedLong => Decision::BoostedLong,
            Signal::BoostedShort | Signal::SuperBoostedShort => Decision::BoostedShort,
            Signal::Skip => Decision::Skip,
        }
    }
}
