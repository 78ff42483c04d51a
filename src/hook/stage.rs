use serde::{Deserialize, Serialize};

/// Lifecycle points at which hooks run, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Stage {
    /// `J`: patch only, sees the pre-patch object
    BeforeApply,
    /// `B`: before persistence
    Before,
    /// `A`: after persistence, before commit
    After,
    /// `T`: after the caller committed the transaction
    AfterTransact,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::BeforeApply, Stage::Before, Stage::After, Stage::AfterTransact];

    pub fn letter(self) -> char {
        match self {
            Stage::BeforeApply => 'J',
            Stage::Before => 'B',
            Stage::After => 'A',
            Stage::AfterTransact => 'T',
        }
    }

    pub fn from_letter(letter: char) -> Option<Self> {
        match letter.to_ascii_uppercase() {
            'J' => Some(Stage::BeforeApply),
            'B' => Some(Stage::Before),
            'A' => Some(Stage::After),
            'T' => Some(Stage::AfterTransact),
            _ => None,
        }
    }

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// Stages a handler registration implements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StageSet(u8);

impl StageSet {
    /// Parse a letter string such as `"JBAT"` or `"BA"`.
    /// Returns the first unrecognised letter on failure.
    pub fn parse(letters: &str) -> Result<Self, char> {
        let mut set = StageSet::default();
        for letter in letters.chars() {
            let stage = Stage::from_letter(letter).ok_or(letter)?;
            set.0 |= stage.bit();
        }
        Ok(set)
    }

    pub fn contains(self, stage: Stage) -> bool {
        self.0 & stage.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Earliest stage in the set; the point at which the handler is constructed
    pub fn first(self) -> Option<Stage> {
        Stage::ALL.into_iter().find(|stage| self.contains(*stage))
    }

    pub fn letters(self) -> String {
        Stage::ALL
            .into_iter()
            .filter(|stage| self.contains(*stage))
            .map(Stage::letter)
            .collect()
    }
}

impl FromIterator<Stage> for StageSet {
    fn from_iter<I: IntoIterator<Item = Stage>>(iter: I) -> Self {
        let mut set = StageSet::default();
        for stage in iter {
            set.0 |= stage.bit();
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_order_follows_execution() {
        assert!(Stage::BeforeApply < Stage::Before);
        assert!(Stage::Before < Stage::After);
        assert!(Stage::After < Stage::AfterTransact);
    }

    #[test]
    fn parses_stage_letters() {
        let set = StageSet::parse("tab").unwrap();
        assert!(set.contains(Stage::Before));
        assert!(set.contains(Stage::After));
        assert!(set.contains(Stage::AfterTransact));
        assert!(!set.contains(Stage::BeforeApply));
        assert_eq!(set.first(), Some(Stage::Before));
        assert_eq!(set.letters(), "BAT");
        assert_eq!(StageSet::parse("JQ"), Err('Q'));
        assert_eq!(StageSet::default().first(), None);
    }
}
