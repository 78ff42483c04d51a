/// Shared types used across the codebase

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Permission level an actor holds on one resource.
///
/// Totally ordered: `Invalid < Guest < Any < Public < Admin`. The discriminants are
/// the values persisted in link tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum UserRole {
    Invalid = -1,
    Guest = 1,
    Any = 2,
    Public = 3,
    Admin = 4,
}

impl UserRole {
    /// Decode a persisted role; unknown values never grant anything.
    pub fn from_db(value: i16) -> Self {
        match value {
            1 => UserRole::Guest,
            2 => UserRole::Any,
            3 => UserRole::Public,
            4 => UserRole::Admin,
            _ => UserRole::Invalid,
        }
    }

    pub fn as_db(self) -> i16 {
        self as i16
    }

    /// Minimum role an actor needs to run `op` against an existing resource.
    pub fn required_for(op: Op) -> Self {
        match op {
            Op::Read => UserRole::Guest,
            Op::Create | Op::Update | Op::Patch | Op::Delete => UserRole::Admin,
        }
    }

    pub fn satisfies(self, required: UserRole) -> bool {
        self != UserRole::Invalid && self >= required
    }
}

/// Operations supported by the mapper pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    Create,
    Read,
    Update,
    Patch,
    Delete,
}

impl Op {
    pub const ALL: [Op; 5] = [Op::Create, Op::Read, Op::Update, Op::Patch, Op::Delete];

    /// Registration letter (`CRUPD`)
    pub fn letter(self) -> char {
        match self {
            Op::Create => 'C',
            Op::Read => 'R',
            Op::Update => 'U',
            Op::Patch => 'P',
            Op::Delete => 'D',
        }
    }

    pub fn from_letter(letter: char) -> Option<Self> {
        match letter.to_ascii_uppercase() {
            'C' => Some(Op::Create),
            'R' => Some(Op::Read),
            'U' => Some(Op::Update),
            'P' => Some(Op::Patch),
            'D' => Some(Op::Delete),
            _ => None,
        }
    }

    pub fn is_mutation(self) -> bool {
        !matches!(self, Op::Read)
    }

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl std::fmt::Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Op::Create => "create",
            Op::Read => "read",
            Op::Update => "update",
            Op::Patch => "patch",
            Op::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Whether a request targets one object or a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    One,
    Many,
}

/// Set of operations a hook registration applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpSet(u8);

impl OpSet {
    pub fn all() -> Self {
        Op::ALL.into_iter().collect()
    }

    /// Parse a letter string such as `"CRUPD"` or `"UP"`.
    /// Returns the first unrecognised letter on failure.
    pub fn parse(letters: &str) -> Result<Self, char> {
        let mut set = OpSet::default();
        for letter in letters.chars() {
            let op = Op::from_letter(letter).ok_or(letter)?;
            set.0 |= op.bit();
        }
        Ok(set)
    }

    pub fn contains(self, op: Op) -> bool {
        self.0 & op.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl FromIterator<Op> for OpSet {
    fn from_iter<I: IntoIterator<Item = Op>>(iter: I) -> Self {
        let mut set = OpSet::default();
        for op in iter {
            set.0 |= op.bit();
        }
        set
    }
}

/// Identity of the caller, as resolved by the transport layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: Uuid,
    /// Organization the request is scoped to, if any
    pub org_id: Option<Uuid>,
    /// OAuth-style scope string carried through to hooks
    pub scope: Option<String>,
}

impl Actor {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            org_id: None,
            scope: None,
        }
    }

    pub fn with_org(mut self, org_id: Uuid) -> Self {
        self.org_id = Some(org_id);
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }
}
