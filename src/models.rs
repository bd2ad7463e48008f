// models.rs
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PollError;

/// Hard cap on simultaneously configured voting options.
pub const MAX_OPTIONS: usize = 15;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct VotingOption {
    pub id: i64,
    pub label: String,
    pub color: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Vote {
    pub id: i64,
    pub option_id: i64,
    pub state: String,
    pub latitude: f64,
    pub longitude: f64,
    pub age_range: String,
    pub gender: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AdminMessage {
    pub id: i64,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// One row of a server-side aggregate view: `(category, option label) -> count`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AggregateRow {
    pub category: String,
    pub label: String,
    pub vote_count: i64,
}

impl AggregateRow {
    pub fn new(category: impl Into<String>, label: impl Into<String>, vote_count: i64) -> Self {
        Self {
            category: category.into(),
            label: label.into(),
            vote_count,
        }
    }
}

/// A vote joined with its option, as plotted on the map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct VoteLocation {
    pub id: i64,
    pub option_id: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub state: String,
    pub created_at: DateTime<Utc>,
    pub label: String,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub state: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    pub fn new(state: &str, latitude: f64, longitude: f64) -> Self {
        Self {
            state: state.to_string(),
            latitude,
            longitude,
        }
    }

    /// Non-empty state and finite, in-range coordinates.
    pub fn is_usable(&self) -> bool {
        !self.state.trim().is_empty()
            && self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude.abs() <= 90.0
            && self.longitude.abs() <= 180.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgeRange {
    #[serde(rename = "18-24")]
    From18To24,
    #[serde(rename = "25-34")]
    From25To34,
    #[serde(rename = "35-44")]
    From35To44,
    #[serde(rename = "45-54")]
    From45To54,
    #[serde(rename = "55-64")]
    From55To64,
    #[serde(rename = "65+")]
    Over65,
}

impl AgeRange {
    pub const ALL: [AgeRange; 6] = [
        AgeRange::From18To24,
        AgeRange::From25To34,
        AgeRange::From35To44,
        AgeRange::From45To54,
        AgeRange::From55To64,
        AgeRange::Over65,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgeRange::From18To24 => "18-24",
            AgeRange::From25To34 => "25-34",
            AgeRange::From35To44 => "35-44",
            AgeRange::From45To54 => "45-54",
            AgeRange::From55To64 => "55-64",
            AgeRange::Over65 => "65+",
        }
    }
}

impl fmt::Display for AgeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgeRange {
    type Err = PollError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgeRange::ALL
            .into_iter()
            .find(|range| range.as_str() == s)
            .ok_or_else(|| PollError::Validation(format!("unknown age range '{s}'")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    pub const ALL: [Gender; 3] = [Gender::Male, Gender::Female, Gender::Other];

    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "Male",
            Gender::Female => "Female",
            Gender::Other => "Other",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Gender {
    type Err = PollError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Gender::ALL
            .into_iter()
            .find(|gender| gender.as_str() == s)
            .ok_or_else(|| PollError::Validation(format!("unknown gender '{s}'")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Demographics {
    #[serde(rename = "ageRange", alias = "age_range")]
    pub age_range: AgeRange,
    pub gender: Gender,
}

/// Tables that emit change notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Votes,
    VotingOptions,
    AdminMessages,
}

impl Table {
    pub const ALL: [Table; 3] = [Table::Votes, Table::VotingOptions, Table::AdminMessages];

    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Votes => "votes",
            Table::VotingOptions => "voting_options",
            Table::AdminMessages => "admin_messages",
        }
    }
}

impl FromStr for Table {
    type Err = PollError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "votes" => Ok(Table::Votes),
            "voting_options" => Ok(Table::VotingOptions),
            "admin_messages" => Ok(Table::AdminMessages),
            other => Err(PollError::Validation(format!("unknown table '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl FromStr for ChangeKind {
    type Err = PollError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "insert" => Ok(ChangeKind::Insert),
            "update" => Ok(ChangeKind::Update),
            "delete" => Ok(ChangeKind::Delete),
            other => Err(PollError::Validation(format!("unknown change kind '{other}'"))),
        }
    }
}

/// A table change notification. Payload details are not consumed, any change triggers a refetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Change {
    pub table: Table,
    pub kind: ChangeKind,
}

impl Change {
    pub fn new(table: Table, kind: ChangeKind) -> Self {
        Self { table, kind }
    }
}

impl FromStr for Change {
    type Err = PollError;

    /// Parses the `<table>:<op>` payload sent by the database triggers.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (table, kind) = s
            .split_once(':')
            .ok_or_else(|| PollError::Validation(format!("malformed change payload '{s}'")))?;

        Ok(Change::new(table.parse()?, kind.parse()?))
    }
}

#[derive(Deserialize)]
pub struct VoteRequest {
    pub option_id: i64,
    #[serde(default)]
    pub demographics: Option<Demographics>,
}

#[derive(Deserialize)]
pub struct MessageRequest {
    pub message: String,
}

#[derive(Deserialize)]
pub struct OptionRequest {
    pub label: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize, Default)]
pub struct ConfirmQuery {
    #[serde(default)]
    pub confirm: bool,
}
