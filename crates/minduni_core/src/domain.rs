//! crates/minduni_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any backing service or storage format.

use chrono::{DateTime, Datelike, Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Errors raised when parsing the symbolic values the app stores.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    #[error("Unknown avatar id: {0}")]
    UnknownAvatar(String),
    #[error("Unknown mood: {0}")]
    UnknownMood(String),
    #[error("Unknown emotional profile: {0}")]
    UnknownEmotionalProfile(String),
}

//=========================================================================================
// Identifiers
//=========================================================================================

/// Stable, opaque identifier the authentication service assigns to a principal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier the document store assigns to a journal entry on creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(String);

impl EntryId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

//=========================================================================================
// Avatars
//=========================================================================================

/// One of the nine bundled avatars, stored by its symbolic id (`avatar_1`..`avatar_9`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AvatarId(u8);

impl AvatarId {
    pub const COUNT: u8 = 9;

    /// Returns the avatar with the given 1-based number, if it exists.
    pub fn from_number(number: u8) -> Option<Self> {
        (1..=Self::COUNT).contains(&number).then_some(Self(number))
    }

    pub fn number(self) -> u8 {
        self.0
    }

    /// All selectable avatars, in picker order.
    pub fn all() -> impl Iterator<Item = AvatarId> {
        (1..=Self::COUNT).map(AvatarId)
    }

    /// Resolves the symbolic id to the bundled image resource.
    pub fn image_asset(self) -> String {
        format!("assets/images/avatar_{}.png", self.0)
    }
}

impl Default for AvatarId {
    fn default() -> Self {
        Self(4)
    }
}

impl fmt::Display for AvatarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "avatar_{}", self.0)
    }
}

impl FromStr for AvatarId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix("avatar_")
            .and_then(|n| n.parse::<u8>().ok())
            .and_then(AvatarId::from_number)
            .ok_or_else(|| DomainError::UnknownAvatar(s.to_string()))
    }
}

impl TryFrom<String> for AvatarId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AvatarId> for String {
    fn from(value: AvatarId) -> Self {
        value.to_string()
    }
}

//=========================================================================================
// Moods
//=========================================================================================

/// The fixed set of moods a journal entry can be tagged with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Mood {
    #[default]
    Happy,
    Calm,
    Neutral,
    Sad,
    Angry,
}

impl Mood {
    pub const ALL: [Mood; 5] = [Mood::Happy, Mood::Calm, Mood::Neutral, Mood::Sad, Mood::Angry];

    /// The emoji stored in the document store.
    pub fn symbol(self) -> &'static str {
        match self {
            Mood::Happy => "😃",
            Mood::Calm => "😌",
            Mood::Neutral => "😐",
            Mood::Sad => "😔",
            Mood::Angry => "😠",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Mood::Happy => "happy",
            Mood::Calm => "calm",
            Mood::Neutral => "neutral",
            Mood::Sad => "sad",
            Mood::Angry => "angry",
        }
    }
}

impl fmt::Display for Mood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for Mood {
    type Err = DomainError;

    /// Accepts either the emoji or its lower-case name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Mood::ALL
            .into_iter()
            .find(|m| m.symbol() == s || m.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| DomainError::UnknownMood(s.to_string()))
    }
}

impl TryFrom<String> for Mood {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Mood> for String {
    fn from(value: Mood) -> Self {
        value.symbol().to_string()
    }
}

//=========================================================================================
// Emotional profiles
//=========================================================================================

/// What the user wants support with, picked once during onboarding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EmotionalProfile {
    Anxiety,
    MildDepression,
    AcademicStress,
    Breakup,
    SelfEsteem,
}

impl EmotionalProfile {
    pub const ALL: [EmotionalProfile; 5] = [
        EmotionalProfile::Anxiety,
        EmotionalProfile::MildDepression,
        EmotionalProfile::AcademicStress,
        EmotionalProfile::Breakup,
        EmotionalProfile::SelfEsteem,
    ];

    /// The id stored on the profile document.
    pub fn id(self) -> &'static str {
        match self {
            EmotionalProfile::Anxiety => "anxiety",
            EmotionalProfile::MildDepression => "depression_mild",
            EmotionalProfile::AcademicStress => "academic_stress",
            EmotionalProfile::Breakup => "breakup",
            EmotionalProfile::SelfEsteem => "self_esteem",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            EmotionalProfile::Anxiety => "Ansiedad General",
            EmotionalProfile::MildDepression => "Tristeza o Depresión Leve",
            EmotionalProfile::AcademicStress => "Estrés Académico",
            EmotionalProfile::Breakup => "Ruptura Amorosa",
            EmotionalProfile::SelfEsteem => "Autoestima",
        }
    }

    pub fn emoji(self) -> &'static str {
        match self {
            EmotionalProfile::Anxiety => "😰",
            EmotionalProfile::MildDepression => "☁️",
            EmotionalProfile::AcademicStress => "📚",
            EmotionalProfile::Breakup => "💔",
            EmotionalProfile::SelfEsteem => "✨",
        }
    }
}

impl fmt::Display for EmotionalProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for EmotionalProfile {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EmotionalProfile::ALL
            .into_iter()
            .find(|p| p.id().eq_ignore_ascii_case(s))
            .ok_or_else(|| DomainError::UnknownEmotionalProfile(s.to_string()))
    }
}

impl TryFrom<String> for EmotionalProfile {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EmotionalProfile> for String {
    fn from(value: EmotionalProfile) -> Self {
        value.id().to_string()
    }
}

//=========================================================================================
// Users
//=========================================================================================

/// An authenticated identity issued by the authentication service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub uid: UserId,
    pub email: String,
}

/// The per-user profile document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub display_name: String,
    pub avatar: AvatarId,
    /// Unset until the user finishes onboarding.
    pub emotional_profile: Option<EmotionalProfile>,
    pub created_at: DateTime<Utc>,
}

/// Payload for creating a profile document; the store stamps `created_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProfile {
    pub display_name: String,
    pub avatar: AvatarId,
}

/// The local projection of the current principal's profile document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserIdentity {
    pub uid: UserId,
    pub email: String,
    pub display_name: String,
    pub avatar: AvatarId,
    pub emotional_profile: Option<EmotionalProfile>,
}

impl UserIdentity {
    pub fn from_profile(principal: Principal, profile: UserProfile) -> Self {
        Self {
            uid: principal.uid,
            email: principal.email,
            display_name: profile.display_name,
            avatar: profile.avatar,
            emotional_profile: profile.emotional_profile,
        }
    }
}

//=========================================================================================
// Journal
//=========================================================================================

/// A single journal entry as delivered by a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JournalEntry {
    pub id: EntryId,
    pub text: String,
    pub mood: Mood,
    /// `None` while the server timestamp is still pending.
    pub created_at: Option<DateTime<Utc>>,
}

impl JournalEntry {
    /// Human-readable creation date in the device's timezone.
    pub fn date_label(&self) -> String {
        format_entry_date(self.created_at, &Local)
    }
}

/// Payload for appending a journal entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJournalEntry {
    pub text: String,
    pub mood: Mood,
}

const MONTHS_ES: [&str; 12] = [
    "Enero",
    "Febrero",
    "Marzo",
    "Abril",
    "Mayo",
    "Junio",
    "Julio",
    "Agosto",
    "Septiembre",
    "Octubre",
    "Noviembre",
    "Diciembre",
];

/// Renders a creation timestamp as `"<day> de <Month>, <year>"`, or `"Reciente"`
/// when the server has not stamped the entry yet.
pub fn format_entry_date<Tz: TimeZone>(created_at: Option<DateTime<Utc>>, tz: &Tz) -> String {
    match created_at {
        Some(ts) => {
            let local = ts.with_timezone(tz);
            let month = MONTHS_ES[local.month0() as usize];
            format!("{} de {}, {}", local.day(), month, local.year())
        }
        None => "Reciente".to_string(),
    }
}
