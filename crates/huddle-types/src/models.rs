use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A geographic position attached to a message.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

/// A single chat message as delivered by the feed and stored in the cache.
///
/// `id` is assigned by the feed when the document is written. A message that
/// was appended locally but not yet acknowledged has no id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub author_id: String,
    pub author_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Build an unacknowledged message from a draft.
    pub fn compose(session: &Session, draft: MessageDraft, created_at: DateTime<Utc>) -> Self {
        Self {
            id: None,
            author_id: session.user_id.clone(),
            author_name: session.display_name.clone(),
            text: draft.text,
            image: draft.image,
            location: draft.location,
            created_at,
        }
    }

    /// True when the message carries none of text, image or location.
    pub fn is_degenerate(&self) -> bool {
        self.text.is_none() && self.image.is_none() && self.location.is_none()
    }
}

/// Sort messages newest first. Stable, so equal timestamps keep their order.
pub fn sort_newest_first(messages: &mut [Message]) {
    messages.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

/// The payload of an outgoing message. Exactly one field is expected to be
/// set; an empty draft is sent as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageDraft {
    pub text: Option<String>,
    pub image: Option<String>,
    pub location: Option<Location>,
}

impl MessageDraft {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn image(url: impl Into<String>) -> Self {
        Self {
            image: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn location(location: Location) -> Self {
        Self {
            location: Some(location),
            ..Self::default()
        }
    }
}

/// Background colours offered on the start screen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum BackgroundColor {
    #[default]
    Black,
    Purple,
    Grey,
    Green,
}

impl BackgroundColor {
    pub const ALL: [BackgroundColor; 4] = [Self::Black, Self::Purple, Self::Grey, Self::Green];

    pub fn hex(self) -> &'static str {
        match self {
            Self::Black => "#090C08",
            Self::Purple => "#474056",
            Self::Grey => "#8A95A5",
            Self::Green => "#B9C6AE",
        }
    }
}

impl fmt::Display for BackgroundColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.hex())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownColor(pub String);

impl fmt::Display for UnknownColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown background colour: {}", self.0)
    }
}

impl std::error::Error for UnknownColor {}

impl FromStr for BackgroundColor {
    type Err = UnknownColor;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.hex().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownColor(s.to_string()))
    }
}

impl From<BackgroundColor> for String {
    fn from(color: BackgroundColor) -> Self {
        color.hex().to_string()
    }
}

impl TryFrom<String> for BackgroundColor {
    type Error = UnknownColor;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Who is chatting. Created at sign-in and handed to the chat screen; never
/// persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    pub display_name: String,
    pub background_color: BackgroundColor,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn msg(id: &str, secs: i64) -> Message {
        Message {
            id: Some(id.into()),
            author_id: "u1".into(),
            author_name: "Ada".into(),
            text: Some(id.into()),
            image: None,
            location: None,
            created_at: at(secs),
        }
    }

    #[test]
    fn sort_is_newest_first_and_stable() {
        let mut list = vec![msg("a", 1), msg("b", 3), msg("c", 2), msg("d", 3)];
        sort_newest_first(&mut list);
        let ids: Vec<_> = list.iter().map(|m| m.id.clone().unwrap()).collect();
        assert_eq!(ids, vec!["b", "d", "c", "a"]);
    }

    #[test]
    fn unacknowledged_message_omits_id_on_the_wire() {
        let session = Session {
            user_id: "u1".into(),
            display_name: "Ada".into(),
            background_color: BackgroundColor::Grey,
        };
        let m = Message::compose(&session, MessageDraft::text("hi"), at(10));
        let json = serde_json::to_value(&m).unwrap();
        assert!(json.get("id").is_none());
        assert!(json.get("image").is_none());
        assert_eq!(json["text"], "hi");
        assert_eq!(json["author_name"], "Ada");
    }

    #[test]
    fn empty_draft_is_degenerate_but_allowed() {
        let session = Session {
            user_id: "u1".into(),
            display_name: "Ada".into(),
            background_color: BackgroundColor::default(),
        };
        let m = Message::compose(&session, MessageDraft::default(), at(0));
        assert!(m.is_degenerate());
    }

    #[test]
    fn background_color_parses_hex_case_insensitively() {
        assert_eq!("#b9c6ae".parse::<BackgroundColor>(), Ok(BackgroundColor::Green));
        assert_eq!(BackgroundColor::default().hex(), "#090C08");
        assert!("#FFFFFF".parse::<BackgroundColor>().is_err());
    }
}
