//! Closed enumerations shared across the pipeline

use std::fmt;

use serde::{Deserialize, Serialize};

/// Intake channel. Upstream encodes this as a small integer on the source
/// row; absent or unknown values are treated as ESMD.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelType {
    Portal,
    Fax,
    Esmd,
}

impl ChannelType {
    pub fn from_id(id: Option<i16>) -> Self {
        match id {
            Some(1) => Self::Portal,
            Some(2) => Self::Fax,
            Some(3) => Self::Esmd,
            // NULL, 0, and unknown ids all default to ESMD
            _ => Self::Esmd,
        }
    }

    pub fn id(&self) -> i16 {
        match self {
            Self::Portal => 1,
            Self::Fax => 2,
            Self::Esmd => 3,
        }
    }
}

/// Message kind on the source row. NULL is treated as intake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Intake,
    AckSuccess,
    AckFail,
}

impl MessageType {
    pub fn from_id(id: Option<i16>) -> Self {
        match id {
            Some(2) => Self::AckSuccess,
            Some(3) => Self::AckFail,
            _ => Self::Intake,
        }
    }
}

/// Inbox row lifecycle state.
///
/// DONE and DEAD are terminal; FAILED rows become claimable again once
/// `next_attempt_at` passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboxStatus {
    New,
    Processing,
    Done,
    Failed,
    Dead,
}

impl InboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Processing => "PROCESSING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
            Self::Dead => "DEAD",
        }
    }
}

impl fmt::Display for InboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-stage status on the document row (split and OCR stages).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageStatus {
    #[default]
    #[serde(rename = "NOT_STARTED")]
    NotStarted,
    #[serde(rename = "IN_PROGRESS")]
    InProgress,
    #[serde(rename = "DONE")]
    Done,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "SKIPPED")]
    Skipped,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "NOT_STARTED",
            Self::InProgress => "IN_PROGRESS",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
            Self::Skipped => "SKIPPED",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "IN_PROGRESS" => Self::InProgress,
            "DONE" => Self::Done,
            "FAILED" => Self::Failed,
            "SKIPPED" => Self::Skipped,
            _ => Self::NotStarted,
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Regulatory categorization derived from the coversheet text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartType {
    #[serde(rename = "PART_A")]
    PartA,
    #[serde(rename = "PART_B")]
    PartB,
    #[default]
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl PartType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PartA => "PART_A",
            Self::PartB => "PART_B",
            Self::Unknown => "UNKNOWN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PART_A" => Some(Self::PartA),
            "PART_B" => Some(Self::PartB),
            "UNKNOWN" => Some(Self::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for PartType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// SLA classification that determines the due date (48h vs 72h).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionType {
    Expedited,
    Standard,
}

impl SubmissionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Expedited => "Expedited",
            Self::Standard => "Standard",
        }
    }
}

impl fmt::Display for SubmissionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_type_defaults_to_esmd() {
        assert_eq!(ChannelType::from_id(None), ChannelType::Esmd);
        assert_eq!(ChannelType::from_id(Some(0)), ChannelType::Esmd);
        assert_eq!(ChannelType::from_id(Some(99)), ChannelType::Esmd);
    }

    #[test]
    fn test_channel_type_known_ids() {
        assert_eq!(ChannelType::from_id(Some(1)), ChannelType::Portal);
        assert_eq!(ChannelType::from_id(Some(2)), ChannelType::Fax);
        assert_eq!(ChannelType::from_id(Some(3)), ChannelType::Esmd);
    }

    #[test]
    fn test_message_type_null_is_intake() {
        assert_eq!(MessageType::from_id(None), MessageType::Intake);
        assert_eq!(MessageType::from_id(Some(1)), MessageType::Intake);
        assert_eq!(MessageType::from_id(Some(2)), MessageType::AckSuccess);
        assert_eq!(MessageType::from_id(Some(3)), MessageType::AckFail);
    }

    #[test]
    fn test_stage_status_round_trip() {
        for status in [
            StageStatus::NotStarted,
            StageStatus::InProgress,
            StageStatus::Done,
            StageStatus::Failed,
            StageStatus::Skipped,
        ] {
            assert_eq!(StageStatus::parse(status.as_str()), status);
        }
    }

    #[test]
    fn test_part_type_parse_rejects_unknown_strings() {
        assert_eq!(PartType::parse("PART_A"), Some(PartType::PartA));
        assert_eq!(PartType::parse("part_a"), None);
        assert_eq!(PartType::parse(""), None);
    }
}
