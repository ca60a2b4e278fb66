// src/models/violation.rs

use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Proctoring anomaly categories reported by the exam client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationType {
    WindowBlur,
    TabSwitch,
    FullscreenExit,
    ShortcutAttempt,
    ClipboardAccess,
    ContextMenu,
}

impl ViolationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationType::WindowBlur => "WINDOW_BLUR",
            ViolationType::TabSwitch => "TAB_SWITCH",
            ViolationType::FullscreenExit => "FULLSCREEN_EXIT",
            ViolationType::ShortcutAttempt => "SHORTCUT_ATTEMPT",
            ViolationType::ClipboardAccess => "CLIPBOARD_ACCESS",
            ViolationType::ContextMenu => "CONTEXT_MENU",
        }
    }

    /// Severity applied when the caller does not override it.
    pub fn default_severity(&self) -> Severity {
        match self {
            ViolationType::ShortcutAttempt | ViolationType::ClipboardAccess => Severity::High,
            ViolationType::WindowBlur
            | ViolationType::TabSwitch
            | ViolationType::FullscreenExit => Severity::Medium,
            ViolationType::ContextMenu => Severity::Low,
        }
    }
}

impl fmt::Display for ViolationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ViolationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WINDOW_BLUR" => Ok(ViolationType::WindowBlur),
            "TAB_SWITCH" => Ok(ViolationType::TabSwitch),
            "FULLSCREEN_EXIT" => Ok(ViolationType::FullscreenExit),
            "SHORTCUT_ATTEMPT" => Ok(ViolationType::ShortcutAttempt),
            "CLIPBOARD_ACCESS" => Ok(ViolationType::ClipboardAccess),
            "CONTEXT_MENU" => Ok(ViolationType::ContextMenu),
            _ => Err("Unsupported violation type.".to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            other => Err(format!("unknown severity '{other}'")),
        }
    }
}

/// Represents the append-only 'violations' table.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    pub id: i64,
    pub exam_id: i64,
    pub student_id: i64,
    #[serde(rename = "type")]
    pub violation_type: ViolationType,
    pub severity: Severity,
    pub description: String,
    pub metadata: Value,
    pub ip_address: Option<String>,
    pub session_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl Violation {
    pub fn receipt(&self) -> ViolationReceipt {
        ViolationReceipt {
            id: self.id,
            violation_type: self.violation_type,
            severity: self.severity,
            created_at: self.occurred_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewViolation {
    pub exam_id: i64,
    pub student_id: i64,
    pub violation_type: ViolationType,
    pub severity: Severity,
    pub description: String,
    pub metadata: Value,
    pub ip_address: Option<String>,
    pub session_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Compact view returned when a violation is logged.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationReceipt {
    pub id: i64,
    #[serde(rename = "type")]
    pub violation_type: ViolationType,
    pub severity: Severity,
    pub created_at: DateTime<Utc>,
}

/// Row filter for listing and aggregating violations.
/// `None` means unrestricted; an empty `exam_ids` matches nothing.
#[derive(Debug, Clone, Default)]
pub struct ViolationFilter {
    pub student_id: Option<i64>,
    pub exam_ids: Option<Vec<i64>>,
    pub limit: Option<i64>,
}

impl ViolationFilter {
    pub fn matches(&self, v: &Violation) -> bool {
        self.student_id.is_none_or(|id| id == v.student_id)
            && self
                .exam_ids
                .as_ref()
                .is_none_or(|ids| ids.contains(&v.exam_id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakdownRow {
    pub violation_type: ViolationType,
    pub severity: Severity,
    pub count: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationStats {
    pub total: i64,
    pub by_type: BTreeMap<String, i64>,
    pub by_severity: BTreeMap<String, i64>,
}

impl ViolationStats {
    pub fn from_rows(rows: &[BreakdownRow]) -> Self {
        rows.iter().fold(Self::default(), |mut acc, row| {
            acc.total += row.count;
            *acc.by_type
                .entry(row.violation_type.as_str().to_string())
                .or_default() += row.count;
            *acc.by_severity
                .entry(row.severity.as_str().to_string())
                .or_default() += row.count;
            acc
        })
    }
}

/// DTO for `POST /violation`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordViolationRequest {
    pub exam_id: i64,
    #[serde(rename = "type")]
    pub violation_type: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
    pub severity: Option<Severity>,
    pub time_remaining: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationListParams {
    pub exam_id: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationStatsParams {
    pub exam_id: Option<i64>,
}
