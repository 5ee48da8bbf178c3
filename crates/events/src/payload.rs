//! Typed event payloads.
//!
//! JSON field names follow the application's camelCase model. Export payloads
//! are tagged by `format`; each format carries only the fields it needs.

use serde::{Deserialize, Serialize};

use carrion_core::{CaseId, ExportId, SessionId, UploadId, UserId};

macro_rules! wire_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $wire:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $wire)]
                $variant,
            )+
        }

        impl $name {
            /// Accepted wire values, in declaration order.
            pub const VALUES: &'static [&'static str] = &[$($wire),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $wire,)+
                }
            }

            pub fn parse(value: &str) -> Option<Self> {
                match value {
                    $($wire => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

wire_enum!(
    /// Output resolution for labelled image exports.
    Resolution {
        Original => "original",
        FullHd => "1920x1080",
        Hd => "1280x720",
    }
);

wire_enum!(
    /// PDF page size.
    PageSize {
        A4 => "a4",
        Letter => "letter",
    }
);

wire_enum!(
    /// PDF security level applied by the worker.
    SecurityLevel {
        Unrestricted => "none",
        Standard => "standard",
        High => "high",
    }
);

/// Fine-grained PDF permission flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PdfPermissions {
    pub printing: bool,
    pub copying: bool,
    pub modifying: bool,
    pub annotating: bool,
}

/// Optional password protection for export archives.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "PasswordProtectionWire", into = "PasswordProtectionWire")]
pub enum PasswordProtection {
    #[default]
    Disabled,
    Enabled { password: String },
}

impl PasswordProtection {
    pub fn is_enabled(&self) -> bool {
        matches!(self, PasswordProtection::Enabled { .. })
    }

    pub fn password(&self) -> Option<&str> {
        match self {
            PasswordProtection::Disabled => None,
            PasswordProtection::Enabled { password } => Some(password),
        }
    }
}

// Passwords never reach logs.
impl core::fmt::Debug for PasswordProtection {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            PasswordProtection::Disabled => f.write_str("Disabled"),
            PasswordProtection::Enabled { .. } => f
                .debug_struct("Enabled")
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
struct PasswordProtectionWire {
    enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    password: Option<String>,
}

impl TryFrom<PasswordProtectionWire> for PasswordProtection {
    type Error = String;

    fn try_from(wire: PasswordProtectionWire) -> Result<Self, Self::Error> {
        match (wire.enabled, wire.password) {
            (false, _) => Ok(PasswordProtection::Disabled),
            (true, Some(password)) if !password.is_empty() => {
                Ok(PasswordProtection::Enabled { password })
            }
            (true, _) => Err("password is required when protection is enabled".to_string()),
        }
    }
}

impl From<PasswordProtection> for PasswordProtectionWire {
    fn from(value: PasswordProtection) -> Self {
        match value {
            PasswordProtection::Disabled => Self {
                enabled: false,
                password: None,
            },
            PasswordProtection::Enabled { password } => Self {
                enabled: true,
                password: Some(password),
            },
        }
    }
}

/// `recalculation/case.requested`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecalculationRequested {
    pub case_id: CaseId,
}

/// Format-specific part of a case export request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum CaseExportFormat {
    RawData,
    LabelledImages {
        resolution: Resolution,
    },
    #[serde(rename_all = "camelCase")]
    Pdf {
        page_size: PageSize,
        security_level: SecurityLevel,
        permissions: PdfPermissions,
    },
}

impl CaseExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseExportFormat::RawData => "raw_data",
            CaseExportFormat::LabelledImages { .. } => "labelled_images",
            CaseExportFormat::Pdf { .. } => "pdf",
        }
    }
}

/// `export/case.data.requested`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseExportRequested {
    pub export_id: ExportId,
    pub case_id: CaseId,
    #[serde(flatten)]
    pub format: CaseExportFormat,
    #[serde(default)]
    pub password_protection: PasswordProtection,
}

/// Format-specific part of a single-upload export request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum ImageExportFormat {
    RawData,
    LabelledImages { resolution: Resolution },
}

impl ImageExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageExportFormat::RawData => "raw_data",
            ImageExportFormat::LabelledImages { .. } => "labelled_images",
        }
    }
}

/// `export/image.data.requested`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageExportRequested {
    pub export_id: ExportId,
    pub upload_id: UploadId,
    #[serde(flatten)]
    pub format: ImageExportFormat,
    #[serde(default)]
    pub password_protection: PasswordProtection,
}

/// `account/deletion.confirmed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountDeletionConfirmed {
    pub user_id: UserId,
}

/// `account/deletion.execute`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountDeletionExecute {
    pub user_id: UserId,
}

/// `account/session.track`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTrack {
    pub session_id: SessionId,
    pub user_id: UserId,
}

/// `account/session.check-inactivity`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCheckInactivity {
    pub session_id: SessionId,
}

/// `account/session.schedule-deletion`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionScheduleDeletion {
    pub session_id: SessionId,
}

/// `account/session.delete`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDelete {
    pub session_id: SessionId,
}

/// `account/session.trigger-cleanup` (cron)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTriggerCleanup {}
