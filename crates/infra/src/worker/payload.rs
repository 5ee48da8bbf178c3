//! Worker request bodies (snake_case on the wire).

use serde::Serialize;

use carrion_core::{CaseId, ExportId, UploadId};
use carrion_events::{
    CaseExportFormat, CaseExportRequested, ImageExportFormat, ImageExportRequested, PageSize,
    PasswordProtection, PdfPermissions, Resolution, SecurityLevel,
};

/// `POST /v1/computation/recalculate`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecalculateRequest {
    pub case_id: CaseId,
}

/// `POST /v1/export/`
///
/// Optional fields are omitted from the body when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportRequest {
    pub export_id: ExportId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub case_id: Option<CaseId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_id: Option<UploadId>,
    pub format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_size: Option<PageSize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_level: Option<SecurityLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<PdfPermissions>,
    pub password_protection: PasswordProtection,
}

impl From<&CaseExportRequested> for ExportRequest {
    fn from(event: &CaseExportRequested) -> Self {
        let mut request = Self {
            export_id: event.export_id.clone(),
            case_id: Some(event.case_id.clone()),
            upload_id: None,
            format: event.format.as_str(),
            resolution: None,
            page_size: None,
            security_level: None,
            permissions: None,
            password_protection: event.password_protection.clone(),
        };

        match &event.format {
            CaseExportFormat::RawData => {}
            CaseExportFormat::LabelledImages { resolution } => {
                request.resolution = Some(*resolution);
            }
            CaseExportFormat::Pdf {
                page_size,
                security_level,
                permissions,
            } => {
                request.page_size = Some(*page_size);
                request.security_level = Some(*security_level);
                request.permissions = Some(*permissions);
            }
        }
        request
    }
}

impl From<&ImageExportRequested> for ExportRequest {
    fn from(event: &ImageExportRequested) -> Self {
        let resolution = match &event.format {
            ImageExportFormat::RawData => None,
            ImageExportFormat::LabelledImages { resolution } => Some(*resolution),
        };

        Self {
            export_id: event.export_id.clone(),
            case_id: None,
            upload_id: Some(event.upload_id.clone()),
            format: event.format.as_str(),
            resolution,
            page_size: None,
            security_level: None,
            permissions: None,
            password_protection: event.password_protection.clone(),
        }
    }
}
