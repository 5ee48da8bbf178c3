//! Boundary validation for inbound events.
//!
//! Callers outside the process hand us a name and an untyped JSON payload.
//! `SchemaRegistry::validate` either produces the typed [`JobEvent`] for that
//! name or fails with a [`SchemaValidationError`] naming the offending field
//! as a dotted path (e.g. `passwordProtection.password`).
//!
//! Unknown extra fields are ignored; only declared fields are checked.

use serde_json::{Map, Value as JsonValue};

use carrion_core::DomainError;

use crate::catalog::EventName;
use crate::event::JobEvent;
use crate::payload::{
    AccountDeletionConfirmed, AccountDeletionExecute, CaseExportFormat, CaseExportRequested,
    ImageExportFormat, ImageExportRequested, PageSize, PasswordProtection, PdfPermissions,
    RecalculationRequested, Resolution, SecurityLevel, SessionCheckInactivity, SessionDelete,
    SessionScheduleDeletion, SessionTrack, SessionTriggerCleanup,
};

/// Rejection produced at the event boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaValidationError {
    #[error("unknown event name: {0}")]
    UnknownEvent(String),

    #[error("{event}: invalid field `{field}`: {reason}")]
    InvalidField {
        event: EventName,
        field: String,
        reason: String,
    },
}

impl SchemaValidationError {
    /// Dotted path of the offending field, when the name itself was valid.
    pub fn field(&self) -> Option<&str> {
        match self {
            SchemaValidationError::UnknownEvent(_) => None,
            SchemaValidationError::InvalidField { field, .. } => Some(field),
        }
    }
}

/// Structural registry of event payload shapes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SchemaRegistry;

impl SchemaRegistry {
    pub fn new() -> Self {
        Self
    }

    /// Names accepted by this registry.
    pub fn names(&self) -> &'static [EventName] {
        &EventName::ALL
    }

    /// Validate a raw `(name, data)` pair into a typed event.
    pub fn validate(&self, name: &str, data: &JsonValue) -> Result<JobEvent, SchemaValidationError> {
        let event: EventName = name
            .parse()
            .map_err(|_| SchemaValidationError::UnknownEvent(name.to_string()))?;
        let root = Fields::root(event, data)?;

        let parsed = match event {
            EventName::RecalculationRequested => RecalculationRequested {
                case_id: root.id("caseId")?,
            }
            .into(),
            EventName::CaseExportRequested => CaseExportRequested {
                export_id: root.id("exportId")?,
                case_id: root.id("caseId")?,
                format: case_export_format(&root)?,
                password_protection: password_protection(&root)?,
            }
            .into(),
            EventName::ImageExportRequested => ImageExportRequested {
                export_id: root.id("exportId")?,
                upload_id: root.id("uploadId")?,
                format: image_export_format(&root)?,
                password_protection: password_protection(&root)?,
            }
            .into(),
            EventName::AccountDeletionConfirmed => AccountDeletionConfirmed {
                user_id: root.id("userId")?,
            }
            .into(),
            EventName::AccountDeletionExecute => AccountDeletionExecute {
                user_id: root.id("userId")?,
            }
            .into(),
            EventName::SessionTrack => SessionTrack {
                session_id: root.id("sessionId")?,
                user_id: root.id("userId")?,
            }
            .into(),
            EventName::SessionCheckInactivity => SessionCheckInactivity {
                session_id: root.id("sessionId")?,
            }
            .into(),
            EventName::SessionScheduleDeletion => SessionScheduleDeletion {
                session_id: root.id("sessionId")?,
            }
            .into(),
            EventName::SessionDelete => SessionDelete {
                session_id: root.id("sessionId")?,
            }
            .into(),
            EventName::SessionTriggerCleanup => SessionTriggerCleanup {}.into(),
        };

        Ok(parsed)
    }
}

fn case_export_format(root: &Fields<'_>) -> Result<CaseExportFormat, SchemaValidationError> {
    let format = root.string("format")?;
    match format {
        "raw_data" => Ok(CaseExportFormat::RawData),
        "labelled_images" => Ok(CaseExportFormat::LabelledImages {
            resolution: root.choice("resolution", Resolution::parse, Resolution::VALUES)?,
        }),
        "pdf" => {
            let permissions = root.object("permissions")?;
            Ok(CaseExportFormat::Pdf {
                page_size: root.choice("pageSize", PageSize::parse, PageSize::VALUES)?,
                security_level: root.choice(
                    "securityLevel",
                    SecurityLevel::parse,
                    SecurityLevel::VALUES,
                )?,
                permissions: PdfPermissions {
                    printing: permissions.boolean("printing")?,
                    copying: permissions.boolean("copying")?,
                    modifying: permissions.boolean("modifying")?,
                    annotating: permissions.boolean("annotating")?,
                },
            })
        }
        other => Err(root.invalid(
            "format",
            format!("expected one of raw_data, labelled_images, pdf; got `{other}`"),
        )),
    }
}

fn image_export_format(root: &Fields<'_>) -> Result<ImageExportFormat, SchemaValidationError> {
    let format = root.string("format")?;
    match format {
        "raw_data" => Ok(ImageExportFormat::RawData),
        "labelled_images" => Ok(ImageExportFormat::LabelledImages {
            resolution: root.choice("resolution", Resolution::parse, Resolution::VALUES)?,
        }),
        other => Err(root.invalid(
            "format",
            format!("expected one of raw_data, labelled_images; got `{other}`"),
        )),
    }
}

fn password_protection(root: &Fields<'_>) -> Result<PasswordProtection, SchemaValidationError> {
    let Some(pp) = root.optional_object("passwordProtection")? else {
        return Ok(PasswordProtection::Disabled);
    };

    if !pp.boolean("enabled")? {
        return Ok(PasswordProtection::Disabled);
    }

    let password = pp.string("password")?;
    if password.is_empty() {
        return Err(pp.invalid("password", "must not be empty when protection is enabled"));
    }
    Ok(PasswordProtection::Enabled {
        password: password.to_string(),
    })
}

/// Cursor over one JSON object, tracking its dotted path for error messages.
struct Fields<'a> {
    event: EventName,
    prefix: String,
    map: &'a Map<String, JsonValue>,
}

impl<'a> Fields<'a> {
    fn root(event: EventName, data: &'a JsonValue) -> Result<Self, SchemaValidationError> {
        match data {
            JsonValue::Object(map) => Ok(Self {
                event,
                prefix: String::new(),
                map,
            }),
            _ => Err(SchemaValidationError::InvalidField {
                event,
                field: "data".to_string(),
                reason: "expected an object".to_string(),
            }),
        }
    }

    fn path(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", self.prefix, key)
        }
    }

    fn invalid(&self, key: &str, reason: impl Into<String>) -> SchemaValidationError {
        SchemaValidationError::InvalidField {
            event: self.event,
            field: self.path(key),
            reason: reason.into(),
        }
    }

    fn required(&self, key: &str) -> Result<&'a JsonValue, SchemaValidationError> {
        match self.map.get(key) {
            None | Some(JsonValue::Null) => Err(self.invalid(key, "is required")),
            Some(v) => Ok(v),
        }
    }

    fn string(&self, key: &str) -> Result<&'a str, SchemaValidationError> {
        self.required(key)?
            .as_str()
            .ok_or_else(|| self.invalid(key, "expected a string"))
    }

    fn boolean(&self, key: &str) -> Result<bool, SchemaValidationError> {
        self.required(key)?
            .as_bool()
            .ok_or_else(|| self.invalid(key, "expected a boolean"))
    }

    fn id<T>(&self, key: &str) -> Result<T, SchemaValidationError>
    where
        T: TryFrom<String, Error = DomainError>,
    {
        let raw = self.string(key)?;
        T::try_from(raw.to_string()).map_err(|e| self.invalid(key, e.to_string()))
    }

    fn choice<T>(
        &self,
        key: &str,
        parse: impl Fn(&str) -> Option<T>,
        allowed: &[&str],
    ) -> Result<T, SchemaValidationError> {
        let raw = self.string(key)?;
        parse(raw).ok_or_else(|| {
            self.invalid(
                key,
                format!("expected one of {}; got `{raw}`", allowed.join(", ")),
            )
        })
    }

    fn object(&self, key: &str) -> Result<Fields<'a>, SchemaValidationError> {
        match self.required(key)? {
            JsonValue::Object(map) => Ok(Fields {
                event: self.event,
                prefix: self.path(key),
                map,
            }),
            _ => Err(self.invalid(key, "expected an object")),
        }
    }

    fn optional_object(&self, key: &str) -> Result<Option<Fields<'a>>, SchemaValidationError> {
        match self.map.get(key) {
            None | Some(JsonValue::Null) => Ok(None),
            Some(_) => self.object(key).map(Some),
        }
    }
}
