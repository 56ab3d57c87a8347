use std::{fmt, str::FromStr};

use sea_orm::{Iterable, entity::prelude::*};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "activity_logs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub acting_user_id: Option<Uuid>,
    pub username: String,
    pub event_type: EventKind,
    pub created_at: DateTimeWithTimeZone,
    pub target_app: String,
    pub target_model: String,
    pub target_id: String,
    pub target_repr: String,
    pub ip_address: Option<String>,
    #[sea_orm(column_type = "Text")]
    pub user_agent: String,
    pub request_id: String,
    pub metadata: Json,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::users::Entity",
        from = "Column::ActingUserId",
        to = "super::users::Column::Id",
        on_delete = "SetNull"
    )]
    ActingUser,
}

impl Related<super::users::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ActingUser.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let who = if self.username.is_empty() {
            "system"
        } else {
            self.username.as_str()
        };
        write!(
            f,
            "[{}] by {} at {}",
            self.event_type,
            who,
            self.created_at.to_rfc3339()
        )
    }
}

/// Closed set of audited event kinds.
#[derive(
    Copy, Clone, Debug, EnumIter, DeriveActiveEnum, Eq, PartialEq, Hash, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(Some(64))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    #[sea_orm(string_value = "USER_LOGIN")]
    UserLogin,
    #[sea_orm(string_value = "USER_LOGOUT")]
    UserLogout,
    #[sea_orm(string_value = "DASHBOARD_VIEWED")]
    DashboardViewed,
    #[sea_orm(string_value = "FEATURE_USED")]
    FeatureUsed,
    #[sea_orm(string_value = "OCR_UPLOADED")]
    OcrUploaded,
    #[sea_orm(string_value = "OCR_PROCESSED")]
    OcrProcessed,
    #[sea_orm(string_value = "ANNOTATION_CREATED")]
    AnnotationCreated,
    #[sea_orm(string_value = "ANNOTATION_UPDATED")]
    AnnotationUpdated,
    #[sea_orm(string_value = "DATASET_SAVED")]
    DatasetSaved,
    #[sea_orm(string_value = "DATASET_VIEWED")]
    DatasetViewed,
    #[sea_orm(string_value = "DATASET_DOWNLOADED")]
    DatasetDownloaded,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::UserLogin => "USER_LOGIN",
            EventKind::UserLogout => "USER_LOGOUT",
            EventKind::DashboardViewed => "DASHBOARD_VIEWED",
            EventKind::FeatureUsed => "FEATURE_USED",
            EventKind::OcrUploaded => "OCR_UPLOADED",
            EventKind::OcrProcessed => "OCR_PROCESSED",
            EventKind::AnnotationCreated => "ANNOTATION_CREATED",
            EventKind::AnnotationUpdated => "ANNOTATION_UPDATED",
            EventKind::DatasetSaved => "DATASET_SAVED",
            EventKind::DatasetViewed => "DATASET_VIEWED",
            EventKind::DatasetDownloaded => "DATASET_DOWNLOADED",
        }
    }

    /// Human readable label shown by operator tooling.
    pub fn label(self) -> &'static str {
        match self {
            EventKind::UserLogin => "User login",
            EventKind::UserLogout => "User logout",
            EventKind::DashboardViewed => "Dashboard viewed",
            EventKind::FeatureUsed => "Feature used",
            EventKind::OcrUploaded => "OCR file uploaded",
            EventKind::OcrProcessed => "OCR processed",
            EventKind::AnnotationCreated => "Annotation created",
            EventKind::AnnotationUpdated => "Annotation updated",
            EventKind::DatasetSaved => "Dataset saved",
            EventKind::DatasetViewed => "Dataset viewed",
            EventKind::DatasetDownloaded => "Dataset downloaded",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown event kind: {0}")]
pub struct UnknownEventKind(pub String);

impl FromStr for EventKind {
    type Err = UnknownEventKind;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        EventKind::iter()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| UnknownEventKind(value.to_string()))
    }
}
