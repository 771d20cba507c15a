use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::user::{bson_datetime_as_chrono, bson_datetime_as_chrono_option};
use super::Priority;

/// Notification stored in MongoDB "notifications" collection, one per recipient
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub recipient: ObjectId,
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related: Option<RelatedEntity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_url: Option<String>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(
        rename = "readAt",
        default,
        skip_serializing_if = "Option::is_none",
        with = "bson_datetime_as_chrono_option"
    )]
    pub read_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<ObjectId>,
    #[serde(default)]
    pub metadata: NotificationMetadata,
    #[serde(rename = "createdAt", with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    Announcement,
    Assignment,
    Grade,
    Attendance,
    Comment,
    Group,
    Message,
    System,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::Announcement => "announcement",
            NotificationType::Assignment => "assignment",
            NotificationType::Grade => "grade",
            NotificationType::Attendance => "attendance",
            NotificationType::Comment => "comment",
            NotificationType::Group => "group",
            NotificationType::Message => "message",
            NotificationType::System => "system",
        }
    }

    /// Default icon name for the frontend
    pub fn default_icon(&self) -> &'static str {
        match self {
            NotificationType::Announcement => "campaign",
            NotificationType::Assignment => "assignment",
            NotificationType::Grade => "grade",
            NotificationType::Attendance => "event_available",
            NotificationType::Comment => "comment",
            NotificationType::Group => "groups",
            NotificationType::Message => "mail",
            NotificationType::System => "info",
        }
    }
}

/// Pointer to the entity a notification is about
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelatedEntity {
    pub kind: String,
    pub id: ObjectId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationMetadata {
    pub icon: String,
    pub color: String,
}

impl Default for NotificationMetadata {
    fn default() -> Self {
        NotificationMetadata {
            icon: NotificationType::System.default_icon().to_string(),
            color: color_for(Priority::Normal).to_string(),
        }
    }
}

pub fn color_for(priority: Priority) -> &'static str {
    match priority {
        Priority::Low => "gray",
        Priority::Normal => "blue",
        Priority::High => "orange",
        Priority::Urgent => "red",
    }
}

/// Content shared by every notification of one fan-out event
#[derive(Debug, Clone)]
pub struct NotificationContent {
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub priority: Priority,
    pub related: Option<RelatedEntity>,
    pub action_url: Option<String>,
    pub sender: Option<ObjectId>,
}

impl NotificationContent {
    pub fn new(
        notification_type: NotificationType,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        NotificationContent {
            notification_type,
            title: title.into(),
            message: message.into(),
            priority: Priority::Normal,
            related: None,
            action_url: None,
            sender: None,
        }
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn related(mut self, kind: impl Into<String>, id: ObjectId) -> Self {
        self.related = Some(RelatedEntity {
            kind: kind.into(),
            id,
        });
        self
    }

    pub fn action_url(mut self, url: impl Into<String>) -> Self {
        self.action_url = Some(url.into());
        self
    }

    pub fn sender(mut self, sender: ObjectId) -> Self {
        self.sender = Some(sender);
        self
    }

    /// Materialize the notification for a single recipient
    pub fn for_recipient(&self, recipient: ObjectId, now: DateTime<Utc>) -> Notification {
        Notification {
            id: ObjectId::new(),
            recipient,
            notification_type: self.notification_type,
            title: self.title.clone(),
            message: self.message.clone(),
            priority: self.priority,
            related: self.related.clone(),
            action_url: self.action_url.clone(),
            is_read: false,
            read_at: None,
            sender: self.sender,
            metadata: NotificationMetadata {
                icon: self.notification_type.default_icon().to_string(),
                color: color_for(self.priority).to_string(),
            },
            created_at: now,
        }
    }
}

/// Outcome of a bulk notification insert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FanOutReport {
    pub inserted: usize,
    pub failed: usize,
}

/// Query string for the notification list
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ListNotificationsQuery {
    #[serde(default)]
    pub unread_only: bool,
    pub notification_type: Option<NotificationType>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// Body of POST /notifications/send (staff only)
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SendNotificationRequest {
    #[serde(default)]
    #[validate(length(min = 1, max = 200, message = "Title must be 1-200 characters"))]
    pub title: String,

    #[serde(default)]
    #[validate(length(min = 1, max = 2000, message = "Message must be 1-2000 characters"))]
    pub message: String,

    pub notification_type: Option<NotificationType>,
    #[serde(default)]
    pub priority: Priority,
    pub action_url: Option<String>,

    #[serde(default)]
    pub user_ids: Vec<String>,
    #[serde(default)]
    pub group_ids: Vec<String>,
    #[serde(default)]
    pub course_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NotificationResponse {
    pub id: String,
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub priority: Priority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_url: Option<String>,
    pub is_read: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    pub icon: String,
    pub color: String,
    pub created_at: DateTime<Utc>,
}

impl From<Notification> for NotificationResponse {
    fn from(notification: Notification) -> Self {
        let (related_kind, related_id) = match notification.related {
            Some(related) => (Some(related.kind), Some(related.id.to_hex())),
            None => (None, None),
        };
        NotificationResponse {
            id: notification.id.to_hex(),
            notification_type: notification.notification_type,
            title: notification.title,
            message: notification.message,
            priority: notification.priority,
            related_kind,
            related_id,
            action_url: notification.action_url,
            is_read: notification.is_read,
            read_at: notification.read_at,
            sender_id: notification.sender.map(|id| id.to_hex()),
            icon: notification.metadata.icon,
            color: notification.metadata.color,
            created_at: notification.created_at,
        }
    }
}
