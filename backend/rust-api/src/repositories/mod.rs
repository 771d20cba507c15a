use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::{bson::oid::ObjectId, Database};

use crate::error::Result;
use crate::models::announcement::{
    Announcement, AnnouncementQuery, AnnouncementStatus, Comment, Reply,
};
use crate::models::course::Course;
use crate::models::group::Group;
use crate::models::notification::{FanOutReport, Notification, NotificationType};
use crate::models::user::UserRole;

pub mod announcement_repository;
pub mod membership_repository;
pub mod notification_repository;
pub mod user_repository;

pub use announcement_repository::MongoAnnouncementRepository;
pub use membership_repository::MongoMembershipRepository;
pub use notification_repository::MongoNotificationRepository;
pub use user_repository::MongoDirectoryRepository;

/// Read-only view of the user directory
#[async_trait]
pub trait DirectoryRepository: Send + Sync {
    async fn active_user_ids(&self) -> Result<Vec<ObjectId>>;
    async fn active_user_ids_by_role(&self, role: UserRole) -> Result<Vec<ObjectId>>;
    /// The subset of `ids` that belong to existing users, active or not
    async fn existing_user_ids(&self, ids: &[ObjectId]) -> Result<Vec<ObjectId>>;
    /// Liveness of the backing store
    async fn ping(&self) -> Result<()>;
}

/// Read-only view of groups and courses
#[async_trait]
pub trait MembershipRepository: Send + Sync {
    async fn groups_by_ids(&self, ids: &[ObjectId]) -> Result<Vec<Group>>;
    async fn courses_by_ids(&self, ids: &[ObjectId]) -> Result<Vec<Course>>;
    /// Groups whose `course_id` points at one of the courses
    async fn groups_by_courses(&self, course_ids: &[ObjectId]) -> Result<Vec<Group>>;
    /// Groups where the student has an active enrollment
    async fn groups_of_student(&self, student: &ObjectId) -> Result<Vec<Group>>;
    /// Courses taught by the user or listing one of the groups
    async fn courses_related_to(
        &self,
        teacher: &ObjectId,
        group_ids: &[ObjectId],
    ) -> Result<Vec<Course>>;
}

#[async_trait]
pub trait AnnouncementRepository: Send + Sync {
    async fn insert(&self, announcement: &Announcement) -> Result<()>;
    async fn find_by_id(&self, id: &ObjectId) -> Result<Option<Announcement>>;
    async fn list(&self, query: &AnnouncementQuery) -> Result<Vec<Announcement>>;
    /// Overwrites the editable fields, leaving engagement data untouched.
    /// Returns false when the document no longer exists.
    async fn update_content(&self, announcement: &Announcement) -> Result<bool>;
    async fn delete(&self, id: &ObjectId) -> Result<bool>;
    /// Conditional status write; true only for the caller that performed it
    async fn transition_status(
        &self,
        id: &ObjectId,
        from: AnnouncementStatus,
        to: AnnouncementStatus,
    ) -> Result<bool>;
    /// Bumps the view counter and adds a read record unless one exists.
    /// `None` when the announcement is missing, otherwise whether this was the first read.
    async fn record_read(
        &self,
        id: &ObjectId,
        user: &ObjectId,
        at: DateTime<Utc>,
    ) -> Result<Option<bool>>;
    /// Adds a like if the user has none; returns the new like count when applied
    async fn add_like(
        &self,
        id: &ObjectId,
        user: &ObjectId,
        at: DateTime<Utc>,
    ) -> Result<Option<i64>>;
    /// Removes the user's like if present; returns the new like count when applied
    async fn remove_like(&self, id: &ObjectId, user: &ObjectId) -> Result<Option<i64>>;
    /// Appends a comment only while comments are allowed
    async fn push_comment(&self, id: &ObjectId, comment: &Comment) -> Result<bool>;
    async fn push_reply(&self, id: &ObjectId, comment_id: &ObjectId, reply: &Reply)
        -> Result<bool>;
}

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    /// Unordered bulk insert: a failing document does not stop the rest
    async fn insert_many(&self, notifications: Vec<Notification>) -> Result<FanOutReport>;
    async fn list_for_user(
        &self,
        user: &ObjectId,
        filter: &NotificationFilter,
    ) -> Result<Vec<Notification>>;
    async fn unread_count(&self, user: &ObjectId) -> Result<u64>;
    async fn mark_read(&self, user: &ObjectId, id: &ObjectId, at: DateTime<Utc>)
        -> Result<bool>;
    async fn mark_all_read(&self, user: &ObjectId, at: DateTime<Utc>) -> Result<u64>;
    async fn delete_for_user(&self, user: &ObjectId, id: &ObjectId) -> Result<bool>;
    /// Removes read notifications whose `read_at` is before the cutoff
    async fn delete_read_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

#[derive(Debug, Clone, Default)]
pub struct NotificationFilter {
    pub unread_only: bool,
    pub notification_type: Option<NotificationType>,
    pub limit: i64,
    pub offset: u64,
}

/// All persistence handles used by the services
#[derive(Clone)]
pub struct Repositories {
    pub directory: Arc<dyn DirectoryRepository>,
    pub memberships: Arc<dyn MembershipRepository>,
    pub announcements: Arc<dyn AnnouncementRepository>,
    pub notifications: Arc<dyn NotificationRepository>,
}

impl Repositories {
    pub fn mongo(db: &Database) -> Self {
        Repositories {
            directory: Arc::new(MongoDirectoryRepository::new(db.clone())),
            memberships: Arc::new(MongoMembershipRepository::new(db.clone())),
            announcements: Arc::new(MongoAnnouncementRepository::new(db.clone())),
            notifications: Arc::new(MongoNotificationRepository::new(db.clone())),
        }
    }
}
