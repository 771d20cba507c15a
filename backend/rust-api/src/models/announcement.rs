use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::user::{bson_datetime_as_chrono, bson_datetime_as_chrono_option, UserRole};
use super::Priority;

/// Announcement stored in MongoDB "announcements" collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Announcement {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub title: String,
    pub content: String,
    pub author: ObjectId,
    pub audience: Audience,
    #[serde(default)]
    pub target_groups: Vec<ObjectId>,
    #[serde(default)]
    pub target_courses: Vec<ObjectId>,
    #[serde(default)]
    pub target_users: Vec<ObjectId>,
    #[serde(rename = "publishAt", with = "bson_datetime_as_chrono")]
    pub publish_at: DateTime<Utc>,
    #[serde(
        rename = "expiresAt",
        default,
        skip_serializing_if = "Option::is_none",
        with = "bson_datetime_as_chrono_option"
    )]
    pub expires_at: Option<DateTime<Utc>>,
    pub status: AnnouncementStatus,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default = "default_true")]
    pub allow_comments: bool,
    #[serde(default)]
    pub read_by: Vec<ReadRecord>,
    #[serde(default)]
    pub likes: Vec<LikeRecord>,
    #[serde(default)]
    pub comments: Vec<Comment>,
    #[serde(default)]
    pub view_count: i64,
    #[serde(default)]
    pub like_count: i64,
    #[serde(default)]
    pub comment_count: i64,
    #[serde(rename = "createdAt", with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt", with = "bson_datetime_as_chrono")]
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    All,
    Students,
    Teachers,
    Admins,
    SpecificGroups,
    SpecificCourses,
    SpecificUsers,
}

impl Audience {
    pub fn as_str(&self) -> &'static str {
        match self {
            Audience::All => "all",
            Audience::Students => "students",
            Audience::Teachers => "teachers",
            Audience::Admins => "admins",
            Audience::SpecificGroups => "specific_groups",
            Audience::SpecificCourses => "specific_courses",
            Audience::SpecificUsers => "specific_users",
        }
    }

    /// Role targeted by role-wide audiences
    pub fn role(&self) -> Option<UserRole> {
        match self {
            Audience::Students => Some(UserRole::Student),
            Audience::Teachers => Some(UserRole::Teacher),
            Audience::Admins => Some(UserRole::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AnnouncementStatus {
    Draft,
    Scheduled,
    Published,
    Expired,
    Archived,
}

impl AnnouncementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnnouncementStatus::Draft => "draft",
            AnnouncementStatus::Scheduled => "scheduled",
            AnnouncementStatus::Published => "published",
            AnnouncementStatus::Expired => "expired",
            AnnouncementStatus::Archived => "archived",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReadRecord {
    pub user: ObjectId,
    #[serde(rename = "readAt", with = "bson_datetime_as_chrono")]
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LikeRecord {
    pub user: ObjectId,
    #[serde(rename = "likedAt", with = "bson_datetime_as_chrono")]
    pub liked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Comment {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub user: ObjectId,
    pub text: String,
    #[serde(rename = "createdAt", with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub replies: Vec<Reply>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reply {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub user: ObjectId,
    pub text: String,
    #[serde(rename = "createdAt", with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,
}

/// Status an announcement should have at `now`.
///
/// Draft and archived are only left through an explicit action. Every other
/// status is derived from the publish/expiry window, so editing the window
/// moves the announcement accordingly.
pub fn reconcile_status(announcement: &Announcement, now: DateTime<Utc>) -> AnnouncementStatus {
    match announcement.status {
        AnnouncementStatus::Draft | AnnouncementStatus::Archived => announcement.status,
        _ => {
            if announcement.expires_at.is_some_and(|expires| expires <= now) {
                AnnouncementStatus::Expired
            } else if announcement.publish_at <= now {
                AnnouncementStatus::Published
            } else {
                AnnouncementStatus::Scheduled
            }
        }
    }
}

impl Announcement {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        reconcile_status(self, now) == AnnouncementStatus::Published
    }

    pub fn is_read_by(&self, user: &ObjectId) -> bool {
        self.read_by.iter().any(|record| &record.user == user)
    }

    pub fn is_liked_by(&self, user: &ObjectId) -> bool {
        self.likes.iter().any(|record| &record.user == user)
    }
}

/// Who is looking at announcements, with the memberships needed for targeting
#[derive(Debug, Clone)]
pub struct Viewer {
    pub user_id: ObjectId,
    pub role: UserRole,
    pub group_ids: Vec<ObjectId>,
    pub course_ids: Vec<ObjectId>,
}

impl Viewer {
    pub fn can_manage(&self, announcement: &Announcement) -> bool {
        self.role == UserRole::Admin || self.user_id == announcement.author
    }
}

/// Whether the audience rule of a live announcement includes the viewer
pub fn audience_includes(announcement: &Announcement, viewer: &Viewer) -> bool {
    match announcement.audience {
        Audience::All => true,
        Audience::Students | Audience::Teachers | Audience::Admins => {
            announcement.audience.role() == Some(viewer.role)
        }
        Audience::SpecificGroups => announcement
            .target_groups
            .iter()
            .any(|group| viewer.group_ids.contains(group)),
        Audience::SpecificCourses => announcement
            .target_courses
            .iter()
            .any(|course| viewer.course_ids.contains(course)),
        Audience::SpecificUsers => announcement.target_users.contains(&viewer.user_id),
    }
}

/// Admins and the author see everything; everyone else only live announcements aimed at them
pub fn is_visible_to(announcement: &Announcement, viewer: &Viewer, now: DateTime<Utc>) -> bool {
    viewer.can_manage(announcement)
        || (announcement.is_live(now) && audience_includes(announcement, viewer))
}

/// Share of the resolved audience that has opened the announcement, in percent
pub fn read_percentage(announcement: &Announcement, audience_size: usize) -> f64 {
    if audience_size == 0 {
        return 0.0;
    }
    let ratio = announcement.read_by.len() as f64 / audience_size as f64;
    (ratio * 10000.0).round() / 100.0
}

pub fn engagement_score(announcement: &Announcement) -> i64 {
    announcement.view_count + announcement.like_count * 2 + announcement.comment_count * 3
}

/// Body of POST /announcements
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateAnnouncementRequest {
    #[serde(default)]
    #[validate(length(min = 1, max = 200, message = "Title is required (max 200 characters)"))]
    pub title: String,

    #[serde(default)]
    #[validate(length(
        min = 1,
        max = 10000,
        message = "Content is required (max 10000 characters)"
    ))]
    pub content: String,

    pub audience: Audience,

    #[serde(default)]
    pub target_groups: Vec<String>,
    #[serde(default)]
    pub target_courses: Vec<String>,
    #[serde(default)]
    pub target_users: Vec<String>,

    /// Defaults to now
    pub publish_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,

    /// Save without publishing
    #[serde(default)]
    pub draft: bool,

    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub pinned: bool,
    pub allow_comments: Option<bool>,
}

/// Partial update; absent fields are left unchanged
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateAnnouncementRequest {
    #[validate(length(min = 1, max = 200, message = "Title must be 1-200 characters"))]
    pub title: Option<String>,

    #[validate(length(min = 1, max = 10000, message = "Content must be 1-10000 characters"))]
    pub content: Option<String>,

    pub audience: Option<Audience>,
    pub target_groups: Option<Vec<String>>,
    pub target_courses: Option<Vec<String>>,
    pub target_users: Option<Vec<String>>,
    pub publish_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Removes the expiry; cannot be combined with `expires_at`
    #[serde(default)]
    pub clear_expiry: bool,
    /// `false` publishes a draft, `true` moves it back to draft
    pub draft: Option<bool>,
    pub priority: Option<Priority>,
    pub pinned: Option<bool>,
    pub allow_comments: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CommentRequest {
    #[serde(default)]
    #[validate(length(min = 1, max = 2000, message = "Comment must be 1-2000 characters"))]
    pub text: String,
}

/// Query string for the announcement feed
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ListAnnouncementsQuery {
    /// Only honored for admins; everyone else sees published announcements
    pub status: Option<AnnouncementStatus>,
    pub priority: Option<Priority>,
    pub pinned: Option<bool>,
    /// Case-insensitive title search
    pub search: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// Filter handed to the announcement repository
#[derive(Debug, Clone)]
pub struct AnnouncementQuery {
    /// `None` means unrestricted (admin listing)
    pub viewer: Option<Viewer>,
    pub status: Option<AnnouncementStatus>,
    pub priority: Option<Priority>,
    pub pinned: Option<bool>,
    pub search: Option<String>,
    pub now: DateTime<Utc>,
    pub limit: i64,
    pub offset: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnnouncementResponse {
    pub id: String,
    pub title: String,
    pub content: String,
    pub author_id: String,
    pub audience: Audience,
    pub target_groups: Vec<String>,
    pub target_courses: Vec<String>,
    pub target_users: Vec<String>,
    pub publish_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub status: AnnouncementStatus,
    pub priority: Priority,
    pub pinned: bool,
    pub allow_comments: bool,
    pub view_count: i64,
    pub like_count: i64,
    pub comment_count: i64,
    pub read_count: usize,
    pub is_read: bool,
    pub is_liked: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<CommentResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AnnouncementResponse {
    /// Summary form without comment threads
    pub fn summary(announcement: &Announcement, viewer: &ObjectId) -> Self {
        let mut response = Self::detail(announcement, viewer);
        response.comments.clear();
        response
    }

    pub fn detail(announcement: &Announcement, viewer: &ObjectId) -> Self {
        AnnouncementResponse {
            id: announcement.id.to_hex(),
            title: announcement.title.clone(),
            content: announcement.content.clone(),
            author_id: announcement.author.to_hex(),
            audience: announcement.audience,
            target_groups: to_hex_list(&announcement.target_groups),
            target_courses: to_hex_list(&announcement.target_courses),
            target_users: to_hex_list(&announcement.target_users),
            publish_at: announcement.publish_at,
            expires_at: announcement.expires_at,
            status: announcement.status,
            priority: announcement.priority,
            pinned: announcement.pinned,
            allow_comments: announcement.allow_comments,
            view_count: announcement.view_count,
            like_count: announcement.like_count,
            comment_count: announcement.comment_count,
            read_count: announcement.read_by.len(),
            is_read: announcement.is_read_by(viewer),
            is_liked: announcement.is_liked_by(viewer),
            comments: announcement
                .comments
                .iter()
                .map(CommentResponse::from)
                .collect(),
            created_at: announcement.created_at,
            updated_at: announcement.updated_at,
        }
    }
}

fn to_hex_list(ids: &[ObjectId]) -> Vec<String> {
    ids.iter().map(|id| id.to_hex()).collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct CommentResponse {
    pub id: String,
    pub user_id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub replies: Vec<ReplyResponse>,
}

impl From<&Comment> for CommentResponse {
    fn from(comment: &Comment) -> Self {
        CommentResponse {
            id: comment.id.to_hex(),
            user_id: comment.user.to_hex(),
            text: comment.text.clone(),
            created_at: comment.created_at,
            replies: comment.replies.iter().map(ReplyResponse::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplyResponse {
    pub id: String,
    pub user_id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl From<&Reply> for ReplyResponse {
    fn from(reply: &Reply) -> Self {
        ReplyResponse {
            id: reply.id.to_hex(),
            user_id: reply.user.to_hex(),
            text: reply.text.clone(),
            created_at: reply.created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct LikeResponse {
    pub liked: bool,
    pub like_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnnouncementStats {
    pub id: String,
    pub audience_size: usize,
    pub read_count: usize,
    pub read_percentage: f64,
    pub view_count: i64,
    pub like_count: i64,
    pub comment_count: i64,
    pub engagement_score: i64,
}
