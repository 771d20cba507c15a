#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::anyhow;
use async_trait::async_trait;
use axum::Router;
use chrono::{DateTime, Duration, TimeZone, Utc};
use mongodb::bson::oid::ObjectId;

use drose_api::{
    config::Config,
    create_router,
    error::{AppError, Result},
    middlewares::auth::{JwtClaims, JwtService},
    models::announcement::{
        audience_includes, Announcement, AnnouncementQuery, AnnouncementStatus, Audience, Comment,
        CreateAnnouncementRequest, LikeRecord, ReadRecord, Reply,
    },
    models::course::Course,
    models::group::{Enrollment, EnrollmentStatus, Group},
    models::notification::{FanOutReport, Notification},
    models::user::{Actor, User, UserRole},
    models::Priority,
    repositories::{
        AnnouncementRepository, DirectoryRepository, MembershipRepository, NotificationFilter,
        NotificationRepository, Repositories,
    },
    services::{
        announcement_service::AnnouncementService, notification_service::NotificationService,
        AppState,
    },
    utils::time::FixedClock,
};

pub const TEST_JWT_SECRET: &str = "drose-test-secret";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory stand-in for the MongoDB collections, following the same
/// filter and update semantics as the Mongo repositories
#[derive(Default)]
pub struct MemoryStore {
    users: Mutex<Vec<User>>,
    groups: Mutex<Vec<Group>>,
    courses: Mutex<Vec<Course>>,
    announcements: Mutex<Vec<Announcement>>,
    notifications: Mutex<Vec<Notification>>,
    /// Makes every bulk notification insert fail
    pub fail_notification_inserts: AtomicBool,
    /// Makes directory lookups fail
    pub fail_directory: AtomicBool,
}

impl MemoryStore {
    pub fn add_user(&self, role: UserRole, is_active: bool) -> ObjectId {
        let id = ObjectId::new();
        let now = Utc::now();
        lock(&self.users).push(User {
            id,
            email: format!("{}@drose.test", id.to_hex()),
            name: format!("{} {}", role.as_str(), id.to_hex()),
            role,
            is_active,
            group_ids: vec![],
            created_at: now,
            updated_at: now,
        });
        id
    }

    pub fn add_group(
        &self,
        course_id: Option<ObjectId>,
        enrollments: &[(ObjectId, EnrollmentStatus)],
    ) -> ObjectId {
        let id = ObjectId::new();
        lock(&self.groups).push(Group {
            id,
            name: format!("group {}", id.to_hex()),
            course_id,
            students: enrollments
                .iter()
                .map(|(student, status)| Enrollment {
                    student: *student,
                    status: *status,
                    enrolled_at: Some(Utc::now()),
                })
                .collect(),
        });
        id
    }

    pub fn add_course(&self, teacher: Option<ObjectId>, groups: Vec<ObjectId>) -> ObjectId {
        let id = ObjectId::new();
        lock(&self.courses).push(Course {
            id,
            name: format!("course {}", id.to_hex()),
            teacher,
            subject: None,
            groups,
        });
        id
    }

    pub fn announcement(&self, id: &ObjectId) -> Option<Announcement> {
        lock(&self.announcements)
            .iter()
            .find(|a| &a.id == id)
            .cloned()
    }

    pub fn put_announcement(&self, announcement: Announcement) {
        lock(&self.announcements).push(announcement);
    }

    pub fn notifications(&self) -> Vec<Notification> {
        lock(&self.notifications).clone()
    }

    pub fn notifications_for(&self, user: &ObjectId) -> Vec<Notification> {
        lock(&self.notifications)
            .iter()
            .filter(|n| &n.recipient == user)
            .cloned()
            .collect()
    }

    pub fn put_notification(&self, notification: Notification) {
        lock(&self.notifications).push(notification);
    }

    fn check_directory(&self) -> Result<()> {
        if self.fail_directory.load(Ordering::SeqCst) {
            Err(AppError::Database(anyhow!("directory unavailable")))
        } else {
            Ok(())
        }
    }
}

fn is_live(announcement: &Announcement, now: DateTime<Utc>) -> bool {
    matches!(
        announcement.status,
        AnnouncementStatus::Scheduled | AnnouncementStatus::Published
    ) && announcement.publish_at <= now
        && announcement.expires_at.is_none_or(|expires| expires > now)
}

#[async_trait]
impl DirectoryRepository for MemoryStore {
    async fn active_user_ids(&self) -> Result<Vec<ObjectId>> {
        self.check_directory()?;
        Ok(lock(&self.users)
            .iter()
            .filter(|u| u.is_active)
            .map(|u| u.id)
            .collect())
    }

    async fn active_user_ids_by_role(&self, role: UserRole) -> Result<Vec<ObjectId>> {
        self.check_directory()?;
        Ok(lock(&self.users)
            .iter()
            .filter(|u| u.is_active && u.role == role)
            .map(|u| u.id)
            .collect())
    }

    async fn existing_user_ids(&self, ids: &[ObjectId]) -> Result<Vec<ObjectId>> {
        self.check_directory()?;
        Ok(lock(&self.users)
            .iter()
            .filter(|u| ids.contains(&u.id))
            .map(|u| u.id)
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        self.check_directory()
    }
}

#[async_trait]
impl MembershipRepository for MemoryStore {
    async fn groups_by_ids(&self, ids: &[ObjectId]) -> Result<Vec<Group>> {
        Ok(lock(&self.groups)
            .iter()
            .filter(|g| ids.contains(&g.id))
            .cloned()
            .collect())
    }

    async fn courses_by_ids(&self, ids: &[ObjectId]) -> Result<Vec<Course>> {
        Ok(lock(&self.courses)
            .iter()
            .filter(|c| ids.contains(&c.id))
            .cloned()
            .collect())
    }

    async fn groups_by_courses(&self, course_ids: &[ObjectId]) -> Result<Vec<Group>> {
        Ok(lock(&self.groups)
            .iter()
            .filter(|g| g.course_id.is_some_and(|c| course_ids.contains(&c)))
            .cloned()
            .collect())
    }

    async fn groups_of_student(&self, student: &ObjectId) -> Result<Vec<Group>> {
        Ok(lock(&self.groups)
            .iter()
            .filter(|g| g.active_students().any(|s| &s == student))
            .cloned()
            .collect())
    }

    async fn courses_related_to(
        &self,
        teacher: &ObjectId,
        group_ids: &[ObjectId],
    ) -> Result<Vec<Course>> {
        Ok(lock(&self.courses)
            .iter()
            .filter(|c| {
                c.teacher.as_ref() == Some(teacher) || c.groups.iter().any(|g| group_ids.contains(g))
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AnnouncementRepository for MemoryStore {
    async fn insert(&self, announcement: &Announcement) -> Result<()> {
        lock(&self.announcements).push(announcement.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &ObjectId) -> Result<Option<Announcement>> {
        Ok(self.announcement(id))
    }

    async fn list(&self, query: &AnnouncementQuery) -> Result<Vec<Announcement>> {
        let search = query
            .search
            .as_deref()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());

        let mut items: Vec<Announcement> = lock(&self.announcements)
            .iter()
            .filter(|a| match &query.viewer {
                Some(viewer) => {
                    a.author == viewer.user_id
                        || (is_live(a, query.now) && audience_includes(a, viewer))
                }
                None => true,
            })
            .filter(|a| match query.status {
                Some(AnnouncementStatus::Published) => is_live(a, query.now),
                Some(status) => a.status == status,
                None => true,
            })
            .filter(|a| query.priority.is_none_or(|p| a.priority == p))
            .filter(|a| query.pinned.is_none_or(|p| a.pinned == p))
            .filter(|a| {
                search
                    .as_ref()
                    .is_none_or(|s| a.title.to_lowercase().contains(s))
            })
            .cloned()
            .collect();

        items.sort_by(|a, b| {
            b.pinned
                .cmp(&a.pinned)
                .then_with(|| b.publish_at.cmp(&a.publish_at))
        });

        Ok(items
            .into_iter()
            .skip(query.offset as usize)
            .take(query.limit.max(0) as usize)
            .collect())
    }

    async fn update_content(&self, announcement: &Announcement) -> Result<bool> {
        let mut items = lock(&self.announcements);
        let Some(stored) = items.iter_mut().find(|a| a.id == announcement.id) else {
            return Ok(false);
        };
        stored.title = announcement.title.clone();
        stored.content = announcement.content.clone();
        stored.audience = announcement.audience;
        stored.target_groups = announcement.target_groups.clone();
        stored.target_courses = announcement.target_courses.clone();
        stored.target_users = announcement.target_users.clone();
        stored.publish_at = announcement.publish_at;
        stored.expires_at = announcement.expires_at;
        stored.status = announcement.status;
        stored.priority = announcement.priority;
        stored.pinned = announcement.pinned;
        stored.allow_comments = announcement.allow_comments;
        stored.updated_at = announcement.updated_at;
        Ok(true)
    }

    async fn delete(&self, id: &ObjectId) -> Result<bool> {
        let mut items = lock(&self.announcements);
        let before = items.len();
        items.retain(|a| &a.id != id);
        Ok(items.len() < before)
    }

    async fn transition_status(
        &self,
        id: &ObjectId,
        from: AnnouncementStatus,
        to: AnnouncementStatus,
    ) -> Result<bool> {
        let mut items = lock(&self.announcements);
        match items.iter_mut().find(|a| &a.id == id && a.status == from) {
            Some(stored) if from != to => {
                stored.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_read(
        &self,
        id: &ObjectId,
        user: &ObjectId,
        at: DateTime<Utc>,
    ) -> Result<Option<bool>> {
        let mut items = lock(&self.announcements);
        let Some(stored) = items.iter_mut().find(|a| &a.id == id) else {
            return Ok(None);
        };
        stored.view_count += 1;
        if stored.is_read_by(user) {
            return Ok(Some(false));
        }
        stored.read_by.push(ReadRecord {
            user: *user,
            read_at: at,
        });
        Ok(Some(true))
    }

    async fn add_like(
        &self,
        id: &ObjectId,
        user: &ObjectId,
        at: DateTime<Utc>,
    ) -> Result<Option<i64>> {
        let mut items = lock(&self.announcements);
        match items.iter_mut().find(|a| &a.id == id && !a.is_liked_by(user)) {
            Some(stored) => {
                stored.likes.push(LikeRecord {
                    user: *user,
                    liked_at: at,
                });
                stored.like_count += 1;
                Ok(Some(stored.like_count))
            }
            None => Ok(None),
        }
    }

    async fn remove_like(&self, id: &ObjectId, user: &ObjectId) -> Result<Option<i64>> {
        let mut items = lock(&self.announcements);
        match items.iter_mut().find(|a| &a.id == id && a.is_liked_by(user)) {
            Some(stored) => {
                stored.likes.retain(|like| &like.user != user);
                stored.like_count -= 1;
                Ok(Some(stored.like_count))
            }
            None => Ok(None),
        }
    }

    async fn push_comment(&self, id: &ObjectId, comment: &Comment) -> Result<bool> {
        let mut items = lock(&self.announcements);
        match items.iter_mut().find(|a| &a.id == id && a.allow_comments) {
            Some(stored) => {
                stored.comments.push(comment.clone());
                stored.comment_count += 1;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn push_reply(
        &self,
        id: &ObjectId,
        comment_id: &ObjectId,
        reply: &Reply,
    ) -> Result<bool> {
        let mut items = lock(&self.announcements);
        let comment = items
            .iter_mut()
            .filter(|a| &a.id == id && a.allow_comments)
            .flat_map(|a| a.comments.iter_mut())
            .find(|c| &c.id == comment_id);
        match comment {
            Some(comment) => {
                comment.replies.push(reply.clone());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl NotificationRepository for MemoryStore {
    async fn insert_many(&self, notifications: Vec<Notification>) -> Result<FanOutReport> {
        if self.fail_notification_inserts.load(Ordering::SeqCst) {
            return Err(AppError::Database(anyhow!("bulk insert failed")));
        }
        let inserted = notifications.len();
        lock(&self.notifications).extend(notifications);
        Ok(FanOutReport {
            inserted,
            failed: 0,
        })
    }

    async fn list_for_user(
        &self,
        user: &ObjectId,
        filter: &NotificationFilter,
    ) -> Result<Vec<Notification>> {
        let mut items: Vec<Notification> = lock(&self.notifications)
            .iter()
            .filter(|n| &n.recipient == user)
            .filter(|n| !filter.unread_only || !n.is_read)
            .filter(|n| {
                filter
                    .notification_type
                    .is_none_or(|t| n.notification_type == t)
            })
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(items
            .into_iter()
            .skip(filter.offset as usize)
            .take(filter.limit.max(0) as usize)
            .collect())
    }

    async fn unread_count(&self, user: &ObjectId) -> Result<u64> {
        Ok(lock(&self.notifications)
            .iter()
            .filter(|n| &n.recipient == user && !n.is_read)
            .count() as u64)
    }

    async fn mark_read(
        &self,
        user: &ObjectId,
        id: &ObjectId,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut items = lock(&self.notifications);
        match items
            .iter_mut()
            .find(|n| &n.id == id && &n.recipient == user)
        {
            Some(stored) => {
                stored.is_read = true;
                stored.read_at = Some(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_all_read(&self, user: &ObjectId, at: DateTime<Utc>) -> Result<u64> {
        let mut updated = 0;
        for stored in lock(&self.notifications)
            .iter_mut()
            .filter(|n| &n.recipient == user && !n.is_read)
        {
            stored.is_read = true;
            stored.read_at = Some(at);
            updated += 1;
        }
        Ok(updated)
    }

    async fn delete_for_user(&self, user: &ObjectId, id: &ObjectId) -> Result<bool> {
        let mut items = lock(&self.notifications);
        let before = items.len();
        items.retain(|n| !(&n.id == id && &n.recipient == user));
        Ok(items.len() < before)
    }

    async fn delete_read_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut items = lock(&self.notifications);
        let before = items.len();
        items.retain(|n| !(n.is_read && n.read_at.is_some_and(|at| at < cutoff)));
        Ok((before - items.len()) as u64)
    }
}

/// Application wired to an in-memory store and a manually driven clock
pub struct TestApp {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<FixedClock>,
    pub state: Arc<AppState>,
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 9, 1, 8, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

impl TestApp {
    pub fn new() -> Self {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();

        let store = Arc::new(MemoryStore::default());
        let clock = Arc::new(FixedClock::new(start_time()));
        let repositories = Repositories {
            directory: store.clone(),
            memberships: store.clone(),
            announcements: store.clone(),
            notifications: store.clone(),
        };
        let state = Arc::new(AppState::with_repositories(
            Config::for_tests(TEST_JWT_SECRET),
            repositories,
            clock.clone(),
        ));

        Self {
            store,
            clock,
            state,
        }
    }

    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    pub fn announcements(&self) -> AnnouncementService {
        self.state.announcement_service()
    }

    pub fn notifications(&self) -> NotificationService {
        self.state.notification_service()
    }

    /// Active user of the role, returned as a service caller
    pub fn actor(&self, role: UserRole) -> Actor {
        Actor::new(self.store.add_user(role, true), role)
    }

    pub fn token(&self, actor: &Actor) -> String {
        let claims = JwtClaims::new(&actor.id, actor.role, Duration::hours(1));
        JwtService::new(TEST_JWT_SECRET)
            .generate_token(&claims)
            .expect("token")
    }
}

/// Minimal valid create request for the audience
pub fn create_request(audience: Audience) -> CreateAnnouncementRequest {
    CreateAnnouncementRequest {
        title: "Parent meeting".to_string(),
        content: "The parent meeting moves to Thursday at 18:00.".to_string(),
        audience,
        target_groups: vec![],
        target_courses: vec![],
        target_users: vec![],
        publish_at: None,
        expires_at: None,
        draft: false,
        priority: Priority::Normal,
        pinned: false,
        allow_comments: None,
    }
}

pub fn hex(ids: &[ObjectId]) -> Vec<String> {
    ids.iter().map(|id| id.to_hex()).collect()
}

pub fn id_set(ids: &[ObjectId]) -> HashSet<ObjectId> {
    ids.iter().copied().collect()
}
