use std::sync::Arc;

use anyhow::anyhow;
use mongodb::bson::oid::ObjectId;
use tracing::{debug, info, warn};
use validator::Validate;

use crate::error::{parse_object_ids, AppError, Result};
use crate::metrics::{
    ANNOUNCEMENTS_CREATED_TOTAL, ANNOUNCEMENT_ENGAGEMENT_TOTAL, FAN_OUT_FAILURES_TOTAL,
};
use crate::models::announcement::{
    engagement_score, is_visible_to, read_percentage, reconcile_status, Announcement,
    AnnouncementQuery, AnnouncementResponse, AnnouncementStats, AnnouncementStatus, Audience,
    Comment, CommentRequest, CommentResponse, CreateAnnouncementRequest, LikeResponse,
    ListAnnouncementsQuery, ReadRecord, Reply, ReplyResponse, UpdateAnnouncementRequest, Viewer,
};
use crate::models::notification::{NotificationContent, NotificationType};
use crate::models::user::Actor;
use crate::models::Page;
use crate::repositories::AnnouncementRepository;
use crate::services::audience_resolver::AudienceResolver;
use crate::services::membership_resolver::MembershipResolver;
use crate::services::notification_service::NotificationService;
use crate::utils::retry::{retry_on_conflict, RetryConfig};
use crate::utils::time::Clock;

const NOTIFICATION_PREVIEW_CHARS: usize = 140;

/// Announcement write path, lazy status transitions and the engagement tracker
#[derive(Clone)]
pub struct AnnouncementService {
    announcements: Arc<dyn AnnouncementRepository>,
    audience: AudienceResolver,
    membership: MembershipResolver,
    notifications: NotificationService,
    clock: Arc<dyn Clock>,
    retry: RetryConfig,
}

impl AnnouncementService {
    pub fn new(
        announcements: Arc<dyn AnnouncementRepository>,
        audience: AudienceResolver,
        membership: MembershipResolver,
        notifications: NotificationService,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            announcements,
            audience,
            membership,
            notifications,
            clock,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Create an announcement; fans out immediately when it goes live
    pub async fn create(
        &self,
        actor: &Actor,
        req: CreateAnnouncementRequest,
    ) -> Result<AnnouncementResponse> {
        if !actor.role.is_staff() {
            return Err(AppError::forbidden("Only staff can publish announcements"));
        }
        req.validate()?;

        let now = self.clock.now();
        let mut announcement = Announcement {
            id: ObjectId::new(),
            title: req.title.trim().to_string(),
            content: req.content,
            author: actor.id,
            audience: req.audience,
            target_groups: parse_object_ids(&req.target_groups, "target_groups")?,
            target_courses: parse_object_ids(&req.target_courses, "target_courses")?,
            target_users: parse_object_ids(&req.target_users, "target_users")?,
            publish_at: req.publish_at.unwrap_or(now),
            expires_at: req.expires_at,
            status: AnnouncementStatus::Scheduled,
            priority: req.priority,
            pinned: req.pinned,
            allow_comments: req.allow_comments.unwrap_or(true),
            read_by: Vec::new(),
            likes: Vec::new(),
            comments: Vec::new(),
            view_count: 0,
            like_count: 0,
            comment_count: 0,
            created_at: now,
            updated_at: now,
        };
        check_targets(&announcement)?;

        announcement.status = if req.draft {
            AnnouncementStatus::Draft
        } else {
            reconcile_status(&announcement, now)
        };

        self.announcements.insert(&announcement).await?;

        ANNOUNCEMENTS_CREATED_TOTAL
            .with_label_values(&[
                announcement.audience.as_str(),
                announcement.status.as_str(),
            ])
            .inc();
        info!(
            announcement_id = %announcement.id,
            author = %actor.id,
            audience = announcement.audience.as_str(),
            status = announcement.status.as_str(),
            "Announcement created"
        );

        if announcement.status == AnnouncementStatus::Published {
            self.notify_audience(&announcement).await;
        }

        Ok(AnnouncementResponse::detail(&announcement, &actor.id))
    }

    /// Announcements visible to the caller, pinned first then newest
    pub async fn list(
        &self,
        actor: &Actor,
        query: ListAnnouncementsQuery,
    ) -> Result<Vec<AnnouncementResponse>> {
        let page = Page {
            limit: query.limit,
            offset: query.offset,
        };
        let (viewer, status) = if actor.is_admin() {
            (None, query.status)
        } else {
            (Some(self.viewer(actor).await?), None)
        };

        let repo_query = AnnouncementQuery {
            viewer,
            status,
            priority: query.priority,
            pinned: query.pinned,
            search: query.search,
            now: self.clock.now(),
            limit: page.limit(),
            offset: page.offset(),
        };

        let mut items = Vec::new();
        for announcement in self.announcements.list(&repo_query).await? {
            let announcement = self.reconcile_loaded(announcement).await?;
            items.push(AnnouncementResponse::summary(&announcement, &actor.id));
        }
        Ok(items)
    }

    /// Opening an announcement counts as a read
    pub async fn get(&self, actor: &Actor, id: &ObjectId) -> Result<AnnouncementResponse> {
        let mut announcement = self.load(id).await?;
        let viewer = self.viewer(actor).await?;
        self.ensure_visible(&announcement, &viewer)?;

        let now = self.clock.now();
        match self.announcements.record_read(id, &actor.id, now).await? {
            Some(first_read) => {
                announcement.view_count += 1;
                if first_read {
                    announcement.read_by.push(ReadRecord {
                        user: actor.id,
                        read_at: now,
                    });
                }
            }
            None => return Err(AppError::not_found("Announcement")),
        }

        Ok(AnnouncementResponse::detail(&announcement, &actor.id))
    }

    /// Edit an announcement (author or admin)
    pub async fn update(
        &self,
        actor: &Actor,
        id: &ObjectId,
        req: UpdateAnnouncementRequest,
    ) -> Result<AnnouncementResponse> {
        req.validate()?;

        let mut announcement = self.load(id).await?;
        ensure_manager(actor, &announcement, "Only the author or an admin can edit")?;
        let previous = announcement.status;

        if let Some(title) = req.title {
            announcement.title = title.trim().to_string();
        }
        if let Some(content) = req.content {
            announcement.content = content;
        }
        if let Some(audience) = req.audience {
            announcement.audience = audience;
        }
        if let Some(groups) = req.target_groups {
            announcement.target_groups = parse_object_ids(&groups, "target_groups")?;
        }
        if let Some(courses) = req.target_courses {
            announcement.target_courses = parse_object_ids(&courses, "target_courses")?;
        }
        if let Some(users) = req.target_users {
            announcement.target_users = parse_object_ids(&users, "target_users")?;
        }
        if let Some(publish_at) = req.publish_at {
            announcement.publish_at = publish_at;
        }
        match (req.clear_expiry, req.expires_at) {
            (true, Some(_)) => {
                return Err(AppError::validation(
                    "clear_expiry and expires_at cannot be combined",
                ))
            }
            (true, None) => announcement.expires_at = None,
            (false, Some(expires_at)) => announcement.expires_at = Some(expires_at),
            (false, None) => {}
        }
        if let Some(priority) = req.priority {
            announcement.priority = priority;
        }
        if let Some(pinned) = req.pinned {
            announcement.pinned = pinned;
        }
        if let Some(allow_comments) = req.allow_comments {
            announcement.allow_comments = allow_comments;
        }
        check_targets(&announcement)?;

        match req.draft {
            Some(true) if previous != AnnouncementStatus::Archived => {
                announcement.status = AnnouncementStatus::Draft;
            }
            Some(false) if previous == AnnouncementStatus::Draft => {
                announcement.status = AnnouncementStatus::Scheduled;
            }
            _ => {}
        }

        let now = self.clock.now();
        let next = reconcile_status(&announcement, now);
        announcement.updated_at = now;

        let goes_live = next == AnnouncementStatus::Published
            && matches!(
                previous,
                AnnouncementStatus::Draft | AnnouncementStatus::Scheduled
            );

        if goes_live {
            // Persist under the old status, then race for the publish transition
            announcement.status = previous;
            if !self.announcements.update_content(&announcement).await? {
                return Err(AppError::not_found("Announcement"));
            }
            if self
                .announcements
                .transition_status(id, previous, AnnouncementStatus::Published)
                .await?
            {
                announcement.status = AnnouncementStatus::Published;
                self.notify_audience(&announcement).await;
            } else {
                announcement = self.load(id).await?;
            }
        } else {
            announcement.status = next;
            if !self.announcements.update_content(&announcement).await? {
                return Err(AppError::not_found("Announcement"));
            }
        }

        info!(
            announcement_id = %id,
            editor = %actor.id,
            status = announcement.status.as_str(),
            "Announcement updated"
        );

        Ok(AnnouncementResponse::detail(&announcement, &actor.id))
    }

    pub async fn delete(&self, actor: &Actor, id: &ObjectId) -> Result<()> {
        let announcement = self
            .announcements
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::not_found("Announcement"))?;
        ensure_manager(actor, &announcement, "Only the author or an admin can delete")?;

        if !self.announcements.delete(id).await? {
            return Err(AppError::not_found("Announcement"));
        }
        info!(announcement_id = %id, deleted_by = %actor.id, "Announcement deleted");
        Ok(())
    }

    /// Admin-only move to `archived` from any status
    pub async fn archive(&self, actor: &Actor, id: &ObjectId) -> Result<AnnouncementResponse> {
        if !actor.is_admin() {
            return Err(AppError::forbidden("Only admins can archive announcements"));
        }

        let repo = &self.announcements;
        let archived = retry_on_conflict(&self.retry, move || async move {
            let Some(mut announcement) = repo.find_by_id(id).await? else {
                return Err(AppError::not_found("Announcement"));
            };
            if announcement.status == AnnouncementStatus::Archived {
                return Ok(Some(announcement));
            }
            if repo
                .transition_status(id, announcement.status, AnnouncementStatus::Archived)
                .await?
            {
                announcement.status = AnnouncementStatus::Archived;
                Ok(Some(announcement))
            } else {
                Ok(None)
            }
        })
        .await?
        .ok_or_else(|| AppError::Database(anyhow!("Archive kept conflicting with other writers")))?;

        info!(announcement_id = %id, "Announcement archived");
        Ok(AnnouncementResponse::detail(&archived, &actor.id))
    }

    /// Idempotent per user; the raw view counter grows on every call.
    /// Returns whether this was the user's first read.
    pub async fn mark_read(&self, actor: &Actor, id: &ObjectId) -> Result<bool> {
        let announcement = self.load(id).await?;
        let viewer = self.viewer(actor).await?;
        self.ensure_visible(&announcement, &viewer)?;

        let first_read = self
            .announcements
            .record_read(id, &actor.id, self.clock.now())
            .await?
            .ok_or_else(|| AppError::not_found("Announcement"))?;

        ANNOUNCEMENT_ENGAGEMENT_TOTAL
            .with_label_values(&["read"])
            .inc();
        Ok(first_read)
    }

    pub async fn toggle_like(&self, actor: &Actor, id: &ObjectId) -> Result<LikeResponse> {
        let announcement = self.load(id).await?;
        let viewer = self.viewer(actor).await?;
        self.ensure_visible(&announcement, &viewer)?;

        let repo = &self.announcements;
        let user = actor.id;
        let now = self.clock.now();
        let response = retry_on_conflict(&self.retry, move || async move {
            let Some(current) = repo.find_by_id(id).await? else {
                return Err(AppError::not_found("Announcement"));
            };
            // A `None` from the guarded update means another request flipped it first
            if current.is_liked_by(&user) {
                Ok(repo
                    .remove_like(id, &user)
                    .await?
                    .map(|like_count| LikeResponse {
                        liked: false,
                        like_count,
                    }))
            } else {
                Ok(repo
                    .add_like(id, &user, now)
                    .await?
                    .map(|like_count| LikeResponse {
                        liked: true,
                        like_count,
                    }))
            }
        })
        .await?
        .ok_or_else(|| AppError::Database(anyhow!("Like toggle kept conflicting with other writers")))?;

        ANNOUNCEMENT_ENGAGEMENT_TOTAL
            .with_label_values(&[if response.liked { "like" } else { "unlike" }])
            .inc();
        debug!(announcement_id = %id, user = %user, liked = response.liked, "Like toggled");
        Ok(response)
    }

    /// Fails with `CommentsDisabled` without touching the thread when comments are off
    pub async fn add_comment(
        &self,
        actor: &Actor,
        id: &ObjectId,
        req: CommentRequest,
    ) -> Result<CommentResponse> {
        req.validate()?;

        let announcement = self.load(id).await?;
        let viewer = self.viewer(actor).await?;
        self.ensure_visible(&announcement, &viewer)?;
        if !announcement.allow_comments {
            return Err(AppError::CommentsDisabled);
        }

        let comment = Comment {
            id: ObjectId::new(),
            user: actor.id,
            text: req.text.trim().to_string(),
            created_at: self.clock.now(),
            replies: Vec::new(),
        };

        if !self.announcements.push_comment(id, &comment).await? {
            // Comments were switched off or the announcement removed meanwhile
            return Err(match self.announcements.find_by_id(id).await? {
                Some(_) => AppError::CommentsDisabled,
                None => AppError::not_found("Announcement"),
            });
        }

        ANNOUNCEMENT_ENGAGEMENT_TOTAL
            .with_label_values(&["comment"])
            .inc();

        if announcement.author != actor.id {
            let content = NotificationContent::new(
                NotificationType::Comment,
                format!("New comment on \"{}\"", announcement.title),
                preview(&comment.text),
            )
            .related("announcement", announcement.id)
            .action_url(announcement_url(&announcement.id))
            .sender(actor.id);
            self.notify_best_effort(&[announcement.author], &content)
                .await;
        }

        Ok(CommentResponse::from(&comment))
    }

    pub async fn add_reply(
        &self,
        actor: &Actor,
        id: &ObjectId,
        comment_id: &ObjectId,
        req: CommentRequest,
    ) -> Result<ReplyResponse> {
        req.validate()?;

        let announcement = self.load(id).await?;
        let viewer = self.viewer(actor).await?;
        self.ensure_visible(&announcement, &viewer)?;
        if !announcement.allow_comments {
            return Err(AppError::CommentsDisabled);
        }
        let parent_author = announcement
            .comments
            .iter()
            .find(|comment| &comment.id == comment_id)
            .map(|comment| comment.user)
            .ok_or_else(|| AppError::not_found("Comment"))?;

        let reply = Reply {
            id: ObjectId::new(),
            user: actor.id,
            text: req.text.trim().to_string(),
            created_at: self.clock.now(),
        };

        if !self.announcements.push_reply(id, comment_id, &reply).await? {
            return Err(match self.announcements.find_by_id(id).await? {
                None => AppError::not_found("Announcement"),
                Some(current) if !current.allow_comments => AppError::CommentsDisabled,
                Some(_) => AppError::not_found("Comment"),
            });
        }

        ANNOUNCEMENT_ENGAGEMENT_TOTAL
            .with_label_values(&["reply"])
            .inc();

        if parent_author != actor.id {
            let content = NotificationContent::new(
                NotificationType::Comment,
                format!("New reply on \"{}\"", announcement.title),
                preview(&reply.text),
            )
            .related("announcement", announcement.id)
            .action_url(announcement_url(&announcement.id))
            .sender(actor.id);
            self.notify_best_effort(&[parent_author], &content).await;
        }

        Ok(ReplyResponse::from(&reply))
    }

    /// Read coverage against the currently resolved audience
    pub async fn stats(&self, actor: &Actor, id: &ObjectId) -> Result<AnnouncementStats> {
        let announcement = self.load(id).await?;
        ensure_manager(actor, &announcement, "Only the author or an admin can view stats")?;

        let audience_size = self.audience.resolve_audience(&announcement).await?.len();

        Ok(AnnouncementStats {
            id: announcement.id.to_hex(),
            audience_size,
            read_count: announcement.read_by.len(),
            read_percentage: read_percentage(&announcement, audience_size),
            view_count: announcement.view_count,
            like_count: announcement.like_count,
            comment_count: announcement.comment_count,
            engagement_score: engagement_score(&announcement),
        })
    }

    async fn viewer(&self, actor: &Actor) -> Result<Viewer> {
        self.membership.viewer_for(actor.id, actor.role).await
    }

    fn ensure_visible(&self, announcement: &Announcement, viewer: &Viewer) -> Result<()> {
        if is_visible_to(announcement, viewer, self.clock.now()) {
            Ok(())
        } else {
            Err(AppError::forbidden("Announcement is not available to you"))
        }
    }

    async fn load(&self, id: &ObjectId) -> Result<Announcement> {
        let announcement = self
            .announcements
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::not_found("Announcement"))?;
        self.reconcile_loaded(announcement).await
    }

    /// Persists a time-driven transition found on load. Only the request that
    /// wins `scheduled -> published` sends the notifications.
    async fn reconcile_loaded(&self, mut announcement: Announcement) -> Result<Announcement> {
        let current = announcement.status;
        let next = reconcile_status(&announcement, self.clock.now());
        if next == current {
            return Ok(announcement);
        }

        let won = self
            .announcements
            .transition_status(&announcement.id, current, next)
            .await?;
        announcement.status = next;

        if won {
            debug!(
                announcement_id = %announcement.id,
                from = current.as_str(),
                to = next.as_str(),
                "Announcement status transitioned"
            );
            if next == AnnouncementStatus::Published {
                self.notify_audience(&announcement).await;
            }
        }

        Ok(announcement)
    }

    /// Fan-out to the resolved audience; failures are logged and swallowed
    async fn notify_audience(&self, announcement: &Announcement) {
        let recipients = match self.audience.resolve_audience(announcement).await {
            Ok(recipients) => recipients,
            Err(err) => {
                FAN_OUT_FAILURES_TOTAL.inc();
                warn!(
                    announcement_id = %announcement.id,
                    "Audience resolution failed, skipping notifications: {}",
                    err
                );
                return;
            }
        };

        let content = NotificationContent::new(
            NotificationType::Announcement,
            announcement.title.clone(),
            preview(&announcement.content),
        )
        .priority(announcement.priority)
        .related("announcement", announcement.id)
        .action_url(announcement_url(&announcement.id))
        .sender(announcement.author);

        if let Err(err) = self.notifications.fan_out(&recipients, &content).await {
            FAN_OUT_FAILURES_TOTAL.inc();
            warn!(
                announcement_id = %announcement.id,
                recipients = recipients.len(),
                "Announcement fan-out failed: {}",
                err
            );
        }
    }

    async fn notify_best_effort(&self, users: &[ObjectId], content: &NotificationContent) {
        if let Err(err) = self.notifications.notify_users(users, content).await {
            FAN_OUT_FAILURES_TOTAL.inc();
            warn!("Engagement notification failed: {}", err);
        }
    }
}

fn ensure_manager(actor: &Actor, announcement: &Announcement, message: &str) -> Result<()> {
    if actor.is_admin() || actor.id == announcement.author {
        Ok(())
    } else {
        Err(AppError::forbidden(message))
    }
}

/// Targeted audiences need targets, and the expiry must follow the publish time
fn check_targets(announcement: &Announcement) -> Result<()> {
    let missing = match announcement.audience {
        Audience::SpecificGroups => announcement.target_groups.is_empty(),
        Audience::SpecificCourses => announcement.target_courses.is_empty(),
        Audience::SpecificUsers => announcement.target_users.is_empty(),
        _ => false,
    };
    if missing {
        return Err(AppError::validation(format!(
            "Audience {} requires at least one target",
            announcement.audience.as_str()
        )));
    }

    if announcement
        .expires_at
        .is_some_and(|expires| expires <= announcement.publish_at)
    {
        return Err(AppError::validation("expires_at must be after publish_at"));
    }
    Ok(())
}

fn announcement_url(id: &ObjectId) -> String {
    format!("/announcements/{}", id.to_hex())
}

fn preview(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= NOTIFICATION_PREVIEW_CHARS {
        return trimmed.to_string();
    }
    let mut short: String = trimmed.chars().take(NOTIFICATION_PREVIEW_CHARS).collect();
    short.push('…');
    short
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn preview_truncates_on_char_boundaries() {
        let long = "ё".repeat(NOTIFICATION_PREVIEW_CHARS + 10);
        let short = preview(&long);
        assert_eq!(short.chars().count(), NOTIFICATION_PREVIEW_CHARS + 1);
        assert!(short.ends_with('…'));
        assert_eq!(preview("  short  "), "short");
    }

    #[test]
    fn targeted_audience_without_targets_is_rejected() {
        let now = Utc::now();
        let announcement = Announcement {
            id: ObjectId::new(),
            title: "Trip".to_string(),
            content: "Bring a lunch".to_string(),
            author: ObjectId::new(),
            audience: Audience::SpecificGroups,
            target_groups: vec![],
            target_courses: vec![],
            target_users: vec![],
            publish_at: now,
            expires_at: None,
            status: AnnouncementStatus::Scheduled,
            priority: Default::default(),
            pinned: false,
            allow_comments: true,
            read_by: vec![],
            likes: vec![],
            comments: vec![],
            view_count: 0,
            like_count: 0,
            comment_count: 0,
            created_at: now,
            updated_at: now,
        };
        assert!(matches!(
            check_targets(&announcement),
            Err(AppError::Validation(_))
        ));

        let mut window = announcement.clone();
        window.audience = Audience::All;
        window.expires_at = Some(now - Duration::minutes(1));
        assert!(matches!(check_targets(&window), Err(AppError::Validation(_))));

        window.expires_at = Some(now + Duration::days(1));
        assert!(check_targets(&window).is_ok());
    }
}
