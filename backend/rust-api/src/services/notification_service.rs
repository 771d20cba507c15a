use std::collections::HashSet;
use std::sync::Arc;

use chrono::Duration;
use mongodb::bson::oid::ObjectId;
use tracing::{info, warn};
use validator::Validate;

use crate::error::{parse_object_ids, AppError, Result};
use crate::metrics::{NOTIFICATIONS_FANNED_OUT_TOTAL, NOTIFICATIONS_SWEPT_TOTAL};
use crate::models::notification::{
    FanOutReport, ListNotificationsQuery, NotificationContent, NotificationResponse,
    NotificationType, SendNotificationRequest,
};
use crate::models::user::Actor;
use crate::models::Page;
use crate::repositories::{DirectoryRepository, NotificationFilter, NotificationRepository};
use crate::services::membership_resolver::MembershipResolver;
use crate::services::unread_cache::UnreadCountCache;
use crate::utils::time::Clock;

/// Writes notifications and serves the recipient-side read layer
#[derive(Clone)]
pub struct NotificationService {
    notifications: Arc<dyn NotificationRepository>,
    directory: Arc<dyn DirectoryRepository>,
    membership: MembershipResolver,
    cache: UnreadCountCache,
    clock: Arc<dyn Clock>,
}

impl NotificationService {
    pub fn new(
        notifications: Arc<dyn NotificationRepository>,
        directory: Arc<dyn DirectoryRepository>,
        membership: MembershipResolver,
        cache: UnreadCountCache,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            notifications,
            directory,
            membership,
            cache,
            clock,
        }
    }

    /// One notification per recipient, written in a single unordered bulk insert.
    ///
    /// Ids that do not belong to any user are skipped and logged. Calling this
    /// twice with the same content writes the notifications twice.
    pub async fn fan_out(
        &self,
        recipients: &HashSet<ObjectId>,
        content: &NotificationContent,
    ) -> Result<FanOutReport> {
        if recipients.is_empty() {
            return Ok(FanOutReport::default());
        }

        let requested: Vec<ObjectId> = recipients.iter().copied().collect();
        let known: HashSet<ObjectId> = self
            .directory
            .existing_user_ids(&requested)
            .await?
            .into_iter()
            .collect();

        let skipped = requested.len() - known.len().min(requested.len());
        if skipped > 0 {
            for unknown in requested.iter().filter(|id| !known.contains(id)) {
                warn!(recipient = %unknown, "Skipping notification for unknown user");
            }
        }

        let now = self.clock.now();
        let batch = requested
            .iter()
            .filter(|id| known.contains(id))
            .map(|recipient| content.for_recipient(*recipient, now))
            .collect::<Vec<_>>();

        let mut report = self.notifications.insert_many(batch).await?;
        report.failed += skipped;

        let kind = content.notification_type.as_str();
        NOTIFICATIONS_FANNED_OUT_TOTAL
            .with_label_values(&[kind, "inserted"])
            .inc_by(report.inserted as u64);
        NOTIFICATIONS_FANNED_OUT_TOTAL
            .with_label_values(&[kind, "failed"])
            .inc_by(report.failed as u64);

        // A count read before the insert may still be written back after this;
        // it lives at most `unread_cache_ttl_secs`.
        self.cache.invalidate(known.iter()).await;

        info!(
            notification_type = kind,
            inserted = report.inserted,
            failed = report.failed,
            "Notification fan-out finished"
        );

        Ok(report)
    }

    pub async fn notify_users(
        &self,
        users: &[ObjectId],
        content: &NotificationContent,
    ) -> Result<FanOutReport> {
        let recipients = users.iter().copied().collect();
        self.fan_out(&recipients, content).await
    }

    /// Notify the active students of the groups
    pub async fn notify_groups(
        &self,
        groups: &[ObjectId],
        content: &NotificationContent,
    ) -> Result<FanOutReport> {
        let recipients = self.membership.students_in_groups(groups).await?;
        self.fan_out(&recipients, content).await
    }

    /// Notify the active students and teachers of the courses
    pub async fn notify_courses(
        &self,
        courses: &[ObjectId],
        content: &NotificationContent,
    ) -> Result<FanOutReport> {
        let recipients = self.membership.staff_and_students_in_courses(courses).await?;
        self.fan_out(&recipients, content).await
    }

    /// Staff broadcast to any mix of users, groups and courses, deduplicated
    pub async fn send(&self, actor: &Actor, req: SendNotificationRequest) -> Result<FanOutReport> {
        if !actor.role.is_staff() {
            return Err(AppError::forbidden("Only staff can send notifications"));
        }
        req.validate()?;

        let users = parse_object_ids(&req.user_ids, "user_ids")?;
        let groups = parse_object_ids(&req.group_ids, "group_ids")?;
        let courses = parse_object_ids(&req.course_ids, "course_ids")?;
        if users.is_empty() && groups.is_empty() && courses.is_empty() {
            return Err(AppError::validation(
                "At least one of user_ids, group_ids or course_ids is required",
            ));
        }

        let mut recipients: HashSet<ObjectId> = users.into_iter().collect();
        recipients.extend(self.membership.students_in_groups(&groups).await?);
        recipients.extend(
            self.membership
                .staff_and_students_in_courses(&courses)
                .await?,
        );

        let mut content = NotificationContent::new(
            req.notification_type.unwrap_or(NotificationType::Message),
            req.title,
            req.message,
        )
        .priority(req.priority)
        .sender(actor.id);
        if let Some(url) = req.action_url {
            content = content.action_url(url);
        }

        self.fan_out(&recipients, &content).await
    }

    pub async fn list(
        &self,
        user: &ObjectId,
        query: ListNotificationsQuery,
    ) -> Result<Vec<NotificationResponse>> {
        let page = Page {
            limit: query.limit,
            offset: query.offset,
        };
        let filter = NotificationFilter {
            unread_only: query.unread_only,
            notification_type: query.notification_type,
            limit: page.limit(),
            offset: page.offset(),
        };
        let items = self.notifications.list_for_user(user, &filter).await?;
        Ok(items.into_iter().map(NotificationResponse::from).collect())
    }

    pub async fn unread_count(&self, user: &ObjectId) -> Result<u64> {
        if let Some(cached) = self.cache.get(user).await {
            return Ok(cached);
        }
        let count = self.notifications.unread_count(user).await?;
        self.cache.set(user, count).await;
        Ok(count)
    }

    pub async fn mark_read(&self, user: &ObjectId, id: &ObjectId) -> Result<()> {
        let now = self.clock.now();
        if !self.notifications.mark_read(user, id, now).await? {
            return Err(AppError::not_found("Notification"));
        }
        self.cache.invalidate([user]).await;
        Ok(())
    }

    pub async fn mark_all_read(&self, user: &ObjectId) -> Result<u64> {
        let now = self.clock.now();
        let updated = self.notifications.mark_all_read(user, now).await?;
        self.cache.invalidate([user]).await;
        Ok(updated)
    }

    pub async fn delete(&self, user: &ObjectId, id: &ObjectId) -> Result<()> {
        if !self.notifications.delete_for_user(user, id).await? {
            return Err(AppError::not_found("Notification"));
        }
        self.cache.invalidate([user]).await;
        Ok(())
    }

    /// Retention sweep: drop read notifications older than `retention_days`
    pub async fn sweep_read_older_than(&self, retention_days: i64) -> Result<u64> {
        let cutoff = Duration::try_days(retention_days.max(0))
            .and_then(|window| self.clock.now().checked_sub_signed(window))
            .ok_or_else(|| {
                AppError::validation(format!(
                    "Retention of {} days is out of range",
                    retention_days
                ))
            })?;
        let deleted = self.notifications.delete_read_before(cutoff).await?;
        NOTIFICATIONS_SWEPT_TOTAL.inc_by(deleted);
        info!(%cutoff, deleted, "Notification retention sweep finished");
        Ok(deleted)
    }
}
