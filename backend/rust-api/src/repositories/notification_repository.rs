use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId};
use mongodb::error::ErrorKind;
use mongodb::{Collection, Database};

use super::{NotificationFilter, NotificationRepository};
use crate::error::Result;
use crate::metrics::track_db_operation;
use crate::models::notification::{FanOutReport, Notification};
use crate::utils::time::chrono_to_bson;

const NOTIFICATIONS_COLLECTION: &str = "notifications";

pub struct MongoNotificationRepository {
    mongo: Database,
}

impl MongoNotificationRepository {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    fn collection(&self) -> Collection<Notification> {
        self.mongo.collection::<Notification>(NOTIFICATIONS_COLLECTION)
    }
}

#[async_trait]
impl NotificationRepository for MongoNotificationRepository {
    async fn insert_many(&self, notifications: Vec<Notification>) -> Result<FanOutReport> {
        let total = notifications.len();
        if total == 0 {
            return Ok(FanOutReport::default());
        }

        let outcome = self
            .collection()
            .insert_many(notifications)
            .ordered(false)
            .await;

        match outcome {
            Ok(result) => {
                crate::metrics::DB_OPERATIONS_TOTAL
                    .with_label_values(&["insert_many", NOTIFICATIONS_COLLECTION, "success"])
                    .inc();
                Ok(FanOutReport {
                    inserted: result.inserted_ids.len(),
                    failed: 0,
                })
            }
            Err(err) => {
                crate::metrics::DB_OPERATIONS_TOTAL
                    .with_label_values(&["insert_many", NOTIFICATIONS_COLLECTION, "error"])
                    .inc();
                // With an unordered insert only the listed documents were rejected
                if let ErrorKind::InsertMany(ref failure) = *err.kind {
                    let failed = failure
                        .write_errors
                        .as_ref()
                        .map(|errors| errors.len())
                        .unwrap_or(0);
                    if failed > 0 && failure.write_concern_error.is_none() {
                        for write_error in failure.write_errors.iter().flatten() {
                            tracing::warn!(
                                index = write_error.index,
                                code = write_error.code,
                                "Skipping notification rejected by the store: {}",
                                write_error.message
                            );
                        }
                        return Ok(FanOutReport {
                            inserted: total.saturating_sub(failed),
                            failed,
                        });
                    }
                }
                Err(anyhow::Error::new(err)
                    .context("Failed to insert notifications")
                    .into())
            }
        }
    }

    async fn list_for_user(
        &self,
        user: &ObjectId,
        filter: &NotificationFilter,
    ) -> Result<Vec<Notification>> {
        let mut query = doc! { "recipient": *user };
        if filter.unread_only {
            query.insert("is_read", false);
        }
        if let Some(kind) = filter.notification_type {
            query.insert("notification_type", kind.as_str());
        }

        let items = track_db_operation("find", NOTIFICATIONS_COLLECTION, async {
            let cursor = self
                .collection()
                .find(query)
                .sort(doc! { "createdAt": -1 })
                .skip(filter.offset)
                .limit(filter.limit)
                .await
                .context("Failed to query notifications")?;
            cursor
                .try_collect()
                .await
                .context("Failed to read notifications cursor")
        })
        .await?;
        Ok(items)
    }

    async fn unread_count(&self, user: &ObjectId) -> Result<u64> {
        let count = track_db_operation("count_documents", NOTIFICATIONS_COLLECTION, async {
            self.collection()
                .count_documents(doc! { "recipient": *user, "is_read": false })
                .await
                .context("Failed to count unread notifications")
        })
        .await?;
        Ok(count)
    }

    async fn mark_read(
        &self,
        user: &ObjectId,
        id: &ObjectId,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = track_db_operation("update_one", NOTIFICATIONS_COLLECTION, async {
            self.collection()
                .update_one(
                    doc! { "_id": *id, "recipient": *user },
                    doc! { "$set": { "is_read": true, "readAt": chrono_to_bson(at) } },
                )
                .await
                .context("Failed to mark notification as read")
        })
        .await?;
        Ok(result.matched_count > 0)
    }

    async fn mark_all_read(&self, user: &ObjectId, at: DateTime<Utc>) -> Result<u64> {
        let result = track_db_operation("update_many", NOTIFICATIONS_COLLECTION, async {
            self.collection()
                .update_many(
                    doc! { "recipient": *user, "is_read": false },
                    doc! { "$set": { "is_read": true, "readAt": chrono_to_bson(at) } },
                )
                .await
                .context("Failed to mark notifications as read")
        })
        .await?;
        Ok(result.modified_count)
    }

    async fn delete_for_user(&self, user: &ObjectId, id: &ObjectId) -> Result<bool> {
        let result = track_db_operation("delete_one", NOTIFICATIONS_COLLECTION, async {
            self.collection()
                .delete_one(doc! { "_id": *id, "recipient": *user })
                .await
                .context("Failed to delete notification")
        })
        .await?;
        Ok(result.deleted_count > 0)
    }

    async fn delete_read_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = track_db_operation("delete_many", NOTIFICATIONS_COLLECTION, async {
            self.collection()
                .delete_many(doc! {
                    "is_read": true,
                    "readAt": { "$lt": chrono_to_bson(cutoff) },
                })
                .await
                .context("Failed to sweep read notifications")
        })
        .await?;
        Ok(result.deleted_count)
    }
}
