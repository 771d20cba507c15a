use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{self, doc, oid::ObjectId, Bson, Document, Regex};
use mongodb::options::ReturnDocument;
use mongodb::{Collection, Database};

use super::AnnouncementRepository;
use crate::error::Result;
use crate::metrics::track_db_operation;
use crate::models::announcement::{
    Announcement, AnnouncementQuery, AnnouncementStatus, Audience, Comment, Reply, Viewer,
};
use crate::models::user::UserRole;
use crate::utils::time::chrono_to_bson;

const ANNOUNCEMENTS_COLLECTION: &str = "announcements";

pub struct MongoAnnouncementRepository {
    mongo: Database,
}

impl MongoAnnouncementRepository {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    fn collection(&self) -> Collection<Announcement> {
        self.mongo.collection::<Announcement>(ANNOUNCEMENTS_COLLECTION)
    }

    /// Like counter after a conditional like/unlike, `None` if the guard did not match
    async fn update_like(&self, filter: Document, update: Document) -> Result<Option<i64>> {
        let updated = track_db_operation("find_one_and_update", ANNOUNCEMENTS_COLLECTION, async {
            self.mongo
                .collection::<Document>(ANNOUNCEMENTS_COLLECTION)
                .find_one_and_update(filter, update)
                .projection(doc! { "like_count": 1 })
                .return_document(ReturnDocument::After)
                .await
                .context("Failed to update likes")
        })
        .await?;

        Ok(updated.map(|doc| counter_value(&doc, "like_count")))
    }
}

fn counter_value(doc: &Document, key: &str) -> i64 {
    match doc.get(key) {
        Some(Bson::Int32(value)) => i64::from(*value),
        Some(Bson::Int64(value)) => *value,
        Some(Bson::Double(value)) => *value as i64,
        _ => 0,
    }
}

fn status_bson(status: AnnouncementStatus) -> Bson {
    Bson::String(status.as_str().to_string())
}

/// Announcements that are published right now, whatever status was last persisted
fn live_filter(now: DateTime<Utc>) -> Document {
    let now = chrono_to_bson(now);
    doc! {
        "status": { "$in": [
            status_bson(AnnouncementStatus::Scheduled),
            status_bson(AnnouncementStatus::Published),
        ] },
        "publishAt": { "$lte": now },
        "$or": [
            { "expiresAt": { "$exists": false } },
            { "expiresAt": Bson::Null },
            { "expiresAt": { "$gt": now } },
        ],
    }
}

/// Audience rules that include the viewer
fn audience_filter(viewer: &Viewer) -> Document {
    let mut rules = vec![doc! { "audience": Audience::All.as_str() }];

    let role_audience = match viewer.role {
        UserRole::Student => Some(Audience::Students),
        UserRole::Teacher => Some(Audience::Teachers),
        UserRole::Admin => Some(Audience::Admins),
        UserRole::Assistant => None,
    };
    if let Some(audience) = role_audience {
        rules.push(doc! { "audience": audience.as_str() });
    }

    if !viewer.group_ids.is_empty() {
        rules.push(doc! {
            "audience": Audience::SpecificGroups.as_str(),
            "target_groups": { "$in": viewer.group_ids.clone() },
        });
    }
    if !viewer.course_ids.is_empty() {
        rules.push(doc! {
            "audience": Audience::SpecificCourses.as_str(),
            "target_courses": { "$in": viewer.course_ids.clone() },
        });
    }
    rules.push(doc! {
        "audience": Audience::SpecificUsers.as_str(),
        "target_users": viewer.user_id,
    });

    doc! { "$or": rules }
}

fn list_filter(query: &AnnouncementQuery) -> Document {
    let mut clauses = Vec::new();

    if let Some(viewer) = &query.viewer {
        clauses.push(doc! {
            "$or": [
                { "author": viewer.user_id },
                { "$and": [live_filter(query.now), audience_filter(viewer)] },
            ]
        });
    }

    match query.status {
        Some(AnnouncementStatus::Published) => clauses.push(live_filter(query.now)),
        Some(status) => clauses.push(doc! { "status": status_bson(status) }),
        None => {}
    }

    if let Some(priority) = query.priority {
        clauses.push(doc! { "priority": priority.as_str() });
    }

    if let Some(pinned) = query.pinned {
        clauses.push(doc! { "pinned": pinned });
    }

    if let Some(search) = query.search.as_deref().filter(|s| !s.trim().is_empty()) {
        clauses.push(doc! {
            "title": Regex {
                pattern: regex::escape(search.trim()),
                options: "i".to_string(),
            }
        });
    }

    if clauses.is_empty() {
        Document::new()
    } else {
        doc! { "$and": clauses }
    }
}

#[async_trait]
impl AnnouncementRepository for MongoAnnouncementRepository {
    async fn insert(&self, announcement: &Announcement) -> Result<()> {
        track_db_operation("insert_one", ANNOUNCEMENTS_COLLECTION, async {
            self.collection()
                .insert_one(announcement)
                .await
                .context("Failed to insert announcement")
        })
        .await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &ObjectId) -> Result<Option<Announcement>> {
        let found = track_db_operation("find_one", ANNOUNCEMENTS_COLLECTION, async {
            self.collection()
                .find_one(doc! { "_id": *id })
                .await
                .context("Failed to query announcement")
        })
        .await?;
        Ok(found)
    }

    async fn list(&self, query: &AnnouncementQuery) -> Result<Vec<Announcement>> {
        let filter = list_filter(query);
        let items = track_db_operation("find", ANNOUNCEMENTS_COLLECTION, async {
            let cursor = self
                .collection()
                .find(filter)
                .sort(doc! { "pinned": -1, "publishAt": -1 })
                .skip(query.offset)
                .limit(query.limit)
                .await
                .context("Failed to query announcements")?;
            cursor
                .try_collect()
                .await
                .context("Failed to read announcements cursor")
        })
        .await?;
        Ok(items)
    }

    async fn update_content(&self, announcement: &Announcement) -> Result<bool> {
        let expires_at = announcement
            .expires_at
            .map(|at| Bson::DateTime(chrono_to_bson(at)))
            .unwrap_or(Bson::Null);
        let priority = bson::to_bson(&announcement.priority).context("Failed to encode priority")?;

        let update = doc! {
            "$set": {
                "title": &announcement.title,
                "content": &announcement.content,
                "audience": announcement.audience.as_str(),
                "target_groups": announcement.target_groups.clone(),
                "target_courses": announcement.target_courses.clone(),
                "target_users": announcement.target_users.clone(),
                "publishAt": chrono_to_bson(announcement.publish_at),
                "expiresAt": expires_at,
                "status": status_bson(announcement.status),
                "priority": priority,
                "pinned": announcement.pinned,
                "allow_comments": announcement.allow_comments,
                "updatedAt": chrono_to_bson(announcement.updated_at),
            }
        };

        let result = track_db_operation("update_one", ANNOUNCEMENTS_COLLECTION, async {
            self.collection()
                .update_one(doc! { "_id": announcement.id }, update)
                .await
                .context("Failed to update announcement")
        })
        .await?;
        Ok(result.matched_count > 0)
    }

    async fn delete(&self, id: &ObjectId) -> Result<bool> {
        let result = track_db_operation("delete_one", ANNOUNCEMENTS_COLLECTION, async {
            self.collection()
                .delete_one(doc! { "_id": *id })
                .await
                .context("Failed to delete announcement")
        })
        .await?;
        Ok(result.deleted_count > 0)
    }

    async fn transition_status(
        &self,
        id: &ObjectId,
        from: AnnouncementStatus,
        to: AnnouncementStatus,
    ) -> Result<bool> {
        let result = track_db_operation("update_one", ANNOUNCEMENTS_COLLECTION, async {
            self.collection()
                .update_one(
                    doc! { "_id": *id, "status": status_bson(from) },
                    doc! { "$set": { "status": status_bson(to) } },
                )
                .await
                .context("Failed to transition announcement status")
        })
        .await?;
        Ok(result.modified_count > 0)
    }

    async fn record_read(
        &self,
        id: &ObjectId,
        user: &ObjectId,
        at: DateTime<Utc>,
    ) -> Result<Option<bool>> {
        let first_read = track_db_operation("update_one", ANNOUNCEMENTS_COLLECTION, async {
            self.collection()
                .update_one(
                    doc! { "_id": *id, "read_by.user": { "$ne": *user } },
                    doc! {
                        "$push": { "read_by": { "user": *user, "readAt": chrono_to_bson(at) } },
                        "$inc": { "view_count": 1 },
                    },
                )
                .await
                .context("Failed to record first read")
        })
        .await?;
        if first_read.matched_count > 0 {
            return Ok(Some(true));
        }

        let repeat_view = track_db_operation("update_one", ANNOUNCEMENTS_COLLECTION, async {
            self.collection()
                .update_one(doc! { "_id": *id }, doc! { "$inc": { "view_count": 1 } })
                .await
                .context("Failed to record repeat view")
        })
        .await?;

        Ok((repeat_view.matched_count > 0).then_some(false))
    }

    async fn add_like(
        &self,
        id: &ObjectId,
        user: &ObjectId,
        at: DateTime<Utc>,
    ) -> Result<Option<i64>> {
        self.update_like(
            doc! { "_id": *id, "likes.user": { "$ne": *user } },
            doc! {
                "$push": { "likes": { "user": *user, "likedAt": chrono_to_bson(at) } },
                "$inc": { "like_count": 1 },
            },
        )
        .await
    }

    async fn remove_like(&self, id: &ObjectId, user: &ObjectId) -> Result<Option<i64>> {
        self.update_like(
            doc! { "_id": *id, "likes.user": *user },
            doc! {
                "$pull": { "likes": { "user": *user } },
                "$inc": { "like_count": -1 },
            },
        )
        .await
    }

    async fn push_comment(&self, id: &ObjectId, comment: &Comment) -> Result<bool> {
        let comment = bson::to_bson(comment).context("Failed to encode comment")?;
        let result = track_db_operation("update_one", ANNOUNCEMENTS_COLLECTION, async {
            self.collection()
                .update_one(
                    doc! { "_id": *id, "allow_comments": { "$ne": false } },
                    doc! {
                        "$push": { "comments": comment },
                        "$inc": { "comment_count": 1 },
                    },
                )
                .await
                .context("Failed to push comment")
        })
        .await?;
        Ok(result.matched_count > 0)
    }

    async fn push_reply(
        &self,
        id: &ObjectId,
        comment_id: &ObjectId,
        reply: &Reply,
    ) -> Result<bool> {
        let reply = bson::to_bson(reply).context("Failed to encode reply")?;
        let result = track_db_operation("update_one", ANNOUNCEMENTS_COLLECTION, async {
            self.collection()
                .update_one(
                    doc! {
                        "_id": *id,
                        "allow_comments": { "$ne": false },
                        "comments._id": *comment_id,
                    },
                    doc! { "$push": { "comments.$.replies": reply } },
                )
                .await
                .context("Failed to push reply")
        })
        .await?;
        Ok(result.matched_count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn viewer(role: UserRole) -> Viewer {
        Viewer {
            user_id: ObjectId::new(),
            role,
            group_ids: vec![ObjectId::new()],
            course_ids: vec![],
        }
    }

    #[test]
    fn audience_filter_skips_empty_membership_rules() {
        let filter = audience_filter(&viewer(UserRole::Student));
        let rules = filter.get_array("$or").expect("rules array");
        // all + students + specific_groups + specific_users
        assert_eq!(rules.len(), 4);
    }

    #[test]
    fn assistants_only_match_explicit_rules() {
        let mut assistant = viewer(UserRole::Assistant);
        assistant.group_ids.clear();
        let filter = audience_filter(&assistant);
        let rules = filter.get_array("$or").expect("rules array");
        assert_eq!(rules.len(), 2);
    }

    #[test]
    fn unrestricted_query_has_empty_filter() {
        let query = AnnouncementQuery {
            viewer: None,
            status: None,
            priority: None,
            pinned: None,
            search: None,
            now: Utc::now(),
            limit: 20,
            offset: 0,
        };
        assert!(list_filter(&query).is_empty());
    }

    #[test]
    fn search_is_escaped() {
        let query = AnnouncementQuery {
            viewer: None,
            status: Some(AnnouncementStatus::Draft),
            priority: None,
            pinned: None,
            search: Some("exam (final)".to_string()),
            now: Utc::now(),
            limit: 20,
            offset: 0,
        };
        let filter = list_filter(&query);
        let clauses = filter.get_array("$and").expect("clauses");
        assert_eq!(clauses.len(), 2);
        let title = clauses[1]
            .as_document()
            .and_then(|d| d.get("title"))
            .cloned();
        match title {
            Some(Bson::RegularExpression(regex)) => {
                assert_eq!(regex.pattern, r"exam \(final\)")
            }
            other => panic!("unexpected title filter: {:?}", other),
        }
    }

    #[test]
    fn counter_value_reads_any_numeric_type() {
        assert_eq!(counter_value(&doc! { "like_count": 3_i32 }, "like_count"), 3);
        assert_eq!(counter_value(&doc! { "like_count": 4_i64 }, "like_count"), 4);
        assert_eq!(counter_value(&doc! {}, "like_count"), 0);
    }
}
