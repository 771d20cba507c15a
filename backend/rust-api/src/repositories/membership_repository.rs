use anyhow::Context;
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, Document};
use mongodb::Database;
use serde::de::DeserializeOwned;

use super::MembershipRepository;
use crate::error::Result;
use crate::metrics::track_db_operation;
use crate::models::course::Course;
use crate::models::group::{EnrollmentStatus, Group};

const GROUPS_COLLECTION: &str = "groups";
const COURSES_COLLECTION: &str = "courses";

pub struct MongoMembershipRepository {
    mongo: Database,
}

impl MongoMembershipRepository {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    async fn find_all<T>(&self, collection: &str, filter: Document) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Unpin + Send + Sync,
    {
        let items = track_db_operation("find", collection, async {
            let cursor = self
                .mongo
                .collection::<T>(collection)
                .find(filter)
                .await
                .with_context(|| format!("Failed to query {}", collection))?;
            cursor
                .try_collect()
                .await
                .with_context(|| format!("Failed to read {} cursor", collection))
        })
        .await?;
        Ok(items)
    }
}

#[async_trait]
impl MembershipRepository for MongoMembershipRepository {
    async fn groups_by_ids(&self, ids: &[ObjectId]) -> Result<Vec<Group>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.find_all(GROUPS_COLLECTION, doc! { "_id": { "$in": ids.to_vec() } })
            .await
    }

    async fn courses_by_ids(&self, ids: &[ObjectId]) -> Result<Vec<Course>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.find_all(COURSES_COLLECTION, doc! { "_id": { "$in": ids.to_vec() } })
            .await
    }

    async fn groups_by_courses(&self, course_ids: &[ObjectId]) -> Result<Vec<Group>> {
        if course_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.find_all(GROUPS_COLLECTION, doc! { "course_id": { "$in": course_ids.to_vec() } })
            .await
    }

    async fn groups_of_student(&self, student: &ObjectId) -> Result<Vec<Group>> {
        let status = mongodb::bson::to_bson(&EnrollmentStatus::Active)
            .context("Failed to encode enrollment status")?;
        self.find_all(
            GROUPS_COLLECTION,
            doc! {
                "students": { "$elemMatch": { "student": *student, "status": status } }
            },
        )
        .await
    }

    async fn courses_related_to(
        &self,
        teacher: &ObjectId,
        group_ids: &[ObjectId],
    ) -> Result<Vec<Course>> {
        self.find_all(
            COURSES_COLLECTION,
            doc! {
                "$or": [
                    { "teacher": *teacher },
                    { "groups": { "$in": group_ids.to_vec() } },
                ]
            },
        )
        .await
    }
}
