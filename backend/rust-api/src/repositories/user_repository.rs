use anyhow::Context;
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, Document};
use mongodb::Database;

use super::DirectoryRepository;
use crate::error::Result;
use crate::metrics::track_db_operation;
use crate::models::user::UserRole;

const USERS_COLLECTION: &str = "users";

pub struct MongoDirectoryRepository {
    mongo: Database,
}

impl MongoDirectoryRepository {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    async fn collect_ids(&self, filter: Document) -> Result<Vec<ObjectId>> {
        let ids = track_db_operation("find", USERS_COLLECTION, async {
            let cursor = self
                .mongo
                .collection::<Document>(USERS_COLLECTION)
                .find(filter)
                .projection(doc! { "_id": 1 })
                .await
                .context("Failed to query users")?;

            let docs: Vec<Document> = cursor
                .try_collect()
                .await
                .context("Failed to read user cursor")?;

            Ok(docs
                .iter()
                .filter_map(|doc| doc.get_object_id("_id").ok())
                .collect())
        })
        .await?;

        Ok(ids)
    }
}

/// Users without the flag predate it and count as active
fn active_filter() -> Document {
    doc! { "is_active": { "$ne": false } }
}

#[async_trait]
impl DirectoryRepository for MongoDirectoryRepository {
    async fn active_user_ids(&self) -> Result<Vec<ObjectId>> {
        self.collect_ids(active_filter()).await
    }

    async fn active_user_ids_by_role(&self, role: UserRole) -> Result<Vec<ObjectId>> {
        let mut filter = active_filter();
        filter.insert("role", role.as_str());
        self.collect_ids(filter).await
    }

    async fn existing_user_ids(&self, ids: &[ObjectId]) -> Result<Vec<ObjectId>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.collect_ids(doc! { "_id": { "$in": ids.to_vec() } })
            .await
    }

    async fn ping(&self) -> Result<()> {
        self.mongo
            .run_command(doc! { "ping": 1 })
            .await
            .context("MongoDB ping failed")?;
        Ok(())
    }
}
