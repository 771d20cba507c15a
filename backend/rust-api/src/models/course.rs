use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

/// Course model stored in MongoDB "courses" collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Course {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    #[serde(default)]
    pub name: String,

    /// ref: users
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teacher: Option<ObjectId>,

    /// ref: subjects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<ObjectId>,

    #[serde(default)]
    pub groups: Vec<ObjectId>,
}
