use std::collections::HashSet;
use std::sync::Arc;

use mongodb::bson::oid::ObjectId;

use crate::error::Result;
use crate::models::announcement::{Announcement, Audience};
use crate::repositories::DirectoryRepository;
use crate::services::membership_resolver::MembershipResolver;

/// Expands an announcement's audience rule into concrete recipients
#[derive(Clone)]
pub struct AudienceResolver {
    directory: Arc<dyn DirectoryRepository>,
    membership: MembershipResolver,
}

impl AudienceResolver {
    pub fn new(directory: Arc<dyn DirectoryRepository>, membership: MembershipResolver) -> Self {
        Self {
            directory,
            membership,
        }
    }

    /// Deduplicated recipient ids. An empty set is a valid answer; lookup
    /// failures are returned to the caller.
    pub async fn resolve_audience(&self, announcement: &Announcement) -> Result<HashSet<ObjectId>> {
        let recipients = match announcement.audience {
            Audience::All => self.directory.active_user_ids().await?.into_iter().collect(),
            Audience::Students | Audience::Teachers | Audience::Admins => {
                match announcement.audience.role() {
                    Some(role) => self
                        .directory
                        .active_user_ids_by_role(role)
                        .await?
                        .into_iter()
                        .collect(),
                    None => HashSet::new(),
                }
            }
            Audience::SpecificGroups => {
                self.membership
                    .students_in_groups(&announcement.target_groups)
                    .await?
            }
            Audience::SpecificCourses => {
                self.membership
                    .staff_and_students_in_courses(&announcement.target_courses)
                    .await?
            }
            // Explicit lists are honored as-is, inactive users included
            Audience::SpecificUsers => announcement.target_users.iter().copied().collect(),
        };

        tracing::debug!(
            announcement_id = %announcement.id,
            audience = announcement.audience.as_str(),
            recipients = recipients.len(),
            "Audience resolved"
        );

        Ok(recipients)
    }
}
