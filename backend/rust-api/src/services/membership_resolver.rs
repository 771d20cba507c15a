use std::collections::HashSet;
use std::sync::Arc;

use mongodb::bson::oid::ObjectId;
use tracing::debug;

use crate::error::Result;
use crate::models::announcement::Viewer;
use crate::models::user::UserRole;
use crate::repositories::MembershipRepository;

/// Maps group and course ids to the users enrolled in or teaching them
#[derive(Clone)]
pub struct MembershipResolver {
    memberships: Arc<dyn MembershipRepository>,
}

impl MembershipResolver {
    pub fn new(memberships: Arc<dyn MembershipRepository>) -> Self {
        Self { memberships }
    }

    /// Union of active-enrolled students across the groups
    pub async fn students_in_groups(&self, group_ids: &[ObjectId]) -> Result<HashSet<ObjectId>> {
        let groups = self.memberships.groups_by_ids(group_ids).await?;
        if groups.len() < group_ids.len() {
            debug!(
                requested = group_ids.len(),
                found = groups.len(),
                "Some target groups do not exist"
            );
        }

        Ok(groups
            .iter()
            .flat_map(|group| group.active_students())
            .collect())
    }

    /// Active students of every group attached to the courses, plus each course teacher.
    ///
    /// A group is attached when the course lists it or when it points back at
    /// the course. Courses without a teacher or groups contribute what they have.
    pub async fn staff_and_students_in_courses(
        &self,
        course_ids: &[ObjectId],
    ) -> Result<HashSet<ObjectId>> {
        let courses = self.memberships.courses_by_ids(course_ids).await?;
        if courses.len() < course_ids.len() {
            debug!(
                requested = course_ids.len(),
                found = courses.len(),
                "Some target courses do not exist"
            );
        }

        let mut recipients: HashSet<ObjectId> =
            courses.iter().filter_map(|course| course.teacher).collect();

        let listed_groups: Vec<ObjectId> = courses
            .iter()
            .flat_map(|course| course.groups.iter().copied())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        let mut seen_groups = HashSet::new();
        let mut groups = self.memberships.groups_by_ids(&listed_groups).await?;
        groups.extend(self.memberships.groups_by_courses(course_ids).await?);

        for group in &groups {
            if seen_groups.insert(group.id) {
                recipients.extend(group.active_students());
            }
        }

        Ok(recipients)
    }

    /// Memberships that decide which targeted announcements a user can see
    pub async fn viewer_for(&self, user_id: ObjectId, role: UserRole) -> Result<Viewer> {
        if role == UserRole::Admin {
            return Ok(Viewer {
                user_id,
                role,
                group_ids: Vec::new(),
                course_ids: Vec::new(),
            });
        }

        let groups = self.memberships.groups_of_student(&user_id).await?;
        let group_ids: Vec<ObjectId> = groups.iter().map(|group| group.id).collect();

        let mut course_ids: HashSet<ObjectId> =
            groups.iter().filter_map(|group| group.course_id).collect();
        let courses = self
            .memberships
            .courses_related_to(&user_id, &group_ids)
            .await?;
        course_ids.extend(courses.iter().map(|course| course.id));

        Ok(Viewer {
            user_id,
            role,
            group_ids,
            course_ids: course_ids.into_iter().collect(),
        })
    }
}
