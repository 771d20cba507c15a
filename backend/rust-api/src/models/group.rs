use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use super::user::bson_datetime_as_chrono_option;

/// Group model stored in MongoDB "groups" collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    #[serde(default)]
    pub name: String,

    /// Owning course; older records may lack it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course_id: Option<ObjectId>,

    #[serde(default)]
    pub students: Vec<Enrollment>,
}

impl Group {
    /// Students whose enrollment counts as membership
    pub fn active_students(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.students
            .iter()
            .filter(|enrollment| enrollment.status == EnrollmentStatus::Active)
            .map(|enrollment| enrollment.student)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrollment {
    pub student: ObjectId,
    #[serde(default)]
    pub status: EnrollmentStatus,
    #[serde(
        rename = "enrolledAt",
        default,
        skip_serializing_if = "Option::is_none",
        with = "bson_datetime_as_chrono_option"
    )]
    pub enrolled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    #[default]
    Active,
    Pending,
    Withdrawn,
    Completed,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enrollment(status: EnrollmentStatus) -> Enrollment {
        Enrollment {
            student: ObjectId::new(),
            status,
            enrolled_at: Some(Utc::now()),
        }
    }

    #[test]
    fn only_active_enrollments_are_members() {
        let active = enrollment(EnrollmentStatus::Active);
        let group = Group {
            id: ObjectId::new(),
            name: "7A".to_string(),
            course_id: None,
            students: vec![
                active.clone(),
                enrollment(EnrollmentStatus::Withdrawn),
                enrollment(EnrollmentStatus::Pending),
            ],
        };

        let members: Vec<_> = group.active_students().collect();
        assert_eq!(members, vec![active.student]);
    }

    #[test]
    fn legacy_group_without_name_or_enrollment_dates_decodes() {
        let student = ObjectId::new();
        let doc = mongodb::bson::doc! {
            "_id": ObjectId::new(),
            "students": [{ "student": student, "status": "active" }],
        };

        let group: Group = mongodb::bson::from_document(doc).unwrap();

        assert!(group.name.is_empty());
        assert_eq!(group.students[0].enrolled_at, None);
        assert_eq!(group.active_students().collect::<Vec<_>>(), vec![student]);
    }
}
