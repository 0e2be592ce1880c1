use entity::email;
use sea_orm::{ColumnTrait, Condition};

/// Typed `where` tree for the email collection: equality, substring and
/// date-range comparators, combined as a conjunction. The store does not
/// order results; callers sort by date client-side.
#[derive(Debug, Default, Clone)]
pub struct EmailFilter {
    pub sender: Option<String>,
    pub sender_contains: Option<String>,
    pub recipients_contains: Option<String>,
    pub subject_contains: Option<String>,
    pub label: Option<String>,
    pub category: Option<String>,
    pub thread_id: Option<String>,
    pub date_from: Option<i64>,
    pub date_to: Option<i64>,
    pub is_read: Option<bool>,
    pub is_starred: Option<bool>,
    pub has_attachments: Option<bool>,
    pub has_action_items: Option<bool>,
}

impl EmailFilter {
    pub fn is_empty(&self) -> bool {
        self.sender.is_none()
            && self.sender_contains.is_none()
            && self.recipients_contains.is_none()
            && self.subject_contains.is_none()
            && self.label.is_none()
            && self.category.is_none()
            && self.thread_id.is_none()
            && self.date_from.is_none()
            && self.date_to.is_none()
            && self.is_read.is_none()
            && self.is_starred.is_none()
            && self.has_attachments.is_none()
            && self.has_action_items.is_none()
    }

    pub fn condition(&self) -> Condition {
        let mut cond = Condition::all();
        if let Some(sender) = &self.sender {
            cond = cond.add(email::Column::Sender.eq(sender.clone()));
        }
        if let Some(sender) = &self.sender_contains {
            cond = cond.add(email::Column::Sender.contains(sender.clone()));
        }
        if let Some(recipients) = &self.recipients_contains {
            cond = cond.add(email::Column::RecipientsTo.contains(recipients.clone()));
        }
        if let Some(subject) = &self.subject_contains {
            cond = cond.add(email::Column::Subject.contains(subject.clone()));
        }
        if let Some(label) = &self.label {
            // `|X|` is an exact-label substring test over the pipe-bracketed string
            cond = cond.add(email::Column::Labels.contains(format!("|{label}|")));
        }
        if let Some(category) = &self.category {
            cond = cond.add(email::Column::Category.eq(category.clone()));
        }
        if let Some(thread_id) = &self.thread_id {
            cond = cond.add(email::Column::ThreadId.eq(thread_id.clone()));
        }
        if let Some(ts) = self.date_from {
            cond = cond.add(email::Column::DateTimestamp.gte(ts));
        }
        if let Some(ts) = self.date_to {
            cond = cond.add(email::Column::DateTimestamp.lte(ts));
        }
        if let Some(is_read) = self.is_read {
            cond = cond.add(email::Column::IsRead.eq(is_read));
        }
        if let Some(is_starred) = self.is_starred {
            cond = cond.add(email::Column::IsStarred.eq(is_starred));
        }
        if let Some(has_attachments) = self.has_attachments {
            cond = cond.add(email::Column::HasAttachments.eq(has_attachments));
        }
        if let Some(has_action_items) = self.has_action_items {
            cond = cond.add(email::Column::HasActionItems.eq(has_action_items));
        }
        cond
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_filter() {
        assert!(EmailFilter::default().is_empty());
    }

    #[test]
    fn test_non_empty_filter_builds_condition() {
        let filter = EmailFilter {
            sender_contains: Some("amazon".to_string()),
            date_from: Some(1_700_000_000),
            is_read: Some(false),
            ..Default::default()
        };
        assert!(!filter.is_empty());
        let rendered = format!("{:?}", filter.condition());
        assert!(rendered.contains("sender"));
        assert!(rendered.contains("date_timestamp"));
    }
}
