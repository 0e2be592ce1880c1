//! Gmail API quota units per method. The per-user limit is 250 units/s;
//! the client's leaky bucket refills at that rate.

pub const GMAIL_QUOTA_PER_SECOND: usize = 250;

pub struct GmailApiQuota {
    pub messages_list: usize,
    pub messages_get: usize,
    pub messages_modify: usize,
    pub messages_trash: usize,
    pub messages_attachments_get: usize,
    pub history_list: usize,
    pub labels_list: usize,
    pub labels_get: usize,
    pub labels_create: usize,
    pub labels_update: usize,
    pub labels_delete: usize,
    pub threads_list: usize,
    pub threads_get: usize,
    pub threads_modify: usize,
    pub threads_trash: usize,
    pub get_profile: usize,
}

pub const GMAIL_API_QUOTA: GmailApiQuota = GmailApiQuota {
    messages_list: 5,
    messages_get: 5,
    messages_modify: 5,
    messages_trash: 5,
    messages_attachments_get: 5,
    history_list: 2,
    labels_list: 1,
    labels_get: 1,
    labels_create: 5,
    labels_update: 5,
    labels_delete: 5,
    threads_list: 10,
    threads_get: 10,
    threads_modify: 10,
    threads_trash: 10,
    get_profile: 1,
};
