use crate::api::types::{EmailDetail, EmailId};

/// Human edit state for the resident email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftBuffer {
    email_id: EmailId,
    text: String,
    dirty: bool,
}

impl DraftBuffer {
    fn seeded_from(detail: &EmailDetail) -> Self {
        DraftBuffer {
            email_id: detail.id.clone(),
            text: detail.draft.clone().unwrap_or_default(),
            dirty: false,
        }
    }

    pub fn email_id(&self) -> &EmailId {
        &self.email_id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

/// The open email and its draft buffer. Kept as one value so the two can
/// only ever be replaced together.
#[derive(Debug, Clone, PartialEq)]
pub struct Resident {
    detail: EmailDetail,
    draft: DraftBuffer,
}

impl Resident {
    pub fn detail(&self) -> &EmailDetail {
        &self.detail
    }

    pub fn draft(&self) -> &DraftBuffer {
        &self.draft
    }

    pub fn id(&self) -> &EmailId {
        &self.detail.id
    }
}

/// What a generate response did to the draft buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftRefresh {
    Replaced,
    /// The buffer held unsaved edits; only the server draft was updated.
    KeptEdits,
}

/// Holds at most one resident email.
#[derive(Debug, Default)]
pub struct EmailDetailCache {
    resident: Option<Resident>,
}

impl EmailDetailCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resident(&self) -> Option<&Resident> {
        self.resident.as_ref()
    }

    pub fn resident_id(&self) -> Option<&EmailId> {
        self.resident.as_ref().map(Resident::id)
    }

    pub fn is_resident(&self, id: &EmailId) -> bool {
        self.resident_id() == Some(id)
    }

    /// Make `detail` the resident email and reseed the buffer from its draft.
    pub fn install(&mut self, detail: EmailDetail) {
        let draft = DraftBuffer::seeded_from(&detail);
        self.resident = Some(Resident { detail, draft });
    }

    /// Take a regenerated draft for the resident email. Body and headers stay
    /// as first opened. Unsaved edits always win over the server draft.
    pub fn refresh_draft(&mut self, detail: EmailDetail) -> Option<DraftRefresh> {
        let resident = self.resident.as_mut().filter(|r| r.detail.id == detail.id)?;
        resident.detail.draft = detail.draft;
        if resident.draft.dirty {
            return Some(DraftRefresh::KeptEdits);
        }
        resident.draft.text = resident.detail.draft.clone().unwrap_or_default();
        Some(DraftRefresh::Replaced)
    }

    /// Local edit of the resident draft. Returns false when nothing is open.
    pub fn edit(&mut self, text: String) -> bool {
        match self.resident.as_mut() {
            Some(resident) => {
                resident.draft.text = text;
                resident.draft.dirty = true;
                true
            }
            None => false,
        }
    }

    /// `sent_body` for `id` has been accepted by the backend. The buffer only
    /// becomes clean if it still holds exactly that text; edits typed while
    /// the send was in flight stay dirty.
    pub fn mark_sent(&mut self, id: &EmailId, sent_body: &str) -> bool {
        match self.resident.as_mut().filter(|r| &r.detail.id == id) {
            Some(resident) if resident.draft.text == sent_body => {
                resident.draft.dirty = false;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detail(id: &str, draft: Option<&str>) -> EmailDetail {
        EmailDetail {
            id: EmailId::from(id),
            subject: format!("Subject {}", id),
            sender: "customer@example.com".into(),
            body: format!("Body {}", id),
            draft: draft.map(str::to_string),
        }
    }

    #[test]
    fn test_install_seeds_buffer() {
        let mut cache = EmailDetailCache::new();
        cache.install(detail("1", Some("server draft")));

        let resident = cache.resident().unwrap();
        assert_eq!(resident.draft().email_id(), &EmailId::from("1"));
        assert_eq!(resident.draft().text(), "server draft");
        assert!(!resident.draft().is_dirty());

        cache.install(detail("2", None));
        let resident = cache.resident().unwrap();
        assert_eq!(resident.draft().email_id(), &EmailId::from("2"));
        assert_eq!(resident.draft().text(), "");
    }

    #[test]
    fn test_edit_without_resident_is_ignored() {
        let mut cache = EmailDetailCache::new();
        assert!(!cache.edit("stray keystroke".into()));
        assert!(cache.resident().is_none());
    }

    #[test]
    fn test_refresh_replaces_clean_buffer() {
        let mut cache = EmailDetailCache::new();
        cache.install(detail("1", None));

        let mut regenerated = detail("1", Some("AI reply"));
        regenerated.body = "changed on server".into();
        assert_eq!(cache.refresh_draft(regenerated), Some(DraftRefresh::Replaced));

        let resident = cache.resident().unwrap();
        assert_eq!(resident.draft().text(), "AI reply");
        assert_eq!(resident.detail().body, "Body 1");
        assert_eq!(resident.detail().draft.as_deref(), Some("AI reply"));
    }

    #[test]
    fn test_refresh_keeps_dirty_edits() {
        let mut cache = EmailDetailCache::new();
        cache.install(detail("1", Some("")));
        cache.edit("Thanks".into());

        assert_eq!(
            cache.refresh_draft(detail("1", Some("AI reply"))),
            Some(DraftRefresh::KeptEdits)
        );
        let resident = cache.resident().unwrap();
        assert_eq!(resident.draft().text(), "Thanks");
        assert!(resident.draft().is_dirty());
        assert_eq!(resident.detail().draft.as_deref(), Some("AI reply"));
    }

    #[test]
    fn test_refresh_for_other_email_is_ignored() {
        let mut cache = EmailDetailCache::new();
        cache.install(detail("2", None));
        assert_eq!(cache.refresh_draft(detail("1", Some("AI reply"))), None);
        assert_eq!(cache.resident().unwrap().draft().text(), "");
    }

    #[test]
    fn test_mark_sent_clears_dirty_only_for_that_email() {
        let mut cache = EmailDetailCache::new();
        cache.install(detail("1", None));
        cache.edit("Thanks".into());

        assert!(!cache.mark_sent(&EmailId::from("2"), "Thanks"));
        assert!(cache.resident().unwrap().draft().is_dirty());

        assert!(cache.mark_sent(&EmailId::from("1"), "Thanks"));
        let draft = cache.resident().unwrap().draft();
        assert!(!draft.is_dirty());
        assert_eq!(draft.text(), "Thanks");
    }

    #[test]
    fn test_mark_sent_keeps_later_edits_dirty() {
        let mut cache = EmailDetailCache::new();
        cache.install(detail("1", None));
        cache.edit("v1".into());
        cache.edit("v2".into());

        assert!(!cache.mark_sent(&EmailId::from("1"), "v1"));
        assert!(cache.resident().unwrap().draft().is_dirty());
        assert_eq!(
            cache.refresh_draft(detail("1", Some("AI reply"))),
            Some(DraftRefresh::KeptEdits)
        );
        assert_eq!(cache.resident().unwrap().draft().text(), "v2");
    }

    #[test]
    fn test_resident_snapshot_compares_by_value() {
        let mut cache = EmailDetailCache::new();
        cache.install(detail("1", Some("server")));
        let before = cache.resident().cloned().unwrap();
        assert_eq!(cache.resident(), Some(&before));

        cache.edit("changed".into());
        assert_ne!(cache.resident(), Some(&before));
    }
}
