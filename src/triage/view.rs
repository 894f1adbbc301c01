use serde::Serialize;

use super::detail::EmailDetailCache;
use super::inbox::InboxIndex;
use super::sequencer::{OpKind, RequestSequencer};
use crate::api::types::{EmailId, InboxStats, Priority, SendReceipt, Sentiment};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InboxRow {
    pub id: EmailId,
    pub subject: String,
    pub sender: String,
    pub priority: Priority,
    pub sentiment: Sentiment,
    pub resolved: bool,
    pub received_at: Option<String>,
    pub selected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetailPane {
    pub id: EmailId,
    pub subject: String,
    pub sender: String,
    pub body: String,
    pub server_draft: Option<String>,
    pub draft_text: String,
    pub dirty: bool,
    pub generating: bool,
    pub sending: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpError {
    pub id: EmailId,
    pub kind: OpKind,
    pub message: String,
}

/// Everything a renderer needs, and nothing it could write back through.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewModel {
    pub inbox: Vec<InboxRow>,
    pub inbox_loading: bool,
    pub inbox_error: Option<String>,
    pub selected: Option<EmailId>,
    pub detail: Option<DetailPane>,
    /// An open for the selected email is in flight.
    pub loading: bool,
    pub errors: Vec<OpError>,
    pub notice: Option<String>,
    pub stats: Option<InboxStats>,
}

/// Read-only inputs to [`project`].
pub struct ViewInputs<'a> {
    pub inbox: &'a InboxIndex,
    pub cache: &'a EmailDetailCache,
    pub sequencer: &'a RequestSequencer,
    pub selected: Option<&'a EmailId>,
    pub last_receipt: Option<&'a SendReceipt>,
    pub stats: Option<&'a InboxStats>,
}

pub fn project(inputs: ViewInputs<'_>) -> ViewModel {
    let ViewInputs {
        inbox,
        cache,
        sequencer,
        selected,
        last_receipt,
        stats,
    } = inputs;

    let rows = inbox
        .list()
        .iter()
        .map(|e| InboxRow {
            id: e.id.clone(),
            subject: e.subject.clone(),
            sender: e.sender.clone(),
            priority: e.priority,
            sentiment: e.sentiment,
            resolved: e.resolved,
            received_at: e.received_at.clone(),
            selected: selected == Some(&e.id),
        })
        .collect();

    let detail = cache.resident().map(|resident| {
        let d = resident.detail();
        DetailPane {
            id: d.id.clone(),
            subject: d.subject.clone(),
            sender: d.sender.clone(),
            body: d.body.clone(),
            server_draft: d.draft.clone(),
            draft_text: resident.draft().text().to_string(),
            dirty: resident.draft().is_dirty(),
            generating: sequencer.is_pending(&d.id, OpKind::Generate),
            sending: sequencer.is_pending(&d.id, OpKind::Send),
        }
    });

    let loading = selected.is_some_and(|id| sequencer.is_pending(id, OpKind::Open));

    let errors = sequencer
        .failures()
        .into_iter()
        .map(|(id, kind, message)| OpError { id, kind, message })
        .collect();

    ViewModel {
        inbox: rows,
        inbox_loading: inbox.is_pending(),
        inbox_error: inbox.error().map(str::to_string),
        selected: selected.cloned(),
        detail,
        loading,
        errors,
        notice: last_receipt.map(receipt_notice),
        stats: stats.cloned(),
    }
}

fn receipt_notice(receipt: &SendReceipt) -> String {
    let status = if receipt.status.is_empty() {
        "sent"
    } else {
        receipt.status.as_str()
    };
    let mut notice = String::new();
    let mut chars = status.chars();
    if let Some(first) = chars.next() {
        notice.extend(first.to_uppercase());
        notice.push_str(chars.as_str());
    }
    match receipt.to.as_deref() {
        Some(to) if !to.is_empty() => format!("{} to {}", notice, to),
        _ => notice,
    }
}
