pub mod detail;
pub mod inbox;
pub mod sequencer;
pub mod view;

use std::sync::{mpsc, Arc};

use crate::api::types::{EmailDetail, EmailId, EmailSummary, InboxQuery, InboxStats, SendReceipt};
use crate::api::TransportError;
use crate::backend::{BackendCommand, BackendResponse};
use crate::config::PolicyConfig;
use detail::{DraftRefresh, EmailDetailCache};
use inbox::InboxIndex;
use sequencer::{OpKind, OpPhase, OpToken, RequestSequencer, Settlement};
use view::{ViewInputs, ViewModel};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriageError {
    Transport(TransportError),
    /// generate/send for an email that is not the open one.
    InvalidState {
        op: OpKind,
        id: EmailId,
        resident: Option<EmailId>,
    },
    AlreadyInFlight {
        id: EmailId,
        kind: OpKind,
    },
}

impl TriageError {
    /// Short machine-readable name, used in CLI error responses.
    pub fn kind(&self) -> &'static str {
        match self {
            TriageError::Transport(_) => "transport",
            TriageError::InvalidState { .. } => "invalid_state",
            TriageError::AlreadyInFlight { .. } => "already_in_flight",
        }
    }
}

impl std::fmt::Display for TriageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriageError::Transport(e) => write!(f, "{}", e),
            TriageError::InvalidState {
                op,
                id,
                resident: Some(resident),
            } => write!(
                f,
                "cannot {} email {}: email {} is open",
                op, id, resident
            ),
            TriageError::InvalidState {
                op,
                id,
                resident: None,
            } => write!(f, "cannot {} email {}: no email is open", op, id),
            TriageError::AlreadyInFlight { id, kind } => {
                write!(f, "{} already in flight for email {}", kind, id)
            }
        }
    }
}

impl std::error::Error for TriageError {}

impl From<TransportError> for TriageError {
    fn from(e: TransportError) -> Self {
        TriageError::Transport(e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    /// Already resident; no request issued.
    Cached,
    /// An open for this email is already on its way.
    AlreadyPending,
    Requested(OpToken),
}

/// Owns all triage state. Every mutation happens either in one of the
/// intent methods (issue side) or in [`Coordinator::apply`] (response side),
/// on the caller's thread.
pub struct Coordinator {
    cmd_tx: mpsc::Sender<BackendCommand>,
    inbox: InboxIndex,
    cache: EmailDetailCache,
    sequencer: RequestSequencer,
    /// Most recent `open` intent, resident or not.
    selected: Option<EmailId>,
    stats: Option<InboxStats>,
    stats_generation: u64,
    stats_pending: bool,
    last_receipt: Option<SendReceipt>,
    policy: PolicyConfig,
    query: InboxQuery,
}

impl Coordinator {
    pub fn new(cmd_tx: mpsc::Sender<BackendCommand>, policy: PolicyConfig) -> Self {
        Coordinator {
            cmd_tx,
            inbox: InboxIndex::new(),
            cache: EmailDetailCache::new(),
            sequencer: RequestSequencer::new(),
            selected: None,
            stats: None,
            stats_generation: 0,
            stats_pending: false,
            last_receipt: None,
            policy,
            query: InboxQuery::default(),
        }
    }

    pub fn with_query(mut self, query: InboxQuery) -> Self {
        self.query = query;
        self
    }

    // ---- issue side ----

    pub fn refresh_inbox(&mut self) -> Result<u64, TriageError> {
        let generation = self.inbox.begin_refresh();
        let cmd = BackendCommand::FetchInbox {
            generation,
            query: self.query.clone(),
        };
        if let Err(e) = self.dispatch(cmd) {
            self.inbox.apply(generation, Err(TransportError::Disconnected));
            return Err(e);
        }
        Ok(generation)
    }

    pub fn inbox(&self) -> Arc<Vec<EmailSummary>> {
        self.inbox.list()
    }

    pub fn open(&mut self, id: EmailId) -> Result<OpenOutcome, TriageError> {
        if self.cache.is_resident(&id) {
            log::debug!("[Triage] email {} already open", id);
            self.selected = Some(id);
            return Ok(OpenOutcome::Cached);
        }
        if self.selected.as_ref() == Some(&id) && self.sequencer.is_pending(&id, OpKind::Open) {
            return Ok(OpenOutcome::AlreadyPending);
        }

        self.selected = Some(id.clone());
        let token = self.request(&id, OpKind::Open, |id, token| BackendCommand::OpenEmail {
            id,
            token,
        })?;
        Ok(OpenOutcome::Requested(token))
    }

    /// Local edit of the open draft. Ignored (returns false) when no email
    /// is resident.
    pub fn edit_draft(&mut self, text: impl Into<String>) -> bool {
        let edited = self.cache.edit(text.into());
        if !edited {
            log::debug!("[Triage] draft edit ignored: no email open");
        }
        edited
    }

    pub fn generate_draft(&mut self, id: &EmailId) -> Result<OpToken, TriageError> {
        self.require_resident(OpKind::Generate, id)?;
        self.request(id, OpKind::Generate, |id, token| {
            BackendCommand::GenerateDraft { id, token }
        })
    }

    pub fn send(&mut self, id: &EmailId, text: impl Into<String>) -> Result<OpToken, TriageError> {
        self.require_resident(OpKind::Send, id)?;
        if self.sequencer.is_pending(id, OpKind::Send) {
            return Err(contract_error(TriageError::AlreadyInFlight {
                id: id.clone(),
                kind: OpKind::Send,
            }));
        }
        if !self.policy.send_during_generate && self.sequencer.is_pending(id, OpKind::Generate) {
            return Err(contract_error(TriageError::AlreadyInFlight {
                id: id.clone(),
                kind: OpKind::Generate,
            }));
        }

        let body = text.into();
        self.request(id, OpKind::Send, move |id, token| BackendCommand::SendEmail {
            id,
            token,
            body,
        })
    }

    /// Send whatever the draft buffer currently holds.
    pub fn send_draft(&mut self, id: &EmailId) -> Result<OpToken, TriageError> {
        let text = match self.cache.resident() {
            Some(resident) if resident.draft().email_id() == id => resident.draft().text().to_string(),
            _ => {
                return Err(contract_error(TriageError::InvalidState {
                    op: OpKind::Send,
                    id: id.clone(),
                    resident: self.cache.resident_id().cloned(),
                }))
            }
        };
        self.send(id, text)
    }

    pub fn refresh_stats(&mut self) -> Result<u64, TriageError> {
        self.stats_generation += 1;
        self.stats_pending = true;
        let generation = self.stats_generation;
        if let Err(e) = self.dispatch(BackendCommand::FetchStats { generation }) {
            self.stats_pending = false;
            return Err(e);
        }
        Ok(generation)
    }

    // ---- apply side ----

    /// The single place responses change state.
    pub fn apply(&mut self, response: BackendResponse) -> Settlement {
        match response {
            BackendResponse::Inbox { generation, result } => self.inbox.apply(generation, result),
            BackendResponse::Stats { generation, result } => self.apply_stats(generation, result),
            BackendResponse::Detail {
                id,
                kind,
                token,
                result,
            } => self.apply_detail(id, kind, token, *result),
            BackendResponse::Sent {
                id,
                token,
                body,
                result,
            } => self.apply_sent(id, token, &body, result),
        }
    }

    fn apply_detail(
        &mut self,
        id: EmailId,
        kind: OpKind,
        token: OpToken,
        result: Result<EmailDetail, TransportError>,
    ) -> Settlement {
        if !self.sequencer.admit(&id, kind, token) {
            log::debug!("[Triage] discarding stale {} #{} for email {}", kind, token.value(), id);
            return Settlement::Discarded;
        }

        if kind == OpKind::Open && self.selected.as_ref() != Some(&id) {
            log::debug!("[Triage] discarding open of {}: selection moved on", id);
            return self.settle(&id, kind, token, OpPhase::Discarded);
        }

        let mut detail = match result {
            Ok(detail) => detail,
            Err(e) => return self.fail(&id, kind, token, &e),
        };
        detail.id = id.clone();

        match kind {
            OpKind::Open => {
                log::info!("[Triage] opened email {}", id);
                self.cache.install(detail);
                self.settle(&id, kind, token, OpPhase::Applied)
            }
            OpKind::Generate => match self.cache.refresh_draft(detail) {
                Some(DraftRefresh::Replaced) => {
                    log::info!("[Triage] new draft for email {}", id);
                    self.settle(&id, kind, token, OpPhase::Applied)
                }
                Some(DraftRefresh::KeptEdits) => {
                    log::info!("[Triage] new draft for email {} kept behind local edits", id);
                    self.settle(&id, kind, token, OpPhase::Applied)
                }
                None => {
                    log::debug!("[Triage] discarding draft for {}: no longer open", id);
                    self.settle(&id, kind, token, OpPhase::Discarded)
                }
            },
            OpKind::Send => {
                log::warn!("[Triage] unexpected detail response for send of {}", id);
                self.settle(&id, kind, token, OpPhase::Discarded)
            }
        }
    }

    fn apply_sent(
        &mut self,
        id: EmailId,
        token: OpToken,
        body: &str,
        result: Result<SendReceipt, TransportError>,
    ) -> Settlement {
        if !self.sequencer.admit(&id, OpKind::Send, token) {
            log::debug!("[Triage] discarding stale send #{} for email {}", token.value(), id);
            return Settlement::Discarded;
        }
        let receipt = match result {
            Ok(receipt) => receipt,
            Err(e) => return self.fail(&id, OpKind::Send, token, &e),
        };

        log::info!("[Triage] email {} sent ({})", id, receipt.status);
        self.last_receipt = Some(receipt);
        if !self.cache.mark_sent(&id, body) && self.cache.is_resident(&id) {
            log::info!("[Triage] draft for email {} edited during send; keeping edits", id);
        }
        let settlement = self.settle(&id, OpKind::Send, token, OpPhase::Applied);
        if let Err(e) = self.refresh_inbox() {
            log::warn!("[Triage] inbox refresh after send failed: {}", e);
        }
        settlement
    }

    fn apply_stats(
        &mut self,
        generation: u64,
        result: Result<InboxStats, TransportError>,
    ) -> Settlement {
        if generation != self.stats_generation || !self.stats_pending {
            return Settlement::Discarded;
        }
        self.stats_pending = false;
        match result {
            Ok(stats) => {
                self.stats = Some(stats);
                Settlement::Applied
            }
            Err(e) => {
                log::warn!("[Triage] stats refresh failed: {}", e);
                Settlement::Failed
            }
        }
    }

    // ---- read side ----

    pub fn has_pending(&self) -> bool {
        self.sequencer.any_pending() || self.inbox.is_pending() || self.stats_pending
    }

    pub fn selected(&self) -> Option<&EmailId> {
        self.selected.as_ref()
    }

    pub fn resident_id(&self) -> Option<&EmailId> {
        self.cache.resident_id()
    }

    pub fn phase(&self, id: &EmailId, kind: OpKind) -> OpPhase {
        self.sequencer.phase(id, kind)
    }

    pub fn view(&self) -> ViewModel {
        view::project(ViewInputs {
            inbox: &self.inbox,
            cache: &self.cache,
            sequencer: &self.sequencer,
            selected: self.selected.as_ref(),
            last_receipt: self.last_receipt.as_ref(),
            stats: self.stats.as_ref(),
        })
    }

    // ---- helpers ----

    fn require_resident(&self, op: OpKind, id: &EmailId) -> Result<(), TriageError> {
        if self.cache.is_resident(id) {
            return Ok(());
        }
        Err(contract_error(TriageError::InvalidState {
            op,
            id: id.clone(),
            resident: self.cache.resident_id().cloned(),
        }))
    }

    fn request(
        &mut self,
        id: &EmailId,
        kind: OpKind,
        build: impl FnOnce(EmailId, OpToken) -> BackendCommand,
    ) -> Result<OpToken, TriageError> {
        let token = self.sequencer.issue(id, kind);
        if let Err(e) = self.dispatch(build(id.clone(), token)) {
            self.sequencer
                .resolve(id, kind, token, OpPhase::Failed(e.to_string()));
            return Err(e);
        }
        Ok(token)
    }

    fn dispatch(&self, cmd: BackendCommand) -> Result<(), TriageError> {
        self.cmd_tx.send(cmd).map_err(|_| {
            log::error!("[Triage] backend workers are gone");
            TriageError::Transport(TransportError::Disconnected)
        })
    }

    fn settle(&mut self, id: &EmailId, kind: OpKind, token: OpToken, phase: OpPhase) -> Settlement {
        let settlement = match phase {
            OpPhase::Applied => Settlement::Applied,
            OpPhase::Failed(_) => Settlement::Failed,
            _ => Settlement::Discarded,
        };
        self.sequencer.resolve(id, kind, token, phase);
        settlement
    }

    fn fail(&mut self, id: &EmailId, kind: OpKind, token: OpToken, err: &TransportError) -> Settlement {
        log::warn!("[Triage] {} failed for email {}: {}", kind, id, err);
        self.settle(id, kind, token, OpPhase::Failed(err.to_string()))
    }
}

fn contract_error(err: TriageError) -> TriageError {
    log::error!("[Triage] {}", err);
    err
}
