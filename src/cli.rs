use crate::api::types::EmailId;
use crate::backend::BackendResponse;
use crate::triage::sequencer::{OpKind, OpPhase};
use crate::triage::{Coordinator, OpenOutcome, TriageError};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::io::{self, BufRead, Write};
use std::sync::mpsc;
use std::time::{Duration, Instant};

const DEFAULT_WAIT_MS: u64 = 10_000;
/// Oldest unreported settlements are dropped past this many.
const JOURNAL_CAP: usize = 256;

struct CliState {
    coord: Coordinator,
    resp_rx: mpsc::Receiver<BackendResponse>,
    /// Settlements observed since the last `wait`.
    journal: VecDeque<Value>,
    dropped: usize,
}

impl CliState {
    /// Apply every response that has already arrived.
    fn drain(&mut self) {
        while let Ok(resp) = self.resp_rx.try_recv() {
            self.pump(resp);
        }
    }

    fn pump(&mut self, resp: BackendResponse) {
        let mut entry = describe(&resp);
        let settlement = self.coord.apply(resp);
        entry["settlement"] = json!(settlement);
        if self.journal.len() >= JOURNAL_CAP {
            self.journal.pop_front();
            self.dropped += 1;
        }
        self.journal.push_back(entry);
    }
}

fn describe(resp: &BackendResponse) -> Value {
    match resp {
        BackendResponse::Inbox { generation, .. } => {
            json!({"op": "inbox", "generation": generation})
        }
        BackendResponse::Stats { generation, .. } => {
            json!({"op": "stats", "generation": generation})
        }
        BackendResponse::Detail {
            id, kind, token, ..
        } => json!({"op": kind, "id": id, "token": token}),
        BackendResponse::Sent { id, token, .. } => {
            json!({"op": OpKind::Send, "id": id, "token": token})
        }
    }
}

fn ok_response(data: Value) -> Value {
    let mut obj = match data {
        Value::Object(m) => m,
        _ => {
            let mut m = serde_json::Map::new();
            m.insert("data".to_string(), data);
            m
        }
    };
    obj.insert("ok".to_string(), Value::Bool(true));
    Value::Object(obj)
}

fn err_response(msg: &str, kind: &str) -> Value {
    json!({"ok": false, "error": msg, "kind": kind})
}

fn usage_error(msg: &str) -> Value {
    err_response(msg, "usage")
}

fn triage_error(err: &TriageError) -> Value {
    err_response(&err.to_string(), err.kind())
}

/// Ids may be given as JSON strings or numbers.
fn get_id(input: &Value, field: &str) -> Option<EmailId> {
    match input.get(field)? {
        Value::String(s) if !s.is_empty() => Some(EmailId::new(s.as_str())),
        Value::Number(n) => Some(EmailId::new(n.to_string())),
        _ => None,
    }
}

/// Explicit `id`, else the open email.
fn target_id(state: &CliState, input: &Value) -> Result<EmailId, Value> {
    if let Some(id) = get_id(input, "id") {
        return Ok(id);
    }
    state
        .coord
        .resident_id()
        .cloned()
        .ok_or_else(|| usage_error("missing 'id' and no email is open"))
}

fn dispatch(state: &mut CliState, input: &Value) -> Value {
    let command = match input.get("command").and_then(|v| v.as_str()) {
        Some(c) => c,
        None => return usage_error("missing 'command' field"),
    };

    state.drain();

    match command {
        "refresh" => cmd_refresh(state),
        "list" => cmd_list(state),
        "open" => cmd_open(state, input),
        "edit_draft" => cmd_edit_draft(state, input),
        "generate_draft" => cmd_generate_draft(state, input),
        "send" => cmd_send(state, input),
        "retry" => cmd_retry(state, input),
        "stats" => cmd_stats(state),
        "view" => cmd_view(state),
        "status" => cmd_status(state),
        "wait" => cmd_wait(state, input),
        _ => usage_error(&format!("unknown command '{}'", command)),
    }
}

// --- Command handlers ---

fn cmd_refresh(state: &mut CliState) -> Value {
    match state.coord.refresh_inbox() {
        Ok(generation) => ok_response(json!({"generation": generation})),
        Err(e) => triage_error(&e),
    }
}

fn cmd_list(state: &CliState) -> Value {
    let emails = state.coord.inbox();
    let view = state.coord.view();
    ok_response(json!({
        "emails": &*emails,
        "loading": view.inbox_loading,
        "error": view.inbox_error,
    }))
}

fn cmd_open(state: &mut CliState, input: &Value) -> Value {
    let Some(id) = get_id(input, "id") else {
        return usage_error("missing 'id' field");
    };
    match state.coord.open(id.clone()) {
        Ok(OpenOutcome::Cached) => ok_response(json!({"id": id, "outcome": "cached"})),
        Ok(OpenOutcome::AlreadyPending) => {
            ok_response(json!({"id": id, "outcome": "already_pending"}))
        }
        Ok(OpenOutcome::Requested(token)) => {
            ok_response(json!({"id": id, "outcome": "requested", "token": token}))
        }
        Err(e) => triage_error(&e),
    }
}

fn cmd_edit_draft(state: &mut CliState, input: &Value) -> Value {
    let Some(text) = input.get("text").and_then(|v| v.as_str()) else {
        return usage_error("missing 'text' field");
    };
    let edited = state.coord.edit_draft(text);
    ok_response(json!({"edited": edited}))
}

fn cmd_generate_draft(state: &mut CliState, input: &Value) -> Value {
    let id = match target_id(state, input) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.coord.generate_draft(&id) {
        Ok(token) => ok_response(json!({"id": id, "token": token})),
        Err(e) => triage_error(&e),
    }
}

fn cmd_send(state: &mut CliState, input: &Value) -> Value {
    let id = match target_id(state, input) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let result = match input.get("text").and_then(|v| v.as_str()) {
        Some(text) => state.coord.send(&id, text),
        None => state.coord.send_draft(&id),
    };
    match result {
        Ok(token) => ok_response(json!({"id": id, "token": token})),
        Err(e) => triage_error(&e),
    }
}

fn cmd_retry(state: &mut CliState, input: &Value) -> Value {
    let Some(id) = get_id(input, "id") else {
        return usage_error("missing 'id' field");
    };
    let kind = match input.get("kind").and_then(|v| v.as_str()) {
        Some(k) => match OpKind::parse(k) {
            Some(kind) => kind,
            None => return usage_error(&format!("unknown kind '{}'", k)),
        },
        None => return usage_error("missing 'kind' field"),
    };

    log::info!("[CLI] retry {} for email {}", kind, id);
    let result = match kind {
        OpKind::Open => state.coord.open(id.clone()).map(|outcome| match outcome {
            OpenOutcome::Requested(token) => json!(token),
            _ => Value::Null,
        }),
        OpKind::Generate => state.coord.generate_draft(&id).map(|t| json!(t)),
        OpKind::Send => state.coord.send_draft(&id).map(|t| json!(t)),
    };
    match result {
        Ok(token) => ok_response(json!({"id": id, "kind": kind, "token": token})),
        Err(e) => triage_error(&e),
    }
}

fn cmd_stats(state: &mut CliState) -> Value {
    match state.coord.refresh_stats() {
        Ok(generation) => ok_response(json!({"generation": generation})),
        Err(e) => triage_error(&e),
    }
}

fn cmd_view(state: &CliState) -> Value {
    match serde_json::to_value(state.coord.view()) {
        Ok(view) => ok_response(view),
        Err(e) => err_response(&format!("failed to serialize view: {}", e), "internal"),
    }
}

fn phase_label(phase: &OpPhase) -> &'static str {
    match phase {
        OpPhase::Idle => "idle",
        OpPhase::Pending => "pending",
        OpPhase::Applied => "applied",
        OpPhase::Discarded => "discarded",
        OpPhase::Failed(_) => "failed",
    }
}

fn cmd_status(state: &CliState) -> Value {
    // Operation phases for the selected email, if any.
    let phases = state.coord.selected().map(|id| {
        let mut m = serde_json::Map::new();
        for kind in [OpKind::Open, OpKind::Generate, OpKind::Send] {
            let phase = state.coord.phase(id, kind);
            m.insert(kind.label().to_string(), json!(phase_label(&phase)));
        }
        Value::Object(m)
    });
    ok_response(json!({
        "pending": state.coord.has_pending(),
        "selected": state.coord.selected(),
        "resident": state.coord.resident_id(),
        "phases": phases,
        "unreported": state.journal.len(),
    }))
}

/// Block until nothing is in flight or the timeout passes.
fn cmd_wait(state: &mut CliState, input: &Value) -> Value {
    let timeout_ms = input
        .get("timeout_ms")
        .and_then(|v| v.as_u64())
        .unwrap_or(DEFAULT_WAIT_MS);
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);

    let mut disconnected = false;
    while state.coord.has_pending() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match state.resp_rx.recv_timeout(remaining) {
            Ok(resp) => state.pump(resp),
            Err(mpsc::RecvTimeoutError::Timeout) => break,
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                disconnected = true;
                break;
            }
        }
    }

    if disconnected {
        log::error!("[CLI] backend workers exited while waiting");
        return err_response("backend channel closed", "transport");
    }

    let settlements: Vec<Value> = state.journal.drain(..).collect();
    let dropped = std::mem::take(&mut state.dropped);
    ok_response(json!({
        "settlements": settlements,
        "dropped": dropped,
        "idle": !state.coord.has_pending(),
    }))
}

fn serve(state: &mut CliState, input: impl BufRead, mut out: impl Write) {
    for line in input.lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Value>(trimmed) {
            Ok(input) => dispatch(state, &input),
            Err(e) => usage_error(&format!("JSON parse error: {}", e)),
        };
        let _ = serde_json::to_writer(&mut out, &response);
        let _ = out.write_all(b"\n");
        let _ = out.flush();
    }
}

pub fn run_cli(coord: Coordinator, resp_rx: mpsc::Receiver<BackendResponse>) {
    let mut state = CliState {
        coord,
        resp_rx,
        journal: VecDeque::new(),
        dropped: 0,
    };

    log::info!("[CLI] ready");
    let stdin = io::stdin();
    let stdout = io::stdout();
    serve(&mut state, stdin.lock(), stdout.lock());
    log::info!("[CLI] stdin closed, exiting");
}

pub fn print_help_cli() {
    print!(
        r#"mailtriage --cli: JSON-over-stdin/stdout CLI mode
=================================================

Protocol: Newline-Delimited JSON (NDJSON)
- Send one JSON object per line to stdin
- Receive one JSON response per line from stdout
- Responses have {{"ok": true, ...}} on success or
  {{"ok": false, "error": "...", "kind": "..."}} on failure
- Error kinds: transport, invalid_state, already_in_flight, usage

Requests are asynchronous. Commands that talk to the backend return as soon
as the request is issued; use "wait" to let responses arrive, then "view".
Responses that have already arrived are applied before every command.

Inbox
-----
refresh: Reload the inbox from the backend.
   > {{"command": "refresh"}}
   < {{"ok": true, "generation": 1}}

list: Current inbox snapshot.
   > {{"command": "list"}}
   < {{"ok": true, "emails": [{{"id": "1", "subject": "...", "priority": "high", ...}}], "loading": false, "error": null}}

stats: Request inbox statistics (shown in "view" once arrived).
   > {{"command": "stats"}}

Email
-----
open: Select an email and load it.
   > {{"command": "open", "id": 1}}
   < {{"ok": true, "id": "1", "outcome": "requested", "token": 1}}
   outcome is one of: requested, already_pending, cached

edit_draft: Replace the open email's draft text (local only).
   > {{"command": "edit_draft", "text": "Thanks, we are on it."}}
   < {{"ok": true, "edited": true}}

generate_draft: Ask the backend for a new AI draft. id defaults to the open email.
   > {{"command": "generate_draft"}}
   < {{"ok": true, "id": "1", "token": 1}}
   Local edits are never overwritten by a generated draft.

send: Send the open email's reply. text defaults to the current draft.
   > {{"command": "send"}}
   > {{"command": "send", "id": 1, "text": "override"}}
   < {{"ok": true, "id": "1", "token": 1}}

retry: Re-issue a failed operation.
   > {{"command": "retry", "id": 1, "kind": "generate"}}
   kind is one of: open, generate, send

State
-----
view:   {{"command": "view"}}    full view model (inbox, detail, errors, notice, stats)
status: {{"command": "status"}}  pending flag, selected and open email ids,
        per-operation phase (idle, pending, applied, discarded, failed) for the selected email

wait: Apply responses until nothing is pending or the timeout passes.
   > {{"command": "wait", "timeout_ms": 5000}}
   < {{"ok": true, "idle": true, "dropped": 0, "settlements": [{{"op": "open", "id": "1", "token": 1, "settlement": "applied"}}]}}
   settlement is one of: applied, discarded, failed
   Only the newest 256 unreported settlements are kept; dropped counts the rest.
"#
    );
}
