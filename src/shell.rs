use crate::api::types::EmailId;
use crate::backend::BackendResponse;
use crate::triage::sequencer::{OpKind, Settlement};
use crate::triage::view::ViewModel;
use crate::triage::{Coordinator, OpenOutcome};
use std::fs;
use std::io::{self, BufRead, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::{Duration, Instant};

const WAIT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
enum ShellCommand {
    List,
    Refresh,
    Open(EmailId),
    Generate,
    Edit,
    Draft(String),
    Send,
    Retry(OpKind),
    Stats,
    Wait,
    View,
    Help,
    Quit,
}

fn parse_command(line: &str) -> Result<Option<ShellCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((w, r)) => (w, r.trim()),
        None => (line, ""),
    };

    let cmd = match word {
        "ls" => ShellCommand::List,
        "refresh" => ShellCommand::Refresh,
        "open" | "o" if !rest.is_empty() => ShellCommand::Open(EmailId::new(rest)),
        "open" | "o" => return Err("usage: open <id>".into()),
        "gen" | "generate" => ShellCommand::Generate,
        "edit" | "e" => ShellCommand::Edit,
        "draft" => ShellCommand::Draft(rest.to_string()),
        "send" => ShellCommand::Send,
        "retry" => match OpKind::parse(rest) {
            Some(kind) => ShellCommand::Retry(kind),
            None => return Err("usage: retry open|generate|send".into()),
        },
        "stats" => ShellCommand::Stats,
        "wait" | "w" => ShellCommand::Wait,
        "view" | "v" => ShellCommand::View,
        "help" | "?" => ShellCommand::Help,
        "q" | "quit" | "exit" => ShellCommand::Quit,
        _ => return Err(format!("unknown command '{}' (try 'help')", word)),
    };
    Ok(Some(cmd))
}

struct Shell {
    coord: Coordinator,
    resp_rx: mpsc::Receiver<BackendResponse>,
    editor: String,
}

impl Shell {
    /// Apply whatever has arrived and report anything worth telling.
    fn drain(&mut self, out: &mut impl Write) -> io::Result<()> {
        while let Ok(resp) = self.resp_rx.try_recv() {
            self.pump(resp, out)?;
        }
        Ok(())
    }

    fn pump(&mut self, resp: BackendResponse, out: &mut impl Write) -> io::Result<()> {
        let label = match &resp {
            BackendResponse::Inbox { .. } => "inbox".to_string(),
            BackendResponse::Stats { .. } => "stats".to_string(),
            BackendResponse::Detail { id, kind, .. } => format!("{} {}", kind, id),
            BackendResponse::Sent { id, .. } => format!("send {}", id),
        };
        match self.coord.apply(resp) {
            Settlement::Applied => writeln!(out, "* {} done", label),
            Settlement::Failed => writeln!(out, "! {} failed (see 'view')", label),
            Settlement::Discarded => Ok(()),
        }
    }

    fn wait(&mut self, out: &mut impl Write) -> io::Result<()> {
        let deadline = Instant::now() + WAIT_TIMEOUT;
        while self.coord.has_pending() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.resp_rx.recv_timeout(remaining) {
                Ok(resp) => self.pump(resp, out)?,
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    writeln!(out, "still waiting on the backend")?;
                    break;
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    writeln!(out, "backend workers have exited")?;
                    break;
                }
            }
        }
        Ok(())
    }

    fn resident(&self, out: &mut impl Write) -> io::Result<Option<EmailId>> {
        let id = self.coord.resident_id().cloned();
        if id.is_none() {
            writeln!(out, "no email open (use 'open <id>')")?;
        }
        Ok(id)
    }

    /// Returns false when the shell should exit.
    fn run_command(&mut self, cmd: ShellCommand, out: &mut impl Write) -> io::Result<bool> {
        let issued = match cmd {
            ShellCommand::Quit => return Ok(false),
            ShellCommand::Help => {
                out.write_all(HELP.as_bytes())?;
                return Ok(true);
            }
            ShellCommand::List => {
                out.write_all(render_inbox(&self.coord.view()).as_bytes())?;
                return Ok(true);
            }
            ShellCommand::View => {
                out.write_all(render_detail(&self.coord.view()).as_bytes())?;
                return Ok(true);
            }
            ShellCommand::Wait => {
                self.wait(out)?;
                out.write_all(render_detail(&self.coord.view()).as_bytes())?;
                return Ok(true);
            }
            ShellCommand::Refresh => self.coord.refresh_inbox().map(|_| ()),
            ShellCommand::Stats => self.coord.refresh_stats().map(|_| ()),
            ShellCommand::Open(id) => match self.coord.open(id) {
                Ok(OpenOutcome::Cached) => {
                    out.write_all(render_detail(&self.coord.view()).as_bytes())?;
                    Ok(())
                }
                Ok(_) => Ok(()),
                Err(e) => Err(e),
            },
            ShellCommand::Draft(text) => {
                if !self.coord.edit_draft(text) {
                    writeln!(out, "no email open")?;
                }
                return Ok(true);
            }
            ShellCommand::Edit => {
                self.edit(out)?;
                return Ok(true);
            }
            ShellCommand::Generate => match self.resident(out)? {
                Some(id) => self.coord.generate_draft(&id).map(|_| ()),
                None => return Ok(true),
            },
            ShellCommand::Send => match self.resident(out)? {
                Some(id) => self.coord.send_draft(&id).map(|_| ()),
                None => return Ok(true),
            },
            ShellCommand::Retry(kind) => {
                let Some(id) = self.coord.selected().cloned() else {
                    writeln!(out, "nothing selected")?;
                    return Ok(true);
                };
                match kind {
                    OpKind::Open => self.coord.open(id).map(|_| ()),
                    OpKind::Generate => self.coord.generate_draft(&id).map(|_| ()),
                    OpKind::Send => self.coord.send_draft(&id).map(|_| ()),
                }
            }
        };

        if let Err(e) = issued {
            writeln!(out, "error: {}", e)?;
        }
        Ok(true)
    }

    /// Hand the draft to $EDITOR and take back whatever it saved.
    fn edit(&mut self, out: &mut impl Write) -> io::Result<()> {
        let view = self.coord.view();
        let Some(pane) = view.detail else {
            writeln!(out, "no email open")?;
            return Ok(());
        };

        let path = write_temp_file(&pane.id, &pane.draft_text)?;
        let status = std::process::Command::new("sh")
            .arg("-c")
            .arg(format!("{} {}", self.editor, path.display()))
            .status();
        let edited = fs::read_to_string(&path);
        let _ = fs::remove_file(&path);

        match status {
            Ok(s) if s.success() => {}
            Ok(s) => {
                writeln!(out, "editor exited with {}; draft unchanged", s)?;
                return Ok(());
            }
            Err(e) => {
                log::error!("[Shell] failed to spawn editor: {}", e);
                writeln!(out, "failed to start editor '{}': {}", self.editor, e)?;
                return Ok(());
            }
        }

        let text = edited?;
        if text == pane.draft_text {
            return Ok(());
        }
        // The editor may have taken a while; only apply to the email it was opened for.
        if self.coord.resident_id() != Some(&pane.id) {
            writeln!(out, "email {} was closed while editing; edit dropped", pane.id)?;
            return Ok(());
        }
        self.coord.edit_draft(text);
        Ok(())
    }
}

/// Write content to a temp file readable only by the current user.
fn write_temp_file(id: &EmailId, content: &str) -> io::Result<PathBuf> {
    let filename = format!(
        "mailtriage-draft-{}-{}.txt",
        std::process::id(),
        id.as_str().replace(|c: char| !c.is_ascii_alphanumeric(), "_")
    );
    let path = std::env::temp_dir().join(filename);

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(&path)?;

    file.write_all(content.as_bytes())?;
    Ok(path)
}

fn render_inbox(view: &ViewModel) -> String {
    let mut s = String::new();
    if view.inbox_loading {
        s.push_str("(refreshing...)\n");
    }
    if let Some(ref err) = view.inbox_error {
        s.push_str(&format!("inbox error: {}\n", err));
    }
    if view.inbox.is_empty() {
        s.push_str("inbox is empty\n");
        return s;
    }
    for row in &view.inbox {
        let marker = if row.selected { '>' } else { ' ' };
        let done = if row.resolved { "x" } else { " " };
        s.push_str(&format!(
            "{} [{}] {:<6} {:<6} {:<8} {}  <{}>\n",
            marker,
            done,
            row.id,
            row.priority.label(),
            row.sentiment.label(),
            row.subject,
            row.sender
        ));
    }
    s
}

fn render_detail(view: &ViewModel) -> String {
    let mut s = String::new();
    if view.loading {
        if let Some(ref id) = view.selected {
            s.push_str(&format!("loading email {}...\n", id));
        }
    }

    match view.detail {
        Some(ref pane) => {
            s.push_str(&format!("Email {}\n", pane.id));
            s.push_str(&format!("From:    {}\n", pane.sender));
            s.push_str(&format!("Subject: {}\n\n", pane.subject));
            s.push_str(&pane.body);
            if !pane.body.ends_with('\n') {
                s.push('\n');
            }

            let mut flags = Vec::new();
            if pane.dirty {
                flags.push("edited");
            }
            if pane.generating {
                flags.push("generating");
            }
            if pane.sending {
                flags.push("sending");
            }
            if flags.is_empty() {
                s.push_str("\n--- draft ---\n");
            } else {
                s.push_str(&format!("\n--- draft ({}) ---\n", flags.join(", ")));
            }
            if pane.draft_text.is_empty() {
                s.push_str("(empty; 'gen' to generate one)\n");
            } else {
                s.push_str(&pane.draft_text);
                if !pane.draft_text.ends_with('\n') {
                    s.push('\n');
                }
            }
            if pane.dirty && pane.server_draft.as_deref().unwrap_or("") != pane.draft_text {
                s.push_str("(a newer server draft is available but local edits are kept)\n");
            }
        }
        None if !view.loading => s.push_str("no email open\n"),
        None => {}
    }

    for err in &view.errors {
        s.push_str(&format!(
            "! {} failed for email {}: {} ('retry {}')\n",
            err.kind, err.id, err.message, err.kind
        ));
    }
    if let Some(ref notice) = view.notice {
        s.push_str(&format!("{}\n", notice));
    }
    if let Some(ref stats) = view.stats {
        s.push_str(&format!(
            "stats: {} total, {} resolved, {} pending\n",
            stats.total, stats.resolved, stats.pending
        ));
    }
    s
}

const HELP: &str = "\
commands:
  ls              show the inbox
  refresh         reload the inbox
  open <id>       open an email
  view            show the open email and its draft
  gen             generate an AI draft for the open email
  edit            edit the draft in $EDITOR
  draft <text>    replace the draft text
  send            send the current draft
  retry <kind>    retry open|generate|send for the selected email
  stats           fetch inbox statistics
  wait            wait for outstanding requests
  q               quit
";

pub fn run(
    coord: Coordinator,
    resp_rx: mpsc::Receiver<BackendResponse>,
    editor: String,
) -> io::Result<()> {
    let mut shell = Shell {
        coord,
        resp_rx,
        editor,
    };
    let stdin = io::stdin();
    let mut out = io::stdout();

    if let Err(e) = shell.coord.refresh_inbox() {
        writeln!(out, "error: {}", e)?;
    }
    shell.wait(&mut out)?;
    out.write_all(render_inbox(&shell.coord.view()).as_bytes())?;

    let mut lines = stdin.lock().lines();
    loop {
        write!(out, "triage> ")?;
        out.flush()?;
        let Some(line) = lines.next() else {
            break;
        };
        let line = line?;
        shell.drain(&mut out)?;

        match parse_command(&line) {
            Ok(Some(cmd)) => {
                if !shell.run_command(cmd, &mut out)? {
                    break;
                }
            }
            Ok(None) => {}
            Err(msg) => writeln!(out, "{}", msg)?,
        }
    }
    writeln!(out)?;
    Ok(())
}
