use crate::api::types::{EmailDetail, EmailId, EmailSummary, InboxQuery, InboxStats, SendReceipt};
use crate::api::{Transport, TransportError};
use crate::triage::sequencer::{OpKind, OpToken};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;

/// Commands sent from the UI thread to the backend workers.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCommand {
    FetchInbox {
        generation: u64,
        query: InboxQuery,
    },
    OpenEmail {
        id: EmailId,
        token: OpToken,
    },
    /// Trigger generation, then re-read the detail to pick up the new draft.
    GenerateDraft {
        id: EmailId,
        token: OpToken,
    },
    SendEmail {
        id: EmailId,
        token: OpToken,
        body: String,
    },
    FetchStats {
        generation: u64,
    },
}

/// Responses sent from the backend workers to the UI thread. Each one
/// echoes the token or generation of the command that produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendResponse {
    Inbox {
        generation: u64,
        result: Result<Vec<EmailSummary>, TransportError>,
    },
    Detail {
        id: EmailId,
        kind: OpKind,
        token: OpToken,
        result: Box<Result<EmailDetail, TransportError>>,
    },
    /// `body` is the text that was handed to the backend.
    Sent {
        id: EmailId,
        token: OpToken,
        body: String,
        result: Result<SendReceipt, TransportError>,
    },
    Stats {
        generation: u64,
        result: Result<InboxStats, TransportError>,
    },
}

/// Spawn `workers` backend threads sharing one command queue. Responses
/// arrive in completion order, not issue order. Workers exit once every
/// command sender has been dropped.
pub fn spawn(
    transport: Arc<dyn Transport>,
    workers: usize,
) -> (
    mpsc::Sender<BackendCommand>,
    mpsc::Receiver<BackendResponse>,
) {
    let (cmd_tx, cmd_rx) = mpsc::channel::<BackendCommand>();
    let (resp_tx, resp_rx) = mpsc::channel::<BackendResponse>();
    let cmd_rx = Arc::new(Mutex::new(cmd_rx));

    for n in 0..workers.max(1) {
        let transport = transport.clone();
        let cmd_rx = cmd_rx.clone();
        let resp_tx = resp_tx.clone();
        let spawned = thread::Builder::new()
            .name(format!("backend-{}", n))
            .spawn(move || worker_loop(transport, cmd_rx, resp_tx));
        if let Err(e) = spawned {
            log::error!("[Backend] failed to spawn worker {}: {}", n, e);
        }
    }

    (cmd_tx, resp_rx)
}

fn worker_loop(
    transport: Arc<dyn Transport>,
    cmd_rx: Arc<Mutex<mpsc::Receiver<BackendCommand>>>,
    resp_tx: mpsc::Sender<BackendResponse>,
) {
    loop {
        let cmd = {
            let Ok(rx) = cmd_rx.lock() else {
                break;
            };
            match rx.recv() {
                Ok(cmd) => cmd,
                Err(_) => break,
            }
        };

        let response = execute(transport.as_ref(), cmd);
        if resp_tx.send(response).is_err() {
            break;
        }
    }
}

/// Run one command to completion against the transport.
pub fn execute(transport: &dyn Transport, cmd: BackendCommand) -> BackendResponse {
    match cmd {
        BackendCommand::FetchInbox { generation, query } => {
            let result = transport.list_emails(&query);
            if let Err(ref e) = result {
                log::warn!("[Backend] inbox fetch failed: {}", e);
            }
            BackendResponse::Inbox { generation, result }
        }
        BackendCommand::OpenEmail { id, token } => {
            let result = transport.get_email(&id);
            BackendResponse::Detail {
                id,
                kind: OpKind::Open,
                token,
                result: Box::new(result),
            }
        }
        BackendCommand::GenerateDraft { id, token } => {
            let result = transport
                .generate_draft(&id)
                .and_then(|()| transport.get_email(&id));
            BackendResponse::Detail {
                id,
                kind: OpKind::Generate,
                token,
                result: Box::new(result),
            }
        }
        BackendCommand::SendEmail { id, token, body } => {
            let result = transport.send(&id, &body);
            BackendResponse::Sent {
                id,
                token,
                body,
                result,
            }
        }
        BackendCommand::FetchStats { generation } => {
            let result = transport.stats();
            BackendResponse::Stats { generation, result }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triage::sequencer::RequestSequencer;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct FakeTransport {
        generate_fails: bool,
        slow_id: Option<&'static str>,
        generate_calls: AtomicUsize,
        get_calls: AtomicUsize,
        sent_bodies: Mutex<Vec<String>>,
    }

    impl Transport for FakeTransport {
        fn list_emails(&self, query: &InboxQuery) -> Result<Vec<EmailSummary>, TransportError> {
            if query.priority.as_deref() == Some("broken") {
                return Err(TransportError::Http("connection reset".into()));
            }
            Ok(Vec::new())
        }

        fn get_email(&self, id: &EmailId) -> Result<EmailDetail, TransportError> {
            self.get_calls.fetch_add(1, Ordering::SeqCst);
            if self.slow_id == Some(id.as_str()) {
                thread::sleep(Duration::from_millis(300));
            }
            let generated = self.generate_calls.load(Ordering::SeqCst) > 0;
            Ok(EmailDetail {
                id: id.clone(),
                subject: "Hi".into(),
                sender: "a@example.com".into(),
                body: "body".into(),
                draft: generated.then(|| "AI reply".to_string()),
            })
        }

        fn generate_draft(&self, _id: &EmailId) -> Result<(), TransportError> {
            if self.generate_fails {
                return Err(TransportError::Status {
                    code: 500,
                    body: "model offline".into(),
                });
            }
            self.generate_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn send(&self, id: &EmailId, body: &str) -> Result<SendReceipt, TransportError> {
            self.sent_bodies.lock().unwrap().push(body.to_string());
            Ok(SendReceipt {
                status: "sent".into(),
                to: Some(format!("sender-of-{}", id)),
                body: Some(body.to_string()),
            })
        }

        fn stats(&self) -> Result<InboxStats, TransportError> {
            Ok(InboxStats::default())
        }
    }

    fn tokens() -> (OpToken, OpToken) {
        let mut seq = RequestSequencer::new();
        let a = seq.issue(&EmailId::from("1"), OpKind::Open);
        let b = seq.issue(&EmailId::from("2"), OpKind::Open);
        (a, b)
    }

    #[test]
    fn test_generate_rereads_detail() {
        let transport = FakeTransport::default();
        let (token, _) = tokens();
        let response = execute(
            &transport,
            BackendCommand::GenerateDraft {
                id: EmailId::from("1"),
                token,
            },
        );

        match response {
            BackendResponse::Detail { kind, result, .. } => {
                assert_eq!(kind, OpKind::Generate);
                assert_eq!(result.unwrap().draft.as_deref(), Some("AI reply"));
            }
            _ => panic!("expected detail response"),
        }
        assert_eq!(transport.get_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_generate_skips_reread() {
        let transport = FakeTransport {
            generate_fails: true,
            ..Default::default()
        };
        let (token, _) = tokens();
        let response = execute(
            &transport,
            BackendCommand::GenerateDraft {
                id: EmailId::from("1"),
                token,
            },
        );

        match response {
            BackendResponse::Detail { result, .. } => {
                assert!(matches!(*result, Err(TransportError::Status { code: 500, .. })));
            }
            _ => panic!("expected detail response"),
        }
        assert_eq!(transport.get_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_send_carries_override_body() {
        let transport = FakeTransport::default();
        let (token, _) = tokens();
        let response = execute(
            &transport,
            BackendCommand::SendEmail {
                id: EmailId::from("1"),
                token,
                body: "Thanks".into(),
            },
        );
        match response {
            BackendResponse::Sent { body, result, .. } => {
                assert_eq!(body, "Thanks");
                assert!(result.is_ok());
            }
            _ => panic!("expected sent response"),
        }
        assert_eq!(*transport.sent_bodies.lock().unwrap(), vec!["Thanks".to_string()]);
    }

    #[test]
    fn test_inbox_error_is_returned_with_generation() {
        let transport = FakeTransport::default();
        let response = execute(
            &transport,
            BackendCommand::FetchInbox {
                generation: 7,
                query: InboxQuery {
                    priority: Some("broken".into()),
                    limit: 10,
                },
            },
        );
        match response {
            BackendResponse::Inbox { generation, result } => {
                assert_eq!(generation, 7);
                assert!(result.is_err());
            }
            _ => panic!("expected inbox response"),
        }
    }

    #[test]
    fn test_pool_returns_in_completion_order() {
        let transport = Arc::new(FakeTransport {
            slow_id: Some("1"),
            ..Default::default()
        });
        let (cmd_tx, resp_rx) = spawn(transport, 2);
        let (a, b) = tokens();

        cmd_tx
            .send(BackendCommand::OpenEmail {
                id: EmailId::from("1"),
                token: a,
            })
            .unwrap();
        cmd_tx
            .send(BackendCommand::OpenEmail {
                id: EmailId::from("2"),
                token: b,
            })
            .unwrap();

        let first = resp_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let second = resp_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let ids: Vec<String> = [first, second]
            .iter()
            .map(|r| match r {
                BackendResponse::Detail { id, .. } => id.to_string(),
                _ => panic!("expected detail response"),
            })
            .collect();
        assert_eq!(ids, vec!["2".to_string(), "1".to_string()]);
    }

    #[test]
    fn test_workers_exit_when_sender_dropped() {
        let (cmd_tx, resp_rx) = spawn(Arc::new(FakeTransport::default()), 3);
        drop(cmd_tx);
        // Every worker drops its response sender on exit.
        assert!(matches!(
            resp_rx.recv_timeout(Duration::from_secs(5)),
            Err(mpsc::RecvTimeoutError::Disconnected)
        ));
    }
}
