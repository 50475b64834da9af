//! End-to-end protocol scenarios against the in-memory backend, driven
//! over an in-process duplex stream: literal client bytes in, literal
//! server bytes out.

use std::{io, sync::Arc, time::Duration};

use async_trait::async_trait;
use imapd_server::{
    backend::MemoryBackend,
    config::ImapConfig,
    connection::serve_connection,
    session::{ConnectionInfo, Credentials},
    stream::{BoxedStream, TlsUpgrader},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, DuplexStream},
    task::JoinHandle,
};

struct TestClient {
    stream: DuplexStream,
    buffer: Vec<u8>,
    _server: JoinHandle<()>,
}

impl TestClient {
    async fn connect(config: ImapConfig) -> Self {
        Self::connect_to(config, MemoryBackend::with_demo_user().await).await
    }

    async fn connect_to(config: ImapConfig, backend: MemoryBackend) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();

        let (client, server) = tokio::io::duplex(64 * 1024);

        let server = tokio::spawn(async move {
            let info = ConnectionInfo::default();
            if let Err(error) = serve_connection(
                Box::new(server),
                config,
                Arc::new(backend),
                info,
            )
            .await
            {
                panic!("server task failed: {error:#}");
            }
        });

        Self {
            stream: client,
            buffer: Vec::new(),
            _server: server,
        }
    }

    async fn send(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    /// Reads exactly one CRLF-terminated line.
    async fn line(&mut self) -> String {
        loop {
            if let Some(position) = self
                .buffer
                .windows(2)
                .position(|window| window == b"\r\n")
            {
                let line: Vec<u8> = self.buffer.drain(..position + 2).collect();
                return String::from_utf8_lossy(&line[..line.len() - 2]).into_owned();
            }

            let mut chunk = [0u8; 4096];
            let n = tokio::time::timeout(Duration::from_secs(5), self.stream.read(&mut chunk))
                .await
                .expect("server went quiet")
                .unwrap();
            assert!(n > 0, "server closed while a line was expected");
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }

    /// Collects lines until the tagged completion for `tag` arrives
    /// (inclusive).
    async fn until_tagged(&mut self, tag: &str) -> Vec<String> {
        let mut lines = Vec::new();
        loop {
            let line = self.line().await;
            let done = line.starts_with(&format!("{tag} "));
            lines.push(line);
            if done {
                return lines;
            }
        }
    }

    async fn login(&mut self) {
        self.send(b"a1 LOGIN demouser demopass\r\n").await;
        let lines = self.until_tagged("a1").await;
        assert!(lines.last().unwrap().starts_with("a1 OK"), "{lines:?}");
    }

    async fn select_inbox(&mut self) -> Vec<String> {
        self.send(b"a2 SELECT INBOX\r\n").await;
        self.until_tagged("a2").await
    }
}

#[tokio::test]
async fn greeting_advertises_capabilities() {
    let mut client = TestClient::connect(ImapConfig::default()).await;

    let greeting = client.line().await;
    assert!(greeting.starts_with("* OK [CAPABILITY IMAP4rev1 "), "{greeting}");
    assert!(greeting.contains("AUTH=PLAIN"));
    assert!(greeting.contains("LITERAL+"));
    assert!(greeting.ends_with("Server ready localhost"));
}

#[tokio::test]
async fn login_select_logout() {
    let mut client = TestClient::connect(ImapConfig::default()).await;
    client.line().await;

    client.send(b"a login demouser demopass\r\n").await;
    let lines = client.until_tagged("a").await;
    assert!(lines.last().unwrap().starts_with("a OK"), "{lines:?}");

    client.send(b"b select INBOX\r\n").await;
    let lines = client.until_tagged("b").await;

    assert!(lines.iter().any(|l| l.starts_with("* FLAGS ")), "{lines:?}");
    assert!(lines.contains(&"* 4 EXISTS".to_string()), "{lines:?}");
    assert!(lines.contains(&"* 1 RECENT".to_string()), "{lines:?}");
    assert!(
        lines.iter().any(|l| l.starts_with("* OK [UNSEEN 4]")),
        "{lines:?}"
    );
    assert!(
        lines.iter().any(|l| l.starts_with("* OK [UIDNEXT 105]")),
        "{lines:?}"
    );
    assert!(
        lines
            .iter()
            .any(|l| l.starts_with("* OK [UIDVALIDITY 4097774359]")),
        "{lines:?}"
    );
    assert_eq!(lines.last().unwrap(), "b OK [READ-WRITE] Selected mailbox.");

    client.send(b"c logout\r\n").await;
    assert_eq!(client.line().await, "* BYE Logging out.");
    assert_eq!(client.line().await, "c OK Logout successful.");
}

#[tokio::test]
async fn append_with_non_sync_literal() {
    let mut client = TestClient::connect(ImapConfig::default()).await;
    client.line().await;
    client.login().await;
    client.select_inbox().await;

    client
        .send(b"d append INBOX (\\Flagged) {39+}\r\nFrom: user@example.com\r\n\r\ntest message!\r\n")
        .await;
    let lines = client.until_tagged("d").await;

    assert!(lines.contains(&"* 5 EXISTS".to_string()), "{lines:?}");
    assert!(lines.contains(&"* 2 RECENT".to_string()), "{lines:?}");
    assert_eq!(
        lines.last().unwrap(),
        "d OK [APPENDUID 4097774359 105] APPEND completed."
    );
}

#[tokio::test]
async fn append_with_sync_literal_gets_continuation() {
    let mut client = TestClient::connect(ImapConfig::default()).await;
    client.line().await;
    client.login().await;
    client.select_inbox().await;

    client.send(b"d append INBOX {14}\r\n").await;
    let line = client.line().await;
    assert!(line.starts_with("+ "), "{line}");

    client.send(b"Subject: x\r\n\r\n\r\n").await;
    let lines = client.until_tagged("d").await;
    assert!(
        lines.last().unwrap().starts_with("d OK [APPENDUID "),
        "{lines:?}"
    );
}

#[tokio::test]
async fn multiappend_is_atomic_in_uid_terms() {
    let mut client = TestClient::connect(ImapConfig::default()).await;
    client.line().await;
    client.login().await;
    client.select_inbox().await;

    client
        .send(b"e append INBOX {12+}\r\nSubject: a\r\n (\\Seen) {12+}\r\nSubject: b\r\n\r\n")
        .await;
    let lines = client.until_tagged("e").await;
    assert_eq!(
        lines.last().unwrap(),
        "e OK [APPENDUID 4097774359 105:106] APPEND completed."
    );
}

#[tokio::test]
async fn uid_expunge_reports_descending_sequence_numbers() {
    let mut client = TestClient::connect(ImapConfig::default()).await;
    client.line().await;
    client.login().await;
    client.select_inbox().await;

    // Mark everything but the second message (UID 102) deleted.
    client
        .send(b"f uid store 101,103:104 +FLAGS.SILENT (\\Deleted)\r\n")
        .await;
    let lines = client.until_tagged("f").await;
    assert!(lines.last().unwrap().starts_with("f OK"), "{lines:?}");

    client.send(b"g uid expunge 1:*\r\n").await;
    let lines = client.until_tagged("g").await;

    let expunges: Vec<&String> = lines
        .iter()
        .filter(|line| line.ends_with(" EXPUNGE"))
        .collect();
    assert_eq!(
        expunges,
        vec!["* 4 EXPUNGE", "* 3 EXPUNGE", "* 1 EXPUNGE"],
        "{lines:?}"
    );
    assert_eq!(lines.last().unwrap(), "g OK UID EXPUNGE completed.");

    // UID 102 survived.
    client.send(b"h uid search all\r\n").await;
    let lines = client.until_tagged("h").await;
    assert!(lines.contains(&"* SEARCH 102".to_string()), "{lines:?}");
}

#[tokio::test]
async fn fetch_flags_and_body() {
    let mut client = TestClient::connect(ImapConfig::default()).await;
    client.line().await;
    client.login().await;
    client.select_inbox().await;

    client.send(b"f fetch 2 (UID FLAGS RFC822.SIZE)\r\n").await;
    let lines = client.until_tagged("f").await;
    assert!(
        lines
            .iter()
            .any(|l| l.starts_with("* 2 FETCH (UID 102 FLAGS (\\Seen)")),
        "{lines:?}"
    );

    // A non-peek body fetch sets \Seen on the unseen message 4; the
    // updated flags arrive merged into the same FETCH response.
    client.send(b"g fetch 4 BODY[TEXT]\r\n").await;
    let lines = client.until_tagged("g").await;
    let fetch_line = lines
        .iter()
        .find(|l| l.starts_with("* 4 FETCH "))
        .expect("fetch response");
    assert!(fetch_line.contains("BODY[TEXT] {21}"), "{lines:?}");
    assert!(lines.contains(&"Hiking on Saturday?".to_string()), "{lines:?}");
    assert_eq!(lines.last().unwrap(), "g OK FETCH completed.");

    client.send(b"h fetch 4 FLAGS\r\n").await;
    let lines = client.until_tagged("h").await;
    assert!(
        lines
            .iter()
            .any(|l| l.contains("FLAGS (\\Seen \\Recent)") || l.contains("FLAGS (\\Seen)")),
        "{lines:?}"
    );
}

#[tokio::test]
async fn store_reports_new_flags_unless_silent() {
    let mut client = TestClient::connect(ImapConfig::default()).await;
    client.line().await;
    client.login().await;
    client.select_inbox().await;

    client.send(b"f store 1 +FLAGS (\\Answered)\r\n").await;
    let lines = client.until_tagged("f").await;
    assert!(
        lines
            .iter()
            .any(|l| l.starts_with("* 1 FETCH (FLAGS (\\Answered \\Seen))")),
        "{lines:?}"
    );

    client.send(b"g store 1 +FLAGS.SILENT (\\Draft)\r\n").await;
    let lines = client.until_tagged("g").await;
    assert!(
        !lines.iter().any(|l| l.starts_with("* 1 FETCH")),
        "{lines:?}"
    );
}

#[tokio::test]
async fn search_by_sequence_and_uid() {
    let mut client = TestClient::connect(ImapConfig::default()).await;
    client.line().await;
    client.login().await;
    client.select_inbox().await;

    client.send(b"f search UNSEEN\r\n").await;
    let lines = client.until_tagged("f").await;
    assert!(lines.contains(&"* SEARCH 4".to_string()), "{lines:?}");

    client.send(b"g uid search 2:3\r\n").await;
    let lines = client.until_tagged("g").await;
    assert!(lines.contains(&"* SEARCH 102 103".to_string()), "{lines:?}");

    client.send(b"h search CHARSET KOI8-R ALL\r\n").await;
    let lines = client.until_tagged("h").await;
    assert!(
        lines.last().unwrap().starts_with("h NO [BADCHARSET"),
        "{lines:?}"
    );
}

#[tokio::test]
async fn state_gating_answers_no_with_clientbug() {
    let mut client = TestClient::connect(ImapConfig::default()).await;
    client.line().await;

    // FETCH before authentication.
    client.send(b"a fetch 1 FLAGS\r\n").await;
    let lines = client.until_tagged("a").await;
    assert_eq!(
        lines.last().unwrap(),
        "a NO [CLIENTBUG] FETCH not allowed in the current state."
    );

    // LOGIN twice.
    client.login().await;
    client.send(b"b login demouser demopass\r\n").await;
    let lines = client.until_tagged("b").await;
    assert!(
        lines.last().unwrap().starts_with("b NO [CLIENTBUG]"),
        "{lines:?}"
    );
}

#[tokio::test]
async fn bad_storm_disconnects() {
    let config = ImapConfig {
        bad_command_limit: 3,
        ..ImapConfig::default()
    };
    let mut client = TestClient::connect(config).await;
    client.line().await;

    for i in 0..3 {
        client.send(b"x1 FROBNICATE\r\n").await;
        let line = client.line().await;
        assert!(line.starts_with("x1 BAD"), "line {i}: {line}");
    }

    client.send(b"x1 FROBNICATE\r\n").await;
    assert_eq!(client.line().await, "* BYE Too many bad commands.");
}

#[tokio::test]
async fn examine_is_read_only() {
    let mut client = TestClient::connect(ImapConfig::default()).await;
    client.line().await;
    client.login().await;

    client.send(b"a3 EXAMINE INBOX\r\n").await;
    let lines = client.until_tagged("a3").await;
    assert_eq!(lines.last().unwrap(), "a3 OK [READ-ONLY] Selected mailbox.");

    client.send(b"a4 expunge\r\n").await;
    let lines = client.until_tagged("a4").await;
    assert!(
        lines.last().unwrap().starts_with("a4 NO [READ-ONLY]"),
        "{lines:?}"
    );
}

#[tokio::test]
async fn close_expunges_silently() {
    let mut client = TestClient::connect(ImapConfig::default()).await;
    client.line().await;
    client.login().await;
    client.select_inbox().await;

    client
        .send(b"f store 1 +FLAGS.SILENT (\\Deleted)\r\n")
        .await;
    client.until_tagged("f").await;

    client.send(b"g close\r\n").await;
    let lines = client.until_tagged("g").await;
    assert_eq!(lines, vec!["g OK CLOSE completed."]);

    client.send(b"h select INBOX\r\n").await;
    let lines = client.until_tagged("h").await;
    assert!(lines.contains(&"* 3 EXISTS".to_string()), "{lines:?}");
}

#[tokio::test]
async fn idle_pushes_updates_until_done() {
    let backend = MemoryBackend::with_demo_user().await;
    let mut client = TestClient::connect_to(ImapConfig::default(), backend.clone()).await;
    client.line().await;
    client.login().await;
    client.select_inbox().await;

    client.send(b"i idle\r\n").await;
    assert_eq!(client.line().await, "+ idling");

    // Another connection appends a message.
    let mut other = TestClient::connect_to(ImapConfig::default(), backend).await;
    other.line().await;
    other.login().await;
    other
        .send(b"x append INBOX {12+}\r\nSubject: n\r\n\r\n")
        .await;
    let lines = other.until_tagged("x").await;
    assert!(lines.last().unwrap().starts_with("x OK"), "{lines:?}");

    assert_eq!(client.line().await, "* 5 EXISTS");
    assert_eq!(client.line().await, "* 2 RECENT");

    client.send(b"DONE\r\n").await;
    assert_eq!(client.line().await, "i OK IDLE completed.");
}

#[tokio::test]
async fn idle_rejects_anything_but_done() {
    let mut client = TestClient::connect(ImapConfig::default()).await;
    client.line().await;
    client.login().await;
    client.select_inbox().await;

    client.send(b"i idle\r\n").await;
    assert_eq!(client.line().await, "+ idling");

    client.send(b"j noop\r\n").await;
    let line = client.line().await;
    assert!(line.starts_with("i BAD"), "{line}");
    let line = client.line().await;
    assert!(line.starts_with("* BYE"), "{line}");
}

/// STARTTLS collaborator that swaps in the other half of a fresh duplex
/// pair; the test keeps talking plaintext, which is enough to observe the
/// capability reshaping.
struct PassthroughUpgrader {
    replacement: tokio::sync::Mutex<Option<BoxedStream>>,
}

#[async_trait]
impl TlsUpgrader for PassthroughUpgrader {
    async fn upgrade(&self, old: BoxedStream) -> io::Result<BoxedStream> {
        drop(old);
        Ok(self
            .replacement
            .lock()
            .await
            .take()
            .expect("upgrade happens once"))
    }
}

#[tokio::test]
async fn starttls_reshapes_capabilities() {
    let (replacement_client, replacement_server) = tokio::io::duplex(64 * 1024);

    let config = ImapConfig {
        starttls_enabled: true,
        tls: Some(Arc::new(PassthroughUpgrader {
            replacement: tokio::sync::Mutex::new(Some(Box::new(replacement_server))),
        })),
        ..ImapConfig::default()
    };

    let mut client = TestClient::connect(config).await;
    client.line().await;

    client.send(b"f capability\r\n").await;
    let lines = client.until_tagged("f").await;
    assert!(
        lines.iter().any(|l| l.contains(" STARTTLS")),
        "{lines:?}"
    );

    client.send(b"g starttls\r\n").await;
    assert_eq!(client.line().await, "g OK Begin TLS negotiation now.");

    // Continue on the upgraded transport.
    let mut client = TestClient {
        stream: replacement_client,
        buffer: Vec::new(),
        _server: tokio::spawn(async {}),
    };

    client.send(b"h capability\r\n").await;
    let lines = client.until_tagged("h").await;
    let capability_line = lines
        .iter()
        .find(|l| l.starts_with("* CAPABILITY"))
        .expect("capability data");
    assert!(!capability_line.contains("STARTTLS"), "{lines:?}");
    assert!(capability_line.contains("AUTH=PLAIN"), "{lines:?}");
}

#[tokio::test]
async fn authenticate_plain_with_challenge_roundtrip() {
    let mut client = TestClient::connect(ImapConfig::default()).await;
    client.line().await;

    client.send(b"a AUTHENTICATE PLAIN\r\n").await;
    let line = client.line().await;
    assert_eq!(line, "+ ");

    // base64("\0demouser\0demopass")
    client.send(b"AGRlbW91c2VyAGRlbW9wYXNz\r\n").await;
    let lines = client.until_tagged("a").await;
    assert!(
        lines.last().unwrap().starts_with("a OK [CAPABILITY"),
        "{lines:?}"
    );
}

#[tokio::test]
async fn failed_logins_disconnect_after_limit() {
    let config = ImapConfig {
        bad_auth_limit: 2,
        ..ImapConfig::default()
    };
    let mut client = TestClient::connect(config).await;
    client.line().await;

    client.send(b"a login demouser wrong\r\n").await;
    let lines = client.until_tagged("a").await;
    assert!(
        lines
            .last()
            .unwrap()
            .starts_with("a NO [AUTHENTICATIONFAILED]"),
        "{lines:?}"
    );

    client.send(b"b login demouser wrong\r\n").await;
    let lines = client.until_tagged("b").await;
    assert!(
        lines
            .last()
            .unwrap()
            .starts_with("b NO [AUTHENTICATIONFAILED]"),
        "{lines:?}"
    );
    assert_eq!(client.line().await, "* BYE Too many failed logins.");
}

#[tokio::test]
async fn preauth_greeting_skips_authentication() {
    let config = ImapConfig {
        preauth_credentials: Some(Credentials::new("demouser", "demopass")),
        ..ImapConfig::default()
    };
    let mut client = TestClient::connect(config).await;

    let greeting = client.line().await;
    assert!(greeting.starts_with("* PREAUTH [CAPABILITY"), "{greeting}");

    // Straight to authenticated-state commands.
    client.send(b"a list \"\" *\r\n").await;
    let lines = client.until_tagged("a").await;
    assert!(lines.iter().any(|l| l.contains("INBOX")), "{lines:?}");
    assert!(lines.last().unwrap().starts_with("a OK"), "{lines:?}");
}

#[tokio::test]
async fn status_reports_requested_attributes() {
    let mut client = TestClient::connect(ImapConfig::default()).await;
    client.line().await;
    client.login().await;

    client
        .send(b"a STATUS INBOX (MESSAGES RECENT UIDNEXT UNSEEN)\r\n")
        .await;
    let lines = client.until_tagged("a").await;
    assert!(
        lines.contains(
            &"* STATUS INBOX (MESSAGES 4 RECENT 1 UIDNEXT 105 UNSEEN 1)".to_string()
        ),
        "{lines:?}"
    );
}

#[tokio::test]
async fn copy_reports_copyuid() {
    let mut client = TestClient::connect(ImapConfig::default()).await;
    client.line().await;
    client.login().await;
    client.select_inbox().await;

    client.send(b"a copy 1:2 Trash\r\n").await;
    let lines = client.until_tagged("a").await;
    assert!(
        lines
            .last()
            .unwrap()
            .starts_with("a OK [COPYUID "),
        "{lines:?}"
    );
    assert!(lines.last().unwrap().contains("101:102 1:2"), "{lines:?}");

    client.send(b"b copy 1 NoSuchBox\r\n").await;
    let lines = client.until_tagged("b").await;
    assert!(
        lines.last().unwrap().starts_with("b NO [TRYCREATE]"),
        "{lines:?}"
    );
}

#[tokio::test]
async fn oversized_literal_is_rejected_with_toobig() {
    let config = ImapConfig {
        max_literal_len: 64,
        ..ImapConfig::default()
    };
    let mut client = TestClient::connect(config).await;
    client.line().await;
    client.login().await;

    client.send(b"a append INBOX {5000}\r\n").await;
    let line = client.line().await;
    assert_eq!(line, "a NO [TOOBIG] Literal exceeds maximum size.");
}
