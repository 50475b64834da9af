//! The per-connection state machine and command loop.
//!
//! One task per connection: greet, then alternate between flushing pending
//! mailbox updates, reading a command (driving continuation requests as
//! needed), checking the legality table, delegating to the backend
//! session, and writing the responses. `IDLE` swaps the read loop for a
//! wait-on-change loop until `DONE` arrives.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use imapd_codec::tokio::{Action, CodecMode, Event, ImapServerCodec};
use imapd_types::{
    auth::{AuthMechanism, AuthenticateData},
    command::{Command, CommandBody},
    core::{NonEmptyVec, Tag, Text},
    fetch::{FetchAttribute, FetchAttributeValue, MacroOrFetchAttributes},
    flag::{Flag, FlagPerm, StoreResponse, StoreType},
    mailbox::Mailbox,
    response::{Capability, Code, Continue, Data, Greeting, GreetingKind, Response, Status},
    search::SearchKey,
    secret::Secret,
    sequence::{SeqOrUid, Sequence, SequenceSet},
};
use log::{debug, error, info, warn};
use tokio_util::codec::Framed;

use crate::{
    config::ImapConfig,
    error::ServerError,
    flush::merge_fetch_responses,
    session::{ConnectionInfo, Credentials, LoginProtocol, Session},
    stream::BoxedStream,
    view::{SelectedMailbox, ViewError},
};

/// Runs the IMAP protocol on `stream` until logout or disconnect.
pub async fn serve_connection(
    stream: BoxedStream,
    config: ImapConfig,
    login: Arc<dyn LoginProtocol>,
    info: ConnectionInfo,
) -> anyhow::Result<()> {
    let codec = ImapServerCodec::new(config.max_literal_len as usize);
    let mut connection = Connection {
        framed: Framed::new(stream, codec),
        config,
        login,
        info,
        session: None,
        view: None,
        bad_commands: 0,
        bad_auths: 0,
    };

    let result = connection.run().await;

    if let Some(session) = connection.session.as_mut() {
        if let Err(error) = session.logout().await {
            warn!("backend logout failed: {error}");
        }
    }

    result
}

struct Connection {
    framed: Framed<BoxedStream, ImapServerCodec>,
    config: ImapConfig,
    login: Arc<dyn LoginProtocol>,
    info: ConnectionInfo,
    session: Option<Box<dyn Session>>,
    view: Option<SelectedMailbox>,
    bad_commands: u32,
    bad_auths: u32,
}

/// What the dispatcher tells the command loop to do next.
enum Flow {
    Continue,
    Logout,
    /// Fatal protocol violation or transport-level decision; BYE was sent.
    Close,
}

impl Connection {
    async fn run(&mut self) -> anyhow::Result<()> {
        self.greet().await?;

        loop {
            // Unsolicited updates between commands.
            if self.view.as_mut().is_some_and(SelectedMailbox::has_pending_events) {
                let updates = self.collect_updates(false, false).await?;
                self.send_all(updates).await?;
            }

            let event = match self.framed.next().await {
                Some(Ok(event)) => event,
                Some(Err(error)) => {
                    info!("connection error: {error}");
                    return Ok(());
                }
                None => {
                    debug!("client disconnected");
                    return Ok(());
                }
            };

            match event {
                Event::Command(command) => {
                    debug!("C: {} {}", command.tag, command.body.name());
                    match self.dispatch(command).await? {
                        Flow::Continue => {}
                        Flow::Logout | Flow::Close => return Ok(()),
                    }
                }
                Event::ActionRequired(Action::SendLiteralAck(_)) => {
                    self.send_response(Response::Continue(Continue::basic(
                        None,
                        "Ready for literal data",
                    )?))
                    .await?;
                }
                Event::ActionRequired(Action::SendLiteralReject { tag, length }) => {
                    warn!("rejected literal of {length} bytes");
                    self.send_status(Status::no(
                        tag,
                        Some(Code::TooBig),
                        "Literal exceeds maximum size.",
                    )?)
                    .await?;
                }
                Event::ParsingFailed { tag } => {
                    if self.answer_bad(tag, "Command not parseable.").await? {
                        return Ok(());
                    }
                }
                // The codec is in command mode here.
                Event::AuthenticateData(_) | Event::IdleDone => unreachable!(),
            }
        }
    }

    async fn greet(&mut self) -> anyhow::Result<()> {
        if let Some(credentials) = self.config.preauth_credentials.clone() {
            match self.login.login(credentials, &self.info).await {
                Ok(session) => {
                    self.session = Some(session);
                    let greeting = Greeting::preauth(
                        Some(Code::Capability(self.capabilities())),
                        &format!("Server ready {}", self.config.hostname),
                    )?;
                    self.framed.send(&greeting).await?;
                }
                Err(error) => {
                    error!("preauthentication failed: {error}");
                    let greeting = Greeting {
                        kind: GreetingKind::Bye,
                        code: None,
                        text: Text::try_from("Preauthentication failed")?,
                    };
                    self.framed.send(&greeting).await?;
                    anyhow::bail!("preauthentication failed");
                }
            }
        } else {
            let greeting = Greeting::ok(
                Some(Code::Capability(self.capabilities())),
                &format!("Server ready {}", self.config.hostname),
            )?;
            self.framed.send(&greeting).await?;
        }

        Ok(())
    }

    /// The capability set for the current state (recomputed after STARTTLS
    /// and authentication).
    fn capabilities(&self) -> NonEmptyVec<Capability> {
        let mut capabilities = vec![Capability::Imap4Rev1];

        if self.session.is_none() {
            if self.config.starttls_enabled && !self.info.tls {
                capabilities.push(Capability::StartTls);
            }

            if self.config.reject_insecure_auth && !self.info.tls {
                capabilities.push(Capability::LoginDisabled);
            } else {
                capabilities.push(Capability::Auth(AuthMechanism::Plain));
                capabilities.push(Capability::Auth(AuthMechanism::Login));
            }
        }

        capabilities.push(Capability::LiteralPlus);
        capabilities.push(Capability::MultiAppend);
        capabilities.push(Capability::UidPlus);
        capabilities.push(Capability::Binary);
        capabilities.push(Capability::Enable);
        capabilities.push(Capability::Unselect);
        capabilities.push(Capability::AppendLimit(Some(self.config.max_append_len)));

        if !self.config.disable_idle {
            capabilities.push(Capability::Idle);
        }

        // The vector starts non-empty.
        NonEmptyVec::try_from(capabilities).unwrap()
    }

    // ----- small send helpers -----

    async fn send_response(&mut self, response: Response) -> anyhow::Result<()> {
        self.framed.send(&response).await?;
        Ok(())
    }

    async fn send_status(&mut self, status: Status) -> anyhow::Result<()> {
        self.send_response(Response::Status(status)).await
    }

    async fn send_all(&mut self, responses: Vec<Response>) -> anyhow::Result<()> {
        for response in responses {
            self.framed.feed(&response).await?;
        }
        // The codec encodes both greetings and responses, so the flushed
        // item type has to be spelled out.
        SinkExt::<&Response>::flush(&mut self.framed).await?;
        Ok(())
    }

    /// Sends a BAD and enforces `bad_command_limit`. Once the limit of
    /// consecutive BADs is exhausted, the next violation draws a BYE
    /// instead. Returns `true` when the connection must close.
    async fn answer_bad(&mut self, tag: Option<Tag>, text: &str) -> anyhow::Result<bool> {
        self.bad_commands += 1;

        if self.bad_commands > self.config.bad_command_limit {
            self.send_status(Status::bye(None, "Too many bad commands.")?)
                .await?;
            return Ok(true);
        }

        self.send_status(Status::bad(tag, None, text)?).await?;
        Ok(false)
    }

    // ----- update flushing (the fork-and-diff half of the loop) -----

    /// Re-snapshots the selected mailbox and turns the diff into untagged
    /// responses. `seq_sensitive` suppresses EXPUNGE reporting (RFC 2180);
    /// `uid_context` adds UID items to flag updates.
    async fn collect_updates(
        &mut self,
        seq_sensitive: bool,
        uid_context: bool,
    ) -> anyhow::Result<Vec<Response>> {
        let Some(view) = self.view.as_mut() else {
            return Ok(Vec::new());
        };

        let session = self
            .session
            .as_mut()
            .expect("a view cannot outlive its session");

        let mailbox = view.mailbox().clone();
        match session.snapshot(&mailbox).await {
            Ok(snapshot) => view.update(snapshot),
            Err(error) => {
                warn!("snapshot of {mailbox} failed: {error}");
                return Ok(Vec::new());
            }
        }

        if seq_sensitive {
            view.hide_expunged();
        }

        match view.fork(uid_context) {
            Ok(updates) => Ok(updates),
            Err(ViewError::UidValidityChanged { previous, current }) => {
                warn!("uid validity changed ({previous} -> {current}); closing mailbox");
                self.view = None;
                Ok(vec![Response::Status(Status::bye(
                    None,
                    "Mailbox state is no longer valid.",
                )?)])
            }
        }
    }

    /// Installs a fresh snapshot without producing updates; the next
    /// `collect_updates` will diff against it.
    async fn refresh_view(&mut self) -> anyhow::Result<()> {
        let Some(view) = self.view.as_mut() else {
            return Ok(());
        };

        let session = self
            .session
            .as_mut()
            .expect("a view cannot outlive its session");

        let mailbox = view.mailbox().clone();
        match session.snapshot(&mailbox).await {
            Ok(snapshot) => view.update(snapshot),
            Err(error) => warn!("snapshot of {mailbox} failed: {error}"),
        }

        Ok(())
    }

    // ----- dispatch -----

    /// The command legality table.
    fn allowed(&self, body: &CommandBody) -> bool {
        use CommandBody::*;

        let authenticated = self.session.is_some();
        let selected = self.view.is_some();

        match body {
            Capability | Noop | Logout => true,
            StartTls | Authenticate { .. } | Login { .. } => !authenticated,
            Select { .. } | Examine { .. } | Create { .. } | Delete { .. } | Rename { .. }
            | Subscribe { .. } | Unsubscribe { .. } | List { .. } | Lsub { .. }
            | Status { .. } | Append { .. } | Enable { .. } => authenticated,
            Check | Close | Unselect | Expunge | ExpungeUid { .. } | Search { .. }
            | Fetch { .. } | Store { .. } | Copy { .. } | Idle => selected,
        }
    }

    async fn dispatch(&mut self, command: Command) -> anyhow::Result<Flow> {
        let Command { tag, body } = command;

        if !self.allowed(&body) {
            self.bad_commands = 0;
            self.send_status(Status::no(
                Some(tag),
                Some(Code::ClientBug),
                &format!("{} not allowed in the current state.", body.name()),
            )?)
            .await?;
            return Ok(Flow::Continue);
        }

        let name = body.name();
        let result = self.execute(&tag, body).await?;

        match result {
            Ok(flow) => {
                self.bad_commands = 0;
                Ok(flow)
            }
            Err(error) => {
                self.bad_commands = 0;
                match error {
                    ServerError::CloseConnection(reason) => {
                        self.send_status(Status::bye(None, &reason)?).await?;
                        Ok(Flow::Close)
                    }
                    error => {
                        let status = error_status(&tag, name, &error)?;
                        if let ServerError::Internal(error) = &error {
                            error!("{name} failed: {error:#}");
                        }
                        self.send_status(status).await?;
                        Ok(Flow::Continue)
                    }
                }
            }
        }
    }

    /// Executes one legal command. The outer `Result` is transport
    /// failure; the inner one is the backend verdict.
    async fn execute(
        &mut self,
        tag: &Tag,
        body: CommandBody,
    ) -> anyhow::Result<Result<Flow, ServerError>> {
        match body {
            CommandBody::Capability => {
                let responses = vec![
                    Response::Data(Data::Capability(self.capabilities())),
                    Response::Status(Status::ok(
                        Some(tag.clone()),
                        None,
                        "CAPABILITY completed.",
                    )?),
                ];
                self.send_all(responses).await?;
                Ok(Ok(Flow::Continue))
            }

            CommandBody::Noop => {
                let mut responses = self.collect_updates(false, false).await?;
                responses.push(Response::Status(Status::ok(
                    Some(tag.clone()),
                    None,
                    "NOOP completed.",
                )?));
                self.send_all(merge_fetch_responses(responses)).await?;
                Ok(Ok(Flow::Continue))
            }

            CommandBody::Logout => {
                self.send_status(Status::bye(None, "Logging out.")?).await?;
                self.send_status(Status::ok(Some(tag.clone()), None, "Logout successful.")?)
                    .await?;
                Ok(Ok(Flow::Logout))
            }

            CommandBody::StartTls => self.starttls(tag).await,

            CommandBody::Login { username, password } => {
                if self.config.reject_insecure_auth && !self.info.tls {
                    self.send_status(Status::no(
                        Some(tag.clone()),
                        Some(Code::PrivacyRequired),
                        "LOGIN is disabled on insecure connections.",
                    )?)
                    .await?;
                    return Ok(Ok(Flow::Continue));
                }

                let (Ok(username), Ok(password)) = (
                    String::from_utf8(username.as_bytes().to_vec()),
                    String::from_utf8(password.declassify().as_bytes().to_vec()),
                ) else {
                    self.send_status(Status::bad(
                        Some(tag.clone()),
                        None,
                        "LOGIN arguments must be UTF-8.",
                    )?)
                    .await?;
                    return Ok(Ok(Flow::Continue));
                };

                let credentials = Credentials::new(username, password);
                self.finish_authentication(tag, credentials).await
            }

            CommandBody::Authenticate {
                mechanism,
                initial_response,
            } => self.authenticate(tag, mechanism, initial_response).await,

            CommandBody::Select { mailbox } => self.select(tag, mailbox, false).await,
            CommandBody::Examine { mailbox } => self.select(tag, mailbox, true).await,

            CommandBody::Create { mailbox } => {
                match self.session_mut().create(&mailbox).await {
                    Ok(()) => {
                        self.send_status(Status::ok(
                            Some(tag.clone()),
                            None,
                            "CREATE completed.",
                        )?)
                        .await?;
                        Ok(Ok(Flow::Continue))
                    }
                    Err(error) => Ok(Err(error)),
                }
            }

            CommandBody::Delete { mailbox } => {
                match self.session_mut().delete(&mailbox).await {
                    Ok(()) => {
                        self.send_status(Status::ok(
                            Some(tag.clone()),
                            None,
                            "DELETE completed.",
                        )?)
                        .await?;
                        Ok(Ok(Flow::Continue))
                    }
                    Err(error) => Ok(Err(error)),
                }
            }

            CommandBody::Rename { from, to } => {
                match self.session_mut().rename(&from, &to).await {
                    Ok(()) => {
                        self.send_status(Status::ok(
                            Some(tag.clone()),
                            None,
                            "RENAME completed.",
                        )?)
                        .await?;
                        Ok(Ok(Flow::Continue))
                    }
                    Err(error) => Ok(Err(error)),
                }
            }

            CommandBody::Subscribe { mailbox } => {
                match self.session_mut().subscribe(&mailbox).await {
                    Ok(()) => {
                        self.send_status(Status::ok(
                            Some(tag.clone()),
                            None,
                            "SUBSCRIBE completed.",
                        )?)
                        .await?;
                        Ok(Ok(Flow::Continue))
                    }
                    Err(error) => Ok(Err(error)),
                }
            }

            CommandBody::Unsubscribe { mailbox } => {
                match self.session_mut().unsubscribe(&mailbox).await {
                    Ok(()) => {
                        self.send_status(Status::ok(
                            Some(tag.clone()),
                            None,
                            "UNSUBSCRIBE completed.",
                        )?)
                        .await?;
                        Ok(Ok(Flow::Continue))
                    }
                    Err(error) => Ok(Err(error)),
                }
            }

            CommandBody::List { reference, pattern } => {
                match self
                    .session_mut()
                    .list(reference.as_str(), pattern.as_str(), false)
                    .await
                {
                    Ok(entries) => {
                        let mut responses: Vec<Response> = entries
                            .into_iter()
                            .map(|entry| {
                                Ok(Response::Data(Data::List {
                                    items: entry.attributes,
                                    delimiter: entry
                                        .delimiter
                                        .map(imapd_types::core::QuotedChar::try_from)
                                        .transpose()
                                        .map_err(anyhow::Error::from)?,
                                    mailbox: entry.mailbox,
                                }))
                            })
                            .collect::<anyhow::Result<_>>()?;
                        responses.push(Response::Status(Status::ok(
                            Some(tag.clone()),
                            None,
                            "LIST completed.",
                        )?));
                        self.send_all(responses).await?;
                        Ok(Ok(Flow::Continue))
                    }
                    Err(error) => Ok(Err(error)),
                }
            }

            CommandBody::Lsub { reference, pattern } => {
                match self
                    .session_mut()
                    .list(reference.as_str(), pattern.as_str(), true)
                    .await
                {
                    Ok(entries) => {
                        let mut responses: Vec<Response> = entries
                            .into_iter()
                            .map(|entry| {
                                Ok(Response::Data(Data::Lsub {
                                    items: entry.attributes,
                                    delimiter: entry
                                        .delimiter
                                        .map(imapd_types::core::QuotedChar::try_from)
                                        .transpose()
                                        .map_err(anyhow::Error::from)?,
                                    mailbox: entry.mailbox,
                                }))
                            })
                            .collect::<anyhow::Result<_>>()?;
                        responses.push(Response::Status(Status::ok(
                            Some(tag.clone()),
                            None,
                            "LSUB completed.",
                        )?));
                        self.send_all(responses).await?;
                        Ok(Ok(Flow::Continue))
                    }
                    Err(error) => Ok(Err(error)),
                }
            }

            CommandBody::Status {
                mailbox,
                attributes,
            } => match self.session_mut().status(&mailbox, &attributes).await {
                Ok(items) => {
                    let responses = vec![
                        Response::Data(Data::Status { mailbox, items }),
                        Response::Status(Status::ok(Some(tag.clone()), None, "STATUS completed.")?),
                    ];
                    self.send_all(responses).await?;
                    Ok(Ok(Flow::Continue))
                }
                Err(error) => Ok(Err(error)),
            },

            CommandBody::Append { mailbox, messages } => {
                for message in messages.iter() {
                    if message.message.data().len() as u64 > self.config.max_append_len as u64 {
                        self.send_status(Status::no(
                            Some(tag.clone()),
                            Some(Code::TooBig),
                            "Message exceeds the append limit.",
                        )?)
                        .await?;
                        return Ok(Ok(Flow::Continue));
                    }
                }

                match self
                    .session_mut()
                    .append(&mailbox, messages.as_slice())
                    .await
                {
                    Ok(result) => {
                        let mut responses = self.collect_updates(false, false).await?;
                        responses.push(Response::Status(Status::ok(
                            Some(tag.clone()),
                            Some(Code::AppendUid {
                                uid_validity: result.uid_validity,
                                uids: uid_set(&result.uids)
                                    .expect("APPEND assigns at least one UID"),
                            }),
                            "APPEND completed.",
                        )?));
                        self.send_all(merge_fetch_responses(responses)).await?;
                        Ok(Ok(Flow::Continue))
                    }
                    Err(error) => Ok(Err(error)),
                }
            }

            CommandBody::Enable { extensions } => {
                // Nothing beyond the base set can be enabled today; report
                // the (empty) intersection as RFC 5161 requires.
                debug!(
                    "ENABLE requested: {:?}",
                    extensions.iter().map(|e| e.as_ref()).collect::<Vec<_>>()
                );
                let responses = vec![
                    Response::Data(Data::Enabled { extensions: vec![] }),
                    Response::Status(Status::ok(Some(tag.clone()), None, "ENABLE completed.")?),
                ];
                self.send_all(responses).await?;
                Ok(Ok(Flow::Continue))
            }

            CommandBody::Check => {
                let mailbox = self.selected_mailbox();
                match self.session_mut().check(&mailbox).await {
                    Ok(()) => {
                        let mut responses = self.collect_updates(false, false).await?;
                        responses.push(Response::Status(Status::ok(
                            Some(tag.clone()),
                            None,
                            "CHECK completed.",
                        )?));
                        self.send_all(merge_fetch_responses(responses)).await?;
                        Ok(Ok(Flow::Continue))
                    }
                    Err(error) => Ok(Err(error)),
                }
            }

            CommandBody::Close => {
                let mailbox = self.selected_mailbox();
                let expunge = !self.view_ref().read_only();
                match self.session_mut().close(&mailbox, expunge).await {
                    Ok(()) => {
                        // No EXPUNGE responses on CLOSE.
                        self.view = None;
                        self.send_status(Status::ok(Some(tag.clone()), None, "CLOSE completed.")?)
                            .await?;
                        Ok(Ok(Flow::Continue))
                    }
                    Err(error) => Ok(Err(error)),
                }
            }

            CommandBody::Unselect => {
                let mailbox = self.selected_mailbox();
                match self.session_mut().close(&mailbox, false).await {
                    Ok(()) => {
                        self.view = None;
                        self.send_status(Status::ok(
                            Some(tag.clone()),
                            None,
                            "UNSELECT completed.",
                        )?)
                        .await?;
                        Ok(Ok(Flow::Continue))
                    }
                    Err(error) => Ok(Err(error)),
                }
            }

            CommandBody::Expunge => {
                let mailbox = self.selected_mailbox();
                match self.session_mut().expunge(&mailbox, None).await {
                    Ok(expunged) => {
                        debug!("expunged {} messages", expunged.len());
                        let mut responses = self.collect_updates(false, false).await?;
                        responses.push(Response::Status(Status::ok(
                            Some(tag.clone()),
                            None,
                            "EXPUNGE completed.",
                        )?));
                        self.send_all(merge_fetch_responses(responses)).await?;
                        Ok(Ok(Flow::Continue))
                    }
                    Err(error) => Ok(Err(error)),
                }
            }

            CommandBody::ExpungeUid { sequence_set } => {
                let mailbox = self.selected_mailbox();
                // Unknown UIDs are silently ignored (RFC 4315).
                let uids = self.resolve_uids(&sequence_set);
                match self.session_mut().expunge(&mailbox, Some(&uids)).await {
                    Ok(_expunged) => {
                        let mut responses = self.collect_updates(false, true).await?;
                        responses.push(Response::Status(Status::ok(
                            Some(tag.clone()),
                            None,
                            "UID EXPUNGE completed.",
                        )?));
                        self.send_all(merge_fetch_responses(responses)).await?;
                        Ok(Ok(Flow::Continue))
                    }
                    Err(error) => Ok(Err(error)),
                }
            }

            CommandBody::Search {
                charset,
                criteria,
                uid,
            } => self.search(tag, charset, criteria, uid).await,

            CommandBody::Fetch {
                sequence_set,
                attributes,
                uid,
            } => self.fetch(tag, sequence_set, attributes, uid).await,

            CommandBody::Store {
                sequence_set,
                kind,
                response,
                flags,
                uid,
            } => self.store(tag, sequence_set, kind, response, flags, uid).await,

            CommandBody::Copy {
                sequence_set,
                mailbox,
                uid,
            } => self.copy(tag, sequence_set, mailbox, uid).await,

            CommandBody::Idle => self.idle(tag).await,
        }
    }

    // ----- helpers over the selected state -----

    fn session_mut(&mut self) -> &mut Box<dyn Session> {
        self.session
            .as_mut()
            .expect("the legality table admits only authenticated commands here")
    }

    fn view_ref(&self) -> &SelectedMailbox {
        self.view
            .as_ref()
            .expect("the legality table admits only selected commands here")
    }

    fn selected_mailbox(&self) -> Mailbox {
        self.view_ref().mailbox().clone()
    }

    /// Resolves a UID set against the client-visible snapshot; unknown
    /// UIDs drop out silently.
    fn resolve_uids(&self, set: &SequenceSet) -> Vec<u32> {
        let known = self.view_ref().known();
        let largest = known.max_uid();

        known
            .uids
            .iter()
            .copied()
            .filter(|uid| set.contains(*uid, largest))
            .collect()
    }

    /// Resolves a sequence-number set against the client-visible snapshot.
    fn resolve_seqs(&self, set: &SequenceSet) -> Vec<u32> {
        let known = self.view_ref().known();

        set.iter(known.exists())
            .filter_map(|seq| known.uid_of_seq(seq))
            .collect()
    }

    // ----- STARTTLS -----

    async fn starttls(&mut self, tag: &Tag) -> anyhow::Result<Result<Flow, ServerError>> {
        if !self.config.starttls_enabled || self.info.tls {
            self.send_status(Status::no(
                Some(tag.clone()),
                None,
                "STARTTLS is not available.",
            )?)
            .await?;
            return Ok(Ok(Flow::Continue));
        }

        let Some(upgrader) = self.config.tls.clone() else {
            self.send_status(Status::no(
                Some(tag.clone()),
                None,
                "STARTTLS is not configured.",
            )?)
            .await?;
            return Ok(Ok(Flow::Continue));
        };

        self.send_status(Status::ok(
            Some(tag.clone()),
            None,
            "Begin TLS negotiation now.",
        )?)
        .await?;

        // Swap the transport underneath the codec. Anything the client
        // pipelined after STARTTLS is discarded, per RFC 3501.
        let placeholder = Framed::new(
            Box::new(tokio::io::empty()) as BoxedStream,
            ImapServerCodec::new(self.config.max_literal_len as usize),
        );
        let framed = std::mem::replace(&mut self.framed, placeholder);
        let stream = framed.into_inner();

        match upgrader.upgrade(stream).await {
            Ok(upgraded) => {
                self.framed = Framed::new(
                    upgraded,
                    ImapServerCodec::new(self.config.max_literal_len as usize),
                );
                self.info.tls = true;
                info!("connection upgraded to TLS");
                Ok(Ok(Flow::Continue))
            }
            Err(error) => {
                error!("TLS handshake failed: {error}");
                Ok(Err(ServerError::CloseConnection(
                    "TLS negotiation failed.".into(),
                )))
            }
        }
    }

    // ----- authentication -----

    async fn authenticate(
        &mut self,
        tag: &Tag,
        mechanism: AuthMechanism,
        initial_response: Option<Secret<Vec<u8>>>,
    ) -> anyhow::Result<Result<Flow, ServerError>> {
        if self.config.reject_insecure_auth && !self.info.tls {
            self.send_status(Status::no(
                Some(tag.clone()),
                Some(Code::PrivacyRequired),
                "AUTHENTICATE is disabled on insecure connections.",
            )?)
            .await?;
            return Ok(Ok(Flow::Continue));
        }

        let credentials = match mechanism {
            AuthMechanism::Plain => {
                let payload = match initial_response {
                    Some(secret) => secret,
                    None => match self.read_authenticate_data(&[]).await? {
                        Some(secret) => secret,
                        None => {
                            self.send_status(Status::bad(
                                Some(tag.clone()),
                                None,
                                "AUTHENTICATE cancelled.",
                            )?)
                            .await?;
                            return Ok(Ok(Flow::Continue));
                        }
                    },
                };

                match parse_sasl_plain(payload.declassify()) {
                    Some(credentials) => credentials,
                    None => {
                        self.send_status(Status::bad(
                            Some(tag.clone()),
                            None,
                            "Invalid PLAIN exchange.",
                        )?)
                        .await?;
                        return Ok(Ok(Flow::Continue));
                    }
                }
            }
            AuthMechanism::Login => {
                let username = self.read_authenticate_data(b"Username:").await?;
                let Some(username) = username else {
                    self.send_status(Status::bad(
                        Some(tag.clone()),
                        None,
                        "AUTHENTICATE cancelled.",
                    )?)
                    .await?;
                    return Ok(Ok(Flow::Continue));
                };

                let password = self.read_authenticate_data(b"Password:").await?;
                let Some(password) = password else {
                    self.send_status(Status::bad(
                        Some(tag.clone()),
                        None,
                        "AUTHENTICATE cancelled.",
                    )?)
                    .await?;
                    return Ok(Ok(Flow::Continue));
                };

                let (Ok(username), Ok(password)) = (
                    String::from_utf8(username.declassify().clone()),
                    String::from_utf8(password.declassify().clone()),
                ) else {
                    self.send_status(Status::bad(
                        Some(tag.clone()),
                        None,
                        "Invalid LOGIN exchange.",
                    )?)
                    .await?;
                    return Ok(Ok(Flow::Continue));
                };

                Credentials::new(username, password)
            }
            AuthMechanism::Other(name) => {
                self.send_status(Status::no(
                    Some(tag.clone()),
                    Some(Code::Cannot),
                    &format!("Mechanism {name} is not supported."),
                )?)
                .await?;
                return Ok(Ok(Flow::Continue));
            }
        };

        self.finish_authentication(tag, credentials).await
    }

    /// Sends a base64 challenge and reads one continuation line.
    /// `None` means the client cancelled with `*`.
    async fn read_authenticate_data(
        &mut self,
        challenge: &[u8],
    ) -> anyhow::Result<Option<Secret<Vec<u8>>>> {
        self.send_response(Response::Continue(Continue::Base64(challenge.to_vec())))
            .await?;

        self.framed.codec_mut().set_mode(CodecMode::AuthenticateData);
        let event = self.framed.next().await;
        self.framed.codec_mut().set_mode(CodecMode::Command);

        match event {
            Some(Ok(Event::AuthenticateData(AuthenticateData::Continue(secret)))) => {
                Ok(Some(secret))
            }
            Some(Ok(Event::AuthenticateData(AuthenticateData::Cancel))) => Ok(None),
            Some(Ok(Event::ParsingFailed { .. })) => Ok(None),
            Some(Ok(_)) => unreachable!("codec is in authenticate-data mode"),
            Some(Err(error)) => Err(error.into()),
            None => anyhow::bail!("client disconnected during AUTHENTICATE"),
        }
    }

    async fn finish_authentication(
        &mut self,
        tag: &Tag,
        credentials: Credentials,
    ) -> anyhow::Result<Result<Flow, ServerError>> {
        match self.login.login(credentials, &self.info).await {
            Ok(session) => {
                self.session = Some(session);
                self.bad_auths = 0;
                self.send_status(Status::ok(
                    Some(tag.clone()),
                    Some(Code::Capability(self.capabilities())),
                    "Authentication successful.",
                )?)
                .await?;
                Ok(Ok(Flow::Continue))
            }
            Err(ServerError::InvalidAuth) => {
                self.bad_auths += 1;
                if self.bad_auths >= self.config.bad_auth_limit {
                    self.send_status(Status::no(
                        Some(tag.clone()),
                        Some(Code::AuthenticationFailed),
                        "Invalid authentication credentials.",
                    )?)
                    .await?;
                    self.send_status(Status::bye(None, "Too many failed logins.")?)
                        .await?;
                    return Ok(Ok(Flow::Close));
                }

                self.send_status(Status::no(
                    Some(tag.clone()),
                    Some(Code::AuthenticationFailed),
                    "Invalid authentication credentials.",
                )?)
                .await?;
                Ok(Ok(Flow::Continue))
            }
            Err(error) => Ok(Err(error)),
        }
    }

    // ----- selection -----

    async fn select(
        &mut self,
        tag: &Tag,
        mailbox: Mailbox,
        read_only: bool,
    ) -> anyhow::Result<Result<Flow, ServerError>> {
        // Re-selecting discards the previous selection cleanly, without
        // EXPUNGE responses and without the CLOSE expunge.
        if let Some(view) = self.view.take() {
            let previous = view.mailbox().clone();
            if let Err(error) = self.session_mut().close(&previous, false).await {
                warn!("closing {previous} failed: {error}");
            }
        }

        let selected = match self.session_mut().select(&mailbox, read_only).await {
            Ok(selected) => selected,
            Err(error) => return Ok(Err(error)),
        };

        let snapshot = selected.snapshot;
        let read_only = read_only || snapshot.read_only;

        let mut responses = vec![
            Response::Data(Data::Flags(snapshot.permanent_flags.clone())),
            Response::Data(Data::Exists(snapshot.exists())),
            Response::Data(Data::Recent(snapshot.recent_count())),
        ];

        if let Some(unseen) = snapshot.first_unseen_seq() {
            responses.push(Response::Status(Status::ok(
                None,
                Some(Code::Unseen(unseen)),
                "First unseen.",
            )?));
        }

        let mut permanent: Vec<FlagPerm> = snapshot
            .permanent_flags
            .iter()
            .cloned()
            .map(FlagPerm::Flag)
            .collect();
        permanent.push(FlagPerm::Asterisk);
        responses.push(Response::Status(Status::ok(
            None,
            Some(Code::PermanentFlags(permanent)),
            "Flags permitted.",
        )?));

        responses.push(Response::Status(Status::ok(
            None,
            Some(Code::UidNext(snapshot.next_uid)),
            "Predicted next UID.",
        )?));
        responses.push(Response::Status(Status::ok(
            None,
            Some(Code::UidValidity(snapshot.uid_validity)),
            "UIDs valid.",
        )?));

        responses.push(Response::Status(Status::ok(
            Some(tag.clone()),
            Some(if read_only {
                Code::ReadOnly
            } else {
                Code::ReadWrite
            }),
            "Selected mailbox.",
        )?));

        self.view = Some(SelectedMailbox::new(
            mailbox,
            read_only,
            snapshot,
            selected.events,
        ));

        self.send_all(responses).await?;
        Ok(Ok(Flow::Continue))
    }

    // ----- message commands -----

    async fn search(
        &mut self,
        tag: &Tag,
        charset: Option<imapd_types::core::Charset>,
        criteria: SearchKey,
        uid: bool,
    ) -> anyhow::Result<Result<Flow, ServerError>> {
        if let Some(charset) = charset {
            if !matches!(
                charset.as_str().to_ascii_uppercase().as_str(),
                "US-ASCII" | "UTF-8"
            ) {
                return Ok(Err(ServerError::SearchNotAllowed(Some(Code::BadCharset {
                    allowed: vec![
                        imapd_types::core::Charset::try_from("US-ASCII")
                            .map_err(anyhow::Error::from)?,
                        imapd_types::core::Charset::try_from("UTF-8")
                            .map_err(anyhow::Error::from)?,
                    ],
                }))));
            }
        }

        // Sequence-number keys are resolved against this connection's view
        // before the backend sees them; the backend works in UIDs only.
        let criteria = self.resolve_search_key(criteria);
        let mailbox = self.selected_mailbox();

        match self.session_mut().search(&mailbox, &criteria).await {
            Ok(uids) => {
                let result: Vec<u32> = if uid {
                    uids
                } else {
                    let known = self.view_ref().known();
                    uids.iter().filter_map(|u| known.seq_of_uid(*u)).collect()
                };

                let mut responses = vec![Response::Data(Data::Search(result))];
                responses.extend(self.collect_updates(!uid, uid).await?);
                responses.push(Response::Status(Status::ok(
                    Some(tag.clone()),
                    None,
                    if uid {
                        "UID SEARCH completed."
                    } else {
                        "SEARCH completed."
                    },
                )?));
                self.send_all(merge_fetch_responses(responses)).await?;
                Ok(Ok(Flow::Continue))
            }
            Err(error) => Ok(Err(error)),
        }
    }

    /// Rewrites sequence-number keys into UID keys using the client's view
    /// of the mailbox.
    fn resolve_search_key(&self, key: SearchKey) -> SearchKey {
        match key {
            SearchKey::SequenceSet(set) => {
                let uids = self.resolve_seqs(&set);
                match uid_set(&uids) {
                    Some(set) => SearchKey::Uid(set),
                    // Matches nothing.
                    None => SearchKey::Not(Box::new(SearchKey::All)),
                }
            }
            SearchKey::And(keys) => {
                let keys: Vec<SearchKey> = keys
                    .into_iter()
                    .map(|key| self.resolve_search_key(key))
                    .collect();
                // Mapping preserves length.
                SearchKey::And(NonEmptyVec::try_from(keys).unwrap())
            }
            SearchKey::Or(left, right) => SearchKey::Or(
                Box::new(self.resolve_search_key(*left)),
                Box::new(self.resolve_search_key(*right)),
            ),
            SearchKey::Not(inner) => SearchKey::Not(Box::new(self.resolve_search_key(*inner))),
            other => other,
        }
    }

    async fn fetch(
        &mut self,
        tag: &Tag,
        sequence_set: SequenceSet,
        attributes: MacroOrFetchAttributes,
        uid: bool,
    ) -> anyhow::Result<Result<Flow, ServerError>> {
        let uids = if uid {
            self.resolve_uids(&sequence_set)
        } else {
            self.resolve_seqs(&sequence_set)
        };

        let mut attributes = attributes.expand();
        // UID FETCH implicitly fetches the UID.
        if uid && !attributes.contains(&FetchAttribute::Uid) {
            attributes.push(FetchAttribute::Uid);
        }

        let mailbox = self.selected_mailbox();
        match self.session_mut().fetch(&mailbox, &uids, &attributes).await {
            Ok(messages) => {
                let mut responses = Vec::with_capacity(messages.len() + 2);
                for (message_uid, values) in messages {
                    let Some(seq) = self.view_ref().known().seq_of_uid(message_uid) else {
                        continue;
                    };
                    if let Ok(attributes) = NonEmptyVec::try_from(values) {
                        responses.push(Response::Data(Data::Fetch { seq, attributes }));
                    }
                }

                responses.extend(self.collect_updates(!uid, uid).await?);
                responses.push(Response::Status(Status::ok(
                    Some(tag.clone()),
                    None,
                    if uid {
                        "UID FETCH completed."
                    } else {
                        "FETCH completed."
                    },
                )?));
                self.send_all(merge_fetch_responses(responses)).await?;
                Ok(Ok(Flow::Continue))
            }
            Err(error) => Ok(Err(error)),
        }
    }

    async fn store(
        &mut self,
        tag: &Tag,
        sequence_set: SequenceSet,
        kind: StoreType,
        response: StoreResponse,
        flags: Vec<Flag>,
        uid: bool,
    ) -> anyhow::Result<Result<Flow, ServerError>> {
        let uids = if uid {
            self.resolve_uids(&sequence_set)
        } else {
            self.resolve_seqs(&sequence_set)
        };

        // `\Recent` cannot be altered by the client.
        let flags: Vec<Flag> = flags
            .into_iter()
            .filter(|flag| match flag {
                Flag::Extension(atom) => !atom.as_ref().eq_ignore_ascii_case("recent"),
                _ => true,
            })
            .collect();

        let read_only = self.view_ref().read_only();
        let mailbox = self.selected_mailbox();

        let stored: Vec<(u32, Vec<_>)> = if read_only {
            // Flags against a read-only selection live only in this
            // session's view.
            let view = self.view.as_mut().expect("selected");
            match kind {
                StoreType::Add | StoreType::Replace => {
                    for message_uid in &uids {
                        view.add_session_flags(*message_uid, flags.iter().cloned());
                    }
                }
                StoreType::Remove => {}
            }
            uids.iter()
                .map(|message_uid| (*message_uid, view.fetch_flags(*message_uid)))
                .collect()
        } else {
            match self.session_mut().store(&mailbox, &uids, kind, &flags).await {
                Ok(result) => {
                    // Refresh the current snapshot (without forking) so the
                    // reported flags include the session overlay and
                    // `\Recent`.
                    self.refresh_view().await?;
                    result
                        .iter()
                        .map(|(message_uid, _)| {
                            (*message_uid, self.view_ref().fetch_flags(*message_uid))
                        })
                        .collect()
                }
                Err(error) => return Ok(Err(error)),
            }
        };

        let mut responses = Vec::new();

        match response {
            StoreResponse::Silent => {
                let view = self.view.as_mut().expect("selected");
                for (message_uid, _) in &stored {
                    view.assimilate_flags(*message_uid);
                }
            }
            StoreResponse::Answer => {
                for (message_uid, flags) in stored {
                    let Some(seq) = self.view_ref().known().seq_of_uid(message_uid) else {
                        continue;
                    };

                    let mut values = Vec::new();
                    if uid {
                        values.push(FetchAttributeValue::Uid(message_uid));
                    }
                    values.push(FetchAttributeValue::Flags(flags));

                    responses.push(Response::Data(Data::Fetch {
                        seq,
                        // At least the FLAGS item is present.
                        attributes: NonEmptyVec::try_from(values).unwrap(),
                    }));

                    let view = self.view.as_mut().expect("selected");
                    view.assimilate_flags(message_uid);
                }
            }
        }

        responses.extend(self.collect_updates(!uid, uid).await?);
        responses.push(Response::Status(Status::ok(
            Some(tag.clone()),
            None,
            if uid {
                "UID STORE completed."
            } else {
                "STORE completed."
            },
        )?));
        self.send_all(merge_fetch_responses(responses)).await?;
        Ok(Ok(Flow::Continue))
    }

    async fn copy(
        &mut self,
        tag: &Tag,
        sequence_set: SequenceSet,
        destination: Mailbox,
        uid: bool,
    ) -> anyhow::Result<Result<Flow, ServerError>> {
        let uids = if uid {
            self.resolve_uids(&sequence_set)
        } else {
            self.resolve_seqs(&sequence_set)
        };

        let mailbox = self.selected_mailbox();
        match self.session_mut().copy(&mailbox, &uids, &destination).await {
            Ok(result) => {
                let code = match (uid_set(&result.source_uids), uid_set(&result.destination_uids))
                {
                    (Some(source), Some(destination)) => Some(Code::CopyUid {
                        uid_validity: result.uid_validity,
                        source,
                        destination,
                    }),
                    _ => None,
                };

                let mut responses = self.collect_updates(!uid, uid).await?;
                responses.push(Response::Status(Status::ok(
                    Some(tag.clone()),
                    code,
                    if uid {
                        "UID COPY completed."
                    } else {
                        "COPY completed."
                    },
                )?));
                self.send_all(merge_fetch_responses(responses)).await?;
                Ok(Ok(Flow::Continue))
            }
            Err(error) => Ok(Err(error)),
        }
    }

    // ----- IDLE -----

    async fn idle(&mut self, tag: &Tag) -> anyhow::Result<Result<Flow, ServerError>> {
        if self.config.disable_idle {
            self.send_status(Status::no(Some(tag.clone()), None, "IDLE is disabled.")?)
                .await?;
            return Ok(Ok(Flow::Continue));
        }

        self.send_response(Response::Continue(Continue::basic(None, "idling")?))
            .await?;
        self.framed.codec_mut().set_mode(CodecMode::IdleDone);

        let deadline = tokio::time::Instant::now() + self.config.idle_timeout;

        let outcome = loop {
            // A view always exists here (IDLE is a selected-state command),
            // but the borrow of `self.framed` forces the split below.
            let view = self.view.as_mut().expect("selected");

            tokio::select! {
                event = self.framed.next() => match event {
                    Some(Ok(Event::IdleDone)) => break IdleOutcome::Done,
                    Some(Ok(Event::ParsingFailed { .. })) => break IdleOutcome::Violated,
                    Some(Ok(_)) => unreachable!("codec is in idle-done mode"),
                    Some(Err(error)) => {
                        info!("connection error during IDLE: {error}");
                        break IdleOutcome::Disconnected;
                    }
                    None => break IdleOutcome::Disconnected,
                },
                changed = view.changed() => {
                    if changed.is_err() {
                        // The backend dropped the notifier; treat it like
                        // a quiet mailbox.
                        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                        continue;
                    }

                    let updates = self.collect_updates(false, false).await?;
                    self.send_all(merge_fetch_responses(updates)).await?;
                }
                _ = tokio::time::sleep_until(deadline) => break IdleOutcome::TimedOut,
            }
        };

        self.framed.codec_mut().set_mode(CodecMode::Command);

        match outcome {
            IdleOutcome::Done => {
                self.send_status(Status::ok(Some(tag.clone()), None, "IDLE completed.")?)
                    .await?;
                Ok(Ok(Flow::Continue))
            }
            IdleOutcome::Violated => {
                self.send_status(Status::bad(
                    Some(tag.clone()),
                    None,
                    "Expected DONE.",
                )?)
                .await?;
                Ok(Err(ServerError::CloseConnection(
                    "IDLE protocol violation.".into(),
                )))
            }
            IdleOutcome::TimedOut => Ok(Err(ServerError::CloseConnection(
                "IDLE timed out.".into(),
            ))),
            IdleOutcome::Disconnected => Ok(Ok(Flow::Close)),
        }
    }
}

enum IdleOutcome {
    Done,
    Violated,
    TimedOut,
    Disconnected,
}

/// Compresses ascending UIDs into the compact `uid-set` form
/// (`1:3,5,7:9`). Returns `None` for an empty slice.
fn uid_set(uids: &[u32]) -> Option<SequenceSet> {
    let mut sequences: Vec<Sequence> = Vec::new();
    let mut run: Option<(u32, u32)> = None;

    for &uid in uids {
        run = match run {
            None => Some((uid, uid)),
            Some((start, end)) if uid == end + 1 => Some((start, uid)),
            Some((start, end)) => {
                sequences.push(range_to_sequence(start, end));
                Some((uid, uid))
            }
        };
    }

    if let Some((start, end)) = run {
        sequences.push(range_to_sequence(start, end));
    }

    SequenceSet::try_from(sequences).ok()
}

fn range_to_sequence(start: u32, end: u32) -> Sequence {
    // UIDs are non-zero by construction.
    let start = SeqOrUid::Value(start.try_into().unwrap());
    if start == SeqOrUid::Value(end.try_into().unwrap()) {
        Sequence::Single(start)
    } else {
        Sequence::Range(start, SeqOrUid::Value(end.try_into().unwrap()))
    }
}

/// Maps a backend error to its IMAP completion, per the taxonomy.
fn error_status(tag: &Tag, command: &str, error: &ServerError) -> anyhow::Result<Status> {
    let tag = Some(tag.clone());

    let status = match error {
        ServerError::InvalidAuth => Status::no(
            tag,
            Some(Code::AuthenticationFailed),
            "Invalid authentication credentials.",
        )?,
        ServerError::AuthorizationFailed => {
            Status::no(tag, Some(Code::AuthorizationFailed), "Not authorized.")?
        }
        ServerError::MailboxNotFound(name) => {
            // APPEND and COPY hint that creating the mailbox would help.
            let code = if matches!(command, "APPEND" | "COPY" | "UID COPY") {
                Code::TryCreate
            } else {
                Code::Nonexistent
            };
            Status::no(tag, Some(code), &format!("Mailbox {name} does not exist."))?
        }
        ServerError::MailboxConflict(name) => Status::no(
            tag,
            Some(Code::AlreadyExists),
            &format!("Mailbox {name} already exists."),
        )?,
        ServerError::MailboxHasChildren(name) => Status::no(
            tag,
            None,
            &format!("Mailbox {name} has inferior mailboxes."),
        )?,
        ServerError::MailboxReadOnly(name) => Status::no(
            tag,
            Some(Code::ReadOnly),
            &format!("Mailbox {name} is read-only."),
        )?,
        ServerError::AppendFailure(code) => {
            Status::no(tag, code.clone(), "APPEND failed.")?
        }
        ServerError::SearchNotAllowed(code) => {
            Status::no(tag, code.clone(), "SEARCH not possible.")?
        }
        ServerError::CloseConnection(_) => unreachable!("handled by the dispatcher"),
        ServerError::Internal(_) => {
            Status::no(tag, None, &format!("{command} failed."))?
        }
    };

    Ok(status)
}

/// RFC 4616: `[authzid] NUL authcid NUL passwd`.
fn parse_sasl_plain(payload: &[u8]) -> Option<Credentials> {
    let mut parts = payload.splitn(3, |byte| *byte == 0);
    let authzid = parts.next()?;
    let authcid = parts.next()?;
    let password = parts.next()?;

    let authzid = std::str::from_utf8(authzid).ok()?;
    let authcid = std::str::from_utf8(authcid).ok()?.to_owned();
    let password = std::str::from_utf8(password).ok()?.to_owned();

    if authcid.is_empty() {
        return None;
    }

    let mut credentials = Credentials::new(authcid, password);
    if !authzid.is_empty() {
        credentials.authzid = Some(authzid.to_owned());
    }

    Some(credentials)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sasl_plain_parsing() {
        let credentials = parse_sasl_plain(b"\x00demouser\x00demopass").unwrap();
        assert_eq!(credentials.authcid, "demouser");
        assert_eq!(credentials.secret.declassify(), "demopass");
        assert_eq!(credentials.authzid, None);

        let credentials = parse_sasl_plain(b"admin\x00demouser\x00demopass").unwrap();
        assert_eq!(credentials.authzid.as_deref(), Some("admin"));

        assert!(parse_sasl_plain(b"no-nuls-here").is_none());
        assert!(parse_sasl_plain(b"\x00\x00password").is_none());
    }

    #[test]
    fn uid_set_compresses_runs() {
        assert_eq!(uid_set(&[]), None);
        assert_eq!(uid_set(&[105]).unwrap().to_string(), "105");
        assert_eq!(uid_set(&[1, 2, 3, 5, 7, 8]).unwrap().to_string(), "1:3,5,7:8");
    }
}
