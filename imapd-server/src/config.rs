//! Connection-level configuration.

use std::{fmt, sync::Arc, time::Duration};

use crate::session::Credentials;
use crate::stream::TlsUpgrader;

/// Everything the protocol engine needs to know besides the backend.
#[derive(Clone)]
pub struct ImapConfig {
    /// Announced in greetings and BYEs.
    pub hostname: String,

    /// Advertise and accept `STARTTLS`. Requires `tls` to be set.
    pub starttls_enabled: bool,

    /// Refuse plaintext `LOGIN`/`AUTHENTICATE` until the connection is
    /// TLS-protected, and advertise `LOGINDISABLED` until then.
    pub reject_insecure_auth: bool,

    /// When set, the transport already authenticated the client; greet with
    /// `PREAUTH` and start in the authenticated state.
    pub preauth_credentials: Option<Credentials>,

    /// Advertised as `APPENDLIMIT=`; appends above this are rejected with
    /// `NO [TOOBIG]`.
    pub max_append_len: u32,

    /// Largest literal accepted anywhere in a command.
    pub max_literal_len: u32,

    /// Consecutive BAD completions before the server gives up with a BYE.
    pub bad_command_limit: u32,

    /// Failed authentication attempts before the connection is dropped.
    pub bad_auth_limit: u32,

    /// Do not advertise or accept `IDLE`.
    pub disable_idle: bool,

    /// RFC 2177 advises at most 29 minutes per IDLE.
    pub idle_timeout: Duration,

    /// The TLS collaborator used by `STARTTLS`. The engine itself never
    /// links a TLS implementation.
    pub tls: Option<Arc<dyn TlsUpgrader>>,
}

impl Default for ImapConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost".into(),
            starttls_enabled: false,
            reject_insecure_auth: false,
            preauth_credentials: None,
            max_append_len: 32 * 1024 * 1024,
            max_literal_len: 64 * 1024 * 1024,
            bad_command_limit: 5,
            bad_auth_limit: 3,
            disable_idle: false,
            idle_timeout: Duration::from_secs(29 * 60),
            tls: None,
        }
    }
}

impl fmt::Debug for ImapConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ImapConfig")
            .field("hostname", &self.hostname)
            .field("starttls_enabled", &self.starttls_enabled)
            .field("reject_insecure_auth", &self.reject_insecure_auth)
            .field("preauth", &self.preauth_credentials.is_some())
            .field("max_append_len", &self.max_append_len)
            .field("max_literal_len", &self.max_literal_len)
            .field("bad_command_limit", &self.bad_command_limit)
            .field("bad_auth_limit", &self.bad_auth_limit)
            .field("disable_idle", &self.disable_idle)
            .field("idle_timeout", &self.idle_timeout)
            .field("tls", &self.tls.is_some())
            .finish()
    }
}
