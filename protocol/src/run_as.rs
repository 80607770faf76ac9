//! Run-as request parameters.
//!
//! Collected by the caller (normally a dialog), consumed once by either the
//! direct-execution path or a broker call. The password lives in
//! zero-on-drop storage and is additionally cleared explicitly by whoever
//! consumes the parameters, so the plaintext does not outlive the request
//! even if the value itself is kept around.

use zeroize::Zeroize;
use zeroize::Zeroizing;

/// Logon types understood by the broker. Values travel on the wire as-is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum LogonType {
    Interactive = 2,
    Network = 3,
    Batch = 4,
    Service = 5,
    NetworkCleartext = 8,
    NewCredentials = 9,
}

/// A credential string that zeroes its storage on drop and is never printed.
#[derive(Clone)]
pub struct Secret(Zeroizing<String>);

impl Secret {
    pub fn new(value: String) -> Self {
        Self(Zeroizing::new(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_cleared(&self) -> bool {
        self.0.is_empty()
    }

    /// Wipes the secret in place.
    pub fn clear(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

/// Everything needed to execute a program as another user.
#[derive(Clone, Debug)]
pub struct RunAsParameters {
    /// Command line of the program to start.
    pub command_line: String,
    /// Explicit image path when the command line alone is ambiguous.
    pub file_name: Option<String>,
    pub current_directory: Option<String>,
    /// `domain\user`; absent when cloning a token from `process_id`.
    pub user_name: Option<String>,
    pub password: Option<Secret>,
    pub logon_type: LogonType,
    /// Process to clone the primary token from, instead of a fresh logon.
    pub process_id: Option<u32>,
    /// Terminal session the new process is placed in.
    pub session_id: u32,
    pub desktop_name: Option<String>,
    /// Use the elevated linked token when the logon produces a split token.
    pub use_linked_token: bool,
    pub create_suspended: bool,
    /// Channel/service name of the transient broker handling this request.
    pub service_name: Option<String>,
}

impl RunAsParameters {
    pub fn new(command_line: impl Into<String>, logon_type: LogonType, session_id: u32) -> Self {
        Self {
            command_line: command_line.into(),
            file_name: None,
            current_directory: None,
            user_name: None,
            password: None,
            logon_type,
            process_id: None,
            session_id,
            desktop_name: None,
            use_linked_token: false,
            create_suspended: false,
            service_name: None,
        }
    }

    /// Wipes credential material in place. Called by every consumer after
    /// the request has been carried out, whatever the outcome.
    pub fn clear_secrets(&mut self) {
        if let Some(password) = &mut self.password {
            password.clear();
        }
        self.password = None;
    }
}
