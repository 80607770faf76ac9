//! The run-as elevation bootstrap.
//!
//! Decides, per request, between three ways of getting a program started as
//! another user: reusing a broker provisioned by an earlier request,
//! executing directly in-process when the request needs nothing the caller
//! does not already have, or provisioning a fresh transient broker through
//! the service manager (prompting for elevation first when the caller is
//! not elevated).
//!
//! The broker takes a moment to start listening after its service is
//! started, so the connect is retried on a fixed cadence before giving up.

use std::sync::Mutex;
use std::sync::PoisonError;
use std::thread;
use std::time::Duration;

use opsvc_client::Session;
use opsvc_protocol::RunAsParameters;
use opsvc_protocol::channel;
use opsvc_protocol::run_as::LogonType;
use tracing::debug;

use crate::env::BrokerEnvironment;
use crate::error::ElevationError;
use crate::error::Result;

pub const CONNECT_ATTEMPTS: u32 = 10;
pub const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Progress of one run-as request through the bootstrap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BootstrapState {
    Idle,
    TryReuseExisting,
    TryDirectExecution,
    ProvisionBroker,
    Connecting,
    Invoking,
    Done,
}

/// Drives run-as requests against a [`BrokerEnvironment`].
///
/// The name of the last provisioned broker is cached under a lock so
/// repeated requests can skip re-provisioning while that broker is still
/// alive.
pub struct ElevationBootstrap<E> {
    env: E,
    reusable_broker: Mutex<Option<String>>,
}

impl<E: BrokerEnvironment> ElevationBootstrap<E> {
    pub fn new(env: E) -> Self {
        Self {
            env,
            reusable_broker: Mutex::new(None),
        }
    }

    pub fn environment(&self) -> &E {
        &self.env
    }

    /// Runs one request to completion. Credential material in `parameters`
    /// is cleared before this returns, whatever the outcome.
    pub fn run(&self, parameters: &mut RunAsParameters) -> Result<()> {
        let outcome = self.drive(parameters);
        parameters.clear_secrets();
        outcome
    }

    fn drive(&self, parameters: &mut RunAsParameters) -> Result<()> {
        let mut state = BootstrapState::Idle;

        // Reuse a broker provisioned by an earlier request if one is still
        // reachable. The check-and-use sequence holds the cache lock so two
        // callers cannot interleave against a dying broker.
        self.transition(&mut state, BootstrapState::TryReuseExisting);
        {
            let cache = self
                .reusable_broker
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(name) = cache.as_deref() {
                match self.env.connect(name) {
                    Ok(session) => {
                        parameters.service_name = Some(name.to_string());
                        self.transition(&mut state, BootstrapState::Invoking);
                        let result = Self::invoke(session, parameters, true);
                        self.transition(&mut state, BootstrapState::Done);
                        return result;
                    }
                    // The broker may have idled out for us but not for a
                    // racing caller, so the recorded name stays.
                    Err(err) => debug!(channel = name, %err, "cached broker unreachable"),
                }
            }
        }

        // Nothing about an interactive same-session request without a
        // donor token needs a broker; do it in-process.
        self.transition(&mut state, BootstrapState::TryDirectExecution);
        if self.direct_eligible(parameters) {
            let result = self.env.execute_direct(parameters);
            self.transition(&mut state, BootstrapState::Done);
            return result;
        }

        self.transition(&mut state, BootstrapState::ProvisionBroker);
        let service_name = channel::generate_name();
        *self
            .reusable_broker
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(service_name.clone());
        parameters.service_name = Some(service_name.clone());

        if self.env.is_elevated() {
            // Elevated callers provision the transient service themselves
            // and drive it directly.
            self.env.provision_broker(&service_name)?;
            self.transition(&mut state, BootstrapState::Connecting);
            let session = self.connect_with_retry(&service_name)?;
            self.transition(&mut state, BootstrapState::Invoking);
            let result = Self::invoke(session, parameters, true);
            self.transition(&mut state, BootstrapState::Done);
            result
        } else {
            // Otherwise an elevated helper does the provisioning on our
            // behalf; a declined prompt is terminal.
            let helper_channel = self.env.prompt_elevation()?;
            self.transition(&mut state, BootstrapState::Connecting);
            let session = self.connect_with_retry(&helper_channel)?;
            self.transition(&mut state, BootstrapState::Invoking);
            let result = Self::invoke(session, parameters, false);
            self.transition(&mut state, BootstrapState::Done);
            result
        }
    }

    /// Interactive logon, no donor process token, caller's own session, no
    /// linked token: nothing here needs the broker protocol at all.
    fn direct_eligible(&self, parameters: &RunAsParameters) -> bool {
        parameters.logon_type == LogonType::Interactive
            && parameters.process_id.is_none()
            && parameters.session_id == self.env.current_session_id()
            && !parameters.use_linked_token
    }

    fn connect_with_retry(&self, channel_name: &str) -> Result<Session> {
        for attempt in 1..=CONNECT_ATTEMPTS {
            match self.env.connect(channel_name) {
                Ok(session) => return Ok(session),
                Err(err) => {
                    debug!(channel = channel_name, attempt, %err, "broker not ready");
                }
            }
            if attempt != CONNECT_ATTEMPTS {
                thread::sleep(CONNECT_RETRY_DELAY);
            }
        }
        Err(ElevationError::Timeout)
    }

    fn invoke(mut session: Session, parameters: &RunAsParameters, direct_service: bool) -> Result<()> {
        let result = if direct_service {
            session.invoke_run_as_service(parameters)
        } else {
            session.execute_run_as_command(parameters)
        };
        session.disconnect();
        result.map_err(ElevationError::from)
    }

    fn transition(&self, state: &mut BootstrapState, next: BootstrapState) {
        debug!(from = ?state, to = ?next, "elevation bootstrap");
        *state = next;
    }
}
